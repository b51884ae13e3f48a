//! The four import phases and the full rebuild.
//!
//! Each phase reads one source file and feeds the [GraphBuilder] in batches of
//! `batch_size` rows. A batch collapses repeated upserts of the same node into
//! one, keeps every edge request, and always writes its nodes before its edges,
//! so a shape point is stored before the edge that reaches it. Phases return
//! their own counters in a [PhaseReport] instead of sharing any state.

use crate::aggregate::GraphSummary;
use crate::configuration::ImportConfiguration;
use crate::graph_builder::{self, GraphBuilder, LineAttributes, LinkCount, ScheduleAttributes};
use crate::graph_store::{Edge, GraphStore, Label, NodeRef, NodeUpsert, Properties, StoreError};
use crate::identity::{parse_stop_list, Direction, PathPointKey};
use feed_records::{
    FeedRecord, ReadStats, Records, RouteRecord, ScheduleRecord, ShapePointRecord, StopRecord,
};
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of shapes listed in a [ShapeTally]
const LONGEST_SHAPES: usize = 5;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Stations,
    Shapes,
    Routes,
    Schedules,
}

impl Phase {
    /// Accepted rows between two progress messages
    pub fn progress_interval(&self) -> usize {
        match self {
            Phase::Stations => 1000,
            Phase::Shapes => 10000,
            Phase::Routes => 100,
            Phase::Schedules => 50,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Phase::Stations => "stations",
            Phase::Shapes => "shapes",
            Phase::Routes => "routes",
            Phase::Schedules => "schedules",
        })
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot read the {phase} source")]
    Source {
        phase: Phase,
        #[source]
        source: feed_records::Error,
    },
}

/// Point counts of the shapes seen by the shapes phase
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShapeTally {
    pub shapes: usize,
    pub points: usize,
    /// Shapes with the most points, descending, ties by shape id
    pub longest: Vec<(String, usize)>,
}

impl ShapeTally {
    fn from_counts(counts: FxHashMap<String, usize>) -> Self {
        let points = counts.values().sum();
        let shapes = counts.len();
        let mut longest: Vec<(String, usize)> = counts.into_iter().collect();
        longest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        longest.truncate(LONGEST_SHAPES);
        Self {
            shapes,
            points,
            longest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub rows: ReadStats,
    /// Edges created, or schedules attached, against requests left dangling
    pub links: LinkCount,
    pub shape_tally: Option<ShapeTally>,
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows read, {} imported, {} skipped, {} linked, {} dangling",
            self.phase,
            self.rows.read,
            self.rows.accepted,
            self.rows.skipped,
            self.links.linked,
            self.links.dangling
        )?;
        if let Some(tally) = &self.shape_tally {
            write!(f, ", {} shapes of {} points", tally.shapes, tally.points)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed(PhaseReport),
    /// The source file does not exist
    Skipped { phase: Phase, path: PathBuf },
}

impl PhaseOutcome {
    pub fn report(&self) -> Option<&PhaseReport> {
        match self {
            PhaseOutcome::Completed(report) => Some(report),
            PhaseOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub phases: Vec<PhaseOutcome>,
    pub summary: GraphSummary,
}

/// Requests of up to `batch_size` rows, waiting to be written
#[derive(Default)]
struct Batch {
    nodes: Vec<NodeUpsert>,
    positions: FxHashMap<NodeRef, usize>,
    edges: Vec<Edge>,
    updates: Vec<(NodeRef, Properties)>,
    rows: usize,
}

impl Batch {
    /// A repeated node keeps the create-only values of its first upsert and the
    /// attributes of its last, as if the rows had been written one by one.
    fn push_node(&mut self, node: NodeUpsert) {
        match self.positions.get(&node.node_ref()) {
            Some(&position) => self.nodes[position].attributes.extend(node.attributes),
            None => {
                self.positions.insert(node.node_ref(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    fn push_edges<I: IntoIterator<Item = Edge>>(&mut self, edges: I) {
        self.edges.extend(edges);
    }

    fn push_update(&mut self, node: NodeRef, attributes: Properties) {
        self.updates.push((node, attributes));
    }

    fn end_row(&mut self) {
        self.rows += 1;
    }

    fn flush<S: GraphStore + ?Sized>(
        &mut self,
        builder: &mut GraphBuilder<'_, S>,
    ) -> Result<LinkCount, StoreError> {
        let mut links = LinkCount::default();
        if self.rows == 0 {
            return Ok(links);
        }
        builder.apply_nodes(&self.nodes)?;
        links += builder.apply_edges(&self.edges)?;
        links += builder.apply_updates(&self.updates)?;
        *self = Batch::default();
        Ok(links)
    }
}

pub struct Importer<'a, S: GraphStore + ?Sized> {
    builder: GraphBuilder<'a, S>,
    config: &'a ImportConfiguration,
}

impl<'a, S: GraphStore + ?Sized> Importer<'a, S> {
    pub fn new(store: &'a mut S, config: &'a ImportConfiguration) -> Self {
        Self {
            builder: GraphBuilder::new(store),
            config,
        }
    }

    pub fn store(&self) -> &S {
        self.builder.store()
    }

    /// Wipes the graph, prepares the schema, runs every phase and summarizes the result
    ///
    /// A missing source only skips its phase; a store failure aborts the run.
    pub fn run_full_rebuild(&mut self) -> Result<RebuildReport, ImportError> {
        self.builder.reset()?;
        self.builder.prepare_schema()?;

        let phases = vec![
            self.import_stations()?,
            self.import_shapes()?,
            self.import_routes()?,
            self.import_schedules()?,
        ];
        let summary = GraphSummary::collect(self.builder.store())?;
        info!("rebuild finished\n{summary}");
        Ok(RebuildReport { phases, summary })
    }

    pub fn import_stations(&mut self) -> Result<PhaseOutcome, ImportError> {
        let path = self.config.stops_path();
        self.run_phase(Phase::Stations, path, |record: StopRecord, batch| {
            batch.push_node(graph_builder::station(
                &record.id,
                &record.name,
                record.latitude.unwrap_or_default(),
                record.longitude.unwrap_or_default(),
                record.code.as_deref(),
            ));
        })
    }

    pub fn import_shapes(&mut self) -> Result<PhaseOutcome, ImportError> {
        let path = self.config.shapes_path();
        let mut points_per_shape: FxHashMap<String, usize> = FxHashMap::default();
        let outcome = self.run_phase(Phase::Shapes, path, |record: ShapePointRecord, batch| {
            *points_per_shape.entry(record.shape_id.clone()).or_default() += 1;
            let key = PathPointKey::new(record.shape_id, record.sequence);
            batch.push_node(graph_builder::path_point(
                &key,
                record.latitude,
                record.longitude,
            ));
            batch.push_edges(graph_builder::follows_point(&key));
        })?;

        Ok(match outcome {
            PhaseOutcome::Completed(mut report) => {
                let tally = ShapeTally::from_counts(points_per_shape);
                for (rank, (shape_id, points)) in tally.longest.iter().enumerate() {
                    info!("shape #{}: {shape_id} with {points} points", rank + 1);
                }
                report.shape_tally = Some(tally);
                PhaseOutcome::Completed(report)
            }
            skipped => skipped,
        })
    }

    pub fn import_routes(&mut self) -> Result<PhaseOutcome, ImportError> {
        let path = self.config.routes_path();
        self.run_phase(Phase::Routes, path, |record: RouteRecord, batch| {
            let direction = Direction::infer(&record.id);
            let stops = parse_stop_list(&record.stops);
            if stops.is_empty() {
                warn!("line {} has no stops", record.id);
            }
            let attributes = LineAttributes {
                short_name: record.short_name,
                long_name: record.long_name,
                route_type: record.route_type,
                description: record.desc,
                color: record.color,
                text_color: record.text_color,
            };
            batch.push_node(graph_builder::line(&record.id, &attributes, direction));
            batch.push_edges(graph_builder::line_stops(
                &record.id,
                &attributes.short_name,
                direction,
                &stops,
            ));
        })
    }

    pub fn import_schedules(&mut self) -> Result<PhaseOutcome, ImportError> {
        let path = self.config.schedules_path();
        self.run_phase(Phase::Schedules, path, |record: ScheduleRecord, batch| {
            let schedule = ScheduleAttributes {
                direction: Direction::resolve(record.direction.as_deref(), &record.route_id),
                weekday_times: record.weekday_times,
                saturday_times: record.saturday_times,
                sunday_times: record.sunday_times,
                notes: record.notes,
                short_name: record.short_name,
            };
            batch.push_update(
                NodeRef::new(Label::Line, record.route_id),
                graph_builder::schedule_update(&schedule),
            );
        })
    }

    fn open<O: FeedRecord>(
        &self,
        phase: Phase,
        path: &Path,
    ) -> Result<Option<Records<O, File>>, ImportError> {
        match self.config.reader.read_path(path) {
            Ok(records) => Ok(Some(records)),
            Err(feed_records::Error::MissingFile(missing)) => {
                warn!("{phase}: {missing} not found, phase skipped");
                Ok(None)
            }
            Err(source) => Err(ImportError::Source { phase, source }),
        }
    }

    /// Reads every valid row of one source, turns it into requests with `add_row`
    /// and writes them batch by batch.
    fn run_phase<O, F>(
        &mut self,
        phase: Phase,
        path: PathBuf,
        add_row: F,
    ) -> Result<PhaseOutcome, ImportError>
    where
        O: FeedRecord,
        F: FnMut(O, &mut Batch),
    {
        let Some(records) = self.open::<O>(phase, &path)? else {
            return Ok(PhaseOutcome::Skipped { phase, path });
        };
        info!("{phase}: importing {}", path.display());
        self.import_records(phase, records, add_row)
            .map(PhaseOutcome::Completed)
    }

    /// Rows imported before an I/O failure are written, then the failure is returned.
    fn import_records<O, R, F>(
        &mut self,
        phase: Phase,
        mut records: Records<O, R>,
        mut add_row: F,
    ) -> Result<PhaseReport, ImportError>
    where
        O: FeedRecord,
        R: Read,
        F: FnMut(O, &mut Batch),
    {
        let batch_size = self.config.batch_size.max(1);
        let interval = phase.progress_interval();
        let mut batch = Batch::default();
        let mut links = LinkCount::default();
        let mut imported = 0;

        for record in records.by_ref() {
            add_row(record, &mut batch);
            batch.end_row();
            imported += 1;
            if batch.rows >= batch_size {
                links += batch.flush(&mut self.builder)?;
            }
            if imported % interval == 0 {
                info!("{phase}: {imported} rows imported");
            }
        }
        links += batch.flush(&mut self.builder)?;
        let rows = records
            .finish()
            .map_err(|source| ImportError::Source { phase, source })?;

        let report = PhaseReport {
            phase,
            rows,
            links,
            shape_tally: None,
        };
        info!("{report}");
        Ok(report)
    }
}
