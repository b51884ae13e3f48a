//! Upsert rules for each entity of the transit graph.
//!
//! The free functions build store requests without touching a store, so the importer
//! can buffer them. [GraphBuilder] applies them to a [GraphStore] and turns missing
//! endpoints into warnings.

use crate::graph_store::{
    Edge, EdgeType, GraphStore, Label, NodeRef, NodeUpsert, Properties, Result,
};
use crate::identity::{Direction, PathPointKey};
use crate::props;
use log::{debug, info, warn};
use std::ops::AddAssign;

/// Descriptive attributes of a line, stored verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineAttributes {
    pub short_name: String,
    pub long_name: String,
    pub route_type: String,
    pub description: String,
    pub color: String,
    pub text_color: String,
}

/// Timetable attached to an existing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleAttributes {
    pub weekday_times: String,
    pub saturday_times: String,
    pub sunday_times: String,
    pub notes: String,
    /// Replaces the line short name when not empty
    pub short_name: String,
    pub direction: Direction,
}

/// Outcome of a group of link or attach requests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkCount {
    pub linked: usize,
    /// Requests dropped because a node was missing
    pub dangling: usize,
}

impl LinkCount {
    fn record(&mut self, linked: bool) {
        if linked {
            self.linked += 1;
        } else {
            self.dangling += 1;
        }
    }
}

impl AddAssign for LinkCount {
    fn add_assign(&mut self, other: Self) {
        self.linked += other.linked;
        self.dangling += other.dangling;
    }
}

pub fn station(id: &str, name: &str, lat: f64, lon: f64, code: Option<&str>) -> NodeUpsert {
    NodeUpsert::new(
        Label::Station,
        id,
        props! {
            "name" => name,
            "lat" => lat,
            "lon" => lon,
            "stop_code" => code.unwrap_or_default(),
        },
    )
}

/// Coordinates are refreshed on every call, the shape id and sequence are only
/// written when the point is created.
pub fn path_point(key: &PathPointKey, lat: f64, lon: f64) -> NodeUpsert {
    NodeUpsert::new(
        Label::PathPoint,
        key.to_string(),
        props! { "lat" => lat, "lon" => lon },
    )
    .with_create_only(props! {
        "shape_id" => key.shape_id.as_str(),
        "sequence" => key.sequence,
    })
}

/// Edge from the predecessor of `key` to `key`, none for the first point of a shape
pub fn follows_point(key: &PathPointKey) -> Option<Edge> {
    key.predecessor().map(|previous| Edge {
        from: NodeRef::new(Label::PathPoint, previous.to_string()),
        to: NodeRef::new(Label::PathPoint, key.to_string()),
        edge_type: EdgeType::FollowsPoint,
        tags: props! { "shape_id" => key.shape_id.as_str() },
    })
}

pub fn line(id: &str, attributes: &LineAttributes, direction: Direction) -> NodeUpsert {
    NodeUpsert::new(
        Label::Line,
        id,
        props! {
            "short_name" => attributes.short_name.as_str(),
            "long_name" => attributes.long_name.as_str(),
            "route_type" => attributes.route_type.as_str(),
            "description" => attributes.description.as_str(),
            "color" => attributes.color.as_str(),
            "text_color" => attributes.text_color.as_str(),
            "direction" => direction.as_str(),
        },
    )
}

pub fn on_route(station_id: &str, line_id: &str, direction: Direction, ordinal: usize) -> Edge {
    Edge {
        from: NodeRef::new(Label::Station, station_id),
        to: NodeRef::new(Label::Line, line_id),
        edge_type: EdgeType::OnRoute,
        tags: props! { "direction" => direction.as_str(), "ordinal" => ordinal },
    }
}

pub fn next_stop(
    from_station: &str,
    to_station: &str,
    line_id: &str,
    line_short_name: &str,
    direction: Direction,
    ordinal: usize,
) -> Edge {
    Edge {
        from: NodeRef::new(Label::Station, from_station),
        to: NodeRef::new(Label::Station, to_station),
        edge_type: EdgeType::NextStop,
        tags: props! {
            "route_id" => line_id,
            "short_name" => line_short_name,
            "direction" => direction.as_str(),
            "ordinal" => ordinal,
        },
    }
}

/// `ON_ROUTE` and `NEXT_STOP` edges of a line, from its ordered stop list
///
/// For N stops this is N `ON_ROUTE` edges with ordinals `0..N` and N-1 `NEXT_STOP`
/// edges with ordinals `0..N-1`, so the station at rank `i` leaves through the
/// `NEXT_STOP` edge of ordinal `i`.
pub fn line_stops(
    line_id: &str,
    line_short_name: &str,
    direction: Direction,
    stops: &[String],
) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(stops.len() * 2);
    for (ordinal, station_id) in stops.iter().enumerate() {
        edges.push(on_route(station_id, line_id, direction, ordinal));
        if let Some(next) = stops.get(ordinal + 1) {
            edges.push(next_stop(
                station_id,
                next,
                line_id,
                line_short_name,
                direction,
                ordinal,
            ));
        }
    }
    edges
}

/// Attributes written on a line by [GraphBuilder::attach_schedule]
pub fn schedule_update(schedule: &ScheduleAttributes) -> Properties {
    let mut update = props! {
        "weekday_times" => schedule.weekday_times.as_str(),
        "saturday_times" => schedule.saturday_times.as_str(),
        "sunday_times" => schedule.sunday_times.as_str(),
        "schedule_notes" => schedule.notes.as_str(),
        "schedule_direction" => schedule.direction.as_str(),
    };
    if !schedule.short_name.is_empty() {
        update.insert("short_name".into(), schedule.short_name.as_str().into());
    }
    update
}

pub struct GraphBuilder<'a, S: GraphStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: GraphStore + ?Sized> GraphBuilder<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &*self.store
    }

    /// Unique keys and lookup indexes. Safe to call on an existing graph.
    pub fn prepare_schema(&mut self) -> Result<()> {
        for label in Label::ALL {
            self.store.ensure_unique_constraint(label, label.key_field())?;
        }
        self.store.ensure_index(Label::Station, &["name"])?;
        self.store.ensure_index(Label::Line, &["long_name"])?;
        self.store.ensure_index(Label::Station, &["lat", "lon"])?;
        self.store.ensure_index(Label::PathPoint, &["shape_id"])?;
        info!("graph schema ready");
        Ok(())
    }

    /// Wipes the whole graph
    pub fn reset(&mut self) -> Result<()> {
        self.store.clear_all()?;
        info!("graph cleared");
        Ok(())
    }

    pub fn upsert_station(
        &mut self,
        id: &str,
        name: &str,
        lat: f64,
        lon: f64,
        code: Option<&str>,
    ) -> Result<()> {
        self.store.upsert_node(&station(id, name, lat, lon, code))
    }

    pub fn upsert_path_point(&mut self, shape_id: &str, sequence: u32, lat: f64, lon: f64) -> Result<()> {
        self.store
            .upsert_node(&path_point(&PathPointKey::new(shape_id, sequence), lat, lon))
    }

    /// Links point `sequence - 1` to point `sequence` of a shape.
    ///
    /// Returns false for the first point, or when the predecessor was never imported.
    pub fn link_consecutive_points(&mut self, shape_id: &str, sequence: u32) -> Result<bool> {
        match follows_point(&PathPointKey::new(shape_id, sequence)) {
            Some(edge) => self.link(&edge),
            None => Ok(false),
        }
    }

    pub fn upsert_line(&mut self, id: &str, attributes: &LineAttributes, direction: Direction) -> Result<()> {
        self.store.upsert_node(&line(id, attributes, direction))
    }

    pub fn link_station_to_line(
        &mut self,
        station_id: &str,
        line_id: &str,
        direction: Direction,
        ordinal: usize,
    ) -> Result<bool> {
        self.link(&on_route(station_id, line_id, direction, ordinal))
    }

    pub fn link_consecutive_stations(
        &mut self,
        from_station: &str,
        to_station: &str,
        line_id: &str,
        line_short_name: &str,
        direction: Direction,
        ordinal: usize,
    ) -> Result<bool> {
        self.link(&next_stop(
            from_station,
            to_station,
            line_id,
            line_short_name,
            direction,
            ordinal,
        ))
    }

    /// Links every station of a line in one pass, see [line_stops]
    pub fn build_line_stops(
        &mut self,
        line_id: &str,
        line_short_name: &str,
        direction: Direction,
        stops: &[String],
    ) -> Result<LinkCount> {
        self.apply_edges(&line_stops(line_id, line_short_name, direction, stops))
    }

    /// Returns false, and changes nothing, if the line does not exist yet
    pub fn attach_schedule(&mut self, line_id: &str, schedule: &ScheduleAttributes) -> Result<bool> {
        let line = NodeRef::new(Label::Line, line_id);
        let attached = self.store.update_node(&line, &schedule_update(schedule))?;
        if !attached {
            warn!("schedule for unknown line {line_id} ignored");
        }
        Ok(attached)
    }

    pub fn apply_nodes(&mut self, nodes: &[NodeUpsert]) -> Result<()> {
        self.store.upsert_nodes(nodes)
    }

    pub fn apply_edges(&mut self, edges: &[Edge]) -> Result<LinkCount> {
        let mut count = LinkCount::default();
        for (edge, linked) in edges.iter().zip(self.store.upsert_edges(edges)?) {
            if !linked {
                report_dangling(edge);
            }
            count.record(linked);
        }
        Ok(count)
    }

    pub fn apply_updates(&mut self, updates: &[(NodeRef, Properties)]) -> Result<LinkCount> {
        let mut count = LinkCount::default();
        for (node, attributes) in updates {
            let updated = self.store.update_node(node, attributes)?;
            if !updated {
                warn!("update of unknown {node} ignored");
            }
            count.record(updated);
        }
        Ok(count)
    }

    fn link(&mut self, edge: &Edge) -> Result<bool> {
        let linked = self.store.upsert_edge(edge)?;
        if !linked {
            report_dangling(edge);
        }
        Ok(linked)
    }
}

/// Shape points delivered out of order are expected, so they are only debug output
fn report_dangling(edge: &Edge) {
    match edge.edge_type {
        EdgeType::FollowsPoint => {
            debug!("{} -> {}: no predecessor point, chain left open", edge.from, edge.to)
        }
        _ => warn!(
            "{} {} -> {}: endpoint missing, edge skipped",
            edge.edge_type, edge.from, edge.to
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{AggregateQuery, MemoryGraphStore};

    fn count(store: &MemoryGraphStore, query: AggregateQuery) -> u64 {
        store.run_aggregate_query(&query).unwrap()[0].count
    }

    fn stops(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn tag<'e>(edge: &'e Edge, name: &str) -> &'e crate::graph_store::PropertyValue {
        &edge.tags[name]
    }

    #[test]
    fn station_upsert_overwrites_every_attribute() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        builder.upsert_station("1", "Old", 1.0, 2.0, Some("C1")).unwrap();
        builder.upsert_station("1", "New", 3.0, 4.0, None).unwrap();

        let node = store.node(&NodeRef::new(Label::Station, "1")).unwrap().unwrap();
        assert_eq!(Some("New"), node["name"].as_text());
        assert_eq!(Some(3.0), node["lat"].as_float());
        assert_eq!(Some(4.0), node["lon"].as_float());
        assert_eq!(Some(""), node["stop_code"].as_text());
        assert_eq!(1, count(&store, AggregateQuery::CountNodes(Label::Station)));
    }

    #[test]
    fn point_chain() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        for sequence in 0..4 {
            builder.upsert_path_point("s", sequence, 41.0, 29.0).unwrap();
            let linked = builder.link_consecutive_points("s", sequence).unwrap();
            assert_eq!(sequence > 0, linked);
        }
        assert!(!builder.link_consecutive_points("s", 9).unwrap());
        builder.upsert_path_point("s", 2, 40.0, 28.0).unwrap();

        let edges = store.edges(EdgeType::FollowsPoint).unwrap();
        let chain: Vec<_> = edges
            .iter()
            .map(|e| (e.from.key.as_str(), e.to.key.as_str()))
            .collect();
        assert_eq!(vec![("s_0", "s_1"), ("s_1", "s_2"), ("s_2", "s_3")], chain);
        assert!(edges.iter().all(|e| tag(e, "shape_id").as_text() == Some("s")));

        let point = store.node(&NodeRef::new(Label::PathPoint, "s_2")).unwrap().unwrap();
        assert_eq!(Some(40.0), point["lat"].as_float());
        assert_eq!(Some(2), point["sequence"].as_int());
        assert_eq!(Some("s"), point["shape_id"].as_text());
    }

    #[test]
    fn ordinals_of_on_route_and_next_stop_agree() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        for id in ["A", "B", "C"] {
            builder.upsert_station(id, id, 0.0, 0.0, None).unwrap();
        }
        builder
            .upsert_line("L", &LineAttributes::default(), Direction::Outbound)
            .unwrap();
        let links = builder
            .build_line_stops("L", "7", Direction::Outbound, &stops(&["A", "B", "C"]))
            .unwrap();
        assert_eq!(LinkCount { linked: 5, dangling: 0 }, links);

        let on_route: Vec<_> = store
            .edges(EdgeType::OnRoute)
            .unwrap()
            .iter()
            .map(|e| (e.from.key.clone(), e.to.key.clone(), tag(e, "ordinal").as_int()))
            .collect();
        assert_eq!(
            vec![
                ("A".to_string(), "L".to_string(), Some(0)),
                ("B".to_string(), "L".to_string(), Some(1)),
                ("C".to_string(), "L".to_string(), Some(2)),
            ],
            on_route
        );

        let next_stop = store.edges(EdgeType::NextStop).unwrap();
        let pairs: Vec<_> = next_stop
            .iter()
            .map(|e| (e.from.key.as_str(), e.to.key.as_str(), tag(e, "ordinal").as_int()))
            .collect();
        assert_eq!(vec![("A", "B", Some(0)), ("B", "C", Some(1))], pairs);
        assert_eq!(Some("7"), tag(&next_stop[0], "short_name").as_text());
        assert_eq!(Some("L"), tag(&next_stop[0], "route_id").as_text());
        assert_eq!(Some("outbound"), tag(&next_stop[0], "direction").as_text());
    }

    #[test]
    fn parallel_next_stop_edges_of_different_lines() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        builder.upsert_station("A", "A", 0.0, 0.0, None).unwrap();
        builder.upsert_station("B", "B", 0.0, 0.0, None).unwrap();
        for line in ["10", "20"] {
            builder
                .upsert_line(line, &LineAttributes::default(), Direction::infer(line))
                .unwrap();
            builder
                .build_line_stops(line, line, Direction::infer(line), &stops(&["A", "B"]))
                .unwrap();
        }
        builder
            .build_line_stops("10", "10", Direction::Outbound, &stops(&["A", "B"]))
            .unwrap();
        assert_eq!(2, count(&store, AggregateQuery::CountEdges(EdgeType::NextStop)));
        assert_eq!(4, count(&store, AggregateQuery::CountEdges(EdgeType::OnRoute)));
    }

    #[test]
    fn dangling_references_are_skipped() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        builder.upsert_station("A", "A", 0.0, 0.0, None).unwrap();
        builder
            .upsert_line("L", &LineAttributes::default(), Direction::Outbound)
            .unwrap();
        assert!(!builder
            .link_station_to_line("ghost", "L", Direction::Outbound, 0)
            .unwrap());
        assert!(!builder
            .link_consecutive_stations("A", "ghost", "L", "", Direction::Outbound, 0)
            .unwrap());
        let links = builder
            .build_line_stops("L", "", Direction::Outbound, &stops(&["A", "ghost"]))
            .unwrap();
        assert_eq!(LinkCount { linked: 1, dangling: 2 }, links);
        assert_eq!(1, store.edge_count());
    }

    #[test]
    fn schedules_need_an_existing_line() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        let attributes = LineAttributes {
            short_name: "14".into(),
            long_name: "Harbour - Hills".into(),
            ..Default::default()
        };
        builder.upsert_line("140", &attributes, Direction::Outbound).unwrap();

        let mut schedule = ScheduleAttributes {
            weekday_times: "06:00 06:20".into(),
            saturday_times: "07:00".into(),
            sunday_times: String::new(),
            notes: "red: short turn".into(),
            short_name: String::new(),
            direction: Direction::Inbound,
        };
        assert!(builder.attach_schedule("140", &schedule).unwrap());
        assert!(!builder.attach_schedule("999", &schedule).unwrap());

        let line = NodeRef::new(Label::Line, "140");
        let node = store.node(&line).unwrap().unwrap();
        assert_eq!(Some("14"), node["short_name"].as_text());
        assert_eq!(Some("outbound"), node["direction"].as_text());
        assert_eq!(Some("inbound"), node["schedule_direction"].as_text());
        assert_eq!(Some("red: short turn"), node["schedule_notes"].as_text());
        assert_eq!(Some("06:00 06:20"), node["weekday_times"].as_text());

        schedule.short_name = "14A".into();
        GraphBuilder::new(&mut store).attach_schedule("140", &schedule).unwrap();
        let node = store.node(&line).unwrap().unwrap();
        assert_eq!(Some("14A"), node["short_name"].as_text());
        assert!(store.node(&NodeRef::new(Label::Line, "999")).unwrap().is_none());
    }

    #[test]
    fn schema_preparation_is_repeatable() {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        builder.prepare_schema().unwrap();
        builder.prepare_schema().unwrap();
        builder.upsert_station("A", "A", 0.0, 0.0, None).unwrap();
        builder.reset().unwrap();
        assert_eq!(0, store.node_count());
        assert!(store.has_index(Label::Station, &["lat", "lon"]));
        assert!(store.has_index(Label::PathPoint, &["shape_id"]));
    }
}
