//! Read-only statistics over a built graph.

use crate::graph_store::{AggregateQuery, AggregateRecord, EdgeType, GraphStore, Label, Result};
use std::fmt;

/// Length of every ranking in a [GraphSummary]
pub const TOP_K: usize = 5;

pub fn node_count<S: GraphStore + ?Sized>(store: &S, label: Label) -> Result<u64> {
    single_count(store, &AggregateQuery::CountNodes(label))
}

pub fn edge_count<S: GraphStore + ?Sized>(store: &S, edge_type: EdgeType) -> Result<u64> {
    single_count(store, &AggregateQuery::CountEdges(edge_type))
}

fn single_count<S: GraphStore + ?Sized>(store: &S, query: &AggregateQuery) -> Result<u64> {
    Ok(store
        .run_aggregate_query(query)?
        .first()
        .map(|record| record.count)
        .unwrap_or_default())
}

/// Candidate transfer hubs: stations served by the most distinct lines
pub fn transfer_hubs<S: GraphStore + ?Sized>(store: &S, k: usize) -> Result<Vec<AggregateRecord>> {
    store.run_aggregate_query(&AggregateQuery::TopStationsByLineCount { limit: k })
}

/// Like [transfer_hubs], but both directions of a line count once
pub fn transfer_hubs_by_line_name<S: GraphStore + ?Sized>(
    store: &S,
    k: usize,
) -> Result<Vec<AggregateRecord>> {
    store.run_aggregate_query(&AggregateQuery::TopStationsByLineNameCount { limit: k })
}

/// Lines with the most stops
pub fn longest_lines<S: GraphStore + ?Sized>(store: &S, k: usize) -> Result<Vec<AggregateRecord>> {
    store.run_aggregate_query(&AggregateQuery::TopLinesByStationCount { limit: k })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSummary {
    pub nodes: Vec<(Label, u64)>,
    pub edges: Vec<(EdgeType, u64)>,
    pub transfer_hubs: Vec<AggregateRecord>,
    pub transfer_hubs_by_line_name: Vec<AggregateRecord>,
    pub longest_lines: Vec<AggregateRecord>,
}

impl GraphSummary {
    pub fn collect<S: GraphStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(Self {
            nodes: Label::ALL
                .into_iter()
                .map(|label| Ok((label, node_count(store, label)?)))
                .collect::<Result<_>>()?,
            edges: EdgeType::ALL
                .into_iter()
                .map(|edge_type| Ok((edge_type, edge_count(store, edge_type)?)))
                .collect::<Result<_>>()?,
            transfer_hubs: transfer_hubs(store, TOP_K)?,
            transfer_hubs_by_line_name: transfer_hubs_by_line_name(store, TOP_K)?,
            longest_lines: longest_lines(store, TOP_K)?,
        })
    }

    pub fn node_count(&self, label: Label) -> u64 {
        self.nodes
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, count)| *count)
            .unwrap_or_default()
    }

    pub fn edge_count(&self, edge_type: EdgeType) -> u64 {
        self.edges
            .iter()
            .find(|(t, _)| *t == edge_type)
            .map(|(_, count)| *count)
            .unwrap_or_default()
    }
}

fn write_ranking(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    unit: &str,
    records: &[AggregateRecord],
) -> fmt::Result {
    writeln!(f, "{title}:")?;
    if records.is_empty() {
        return writeln!(f, "  (none)");
    }
    for (rank, record) in records.iter().enumerate() {
        write!(f, "  {}. {} [{}]", rank + 1, record.name, record.key)?;
        if !record.detail.is_empty() {
            write!(f, " ({})", record.detail)?;
        }
        writeln!(f, ": {} {unit}", record.count)?;
    }
    Ok(())
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nodes:")?;
        for (label, count) in &self.nodes {
            writeln!(f, "  {label:<12} {count:>10}")?;
        }
        writeln!(f, "Relationships:")?;
        for (edge_type, count) in &self.edges {
            writeln!(f, "  {edge_type:<14} {count:>8}")?;
        }
        write_ranking(f, "Top transfer stations", "lines", &self.transfer_hubs)?;
        write_ranking(
            f,
            "Top transfer stations by line number",
            "line numbers",
            &self.transfer_hubs_by_line_name,
        )?;
        write_ranking(f, "Longest lines", "stops", &self.longest_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_builder::{GraphBuilder, LineAttributes};
    use crate::graph_store::MemoryGraphStore;
    use crate::identity::Direction;

    fn network() -> MemoryGraphStore {
        let mut store = MemoryGraphStore::new();
        let mut builder = GraphBuilder::new(&mut store);
        for id in ["A", "B", "C", "D"] {
            builder
                .upsert_station(id, &format!("Station {id}"), 0.0, 0.0, None)
                .unwrap();
        }
        let lines: [(&str, &str, &[&str]); 3] = [
            ("20", "2", &["A", "B", "C", "D"]),
            ("21", "2", &["D", "C", "B"]),
            ("30", "3", &["B", "D"]),
        ];
        for (id, short_name, stops) in lines {
            let attributes = LineAttributes {
                short_name: short_name.into(),
                long_name: format!("Line {id}"),
                ..Default::default()
            };
            let direction = Direction::infer(id);
            builder.upsert_line(id, &attributes, direction).unwrap();
            let stops: Vec<String> = stops.iter().map(|s| s.to_string()).collect();
            builder
                .build_line_stops(id, short_name, direction, &stops)
                .unwrap();
        }
        store
    }

    #[test]
    fn summary_of_a_small_network() {
        let store = network();
        let summary = GraphSummary::collect(&store).unwrap();

        assert_eq!(4, summary.node_count(Label::Station));
        assert_eq!(3, summary.node_count(Label::Line));
        assert_eq!(0, summary.node_count(Label::PathPoint));
        assert_eq!(9, summary.edge_count(EdgeType::OnRoute));
        assert_eq!(6, summary.edge_count(EdgeType::NextStop));

        let hubs: Vec<_> = summary
            .transfer_hubs
            .iter()
            .map(|r| (r.key.as_str(), r.count))
            .collect();
        assert_eq!(vec![("B", 3), ("D", 3), ("C", 2), ("A", 1)], hubs);
        assert_eq!("Station B", summary.transfer_hubs[0].name);

        let by_name: Vec<_> = summary
            .transfer_hubs_by_line_name
            .iter()
            .map(|r| (r.key.as_str(), r.count))
            .collect();
        assert_eq!(vec![("B", 2), ("D", 2), ("A", 1), ("C", 1)], by_name);

        let longest = &summary.longest_lines;
        assert_eq!("20", longest[0].key);
        assert_eq!(4, longest[0].count);
        assert_eq!("outbound", longest[0].detail);
        assert_eq!("inbound", longest[1].detail);
    }

    #[test]
    fn aggregates_do_not_mutate() {
        let store = network();
        let before = GraphSummary::collect(&store).unwrap();
        let after = GraphSummary::collect(&store).unwrap();
        assert_eq!(before, after);
        assert_eq!(7, store.node_count());
    }

    #[test]
    fn rankings_are_truncated() {
        let store = network();
        assert_eq!(2, transfer_hubs(&store, 2).unwrap().len());
        assert_eq!(1, longest_lines(&store, 1).unwrap().len());
    }

    #[test]
    fn display() {
        let summary = GraphSummary::collect(&MemoryGraphStore::new()).unwrap();
        let text = summary.to_string();
        assert!(text.contains("Station"));
        assert!(text.contains("NEXT_STOP"));
        assert!(text.contains("(none)"));
    }
}
