use super::{
    check_identifier, rank, AggregateQuery, AggregateRecord, Edge, EdgeType, GraphStore, Label,
    NodeRef, NodeUpsert, Properties, PropertyValue, Result, StoreError,
};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone)]
struct StoredNode {
    label: Label,
    key: String,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct StoredEdge {
    edge_type: EdgeType,
    tags: Properties,
}

/// In-process graph store
///
/// Nodes and edges live in a petgraph [DiGraph]; a hash index maps `(label, key)`
/// to node indices. Nodes are never removed one by one, so indices stay valid
/// until [GraphStore::clear_all].
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: DiGraph<StoredNode, StoredEdge>,
    index: FxHashMap<(Label, String), NodeIndex>,
    unique: FxHashSet<(Label, String)>,
    indexes: FxHashSet<(Label, Vec<String>)>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether [GraphStore::ensure_index] was called for exactly these fields
    pub fn has_index(&self, label: Label, fields: &[&str]) -> bool {
        self.indexes
            .iter()
            .any(|(l, f)| *l == label && f.iter().map(String::as_str).eq(fields.iter().copied()))
    }

    fn lookup(&self, node: &NodeRef) -> Option<NodeIndex> {
        self.index.get(&(node.label, node.key.clone())).copied()
    }

    fn node_ref(&self, index: NodeIndex) -> NodeRef {
        let node = &self.graph[index];
        NodeRef::new(node.label, node.key.clone())
    }

    fn text_property(&self, index: NodeIndex, name: &str) -> String {
        self.graph[index]
            .properties
            .get(name)
            .and_then(PropertyValue::as_text)
            .unwrap_or_default()
            .to_owned()
    }

    /// Rejects a new node whose value for a constrained non-key field is already taken
    fn check_unique(&self, node: &NodeUpsert, properties: &Properties) -> Result<()> {
        for (label, field) in &self.unique {
            if *label != node.label || field == node.key_field {
                continue;
            }
            let Some(value) = properties.get(field) else {
                continue;
            };
            let taken = self.graph.node_weights().any(|other| {
                other.label == node.label
                    && other.key != node.key
                    && other.properties.get(field) == Some(value)
            });
            if taken {
                return Err(StoreError::ConstraintViolation {
                    label: node.label,
                    field: field.clone(),
                    value: format!("{value:?}"),
                });
            }
        }
        Ok(())
    }

    fn count_on_route<F>(&self, group: F) -> Vec<AggregateRecord>
    where
        F: Fn(NodeIndex, NodeIndex) -> (NodeIndex, String),
    {
        let mut groups: FxHashMap<NodeIndex, FxHashSet<String>> = FxHashMap::default();
        for edge in self.graph.edge_references() {
            if edge.weight().edge_type != EdgeType::OnRoute {
                continue;
            }
            let (owner, member) = group(edge.source(), edge.target());
            groups.entry(owner).or_default().insert(member);
        }
        groups
            .into_iter()
            .map(|(station, members)| AggregateRecord {
                key: self.graph[station].key.clone(),
                name: self.text_property(station, "name"),
                detail: String::new(),
                count: members.len() as u64,
            })
            .collect()
    }
}

impl GraphStore for MemoryGraphStore {
    fn ensure_unique_constraint(&mut self, label: Label, field: &str) -> Result<()> {
        check_identifier(field)?;
        self.unique.insert((label, field.to_owned()));
        Ok(())
    }

    fn ensure_index(&mut self, label: Label, fields: &[&str]) -> Result<()> {
        for field in fields {
            check_identifier(field)?;
        }
        self.indexes
            .insert((label, fields.iter().map(|f| f.to_string()).collect()));
        Ok(())
    }

    fn clear_all(&mut self) -> Result<()> {
        self.graph.clear();
        self.index.clear();
        Ok(())
    }

    fn upsert_node(&mut self, node: &NodeUpsert) -> Result<()> {
        match self.lookup(&node.node_ref()) {
            Some(index) => {
                let updated = node.updated_properties();
                self.check_unique(node, &updated)?;
                self.graph[index].properties.extend(updated);
            }
            None => {
                let properties = node.created_properties();
                self.check_unique(node, &properties)?;
                let index = self.graph.add_node(StoredNode {
                    label: node.label,
                    key: node.key.clone(),
                    properties,
                });
                self.index.insert((node.label, node.key.clone()), index);
            }
        }
        Ok(())
    }

    fn update_node(&mut self, node: &NodeRef, attributes: &Properties) -> Result<bool> {
        let Some(index) = self.lookup(node) else {
            return Ok(false);
        };
        self.graph[index].properties.extend(attributes.clone());
        Ok(true)
    }

    fn upsert_edge(&mut self, edge: &Edge) -> Result<bool> {
        let (Some(from), Some(to)) = (self.lookup(&edge.from), self.lookup(&edge.to)) else {
            return Ok(false);
        };
        let exists = self
            .graph
            .edges_connecting(from, to)
            .any(|e| e.weight().edge_type == edge.edge_type && e.weight().tags == edge.tags);
        if !exists {
            self.graph.add_edge(
                from,
                to,
                StoredEdge {
                    edge_type: edge.edge_type,
                    tags: edge.tags.clone(),
                },
            );
        }
        Ok(true)
    }

    fn node(&self, node: &NodeRef) -> Result<Option<Properties>> {
        Ok(self
            .lookup(node)
            .map(|index| self.graph[index].properties.clone()))
    }

    fn edges(&self, edge_type: EdgeType) -> Result<Vec<Edge>> {
        Ok(self
            .graph
            .edge_references()
            .filter(|e| e.weight().edge_type == edge_type)
            .map(|e| Edge {
                from: self.node_ref(e.source()),
                to: self.node_ref(e.target()),
                edge_type,
                tags: e.weight().tags.clone(),
            })
            .collect())
    }

    fn run_aggregate_query(&self, query: &AggregateQuery) -> Result<Vec<AggregateRecord>> {
        let total = |key: &str, count: usize| AggregateRecord {
            key: key.to_owned(),
            name: String::new(),
            detail: String::new(),
            count: count as u64,
        };
        let records = match *query {
            AggregateQuery::CountNodes(label) => vec![total(
                label.as_str(),
                self.graph.node_weights().filter(|n| n.label == label).count(),
            )],
            AggregateQuery::CountEdges(edge_type) => vec![total(
                edge_type.as_str(),
                self.graph
                    .edge_weights()
                    .filter(|e| e.edge_type == edge_type)
                    .count(),
            )],
            AggregateQuery::TopStationsByLineCount { limit } => rank(
                self.count_on_route(|station, line| (station, self.graph[line].key.clone())),
                limit,
            ),
            AggregateQuery::TopStationsByLineNameCount { limit } => rank(
                self.count_on_route(|station, line| {
                    let short_name = self.text_property(line, "short_name");
                    if short_name.is_empty() {
                        (station, self.graph[line].key.clone())
                    } else {
                        (station, short_name)
                    }
                }),
                limit,
            ),
            AggregateQuery::TopLinesByStationCount { limit } => {
                let lines = self
                    .graph
                    .node_indices()
                    .filter(|i| self.graph[*i].label == Label::Line)
                    .filter_map(|line| {
                        let stops = self
                            .graph
                            .edges_directed(line, EdgeDirection::Incoming)
                            .filter(|e| e.weight().edge_type == EdgeType::OnRoute)
                            .count();
                        (stops > 0).then(|| AggregateRecord {
                            key: self.graph[line].key.clone(),
                            name: self.text_property(line, "long_name"),
                            detail: self.text_property(line, "direction"),
                            count: stops as u64,
                        })
                    })
                    .collect();
                rank(lines, limit)
            }
        };
        Ok(records)
    }
}
