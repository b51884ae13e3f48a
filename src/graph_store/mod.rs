//! Persistence backends for the transit graph.
//!
//! The graph builder only talks to a [GraphStore]: keyed node upserts, edge merges
//! between existing nodes, idempotent schema setup, a full wipe and a handful of
//! read-only aggregate queries. Two backends are provided:
//!
//! - [MemoryGraphStore], a petgraph graph living in the process, used for dry runs and tests
//! - [SqliteGraphStore], a SQLite file holding nodes and edges as JSON property maps

mod memory;
mod sqlite;

pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Kind of node, with label-scoped key uniqueness
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Station,
    Line,
    PathPoint,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::Station, Label::Line, Label::PathPoint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Station => "Station",
            Label::Line => "Line",
            Label::PathPoint => "PathPoint",
        }
    }

    pub fn parse(name: &str) -> Option<Label> {
        Label::ALL.into_iter().find(|label| label.as_str() == name)
    }

    /// Property holding the identity of nodes with this label
    pub fn key_field(&self) -> &'static str {
        match self {
            Label::Station => "stop_id",
            Label::Line => "route_id",
            Label::PathPoint => "point_key",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of relationship
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeType {
    /// PathPoint(n) -> PathPoint(n + 1) of the same shape
    FollowsPoint,
    /// Station -> Line, tagged with direction and ordinal
    OnRoute,
    /// Station(i) -> Station(i + 1) on one line and direction
    NextStop,
}

impl EdgeType {
    pub const ALL: [EdgeType; 3] = [EdgeType::FollowsPoint, EdgeType::OnRoute, EdgeType::NextStop];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::FollowsPoint => "FOLLOWS_POINT",
            EdgeType::OnRoute => "ON_ROUTE",
            EdgeType::NextStop => "NEXT_STOP",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Text(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<usize> for PropertyValue {
    fn from(value: usize) -> Self {
        PropertyValue::Int(value as i64)
    }
}

/// Property map of a node or tag map of an edge. Ordered, so that its JSON form is canonical.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Builds a [Properties] map: `props! { "name" => "Merkez", "lat" => 41.0 }`
#[macro_export]
macro_rules! props {
    () => { $crate::graph_store::Properties::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::graph_store::Properties::new();
        $( map.insert(String::from($key), $crate::graph_store::PropertyValue::from($value)); )+
        map
    }};
}

/// Identifies a node by label and key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub label: Label,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: Label, key: impl Into<String>) -> Self {
        Self {
            label,
            key: key.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label, self.key)
    }
}

/// Create-or-update of one node
///
/// `attributes` are written on every call; `create_only` only when the node is created.
/// The key is also stored as the `key_field` property.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    pub label: Label,
    pub key_field: &'static str,
    pub key: String,
    pub attributes: Properties,
    pub create_only: Properties,
}

impl NodeUpsert {
    pub fn new(label: Label, key: impl Into<String>, attributes: Properties) -> Self {
        Self {
            label,
            key_field: label.key_field(),
            key: key.into(),
            attributes,
            create_only: Properties::new(),
        }
    }

    pub fn with_create_only(mut self, create_only: Properties) -> Self {
        self.create_only = create_only;
        self
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.label, self.key.clone())
    }

    /// Every property of a freshly created node
    pub(crate) fn created_properties(&self) -> Properties {
        let mut properties = self.create_only.clone();
        properties.extend(self.attributes.clone());
        properties.insert(self.key_field.to_owned(), self.key.as_str().into());
        properties
    }

    /// Properties overwritten on an existing node
    pub(crate) fn updated_properties(&self) -> Properties {
        let mut properties = self.attributes.clone();
        properties.insert(self.key_field.to_owned(), self.key.as_str().into());
        properties
    }
}

/// A directed, typed relationship
///
/// Its identity is the whole value: two edges between the same nodes with different
/// tags are distinct, writing the same edge twice stores it once.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: NodeRef,
    pub to: NodeRef,
    pub edge_type: EdgeType,
    pub tags: Properties,
}

/// Read-only aggregations the store must answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateQuery {
    CountNodes(Label),
    CountEdges(EdgeType),
    /// Stations by number of distinct lines reaching them through `ON_ROUTE`
    TopStationsByLineCount { limit: usize },
    /// Stations by number of distinct line short names (both directions of a line count once)
    TopStationsByLineNameCount { limit: usize },
    /// Lines by number of `ON_ROUTE` edges
    TopLinesByStationCount { limit: usize },
}

/// One row of an aggregate result
///
/// For counts, `key` is the label or edge type and `name`/`detail` are empty.
/// For rankings, `key` is the node key, `name` its display name and `detail`
/// the line direction when ranking lines. Rankings are ordered by descending
/// `count`, then ascending `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRecord {
    pub key: String,
    pub name: String,
    pub detail: String,
    pub count: u64,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend cannot be reached or set up. Fatal for a run.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("'{0}' is not a valid property name")]
    InvalidIdentifier(String),
    #[error("unique constraint on {label}.{field} violated by '{value}'")]
    ConstraintViolation {
        label: Label,
        field: String,
        value: String,
    },
    #[error("stored graph is inconsistent: {0}")]
    Corrupted(String),
    #[error("database error")]
    Database(#[from] rusqlite::Error),
    #[error("property serialization error")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Property names end up in SQL index definitions
pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_owned()))
    }
}

pub trait GraphStore {
    /// Idempotent: declares that `field` is unique among nodes with `label`
    fn ensure_unique_constraint(&mut self, label: Label, field: &str) -> Result<()>;

    /// Idempotent: declares a lookup index over `fields` of nodes with `label`
    fn ensure_index(&mut self, label: Label, fields: &[&str]) -> Result<()>;

    /// Removes every node and edge. Schema declarations survive.
    fn clear_all(&mut self) -> Result<()>;

    fn upsert_node(&mut self, node: &NodeUpsert) -> Result<()>;

    fn upsert_nodes(&mut self, nodes: &[NodeUpsert]) -> Result<()> {
        for node in nodes {
            self.upsert_node(node)?;
        }
        Ok(())
    }

    /// Overwrites `attributes` on an existing node. Returns false, and changes
    /// nothing, when the node does not exist.
    fn update_node(&mut self, node: &NodeRef, attributes: &Properties) -> Result<bool>;

    /// Creates the edge unless it already exists. Returns false, and changes
    /// nothing, when either endpoint does not exist.
    fn upsert_edge(&mut self, edge: &Edge) -> Result<bool>;

    fn upsert_edges(&mut self, edges: &[Edge]) -> Result<Vec<bool>> {
        edges.iter().map(|edge| self.upsert_edge(edge)).collect()
    }

    fn node(&self, node: &NodeRef) -> Result<Option<Properties>>;

    /// All edges of one type, in creation order
    fn edges(&self, edge_type: EdgeType) -> Result<Vec<Edge>>;

    fn run_aggregate_query(&self, query: &AggregateQuery) -> Result<Vec<AggregateRecord>>;
}

/// Ranking order shared by the backends
pub(crate) fn rank(mut records: Vec<AggregateRecord>, limit: usize) -> Vec<AggregateRecord> {
    records.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    records.truncate(limit);
    records
}
