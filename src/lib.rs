//! Builds a graph of a public transit network from flat feed files.
//!
//! Stations, lines and the points of their paths become nodes; consecutive path
//! points, the stations served by a line and consecutive stations of a line become
//! edges. Every write is a keyed upsert, so importing the same files again yields
//! the same graph.

pub mod aggregate;
pub mod configuration;
pub mod graph_builder;
pub mod graph_store;
pub mod identity;
pub mod import;

#[cfg(test)]
mod tests;

pub use aggregate::GraphSummary;
pub use graph_builder::GraphBuilder;
pub use graph_store::{GraphStore, MemoryGraphStore, SqliteGraphStore, StoreError};
pub use import::{ImportError, Importer, PhaseOutcome};
