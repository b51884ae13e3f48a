use super::{
    check_identifier, AggregateQuery, AggregateRecord, Edge, EdgeType, GraphStore, Label, NodeRef,
    NodeUpsert, Properties, Result, StoreError,
};
use log::debug;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;

/// Graph persisted in a SQLite database
///
/// Nodes are stored as `(label, node_key, properties)` and edges as
/// `(edge_type, from, to, tags)`, where properties and tags are JSON objects.
/// Updates merge JSON objects with `json_patch`, so a partial update never drops
/// properties it does not mention. Schema declarations become partial expression
/// indexes over `json_extract`.
pub struct SqliteGraphStore {
    conn: Connection,
    unique: Vec<(Label, String)>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    label TEXT NOT NULL,
    node_key TEXT NOT NULL,
    properties TEXT NOT NULL,
    PRIMARY KEY (label, node_key)
);
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    edge_type TEXT NOT NULL,
    from_label TEXT NOT NULL,
    from_key TEXT NOT NULL,
    to_label TEXT NOT NULL,
    to_key TEXT NOT NULL,
    tags TEXT NOT NULL,
    UNIQUE (edge_type, from_label, from_key, to_label, to_key, tags)
);
CREATE INDEX IF NOT EXISTS edges_by_target ON edges (edge_type, to_label, to_key);
";

impl SqliteGraphStore {
    /// Opens (or creates) the database file and its tables
    ///
    /// Any failure here is reported as [StoreError::Unavailable].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::with_connection(conn)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::with_connection(conn).map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            unique: Vec::new(),
        })
    }

    fn index_name(prefix: &str, label: Label, fields: &[&str]) -> String {
        format!(
            "{prefix}_{}_{}",
            label.as_str().to_lowercase(),
            fields.join("_")
        )
    }

    fn index_columns(fields: &[&str]) -> String {
        fields
            .iter()
            .map(|field| format!("json_extract(properties, '$.{field}')"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Turns a failed unique index into [StoreError::ConstraintViolation]
    fn map_write_error(&self, err: rusqlite::Error, node: &NodeRef) -> StoreError {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                let fields: Vec<&str> = self
                    .unique
                    .iter()
                    .filter(|(label, _)| *label == node.label)
                    .map(|(_, field)| field.as_str())
                    .collect();
                StoreError::ConstraintViolation {
                    label: node.label,
                    field: fields.join(", "),
                    value: node.key.clone(),
                }
            }
            other => other.into(),
        }
    }

    fn ranking(&self, sql: &str, limit: usize) -> Result<Vec<AggregateRecord>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AggregateRecord {
                key: row.get(0)?,
                name: row.get(1)?,
                detail: row.get(2)?,
                count: row.get::<_, i64>(3)? as u64,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn count(&self, sql: &str, key: &str) -> Result<Vec<AggregateRecord>> {
        let count: i64 = self.conn.query_row(sql, params![key], |row| row.get(0))?;
        Ok(vec![AggregateRecord {
            key: key.to_owned(),
            name: String::new(),
            detail: String::new(),
            count: count as u64,
        }])
    }
}

fn write_node(conn: &Connection, node: &NodeUpsert) -> rusqlite::Result<()> {
    let created = serde_json::to_string(&node.created_properties())
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let updated = serde_json::to_string(&node.updated_properties())
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO nodes (label, node_key, properties) VALUES (?1, ?2, ?3)
         ON CONFLICT (label, node_key) DO UPDATE SET properties = json_patch(nodes.properties, ?4)",
    )?;
    stmt.execute(params![node.label.as_str(), node.key, created, updated])?;
    Ok(())
}

fn node_exists(conn: &Connection, node: &NodeRef) -> rusqlite::Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT EXISTS (SELECT 1 FROM nodes WHERE label = ?1 AND node_key = ?2)")?;
    stmt.query_row(params![node.label.as_str(), node.key], |row| row.get(0))
}

fn write_edge(conn: &Connection, edge: &Edge) -> Result<bool> {
    if !node_exists(conn, &edge.from)? || !node_exists(conn, &edge.to)? {
        return Ok(false);
    }
    let tags = serde_json::to_string(&edge.tags)?;
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO edges (edge_type, from_label, from_key, to_label, to_key, tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let inserted = stmt.execute(params![
        edge.edge_type.as_str(),
        edge.from.label.as_str(),
        edge.from.key,
        edge.to.label.as_str(),
        edge.to.key,
        tags
    ])?;
    if inserted == 0 {
        debug!("{} {} -> {} already stored", edge.edge_type, edge.from, edge.to);
    }
    Ok(true)
}

fn parse_label(name: &str) -> Result<Label> {
    Label::parse(name).ok_or_else(|| StoreError::Corrupted(format!("unknown label '{name}'")))
}

const TOP_STATIONS_BY_LINE: &str = "
SELECT s.node_key, COALESCE(json_extract(s.properties, '$.name'), ''), '', COUNT(DISTINCT e.to_key) AS c
FROM edges e
JOIN nodes s ON s.label = e.from_label AND s.node_key = e.from_key
WHERE e.edge_type = 'ON_ROUTE'
GROUP BY s.node_key
ORDER BY c DESC, s.node_key ASC
LIMIT ?1";

const TOP_STATIONS_BY_LINE_NAME: &str = "
SELECT s.node_key, COALESCE(json_extract(s.properties, '$.name'), ''), '',
       COUNT(DISTINCT COALESCE(NULLIF(json_extract(l.properties, '$.short_name'), ''), l.node_key)) AS c
FROM edges e
JOIN nodes s ON s.label = e.from_label AND s.node_key = e.from_key
JOIN nodes l ON l.label = e.to_label AND l.node_key = e.to_key
WHERE e.edge_type = 'ON_ROUTE'
GROUP BY s.node_key
ORDER BY c DESC, s.node_key ASC
LIMIT ?1";

const TOP_LINES_BY_STATION: &str = "
SELECT l.node_key, COALESCE(json_extract(l.properties, '$.long_name'), ''),
       COALESCE(json_extract(l.properties, '$.direction'), ''), COUNT(*) AS c
FROM edges e
JOIN nodes l ON l.label = e.to_label AND l.node_key = e.to_key
WHERE e.edge_type = 'ON_ROUTE'
GROUP BY l.node_key
ORDER BY c DESC, l.node_key ASC
LIMIT ?1";

impl GraphStore for SqliteGraphStore {
    fn ensure_unique_constraint(&mut self, label: Label, field: &str) -> Result<()> {
        check_identifier(field)?;
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON nodes ({}) WHERE label = '{}'",
            Self::index_name("uq", label, &[field]),
            Self::index_columns(&[field]),
            label.as_str()
        );
        self.conn.execute(&sql, [])?;
        if !self.unique.iter().any(|(l, f)| *l == label && f == field) {
            self.unique.push((label, field.to_owned()));
        }
        Ok(())
    }

    fn ensure_index(&mut self, label: Label, fields: &[&str]) -> Result<()> {
        for field in fields {
            check_identifier(field)?;
        }
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON nodes ({}) WHERE label = '{}'",
            Self::index_name("idx", label, fields),
            Self::index_columns(fields),
            label.as_str()
        );
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    fn clear_all(&mut self) -> Result<()> {
        self.conn.execute_batch("DELETE FROM edges; DELETE FROM nodes;")?;
        Ok(())
    }

    fn upsert_node(&mut self, node: &NodeUpsert) -> Result<()> {
        write_node(&self.conn, node).map_err(|e| self.map_write_error(e, &node.node_ref()))
    }

    fn upsert_nodes(&mut self, nodes: &[NodeUpsert]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for node in nodes {
            if let Err(e) = write_node(&tx, node) {
                drop(tx);
                return Err(self.map_write_error(e, &node.node_ref()));
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_node(&mut self, node: &NodeRef, attributes: &Properties) -> Result<bool> {
        let patch = serde_json::to_string(attributes)?;
        let changed = self
            .conn
            .prepare_cached(
                "UPDATE nodes SET properties = json_patch(properties, ?3)
                 WHERE label = ?1 AND node_key = ?2",
            )
            .and_then(|mut stmt| stmt.execute(params![node.label.as_str(), node.key, patch]))
            .map_err(|e| self.map_write_error(e, node))?;
        Ok(changed > 0)
    }

    fn upsert_edge(&mut self, edge: &Edge) -> Result<bool> {
        write_edge(&self.conn, edge)
    }

    fn upsert_edges(&mut self, edges: &[Edge]) -> Result<Vec<bool>> {
        let tx = self.conn.transaction()?;
        let linked = edges
            .iter()
            .map(|edge| write_edge(&tx, edge))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(linked)
    }

    fn node(&self, node: &NodeRef) -> Result<Option<Properties>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT properties FROM nodes WHERE label = ?1 AND node_key = ?2",
                params![node.label.as_str(), node.key],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    fn edges(&self, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT from_label, from_key, to_label, to_key, tags FROM edges
             WHERE edge_type = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![edge_type.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(from_label, from_key, to_label, to_key, tags)| {
                Ok(Edge {
                    from: NodeRef::new(parse_label(&from_label)?, from_key),
                    to: NodeRef::new(parse_label(&to_label)?, to_key),
                    edge_type,
                    tags: serde_json::from_str(&tags)?,
                })
            })
            .collect()
    }

    fn run_aggregate_query(&self, query: &AggregateQuery) -> Result<Vec<AggregateRecord>> {
        match *query {
            AggregateQuery::CountNodes(label) => {
                self.count("SELECT COUNT(*) FROM nodes WHERE label = ?1", label.as_str())
            }
            AggregateQuery::CountEdges(edge_type) => self.count(
                "SELECT COUNT(*) FROM edges WHERE edge_type = ?1",
                edge_type.as_str(),
            ),
            AggregateQuery::TopStationsByLineCount { limit } => {
                self.ranking(TOP_STATIONS_BY_LINE, limit)
            }
            AggregateQuery::TopStationsByLineNameCount { limit } => {
                self.ranking(TOP_STATIONS_BY_LINE_NAME, limit)
            }
            AggregateQuery::TopLinesByStationCount { limit } => {
                self.ranking(TOP_LINES_BY_STATION, limit)
            }
        }
    }
}
