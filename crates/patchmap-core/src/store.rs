//! Keyed value store: per-patch, per-date scalar values.
//!
//! The production store is a Cassandra/Scylla table
//! `<keyspace>.<table> (variable, date, patchid, value)`.

use std::collections::HashMap;

use scylla::{Session, SessionBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PatchMapError, PatchMapResult};
use crate::join::KeyedRow;

/// Native CQL port, used when the host has none.
pub const DEFAULT_CQL_PORT: u16 = 9042;
pub const DEFAULT_TABLE: &str = "variables_by_date_patch";

/// One variable on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableQuery {
    pub keyspace: String,
    pub table: String,
    pub variable: String,
    pub date: String,
}

impl VariableQuery {
    pub fn new(
        keyspace: impl Into<String>,
        variable: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: DEFAULT_TABLE.to_string(),
            variable: variable.into(),
            date: date.into(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// CQL text of the query. Keyspace and table must be plain identifiers;
    /// variable and date are quoted literals.
    pub fn to_cql(&self) -> PatchMapResult<String> {
        check_identifier("keyspace", &self.keyspace)?;
        check_identifier("table", &self.table)?;
        Ok(format!(
            "SELECT patchid, value FROM {}.{} WHERE variable = {} AND date = {}",
            self.keyspace,
            self.table,
            quote_literal(&self.variable),
            quote_literal(&self.date)
        ))
    }
}

fn check_identifier(what: &str, ident: &str) -> PatchMapResult<()> {
    let mut chars = ident.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PatchMapError::precondition(format!(
            "{what} {ident:?} is not a valid CQL identifier"
        )))
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Source of keyed rows for a variable/date query.
///
/// Implementations return every row before the join begins, so store
/// failures abort a run before any value is placed.
pub trait KeyedStore {
    fn fetch(&mut self, query: &VariableQuery) -> PatchMapResult<Vec<KeyedRow>>;
}

// ── CQL store ────────────────────────────────────────────────────────────────

/// `host` or `host:port`; the default CQL port is appended when missing.
pub fn contact_point(host: &str) -> String {
    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(name, port)| !name.is_empty() && !name.contains(':') && port.parse::<u16>().is_ok());
    let bracketed_v6 = host.starts_with('[') && host.contains("]:");
    if has_port || bracketed_v6 {
        host.to_string()
    } else if host.contains(':') {
        format!("[{host}]:{DEFAULT_CQL_PORT}")
    } else {
        format!("{host}:{DEFAULT_CQL_PORT}")
    }
}

/// Comma-separated contact list, each entry normalized by [`contact_point`].
pub fn contact_points(hosts: &str) -> PatchMapResult<Vec<String>> {
    let points: Vec<String> = hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(contact_point)
        .collect();
    if points.is_empty() {
        return Err(PatchMapError::store_connection(format!(
            "no contact points in {hosts:?}"
        )));
    }
    Ok(points)
}

/// Cassandra/Scylla session driven from synchronous code.
pub struct CqlStore {
    // Declared before the runtime so the session is dropped first.
    session: Session,
    nodes: Vec<String>,
    runtime: tokio::runtime::Runtime,
}

impl CqlStore {
    /// Connect to `hosts`, a single contact point or a comma-separated list.
    pub fn connect(hosts: &str) -> PatchMapResult<Self> {
        let nodes = contact_points(hosts)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PatchMapError::store_connection)?;
        let builder = nodes
            .iter()
            .fold(SessionBuilder::new(), |builder, node| builder.known_node(node));
        let session = runtime
            .block_on(builder.build())
            .map_err(|e| PatchMapError::store_connection(format!("{}: {e}", nodes.join(","))))?;
        info!(nodes = %nodes.join(","), "connected to value store");
        Ok(Self {
            session,
            nodes,
            runtime,
        })
    }
}

impl KeyedStore for CqlStore {
    fn fetch(&mut self, query: &VariableQuery) -> PatchMapResult<Vec<KeyedRow>> {
        let cql = query.to_cql()?;
        debug!(nodes = ?self.nodes, %cql, "querying value store");
        let result = self
            .runtime
            .block_on(self.session.query_unpaged(cql, ()))
            .map_err(PatchMapError::store_query)?;
        let typed = result
            .rows_typed::<(Option<String>, Option<f64>)>()
            .map_err(PatchMapError::store_query)?;

        let mut rows = Vec::new();
        let mut null_rows = 0usize;
        for row in typed {
            match row.map_err(PatchMapError::store_query)? {
                (Some(patch_id), Some(value)) => rows.push(KeyedRow { patch_id, value }),
                _ => null_rows += 1,
            }
        }
        if null_rows > 0 {
            debug!(null_rows, "skipped rows with null patchid or value");
        }
        Ok(rows)
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Rows held in memory, keyed by (variable, date). Keyspace and table are
/// validated but otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: HashMap<(String, String), Vec<KeyedRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: &str, date: &str, row: KeyedRow) {
        self.rows
            .entry((variable.to_string(), date.to_string()))
            .or_default()
            .push(row);
    }

    pub fn with_rows(
        mut self,
        variable: &str,
        date: &str,
        rows: impl IntoIterator<Item = KeyedRow>,
    ) -> Self {
        for row in rows {
            self.insert(variable, date, row);
        }
        self
    }
}

impl KeyedStore for MemoryStore {
    fn fetch(&mut self, query: &VariableQuery) -> PatchMapResult<Vec<KeyedRow>> {
        query.to_cql()?;
        Ok(self
            .rows
            .get(&(query.variable.clone(), query.date.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cql_text_matches_table_layout() {
        let q = VariableQuery::new("patch_all_session_2", "sat_def_z", "1985-01-02");
        assert_eq!(
            q.to_cql().unwrap(),
            "SELECT patchid, value FROM patch_all_session_2.variables_by_date_patch \
             WHERE variable = 'sat_def_z' AND date = '1985-01-02'"
        );
    }

    #[test]
    fn literals_are_escaped() {
        let q = VariableQuery::new("ks", "it's", "1985-01-02' OR '1'='1");
        let cql = q.to_cql().unwrap();
        assert!(cql.contains("variable = 'it''s'"));
        assert!(cql.ends_with("date = '1985-01-02'' OR ''1''=''1'"));
    }

    #[test]
    fn identifiers_are_validated() {
        for bad in ["", "1ks", "ks;DROP", "ks.other", "k s"] {
            let q = VariableQuery::new(bad, "v", "d");
            assert!(matches!(q.to_cql(), Err(PatchMapError::Precondition(_))), "{bad:?}");
        }
        let q = VariableQuery::new("ks", "v", "d").with_table("by-date");
        assert!(q.to_cql().is_err());
        let q = VariableQuery::new("Ks_2", "v", "d").with_table("t_1");
        assert!(q.to_cql().is_ok());
    }

    #[test]
    fn contact_point_adds_default_port() {
        assert_eq!(contact_point("192.168.1.3"), "192.168.1.3:9042");
        assert_eq!(contact_point("db.example.org"), "db.example.org:9042");
        assert_eq!(contact_point("db.example.org:19042"), "db.example.org:19042");
        assert_eq!(contact_point("::1"), "[::1]:9042");
        assert_eq!(contact_point("[::1]:9142"), "[::1]:9142");
    }

    #[test]
    fn contact_list_is_split_on_commas() {
        assert_eq!(
            contact_points("10.0.0.1, 10.0.0.2:19042,db.example.org").unwrap(),
            vec!["10.0.0.1:9042", "10.0.0.2:19042", "db.example.org:9042"]
        );
        assert_eq!(contact_points("10.0.0.1").unwrap(), vec!["10.0.0.1:9042"]);
        assert!(matches!(
            contact_points(" , "),
            Err(PatchMapError::StoreConnection(_))
        ));
    }

    #[test]
    fn memory_store_filters_by_variable_and_date() {
        let mut store = MemoryStore::new()
            .with_rows("sat_def_z", "1985-01-02", [KeyedRow::new("1:1:1:1", 0.5)])
            .with_rows("sat_def_z", "1985-01-03", [KeyedRow::new("1:1:1:1", 0.7)])
            .with_rows("evap", "1985-01-02", [KeyedRow::new("1:1:1:1", 9.0)]);
        let rows = store
            .fetch(&VariableQuery::new("ks", "sat_def_z", "1985-01-03"))
            .unwrap();
        assert_eq!(rows, vec![KeyedRow::new("1:1:1:1", 0.7)]);
        let none = store
            .fetch(&VariableQuery::new("ks", "sat_def_z", "2000-01-01"))
            .unwrap();
        assert!(none.is_empty());
    }
}
