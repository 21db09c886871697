//! In-memory SQL store understanding the single-column `SELECT c FROM t WHERE k = ?`
//! lookups the SQL realms issue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::take_one;
use crate::backend::sql::{ConnectionProps, DataSource, SqlConnection, SqlDriver};
use crate::error::SqlError;

static SELECT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^\s*SELECT\s+(\w+)\s+FROM\s+(\w+)\s+WHERE\s+(\w+)\s*=\s*\?\s*$").ok());

type Row = BTreeMap<String, String>;

#[derive(Default)]
pub struct MemorySqlStore {
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
    fail_queries: AtomicUsize,
    fail_connects: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    queries: AtomicUsize,
}

impl MemorySqlStore {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Columns left out of `row` read back as NULL.
    pub fn insert(&self, table: &str, row: &[(&str, &str)]) {
        let row = row.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.to_string())).collect();
        self.tables.write().entry(table.to_ascii_lowercase()).or_default().push(row);
    }

    pub fn clear(&self, table: &str) { self.tables.write().remove(&table.to_ascii_lowercase()); }

    /// The next `n` queries fail as if the connection had dropped.
    pub fn fail_next_queries(&self, n: usize) { self.fail_queries.store(n, Ordering::SeqCst); }

    pub fn fail_next_connects(&self, n: usize) { self.fail_connects.store(n, Ordering::SeqCst); }

    pub fn connects(&self) -> usize { self.connects.load(Ordering::SeqCst) }

    pub fn closes(&self) -> usize { self.closes.load(Ordering::SeqCst) }

    pub fn queries(&self) -> usize { self.queries.load(Ordering::SeqCst) }

    fn open(self: &Arc<Self>) -> Result<Box<dyn SqlConnection>, SqlError> {
        if take_one(&self.fail_connects) {
            return Err(SqlError::Connect("connection refused".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySqlConnection { store: self.clone(), closed: false }))
    }

    fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Option<String>>, SqlError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_queries) {
            return Err(SqlError::Closed);
        }
        let caps = SELECT_RE.as_ref().and_then(|re| re.captures(sql)).ok_or_else(|| SqlError::Statement(format!("unsupported statement: {}", sql)))?;
        let (col, table, key) = (caps[1].to_ascii_lowercase(), caps[2].to_ascii_lowercase(), caps[3].to_ascii_lowercase());
        let value = params.first().ok_or_else(|| SqlError::Statement("missing parameter".into()))?;
        let tables = self.tables.read();
        let rows = tables.get(&table).ok_or_else(|| SqlError::Statement(format!("no such table: {}", table)))?;
        Ok(rows
            .iter()
            .filter(|r| r.get(&key).map(String::as_str) == Some(*value))
            .map(|r| r.get(&col).cloned())
            .collect())
    }
}

struct MemorySqlConnection {
    store: Arc<MemorySqlStore>,
    closed: bool,
}

impl SqlConnection for MemorySqlConnection {
    fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Option<String>>, SqlError> {
        if self.closed { return Err(SqlError::Closed); }
        self.store.query(sql, params)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.store.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Driver handing out connections to one shared store. The URL is ignored.
#[derive(Clone)]
pub struct MemorySqlDriver {
    store: Arc<MemorySqlStore>,
}

impl MemorySqlDriver {
    pub fn new(store: Arc<MemorySqlStore>) -> Self { Self { store } }
}

impl SqlDriver for MemorySqlDriver {
    fn connect(&self, _url: &str, _props: &ConnectionProps) -> Result<Box<dyn SqlConnection>, SqlError> { self.store.open() }
}

#[derive(Clone)]
pub struct MemoryDataSource {
    store: Arc<MemorySqlStore>,
}

impl MemoryDataSource {
    pub fn new(store: Arc<MemorySqlStore>) -> Self { Self { store } }
}

impl DataSource for MemoryDataSource {
    fn get_connection(&self) -> Result<Box<dyn SqlConnection>, SqlError> { self.store.open() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_by_key() {
        let store = MemorySqlStore::new();
        store.insert("users", &[("user_name", "bob"), ("user_pass", "x")]);
        store.insert("users", &[("user_name", "eve")]);
        let mut c = MemorySqlDriver::new(store.clone()).connect("mem:", &ConnectionProps::default()).unwrap();
        assert_eq!(c.query_column("SELECT user_pass FROM users WHERE user_name = ?", &["bob"]).unwrap(), vec![Some("x".to_string())]);
        assert_eq!(c.query_column("SELECT user_pass FROM users WHERE user_name = ?", &["eve"]).unwrap(), vec![None]);
        assert!(c.query_column("DELETE FROM users", &[]).is_err());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = MemorySqlStore::new();
        store.insert("t", &[("k", "a"), ("v", "1")]);
        store.fail_next_queries(1);
        let mut c = MemoryDataSource::new(store.clone()).get_connection().unwrap();
        assert_eq!(c.query_column("SELECT v FROM t WHERE k = ?", &["a"]), Err(SqlError::Closed));
        assert!(c.query_column("SELECT v FROM t WHERE k = ?", &["a"]).is_ok());
        c.close();
        assert_eq!(store.closes(), 1);
    }
}
