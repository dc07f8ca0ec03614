//! In-memory warehouse for tests and simulated runs.
//!
//! Understands the handful of statement shapes the operators emit:
//! `DELETE FROM t`, `TRUNCATE [TABLE] t`, `COPY t FROM 'loc' ...`,
//! `INSERT INTO t <select>`, plus `SELECT COUNT(*) FROM t` and
//! `SELECT * FROM t`. Any other select must be registered with
//! [`MemoryWarehouse::set_result`].
//!
//! `set_transform` short-circuits the select of an `INSERT INTO t`, so
//! pipelines with real transform SQL can run without a query engine.
//!
//! Objects are rows keyed by object-store key; a `COPY` appends every object
//! whose key starts with the given location, in key order.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::adapter::Warehouse;
use crate::error::{Error, Result};
use crate::types::{Row, Scalar};

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    objects: BTreeMap<String, Vec<Row>>,
    canned: HashMap<String, Vec<Row>>,
    transforms: HashMap<String, Vec<Row>>,
    failures: Vec<FailRule>,
    latencies: Vec<(String, Duration)>,
    log: Vec<String>,
}

struct FailRule {
    pattern: String,
    remaining: u32,
}

/// Thread-safe in-memory warehouse. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty table; existing rows are kept.
    pub fn create_table(&self, name: &str) {
        self.lock().tables.entry(ident(name)).or_default();
    }

    pub fn with_tables(self, names: &[&str]) -> Self {
        for name in names {
            self.create_table(name);
        }
        self
    }

    /// Append rows directly, bypassing the statement log.
    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        self.lock().tables.entry(ident(table)).or_default().extend(rows);
    }

    /// Place an object in the simulated object store.
    pub fn put_object(&self, key: impl Into<String>, rows: Vec<Row>) {
        self.lock().objects.insert(key.into(), rows);
    }

    /// Register the rows a select returns, whitespace-insensitively.
    pub fn set_result(&self, sql: &str, rows: Vec<Row>) {
        self.lock().canned.insert(normalize(sql), rows);
    }

    /// Rows any `INSERT INTO table <select>` produces, whatever the select.
    pub fn set_transform(&self, table: &str, rows: Vec<Row>) {
        self.lock().transforms.insert(ident(table), rows);
    }

    /// Fail the next `times` statements that contain `pattern`.
    pub fn fail_next(&self, pattern: impl Into<String>, times: u32) {
        self.lock().failures.push(FailRule {
            pattern: pattern.into(),
            remaining: times,
        });
    }

    /// Sleep for `delay` inside every statement containing `pattern`.
    pub fn set_latency(&self, pattern: impl Into<String>, delay: Duration) {
        self.lock().latencies.push((pattern.into(), delay));
    }

    /// Every statement received, in arrival order, failed ones included.
    pub fn statements(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn count_statements(&self, pattern: &str) -> usize {
        self.lock().log.iter().filter(|s| s.contains(pattern)).count()
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.lock().tables.get(&ident(table)).cloned()
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.lock().tables.get(&ident(table)).map(Vec::len)
    }

    /// Highest number of statements observed executing at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Log the statement, then apply injected latency and failures.
    fn enter(&self, statement: &str) -> Result<InFlight<'_>> {
        let (delay, failed) = {
            let mut st = self.lock();
            st.log.push(statement.to_string());
            let delay = st
                .latencies
                .iter()
                .find(|(p, _)| statement.contains(p.as_str()))
                .map(|(_, d)| *d);
            let failed = st
                .failures
                .iter_mut()
                .find(|r| r.remaining > 0 && statement.contains(r.pattern.as_str()))
                .map(|r| {
                    r.remaining -= 1;
                    r.pattern.clone()
                });
            (delay, failed)
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if let Some(d) = delay {
            std::thread::sleep(d);
        }
        if let Some(pattern) = failed {
            tracing::debug!(%pattern, "injected statement failure");
            return Err(Error::Statement(format!("injected failure matching '{pattern}'")));
        }
        Ok(guard)
    }
}

impl Warehouse for MemoryWarehouse {
    fn execute(&self, statement: &str) -> Result<()> {
        let _in_flight = self.enter(statement)?;
        self.lock().apply(statement)
    }

    fn query(&self, statement: &str) -> Result<Vec<Row>> {
        let _in_flight = self.enter(statement)?;
        self.lock().select(statement)
    }
}

impl State {
    fn table_mut(&mut self, name: &str) -> Result<&mut Vec<Row>> {
        let key = ident(name);
        self.tables.get_mut(&key).ok_or(Error::UnknownTable(key))
    }

    fn apply(&mut self, sql: &str) -> Result<()> {
        let (head, rest) = split_words(sql, 2);
        let verb: Vec<String> = head.iter().map(|w| w.to_ascii_uppercase()).collect();
        match verb.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["DELETE", "FROM"] => {
                let (table, _) = split_words(rest, 1);
                self.table_mut(table.first().copied().unwrap_or(""))?.clear();
            }
            ["TRUNCATE", "TABLE"] => {
                let (table, _) = split_words(rest, 1);
                self.table_mut(table.first().copied().unwrap_or(""))?.clear();
            }
            ["TRUNCATE", _] => self.table_mut(head[1])?.clear(),
            ["COPY", _] => {
                let table = head[1];
                let (from, tail) = split_words(rest, 2);
                if from.len() < 2 || !from[0].eq_ignore_ascii_case("FROM") {
                    return Err(Error::Unsupported(normalize(sql)));
                }
                if !tail.contains("ACCESS_KEY_ID") && !tail.contains("IAM_ROLE") {
                    return Err(Error::Statement("COPY without credentials".into()));
                }
                let location = from[1].trim_matches('\'');
                let rows: Vec<Row> = self
                    .objects
                    .range(location.to_string()..)
                    .take_while(|(k, _)| k.starts_with(location))
                    .flat_map(|(_, rows)| rows.iter().cloned())
                    .collect();
                if !self.objects.keys().any(|k| k.starts_with(location)) {
                    return Err(Error::EmptySource(location.to_string()));
                }
                self.table_mut(table)?.extend(rows);
            }
            ["INSERT", "INTO"] => {
                let (table, query) = split_words(rest, 1);
                let table = table.first().copied().unwrap_or("");
                self.table_mut(table)?;
                let rows = match self.transforms.get(&ident(table)) {
                    Some(rows) => rows.clone(),
                    None => self.select(query)?,
                };
                self.table_mut(table)?.extend(rows);
            }
            _ => return Err(Error::Unsupported(normalize(sql))),
        }
        Ok(())
    }

    fn select(&self, sql: &str) -> Result<Vec<Row>> {
        let normalized = normalize(sql);
        if let Some(rows) = self.canned.get(&normalized) {
            return Ok(rows.clone());
        }
        let words: Vec<&str> = normalized.split(' ').collect();
        let upper: Vec<String> = words.iter().map(|w| w.to_ascii_uppercase()).collect();
        match upper.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["SELECT", "COUNT(*)", "FROM", _] => {
                let key = ident(words[3]);
                let n = self
                    .tables
                    .get(&key)
                    .ok_or(Error::UnknownTable(key))?
                    .len();
                Ok(vec![vec![Scalar::Int(n as i64)]])
            }
            ["SELECT", "*", "FROM", _] => {
                let key = ident(words[3]);
                self.tables.get(&key).cloned().ok_or(Error::UnknownTable(key))
            }
            _ => Err(Error::Unsupported(normalized)),
        }
    }
}

/// Split off the first `n` whitespace-separated words.
fn split_words(s: &str, n: usize) -> (Vec<&str>, &str) {
    let mut words = Vec::with_capacity(n);
    let mut rest = s.trim_start();
    for _ in 0..n {
        if rest.is_empty() {
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        words.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (words, rest)
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
}

fn ident(name: &str) -> String {
    name.trim_end_matches(';').trim_matches('"').to_ascii_lowercase()
}
