//! JSON seed for a `MemoryWarehouse`, used by `gateflow run --fixtures`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryWarehouse;
use crate::types::Row;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Tables to create empty.
    pub tables: Vec<String>,
    /// Object key to rows.
    pub objects: BTreeMap<String, Vec<Row>>,
    /// Table to the rows its `INSERT ... SELECT` produces.
    pub transforms: BTreeMap<String, Vec<Row>>,
    pub results: Vec<CannedResult>,
    pub failures: Vec<InjectedFailure>,
    pub latencies: Vec<InjectedLatency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CannedResult {
    pub sql: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectedFailure {
    pub pattern: String,
    #[serde(default = "one")]
    pub times: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectedLatency {
    pub pattern: String,
    pub ms: u64,
}

fn one() -> u32 {
    1
}

impl Fixture {
    pub fn from_json(src: &str) -> serde_json::Result<Self> {
        serde_json::from_str(src)
    }

    pub fn build(&self) -> MemoryWarehouse {
        let wh = MemoryWarehouse::new();
        for t in &self.tables {
            wh.create_table(t);
        }
        for (key, rows) in &self.objects {
            wh.put_object(key.clone(), rows.clone());
        }
        for (table, rows) in &self.transforms {
            wh.set_transform(table, rows.clone());
        }
        for r in &self.results {
            wh.set_result(&r.sql, r.rows.clone());
        }
        for f in &self.failures {
            wh.fail_next(f.pattern.clone(), f.times);
        }
        for l in &self.latencies {
            wh.set_latency(l.pattern.clone(), Duration::from_millis(l.ms));
        }
        wh
    }
}
