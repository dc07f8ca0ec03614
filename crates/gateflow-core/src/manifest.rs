//! Run manifest for audit.
//!
//! Every archived run carries one: which graph ran (by fingerprint), which engine
//! version ran it, and when.

use serde::{Deserialize, Serialize};

use crate::hash::Hash256;
use crate::id::RunId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,

    /// Stable hash of the compiled graph (nodes, operations, policies, edges).
    pub graph_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Schedule tick this run belongs to (ms since Unix epoch).
    pub scheduled_at_ms: u64,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(run_id: RunId, graph_hash: Hash256, scheduled_at_ms: u64, started_ms: u64) -> Self {
        Self {
            run_id,
            graph_hash,
            engine_version: crate::VERSION.to_string(),
            scheduled_at_ms,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64) -> Self {
        self.finished_ms = finished_ms;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
