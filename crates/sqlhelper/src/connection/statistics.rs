//! Execution statistics.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// What kind of execution a statistic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Query,
    Update,
    Batch,
    Call,
}

/// The most recent execution on a connection.
///
/// For updates and batches `success_count` is the number of affected rows;
/// for queries and calls it is 1 on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStat {
    pub kind: ExecutionKind,
    pub sql: String,
    pub elapsed: Duration,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Totals per execution kind since the connection opened or was reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccumulatedStat {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub elapsed: Duration,
}

impl AccumulatedStat {
    /// Average time per call.
    #[must_use]
    pub fn avg_elapsed(&self) -> Duration {
        if self.call_count == 0 {
            return Duration::ZERO;
        }
        let calls = u32::try_from(self.call_count).unwrap_or(u32::MAX);
        self.elapsed / calls
    }

    fn add(&mut self, stat: &ExecutionStat) {
        self.call_count += 1;
        self.success_count += stat.success_count;
        self.failure_count += stat.failure_count;
        self.elapsed += stat.elapsed;
    }
}

#[derive(Debug, Default)]
pub(crate) struct Statistics {
    prev: Option<ExecutionStat>,
    accumulated: HashMap<ExecutionKind, AccumulatedStat>,
}

impl Statistics {
    pub(crate) fn record(&mut self, stat: ExecutionStat) {
        self.accumulated.entry(stat.kind).or_default().add(&stat);
        self.prev = Some(stat);
    }

    pub(crate) fn prev(&self) -> Option<&ExecutionStat> {
        self.prev.as_ref()
    }

    pub(crate) fn accumulated(&self) -> HashMap<ExecutionKind, AccumulatedStat> {
        self.accumulated.clone()
    }

    pub(crate) fn reset(&mut self) {
        self.accumulated.clear();
    }
}
