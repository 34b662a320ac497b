use std::ops::Range;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic, localized by byte range and/or affected node ids.
///
/// Node ids are box start offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub byte_range: Option<Range<u64>>,
    pub affected_node_ids: Vec<u64>,
}

impl ParseIssue {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            byte_range: None,
            affected_node_ids: Vec::new(),
        }
    }

    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.byte_range = Some(range);
        self
    }

    pub fn with_node(mut self, node_id: u64) -> Self {
        self.affected_node_ids.push(node_id);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueMetrics {
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub deepest_affected_depth: usize,
}

impl IssueMetrics {
    pub fn total(&self) -> usize {
        self.error_count + self.warning_count + self.info_count
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Error => self.error_count,
            Severity::Warning => self.warning_count,
            Severity::Info => self.info_count,
        }
    }
}

/// Point-in-time copy of the store, safe to hand to another thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueSnapshot {
    pub issues: Vec<ParseIssue>,
    pub metrics: IssueMetrics,
}

#[derive(Debug, Default)]
struct Inner {
    issues: Vec<ParseIssue>,
    metrics: IssueMetrics,
}

/// Append-only diagnostic log for one parse session.
///
/// The walk records through a shared reference while readers may take
/// snapshots concurrently; the lock is held only for the copy.
#[derive(Debug, Default)]
pub struct ParseIssueStore {
    inner: RwLock<Inner>,
}

impl ParseIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an issue. `depth` defaults to the number of affected nodes.
    pub fn record(&self, issue: ParseIssue, depth: Option<usize>) {
        let depth = depth.unwrap_or(issue.affected_node_ids.len());
        let mut inner = self.write();
        match issue.severity {
            Severity::Error => inner.metrics.error_count += 1,
            Severity::Warning => inner.metrics.warning_count += 1,
            Severity::Info => inner.metrics.info_count += 1,
        }
        inner.metrics.deepest_affected_depth = inner.metrics.deepest_affected_depth.max(depth);
        inner.issues.push(issue);
    }

    pub fn record_all(&self, issues: impl IntoIterator<Item = ParseIssue>, depth: Option<usize>) {
        for issue in issues {
            self.record(issue, depth);
        }
    }

    pub fn issues(&self) -> Vec<ParseIssue> {
        self.read().issues.clone()
    }

    pub fn metrics(&self) -> IssueMetrics {
        self.read().metrics
    }

    pub fn len(&self) -> usize {
        self.read().issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn issues_for_node(&self, node_id: u64) -> Vec<ParseIssue> {
        self.read()
            .issues
            .iter()
            .filter(|i| i.affected_node_ids.contains(&node_id))
            .cloned()
            .collect()
    }

    /// Issues whose byte range overlaps `range` (half-open).
    pub fn issues_in_range(&self, range: Range<u64>) -> Vec<ParseIssue> {
        self.read()
            .issues
            .iter()
            .filter(|i| {
                i.byte_range
                    .as_ref()
                    .is_some_and(|r| r.start < range.end && range.start < r.end)
            })
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> IssueSnapshot {
        let inner = self.read();
        IssueSnapshot { issues: inner.issues.clone(), metrics: inner.metrics }
    }

    pub fn reset(&self) {
        *self.write() = Inner::default();
    }
}
