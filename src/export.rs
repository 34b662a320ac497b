//! Exporters over a finished [`ParseTree`].

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::issues::{ParseIssue, Severity};
use crate::tree::{BoxNode, ParseTree};

pub const TREE_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct TreeDocument<'a> {
    schema_version: u32,
    source: Option<String>,
    nodes: &'a [BoxNode],
    issues: &'a [ParseIssue],
}

/// Canonical JSON: object keys sorted, two-space indentation.
///
/// Serializing through `serde_json::Value` sorts map keys, so two exports of
/// the same tree are byte-identical.
#[derive(Debug, Clone, Default)]
pub struct JsonTreeExporter {
    source: Option<String>,
}

impl JsonTreeExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: &Path) -> Self {
        self.source = Some(source.display().to_string());
        self
    }

    pub fn export(&self, tree: &ParseTree) -> serde_json::Result<String> {
        let doc = TreeDocument {
            schema_version: TREE_SCHEMA_VERSION,
            source: self.source.clone(),
            nodes: &tree.nodes,
            issues: &tree.issues,
        };
        let value = serde_json::to_value(&doc)?;
        serde_json::to_string_pretty(&value)
    }
}

/// Human-readable issue report grouped by severity.
#[derive(Debug, Clone, Default)]
pub struct PlaintextIssueSummaryExporter {
    source: Option<String>,
}

impl PlaintextIssueSummaryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: &Path) -> Self {
        self.source = Some(source.display().to_string());
        self
    }

    pub fn export(&self, tree: &ParseTree) -> String {
        let mut out = String::from("ISOInspector Issue Summary\n");
        if let Some(source) = &self.source {
            let _ = writeln!(out, "Source: {source}");
        }

        let mut issues: Vec<&ParseIssue> = tree.issues.iter().collect();
        issues.sort_by(|a, b| {
            let start = |i: &ParseIssue| i.byte_range.as_ref().map_or(u64::MAX, |r| r.start);
            start(a)
                .cmp(&start(b))
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });

        let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
        let _ = writeln!(out, "Totals:");
        let _ = writeln!(out, "  Errors: {}", count(Severity::Error));
        let _ = writeln!(out, "  Warnings: {}", count(Severity::Warning));
        let _ = writeln!(out, "  Info: {}", count(Severity::Info));

        if issues.is_empty() {
            out.push_str("\nNo issues recorded.\n");
            return out;
        }

        for (severity, title) in [(Severity::Error, "ERRORS"), (Severity::Warning, "WARNINGS"), (Severity::Info, "INFO")] {
            let section: Vec<&&ParseIssue> = issues.iter().filter(|i| i.severity == severity).collect();
            if section.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{title}");
            for issue in section {
                let _ = writeln!(out, "• {} — {}", issue.code, issue.message);
                let _ = writeln!(out, "  Severity: {}", issue.severity);
                if let Some(r) = &issue.byte_range {
                    let _ = writeln!(out, "  Byte Range: {}-{}", r.start, r.end);
                }
                if let Some(path) = issue.affected_node_ids.first().and_then(|id| tree.breadcrumb(*id)) {
                    let _ = writeln!(out, "  Node Path: {path}");
                }
            }
        }
        out
    }
}
