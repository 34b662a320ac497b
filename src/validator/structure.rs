use std::sync::Arc;

use super::{ValidationIssue, ValidationRule, label};
use crate::boxes::BoxHeader;
use crate::catalog;
use crate::issues::Severity;
use crate::parser::read_full_box_header;
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::registry::BoxParserRegistry;
use crate::research::{ResearchLogEntry, ResearchLogRecording};
use crate::walker::ParseEventKind;

/// VR-001: a box must end inside the readable data.
pub struct BoxBoundsRule;

impl ValidationRule for BoxBoundsRule {
    fn id(&self) -> &'static str {
        "VR-001"
    }

    fn issues(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if header.end() <= reader.len() {
            return Vec::new();
        }
        vec![ValidationIssue::new(
            "VR-001",
            Severity::Error,
            format!(
                "{} declares {} bytes ending at offset {}, beyond the end of the data ({} bytes).",
                label(header),
                header.total_size,
                header.end(),
                reader.len()
            ),
        )]
    }
}

#[derive(Debug)]
struct OpenBox {
    header: BoxHeader,
    next_child: u64,
    has_children: bool,
}

/// VR-002: children of a container must tile its payload with no gap or overlap.
#[derive(Debug, Default)]
pub struct ContainerTilingRule {
    stack: Vec<OpenBox>,
}

impl ContainerTilingRule {
    fn first_child_offset(header: &BoxHeader, reader: &dyn RandomAccessReader) -> u64 {
        let payload = header.payload_range();
        let leading = if &header.typ.0 == b"meta" {
            reader
                .read_up_to(payload.start, 4)
                .ok()
                .and_then(|b| <[u8; 4]>::try_from(b.as_slice()).ok())
        } else {
            None
        };
        (payload.start + catalog::child_offset(header, leading)).min(payload.end)
    }
}

impl ValidationRule for ContainerTilingRule {
    fn id(&self) -> &'static str {
        "VR-002"
    }

    fn issues(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match &event.kind {
            ParseEventKind::WillStartBox { header, depth } => {
                self.stack.truncate(*depth);
                if self.stack.len() < *depth {
                    issues.push(ValidationIssue::new(
                        "VR-002",
                        Severity::Error,
                        format!(
                            "Start event for {} arrived at depth {depth} without a matching parent context.",
                            label(header)
                        ),
                    ));
                    self.stack.clear();
                }
                if let Some(parent) = self.stack.last_mut() {
                    let expected = parent.next_child;
                    if header.start < expected {
                        issues.push(ValidationIssue::new(
                            "VR-002",
                            Severity::Error,
                            format!(
                                "Child {} overlaps the previous child inside {}: starts at offset {} before the expected next child at {expected}.",
                                label(header),
                                label(&parent.header),
                                header.start
                            ),
                        ));
                    } else if header.start > expected {
                        issues.push(ValidationIssue::new(
                            "VR-002",
                            Severity::Error,
                            format!(
                                "Container {} expected a child at offset {expected} but found {} at {}.",
                                label(&parent.header),
                                label(header),
                                header.start
                            ),
                        ));
                    }
                    let parent_end = parent.header.end();
                    if header.end() > parent_end {
                        issues.push(ValidationIssue::new(
                            "VR-002",
                            Severity::Error,
                            format!(
                                "Child {} extends beyond parent {} (child end {}, parent end {parent_end}).",
                                label(header),
                                label(&parent.header),
                                header.end()
                            ),
                        ));
                    }
                    parent.next_child = parent.next_child.max(header.end());
                    parent.has_children = true;
                }
                self.stack.push(OpenBox {
                    header: header.clone(),
                    next_child: Self::first_child_offset(header, reader),
                    has_children: false,
                });
            }
            ParseEventKind::DidFinishBox { header, depth } => {
                self.stack.truncate(depth + 1);
                if self.stack.len() < depth + 1 {
                    issues.push(ValidationIssue::new(
                        "VR-002",
                        Severity::Error,
                        format!(
                            "Finish event for {} arrived at depth {depth} without an opening start event.",
                            label(header)
                        ),
                    ));
                    self.stack.clear();
                    return issues;
                }
                let Some(open) = self.stack.pop() else {
                    return issues;
                };
                if open.header != *header {
                    issues.push(ValidationIssue::new(
                        "VR-002",
                        Severity::Error,
                        format!(
                            "Container stack mismatch: expected to finish {} but received {}.",
                            label(&open.header),
                            label(header)
                        ),
                    ));
                }
                let expected_end = open.header.end();
                if open.has_children && open.next_child != expected_end {
                    issues.push(ValidationIssue::new(
                        "VR-002",
                        Severity::Error,
                        format!(
                            "Container {} should close at offset {expected_end} but its children end at {}.",
                            label(&open.header),
                            open.next_child
                        ),
                    ));
                }
            }
        }
        issues
    }
}

/// VR-003: full-box version and flags against the catalog's expectation.
///
/// The catalog carries one expected pair per type, so box types with several
/// legitimate versions can be over-reported.
pub struct VersionFlagsRule;

impl ValidationRule for VersionFlagsRule {
    fn id(&self) -> &'static str {
        "VR-003"
    }

    fn issues(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        let Some(descriptor) = &event.metadata else {
            return Vec::new();
        };
        if descriptor.version.is_none() && descriptor.flags.is_none() {
            return Vec::new();
        }

        let Some((version, flags)) = read_full_box_header(reader, header) else {
            return vec![ValidationIssue::new(
                "VR-003",
                Severity::Warning,
                format!(
                    "{} payload too small for version/flags check (expected 4 bytes, found {}).",
                    label(header),
                    header.payload_len().min(reader.len().saturating_sub(header.payload_range().start))
                ),
            )];
        };

        let mut issues = Vec::new();
        if let Some(expected) = descriptor.version.filter(|&v| v != version) {
            issues.push(ValidationIssue::new(
                "VR-003",
                Severity::Warning,
                format!("{} version mismatch: expected {expected} but found {version}.", label(header)),
            ));
        }
        if let Some(expected) = descriptor.flags.filter(|&f| f != flags) {
            issues.push(ValidationIssue::new(
                "VR-003",
                Severity::Warning,
                format!("{} flags mismatch: expected 0x{expected:06x} but found 0x{flags:06x}.", label(header)),
            ));
        }
        issues
    }
}

/// VR-006: types neither the catalog nor the registry know about.
pub struct UnknownBoxRule {
    registry: Arc<BoxParserRegistry>,
    research: Option<(Arc<dyn ResearchLogRecording>, String)>,
}

impl UnknownBoxRule {
    pub fn new(registry: Arc<BoxParserRegistry>) -> Self {
        Self { registry, research: None }
    }

    /// Also record each unknown box in `log`, attributed to `file_path`.
    pub fn with_research_log(mut self, log: Arc<dyn ResearchLogRecording>, file_path: impl Into<String>) -> Self {
        self.research = Some((log, file_path.into()));
        self
    }
}

impl ValidationRule for UnknownBoxRule {
    fn id(&self) -> &'static str {
        "VR-006"
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if event.metadata.is_some() || self.registry.has_decoder(&header.key()) {
            return Vec::new();
        }
        tracing::debug!(typ = %header.display_type(), offset = header.start, "unknown box type");
        if let Some((log, file_path)) = &self.research {
            log.record(ResearchLogEntry {
                box_type: header.display_type(),
                file_path: file_path.clone(),
                start_offset: header.start,
                end_offset: header.end(),
            });
        }
        vec![ValidationIssue::new(
            "VR-006",
            Severity::Info,
            format!("Unknown box type {} at offset {}; recorded for research.", header.display_type(), header.start),
        )]
    }
}
