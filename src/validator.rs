//! Rule engine evaluated once per walker event.
//!
//! Every rule sees each event exactly once, in traversal order, and keeps
//! whatever state it needs between events. Nothing here re-reads the file
//! beyond the bytes of the box being visited.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boxes::BoxHeader;
use crate::issues::{ParseIssue, Severity};
use crate::pipeline::{ParseEvent, PayloadValidationLevel};
use crate::reader::RandomAccessReader;
use crate::registry::BoxParserRegistry;
use crate::research::ResearchLogRecording;
use crate::walker::ParseEventKind;

mod codec;
mod edit_list;
mod fragments;
mod ordering;
mod sample_table;
mod structure;

pub use codec::CodecConfigurationRule;
pub use edit_list::EditListRule;
pub use fragments::{FragmentSequenceRule, TrackRunRule};
pub use ordering::{FileTypeOrderingRule, MovieDataOrderingRule, TopLevelOrderingAdvisoryRule};
pub use sample_table::SampleTableCorrelationRule;
pub use structure::{BoxBoundsRule, ContainerTilingRule, UnknownBoxRule, VersionFlagsRule};

/// A finding produced by a rule.
///
/// The pipeline localizes it to the visited box unless the rule points at
/// another box explicitly (sample-table findings land on the chunk-offset box).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub message: String,
    pub byte_range: Option<Range<u64>>,
    pub node_id: Option<u64>,
}

impl ValidationIssue {
    pub fn new(rule_id: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self { rule_id, severity, message: message.into(), byte_range: None, node_id: None }
    }

    /// Attribute the issue to `header` instead of the visited box.
    pub fn on(mut self, header: &BoxHeader) -> Self {
        self.byte_range = Some(header.range());
        self.node_id = Some(header.start);
        self
    }

    pub fn into_parse_issue(self, visited: &BoxHeader) -> ParseIssue {
        ParseIssue {
            severity: self.severity,
            code: self.rule_id.to_string(),
            message: self.message,
            byte_range: Some(self.byte_range.unwrap_or_else(|| visited.range())),
            affected_node_ids: vec![self.node_id.unwrap_or(visited.start)],
        }
    }
}

pub trait ValidationRule: Send {
    fn id(&self) -> &'static str;

    /// Rules that interpret decoded payloads are skipped under
    /// [`PayloadValidationLevel::StructureOnly`].
    fn payload_dependent(&self) -> bool {
        false
    }

    fn issues(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue>;
}

/// Named set of per-rule switches. Rules it does not mention stay enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPreset {
    pub id: String,
    pub name: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleState {
    pub rule_id: String,
    pub enabled: bool,
}

#[derive(Deserialize)]
struct PresetManifest {
    presets: Vec<ValidationPreset>,
}

impl ValidationPreset {
    pub fn all_checks() -> Self {
        Self {
            id: "all-checks".to_string(),
            name: "All Checks".to_string(),
            summary: "Every validation rule enabled.".to_string(),
            rules: Vec::new(),
        }
    }

    /// Hides the informational findings about unknown boxes and top-level ordering.
    pub fn structural() -> Self {
        Self {
            id: "structural".to_string(),
            name: "Structural".to_string(),
            summary: "Box layout and payload consistency only; no research or advisory findings.".to_string(),
            rules: ["VR-006", "E3"]
                .into_iter()
                .map(|id| RuleState { rule_id: id.to_string(), enabled: false })
                .collect(),
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::all_checks(), Self::structural()]
    }

    /// Presets from a `{"presets": [...]}` manifest.
    pub fn from_manifest(json: &str) -> serde_json::Result<Vec<Self>> {
        Ok(serde_json::from_str::<PresetManifest>(json)?.presets)
    }

    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        self.rules.iter().rev().find(|r| r.rule_id == rule_id).is_none_or(|r| r.enabled)
    }
}

pub struct BoxValidator {
    rules: Vec<Box<dyn ValidationRule>>,
    level: PayloadValidationLevel,
    disabled: BTreeSet<String>,
}

impl BoxValidator {
    /// The full rule catalogue.
    pub fn new(level: PayloadValidationLevel, registry: Arc<BoxParserRegistry>) -> Self {
        Self::with_rules(level, standard_rules(registry))
    }

    pub fn with_rules(level: PayloadValidationLevel, rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules, level, disabled: BTreeSet::new() }
    }

    /// Apply every switch in `preset` on top of the current states.
    pub fn with_preset(mut self, preset: &ValidationPreset) -> Self {
        self.apply_preset(preset);
        self
    }

    pub fn apply_preset(&mut self, preset: &ValidationPreset) {
        tracing::debug!(preset = %preset.id, "applying validation preset");
        for state in &preset.rules {
            self.set_rule_enabled(&state.rule_id, state.enabled);
        }
    }

    pub fn set_rule_enabled(&mut self, rule_id: &str, enabled: bool) {
        if enabled {
            self.disabled.remove(rule_id);
        } else {
            self.disabled.insert(rule_id.to_string());
        }
    }

    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        !self.disabled.contains(rule_id)
    }

    /// Enabled state of every registered rule, keyed by id.
    pub fn rule_states(&self) -> BTreeMap<&'static str, bool> {
        self.rules.iter().map(|r| (r.id(), self.is_rule_enabled(r.id()))).collect()
    }

    pub fn push_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn level(&self) -> PayloadValidationLevel {
        self.level
    }

    fn runs(&self, rule: &dyn ValidationRule) -> bool {
        (self.level == PayloadValidationLevel::Full || !rule.payload_dependent()) && self.is_rule_enabled(rule.id())
    }

    /// Ids of the rules that will actually run at this level and with these switches.
    pub fn active_rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().filter(|r| self.runs(r.as_ref())).map(|r| r.id()).collect()
    }

    pub fn validate(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for i in 0..self.rules.len() {
            if self.runs(self.rules[i].as_ref()) {
                issues.extend(self.rules[i].issues(event, reader));
            }
        }
        issues
    }
}

impl std::fmt::Debug for BoxValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxValidator")
            .field("rules", &self.rules.iter().map(|r| r.id()).collect::<Vec<_>>())
            .field("level", &self.level)
            .field("disabled", &self.disabled)
            .finish()
    }
}

pub fn standard_rules(registry: Arc<BoxParserRegistry>) -> Vec<Box<dyn ValidationRule>> {
    rules_around(UnknownBoxRule::new(registry))
}

/// Standard rules with unknown boxes also written to `log`.
pub fn standard_rules_with_research_log(
    registry: Arc<BoxParserRegistry>,
    log: Arc<dyn ResearchLogRecording>,
    file_path: impl Into<String>,
) -> Vec<Box<dyn ValidationRule>> {
    rules_around(UnknownBoxRule::new(registry).with_research_log(log, file_path))
}

fn rules_around(unknown: UnknownBoxRule) -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(BoxBoundsRule),
        Box::new(ContainerTilingRule::default()),
        Box::new(VersionFlagsRule),
        Box::new(FileTypeOrderingRule::default()),
        Box::new(MovieDataOrderingRule::default()),
        Box::new(unknown),
        Box::new(EditListRule::default()),
        Box::new(SampleTableCorrelationRule::default()),
        Box::new(FragmentSequenceRule::default()),
        Box::new(TrackRunRule),
        Box::new(CodecConfigurationRule::default()),
        Box::new(TopLevelOrderingAdvisoryRule::default()),
    ]
}

/// `type@offset`, as used in messages and node paths.
pub(crate) fn label(h: &BoxHeader) -> String {
    format!("{}@{}", h.display_type(), h.start)
}

/// Per-`trak` state, opened on the track's start event and dropped on its finish.
#[derive(Debug)]
pub(crate) struct TrackStack<T> {
    tracks: Vec<T>,
}

impl<T: Default> TrackStack<T> {
    /// Track open/close bookkeeping; returns true when the event was a `trak`.
    pub(crate) fn observe(&mut self, kind: &ParseEventKind) -> bool {
        if &kind.header().typ.0 != b"trak" {
            return false;
        }
        if kind.is_start() {
            self.tracks.push(T::default());
        } else {
            self.tracks.pop();
        }
        true
    }

    pub(crate) fn current(&mut self) -> Option<&mut T> {
        self.tracks.last_mut()
    }
}

impl<T> Default for TrackStack<T> {
    fn default() -> Self {
        Self { tracks: Vec::new() }
    }
}

/// "Track 3" when the `tkhd` has been seen, else "Track".
pub(crate) fn track_label(track_id: Option<u32>) -> String {
    match track_id {
        Some(id) => format!("Track {id}"),
        None => "Track".to_string(),
    }
}
