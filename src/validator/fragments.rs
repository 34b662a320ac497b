use super::{ValidationIssue, ValidationRule, label};
use crate::issues::Severity;
use crate::payload::{PayloadDetail, TrackRunBox};
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::walker::ParseEventKind;

/// VR-016: `mfhd` sequence numbers start at 1 and strictly increase.
#[derive(Debug, Default)]
pub struct FragmentSequenceRule {
    last: Option<(u32, String)>,
}

impl ValidationRule for FragmentSequenceRule {
    fn id(&self) -> &'static str {
        "VR-016"
    }

    fn payload_dependent(&self) -> bool {
        true
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        let Some(PayloadDetail::MovieFragmentHeader(mfhd)) = event.payload.as_ref().and_then(|p| p.detail.as_ref())
        else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        let current = label(header);
        let seq = mfhd.sequence_number;
        if seq == 0 {
            issues.push(ValidationIssue::new(
                "VR-016",
                Severity::Warning,
                format!("{current} sequence number is zero; fragments should start at 1."),
            ));
        }
        if let Some((previous, previous_label)) = &self.last {
            if seq <= *previous {
                issues.push(ValidationIssue::new(
                    "VR-016",
                    Severity::Warning,
                    format!(
                        "{current} has non-monotonic sequence number {seq} (previous {previous_label} used {previous})."
                    ),
                ));
            }
        }
        self.last = Some((seq, current));
        issues
    }
}

/// VR-017: a track run must declare samples and resolve a duration for each.
pub struct TrackRunRule;

impl ValidationRule for TrackRunRule {
    fn id(&self) -> &'static str {
        "VR-017"
    }

    fn payload_dependent(&self) -> bool {
        true
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { .. } = &event.kind else {
            return Vec::new();
        };
        let Some(PayloadDetail::TrackRun(run)) = event.payload.as_ref().and_then(|p| p.detail.as_ref()) else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        let context = run_context(run);
        if run.sample_count == 0 {
            issues.push(ValidationIssue::new(
                "VR-017",
                Severity::Error,
                format!("Track fragment run{context} declares 0 samples; ensure track run entries are present."),
            ));
        }

        let missing: Vec<String> = run
            .entries
            .iter()
            .filter(|e| e.duration.is_none())
            .map(|e| e.index.to_string())
            .collect();
        let unresolved_total = run.entries.is_empty() && run.sample_count > 0 && run.total_duration.is_none();
        if !missing.is_empty() {
            issues.push(ValidationIssue::new(
                "VR-017",
                Severity::Error,
                format!(
                    "Track fragment run{context} is missing sample durations for entries [{}]; cannot advance decode timeline.",
                    missing.join(", ")
                ),
            ));
        } else if unresolved_total {
            issues.push(ValidationIssue::new(
                "VR-017",
                Severity::Error,
                format!(
                    "Track fragment run{context} has no per-sample or default duration for its {} samples; cannot advance decode timeline.",
                    run.sample_count
                ),
            ));
        }
        issues
    }
}

// " for track 1, run #2, samples 1-10", or empty.
fn run_context(run: &TrackRunBox) -> String {
    let mut parts = Vec::new();
    if let Some(id) = run.track_id {
        parts.push(format!("track {id}"));
    }
    parts.push(format!("run #{}", run.run_index + 1));
    let first = run.first_sample_number as u64;
    match run.sample_count {
        0 => parts.push(format!("first sample {first}")),
        1 => parts.push(format!("sample {first}")),
        n => parts.push(format!("samples {first}-{}", first + n as u64 - 1)),
    }
    format!(" for {}", parts.join(", "))
}
