use super::{TrackStack, ValidationIssue, ValidationRule, label, track_label};
use crate::boxes::BoxHeader;
use crate::issues::Severity;
use crate::payload::{ChunkOffsetBox, PayloadDetail, SampleToChunkBox};
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::walker::ParseEventKind;

#[derive(Debug, Default)]
struct SampleTables {
    track_id: Option<u32>,
    sample_to_chunk: Option<SampleToChunkBox>,
    sample_count: Option<u32>,
    chunk_offsets: Option<(BoxHeader, ChunkOffsetBox)>,
    time_to_sample_total: Option<u64>,
    composition_total: Option<u64>,
    correlated: bool,
}

/// VR-015: sample-to-chunk, chunk offset and sample size tables of one track
/// must agree with each other.
#[derive(Debug, Default)]
pub struct SampleTableCorrelationRule {
    tracks: TrackStack<SampleTables>,
}

impl ValidationRule for SampleTableCorrelationRule {
    fn id(&self) -> &'static str {
        "VR-015"
    }

    fn payload_dependent(&self) -> bool {
        true
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        if self.tracks.observe(&event.kind) {
            return Vec::new();
        }
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        let Some(detail) = event.payload.as_ref().and_then(|p| p.detail.as_ref()) else {
            return Vec::new();
        };
        let Some(track) = self.tracks.current() else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        match detail {
            PayloadDetail::TrackHeader(tkhd) => track.track_id = Some(tkhd.track_id),
            PayloadDetail::SampleToChunk(stsc) => track.sample_to_chunk = Some(stsc.clone()),
            PayloadDetail::SampleSize(stsz) => {
                track.sample_count = Some(stsz.sample_count);
                issues.extend(timing_totals(track, true, true));
            }
            PayloadDetail::CompactSampleSize(stz2) => {
                track.sample_count = Some(stz2.sample_count);
                issues.extend(timing_totals(track, true, true));
            }
            PayloadDetail::ChunkOffset(co) => {
                issues.extend(monotonic_issue(header, co, track.track_id));
                track.chunk_offsets = Some((header.clone(), co.clone()));
            }
            PayloadDetail::TimeToSample(stts) => {
                track.time_to_sample_total = Some(stts.total_samples());
                issues.extend(timing_totals(track, true, false));
            }
            PayloadDetail::CompositionOffset(ctts) => {
                track.composition_total = Some(ctts.total_samples());
                issues.extend(timing_totals(track, false, true));
            }
            _ => return Vec::new(),
        }

        if !track.correlated {
            if let (Some(stsc), Some(count), Some((co_header, co))) =
                (&track.sample_to_chunk, track.sample_count, &track.chunk_offsets)
            {
                issues.extend(
                    chunk_correlation(stsc, count, co, track.track_id)
                        .into_iter()
                        .map(|i| i.on(co_header)),
                );
                track.correlated = true;
            }
        }
        issues
    }
}

fn monotonic_issue(header: &BoxHeader, co: &ChunkOffsetBox, track_id: Option<u32>) -> Option<ValidationIssue> {
    let (i, pair) = co.offsets.windows(2).enumerate().find(|(_, w)| w[1] <= w[0])?;
    Some(ValidationIssue::new(
        "VR-015",
        Severity::Warning,
        format!(
            "{} chunk offset table {} is not monotonic: entry {} ({}) does not exceed entry {} ({}).",
            track_label(track_id),
            label(header),
            i + 1,
            pair[1],
            i,
            pair[0]
        ),
    ))
}

fn chunk_correlation(
    stsc: &SampleToChunkBox,
    declared_samples: u32,
    co: &ChunkOffsetBox,
    track_id: Option<u32>,
) -> Vec<ValidationIssue> {
    let track = track_label(track_id);
    let declared_chunks = co.offsets.len() as u64;
    let declared_samples = declared_samples as u64;
    let entries = &stsc.entries;

    let Some(last) = entries.last() else {
        if declared_samples > 0 || declared_chunks > 0 {
            return vec![ValidationIssue::new(
                "VR-015",
                Severity::Warning,
                format!(
                    "{track} chunk count mismatch: sample-to-chunk table has no entries but chunk offset table declares {declared_chunks} chunks."
                ),
            )];
        }
        return Vec::new();
    };

    if let Some(w) = entries.windows(2).find(|w| w[1].first_chunk <= w[0].first_chunk) {
        return vec![ValidationIssue::new(
            "VR-015",
            Severity::Warning,
            format!(
                "{track} sample-to-chunk first_chunk values are not increasing ({} then {}); chunk correlation skipped.",
                w[0].first_chunk, w[1].first_chunk
            ),
        )];
    }
    if entries[0].first_chunk == 0 {
        return vec![ValidationIssue::new(
            "VR-015",
            Severity::Warning,
            format!("{track} sample-to-chunk table starts at chunk 0; chunks are numbered from 1."),
        )];
    }

    // Samples covered by every run except the last one.
    let accumulated: u64 = entries
        .windows(2)
        .map(|w| (w[1].first_chunk - w[0].first_chunk) as u64 * w[0].samples_per_chunk as u64)
        .fold(0u64, u64::saturating_add);
    let remaining = declared_samples.saturating_sub(accumulated);
    let spc = last.samples_per_chunk as u64;
    let implied_chunks = match (remaining, spc) {
        (0, _) => Some(last.first_chunk as u64 - 1),
        (_, 0) => None,
        (r, s) => Some(last.first_chunk as u64 - 1 + r.div_ceil(s)),
    };

    if let Some(implied) = implied_chunks.filter(|&c| c != declared_chunks) {
        return vec![ValidationIssue::new(
            "VR-015",
            Severity::Warning,
            format!(
                "{track} chunk count mismatch: sample-to-chunk table implies {implied} chunks for {declared_samples} samples but chunk offset table declares {declared_chunks}."
            ),
        )];
    }

    let implied_samples: u64 = entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let end = entries.get(i + 1).map_or(declared_chunks + 1, |n| n.first_chunk as u64);
            end.saturating_sub(e.first_chunk as u64).saturating_mul(e.samples_per_chunk as u64)
        })
        .fold(0u64, u64::saturating_add);
    if implied_samples != declared_samples {
        return vec![ValidationIssue::new(
            "VR-015",
            Severity::Warning,
            format!(
                "{track} sample count mismatch: sample-to-chunk table expands to {implied_samples} samples across {declared_chunks} chunks but sample size table declares {declared_samples}."
            ),
        )];
    }
    Vec::new()
}

// Time-to-sample and composition totals against the sample size count.
fn timing_totals(track: &SampleTables, check_stts: bool, check_ctts: bool) -> Vec<ValidationIssue> {
    let Some(count) = track.sample_count.map(u64::from) else {
        return Vec::new();
    };
    let label = track_label(track.track_id);
    let mut issues = Vec::new();
    if let Some(total) = track.time_to_sample_total.filter(|&t| check_stts && t != count) {
        issues.push(ValidationIssue::new(
            "VR-015",
            Severity::Warning,
            format!("{label} time-to-sample table sums to {total} samples but sample size table declares {count}."),
        ));
    }
    if let Some(total) = track.composition_total.filter(|&t| check_ctts && t != count) {
        issues.push(ValidationIssue::new(
            "VR-015",
            Severity::Warning,
            format!("{label} composition offset table sums to {total} samples but sample size table declares {count}."),
        ));
    }
    issues
}
