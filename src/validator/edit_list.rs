use super::{TrackStack, ValidationIssue, ValidationRule, track_label};
use crate::boxes::BoxHeader;
use crate::issues::Severity;
use crate::payload::{EditListBox, PayloadDetail, TrackHeaderBox};
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::walker::ParseEventKind;

const TOLERANCE: u64 = 1;

#[derive(Debug, Default)]
struct TrackTiming {
    track_header: Option<TrackHeaderBox>,
    // (timescale, duration)
    media_header: Option<(u32, u64)>,
    pending: Vec<(BoxHeader, EditListBox)>,
}

impl TrackTiming {
    fn label(&self) -> String {
        track_label(self.track_header.as_ref().map(|t| t.track_id))
    }

    fn disabled(&self) -> bool {
        self.track_header.as_ref().is_some_and(|t| !t.is_enabled())
    }
}

/// VR-014: edit list durations and rates against the movie, track and media headers.
#[derive(Debug, Default)]
pub struct EditListRule {
    movie: Option<(u32, u64)>,
    tracks: TrackStack<TrackTiming>,
}

impl ValidationRule for EditListRule {
    fn id(&self) -> &'static str {
        "VR-014"
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

        if let PayloadDetail::MovieHeader(mvhd) = detail {
            self.movie = Some((mvhd.timescale, mvhd.duration));
            return Vec::new();
        }
        let movie = self.movie;
        let Some(track) = self.tracks.current() else {
            return Vec::new();
        };

        match detail {
            PayloadDetail::TrackHeader(tkhd) => {
                track.track_header = Some(tkhd.clone());
                Vec::new()
            }
            PayloadDetail::MediaHeader(mdhd) => {
                track.media_header = Some((mdhd.timescale, mdhd.duration));
                let pending = std::mem::take(&mut track.pending);
                let track = &*track;
                pending
                    .iter()
                    .filter_map(|(elst_header, elst)| {
                        media_duration_issue(elst, movie, track).map(|i| i.on(elst_header))
                    })
                    .collect()
            }
            PayloadDetail::EditList(elst) => {
                let mut issues = Vec::new();
                issues.extend(movie_duration_issue(elst, movie, track));
                issues.extend(track_duration_issue(elst, track));
                if track.media_header.is_some() {
                    issues.extend(media_duration_issue(elst, movie, track));
                } else {
                    track.pending.push((header.clone(), elst.clone()));
                }
                issues.extend(rate_issues(elst, track));
                issues
            }
            _ => Vec::new(),
        }
    }
}

fn total_segment_duration(elst: &EditListBox) -> u64 {
    elst.entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.segment_duration))
}

// "short by" / "over by" message tail, or None within tolerance.
fn deviation(actual: u64, declared: u64) -> Option<String> {
    if actual.saturating_add(TOLERANCE) < declared {
        Some(format!("short by {} > 1 tick", declared - actual))
    } else if actual > declared.saturating_add(TOLERANCE) {
        Some(format!("over by {} > 1 tick", actual - declared))
    } else {
        None
    }
}

fn movie_duration_issue(elst: &EditListBox, movie: Option<(u32, u64)>, track: &TrackTiming) -> Option<ValidationIssue> {
    let (timescale, duration) = movie?;
    if timescale == 0 {
        return None;
    }
    let total = total_segment_duration(elst);
    let diff = deviation(total, duration)?;
    Some(ValidationIssue::new(
        "VR-014",
        Severity::Warning,
        format!(
            "{} edit list spans {total} movie ticks but movie header duration is {duration} ({diff}).",
            track.label()
        ),
    ))
}

fn track_duration_issue(elst: &EditListBox, track: &TrackTiming) -> Option<ValidationIssue> {
    let tkhd = track.track_header.as_ref().filter(|t| t.is_enabled())?;
    let total = total_segment_duration(elst);
    let diff = deviation(total, tkhd.duration)?;
    Some(ValidationIssue::new(
        "VR-014",
        Severity::Warning,
        format!(
            "{} edit list spans {total} movie ticks but track header duration is {} ({diff}).",
            track.label(),
            tkhd.duration
        ),
    ))
}

fn media_duration_issue(elst: &EditListBox, movie: Option<(u32, u64)>, track: &TrackTiming) -> Option<ValidationIssue> {
    let (movie_timescale, _) = movie?;
    let (media_timescale, media_duration) = track.media_header?;
    if movie_timescale == 0 || media_timescale == 0 || track.disabled() {
        return None;
    }
    let expected = expected_media_duration(elst, movie_timescale, media_timescale);
    let diff = deviation(expected, media_duration)?;
    Some(ValidationIssue::new(
        "VR-014",
        Severity::Warning,
        format!(
            "{} edit list consumes {expected} media ticks but media duration is {media_duration} ({diff}).",
            track.label()
        ),
    ))
}

// Sum of non-empty segments rescaled to the media timescale, rounded half away from zero.
fn expected_media_duration(elst: &EditListBox, movie_timescale: u32, media_timescale: u32) -> u64 {
    let numerator: u128 = elst
        .entries
        .iter()
        .filter(|e| !e.is_empty_edit())
        .map(|e| e.segment_duration as u128 * media_timescale as u128)
        .sum();
    let denominator = movie_timescale as u128;
    let rounded = (numerator + denominator / 2) / denominator;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

fn rate_issues(elst: &EditListBox, track: &TrackTiming) -> Vec<ValidationIssue> {
    let prefix = track.label();
    elst.entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| {
            let message = if e.media_rate_fraction != 0 {
                format!(
                    "{prefix} edit list entry {i} sets media_rate_fraction={}; fractional playback rates are unsupported.",
                    e.media_rate_fraction
                )
            } else if e.media_rate_integer < 0 {
                format!(
                    "{prefix} edit list entry {i} uses media_rate_integer={}; reverse playback is unsupported.",
                    e.media_rate_integer
                )
            } else if e.media_rate_integer > 1 {
                format!(
                    "{prefix} edit list entry {i} uses media_rate_integer={}; playback rate adjustments above 1x are unsupported.",
                    e.media_rate_integer
                )
            } else {
                return None;
            };
            Some(ValidationIssue::new("VR-014", Severity::Warning, message))
        })
        .collect()
}
