use byteorder::{BigEndian, ByteOrder};

use super::{TrackStack, ValidationIssue, ValidationRule, label, track_label};
use crate::boxes::BoxHeader;
use crate::issues::Severity;
use crate::payload::{PayloadDetail, SampleDescriptionBox};
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::walker::ParseEventKind;

#[derive(Debug, Default)]
struct TrackDescriptions {
    track_id: Option<u32>,
    descriptions: Option<SampleDescriptionBox>,
}

/// VR-018: AVC and HEVC decoder configuration records inside sample entries.
#[derive(Debug, Default)]
pub struct CodecConfigurationRule {
    tracks: TrackStack<TrackDescriptions>,
}

impl CodecConfigurationRule {
    // "Track 1 sample description entry 1 (format avc1)"
    fn prefix(&mut self, header: &BoxHeader) -> String {
        let Some(track) = self.tracks.current() else {
            return label(header);
        };
        let entry = track
            .descriptions
            .as_ref()
            .and_then(|d| d.entries.iter().find(|e| e.byte_range.contains(&header.start)));
        match entry {
            Some(e) => format!(
                "{} sample description entry {} (format {})",
                track_label(track.track_id),
                e.index + 1,
                e.effective_format()
            ),
            None => format!("{} {}", track_label(track.track_id), label(header)),
        }
    }
}

impl ValidationRule for CodecConfigurationRule {
    fn id(&self) -> &'static str {
        "VR-018"
    }

    fn payload_dependent(&self) -> bool {
        true
    }

    fn issues(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        if self.tracks.observe(&event.kind) {
            return Vec::new();
        }
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        match event.payload.as_ref().and_then(|p| p.detail.as_ref()) {
            Some(PayloadDetail::TrackHeader(tkhd)) => {
                if let Some(track) = self.tracks.current() {
                    track.track_id = Some(tkhd.track_id);
                }
                return Vec::new();
            }
            Some(PayloadDetail::SampleDescription(stsd)) => {
                if let Some(track) = self.tracks.current() {
                    track.descriptions = Some(stsd.clone());
                }
                return Vec::new();
            }
            _ => {}
        }

        let is_avc = &header.typ.0 == b"avcC";
        if !is_avc && &header.typ.0 != b"hvcC" {
            return Vec::new();
        }
        let prefix = self.prefix(header);
        let len = usize::try_from(header.payload_len()).unwrap_or(usize::MAX);
        let data = match reader.read_up_to(header.payload_range().start, len) {
            Ok(d) if d.len() == len => d,
            _ => {
                return vec![error(format!(
                    "{prefix} {} payload truncated; unable to read configuration bytes.",
                    header.typ
                ))];
            }
        };
        if is_avc { avc_issues(&prefix, &data) } else { hevc_issues(&prefix, &data) }
    }
}

fn error(message: String) -> ValidationIssue {
    ValidationIssue::new("VR-018", Severity::Error, message)
}

fn nal_length_issue(prefix: &str, codec: &str, bytes: u8) -> Option<ValidationIssue> {
    (bytes == 3).then(|| {
        error(format!("{prefix} {codec} declares 3-byte NAL unit lengths; only 1, 2 or 4 bytes are permitted."))
    })
}

// Walk `count` length-prefixed parameter sets starting at `offset`.
// Returns the offset after the last one, or None when the payload ran out.
fn parameter_sets(
    data: &[u8],
    mut offset: usize,
    count: usize,
    what: &str,
    prefix: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<usize> {
    for i in 0..count {
        if offset + 2 > data.len() {
            issues.push(error(format!(
                "{prefix} declares {count} {what} but payload only provides {i} before the length field for entry #{i}."
            )));
            return None;
        }
        let length = BigEndian::read_u16(&data[offset..offset + 2]) as usize;
        offset += 2;
        if length == 0 {
            issues.push(error(format!("{prefix} {what} entry #{i} has zero length.")));
            continue;
        }
        if offset + length > data.len() {
            issues.push(error(format!(
                "{prefix} declares {count} {what} but entry #{i} length {length} exceeds remaining payload ({} bytes).",
                data.len() - offset
            )));
            return None;
        }
        offset += length;
    }
    Some(offset)
}

fn avc_issues(prefix: &str, data: &[u8]) -> Vec<ValidationIssue> {
    if data.len() < 5 {
        return vec![error(format!(
            "{prefix} avcC missing length_size_minus_one field (payload {} bytes).",
            data.len()
        ))];
    }
    let mut issues = Vec::new();
    issues.extend(nal_length_issue(prefix, "avcC", (data[4] & 0x03) + 1));
    if data.len() < 6 {
        return issues;
    }

    let prefix = format!("{prefix} avcC");
    let sps = (data[5] & 0x1f) as usize;
    let Some(offset) = parameter_sets(data, 6, sps, "sequence parameter sets", &prefix, &mut issues) else {
        return issues;
    };
    let Some(&pps) = data.get(offset) else {
        if sps > 0 {
            issues.push(error(format!(
                "{prefix} declares {sps} sequence parameter sets but payload omits picture parameter set count."
            )));
        }
        return issues;
    };
    parameter_sets(data, offset + 1, pps as usize, "picture parameter sets", &prefix, &mut issues);
    issues
}

fn hevc_issues(prefix: &str, data: &[u8]) -> Vec<ValidationIssue> {
    if data.len() < 23 {
        return vec![error(format!(
            "{prefix} hvcC missing length_size_minus_one field (payload {} bytes).",
            data.len()
        ))];
    }
    let mut issues = Vec::new();
    issues.extend(nal_length_issue(prefix, "hvcC", (data[21] & 0x03) + 1));

    let prefix = format!("{prefix} hvcC");
    let arrays = data[22] as usize;
    let mut offset = 23;
    for a in 0..arrays {
        if offset + 3 > data.len() {
            issues.push(error(format!(
                "{prefix} declares {arrays} NAL unit arrays but payload ends before array #{a}."
            )));
            return issues;
        }
        let nal_type = data[offset] & 0x3f;
        let count = BigEndian::read_u16(&data[offset + 1..offset + 3]) as usize;
        offset += 3;
        let what = format!("NAL units of type {nal_type}");
        match parameter_sets(data, offset, count, &what, &prefix, &mut issues) {
            Some(next) => offset = next,
            None => return issues,
        }
    }
    issues
}
