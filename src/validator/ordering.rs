use std::collections::BTreeSet;

use super::{ValidationIssue, ValidationRule, label};
use crate::boxes::FourCC;
use crate::catalog;
use crate::issues::Severity;
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::walker::ParseEventKind;

fn requires_file_type(typ: FourCC) -> bool {
    matches!(
        &typ.0,
        b"moov" | b"trak" | b"mdia" | b"minf" | b"stbl" | b"moof" | b"traf" | b"mvex" | b"mdat" | b"sidx" | b"ssix"
    )
}

/// VR-004: media and index boxes must not precede the file type box.
///
/// A segment type box (`styp`) satisfies the requirement for media segments.
#[derive(Debug, Default)]
pub struct FileTypeOrderingRule {
    seen_file_type: bool,
}

impl ValidationRule for FileTypeOrderingRule {
    fn id(&self) -> &'static str {
        "VR-004"
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if matches!(&header.typ.0, b"ftyp" | b"styp") {
            self.seen_file_type = true;
            return Vec::new();
        }
        if self.seen_file_type || !requires_file_type(header.typ) {
            return Vec::new();
        }
        vec![ValidationIssue::new(
            "VR-004",
            Severity::Error,
            format!("Encountered {} before required file type box (ftyp).", label(header)),
        )]
    }
}

/// VR-005: progressive files should carry `moov` ahead of `mdat`.
#[derive(Debug, Default)]
pub struct MovieDataOrderingRule {
    seen_movie: bool,
    streaming: bool,
}

impl ValidationRule for MovieDataOrderingRule {
    fn id(&self) -> &'static str {
        "VR-005"
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if catalog::is_streaming_indicator(header.typ) {
            self.streaming = true;
        }
        match &header.typ.0 {
            b"moov" => {
                self.seen_movie = true;
                Vec::new()
            }
            b"mdat" if !self.seen_movie && !self.streaming => vec![ValidationIssue::new(
                "VR-005",
                Severity::Warning,
                format!(
                    "Movie data box {} encountered before movie box (moov); ensure initialization metadata precedes media.",
                    label(header)
                ),
            )],
            _ => Vec::new(),
        }
    }
}

const PADDING: [&[u8; 4]; 3] = [b"free", b"skip", b"wide"];

fn is_padding(typ: FourCC) -> bool {
    PADDING.iter().any(|p| **p == typ.0)
}

/// E3: advisory on top-level packaging order.
#[derive(Debug, Default)]
pub struct TopLevelOrderingAdvisoryRule {
    seen_file_type: bool,
    seen_movie: bool,
    before_file_type: BTreeSet<String>,
    between: BTreeSet<String>,
    indicators_before_movie: BTreeSet<String>,
    media_before_movie: BTreeSet<String>,
    file_type_reported: bool,
    movie_reported: bool,
}

impl TopLevelOrderingAdvisoryRule {
    fn on_file_type(&mut self) -> Vec<ValidationIssue> {
        if self.file_type_reported || self.before_file_type.is_empty() {
            return Vec::new();
        }
        self.file_type_reported = true;
        vec![ValidationIssue::new(
            "E3",
            Severity::Info,
            format!(
                "Top-level box {} appeared before the file type box (ftyp); verify muxer packaging order.",
                describe(&self.before_file_type)
            ),
        )]
    }

    fn on_movie(&mut self) -> Vec<ValidationIssue> {
        if self.movie_reported {
            return Vec::new();
        }
        if !self.between.is_empty() {
            self.movie_reported = true;
            return vec![ValidationIssue::new(
                "E3",
                Severity::Info,
                format!(
                    "Top-level box {} appeared between file type (ftyp) and movie (moov) boxes; review packaging workflow.",
                    describe(&self.between)
                ),
            )];
        }
        if !self.media_before_movie.is_empty() && !self.indicators_before_movie.is_empty() {
            self.movie_reported = true;
            return vec![ValidationIssue::new(
                "E3",
                Severity::Info,
                format!(
                    "Movie box (moov) arrived after media payload {} following streaming indicators {}; confirm initialization metadata remains accessible.",
                    describe(&self.media_before_movie),
                    describe(&self.indicators_before_movie)
                ),
            )];
        }
        Vec::new()
    }
}

impl ValidationRule for TopLevelOrderingAdvisoryRule {
    fn id(&self) -> &'static str {
        "E3"
    }

    fn issues(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, depth: 0 } = &event.kind else {
            return Vec::new();
        };
        let typ = header.typ;
        let name = typ.to_string();
        let indicator = catalog::is_streaming_indicator(typ) && &typ.0 != b"mvex";
        let media = &typ.0 == b"mdat";

        if self.seen_file_type && !self.seen_movie && &typ.0 != b"moov" {
            if indicator {
                self.indicators_before_movie.insert(name.clone());
            }
            if media {
                self.media_before_movie.insert(name.clone());
            }
        }

        if &typ.0 == b"ftyp" {
            if self.seen_file_type {
                return Vec::new();
            }
            self.seen_file_type = true;
            return self.on_file_type();
        }
        if !self.seen_file_type {
            if !is_padding(typ) && typ != FourCC::UUID {
                self.before_file_type.insert(name);
            }
            return Vec::new();
        }
        if self.seen_movie {
            return Vec::new();
        }
        if &typ.0 == b"moov" {
            self.seen_movie = true;
            return self.on_movie();
        }
        if !is_padding(typ) && typ != FourCC::UUID && !indicator && !media {
            self.between.insert(name);
        }
        Vec::new()
    }
}

fn describe(codes: &BTreeSet<String>) -> String {
    let mut it = codes.iter();
    match (it.next(), it.next(), codes.len()) {
        (Some(a), None, _) => format!("\"{a}\""),
        (Some(a), Some(b), 2) => format!("\"{a}\" and \"{b}\""),
        (Some(a), Some(_), n) => format!("\"{a}\" and {} others", n - 1),
        _ => String::new(),
    }
}
