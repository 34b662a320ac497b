//! Cross-box state needed to decode fragment-relative and metadata boxes.
//!
//! `trun`, `tfra` and `ilst` cannot be interpreted from their own bytes
//! alone. The [`FragmentEnvironmentCoordinator`] and the
//! [`MetadataEnvironmentCoordinator`] watch the boxes visited so far and
//! hand decoders an explicit [`DecodeEnvironment`].

use std::collections::HashMap;

use crate::boxes::{BoxHeader, FourCC};
use crate::payload::{
    MetadataKey, ParsedBoxPayload, PayloadDetail, ResolvedRandomAccessPoint, TrackExtendsBox,
    TrackFragmentHeaderBox, TrackRunBox,
};

/// Resolved state of the track fragment currently being visited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFragmentEnvironment {
    pub moof_start: u64,
    pub track_id: Option<u32>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
    pub base_data_offset: u64,
    /// End of the previous run's data, where a run without a data offset starts.
    pub data_cursor: Option<u64>,
    pub base_decode_time: Option<u64>,
    pub next_decode_time: Option<u64>,
    pub run_index: u32,
    /// 1-based number of the next sample within the track fragment.
    pub next_sample_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub first_sample_number: u32,
    pub sample_count: u32,
    pub start_decode_time: Option<u64>,
    pub start_data_offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFragmentSummary {
    pub track_id: Option<u32>,
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSummary {
    pub moof_offset: u64,
    pub sequence_number: Option<u32>,
    pub track_fragments: Vec<TrackFragmentSummary>,
}

/// Fragments seen so far, used to resolve random-access entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentIndex {
    fragments: Vec<FragmentSummary>,
}

impl FragmentIndex {
    pub const fn new() -> Self {
        Self { fragments: Vec::new() }
    }

    pub fn push(&mut self, fragment: FragmentSummary) {
        self.fragments.push(fragment);
    }

    pub fn fragments(&self) -> &[FragmentSummary] {
        &self.fragments
    }

    /// Resolve a `tfra` entry. `traf_number` and `trun_number` are 1-based.
    pub fn resolve(
        &self,
        moof_offset: u64,
        track_id: u32,
        traf_number: u32,
        trun_number: u32,
    ) -> Option<ResolvedRandomAccessPoint> {
        let fragment = self.fragments.iter().find(|f| f.moof_offset == moof_offset)?;
        let traf = fragment
            .track_fragments
            .iter()
            .find(|t| t.track_id == Some(track_id))
            .or_else(|| fragment.track_fragments.get((traf_number as usize).checked_sub(1)?));
        let run = traf.and_then(|t| t.runs.get((trun_number as usize).checked_sub(1)?));
        Some(ResolvedRandomAccessPoint {
            fragment_sequence_number: fragment.sequence_number,
            track_id: traf.and_then(|t| t.track_id),
            run_decode_time: run.and_then(|r| r.start_decode_time),
            run_data_offset: run.and_then(|r| r.start_data_offset),
            run_sample_count: run.map(|r| r.sample_count),
        })
    }
}

static EMPTY_INDEX: FragmentIndex = FragmentIndex::new();

/// Handler and key table of the innermost open `meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataEnvironment {
    pub handler_type: Option<FourCC>,
    /// `keys` entries by their 1-based index.
    pub keys: HashMap<u32, MetadataKey>,
}

/// Explicit context passed to every payload decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecodeEnvironment<'a> {
    pub track_fragment: Option<&'a TrackFragmentEnvironment>,
    pub fragments: &'a FragmentIndex,
    pub metadata: Option<&'a MetadataEnvironment>,
}

impl DecodeEnvironment<'static> {
    pub fn empty() -> Self {
        Self { track_fragment: None, fragments: &EMPTY_INDEX, metadata: None }
    }
}

impl Default for DecodeEnvironment<'static> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug)]
struct MoofState {
    start: u64,
    sequence_number: Option<u32>,
    previous_traf_end: Option<u64>,
    finished_trafs: Vec<TrackFragmentSummary>,
}

#[derive(Debug)]
struct TrafState {
    env: TrackFragmentEnvironment,
    runs: Vec<RunSummary>,
}

/// Builds fragment environments from `trex`, `moof`, `mfhd`, `traf`, `tfhd`,
/// `tfdt` and `trun` boxes in visiting order.
#[derive(Debug, Default)]
pub struct FragmentEnvironmentCoordinator {
    track_extends: HashMap<u32, TrackExtendsBox>,
    moofs: Vec<MoofState>,
    trafs: Vec<TrafState>,
    index: FragmentIndex,
}

impl FragmentEnvironmentCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment for the box about to be decoded.
    pub fn environment(&self) -> DecodeEnvironment<'_> {
        DecodeEnvironment {
            track_fragment: self.trafs.last().map(|t| &t.env),
            fragments: &self.index,
            metadata: None,
        }
    }

    pub fn index(&self) -> &FragmentIndex {
        &self.index
    }

    /// Observe a box after its payload has been decoded.
    pub fn will_start(&mut self, hdr: &BoxHeader, payload: Option<&ParsedBoxPayload>) {
        match &hdr.typ.0 {
            b"moof" => self.moofs.push(MoofState {
                start: hdr.start,
                sequence_number: None,
                previous_traf_end: None,
                finished_trafs: Vec::new(),
            }),
            b"traf" => {
                let moof = self.moofs.last();
                let moof_start = moof.map_or(0, |m| m.start);
                let base = moof.and_then(|m| m.previous_traf_end).unwrap_or(moof_start);
                self.trafs.push(TrafState {
                    env: TrackFragmentEnvironment {
                        moof_start,
                        base_data_offset: base,
                        next_sample_number: 1,
                        ..Default::default()
                    },
                    runs: Vec::new(),
                });
            }
            b"trun" => {
                if let Some(traf) = self.trafs.last_mut() {
                    traf.env.run_index += 1;
                }
            }
            _ => {}
        }

        let Some(detail) = payload.and_then(|p| p.detail.as_ref()) else {
            return;
        };
        match detail {
            PayloadDetail::TrackExtends(trex) => {
                self.track_extends.insert(trex.track_id, trex.clone());
            }
            PayloadDetail::MovieFragmentHeader(mfhd) => {
                if let Some(moof) = self.moofs.last_mut() {
                    moof.sequence_number = Some(mfhd.sequence_number);
                }
            }
            PayloadDetail::TrackFragmentHeader(tfhd) => self.apply_tfhd(tfhd),
            PayloadDetail::TrackFragmentDecodeTime(tfdt) => {
                if let Some(traf) = self.trafs.last_mut() {
                    traf.env.base_decode_time = Some(tfdt.base_media_decode_time);
                    traf.env.next_decode_time = Some(tfdt.base_media_decode_time);
                }
            }
            PayloadDetail::TrackRun(trun) => self.apply_trun(trun),
            _ => {}
        }
    }

    pub fn did_finish(&mut self, hdr: &BoxHeader) {
        match &hdr.typ.0 {
            b"traf" => {
                let Some(traf) = self.trafs.pop() else { return };
                if let Some(moof) = self.moofs.last_mut() {
                    moof.previous_traf_end = traf.env.data_cursor.or(moof.previous_traf_end);
                    moof.finished_trafs.push(TrackFragmentSummary {
                        track_id: traf.env.track_id,
                        runs: traf.runs,
                    });
                }
            }
            b"moof" => {
                let Some(moof) = self.moofs.pop() else { return };
                tracing::debug!(
                    moof_offset = moof.start,
                    track_fragments = moof.finished_trafs.len(),
                    "fragment indexed"
                );
                self.index.push(FragmentSummary {
                    moof_offset: moof.start,
                    sequence_number: moof.sequence_number,
                    track_fragments: moof.finished_trafs,
                });
            }
            _ => {}
        }
    }

    fn apply_tfhd(&mut self, tfhd: &TrackFragmentHeaderBox) {
        let trex = self.track_extends.get(&tfhd.track_id);
        let first_traf = self.moofs.last().is_none_or(|m| m.finished_trafs.is_empty());
        let Some(traf) = self.trafs.last_mut() else { return };
        let env = &mut traf.env;

        env.track_id = Some(tfhd.track_id);
        env.sample_description_index = tfhd
            .sample_description_index
            .or(trex.map(|t| t.default_sample_description_index));
        env.default_sample_duration =
            tfhd.default_sample_duration.or(trex.map(|t| t.default_sample_duration));
        env.default_sample_size = tfhd.default_sample_size.or(trex.map(|t| t.default_sample_size));
        env.default_sample_flags = tfhd.default_sample_flags.or(trex.map(|t| t.default_sample_flags));
        env.base_data_offset = match tfhd.base_data_offset {
            Some(explicit) => explicit,
            None if tfhd.default_base_is_moof || first_traf => env.moof_start,
            None => env.base_data_offset,
        };
        env.data_cursor = None;
    }

    fn apply_trun(&mut self, trun: &TrackRunBox) {
        let Some(traf) = self.trafs.last_mut() else { return };
        traf.runs.push(RunSummary {
            first_sample_number: trun.first_sample_number,
            sample_count: trun.sample_count,
            start_decode_time: trun.start_decode_time,
            start_data_offset: trun.start_data_offset,
        });
        let env = &mut traf.env;
        env.data_cursor = trun.end_data_offset;
        env.next_decode_time = trun.end_decode_time;
        env.next_sample_number = env.next_sample_number.saturating_add(trun.sample_count);
    }
}

/// Tracks `hdlr` and `keys` inside each open `meta` so that `ilst` item
/// types can be resolved against the key table.
#[derive(Debug, Default)]
pub struct MetadataEnvironmentCoordinator {
    stack: Vec<MetadataEnvironment>,
}

impl MetadataEnvironmentCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment of the innermost open `meta`, if any.
    pub fn environment(&self) -> Option<&MetadataEnvironment> {
        self.stack.last()
    }

    pub fn will_start(&mut self, hdr: &BoxHeader, payload: Option<&ParsedBoxPayload>) {
        if &hdr.typ.0 == b"meta" {
            self.stack.push(MetadataEnvironment::default());
            return;
        }
        let Some(current) = self.stack.last_mut() else { return };
        match payload.and_then(|p| p.detail.as_ref()) {
            Some(PayloadDetail::Handler(hdlr)) => current.handler_type = Some(hdlr.handler_type),
            Some(PayloadDetail::MetadataKeys(keys)) => {
                current.keys = keys.entries.iter().map(|k| (k.index, k.clone())).collect();
            }
            _ => {}
        }
    }

    pub fn did_finish(&mut self, hdr: &BoxHeader) {
        if &hdr.typ.0 == b"meta" {
            self.stack.pop();
        }
    }
}
