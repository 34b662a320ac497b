use super::{BoxDecoder, read_payload};
use crate::boxes::BoxHeader;
use crate::environment::DecodeEnvironment;
use crate::payload::{
    MAX_ENTRY_FIELDS, MovieExtendsHeaderBox, MovieFragmentHeaderBox,
    MovieFragmentRandomAccessOffsetBox, ParsedBoxPayload, PayloadBuilder, PayloadDetail,
    SegmentIndexBox, SegmentReference, TrackExtendsBox, TrackFragmentDecodeTimeBox,
    TrackFragmentHeaderBox, TrackFragmentRandomAccessBox, TrackFragmentRandomAccessEntry,
    TrackRunBox, TrackRunSample,
};
use crate::reader::RandomAccessReader;

pub const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
pub const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
pub const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x000008;
pub const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x000010;
pub const TFHD_DEFAULT_SAMPLE_FLAGS: u32 = 0x000020;
pub const TFHD_DURATION_IS_EMPTY: u32 = 0x010000;
pub const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

pub const TRUN_DATA_OFFSET: u32 = 0x000001;
pub const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
pub const TRUN_SAMPLE_DURATION: u32 = 0x000100;
pub const TRUN_SAMPLE_SIZE: u32 = 0x000200;
pub const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
pub const TRUN_SAMPLE_COMPOSITION_OFFSET: u32 = 0x000800;

/// Runs with no per-sample fields are synthesized from defaults up to this count.
const MAX_SYNTHESIZED_SAMPLES: u32 = 1 << 16;

// mehd: fragmented movie duration
pub struct MehdDecoder;

impl BoxDecoder for MehdDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, _flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let fragment_duration =
            need!(b, b.versioned("fragment_duration", version), "fragment_duration");

        Ok(Some(b.finish(Some(PayloadDetail::MovieExtendsHeader(MovieExtendsHeaderBox {
            fragment_duration,
        })))))
    }
}

// trex: per-track fragment defaults
pub struct TrexDecoder;

impl BoxDecoder for TrexDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        if b.full_box().is_none() {
            return Ok(Some(b.finish(None)));
        }
        let track_id = need!(b, b.u32("track_ID"), "track_ID");
        let default_sample_description_index = need!(
            b,
            b.u32("default_sample_description_index"),
            "default_sample_description_index"
        );
        let default_sample_duration =
            need!(b, b.u32("default_sample_duration"), "default_sample_duration");
        let default_sample_size = need!(b, b.u32("default_sample_size"), "default_sample_size");
        let default_sample_flags = need!(b, b.u32("default_sample_flags"), "default_sample_flags");

        Ok(Some(b.finish(Some(PayloadDetail::TrackExtends(TrackExtendsBox {
            track_id,
            default_sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })))))
    }
}

// mfhd: fragment sequence number
pub struct MfhdDecoder;

impl BoxDecoder for MfhdDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        if b.full_box().is_none() {
            return Ok(Some(b.finish(None)));
        }
        let sequence_number = need!(b, b.u32("sequence_number"), "sequence_number");

        Ok(Some(b.finish(Some(PayloadDetail::MovieFragmentHeader(MovieFragmentHeaderBox {
            sequence_number,
        })))))
    }
}

// tfhd: track id plus optional defaults selected by flags
pub struct TfhdDecoder;

impl BoxDecoder for TfhdDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((_version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let track_id = need!(b, b.u32("track_ID"), "track_ID");

        let mut detail = TrackFragmentHeaderBox {
            flags,
            track_id,
            base_data_offset: None,
            sample_description_index: None,
            default_sample_duration: None,
            default_sample_size: None,
            default_sample_flags: None,
            duration_is_empty: flags & TFHD_DURATION_IS_EMPTY != 0,
            default_base_is_moof: flags & TFHD_DEFAULT_BASE_IS_MOOF != 0,
        };
        if flags & TFHD_BASE_DATA_OFFSET != 0 {
            detail.base_data_offset = Some(need!(b, b.u64("base_data_offset"), "base_data_offset"));
        }
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            detail.sample_description_index =
                Some(need!(b, b.u32("sample_description_index"), "sample_description_index"));
        }
        if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
            detail.default_sample_duration =
                Some(need!(b, b.u32("default_sample_duration"), "default_sample_duration"));
        }
        if flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
            detail.default_sample_size =
                Some(need!(b, b.u32("default_sample_size"), "default_sample_size"));
        }
        if flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
            detail.default_sample_flags =
                Some(need!(b, b.u32("default_sample_flags"), "default_sample_flags"));
        }
        if detail.duration_is_empty {
            b.push_described("duration_is_empty", true, "Fragment covers no samples (0x010000)");
        }
        if detail.default_base_is_moof {
            b.push_described("default_base_is_moof", true, "Data offsets are relative to the moof (0x020000)");
        }

        Ok(Some(b.finish(Some(PayloadDetail::TrackFragmentHeader(detail)))))
    }
}

// tfdt: base media decode time
pub struct TfdtDecoder;

impl BoxDecoder for TfdtDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, _flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let base_media_decode_time =
            need!(b, b.versioned("base_media_decode_time", version), "base_media_decode_time");

        Ok(Some(b.finish(Some(PayloadDetail::TrackFragmentDecodeTime(
            TrackFragmentDecodeTimeBox { version, base_media_decode_time },
        )))))
    }
}

// trun: samples of one run, resolved against the track fragment environment
pub struct TrunDecoder;

impl BoxDecoder for TrunDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let sample_count = need!(b, b.u32("sample_count"), "sample_count");
        let data_offset = if flags & TRUN_DATA_OFFSET != 0 {
            Some(need!(b, b.i32("data_offset"), "data_offset"))
        } else {
            None
        };
        let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            let start = b.r.offset();
            let v = need!(b, b.r.u32(), "first_sample_flags");
            b.push_ranged("first_sample_flags", format!("0x{v:08x}"), start..b.r.offset());
            Some(v)
        } else {
            None
        };

        let tf = env.track_fragment;
        if let Some(id) = tf.and_then(|e| e.track_id) {
            b.push_described("track_ID", id, "Resolved from the track fragment header");
        }
        let start_data_offset = match (data_offset, tf) {
            (Some(rel), Some(e)) => e.base_data_offset.checked_add_signed(rel as i64),
            (None, Some(e)) => Some(e.data_cursor.unwrap_or(e.base_data_offset)),
            _ => None,
        };
        let start_decode_time = tf.and_then(|e| e.next_decode_time);
        let first_sample_number = tf.map_or(1, |e| e.next_sample_number);
        let run_index = tf.map_or(0, |e| e.run_index);

        let default_duration = tf.and_then(|e| e.default_sample_duration);
        let default_size = tf.and_then(|e| e.default_sample_size);
        let default_flags = tf.and_then(|e| e.default_sample_flags);

        let per_sample = flags
            & (TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE | TRUN_SAMPLE_FLAGS | TRUN_SAMPLE_COMPOSITION_OFFSET)
            != 0;

        let mut entries = Vec::new();
        let mut decode_cursor = start_decode_time;
        let mut data_cursor = start_data_offset;
        let mut total_duration = Some(0u64);
        let mut total_size = Some(0u64);

        if per_sample || sample_count <= MAX_SYNTHESIZED_SAMPLES {
            for i in 0..sample_count {
                let idx = i as usize;
                let start = b.r.offset();
                let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
                    let Some(v) = b.r.u32() else {
                        b.entry_truncated(idx, "sample_duration");
                        break;
                    };
                    Some(v)
                } else {
                    default_duration
                };
                let size = if flags & TRUN_SAMPLE_SIZE != 0 {
                    let Some(v) = b.r.u32() else {
                        b.entry_truncated(idx, "sample_size");
                        break;
                    };
                    Some(v)
                } else {
                    default_size
                };
                let sample_flags = if flags & TRUN_SAMPLE_FLAGS != 0 {
                    let Some(v) = b.r.u32() else {
                        b.entry_truncated(idx, "sample_flags");
                        break;
                    };
                    Some(v)
                } else if i == 0 {
                    first_sample_flags.or(default_flags)
                } else {
                    default_flags
                };
                let composition_time_offset = if flags & TRUN_SAMPLE_COMPOSITION_OFFSET != 0 {
                    let Some(v) = b.r.u32() else {
                        b.entry_truncated(idx, "sample_composition_time_offset");
                        break;
                    };
                    Some(if version == 0 { v as i64 } else { v as i32 as i64 })
                } else {
                    None
                };

                let decode_time = decode_cursor;
                let presentation_time =
                    decode_time.map(|d| (d as i64).saturating_add(composition_time_offset.unwrap_or(0)));
                let byte_range = match (data_cursor, size) {
                    (Some(off), Some(sz)) => Some(off..off.saturating_add(sz as u64)),
                    _ => None,
                };

                if per_sample && idx < MAX_ENTRY_FIELDS {
                    let range = start..b.r.offset();
                    if let Some(d) = duration {
                        b.push_ranged(format!("entries[{idx}].sample_duration"), d, range.clone());
                    }
                    if let Some(s) = size {
                        b.push_ranged(format!("entries[{idx}].sample_size"), s, range.clone());
                    }
                    if let Some(c) = composition_time_offset {
                        b.push_ranged(format!("entries[{idx}].sample_composition_time_offset"), c, range);
                    }
                }

                entries.push(TrackRunSample {
                    index: i,
                    sample_number: first_sample_number.saturating_add(i),
                    duration,
                    size,
                    flags: sample_flags,
                    composition_time_offset,
                    decode_time,
                    presentation_time,
                    data_offset: data_cursor,
                    byte_range,
                });

                decode_cursor = decode_cursor.zip(duration).map(|(t, d)| t.saturating_add(d as u64));
                data_cursor = data_cursor.zip(size).map(|(o, s)| o.saturating_add(s as u64));
                total_duration = total_duration.zip(duration).map(|(t, d)| t.saturating_add(d as u64));
                total_size = total_size.zip(size).map(|(t, s)| t.saturating_add(s as u64));
            }
        } else {
            total_duration = default_duration.map(|d| d as u64 * sample_count as u64);
            total_size = default_size.map(|s| s as u64 * sample_count as u64);
            decode_cursor = decode_cursor.zip(total_duration).map(|(t, d)| t.saturating_add(d));
            data_cursor = data_cursor.zip(total_size).map(|(o, s)| o.saturating_add(s));
        }

        if let Some(d) = total_duration {
            b.push("total_sample_duration", d);
        }
        if let Some(s) = total_size {
            b.push("total_sample_size", s);
        }
        if let Some(o) = start_data_offset {
            b.push_described("data_start", o, "Absolute file offset of the run's first sample");
        }

        Ok(Some(b.finish(Some(PayloadDetail::TrackRun(TrackRunBox {
            version,
            flags,
            sample_count,
            data_offset,
            first_sample_flags,
            track_id: tf.and_then(|e| e.track_id),
            run_index,
            first_sample_number,
            start_decode_time,
            end_decode_time: decode_cursor,
            start_data_offset,
            end_data_offset: data_cursor,
            total_duration,
            total_size,
            entries,
        })))))
    }
}

// tfra: random access points, resolved against fragments already seen
pub struct TfraDecoder;

impl BoxDecoder for TfraDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, _flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let track_id = need!(b, b.u32("track_ID"), "track_ID");
        let sizes = need!(b, b.r.u32(), "length_size_of_traf_num");
        let traf_number_size = (((sizes >> 4) & 0x3) + 1) as u8;
        let trun_number_size = (((sizes >> 2) & 0x3) + 1) as u8;
        let sample_number_size = ((sizes & 0x3) + 1) as u8;
        b.push("length_size_of_traf_num", traf_number_size);
        b.push("length_size_of_trun_num", trun_number_size);
        b.push("length_size_of_sample_num", sample_number_size);
        let entry_count = need!(b, b.u32("number_of_entry"), "number_of_entry");

        let mut entries = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(time) = wide(&mut b, version) else {
                b.entry_truncated(i, "time");
                break;
            };
            let Some(moof_offset) = wide(&mut b, version) else {
                b.entry_truncated(i, "moof_offset");
                break;
            };
            let Some(traf_number) = b.r.uint(traf_number_size as usize) else {
                b.entry_truncated(i, "traf_number");
                break;
            };
            let Some(trun_number) = b.r.uint(trun_number_size as usize) else {
                b.entry_truncated(i, "trun_number");
                break;
            };
            let Some(sample_number) = b.r.uint(sample_number_size as usize) else {
                b.entry_truncated(i, "sample_number");
                break;
            };
            let (traf_number, trun_number, sample_number) =
                (traf_number as u32, trun_number as u32, sample_number as u32);
            let resolved = env.fragments.resolve(moof_offset, track_id, traf_number, trun_number);

            if i < MAX_ENTRY_FIELDS {
                let range = start..b.r.offset();
                b.push_ranged(format!("entries[{i}].time"), time, range.clone());
                b.push_ranged(format!("entries[{i}].moof_offset"), moof_offset, range.clone());
                b.push_ranged(format!("entries[{i}].sample_number"), sample_number, range.clone());
                if let Some(seq) = resolved.as_ref().and_then(|r| r.fragment_sequence_number) {
                    b.push_ranged(format!("entries[{i}].fragment_sequence_number"), seq, range);
                }
            }
            entries.push(TrackFragmentRandomAccessEntry {
                time,
                moof_offset,
                traf_number,
                trun_number,
                sample_number,
                resolved,
            });
        }

        Ok(Some(b.finish(Some(PayloadDetail::TrackFragmentRandomAccess(
            TrackFragmentRandomAccessBox {
                version,
                track_id,
                traf_number_size,
                trun_number_size,
                sample_number_size,
                entry_count,
                entries,
            },
        )))))
    }
}

fn wide(b: &mut PayloadBuilder<'_>, version: u8) -> Option<u64> {
    if version == 1 { b.r.u64() } else { b.r.u32().map(u64::from) }
}

// mfro: size of the enclosing mfra
pub struct MfroDecoder;

impl BoxDecoder for MfroDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        if b.full_box().is_none() {
            return Ok(Some(b.finish(None)));
        }
        let mfra_size = need!(b, b.u32("size"), "size");

        Ok(Some(b.finish(Some(PayloadDetail::MovieFragmentRandomAccessOffset(
            MovieFragmentRandomAccessOffsetBox { mfra_size },
        )))))
    }
}

// sidx: subsegment references
pub struct SidxDecoder;

impl BoxDecoder for SidxDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, _flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let reference_id = need!(b, b.u32("reference_ID"), "reference_ID");
        let timescale = need!(b, b.u32("timescale"), "timescale");
        let earliest_presentation_time = need!(
            b,
            b.versioned("earliest_presentation_time", version),
            "earliest_presentation_time"
        );
        let first_offset = need!(b, b.versioned("first_offset", version), "first_offset");
        need!(b, b.r.skip(2).then_some(()), "reference_count");
        let reference_count = need!(b, b.u16("reference_count"), "reference_count");

        let mut references = Vec::new();
        for i in 0..reference_count as usize {
            let start = b.r.offset();
            let Some(word) = b.r.u32() else {
                b.entry_truncated(i, "referenced_size");
                break;
            };
            let Some(subsegment_duration) = b.r.u32() else {
                b.entry_truncated(i, "subsegment_duration");
                break;
            };
            let Some(sap) = b.r.u32() else {
                b.entry_truncated(i, "starts_with_SAP");
                break;
            };
            let reference = SegmentReference {
                reference_type: (word >> 31) as u8,
                referenced_size: word & 0x7fff_ffff,
                subsegment_duration,
                starts_with_sap: sap >> 31 == 1,
                sap_type: ((sap >> 28) & 0x7) as u8,
                sap_delta_time: sap & 0x0fff_ffff,
            };
            if i < MAX_ENTRY_FIELDS {
                let range = start..b.r.offset();
                b.push_ranged(format!("references[{i}].referenced_size"), reference.referenced_size, range.clone());
                b.push_ranged(format!("references[{i}].subsegment_duration"), subsegment_duration, range);
            }
            references.push(reference);
        }

        Ok(Some(b.finish(Some(PayloadDetail::SegmentIndex(SegmentIndexBox {
            version,
            reference_id,
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
        })))))
    }
}
