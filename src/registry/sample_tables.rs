use super::{BoxDecoder, read_payload};
use crate::boxes::{BoxHeader, FourCC};
use crate::catalog::{SampleEntryKind, sample_entry_kind};
use crate::environment::DecodeEnvironment;
use crate::payload::{
    ChunkOffsetBox, ChunkOffsetWidth, CompactSampleSizeBox, CompositionOffsetBox,
    CompositionOffsetEntry, FieldReader, MAX_ENTRY_FIELDS, NestedBox, ParsedBoxPayload,
    PayloadBuilder, PayloadDetail, SampleDescriptionBox, SampleEntry, SampleSizeBox,
    SampleToChunkBox, SampleToChunkEntry, SyncSampleTableBox, TimeToSampleBox, TimeToSampleEntry,
    fixed_16_16,
};
use crate::reader::RandomAccessReader;

// stsd: sample entries with their nested configuration boxes
pub struct StsdDecoder;

impl BoxDecoder for StsdDecoder {
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
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut entries = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            if b.r.remaining() < 8 {
                b.entry_truncated(i, "size");
                break;
            }
            let size = b.r.u32().unwrap_or_default() as u64;
            let format = b.r.fourcc().unwrap_or(FourCC(*b"    "));
            let mut header_len = 8u64;
            let total = match size {
                0 => 8 + b.r.remaining() as u64,
                1 => match b.r.u64() {
                    Some(large) => {
                        header_len = 16;
                        large
                    }
                    None => {
                        b.entry_truncated(i, "largesize");
                        break;
                    }
                },
                n => n,
            };
            let body_len = total.saturating_sub(header_len);
            if total < header_len || body_len > b.r.remaining() as u64 {
                b.entry_truncated(i, "payload");
                break;
            }
            let body = b.r.bytes(body_len as usize).unwrap_or_default();
            let entry = parse_sample_entry(i as u32, format, body, start, start + header_len, start + total);

            if i < MAX_ENTRY_FIELDS {
                let range = entry.byte_range.clone();
                b.push_ranged(format!("entries[{i}].format"), format, range.clone());
                b.push_ranged(format!("entries[{i}].data_reference_index"), entry.data_reference_index, range.clone());
                if let (Some(w), Some(h)) = (entry.width, entry.height) {
                    b.push_ranged(format!("entries[{i}].dimensions"), format!("{w}x{h}"), range.clone());
                }
                if let Some(ch) = entry.channel_count {
                    b.push_ranged(format!("entries[{i}].channel_count"), ch, range.clone());
                }
                if let Some(sr) = entry.sample_rate {
                    b.push_ranged(format!("entries[{i}].sample_rate"), sr, range.clone());
                }
                if let Some(orig) = entry.original_format {
                    b.push_ranged(format!("entries[{i}].original_format"), orig, range);
                }
            }
            entries.push(entry);
        }

        Ok(Some(b.finish(Some(PayloadDetail::SampleDescription(SampleDescriptionBox {
            entry_count,
            entries,
        })))))
    }
}

fn parse_sample_entry(index: u32, format: FourCC, body: &[u8], start: u64, body_start: u64, end: u64) -> SampleEntry {
    let mut r = FieldReader::new(body, body_start);
    r.skip(6);
    let data_reference_index = r.u16().unwrap_or_default();
    let mut entry = SampleEntry {
        index,
        format,
        original_format: None,
        data_reference_index,
        width: None,
        height: None,
        channel_count: None,
        sample_rate: None,
        byte_range: start..end,
        children: Vec::new(),
    };

    let children_at = match sample_entry_kind(format) {
        Some(SampleEntryKind::Visual) => {
            r.skip(16);
            entry.width = r.u16();
            entry.height = r.u16();
            78
        }
        Some(SampleEntryKind::Audio) => {
            r.skip(8);
            entry.channel_count = r.u16();
            r.skip(6);
            entry.sample_rate = r.u32().map(|v| fixed_16_16(v) as u32);
            28
        }
        None => return entry,
    };

    if body.len() > children_at {
        entry.children = nested_boxes(&body[children_at..], body_start + children_at as u64);
    }
    if matches!(&format.0, b"encv" | b"enca") {
        entry.original_format = original_format(body, body_start, &entry.children);
    }
    entry
}

/// Walk the boxes packed inside a sample entry; stops at the first malformed one.
pub(crate) fn nested_boxes(buf: &[u8], base: u64) -> Vec<NestedBox> {
    let mut out = Vec::new();
    let mut r = FieldReader::new(buf, base);
    while r.remaining() >= 8 {
        let start = r.offset();
        let size = r.u32().unwrap_or_default() as u64;
        let typ = r.fourcc().unwrap_or(FourCC(*b"    "));
        let remaining = r.remaining() as u64;
        let total = if size == 0 { remaining + 8 } else { size };
        if total < 8 || total - 8 > remaining {
            break;
        }
        r.skip((total - 8) as usize);
        out.push(NestedBox { typ, range: start..start + total, payload_range: start + 8..start + total });
    }
    out
}

fn original_format(body: &[u8], body_start: u64, children: &[NestedBox]) -> Option<FourCC> {
    let slice = |range: &std::ops::Range<u64>| {
        let lo = (range.start - body_start) as usize;
        let hi = (range.end - body_start) as usize;
        body.get(lo..hi)
    };
    let sinf = children.iter().find(|c| &c.typ.0 == b"sinf")?;
    let inner = nested_boxes(slice(&sinf.payload_range)?, sinf.payload_range.start);
    let frma = inner.iter().find(|c| &c.typ.0 == b"frma")?;
    let bytes = slice(&frma.payload_range)?;
    FieldReader::new(bytes, frma.payload_range.start).fourcc()
}

// stts: run-length sample durations
pub struct SttsDecoder;

impl BoxDecoder for SttsDecoder {
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
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut entries = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(sample_count) = b.r.u32() else {
                b.entry_truncated(i, "sample_count");
                break;
            };
            let Some(sample_delta) = b.r.u32() else {
                b.entry_truncated(i, "sample_delta");
                break;
            };
            if i < MAX_ENTRY_FIELDS {
                let range = start..b.r.offset();
                b.push_ranged(format!("entries[{i}].sample_count"), sample_count, range.clone());
                b.push_ranged(format!("entries[{i}].sample_delta"), sample_delta, range);
            }
            entries.push(TimeToSampleEntry { sample_count, sample_delta });
        }

        let detail = TimeToSampleBox { entry_count, entries };
        if !b.is_truncated() {
            b.push("total_samples", detail.total_samples());
            b.push("total_duration", detail.total_duration());
        }
        Ok(Some(b.finish(Some(PayloadDetail::TimeToSample(detail)))))
    }
}

// ctts: composition offsets, signed in version 1
pub struct CttsDecoder;

impl BoxDecoder for CttsDecoder {
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
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut entries = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(sample_count) = b.r.u32() else {
                b.entry_truncated(i, "sample_count");
                break;
            };
            let Some(raw) = b.r.u32() else {
                b.entry_truncated(i, "sample_offset");
                break;
            };
            let sample_offset = if version == 1 { raw as i32 as i64 } else { raw as i64 };
            if i < MAX_ENTRY_FIELDS {
                let range = start..b.r.offset();
                b.push_ranged(format!("entries[{i}].sample_count"), sample_count, range.clone());
                b.push_ranged(format!("entries[{i}].sample_offset"), sample_offset, range);
            }
            entries.push(CompositionOffsetEntry { sample_count, sample_offset });
        }

        Ok(Some(b.finish(Some(PayloadDetail::CompositionOffset(CompositionOffsetBox {
            version,
            entry_count,
            entries,
        })))))
    }
}

// stsc: sample-to-chunk runs
pub struct StscDecoder;

impl BoxDecoder for StscDecoder {
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
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut entries = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(first_chunk) = b.r.u32() else {
                b.entry_truncated(i, "first_chunk");
                break;
            };
            let Some(samples_per_chunk) = b.r.u32() else {
                b.entry_truncated(i, "samples_per_chunk");
                break;
            };
            let Some(sample_description_index) = b.r.u32() else {
                b.entry_truncated(i, "sample_description_index");
                break;
            };
            let byte_range = start..b.r.offset();
            if i < MAX_ENTRY_FIELDS {
                b.push_ranged(format!("entries[{i}].first_chunk"), first_chunk, byte_range.clone());
                b.push_ranged(format!("entries[{i}].samples_per_chunk"), samples_per_chunk, byte_range.clone());
                b.push_ranged(
                    format!("entries[{i}].sample_description_index"),
                    sample_description_index,
                    byte_range.clone(),
                );
            }
            entries.push(SampleToChunkEntry {
                first_chunk,
                samples_per_chunk,
                sample_description_index,
                byte_range,
            });
        }

        Ok(Some(b.finish(Some(PayloadDetail::SampleToChunk(SampleToChunkBox {
            entry_count,
            entries,
        })))))
    }
}

// stco / co64: chunk offsets, width chosen by box type
pub struct ChunkOffsetDecoder;

impl BoxDecoder for ChunkOffsetDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);
        let width = if &hdr.typ.0 == b"co64" { ChunkOffsetWidth::Bits64 } else { ChunkOffsetWidth::Bits32 };

        if b.full_box().is_none() {
            return Ok(Some(b.finish(None)));
        }
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut offsets = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let offset = match width {
                ChunkOffsetWidth::Bits32 => b.r.u32().map(u64::from),
                ChunkOffsetWidth::Bits64 => b.r.u64(),
            };
            let Some(offset) = offset else {
                b.entry_truncated(i, "chunk_offset");
                break;
            };
            if i < MAX_ENTRY_FIELDS {
                b.push_ranged(format!("entries[{i}].chunk_offset"), offset, start..b.r.offset());
            }
            offsets.push(offset);
        }

        Ok(Some(b.finish(Some(PayloadDetail::ChunkOffset(ChunkOffsetBox {
            width,
            entry_count,
            offsets,
        })))))
    }
}

// stsz: constant or per-sample sizes
pub struct StszDecoder;

impl BoxDecoder for StszDecoder {
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
        let default_sample_size = need!(b, b.u32("sample_size"), "sample_size");
        let sample_count = need!(b, b.u32("sample_count"), "sample_count");

        let mut sizes = Vec::new();
        if default_sample_size == 0 {
            for i in 0..sample_count as usize {
                let start = b.r.offset();
                let Some(size) = b.r.u32() else {
                    b.entry_truncated(i, "entry_size");
                    break;
                };
                if i < MAX_ENTRY_FIELDS {
                    b.push_ranged(format!("entries[{i}].entry_size"), size, start..b.r.offset());
                }
                sizes.push(size);
            }
        }

        Ok(Some(b.finish(Some(PayloadDetail::SampleSize(SampleSizeBox {
            default_sample_size,
            sample_count,
            sizes,
        })))))
    }
}

// stz2: compact sample sizes of 4, 8 or 16 bits
pub struct Stz2Decoder;

impl BoxDecoder for Stz2Decoder {
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
        need!(b, b.r.skip(3).then_some(()), "field_size");
        let field_size = need!(b, b.u8("field_size"), "field_size");
        let sample_count = need!(b, b.u32("sample_count"), "sample_count");

        if !matches!(field_size, 4 | 8 | 16) {
            b.push_described("field_size", field_size, "Unsupported field size; expected 4, 8, or 16");
            return Ok(Some(b.finish(None)));
        }

        let mut sizes = Vec::new();
        let mut i = 0usize;
        while i < sample_count as usize {
            let start = b.r.offset();
            match field_size {
                4 => {
                    let Some(pair) = b.r.u8() else {
                        b.entry_truncated(i, "entry_size");
                        break;
                    };
                    sizes.push((pair >> 4) as u16);
                    if i + 1 < sample_count as usize {
                        sizes.push((pair & 0x0f) as u16);
                    }
                }
                8 => {
                    let Some(v) = b.r.u8() else {
                        b.entry_truncated(i, "entry_size");
                        break;
                    };
                    sizes.push(v as u16);
                }
                _ => {
                    let Some(v) = b.r.u16() else {
                        b.entry_truncated(i, "entry_size");
                        break;
                    };
                    sizes.push(v);
                }
            }
            while i < sizes.len() {
                if i < MAX_ENTRY_FIELDS {
                    b.push_ranged(format!("entries[{i}].entry_size"), sizes[i], start..b.r.offset());
                }
                i += 1;
            }
        }

        Ok(Some(b.finish(Some(PayloadDetail::CompactSampleSize(CompactSampleSizeBox {
            field_size,
            sample_count,
            sizes,
        })))))
    }
}

// stss: sync sample numbers
pub struct StssDecoder;

impl BoxDecoder for StssDecoder {
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
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut sample_numbers = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(n) = b.r.u32() else {
                b.entry_truncated(i, "sample_number");
                break;
            };
            if i < MAX_ENTRY_FIELDS {
                b.push_ranged(format!("entries[{i}].sample_number"), n, start..b.r.offset());
            }
            sample_numbers.push(n);
        }

        Ok(Some(b.finish(Some(PayloadDetail::SyncSampleTable(SyncSampleTableBox {
            entry_count,
            sample_numbers,
        })))))
    }
}
