use super::{BoxDecoder, read_payload};
use crate::boxes::{BoxHeader, FourCC};
use crate::environment::DecodeEnvironment;
use crate::payload::{
    DataLocation, DataReferenceBox, DataReferenceEntry, EditListBox, EditListEntry, FileTypeBox,
    HandlerBox, MAX_ENTRY_FIELDS, MediaDataBox, MediaHeaderBox, MovieHeaderBox, ParsedBoxPayload,
    PayloadBuilder, PayloadDetail, SoundMediaHeaderBox, TrackHeaderBox, VideoMediaHeaderBox,
    fixed_8_8, fixed_16_16, lang_from_u16,
};
use crate::reader::RandomAccessReader;

// ftyp / styp: major + minor + compatible brands
pub struct FtypDecoder;

impl BoxDecoder for FtypDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let major_brand = need!(b, b.fourcc("major_brand"), "major_brand");
        let minor_version = need!(b, b.u32("minor_version"), "minor_version");

        let mut compatible_brands = Vec::new();
        while b.r.remaining() >= 4 {
            let name = format!("compatible_brands[{}]", compatible_brands.len());
            if let Some(brand) = b.fourcc(&name) {
                compatible_brands.push(brand);
            }
        }
        if b.r.remaining() > 0 {
            let name = format!("compatible_brands[{}]", compatible_brands.len());
            b.truncated_before(&name);
        }

        Ok(Some(b.finish(Some(PayloadDetail::FileType(FileTypeBox {
            major_brand,
            minor_version,
            compatible_brands,
        })))))
    }
}

// mvhd: times, timescale, duration, rate, volume, next track id
pub struct MvhdDecoder;

impl BoxDecoder for MvhdDecoder {
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
        let creation_time = need!(b, b.versioned("creation_time", version), "creation_time");
        let modification_time =
            need!(b, b.versioned("modification_time", version), "modification_time");
        let timescale = need!(b, b.u32("timescale"), "timescale");
        let duration = need!(b, b.versioned("duration", version), "duration");
        let rate = fixed_16_16(need!(b, b.r.u32(), "rate"));
        b.push("rate", rate);
        let volume = fixed_8_8(need!(b, b.r.u16(), "volume"));
        b.push("volume", volume);
        // reserved (10), matrix (36), pre_defined (24)
        need!(b, b.r.skip(70).then_some(()), "next_track_ID");
        let next_track_id = need!(b, b.u32("next_track_ID"), "next_track_ID");

        Ok(Some(b.finish(Some(PayloadDetail::MovieHeader(MovieHeaderBox {
            version,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            next_track_id,
        })))))
    }
}

// tkhd: track id, duration, layer, volume, width, height
pub struct TkhdDecoder;

impl BoxDecoder for TkhdDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        b.push_described("enabled", flags & 0x1 != 0, "Track enabled flag (0x000001)");
        let creation_time = need!(b, b.versioned("creation_time", version), "creation_time");
        let modification_time =
            need!(b, b.versioned("modification_time", version), "modification_time");
        let track_id = need!(b, b.u32("track_ID"), "track_ID");
        need!(b, b.r.skip(4).then_some(()), "duration");
        let duration = need!(b, b.versioned("duration", version), "duration");
        need!(b, b.r.skip(8).then_some(()), "layer");
        let layer = need!(b, b.r.i16(), "layer");
        b.push("layer", layer);
        let alternate_group = need!(b, b.r.i16(), "alternate_group");
        b.push("alternate_group", alternate_group);
        let volume = fixed_8_8(need!(b, b.r.u16(), "volume"));
        b.push("volume", volume);
        // reserved (2), matrix (36)
        need!(b, b.r.skip(38).then_some(()), "width");
        let width = fixed_16_16(need!(b, b.r.u32(), "width"));
        b.push("width", width);
        let height = fixed_16_16(need!(b, b.r.u32(), "height"));
        b.push("height", height);

        Ok(Some(b.finish(Some(PayloadDetail::TrackHeader(TrackHeaderBox {
            version,
            flags,
            creation_time,
            modification_time,
            track_id,
            duration,
            layer,
            alternate_group,
            volume,
            width,
            height,
        })))))
    }
}

// mdhd: timescale, duration, language
pub struct MdhdDecoder;

impl BoxDecoder for MdhdDecoder {
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
        let creation_time = need!(b, b.versioned("creation_time", version), "creation_time");
        let modification_time =
            need!(b, b.versioned("modification_time", version), "modification_time");
        let timescale = need!(b, b.u32("timescale"), "timescale");
        let duration = need!(b, b.versioned("duration", version), "duration");
        let start = b.r.offset();
        let language = lang_from_u16(need!(b, b.r.u16(), "language"));
        b.push_ranged("language", &language, start..b.r.offset());

        Ok(Some(b.finish(Some(PayloadDetail::MediaHeader(MediaHeaderBox {
            version,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
        })))))
    }
}

// hdlr: handler type + name
pub struct HdlrDecoder;

impl BoxDecoder for HdlrDecoder {
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
        need!(b, b.r.skip(4).then_some(()), "handler_type");
        let handler_type = need!(b, b.fourcc("handler_type"), "handler_type");
        need!(b, b.r.skip(12).then_some(()), "name");

        let start = b.r.offset();
        let rest = b.r.bytes(b.r.remaining()).unwrap_or_default();
        let end = rest.iter().position(|&c| c == 0).unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..end]).to_string();
        b.push_ranged("name", &name, start..b.r.offset());

        Ok(Some(b.finish(Some(PayloadDetail::Handler(HandlerBox { handler_type, name })))))
    }
}

// elst: edit segments
pub struct ElstDecoder;

impl BoxDecoder for ElstDecoder {
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
            let Some(segment_duration) = (if version == 1 { b.r.u64() } else { b.r.u32().map(u64::from) })
            else {
                b.entry_truncated(i, "segment_duration");
                break;
            };
            let Some(media_time) = (if version == 1 { b.r.i64() } else { b.r.i32().map(i64::from) })
            else {
                b.entry_truncated(i, "media_time");
                break;
            };
            let Some(media_rate_integer) = b.r.i16() else {
                b.entry_truncated(i, "media_rate_integer");
                break;
            };
            let Some(media_rate_fraction) = b.r.i16() else {
                b.entry_truncated(i, "media_rate_fraction");
                break;
            };
            if i < MAX_ENTRY_FIELDS {
                let range = start..b.r.offset();
                b.push_ranged(format!("entries[{i}].segment_duration"), segment_duration, range.clone());
                b.push_ranged(format!("entries[{i}].media_time"), media_time, range.clone());
                b.push_ranged(
                    format!("entries[{i}].media_rate"),
                    format!("{media_rate_integer}.{media_rate_fraction}"),
                    range,
                );
            }
            entries.push(EditListEntry {
                segment_duration,
                media_time,
                media_rate_integer,
                media_rate_fraction,
            });
        }

        Ok(Some(b.finish(Some(PayloadDetail::EditList(EditListBox {
            version,
            entry_count,
            entries,
        })))))
    }
}

// free / skip: report the padding length without reading it
pub struct FreeSpaceDecoder;

impl BoxDecoder for FreeSpaceDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        _r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let mut b = PayloadBuilder::new(&[], hdr.payload_range().start);
        b.push_ranged("length", hdr.payload_len(), hdr.payload_range());
        Ok(Some(b.finish(None)))
    }
}

// mdat: where the media bytes are, without touching them
pub struct MdatDecoder;

impl BoxDecoder for MdatDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        _r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let payload_range = hdr.payload_range();
        let mut b = PayloadBuilder::new(&[], payload_range.start);
        b.push_described("header_offset", hdr.start, "Offset of the box header");
        b.push_ranged("payload_offset", payload_range.start, payload_range.clone());
        b.push_ranged("payload_length", hdr.payload_len(), payload_range.clone());
        Ok(Some(b.finish(Some(PayloadDetail::MediaData(MediaDataBox {
            header_start: hdr.start,
            payload_length: hdr.payload_len(),
            payload_range,
        })))))
    }
}

fn graphics_mode_name(mode: u16) -> Option<&'static str> {
    match mode {
        0x0000 => Some("copy"),
        0x0040 => Some("dither copy"),
        0x0100 => Some("blend"),
        0x0101 => Some("transparent"),
        0x0103 => Some("straight alpha"),
        0x0104 => Some("premul white alpha"),
        0x0105 => Some("premul black alpha"),
        0x0110 => Some("composition"),
        0x0111 => Some("straight alpha blend"),
        _ => None,
    }
}

// vmhd: graphics mode and opcolor
pub struct VmhdDecoder;

impl BoxDecoder for VmhdDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let graphics_mode = need!(b, b.u16("graphics_mode"), "graphics_mode");
        let graphics_mode_name = graphics_mode_name(graphics_mode);
        if let Some(name) = graphics_mode_name {
            b.push("graphics_mode_name", name);
        }
        let mut opcolor = [0u16; 3];
        for (slot, label) in opcolor.iter_mut().zip(["opcolor.red", "opcolor.green", "opcolor.blue"]) {
            *slot = need!(b, b.u16(label), label);
        }

        Ok(Some(b.finish(Some(PayloadDetail::VideoMediaHeader(VideoMediaHeaderBox {
            version,
            flags,
            graphics_mode,
            graphics_mode_name: graphics_mode_name.map(str::to_string),
            opcolor,
        })))))
    }
}

// smhd: stereo balance
pub struct SmhdDecoder;

impl BoxDecoder for SmhdDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let start = b.r.offset();
        let balance = fixed_8_8(need!(b, b.r.u16(), "balance"));
        b.push_ranged("balance", balance, start..b.r.offset());
        need!(b, b.u16("reserved"), "reserved");

        Ok(Some(b.finish(Some(PayloadDetail::SoundMediaHeader(SoundMediaHeaderBox { version, flags, balance })))))
    }
}

// dref: data reference entries (url , urn , or anything else as opaque bytes)
pub struct DrefDecoder;

impl BoxDecoder for DrefDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        let Some((version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut entries = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(size) = b.r.u32() else {
                b.entry_truncated(i, "size");
                break;
            };
            let Some(typ) = b.r.fourcc() else {
                b.entry_truncated(i, "type");
                break;
            };
            let body_len = match size {
                0 => Some(b.r.remaining()),
                1 => b.r.u64().and_then(|large| usize::try_from(large).ok()?.checked_sub(16)),
                n => (n as usize).checked_sub(8),
            };
            let Some(body) = body_len.and_then(|n| b.r.bytes(n)) else {
                b.entry_truncated(i, "entry_payload");
                break;
            };
            if body.len() < 4 {
                b.entry_truncated(i, "entry_version");
                break;
            }
            let entry_version = body[0];
            let entry_flags = u32::from_be_bytes([0, body[1], body[2], body[3]]);
            let location = data_location(typ, &body[4..], entry_flags & 0x1 != 0);
            let range = start..b.r.offset();

            if i < MAX_ENTRY_FIELDS {
                b.push_ranged(format!("entries[{i}].type"), typ, range.clone());
                b.push(format!("entries[{i}].self_contained"), entry_flags & 0x1 != 0);
                match &location {
                    DataLocation::Url(url) => b.push_ranged(format!("entries[{i}].location"), url, range.clone()),
                    DataLocation::Urn { name, location } => {
                        if let Some(name) = name {
                            b.push_ranged(format!("entries[{i}].name"), name, range.clone());
                        }
                        if let Some(location) = location {
                            b.push_ranged(format!("entries[{i}].location"), location, range.clone());
                        }
                    }
                    DataLocation::Opaque { length } => b.push(format!("entries[{i}].payload_length"), length),
                    DataLocation::SelfContained | DataLocation::Empty => {}
                }
            }
            entries.push(DataReferenceEntry {
                index: i as u32,
                typ,
                version: entry_version,
                flags: entry_flags,
                location,
                byte_range: range,
            });
        }

        Ok(Some(b.finish(Some(PayloadDetail::DataReference(DataReferenceBox {
            version,
            flags,
            entry_count,
            entries,
        })))))
    }
}

fn data_location(typ: FourCC, payload: &[u8], self_contained: bool) -> DataLocation {
    if payload.is_empty() {
        return if self_contained { DataLocation::SelfContained } else { DataLocation::Empty };
    }
    let opaque = DataLocation::Opaque { length: payload.len() as u64 };
    // NUL-terminated UTF-8; an empty string counts as absent.
    let text = |bytes: &[u8]| {
        let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).ok().filter(|s| !s.is_empty()).map(str::to_string)
    };
    match &typ.0 {
        b"url " => text(payload).map_or(opaque, DataLocation::Url),
        b"urn " => {
            let name = text(payload);
            let location = payload.iter().position(|&c| c == 0).and_then(|nul| text(&payload[nul + 1..]));
            if name.is_none() && location.is_none() {
                return opaque;
            }
            DataLocation::Urn { name, location }
        }
        _ => opaque,
    }
}

// avcC: profile, level, NAL length size, parameter set lengths
pub struct AvcCDecoder;

impl BoxDecoder for AvcCDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        need!(b, b.u8("configuration_version"), "configuration_version");
        need!(b, b.u8("profile_indication"), "profile_indication");
        need!(b, b.u8("profile_compatibility"), "profile_compatibility");
        need!(b, b.u8("level_indication"), "level_indication");
        let length_byte = need!(b, b.r.u8(), "length_size_minus_one");
        b.push("nal_unit_length_size", (length_byte & 0x3) + 1);

        for (label, mask) in [("sequence_parameter_sets", 0x1f_u8), ("picture_parameter_sets", 0xff)] {
            let count = need!(b, b.r.u8(), label) & mask;
            b.push(format!("{label}.count"), count);
            for i in 0..count as usize {
                let len = need!(b, b.r.u16(), label);
                let start = b.r.offset();
                need!(b, b.r.skip(len as usize).then_some(()), label);
                b.push_ranged(format!("{label}[{i}].length"), len, start..b.r.offset());
            }
        }

        Ok(Some(b.finish(None)))
    }
}

// hvcC: profile fields, NAL length size, NAL unit arrays
pub struct HvcCDecoder;

impl BoxDecoder for HvcCDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        need!(b, b.u8("configuration_version"), "configuration_version");
        let profile = need!(b, b.r.u8(), "general_profile_idc");
        b.push("general_profile_idc", profile & 0x1f);
        // compatibility flags (4), constraint flags (6)
        need!(b, b.r.skip(10).then_some(()), "general_level_idc");
        need!(b, b.u8("general_level_idc"), "general_level_idc");
        // segmentation, parallelism, chroma, bit depths, frame rate fields
        need!(b, b.r.skip(8).then_some(()), "length_size_minus_one");
        let length_byte = need!(b, b.r.u8(), "length_size_minus_one");
        b.push("nal_unit_length_size", (length_byte & 0x3) + 1);
        let arrays = need!(b, b.u8("num_of_arrays"), "num_of_arrays");

        for a in 0..arrays as usize {
            let nal_type = need!(b, b.r.u8(), "NAL_unit_type") & 0x3f;
            b.push(format!("arrays[{a}].nal_unit_type"), nal_type);
            let count = need!(b, b.r.u16(), "numNalus");
            b.push(format!("arrays[{a}].count"), count);
            for n in 0..count as usize {
                let len = need!(b, b.r.u16(), "nalUnitLength");
                let start = b.r.offset();
                need!(b, b.r.skip(len as usize).then_some(()), "nalUnit");
                b.push_ranged(format!("arrays[{a}].nal_units[{n}].length"), len, start..b.r.offset());
            }
        }

        Ok(Some(b.finish(None)))
    }
}
