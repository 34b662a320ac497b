//! Decoded box payloads: an ordered field list plus an optional typed detail.

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::boxes::FourCC;

/// Per-entry fields beyond this count are left to the typed detail.
pub const MAX_ENTRY_FIELDS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadField {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
    pub byte_range: Option<Range<u64>>,
}

/// Result of decoding one box payload.
///
/// When any part of the payload was cut short a `status` field (or
/// `entries[i].status`) with value `truncated` is present and `detail` is
/// `None`; the fields decoded before the cut remain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedBoxPayload {
    pub fields: Vec<PayloadField>,
    pub detail: Option<PayloadDetail>,
}

impl ParsedBoxPayload {
    pub fn field(&self, name: &str) -> Option<&PayloadField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value.as_str())
    }

    pub fn is_truncated(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.name.ends_with("status") && f.value == "truncated")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadDetail {
    FileType(FileTypeBox),
    MovieHeader(MovieHeaderBox),
    TrackHeader(TrackHeaderBox),
    MediaHeader(MediaHeaderBox),
    Handler(HandlerBox),
    SampleDescription(SampleDescriptionBox),
    TimeToSample(TimeToSampleBox),
    CompositionOffset(CompositionOffsetBox),
    SampleToChunk(SampleToChunkBox),
    ChunkOffset(ChunkOffsetBox),
    SampleSize(SampleSizeBox),
    CompactSampleSize(CompactSampleSizeBox),
    SyncSampleTable(SyncSampleTableBox),
    EditList(EditListBox),
    MovieExtendsHeader(MovieExtendsHeaderBox),
    TrackExtends(TrackExtendsBox),
    MovieFragmentHeader(MovieFragmentHeaderBox),
    TrackFragmentHeader(TrackFragmentHeaderBox),
    TrackFragmentDecodeTime(TrackFragmentDecodeTimeBox),
    TrackRun(TrackRunBox),
    TrackFragmentRandomAccess(TrackFragmentRandomAccessBox),
    MovieFragmentRandomAccessOffset(MovieFragmentRandomAccessOffsetBox),
    SampleEncryption(SampleEncryptionBox),
    SampleAuxInfoOffsets(SampleAuxInfoOffsetsBox),
    SampleAuxInfoSizes(SampleAuxInfoSizesBox),
    SegmentIndex(SegmentIndexBox),
    MediaData(MediaDataBox),
    VideoMediaHeader(VideoMediaHeaderBox),
    SoundMediaHeader(SoundMediaHeaderBox),
    DataReference(DataReferenceBox),
    Metadata(MetadataBox),
    MetadataKeys(MetadataKeysBox),
    MetadataItemList(MetadataItemListBox),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieHeaderBox {
    pub version: u8,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: f64,
    pub volume: f64,
    pub next_track_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackHeaderBox {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: f64,
    pub width: f64,
    pub height: f64,
}

impl TrackHeaderBox {
    pub fn is_enabled(&self) -> bool {
        self.flags & 0x1 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaHeaderBox {
    pub version: u8,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerBox {
    pub handler_type: FourCC,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleDescriptionBox {
    pub entry_count: u32,
    pub entries: Vec<SampleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleEntry {
    /// 0-based position in the `stsd`.
    pub index: u32,
    pub format: FourCC,
    /// Format recorded in `sinf/frma` for protected entries.
    pub original_format: Option<FourCC>,
    pub data_reference_index: u16,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    pub byte_range: Range<u64>,
    pub children: Vec<NestedBox>,
}

impl SampleEntry {
    pub fn effective_format(&self) -> FourCC {
        self.original_format.unwrap_or(self.format)
    }
}

/// A box found inside a sample entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedBox {
    #[serde(rename = "type")]
    pub typ: FourCC,
    pub range: Range<u64>,
    pub payload_range: Range<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeToSampleBox {
    pub entry_count: u32,
    pub entries: Vec<TimeToSampleEntry>,
}

impl TimeToSampleBox {
    pub fn total_samples(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.sample_count as u64 * e.sample_delta as u64)
            .fold(0, u64::saturating_add)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionOffsetBox {
    pub version: u8,
    pub entry_count: u32,
    pub entries: Vec<CompositionOffsetEntry>,
}

impl CompositionOffsetBox {
    pub fn total_samples(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompositionOffsetEntry {
    pub sample_count: u32,
    pub sample_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleToChunkBox {
    pub entry_count: u32,
    pub entries: Vec<SampleToChunkEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
    pub byte_range: Range<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOffsetWidth {
    Bits32,
    Bits64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkOffsetBox {
    pub width: ChunkOffsetWidth,
    pub entry_count: u32,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSizeBox {
    /// Non-zero when every sample has this size and `sizes` is empty.
    pub default_sample_size: u32,
    pub sample_count: u32,
    pub sizes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactSampleSizeBox {
    pub field_size: u8,
    pub sample_count: u32,
    pub sizes: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSampleTableBox {
    pub entry_count: u32,
    pub sample_numbers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditListBox {
    pub version: u8,
    pub entry_count: u32,
    pub entries: Vec<EditListEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EditListEntry {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

impl EditListEntry {
    pub fn is_empty_edit(&self) -> bool {
        self.media_time == -1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieExtendsHeaderBox {
    pub fragment_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackExtendsBox {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieFragmentHeaderBox {
    pub sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFragmentHeaderBox {
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFragmentDecodeTimeBox {
    pub version: u8,
    pub base_media_decode_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRunBox {
    pub version: u8,
    pub flags: u32,
    pub sample_count: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub track_id: Option<u32>,
    pub run_index: u32,
    pub first_sample_number: u32,
    pub start_decode_time: Option<u64>,
    pub end_decode_time: Option<u64>,
    pub start_data_offset: Option<u64>,
    pub end_data_offset: Option<u64>,
    pub total_duration: Option<u64>,
    pub total_size: Option<u64>,
    pub entries: Vec<TrackRunSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRunSample {
    pub index: u32,
    pub sample_number: u32,
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_time_offset: Option<i64>,
    pub decode_time: Option<u64>,
    pub presentation_time: Option<i64>,
    pub data_offset: Option<u64>,
    pub byte_range: Option<Range<u64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFragmentRandomAccessBox {
    pub version: u8,
    pub track_id: u32,
    pub traf_number_size: u8,
    pub trun_number_size: u8,
    pub sample_number_size: u8,
    pub entry_count: u32,
    pub entries: Vec<TrackFragmentRandomAccessEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFragmentRandomAccessEntry {
    pub time: u64,
    pub moof_offset: u64,
    pub traf_number: u32,
    pub trun_number: u32,
    pub sample_number: u32,
    pub resolved: Option<ResolvedRandomAccessPoint>,
}

/// What a `tfra` entry points at, resolved against fragments already seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRandomAccessPoint {
    pub fragment_sequence_number: Option<u32>,
    pub track_id: Option<u32>,
    pub run_decode_time: Option<u64>,
    pub run_data_offset: Option<u64>,
    pub run_sample_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieFragmentRandomAccessOffsetBox {
    pub mfra_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleEncryptionBox {
    pub version: u8,
    pub flags: u32,
    pub sample_count: u32,
    pub uses_subsamples: bool,
    pub override_parameters: Option<EncryptionOverride>,
    pub sample_info_range: Range<u64>,
    /// Per-sample records; only decodable when the IV size is known.
    pub samples: Vec<EncryptedSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncryptionOverride {
    pub algorithm_id: u32,
    pub per_sample_iv_size: u8,
    pub key_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncryptedSample {
    pub initialization_vector: String,
    pub subsamples: Vec<Subsample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subsample {
    pub clear_bytes: u16,
    pub protected_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleAuxInfoOffsetsBox {
    pub version: u8,
    pub aux_info_type: Option<FourCC>,
    pub aux_info_type_parameter: Option<u32>,
    pub entry_count: u32,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleAuxInfoSizesBox {
    pub aux_info_type: Option<FourCC>,
    pub aux_info_type_parameter: Option<u32>,
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    pub sizes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentIndexBox {
    pub version: u8,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SegmentReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentReference {
    pub reference_type: u8,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

/// Where the media bytes of an `mdat` live; the bytes themselves are not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaDataBox {
    pub header_start: u64,
    pub payload_range: Range<u64>,
    pub payload_length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMediaHeaderBox {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub graphics_mode_name: Option<String>,
    /// Red, green and blue.
    pub opcolor: [u16; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundMediaHeaderBox {
    pub version: u8,
    pub flags: u32,
    /// 8.8 fixed point, 0 is centre.
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataReferenceBox {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub entries: Vec<DataReferenceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataReferenceEntry {
    /// 0-based position in the `dref`.
    pub index: u32,
    #[serde(rename = "type")]
    pub typ: FourCC,
    pub version: u8,
    pub flags: u32,
    pub location: DataLocation,
    pub byte_range: Range<u64>,
}

impl DataReferenceEntry {
    pub fn is_self_contained(&self) -> bool {
        self.flags & 0x1 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLocation {
    SelfContained,
    Empty,
    Url(String),
    Urn { name: Option<String>, location: Option<String> },
    /// Payload of an entry type without a known layout, or one that is not UTF-8.
    Opaque { length: u64 },
}

/// `meta` either as an ISO full box or in the QuickTime layout without
/// version and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataBox {
    pub full_box: bool,
    pub version: u8,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataKeysBox {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub entries: Vec<MetadataKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataKey {
    /// 1-based, as referenced by `ilst` item types.
    pub index: u32,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataItemListBox {
    pub handler_type: Option<FourCC>,
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataItem {
    pub identifier: MetadataItemIdentifier,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub values: Vec<MetadataValue>,
    pub byte_range: Range<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataItemIdentifier {
    #[serde(rename = "fourcc")]
    FourCC(FourCC),
    /// Index into the enclosing `keys` table.
    KeyIndex(u32),
    Raw(u32),
}

impl std::fmt::Display for MetadataItemIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataItemIdentifier::FourCC(code) => write!(f, "{code}"),
            MetadataItemIdentifier::KeyIndex(i) => write!(f, "key[{i}]"),
            MetadataItemIdentifier::Raw(v) => write!(f, "0x{v:08X}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataValue {
    pub raw_type: u32,
    pub locale: u32,
    pub value: MetadataValueKind,
    pub byte_range: Range<u64>,
}

/// Well-known `data` atom type indicators; anything else is kept as bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum MetadataValueKind {
    Utf8(String),
    Utf16(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float32(f32),
    Float64(f64),
    Jpeg { length: u64 },
    Png { length: u64 },
    Bytes { length: u64 },
}

impl MetadataValueKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetadataValueKind::Utf8(_) => "UTF-8",
            MetadataValueKind::Utf16(_) => "UTF-16",
            MetadataValueKind::Integer(_) => "Integer",
            MetadataValueKind::UnsignedInteger(_) => "Unsigned Integer",
            MetadataValueKind::Float32(_) => "Float32",
            MetadataValueKind::Float64(_) => "Float64",
            MetadataValueKind::Jpeg { .. } => "JPEG",
            MetadataValueKind::Png { .. } => "PNG",
            MetadataValueKind::Bytes { .. } => "Data",
        }
    }
}

impl std::fmt::Display for MetadataValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValueKind::Utf8(s) | MetadataValueKind::Utf16(s) => f.write_str(s),
            MetadataValueKind::Integer(v) => write!(f, "{v}"),
            MetadataValueKind::UnsignedInteger(v) => write!(f, "{v}"),
            MetadataValueKind::Float32(v) => write!(f, "{v}"),
            MetadataValueKind::Float64(v) => write!(f, "{v}"),
            MetadataValueKind::Jpeg { length }
            | MetadataValueKind::Png { length }
            | MetadataValueKind::Bytes { length } => write!(f, "{length} bytes"),
        }
    }
}

// ---------- Reading ----------

/// Bounds-checked big-endian cursor over payload bytes that knows the file
/// offset of every byte it hands out.
pub struct FieldReader<'a> {
    buf: &'a [u8],
    base: u64,
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8], base: u64) -> Self {
        Self { buf, base, pos: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }

    pub fn skip(&mut self, n: usize) -> bool {
        self.bytes(n).is_some()
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(BigEndian::read_u16)
    }

    pub fn i16(&mut self) -> Option<i16> {
        self.bytes(2).map(BigEndian::read_i16)
    }

    pub fn u24(&mut self) -> Option<u32> {
        self.bytes(3).map(BigEndian::read_u24)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(BigEndian::read_u32)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.bytes(4).map(BigEndian::read_i32)
    }

    pub fn u64(&mut self) -> Option<u64> {
        self.bytes(8).map(BigEndian::read_u64)
    }

    pub fn i64(&mut self) -> Option<i64> {
        self.bytes(8).map(BigEndian::read_i64)
    }

    /// Unsigned integer of 1 to 8 bytes.
    pub fn uint(&mut self, width: usize) -> Option<u64> {
        if width == 0 || width > 8 {
            return None;
        }
        self.bytes(width).map(|b| BigEndian::read_uint(b, width))
    }

    pub fn fourcc(&mut self) -> Option<FourCC> {
        self.bytes(4).map(|b| FourCC([b[0], b[1], b[2], b[3]]))
    }
}

/// Accumulates fields while reading, recording the byte range of each.
pub(crate) struct PayloadBuilder<'a> {
    pub(crate) r: FieldReader<'a>,
    fields: Vec<PayloadField>,
    truncated: bool,
}

macro_rules! field_reader {
    ($name:ident, $ty:ty) => {
        pub(crate) fn $name(&mut self, field: &str) -> Option<$ty> {
            let start = self.r.offset();
            let v = self.r.$name()?;
            self.push_ranged(field, v.to_string(), start..self.r.offset());
            Some(v)
        }
    };
}

impl<'a> PayloadBuilder<'a> {
    pub(crate) fn new(buf: &'a [u8], base: u64) -> Self {
        Self { r: FieldReader::new(buf, base), fields: Vec::new(), truncated: false }
    }

    field_reader!(u8, u8);
    field_reader!(u16, u16);
    field_reader!(u32, u32);
    field_reader!(u64, u64);
    field_reader!(i32, i32);

    pub(crate) fn fourcc(&mut self, field: &str) -> Option<FourCC> {
        let start = self.r.offset();
        let v = self.r.fourcc()?;
        self.push_ranged(field, v.to_string(), start..self.r.offset());
        Some(v)
    }

    /// Version (1 byte) and flags (3 bytes) of a full box.
    pub(crate) fn full_box(&mut self) -> Option<(u8, u32)> {
        let Some(version) = self.u8("version") else {
            self.truncated_before("version");
            return None;
        };
        let start = self.r.offset();
        let Some(flags) = self.r.u24() else {
            self.truncated_before("flags");
            return None;
        };
        self.push_ranged("flags", format!("0x{flags:06x}"), start..self.r.offset());
        Some((version, flags))
    }

    /// A 32-bit or 64-bit field depending on the box version.
    pub(crate) fn versioned(&mut self, field: &str, version: u8) -> Option<u64> {
        if version == 1 { self.u64(field) } else { self.u32(field).map(u64::from) }
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl ToString) {
        self.fields.push(PayloadField {
            name: name.into(),
            value: value.to_string(),
            description: None,
            byte_range: None,
        });
    }

    pub(crate) fn push_ranged(&mut self, name: impl Into<String>, value: impl ToString, range: Range<u64>) {
        self.fields.push(PayloadField {
            name: name.into(),
            value: value.to_string(),
            description: None,
            byte_range: Some(range),
        });
    }

    pub(crate) fn push_described(&mut self, name: impl Into<String>, value: impl ToString, description: impl Into<String>) {
        self.fields.push(PayloadField {
            name: name.into(),
            value: value.to_string(),
            description: Some(description.into()),
            byte_range: None,
        });
    }

    /// Record that the payload ended before `field`.
    pub(crate) fn truncated_before(&mut self, field: &str) {
        self.mark_truncated("status", format!("Payload truncated before {field} field"));
    }

    /// Record that entry `index` ended before `field`.
    pub(crate) fn entry_truncated(&mut self, index: usize, field: &str) {
        self.mark_truncated(
            format!("entries[{index}].status"),
            format!("Entry truncated before {field} field"),
        );
    }

    fn mark_truncated(&mut self, name: impl Into<String>, description: String) {
        let start = self.r.offset();
        self.truncated = true;
        self.fields.push(PayloadField {
            name: name.into(),
            value: "truncated".to_string(),
            description: Some(description),
            byte_range: Some(start..start + self.r.remaining() as u64),
        });
    }

    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Finish the payload; the detail is dropped if anything was truncated.
    pub(crate) fn finish(self, detail: Option<PayloadDetail>) -> ParsedBoxPayload {
        ParsedBoxPayload {
            detail: if self.truncated { None } else { detail },
            fields: self.fields,
        }
    }
}

/// Fixed-point 16.16 as a float.
pub(crate) fn fixed_16_16(v: u32) -> f64 {
    v as i32 as f64 / 65536.0
}

/// Fixed-point 8.8 as a float.
pub(crate) fn fixed_8_8(v: u16) -> f64 {
    v as i16 as f64 / 256.0
}

pub(crate) fn lang_from_u16(code: u16) -> String {
    if code == 0 {
        return "und".to_string();
    }
    let c1 = ((code >> 10) & 0x1F) as u8 + 0x60;
    let c2 = ((code >> 5) & 0x1F) as u8 + 0x60;
    let c3 = (code & 0x1F) as u8 + 0x60;
    format!("{}{}{}", c1 as char, c2 as char, c3 as char)
}
