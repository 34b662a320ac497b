use byteorder::{BigEndian, ByteOrder};

use super::{BoxDecoder, read_payload};
use crate::boxes::{BoxHeader, FourCC};
use crate::environment::DecodeEnvironment;
use crate::payload::{
    FieldReader, MAX_ENTRY_FIELDS, MetadataBox, MetadataItem, MetadataItemIdentifier,
    MetadataItemListBox, MetadataKey, MetadataKeysBox, MetadataValue, MetadataValueKind,
    ParsedBoxPayload, PayloadBuilder, PayloadDetail,
};
use crate::reader::RandomAccessReader;

// meta: ISO full box, or the QuickTime layout that starts straight with hdlr
pub struct MetaDecoder;

impl BoxDecoder for MetaDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        _env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        // Children are walked separately; only the leading word matters here.
        let buf = r.read_up_to(hdr.payload_range().start, 4)?;
        let mut b = PayloadBuilder::new(&buf, hdr.payload_range().start);

        if buf.len() == 4 && buf != [0, 0, 0, 0] {
            b.push_described("layout", "quicktime", "No version and flags; children start at the payload");
            return Ok(Some(b.finish(Some(PayloadDetail::Metadata(MetadataBox {
                full_box: false,
                version: 0,
                flags: 0,
            })))));
        }
        let Some((version, flags)) = b.full_box() else {
            return Ok(Some(b.finish(None)));
        };
        b.push("layout", "iso");
        Ok(Some(b.finish(Some(PayloadDetail::Metadata(MetadataBox { full_box: true, version, flags })))))
    }
}

// keys: 1-based table of namespaced metadata key names
pub struct KeysDecoder;

impl BoxDecoder for KeysDecoder {
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
            let Some(key_size) = b.r.u32() else {
                b.entry_truncated(i, "key_size");
                break;
            };
            // key_size counts its own field and the namespace.
            let Some(name_len) = (key_size as usize).checked_sub(8) else {
                b.push_described(format!("entries[{i}].status"), "invalid", format!("Key size {key_size} is below 8"));
                break;
            };
            let Some(namespace) = b.r.fourcc() else {
                b.entry_truncated(i, "key_namespace");
                break;
            };
            let Some(name) = b.r.bytes(name_len) else {
                b.entry_truncated(i, "key_value");
                break;
            };
            let key = MetadataKey {
                index: i as u32 + 1,
                namespace: namespace.to_string(),
                name: String::from_utf8_lossy(name).into_owned(),
            };
            if i < MAX_ENTRY_FIELDS {
                let range = start..b.r.offset();
                b.push_ranged(format!("entries[{i}].namespace"), &key.namespace, range.clone());
                b.push_ranged(format!("entries[{i}].name"), &key.name, range);
            }
            entries.push(key);
        }

        Ok(Some(b.finish(Some(PayloadDetail::MetadataKeys(MetadataKeysBox {
            version,
            flags,
            entry_count,
            entries,
        })))))
    }
}

// ilst: items keyed by 4CC or by `keys` index, each holding `data` values
pub struct IlstDecoder;

impl BoxDecoder for IlstDecoder {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        let buf = read_payload(r, hdr)?;
        let base = hdr.payload_range().start;
        let mut b = PayloadBuilder::new(&buf, base);

        let handler_type = env.metadata.and_then(|m| m.handler_type);
        if let Some(handler) = handler_type {
            b.push_described("handler_type", handler, "Owning metadata handler");
        }

        let mut items = Vec::new();
        while b.r.remaining() >= 8 {
            let i = items.len();
            let start = b.r.offset();
            let size = need!(b, b.r.u32(), "item_size") as usize;
            let raw = need!(b, b.r.u32(), "item_type");
            let Some(body) = size.checked_sub(8).and_then(|n| b.r.bytes(n)) else {
                b.entry_truncated(i, "item_body");
                break;
            };
            let range = start..b.r.offset();

            let (identifier, namespace, name) = match env.metadata.and_then(|m| m.keys.get(&raw)) {
                Some(key) => (MetadataItemIdentifier::KeyIndex(raw), Some(key.namespace.clone()), Some(key.name.clone())),
                None => {
                    let bytes = raw.to_be_bytes();
                    let namespace = handler_type.map(|h| h.to_string());
                    if bytes.iter().all(|&c| c >= 0x20 && c != 0x7f) {
                        let name = bytes.iter().map(|&c| c as char).collect::<String>();
                        (MetadataItemIdentifier::FourCC(FourCC(bytes)), namespace, Some(name))
                    } else {
                        (MetadataItemIdentifier::Raw(raw), namespace, None)
                    }
                }
            };
            let values = data_values(body, start + 8);

            if i < MAX_ENTRY_FIELDS {
                let label = name.clone().unwrap_or_else(|| identifier.to_string());
                b.push_ranged(format!("items[{i}].identifier"), identifier, start + 4..start + 8);
                b.push_ranged(format!("items[{i}].name"), label, range.clone());
                for (v, value) in values.iter().enumerate() {
                    b.push_ranged(format!("items[{i}].values[{v}].type"), value.value.type_name(), value.byte_range.clone());
                    b.push_ranged(format!("items[{i}].values[{v}].value"), &value.value, value.byte_range.clone());
                }
            }
            items.push(MetadataItem { identifier, namespace, name, values, byte_range: range });
        }
        if b.r.remaining() > 0 && !b.is_truncated() {
            b.truncated_before(&format!("items[{}]", items.len()));
        }
        b.push("item_count", items.len());

        Ok(Some(b.finish(Some(PayloadDetail::MetadataItemList(MetadataItemListBox { handler_type, items })))))
    }
}

/// `data` children of one item; other children and malformed tails are skipped.
fn data_values(body: &[u8], base: u64) -> Vec<MetadataValue> {
    let mut r = FieldReader::new(body, base);
    let mut values = Vec::new();
    while r.remaining() >= 8 {
        let (Some(size), Some(typ)) = (r.u32(), r.fourcc()) else { break };
        let Some(content) = (size as usize).checked_sub(8).and_then(|n| r.bytes(n)) else { break };
        if &typ.0 != b"data" || content.len() < 8 {
            continue;
        }
        let raw_type = BigEndian::read_u32(&content[..4]) & 0x00ff_ffff;
        let locale = BigEndian::read_u32(&content[4..8]);
        let data = &content[8..];
        let data_start = r.offset() - data.len() as u64;
        values.push(MetadataValue {
            raw_type,
            locale,
            value: decode_value(raw_type, data),
            byte_range: data_start..r.offset(),
        });
    }
    values
}

fn decode_value(raw_type: u32, data: &[u8]) -> MetadataValueKind {
    let length = data.len() as u64;
    match (raw_type, data.len()) {
        (1, _) => match std::str::from_utf8(data) {
            Ok(s) => MetadataValueKind::Utf8(s.to_string()),
            Err(_) => MetadataValueKind::Bytes { length },
        },
        (2, n) if n % 2 == 0 => {
            let units = data.chunks_exact(2).map(BigEndian::read_u16);
            match char::decode_utf16(units).collect::<Result<String, _>>() {
                Ok(s) => MetadataValueKind::Utf16(s),
                Err(_) => MetadataValueKind::Bytes { length },
            }
        }
        (21, 1..=8) => MetadataValueKind::Integer(BigEndian::read_int(data, data.len())),
        (22, 1..=8) => MetadataValueKind::UnsignedInteger(BigEndian::read_uint(data, data.len())),
        (23, 4) => MetadataValueKind::Float32(BigEndian::read_f32(data)),
        (24, 8) => MetadataValueKind::Float64(BigEndian::read_f64(data)),
        (13, _) => MetadataValueKind::Jpeg { length },
        (14, _) => MetadataValueKind::Png { length },
        _ => MetadataValueKind::Bytes { length },
    }
}
