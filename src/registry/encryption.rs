use super::{BoxDecoder, read_payload};
use crate::boxes::BoxHeader;
use crate::environment::DecodeEnvironment;
use crate::payload::{
    EncryptedSample, EncryptionOverride, MAX_ENTRY_FIELDS, ParsedBoxPayload, PayloadBuilder,
    PayloadDetail, SampleAuxInfoOffsetsBox, SampleAuxInfoSizesBox, SampleEncryptionBox, Subsample,
};
use crate::reader::RandomAccessReader;

pub const SENC_OVERRIDE_TRACK_ENCRYPTION: u32 = 0x000001;
pub const SENC_USE_SUBSAMPLE_ENCRYPTION: u32 = 0x000002;
const AUX_INFO_TYPE_PRESENT: u32 = 0x000001;

// senc: per-sample IVs and subsample maps
pub struct SencDecoder;

impl BoxDecoder for SencDecoder {
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
        let uses_subsamples = flags & SENC_USE_SUBSAMPLE_ENCRYPTION != 0;
        b.push("override_track_encryption_defaults", flags & SENC_OVERRIDE_TRACK_ENCRYPTION != 0);
        b.push("use_subsample_encryption", uses_subsamples);

        let override_parameters = if flags & SENC_OVERRIDE_TRACK_ENCRYPTION != 0 {
            let start = b.r.offset();
            let algorithm_id = need!(b, b.r.u24(), "AlgorithmID");
            b.push_ranged("AlgorithmID", format!("0x{algorithm_id:06x}"), start..b.r.offset());
            let per_sample_iv_size = need!(b, b.u8("IV_size"), "IV_size");
            let start = b.r.offset();
            let kid = need!(b, b.r.bytes(16), "KID");
            let key_id = hex::encode(kid);
            b.push_ranged("KID", &key_id, start..b.r.offset());
            Some(EncryptionOverride { algorithm_id, per_sample_iv_size, key_id })
        } else {
            None
        };

        let sample_count = need!(b, b.u32("sample_count"), "sample_count");
        let info_start = b.r.offset();
        let sample_info_range = info_start..info_start + b.r.remaining() as u64;

        let iv_size = override_parameters
            .as_ref()
            .map(|o| o.per_sample_iv_size as usize)
            .or_else(|| infer_iv_size(b.r.remaining(), sample_count, uses_subsamples));
        let mut samples = Vec::new();
        if let Some(iv_size) = iv_size {
            b.push_described("per_sample_IV_size", iv_size, "Initialization vector size used for sample records");
            for i in 0..sample_count as usize {
                let start = b.r.offset();
                let Some(iv) = b.r.bytes(iv_size) else {
                    b.entry_truncated(i, "InitializationVector");
                    break;
                };
                let initialization_vector = hex::encode(iv);
                let mut subsamples = Vec::new();
                if uses_subsamples {
                    let Some(count) = b.r.u16() else {
                        b.entry_truncated(i, "subsample_count");
                        break;
                    };
                    for _ in 0..count {
                        let (Some(clear_bytes), Some(protected_bytes)) = (b.r.u16(), b.r.u32()) else {
                            break;
                        };
                        subsamples.push(Subsample { clear_bytes, protected_bytes });
                    }
                    if subsamples.len() < count as usize {
                        b.entry_truncated(i, "subsample entries");
                        break;
                    }
                }
                if i < MAX_ENTRY_FIELDS {
                    let range = start..b.r.offset();
                    b.push_ranged(format!("samples[{i}].IV"), &initialization_vector, range.clone());
                    if uses_subsamples {
                        b.push_ranged(format!("samples[{i}].subsample_count"), subsamples.len(), range);
                    }
                }
                samples.push(EncryptedSample { initialization_vector, subsamples });
            }
        }

        Ok(Some(b.finish(Some(PayloadDetail::SampleEncryption(SampleEncryptionBox {
            version,
            flags,
            sample_count,
            uses_subsamples,
            override_parameters,
            sample_info_range,
            samples,
        })))))
    }
}

// The IV size lives in `tenc`, which is outside this box. Without
// subsamples every record has the same width, so it can be recovered.
fn infer_iv_size(remaining: usize, sample_count: u32, uses_subsamples: bool) -> Option<usize> {
    if uses_subsamples || sample_count == 0 {
        return None;
    }
    let count = sample_count as usize;
    if remaining % count != 0 {
        return None;
    }
    match remaining / count {
        n @ (8 | 16) => Some(n),
        _ => None,
    }
}

// saio: auxiliary information offsets
pub struct SaioDecoder;

impl BoxDecoder for SaioDecoder {
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
        let (aux_info_type, aux_info_type_parameter) = if flags & AUX_INFO_TYPE_PRESENT != 0 {
            let t = need!(b, b.fourcc("aux_info_type"), "aux_info_type");
            let p = need!(b, b.u32("aux_info_type_parameter"), "aux_info_type_parameter");
            (Some(t), Some(p))
        } else {
            (None, None)
        };
        let entry_count = need!(b, b.u32("entry_count"), "entry_count");

        let mut offsets = Vec::new();
        for i in 0..entry_count as usize {
            let start = b.r.offset();
            let Some(offset) = (if version == 0 { b.r.u32().map(u64::from) } else { b.r.u64() }) else {
                b.entry_truncated(i, "offset");
                break;
            };
            if i < MAX_ENTRY_FIELDS {
                b.push_ranged(format!("entries[{i}].offset"), offset, start..b.r.offset());
            }
            offsets.push(offset);
        }

        Ok(Some(b.finish(Some(PayloadDetail::SampleAuxInfoOffsets(SampleAuxInfoOffsetsBox {
            version,
            aux_info_type,
            aux_info_type_parameter,
            entry_count,
            offsets,
        })))))
    }
}

// saiz: auxiliary information sizes
pub struct SaizDecoder;

impl BoxDecoder for SaizDecoder {
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
        let (aux_info_type, aux_info_type_parameter) = if flags & AUX_INFO_TYPE_PRESENT != 0 {
            let t = need!(b, b.fourcc("aux_info_type"), "aux_info_type");
            let p = need!(b, b.u32("aux_info_type_parameter"), "aux_info_type_parameter");
            (Some(t), Some(p))
        } else {
            (None, None)
        };
        let default_sample_info_size =
            need!(b, b.u8("default_sample_info_size"), "default_sample_info_size");
        let sample_count = need!(b, b.u32("sample_count"), "sample_count");

        let mut sizes = Vec::new();
        if default_sample_info_size == 0 {
            for i in 0..sample_count as usize {
                let start = b.r.offset();
                let Some(size) = b.r.u8() else {
                    b.entry_truncated(i, "sample_info_size");
                    break;
                };
                if i < MAX_ENTRY_FIELDS {
                    b.push_ranged(format!("entries[{i}].sample_info_size"), size, start..b.r.offset());
                }
                sizes.push(size);
            }
        }

        Ok(Some(b.finish(Some(PayloadDetail::SampleAuxInfoSizes(SampleAuxInfoSizesBox {
            aux_info_type,
            aux_info_type_parameter,
            default_sample_info_size,
            sample_count,
            sizes,
        })))))
    }
}

// pssh: protection system header, fields only
pub struct PsshDecoder;

impl BoxDecoder for PsshDecoder {
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
        let start = b.r.offset();
        let system_id = need!(b, b.r.bytes(16), "SystemID");
        b.push_ranged("SystemID", hex::encode(system_id), start..b.r.offset());

        if version > 0 {
            let kid_count = need!(b, b.u32("KID_count"), "KID_count");
            for i in 0..kid_count as usize {
                let start = b.r.offset();
                let Some(kid) = b.r.bytes(16) else {
                    b.entry_truncated(i, "KID");
                    break;
                };
                if i < MAX_ENTRY_FIELDS {
                    b.push_ranged(format!("KID[{i}]"), hex::encode(kid), start..b.r.offset());
                }
            }
        }
        let data_size = need!(b, b.u32("DataSize"), "DataSize");
        if (b.r.remaining() as u64) < data_size as u64 {
            b.truncated_before("Data");
        }

        Ok(Some(b.finish(None)))
    }
}
