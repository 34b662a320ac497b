use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::boxes::{BoxHeader, BoxKey};
use crate::environment::DecodeEnvironment;
use crate::error::ReaderError;
use crate::payload::ParsedBoxPayload;
use crate::reader::RandomAccessReader;

// Read a field or finish the payload as truncated before it.
macro_rules! need {
    ($b:ident, $read:expr, $field:expr) => {
        match $read {
            Some(v) => v,
            None => {
                $b.truncated_before($field);
                return Ok(Some($b.finish(None)));
            }
        }
    };
}

mod encryption;
mod fragments;
mod metadata;
mod sample_tables;
mod structure;

pub use encryption::{PsshDecoder, SaioDecoder, SaizDecoder, SencDecoder};
pub use fragments::{
    MehdDecoder, MfhdDecoder, MfroDecoder, SidxDecoder, TfdtDecoder, TfhdDecoder, TfraDecoder,
    TrexDecoder, TrunDecoder,
};
pub use metadata::{IlstDecoder, KeysDecoder, MetaDecoder};
pub use sample_tables::{
    ChunkOffsetDecoder, CttsDecoder, StscDecoder, StsdDecoder, StssDecoder, StszDecoder,
    Stz2Decoder, SttsDecoder,
};
pub use structure::{
    AvcCDecoder, DrefDecoder, ElstDecoder, FreeSpaceDecoder, FtypDecoder, HdlrDecoder, HvcCDecoder,
    MdatDecoder, MdhdDecoder, MvhdDecoder, SmhdDecoder, TkhdDecoder, VmhdDecoder,
};

/// Trait for box payload decoders.
///
/// A decoder interprets the payload of one box type and never fails on a
/// short payload: it keeps the fields it could read and marks the rest as
/// truncated. An `Err` is reserved for failures of the reader itself.
pub trait BoxDecoder: Send + Sync {
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>>;
}

impl<F> BoxDecoder for F
where
    F: Fn(&BoxHeader, &dyn RandomAccessReader, &DecodeEnvironment<'_>) -> anyhow::Result<Option<ParsedBoxPayload>>
        + Send
        + Sync,
{
    fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        self(hdr, r, env)
    }
}

/// Registry of decoders keyed by `BoxKey` (4CC or UUID).
///
/// Cloning is cheap and yields an independent value: registering a decoder
/// on a clone never affects the registry it came from.
#[derive(Clone, Default)]
pub struct BoxParserRegistry {
    map: HashMap<BoxKey, BoxDecoderEntry>,
}

#[derive(Clone)]
struct BoxDecoderEntry {
    inner: Arc<dyn BoxDecoder>,
    name: String,
}

impl BoxParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// The process-wide default registry, shared read-only between sessions.
    pub fn shared() -> Arc<BoxParserRegistry> {
        static SHARED: OnceLock<Arc<BoxParserRegistry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(default_registry())).clone()
    }

    /// Return a new registry with the given decoder added, replacing any
    /// decoder already registered for `key`.
    pub fn with_decoder(mut self, key: BoxKey, name: &str, dec: Box<dyn BoxDecoder>) -> Self {
        self.map.insert(key, BoxDecoderEntry { inner: Arc::from(dec), name: name.to_string() });
        self
    }

    pub fn has_decoder(&self, key: &BoxKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn decoder_name(&self, key: &BoxKey) -> Option<&str> {
        self.map.get(key).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Decode the payload of `hdr` with its registered decoder.
    ///
    /// Returns `Ok(None)` when no decoder exists for the box.
    pub fn decode(
        &self,
        hdr: &BoxHeader,
        r: &dyn RandomAccessReader,
        env: &DecodeEnvironment<'_>,
    ) -> anyhow::Result<Option<ParsedBoxPayload>> {
        match self.map.get(&hdr.key()) {
            Some(d) => d.inner.decode(hdr, r, env),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for BoxParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.map.values().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("BoxParserRegistry").field("decoders", &names).finish()
    }
}

// ---------- Helpers ----------

fn read_payload(r: &dyn RandomAccessReader, hdr: &BoxHeader) -> Result<Vec<u8>, ReaderError> {
    let len = usize::try_from(hdr.payload_len()).unwrap_or(usize::MAX);
    r.read_up_to(hdr.payload_range().start, len)
}

/// The built-in decoder table.
pub fn default_registry() -> BoxParserRegistry {
    let fcc = BoxKey::fourcc;

    BoxParserRegistry::new()
        .with_decoder(fcc(b"ftyp"), "ftyp", Box::new(FtypDecoder))
        .with_decoder(fcc(b"styp"), "styp", Box::new(FtypDecoder))
        .with_decoder(fcc(b"mvhd"), "mvhd", Box::new(MvhdDecoder))
        .with_decoder(fcc(b"tkhd"), "tkhd", Box::new(TkhdDecoder))
        .with_decoder(fcc(b"mdhd"), "mdhd", Box::new(MdhdDecoder))
        .with_decoder(fcc(b"hdlr"), "hdlr", Box::new(HdlrDecoder))
        .with_decoder(fcc(b"elst"), "elst", Box::new(ElstDecoder))
        .with_decoder(fcc(b"vmhd"), "vmhd", Box::new(VmhdDecoder))
        .with_decoder(fcc(b"smhd"), "smhd", Box::new(SmhdDecoder))
        .with_decoder(fcc(b"dref"), "dref", Box::new(DrefDecoder))
        .with_decoder(fcc(b"mdat"), "mdat", Box::new(MdatDecoder))
        .with_decoder(fcc(b"meta"), "meta", Box::new(MetaDecoder))
        .with_decoder(fcc(b"keys"), "keys", Box::new(KeysDecoder))
        .with_decoder(fcc(b"ilst"), "ilst", Box::new(IlstDecoder))
        .with_decoder(fcc(b"free"), "free", Box::new(FreeSpaceDecoder))
        .with_decoder(fcc(b"skip"), "skip", Box::new(FreeSpaceDecoder))
        .with_decoder(fcc(b"avcC"), "avcC", Box::new(AvcCDecoder))
        .with_decoder(fcc(b"hvcC"), "hvcC", Box::new(HvcCDecoder))
        .with_decoder(fcc(b"stsd"), "stsd", Box::new(StsdDecoder))
        .with_decoder(fcc(b"stts"), "stts", Box::new(SttsDecoder))
        .with_decoder(fcc(b"ctts"), "ctts", Box::new(CttsDecoder))
        .with_decoder(fcc(b"stsc"), "stsc", Box::new(StscDecoder))
        .with_decoder(fcc(b"stco"), "stco", Box::new(ChunkOffsetDecoder))
        .with_decoder(fcc(b"co64"), "co64", Box::new(ChunkOffsetDecoder))
        .with_decoder(fcc(b"stsz"), "stsz", Box::new(StszDecoder))
        .with_decoder(fcc(b"stz2"), "stz2", Box::new(Stz2Decoder))
        .with_decoder(fcc(b"stss"), "stss", Box::new(StssDecoder))
        .with_decoder(fcc(b"mehd"), "mehd", Box::new(MehdDecoder))
        .with_decoder(fcc(b"trex"), "trex", Box::new(TrexDecoder))
        .with_decoder(fcc(b"mfhd"), "mfhd", Box::new(MfhdDecoder))
        .with_decoder(fcc(b"tfhd"), "tfhd", Box::new(TfhdDecoder))
        .with_decoder(fcc(b"tfdt"), "tfdt", Box::new(TfdtDecoder))
        .with_decoder(fcc(b"trun"), "trun", Box::new(TrunDecoder))
        .with_decoder(fcc(b"tfra"), "tfra", Box::new(TfraDecoder))
        .with_decoder(fcc(b"mfro"), "mfro", Box::new(MfroDecoder))
        .with_decoder(fcc(b"sidx"), "sidx", Box::new(SidxDecoder))
        .with_decoder(fcc(b"senc"), "senc", Box::new(SencDecoder))
        .with_decoder(fcc(b"saio"), "saio", Box::new(SaioDecoder))
        .with_decoder(fcc(b"saiz"), "saiz", Box::new(SaizDecoder))
        .with_decoder(fcc(b"pssh"), "pssh", Box::new(PsshDecoder))
}
