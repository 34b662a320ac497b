//! Box-type metadata and coarse classification.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::boxes::{BoxHeader, BoxKey, FourCC, serialize_uuid};

const BUNDLED_CATALOG: &str = include_str!("../data/boxes.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxCategory {
    Container,
    Media,
    Metadata,
    Index,
    Other,
}

/// Catalog entry for one box type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxDescriptor {
    #[serde(rename = "type")]
    pub typ: FourCC,
    #[serde(serialize_with = "serialize_uuid")]
    pub uuid: Option<[u8; 16]>,
    pub name: String,
    pub summary: String,
    pub category: BoxCategory,
    pub specification: Option<String>,
    /// Expected full-box version, when a single value is canonical.
    pub version: Option<u8>,
    /// Expected full-box flags, when a single value is canonical.
    pub flags: Option<u32>,
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("catalog json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid box type {0:?}")]
    InvalidType(String),
    #[error("invalid uuid {0:?}")]
    InvalidUuid(String),
    #[error("invalid flags {0:?}")]
    InvalidFlags(String),
}

#[derive(Deserialize)]
struct CatalogFile {
    boxes: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    typ: String,
    uuid: Option<String>,
    name: String,
    summary: String,
    category: Option<BoxCategory>,
    specification: Option<String>,
    version: Option<u8>,
    flags: Option<String>,
}

impl CatalogEntry {
    fn into_descriptor(self) -> Result<BoxDescriptor, CatalogError> {
        let typ = FourCC::from_str(&self.typ).ok_or_else(|| CatalogError::InvalidType(self.typ.clone()))?;
        let uuid = self.uuid.as_deref().map(parse_uuid).transpose()?;
        let flags = self
            .flags
            .as_deref()
            .map(|f| {
                u32::from_str_radix(f.trim_start_matches("0x"), 16)
                    .map_err(|_| CatalogError::InvalidFlags(f.to_string()))
            })
            .transpose()?;
        Ok(BoxDescriptor {
            category: self.category.unwrap_or_else(|| default_category(typ)),
            typ,
            uuid,
            name: self.name,
            summary: self.summary,
            specification: self.specification,
            version: self.version,
            flags,
        })
    }
}

fn parse_uuid(s: &str) -> Result<[u8; 16], CatalogError> {
    let compact: String = s.chars().filter(|c| *c != '-').collect();
    let bytes = hex::decode(&compact).map_err(|_| CatalogError::InvalidUuid(s.to_string()))?;
    bytes.try_into().map_err(|_| CatalogError::InvalidUuid(s.to_string()))
}

/// Static lookup of box-type metadata.
#[derive(Debug, Clone, Default)]
pub struct BoxCatalog {
    entries: HashMap<BoxKey, BoxDescriptor>,
}

impl BoxCatalog {
    pub fn new(descriptors: impl IntoIterator<Item = BoxDescriptor>) -> Self {
        let entries = descriptors
            .into_iter()
            .map(|d| {
                let key = match d.uuid {
                    Some(u) => BoxKey::Uuid(u),
                    None => BoxKey::FourCC(d.typ),
                };
                (key, d)
            })
            .collect();
        Self { entries }
    }

    /// Load a registry feed. Malformed entries are skipped and logged.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let descriptors = file.boxes.into_iter().filter_map(|entry| {
            let typ = entry.typ.clone();
            match entry.into_descriptor() {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::warn!(box_type = %typ, error = %e, "skipping catalog entry");
                    None
                }
            }
        });
        Ok(Self::new(descriptors))
    }

    /// The catalog compiled into the crate.
    pub fn bundled() -> Self {
        match Self::from_json(BUNDLED_CATALOG) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to load bundled box catalog");
                Self::default()
            }
        }
    }

    pub fn shared() -> Arc<BoxCatalog> {
        static SHARED: OnceLock<Arc<BoxCatalog>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::bundled())).clone()
    }

    /// Extended-type entries win over the plain `uuid` entry.
    pub fn descriptor(&self, header: &BoxHeader) -> Option<&BoxDescriptor> {
        if let Some(u) = header.uuid {
            if let Some(d) = self.entries.get(&BoxKey::Uuid(u)) {
                return Some(d);
            }
        }
        self.entries.get(&BoxKey::FourCC(header.typ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------- Classification ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEntryKind {
    Visual,
    Audio,
}

/// Sample entry formats whose fixed fields are understood, so their nested
/// boxes (`avcC`, `esds`, `sinf`, ...) can be located.
pub fn sample_entry_kind(typ: FourCC) -> Option<SampleEntryKind> {
    match &typ.0 {
        b"avc1" | b"avc2" | b"avc3" | b"avc4" | b"hvc1" | b"hev1" | b"dvh1" | b"dvhe" |
        b"mp4v" | b"av01" | b"vp08" | b"vp09" | b"encv" => Some(SampleEntryKind::Visual),
        b"mp4a" | b"ac-3" | b"ec-3" | b"Opus" | b"fLaC" | b"alac" | b"enca" => {
            Some(SampleEntryKind::Audio)
        }
        _ => None,
    }
}

pub fn is_container(typ: FourCC) -> bool {
    matches!(
        &typ.0,
        b"moov" | b"trak" | b"mdia" | b"minf" | b"dinf" | b"stbl" | b"edts" |
        b"mvex" | b"moof" | b"traf" | b"mfra" | b"tref" | b"udta" | b"strk" |
        b"strd" | b"sinf" | b"schi" | b"stsd" | b"meta" | b"ilst"
    ) || sample_entry_kind(typ).is_some()
}

/// Boxes whose presence marks a fragmented or segmented presentation.
pub fn is_streaming_indicator(typ: FourCC) -> bool {
    matches!(&typ.0, b"moof" | b"mvex" | b"sidx" | b"ssix" | b"prft" | b"styp")
}

pub fn is_media_payload(typ: FourCC) -> bool {
    matches!(&typ.0, b"mdat" | b"idat")
}

pub fn is_metadata(typ: FourCC) -> bool {
    matches!(&typ.0, b"meta" | b"ilst" | b"udta" | b"mdta" | b"cprt" | b"keys")
}

fn is_index(typ: FourCC) -> bool {
    matches!(
        &typ.0,
        b"sidx" | b"ssix" | b"styp" | b"prft" | b"tfra" | b"mfro" | b"tfdt" | b"trun" |
        b"stts" | b"ctts" | b"stsc" | b"stsz" | b"stz2" | b"stco" | b"co64" | b"stss"
    )
}

fn default_category(typ: FourCC) -> BoxCategory {
    if is_metadata(typ) {
        BoxCategory::Metadata
    } else if is_container(typ) {
        BoxCategory::Container
    } else if is_media_payload(typ) {
        BoxCategory::Media
    } else if is_index(typ) {
        BoxCategory::Index
    } else {
        BoxCategory::Other
    }
}

/// Category of a visited box, preferring the catalog's opinion.
pub fn classify(header: &BoxHeader, descriptor: Option<&BoxDescriptor>) -> BoxCategory {
    descriptor.map_or_else(|| default_category(header.typ), |d| d.category)
}

/// Bytes between a container's payload start and its first child.
///
/// `stsd` carries version/flags and an entry count; an ISO `meta` carries
/// version/flags while the QuickTime flavour starts straight with a child.
/// Sample entries carry their fixed visual or audio fields first.
pub(crate) fn child_offset(header: &BoxHeader, leading: Option<[u8; 4]>) -> u64 {
    match &header.typ.0 {
        b"stsd" => 8,
        b"meta" => match leading {
            Some([0, 0, 0, 0]) => 4,
            _ => 0,
        },
        _ => match sample_entry_kind(header.typ) {
            Some(SampleEntryKind::Visual) => 78,
            Some(SampleEntryKind::Audio) => 28,
            None => 0,
        },
    }
}
