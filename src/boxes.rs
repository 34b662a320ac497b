use std::fmt;
use std::ops::Range;

use serde::{Serialize, Serializer};

#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const UUID: FourCC = FourCC(*b"uuid");

    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else {
            None
        }
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

/// A decoded box header. Sizes are always resolved: a declared size of 0
/// has already been expanded to the end of the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxHeader {
    #[serde(rename = "type")]
    pub typ: FourCC,
    #[serde(serialize_with = "serialize_uuid")]
    pub uuid: Option<[u8; 16]>,
    pub total_size: u64,
    /// 8, 16, 24 or 32.
    pub header_size: u64,
    pub start: u64,
}

impl BoxHeader {
    pub fn end(&self) -> u64 {
        self.start + self.total_size
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end()
    }

    pub fn payload_range(&self) -> Range<u64> {
        self.start + self.header_size..self.end()
    }

    pub fn payload_len(&self) -> u64 {
        self.total_size - self.header_size
    }

    pub fn key(&self) -> BoxKey {
        match self.uuid {
            Some(u) if self.typ == FourCC::UUID => BoxKey::Uuid(u),
            _ => BoxKey::FourCC(self.typ),
        }
    }

    /// Label used in node paths and logs, e.g. `trak` or `uuid:a2394f52…`.
    pub fn display_type(&self) -> String {
        match self.uuid {
            Some(u) => format!("uuid:{}", hex::encode(u)),
            None => self.typ.to_string(),
        }
    }
}

pub(crate) fn serialize_uuid<S: Serializer>(u: &Option<[u8; 16]>, s: S) -> Result<S::Ok, S::Error> {
    match u {
        Some(bytes) => s.serialize_some(&hex::encode(bytes)),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxKey {
    FourCC(FourCC),
    Uuid([u8; 16]),
}

impl BoxKey {
    pub fn fourcc(code: &[u8; 4]) -> Self {
        BoxKey::FourCC(FourCC(*code))
    }
}
