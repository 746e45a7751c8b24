use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// hash algorithm tag used in the canonical string form
pub const REF_ALGO: &str = "sha256";

/// SHA-256 content reference
///
/// two absent states are distinguished: the all-zero value (`ZERO`, "no
/// ref supplied") and the hash of the empty byte string (`EMPTY`, a
/// well-defined ref that is never materialized on disk).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref([u8; 32]);

impl Ref {
    /// zero ref (sentinel for "not supplied")
    pub const ZERO: Ref = Ref([0u8; 32]);

    /// SHA-256 of the empty byte string
    pub const EMPTY: Ref = Ref([
        0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
        0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
        0x78, 0x52, 0xb8, 0x55,
    ]);

    /// create from raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// get raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// parse the canonical `sha256:<hex>` form
    pub fn parse(s: &str) -> crate::Result<Self> {
        let hex_part = s
            .strip_prefix(REF_ALGO)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| Error::RefParse(s.to_string()))?;
        let bytes = hex::decode(hex_part).map_err(|_| Error::RefParse(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(Error::RefParse(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// true for the all-zero sentinel
    pub fn is_zero(&self) -> bool {
        *self == Ref::ZERO
    }

    /// true for the hash of the empty byte string
    pub fn is_empty(&self) -> bool {
        *self == Ref::EMPTY
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", REF_ALGO, hex::encode(self.0))
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({}:{})", REF_ALGO, &hex::encode(self.0)[..12])
    }
}

impl FromStr for Ref {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Ref::parse(s)
    }
}

impl Serialize for Ref {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ref {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// a ref paired with the byte length of the blob it names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedRef {
    #[serde(rename = "ref")]
    pub ref_: Ref,
    pub size: u64,
}

impl SizedRef {
    pub fn new(ref_: Ref, size: u64) -> Self {
        Self { ref_, size }
    }
}

/// a sized ref annotated with the schema type tag of the blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaRef {
    pub ref_: Ref,
    pub size: u64,
    pub typ: String,
}

impl SchemaRef {
    /// drop the type annotation
    pub fn sized(&self) -> SizedRef {
        SizedRef::new(self.ref_, self.size)
    }
}

/// a named mutable pointer into the content graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pin {
    pub name: String,
    pub ref_: Ref,
}
