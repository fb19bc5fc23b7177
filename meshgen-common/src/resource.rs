//! Streamed resource identifiers
//!
//! A mesh references out-of-line payloads (morph deltas, clothing binds,
//! asset user data) through 64-bit ids:
//!
//! ```text
//! bits 56..64: resource kind
//! bits  0..32: id inside the kind's store
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamedResourceKind {
    AssetUserData = 1,
    RealTimeMorphTarget = 2,
    Clothing = 3,
}

impl StreamedResourceKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::AssetUserData),
            2 => Some(Self::RealTimeMorphTarget),
            3 => Some(Self::Clothing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamedResourceId {
    pub kind: StreamedResourceKind,
    pub id: u32,
}

impl StreamedResourceId {
    const KIND_SHIFT: u32 = 56;

    pub fn new(kind: StreamedResourceKind, id: u32) -> Self {
        Self { kind, id }
    }

    pub fn to_u64(self) -> u64 {
        ((self.kind as u64) << Self::KIND_SHIFT) | self.id as u64
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        let kind = StreamedResourceKind::from_u8((value >> Self::KIND_SHIFT) as u8)?;
        Some(Self {
            kind,
            id: value as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_in_high_byte() {
        let id = StreamedResourceId::new(StreamedResourceKind::Clothing, 7).to_u64();
        assert_eq!(id >> 56, 3);
        assert_eq!(id & 0xFFFF_FFFF, 7);
        assert_eq!(
            StreamedResourceId::from_u64(id),
            Some(StreamedResourceId::new(StreamedResourceKind::Clothing, 7))
        );
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(StreamedResourceId::from_u64(0x7F00_0000_0000_0001), None);
    }
}
