//! Core identifier and descriptor types for external-source media

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier for an external-source placeholder referenced by audio content.
///
/// Cookies are the sound engine's 32-bit short IDs: the FNV-1 hash of the
/// lowercased source name. `Cookie::from_name` reproduces that scheme so
/// name-based and id-based call sites agree on the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cookie(pub u32);

impl Cookie {
    /// Create a cookie from a raw sound-engine id
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Derive the cookie for a source name using the engine's short-ID hash
    /// (32-bit FNV-1 over the lowercased name).
    pub fn from_name(name: &str) -> Self {
        const FNV_OFFSET: u32 = 2_166_136_261;
        const FNV_PRIME: u32 = 16_777_619;

        let mut hash = FNV_OFFSET;
        for byte in name.bytes() {
            hash = hash.wrapping_mul(FNV_PRIME) ^ u32::from(byte.to_ascii_lowercase());
        }
        Self(hash)
    }

    /// Get the raw id value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a concrete playable media resource.
///
/// Id 0 is reserved: it never names real media and acts as the "unbound"
/// sentinel in binding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaId(pub u32);

impl MediaId {
    /// The reserved "no media" sentinel
    pub const UNBOUND: MediaId = MediaId(0);

    /// Create a media id from a raw value
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw id value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Check whether this is the reserved "no media" sentinel
    pub fn is_unbound(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Codec of an external-source media resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaCodec {
    /// Uncompressed PCM
    Pcm,
    /// ADPCM
    Adpcm,
    /// Vorbis
    Vorbis,
    /// Opus
    Opus,
    /// Any codec id this crate does not name; preserved verbatim
    Other(u32),
}

impl MediaCodec {
    /// Map a raw sound-engine codec id to a codec
    pub fn from_id(id: u32) -> Self {
        match id {
            1 => Self::Pcm,
            2 => Self::Adpcm,
            4 => Self::Vorbis,
            20 => Self::Opus,
            other => Self::Other(other),
        }
    }

    /// Get the raw sound-engine codec id
    pub fn id(&self) -> u32 {
        match self {
            Self::Pcm => 1,
            Self::Adpcm => 2,
            Self::Vorbis => 4,
            Self::Opus => 20,
            Self::Other(id) => *id,
        }
    }
}

/// Immutable description of one external-source media resource.
///
/// Descriptors are produced by a media directory reload and replaced as a
/// whole snapshot; they are never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Media id
    pub id: MediaId,
    /// Media file name
    pub name: String,
    /// Codec of the media payload
    pub codec: MediaCodec,
    /// Whether the media is streamed from storage or held in memory
    pub is_streamed: bool,
    /// Required memory alignment for the loaded payload
    pub memory_alignment: u32,
    /// Whether the payload should live in device memory
    pub use_device_memory: bool,
    /// Prefetch size in bytes for streamed media
    pub prefetch_size: u32,
}

/// Why a file-state reference is being acquired or released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOrigin {
    /// Reference held on behalf of loaded content
    Loading,
    /// Reference held by the streaming device
    Streaming,
}

impl fmt::Display for OperationOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading"),
            Self::Streaming => write!(f, "Streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_hash_is_case_insensitive() {
        assert_eq!(Cookie::from_name("MyExternalSource"), Cookie::from_name("myexternalsource"));
        assert_ne!(Cookie::from_name("source_a"), Cookie::from_name("source_b"));
    }

    #[test]
    fn test_cookie_hash_known_vector() {
        // FNV-1 32-bit of "a": (2166136261 * 16777619) ^ 0x61
        let expected = 2_166_136_261u32.wrapping_mul(16_777_619) ^ 0x61;
        assert_eq!(Cookie::from_name("a").value(), expected);
        assert_eq!(Cookie::from_name("A").value(), expected);
    }

    #[test]
    fn test_media_id_sentinel() {
        assert!(MediaId::UNBOUND.is_unbound());
        assert!(!MediaId::new(7).is_unbound());
    }

    #[test]
    fn test_codec_id_round_trip() {
        for id in [1, 2, 4, 20, 99] {
            assert_eq!(MediaCodec::from_id(id).id(), id);
        }
        assert_eq!(MediaCodec::from_id(4), MediaCodec::Vorbis);
    }
}
