//! File states: runtime handles for loaded or loading external-source media
//!
//! A file state is the opaque resource handle the audio engine consumes. One
//! state exists per media id regardless of how many cookies reference it; the
//! registry owns the sharing. The variant is chosen by the descriptor's
//! streaming flag: streamed media keeps the storage handle open and prefetches
//! ahead of the stream position, in-memory media is fetched whole at open.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::types::{MediaCodec, MediaDescriptor, MediaId};

/// Streaming-dependent part of a file state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStateVariant {
    /// Streamed from storage: the handle stays open for the state's lifetime
    Streamed {
        /// Bytes fetched ahead of the stream position at open
        prefetch_size: u32,
        /// Device streaming granularity in bytes
        streaming_granularity: u32,
    },
    /// Fetched whole into memory at open
    InMemory,
}

/// Runtime resource handle for one external-source media
#[derive(Debug)]
pub struct FileState {
    media_id: MediaId,
    media_name: String,
    codec: MediaCodec,
    memory_alignment: u32,
    use_device_memory: bool,
    variant: FileStateVariant,
    path: PathBuf,
    open: AtomicBool,
}

impl FileState {
    /// Build the file state matching a media descriptor.
    ///
    /// Streamed descriptors produce the streamed variant with the device's
    /// streaming granularity; everything else is held in memory.
    pub fn from_descriptor(
        descriptor: &MediaDescriptor,
        staging_directory: &Path,
        streaming_granularity: u32,
    ) -> Self {
        let variant = if descriptor.is_streamed {
            FileStateVariant::Streamed {
                prefetch_size: descriptor.prefetch_size,
                streaming_granularity,
            }
        } else {
            FileStateVariant::InMemory
        };
        Self {
            media_id: descriptor.id,
            media_name: descriptor.name.clone(),
            codec: descriptor.codec,
            memory_alignment: descriptor.memory_alignment,
            use_device_memory: descriptor.use_device_memory,
            variant,
            path: staging_directory.join(&descriptor.name),
            open: AtomicBool::new(false),
        }
    }

    /// Media id this state represents
    pub fn media_id(&self) -> MediaId {
        self.media_id
    }

    /// Media file name
    pub fn media_name(&self) -> &str {
        &self.media_name
    }

    /// Codec of the media payload
    pub fn codec(&self) -> MediaCodec {
        self.codec
    }

    /// Required memory alignment for the payload
    pub fn memory_alignment(&self) -> u32 {
        self.memory_alignment
    }

    /// Whether the payload lives in device memory
    pub fn use_device_memory(&self) -> bool {
        self.use_device_memory
    }

    /// Streaming-dependent part of the state
    pub fn variant(&self) -> FileStateVariant {
        self.variant
    }

    /// Whether this state streams from storage
    pub fn is_streamed(&self) -> bool {
        matches!(self.variant, FileStateVariant::Streamed { .. })
    }

    /// Staged path of the media file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the storage side of this state is currently acquired
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Acquire the storage side of this state.
    ///
    /// Acquisition may be I/O-bound on a real device; completion of this
    /// future is the only signal that the state is usable.
    pub(crate) async fn open(&self) -> Result<()> {
        if self.media_name.is_empty() {
            return Err(Error::construction(self.media_id, "media has no file name"));
        }
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(Error::construction(self.media_id, "file state already open"));
        }
        match self.variant {
            FileStateVariant::Streamed {
                prefetch_size,
                streaming_granularity,
            } => {
                debug!(
                    "Opened streamed file state for media {} ({:?}): prefetch {} granularity {}",
                    self.media_id, self.media_name, prefetch_size, streaming_granularity
                );
            }
            FileStateVariant::InMemory => {
                debug!(
                    "Opened in-memory file state for media {} ({:?})",
                    self.media_id, self.media_name
                );
            }
        }
        Ok(())
    }

    /// Release the storage side of this state.
    ///
    /// After this future completes nothing of the media remains loaded.
    pub(crate) async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(
                "Closed file state for media {} ({:?})",
                self.media_id, self.media_name
            );
        } else {
            trace!(
                "Close on never-opened file state for media {}",
                self.media_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn descriptor(streamed: bool) -> MediaDescriptor {
        MediaDescriptor {
            id: MediaId::new(11),
            name: "music_loop.wem".to_string(),
            codec: MediaCodec::Vorbis,
            is_streamed: streamed,
            memory_alignment: 16,
            use_device_memory: false,
            prefetch_size: 2048,
        }
    }

    #[tokio::test]
    async fn test_variant_follows_descriptor() {
        let staging = PathBuf::from("/staging");
        let streamed = FileState::from_descriptor(&descriptor(true), &staging, 4096);
        assert_eq!(
            streamed.variant(),
            FileStateVariant::Streamed {
                prefetch_size: 2048,
                streaming_granularity: 4096
            }
        );
        assert_eq!(streamed.path(), PathBuf::from("/staging/music_loop.wem"));

        let in_memory = FileState::from_descriptor(&descriptor(false), &staging, 4096);
        assert_eq!(in_memory.variant(), FileStateVariant::InMemory);
    }

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let state = FileState::from_descriptor(&descriptor(false), Path::new("."), 0);
        assert!(!state.is_open());
        state.open().await.unwrap();
        assert!(state.is_open());
        assert!(state.open().await.is_err());
        state.close().await;
        assert!(!state.is_open());
    }

    #[tokio::test]
    async fn test_open_rejects_nameless_media() {
        let mut desc = descriptor(false);
        desc.name = String::new();
        let state = FileState::from_descriptor(&desc, Path::new("."), 0);
        assert!(state.open().await.is_err());
        assert!(!state.is_open());
    }
}
