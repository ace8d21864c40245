//! Media directory: read-only lookup from media id to descriptor
//!
//! The directory is fed from a data-driven media-info table (which could be
//! generated by external scripts) and rebuilt wholesale on reload: readers
//! always see either the previous snapshot or the new one, never a partial
//! table. Reloading the directory does not by itself reload any bound media;
//! the coordinator drives reload notifications.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{MediaCodec, MediaDescriptor, MediaId};

/// One row of the media-info table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfoRow {
    /// Media id
    pub media_id: u32,
    /// Media file name
    pub media_name: String,
    /// Raw sound-engine codec id
    pub codec_id: u32,
    /// Whether the media is streamed
    #[serde(default)]
    pub is_streamed: bool,
    /// Memory alignment for the loaded payload
    #[serde(default)]
    pub memory_alignment: u32,
    /// Whether the payload should live in device memory
    #[serde(default)]
    pub use_device_memory: bool,
    /// Prefetch size in bytes for streamed media
    #[serde(default)]
    pub prefetch_size: u32,
}

/// One row of the cookie default-media table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieDefaultRow {
    /// External-source cookie
    pub cookie: u32,
    /// Source name, for logging only
    #[serde(default)]
    pub source_name: String,
    /// Default media id for the cookie
    pub media_id: u32,
    /// Media name, for logging only
    #[serde(default)]
    pub media_name: String,
}

/// Parse media-info rows from a JSON array document
pub fn parse_media_info_rows(json: &str) -> std::result::Result<Vec<MediaInfoRow>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Parse cookie default-media rows from a JSON array document
pub fn parse_cookie_default_rows(
    json: &str,
) -> std::result::Result<Vec<CookieDefaultRow>, serde_json::Error> {
    serde_json::from_str(json)
}

#[derive(Debug, Default)]
struct DirectoryInner {
    by_id: HashMap<MediaId, Arc<MediaDescriptor>>,
    id_by_name: HashMap<String, MediaId>,
}

/// Read-only lookup from media id to descriptor and from media name to id
#[derive(Debug, Default)]
pub struct MediaDirectory {
    inner: RwLock<DirectoryInner>,
}

impl MediaDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DirectoryInner::default()),
        }
    }

    /// Replace the whole directory from media-info rows.
    ///
    /// The id and name maps are rebuilt off to the side and swapped in under
    /// one write lock. When a media name (or id) repeats, the first row wins
    /// and later rows are rejected with a warning; this matches the table
    /// semantics content was authored against.
    pub async fn reload<I>(&self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = MediaInfoRow>,
    {
        let mut by_id = HashMap::new();
        let mut id_by_name = HashMap::new();

        for row in rows {
            let media_id = MediaId::new(row.media_id);
            if media_id.is_unbound() {
                warn!("Media directory: rejecting row {:?} with reserved media id 0", row.media_name);
                continue;
            }
            if by_id.contains_key(&media_id) {
                warn!(
                    "Media directory: already contains an entry for media id {}. Row {:?} will not be added.",
                    media_id, row.media_name
                );
                continue;
            }
            if id_by_name.contains_key(&row.media_name) {
                warn!(
                    "Media directory: already contains an entry for {:?} mapped to id {}. It will not be updated.",
                    row.media_name, id_by_name[&row.media_name]
                );
                continue;
            }

            let descriptor = Arc::new(MediaDescriptor {
                id: media_id,
                name: row.media_name.clone(),
                codec: MediaCodec::from_id(row.codec_id),
                is_streamed: row.is_streamed,
                memory_alignment: row.memory_alignment,
                use_device_memory: row.use_device_memory,
                prefetch_size: row.prefetch_size,
            });

            id_by_name.insert(row.media_name, media_id);
            by_id.insert(media_id, descriptor);
        }

        let count = by_id.len();
        {
            let mut inner = self.inner.write().await;
            inner.by_id = by_id;
            inner.id_by_name = id_by_name;
        }
        debug!("Media directory reloaded with {} entries", count);
        Ok(count)
    }

    /// Look up the descriptor for a media id
    pub async fn lookup_by_id(&self, media_id: MediaId) -> Option<Arc<MediaDescriptor>> {
        self.inner.read().await.by_id.get(&media_id).cloned()
    }

    /// Look up the media id for a media name
    pub async fn lookup_by_name(&self, name: &str) -> Option<MediaId> {
        self.inner.read().await.id_by_name.get(name).copied()
    }

    /// Number of media entries in the current snapshot
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    /// Whether the current snapshot is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u32, name: &str) -> MediaInfoRow {
        MediaInfoRow {
            media_id: id,
            media_name: name.to_string(),
            codec_id: 4,
            is_streamed: false,
            memory_alignment: 16,
            use_device_memory: false,
            prefetch_size: 0,
        }
    }

    #[tokio::test]
    async fn test_reload_replaces_snapshot() {
        let directory = MediaDirectory::new();
        directory.reload(vec![row(1, "drums"), row(2, "vocals")]).await.unwrap();
        assert_eq!(directory.len().await, 2);
        assert_eq!(directory.lookup_by_name("drums").await, Some(MediaId::new(1)));

        directory.reload(vec![row(3, "guitar")]).await.unwrap();
        assert_eq!(directory.len().await, 1);
        assert!(directory.lookup_by_id(MediaId::new(1)).await.is_none());
        assert_eq!(directory.lookup_by_name("guitar").await, Some(MediaId::new(3)));
    }

    #[tokio::test]
    async fn test_duplicate_name_first_wins() {
        let directory = MediaDirectory::new();
        directory.reload(vec![row(1, "A"), row(2, "A")]).await.unwrap();
        assert_eq!(directory.lookup_by_name("A").await, Some(MediaId::new(1)));
        assert!(directory.lookup_by_id(MediaId::new(2)).await.is_none());
    }

    #[tokio::test]
    async fn test_reserved_id_rejected() {
        let directory = MediaDirectory::new();
        directory.reload(vec![row(0, "bogus"), row(5, "ok")]).await.unwrap();
        assert_eq!(directory.len().await, 1);
        assert!(directory.lookup_by_name("bogus").await.is_none());
    }

    #[tokio::test]
    async fn test_descriptor_fields() {
        let directory = MediaDirectory::new();
        let mut r = row(9, "stream_me");
        r.is_streamed = true;
        r.prefetch_size = 4096;
        directory.reload(vec![r]).await.unwrap();

        let descriptor = directory.lookup_by_id(MediaId::new(9)).await.unwrap();
        assert!(descriptor.is_streamed);
        assert_eq!(descriptor.prefetch_size, 4096);
        assert_eq!(descriptor.codec, MediaCodec::Vorbis);
    }

    #[test]
    fn test_parse_rows_from_json() {
        let json = r#"[
            {"media_id": 1, "media_name": "drums.wem", "codec_id": 4, "is_streamed": true, "prefetch_size": 8192},
            {"media_id": 2, "media_name": "vocals.wem", "codec_id": 1}
        ]"#;
        let rows = parse_media_info_rows(json).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_streamed);
        assert_eq!(rows[1].memory_alignment, 0);

        let defaults = parse_cookie_default_rows(
            r#"[{"cookie": 100, "media_id": 1, "media_name": "drums.wem"}]"#,
        )
        .unwrap();
        assert_eq!(defaults[0].cookie, 100);
    }
}
