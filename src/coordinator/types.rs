//! Type definitions for the external-source coordinator

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{Cookie, MediaId};

/// Completion callback for a load operation; receives the outcome
pub type LoadCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Completion callback for an unload operation (best-effort, no outcome)
pub type UnloadCallback = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for the external-source coordinator
#[derive(Debug, Clone)]
pub struct ExternalSourceConfig {
    /// Streaming granularity of the storage device, in bytes
    pub streaming_granularity: u32,
    /// Directory where external-source media files are staged
    pub staging_directory: PathBuf,
}

impl Default for ExternalSourceConfig {
    fn default() -> Self {
        Self {
            streaming_granularity: 16 * 1024,
            staging_directory: PathBuf::from("ExternalSources"),
        }
    }
}

/// Events emitted by the coordinator for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSourceEvent {
    /// A cookie was bound to a media id
    MediaBound { cookie: Cookie, media_id: MediaId },
    /// A cookie's binding was removed
    MediaUnbound { cookie: Cookie },
    /// A load acquired the media for a cookie
    MediaLoaded { cookie: Cookie, media_id: MediaId },
    /// An unload released the media for a cookie
    MediaUnloaded { cookie: Cookie, media_id: MediaId },
    /// A table reload drove a whole-corpus source reload
    SourcesReloaded { targets: usize },
}

/// One host-side object (typically an audio event) that can be asked to drop
/// and re-acquire its data when external-source tables change
#[async_trait]
pub trait ReloadTarget: Send + Sync {
    /// Whether the target references at least one external source
    fn has_external_sources(&self) -> bool;

    /// Drop the target's loaded data
    async fn unload_data(&self);

    /// Re-acquire the target's data
    async fn load_data(&self);
}

/// Host collaborator enumerating the objects affected by table reloads
#[async_trait]
pub trait SourceReloadHost: Send + Sync {
    /// All host objects that may hold external-source references
    async fn reload_targets(&self) -> Vec<Arc<dyn ReloadTarget>>;
}

/// Host with nothing to reload; useful standalone and in tests
#[derive(Debug, Default)]
pub struct NullReloadHost;

#[async_trait]
impl SourceReloadHost for NullReloadHost {
    async fn reload_targets(&self) -> Vec<Arc<dyn ReloadTarget>> {
        Vec::new()
    }
}
