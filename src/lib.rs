//! # External-source media binding and lifecycle management
//!
//! `extsource-core` maps sound-engine external-source cookies to concrete
//! media resources, loads and unloads those resources with reference
//! counting, and keeps the mapping consistent under concurrent requests and
//! live table reloads.
//!
//! This crate provides:
//!
//! - A media directory fed from data-driven media-info tables
//! - Cookie-to-media binding with per-cookie load counting
//! - A use-counted registry of streamed and in-memory file states
//! - A coordinator serializing SetMedia / Load / Unload onto one worker task
//! - Reload notifications driving a blunt host-side source reload
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use extsource_core::prelude::*;
//!
//! # async fn demo() -> extsource_core::Result<()> {
//! # let media_rows: Vec<extsource_core::MediaInfoRow> = vec![];
//! # let default_rows: Vec<extsource_core::CookieDefaultRow> = vec![];
//! let coordinator = ExternalSourceCoordinator::new(Arc::new(NullReloadHost));
//!
//! // Feed the media tables, then bind and load a source.
//! coordinator.load_media_tables(media_rows, default_rows).await?;
//! coordinator.set_external_source_media_by_name("crowd_bed", "crowd_stadium.wem").await?;
//! coordinator.load_external_source_media(Cookie::from_name("crowd_bed"), "crowd_bed", |ok| {
//!     assert!(ok);
//! })?;
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Core types
pub mod types;

// Components
pub mod binding;
pub mod coordinator;
pub mod directory;
pub mod registry;

// Re-export common types
pub use error::{Error, Result};
pub use types::{Cookie, MediaCodec, MediaDescriptor, MediaId, OperationOrigin};

pub use binding::CookieBindingTable;
pub use coordinator::{
    ExternalSourceConfig, ExternalSourceCoordinator, ExternalSourceEvent, LoadCallback,
    NullReloadHost, ReloadTarget, SourceReloadHost, UnloadCallback,
};
pub use directory::{
    parse_cookie_default_rows, parse_media_info_rows, CookieDefaultRow, MediaDirectory,
    MediaInfoRow,
};
pub use registry::{FileState, FileStateRegistry, FileStateVariant};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        Cookie, CookieBindingTable, CookieDefaultRow, Error, ExternalSourceConfig,
        ExternalSourceCoordinator, ExternalSourceEvent, FileState, FileStateRegistry,
        FileStateVariant, MediaCodec, MediaDescriptor, MediaDirectory, MediaId, MediaInfoRow,
        NullReloadHost, OperationOrigin, ReloadTarget, Result, SourceReloadHost,
    };
}
