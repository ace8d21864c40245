//! External-source coordinator
//!
//! This is the orchestrator for SetMedia / Load / Unload operations. It owns
//! the binding table and the file-state registry and serializes every
//! mutating operation onto one worker task, so a media reassignment racing
//! with an in-flight load or unload for the same cookie can never interleave
//! at the wrong granularity.

mod coordinator;
mod types;

pub use coordinator::ExternalSourceCoordinator;
pub use types::{
    ExternalSourceConfig, ExternalSourceEvent, LoadCallback, NullReloadHost, ReloadTarget,
    SourceReloadHost, UnloadCallback,
};
