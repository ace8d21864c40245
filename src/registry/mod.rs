//! File-state registry: reference-counted set of live file states
//!
//! The registry owns one shared [`FileState`] per media id. Use counts track
//! distinct consumers of a state, independent of any per-cookie load counts
//! kept by the binding table. Construction is asynchronous (storage
//! acquisition may block on I/O); a slow open only stalls consumers of that
//! same media id, never the rest of the registry.

mod file_state;

pub use file_state::{FileState, FileStateVariant};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::types::{MediaId, OperationOrigin};

struct FileStateEntry {
    /// Shared handle; `None` while the opener is still acquiring storage
    state: Option<Arc<FileState>>,
    use_count: u32,
    /// Consumers that arrived while the state was opening
    waiters: Vec<oneshot::Sender<Option<Arc<FileState>>>>,
}

/// Reference-counted registry of active file states keyed by media id
#[derive(Default)]
pub struct FileStateRegistry {
    states: Mutex<HashMap<MediaId, FileStateEntry>>,
}

impl FileStateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire one reference on the file state for a media id.
    ///
    /// When no live state exists the factory is invoked to construct one and
    /// the new state is opened before anyone observes it; a factory or open
    /// failure is reported to every concurrent caller and leaves nothing
    /// registered. Exactly one completion is delivered per call.
    pub async fn increment_use<F, Fut>(
        &self,
        media_id: MediaId,
        origin: OperationOrigin,
        factory: F,
    ) -> Result<Arc<FileState>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FileState>>,
    {
        // Fast path: a state already exists (possibly still opening).
        let pending = {
            let mut states = self.states.lock().await;
            match states.get_mut(&media_id) {
                Some(entry) => {
                    entry.use_count += 1;
                    trace!(
                        "IncrementUse ({}) media {}: ++{} uses",
                        origin,
                        media_id,
                        entry.use_count
                    );
                    match &entry.state {
                        Some(state) => return Ok(Arc::clone(state)),
                        None => {
                            let (tx, rx) = oneshot::channel();
                            entry.waiters.push(tx);
                            Some(rx)
                        }
                    }
                }
                None => {
                    // Reserve the slot so concurrent callers wait on this
                    // opener instead of constructing a second state.
                    states.insert(
                        media_id,
                        FileStateEntry {
                            state: None,
                            use_count: 1,
                            waiters: Vec::new(),
                        },
                    );
                    None
                }
            }
        };

        if let Some(rx) = pending {
            return match rx.await {
                Ok(Some(state)) => Ok(state),
                _ => Err(Error::construction(media_id, "file state open failed")),
            };
        }

        // Slot reserved: construct and open outside the lock.
        let state = match factory().await {
            Ok(state) => Arc::new(state),
            Err(e) => {
                warn!("IncrementUse media {}: factory failed: {}", media_id, e);
                self.fail_opening(media_id).await;
                return Err(e);
            }
        };

        match state.open().await {
            Ok(()) => {
                let mut states = self.states.lock().await;
                match states.get_mut(&media_id) {
                    Some(entry) => {
                        entry.state = Some(Arc::clone(&state));
                        for waiter in entry.waiters.drain(..) {
                            let _ = waiter.send(Some(Arc::clone(&state)));
                        }
                        debug!(
                            "IncrementUse ({}) media {}: opened with {} uses",
                            origin, media_id, entry.use_count
                        );
                        Ok(state)
                    }
                    None => {
                        // Every consumer released while we were opening.
                        drop(states);
                        state.close().await;
                        warn!(
                            "IncrementUse media {}: all uses released during open",
                            media_id
                        );
                        Err(Error::state_not_found(media_id))
                    }
                }
            }
            Err(e) => {
                warn!("IncrementUse media {}: open failed: {}", media_id, e);
                self.fail_opening(media_id).await;
                Err(e)
            }
        }
    }

    /// Release one reference on the file state for a media id.
    ///
    /// When the count reaches zero the state is removed and its storage is
    /// released before this call returns, so no media remains loaded after a
    /// successful decrement to zero.
    pub async fn decrement_use(&self, media_id: MediaId, origin: OperationOrigin) -> Result<()> {
        let closing = {
            let mut states = self.states.lock().await;
            match states.get_mut(&media_id) {
                None => {
                    trace!("DecrementUse ({}) on unknown media {}", origin, media_id);
                    return Err(Error::state_not_found(media_id));
                }
                Some(entry) if entry.use_count > 1 => {
                    entry.use_count -= 1;
                    trace!(
                        "DecrementUse ({}) media {}: --{} uses",
                        origin,
                        media_id,
                        entry.use_count
                    );
                    None
                }
                Some(_) => states.remove(&media_id).and_then(|entry| entry.state),
            }
        };

        if let Some(state) = closing {
            state.close().await;
            debug!("DecrementUse ({}) media {}: released", origin, media_id);
        }
        Ok(())
    }

    /// Current use count for a media id (0 when no state is live)
    pub async fn use_count(&self, media_id: MediaId) -> u32 {
        self.states
            .lock()
            .await
            .get(&media_id)
            .map(|entry| entry.use_count)
            .unwrap_or(0)
    }

    /// Number of live file states
    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    /// Whether no file state is live
    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }

    /// Drop a reserved-but-failed slot and fail its waiters
    async fn fail_opening(&self, media_id: MediaId) {
        let mut states = self.states.lock().await;
        if let Some(mut entry) = states.remove(&media_id) {
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaCodec, MediaDescriptor};
    use std::path::Path;

    fn descriptor(id: u32, streamed: bool) -> MediaDescriptor {
        MediaDescriptor {
            id: MediaId::new(id),
            name: format!("media_{id}.wem"),
            codec: MediaCodec::Pcm,
            is_streamed: streamed,
            memory_alignment: 0,
            use_device_memory: false,
            prefetch_size: 0,
        }
    }

    fn build(id: u32) -> FileState {
        FileState::from_descriptor(&descriptor(id, false), Path::new("/staging"), 0)
    }

    #[tokio::test]
    async fn test_shared_state_and_refcount() {
        let registry = FileStateRegistry::new();
        let media = MediaId::new(3);

        let first = registry
            .increment_use(media, OperationOrigin::Loading, || async { Ok(build(3)) })
            .await
            .unwrap();
        let factory_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&factory_ran);
        let second = registry
            .increment_use(media, OperationOrigin::Loading, move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(build(3)) }
            })
            .await
            .unwrap();

        // A live state means the factory is never consulted.
        assert!(!factory_ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.use_count(media).await, 2);
        assert!(first.is_open());

        registry.decrement_use(media, OperationOrigin::Loading).await.unwrap();
        assert_eq!(registry.use_count(media).await, 1);
        assert!(first.is_open());

        registry.decrement_use(media, OperationOrigin::Loading).await.unwrap();
        assert_eq!(registry.use_count(media).await, 0);
        assert!(!first.is_open());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_factory_failure_registers_nothing() {
        let registry = FileStateRegistry::new();
        let media = MediaId::new(4);

        let result = registry
            .increment_use(media, OperationOrigin::Loading, || async {
                Err(Error::unknown_media(media))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(registry.use_count(media).await, 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_failure_registers_nothing() {
        let registry = FileStateRegistry::new();
        let media = MediaId::new(5);
        let mut desc = descriptor(5, false);
        desc.name = String::new();

        let result = registry
            .increment_use(media, OperationOrigin::Loading, || async move {
                Ok(FileState::from_descriptor(&desc, Path::new("."), 0))
            })
            .await;

        assert!(matches!(result, Err(Error::Construction { .. })));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_decrement_unknown_media_is_error() {
        let registry = FileStateRegistry::new();
        assert!(registry
            .decrement_use(MediaId::new(9), OperationOrigin::Loading)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_increments_share_one_open() {
        let registry = Arc::new(FileStateRegistry::new());
        let media = MediaId::new(6);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .increment_use(media, OperationOrigin::Loading, || async {
                        Ok(FileState::from_descriptor(
                            &MediaDescriptor {
                                id: media,
                                name: "shared.wem".to_string(),
                                codec: MediaCodec::Pcm,
                                is_streamed: false,
                                memory_alignment: 0,
                                use_device_memory: false,
                                prefetch_size: 0,
                            },
                            Path::new("."),
                            0,
                        ))
                    })
                    .await
            }));
        }

        let mut states = Vec::new();
        for handle in handles {
            states.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(registry.use_count(media).await, 8);
        for state in &states[1..] {
            assert!(Arc::ptr_eq(&states[0], state));
        }
    }
}
