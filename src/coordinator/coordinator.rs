//! The external-source coordinator and its worker task

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::binding::CookieBindingTable;
use crate::directory::{CookieDefaultRow, MediaDirectory, MediaInfoRow};
use crate::error::{Error, Result};
use crate::registry::{FileState, FileStateRegistry};
use crate::types::{Cookie, MediaId, OperationOrigin};

use super::types::{
    ExternalSourceConfig, ExternalSourceEvent, LoadCallback, SourceReloadHost, UnloadCallback,
};

/// One queued unit of work on the serialization queue
enum Command {
    Load {
        cookie: Cookie,
        source_name: String,
        callback: LoadCallback,
    },
    Unload {
        cookie: Cookie,
        source_name: String,
        callback: UnloadCallback,
    },
    SetMedia {
        cookie: Cookie,
        media_id: MediaId,
        source_name: String,
        done: oneshot::Sender<Result<()>>,
    },
}

/// State shared between the coordinator handle and its worker task
struct CoordinatorShared {
    directory: Arc<MediaDirectory>,
    bindings: CookieBindingTable,
    registry: FileStateRegistry,
    /// Last file state acquired per cookie; bounded by the cookie population,
    /// last bound wins
    bound_states: RwLock<HashMap<Cookie, Arc<FileState>>>,
    /// Completion of the last off-queue registry operation per cookie.
    /// Spawned halves chain on this so the registry sees a cookie's
    /// increments and decrements in submission order; bounded by the cookie
    /// population.
    op_chains: Mutex<HashMap<Cookie, oneshot::Receiver<()>>>,
    host: Arc<dyn SourceReloadHost>,
    config: ExternalSourceConfig,
    event_tx: mpsc::UnboundedSender<ExternalSourceEvent>,
}

/// Orchestrates SetMedia / Load / Unload for external-source media.
///
/// All mutating operations funnel through one worker task: load and unload
/// mutate the binding table in queue order and off-load the slow registry
/// work, while `set_media` runs as one atomic unit and blocks its caller
/// until completion. Ordering is FIFO per cookie, on the queue and in the
/// registry (spawned registry halves chain per cookie); a stalled storage
/// operation stalls only its own cookie's chain.
pub struct ExternalSourceCoordinator {
    shared: Arc<CoordinatorShared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_rx: RwLock<Option<mpsc::UnboundedReceiver<ExternalSourceEvent>>>,
    worker: JoinHandle<()>,
}

impl ExternalSourceCoordinator {
    /// Create a coordinator with the default configuration
    pub fn new(host: Arc<dyn SourceReloadHost>) -> Self {
        Self::with_config(host, ExternalSourceConfig::default())
    }

    /// Create a coordinator with a custom configuration
    pub fn with_config(host: Arc<dyn SourceReloadHost>, config: ExternalSourceConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(CoordinatorShared {
            directory: Arc::new(MediaDirectory::new()),
            bindings: CookieBindingTable::new(),
            registry: FileStateRegistry::new(),
            bound_states: RwLock::new(HashMap::new()),
            op_chains: Mutex::new(HashMap::new()),
            host,
            config,
            event_tx,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = tokio::spawn(async move {
            Self::run_worker(worker_shared, cmd_rx).await;
        });

        Self {
            shared,
            cmd_tx,
            event_rx: RwLock::new(Some(event_rx)),
            worker,
        }
    }

    /// Fill the media directory and the default bindings from table rows.
    ///
    /// This is the initial table load: unlike the reload notifications it
    /// does not drive a host-side source reload.
    pub async fn load_media_tables<M, C>(&self, media_rows: M, default_rows: C) -> Result<()>
    where
        M: IntoIterator<Item = MediaInfoRow>,
        C: IntoIterator<Item = CookieDefaultRow>,
    {
        let media = self.shared.directory.reload(media_rows).await?;
        let cookies = self.shared.bindings.fill_from_defaults(default_rows).await;
        info!(
            "External source tables loaded: {} media entries, {} default bindings",
            media, cookies
        );
        Ok(())
    }

    /// Re-read the media-info table and reload every bound source
    pub async fn on_media_table_reload<I>(&self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = MediaInfoRow>,
    {
        info!("Change in media info table detected; refreshing directory and reloading sources");
        self.shared.directory.reload(rows).await?;
        Ok(self.reload_all_bound_sources().await)
    }

    /// Re-read the cookie default-media table and reload every bound source
    pub async fn on_source_table_reload<I>(&self, rows: I) -> usize
    where
        I: IntoIterator<Item = CookieDefaultRow>,
    {
        info!("Change in default media table detected; refreshing bindings and reloading sources");
        self.shared.bindings.fill_from_defaults(rows).await;
        self.reload_all_bound_sources().await
    }

    /// Ask the host to unload then reload every object referencing at least
    /// one external source. Blunt whole-corpus reload, no diffing.
    pub async fn reload_all_bound_sources(&self) -> usize {
        info!("Reloading events with external sources");

        let mut reloading = Vec::new();
        for target in self.shared.host.reload_targets().await {
            if target.has_external_sources() {
                target.unload_data().await;
                reloading.push(target);
            }
        }
        for target in &reloading {
            target.load_data().await;
        }

        let count = reloading.len();
        let _ = self
            .shared
            .event_tx
            .send(ExternalSourceEvent::SourcesReloaded { targets: count });
        debug!("{} events reloaded", count);
        count
    }

    /// Bind a source (by name) to a media id; the cookie is the engine hash
    /// of the source name
    pub async fn set_external_source_media_by_id(
        &self,
        source_name: &str,
        media_id: MediaId,
    ) -> Result<()> {
        self.set_media(Cookie::from_name(source_name), media_id, source_name)
            .await
    }

    /// Bind a source (by name) to a media name resolved through the directory
    pub async fn set_external_source_media_by_name(
        &self,
        source_name: &str,
        media_name: &str,
    ) -> Result<()> {
        match self.shared.directory.lookup_by_name(media_name).await {
            Some(media_id) => {
                self.set_media(Cookie::from_name(source_name), media_id, source_name)
                    .await
            }
            None => {
                error!(
                    "Did not find media with name {:?} in the media directory",
                    media_name
                );
                Err(Error::unknown_media_name(media_name))
            }
        }
    }

    /// Bind a source to a media id, both given as raw ids
    pub async fn set_external_source_media_by_ids(
        &self,
        source_id: u32,
        media_id: MediaId,
    ) -> Result<()> {
        self.set_media(Cookie::new(source_id), media_id, "").await
    }

    /// Bind a cookie to a media id, draining and reloading any outstanding
    /// loads of the previous media. Runs as one atomic unit on the queue and
    /// returns once the rebind (including reloads) has completed. Media id 0
    /// removes the binding without touching load counts or in-flight loads.
    pub async fn set_media(
        &self,
        cookie: Cookie,
        media_id: MediaId,
        source_name: &str,
    ) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetMedia {
                cookie,
                media_id,
                source_name: source_name.to_string(),
                done: done_tx,
            })
            .map_err(|_| Error::ChannelClosed)?;
        done_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Queue a load of the media bound to a cookie.
    ///
    /// The callback receives `true` once the media is acquired, `false` when
    /// the cookie is unbound or acquisition fails; it is invoked exactly
    /// once, on an unspecified task.
    pub fn load_external_source_media(
        &self,
        cookie: Cookie,
        source_name: &str,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> Result<()> {
        self.cmd_tx
            .send(Command::Load {
                cookie,
                source_name: source_name.to_string(),
                callback: Box::new(callback),
            })
            .map_err(|_| Error::ChannelClosed)
    }

    /// Queue an unload of the media bound to a cookie (best-effort).
    ///
    /// The callback fires once the release has been processed, whether or not
    /// anything was actually unloaded.
    pub fn unload_external_source_media(
        &self,
        cookie: Cookie,
        source_name: &str,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.cmd_tx
            .send(Command::Unload {
                cookie,
                source_name: source_name.to_string(),
                callback: Box::new(callback),
            })
            .map_err(|_| Error::ChannelClosed)
    }

    /// Media id currently bound to a cookie
    pub async fn bound_media(&self, cookie: Cookie) -> Option<MediaId> {
        self.shared.bindings.get(cookie).await
    }

    /// Current load count for a cookie
    pub async fn load_count(&self, cookie: Cookie) -> u32 {
        self.shared.bindings.load_count(cookie).await
    }

    /// Registry use count for a media id
    pub async fn media_use_count(&self, media_id: MediaId) -> u32 {
        self.shared.registry.use_count(media_id).await
    }

    /// Last file state acquired for a cookie, if any
    pub async fn bound_state(&self, cookie: Cookie) -> Option<Arc<FileState>> {
        self.shared.bound_states.read().await.get(&cookie).cloned()
    }

    /// Shared handle to the media directory
    pub fn directory(&self) -> Arc<MediaDirectory> {
        Arc::clone(&self.shared.directory)
    }

    /// Take the monitoring event receiver (available once)
    pub async fn take_event_receiver(
        &self,
    ) -> Option<mpsc::UnboundedReceiver<ExternalSourceEvent>> {
        self.event_rx.write().await.take()
    }

    /// Stop accepting operations and wait for the worker to drain the queue
    pub async fn shutdown(self) {
        let Self {
            shared: _shared,
            cmd_tx,
            event_rx: _event_rx,
            worker,
        } = self;
        drop(cmd_tx);
        if let Err(e) = worker.await {
            warn!("External source worker ended abnormally: {}", e);
        }
    }

    async fn run_worker(
        shared: Arc<CoordinatorShared>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        debug!("External source worker started");
        while let Some(command) = cmd_rx.recv().await {
            match command {
                Command::Load {
                    cookie,
                    source_name,
                    callback,
                } => Self::handle_load(&shared, cookie, &source_name, callback).await,
                Command::Unload {
                    cookie,
                    source_name,
                    callback,
                } => Self::handle_unload(&shared, cookie, &source_name, callback).await,
                Command::SetMedia {
                    cookie,
                    media_id,
                    source_name,
                    done,
                } => {
                    let result =
                        Self::handle_set_media(&shared, cookie, media_id, &source_name).await;
                    let _ = done.send(result);
                }
            }
        }
        debug!("External source worker stopped");
    }

    /// Spawn a registry operation ordered after the cookie's previous one.
    ///
    /// The worker hands the registry work off so a stalled open or close
    /// cannot stall the queue, but within one cookie the operations must hit
    /// the registry in submission order or an unload's release could overtake
    /// the preceding load's acquire and strand the state. Each spawned task
    /// therefore waits for the cookie's previous task before running.
    async fn spawn_in_order<F>(shared: &Arc<CoordinatorShared>, cookie: Cookie, op: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let previous = shared.op_chains.lock().await.insert(cookie, done_rx);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            op.await;
            let _ = done_tx.send(());
        });
    }

    /// Load path: count the load in queue order, acquire the media off-queue
    async fn handle_load(
        shared: &Arc<CoordinatorShared>,
        cookie: Cookie,
        source_name: &str,
        callback: LoadCallback,
    ) {
        let Some(media_id) = shared.bindings.get(cookie).await else {
            warn!(
                "LoadMedia: no media has been associated with external source {} ({:?}); nothing will be loaded until the media is set",
                cookie, source_name
            );
            callback(false);
            return;
        };

        let count = shared.bindings.increment_load_count(cookie).await;
        debug!(
            "Loading external source {} ({:?}) media {}: ++{} load count",
            cookie, source_name, media_id, count
        );

        let task_shared = Arc::clone(shared);
        Self::spawn_in_order(shared, cookie, async move {
            let ok = Self::acquire_media(&task_shared, cookie, media_id).await;
            callback(ok);
        })
        .await;
    }

    /// Slow half of a load: registry acquisition and state bookkeeping.
    ///
    /// On failure the cookie's load count is deliberately left incremented;
    /// the reference stays claimable by a later retry or unload.
    async fn acquire_media(
        shared: &Arc<CoordinatorShared>,
        cookie: Cookie,
        media_id: MediaId,
    ) -> bool {
        let directory = Arc::clone(&shared.directory);
        let staging = shared.config.staging_directory.clone();
        let granularity = shared.config.streaming_granularity;

        let result = shared
            .registry
            .increment_use(media_id, OperationOrigin::Loading, move || async move {
                let Some(descriptor) = directory.lookup_by_id(media_id).await else {
                    warn!(
                        "LoadMedia: could not find a media directory entry for media id {}",
                        media_id
                    );
                    return Err(Error::unknown_media(media_id));
                };
                Ok(FileState::from_descriptor(&descriptor, &staging, granularity))
            })
            .await;

        match result {
            Ok(state) => {
                trace!("Binding cookie {} to media {}", cookie, media_id);
                shared.bound_states.write().await.insert(cookie, state);
                let _ = shared
                    .event_tx
                    .send(ExternalSourceEvent::MediaLoaded { cookie, media_id });
                true
            }
            Err(e) => {
                warn!(
                    "LoadMedia: acquiring media {} for external source {} failed: {}",
                    media_id, cookie, e
                );
                false
            }
        }
    }

    /// Unload path: count the release in queue order, release off-queue
    async fn handle_unload(
        shared: &Arc<CoordinatorShared>,
        cookie: Cookie,
        source_name: &str,
        callback: UnloadCallback,
    ) {
        let Some(media_id) = shared.bindings.get(cookie).await else {
            warn!(
                "UnloadMedia: no media has been associated with external source {} ({:?}); no media will be unloaded",
                cookie, source_name
            );
            callback();
            return;
        };

        match shared.bindings.decrement_load_count(cookie).await {
            Ok(count) => {
                debug!(
                    "Unloading external source {} ({:?}) media {}: --{} load count",
                    cookie, source_name, media_id, count
                );
                let task_shared = Arc::clone(shared);
                Self::spawn_in_order(shared, cookie, async move {
                    Self::release_media(&task_shared, cookie, media_id).await;
                    callback();
                })
                .await;
            }
            Err(_) => {
                if shared.bindings.has_load_count(cookie).await {
                    warn!(
                        "UnloadMedia: unloading external source {} ({:?}) that is not loaded",
                        cookie, source_name
                    );
                } else {
                    debug!(
                        "UnloadMedia: unloading unknown external source {} ({:?})",
                        cookie, source_name
                    );
                }
                callback();
            }
        }
    }

    /// Slow half of an unload; registry failures are logged, never surfaced
    async fn release_media(shared: &Arc<CoordinatorShared>, cookie: Cookie, media_id: MediaId) {
        match shared
            .registry
            .decrement_use(media_id, OperationOrigin::Loading)
            .await
        {
            Ok(()) => {
                let _ = shared
                    .event_tx
                    .send(ExternalSourceEvent::MediaUnloaded { cookie, media_id });
            }
            Err(e) => {
                debug!(
                    "UnloadMedia: releasing media {} for external source {}: {}",
                    media_id, cookie, e
                );
            }
        }
    }

    /// SetMedia: one atomic unit on the queue.
    ///
    /// With outstanding loads, every reference to the old media is drained
    /// (the last release is awaited) before the new binding goes in, then the
    /// same number of loads is issued against the new media and the final one
    /// awaited before returning.
    async fn handle_set_media(
        shared: &Arc<CoordinatorShared>,
        cookie: Cookie,
        media_id: MediaId,
        source_name: &str,
    ) -> Result<()> {
        // Media id 0 resets the cookie: the assignment is merely removed.
        if media_id.is_unbound() {
            if shared.bindings.remove(cookie).await.is_some() {
                debug!("SetMedia: reset external source {} ({:?})", cookie, source_name);
                let _ = shared
                    .event_tx
                    .send(ExternalSourceEvent::MediaUnbound { cookie });
            }
            return Ok(());
        }

        let Some(descriptor) = shared.directory.lookup_by_id(media_id).await else {
            error!(
                "SetMedia: could not find media entry with id {} in the media directory",
                media_id
            );
            return Err(Error::unknown_media(media_id));
        };

        let current = shared.bindings.get(cookie).await;
        if current == Some(media_id) {
            trace!(
                "SetMedia: media id for {} ({:?}) was already set to {} ({:?}); nothing to do",
                cookie,
                source_name,
                media_id,
                descriptor.name
            );
            return Ok(());
        }

        let load_count = shared.bindings.load_count(cookie).await;

        if current.is_some() && load_count > 0 {
            debug!(
                "SetMedia: external source {} ({:?}) is used {} times; reloading all instances",
                cookie, source_name, load_count
            );
            let (drained_tx, drained_rx) = oneshot::channel();
            let mut drained_tx = Some(drained_tx);
            for i in (0..load_count).rev() {
                if i == 0 {
                    let tx = drained_tx.take();
                    Self::handle_unload(
                        shared,
                        cookie,
                        source_name,
                        Box::new(move || {
                            if let Some(tx) = tx {
                                let _ = tx.send(());
                            }
                        }),
                    )
                    .await;
                } else {
                    Self::handle_unload(shared, cookie, source_name, Box::new(|| {})).await;
                }
            }
            // Old references fully counted out before the new media goes in.
            let _ = drained_rx.await;
        }

        shared.bindings.set(cookie, media_id).await;
        let _ = shared
            .event_tx
            .send(ExternalSourceEvent::MediaBound { cookie, media_id });

        if load_count == 0 {
            debug!(
                "SetMedia: media {} ({:?}) will be loaded when external source {} ({:?}) is loaded",
                media_id, descriptor.name, cookie, source_name
            );
            return Ok(());
        }

        let (loaded_tx, loaded_rx) = oneshot::channel();
        let mut loaded_tx = Some(loaded_tx);
        for i in (0..load_count).rev() {
            if i == 0 {
                let tx = loaded_tx.take();
                Self::handle_load(
                    shared,
                    cookie,
                    source_name,
                    Box::new(move |ok| {
                        if let Some(tx) = tx {
                            let _ = tx.send(ok);
                        }
                    }),
                )
                .await;
            } else {
                Self::handle_load(shared, cookie, source_name, Box::new(|_| {})).await;
            }
        }

        match loaded_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::construction(media_id, "reload after rebind failed")),
            Err(_) => Err(Error::ChannelClosed),
        }
    }
}
