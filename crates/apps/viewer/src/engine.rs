//! Sync engine: binds the REST fetcher and the live channel to one
//! `SpotStore` and publishes every visible change on a watch channel.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use foundation::GeoBounds;
use parking_lot::Mutex;
use streaming::{
    Delta, DeltaOutcome, SnapshotOutcome, Spot, SpotId, SpotStatus, SpotStore, ViewId,
    ViewportRequest,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::fetch::SpotApi;
use crate::live::{self, LiveEvent, LiveHandle};

/// What subscribers see: a complete, duplicate-free collection.
#[derive(Debug, Clone)]
pub struct SpotView {
    pub revision: u64,
    pub spots: Arc<[Spot]>,
    pub connected: bool,
}

impl Default for SpotView {
    fn default() -> Self {
        Self {
            revision: 0,
            spots: Arc::from(Vec::new()),
            connected: false,
        }
    }
}

struct Shared {
    api: SpotApi,
    store: Mutex<SpotStore>,
    view: watch::Sender<SpotView>,
    enrich: bool,
    enriching: Mutex<HashSet<SpotId>>,
    enrich_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn publish(&self) {
        let store = self.store.lock();
        let revision = store.revision();
        let spots: Arc<[Spot]> = Arc::from(store.spots());
        self.view.send_if_modified(|view| {
            if view.revision == revision {
                return false;
            }
            view.revision = revision;
            view.spots = spots;
            true
        });
    }

    fn set_connected(&self, connected: bool) {
        self.view.send_if_modified(|view| {
            if view.connected == connected {
                return false;
            }
            view.connected = connected;
            true
        });
    }

    fn apply_viewport_result(&self, view_id: ViewId, spots: Vec<Spot>) -> SnapshotOutcome {
        let outcome = self.store.lock().apply_viewport_result(view_id, spots);
        match outcome {
            SnapshotOutcome::Applied => self.publish(),
            SnapshotOutcome::Unchanged => {}
            SnapshotOutcome::Stale => debug!("discarding stale viewport result {view_id}"),
        }
        outcome
    }

    fn apply_delta(self: &Arc<Self>, delta: Delta) {
        let outcome = self.store.lock().apply_delta(delta);
        match outcome {
            DeltaOutcome::Applied => self.publish(),
            DeltaOutcome::Unchanged => {}
            DeltaOutcome::UnknownTarget(id) => {
                debug!("live update for unknown spot {id}");
                if self.enrich {
                    self.spawn_enrichment(id);
                }
            }
            DeltaOutcome::OutOfView(id) => debug!("live record {id} is outside the viewport"),
        }
    }

    /// One-shot fetch of a spot referenced by a live update; at most one
    /// request per id is in flight.
    fn spawn_enrichment(self: &Arc<Self>, id: SpotId) {
        if !self.enriching.lock().insert(id) {
            return;
        }
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            match shared.api.fetch_spot(id).await {
                Ok(Some(spot)) => {
                    let outcome = shared.store.lock().apply_enrichment(spot);
                    match outcome {
                        DeltaOutcome::Applied => shared.publish(),
                        DeltaOutcome::OutOfView(_) => {
                            debug!("enriched spot {id} is outside the viewport")
                        }
                        DeltaOutcome::Unchanged | DeltaOutcome::UnknownTarget(_) => {}
                    }
                }
                Ok(None) => debug!("backend has no spot {id}"),
                Err(err) => warn!("enrichment for spot {id} failed: {err}"),
            }
            shared.enriching.lock().remove(&id);
        });
        let mut tasks = self.enrich_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn abort_enrichments(&self) {
        for task in self.enrich_tasks.lock().drain(..) {
            task.abort();
        }
        self.enriching.lock().clear();
    }
}

/// Live parking-spot synchronization engine.
///
/// Owns one live connection and at most one in-flight viewport fetch. Must be
/// started inside a tokio runtime. Dropping the engine stops every task.
pub struct SyncEngine {
    shared: Arc<Shared>,
    live: Option<LiveHandle>,
    pump: Option<JoinHandle<()>>,
    fetch: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn start(config: ViewerConfig) -> Result<Self, ViewerError> {
        let api = SpotApi::new(&config)?;
        let (view, _) = watch::channel(SpotView::default());
        let shared = Arc::new(Shared {
            api,
            store: Mutex::new(SpotStore::new()),
            view,
            enrich: config.enrich,
            enriching: Mutex::new(HashSet::new()),
            enrich_tasks: Mutex::new(Vec::new()),
        });

        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        info!("starting live channel at {}", config.ws_url);
        let live = live::spawn(
            config.ws_url.clone(),
            config.backoff,
            config.request_timeout,
            events_tx,
        );
        let pump = tokio::spawn(pump_events(Arc::clone(&shared), events_rx));

        let engine = Self {
            shared,
            live: Some(live),
            pump: Some(pump),
            fetch: Mutex::new(None),
        };
        if config.bootstrap {
            engine.spawn_bootstrap();
        }
        Ok(engine)
    }

    /// Start fetching `bounds`. Any earlier fetch is cancelled and its
    /// result, should it still arrive, is discarded.
    pub fn set_viewport(&self, bounds: GeoBounds, status: Option<SpotStatus>) -> ViewId {
        let req = self.shared.store.lock().begin_viewport(bounds, status);
        let view_id = req.view_id;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            if let Err(err) = fetch_into(&shared, req).await {
                warn!("viewport fetch {view_id} failed: {err}");
            }
        });
        self.replace_fetch(task);
        view_id
    }

    /// Like `set_viewport`, but waits for the fetch and reports its outcome.
    pub async fn load_viewport(
        &self,
        bounds: GeoBounds,
        status: Option<SpotStatus>,
    ) -> Result<SnapshotOutcome, ViewerError> {
        let req = self.shared.store.lock().begin_viewport(bounds, status);
        if let Some(prev) = self.fetch.lock().take() {
            prev.abort();
        }
        fetch_into(&self.shared, req).await
    }

    pub fn subscribe(&self) -> watch::Receiver<SpotView> {
        self.shared.view.subscribe()
    }

    pub fn spots(&self) -> Arc<[Spot]> {
        Arc::clone(&self.shared.view.borrow().spots)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.view.borrow().connected
    }

    pub fn current_viewport(&self) -> Option<ViewportRequest> {
        self.shared.store.lock().current_viewport().cloned()
    }

    pub fn counts_by_status(&self) -> BTreeMap<SpotStatus, usize> {
        self.shared.store.lock().counts_by_status()
    }

    /// Stop the live channel (no further reconnects) and cancel every
    /// pending fetch.
    pub async fn shutdown(mut self) {
        self.abort_tasks();
        if let Some(live) = self.live.take() {
            live.shutdown().await;
        }
        self.shared.set_connected(false);
        info!("sync engine stopped");
    }

    fn spawn_bootstrap(&self) {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let spots = match shared.api.fetch_all().await {
                Ok(spots) => spots,
                Err(err) => {
                    warn!("bootstrap fetch failed: {err}");
                    return;
                }
            };
            let applied = {
                let mut store = shared.store.lock();
                // A viewport issued meanwhile owns membership.
                store.current_viewport().is_none() && store.apply_viewport_snapshot(spots)
            };
            if applied {
                shared.publish();
            }
        });
        self.replace_fetch(task);
    }

    fn replace_fetch(&self, task: JoinHandle<()>) {
        if let Some(prev) = self.fetch.lock().replace(task) {
            prev.abort();
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.fetch.lock().take() {
            task.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.shared.abort_enrichments();
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.abort_tasks();
        if let Some(live) = self.live.take() {
            live.signal_shutdown();
            live.abort();
        }
    }
}

async fn fetch_into(shared: &Shared, req: ViewportRequest) -> Result<SnapshotOutcome, ViewerError> {
    let spots = shared.api.fetch_viewport(req.bounds, req.status).await?;
    Ok(shared.apply_viewport_result(req.view_id, spots))
}

async fn pump_events(shared: Arc<Shared>, mut events: mpsc::Receiver<LiveEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LiveEvent::Connected => shared.set_connected(true),
            LiveEvent::Disconnected => shared.set_connected(false),
            LiveEvent::Delta(delta) => shared.apply_delta(delta),
        }
    }
}
