//! Orchestrator
//!
//! Owns the lifecycle of the whole pipeline: the config store, one watcher
//! task per enabled client, the dispatch task that routes parsed lines
//! through the event processor into sinks, and the reload machinery. All
//! reload paths (config directory changes, control-plane writes, explicit
//! reload calls) funnel through one debounced worker so only a single
//! reload runs at a time.

use crate::config::{
    newest_backup, BundleMode, ClientConfig, ConfigStore, SinkConfig,
};
use crate::context::MessageContext;
use crate::discovery::ServerCatalog;
use crate::parser::ClientAdapter;
use crate::processor::EventProcessor;
use crate::sinks::SinkHandle;
use crate::watcher::{LogWatcher, WatchedLine};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Everything the dispatch task needs, swapped atomically on reload.
struct PipelineState {
    adapters: HashMap<String, Arc<ClientAdapter>>,
    catalogs: HashMap<String, Arc<ServerCatalog>>,
    processor: EventProcessor,
    sinks: HashMap<String, Arc<SinkHandle>>,
}

/// Requests a reload; safe to call from any context. Requests within the
/// debounce window coalesce into one reload.
#[derive(Clone)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ReloadHandle {
    pub fn request(&self) {
        let _ = self.tx.send(());
    }
}

pub struct Orchestrator {
    config_dir: PathBuf,
    store: Arc<RwLock<ConfigStore>>,
    pipeline: Arc<RwLock<PipelineState>>,
    line_tx: Option<mpsc::Sender<WatchedLine>>,
    dispatch_handle: Option<JoinHandle<()>>,
    watcher_handles: Vec<JoinHandle<()>>,
    watcher_shutdown: Option<watch::Sender<bool>>,
    config_watcher: Option<RecommendedWatcher>,
    started_at: DateTime<Utc>,
    running: bool,
}

impl Orchestrator {
    /// Prepare the on-disk layout, restore from the newest backup when no
    /// root config exists, load the store, and build the initial pipeline.
    pub async fn initialize(config_dir: &Path) -> Result<Self> {
        ConfigStore::ensure_layout(config_dir).context("failed to create config layout")?;

        if !config_dir.join("config.json").exists() {
            if let Some((path, bundle)) = newest_backup(&config_dir.join("backups")) {
                info!(backup = %path.display(), "no root config found, restoring newest backup");
                bundle
                    .apply(config_dir, BundleMode::Merge {
                        prefer_incoming: true,
                    })
                    .context("failed to restore backup bundle")?;
            }
        }

        let store = ConfigStore::load(config_dir)
            .with_context(|| format!("failed to load config from {}", config_dir.display()))?;
        let pipeline = build_pipeline(&store).await?;

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            store: Arc::new(RwLock::new(store)),
            pipeline: Arc::new(RwLock::new(pipeline)),
            line_tx: None,
            dispatch_handle: None,
            watcher_handles: Vec::new(),
            watcher_shutdown: None,
            config_watcher: None,
            started_at: Utc::now(),
            running: false,
        })
    }

    /// Shared handle to the config store for the control plane.
    pub fn store(&self) -> Arc<RwLock<ConfigStore>> {
        self.store.clone()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Start the dispatch task and one watcher per enabled client.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        self.line_tx = Some(line_tx.clone());
        self.dispatch_handle = Some(tokio::spawn(run_dispatch(line_rx, self.pipeline.clone())));
        self.start_watchers(line_tx).await;
        self.running = true;
        info!(config_dir = %self.config_dir.display(), "pipeline started");
        Ok(())
    }

    async fn start_watchers(&mut self, line_tx: mpsc::Sender<WatchedLine>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.watcher_shutdown = Some(shutdown_tx);

        let store = self.store.read().await;
        let pipeline = self.pipeline.read().await;
        for client in store.clients.values().filter(|c| c.enabled) {
            let Some(adapter) = pipeline.adapters.get(&client.id) else {
                continue;
            };
            let watcher = LogWatcher::new(
                adapter.clone(),
                Duration::from_millis(store.poll_interval_for(client)),
                store.root.rescan_logs_on_startup,
            );
            let sender = line_tx.clone();
            let shutdown = shutdown_rx.clone();
            let client_id = client.id.clone();
            self.watcher_handles.push(tokio::spawn(async move {
                if let Err(error) = watcher.run(sender, shutdown).await {
                    error!(client = %client_id, %error, "watcher task failed");
                }
            }));
        }
        debug!(watchers = self.watcher_handles.len(), "watchers started");
    }

    async fn stop_watchers(&mut self) {
        if let Some(shutdown) = &self.watcher_shutdown {
            let _ = shutdown.send(true);
        }
        for handle in self.watcher_handles.drain(..) {
            if timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("watcher did not stop in time, abandoning");
            }
        }
        self.watcher_shutdown = None;
    }

    /// Reload configuration from disk and rebuild the pipeline, preserving
    /// unchanged sinks (and their rate-limit state) by id. A load failure
    /// keeps the previous good state running.
    pub async fn reload_full(&mut self) -> Result<()> {
        info!("reloading configuration");
        let was_running = self.running;
        if was_running {
            self.stop_watchers().await;
        }

        let new_store = match ConfigStore::load(&self.config_dir) {
            Ok(store) => store,
            Err(error) => {
                error!(%error, "reload failed, keeping previous configuration");
                if was_running {
                    if let Some(line_tx) = self.line_tx.clone() {
                        self.start_watchers(line_tx).await;
                    }
                }
                return Err(error.into());
            }
        };

        let old_sinks: HashMap<String, Arc<SinkHandle>> = {
            let pipeline = self.pipeline.read().await;
            pipeline.sinks.clone()
        };
        let new_pipeline = build_pipeline_reusing(&new_store, &old_sinks).await?;

        // Destroy sinks that did not survive the diff
        for (id, sink) in &old_sinks {
            let survived = new_pipeline
                .sinks
                .get(id)
                .is_some_and(|s| Arc::ptr_eq(s, sink));
            if !survived {
                if let Err(error) = sink.destroy().await {
                    warn!(sink = %id, %error, "failed to destroy sink");
                }
            }
        }

        *self.store.write().await = new_store;
        *self.pipeline.write().await = new_pipeline;

        if was_running {
            if let Some(line_tx) = self.line_tx.clone() {
                self.start_watchers(line_tx).await;
            }
        }
        info!("reload complete");
        Ok(())
    }

    /// Stop watchers, the dispatch task, sinks, and the config watcher.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        info!("stopping pipeline");
        self.stop_watchers().await;
        self.line_tx = None;
        if let Some(handle) = self.dispatch_handle.take() {
            if timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("dispatch task did not stop in time, abandoning");
            }
        }
        let pipeline = self.pipeline.read().await;
        for sink in pipeline.sinks.values() {
            if let Err(error) = sink.destroy().await {
                warn!(sink = sink.id(), %error, "failed to destroy sink");
            }
        }
        drop(pipeline);
        self.config_watcher = None;
        self.running = false;
        Ok(())
    }

    /// Spawn the debounced reload worker and return its handle.
    pub fn spawn_reload_worker(orchestrator: Arc<Mutex<Orchestrator>>) -> ReloadHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Fold further triggers arriving within the debounce window
                loop {
                    match timeout(RELOAD_DEBOUNCE, rx.recv()).await {
                        Ok(Some(())) => continue,
                        _ => break,
                    }
                }
                if let Err(error) = orchestrator.lock().await.reload_full().await {
                    warn!(%error, "scheduled reload failed");
                }
            }
        });
        ReloadHandle { tx }
    }

    /// Watch the config directory and request a reload on any change.
    pub fn start_config_watcher(&mut self, reload: ReloadHandle) -> Result<()> {
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| {
                if let Ok(event) = result {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        reload.request();
                    }
                }
            },
            notify::Config::default(),
        )?;
        for sub in ["clients", "servers", "events", "sinks"] {
            let dir = self.config_dir.join(sub);
            if dir.is_dir() {
                watcher.watch(&dir, RecursiveMode::Recursive)?;
            }
        }
        self.config_watcher = Some(watcher);
        Ok(())
    }

    /// Status summary for the control plane.
    pub async fn status(&self) -> serde_json::Value {
        let store = self.store.read().await;
        let pipeline = self.pipeline.read().await;
        json!({
            "running": self.running,
            "startedAt": self.started_at.to_rfc3339(),
            "configDirectory": self.config_dir.display().to_string(),
            "clients": store.clients.len(),
            "servers": store.servers.len(),
            "events": store.events.len(),
            "sinks": store.sinks.len(),
            "enabledEvents": pipeline.processor.event_count(),
            "watchers": self.watcher_handles.len(),
        })
    }

    /// Run one raw line through the pipeline directly. Test seam for
    /// exercising the dispatch path without the watcher's timing.
    #[cfg(test)]
    pub(crate) async fn inject_line(&self, client_id: &str, path: &Path, line: &str) {
        let pipeline = self.pipeline.read().await;
        dispatch_line(
            &pipeline,
            WatchedLine {
                client_id: client_id.to_string(),
                path: path.to_path_buf(),
                line: line.to_string(),
            },
        )
        .await;
    }
}

async fn run_dispatch(mut rx: mpsc::Receiver<WatchedLine>, pipeline: Arc<RwLock<PipelineState>>) {
    while let Some(line) = rx.recv().await {
        let state = pipeline.read().await;
        dispatch_line(&state, line).await;
    }
    debug!("dispatch task finished");
}

async fn dispatch_line(state: &PipelineState, line: WatchedLine) {
    let Some(adapter) = state.adapters.get(&line.client_id) else {
        return;
    };
    let catalog = state.catalogs.get(&line.client_id).map(|c| c.as_ref());
    let partial = adapter.partial_context(&line.path, catalog);
    let Some(ctx) = adapter.parse_line(&line.line, &partial) else {
        return;
    };

    for (event, event_ctx) in state.processor.process(ctx) {
        deliver_event(state, &event, &event_ctx).await;
    }
}

async fn deliver_event(
    state: &PipelineState,
    event: &crate::config::EventConfig,
    ctx: &MessageContext,
) {
    for sink_id in &event.sink_ids {
        let Some(sink) = state.sinks.get(sink_id) else {
            continue;
        };
        // One sink failing must not starve the others
        if let Err(error) = sink.send(ctx, event).await {
            warn!(sink = %sink_id, event = %event.id, %error, "delivery failed");
        }
    }
}

async fn build_pipeline(store: &ConfigStore) -> Result<PipelineState> {
    build_pipeline_reusing(store, &HashMap::new()).await
}

/// Build pipeline components, reusing sinks whose configuration did not
/// change so in-memory rate-limit state survives reloads.
async fn build_pipeline_reusing(
    store: &ConfigStore,
    old_sinks: &HashMap<String, Arc<SinkHandle>>,
) -> Result<PipelineState> {
    let mut adapters = HashMap::new();
    let mut catalogs = HashMap::new();
    for client in store.clients.values().filter(|c| c.enabled) {
        let effective = effective_client(client, store);
        let adapter = ClientAdapter::new(effective.clone())?;
        let catalog = match ServerCatalog::discover(&effective) {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(client = %client.id, %error, "server discovery failed, continuing without catalog");
                ServerCatalog::empty()
            }
        };
        adapters.insert(client.id.clone(), Arc::new(adapter));
        catalogs.insert(client.id.clone(), Arc::new(catalog));
    }

    let mut sinks = HashMap::new();
    for config in store.sinks.values().filter(|s| s.enabled) {
        let reusable = old_sinks
            .get(&config.id)
            .filter(|old| sink_config_unchanged(old.config(), config));
        let handle = match reusable {
            Some(existing) => existing.clone(),
            None => {
                let handle = Arc::new(SinkHandle::create(config.clone())?);
                handle
                    .initialize()
                    .await
                    .with_context(|| format!("failed to initialize sink '{}'", config.id))?;
                handle
            }
        };
        sinks.insert(config.id.clone(), handle);
    }

    let processor = EventProcessor::from_store(store)?;
    Ok(PipelineState {
        adapters,
        catalogs,
        processor,
        sinks,
    })
}

fn sink_config_unchanged(old: &SinkConfig, new: &SinkConfig) -> bool {
    serde_json::to_value(old).ok() == serde_json::to_value(new).ok()
}

/// Fill in the client's log directory from the global default when unset.
fn effective_client(client: &ClientConfig, store: &ConfigStore) -> ClientConfig {
    let mut effective = client.clone();
    if effective.log_directory.is_none() {
        effective.log_directory = store.root.default_log_directory.clone();
    }
    effective
}
