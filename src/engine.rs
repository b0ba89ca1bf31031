//! Engine: the explicit owner of every long-lived component.
//!
//! [`Engine::open`] builds the store, cursor store, bus, scheduler, dedupe
//! cache (and its sweeper) and registry, wiring them together by handing each
//! collaborator what it needs. Nothing is global.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dedupe::{DEFAULT_SWEEP_INTERVAL, DedupeCache};
use crate::dispatch::{DispatcherConfig, HttpWebhookSink, WebhookSink};
use crate::persistence::{CursorStore, Store, StoreError};
use crate::registry::{FeedRegistry, RegistryDeps};
use crate::scheduler::{ItemBus, TagScheduler};
use crate::upstream::{HttpItemSource, ItemSource, UpstreamError};

#[derive(Debug, Error)]
pub enum EngineError {
    /// The durable store could not be opened. Startup cannot continue.
    #[error("failed to open store: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("failed to build webhook client: {0}")]
    Webhook(#[source] reqwest::Error),
}

/// Everything the engine needs from the outside world.
pub struct EngineParts {
    pub source: Arc<dyn ItemSource>,
    pub sink: Arc<dyn WebhookSink>,
    pub dedupe_ttl: chrono::Duration,
    pub dispatch: DispatcherConfig,
}

impl EngineParts {
    /// HTTP-backed source and sink built from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let source = HttpItemSource::new(
            config.upstream_url.clone(),
            config.credentials.clone(),
            config.http_timeout,
        )?;
        let sink = HttpWebhookSink::new(config.http_timeout).map_err(EngineError::Webhook)?;
        Ok(EngineParts {
            source: Arc::new(source),
            sink: Arc::new(sink),
            dedupe_ttl: config.dedupe_ttl,
            dispatch: DispatcherConfig {
                retry: config.retry(),
                ..DispatcherConfig::default()
            },
        })
    }
}

pub struct Engine {
    registry: Arc<FeedRegistry>,
    store: Arc<Store>,
    dedupe: Arc<DedupeCache>,
    shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Engine {
    /// Opens the store under `state_dir` and wires the components together.
    ///
    /// Must be called inside a Tokio runtime. Feeds are not started; call
    /// [`Engine::start_all`].
    pub fn open(
        state_dir: impl AsRef<std::path::Path>,
        parts: EngineParts,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(Store::open(state_dir)?);
        info!(path = %store.path().display(), "Store opened");

        let cursors = CursorStore::new(Arc::clone(&store));
        let bus = Arc::new(ItemBus::new());
        let scheduler = Arc::new(TagScheduler::new(parts.source, cursors.clone(), bus));
        let dedupe = Arc::new(DedupeCache::new(parts.dedupe_ttl));

        let shutdown = CancellationToken::new();
        let sweeper = dedupe.spawn_sweeper(DEFAULT_SWEEP_INTERVAL, shutdown.child_token());

        let registry = Arc::new(FeedRegistry::new(RegistryDeps {
            store: Arc::clone(&store),
            cursors,
            scheduler,
            sink: parts.sink,
            dedupe: Arc::clone(&dedupe),
            dispatch: parts.dispatch,
        }));

        Ok(Engine {
            registry,
            store,
            dedupe,
            shutdown,
            sweeper,
        })
    }

    pub fn registry(&self) -> &Arc<FeedRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn dedupe(&self) -> &Arc<DedupeCache> {
        &self.dedupe
    }

    /// Starts every enabled feed. Returns how many started.
    pub async fn start_all(&self) -> usize {
        self.registry.start_all().await
    }

    /// Stops every feed, drains deliveries and stops the sweeper.
    pub async fn stop_all(self) -> usize {
        let stopped = self.registry.stop_all().await;
        self.shutdown.cancel();
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "Dedupe sweeper panicked");
        }
        info!(stopped, "Engine stopped");
        stopped
    }
}
