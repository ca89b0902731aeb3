//! The offline worker: one dispatcher over every event the platform delivers.
//!
//! Fetch handling is split by the [`Classifier`] into network-first (API and
//! realtime routes) and cache-first with background revalidation (everything
//! else). Lifecycle events own the cache generations. Push, notification
//! click and sync events are independent entry points.
//!
//! Lifecycle handlers hold the write side of a barrier for their whole
//! duration, so no fetch is served while a generation is being created or
//! old ones are being dropped. Fetches share the read side and may run
//! concurrently.

pub mod classify;
pub mod lifecycle;
pub mod notify;
pub mod strategy;
pub mod sync;

use std::sync::Arc;

use color_eyre::Result;
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{GenerationStore, RequestKey, Served};
use crate::config::Config;
use crate::error::WorkerError;
use crate::http::{Fetcher, Request};

use classify::{Classifier, RouteClass};
use lifecycle::{ActivateReport, InstallReport, LifecycleManager, LifecycleState};
use notify::{Navigate, Notification, NotificationDispatcher};
use strategy::CacheFirst;
use sync::{DeferredSync, EmptyFlush, SyncHook, SyncOutcome};

/// Everything the platform can ask of the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  FetchIntercept(Request),
  Push { data: Option<Vec<u8>> },
  NotificationClick(Notification),
  Sync { tag: String },
}

impl WorkerEvent {
  pub fn name(&self) -> &'static str {
    match self {
      WorkerEvent::Install => "install",
      WorkerEvent::Activate => "activate",
      WorkerEvent::FetchIntercept(_) => "fetch",
      WorkerEvent::Push { .. } => "push",
      WorkerEvent::NotificationClick(_) => "notificationclick",
      WorkerEvent::Sync { .. } => "sync",
    }
  }
}

/// What the platform should do with the result of an event
#[derive(Debug, Clone)]
pub enum Outcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Response(Served),
  Notify(Notification),
  Navigate(Navigate),
  Synced(SyncOutcome),
}

pub struct Worker<S, F> {
  lifecycle: LifecycleManager<S, F>,
  classifier: Classifier,
  cache_first: CacheFirst<S, F>,
  fetcher: Arc<F>,
  notifications: NotificationDispatcher,
  sync: DeferredSync,
  barrier: RwLock<()>,
}

impl<S, F> Worker<S, F>
where
  S: GenerationStore + 'static,
  F: Fetcher + 'static,
{
  /// Worker whose sync hook has nothing to replay.
  pub fn new(config: &Config, store: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    Self::with_sync_hook(config, store, fetcher, Box::new(EmptyFlush))
  }

  pub fn with_sync_hook(
    config: &Config,
    store: Arc<S>,
    fetcher: Arc<F>,
    hook: Box<dyn SyncHook>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let fallback = RequestKey::new(&Method::GET, &config.resolve(&config.shell_fallback)?);

    let lifecycle = LifecycleManager::new(
      config.version.clone(),
      origin,
      config.shell_assets.clone(),
      Arc::clone(&store),
      Arc::clone(&fetcher),
    );
    let cache_first = CacheFirst::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      config.version.clone(),
      fallback,
    );

    let mut sync = DeferredSync::new(hook);
    sync.register(&config.sync_tag);

    Ok(Self {
      lifecycle,
      classifier: Classifier::new(&config.routes),
      cache_first,
      fetcher,
      notifications: NotificationDispatcher::new(config),
      sync,
      barrier: RwLock::new(()),
    })
  }

  pub fn version(&self) -> &str {
    self.lifecycle.version()
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// Handle one event. Lifecycle events resolve only once their storage work
  /// is complete.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<Outcome> {
    debug!(version = %self.version(), event = event.name(), "Dispatch");
    match event {
      WorkerEvent::Install => {
        let _guard = self.barrier.write().await;
        Ok(Outcome::Installed(self.lifecycle.on_install().await?))
      }
      WorkerEvent::Activate => {
        let _guard = self.barrier.write().await;
        Ok(Outcome::Activated(self.lifecycle.on_activate().await?))
      }
      WorkerEvent::FetchIntercept(request) => Ok(Outcome::Response(self.on_fetch(&request).await?)),
      WorkerEvent::Push { data } => Ok(Outcome::Notify(self.notifications.on_push(data.as_deref()))),
      WorkerEvent::NotificationClick(notification) => {
        Ok(Outcome::Navigate(self.notifications.on_click(&notification)))
      }
      WorkerEvent::Sync { tag } => Ok(Outcome::Synced(self.sync.on_sync(&tag).await?)),
    }
  }

  async fn on_fetch(&self, request: &Request) -> Result<Served> {
    let _guard = self.barrier.read().await;

    // Clients are only claimed once activation completes
    if self.state() != LifecycleState::Active {
      debug!(url = %request.url, state = %self.state(), "Not controlling, passing through");
      return match self.fetcher.fetch(request).await {
        Ok(response) => Ok(Served::passthrough(response)),
        Err(_) => Err(WorkerError::Offline { url: request.url.to_string() }.into()),
      };
    }

    match self.classifier.classify(&request.url) {
      RouteClass::Api => Ok(strategy::network_first(self.fetcher.as_ref(), request).await),
      RouteClass::Static => self.cache_first.handle(request).await,
    }
  }

  /// Pick up an existing generation for this version. See [`LifecycleManager::resume`].
  pub fn resume(&self) -> Result<bool> {
    self.lifecycle.resume()
  }

  pub fn supersede(&self) {
    self.lifecycle.supersede()
  }

  /// Wait for background revalidations. Only hosts about to exit and tests need this.
  pub async fn settle(&self) {
    self.cache_first.settle().await
  }
}
