//! Retrieval strategies for intercepted requests.

use std::sync::{Arc, Mutex};

use color_eyre::Result;
use reqwest::Method;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{EntryStore, RequestKey, Served};
use crate::error::WorkerError;
use crate::http::{Fetcher, Request, Response};

/// Body returned for API calls made while offline
pub const OFFLINE_MESSAGE: &str = "You are offline. Please reconnect.";

/// Status of the synthesized offline response. Callers recognise it by body shape.
const OFFLINE_STATUS: u16 = 503;

/// The synthesized `{"error": ...}` response for API traffic.
pub fn offline_response() -> Response {
  Response::json(
    OFFLINE_STATUS,
    &serde_json::json!({ "error": OFFLINE_MESSAGE }),
  )
}

/// Network-first: the live response, whatever its status, or the offline
/// JSON if the network could not be reached. Nothing is cached and nothing
/// is retried.
pub async fn network_first<F: Fetcher + ?Sized>(fetcher: &F, request: &Request) -> Served {
  match fetcher.fetch(request).await {
    Ok(response) => Served::from_network(response),
    Err(err) => {
      debug!(url = %request.url, error = %err, "API request failed, serving offline response");
      Served::offline(offline_response())
    }
  }
}

/// Cache-first with background revalidation, bound to one generation.
pub struct CacheFirst<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  /// Shell document served for uncached requests while offline
  fallback: RequestKey,
  revalidations: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, F> CacheFirst<S, F>
where
  S: EntryStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(store: Arc<S>, fetcher: Arc<F>, generation: String, fallback: RequestKey) -> Self {
    Self {
      store,
      fetcher,
      generation,
      fallback,
      revalidations: Mutex::new(Vec::new()),
    }
  }

  pub async fn handle(&self, request: &Request) -> Result<Served> {
    // Only GET responses are snapshot-able
    if request.method != Method::GET {
      return match self.fetcher.fetch(request).await {
        Ok(response) => Ok(Served::passthrough(response)),
        Err(err) => {
          debug!(url = %request.url, error = %err, "Uncacheable request failed");
          Err(WorkerError::Offline { url: request.url.to_string() }.into())
        }
      };
    }

    let key = RequestKey::from_request(request);

    if let Some(entry) = self.store.get_entry(&self.generation, &key)? {
      debug!(url = %request.url, generation = %self.generation, "Cache hit");
      self.revalidate(request.clone(), key);
      return Ok(Served::from_cache(entry));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          // A failed write must not fail the fetch
          if let Err(e) = self.store.put_entry(&self.generation, &key, &response) {
            warn!(url = %request.url, error = %e, "Failed to cache response");
          }
        }
        Ok(Served::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "Cache miss and network failed");
        match self.store.get_entry(&self.generation, &self.fallback)? {
          Some(shell) => Ok(Served::shell_fallback(shell)),
          None => Err(WorkerError::Offline { url: request.url.to_string() }.into()),
        }
      }
    }
  }

  /// Refresh an entry off the request path. Last write wins.
  fn revalidate(&self, request: Request, key: RequestKey) {
    let store = Arc::clone(&self.store);
    let fetcher = Arc::clone(&self.fetcher);
    let generation = self.generation.clone();

    let handle = tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          match store.put_entry(&generation, &key, &response) {
            Ok(()) => debug!(url = %request.url, "Revalidated cache entry"),
            Err(e) => warn!(url = %request.url, error = %e, "Failed to store revalidated entry"),
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Revalidation kept cached entry");
        }
        Err(err) => {
          debug!(url = %request.url, error = %err, "Revalidation skipped, network failed");
        }
      }
    });

    if let Ok(mut pending) = self.revalidations.lock() {
      pending.retain(|h| !h.is_finished());
      pending.push(handle);
    }
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    let pending: Vec<JoinHandle<()>> = match self.revalidations.lock() {
      Ok(mut pending) => pending.drain(..).collect(),
      Err(_) => return,
    };
    for handle in pending {
      if let Err(e) = handle.await {
        warn!(error = %e, "Revalidation task panicked");
      }
    }
  }
}
