//! Scripted network used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::http::{Fetcher, Request, Response};

pub const ORIGIN: &str = "http://localhost:8000";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config(version: &str) -> Config {
  Config {
    version: version.to_string(),
    ..Config::default()
  }
}

/// In-memory fetcher with a network switch, a call counter and a log of
/// every request seen. Unknown URLs answer 404.
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Response>>,
  holds: Mutex<HashMap<String, Arc<Semaphore>>>,
  seen: Mutex<Vec<Request>>,
  online: AtomicBool,
  calls: AtomicUsize,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      holds: Mutex::new(HashMap::new()),
      seen: Mutex::new(Vec::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
    }
  }

  /// Fetcher serving the default shell assets.
  pub fn with_shell() -> Self {
    let fetcher = Self::new();
    fetcher.route("/", Response::new(200, "<html>root</html>"));
    fetcher.route("/index.html", Response::new(200, "<html>index</html>"));
    fetcher.route("/manifest.json", Response::new(200, r#"{"name":"PinProfit"}"#));
    fetcher
  }

  pub fn route(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  /// Park fetches of `path` until the returned gate gets a permit.
  pub fn hold(&self, path: &str) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    self
      .holds
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Arc::clone(&gate));
    gate
  }

  pub fn requests(&self) -> Vec<Request> {
    self.seen.lock().unwrap().clone()
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for ScriptedFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(request.clone());

      let gate = self.holds.lock().unwrap().get(request.url.as_str()).cloned();
      if let Some(gate) = gate {
        let _permit = gate.acquire().await.unwrap();
      }
      // Yield so concurrent callers actually interleave
      tokio::task::yield_now().await;
      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Offline);
      }
      let routes = self.routes.lock().unwrap();
      Ok(
        routes
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::new(404, "not found")),
      )
    })
  }
}
