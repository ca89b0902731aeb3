//! Core types for the caching system.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, Response};

/// Request identity: method plus absolute URL, query included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    Self {
      method: method.as_str().to_string(),
      url: url.as_str().to_string(),
    }
  }

  pub fn from_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// SHA256 of `METHOD URL`, a stable fixed-length storage key
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// Capture time, informational only
  pub cached_at: DateTime<Utc>,
}

/// Result of handling an intercepted fetch, including where the response came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn shell_fallback(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::ShellFallback,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::OfflineFallback,
      cached_at: None,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Entry from the active generation
  Cache,
  /// Cached application shell served in place of an uncached page
  ShellFallback,
  /// Synthesized "you are offline" API response
  OfflineFallback,
  /// Not intercepted: the worker is not controlling, or the request is uncacheable
  Passthrough,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::ShellFallback => "shell-fallback",
      ResponseSource::OfflineFallback => "offline-fallback",
      ResponseSource::Passthrough => "passthrough",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_hash_depends_on_method_and_query() {
    let url = Url::parse("http://localhost:8000/assets/app.js?v=1").unwrap();
    let other = Url::parse("http://localhost:8000/assets/app.js?v=2").unwrap();

    let get = RequestKey::new(&Method::GET, &url);
    assert_eq!(get.cache_hash(), RequestKey::new(&Method::GET, &url).cache_hash());
    assert_ne!(get.cache_hash(), RequestKey::new(&Method::HEAD, &url).cache_hash());
    assert_ne!(get.cache_hash(), RequestKey::new(&Method::GET, &other).cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
  }
}
