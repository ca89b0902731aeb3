//! Network transport used by the caching strategies.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

use super::types::{Request, Response};

/// Anything that can turn a request into a response snapshot.
///
/// An `Err` means the request never produced an HTTP response at all
/// (unreachable host, DNS failure, transport timeout). Error statuses are
/// returned as ordinary responses.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}

/// reqwest-backed fetcher.
/// Clone is cheap, the client pools connections behind an Arc.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  /// Create a fetcher. `timeout` of `None` leaves the transport default in place.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "Network response");
    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(self.send(request))
  }
}

/// Transport selected by the host: the real network, or a network that is
/// switched off.
#[derive(Clone)]
pub enum Transport {
  Http(HttpFetcher),
  Offline,
}

impl Fetcher for Transport {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    match self {
      Transport::Http(http) => http.fetch(request),
      Transport::Offline => {
        debug!(url = %request.url, "Network disabled, failing fetch");
        Box::pin(async { Err(FetchError::Offline) })
      }
    }
  }
}
