//! Deferred sync boundary.
//!
//! Only the tag registration and the flush entry point exist. Offline
//! mutations are not queued or replayed yet; `SyncHook` is where that would
//! plug in.

use std::collections::BTreeSet;

use color_eyre::Result;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

/// Called when the platform reports connectivity for a registered tag.
pub trait SyncHook: Send + Sync {
  /// Replay pending work for `tag`, returning how many mutations were sent.
  fn flush<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<usize>>;
}

/// Flush hook with nothing to replay.
pub struct EmptyFlush;

impl SyncHook for EmptyFlush {
  fn flush<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<usize>> {
    Box::pin(async move {
      debug!(tag, "Sync flush requested, no pending mutations");
      Ok(0)
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
  Flushed { tag: String, replayed: usize },
  /// Tag was never registered
  Ignored { tag: String },
}

pub struct DeferredSync {
  tags: BTreeSet<String>,
  hook: Box<dyn SyncHook>,
}

impl DeferredSync {
  pub fn new(hook: Box<dyn SyncHook>) -> Self {
    Self {
      tags: BTreeSet::new(),
      hook,
    }
  }

  pub fn register(&mut self, tag: &str) {
    if self.tags.insert(tag.to_string()) {
      info!(tag, "Registered background sync");
    }
  }

  pub fn is_registered(&self, tag: &str) -> bool {
    self.tags.contains(tag)
  }

  pub async fn on_sync(&self, tag: &str) -> Result<SyncOutcome> {
    if !self.is_registered(tag) {
      debug!(tag, "Ignoring sync for unregistered tag");
      return Ok(SyncOutcome::Ignored {
        tag: tag.to_string(),
      });
    }

    let replayed = self.hook.flush(tag).await?;
    Ok(SyncOutcome::Flushed {
      tag: tag.to_string(),
      replayed,
    })
  }
}
