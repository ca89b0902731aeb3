//! Failure kinds owned by the offline layer.
//!
//! These are wrapped into `color_eyre` reports at the dispatch boundary;
//! callers that need to react to a specific kind use `downcast_ref`.

use thiserror::Error;

use crate::worker::lifecycle::LifecycleState;

/// Transport-level failure while talking to the network.
#[derive(Error, Debug)]
pub enum FetchError {
  #[error("network is unavailable")]
  Offline,

  #[error("network error: {0}")]
  Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
  /// A shell asset could not be pre-cached; the install attempt is abandoned.
  #[error("shell asset {path} could not be cached: {reason}")]
  InstallAssetFetch { path: String, reason: String },

  /// Static request with nothing cached and no network to fall back on.
  #[error("{url} is not cached and the network is unavailable")]
  Offline { url: String },

  #[error("worker {version} cannot handle {event} while {state}")]
  InvalidState {
    version: String,
    event: &'static str,
    state: LifecycleState,
  },

  #[error("no worker controls this client")]
  Uncontrolled,
}
