//! Cache generation lifecycle: install, activate, and version cutover.

use std::fmt;
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{GenerationStore, RequestKey};
use crate::error::WorkerError;
use crate::http::{Fetcher, Request, Response};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Created, shell assets not yet cached
  Installing,
  /// Installed, waiting to activate
  Waiting,
  /// Dropping old generations
  Activating,
  /// Serving fetches from its generation
  Active,
  /// A newer version took over
  Superseded,
  /// Install attempt failed; the previous generation keeps serving
  Failed,
}

impl LifecycleState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, LifecycleState::Superseded | LifecycleState::Failed)
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LifecycleState::Installing => "installing",
      LifecycleState::Waiting => "waiting",
      LifecycleState::Activating => "activating",
      LifecycleState::Active => "active",
      LifecycleState::Superseded => "superseded",
      LifecycleState::Failed => "failed",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: String,
  pub cached: usize,
  /// Activate right away instead of waiting for old clients to go away
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub version: String,
  pub deleted: Vec<String>,
  /// Open clients are controlled immediately, without a reload
  pub clients_claimed: bool,
}

/// Owns creation and deletion of cache generations for one version.
pub struct LifecycleManager<S, F> {
  version: String,
  origin: Url,
  shell_assets: Vec<String>,
  store: Arc<S>,
  fetcher: Arc<F>,
  state: Mutex<LifecycleState>,
}

impl<S: GenerationStore, F: Fetcher> LifecycleManager<S, F> {
  pub fn new(
    version: String,
    origin: Url,
    shell_assets: Vec<String>,
    store: Arc<S>,
    fetcher: Arc<F>,
  ) -> Self {
    Self {
      version,
      origin,
      shell_assets,
      store,
      fetcher,
      state: Mutex::new(LifecycleState::Installing),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> LifecycleState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(LifecycleState::Failed)
  }

  fn set_state(&self, new_state: LifecycleState) {
    if let Ok(mut state) = self.state.lock() {
      let old = *state;
      // Superseded and Failed workers never come back
      if old.is_terminal() {
        return;
      }
      if old != new_state {
        debug!(version = %self.version, from = %old, to = %new_state, "Lifecycle transition");
        *state = new_state;
      }
    }
  }

  fn expect_state(&self, expected: LifecycleState, event: &'static str) -> Result<()> {
    let state = self.state();
    if state != expected {
      return Err(
        WorkerError::InvalidState {
          version: self.version.clone(),
          event,
          state,
        }
        .into(),
      );
    }
    Ok(())
  }

  /// Pre-cache the application shell into a fresh generation.
  ///
  /// All-or-nothing: every asset is fetched before anything is written, so a
  /// failure leaves the store exactly as it was.
  pub async fn on_install(&self) -> Result<InstallReport> {
    self.expect_state(LifecycleState::Installing, "install")?;
    info!(version = %self.version, assets = self.shell_assets.len(), "Installing");

    let entries = match self.fetch_shell().await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(version = %self.version, error = %e, "Install failed");
        self.set_state(LifecycleState::Failed);
        return Err(e);
      }
    };

    if let Err(e) = self.store.create_generation(&self.version, &entries) {
      warn!(version = %self.version, error = %e, "Install failed writing generation");
      self.set_state(LifecycleState::Failed);
      return Err(e);
    }

    self.set_state(LifecycleState::Waiting);
    Ok(InstallReport {
      version: self.version.clone(),
      cached: entries.len(),
      skip_waiting: true,
    })
  }

  async fn fetch_shell(&self) -> Result<Vec<(RequestKey, Response)>> {
    let requests = self
      .shell_assets
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(|url| (path.as_str(), Request::get(url)))
          .map_err(|e| eyre!("Invalid shell asset path '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let fetches = requests.iter().map(|(path, request)| async move {
      let response = self.fetcher.fetch(request).await.map_err(|e| WorkerError::InstallAssetFetch {
        path: path.to_string(),
        reason: e.to_string(),
      })?;
      if !response.is_success() {
        return Err(WorkerError::InstallAssetFetch {
          path: path.to_string(),
          reason: format!("status {}", response.status),
        });
      }
      Ok::<_, WorkerError>((RequestKey::from_request(request), response))
    });

    Ok(try_join_all(fetches).await?)
  }

  /// Delete every generation except this version's, then claim clients.
  pub async fn on_activate(&self) -> Result<ActivateReport> {
    self.expect_state(LifecycleState::Waiting, "activate")?;
    self.set_state(LifecycleState::Activating);

    let deleted = self.delete_other_generations()?;

    self.set_state(LifecycleState::Active);
    info!(version = %self.version, "Activated");
    Ok(ActivateReport {
      version: self.version.clone(),
      deleted,
      clients_claimed: true,
    })
  }

  fn delete_other_generations(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for label in self.store.generations()? {
      if label != self.version {
        self.store.delete_generation(&label)?;
        info!(generation = %label, "Deleted old cache generation");
        deleted.push(label);
      }
    }
    Ok(deleted)
  }

  /// Pick up this version's generation after a restart.
  /// Returns false when this version has never been installed.
  ///
  /// The host may have stopped between install and activate, so activation
  /// cleanup runs again before the worker goes Active.
  pub fn resume(&self) -> Result<bool> {
    self.expect_state(LifecycleState::Installing, "resume")?;
    if !self.store.has_generation(&self.version)? {
      return Ok(false);
    }
    self.set_state(LifecycleState::Activating);
    let deleted = self.delete_other_generations()?;
    self.set_state(LifecycleState::Active);
    info!(version = %self.version, deleted = ?deleted, "Resumed existing generation");
    Ok(true)
  }

  /// A newer version has activated; stop serving.
  pub fn supersede(&self) {
    self.set_state(LifecycleState::Superseded);
  }
}
