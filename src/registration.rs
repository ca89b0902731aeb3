//! Worker registration and version updates, as seen from the client.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};

use crate::cache::{GenerationStore, Served};
use crate::config::Config;
use crate::error::WorkerError;
use crate::event::EventLoop;
use crate::http::{Fetcher, Request};
use crate::worker::lifecycle::{ActivateReport, InstallReport, LifecycleState};
use crate::worker::{Outcome, Worker, WorkerEvent};

/// How a registration reached the active state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
  /// Generation already existed; no install needed
  Resumed { version: String },
  Installed {
    install: InstallReport,
    activate: ActivateReport,
  },
  /// The configured version failed to install; an older generation serves
  Retained { version: String, reason: String },
}

/// The worker currently controlling the client, with its event queue.
pub struct Registration<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  worker: Arc<Worker<S, F>>,
  events: EventLoop,
}

impl<S, F> Registration<S, F>
where
  S: GenerationStore + 'static,
  F: Fetcher + 'static,
{
  /// Register the configured version.
  ///
  /// Its generation is resumed if it exists. Otherwise, when an older
  /// generation is still on disk, that one is resumed first and the new
  /// version goes through [`Registration::update`], so a failed install
  /// leaves the old shell serving. A store with no generations gets a
  /// straight install and activate.
  pub async fn register(config: &Config, store: Arc<S>, fetcher: Arc<F>) -> Result<(Self, Activation)> {
    if !store.has_generation(&config.version)? {
      let previous = store.generations()?.pop();
      if let Some(label) = previous {
        let prior = Config {
          version: label,
          ..config.clone()
        };
        let (mut registration, _) = Self::start(&prior, store, fetcher).await?;
        return match registration.update(config).await {
          Ok(activation) => Ok((registration, activation)),
          Err(e) => {
            let activation = Activation::Retained {
              version: registration.worker.version().to_string(),
              reason: e.to_string(),
            };
            Ok((registration, activation))
          }
        };
      }
    }

    Self::start(config, store, fetcher).await
  }

  async fn start(config: &Config, store: Arc<S>, fetcher: Arc<F>) -> Result<(Self, Activation)> {
    let worker = Arc::new(Worker::new(config, Arc::clone(&store), Arc::clone(&fetcher))?);
    let events = EventLoop::spawn(Arc::clone(&worker));

    let activation = if worker.resume()? {
      Activation::Resumed {
        version: worker.version().to_string(),
      }
    } else {
      let (install, activate) = match install_and_activate(&events).await {
        Ok(reports) => reports,
        Err(e) => {
          events.shutdown().await;
          return Err(e);
        }
      };
      Activation::Installed { install, activate }
    };

    let registration = Self {
      store,
      fetcher,
      worker,
      events,
    };
    Ok((registration, activation))
  }

  /// Install a new version next to the running one and cut over to it.
  ///
  /// If the install fails the current worker keeps serving, untouched.
  pub async fn update(&mut self, config: &Config) -> Result<Activation> {
    let next = Arc::new(Worker::new(
      config,
      Arc::clone(&self.store),
      Arc::clone(&self.fetcher),
    )?);
    let events = EventLoop::spawn(Arc::clone(&next));

    let install = match events.send(WorkerEvent::Install).await.and_then(installed) {
      Ok(report) => report,
      Err(e) => {
        warn!(version = %next.version(), current = %self.worker.version(), error = %e, "Update failed, keeping current worker");
        events.shutdown().await;
        return Err(e);
      }
    };

    let activate = match events.send(WorkerEvent::Activate).await.and_then(activated) {
      Ok(report) => report,
      Err(e) => {
        events.shutdown().await;
        return Err(e);
      }
    };
    self.worker.supersede();

    let previous = std::mem::replace(&mut self.events, events);
    self.worker.settle().await;
    previous.shutdown().await;
    self.worker = next;

    info!(version = %activate.version, cached = install.cached, deleted = ?activate.deleted, "Update activated");
    Ok(Activation::Installed { install, activate })
  }

  pub fn state(&self) -> LifecycleState {
    self.worker.state()
  }

  pub async fn dispatch(&self, event: WorkerEvent) -> Result<Outcome> {
    self.events.send(event).await
  }

  pub async fn fetch(&self, request: Request) -> Result<Served> {
    match self.dispatch(WorkerEvent::FetchIntercept(request)).await? {
      Outcome::Response(served) => Ok(served),
      other => Err(eyre!("Fetch answered with {:?}", other)),
    }
  }

  pub async fn shutdown(self) {
    self.worker.settle().await;
    self.events.shutdown().await;
  }
}

async fn install_and_activate(events: &EventLoop) -> Result<(InstallReport, ActivateReport)> {
  let install = installed(events.send(WorkerEvent::Install).await?)?;
  debug!(version = %install.version, cached = install.cached, "Installed");
  let activate = activated(events.send(WorkerEvent::Activate).await?)?;
  Ok((install, activate))
}

fn installed(outcome: Outcome) -> Result<InstallReport> {
  match outcome {
    Outcome::Installed(report) => Ok(report),
    other => Err(eyre!("Install answered with {:?}", other)),
  }
}

fn activated(outcome: Outcome) -> Result<ActivateReport> {
  match outcome {
    Outcome::Activated(report) => Ok(report),
    other => Err(eyre!("Activate answered with {:?}", other)),
  }
}

/// A client with or without an offline worker.
///
/// Registration failures are not surfaced: the client carries on talking to
/// the network directly.
pub enum Controller<S, F> {
  Controlled(Registration<S, F>),
  Uncontrolled(Arc<F>),
}

impl<S, F> Controller<S, F>
where
  S: GenerationStore + 'static,
  F: Fetcher + 'static,
{
  /// Register a worker over the store produced by `open_store`, degrading to
  /// plain network access if either step fails.
  pub async fn register_or_degrade<O>(config: &Config, open_store: O, fetcher: Arc<F>) -> (Self, Option<Activation>)
  where
    O: FnOnce() -> Result<S>,
  {
    let store = match open_store() {
      Ok(store) => Arc::new(store),
      Err(e) => {
        warn!(error = %e, "Cache storage unavailable, continuing without offline support");
        return (Controller::Uncontrolled(fetcher), None);
      }
    };

    match Registration::register(config, store, Arc::clone(&fetcher)).await {
      Ok((registration, activation)) => (Controller::Controlled(registration), Some(activation)),
      Err(e) => {
        warn!(error = %e, "Worker registration failed, continuing without offline support");
        (Controller::Uncontrolled(fetcher), None)
      }
    }
  }

  pub fn is_controlled(&self) -> bool {
    matches!(self, Controller::Controlled(_))
  }

  pub fn state(&self) -> Option<LifecycleState> {
    match self {
      Controller::Controlled(registration) => Some(registration.state()),
      Controller::Uncontrolled(_) => None,
    }
  }

  pub async fn fetch(&self, request: Request) -> Result<Served> {
    match self {
      Controller::Controlled(registration) => registration.fetch(request).await,
      Controller::Uncontrolled(fetcher) => match fetcher.fetch(&request).await {
        Ok(response) => Ok(Served::passthrough(response)),
        Err(_) => Err(WorkerError::Offline { url: request.url.to_string() }.into()),
      },
    }
  }

  /// Push, click and sync events only reach a registered worker.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<Outcome> {
    match self {
      Controller::Controlled(registration) => registration.dispatch(event).await,
      Controller::Uncontrolled(_) => Err(WorkerError::Uncontrolled.into()),
    }
  }

  pub async fn shutdown(self) {
    if let Controller::Controlled(registration) = self {
      registration.shutdown().await;
    }
  }
}
