use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::GenerationStore;
use crate::http::Fetcher;
use crate::worker::{Outcome, Worker, WorkerEvent};

struct Envelope {
  event: WorkerEvent,
  reply: oneshot::Sender<Result<Outcome>>,
}

/// Platform-side event queue for one worker.
///
/// Events are taken one at a time. Lifecycle, push, click and sync events are
/// handled to completion before the next event is taken; fetch events are
/// spawned so several can be waiting on the network at once.
pub struct EventLoop {
  tx: mpsc::UnboundedSender<Envelope>,
  task: JoinHandle<()>,
}

impl EventLoop {
  pub fn spawn<S, F>(worker: Arc<Worker<S, F>>) -> Self
  where
    S: GenerationStore + 'static,
    F: Fetcher + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let task = tokio::spawn(async move {
      while let Some(Envelope { event, reply }) = rx.recv().await {
        match event {
          WorkerEvent::FetchIntercept(_) => {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
              // Ignore send errors - the requester may have gone away
              let _ = reply.send(worker.dispatch(event).await);
            });
          }
          event => {
            let _ = reply.send(worker.dispatch(event).await);
          }
        }
      }
      debug!(version = %worker.version(), "Event loop closed");
    });

    Self { tx, task }
  }

  /// Queue an event and wait for its outcome.
  pub async fn send(&self, event: WorkerEvent) -> Result<Outcome> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope { event, reply })
      .map_err(|_| eyre!("Worker event loop has stopped"))?;

    rx.await
      .map_err(|_| eyre!("Worker dropped the event without answering"))?
  }

  /// Stop taking events and wait for the loop to drain.
  pub async fn shutdown(self) {
    drop(self.tx);
    let _ = self.task.await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStorage};
  use crate::http::Request;
  use crate::testing::{config, url, ScriptedFetcher};
  use crate::worker::lifecycle::LifecycleState;

  fn worker() -> Arc<Worker<SqliteStorage, ScriptedFetcher>> {
    let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(ScriptedFetcher::with_shell());
    Arc::new(Worker::new(&config("v1"), store, fetcher).unwrap())
  }

  #[tokio::test]
  async fn test_activation_completes_before_next_fetch() {
    let worker = worker();
    let events = EventLoop::spawn(Arc::clone(&worker));

    events.send(WorkerEvent::Install).await.unwrap();
    events.send(WorkerEvent::Activate).await.unwrap();
    assert_eq!(worker.state(), LifecycleState::Active);

    let outcome = events
      .send(WorkerEvent::FetchIntercept(Request::get(url("/index.html"))))
      .await
      .unwrap();
    match outcome {
      Outcome::Response(served) => assert_eq!(served.source, ResponseSource::Cache),
      other => panic!("unexpected outcome {:?}", other),
    }

    events.shutdown().await;
  }

  #[tokio::test]
  async fn test_errors_are_returned_to_sender() {
    let events = EventLoop::spawn(worker());

    // Activate without install is rejected, and the loop keeps running
    assert!(events.send(WorkerEvent::Activate).await.is_err());
    assert!(events.send(WorkerEvent::Install).await.is_ok());

    events.shutdown().await;
  }
}
