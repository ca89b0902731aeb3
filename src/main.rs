mod cache;
mod config;
mod error;
mod event;
mod http;
mod registration;
#[cfg(test)]
mod testing;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{GenerationStore, Served, SqliteStorage};
use config::Config;
use http::{HttpFetcher, Request, Transport};
use registration::{Activation, Controller};
use worker::{Outcome, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "pinprofit-sw")]
#[command(about = "Offline caching and push layer for the PinProfit web client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pinprofit-sw/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long, global = true)]
  offline: bool,

  /// Also write logs to this file
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(flatten)]
  Worker(WorkerCommand),
  /// List cache generations and their entries
  Generations,
}

/// Commands that go through a registered worker.
#[derive(Subcommand, Debug)]
enum WorkerCommand {
  /// Install and activate the configured version, or resume it if already installed
  Install,
  /// Send a request through the worker
  Fetch {
    /// Path (or absolute URL) to request
    path: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header as 'Name: value', repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Deliver a push payload and print the resulting notification
  Push {
    /// JSON payload, e.g. '{"title": "Pin published", "url": "/pins"}'
    payload: Option<String>,
    /// Also click the notification
    #[arg(long)]
    click: bool,
  },
  /// Signal restored connectivity for a background sync tag
  Sync {
    /// Defaults to the configured sync tag
    #[arg(long)]
    tag: Option<String>,
  },
}

/// Initialize the tracing subscriber. RUST_LOG controls the level.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let (file_layer, guard) = match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  info!(version = %config.version, origin = %config.origin, "pinprofit-sw starting");

  let command = match args.command {
    Command::Generations => {
      let store = SqliteStorage::open(&config.cache_path()?)?;
      return print_json(&generations(&config, &store)?);
    }
    Command::Worker(command) => command,
  };

  let transport = if args.offline {
    Transport::Offline
  } else {
    Transport::Http(HttpFetcher::new(config.request_timeout())?)
  };

  let (controller, activation) = Controller::register_or_degrade(
    &config,
    || SqliteStorage::open(&config.cache_path()?),
    Arc::new(transport),
  )
  .await;

  let result = run(&config, &controller, activation, command).await;
  controller.shutdown().await;
  result
}

async fn run(
  config: &Config,
  controller: &Controller<SqliteStorage, Transport>,
  activation: Option<Activation>,
  command: WorkerCommand,
) -> Result<()> {
  match command {
    WorkerCommand::Install => {
      let mut report = activation_json(activation);
      report["controlled"] = json!(controller.is_controlled());
      report["state"] = json!(controller.state().map(|state| state.to_string()));
      print_json(&report)
    }
    WorkerCommand::Fetch {
      path,
      method,
      headers,
      data,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut request = Request::new(method, config.resolve(&path)?);
      for header in &headers {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
      }
      if let Some(data) = data {
        request = request.with_body(data);
      }
      let served = controller.fetch(request).await?;
      print_json(&served_json(&served))
    }
    WorkerCommand::Push { payload, click } => {
      let data = payload.map(String::into_bytes);
      let notification = match controller.dispatch(WorkerEvent::Push { data }).await? {
        Outcome::Notify(notification) => notification,
        other => return Err(eyre!("Push answered with {:?}", other)),
      };
      print_json(&serde_json::to_value(&notification)?)?;

      if click {
        match controller
          .dispatch(WorkerEvent::NotificationClick(notification))
          .await?
        {
          Outcome::Navigate(navigate) => print_json(&serde_json::to_value(&navigate)?)?,
          other => return Err(eyre!("Click answered with {:?}", other)),
        }
      }
      Ok(())
    }
    WorkerCommand::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| config.sync_tag.clone());
      match controller.dispatch(WorkerEvent::Sync { tag }).await? {
        Outcome::Synced(outcome) => print_json(&serde_json::to_value(&outcome)?),
        other => Err(eyre!("Sync answered with {:?}", other)),
      }
    }
  }
}

/// Split a curl-style `Name: value` header.
fn parse_header(header: &str) -> Result<(&str, &str)> {
  let (name, value) = header
    .split_once(':')
    .ok_or_else(|| eyre!("Header '{}' is not of the form 'Name: value'", header))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Header '{}' has no name", header));
  }
  Ok((name, value.trim()))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn activation_json(activation: Option<Activation>) -> Value {
  match activation {
    Some(Activation::Resumed { version }) => json!({
      "version": version,
      "activation": "resumed",
    }),
    Some(Activation::Installed { install, activate }) => json!({
      "version": activate.version,
      "activation": "installed",
      "cached": install.cached,
      "skip_waiting": install.skip_waiting,
      "deleted": activate.deleted,
      "clients_claimed": activate.clients_claimed,
    }),
    Some(Activation::Retained { version, reason }) => json!({
      "version": version,
      "activation": "retained",
      "reason": reason,
    }),
    None => json!({}),
  }
}

fn served_json(served: &Served) -> Value {
  let headers: serde_json::Map<String, Value> = served
    .response
    .headers
    .iter()
    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
    .collect();

  json!({
    "source": served.source.as_str(),
    "status": served.response.status,
    "content_type": served.response.header("content-type"),
    "cached_at": served.cached_at.map(|t| t.to_rfc3339()),
    "headers": headers,
    "body": served.response.text(),
  })
}

fn generations(config: &Config, store: &SqliteStorage) -> Result<Value> {
  let mut out = Vec::new();
  for label in store.generations()? {
    let entries: Vec<Value> = store
      .keys(&label)?
      .into_iter()
      .map(|key| json!(format!("{} {}", key.method, key.url)))
      .collect();
    out.push(json!({
      "label": label,
      "current": label == config.version,
      "entries": entries,
    }));
  }
  Ok(Value::Array(out))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_header() {
    assert_eq!(
      parse_header("Content-Type: application/json").unwrap(),
      ("Content-Type", "application/json")
    );
    assert_eq!(
      parse_header("authorization:Bearer a:b").unwrap(),
      ("authorization", "Bearer a:b")
    );
    assert!(parse_header("no-colon").is_err());
    assert!(parse_header(": value").is_err());
  }

  #[test]
  fn test_fetch_arguments() {
    let args = Args::try_parse_from([
      "pinprofit-sw",
      "fetch",
      "/api/pins",
      "-X",
      "post",
      "-H",
      "content-type: application/json",
      "--data",
      r#"{"title":"Summer"}"#,
    ])
    .unwrap();

    match args.command {
      Command::Worker(WorkerCommand::Fetch {
        path,
        method,
        headers,
        data,
      }) => {
        assert_eq!(path, "/api/pins");
        assert_eq!(method, "post");
        assert_eq!(headers, vec!["content-type: application/json"]);
        assert_eq!(data.as_deref(), Some(r#"{"title":"Summer"}"#));
      }
      other => panic!("unexpected command {:?}", other),
    }
  }

  #[test]
  fn test_generations_is_a_top_level_command() {
    let args = Args::try_parse_from(["pinprofit-sw", "generations"]).unwrap();
    assert!(matches!(args.command, Command::Generations));
  }
}
