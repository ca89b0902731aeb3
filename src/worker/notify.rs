//! Push payloads to notifications, notification clicks to navigation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;

/// Inbound push data. Every field is optional and none is trusted beyond
/// display text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tag: Option<String>,
  pub url: Option<String>,
}

impl PushPayload {
  /// Parse raw push data field by field. Missing data, invalid JSON or a
  /// non-object yields an empty payload; a field of the wrong type is
  /// dropped without affecting the others.
  pub fn parse(data: Option<&[u8]>) -> Self {
    let Some(data) = data else {
      return Self::default();
    };
    let value: Value = match serde_json::from_slice(data) {
      Ok(value) => value,
      Err(e) => {
        debug!(error = %e, "Malformed push payload, using defaults");
        return Self::default();
      }
    };

    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
    Self {
      title: field("title"),
      body: field("body"),
      tag: field("tag"),
      url: field("url"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub badge: Option<String>,
  pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  pub url: String,
}

/// Instruction for the client shell after a notification is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigate {
  /// Tag of the notification to close
  pub close: String,
  /// Open this URL, or focus a client already showing it
  pub url: String,
}

pub struct NotificationDispatcher {
  app_name: String,
  icon: Option<String>,
  badge: Option<String>,
}

impl NotificationDispatcher {
  pub fn new(config: &Config) -> Self {
    Self {
      app_name: config.app_name.clone(),
      icon: config.notification.icon.clone(),
      badge: config.notification.badge.clone(),
    }
  }

  pub fn on_push(&self, data: Option<&[u8]>) -> Notification {
    let payload = PushPayload::parse(data);

    Notification {
      title: non_empty(payload.title).unwrap_or_else(|| self.app_name.clone()),
      body: payload.body.unwrap_or_default(),
      tag: non_empty(payload.tag).unwrap_or_else(|| self.app_name.clone()),
      icon: self.icon.clone(),
      badge: self.badge.clone(),
      data: NotificationData {
        url: target_path(payload.url),
      },
    }
  }

  pub fn on_click(&self, notification: &Notification) -> Navigate {
    Navigate {
      close: notification.tag.clone(),
      url: notification.data.url.clone(),
    }
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

/// Only same-origin paths are followed; anything else opens the root.
fn target_path(url: Option<String>) -> String {
  match non_empty(url) {
    Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
    Some(other) => {
      debug!(url = %other, "Ignoring non-local notification target");
      "/".to_string()
    }
    None => "/".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dispatcher() -> NotificationDispatcher {
    NotificationDispatcher::new(&Config::default())
  }

  #[test]
  fn test_url_only_payload_uses_defaults() {
    let notification = dispatcher().on_push(Some(br#"{"url": "/products"}"#));

    assert_eq!(notification.title, "PinProfit");
    assert_eq!(notification.body, "");
    assert_eq!(notification.tag, "PinProfit");
    assert_eq!(notification.data.url, "/products");
  }

  #[test]
  fn test_click_navigates_to_target() {
    let dispatcher = dispatcher();
    let notification = dispatcher.on_push(Some(br#"{"url": "/products"}"#));

    let navigate = dispatcher.on_click(&notification);
    assert_eq!(navigate.url, "/products");
    assert_eq!(navigate.close, "PinProfit");
  }

  #[test]
  fn test_full_payload() {
    let notification = dispatcher().on_push(Some(
      br#"{"title": "Pin published", "body": "3 pins went live", "tag": "publish", "url": "/pins"}"#,
    ));

    assert_eq!(notification.title, "Pin published");
    assert_eq!(notification.body, "3 pins went live");
    assert_eq!(notification.tag, "publish");
    assert_eq!(notification.data.url, "/pins");
  }

  #[test]
  fn test_malformed_payload_still_notifies() {
    for data in [Some(&b"not json"[..]), Some(&b"[1, 2]"[..]), Some(&b""[..]), None] {
      let notification = dispatcher().on_push(data);
      assert_eq!(notification.title, "PinProfit");
      assert_eq!(notification.body, "");
      assert_eq!(notification.data.url, "/");
    }
  }

  #[test]
  fn test_mistyped_field_keeps_the_rest() {
    let notification = dispatcher().on_push(Some(br#"{"title": 42, "body": "hi", "url": "/products"}"#));
    assert_eq!(notification.title, "PinProfit");
    assert_eq!(notification.body, "hi");
    assert_eq!(notification.data.url, "/products");
  }

  #[test]
  fn test_parse_ignores_non_string_fields() {
    let payload = PushPayload::parse(Some(br#"{"tag": ["a"], "url": null, "title": "Pin published"}"#));
    assert_eq!(
      payload,
      PushPayload {
        title: Some("Pin published".to_string()),
        ..PushPayload::default()
      }
    );
  }

  #[test]
  fn test_empty_title_uses_app_name() {
    let notification = dispatcher().on_push(Some(br#"{"title": "  ", "body": "hi"}"#));
    assert_eq!(notification.title, "PinProfit");
    assert_eq!(notification.body, "hi");
  }

  #[test]
  fn test_foreign_targets_open_root() {
    for url in ["https://evil.example/phish", "//evil.example", "javascript:alert(1)"] {
      let payload = serde_json::json!({ "url": url }).to_string();
      let notification = dispatcher().on_push(Some(payload.as_bytes()));
      assert_eq!(notification.data.url, "/");
    }
  }

  #[test]
  fn test_configured_icon_is_attached() {
    let mut config = Config::default();
    config.notification.icon = Some("/icon-192.png".to_string());
    let notification = NotificationDispatcher::new(&config).on_push(None);

    assert_eq!(notification.icon.as_deref(), Some("/icon-192.png"));
    assert_eq!(notification.badge, None);
  }
}
