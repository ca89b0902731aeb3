use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// An intercepted outbound request. Headers and body are forwarded to the
/// network as-is; cache identity only looks at method and URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// Snapshot of a response: status, headers and body bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Build a JSON response with the matching content type.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  /// 2xx statuses are the only ones worth keeping in a cache generation.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = Response::new(200, "ok").with_header("Content-Type", "text/plain");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_json_sets_content_type() {
    let response = Response::json(503, &serde_json::json!({ "error": "x" }));
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert!(!response.is_success());
    assert_eq!(response.text(), r#"{"error":"x"}"#);
  }

  #[test]
  fn test_get_keeps_query_in_url() {
    let url = Url::parse("http://localhost:8000/api/products?page=2").unwrap();
    let request = Request::get(url);
    assert_eq!(request.url.query(), Some("page=2"));
    assert_eq!(request.method, Method::GET);
    assert!(request.headers.is_empty());
    assert_eq!(request.body, None);
  }

  #[test]
  fn test_request_carries_headers_and_body() {
    let url = Url::parse("http://localhost:8000/api/pins").unwrap();
    let request = Request::new(Method::POST, url)
      .with_header("content-type", "application/json")
      .with_body(r#"{"title":"Summer"}"#);

    assert_eq!(
      request.headers,
      vec![("content-type".to_string(), "application/json".to_string())]
    );
    assert_eq!(request.body.as_deref(), Some(&br#"{"title":"Summer"}"#[..]));
  }
}
