use url::Url;

use crate::config::RoutesConfig;

/// Which caching discipline a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Dynamic traffic: network-first, never cached
  Api,
  /// Everything else: cache-first with background revalidation
  Static,
}

/// Splits traffic on path prefix. This is the only dispatch point between
/// the two strategies.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefix: String,
  realtime_prefix: String,
}

impl Classifier {
  pub fn new(routes: &RoutesConfig) -> Self {
    Self {
      api_prefix: routes.api_prefix.clone(),
      realtime_prefix: routes.realtime_prefix.clone(),
    }
  }

  pub fn classify(&self, url: &Url) -> RouteClass {
    let path = url.path();
    if path.starts_with(&self.api_prefix) || path.starts_with(&self.realtime_prefix) {
      RouteClass::Api
    } else {
      RouteClass::Static
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classify(path: &str) -> RouteClass {
    let url = Url::parse("http://localhost:8000").unwrap().join(path).unwrap();
    Classifier::new(&RoutesConfig::default()).classify(&url)
  }

  #[test]
  fn test_api_and_realtime_routes() {
    assert_eq!(classify("/api/dashboard/stats"), RouteClass::Api);
    assert_eq!(classify("/api/health"), RouteClass::Api);
    assert_eq!(classify("/api/products?page=3"), RouteClass::Api);
    assert_eq!(classify("/ws/research/42"), RouteClass::Api);
  }

  #[test]
  fn test_everything_else_is_static() {
    assert_eq!(classify("/"), RouteClass::Static);
    assert_eq!(classify("/index.html"), RouteClass::Static);
    assert_eq!(classify("/assets/index-3f2a.js"), RouteClass::Static);
    assert_eq!(classify("/products"), RouteClass::Static);
    // Prefix match is on whole segments as configured
    assert_eq!(classify("/apiary"), RouteClass::Static);
    // Query strings never affect classification
    assert_eq!(classify("/settings?next=/api/x"), RouteClass::Static);
  }

  #[test]
  fn test_prefixes_are_configurable() {
    let routes = RoutesConfig {
      api_prefix: "/rest/".to_string(),
      realtime_prefix: "/stream/".to_string(),
    };
    let classifier = Classifier::new(&routes);
    let base = Url::parse("http://localhost:8000").unwrap();

    assert_eq!(classifier.classify(&base.join("/rest/pins").unwrap()), RouteClass::Api);
    assert_eq!(classifier.classify(&base.join("/stream/1").unwrap()), RouteClass::Api);
    assert_eq!(classifier.classify(&base.join("/api/pins").unwrap()), RouteClass::Static);
  }
}
