//! Maps an intercepted request to a resource category.

use once_cell::sync::Lazy;
use regex::Regex;

use super::manifest::Manifest;
use crate::http::{Method, Request};

/// Fonts, script CDNs, the backend SDK host and images.
static CDN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  [
    r"^https://fonts\.(googleapis|gstatic)\.com/",
    r"^https://cdnjs\.cloudflare\.com/",
    r"^https://unpkg\.com/",
    r"^https://www\.gstatic\.com/firebasejs/",
    r"(?i)\.(jpg|jpeg|png|gif|webp|svg|ico)(\?.*)?$",
  ]
  .iter()
  .map(|p| Regex::new(p).expect("CDN pattern is valid"))
  .collect()
});

static DOCUMENT_PATTERN: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)\.(pdf|epub|txt|doc|docx)(\?.*)?$").expect("document pattern is valid"));

static API_HOST_PATTERN: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^https://api\.").expect("API pattern is valid"));

/// Category of an intercepted request. Derived per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
  StaticAsset,
  CdnResource,
  Document,
  Api,
  Navigation,
  Other,
}

impl RequestCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      RequestCategory::StaticAsset => "static-asset",
      RequestCategory::CdnResource => "cdn-resource",
      RequestCategory::Document => "document",
      RequestCategory::Api => "api",
      RequestCategory::Navigation => "navigation",
      RequestCategory::Other => "other",
    }
  }
}

/// Classifies requests with a fixed, ordered rule set.
#[derive(Debug, Clone)]
pub struct Classifier {
  manifest: Manifest,
}

impl Classifier {
  pub fn new(manifest: Manifest) -> Self {
    Self { manifest }
  }

  /// Only GET over HTTP(S) is intercepted; everything else passes through.
  pub fn intercepts(request: &Request) -> bool {
    request.method == Method::Get && request.is_http()
  }

  /// First matching rule wins; `Other` when none match.
  pub fn classify(&self, request: &Request) -> RequestCategory {
    let url = request.key();
    let url = url.url();

    if self.manifest.contains(&request.url) {
      RequestCategory::StaticAsset
    } else if CDN_PATTERNS.iter().any(|p| p.is_match(url)) {
      RequestCategory::CdnResource
    } else if DOCUMENT_PATTERN.is_match(url) {
      RequestCategory::Document
    } else if is_api(request) {
      RequestCategory::Api
    } else if request.is_navigation() {
      RequestCategory::Navigation
    } else {
      RequestCategory::Other
    }
  }
}

fn is_api(request: &Request) -> bool {
  request.url.path().starts_with("/api/")
    || request
      .url
      .host_str()
      .is_some_and(|host| host.contains("firebase"))
    || API_HOST_PATTERN.is_match(request.url.as_str())
}
