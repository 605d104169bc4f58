//! Request and response values that flow through the worker.
//!
//! These are deliberately small: the worker only needs the method, URL, fetch
//! mode and a handful of headers to classify a request, and a status, headers
//! and body bytes to cache a response.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Fetch mode of a request, as reported by the page that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  #[default]
  Cors,
  /// Top-level page navigation
  Navigate,
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  /// Header names are stored lowercased
  headers: BTreeMap<String, String>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::default(),
      headers: BTreeMap::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self::get(url)
      .with_mode(RequestMode::Navigate)
      .with_header("accept", "text/html,application/xhtml+xml")
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
    self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  /// Whether this request loads a page: navigate mode, or a GET that accepts HTML.
  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
      || (self.method == Method::Get
        && self
          .header("accept")
          .is_some_and(|accept| accept.contains("text/html")))
  }

  /// Cache identity of this request.
  pub fn key(&self) -> RequestKey {
    RequestKey::for_url(&self.url)
  }
}

/// Canonical cache identity of a request URL.
///
/// The fragment never reaches the server, so it is dropped. Header-dependent
/// identity (the `Vary` part) is checked separately when an entry is matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  url: String,
  hash: String,
}

impl RequestKey {
  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { url, hash }
  }

  pub fn from_parts(url: String, hash: String) -> Self {
    Self { url, hash }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.url)
  }
}

/// A response produced by the network, the cache, or the worker itself.
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

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.push((name.to_ascii_lowercase(), value.into()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[allow(dead_code)]
  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  /// Header names listed in `Vary`, lowercased.
  pub fn vary(&self) -> Vec<String> {
    self
      .header("vary")
      .map(|v| {
        v.split(',')
          .map(|name| name.trim().to_ascii_lowercase())
          .filter(|name| !name.is_empty())
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn size(&self) -> u64 {
    self.body.len() as u64
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_navigation_detection() {
    assert!(Request::navigate(url("https://studymate.test/")).is_navigation());

    let html = Request::get(url("https://studymate.test/notes")).with_header("Accept", "text/html");
    assert!(html.is_navigation());

    let script = Request::get(url("https://studymate.test/app.js")).with_header("accept", "*/*");
    assert!(!script.is_navigation());

    let post = Request::new(Method::Post, url("https://studymate.test/"))
      .with_header("accept", "text/html");
    assert!(!post.is_navigation());
  }

  #[test]
  fn test_key_ignores_fragment() {
    let a = RequestKey::for_url(&url("https://studymate.test/index.html#notes"));
    let b = RequestKey::for_url(&url("https://studymate.test/index.html"));
    assert_eq!(a, b);
    assert_eq!(a.hash().len(), 64);
  }

  #[test]
  fn test_key_distinguishes_query() {
    let a = RequestKey::for_url(&url("https://studymate.test/doc.pdf?v=1"));
    let b = RequestKey::for_url(&url("https://studymate.test/doc.pdf?v=2"));
    assert_ne!(a, b);
  }

  #[test]
  fn test_vary_parsing() {
    let response = Response::new(200, "x").with_header("Vary", "Accept-Encoding, Accept-Language");
    assert_eq!(response.vary(), vec!["accept-encoding", "accept-language"]);
    assert!(Response::new(200, "x").vary().is_empty());
  }

  #[test]
  fn test_method_parse() {
    assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
    assert!("BREW".parse::<Method>().is_err());
  }
}
