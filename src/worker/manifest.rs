//! Static-asset manifest pre-fetched at install.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use url::Url;

use crate::http::RequestKey;

/// Assets the app cannot start without. Relative paths resolve against the
/// configured origin.
pub const DEFAULT_MANIFEST: &[&str] = &[
  "./",
  "./index.html",
  "./app.js",
  "./styles.css",
  "./manifest.json",
  // Fonts and icons
  "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700;800;900&family=JetBrains+Mono:wght@400;500;600&display=swap",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
  // Backend SDKs
  "https://www.gstatic.com/firebasejs/10.7.0/firebase-app-compat.js",
  "https://www.gstatic.com/firebasejs/10.7.0/firebase-auth-compat.js",
  "https://www.gstatic.com/firebasejs/10.7.0/firebase-firestore-compat.js",
  "https://www.gstatic.com/firebasejs/10.7.0/firebase-storage-compat.js",
  // Document readers
  "https://cdnjs.cloudflare.com/ajax/libs/pdf.js/3.11.174/pdf.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/pdf.js/3.11.174/pdf.worker.min.js",
  "https://unpkg.com/mammoth@1.6.0/mammoth.browser.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/jszip/3.10.1/jszip.min.js",
  "https://unpkg.com/epubjs@0.3.93/dist/epub.min.js",
  // OCR
  "https://unpkg.com/tesseract.js@v4.1.1/dist/tesseract.min.js",
];

/// Resolved, ordered manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
  entries: Vec<Url>,
  /// Canonical URLs for membership checks
  index: HashSet<String>,
}

impl Manifest {
  /// Resolve `entries` against `origin`.
  pub fn resolve<S: AsRef<str>>(origin: &Url, entries: &[S]) -> Result<Self> {
    let mut resolved = Vec::with_capacity(entries.len());
    let mut index = HashSet::with_capacity(entries.len());

    for entry in entries {
      let entry = entry.as_ref();
      let url = origin
        .join(entry)
        .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;
      if index.insert(RequestKey::for_url(&url).url().to_string()) {
        resolved.push(url);
      }
    }

    Ok(Self {
      entries: resolved,
      index,
    })
  }

  pub fn entries(&self) -> &[Url] {
    &self.entries
  }

  pub fn contains(&self, url: &Url) -> bool {
    self.index.contains(RequestKey::for_url(url).url())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolves_relative_and_absolute_entries() {
    let origin = Url::parse("https://studymate.test/app/").unwrap();
    let manifest = Manifest::resolve(
      &origin,
      &["./", "./index.html", "https://unpkg.com/x.js", "./index.html"],
    )
    .unwrap();

    assert_eq!(manifest.len(), 3);
    assert_eq!(manifest.entries()[0].as_str(), "https://studymate.test/app/");
    assert!(manifest.contains(&Url::parse("https://studymate.test/app/index.html").unwrap()));
    assert!(manifest.contains(&Url::parse("https://studymate.test/app/index.html#top").unwrap()));
    assert!(manifest.contains(&Url::parse("https://unpkg.com/x.js").unwrap()));
    assert!(!manifest.contains(&Url::parse("https://studymate.test/index.html").unwrap()));
  }

  #[test]
  fn test_default_manifest_resolves() {
    let origin = Url::parse("https://studymate.app/").unwrap();
    let manifest = Manifest::resolve(&origin, DEFAULT_MANIFEST).unwrap();
    assert_eq!(manifest.len(), DEFAULT_MANIFEST.len());
  }
}
