//! Versioned cache generations.

/// A versioned set of cache stores, superseded wholesale on update.
///
/// Each generation owns a "current" store (pre-populated from the asset
/// manifest at install) and a "dynamic" store (filled at runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  prefix: String,
  version: String,
}

impl CacheGeneration {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn current_store(&self) -> String {
    format!("{}-v{}", self.prefix, self.version)
  }

  pub fn dynamic_store(&self) -> String {
    format!("{}-dynamic-v{}", self.prefix, self.version)
  }

  /// Whether `store` belongs to this generation. Anything else is condemned
  /// once this generation activates.
  pub fn owns(&self, store: &str) -> bool {
    store == self.current_store() || store == self.dynamic_store()
  }
}
