//! Pages the worker controls.

use color_eyre::Result;
use tracing::info;
use url::Url;

/// An open app window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: String,
}

/// The set of pages (clients) the worker can see and control.
pub trait Clients: Send + Sync {
  /// Take control of every open page. Returns how many were claimed.
  fn claim(&self) -> Result<usize>;

  /// Open windows, including ones not yet controlled.
  fn windows(&self) -> Result<Vec<WindowClient>>;

  fn focus(&self, id: &str) -> Result<()>;

  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Clients for a host without pages (the CLI). Opening a window prints the
/// URL for the user to follow.
pub struct HeadlessClients;

impl Clients for HeadlessClients {
  fn claim(&self) -> Result<usize> {
    Ok(0)
  }

  fn windows(&self) -> Result<Vec<WindowClient>> {
    Ok(Vec::new())
  }

  fn focus(&self, id: &str) -> Result<()> {
    info!(client = id, "focus requested");
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    info!(url = %url, "opening app window");
    println!("open {}", url);
    Ok(())
  }
}
