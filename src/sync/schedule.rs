//! Periodic jobs.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::gateway::{Notification, Notifier};

/// Shows a study reminder when the user hasn't studied for a while.
pub struct StudyReminder {
  notifier: Arc<dyn Notifier>,
  app_name: String,
  after: Duration,
}

impl StudyReminder {
  pub fn new(notifier: Arc<dyn Notifier>, app_name: &str, after: Duration) -> Self {
    Self {
      notifier,
      app_name: app_name.to_string(),
      after,
    }
  }

  /// Due when no activity was ever recorded, or the last one is older than the threshold.
  pub fn is_due(&self, last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_activity {
      Some(last) => now - last > self.after,
      None => true,
    }
  }

  /// Returns whether a reminder was shown.
  pub fn run(&self, last_activity: Option<DateTime<Utc>>) -> Result<bool> {
    if !self.is_due(last_activity, Utc::now()) {
      debug!("studied recently, no reminder");
      return Ok(false);
    }
    info!("sending study reminder");
    self
      .notifier
      .show(&Notification::study_reminder(&self.app_name))?;
    Ok(true)
  }
}
