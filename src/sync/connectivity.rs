//! Host events: connectivity transitions and the periodic schedule.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::triggers::{PERIODIC_DATA_BACKUP, PERIODIC_STUDY_REMINDER};
use crate::config::ScheduleConfig;
use crate::net::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// Events that drive background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
  /// Backend became reachable (or was reachable at startup)
  Restored,
  WentOffline,
  /// A periodic tag is due
  Periodic(&'static str),
}

/// Event source backed by spawned probe and timer tasks.
pub struct HostEvents {
  rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl HostEvents {
  pub fn spawn<B: Backend + 'static>(backend: Arc<B>, schedule: &ScheduleConfig) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Connectivity probe
    {
      let tx = tx.clone();
      let period = secs(schedule.connectivity_interval_secs);
      tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;
        loop {
          ticker.tick().await;
          let now = match backend.probe().await {
            Ok(()) => Connectivity::Online,
            Err(err) => {
              debug!(error = %err, "backend probe failed");
              Connectivity::Offline
            }
          };
          if let Some(event) = transition(last, now) {
            if tx.send(event).is_err() {
              break;
            }
          }
          last = Some(now);
        }
      });
    }

    // Periodic tags; first fire one period after startup
    for (tag, every) in [
      (PERIODIC_DATA_BACKUP, schedule.backup_interval_secs),
      (PERIODIC_STUDY_REMINDER, schedule.reminder_interval_secs),
    ] {
      let tx = tx.clone();
      let period = secs(every);
      tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
          ticker.tick().await;
          if tx.send(HostEvent::Periodic(tag)).is_err() {
            break;
          }
        }
      });
    }

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<HostEvent> {
    self.rx.recv().await
  }
}

fn secs(n: u64) -> Duration {
  Duration::from_secs(n.max(1))
}

/// Event for a connectivity change, if any. Being online at the first probe
/// counts as a restoration so records left from an earlier run get delivered.
pub fn transition(previous: Option<Connectivity>, now: Connectivity) -> Option<HostEvent> {
  match (previous, now) {
    (None | Some(Connectivity::Offline), Connectivity::Online) => Some(HostEvent::Restored),
    (None | Some(Connectivity::Online), Connectivity::Offline) => Some(HostEvent::WentOffline),
    _ => None,
  }
}
