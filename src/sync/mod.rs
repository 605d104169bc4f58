//! Deferred delivery of user-data mutations made while offline.
//!
//! Records wait in per-queue storage and are drained to the backend when
//! connectivity returns, on an explicit request, or on a periodic schedule.

mod connectivity;
mod queue;
mod schedule;
mod triggers;

pub use connectivity::{HostEvent, HostEvents};
pub use queue::{PendingSyncRecord, QueueName, SyncQueue, SyncStore};
pub use schedule::StudyReminder;
pub use triggers::{standard_triggers, TriggerRegistry};
