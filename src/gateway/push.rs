//! Push notifications and notification clicks.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

const DEFAULT_ICON: &str = "data:image/svg+xml,<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 96 96\"><circle cx=\"48\" cy=\"48\" r=\"48\" fill=\"%232563eb\"/></svg>";
const DEFAULT_BADGE: &str = "data:image/svg+xml,<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 24 24\"><circle cx=\"12\" cy=\"12\" r=\"12\" fill=\"%232563eb\"/><text x=\"12\" y=\"16\" font-family=\"Arial\" font-size=\"12\" fill=\"white\" text-anchor=\"middle\">S</text></svg>";

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

impl NotificationAction {
  fn new(action: &str, title: &str) -> Self {
    Self {
      action: action.to_string(),
      title: title.to_string(),
      icon: None,
    }
  }
}

/// A notification ready to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  /// Small monochrome image for the status bar
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub badge: Option<String>,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

/// Copy `key` from a push object into `slot` when it holds a string.
fn merge_str(data: &Map<String, Value>, key: &str, slot: &mut String) {
  match data.get(key) {
    Some(Value::String(value)) => *slot = value.clone(),
    Some(other) => warn!(field = key, value = %other, "ignoring push field of unexpected type"),
    None => {}
  }
}

impl Notification {
  /// Defaults used for any field a push payload leaves out.
  pub fn default_push(app_name: &str) -> Self {
    Self {
      title: app_name.to_string(),
      body: "You have a new notification".to_string(),
      icon: DEFAULT_ICON.to_string(),
      badge: Some(DEFAULT_BADGE.to_string()),
      tag: format!("{}-notification", app_name.to_lowercase()),
      require_interaction: false,
      actions: vec![
        NotificationAction::new("open", &format!("Open {}", app_name)),
        NotificationAction::new("dismiss", "Dismiss"),
      ],
    }
  }

  /// Build a notification from a push message body.
  ///
  /// A JSON object overrides the defaults field by field; fields of the wrong
  /// type are skipped. Bytes that aren't a JSON object are shown as plain
  /// text in the body.
  pub fn from_push(app_name: &str, data: Option<&[u8]>) -> Self {
    let mut notification = Self::default_push(app_name);
    let Some(data) = data else {
      return notification;
    };

    let object = match serde_json::from_slice::<Value>(data) {
      Ok(Value::Object(object)) => object,
      Ok(other) => {
        warn!(kind = %other, "push data is not an object, showing it as text");
        notification.body = String::from_utf8_lossy(data).into_owned();
        return notification;
      }
      Err(err) => {
        warn!(error = %err, "failed to parse push data, showing it as text");
        notification.body = String::from_utf8_lossy(data).into_owned();
        return notification;
      }
    };

    merge_str(&object, "title", &mut notification.title);
    merge_str(&object, "body", &mut notification.body);
    merge_str(&object, "icon", &mut notification.icon);
    merge_str(&object, "tag", &mut notification.tag);

    match object.get("badge") {
      Some(Value::String(badge)) => notification.badge = Some(badge.clone()),
      Some(Value::Null) => notification.badge = None,
      Some(other) => warn!(field = "badge", value = %other, "ignoring push field of unexpected type"),
      None => {}
    }

    match object.get("requireInteraction") {
      Some(Value::Bool(flag)) => notification.require_interaction = *flag,
      Some(other) => {
        warn!(field = "requireInteraction", value = %other, "ignoring push field of unexpected type")
      }
      None => {}
    }

    if let Some(actions) = object.get("actions") {
      match serde_json::from_value::<Vec<NotificationAction>>(actions.clone()) {
        Ok(actions) => notification.actions = actions,
        Err(err) => warn!(field = "actions", error = %err, "ignoring malformed push actions"),
      }
    }

    notification
  }

  pub fn study_reminder(app_name: &str) -> Self {
    Self {
      title: "Study Reminder".to_string(),
      body: "Time for your daily study session! Keep your streak alive!".to_string(),
      icon: DEFAULT_ICON.to_string(),
      badge: None,
      tag: "study-reminder".to_string(),
      require_interaction: true,
      actions: vec![
        NotificationAction::new("start-study", &format!("Start Studying in {}", app_name)),
        NotificationAction::new("later", "Remind Later"),
      ],
    }
  }
}

/// Displays notifications.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier for a terminal host: prints the notification.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    println!("[{}] {}", notification.title, notification.body);
    for action in &notification.actions {
      println!("  ({}) {}", action.action, action.title);
    }
    Ok(())
  }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Dismissed,
  /// Focused the existing window with this id
  Focused(String),
  Opened(Url),
}
