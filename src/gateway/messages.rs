//! Cross-context message protocol.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Commands a page can send to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
  SkipWaiting,
  GetVersion,
  CacheDocument { url: String },
  SyncUserData,
  ClearCache,
  GetCacheSize,
}

/// Replies sent back on the message's reply port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
  Version { version: String },
  CacheSize { size: u64 },
}

const KNOWN_TYPES: &[&str] = &[
  "SKIP_WAITING",
  "GET_VERSION",
  "CACHE_DOCUMENT",
  "SYNC_USER_DATA",
  "CLEAR_CACHE",
  "GET_CACHE_SIZE",
];

/// Parse a raw message.
///
/// Messages without a `type`, or with a type this worker doesn't know, are
/// ignored (`Ok(None)`). A known type with a bad shape is an error.
pub fn parse_message(raw: &str) -> Result<Option<Message>> {
  let value: Value =
    serde_json::from_str(raw).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;

  let Some(kind) = value.get("type").and_then(Value::as_str) else {
    warn!("message without a type, ignoring");
    return Ok(None);
  };

  if !KNOWN_TYPES.contains(&kind) {
    warn!(kind, "unknown message type");
    return Ok(None);
  }

  let kind = kind.to_string();
  serde_json::from_value(value)
    .map(Some)
    .map_err(|e| eyre!("Malformed {} message: {}", kind, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_known_messages() {
    assert_eq!(parse_message(r#"{"type":"GET_VERSION"}"#).unwrap(), Some(Message::GetVersion));
    assert_eq!(
      parse_message(r#"{"type":"CACHE_DOCUMENT","url":"https://x.test/a.pdf"}"#).unwrap(),
      Some(Message::CacheDocument {
        url: "https://x.test/a.pdf".to_string()
      })
    );
    assert_eq!(parse_message(r#"{"type":"CLEAR_CACHE"}"#).unwrap(), Some(Message::ClearCache));
  }

  #[test]
  fn test_unknown_and_untyped_messages_are_ignored() {
    assert_eq!(parse_message(r#"{"type":"SELF_DESTRUCT"}"#).unwrap(), None);
    assert_eq!(parse_message(r#"{"hello":"world"}"#).unwrap(), None);
  }

  #[test]
  fn test_malformed_known_message_is_error() {
    assert!(parse_message(r#"{"type":"CACHE_DOCUMENT"}"#).is_err());
    assert!(parse_message("not json").is_err());
  }

  #[test]
  fn test_reply_wire_format() {
    let version = serde_json::to_value(Reply::Version {
      version: "2.0.0".to_string(),
    })
    .unwrap();
    assert_eq!(version, json!({"type": "VERSION", "version": "2.0.0"}));

    let size = serde_json::to_value(Reply::CacheSize { size: 42 }).unwrap();
    assert_eq!(size, json!({"type": "CACHE_SIZE", "size": 42}));
  }
}
