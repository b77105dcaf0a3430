//! Session surface exposed to extensions (spec §4.3: `sendMessage`,
//! `sendUserMessage`, `appendEntry`, `setSessionName`/`getSessionName`).
//!
//! The host does not own the agent loop — it owns the append-only entry log
//! an extension can read and append to, plus session metadata. Grounded on
//! the teacher's `session.rs`/`session_sqlite.rs` split, trimmed to the
//! entry shapes this host actually needs.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryBase {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub timestamp: String,
}

/// How `sendMessage` should be delivered per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverAs {
    /// Enqueued; triggers exactly one additional agent turn.
    FollowUp,
    /// Appended to the session without triggering a new turn.
    Inline,
}

impl Default for DeliverAs {
    fn default() -> Self {
        Self::Inline
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum SessionMessage {
    User { content: Value, timestamp: Option<String> },
    Assistant { content: Value, timestamp: Option<String> },
    Extension { content: Value, extension_id: String, timestamp: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub message: SessionMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfoEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub custom_type: String,
    pub data: Option<Value>,
}

/// The closed set of entries that can land in a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    Message(MessageEntry),
    SessionInfo(SessionInfoEntry),
    Custom(CustomEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub id: String,
    pub created_at: String,
}

/// Everything an extension can observe or mutate about the host session,
/// through `pi.sendMessage`/`sendUserMessage`/`appendEntry`/set-get name.
/// `ExtensionDispatcher` holds this behind an `Arc<dyn ... + Send + Sync>`
/// so the embedder supplies the concrete session (this host does not run
/// the agent loop itself — spec §1 non-goal).
#[async_trait]
pub trait ExtensionSession {
    async fn get_state(&self) -> Value;
    async fn get_messages(&self) -> Vec<SessionMessage>;
    async fn get_entries(&self) -> Vec<Value>;
    async fn get_branch(&self) -> Vec<Value>;
    async fn set_name(&self, name: String) -> Result<()>;
    async fn append_message(&self, message: SessionMessage) -> Result<()>;
    async fn append_custom_entry(&self, custom_type: String, data: Option<Value>) -> Result<()>;
}

/// In-process default for embedders that don't supply their own session
/// store: keeps the append-only entry log and name in memory, lost on
/// process exit. Good enough for the CLI's `load`/`replay-event` commands
/// and for conformance runs; a real embedder overrides this with a session
/// backed by its own persistence.
#[derive(Default)]
pub struct InMemorySession {
    entries: Mutex<Vec<SessionEntry>>,
    name: Mutex<Option<String>>,
}

impl InMemorySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: SessionEntry) {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(entry);
    }
}

#[async_trait]
impl ExtensionSession for InMemorySession {
    async fn get_state(&self) -> Value {
        serde_json::json!({ "name": *self.name.lock().unwrap_or_else(std::sync::PoisonError::into_inner) })
    }

    async fn get_messages(&self) -> Vec<SessionMessage> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter_map(|entry| match entry {
                SessionEntry::Message(m) => Some(m.message.clone()),
                _ => None,
            })
            .collect()
    }

    async fn get_entries(&self) -> Vec<Value> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter_map(|entry| serde_json::to_value(entry).ok())
            .collect()
    }

    async fn get_branch(&self) -> Vec<Value> {
        self.get_entries().await
    }

    async fn set_name(&self, name: String) -> Result<()> {
        *self.name.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(name.clone());
        self.push(SessionEntry::SessionInfo(SessionInfoEntry {
            base: EntryBase { id: None, parent_id: None, timestamp: String::new() },
            name: Some(name),
        }));
        Ok(())
    }

    async fn append_message(&self, message: SessionMessage) -> Result<()> {
        self.push(SessionEntry::Message(MessageEntry {
            base: EntryBase { id: None, parent_id: None, timestamp: String::new() },
            message,
        }));
        Ok(())
    }

    async fn append_custom_entry(&self, custom_type: String, data: Option<Value>) -> Result<()> {
        self.push(SessionEntry::Custom(CustomEntry {
            base: EntryBase { id: None, parent_id: None, timestamp: String::new() },
            custom_type,
            data,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_as_defaults_to_inline() {
        assert_eq!(DeliverAs::default(), DeliverAs::Inline);
    }

    #[test]
    fn session_entry_round_trips_through_json() {
        let entry = SessionEntry::SessionInfo(SessionInfoEntry {
            base: EntryBase {
                id: Some("e1".to_string()),
                parent_id: None,
                timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            },
            name: Some("demo".to_string()),
        });
        let json = serde_json::to_string(&entry).expect("serialize");
        let back: SessionEntry = serde_json::from_str(&json).expect("deserialize");
        match back {
            SessionEntry::SessionInfo(info) => assert_eq!(info.name.as_deref(), Some("demo")),
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn in_memory_session_records_messages_and_name() {
        let session = InMemorySession::new();
        session.set_name("demo".to_string()).await.expect("set_name");
        session
            .append_message(SessionMessage::Extension {
                content: serde_json::json!({"text": "hi"}),
                extension_id: "demo".to_string(),
                timestamp: None,
            })
            .await
            .expect("append_message");
        session
            .append_custom_entry("note".to_string(), Some(serde_json::json!({"k": "v"})))
            .await
            .expect("append_custom_entry");

        assert_eq!(session.get_messages().await.len(), 1);
        assert_eq!(session.get_entries().await.len(), 3);
        assert_eq!(session.get_state().await["name"], "demo");
    }
}
