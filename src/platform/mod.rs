pub mod graph;

use std::fmt;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Platform-assigned user identifier. Numeric ids are carried as their
/// decimal string so both id styles share one key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// A single message inside a conversation thread
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub sender_id: UserId,
    pub text: String,
    /// True when the bot's own account sent it.
    pub from_self: bool,
}

/// Read-only view of a thread. `messages` is ordered oldest → newest.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    /// Display name of the other participant, if the platform reported one
    pub peer_name: Option<String>,
    pub messages: Vec<InboxMessage>,
}

impl Conversation {
    /// Latest message not sent by the bot.
    pub fn latest_inbound(&self) -> Option<&InboxMessage> {
        self.messages.iter().rev().find(|m| !m.from_self)
    }
}

/// Result of one inbox refresh. The platform keeps first-contact requests
/// in a separate pending folder from established threads.
#[derive(Debug, Clone, Default)]
pub struct InboxSnapshot {
    pub pending: Vec<Conversation>,
    pub inbox: Vec<Conversation>,
}

impl InboxSnapshot {
    /// Pending threads first, then the regular inbox.
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.pending.iter().chain(self.inbox.iter())
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.inbox.len()
    }
}

/// A message delivered by webhook push
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sender_id: UserId,
    pub text: String,
}

/// Session and transport boundary of the messaging platform.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Fetch the current pending and regular inbox.
    async fn refresh_inbox(&self) -> Result<InboxSnapshot>;

    async fn send_message(&self, recipient: &UserId, text: &str) -> Result<()>;

    /// Establish a fresh session from configured credentials.
    async fn login(&self) -> Result<()>;

    async fn import_session(&self, path: &Path) -> Result<()>;

    async fn export_session(&self, path: &Path) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::mock::{conversation, message};
    use super::*;

    #[test]
    fn test_latest_inbound_skips_own_messages() {
        let conv = conversation(
            "t1",
            vec![
                message("42", "first", false),
                message("42", "second", false),
                message("me", "bot reply", true),
            ],
        );
        assert_eq!(conv.latest_inbound().unwrap().text, "second");
    }

    #[test]
    fn test_latest_inbound_none_when_only_bot() {
        let conv = conversation("t1", vec![message("me", "hi", true)]);
        assert!(conv.latest_inbound().is_none());
        assert!(conversation("t2", Vec::new()).latest_inbound().is_none());
    }

    #[test]
    fn test_snapshot_orders_pending_first() {
        let snapshot = InboxSnapshot {
            pending: vec![conversation("p1", Vec::new())],
            inbox: vec![conversation("i1", Vec::new()), conversation("i2", Vec::new())],
        };
        let ids: Vec<&str> = snapshot.conversations().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "i1", "i2"]);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let id = UserId::from(1234567_i64);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1234567\"");
    }
}
