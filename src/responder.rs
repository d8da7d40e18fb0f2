use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dedup::{DedupStore, Reserve};
use crate::platform::{Conversation, InboundEvent, MessagingClient, UserId};
use crate::rules::ResponseRules;

/// What happened to a single candidate reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Sent,
    AlreadyReplied,
    /// Another task is replying to the same user right now.
    InFlight,
    NoInboundMessage,
    SendFailed,
}

/// Per-cycle tally, logged by the poller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub conversations: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CycleSummary {
    pub fn record(&mut self, outcome: ReplyOutcome) {
        self.conversations += 1;
        match outcome {
            ReplyOutcome::Sent => self.sent += 1,
            ReplyOutcome::SendFailed => self.failed += 1,
            ReplyOutcome::AlreadyReplied
            | ReplyOutcome::InFlight
            | ReplyOutcome::NoInboundMessage => self.skipped += 1,
        }
    }
}

/// The stateful auto-responder shared by the poller and the webhook.
/// Replies at most once per user, ever.
pub struct AutoResponder {
    client: Arc<dyn MessagingClient>,
    rules: ResponseRules,
    dedup: DedupStore,
    dedup_path: PathBuf,
    session_path: PathBuf,
}

impl AutoResponder {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        rules: ResponseRules,
        dedup: DedupStore,
        dedup_path: PathBuf,
        session_path: PathBuf,
    ) -> Self {
        Self {
            client,
            rules,
            dedup,
            dedup_path,
            session_path,
        }
    }

    /// Build from config, loading the persisted dedup snapshot.
    pub fn from_config(client: Arc<dyn MessagingClient>, config: &Config) -> Self {
        let dedup = DedupStore::load_or_quarantine(&config.storage.responded_users_path);
        if dedup.is_empty() {
            info!("No previously answered users, starting fresh");
        } else {
            info!(
                "Loaded {} previously answered users from {}",
                dedup.len(),
                config.storage.responded_users_path.display()
            );
        }
        Self::new(
            client,
            ResponseRules::from_config(&config.responses),
            dedup,
            config.storage.responded_users_path.clone(),
            config.storage.session_path.clone(),
        )
    }

    pub fn client(&self) -> &Arc<dyn MessagingClient> {
        &self.client
    }

    #[cfg(test)]
    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Reply to the latest non-bot message of a thread if its sender has
    /// never been answered.
    pub async fn process_conversation(&self, conversation: &Conversation) -> ReplyOutcome {
        let Some(latest) = conversation.latest_inbound() else {
            debug!("Conversation {} has no inbound messages", conversation.id);
            return ReplyOutcome::NoInboundMessage;
        };

        debug!(
            "Processing conversation {} with {} ({})",
            conversation.id,
            conversation.peer_name.as_deref().unwrap_or("unknown"),
            latest.sender_id
        );

        self.reply_once(&latest.sender_id, &latest.text).await
    }

    /// Webhook path: same rules and dedup as polling. A successful reply is
    /// persisted right away since no cycle follows it.
    pub async fn handle_inbound(&self, event: &InboundEvent) -> ReplyOutcome {
        let outcome = self.reply_once(&event.sender_id, &event.text).await;
        if outcome == ReplyOutcome::Sent {
            self.persist();
        }
        outcome
    }

    async fn reply_once(&self, user: &UserId, text: &str) -> ReplyOutcome {
        let reservation = match self.dedup.try_reserve(user) {
            Reserve::Reserved(reservation) => reservation,
            Reserve::AlreadyReplied => {
                debug!("User {} already received an auto-reply", user);
                return ReplyOutcome::AlreadyReplied;
            }
            Reserve::InFlight => {
                debug!("Reply to user {} already in progress", user);
                return ReplyOutcome::InFlight;
            }
        };

        let reply = self.rules.select(text);

        match self.client.send_message(user, reply).await {
            Ok(()) => {
                reservation.commit();
                info!("Sent auto-reply to {}: {}", user, reply);
                ReplyOutcome::Sent
            }
            Err(e) => {
                // Left unmarked so the next cycle retries.
                warn!("Error sending response to {}: {:#}", user, e);
                ReplyOutcome::SendFailed
            }
        }
    }

    /// Flush the dedup store. Failures are logged; the next flush retries.
    pub fn persist(&self) {
        if let Err(e) = self.dedup.save(&self.dedup_path) {
            error!("Error saving responded users: {:#}", e);
        }
    }

    /// Shutdown hook: flush state and export the client session.
    pub async fn cleanup(&self) {
        if let Err(e) = self.client.export_session(&self.session_path).await {
            warn!("Failed to export session during cleanup: {:#}", e);
        }
        self.persist();
        info!("Bot cleanup completed ({} users answered)", self.dedup.len());
    }
}
