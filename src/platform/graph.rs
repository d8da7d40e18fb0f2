use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::AccountConfig;
use crate::platform::{Conversation, InboxMessage, InboxSnapshot, MessagingClient, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONVERSATION_FIELDS: &str =
    "id,participants{id,username,name},messages{id,from,message,created_time}";

/// Persisted session blob. Only this client reads or writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountSession {
    account_id: String,
    #[serde(default)]
    username: Option<String>,
    logged_in_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ThreadJson {
    id: String,
    #[serde(default)]
    participants: Option<Page<ParticipantJson>>,
    #[serde(default)]
    messages: Option<Page<MessageJson>>,
}

#[derive(Debug, Deserialize)]
struct ParticipantJson {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageJson {
    from: ParticipantJson,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    recipient: Recipient<'a>,
    message: MessageBody<'a>,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    text: &'a str,
}

/// Graph API threads list newest message first; `Conversation` wants oldest first.
fn into_conversation(thread: ThreadJson, account_id: &str) -> Conversation {
    let peer_name = thread.participants.and_then(|p| {
        p.data
            .into_iter()
            .find(|participant| participant.id != account_id)
            .and_then(|participant| participant.username.or(participant.name))
    });

    let mut messages: Vec<InboxMessage> = thread
        .messages
        .map(|page| page.data)
        .unwrap_or_default()
        .into_iter()
        .map(|m| InboxMessage {
            from_self: m.from.id == account_id,
            sender_id: UserId(m.from.id),
            text: m.message,
        })
        .collect();
    messages.reverse();

    Conversation {
        id: thread.id,
        peer_name,
        messages,
    }
}

/// Messaging client backed by the platform's Graph API
pub struct GraphClient {
    client: reqwest::Client,
    config: AccountConfig,
    session: RwLock<Option<AccountSession>>,
}

impl GraphClient {
    pub fn new(config: AccountConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            config,
            session: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn account_id(&self) -> Result<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.account_id.clone())
            .context("Not signed in: no active session")
    }

    async fn fetch_folder(&self, account_id: &str, folder: &str) -> Result<Vec<Conversation>> {
        let url = self.url(&format!("{}/conversations", account_id));

        debug!("Fetching {} conversations", folder);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("platform", "instagram"),
                ("folder", folder),
                ("fields", CONVERSATION_FIELDS),
                ("access_token", self.config.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to fetch {} conversations", folder))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Conversations API error ({}): {}", status, error_body);
        }

        let page: Page<ThreadJson> = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse conversations response")?;

        Ok(page
            .data
            .into_iter()
            .map(|thread| into_conversation(thread, account_id))
            .collect())
    }
}

#[async_trait]
impl MessagingClient for GraphClient {
    async fn refresh_inbox(&self) -> Result<InboxSnapshot> {
        let account_id = self.account_id().await?;

        // A pending-folder failure only drops first-contact threads for this cycle.
        let pending = match self.fetch_folder(&account_id, "pending").await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Error syncing pending inbox: {:#}", e);
                Vec::new()
            }
        };

        let inbox = self.fetch_folder(&account_id, "inbox").await?;

        Ok(InboxSnapshot { pending, inbox })
    }

    async fn send_message(&self, recipient: &UserId, text: &str) -> Result<()> {
        let request = SendRequest {
            recipient: Recipient {
                id: recipient.as_str(),
            },
            message: MessageBody { text },
        };

        let response = self
            .client
            .post(self.url("me/messages"))
            .query(&[("access_token", self.config.access_token.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send message")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Send API error ({}): {}", status, error_body);
        }

        Ok(())
    }

    async fn login(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("me"))
            .query(&[
                ("fields", "id,username"),
                ("access_token", self.config.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to reach account endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Login failed ({}): {}", status, error_body);
        }

        let me: MeResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse account response")?;

        info!(
            "Signed in as {} ({})",
            me.username
                .as_deref()
                .or(self.config.username.as_deref())
                .unwrap_or("unknown"),
            me.id
        );

        *self.session.write().await = Some(AccountSession {
            account_id: me.id,
            username: me.username,
            logged_in_at: Utc::now(),
        });
        Ok(())
    }

    async fn import_session(&self, path: &Path) -> Result<()> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        let session: AccountSession = serde_json::from_str(&data)
            .with_context(|| format!("Malformed session file: {}", path.display()))?;

        info!(
            "Imported session for account {} (signed in {})",
            session.account_id, session.logged_in_at
        );
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn export_session(&self, path: &Path) -> Result<()> {
        let data = {
            let session = self.session.read().await;
            let session = session.as_ref().context("No session to export")?;
            serde_json::to_string_pretty(session).context("Failed to serialize session")?
        };
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;
        debug!("Session exported to {}", path.display());
        Ok(())
    }
}
