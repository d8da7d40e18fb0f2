use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::responder::{AutoResponder, CycleSummary};

/// Handle to the background poll task.
pub struct PollerHandle {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl PollerHandle {
    /// Signal the loop and wait for it. A cycle in progress finishes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!("Poller task ended abnormally: {}", e);
        }
    }
}

/// Spawn the poll loop. The first cycle runs immediately.
pub fn spawn_poller(responder: Arc<AutoResponder>, interval: Duration) -> PollerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!("Poller started, checking every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    info!("Poller shutting down");
                    return;
                }
                _ = tick.tick() => {
                    poll_once(&responder).await;
                }
            }
        }
    });

    PollerHandle {
        handle,
        stop: stop_tx,
    }
}

/// One cycle: refresh → process every conversation → persist.
/// Returns `None` when the refresh failed and the cycle was skipped.
pub async fn poll_once(responder: &AutoResponder) -> Option<CycleSummary> {
    info!("Checking for new messages");

    let snapshot = match responder.client().refresh_inbox().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Error syncing inbox: {:#}", e);
            return None;
        }
    };

    info!(
        "Found {} conversations ({} pending)",
        snapshot.len(),
        snapshot.pending.len()
    );

    let mut summary = CycleSummary::default();
    for conversation in snapshot.conversations() {
        let outcome = responder.process_conversation(conversation).await;
        summary.record(outcome);
    }

    responder.persist();

    info!(
        "Cycle done: {} conversations, {} sent, {} skipped, {} failed",
        summary.conversations, summary.sent, summary.skipped, summary.failed
    );
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseRule;
    use crate::dedup::DedupStore;
    use crate::platform::mock::{conversation, message, MockClient};
    use crate::platform::{InboxSnapshot, UserId};
    use crate::rules::ResponseRules;

    fn setup(dir: &tempfile::TempDir) -> (Arc<MockClient>, Arc<AutoResponder>) {
        let client = Arc::new(MockClient::new());
        let rules = ResponseRules::new(
            vec![ResponseRule {
                keyword: "price".to_string(),
                reply: "It's $10".to_string(),
            }],
            "Thanks!",
        );
        let responder = AutoResponder::new(
            client.clone(),
            rules,
            DedupStore::new(),
            dir.path().join("responded.json"),
            dir.path().join("session.json"),
        );
        (client, Arc::new(responder))
    }

    #[tokio::test]
    async fn test_cycle_processes_pending_then_inbox_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        client.push_inbox(InboxSnapshot {
            pending: vec![conversation("p1", vec![message("new", "price?", false)])],
            inbox: vec![
                conversation("i1", vec![message("old", "hey", false)]),
                conversation("i2", vec![message("me", "hi", true)]),
            ],
        });

        let summary = poll_once(&responder).await.unwrap();

        assert_eq!(summary.sent, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            client.sent(),
            vec![
                (UserId::from("new"), "It's $10".to_string()),
                (UserId::from("old"), "Thanks!".to_string()),
            ]
        );
        let saved = DedupStore::load(&dir.path().join("responded.json")).unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_cycle_sends_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        let snapshot = InboxSnapshot {
            pending: Vec::new(),
            inbox: vec![conversation("i1", vec![message("42", "hello", false)])],
        };
        client.push_inbox(snapshot.clone());
        client.push_inbox(snapshot);

        poll_once(&responder).await.unwrap();
        let second = poll_once(&responder).await.unwrap();

        assert_eq!(second.sent, 0);
        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_same_user_in_pending_and_inbox_gets_one_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        client.push_inbox(InboxSnapshot {
            pending: vec![conversation("p1", vec![message("42", "hi", false)])],
            inbox: vec![conversation("i1", vec![message("42", "hi", false)])],
        });

        poll_once(&responder).await.unwrap();
        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        client.push_refresh_error("503 Service Unavailable");

        assert!(poll_once(&responder).await.is_none());
        assert!(client.sent().is_empty());
        assert!(!dir.path().join("responded.json").exists());
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        let snapshot = InboxSnapshot {
            pending: Vec::new(),
            inbox: vec![
                conversation("i1", vec![message("a", "hi", false)]),
                conversation("i2", vec![message("b", "hi", false)]),
            ],
        };
        client.push_inbox(snapshot.clone());
        client.push_inbox(snapshot);
        client.fail_next_sends(1);

        let first = poll_once(&responder).await.unwrap();
        assert_eq!((first.sent, first.failed), (1, 1));

        let second = poll_once(&responder).await.unwrap();
        assert_eq!((second.sent, second.skipped), (1, 1));
        assert_eq!(
            client.sent(),
            vec![
                (UserId::from("b"), "Thanks!".to_string()),
                (UserId::from("a"), "Thanks!".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_spawned_poller_runs_immediately_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        client.push_inbox(InboxSnapshot {
            pending: Vec::new(),
            inbox: vec![conversation("i1", vec![message("42", "hello", false)])],
        });

        let poller = spawn_poller(Arc::clone(&responder), Duration::from_secs(3600));

        for _ in 0..100 {
            if !client.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        poller.stop().await;

        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_first_tick_runs_no_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (client, responder) = setup(&dir);
        client.push_inbox(InboxSnapshot {
            pending: Vec::new(),
            inbox: vec![conversation("i1", vec![message("42", "hello", false)])],
        });

        let poller = spawn_poller(Arc::clone(&responder), Duration::from_secs(3600));
        poller.stop().await;

        assert!(client.sent().is_empty());
        assert!(!dir.path().join("responded.json").exists());
    }
}
