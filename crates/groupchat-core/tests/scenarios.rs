//! End-to-end scenarios against a mocked `Client`/`Roster`, zero batching
//! interval. Each test drives a real `ChatEngine` through its public API
//! exactly as the boot shim would, then asserts on what was sent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use groupchat_core::{
    BatcherConfig, ChatEngine, InboundMessage, OutboundBatcher, OutboundMessage, SendError,
    Snapshot, SubscriptionRequest,
};

#[derive(Default)]
struct RecordingClient {
    sent: Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl groupchat_core::Client for RecordingClient {
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

impl RecordingClient {
    /// All message bodies sent to `jid`, in delivery order.
    fn messages_to(&self, jid: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == jid)
            .map(|m| m.body.clone())
            .collect()
    }
}

#[derive(Default)]
struct RecordingRoster {
    accepted: Mutex<Vec<String>>,
}

#[async_trait]
impl groupchat_core::Roster for RecordingRoster {
    async fn accept_subscription(&self, jid: &str) {
        self.accepted.lock().unwrap().push(jid.to_string());
    }
}

struct Harness {
    engine: Arc<ChatEngine>,
    client: Arc<RecordingClient>,
    roster: Arc<RecordingRoster>,
}

impl Harness {
    fn new() -> Self {
        let client = Arc::new(RecordingClient::default());
        let roster = Arc::new(RecordingRoster::default());
        let batcher = OutboundBatcher::new(
            client.clone(),
            BatcherConfig {
                interval: Duration::from_millis(0),
                use_separate_messages: false,
            },
        );
        let engine = ChatEngine::new(batcher, roster.clone());
        engine.spawn_batcher_worker();
        Self {
            engine,
            client,
            roster,
        }
    }

    async fn send(&self, from: &str, body: &str) {
        self.engine.handle_message(InboundMessage {
            from: from.to_string(),
            body: Some(body.to_string()),
            is_error: false,
        });
        self.engine.wait_until_drained().await;
    }
}

#[tokio::test]
async fn subscribe_is_unconditionally_accepted() {
    let h = Harness::new();
    h.engine
        .handle_subscription_request(SubscriptionRequest {
            from: "foo@example.com".to_string(),
        })
        .await;
    assert_eq!(h.roster.accepted.lock().unwrap().as_slice(), ["foo@example.com"]);
}

#[tokio::test]
async fn create_join_chat_part_flow() {
    let h = Harness::new();

    h.send("foo@example.com", "/join #nerds").await;
    assert_eq!(
        h.client.messages_to("foo@example.com"),
        vec![
            "_Created \"#nerds\"._".to_string(),
            "_Joined \"#nerds\" with 1 user total._".to_string(),
        ]
    );

    h.send("bar@example.com", "/join #nerds").await;
    assert_eq!(
        h.client.messages_to("bar@example.com").last().unwrap(),
        "_Joined \"#nerds\" with 2 users total._"
    );
    assert!(h
        .client
        .messages_to("foo@example.com")
        .iter()
        .any(|m| m == "_*bar* <bar@example.com> has joined \"#nerds\"._"));

    h.send("foo@example.com", "hi bar!").await;
    assert!(h
        .client
        .messages_to("bar@example.com")
        .iter()
        .any(|m| m == "*foo*: hi bar!"));
    assert!(!h
        .client
        .messages_to("foo@example.com")
        .iter()
        .any(|m| m == "*foo*: hi bar!"));

    h.send("bar@example.com", "howdy").await;
    assert!(h
        .client
        .messages_to("foo@example.com")
        .iter()
        .any(|m| m == "*bar*: howdy"));

    h.send("foo@example.com", "/part").await;
    assert!(h
        .client
        .messages_to("foo@example.com")
        .iter()
        .any(|m| m == "_Left \"#nerds\"._"));
    assert!(h
        .client
        .messages_to("bar@example.com")
        .iter()
        .any(|m| m == "_*foo* <foo@example.com> has left \"#nerds\"._"));
}

#[tokio::test]
async fn password_protected_channel() {
    let h = Harness::new();

    h.send("foo@example.com", "/join #nerds password").await;
    assert!(h
        .client
        .messages_to("foo@example.com")
        .contains(&"_Created \"#nerds\"._".to_string()));

    h.send("bar@example.com", "/join #nerds").await;
    assert_eq!(
        h.client.messages_to("bar@example.com").last().unwrap(),
        "_Incorrect or missing password for \"#nerds\"._"
    );
    assert!(h.client.messages_to("foo@example.com").len() <= 2);

    h.send("bar@example.com", "/join #nerds password").await;
    assert!(h
        .client
        .messages_to("bar@example.com")
        .iter()
        .any(|m| m.contains("Joined \"#nerds\"")));
    assert!(h
        .client
        .messages_to("foo@example.com")
        .iter()
        .any(|m| m == "_*bar* <bar@example.com> has joined \"#nerds\"._"));
}

#[tokio::test]
async fn alias_uniqueness_is_enforced() {
    let h = Harness::new();
    h.send("foo@example.com", "/join #nerds").await;
    h.send("bar@example.com", "/alias foo").await;
    assert_eq!(
        h.client.messages_to("bar@example.com").last().unwrap(),
        "_Alias \"foo\" already in use by foo@example.com._"
    );
}

#[tokio::test]
async fn scoring_then_scores_listing() {
    let h = Harness::new();
    h.send("foo@example.com", "/join #nerds").await;
    h.send("foo@example.com", "coffee++ because mornings").await;
    let lines = h.client.messages_to("foo@example.com");
    assert!(lines.iter().any(|m| {
        (m.contains("Hooray! coffee -> 1") || m.contains("Yay! coffee -> 1"))
            && m.contains("because mornings")
    }));

    h.send("foo@example.com", "/scores").await;
    assert_eq!(
        h.client.messages_to("foo@example.com").last().unwrap(),
        "Scores for \"#nerds\":\n*coffee*: 1"
    );
}

#[tokio::test]
async fn persistence_round_trip_drops_parted_member_and_empty_channels() {
    let h = Harness::new();
    h.send("foo@example.com", "/join #nerds").await;
    h.send("bar@example.com", "/join #nerds").await;
    h.send("foo@example.com", "/part").await;

    let snapshot = h.engine.snapshot();
    let yaml = snapshot.to_yaml().unwrap();

    let reloaded_snapshot = Snapshot::from_yaml(&yaml).unwrap();
    let client_b = Arc::new(RecordingClient::default());
    let roster_b = Arc::new(RecordingRoster::default());
    let batcher_b = OutboundBatcher::new(client_b, BatcherConfig::default());
    let engine_b = ChatEngine::new(batcher_b, roster_b);
    engine_b.load_snapshot(reloaded_snapshot).unwrap();

    let channel = engine_b.get_channel("#nerds", false).unwrap();
    assert_eq!(channel.name, "#nerds");
    let user = engine_b.get_user("bar@example.com", false).unwrap();
    assert_eq!(user.channel_name.as_deref(), Some("#nerds"));
    assert!(engine_b
        .get_user("foo@example.com", false)
        .unwrap()
        .channel_name
        .is_none());
}
