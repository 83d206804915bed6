//! The abstract `Client` and `Roster` collaborators.
//!
//! The core never speaks XMPP directly — it sends and receives these plain
//! structs through the traits below. A concrete implementation (the
//! `groupchat-xmpp` crate) adapts them onto a real transport; tests use
//! hand-rolled recording structs (see `tests/scenarios.rs`) in place of
//! either.

use async_trait::async_trait;

/// A chat-type message stanza the core wants delivered. The only stanza
/// shape the core produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub body: String,
}

/// An inbound message stanza, already stripped of everything the core
/// doesn't need. `from` may still carry a `/resource` suffix — normalization
/// happens in `ChatEngine::handle_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub body: Option<String>,
    pub is_error: bool,
}

/// A roster subscription request. Unconditionally accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub from: String,
}

/// A send failure, as reported back to the batcher. Logged and dropped —
/// never blocks or retries the worker.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SendError(pub String);

/// Injected message transport.
#[async_trait]
pub trait Client: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError>;
}

/// Injected roster collaborator. No access control — every subscription
/// request is accepted.
#[async_trait]
pub trait Roster: Send + Sync {
    async fn accept_subscription(&self, jid: &str);
}
