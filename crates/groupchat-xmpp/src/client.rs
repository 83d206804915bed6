//! The live connection: a [`tokio_xmpp::AsyncClient`] split into a send
//! half, shared by [`XmppClient`] and [`XmppRoster`] behind one lock, and a
//! receive half driven by [`run_receive_loop`] for the process lifetime.
//!
//! Unlike [`groupchat_core::OutboundBatcher`]'s state mutex, the lock here
//! legitimately guards an `.await` — a stanza write is a network call, not
//! a map mutation — so it stays a [`tokio::sync::Mutex`] rather than the
//! blocking kind.
//!
//! This crate's stack is `tokio-xmpp`'s stanza-level `AsyncClient`/`Event`,
//! not the teacher's byte-level `XmppTransport` trait in
//! `crates/xmpp/src/transport.rs` (native/web backends framing stanzas by
//! hand over a raw `send`/`recv`/`close` surface, with `connection.rs` and
//! `sasl.rs` handling negotiation and authentication underneath it) — that
//! architecture has no counterpart here since this crate only ever runs
//! against one native backend. What *is* grounded on that module: its
//! `connect_timeout` wrapping (here, [`connect`] taking a `timeout` and
//! racing the first stream event against it) and its
//! `map_starttls_error`-style keyword classification of opaque transport
//! errors into a typed taxonomy (here, [`classify_stream_error`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use jid::Jid;
use minidom::Element;
use tokio::sync::Mutex as AsyncMutex;
use tokio_xmpp::{AsyncClient as RawClient, Event as RawEvent};
use tracing::{debug, info, warn};

use groupchat_core::{
    ChatEngine, Client as CoreClient, OutboundMessage, Roster as CoreRoster, SendError,
};

use crate::error::ConnectionError;
use crate::stanza::{build_message_stanza, build_subscribed_presence, parse_inbound_message, parse_subscription_request};

type Sink = SplitSink<RawClient, Element>;

pub struct XmppClient {
    sink: Arc<AsyncMutex<Sink>>,
}

#[async_trait]
impl CoreClient for XmppClient {
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        let stanza = build_message_stanza(&message).map_err(|error| SendError(error.to_string()))?;
        self.sink
            .lock()
            .await
            .send(stanza)
            .await
            .map_err(|error| SendError(error.to_string()))
    }
}

/// Shares the same sink as [`XmppClient`] — accepting a subscription is
/// just another stanza write, not a separate channel to the server.
pub struct XmppRoster {
    sink: Arc<AsyncMutex<Sink>>,
}

#[async_trait]
impl CoreRoster for XmppRoster {
    async fn accept_subscription(&self, jid: &str) {
        let to: Jid = match jid.parse() {
            Ok(jid) => jid,
            Err(error) => {
                warn!(jid, %error, "cannot accept subscription, invalid jid");
                return;
            }
        };
        let presence = build_subscribed_presence(to);
        if let Err(error) = self.sink.lock().await.send(presence).await {
            warn!(jid, %error, "failed to send subscribed presence");
        }
    }
}

pub struct XmppHandles {
    pub client: Arc<XmppClient>,
    pub roster: Arc<XmppRoster>,
}

/// The receive half returned by [`connect`]. Must be driven by
/// [`run_receive_loop`] for the process lifetime.
pub type InboundStream = SplitStream<RawClient>;

/// Connects and authenticates, then splits the stream. Waits up to
/// `timeout` for the stream to report itself online before giving up,
/// mirroring the teacher's `connect_timeout`. The returned receive half
/// must be driven by [`run_receive_loop`] for stanzas to actually flow;
/// the send half is already live once this returns.
pub async fn connect(jid: &str, password: &str, timeout: Duration) -> Result<(XmppHandles, InboundStream), ConnectionError> {
    let bare: Jid = jid
        .parse()
        .map_err(|error| ConnectionError::TransportError(format!("invalid account jid {jid}: {error}")))?;
    let raw = RawClient::new(bare, password.to_string())
        .map_err(|error| ConnectionError::TransportError(error.to_string()))?;
    let (sink, mut stream) = raw.split();

    wait_for_online(&mut stream, timeout).await?;

    let sink = Arc::new(AsyncMutex::new(sink));
    let handles = XmppHandles {
        client: Arc::new(XmppClient { sink: sink.clone() }),
        roster: Arc::new(XmppRoster { sink }),
    };
    Ok((handles, stream))
}

/// Drives the stream until it reports `Online`, classifying a disconnect
/// instead, or until `timeout` elapses overall. A stanza delivered before
/// the `Online` marker (the server can route one ahead of it) is not a
/// substitute for being online — it's also not ours to forward yet, since
/// [`run_receive_loop`] isn't driving the stream until this returns, so it
/// is logged and dropped rather than either silently discarded as
/// "connected" or causing a panic.
async fn wait_for_online(stream: &mut InboundStream, timeout: Duration) -> Result<(), ConnectionError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(ConnectionError::Timeout),
            Ok(None) => return Err(ConnectionError::StreamError("stream closed before coming online".into())),
            Ok(Some(RawEvent::Online { .. })) => return Ok(()),
            Ok(Some(RawEvent::Disconnected(error))) => return Err(classify_stream_error(&error.to_string())),
            Ok(Some(RawEvent::Stanza(element))) => {
                warn!(stanza = element.name(), "dropping stanza received before stream came online");
            }
        }
    }
}

/// Classifies an opaque `tokio-xmpp` disconnect reason into a typed
/// variant by keyword, the same way the teacher's `map_starttls_error`
/// turns a raw TLS/IO error string into a connect-retry decision.
fn classify_stream_error(message: &str) -> ConnectionError {
    let lower = message.to_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("no such host") {
        ConnectionError::DnsResolutionFailed(message.to_string())
    } else if lower.contains("tls") || lower.contains("certificate") || lower.contains("starttls") {
        ConnectionError::TlsHandshakeFailed(message.to_string())
    } else if lower.contains("auth") || lower.contains("sasl") || lower.contains("credentials") {
        ConnectionError::AuthenticationFailed(message.to_string())
    } else {
        ConnectionError::StreamError(message.to_string())
    }
}

/// Runs for the process lifetime, forwarding inbound stanzas into
/// `engine`. Returns when the stream ends so the supervised-spawn policy
/// in [`groupchat_core::spawn_supervised`] can crash the process for a
/// restart rather than silently stop receiving.
pub async fn run_receive_loop(mut stream: InboundStream, engine: Arc<ChatEngine>) {
    while let Some(event) = stream.next().await {
        match event {
            RawEvent::Online { .. } => info!("xmpp stream online"),
            RawEvent::Disconnected(error) => {
                warn!(%error, "xmpp stream disconnected");
                return;
            }
            RawEvent::Stanza(element) => handle_stanza(&element, &engine).await,
        }
    }
}

async fn handle_stanza(element: &Element, engine: &Arc<ChatEngine>) {
    match element.name() {
        "message" => {
            if let Some(message) = parse_inbound_message(element) {
                engine.handle_message(message);
            }
        }
        "presence" => {
            if let Some(request) = parse_subscription_request(element) {
                engine.handle_subscription_request(request).await;
            }
        }
        other => debug!(stanza = other, "ignoring unhandled stanza"),
    }
}
