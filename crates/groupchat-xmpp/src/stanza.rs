//! Stanza construction and parsing. Kept separate from [`crate::client`] so
//! the wire format can be unit tested without a live connection.

use jid::Jid;
use minidom::Element;
use xmpp_parsers::message::{Body, Message, MessageType};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use groupchat_core::{InboundMessage, OutboundMessage, SubscriptionRequest};

use crate::error::ConnectionError;

/// A plain `<message type="chat">` with a single untagged body.
pub fn build_message_stanza(message: &OutboundMessage) -> Result<Element, ConnectionError> {
    let to: Jid = message
        .to
        .parse()
        .map_err(|error| ConnectionError::TransportError(format!("invalid recipient jid {}: {error}", message.to)))?;
    let mut stanza = Message::new(Some(to));
    stanza.type_ = MessageType::Chat;
    stanza.bodies.insert(String::new(), Body(message.body.clone()));
    Ok(stanza.into())
}

/// `<presence type="subscribed">` sent back to accept a subscription
/// request, per [`groupchat_core::Roster::accept_subscription`]'s
/// unconditional-accept contract.
pub fn build_subscribed_presence(to: Jid) -> Element {
    let mut presence = Presence::new(PresenceType::Subscribed);
    presence.to = Some(to);
    presence.into()
}

/// `None` for anything that doesn't parse as a `<message>` with a sender —
/// the caller logs and drops it rather than treating a malformed stanza as
/// fatal.
pub fn parse_inbound_message(element: &Element) -> Option<InboundMessage> {
    let message = Message::try_from(element.clone()).ok()?;
    let from = message.from?.to_string();
    let is_error = message.type_ == MessageType::Error;
    let body = message
        .bodies
        .get("")
        .or_else(|| message.bodies.values().next())
        .map(|body| body.0.clone());
    Some(InboundMessage { from, body, is_error })
}

/// `None` unless the stanza is a `<presence type="subscribe">` carrying a
/// sender jid.
pub fn parse_subscription_request(element: &Element) -> Option<SubscriptionRequest> {
    let presence = Presence::try_from(element.clone()).ok()?;
    if presence.type_ != PresenceType::Subscribe {
        return None;
    }
    let from = presence.from?.to_string();
    Some(SubscriptionRequest { from })
}
