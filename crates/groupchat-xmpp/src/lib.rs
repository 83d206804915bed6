//! Wires `groupchat-core`'s [`Client`](groupchat_core::Client)/
//! [`Roster`](groupchat_core::Roster) traits onto a live XMPP connection.
//! Everything membership- and command-related stays in `groupchat-core`;
//! this crate only knows how to turn an [`groupchat_core::OutboundMessage`]
//! into a stanza and a stanza back into an
//! [`groupchat_core::InboundMessage`].

pub mod client;
pub mod error;
pub mod stanza;

pub use client::{connect, run_receive_loop, InboundStream, XmppClient, XmppHandles, XmppRoster};
pub use error::ConnectionError;
