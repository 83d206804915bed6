//! In-process multi-user chat engine: membership, command dispatch,
//! outbound batching, and versioned state persistence. The core never
//! speaks XMPP directly — see the [`transport`] module for the
//! [`Client`](transport::Client)/[`Roster`](transport::Roster) seam a
//! concrete transport adapts onto.

pub mod batcher;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod persist;
pub mod transport;

pub use batcher::{BatcherConfig, OutboundBatcher};
pub use engine::{spawn_supervised, ChatEngine};
pub use error::{CommandError, SnapshotError};
pub use model::{Channel, ChannelRecord, User, UserRecord};
pub use persist::{Snapshot, StatePersister};
pub use transport::{Client, InboundMessage, OutboundMessage, Roster, SendError, SubscriptionRequest};
