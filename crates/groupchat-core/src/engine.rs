//! The chat engine: owns the membership model, the state mutex, and the
//! wiring into the injected [`Client`]/[`Roster`] and the [`OutboundBatcher`].

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::batcher::OutboundBatcher;
use crate::dispatcher::CommandDispatcher;
use crate::model::{is_valid_nick, Channel, ChannelRecord, User, UserRecord};
use crate::transport::{InboundMessage, Roster, SubscriptionRequest};

/// Everything the state mutex guards: the membership model plus the
/// monotonic version counters. Never held across an `.await`.
pub struct EngineState {
    pub(crate) users: indexmap::IndexMap<String, User>,
    pub(crate) channels: indexmap::IndexMap<String, Channel>,
    pub(crate) current_version: u64,
    pub(crate) saved_version: u64,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            users: indexmap::IndexMap::new(),
            channels: indexmap::IndexMap::new(),
            current_version: 0,
            saved_version: 0,
        }
    }
}

impl EngineState {
    pub fn user(&self, jid: &str) -> Option<&User> {
        self.users.get(jid)
    }

    pub fn user_mut(&mut self, jid: &str) -> Option<&mut User> {
        self.users.get_mut(jid)
    }

    pub fn user_with_nick(&self, nick: &str) -> Option<&User> {
        self.users.values().find(|u| u.nick == nick)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    /// Looks up `jid`, creating it (with an invented nick) if absent.
    /// Creation bumps the version counter.
    pub fn ensure_user(&mut self, jid: &str) -> &mut User {
        if !self.users.contains_key(jid) {
            let nick = self.invent_nick(jid);
            self.users.insert(jid.to_string(), User::new(jid, nick));
            self.current_version += 1;
        }
        self.users
            .get_mut(jid)
            .expect("just inserted or already present")
    }

    pub fn create_channel(&mut self, name: &str, password: Option<String>) {
        self.channels
            .insert(name.to_string(), Channel::new(name, password));
        self.current_version += 1;
    }

    /// No-op, without bumping the version, if the channel still has
    /// members or does not exist.
    pub fn delete_channel_if_empty(&mut self, name: &str) {
        let empty = self.channels.get(name).is_some_and(Channel::is_empty);
        if empty {
            self.channels.shift_remove(name);
            self.current_version += 1;
        }
    }

    /// The single primitive that keeps `user.channel` and `channel.users` in
    /// sync: leaves the previous channel (if any), joins the new one (if
    /// any), and bumps the version once. A no-op if `new_channel` is already
    /// current.
    pub fn move_user_to_channel(&mut self, jid: &str, new_channel: Option<String>) {
        let previous = self.users.get(jid).and_then(|u| u.channel.clone());
        if previous == new_channel {
            return;
        }
        if let Some(prev_name) = &previous {
            if let Some(channel) = self.channels.get_mut(prev_name) {
                channel.remove_user(jid);
            }
        }
        if let Some(new_name) = &new_channel {
            if let Some(channel) = self.channels.get_mut(new_name) {
                channel.add_user(jid);
            }
        }
        if let Some(user) = self.users.get_mut(jid) {
            user.channel = new_channel;
        }
        self.current_version += 1;
    }

    pub fn bump_version(&mut self) {
        self.current_version += 1;
    }

    /// Derives an initial nick from the localpart of `jid`. Falls back to
    /// the full jid if the localpart fails the nick regex, then appends the
    /// smallest integer in `[2, 100)` needed to make it unique; if every
    /// suffix in that range is taken, falls back to the full jid.
    pub fn invent_nick(&self, jid: &str) -> String {
        let localpart = jid.split('@').next().unwrap_or(jid);
        let base = if is_valid_nick(localpart) {
            localpart.to_string()
        } else {
            jid.to_string()
        };
        if self.user_with_nick(&base).is_none() {
            return base;
        }
        for suffix in 2..100 {
            let candidate = format!("{base}{suffix}");
            if self.user_with_nick(&candidate).is_none() {
                return candidate;
            }
        }
        jid.to_string()
    }

    pub fn user_record(&self, jid: &str) -> Option<UserRecord> {
        self.user(jid).map(User::to_record)
    }

    pub fn channel_record(&self, name: &str) -> Option<ChannelRecord> {
        self.channel(name).map(Channel::to_record)
    }
}

/// Strips a `/resource` suffix, leaving the bare `localpart@domain`.
pub fn normalize_jid(full: &str) -> String {
    full.split('/').next().unwrap_or(full).to_string()
}

pub struct ChatEngine {
    pub(crate) state: Mutex<EngineState>,
    pub(crate) dispatcher: CommandDispatcher,
    pub(crate) batcher: Arc<OutboundBatcher>,
    roster: Arc<dyn Roster>,
    /// Signaled whenever a locked mutation increases `current_version`;
    /// the persister's analogue of the version condition variable.
    pub(crate) version_notify: Notify,
}

impl ChatEngine {
    pub fn new(batcher: Arc<OutboundBatcher>, roster: Arc<dyn Roster>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState::default()),
            dispatcher: CommandDispatcher::new(),
            batcher,
            roster,
            version_notify: Notify::new(),
        })
    }

    /// No access control: every subscription request is accepted.
    pub async fn handle_subscription_request(&self, request: SubscriptionRequest) {
        self.roster.accept_subscription(&request.from).await;
    }

    /// Drops error-type stanzas and bodyless messages. Otherwise normalizes
    /// `from`, looks up or creates the user, and dispatches. Blocks only
    /// briefly: a lock, a handful of map operations, and a non-blocking
    /// batcher enqueue.
    pub fn handle_message(&self, message: InboundMessage) {
        if message.is_error {
            return;
        }
        let Some(body) = message.body else {
            return;
        };
        let jid = normalize_jid(&message.from);

        let (outbound, version_increased) = {
            let mut state = self.state.lock().unwrap();
            let before = state.current_version;
            state.ensure_user(&jid);
            let outbound = self.dispatcher.dispatch(&mut state, &jid, &body);
            (outbound, state.current_version > before)
        };

        for (to, text) in outbound {
            self.batcher.enqueue(to, text);
        }
        if version_increased {
            debug!(jid, "state mutated, waking persister");
            self.version_notify.notify_waiters();
        }
    }

    pub fn get_user(&self, jid: &str, create: bool) -> Option<UserRecord> {
        let mut state = self.state.lock().unwrap();
        if create {
            let record = state.ensure_user(jid).to_record();
            drop(state);
            self.version_notify.notify_waiters();
            return Some(record);
        }
        state.user_record(jid)
    }

    pub fn get_channel(&self, name: &str, create: bool) -> Option<ChannelRecord> {
        let mut state = self.state.lock().unwrap();
        if create && state.channel(name).is_none() {
            state.create_channel(name, None);
            let record = state.channel_record(name);
            drop(state);
            self.version_notify.notify_waiters();
            return record;
        }
        state.channel_record(name)
    }

    pub fn get_user_with_nick(&self, nick: &str) -> Option<UserRecord> {
        let state = self.state.lock().unwrap();
        state.user_with_nick(nick).map(User::to_record)
    }

    /// No-op if the channel still has members or doesn't exist.
    pub fn delete_channel(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let before = state.current_version;
        state.delete_channel_if_empty(name);
        let changed = state.current_version > before;
        drop(state);
        if changed {
            self.version_notify.notify_waiters();
        }
    }

    pub fn current_version(&self) -> u64 {
        self.state.lock().unwrap().current_version
    }

    /// Spawns the batcher's flush worker under the supervised-crash policy.
    /// Callers still own starting a `StatePersister` against this engine,
    /// since that requires a snapshot path.
    pub fn spawn_batcher_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let batcher = self.batcher.clone();
        spawn_supervised("outbound-batcher", async move {
            batcher.run().await;
        })
    }

    /// Test/administrative hook: blocks until the batcher has no queued or
    /// in-flight outbound messages.
    pub async fn wait_until_drained(&self) {
        self.batcher.wait_until_drained().await;
    }
}

/// Any background-thread fault is fatal: spawn engine workers through this
/// so a panic crashes the process instead of silently dropping the worker.
pub fn spawn_supervised<F>(name: &'static str, future: F) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        future.await;
        warn!(name, "background worker exited unexpectedly");
        std::process::exit(1);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_user_bumps_version_once() {
        let mut state = EngineState::default();
        assert_eq!(state.current_version, 0);
        state.ensure_user("foo@example.com");
        assert_eq!(state.current_version, 1);
        state.ensure_user("foo@example.com");
        assert_eq!(state.current_version, 1);
    }

    #[test]
    fn invent_nick_uses_localpart_then_suffixes() {
        let mut state = EngineState::default();
        state.ensure_user("foo@example.com");
        assert_eq!(state.user("foo@example.com").unwrap().nick, "foo");
        state.ensure_user("foo@other.example.com");
        assert_eq!(state.user("foo@other.example.com").unwrap().nick, "foo2");
    }

    #[test]
    fn invent_nick_falls_back_to_full_jid_for_invalid_localpart() {
        let state = EngineState::default();
        let nick = state.invent_nick("foo bar@example.com");
        assert_eq!(nick, "foo bar@example.com");
    }

    #[test]
    fn move_user_to_channel_keeps_membership_symmetric() {
        let mut state = EngineState::default();
        state.ensure_user("foo@example.com");
        state.create_channel("#nerds", None);
        state.move_user_to_channel("foo@example.com", Some("#nerds".to_string()));
        assert_eq!(
            state.user("foo@example.com").unwrap().channel.as_deref(),
            Some("#nerds")
        );
        assert!(state.channel("#nerds").unwrap().users.contains("foo@example.com"));

        state.move_user_to_channel("foo@example.com", None);
        assert!(state.user("foo@example.com").unwrap().channel.is_none());
        assert!(!state.channel("#nerds").unwrap().users.contains("foo@example.com"));
    }

    #[test]
    fn normalize_jid_strips_resource() {
        assert_eq!(normalize_jid("foo@example.com/resource"), "foo@example.com");
        assert_eq!(normalize_jid("foo@example.com"), "foo@example.com");
    }

    #[test]
    fn delete_channel_if_empty_is_noop_with_members() {
        let mut state = EngineState::default();
        state.ensure_user("foo@example.com");
        state.create_channel("#nerds", None);
        state.move_user_to_channel("foo@example.com", Some("#nerds".to_string()));
        let before = state.current_version;
        state.delete_channel_if_empty("#nerds");
        assert!(state.channel("#nerds").is_some());
        assert_eq!(state.current_version, before);
    }
}
