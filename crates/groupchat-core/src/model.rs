//! The membership and channel model.
//!
//! `User` and `Channel` hold no reference to each other or to the engine —
//! cross-references are plain owned keys (jid / channel name). `ChatEngine`
//! is the only thing that holds both maps and is responsible for keeping
//! `user.channel == Some(c.name)` in sync with `c.users.contains(jid)`.

use std::sync::LazyLock;

use indexmap::IndexSet;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Nicks may contain only letters, digits, hyphens, underscores, and dots.
static NICK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-_.a-zA-Z0-9]+$").unwrap());

pub fn is_valid_nick(nick: &str) -> bool {
    NICK_RE.is_match(nick)
}

#[derive(Debug, Clone)]
pub struct User {
    pub jid: String,
    pub nick: String,
    pub channel: Option<String>,
    pub welcome_sent: bool,
}

impl User {
    pub fn new(jid: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            nick: nick.into(),
            channel: None,
            welcome_sent: false,
        }
    }

    /// Validates `proposed` against the nick regex and mutates in place on
    /// success. Uniqueness is the caller's responsibility (checked under the
    /// engine's state mutex, where the full nick namespace is visible).
    pub fn change_nick(&mut self, proposed: &str) -> bool {
        if !is_valid_nick(proposed) {
            return false;
        }
        self.nick = proposed.to_string();
        true
    }

    /// The two-line first-time greeting. Marks `welcome_sent`; the caller
    /// enqueues the lines through the batcher.
    pub fn take_welcome(&mut self) -> Option<[String; 2]> {
        if self.welcome_sent {
            return None;
        }
        self.welcome_sent = true;
        Some([
            "_Welcome! You haven't joined a channel yet._".to_string(),
            "_Send */join #channel-name* to get started._".to_string(),
        ])
    }

    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            jid: self.jid.clone(),
            nick: self.nick.clone(),
            channel_name: self.channel.clone(),
        }
    }

    /// Rebuilds a `User` from its on-disk record. `welcome_sent` does not
    /// survive a restart — it isn't part of the record — so a returning
    /// user may see the first-time greeting again.
    pub fn from_record(record: UserRecord) -> Self {
        Self {
            jid: record.jid,
            nick: record.nick,
            channel: record.channel_name,
            welcome_sent: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub password: Option<String>,
    pub users: IndexSet<String>,
    pub scores: indexmap::IndexMap<String, i64>,
}

/// Exclamation used when a score is nudged up or down.
const HOORAY_EXCLAMATIONS: &[&str] = &["Hooray!", "Yay!"];
const OUCH_EXCLAMATIONS: &[&str] = &["Ouch!", "Zing!"];

impl Channel {
    pub fn new(name: impl Into<String>, password: Option<String>) -> Self {
        Self {
            name: name.into(),
            password,
            users: IndexSet::new(),
            scores: indexmap::IndexMap::new(),
        }
    }

    /// Idempotent: adding a member already present is a no-op that still
    /// reports success so callers don't need to special-case it.
    pub fn add_user(&mut self, jid: &str) -> bool {
        self.users.insert(jid.to_string())
    }

    pub fn remove_user(&mut self, jid: &str) -> bool {
        self.users.shift_remove(jid)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// `"*{senderNick}*: {body}"` to every member except `sender_jid`, in
    /// membership-set order.
    pub fn repeat_message(&self, sender_jid: &str, sender_nick: &str, body: &str) -> Vec<(String, String)> {
        let text = format!("*{sender_nick}*: {body}");
        self.users
            .iter()
            .filter(|jid| jid.as_str() != sender_jid)
            .map(|jid| (jid.clone(), text.clone()))
            .collect()
    }

    /// To every member, including the actor.
    pub fn broadcast_message(&self, text: &str) -> Vec<(String, String)> {
        self.users
            .iter()
            .map(|jid| (jid.clone(), text.to_string()))
            .collect()
    }

    /// To every member except `exclude_jid`, regardless of whether that jid
    /// is still present in `users` (used when announcing a part after the
    /// leaving member has already been removed).
    pub fn broadcast_to_others(&self, exclude_jid: &str, text: &str) -> Vec<(String, String)> {
        self.users
            .iter()
            .filter(|jid| jid.as_str() != exclude_jid)
            .map(|jid| (jid.clone(), text.to_string()))
            .collect()
    }

    /// Bumps `scores[item]` by +1 (creating it at zero if absent) and
    /// returns the broadcast line. `rng` picks the exclamation so tests can
    /// inject a deterministic generator.
    pub fn increment_score(&mut self, item: &str, note: Option<&str>, rng: &mut impl Rng) -> String {
        let score = self.scores.entry(item.to_string()).or_insert(0);
        *score += 1;
        let exclamation = HOORAY_EXCLAMATIONS[rng.random_range(0..HOORAY_EXCLAMATIONS.len())];
        format_score_line(exclamation, item, *score, note)
    }

    pub fn decrement_score(&mut self, item: &str, note: Option<&str>, rng: &mut impl Rng) -> String {
        let score = self.scores.entry(item.to_string()).or_insert(0);
        *score -= 1;
        let exclamation = OUCH_EXCLAMATIONS[rng.random_range(0..OUCH_EXCLAMATIONS.len())];
        format_score_line(exclamation, item, *score, note)
    }

    /// `/reset`: zero a non-zero score. Returns `false` (caller surfaces a
    /// validation error) if the item has no score or is already zero.
    pub fn reset_score(&mut self, item: &str) -> bool {
        match self.scores.get_mut(item) {
            Some(score) if *score != 0 => {
                *score = 0;
                true
            }
            _ => false,
        }
    }

    pub fn to_record(&self) -> ChannelRecord {
        ChannelRecord {
            name: self.name.clone(),
            password: self.password.clone(),
            // Zero-valued scores are elided on serialization.
            scores: self
                .scores
                .iter()
                .filter(|(_, v)| **v != 0)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Rebuilds a `Channel` from its on-disk record. Membership is not
    /// stored on the channel record itself — the caller re-adds members by
    /// walking the loaded users and their `channel_name`.
    pub fn from_record(record: ChannelRecord) -> Self {
        Self {
            name: record.name,
            password: record.password,
            users: IndexSet::new(),
            scores: record.scores,
        }
    }
}

fn format_score_line(exclamation: &str, item: &str, score: i64, note: Option<&str>) -> String {
    match note {
        Some(note) if !note.is_empty() => format!("_{exclamation} {item} -> {score} ({note})_"),
        _ => format!("_{exclamation} {item} -> {score}_"),
    }
}

/// On-disk record for a user. Plain data — no engine handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub jid: String,
    pub nick: String,
    pub channel_name: Option<String>,
}

/// On-disk record for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    pub password: Option<String>,
    pub scores: indexmap::IndexMap<String, i64>,
}
