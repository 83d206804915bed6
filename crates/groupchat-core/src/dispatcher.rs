//! Command and line-handler dispatch.
//!
//! Parses a message body into a command invocation or lets it fall through
//! to the channel relay plus the registered line handlers. Every function
//! here is synchronous and operates on [`EngineState`] directly — dispatch
//! always runs inside the engine's state mutex, so there is no locking or
//! I/O of its own to do.

use std::sync::LazyLock;

use regex::Regex;

use crate::engine::EngineState;
use crate::error::CommandError;
use crate::model::{is_valid_nick, Channel};

static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([a-z]+)(?:$|\s+(.*))").unwrap());

static PLUSPLUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\S{2,})(\+\+|--)(?:\s*[.,]?\s+(.*)|\.\s*$|$)").unwrap());

static VAMOS_RE: LazyLock<Regex> = LazyLock::new(|| {
    regex::RegexBuilder::new(r"\b(?:¿)?vamos\?\s*$")
        .case_insensitive(true)
        .build()
        .unwrap()
});

struct CommandSpec {
    name: &'static str,
    args: &'static str,
    description: &'static str,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "alias",
        args: "name",
        description: "Change your nick",
    },
    CommandSpec {
        name: "help",
        args: "",
        description: "List available commands",
    },
    CommandSpec {
        name: "join",
        args: "name [password]",
        description: "Join or create a channel",
    },
    CommandSpec {
        name: "list",
        args: "",
        description: "List members of your current channel",
    },
    CommandSpec {
        name: "me",
        args: "text",
        description: "Send an action message",
    },
    CommandSpec {
        name: "part",
        args: "",
        description: "Leave your current channel",
    },
    CommandSpec {
        name: "reset",
        args: "thing [reason]",
        description: "Reset a score to zero",
    },
    CommandSpec {
        name: "scores",
        args: "",
        description: "List the scores for your current channel",
    },
];

fn italic(text: &str) -> String {
    format!("_{text}_")
}

fn count_noun(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Splits a command argument tail on whitespace, treating `"..."` as one
/// token. Good enough for the handful of commands that take more than one
/// argument; it doesn't support escaped quotes.
fn split_args(tail: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for c in tail.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

pub struct CommandDispatcher;

impl CommandDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Parses `body` from `jid` and returns every `(recipient, text)` pair to
    /// enqueue. Must be called with the engine's state mutex already held.
    pub fn dispatch(&self, state: &mut EngineState, jid: &str, body: &str) -> Vec<(String, String)> {
        if body.starts_with('/') {
            self.dispatch_command(state, jid, body)
        } else {
            self.dispatch_line(state, jid, body)
        }
    }

    fn dispatch_command(&self, state: &mut EngineState, jid: &str, body: &str) -> Vec<(String, String)> {
        let Some(caps) = COMMAND_RE.captures(body) else {
            return vec![(jid.to_string(), italic(&CommandError::Unparsable.to_string()))];
        };
        let name = &caps[1];
        let tail = caps.get(2).map(|m| m.trim().to_string()).unwrap_or_default();

        let result = match name {
            "alias" => alias_command(state, jid, &tail),
            "help" => Ok(self.help_lines(jid)),
            "join" => join_command(state, jid, &tail),
            "list" => list_command(state, jid),
            "me" => me_command(state, jid, &tail),
            "part" => part_command(state, jid),
            "reset" => reset_command(state, jid, &tail),
            "scores" => scores_command(state, jid),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        };

        match result {
            Ok(outbound) => outbound,
            Err(err) => vec![(jid.to_string(), italic(&err.to_string()))],
        }
    }

    fn help_lines(&self, jid: &str) -> Vec<(String, String)> {
        let mut specs: Vec<&CommandSpec> = COMMANDS.iter().collect();
        specs.sort_by_key(|c| c.name);
        let body = specs
            .iter()
            .map(|c| {
                if c.args.is_empty() {
                    format!("*/{}* - {}", c.name, c.description)
                } else {
                    format!("*/{} {}* - {}", c.name, c.args, c.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        vec![(jid.to_string(), body)]
    }

    fn dispatch_line(&self, state: &mut EngineState, jid: &str, body: &str) -> Vec<(String, String)> {
        let channel_name = state.user(jid).and_then(|u| u.channel.clone());
        let Some(channel_name) = channel_name else {
            let welcome = state.user_mut(jid).and_then(|u| u.take_welcome());
            return match welcome {
                Some(lines) => lines.into_iter().map(|line| (jid.to_string(), line)).collect(),
                None => vec![(jid.to_string(), italic("You need to join a channel first."))],
            };
        };

        let nick = state.user(jid).map(|u| u.nick.clone()).unwrap_or_default();
        let mut outbound = state
            .channel(&channel_name)
            .map(|c| c.repeat_message(jid, &nick, body))
            .unwrap_or_default();

        let mut version_changed = false;
        if let Some(channel) = state.channel_mut(&channel_name) {
            if let Some(extra) = plusplus_outcome(channel, body) {
                outbound.extend(extra);
                version_changed = true;
            }
        }
        if version_changed {
            state.bump_version();
        }
        if let Some(extra) = vamos_outcome(jid, body) {
            outbound.extend(extra);
        }
        outbound
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn plusplus_outcome(channel: &mut Channel, body: &str) -> Option<Vec<(String, String)>> {
    let caps = PLUSPLUS_RE.captures(body)?;
    let item = caps.get(1)?.as_str();
    let op = caps.get(2)?.as_str();
    let note = caps.get(3).map(|m| m.as_str()).filter(|s| !s.is_empty());
    let mut rng = rand::rng();
    let line = if op == "++" {
        channel.increment_score(item, note, &mut rng)
    } else {
        channel.decrement_score(item, note, &mut rng)
    };
    Some(channel.broadcast_message(&line))
}

fn vamos_outcome(jid: &str, body: &str) -> Option<Vec<(String, String)>> {
    if VAMOS_RE.is_match(body) {
        Some(vec![(
            jid.to_string(),
            italic("\"vamos\" is a statement, not a question!"),
        )])
    } else {
        None
    }
}

fn alias_command(
    state: &mut EngineState,
    jid: &str,
    tail: &str,
) -> Result<Vec<(String, String)>, CommandError> {
    let args = split_args(tail);
    let proposed = args
        .first()
        .ok_or_else(|| CommandError::Validation("Usage: /alias name".into()))?;

    if !is_valid_nick(proposed) {
        return Err(CommandError::Validation(format!(
            "\"{proposed}\" is not a valid nick."
        )));
    }

    let current_nick = state.user(jid).map(|u| u.nick.clone()).unwrap_or_default();
    if proposed == &current_nick {
        return Err(CommandError::Validation(format!(
            "You are already known as \"{current_nick}\"."
        )));
    }

    if let Some(owner) = state.user_with_nick(proposed) {
        if owner.jid != jid {
            return Err(CommandError::Validation(format!(
                "Alias \"{proposed}\" already in use by {}.",
                owner.jid
            )));
        }
    }

    let channel_name = state.user(jid).and_then(|u| u.channel.clone());
    state
        .user_mut(jid)
        .expect("user exists for its own jid")
        .change_nick(proposed);
    state.bump_version();

    let text = italic(&format!("*{current_nick}* <{jid}> is now known as *{proposed}*."));
    match channel_name {
        Some(channel_name) => Ok(state
            .channel(&channel_name)
            .expect("user's channel exists")
            .broadcast_message(&text)),
        None => Ok(vec![(jid.to_string(), text)]),
    }
}

fn join_command(
    state: &mut EngineState,
    jid: &str,
    tail: &str,
) -> Result<Vec<(String, String)>, CommandError> {
    let args = split_args(tail);
    let name = args
        .first()
        .cloned()
        .ok_or_else(|| CommandError::Validation("Usage: /join name [password]".into()))?;
    let supplied_password = args.get(1).cloned();

    let mut outbound = Vec::new();
    if state.channel(&name).is_none() {
        state.create_channel(&name, supplied_password.clone());
        outbound.push((jid.to_string(), italic(&format!("Created \"{name}\"."))));
    } else if let Some(required) = state.channel(&name).and_then(|c| c.password.clone()) {
        if supplied_password.as_deref() != Some(required.as_str()) {
            return Err(CommandError::Validation(format!(
                "Incorrect or missing password for \"{name}\"."
            )));
        }
    }

    if state.user(jid).and_then(|u| u.channel.as_deref()) == Some(name.as_str()) {
        return Err(CommandError::Validation(format!(
            "Already a member of \"{name}\"."
        )));
    }

    if let Some(previous) = state.user(jid).and_then(|u| u.channel.clone()) {
        outbound.extend(part_internal(state, jid, &previous));
    }

    let nick = state.user(jid).map(|u| u.nick.clone()).unwrap_or_default();
    if let Some(channel) = state.channel(&name) {
        outbound.extend(channel.broadcast_to_others(
            jid,
            &italic(&format!("*{nick}* <{jid}> has joined \"{name}\".")),
        ));
    }
    state.move_user_to_channel(jid, Some(name.clone()));

    let count = state.channel(&name).map(|c| c.users.len()).unwrap_or(1);
    outbound.push((
        jid.to_string(),
        italic(&format!(
            "Joined \"{name}\" with {} total.",
            count_noun(count, "user")
        )),
    ));
    Ok(outbound)
}

/// Shared by `/part` and the auto-part `/join` performs when switching
/// channels. Unlike `/part` itself, this never produces the private "Left"
/// confirmation — only the caller decides whether that line is wanted.
fn part_internal(state: &mut EngineState, jid: &str, channel_name: &str) -> Vec<(String, String)> {
    let nick = state.user(jid).map(|u| u.nick.clone()).unwrap_or_default();
    state.move_user_to_channel(jid, None);
    let mut outbound = Vec::new();
    if let Some(channel) = state.channel(channel_name) {
        outbound.extend(channel.broadcast_to_others(
            jid,
            &italic(&format!("*{nick}* <{jid}> has left \"{channel_name}\".")),
        ));
    }
    state.delete_channel_if_empty(channel_name);
    outbound
}

fn part_command(state: &mut EngineState, jid: &str) -> Result<Vec<(String, String)>, CommandError> {
    let channel_name = state
        .user(jid)
        .and_then(|u| u.channel.clone())
        .ok_or_else(|| CommandError::Validation("You need to join a channel first.".into()))?;
    let mut outbound = part_internal(state, jid, &channel_name);
    outbound.push((jid.to_string(), italic(&format!("Left \"{channel_name}\"."))));
    Ok(outbound)
}

fn list_command(state: &mut EngineState, jid: &str) -> Result<Vec<(String, String)>, CommandError> {
    let channel_name = state
        .user(jid)
        .and_then(|u| u.channel.clone())
        .ok_or_else(|| CommandError::Validation("You need to join a channel first.".into()))?;
    let channel = state.channel(&channel_name).expect("channel exists for member");

    let mut members: Vec<(String, String)> = channel
        .users
        .iter()
        .map(|member_jid| {
            let nick = state
                .user(member_jid)
                .map(|u| u.nick.clone())
                .unwrap_or_else(|| member_jid.clone());
            (nick, member_jid.clone())
        })
        .collect();
    members.sort_by(|a, b| a.0.cmp(&b.0));

    let mut body = format!(
        "{} in \"{channel_name}\":",
        count_noun(members.len(), "user")
    );
    for (nick, member_jid) in members {
        body.push('\n');
        body.push_str(&format!("*{nick}* <{member_jid}>"));
    }
    Ok(vec![(jid.to_string(), body)])
}

fn me_command(
    state: &mut EngineState,
    jid: &str,
    tail: &str,
) -> Result<Vec<(String, String)>, CommandError> {
    if tail.trim().is_empty() {
        return Err(CommandError::Validation("Usage: /me text".into()));
    }
    let channel_name = state
        .user(jid)
        .and_then(|u| u.channel.clone())
        .ok_or_else(|| CommandError::Validation("You need to join a channel first.".into()))?;
    let nick = state.user(jid).map(|u| u.nick.clone()).unwrap_or_default();
    let channel = state.channel(&channel_name).expect("channel exists for member");
    Ok(channel.broadcast_message(&italic(&format!("* {nick} {tail}"))))
}

fn reset_command(
    state: &mut EngineState,
    jid: &str,
    tail: &str,
) -> Result<Vec<(String, String)>, CommandError> {
    let args = split_args(tail);
    let item = args
        .first()
        .cloned()
        .ok_or_else(|| CommandError::Validation("Usage: /reset thing [reason]".into()))?;
    let reason = args.get(1).cloned();

    let channel_name = state
        .user(jid)
        .and_then(|u| u.channel.clone())
        .ok_or_else(|| CommandError::Validation("You need to join a channel first.".into()))?;
    let nick = state.user(jid).map(|u| u.nick.clone()).unwrap_or_default();

    let channel = state
        .channel_mut(&channel_name)
        .expect("channel exists for member");
    if !channel.reset_score(&item) {
        return Err(CommandError::Validation(format!(
            "\"{item}\" has no non-zero score to reset."
        )));
    }
    state.bump_version();

    let suffix = match &reason {
        Some(r) if !r.is_empty() => format!(" ({r})"),
        _ => String::new(),
    };
    let channel = state.channel(&channel_name).expect("channel exists");
    Ok(channel.broadcast_message(&italic(&format!(
        "*{nick}* reset {item}'s score to 0{suffix}."
    ))))
}

fn scores_command(state: &mut EngineState, jid: &str) -> Result<Vec<(String, String)>, CommandError> {
    let channel_name = state
        .user(jid)
        .and_then(|u| u.channel.clone())
        .ok_or_else(|| CommandError::Validation("You need to join a channel first.".into()))?;
    let channel = state.channel(&channel_name).expect("channel exists for member");

    let mut body = format!("Scores for \"{channel_name}\":");
    for (item, score) in &channel.scores {
        body.push('\n');
        body.push_str(&format!("*{item}*: {score}"));
    }
    Ok(vec![(jid.to_string(), body)])
}
