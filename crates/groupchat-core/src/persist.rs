//! The on-disk snapshot format and the background worker that writes it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::engine::{ChatEngine, EngineState};
use crate::error::SnapshotError;
use crate::model::{Channel, ChannelRecord, User, UserRecord};

/// `channels` then `users`, each an ordered sequence — mirrors the
/// in-memory iteration order so a round trip doesn't reshuffle anything a
/// human diffing the file would notice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub channels: Vec<ChannelRecord>,
    pub users: Vec<UserRecord>,
}

impl Snapshot {
    pub fn from_state(state: &EngineState) -> Self {
        Self {
            channels: state.channels.values().map(Channel::to_record).collect(),
            users: state.users.values().map(User::to_record).collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, SnapshotError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(input: &str) -> Result<Self, SnapshotError> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Rebuilds engine state from a loaded snapshot. A snapshot with two
    /// users sharing a nick is rejected outright rather than silently
    /// loaded — nick uniqueness is a model invariant, not just a
    /// dispatch-time check. Channels left with no members once membership
    /// is rebuilt from `user.channel_name` are dropped.
    pub fn into_state(self) -> Result<EngineState, SnapshotError> {
        let mut seen_nicks = std::collections::HashSet::new();
        let mut users = indexmap::IndexMap::new();
        for record in self.users {
            if !seen_nicks.insert(record.nick.clone()) {
                return Err(SnapshotError::DuplicateNick(record.nick));
            }
            users.insert(record.jid.clone(), User::from_record(record));
        }

        let mut channels = indexmap::IndexMap::new();
        for record in self.channels {
            channels.insert(record.name.clone(), Channel::from_record(record));
        }
        for user in users.values() {
            if let Some(channel_name) = &user.channel {
                if let Some(channel) = channels.get_mut(channel_name) {
                    channel.add_user(&user.jid);
                }
            }
        }
        channels.retain(|_, c| !c.is_empty());

        Ok(EngineState {
            users,
            channels,
            current_version: 0,
            saved_version: 0,
        })
    }
}

impl ChatEngine {
    /// Replaces the engine's entire state with a freshly loaded snapshot.
    /// Both version counters reset to zero regardless of what was loaded —
    /// the counter is never durable, only the snapshot content is.
    pub fn load_snapshot(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let new_state = snapshot.into_state()?;
        let mut state = self.state.lock().unwrap();
        *state = new_state;
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        Snapshot::from_state(&state)
    }

    /// If nothing has changed since the last save, returns `None` — the
    /// caller raced a wakeup against a save that already happened.
    /// Otherwise takes the snapshot and marks it saved.
    fn snapshot_if_changed(&self) -> Option<Snapshot> {
        let mut state = self.state.lock().unwrap();
        if state.current_version == state.saved_version {
            return None;
        }
        let snapshot = Snapshot::from_state(&state);
        state.saved_version = state.current_version;
        Some(snapshot)
    }

    /// The `Notified` future is created *before* the predicate is checked
    /// under the lock: `notify_waiters` only wakes already-registered
    /// listeners, so a version bump landing between the check and the
    /// await would otherwise be missed and the persister would stall.
    async fn wait_for_pending_save(&self) {
        loop {
            let notified = self.version_notify.notified();
            let pending = {
                let state = self.state.lock().unwrap();
                state.current_version > state.saved_version
            };
            if pending {
                return;
            }
            notified.await;
        }
    }
}

pub struct StatePersister {
    engine: Arc<ChatEngine>,
    path: PathBuf,
    save_interval: Duration,
    last_save: std::sync::Mutex<Instant>,
}

impl StatePersister {
    pub fn new(engine: Arc<ChatEngine>, path: impl Into<PathBuf>, save_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            engine,
            path: path.into(),
            save_interval,
            last_save: std::sync::Mutex::new(Instant::now() - save_interval),
        })
    }

    /// Loads a snapshot from `path` if it exists. A missing file is not an
    /// error (first boot); a malformed one is — the caller treats it as
    /// fatal.
    pub fn load(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Snapshot::from_yaml(&contents).map(Some),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Runs for the process lifetime: wait for a pending change, respect the
    /// save-interval cooldown, then save.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.engine.wait_for_pending_save().await;
            let elapsed = self.last_save.lock().unwrap().elapsed();
            if elapsed < self.save_interval {
                tokio::time::sleep(self.save_interval - elapsed).await;
            }
            self.save_if_changed().await;
        }
    }

    async fn save_if_changed(&self) -> bool {
        let Some(snapshot) = self.engine.snapshot_if_changed() else {
            return false;
        };
        *self.last_save.lock().unwrap() = Instant::now();
        if let Err(error) = self.write_snapshot(&snapshot).await {
            error!(path = %self.path.display(), %error, "state save failed, will retry on next change");
        } else {
            debug!(path = %self.path.display(), "state saved");
        }
        true
    }

    /// The synchronous shutdown path: performs the same snapshot-and-write
    /// steps without going through the async loop. Called from the signal
    /// handler in the boot shim.
    pub fn save_state_if_changed(&self) -> Result<bool, SnapshotError> {
        let Some(snapshot) = self.engine.snapshot_if_changed() else {
            return Ok(false);
        };
        write_atomic(&self.path, &snapshot.to_yaml()?)?;
        Ok(true)
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let path = self.path.clone();
        let yaml = snapshot.to_yaml()?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &yaml))
            .await
            .expect("blocking snapshot write panicked")
    }
}

#[cfg(unix)]
fn create_tmp(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_tmp(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().write(true).create_new(true).open(path)
}

/// Writes `contents` to `{path}.tmp` (mode 0600, exclusive create), fsyncs,
/// then renames over `path`. A stale `.tmp` left behind by a crash is
/// removed first so `create_new` doesn't spuriously fail.
fn write_atomic(path: &Path, contents: &str) -> Result<(), SnapshotError> {
    let tmp_path = path.with_extension("tmp");
    let _ = std::fs::remove_file(&tmp_path);
    {
        let mut file = create_tmp(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Client, OutboundMessage, Roster as RosterTrait, SendError};
    use crate::batcher::BatcherConfig;
    use std::time::Duration as StdDuration;

    struct NullClient;
    #[async_trait::async_trait]
    impl Client for NullClient {
        async fn send(&self, _message: OutboundMessage) -> Result<(), SendError> {
            Ok(())
        }
    }

    struct NullRoster;
    #[async_trait::async_trait]
    impl RosterTrait for NullRoster {
        async fn accept_subscription(&self, _jid: &str) {}
    }

    fn test_engine() -> Arc<ChatEngine> {
        let batcher = OutboundBatcher::new(Arc::new(NullClient), BatcherConfig::default());
        ChatEngine::new(batcher, Arc::new(NullRoster))
    }

    #[test]
    fn snapshot_round_trip_preserves_channels_and_users() {
        let engine = test_engine();
        {
            let mut state = engine.state.lock().unwrap();
            state.ensure_user("foo@example.com");
            state.create_channel("#nerds", None);
            state.move_user_to_channel("foo@example.com", Some("#nerds".to_string()));
        }

        let snapshot = engine.snapshot();
        let yaml = snapshot.to_yaml().unwrap();
        let reloaded = Snapshot::from_yaml(&yaml).unwrap();
        assert_eq!(snapshot, reloaded);

        let restored_state = reloaded.into_state().unwrap();
        assert_eq!(restored_state.users.len(), 1);
        assert_eq!(restored_state.channels.len(), 1);
        assert!(restored_state.channels["#nerds"].users.contains("foo@example.com"));
    }

    #[test]
    fn into_state_drops_empty_channels() {
        let snapshot = Snapshot {
            channels: vec![ChannelRecord {
                name: "#ghost".to_string(),
                password: None,
                scores: Default::default(),
            }],
            users: vec![],
        };
        let state = snapshot.into_state().unwrap();
        assert!(state.channels.is_empty());
    }

    #[test]
    fn into_state_rejects_duplicate_nicks() {
        let snapshot = Snapshot {
            channels: vec![],
            users: vec![
                UserRecord {
                    jid: "foo@example.com".to_string(),
                    nick: "dupe".to_string(),
                    channel_name: None,
                },
                UserRecord {
                    jid: "bar@example.com".to_string(),
                    nick: "dupe".to_string(),
                    channel_name: None,
                },
            ],
        };
        assert!(matches!(
            snapshot.into_state(),
            Err(SnapshotError::DuplicateNick(_))
        ));
    }

    #[tokio::test]
    async fn save_state_if_changed_writes_atomically_then_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        let engine = test_engine();
        {
            let mut state = engine.state.lock().unwrap();
            state.ensure_user("foo@example.com");
        }
        let persister = StatePersister::new(engine.clone(), &path, StdDuration::from_secs(10));

        assert!(persister.save_state_if_changed().unwrap());
        assert!(path.exists());
        assert!(!persister.save_state_if_changed().unwrap());

        let loaded = StatePersister::load(&path).unwrap().unwrap();
        assert_eq!(loaded.users.len(), 1);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(StatePersister::load(&path).unwrap().is_none());
    }
}
