//! Process bootstrap: read the credentials file, connect, wire the engine
//! to the live connection and the state file, then block until a shutdown
//! signal arrives. No CLI flags: the config path is a fixed, platform-
//! conventional location, matching spec §6's "no flags" bootstrap surface.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

mod config;
mod credentials;
mod telemetry;

use config::Config;
use groupchat_core::{spawn_supervised, BatcherConfig, ChatEngine, OutboundBatcher, StatePersister};
use groupchat_xmpp::{ConnectionError, InboundStream, XmppHandles};

/// `~/.config/groupchat-bot/config.toml` or the platform equivalent. Fixed:
/// there is no flag to override it.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("groupchat-bot")
        .join("config.toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_local().map_err(|error| anyhow::anyhow!("failed to init telemetry: {error}"))?;

    let config = Config::load(&default_config_path())?;
    let credentials = credentials::load(&config.credentials_file)?;

    info!(jid = %credentials.jid, "connecting");
    let (handles, stream) = connect_with_retry(&credentials, &config).await?;

    let batcher = OutboundBatcher::new(
        handles.client,
        BatcherConfig {
            interval: config.batch_interval(),
            use_separate_messages: config.use_separate_messages,
        },
    );
    let engine = ChatEngine::new(batcher, handles.roster);
    engine.spawn_batcher_worker();

    if let Some(snapshot) =
        StatePersister::load(&config.state_file).context("failed to load state file")?
    {
        engine
            .load_snapshot(snapshot)
            .context("state file is corrupt")?;
        info!(path = %config.state_file.display(), "loaded state");
    }

    let persister = StatePersister::new(engine.clone(), config.state_file.clone(), config.save_interval());
    spawn_supervised("state-persister", {
        let persister = persister.clone();
        async move { persister.run().await }
    });
    spawn_supervised("xmpp-receive-loop", {
        let engine = engine.clone();
        async move { groupchat_xmpp::run_receive_loop(stream, engine).await }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, saving state");
    if let Err(error) = persister.save_state_if_changed() {
        error!(%error, "final state save failed");
    }
    Ok(())
}

/// Retries `groupchat_xmpp::connect` up to `config.max_reconnect_attempts`
/// times, backing off a little longer after each failure. Consults
/// [`ConnectionError::is_retryable`] to give up immediately on a failure a
/// retry can't fix (bad credentials), rather than burning through the whole
/// attempt budget on a hopeless connection.
async fn connect_with_retry(
    credentials: &credentials::Credentials,
    config: &Config,
) -> Result<(XmppHandles, InboundStream)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match groupchat_xmpp::connect(&credentials.jid, &credentials.password, config.connect_timeout()).await {
            Ok(connected) => return Ok(connected),
            Err(error) if error.is_retryable() && attempt < config.max_reconnect_attempts => {
                let backoff = Duration::from_secs((attempt as u64 * 2).min(30));
                warn!(attempt, ?backoff, %error, "connect failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(error) => return Err(context_for(error)),
        }
    }
}

fn context_for(error: ConnectionError) -> anyhow::Error {
    anyhow::Error::new(error).context("failed to connect")
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
