//! Local `tracing` setup. No OTLP export — the process bootstrap scope
//! this binary covers stops at console logging.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber reading `RUST_LOG`, defaulting to
/// `info,groupchat_core=debug,groupchat_xmpp=debug` when unset.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,groupchat_core=debug,groupchat_xmpp=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();

    tracing::info!("telemetry initialized");
    Ok(())
}
