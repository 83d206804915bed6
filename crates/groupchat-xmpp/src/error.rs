//! Error taxonomy for the live connection. Nothing here is returned to
//! `groupchat-core` directly — the boot shim matches on [`ConnectionError`]
//! to decide whether to retry the connect loop or give up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("connection timed out")]
    Timeout,
    #[error("transport error: {0}")]
    TransportError(String),
}

impl ConnectionError {
    /// Authentication failures mean the credentials are wrong; retrying
    /// with the same ones would just fail again. Every other variant is
    /// worth another connect attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::AuthenticationFailed(_))
    }
}
