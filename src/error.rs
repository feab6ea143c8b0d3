//! Error taxonomy for the proxy core.
//!
//! Session-level variants (everything except `Config`) are never fatal to the
//! process: the caller logs them and tears the session down silently, matching
//! the client's view of a plain TCP close.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("programmer error: {0}")]
    ProgrammerError(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// True for errors that should close the session quietly rather than
    /// being escalated (everything but a config error at startup).
    pub fn is_session_local(&self) -> bool {
        !matches!(self, ProxyError::Config(_))
    }
}
