use thiserror::Error;

/// Top-level error type for the `parkwatch-api` crate.
///
/// Covers the transport failure modes of both surfaces: the WebSocket
/// detection stream and the HTTP liveness probe. `parkwatch-core` maps
/// these into retry decisions; the CLI maps them into diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Stream transport ────────────────────────────────────────────
    /// Opening the WebSocket connection failed (dial, TLS, handshake).
    #[error("stream connection failed: {0}")]
    StreamConnect(String),

    // ── HTTP transport ──────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with a body excerpt for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StreamConnect(_) => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
