//! CLI error types with miette diagnostics.
//!
//! Maps transport and configuration failures into user-facing errors
//! with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

/// Exit codes for process termination.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to the detection backend at {url}")]
    #[diagnostic(
        code(parkwatch::connection_failed),
        help(
            "Check that the backend is running and the URL is correct.\n\
             Try: parkwatch health -v"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Backend at {url} is not reachable")]
    #[diagnostic(
        code(parkwatch::unreachable),
        help("The health probe failed. Check the backend process and network path.")
    )]
    Unreachable { url: String },

    // ── Local environment ────────────────────────────────────────────

    /// The HTTP client itself could not be built (TLS init and the
    /// like) — distinct from a backend being down.
    #[error("Could not initialize the HTTP client")]
    #[diagnostic(
        code(parkwatch::http_client),
        help("This is a local TLS or client setup failure, not a backend failure.")
    )]
    HttpClient {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No value for {field}")]
    #[diagnostic(
        code(parkwatch::missing_setting),
        help(
            "Set {field} in the config file (parkwatch config init),\n\
             or pass {flag} / set {env}."
        )
    )]
    MissingSetting {
        field: String,
        flag: String,
        env: String,
    },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(parkwatch::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(parkwatch::config))]
    Config(Box<figment::Error>),

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(parkwatch::validation))]
    Validation { field: String, reason: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(parkwatch::json))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::MissingSetting { .. } | Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let err = CliError::Unreachable {
            url: "http://127.0.0.1:9/health".into(),
        };
        assert_eq!(err.exit_code(), exit_code::CONNECTION);

        let err = CliError::Validation {
            field: "stream.url".into(),
            reason: "not a URL".into(),
        };
        assert_eq!(err.exit_code(), exit_code::USAGE);

        // A local client-setup failure is not a backend connection error.
        let err = CliError::HttpClient {
            source: "tls backend unavailable".into(),
        };
        assert_eq!(err.exit_code(), exit_code::GENERAL);
    }
}
