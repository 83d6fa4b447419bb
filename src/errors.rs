//! Error types for batch simulation operations

use thiserror::Error;

/// Result type alias for consistent error handling throughout the crate
pub type Result<T> = std::result::Result<T, AlphaBatchError>;

/// Main error type for batch simulation operations
#[derive(Debug, Error)]
pub enum AlphaBatchError {
    /// The platform rejected the supplied credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Session renewal failed after its single delayed retry
    #[error("Session exhausted: {0}")]
    SessionExhausted(String),

    /// Connection, timeout or body read failure below the HTTP layer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with an unexpected status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A manifest or manifest list could not be read or parsed
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// A simulation request failed boundary validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint file could not be written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    /// CSV processing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker pool could not make progress
    #[error("Worker error: {0}")]
    Worker(String),
}

impl AlphaBatchError {
    /// Create a new authentication error
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a new session exhaustion error
    pub fn session_exhausted<S: Into<String>>(msg: S) -> Self {
        Self::SessionExhausted(msg.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new API status error
    pub fn api<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::Api {
            status,
            message: msg.into(),
        }
    }

    /// Create a new manifest error
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new checkpoint error
    pub fn checkpoint<S: Into<String>>(msg: S) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Errors that must abort the whole batch run rather than one slot or manifest.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::SessionExhausted(_))
    }

    /// Check if this error is recoverable (the same call may be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if this error is due to user input
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_) | Self::Validation(_) | Self::Configuration(_)
        )
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "auth",
            Self::SessionExhausted(_) => "auth",
            Self::Transport(_) => "network",
            Self::Api { .. } => "api",
            Self::Manifest(_) => "manifest",
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "config",
            Self::Checkpoint(_) => "checkpoint",
            Self::JsonParsing(_) => "parsing",
            Self::Csv(_) => "csv",
            Self::Io(_) => "io",
            Self::Worker(_) => "runtime",
        }
    }

    /// Get user-friendly error message with suggestions for resolution
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication(msg) => {
                format!(
                    "Authentication failed: {}\n\n\
                    💡 Suggestions:\n\
                    • Check --username/--password or BRAIN_CREDENTIAL_EMAIL/BRAIN_CREDENTIAL_PASSWORD\n\
                    • Complete any pending biometric verification in the web UI",
                    msg
                )
            }
            Self::SessionExhausted(msg) => {
                format!(
                    "Could not renew the platform session: {}\n\n\
                    💡 Already checkpointed alphas are kept. Re-run the same manifests to resume.",
                    msg
                )
            }
            Self::Manifest(msg) => {
                format!(
                    "Manifest error: {}\n\n\
                    💡 A manifest must be a JSON array of simulation documents.",
                    msg
                )
            }
            _ if self.is_user_error() => {
                format!("{}

💡 Check the command-line options and manifest files.", self)
            }
            _ => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for AlphaBatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AlphaBatchError::Transport(format!("request timed out: {}", err))
        } else {
            AlphaBatchError::Transport(err.to_string())
        }
    }
}
