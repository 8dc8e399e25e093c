//! Error types shared across the service.
//!
//! Queries that match nothing are not errors: lookups return `Option::None`
//! or an empty `Vec`. The variants here cover the failures that callers can
//! meaningfully react to — unique-key conflicts become upserts, recovered
//! panics skip one batch item, cancellation unwinds cooperatively.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Service-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation at load time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem operation failed.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The datastore rejected a statement. Carries the statement for diagnosis.
    #[error("datastore error executing `{statement}`: {message}")]
    Datastore { statement: String, message: String },

    /// A unique key was violated. Callers that expect upsert semantics
    /// retry as an update.
    #[error("conflict on unique key ({fields})")]
    Conflict { fields: String },

    /// An embedding call failed for one chunk or batch. Recoverable: the
    /// caller may continue with the remaining items.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A crash inside the native inference runtime was caught and converted
    /// into an error instead of tearing down the process.
    #[error("embedding runtime panicked: {0}")]
    PanicRecovered(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Tool arguments failed to decode or validate.
    #[error("invalid arguments: {0}")]
    Validation(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Build a datastore error that names the failing statement.
    pub fn datastore(statement: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Datastore {
            statement: statement.into(),
            message: err.to_string(),
        }
    }

    /// True when the underlying message is the "already exists" /
    /// "duplicate" family. The migration runner treats these as proof that
    /// an element was created by an earlier run and continues.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Datastore { message, .. } => {
                let m = message.to_ascii_lowercase();
                m.contains("already exists")
                    || m.contains("already defined")
                    || m.contains("duplicate column")
            }
            _ => false,
        }
    }

    /// True for unique-key violations, whichever layer surfaced them.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Datastore { message, .. } => {
                message.to_ascii_lowercase().contains("unique constraint failed")
            }
            _ => false,
        }
    }
}

/// Classify a raw sqlx error for a given statement. Unique-key violations
/// become [`Error::Conflict`] with the column list pulled from the message
/// (`UNIQUE constraint failed: kv_memories.user_id, kv_memories.key`).
pub fn classify_sqlx(statement: &str, err: sqlx::Error) -> Error {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if let Some(pos) = lower.find("unique constraint failed:") {
        let fields = message[pos + "unique constraint failed:".len()..]
            .trim()
            .to_string();
        return Error::Conflict { fields };
    }
    Error::Datastore {
        statement: statement.to_string(),
        message,
    }
}
