//! Error types for the Signal → email bridge.

use std::time::Duration;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
}

/// Configuration-related errors. The only kind that is fatal (at startup).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Polling the receive endpoint failed. The cycle is skipped.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Receive endpoint {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode receive response: {0}")]
    Decode(String),
}

/// One attachment's content could not be downloaded.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("Attachment descriptor has no id")]
    MissingId,

    #[error("Invalid attachment URL for {id}: {reason}")]
    InvalidUrl { id: String, reason: String },

    #[error("Attachment {id} download failed: {reason}")]
    Http { id: String, reason: String },

    #[error("Attachment {id} download returned status {status}")]
    Status { id: String, status: u16 },
}

/// The message envelope did not have the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// The mail transport failed or could not be reached.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to spawn mail command {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Mail command {program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Mail command {program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
