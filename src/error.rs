//! Error types for the PVE exporter.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for PVE exporter operations.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Transport-level error talking to the Proxmox API
    #[error("PVE API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API rejected our credentials or session ticket
    #[error("PVE API request unauthorized (401)")]
    Unauthorized,

    /// The API answered with a non-200 status other than 401
    #[error("PVE API request failed with status {0}")]
    Upstream(u16),

    /// Error parsing a PVE API response
    #[error("failed to parse PVE API response: {0}")]
    Parse(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Authentication error
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Metrics registration or encoding error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;
