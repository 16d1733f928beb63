//! Error types shared across the exporter

use thiserror::Error;

/// Flowmeter error type
#[derive(Error, Debug)]
pub enum MeterError {
    /// Malformed component option string
    #[error("invalid options: {0}")]
    Options(String),

    /// Impossible parameter combination
    #[error("config error: {0}")]
    Config(String),

    /// Too many processing plugins registered
    #[error("plugin limit reached ({0} extensions)")]
    PluginLimit(usize),

    /// Export-side failure
    #[error("export error: {0}")]
    Export(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for flowmeter components
pub type MeterResult<T> = Result<T, MeterError>;
