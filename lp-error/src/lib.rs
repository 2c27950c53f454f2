//! Error type of the linuxptp daemon
//!
//! [`PtpError`] groups failures by where they come from: file and sysfs I/O,
//! telemetry and profile decoding, PCI capability walks, plugin hooks and
//! process supervision, and the metric registry.

use std::io;
use std::path::PathBuf;

/// Result type alias using PtpError
pub type Result<T> = std::result::Result<T, PtpError>;

/// Unified error type for all daemon operations
#[derive(thiserror::Error, Debug)]
pub enum PtpError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Telemetry Errors
    // ============================================================================
    #[error("Failed to decode {field} value '{value}': {reason}")]
    Decode {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Metrics error: {0}")]
    Metrics(String),

    // ============================================================================
    // Hardware Errors
    // ============================================================================
    #[error("PCI capability walk failed for {device}: {reason}")]
    CapabilityWalk {
        device: String,
        reason: String,
    },

    #[error("Failed to run {tool}: {reason}")]
    ToolExecution {
        tool: String,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Plugin and Process Errors
    // ============================================================================
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin {plugin} failed: {reason}")]
    Plugin {
        plugin: String,
        reason: String,
    },

    #[error("Process {process} failed: {reason}")]
    Process {
        process: String,
        reason: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl PtpError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a plugin error
    pub fn plugin(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Create a process error
    pub fn process(process: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Process {
            process: process.into(),
            reason: reason.into(),
        }
    }
}

// Allow converting from String to PtpError
impl From<String> for PtpError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to PtpError
impl From<&str> for PtpError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
