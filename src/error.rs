use thiserror::Error;

use crate::sandbox::shell::is_expiry_signal;

#[derive(Error, Debug)]
pub enum SandpitError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Provisioning errors
    #[error("Sandbox provisioning failed: {0}")]
    Provisioning(String),

    #[error("Provider API error: {message}")]
    Backend {
        message: String,
        status: Option<u16>,
    },

    // Sandbox lifecycle errors
    #[error("No active sandbox")]
    NoActiveSandbox,

    #[error("Sandbox {sandbox_id} has stopped and needs to be recreated")]
    SandboxExpired { sandbox_id: String },

    #[error("Sandbox provider has been terminated")]
    ProviderTerminated,

    #[error("Sandbox operation timed out after {seconds} seconds")]
    SandboxTimeout { seconds: u64 },

    #[error("Provider '{provider}' does not support {operation}")]
    Unsupported { provider: String, operation: String },

    // File errors
    #[error("Failed to write file {path}: {message}")]
    FileWrite { path: String, message: String },

    #[error("Failed to read file {path}: {message}")]
    FileRead { path: String, message: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SandpitError {
    /// Whether this error means the remote sandbox was reclaimed by the provider.
    pub fn indicates_expiry(&self) -> bool {
        match self {
            Self::SandboxExpired { .. } => true,
            Self::Backend {
                status: Some(410), ..
            } => true,
            Self::Backend { message, .. } => is_expiry_signal(message),
            Self::Http(e) => {
                e.status().map(|s| s.as_u16()) == Some(410) || is_expiry_signal(&e.to_string())
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SandpitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_status() {
        let err = SandpitError::Backend {
            message: "request failed".to_string(),
            status: Some(410),
        };
        assert!(err.indicates_expiry());
    }

    #[test]
    fn test_expiry_from_message() {
        let err = SandpitError::Backend {
            message: "sandbox_stopped: the sandbox is no longer available".to_string(),
            status: None,
        };
        assert!(err.indicates_expiry());

        let err = SandpitError::Backend {
            message: "connection reset by peer".to_string(),
            status: Some(502),
        };
        assert!(!err.indicates_expiry());
    }

    #[test]
    fn test_plain_errors_do_not_expire() {
        assert!(!SandpitError::NoActiveSandbox.indicates_expiry());
        assert!(!SandpitError::SandboxTimeout { seconds: 5 }.indicates_expiry());
    }
}
