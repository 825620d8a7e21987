//! Error types for devfarm
//!
//! All modules use `DevfarmResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for devfarm operations
pub type DevfarmResult<T> = Result<T, DevfarmError>;

/// All errors that can occur in devfarm
#[derive(Error, Debug)]
pub enum DevfarmError {
    // Lock errors
    #[error("Timed out after {:.3}s waiting for the lock on device {device_id}", .timeout.as_secs_f64())]
    LockTimeout {
        device_id: String,
        timeout: Duration,
    },

    // Binary cache errors
    #[error("Malformed binary cache {path}: {reason}")]
    MalformedContainer { path: PathBuf, reason: String },

    #[error(
        "More than one platform info value across binary caches: {} vs {}",
        preview(.existing_value),
        preview(.new_value)
    )]
    ConflictingPlatformInfo {
        existing_value: Vec<u8>,
        new_value: Vec<u8>,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Device bridge errors
    #[error("Device bridge not found: {0}")]
    BridgeNotFound(String),

    #[error("Device not attached: {0}")]
    DeviceNotFound(String),

    #[error("Run on device {device} failed: {reason}")]
    RunFailed { device: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    #[error("Command exited with code {code}: {command}")]
    CommandExit { command: String, code: i32 },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl DevfarmError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a malformed container error
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedContainer {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if the caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::DeviceNotFound(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another job holds the device. Check with: devfarm lock status <device>")
            }
            Self::BridgeNotFound(_) => {
                Some("Install Android platform-tools or set device.bridge in the config")
            }
            Self::DeviceNotFound(_) => Some("List attached devices with: devfarm devices"),
            Self::ConflictingPlatformInfo { .. } => {
                Some("Binary caches from different GPU drivers cannot be merged into one file")
            }
            _ => None,
        }
    }
}

/// Short printable form of an opaque value for error messages
fn preview(bytes: &[u8]) -> String {
    const MAX: usize = 64;
    let shown = &bytes[..bytes.len().min(MAX)];
    let text = match std::str::from_utf8(shown) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => format!("{:?}", s),
        _ => format!("0x{}", hex::encode(shown)),
    };
    if bytes.len() > MAX {
        format!("{}... ({} bytes)", text, bytes.len())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_display() {
        let err = DevfarmError::LockTimeout {
            device_id: "a1b2c3".to_string(),
            timeout: Duration::from_millis(1500),
        };
        let msg = err.to_string();
        assert!(msg.contains("a1b2c3"));
        assert!(msg.contains("1.500s"));
    }

    #[test]
    fn conflicting_platform_info_display() {
        let err = DevfarmError::ConflictingPlatformInfo {
            existing_value: b"OpenCL 2.0 QUALCOMM".to_vec(),
            new_value: vec![0x00, 0xff],
        };
        let msg = err.to_string();
        assert!(msg.contains("\"OpenCL 2.0 QUALCOMM\""));
        assert!(msg.contains("0x00ff"));
    }

    #[test]
    fn preview_truncates_long_values() {
        let long = vec![b'a'; 100];
        let shown = preview(&long);
        assert!(shown.ends_with("(100 bytes)"));
    }

    #[test]
    fn error_hint() {
        let err = DevfarmError::DeviceNotFound("emulator-5554".to_string());
        assert_eq!(err.hint(), Some("List attached devices with: devfarm devices"));
        assert_eq!(DevfarmError::User("x".to_string()).hint(), None);
    }

    #[test]
    fn error_retryable() {
        let timeout = DevfarmError::LockTimeout {
            device_id: "d".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert!(!DevfarmError::malformed("/tmp/x.bin", "truncated").is_retryable());
    }
}
