//! Error types for the sandbox auditor.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for auditor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading the baseline, collecting a snapshot,
/// or evaluating it.
///
/// Policy violations are not errors; they are reported through
/// [`crate::report::ViolationRecord`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate baseline entry for process '{name}' with user '{user}'")]
    DuplicateBaselineEntry { name: String, user: String },

    #[error("root process (pid 1) not present in snapshot")]
    RootProcessMissing,

    #[error("process not in snapshot: pid {0}")]
    ProcessNotInSnapshot(u32),

    #[error("failed to resolve {kind} '{name}'")]
    IdentityLookup { kind: &'static str, name: String },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("snapshot collection timed out after {0}s")]
    SnapshotTimeout(u64),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("audit failed: {violations} non-compliant processes, {errors} evaluation errors")]
    AuditFailed { violations: usize, errors: usize },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    pub fn unknown_user(name: impl Into<String>) -> Self {
        Self::IdentityLookup {
            kind: "user",
            name: name.into(),
        }
    }

    pub fn unknown_group(name: impl Into<String>) -> Self {
        Self::IdentityLookup {
            kind: "group",
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("bad baseline");
        assert_eq!(err.to_string(), "configuration error: bad baseline");
    }

    #[test]
    fn test_error_duplicate_baseline_entry() {
        let err = Error::DuplicateBaselineEntry {
            name: "powerd".to_string(),
            user: "power".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "duplicate baseline entry for process 'powerd' with user 'power'"
        );
    }

    #[test]
    fn test_error_root_missing() {
        let err = Error::RootProcessMissing;
        assert_eq!(err.to_string(), "root process (pid 1) not present in snapshot");
    }

    #[test]
    fn test_error_process_not_in_snapshot() {
        let err = Error::ProcessNotInSnapshot(4242);
        assert_eq!(err.to_string(), "process not in snapshot: pid 4242");
    }

    #[test]
    fn test_error_identity_lookup() {
        let err = Error::unknown_user("power");
        assert_eq!(err.to_string(), "failed to resolve user 'power'");

        let err = Error::unknown_group("cras");
        assert_eq!(err.to_string(), "failed to resolve group 'cras'");
    }

    #[test]
    fn test_error_snapshot_timeout() {
        let err = Error::SnapshotTimeout(30);
        assert_eq!(err.to_string(), "snapshot collection timed out after 30s");
    }

    #[test]
    fn test_error_audit_failed() {
        let err = Error::AuditFailed {
            violations: 3,
            errors: 1,
        };
        assert_eq!(
            err.to_string(),
            "audit failed: 3 non-compliant processes, 1 evaluation errors"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().contains("JSON serialization error"));
    }
}
