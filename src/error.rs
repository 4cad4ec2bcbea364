use std::path::PathBuf;

/// Failures that abort a reconciliation run.
///
/// Everything here maps to exit status 1. A refused restart is not an error;
/// see `reconcile::Outcome::GuardRefused`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invocation cannot proceed: not privileged or a malformed value.
    /// Raised before any side effect.
    #[error("{0}")]
    Precondition(String),

    /// The existing document could not be read or understood.
    #[error("Failed to read {}: {reason}", path.display())]
    ConfigRead { path: PathBuf, reason: String },

    /// The document could not be written. The previous file is intact.
    #[error("Failed to write {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A service did not reach the expected state within its retry budget.
    #[error("{service} failed to become {expected} after {attempts} attempt(s)\n{diagnostic}")]
    Transition {
        service: String,
        expected: &'static str,
        attempts: u32,
        diagnostic: String,
    },
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message_carries_diagnostic() {
        let err = Error::Transition {
            service: "sysbox-mgr".to_string(),
            expected: "ready",
            attempts: 3,
            diagnostic: "panic: cannot open /dev/fuse".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sysbox-mgr failed to become ready after 3 attempt(s)"));
        assert!(msg.ends_with("panic: cannot open /dev/fuse"));
    }

    #[test]
    fn test_config_write_keeps_io_source() {
        let err = Error::ConfigWrite {
            path: PathBuf::from("/etc/docker/daemon.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/etc/docker/daemon.json"));
    }
}
