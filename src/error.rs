use nix::errno::Errno;
use thiserror::Error;

/// Failures that abort a run before the worker loop exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("failed to allocate a pseudo-terminal ({stage}): {source}")]
    Allocation {
        stage: &'static str,
        #[source]
        source: Errno,
    },

    #[error("failed to launch '{program}': {reason}")]
    Spawn { program: String, reason: String },
}

impl StartError {
    pub(crate) fn allocation(stage: &'static str, source: Errno) -> Self {
        Self::Allocation { stage, source }
    }

    pub(crate) fn spawn(program: &str, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why the input injector refused to write.
///
/// Both cases are detected before any I/O is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteRejected {
    #[error("no installation session is open")]
    NoSession,

    #[error("the installation process is no longer running")]
    ProcessGone,
}
