use crate::error::StartError;
use crate::pty::TerminationResult;

/// Everything the controller hears from a running session.
///
/// For one session the stream is: output lines and decision events in
/// arrival order, then exactly one `RunFinished`, then nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    OutputLine(String),
    /// The chroot question was seen; answer with `SessionHandle::resolve`.
    DecisionRequested,
    /// The user accepted and the child is now in the chroot shell.
    DecisionAccepted,
    RunFinished { outcome: RunOutcome, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(TerminationResult),
    StartFailed(StartError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(result) if result.is_success())
    }

    pub fn message(&self) -> String {
        match self {
            Self::Completed(result) => result.message(),
            Self::StartFailed(err) => format!("Failed to start installation: {err}"),
        }
    }

    /// Process exit status mirroring the child's.
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Completed(TerminationResult::ExitedOk) => 0,
            Self::Completed(TerminationResult::ExitedWithCode(code)) => {
                u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1)
            }
            Self::Completed(TerminationResult::KilledBySignal(signal)) => {
                u8::try_from(128 + *signal).unwrap_or(1)
            }
            Self::Completed(TerminationResult::WaitFailed(_)) | Self::StartFailed(_) => 1,
        }
    }
}
