use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// How the installation process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationResult {
    ExitedOk,
    ExitedWithCode(i32),
    KilledBySignal(i32),
    WaitFailed(String),
}

impl TerminationResult {
    /// Classify a wait status. `None` while the child is still running,
    /// stopped or continued.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, 0) => Some(Self::ExitedOk),
            WaitStatus::Exited(_, code) => Some(Self::ExitedWithCode(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::KilledBySignal(signal as i32)),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::ExitedOk)
    }

    pub fn message(&self) -> String {
        match self {
            Self::ExitedOk => "Installation completed successfully".to_string(),
            Self::ExitedWithCode(code) => format!("Installation failed with exit code {code}"),
            Self::KilledBySignal(signal) => match Signal::try_from(*signal) {
                Ok(sig) => format!("Installation was terminated by signal {signal} ({})", sig.as_str()),
                Err(_) => format!("Installation was terminated by signal {signal}"),
            },
            Self::WaitFailed(reason) => {
                format!("Installation status unknown: waiting for the process failed: {reason}")
            }
        }
    }
}

impl fmt::Display for TerminationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
