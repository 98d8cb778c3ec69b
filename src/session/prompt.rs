//! Chroot-confirmation prompt detection and the decision state machine.

/// Phrase identifying the chroot confirmation question.
pub const CHROOT_PROMPT_MARKER: &str = "chroot into slot";
/// The explicit yes/no affordance that must accompany the marker.
pub const YES_NO_AFFORDANCE: &str = "(y/N)";
/// The question as the installation tool prints it.
pub const CHROOT_QUESTION: &str =
    "Do you want to chroot into slot 'a' to make changes before copying it to slot B? (y/N): ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    None,
    YesNo,
}

/// Stateless line classifier.
pub fn classify(line: &str) -> PromptKind {
    if line.contains(CHROOT_PROMPT_MARKER) && line.contains(YES_NO_AFFORDANCE) {
        PromptKind::YesNo
    } else {
        PromptKind::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptState {
    #[default]
    Idle,
    AwaitingYesNo,
}

/// The answer written back to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

impl Decision {
    pub fn from_accepted(accepted: bool) -> Self {
        if accepted {
            Self::Accept
        } else {
            Self::Decline
        }
    }

    pub fn response(self) -> &'static str {
        match self {
            Self::Accept => "y",
            Self::Decline => "n",
        }
    }
}

#[derive(Debug, Default)]
pub struct PromptTracker {
    state: PromptState,
    privileged_shell: bool,
}

impl PromptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    /// Whether an accepted decision has put the child into the chroot shell.
    pub fn in_privileged_shell(&self) -> bool {
        self.privileged_shell
    }

    /// Run the detector over one line. Returns `true` only when the line
    /// opens a new decision; repeats while one is pending are ignored.
    pub fn observe(&mut self, line: &str) -> bool {
        if classify(line) != PromptKind::YesNo || self.state == PromptState::AwaitingYesNo {
            return false;
        }
        self.state = PromptState::AwaitingYesNo;
        true
    }

    /// Close the pending decision. `None` (and no state change) when idle.
    pub fn resolve(&mut self, accepted: bool) -> Option<Decision> {
        if self.state != PromptState::AwaitingYesNo {
            return None;
        }
        self.state = PromptState::Idle;
        Some(Decision::from_accepted(accepted))
    }

    /// Put a resolved decision back when its answer never reached the child.
    pub fn reopen(&mut self) {
        self.state = PromptState::AwaitingYesNo;
    }

    pub fn enter_privileged_shell(&mut self) {
        self.privileged_shell = true;
    }
}
