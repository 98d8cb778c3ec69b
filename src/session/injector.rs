use std::borrow::Cow;

use crate::error::WriteRejected;
use crate::pty::io;
use crate::session::{Lifecycle, Shared};

/// What a send actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Bytes after newline normalization.
    pub requested: usize,
    pub written: usize,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.written == self.requested
    }
}

/// Terminate `text` with a newline unless it already ends with one.
pub fn normalize(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}

impl Shared {
    /// Preconditions for any write; no I/O happens when these fail.
    pub(super) fn ensure_writable(&self) -> Result<(), WriteRejected> {
        match self.lifecycle() {
            Lifecycle::NotStarted => return Err(WriteRejected::NoSession),
            Lifecycle::Draining | Lifecycle::Terminated => return Err(WriteRejected::ProcessGone),
            Lifecycle::Running => {}
        }
        if !self.child.is_alive() {
            return Err(WriteRejected::ProcessGone);
        }
        if !self.child.is_open() {
            return Err(WriteRejected::NoSession);
        }
        Ok(())
    }

    pub(super) fn send(&self, text: &str) -> Result<SendReport, WriteRejected> {
        let _gate = self.write_gate.lock();
        self.ensure_writable()?;

        let payload = normalize(text);
        let requested = payload.len();
        let written = self
            .child
            .with_master(|fd| {
                io::write_payload(
                    fd,
                    payload.as_bytes(),
                    self.options.write_stall_timeout,
                    self.options.max_write_stalls,
                )
            })
            .ok_or(WriteRejected::NoSession)?;

        if written < requested {
            tracing::warn!(written, requested, "short write to installation process");
        } else {
            tracing::debug!(bytes = written, "input sent");
        }
        Ok(SendReport { requested, written })
    }
}
