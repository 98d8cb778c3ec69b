//! One installation attempt: the worker loop that reads the terminal, the
//! prompt state machine it drives, and the handle the controller writes
//! through.
//!
//! ```text
//! InstallSession::start ──► worker thread ──► SessionEvent (mpsc) ──► controller
//!          │                    ▲
//!          └── SessionHandle ───┘ send / resolve (write gate)
//! ```

mod events;
mod framing;
mod injector;
mod prompt;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{StartError, WriteRejected};
use crate::pty::{self, LaunchSpec, PtyChild};

pub use events::{RunOutcome, SessionEvent};
pub use framing::{FramedLine, LineFramer};
pub use injector::{normalize, SendReport};
pub use prompt::{
    classify, Decision, PromptKind, PromptState, PromptTracker, CHROOT_PROMPT_MARKER,
    CHROOT_QUESTION, YES_NO_AFFORDANCE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Draining,
    Terminated,
}

/// Loop and injector tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound on one readability wait.
    pub poll_timeout: Duration,
    /// Pause after the child exits so its last output reaches the master.
    pub drain_settle: Duration,
    /// Reads attempted while draining.
    pub drain_reads: u32,
    pub write_stall_timeout: Duration,
    /// Consecutive writability timeouts before a send gives up.
    pub max_write_stalls: u32,
    /// Time between SIGTERM and SIGKILL on teardown.
    pub terminate_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            drain_settle: Duration::from_millis(100),
            drain_reads: 16,
            write_stall_timeout: Duration::from_millis(100),
            max_write_stalls: 50,
            terminate_grace: Duration::from_millis(500),
        }
    }
}

/// State shared by the worker, the handles and the owning session.
struct Shared {
    child: PtyChild,
    options: SessionOptions,
    lifecycle: Mutex<Lifecycle>,
    prompt: Mutex<PromptTracker>,
    write_gate: Mutex<()>,
    stop: AtomicBool,
    finished: AtomicBool,
    events: Sender<SessionEvent>,
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        let mut current = self.lifecycle.lock();
        if *current != next {
            tracing::info!(pid = self.child.pid().as_raw(), from = ?*current, to = ?next, "session lifecycle");
            *current = next;
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    /// Emit the terminal event. Only the first call has any effect.
    fn finish(&self, outcome: RunOutcome) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let message = outcome.message();
        tracing::info!(%message, "installation run finished");
        self.emit(SessionEvent::RunFinished { outcome, message });
    }

    fn resolve(&self, accepted: bool) -> Result<Option<Decision>, WriteRejected> {
        self.resolve_with(accepted, |response| self.send(response))
    }

    /// `resolve` with the write supplied. A failed write reopens the
    /// question so it can be answered again.
    fn resolve_with(
        &self,
        accepted: bool,
        write: impl FnOnce(&str) -> Result<SendReport, WriteRejected>,
    ) -> Result<Option<Decision>, WriteRejected> {
        let decision = {
            let mut prompt = self.prompt.lock();
            if prompt.state() != PromptState::AwaitingYesNo {
                return Ok(None);
            }
            self.ensure_writable()?;
            prompt.resolve(accepted)
        };
        let Some(decision) = decision else {
            return Ok(None);
        };

        tracing::info!(?decision, "decision resolved");
        if let Err(err) = write(decision.response()) {
            tracing::warn!(error = %err, "answer not written, question reopened");
            self.prompt.lock().reopen();
            return Err(err);
        }
        if decision == Decision::Accept {
            self.prompt.lock().enter_privileged_shell();
            self.emit(SessionEvent::DecisionAccepted);
        }
        Ok(Some(decision))
    }
}

/// A running installation attempt. Dropping it tears the run down.
pub struct InstallSession {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl InstallSession {
    /// Allocate a terminal, launch `spec` in it and start the worker.
    ///
    /// A start failure is returned and also delivered on `events` as the
    /// run's only `RunFinished`.
    pub fn start(
        spec: &LaunchSpec,
        options: SessionOptions,
        events: Sender<SessionEvent>,
    ) -> Result<Self, StartError> {
        tracing::info!(program = %spec.program, args = ?spec.args, "starting installation session");
        let child = match pty::open().and_then(|pair| pty::spawn(pair, spec)) {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(error = %err, "installation session failed to start");
                let outcome = RunOutcome::StartFailed(err.clone());
                let message = outcome.message();
                let _ = events.send(SessionEvent::RunFinished { outcome, message });
                return Err(err);
            }
        };

        let shared = Arc::new(Shared {
            child,
            options,
            lifecycle: Mutex::new(Lifecycle::NotStarted),
            prompt: Mutex::new(PromptTracker::new()),
            write_gate: Mutex::new(()),
            stop: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            events,
        });
        shared.set_lifecycle(Lifecycle::Running);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("install-session".to_string())
            .spawn(move || worker::run(worker_shared));

        match worker {
            Ok(worker) => Ok(Self {
                shared,
                worker: Some(worker),
            }),
            Err(e) => {
                let err = StartError::spawn(&spec.program, format!("worker thread: {e}"));
                shared.child.release(shared.options.terminate_grace);
                shared.set_lifecycle(Lifecycle::Terminated);
                shared.finish(RunOutcome::StartFailed(err.clone()));
                Err(err)
            }
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn pid(&self) -> i32 {
        self.shared.child.pid().as_raw()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Whether the master descriptor is still open.
    pub fn is_open(&self) -> bool {
        self.shared.child.is_open()
    }

    /// Wait for the run to end on its own.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("installation worker panicked");
            }
        }
    }

    /// Stop the run: signal the child, close the terminal, wait for the
    /// worker to report. Idempotent.
    pub fn teardown(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.join();
        self.shared.child.release(self.shared.options.terminate_grace);
        self.shared.set_lifecycle(Lifecycle::Terminated);
    }
}

impl Drop for InstallSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Cheap, cloneable write access to a session.
///
/// Holds the session weakly: once the [`InstallSession`] is gone every call
/// is rejected with [`WriteRejected::NoSession`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Weak<Shared>,
}

impl SessionHandle {
    fn upgrade(&self) -> Result<Arc<Shared>, WriteRejected> {
        self.shared.upgrade().ok_or(WriteRejected::NoSession)
    }

    /// Write `text` (newline-terminated) to the child's input.
    pub fn send(&self, text: &str) -> Result<SendReport, WriteRejected> {
        self.upgrade()?.send(text)
    }

    /// Answer the pending chroot question. `Ok(None)` if none is pending.
    pub fn resolve(&self, accepted: bool) -> Result<Option<Decision>, WriteRejected> {
        self.upgrade()?.resolve(accepted)
    }

    pub fn prompt_state(&self) -> PromptState {
        self.upgrade()
            .map(|shared| shared.prompt.lock().state())
            .unwrap_or_default()
    }

    pub fn in_privileged_shell(&self) -> bool {
        self.upgrade()
            .is_ok_and(|shared| shared.prompt.lock().in_privileged_shell())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.upgrade()
            .map(|shared| shared.lifecycle())
            .unwrap_or(Lifecycle::Terminated)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn asking_session() -> (InstallSession, mpsc::Receiver<SessionEvent>) {
        let script = format!(
            "printf '%s' {}; read answer; echo \"[$answer]\"",
            shlex::try_quote(CHROOT_QUESTION).unwrap()
        );
        let (tx, rx) = mpsc::channel();
        let options = SessionOptions {
            poll_timeout: Duration::from_millis(10),
            drain_settle: Duration::from_millis(20),
            ..SessionOptions::default()
        };
        let spec = LaunchSpec::new("sh").args(["-c".to_string(), script]);
        let session = InstallSession::start(&spec, options, tx).unwrap();
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                SessionEvent::DecisionRequested => return (session, rx),
                SessionEvent::RunFinished { message, .. } => panic!("run ended early: {message}"),
                _ => {}
            }
        }
    }

    #[test]
    fn failed_answer_leaves_the_question_pending() {
        let (session, rx) = asking_session();
        let result = session
            .shared
            .resolve_with(true, |_| Err(WriteRejected::ProcessGone));
        assert_eq!(result, Err(WriteRejected::ProcessGone));

        let handle = session.handle();
        assert_eq!(handle.prompt_state(), PromptState::AwaitingYesNo);
        assert!(!handle.in_privileged_shell());

        assert_eq!(handle.resolve(false), Ok(Some(Decision::Decline)));
        let mut lines = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                SessionEvent::OutputLine(line) => lines.push(line),
                SessionEvent::RunFinished { .. } => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(lines.contains(&"[n]".to_string()));
    }
}
