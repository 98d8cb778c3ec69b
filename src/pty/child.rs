use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use parking_lot::{Mutex, RwLock};

use crate::pty::status::TerminationResult;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const KILL_WAIT: Duration = Duration::from_secs(2);
const DROP_GRACE: Duration = Duration::from_millis(200);

/// Owns the master descriptor and the child pid of one launched process.
///
/// Every method takes `&self` so the guard can be shared between the worker
/// loop (reads, reaping) and the input injector (writes). Closing the master
/// takes the write side of the lock, so it waits for in-flight I/O, which is
/// always bounded by a poll timeout.
pub struct PtyChild {
    master: RwLock<Option<OwnedFd>>,
    pid: Pid,
    reap_lock: Mutex<()>,
    reaped: AtomicBool,
}

impl PtyChild {
    pub(crate) fn new(master: OwnedFd, pid: Pid) -> Self {
        Self {
            master: RwLock::new(Some(master)),
            pid,
            reap_lock: Mutex::new(()),
            reaped: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_open(&self) -> bool {
        self.master.read().is_some()
    }

    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }

    /// Run `f` against the master while holding it open. `None` once closed.
    pub(crate) fn with_master<R>(&self, f: impl FnOnce(BorrowedFd<'_>) -> R) -> Option<R> {
        let guard = self.master.read();
        guard.as_ref().map(|fd| f(fd.as_fd()))
    }

    /// Zero-signal probe.
    pub fn is_alive(&self) -> bool {
        if self.is_reaped() {
            return false;
        }
        match signal::kill(self.pid, None) {
            Ok(()) => true,
            // The pid exists but belongs to another user (sudo runs as root).
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    /// Non-blocking reap. Returns the result exactly once.
    pub fn try_wait(&self) -> Option<TerminationResult> {
        let _guard = self.reap_lock.lock();
        if self.is_reaped() {
            return None;
        }

        let result = match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => TerminationResult::from_wait_status(status)?,
            Err(Errno::EINTR) => return None,
            Err(e) => TerminationResult::WaitFailed(e.to_string()),
        };
        self.reaped.store(true, Ordering::SeqCst);
        tracing::debug!(pid = self.pid.as_raw(), ?result, "child reaped");
        Some(result)
    }

    /// Poll [`try_wait`](Self::try_wait) until it yields or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TerminationResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.try_wait() {
                return Some(result);
            }
            if self.is_reaped() || Instant::now() >= deadline {
                return None;
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    /// SIGTERM, wait `grace`, then SIGKILL and reap.
    ///
    /// Returns the termination result if this call reaped the child, `None`
    /// if it was already reaped or refused to die.
    pub fn terminate(&self, grace: Duration) -> Option<TerminationResult> {
        if self.is_reaped() {
            return None;
        }
        if let Some(result) = self.try_wait() {
            return Some(result);
        }

        tracing::info!(pid = self.pid.as_raw(), "terminating installation process");
        if let Err(e) = signal::kill(self.pid, Signal::SIGTERM) {
            tracing::warn!(pid = self.pid.as_raw(), error = %e, "SIGTERM failed");
        }
        if let Some(result) = self.wait_timeout(grace) {
            return Some(result);
        }

        tracing::warn!(pid = self.pid.as_raw(), "process ignored SIGTERM, sending SIGKILL");
        if let Err(e) = signal::kill(self.pid, Signal::SIGKILL) {
            tracing::warn!(pid = self.pid.as_raw(), error = %e, "SIGKILL failed");
        }
        let result = self.wait_timeout(KILL_WAIT);
        if result.is_none() && !self.is_reaped() {
            tracing::warn!(pid = self.pid.as_raw(), "process could not be reaped");
        }
        result
    }

    /// Close the master descriptor. Idempotent.
    pub fn close_master(&self) {
        if self.master.write().take().is_some() {
            tracing::debug!(pid = self.pid.as_raw(), "pty master closed");
        }
    }

    /// Terminate (if needed) and close. Safe to call any number of times.
    pub fn release(&self, grace: Duration) -> Option<TerminationResult> {
        let result = self.terminate(grace);
        self.close_master();
        result
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        let _ = self.release(DROP_GRACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{open, spawn, LaunchSpec};

    fn sh(script: &str) -> PtyChild {
        let spec = LaunchSpec::new("sh").args(["-c", script]);
        spawn(open().unwrap(), &spec).expect("spawn failed")
    }

    #[test]
    fn wait_reports_exit_code_once() {
        let child = sh("exit 3");
        let result = child.wait_timeout(Duration::from_secs(5));
        assert_eq!(result, Some(TerminationResult::ExitedWithCode(3)));
        assert!(child.is_reaped());
        assert_eq!(child.try_wait(), None);
        assert!(!child.is_alive());
    }

    #[test]
    fn terminate_signals_a_running_child() {
        let child = sh("exec sleep 30");
        // Let the child get past exec before signalling it.
        thread::sleep(Duration::from_millis(100));
        assert!(child.is_alive());
        let result = child.terminate(Duration::from_secs(2));
        assert_eq!(result, Some(TerminationResult::KilledBySignal(libc::SIGTERM)));
    }

    #[test]
    fn release_is_idempotent() {
        let child = sh("exec sleep 30");
        assert!(child.release(Duration::from_secs(2)).is_some());
        assert!(!child.is_open());
        assert_eq!(child.release(Duration::from_secs(2)), None);
        assert!(child.with_master(|_| ()).is_none());
    }

    #[test]
    fn missing_command_exits_127() {
        let spec = LaunchSpec::new("/nonexistent/obsidianctl");
        let child = spawn(open().unwrap(), &spec).unwrap();
        assert_eq!(
            child.wait_timeout(Duration::from_secs(5)),
            Some(TerminationResult::ExitedWithCode(crate::pty::EXIT_COMMAND_NOT_FOUND))
        );
    }
}
