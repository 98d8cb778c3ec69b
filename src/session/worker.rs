use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use nix::poll::PollFlags;

use crate::pty::io::{self, ReadOutcome};
use crate::pty::TerminationResult;
use crate::session::{
    classify, FramedLine, Lifecycle, LineFramer, PromptKind, RunOutcome, SessionEvent, Shared,
};

const READ_CHUNK: usize = 4096;

/// Body of the `install-session` thread.
pub(super) fn run(shared: Arc<Shared>) {
    // Whatever happens below, the child is released and one RunFinished goes out.
    let shared = scopeguard::guard(shared, |shared| {
        if !shared.finished.load(Ordering::SeqCst) {
            tracing::error!("installation worker exited without a result");
            let result = shared
                .child
                .release(shared.options.terminate_grace)
                .unwrap_or_else(|| TerminationResult::WaitFailed("worker aborted".to_string()));
            shared.set_lifecycle(Lifecycle::Terminated);
            shared.finish(RunOutcome::Completed(result));
        }
    });

    let mut worker = Worker {
        shared: &shared,
        framer: LineFramer::new(),
        buf: vec![0u8; READ_CHUNK],
    };
    let result = worker.run_loop();
    worker.drain();

    shared.set_lifecycle(Lifecycle::Terminated);
    shared.child.close_master();
    shared.finish(RunOutcome::Completed(result));
}

struct Worker<'a> {
    shared: &'a Shared,
    framer: LineFramer,
    buf: Vec<u8>,
}

impl Worker<'_> {
    /// Read and forward until the child is gone or a stop is requested.
    fn run_loop(&mut self) -> TerminationResult {
        let shared = self.shared;
        let options = &shared.options;
        let mut stream_open = true;

        loop {
            if shared.stop.load(Ordering::SeqCst) {
                tracing::info!("teardown requested, stopping installation process");
                return self.stop_child();
            }
            if let Some(result) = shared.child.try_wait() {
                return result;
            }

            if !stream_open {
                // Output is closed but the process lingers; keep reaping.
                thread::sleep(options.poll_timeout);
                continue;
            }

            let ready = shared
                .child
                .with_master(|fd| io::wait_ready(fd, PollFlags::POLLIN, options.poll_timeout));
            match ready {
                Some(Ok(true)) => {}
                Some(Ok(false)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "poll on pty master failed");
                    stream_open = false;
                    continue;
                }
                None => {
                    stream_open = false;
                    continue;
                }
            }

            match self.read_once() {
                ReadOutcome::Data(n) => self.forward_bytes(n, true),
                ReadOutcome::WouldBlock => {}
                ReadOutcome::Closed => {
                    tracing::debug!("pty output closed, waiting for exit");
                    stream_open = false;
                }
            }
        }
    }

    fn stop_child(&self) -> TerminationResult {
        self.shared
            .child
            .terminate(self.shared.options.terminate_grace)
            .unwrap_or_else(|| TerminationResult::WaitFailed("process could not be reaped".to_string()))
    }

    /// Flush what the child wrote before it exited. Lines forwarded here no
    /// longer drive the prompt state machine.
    fn drain(&mut self) {
        self.shared.set_lifecycle(Lifecycle::Draining);
        if self.shared.stop.load(Ordering::SeqCst) {
            return;
        }

        thread::sleep(self.shared.options.drain_settle);
        for _ in 0..self.shared.options.drain_reads {
            match self.read_once() {
                ReadOutcome::Data(n) => self.forward_bytes(n, false),
                ReadOutcome::WouldBlock | ReadOutcome::Closed => break,
            }
        }
        if let Some(rest) = self.framer.finish() {
            self.shared.emit(SessionEvent::OutputLine(rest));
        }
    }

    fn read_once(&mut self) -> ReadOutcome {
        let buf = &mut self.buf;
        self.shared
            .child
            .with_master(|fd| io::read_available(fd, buf))
            .unwrap_or(ReadOutcome::Closed)
    }

    fn forward_bytes(&mut self, n: usize, detect: bool) {
        for line in self.framer.push(&self.buf[..n]) {
            let requested = detect && self.detect(&line);
            self.shared.emit(SessionEvent::OutputLine(line.text));
            if requested {
                tracing::info!("chroot confirmation requested");
                self.shared.emit(SessionEvent::DecisionRequested);
            }
        }
    }

    /// Classify the whole terminal line, so a question split across reads
    /// is still seen. A matched line is consumed; the echoed answer that
    /// follows on the same line must not match again.
    fn detect(&mut self, line: &FramedLine) -> bool {
        let whole = line.whole();
        if classify(&whole) != PromptKind::YesNo {
            return false;
        }
        if line.partial {
            self.framer.clear_flushed();
        }
        self.shared.prompt.lock().observe(&whole)
    }
}
