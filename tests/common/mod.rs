//! Shared helpers for session tests.

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use obsidian_install::pty::LaunchSpec;
use obsidian_install::session::{InstallSession, RunOutcome, SessionEvent, SessionOptions};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Session options tuned for quick tests.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        poll_timeout: Duration::from_millis(10),
        drain_settle: Duration::from_millis(50),
        drain_reads: 16,
        write_stall_timeout: Duration::from_millis(20),
        max_write_stalls: 10,
        terminate_grace: Duration::from_millis(500),
    }
}

pub fn start(spec: &LaunchSpec) -> (InstallSession, Receiver<SessionEvent>) {
    let (tx, rx) = mpsc::channel();
    let session = InstallSession::start(spec, fast_options(), tx).expect("session failed to start");
    (session, rx)
}

/// Run `script` with `sh -c` in a fresh session.
pub fn start_sh(script: &str) -> (InstallSession, Receiver<SessionEvent>) {
    start(&LaunchSpec::new("sh").args(["-c", script]))
}

/// Shell snippet printing `text` without a trailing newline.
pub fn print_raw(text: &str) -> String {
    format!("printf '%s' {}", shlex::try_quote(text).expect("quotable"))
}

/// Collect events up to and including the first one matching `pred`.
pub fn events_until(
    rx: &Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    let mut events = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|e| panic!("no matching event ({e}); got so far: {events:?}"));
        let done = pred(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

pub fn events_until_finished(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    events_until(rx, |e| matches!(e, SessionEvent::RunFinished { .. }))
}

pub fn output_lines(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::OutputLine(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

pub fn outcome(events: &[SessionEvent]) -> RunOutcome {
    events
        .iter()
        .find_map(|e| match e {
            SessionEvent::RunFinished { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
        .expect("no RunFinished event")
}

pub fn count(events: &[SessionEvent], wanted: &SessionEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}
