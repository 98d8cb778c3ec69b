mod common;

use std::sync::mpsc;
use std::time::Duration;

use common::*;
use obsidian_install::error::WriteRejected;
use obsidian_install::pty::{LaunchSpec, TerminationResult};
use obsidian_install::session::{
    Decision, InstallSession, Lifecycle, PromptState, RunOutcome, SessionEvent, CHROOT_QUESTION,
};

#[test]
fn exit_code_is_reported_and_nothing_follows() {
    let (session, rx) = start_sh("echo before; exit 3");
    let events = events_until_finished(&rx);

    assert_eq!(
        outcome(&events),
        RunOutcome::Completed(TerminationResult::ExitedWithCode(3))
    );
    assert_eq!(output_lines(&events), vec!["before"]);
    assert!(matches!(
        rx.recv_timeout(Duration::from_millis(300)),
        Err(mpsc::RecvTimeoutError::Timeout)
    ));
    assert_eq!(session.lifecycle(), Lifecycle::Terminated);
    assert!(!session.is_open());
}

#[test]
fn finished_message_is_human_readable() {
    let (_session, rx) = start_sh("exit 0");
    let events = events_until_finished(&rx);
    let Some(SessionEvent::RunFinished { outcome, message }) = events.last() else {
        panic!("last event is not RunFinished: {events:?}");
    };
    assert!(outcome.is_success());
    assert_eq!(message, "Installation completed successfully");
}

#[test]
fn trailing_output_without_newline_is_drained() {
    let (_session, rx) = start_sh("printf 'last words'; exit 1");
    let events = events_until_finished(&rx);
    assert_eq!(output_lines(&events), vec!["last words"]);
    assert_eq!(
        outcome(&events),
        RunOutcome::Completed(TerminationResult::ExitedWithCode(1))
    );
}

#[test]
fn send_after_exit_is_rejected_as_process_gone() {
    let (session, rx) = start_sh("exit 0");
    events_until_finished(&rx);
    assert_eq!(session.handle().send("whoami"), Err(WriteRejected::ProcessGone));
}

#[test]
fn handle_without_session_is_rejected() {
    let (session, _rx) = start_sh("exec sleep 30");
    let handle = session.handle();
    drop(session);
    assert_eq!(handle.send("whoami"), Err(WriteRejected::NoSession));
    assert_eq!(handle.resolve(true), Err(WriteRejected::NoSession));
    assert_eq!(handle.lifecycle(), Lifecycle::Terminated);
}

#[test]
fn missing_command_finishes_with_127() {
    let (_session, rx) = start(&LaunchSpec::new("/nonexistent/obsidianctl"));
    let events = events_until_finished(&rx);
    assert_eq!(
        outcome(&events),
        RunOutcome::Completed(TerminationResult::ExitedWithCode(127))
    );
}

#[test]
fn start_failure_is_returned_and_reported() {
    let (tx, rx) = mpsc::channel();
    let spec = LaunchSpec::new("sh").arg("bad\0arg");
    let err = match InstallSession::start(&spec, fast_options(), tx) {
        Ok(_) => panic!("start should fail"),
        Err(err) => err,
    };
    let events = events_until_finished(&rx);
    assert_eq!(events.len(), 1);
    assert_eq!(outcome(&events), RunOutcome::StartFailed(err));
}

#[test]
fn teardown_reports_a_single_signal_termination() {
    let (mut session, rx) = start_sh("exec sleep 30");
    session.teardown();
    session.teardown();

    let events: Vec<_> = rx.try_iter().collect();
    let finished: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::RunFinished { .. }))
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(
        outcome(&events),
        RunOutcome::Completed(TerminationResult::KilledBySignal(libc::SIGTERM))
    );
    assert!(!session.is_open());
    assert_eq!(session.lifecycle(), Lifecycle::Terminated);
}

#[test]
fn sent_lines_reach_the_child() {
    let (session, rx) = start_sh("read line; echo \"got:$line\"");
    let report = session.handle().send("hello").unwrap();
    assert_eq!(report.requested, 6);
    assert!(report.is_complete());

    let events = events_until_finished(&rx);
    assert!(output_lines(&events).contains(&"got:hello".to_string()));
}

#[test]
fn resolve_while_idle_writes_nothing() {
    let (session, rx) = start_sh("read line; echo \"got:$line\"");
    let handle = session.handle();
    assert_eq!(handle.resolve(true), Ok(None));
    assert_eq!(handle.prompt_state(), PromptState::Idle);
    handle.send("first").unwrap();

    let events = events_until_finished(&rx);
    let lines = output_lines(&events);
    assert!(lines.contains(&"got:first".to_string()));
    assert!(!lines.iter().any(|l| l == "y" || l == "got:y"));
    assert_eq!(count(&events, &SessionEvent::DecisionAccepted), 0);
}

#[test]
fn accepting_the_question_writes_y() {
    let script = format!("{}; read answer; echo \"[$answer]\"", print_raw(CHROOT_QUESTION));
    let (session, rx) = start_sh(&script);
    let handle = session.handle();

    let before = events_until(&rx, |e| *e == SessionEvent::DecisionRequested);
    assert!(output_lines(&before)
        .last()
        .is_some_and(|l| l.contains("chroot into slot")));
    assert_eq!(handle.prompt_state(), PromptState::AwaitingYesNo);

    assert_eq!(handle.resolve(true), Ok(Some(Decision::Accept)));
    assert_eq!(handle.prompt_state(), PromptState::Idle);
    assert!(handle.in_privileged_shell());

    let after = events_until_finished(&rx);
    assert_eq!(count(&after, &SessionEvent::DecisionAccepted), 1);
    assert!(output_lines(&after).contains(&"[y]".to_string()));
    assert!(outcome(&after).is_success());
}

#[test]
fn duplicated_question_requests_one_decision() {
    let script = format!(
        "{q}; printf '\\n'; {q}; read answer; echo \"[$answer]\"",
        q = print_raw(CHROOT_QUESTION)
    );
    let (session, rx) = start_sh(&script);
    events_until(&rx, |e| *e == SessionEvent::DecisionRequested);
    // Give the second copy time to arrive before answering.
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(session.handle().resolve(false), Ok(Some(Decision::Decline)));
    let events = events_until_finished(&rx);
    assert_eq!(count(&events, &SessionEvent::DecisionRequested), 0);
    assert_eq!(count(&events, &SessionEvent::DecisionAccepted), 0);
    assert!(output_lines(&events).contains(&"[n]".to_string()));
    assert!(!session.handle().in_privileged_shell());
}

#[test]
fn question_split_across_reads_is_detected() {
    let (head, tail) = CHROOT_QUESTION.split_at(CHROOT_QUESTION.find(" (y/N)").unwrap());
    let script = format!(
        "{}; sleep 0.3; {}; read answer; echo \"[$answer]\"",
        print_raw(head),
        print_raw(tail)
    );
    let (session, rx) = start_sh(&script);

    let before = events_until(&rx, |e| *e == SessionEvent::DecisionRequested);
    // Each piece is still shown as it arrived.
    assert_eq!(output_lines(&before), [head, tail]);

    assert_eq!(session.handle().resolve(false), Ok(Some(Decision::Decline)));
    let after = events_until_finished(&rx);
    assert_eq!(count(&after, &SessionEvent::DecisionRequested), 0);
    assert!(output_lines(&after).contains(&"[n]".to_string()));
    assert!(outcome(&after).is_success());
}
