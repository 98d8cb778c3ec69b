//! End-to-end runs of the scripted installer stand-in.

mod common;

use std::sync::mpsc::Receiver;
use std::time::Duration;

use common::*;
use obsidian_install::install::{ConfigSequencer, InstallPlan, RunMode, SystemSettings};
use obsidian_install::pty::TerminationResult;
use obsidian_install::session::{Decision, InstallSession, RunOutcome, SessionEvent};

const PROGRESS: [&str; 4] = [
    "Test running...",
    "Partitioning disk...",
    "Installing system image...",
    "Configuring bootloader...",
];

fn scripted_run() -> (InstallSession, Receiver<SessionEvent>) {
    let mode = RunMode::Test {
        step_delay: Duration::from_millis(20),
    };
    start(&InstallPlan::new("/dev/null").launch_spec(&mode))
}

#[test]
fn declined_run_completes() {
    let (session, rx) = scripted_run();

    let before = events_until(&rx, |e| *e == SessionEvent::DecisionRequested);
    let lines = output_lines(&before);
    assert_eq!(lines[..4], PROGRESS);
    assert_eq!(lines.len(), 5);
    assert!(lines[4].contains("chroot into slot 'a'"));

    assert_eq!(session.handle().resolve(false), Ok(Some(Decision::Decline)));
    let after = events_until_finished(&rx);
    let lines = output_lines(&after);
    assert!(lines.contains(&"User answered: n".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("Installation complete"));
    assert_eq!(
        outcome(&after),
        RunOutcome::Completed(TerminationResult::ExitedOk)
    );
}

#[test]
fn accepted_run_enters_the_shell() {
    let (session, rx) = scripted_run();
    events_until(&rx, |e| *e == SessionEvent::DecisionRequested);

    let handle = session.handle();
    assert_eq!(handle.resolve(true), Ok(Some(Decision::Accept)));
    assert!(handle.in_privileged_shell());

    let after = events_until_finished(&rx);
    assert_eq!(count(&after, &SessionEvent::DecisionAccepted), 1);
    assert!(output_lines(&after).contains(&"User answered: y".to_string()));
    assert!(outcome(&after).is_success());
}

#[test]
fn sequencer_types_every_command_into_the_shell() {
    let (session, rx) = start_sh(
        "while read -r line; do echo \"ran: $line\"; [ \"$line\" = exit ] && break; done",
    );
    let handle = session.handle();
    let settings = SystemSettings {
        locale: "en_US.UTF-8".into(),
        timezone: "UTC".into(),
        keyboard: "us".into(),
        fullname: "Jane Doe".into(),
        username: "jane".into(),
        password: "pw".into(),
        root_password: "rootpw".into(),
    };

    let sent = ConfigSequencer::new(Duration::from_millis(5))
        .apply(&handle, &settings)
        .unwrap();
    assert_eq!(sent, 9);
    handle.send("exit").unwrap();

    let events = events_until_finished(&rx);
    let ran: Vec<_> = output_lines(&events)
        .into_iter()
        .filter(|l| l.starts_with("ran: "))
        .collect();
    assert_eq!(ran.len(), 10);
    assert_eq!(ran[0], "ran: locale-gen en_US.UTF-8 || true");
    assert!(ran[7].ends_with("| chpasswd"));
    assert_eq!(ran[9], "ran: exit");
    assert!(outcome(&events).is_success());
}
