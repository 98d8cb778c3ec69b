use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use obsidian_install::config::Config;
use obsidian_install::install::{
    redact_credentials, ConfigSequencer, InstallPlan, RunMode, SystemSettings,
};
use obsidian_install::logging;
use obsidian_install::session::{
    InstallSession, RunOutcome, SessionEvent, SessionHandle, SessionOptions,
};
use obsidian_install::shutdown::ShutdownSignal;

mod cli;

use cli::{AnswerMode, Cli};

const USAGE_ERROR: u8 = 2;
const TICK: Duration = Duration::from_millis(100);

struct Prepared {
    config: Config,
    plan: InstallPlan,
    mode: RunMode,
    settings: Option<SystemSettings>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let prepared = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("obsidian-install: {err:#}");
            return ExitCode::from(USAGE_ERROR);
        }
    };

    match run(prepared, cli.answer) {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            eprintln!("obsidian-install: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn prepare(cli: &Cli) -> Result<Prepared> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load settings")?;

    let plan = cli.plan(&config);
    plan.validate().context("invalid installation plan")?;
    let settings = cli.system_settings();

    let mode = RunMode::resolve(
        cli.test || config.installer.test_mode,
        &config.installer.tool,
        config.test_mode.step_delay(),
    );
    tracing::info!(?mode, disk = %plan.disk, image = %plan.image, "installation prepared");

    Ok(Prepared {
        config,
        plan,
        mode,
        settings,
    })
}

fn run(prepared: Prepared, answer: AnswerMode) -> Result<u8> {
    let Prepared {
        config,
        plan,
        mode,
        mut settings,
    } = prepared;
    let shutdown = ShutdownSignal::install().context("failed to install signal handlers")?;

    if mode.is_test() {
        eprintln!("Running in test mode; no disk will be modified.");
    }

    let (events_tx, events) = mpsc::channel();
    let spec = plan.launch_spec(&mode);
    let mut session =
        match InstallSession::start(&spec, SessionOptions::from(&config.session), events_tx) {
            Ok(session) => session,
            Err(err) => {
                let outcome = RunOutcome::StartFailed(err);
                eprintln!("{}", outcome.message());
                return Ok(outcome.exit_status());
            }
        };
    tracing::info!(pid = session.pid(), "installation started");

    let handle = session.handle();
    let mut input = Some(spawn_stdin_reader()?);
    let sequencer = ConfigSequencer::new(config.sequencer.command_delay());
    let mut awaiting_answer = false;
    let mut stopping = false;

    loop {
        if shutdown.is_triggered() && !stopping {
            stopping = true;
            eprintln!("Interrupted, stopping the installation...");
            session.teardown();
        }

        match events.recv_timeout(TICK) {
            // The chroot shell echoes the password commands back.
            Ok(SessionEvent::OutputLine(line)) => println!("{}", redact_credentials(&line)),
            Ok(SessionEvent::DecisionRequested) => match answer {
                AnswerMode::Ask if input.is_none() => {
                    eprintln!("No answer available, declining the chroot.");
                    resolve(&handle, false);
                }
                AnswerMode::Ask => awaiting_answer = true,
                AnswerMode::Yes => resolve(&handle, true),
                AnswerMode::No => resolve(&handle, false),
            },
            Ok(SessionEvent::DecisionAccepted) => {
                let leave_shell = answer == AnswerMode::Yes;
                match settings.take() {
                    Some(settings) => {
                        spawn_sequencer(handle.clone(), sequencer.clone(), settings, leave_shell)?
                    }
                    None if leave_shell => send(&handle, "exit"),
                    None => {}
                }
            }
            Ok(SessionEvent::RunFinished { outcome, message }) => {
                eprintln!("{message}");
                return Ok(outcome.exit_status());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("installation session ended without a result")
            }
        }

        let closed = match &input {
            Some(lines) => forward_input(lines, &handle, &mut awaiting_answer),
            None => false,
        };
        if closed {
            input = None;
        }
    }
}

/// Route typed lines: the first one after a question answers it, the rest
/// go to the child. Returns `true` once standard input is closed.
fn forward_input(lines: &Receiver<String>, handle: &SessionHandle, awaiting_answer: &mut bool) -> bool {
    loop {
        match lines.try_recv() {
            Ok(line) if *awaiting_answer => {
                *awaiting_answer = false;
                resolve(handle, is_yes(&line));
            }
            Ok(line) => send(handle, &line),
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => {
                tracing::debug!("standard input closed");
                if *awaiting_answer {
                    eprintln!("No answer available, declining the chroot.");
                    *awaiting_answer = false;
                    resolve(handle, false);
                }
                return true;
            }
        }
    }
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn resolve(handle: &SessionHandle, accepted: bool) {
    match handle.resolve(accepted) {
        Ok(Some(decision)) => tracing::debug!(?decision, "answered chroot question"),
        Ok(None) => tracing::debug!("no question pending"),
        Err(err) => eprintln!("Could not answer: {err}"),
    }
}

fn send(handle: &SessionHandle, line: &str) {
    if let Err(err) = handle.send(line) {
        eprintln!("Input not sent: {err}");
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to start the input reader")?;
    Ok(rx)
}

fn spawn_sequencer(
    handle: SessionHandle,
    sequencer: ConfigSequencer,
    settings: SystemSettings,
    leave_shell: bool,
) -> Result<()> {
    thread::Builder::new()
        .name("config-sequencer".to_string())
        .spawn(move || {
            match sequencer.apply(&handle, &settings) {
                Ok(sent) => tracing::info!(sent, "system configuration sent"),
                Err(err) => {
                    tracing::warn!(error = %err, "system configuration incomplete");
                    return;
                }
            }
            if leave_shell {
                send(&handle, "exit");
            }
        })
        .context("failed to start the configuration sequencer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }
}
