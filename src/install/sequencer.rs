//! Scripted system configuration typed into the chroot shell once the user
//! accepts the chroot question.

use std::borrow::Cow;
use std::fmt;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::error::WriteRejected;
use crate::session::{SendReport, SessionHandle};

/// Commands that may fail without stopping the batch get this suffix.
const TOLERANT_SUFFIX: &str = " || true";
/// Ends the commands that carry a password.
const CHPASSWD_PIPE: &str = " | chpasswd";
const REDACTED: &str = "<redacted>";

/// Where the sequencer writes its commands.
pub trait CommandSink {
    fn send_command(&self, command: &str) -> Result<SendReport, WriteRejected>;
}

impl CommandSink for SessionHandle {
    fn send_command(&self, command: &str) -> Result<SendReport, WriteRejected> {
        self.send(command)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("{field} cannot be passed to the shell (contains a NUL byte)")]
    Unquotable { field: &'static str },

    #[error("command {step} of {total} was not sent: {source}")]
    Rejected {
        step: usize,
        total: usize,
        #[source]
        source: WriteRejected,
    },
}

/// Values typed into the new system.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SystemSettings {
    pub locale: String,
    pub timezone: String,
    pub keyboard: String,
    pub fullname: String,
    pub username: String,
    pub password: String,
    pub root_password: String,
}

impl fmt::Debug for SystemSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemSettings")
            .field("locale", &self.locale)
            .field("timezone", &self.timezone)
            .field("keyboard", &self.keyboard)
            .field("fullname", &self.fullname)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("root_password", &REDACTED)
            .finish()
    }
}

fn quote(field: &'static str, value: &str) -> Result<String, SequenceError> {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| SequenceError::Unquotable { field })
}

/// The configuration batch, in order. Every value is shell-quoted.
pub fn config_commands(settings: &SystemSettings) -> Result<Vec<String>, SequenceError> {
    let locale = quote("locale", &settings.locale)?;
    let lang = quote("locale", &format!("LANG={}", settings.locale))?;
    let timezone = quote("timezone", &settings.timezone)?;
    let keyboard = quote("keyboard", &settings.keyboard)?;
    let fullname = quote("fullname", &settings.fullname)?;
    let username = quote("username", &settings.username)?;
    let home = quote("username", &format!("/home/{}", settings.username))?;
    let credentials = quote(
        "password",
        &format!("{}:{}", settings.username, settings.password),
    )?;
    let root_credentials = quote("root_password", &format!("root:{}", settings.root_password))?;

    let tolerant = [
        format!("locale-gen {locale}"),
        format!("localectl set-locale {lang}"),
        format!("timedatectl set-timezone {timezone}"),
        format!("localectl set-keymap {keyboard}"),
        format!("usermod -l {username} user"),
        format!("usermod -d {home} -m {username}"),
        format!("usermod -c {fullname} {username}"),
    ];

    let mut commands: Vec<String> = tolerant
        .into_iter()
        .map(|command| command + TOLERANT_SUFFIX)
        .collect();
    commands.push(format!("echo {credentials}{CHPASSWD_PIPE}"));
    commands.push(format!("echo {root_credentials}{CHPASSWD_PIPE}"));
    Ok(commands)
}

/// Hide the credentials in a line that echoes a `chpasswd` command, as the
/// chroot shell does with everything typed into it.
pub fn redact_credentials(line: &str) -> Cow<'_, str> {
    let Some(pipe) = line.find(CHPASSWD_PIPE) else {
        return Cow::Borrowed(line);
    };
    let start = line[..pipe].find("echo ").map_or(0, |i| i + "echo ".len());
    Cow::Owned(format!("{}{REDACTED}{}", &line[..start], &line[pipe..]))
}

/// Sends the configuration batch with a fixed pause between commands.
#[derive(Debug, Clone)]
pub struct ConfigSequencer {
    delay: Duration,
}

impl ConfigSequencer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Send every command, stopping at the first rejected one. Returns how
    /// many were sent. There is no acknowledgement from the shell, so a
    /// sent command is not known to have succeeded.
    pub fn apply(
        &self,
        sink: &impl CommandSink,
        settings: &SystemSettings,
    ) -> Result<usize, SequenceError> {
        let commands = config_commands(settings)?;
        let total = commands.len();
        tracing::info!(total, ?settings, "applying system configuration");

        for (index, command) in commands.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let step = index + 1;
            let report = sink
                .send_command(command)
                .map_err(|source| SequenceError::Rejected { step, total, source })?;
            if !report.is_complete() {
                tracing::warn!(step, written = report.written, requested = report.requested, "configuration command truncated");
            }
            tracing::debug!(step, total, "configuration command sent");
        }
        Ok(total)
    }
}
