use std::collections::BTreeMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;

use nix::unistd::{self, ForkResult};

use crate::error::StartError;
use crate::pty::alloc::PtyPair;
use crate::pty::child::PtyChild;

/// Exit status of a child whose `exec` failed.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;
/// Exit status of a child that could not attach to the terminal.
pub const EXIT_SETUP_FAILED: i32 = 126;

/// Environment every launched process sees on top of the inherited one.
pub const TERMINAL_ENV: &[(&str, &str)] = &[
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
    ("DEBIAN_FRONTEND", "noninteractive"),
];

/// What to run inside the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables, applied after [`TERMINAL_ENV`].
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Everything `execvpe` needs, converted before forking so the child
/// branch never allocates.
struct PreparedExec {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl PreparedExec {
    fn new(spec: &LaunchSpec) -> Result<Self, StartError> {
        let program = CString::new(spec.program.as_str())
            .map_err(|_| StartError::spawn(&spec.program, "program name contains a NUL byte"))?;

        let mut argv = Vec::with_capacity(spec.args.len() + 1);
        argv.push(program.clone());
        for arg in &spec.args {
            let arg = CString::new(arg.as_str()).map_err(|_| {
                StartError::spawn(&spec.program, format!("argument {arg:?} contains a NUL byte"))
            })?;
            argv.push(arg);
        }

        let mut vars: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        for (key, value) in TERMINAL_ENV {
            vars.insert(OsString::from(key), OsString::from(value));
        }
        for (key, value) in &spec.env {
            vars.insert(OsString::from(key), OsString::from(value));
        }
        let envp = vars
            .iter()
            .map(|(key, value)| env_entry(key, value))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| StartError::spawn(&spec.program, "environment contains a NUL byte"))?;

        Ok(Self {
            program,
            argv,
            envp,
        })
    }
}

fn env_entry(key: &OsStr, value: &OsStr) -> Option<CString> {
    let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
    entry.extend_from_slice(key.as_bytes());
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());
    CString::new(entry).ok()
}

/// Fork and exec `spec` with the pair's slave as controlling terminal.
///
/// On success the slave is closed in the parent and the returned guard owns
/// the master and the child pid.
pub fn spawn(pair: PtyPair, spec: &LaunchSpec) -> Result<PtyChild, StartError> {
    let exec = PreparedExec::new(spec)?;

    // Safety: the child only calls async-signal-safe functions on data
    // prepared above, then execs or _exits.
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => exec_child(pair, &exec),
        Ok(ForkResult::Parent { child }) => {
            drop(pair.slave);
            tracing::info!(pid = child.as_raw(), program = %spec.program, "process launched");
            Ok(PtyChild::new(pair.master, child))
        }
        Err(e) => Err(StartError::spawn(&spec.program, format!("fork failed: {e}"))),
    }
}

/// Child side of the fork. Never returns into the caller: returning would
/// leave two processes running the parent's continuation.
fn exec_child(pair: PtyPair, exec: &PreparedExec) -> ! {
    let PtyPair { master, slave } = pair;
    drop(master);

    let slave_fd = slave.as_raw_fd();
    if unistd::setsid().is_err() {
        unsafe { libc::_exit(EXIT_SETUP_FAILED) };
    }
    // Safety: plain ioctl on a descriptor we own.
    if unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) } < 0 {
        unsafe { libc::_exit(EXIT_SETUP_FAILED) };
    }
    for target in [
        libc::STDIN_FILENO,
        libc::STDOUT_FILENO,
        libc::STDERR_FILENO,
    ] {
        if unistd::dup2(slave_fd, target).is_err() {
            unsafe { libc::_exit(EXIT_SETUP_FAILED) };
        }
    }
    if slave_fd > libc::STDERR_FILENO {
        drop(slave);
    } else {
        // The slave landed on a standard stream; closing it would undo the dup.
        std::mem::forget(slave);
    }

    // Ignored dispositions survive exec; the runtime ignores SIGPIPE.
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };

    let _ = unistd::execvpe(&exec.program, &exec.argv, &exec.envp);
    unsafe { libc::_exit(EXIT_COMMAND_NOT_FOUND) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(exec: &PreparedExec) -> Vec<String> {
        exec.envp
            .iter()
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn argv_starts_with_program() {
        let spec = LaunchSpec::new("sudo").args(["-S", "obsidianctl"]);
        let exec = PreparedExec::new(&spec).unwrap();
        let argv: Vec<_> = exec.argv.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(argv, vec!["sudo", "-S", "obsidianctl"]);
    }

    #[test]
    fn terminal_env_is_applied() {
        let exec = PreparedExec::new(&LaunchSpec::new("sh")).unwrap();
        let env = env_of(&exec);
        assert!(env.contains(&"TERM=xterm-256color".to_string()));
        assert!(env.contains(&"COLORTERM=truecolor".to_string()));
        assert!(env.contains(&"DEBIAN_FRONTEND=noninteractive".to_string()));
    }

    #[test]
    fn spec_env_overrides_terminal_env() {
        let spec = LaunchSpec::new("sh").env("TERM", "dumb");
        let env = env_of(&PreparedExec::new(&spec).unwrap());
        assert!(env.contains(&"TERM=dumb".to_string()));
        assert!(!env.contains(&"TERM=xterm-256color".to_string()));
    }

    #[test]
    fn nul_in_argument_is_a_spawn_error() {
        let spec = LaunchSpec::new("sh").arg("bad\0arg");
        let err = PreparedExec::new(&spec).err().unwrap();
        assert!(matches!(err, StartError::Spawn { ref program, .. } if program == "sh"));
    }
}
