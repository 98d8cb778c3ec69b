use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::termios::{self, InputFlags, LocalFlags, OutputFlags, SetArg};

use crate::error::StartError;

pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// A freshly allocated terminal pair.
///
/// The slave already carries the line discipline the installer expects and
/// the master is non-blocking, ready for `poll()`.
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a 24x80 pseudo-terminal.
pub fn open() -> Result<PtyPair, StartError> {
    let winsize = Winsize {
        ws_row: DEFAULT_ROWS,
        ws_col: DEFAULT_COLS,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let pty = openpty(&winsize, None).map_err(|e| StartError::allocation("openpty", e))?;

    configure_discipline(&pty.slave)?;
    set_nonblocking(&pty.master)?;

    tracing::debug!(
        master = pty.master.as_raw_fd(),
        slave = pty.slave.as_raw_fd(),
        "pty allocated"
    );
    Ok(PtyPair {
        master: pty.master,
        slave: pty.slave,
    })
}

/// Canonical input with echo, no echo of bare newlines, CRLF on output and
/// CR->LF on input.
fn configure_discipline(slave: &OwnedFd) -> Result<(), StartError> {
    let mut attrs =
        termios::tcgetattr(slave).map_err(|e| StartError::allocation("tcgetattr", e))?;

    attrs.local_flags |=
        LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ICANON;
    attrs.local_flags.remove(LocalFlags::ECHONL);
    attrs.output_flags |= OutputFlags::OPOST | OutputFlags::ONLCR;
    attrs.input_flags |= InputFlags::ICRNL;

    termios::tcsetattr(slave, SetArg::TCSANOW, &attrs)
        .map_err(|e| StartError::allocation("tcsetattr", e))
}

fn set_nonblocking(master: &OwnedFd) -> Result<(), StartError> {
    let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| StartError::allocation("fcntl F_GETFL", e))?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(
        master.as_raw_fd(),
        FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
    )
    .map_err(|e| StartError::allocation("fcntl F_SETFL", e))?;
    Ok(())
}
