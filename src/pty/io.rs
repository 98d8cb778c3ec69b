//! Non-blocking read/write primitives on the master descriptor.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios;
use nix::unistd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Data(usize),
    WouldBlock,
    /// EOF or a read error; both mean the child side is gone.
    Closed,
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    PollTimeout::from(millis)
}

/// Wait up to `timeout` for `events` on `fd`. Hang-ups count as ready so the
/// following read or write observes the error.
pub(crate) fn wait_ready(
    fd: BorrowedFd<'_>,
    events: PollFlags,
    timeout: Duration,
) -> Result<bool, Errno> {
    let mut fds = [PollFd::new(fd, events)];
    match poll(&mut fds, poll_timeout(timeout)) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(fds[0]
            .revents()
            .is_some_and(|r| r.intersects(events | PollFlags::POLLHUP | PollFlags::POLLERR))),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn read_available(fd: BorrowedFd<'_>, buf: &mut [u8]) -> ReadOutcome {
    match unistd::read(fd.as_raw_fd(), buf) {
        Ok(0) => ReadOutcome::Closed,
        Ok(n) => ReadOutcome::Data(n),
        Err(Errno::EAGAIN | Errno::EINTR) => ReadOutcome::WouldBlock,
        // EIO: every slave descriptor is closed.
        Err(Errno::EIO) => ReadOutcome::Closed,
        Err(e) => {
            tracing::debug!(error = %e, "pty read failed");
            ReadOutcome::Closed
        }
    }
}

/// Best-effort write of `payload`; returns how many bytes went out.
///
/// Partial writes advance and retry, EINTR retries, EAGAIN waits for
/// writability (at most `max_stalls` consecutive times), anything else stops
/// the loop. The line discipline is drained afterwards.
pub(crate) fn write_payload(
    fd: BorrowedFd<'_>,
    payload: &[u8],
    stall_timeout: Duration,
    max_stalls: u32,
) -> usize {
    let mut written = 0;
    let mut stalls = 0u32;

    while written < payload.len() {
        match unistd::write(fd, &payload[written..]) {
            Ok(n) if n > 0 => {
                written += n;
                stalls = 0;
            }
            Ok(_) | Err(Errno::EAGAIN) => {
                if stalls >= max_stalls {
                    tracing::warn!(written, total = payload.len(), "pty write stalled, giving up");
                    break;
                }
                stalls += 1;
                if let Err(e) = wait_ready(fd, PollFlags::POLLOUT, stall_timeout) {
                    tracing::warn!(error = %e, "poll for writability failed");
                    break;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::warn!(error = %e, written, total = payload.len(), "pty write aborted");
                break;
            }
        }
    }

    // Not a terminal in tests (ENOTTY); nothing to report either way.
    let _ = termios::tcdrain(fd);
    written
}
