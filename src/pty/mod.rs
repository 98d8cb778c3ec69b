//! Pseudo-terminal plumbing: allocation, process launch, the owned child
//! guard and the small non-blocking I/O helpers the session builds on.

mod alloc;
mod child;
pub(crate) mod io;
mod spawn;
mod status;

pub use alloc::{open, PtyPair, DEFAULT_COLS, DEFAULT_ROWS};
pub use child::PtyChild;
pub use spawn::{spawn, LaunchSpec, EXIT_COMMAND_NOT_FOUND, EXIT_SETUP_FAILED, TERMINAL_ENV};
pub use status::TerminationResult;
