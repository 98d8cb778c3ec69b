//! Drives the ObsidianOS installation tool inside a pseudo-terminal: frames
//! its output into lines, spots the chroot confirmation question, and types
//! answers and post-install configuration back into it.

pub mod config;
pub mod error;
pub mod install;
pub mod logging;
pub mod pty;
pub mod session;
pub mod shutdown;
