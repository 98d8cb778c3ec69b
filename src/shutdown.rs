use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::SigId;

/// Flag raised by SIGINT or SIGTERM. The controller polls it and tears the
/// session down; the handlers are removed on drop.
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl ShutdownSignal {
    pub fn install() -> io::Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut ids = Vec::with_capacity(2);
        for signal in [SIGINT, SIGTERM] {
            ids.push(signal_hook::flag::register(signal, Arc::clone(&flag))?);
        }
        Ok(Self { flag, ids })
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_by_sigterm() {
        let shutdown = ShutdownSignal::install().unwrap();
        assert!(!shutdown.is_triggered());
        signal_hook::low_level::raise(SIGTERM).unwrap();
        assert!(shutdown.is_triggered());
    }
}
