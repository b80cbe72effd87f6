//! Cooperative run cancellation.
//!
//! The dispatcher checks the token before starting a unit and while waiting
//! on an aligner process. SIGINT flips a process-wide flag that every
//! interruptible token observes.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tracing::warn;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    watch_interrupt: bool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also reports cancellation once SIGINT was received.
    pub fn interruptible() -> Self {
        install_interrupt_handler();
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            watch_interrupt: true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || (self.watch_interrupt && INTERRUPTED.load(Ordering::SeqCst))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn install_interrupt_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
            warn!(error = %err, "SIGINT handler not installed; Ctrl-C will abort the run");
        }
    });
}
