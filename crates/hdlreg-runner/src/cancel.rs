use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    Signal,
    Deadline,
}

impl CancelReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::Requested => "cancel requested",
            CancelReason::Signal => "interrupted by signal",
            CancelReason::Deadline => "suite deadline exceeded",
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Suite-wide abort flag observed by every child wait loop.
///
/// Trips on an explicit [`CancelToken::cancel`], on SIGINT/SIGTERM once
/// [`install_signal_handlers`] ran, or when the optional deadline passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reason(&self) -> Option<CancelReason> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Some(CancelReason::Requested);
        }
        if SIGNALLED.load(Ordering::SeqCst) {
            return Some(CancelReason::Signal);
        }
        if self.inner.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::Deadline);
        }
        None
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }
}

/// Exit status used when a second interrupt arrives before the suite wound down.
pub const FORCED_EXIT_STATUS: i32 = 130;

/// Route SIGINT/SIGTERM into the cancellation flag so in-flight children get killed
/// instead of orphaned when the harness is interrupted. A second signal exits at once.
///
/// Calling this more than once keeps the first handler.
pub fn install_signal_handlers() -> Result<()> {
    let installed = ctrlc::set_handler(|| {
        if SIGNALLED.swap(true, Ordering::SeqCst) {
            eprintln!("hdlreg: interrupted again, exiting without cleanup");
            std::process::exit(FORCED_EXIT_STATUS);
        }
        tracing::warn!("interrupted; killing running steps");
    });
    match installed {
        Ok(()) | Err(ctrlc::Error::MultipleHandlers) => Ok(()),
        Err(err) => Err(err).context("install SIGINT/SIGTERM handler"),
    }
}
