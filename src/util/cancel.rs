use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why a cooperative wait or behavior was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The whole run was cancelled (e.g. fail-fast).
    Run,
    /// The per-node deadline elapsed.
    Deadline,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "run cancelled"),
            Self::Deadline => write!(f, "deadline elapsed"),
        }
    }
}

/// Cooperative cancellation signal shared by every node of a run.
///
/// Clones share the run-wide flag. A token may additionally carry a
/// deadline, which only affects that token and the tokens derived from it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token that additionally expires `timeout` from now.
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(deadline),
        }
    }

    /// Cancel the run for every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// The reason this token counts as cancelled, if any.
    pub fn cause(&self) -> Option<CancelCause> {
        if self.flag.load(Ordering::SeqCst) {
            Some(CancelCause::Run)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(CancelCause::Deadline)
        } else {
            None
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    pub fn is_run_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
