use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::LockError;
use crate::util::cancel::CancelCause;

/// Final status of a node that actually started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Successful,
    Failed,
    Aborted,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Classification of node failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The behavior reported a failure.
    Failed,
    /// The behavior gave up (an assumption did not hold).
    Aborted,
    /// The behavior panicked.
    Panicked,
    /// The node's deadline elapsed.
    TimedOut,
    /// A wait was cut short by cancellation.
    Interrupted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Panicked => write!(f, "panicked"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A node failure. Secondary failures of the same node travel as
/// `suppressed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<Failure>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Failed, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Aborted, message)
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::new(
            FailureKind::TimedOut,
            format!("exceeded timeout of {}ms", timeout.as_millis()),
        )
    }

    pub fn interrupted(cause: CancelCause) -> Self {
        Self::new(FailureKind::Interrupted, cause.to_string())
    }

    /// Build a failure from a caught panic payload.
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::new(FailureKind::Panicked, message)
    }

    /// Whether this failure turns the node's status into `Aborted`.
    pub fn is_abort(&self) -> bool {
        self.kind == FailureKind::Aborted
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl From<LockError> for Failure {
    fn from(err: LockError) -> Self {
        let kind = match &err {
            LockError::Interrupted {
                cause: CancelCause::Deadline,
                ..
            } => FailureKind::TimedOut,
            LockError::Interrupted { .. } => FailureKind::Interrupted,
        };
        Self::new(kind, err.to_string())
    }
}

/// Outcome of one behavior phase.
pub type Outcome = Result<(), Failure>;

/// Result of a node that started and finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl TestExecutionResult {
    pub fn successful(duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Successful,
            failure: None,
            duration,
        }
    }

    pub fn from_failure(failure: Failure, duration: Duration) -> Self {
        let status = if failure.is_abort() {
            ExecutionStatus::Aborted
        } else {
            ExecutionStatus::Failed
        };
        Self {
            status,
            failure: Some(failure),
            duration,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Successful
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Runs fallible phases and keeps every failure they produce, panics
/// included. The first failure becomes the primary one.
#[derive(Debug, Default)]
pub struct ThrowableCollector {
    failures: Vec<Failure>,
}

impl ThrowableCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `phase`, recording its failure or panic.
    pub fn execute(&mut self, phase: impl FnOnce() -> Outcome) {
        match catch_unwind(AssertUnwindSafe(phase)) {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => self.failures.push(failure),
            Err(payload) => self.failures.push(Failure::panicked(payload.as_ref())),
        }
    }

    pub fn add(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn has_kind(&self, kind: FailureKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }

    /// The primary failure with all later ones attached as suppressed.
    pub fn into_failure(self) -> Option<Failure> {
        let mut failures = self.failures.into_iter();
        let mut primary = failures.next()?;
        primary.suppressed.extend(failures);
        Some(primary)
    }
}
