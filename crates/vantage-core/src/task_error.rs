//! Task execution error types
//!
//! Handlers signal whether a failure should consume the task's retry budget
//! (recoverable) or fail the task immediately (unrecoverable).

use std::fmt;

#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// Fail immediately without retrying, e.g. an overlapping refresh or a
    /// payload that cannot be decoded.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Retry according to the task's retry policy.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }

    /// Message plus the full cause chain, as stored on failed tasks and jobs.
    pub fn diagnostic(&self) -> String {
        format_diagnostic(&self.inner)
    }
}

/// `"{error}\n\nTrace:\n{error:?}"`. The debug form of `anyhow::Error` lists
/// every cause and, when captured, the backtrace.
pub fn format_diagnostic(err: &anyhow::Error) -> String {
    format!("{}\n\nTrace:\n{:?}", err, err)
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    /// Plain errors are recoverable unless marked otherwise.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for Result to easily create unrecoverable task errors
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}
