//! Session errors

use thiserror::Error;

use crate::engine::EngineError;
use crate::queue::JobError;

/// Errors returned by [`Session`](super::Session) operations
///
/// Engine rejections are not errors; they come back as `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Engine session is not running")]
    NotRunning,

    #[error(transparent)]
    Job(#[from] JobError),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        SessionError::Job(JobError::Engine(err))
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_wraps_as_job_error() {
        let err: SessionError = EngineError::NotRunning.into();
        assert_eq!(err, SessionError::Job(JobError::Engine(EngineError::NotRunning)));
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionError::NotRunning.to_string(), "Engine session is not running");
        assert_eq!(
            SessionError::Job(JobError::Rejected).to_string(),
            "Execution queue is not accepting jobs"
        );
    }
}
