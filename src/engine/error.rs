use ulid::Ulid;

use crate::schedule::ScheduleError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The requested range overlaps this existing appointment.
    Overlap(Ulid),
    NotFound(Ulid),
    Validation(String),
    LimitExceeded(&'static str),
    /// Optimistic retries ran out.
    Contention,
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Overlap(id) => {
                write!(f, "time slot overlaps existing appointment {id}")
            }
            EngineError::NotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Contention => {
                write!(f, "too much concurrent activity on this date, try again")
            }
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Contention(_) => EngineError::Contention,
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<ScheduleError> for EngineError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::TooManyOverrides => EngineError::LimitExceeded("too many date overrides"),
            other => EngineError::Validation(other.to_string()),
        }
    }
}
