//! Error types for recurrence-engine operations.

use thiserror::Error;

use crate::temporal::TemporalKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    /// Two temporal values of different kinds were compared or combined.
    #[error("Type mismatch: expected {expected} value, found {found}")]
    TypeMismatch {
        expected: TemporalKind,
        found: TemporalKind,
    },

    /// A rule or cache was built from an invalid combination of parts.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The assembled recurrence set never produces an occurrence.
    #[error("Recurrence set produces no occurrences")]
    EmptyRecurrenceSet,

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Invalid date or date-time: {0}")]
    InvalidTemporal(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The recurrence set is structurally inconsistent (e.g. DTSTART is not
    /// its first occurrence).
    #[error("Invalid recurrence set: {0}")]
    Validation(String),

    /// An edit was requested that the series cannot perform in its state.
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),
}

pub type Result<T> = std::result::Result<T, RecurrenceError>;
