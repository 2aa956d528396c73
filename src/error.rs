//! Error types for Gearbox.
//!
//! All errors in Gearbox are strongly typed using thiserror.
//! Configuration problems are reported eagerly as [`ValidationError`]s when a
//! gearbox is built; failures that happen while gears are running travel on the
//! output streams as [`GearError`]s.

use std::fmt;

use thiserror::Error;

/// Configuration errors detected when a gearbox is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Tooth name cannot be empty")]
    EmptyToothName,

    #[error("Tooth '{tooth}' has no view after default filling")]
    MissingView {
        tooth: String,
    },

    #[error("Sink map renames unknown tooth '{tooth}'")]
    UnknownSinkSource {
        tooth: String,
    },

    #[error("Sink name '{sink}' is produced by more than one tooth ('{first}' and '{second}')")]
    DuplicateSinkName {
        sink: String,
        first: String,
        second: String,
    },

    #[error("Invalid settings: {reason}")]
    InvalidSettings {
        reason: String,
    },
}

/// The gear step that failed while a gear was being activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GearStage {
    /// Interpreting the upstream sources into actions.
    Intent,
    /// Deriving the state stream from actions.
    Model,
}

impl fmt::Display for GearStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intent => f.write_str("intent"),
            Self::Model => f.write_str("model"),
        }
    }
}

/// Runtime failures raised by gears.
///
/// Cloneable so a single failure can be delivered to every sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GearError {
    /// A failure raised by user code (state stream, recovery stream, intent or model).
    #[error("Gear failed: {message}")]
    Failed {
        message: String,
    },

    /// A gear could not be activated. Fatal for the engaged gearbox.
    #[error("Gear construction failed during {stage}: {message}")]
    Construction {
        stage: GearStage,
        message: String,
    },
}

impl GearError {
    /// Creates a user-level failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Marks this error as a construction failure of the given stage.
    ///
    /// Already classified construction failures keep their original stage.
    #[must_use]
    pub fn in_stage(self, stage: GearStage) -> Self {
        match self {
            Self::Construction { .. } => self,
            Self::Failed { message } => Self::Construction { stage, message },
        }
    }

    /// Returns true if this is a construction failure.
    #[must_use]
    pub const fn is_construction(&self) -> bool {
        matches!(self, Self::Construction { .. })
    }
}

/// Top-level error type for Gearbox.
#[derive(Debug, Error)]
pub enum GearboxError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Gear error: {0}")]
    Gear(#[from] GearError),

    #[error("Gearbox must be engaged from within a Tokio runtime")]
    NoRuntime,

    #[error("Unknown or already taken sink: {name}")]
    UnknownSink {
        name: String,
    },
}

impl GearboxError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a gear error.
    #[must_use]
    pub const fn is_gear(&self) -> bool {
        matches!(self, Self::Gear(_))
    }
}

/// Result type alias for Gearbox operations.
pub type GearboxResult<T> = Result<T, GearboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_missing_view() {
        let err = ValidationError::MissingView {
            tooth: "count".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("count"));
        assert!(msg.contains("no view"));
    }

    #[test]
    fn test_validation_error_duplicate_sink() {
        let err = ValidationError::DuplicateSinkName {
            sink: "x".to_string(),
            first: "a".to_string(),
            second: "b".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("'x'"));
        assert!(msg.contains("'a'"));
        assert!(msg.contains("'b'"));
    }

    #[test]
    fn test_gear_error_in_stage() {
        let err = GearError::failed("boom").in_stage(GearStage::Intent);
        assert!(err.is_construction());
        assert_eq!(
            err,
            GearError::Construction {
                stage: GearStage::Intent,
                message: "boom".to_string(),
            }
        );
        assert!(format!("{err}").contains("during intent"));
    }

    #[test]
    fn test_gear_error_in_stage_keeps_first_stage() {
        let err = GearError::failed("boom")
            .in_stage(GearStage::Model)
            .in_stage(GearStage::Intent);
        assert!(matches!(err, GearError::Construction { stage: GearStage::Model, .. }));
    }

    #[test]
    fn test_gearbox_error_from_validation() {
        let err: GearboxError = ValidationError::EmptyToothName.into();
        assert!(err.is_validation());
        assert!(!err.is_gear());
    }

    #[test]
    fn test_gearbox_error_from_gear() {
        let err: GearboxError = GearError::failed("x").into();
        assert!(err.is_gear());
        assert!(format!("{err}").contains("Gear failed: x"));
    }

    #[test]
    fn test_gearbox_error_classifiers() {
        let err = GearboxError::UnknownSink { name: "total".to_string() };
        assert!(!err.is_gear());
        assert!(!err.is_validation());
        assert!(format!("{err}").contains("total"));
    }
}
