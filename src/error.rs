use chrono::NaiveDate;
use thiserror::Error;

/// Stage-level failures surfaced to callers as rejected operations.
///
/// Degenerate statistics, non-finite inputs and empty inputs are not errors; the
/// stages recover from those locally and only precondition violations end up here.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("feature table has no label column (y_event)")]
    MissingLabel,
    #[error("not enough samples for training (n={n}); need at least {min}")]
    InsufficientSamples { n: usize, min: usize },
    #[error("training slice contains a single label class ({label}); cannot fit a classifier")]
    SingleClassTraining { label: u8 },
    #[error("model fit failed: {0}")]
    ModelFit(String),
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid cell identifier: {0}")]
    InvalidCell(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_violated_precondition() {
        let err = PipelineError::InsufficientSamples { n: 4, min: 10 };
        assert_eq!(
            err.to_string(),
            "not enough samples for training (n=4); need at least 10"
        );
        assert!(PipelineError::MissingLabel.to_string().contains("y_event"));
    }
}
