use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised by the correction engine.
///
/// `Configuration`, `EmptyInput` and `ThreadPool` abort a whole batch. The
/// remaining variants are returned by the lower level building blocks and are
/// turned into [`CorrectionWarning`]s by the engine when they concern a single
/// fragment.
#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("invalid configuration for element {element}: {reason}")]
    Configuration { element: String, reason: String },

    #[error("dimension mismatch: expected a vector of length {expected}, found {found}")]
    Dimension { expected: usize, found: usize },

    #[error("no intensity records to correct")]
    EmptyInput,

    #[error("invalid formula {formula:?}: {reason}")]
    Formula { formula: String, reason: String },

    #[error("invalid isotopologue label {label:?}: {reason}")]
    Label { label: String, reason: String },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to read configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl CorrectionError {
    pub(crate) fn configuration(element: impl Into<String>, reason: impl Into<String>) -> Self {
        CorrectionError::Configuration {
            element: element.into(),
            reason: reason.into(),
        }
    }
}

/// What went wrong for a single fragment or (fragment, sample) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WarningKind {
    /// The formula lacks an element listed in the correction map, the step was skipped.
    MissingElement { element: String, tracer: String },
    /// An observed vector or label did not fit the label space of the fragment.
    DimensionMismatch { expected: usize, found: usize },
    /// Nonnegative least squares ran out of iterations, the direct solution was used.
    SolverNonconvergence { element: String, iterations: usize },
    /// The correction matrix could not be inverted, the observed values were kept.
    SingularMatrix { element: String },
    /// A record could not be used and was dropped.
    InvalidRecord { reason: String },
    /// Two records share fragment, label and sample, the later one was kept.
    DuplicateRecord { label: String },
    /// Background subtraction was requested but no background data exist.
    BackgroundUnavailable { background: String },
}

/// A recoverable problem attached to the result set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectionWarning {
    pub fragment: Option<String>,
    pub sample: Option<String>,
    pub kind: WarningKind,
}

impl CorrectionWarning {
    pub fn new(fragment: Option<&str>, sample: Option<&str>, kind: WarningKind) -> Self {
        CorrectionWarning {
            fragment: fragment.map(str::to_string),
            sample: sample.map(str::to_string),
            kind,
        }
    }

    /// Emits the warning through `tracing` and hands it back for collection.
    pub fn logged(self) -> Self {
        tracing::warn!(
            fragment = self.fragment.as_deref().unwrap_or("-"),
            sample = self.sample.as_deref().unwrap_or("-"),
            "{}",
            self.kind
        );
        self
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::MissingElement { element, tracer } => {
                write!(f, "formula has no {} atoms, skipped {} correction for tracer {}", element, element, tracer)
            }
            WarningKind::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {}, found {}", expected, found)
            }
            WarningKind::SolverNonconvergence { element, iterations } => {
                write!(f, "nnls did not converge within {} iterations correcting {}, used direct solution", iterations, element)
            }
            WarningKind::SingularMatrix { element } => {
                write!(f, "correction matrix for {} is singular, values left uncorrected", element)
            }
            WarningKind::InvalidRecord { reason } => write!(f, "invalid record: {}", reason),
            WarningKind::DuplicateRecord { label } => {
                write!(f, "duplicate record for label {}, keeping the last one", label)
            }
            WarningKind::BackgroundUnavailable { background } => {
                write!(f, "no background data in sample {}, background subtraction skipped", background)
            }
        }
    }
}

impl fmt::Display for CorrectionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} / {}] {}",
            self.fragment.as_deref().unwrap_or("-"),
            self.sample.as_deref().unwrap_or("-"),
            self.kind
        )
    }
}
