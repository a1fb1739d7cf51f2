//! Errors raised by the estimation engine.
//!
//! Transient per-sample failures never show up here: the [Sampler](crate::sampler::Sampler)
//! absorbs them with bounded retries. What remains is fatal for the evaluation and is
//! propagated unrecovered to the caller of [evaluate](crate::tolerance::evaluate).

use thiserror::Error;

/// Result alias for the crate.
pub type Result<T> = std::result::Result<T, GecmiError>;

/// Coarse classification of a [GecmiError].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// degenerate or inconsistent input data
    Data,
    /// a parallel aggregation batch aborted
    Concurrency,
    /// the requested accuracy was not reached within the round budget
    Convergence,
    /// a caller supplied parameter is out of its domain
    Parameter,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GecmiError {
    #[error("invalid parameter {name} : {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("empty partition : {0}")]
    EmptyPartition(&'static str),

    #[error("item id {0} overflows the item id range")]
    ItemOverflow(u64),

    #[error("NMI is not applicable to the specified collections : {0}")]
    NotApplicable(String),

    #[error("UnsolvablePartition, too many non-member items ({drawn} items drawn without any membership)")]
    UnsolvablePartition { drawn: usize },

    #[error("input collections have different node base and can't be synchronized gracefully ({nb_items_a} vs {nb_items_b})")]
    Unsynchronizable { nb_items_a: usize, nb_items_b: usize },

    #[error("statistical bound evaluation failed : {0}")]
    Statistics(String),

    #[error("SystemIsSuspiciouslyFailingTooMuch, partition not solvable ({degraded} of {nb_samples} samples failed)")]
    NotSolvable { degraded: usize, nb_samples: usize },

    #[error("accuracy not reached after {rounds} rounds, error bound {error_bound:.3e} > tolerance {tolerance:.3e}")]
    AccuracyNotReached {
        rounds: usize,
        error_bound: f64,
        tolerance: f64,
    },
}

impl GecmiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GecmiError::InvalidParameter { .. } => ErrorKind::Parameter,
            GecmiError::NotSolvable { .. } => ErrorKind::Concurrency,
            GecmiError::AccuracyNotReached { .. } => ErrorKind::Convergence,
            GecmiError::EmptyPartition(_)
            | GecmiError::ItemOverflow(_)
            | GecmiError::NotApplicable(_)
            | GecmiError::UnsolvablePartition { .. }
            | GecmiError::Unsynchronizable { .. }
            | GecmiError::Statistics(_) => ErrorKind::Data,
        }
    }

    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        GecmiError::InvalidParameter {
            name,
            message: message.into(),
        }
    }
} // end of impl GecmiError

/// checks a probability-like parameter lies in the open interval (0,1)
pub(crate) fn check_unit_interval(name: &'static str, value: f64) -> Result<()> {
    if value > 0. && value < 1. {
        Ok(())
    } else {
        Err(GecmiError::invalid(name, format!("{:.3e} must be in (0,1)", value)))
    }
}

// end of mod tests
