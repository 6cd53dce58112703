//! Error types for filter construction and stepping
//!
//! This module provides proper error handling instead of panics.

use std::fmt;

/// Errors that can occur during filtering, smoothing or inference
#[derive(Debug, Clone)]
pub enum FilterError {
    /// Input vector sizes inconsistent with filter construction
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "control input", "measurement")
        context: String,
    },

    /// Every particle received a `-inf` log-weight after correction,
    /// or a weight became NaN/+inf
    DegenerateWeights {
        /// Time index at which the cloud collapsed
        timestep: usize,
    },

    /// Innovation covariance not positive definite after fallback
    SingularInnovation {
        /// Description of which matrix failed
        context: String,
    },

    /// Dynamics or measurement model returned NaN or infinity
    NonFinite {
        /// Description of where the value was produced
        context: String,
    },

    /// Invalid configuration at construction
    Configuration {
        /// Description of the configuration issue
        description: String,
    },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::DimensionMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Dimension mismatch for {}: expected {}, got {}",
                    context, expected, actual
                )
            }
            FilterError::DegenerateWeights { timestep } => {
                write!(
                    f,
                    "Degenerate particle weights at timestep {}: measurement incompatible with every particle",
                    timestep
                )
            }
            FilterError::SingularInnovation { context } => {
                write!(f, "Innovation covariance is singular: {}", context)
            }
            FilterError::NonFinite { context } => {
                write!(f, "Non-finite value produced by {}", context)
            }
            FilterError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
        }
    }
}

impl std::error::Error for FilterError {}
