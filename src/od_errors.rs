use thiserror::Error;

use crate::constants::Epoch;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OdError {
    #[error("Dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid integrator settings: {0}")]
    InvalidIntegratorSettings(String),

    #[error("Invalid termination settings: {0}")]
    InvalidTerminationSettings(String),

    #[error("Invalid convergence checker parameter: {0}")]
    InvalidConvergenceParameter(String),

    #[error("Invalid estimated parameter settings: {0}")]
    InvalidParameterSettings(String),

    #[error("Invalid observation model: {0}")]
    InvalidObservationModel(String),

    #[error("Unsupported observable dimension: {0}")]
    UnsupportedObservableSize(usize),

    #[error("No observation model for observable {observable} on link {link}")]
    UnknownObservationModel { observable: String, link: String },

    #[error("Unknown body: {0}")]
    UnknownBody(String),

    #[error("Body {0} has no ephemeris")]
    MissingEphemeris(String),

    #[error("Cyclic ephemeris origin chain starting at body {0}")]
    CyclicEphemerisOrigin(String),

    #[error("Epoch {epoch} is not strictly after the last recorded epoch {last}")]
    NonIncreasingEpoch { epoch: Epoch, last: Epoch },

    #[error("Epoch {epoch} is outside the available interval [{start}, {end}]")]
    EpochOutOfRange {
        epoch: Epoch,
        start: Epoch,
        end: Epoch,
    },

    #[error("Non-finite value in {0}")]
    NonFiniteValue(String),

    #[error("No numerical solution available: {0}")]
    NoNumericalSolution(String),

    #[error("Observation collection contains no observations")]
    NoObservations,

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjectionError(rand_distr::NormalError),
}

impl From<rand_distr::NormalError> for OdError {
    fn from(err: rand_distr::NormalError) -> Self {
        OdError::NoiseInjectionError(err)
    }
}

impl OdError {
    /// Shorthand for a [`OdError::DimensionMismatch`] with an owned context string.
    pub(crate) fn dimension(context: &str, expected: usize, found: usize) -> Self {
        OdError::DimensionMismatch {
            context: context.to_string(),
            expected,
            found,
        }
    }
}
