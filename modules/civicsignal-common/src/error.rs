use thiserror::Error;

/// Why a submission was refused before scoring.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("location ({lat}, {lng}) is outside the national bounding box")]
    OutOfBounds { lat: f64, lng: f64 },

    #[error("GPS accuracy {accuracy_m}m is at or beyond the reject threshold")]
    GpsAccuracyTooLow { accuracy_m: f64 },

    #[error("coordinates or accuracy are not valid numbers")]
    InvalidCoordinates,

    #[error("trust weight {0} is outside (0, 5.0]")]
    InvalidTrustWeight(f64),
}

impl RejectReason {
    /// Stable status code handed back to the intake collaborator.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::OutOfBounds { .. } => "out_of_bounds",
            RejectReason::GpsAccuracyTooLow { .. } => "gps_accuracy_too_low",
            RejectReason::InvalidCoordinates => "invalid_coordinates",
            RejectReason::InvalidTrustWeight(_) => "invalid_trust_weight",
        }
    }
}

#[derive(Error, Debug)]
pub enum CivicSignalError {
    #[error("Input rejected: {0}")]
    InputRejected(#[from] RejectReason),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CivicSignalError>;
