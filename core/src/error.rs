//! Error taxonomy for the QSS core.

use thiserror::Error;

/// Result type for QSS core operations.
pub type Result<T> = std::result::Result<T, QssError>;

/// Status returned by an oracle call that did not fully succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleStatus {
    Warning,
    Discard,
    Error,
    Fatal,
    Pending,
}

/// Error kinds produced by the QSS core, per the error taxonomy of the
/// specification (§7): invariant/tolerance/structural errors are fatal,
/// numeric and warning-level oracle errors are recovered locally.
#[derive(Error, Debug)]
pub enum QssError {
    /// A data-model invariant failed (e.g. unsorted observees at
    /// finalize). Fatal.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// The oracle returned a non-ok status.
    #[error("oracle failure ({status:?}): {message}")]
    OracleFailure { status: OracleStatus, message: String },

    /// The root finder returned a non-finite or negative root for a
    /// valid polynomial; recovered by setting `tE` to `+inf`.
    #[error("numeric failure in variable '{variable}': {message}")]
    NumericFailure { variable: String, message: String },

    /// Non-positive tolerance, or `dt_min > dt_max`. Fatal at
    /// configuration time.
    #[error("invalid tolerances: {0}")]
    TolerancesInvalid(String),

    /// More than `max_pass_count_multiplier * n_variables` events
    /// occurred at the same superdense time.
    #[error("infinite event loop at t={t}: offending variables {variables:?}")]
    InfiniteEventLoop { t: f64, variables: Vec<String> },

    /// A referenced variable id is not present in the model.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
}

impl QssError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }

    pub fn oracle(status: OracleStatus, msg: impl Into<String>) -> Self {
        Self::OracleFailure { status, message: msg.into() }
    }

    pub fn numeric(variable: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NumericFailure { variable: variable.into(), message: msg.into() }
    }

    pub fn tolerances(msg: impl Into<String>) -> Self {
        Self::TolerancesInvalid(msg.into())
    }

    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::UnknownVariable(name.into())
    }

    /// True if this error kind should be logged and the simulation
    /// allowed to continue, per the propagation policy of §7.
    pub fn is_recoverable(&self) -> bool {
        match self {
            QssError::OracleFailure { status, .. } => {
                matches!(status, OracleStatus::Warning | OracleStatus::Discard)
            }
            QssError::NumericFailure { .. } => true,
            _ => false,
        }
    }
}
