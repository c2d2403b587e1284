use crate::Models::model_api::ModelError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BackendError {
    #[error("matrix is singular")]
    Singular,
    #[error("iterative solver stopped after {iterations} iterations, residual {residual:e}")]
    NotConverged { iterations: usize, residual: f64 },
    #[error("dimension mismatch: {0}")]
    Dimension(String),
    #[error("solution contains non-finite values")]
    NonFinite,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("linear backend: {0}")]
    Backend(#[from] BackendError),
    #[error("rate correction system is singular")]
    SingularRateSystem,
    #[error("rate balancing did not converge: H = {h:e} after {iterations} iterations")]
    RateBalanceNotConverged { h: f64, iterations: usize },
    #[error("Newton did not converge at t = {t}: err = {err:e}")]
    NewtonNotConverged { t: f64, err: f64 },
    #[error("time step exhausted at t = {t} after {retries} retries")]
    TimeStepExhausted { t: f64, retries: usize },
    #[error("invalid solver settings: {0}")]
    Settings(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Failures that may go away with a smaller time step
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SimError::Backend(_)
                | SimError::SingularRateSystem
                | SimError::RateBalanceNotConverged { .. }
                | SimError::NewtonNotConverged { .. }
        )
    }
}
