use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("invalid spline range [{x_min}, {x_max}]")]
    InvalidRange { x_min: f64, x_max: f64 },
    #[error("number of intervals must be at least 1, got {n_intervals}")]
    InvalidIntervals { n_intervals: usize },
    #[error("x length {x_len} != y length {y_len}")]
    XAndYLengthMismatch { x_len: usize, y_len: usize },
    #[error("spline json: {0}")]
    Json(String),
    #[error("expected {expected} coefficients, found {found}")]
    CoefficientCount { expected: usize, found: usize },
    #[error("no data inside the spline range")]
    NoData,
    #[error("least squares system is singular")]
    SingularSystem,
    #[error("fit did not converge after {iterations} active-set iterations")]
    NotConverged { iterations: usize },
}
