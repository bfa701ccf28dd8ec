use thiserror::Error;

/// Errors from light response functions and their building blocks
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LrfError {
    #[error("invalid compression parameters: k={k} (must be > 1), r0={r0} (must be >= 0)")]
    InvalidCompression { k: f64, r0: f64 },
    #[error("invalid LRF domain: rmin={rmin}, rmax={rmax}")]
    InvalidDomain { rmin: f64, rmax: f64 },
    #[error("invalid LRF json: {0}")]
    Json(String),
    #[error("unknown LRF type '{0}'")]
    UnknownType(String),
    #[error("invalid LRF spline: {0}")]
    InvalidSpline(bspline::Error),
    #[error("no accumulated fit data")]
    NoFitData,
    #[error("LRF fit failed: {0}")]
    FitFailed(#[from] bspline::Error),
}

/// Errors from the detector model
#[derive(Debug, Error)]
pub enum LrModelError {
    #[error("sensor id {id} out of range (n_sensors = {n_sensors})")]
    SensorOutOfRange { id: usize, n_sensors: usize },
    #[error("sensor {0} has not been added")]
    SensorNotAdded(usize),
    #[error("sensor {0} has already been added")]
    SensorAlreadyAdded(usize),
    #[error("group id {0} does not exist")]
    GroupNotFound(usize),
    #[error("sensor {id} already belongs to group {group_id}")]
    SensorAlreadyGrouped { id: usize, group_id: usize },
    #[error("sensor {0} does not belong to a group")]
    SensorNotGrouped(usize),
    #[error("sensor {id} is not a member of group {group_id}")]
    NotGroupMember { id: usize, group_id: usize },
    #[error("no LRF available for sensor {0}")]
    NoLrf(usize),
    #[error("no LRF available for group {0}")]
    NoGroupLrf(usize),
    #[error("model is incomplete, sensor {0} has not been added")]
    Incomplete(usize),
    #[error("inconsistent model: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Lrf(#[from] LrfError),
    #[error("model json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model file: {0}")]
    Io(#[from] std::io::Error),
}
