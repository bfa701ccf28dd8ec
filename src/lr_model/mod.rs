// Load modules
mod gain_estimator;
mod grouping;
mod json_io;
mod model;

// Expose functions to public
pub use gain_estimator::GainEstimator;
pub use model::{DEFAULT_TOLERANCE, LrGroup, LrModel, LrSensor, UngroupPolicy};
