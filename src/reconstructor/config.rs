use crate::errors::LrModelError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cost function minimised for every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecMethod {
    LeastSquares,
    /// Poisson likelihood, the negated log likelihood is minimised
    MaxLikelihood,
}

/// How the starting position of the fit is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialGuess {
    /// Amplitude weighted centre of gravity
    Cog,
    /// Position of the strongest sensor
    Max,
}

/// Tunables of the event reconstruction
///
/// Every field has a default, so a json file only needs to list what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructorConfig {
    pub cog_abs_cutoff: f64,
    pub cog_rel_cutoff: f64,
    pub rec_abs_cutoff: f64,
    pub rec_rel_cutoff: f64,
    /// Sensors further than this from the initial guess are left out of the fit
    pub rec_cutoff_radius: f64,
    /// Scale between the total signal and the event energy
    pub energy_calibration: f64,
    pub method: RecMethod,
    /// Divide the squared residuals by the prediction
    pub weighted_ls: bool,
    pub guess: InitialGuess,
    pub step_x: f64,
    pub step_y: f64,
    /// Initial energy step as a fraction of the guessed energy
    pub energy_step_fraction: f64,
    pub energy_lower_bound: f64,
    pub max_function_calls: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        return ReconstructorConfig {
            cog_abs_cutoff: 0.0,
            cog_rel_cutoff: 0.0,
            rec_abs_cutoff: 0.0,
            rec_rel_cutoff: 0.0,
            rec_cutoff_radius: 1.0e12,
            energy_calibration: 3.75e-5,
            method: RecMethod::LeastSquares,
            weighted_ls: true,
            guess: InitialGuess::Cog,
            step_x: 1.0,
            step_y: 1.0,
            energy_step_fraction: 0.2,
            energy_lower_bound: 1.0e-6,
            max_function_calls: 500,
            max_iterations: 1000,
            tolerance: 0.001,
        };
    }
}

impl ReconstructorConfig {
    pub fn from_json_str(json_str: &str) -> Result<Self, LrModelError> {
        let config: ReconstructorConfig = serde_json::from_str(json_str)?;
        return Ok(config);
    }

    pub fn load_json(path: &Path) -> Result<Self, LrModelError> {
        let json_string: String = std::fs::read_to_string(path)?;
        return ReconstructorConfig::from_json_str(&json_string);
    }

    /// Objective change corresponding to one standard deviation
    pub fn error_def(&self) -> f64 {
        return match self.method {
            RecMethod::LeastSquares => 1.0,
            RecMethod::MaxLikelihood => 0.5,
        };
    }
}

#[test]
fn test_config_partial_json() {
    let config: ReconstructorConfig =
        ReconstructorConfig::from_json_str(r#"{"cog_rel_cutoff": 0.1, "method": "MaxLikelihood", "energy_calibration": 0.005}"#)
            .expect("valid json");

    assert_eq!(config.cog_rel_cutoff, 0.1);
    assert_eq!(config.method, RecMethod::MaxLikelihood);
    assert_eq!(config.energy_calibration, 0.005);
    assert_eq!(config.error_def(), 0.5);

    // Everything else keeps its default
    assert_eq!(config.rec_cutoff_radius, 1.0e12);
    assert_eq!(config.max_function_calls, 500);
    assert!(config.weighted_ls);
    assert_eq!(config.guess, InitialGuess::Cog);

    assert!(ReconstructorConfig::from_json_str(r#"{"method": "Bayesian"}"#).is_err());
}
