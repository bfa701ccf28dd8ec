use crate::errors::LrModelError;
use crate::lr_model::LrModel;
use crate::reconstructor::config::{InitialGuess, RecMethod, ReconstructorConfig};
use crate::reconstructor::minimizer::{MinParameter, Minimizer, MinimizerResult, Simplex};
use log::debug;
use ndarray::{Array2, array};

/// Outcome of the last `process_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecStatus {
    NotProcessed,
    Ok,
    /// Signal or saturation vector shorter than the number of sensors
    InvalidInput,
    /// Fewer than four active sensors, the minimizer was not called
    InsufficientData,
    /// Minimizer status code
    MinimizerFailed(i32),
}

impl RecStatus {
    /// Numeric code, 0 for success and 6 for insufficient data
    pub fn code(&self) -> i32 {
        return match self {
            RecStatus::Ok => 0,
            RecStatus::MinimizerFailed(code) => *code,
            RecStatus::InsufficientData => 6,
            RecStatus::InvalidInput => -2,
            RecStatus::NotProcessed => -1,
        };
    }
}

/// Everything known about one reconstructed event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecResult {
    pub status: RecStatus,
    pub guess_x: f64,
    pub guess_y: f64,
    pub guess_e: f64,
    pub dof: i64,
    pub x: f64,
    pub y: f64,
    pub e: f64,
    pub min_value: f64,
    pub chi2_min: f64,
    pub cov_xx: f64,
    pub cov_yy: f64,
    pub cov_xy: f64,
}

/// Per sensor state cached by the reconstructor
#[derive(Debug, Clone)]
struct RecSensor {
    x: f64,
    y: f64,
    gain: f64,
    on: bool,
}

/// Position and energy reconstruction of single events
///
/// Holds the per event scratch state, so one instance handles one event at a time.
/// Several instances may share the same fitted `LrModel`.
///
/// The gains held here divide the raw amplitudes before the fit. They start at 1.0 because
/// `LrModel::eval` already includes the sensor gains of the model.
#[derive(Debug, Clone)]
pub struct Reconstructor<'a, M: Minimizer = Simplex> {
    model: &'a LrModel,
    config: ReconstructorConfig,
    minimizer: M,
    sensors: Vec<RecSensor>,
    active: Vec<bool>,
    amplitudes: Vec<f64>,
    saturated: Vec<bool>,
    n_minimizer_calls: usize,
    result: RecResult,
}

/// Sum of squared residuals over the active sensors
///
/// # Returns
/// `None` as soon as one prediction is not positive or cannot be evaluated
fn chi2_sum(model: &LrModel, active: &[bool], amplitudes: &[f64], weighted: bool, pos: &[f64; 3], energy: f64) -> Option<f64> {
    let mut sum: f64 = 0.0;
    for (id, is_active) in active.iter().enumerate() {
        if !is_active {
            continue;
        }
        let prediction: f64 = model.eval(id, pos).ok()? * energy;
        if prediction.is_nan() || prediction <= 0.0 {
            return None;
        }
        let delta: f64 = prediction - amplitudes[id];
        sum += if weighted { delta * delta / prediction } else { delta * delta };
    }
    return Some(sum);
}

/// Poisson log likelihood over the active sensors, up to a constant
fn log_lh_sum(model: &LrModel, active: &[bool], amplitudes: &[f64], pos: &[f64; 3], energy: f64) -> Option<f64> {
    let mut sum: f64 = 0.0;
    for (id, is_active) in active.iter().enumerate() {
        if !is_active {
            continue;
        }
        let prediction: f64 = model.eval(id, pos).ok()? * energy;
        if prediction.is_nan() || prediction <= 0.0 {
            return None;
        }
        sum += amplitudes[id] * prediction.ln() - prediction;
    }
    return Some(sum);
}

fn empty_result() -> RecResult {
    return RecResult {
        status: RecStatus::NotProcessed,
        guess_x: f64::NAN,
        guess_y: f64::NAN,
        guess_e: f64::NAN,
        dof: 0,
        x: f64::NAN,
        y: f64::NAN,
        e: f64::NAN,
        min_value: f64::NAN,
        chi2_min: f64::NAN,
        cov_xx: f64::NAN,
        cov_yy: f64::NAN,
        cov_xy: f64::NAN,
    };
}

impl<'a> Reconstructor<'a, Simplex> {
    /// Reconstructor using the built in simplex minimizer, with its caps taken from `config`
    pub fn new(model: &'a LrModel, config: ReconstructorConfig) -> Result<Self, LrModelError> {
        let simplex: Simplex = Simplex::new(config.max_function_calls, config.max_iterations, config.tolerance, config.error_def());
        return Reconstructor::with_minimizer(model, config, simplex);
    }
}

impl<'a, M: Minimizer> Reconstructor<'a, M> {
    /// # Arguments
    /// - `model`: fitted model, every sensor must have been added
    /// - `config`: cutoffs, method and minimizer caps
    /// - `minimizer`: used for every event
    pub fn with_minimizer(model: &'a LrModel, config: ReconstructorConfig, minimizer: M) -> Result<Self, LrModelError> {
        let n_sensors: usize = model.get_sensor_count();

        let mut sensors: Vec<RecSensor> = Vec::with_capacity(n_sensors);
        for id in 0..n_sensors {
            if !model.sensor_exists(id) {
                return Err(LrModelError::Incomplete(id));
            }
            sensors.push(RecSensor {
                x: model.get_x(id)?,
                y: model.get_y(id)?,
                gain: 1.0,
                on: true,
            });
        }

        return Ok(Reconstructor {
            model,
            config,
            minimizer,
            sensors,
            active: vec![true; n_sensors],
            amplitudes: vec![0.0; n_sensors],
            saturated: vec![false; n_sensors],
            n_minimizer_calls: 0,
            result: empty_result(),
        });
    }

    pub fn get_config(&self) -> &ReconstructorConfig {
        return &self.config;
    }

    fn sensor_mut(&mut self, id: usize) -> Result<&mut RecSensor, LrModelError> {
        let n_sensors: usize = self.sensors.len();
        return self.sensors.get_mut(id).ok_or(LrModelError::SensorOutOfRange { id, n_sensors });
    }

    /// Disabled sensors never take part in a fit
    pub fn set_sensor_enabled(&mut self, id: usize, on: bool) -> Result<(), LrModelError> {
        self.sensor_mut(id)?.on = on;
        return Ok(());
    }

    pub fn set_gain(&mut self, id: usize, gain: f64) -> Result<(), LrModelError> {
        self.sensor_mut(id)?.gain = gain;
        return Ok(());
    }

    /// Reconstruct one event
    ///
    /// # Arguments
    /// - `signals`: raw amplitude of every sensor, shape = [n_sensors]
    /// - `saturated`: saturation flag of every sensor, shape = [n_sensors]
    ///
    /// # Returns
    /// `true` when the fit converged; the reason for a failure is in `get_rec_status`
    pub fn process_event(&mut self, signals: &[f64], saturated: &[bool]) -> bool {
        self.result = empty_result();
        self.n_minimizer_calls = 0;

        let n_sensors: usize = self.sensors.len();
        if signals.len() < n_sensors || saturated.len() < n_sensors {
            self.result.status = RecStatus::InvalidInput;
            return false;
        }
        for id in 0..n_sensors {
            self.amplitudes[id] = signals[id] / self.sensors[id].gain;
            self.saturated[id] = saturated[id];
        }

        // Initial guess
        match self.config.guess {
            InitialGuess::Cog => self.guess_by_cog(),
            InitialGuess::Max => self.guess_by_max(),
        }
        self.result.guess_e = self.get_sum_signal() * self.config.energy_calibration;

        // Enough active sensors to fit three parameters?
        let n_active: usize = self.check_active();
        self.result.dof = n_active as i64 - 3;
        if self.result.dof < 1 {
            self.result.status = RecStatus::InsufficientData;
            return false;
        }

        let guess_e: f64 = self.result.guess_e;
        let params: Vec<MinParameter> = vec![
            MinParameter::new("x", self.result.guess_x, self.config.step_x),
            MinParameter::new("y", self.result.guess_y, self.config.step_y),
            MinParameter::with_lower(
                "e",
                guess_e,
                (guess_e * self.config.energy_step_fraction).max(self.config.energy_lower_bound),
                self.config.energy_lower_bound,
            ),
        ];

        // Penalised cost, the penalty grows from the last returned value
        let model: &LrModel = self.model;
        let active: &[bool] = &self.active;
        let amplitudes: &[f64] = &self.amplitudes;
        let method: RecMethod = self.config.method;
        let weighted: bool = self.config.weighted_ls;
        let mut last_value: f64 = match method {
            RecMethod::LeastSquares => 1.0e6,
            RecMethod::MaxLikelihood => 1.0e100,
        };
        let mut objective = |p: &[f64]| -> f64 {
            let pos: [f64; 3] = [p[0], p[1], 0.0];
            let value: Option<f64> = match method {
                RecMethod::LeastSquares => chi2_sum(model, active, amplitudes, weighted, &pos, p[2]),
                RecMethod::MaxLikelihood => log_lh_sum(model, active, amplitudes, &pos, p[2]).map(|log_lh: f64| -log_lh),
            };
            last_value = match value {
                Some(cost) if cost.is_finite() => cost,
                _ => last_value + 0.25 * last_value.abs().max(1.0),
            };
            last_value
        };
        let min_result: MinimizerResult = self.minimizer.minimize(&mut objective, &params);
        self.n_minimizer_calls = min_result.n_calls;

        if !min_result.converged {
            self.result.status = RecStatus::MinimizerFailed(min_result.status);
            debug!("event not reconstructed: minimizer status {}", min_result.status);
            return false;
        }

        self.result.status = RecStatus::Ok;
        self.result.x = min_result.x[0];
        self.result.y = min_result.x[1];
        self.result.e = min_result.x[2];
        self.result.min_value = min_result.min_value;
        self.result.chi2_min = self.get_chi2(self.result.x, self.result.y, 0.0, self.result.e);
        if let Some(covariance) = &min_result.covariance {
            self.result.cov_xx = covariance[[0, 0]];
            self.result.cov_yy = covariance[[1, 1]];
            self.result.cov_xy = covariance[[0, 1]];
        }

        return true;
    }

    /// Marks the sensors taking part in the fit and returns their number
    fn check_active(&mut self) -> usize {
        let a_max: f64 = self.amplitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let cutoff: f64 = self.config.rec_abs_cutoff.max(a_max * self.config.rec_rel_cutoff);
        let guess_x: f64 = self.result.guess_x;
        let guess_y: f64 = self.result.guess_y;

        let mut n_active: usize = 0;
        for (id, sensor) in self.sensors.iter().enumerate() {
            let distance: f64 = (guess_x - sensor.x).hypot(guess_y - sensor.y);
            self.active[id] =
                sensor.on && !self.saturated[id] && self.amplitudes[id] > cutoff && distance <= self.config.rec_cutoff_radius;
            if self.active[id] {
                n_active += 1;
            }
        }
        return n_active;
    }

    fn get_sum_signal(&self) -> f64 {
        return self.amplitudes.iter().sum();
    }

    /// Id of the strongest sensor, the first one on ties
    fn get_max_signal_id(&self) -> Option<usize> {
        let mut id_max: Option<usize> = None;
        for (id, amplitude) in self.amplitudes.iter().enumerate() {
            match id_max {
                Some(current) if self.amplitudes[current] >= *amplitude => {}
                _ => id_max = Some(id),
            }
        }
        return id_max;
    }

    fn guess_by_max(&mut self) {
        if let Some(id) = self.get_max_signal_id() {
            self.result.guess_x = self.sensors[id].x;
            self.result.guess_y = self.sensors[id].y;
        }
    }

    fn guess_by_cog(&mut self) {
        let a_max: f64 = self.amplitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let cutoff: f64 = self.config.cog_abs_cutoff.max(a_max * self.config.cog_rel_cutoff);

        let mut sum_x: f64 = 0.0;
        let mut sum_y: f64 = 0.0;
        let mut sum_amplitude: f64 = 0.0;
        for (sensor, amplitude) in self.sensors.iter().zip(self.amplitudes.iter()) {
            if *amplitude >= cutoff {
                sum_x += sensor.x * amplitude;
                sum_y += sensor.y * amplitude;
                sum_amplitude += amplitude;
            }
        }
        // No signal gives NaN, which later leaves every sensor inactive
        self.result.guess_x = sum_x / sum_amplitude;
        self.result.guess_y = sum_y / sum_amplitude;
    }

    /// Chi2 of the current event at `(x, y, z)` with energy `energy`, infinite outside the LRF support
    pub fn get_chi2(&self, x: f64, y: f64, z: f64, energy: f64) -> f64 {
        let pos: [f64; 3] = [x, y, z];
        return chi2_sum(self.model, &self.active, &self.amplitudes, self.config.weighted_ls, &pos, energy).unwrap_or(f64::INFINITY);
    }

    /// Log likelihood of the current event, minus infinity outside the LRF support
    pub fn get_log_lh(&self, x: f64, y: f64, z: f64, energy: f64) -> f64 {
        let pos: [f64; 3] = [x, y, z];
        return log_lh_sum(self.model, &self.active, &self.amplitudes, &pos, energy).unwrap_or(f64::NEG_INFINITY);
    }

    pub fn get_guess_x(&self) -> f64 {
        return self.result.guess_x;
    }

    pub fn get_guess_y(&self) -> f64 {
        return self.result.guess_y;
    }

    pub fn get_guess_e(&self) -> f64 {
        return self.result.guess_e;
    }

    pub fn get_rec_status(&self) -> RecStatus {
        return self.result.status;
    }

    pub fn get_dof(&self) -> i64 {
        return self.result.dof;
    }

    pub fn get_rec_x(&self) -> f64 {
        return self.result.x;
    }

    pub fn get_rec_y(&self) -> f64 {
        return self.result.y;
    }

    pub fn get_rec_e(&self) -> f64 {
        return self.result.e;
    }

    /// Minimum of the cost function
    pub fn get_rec_min(&self) -> f64 {
        return self.result.min_value;
    }

    /// Chi2 at the reconstructed point, whatever the method
    pub fn get_chi2_min(&self) -> f64 {
        return self.result.chi2_min;
    }

    pub fn get_cov_xx(&self) -> f64 {
        return self.result.cov_xx;
    }

    pub fn get_cov_yy(&self) -> f64 {
        return self.result.cov_yy;
    }

    pub fn get_cov_xy(&self) -> f64 {
        return self.result.cov_xy;
    }

    /// Covariance of the reconstructed position, shape = [2, 2]
    pub fn get_position_covariance(&self) -> Array2<f64> {
        return array![[self.result.cov_xx, self.result.cov_xy], [self.result.cov_xy, self.result.cov_yy]];
    }

    /// Objective evaluations spent on the last event
    pub fn get_minimizer_calls(&self) -> usize {
        return self.n_minimizer_calls;
    }

    pub fn is_active(&self, id: usize) -> bool {
        return self.active.get(id).copied().unwrap_or(false);
    }

    pub fn get_result(&self) -> RecResult {
        return self.result;
    }
}

/// 4x4 grid, pitch 10, one common group fitted to `100 / (1 + r^2 / 400)`
#[cfg(test)]
pub(crate) fn fitted_test_model() -> LrModel {
    use crate::lrf::{AxialLrf, LrfData};

    let n_side: usize = 4;
    let pitch: f64 = 10.0;
    let shift: f64 = pitch * (n_side as f64 - 1.0) / 2.0;
    let mut model: LrModel = LrModel::with_default_lrf(n_side * n_side, Box::new(AxialLrf::new(60.0, 12).expect("valid lrf")));
    for id in 0..n_side * n_side {
        let x: f64 = (id % n_side) as f64 * pitch - shift;
        let y: f64 = (id / n_side) as f64 * pitch - shift;
        model.add_sensor(id, x, y).expect("in range");
    }
    let group_ids: Vec<usize> = model.make_groups_common().expect("valid");

    for id in 0..n_side * n_side {
        let x0: f64 = model.get_x(id).expect("added");
        let y0: f64 = model.get_y(id).expect("added");
        let mut data: Vec<LrfData> = Vec::new();
        for i_x in 0..=60 {
            for i_y in 0..=60 {
                let x: f64 = -30.0 + i_x as f64;
                let y: f64 = -30.0 + i_y as f64;
                let r2: f64 = (x - x0).powi(2) + (y - y0).powi(2);
                data.push([x, y, 0.0, 100.0 / (1.0 + r2 / 400.0)]);
            }
        }
        model.add_fit_data(id, &data).expect("valid");
    }
    model.fit_group(group_ids[0]).expect("fit succeeds");

    return model;
}

#[cfg(test)]
fn synthetic_event(model: &LrModel, x: f64, y: f64, energy: f64) -> Vec<f64> {
    let pos: [f64; 3] = [x, y, 0.0];
    return (0..model.get_sensor_count())
        .map(|id| model.eval(id, &pos).expect("valid") * energy)
        .collect();
}

#[test]
fn test_reconstruct_synthetic_event() {
    use approx::assert_abs_diff_eq;

    let model: LrModel = fitted_test_model();
    let (x0, y0, e0): (f64, f64, f64) = (3.2, -4.7, 5.0);
    let signals: Vec<f64> = synthetic_event(&model, x0, y0, e0);
    let saturated: Vec<bool> = vec![false; 16];

    for method in [RecMethod::LeastSquares, RecMethod::MaxLikelihood] {
        let config: ReconstructorConfig = ReconstructorConfig {
            cog_rel_cutoff: 0.3,
            energy_calibration: 0.001,
            method,
            max_function_calls: 1000,
            ..Default::default()
        };
        let mut reconstructor: Reconstructor = Reconstructor::new(&model, config).expect("complete model");

        assert!(reconstructor.process_event(&signals, &saturated));
        assert_eq!(reconstructor.get_rec_status(), RecStatus::Ok);
        assert_eq!(reconstructor.get_rec_status().code(), 0);
        assert_eq!(reconstructor.get_dof(), 13);

        let precision: f64 = 0.05;
        assert_abs_diff_eq!(reconstructor.get_rec_x(), x0, epsilon = precision);
        assert_abs_diff_eq!(reconstructor.get_rec_y(), y0, epsilon = precision);
        assert_abs_diff_eq!(reconstructor.get_rec_e(), e0, epsilon = 0.01 * e0);
        assert!(reconstructor.get_chi2_min() < 1e-3);

        // The guess is pulled towards the centre of the array
        assert!(reconstructor.get_guess_x().abs() < 15.0);
        assert!(reconstructor.get_guess_e() > 0.0);

        let covariance: Array2<f64> = reconstructor.get_position_covariance();
        assert!(covariance[[0, 0]] > 0.0);
        assert!(covariance[[1, 1]] > 0.0);
        assert_eq!(covariance[[0, 1]], covariance[[1, 0]]);
    }
}

#[test]
fn test_reconstruct_insufficient_data() {
    /// Counts how often it is asked to minimise
    #[derive(Debug, Clone)]
    struct CountingMinimizer {
        n_invocations: usize,
    }

    impl Minimizer for CountingMinimizer {
        fn minimize(&mut self, _objective: &mut dyn FnMut(&[f64]) -> f64, params: &[MinParameter]) -> MinimizerResult {
            self.n_invocations += 1;
            return MinimizerResult {
                converged: false,
                status: 5,
                x: params.iter().map(|param| param.value).collect(),
                min_value: f64::NAN,
                covariance: None,
                n_calls: 0,
            };
        }
    }

    let model: LrModel = fitted_test_model();
    let signals: Vec<f64> = synthetic_event(&model, 5.0, 5.0, 1.0);
    let saturated: Vec<bool> = vec![false; 16];

    // Only the sensor under the event passes the relative cutoff
    let config: ReconstructorConfig = ReconstructorConfig {
        rec_rel_cutoff: 0.95,
        ..Default::default()
    };
    let mut reconstructor: Reconstructor<CountingMinimizer> =
        Reconstructor::with_minimizer(&model, config, CountingMinimizer { n_invocations: 0 }).expect("complete model");

    assert!(!reconstructor.process_event(&signals, &saturated));
    assert_eq!(reconstructor.get_rec_status(), RecStatus::InsufficientData);
    assert_eq!(reconstructor.get_rec_status().code(), 6);
    assert_eq!(reconstructor.get_dof(), -2);
    assert_eq!(reconstructor.minimizer.n_invocations, 0);
    assert!(reconstructor.get_rec_x().is_nan());

    // Saturation and disabled sensors also count against the fit
    let config: ReconstructorConfig = ReconstructorConfig::default();
    let mut reconstructor: Reconstructor<CountingMinimizer> =
        Reconstructor::with_minimizer(&model, config, CountingMinimizer { n_invocations: 0 }).expect("complete model");
    let mut saturated: Vec<bool> = vec![true; 16];
    saturated[0] = false;
    saturated[1] = false;
    saturated[2] = false;
    reconstructor.set_sensor_enabled(2, false).expect("in range");
    assert!(!reconstructor.process_event(&signals, &saturated));
    assert_eq!(reconstructor.get_dof(), -1);
    assert_eq!(reconstructor.minimizer.n_invocations, 0);

    // With enough sensors the minimizer is asked, and its failure is reported
    let saturated: Vec<bool> = vec![false; 16];
    assert!(!reconstructor.process_event(&signals, &saturated));
    assert_eq!(reconstructor.minimizer.n_invocations, 1);
    assert_eq!(reconstructor.get_rec_status(), RecStatus::MinimizerFailed(5));
}

#[test]
fn test_reconstruct_cutoff_radius_and_input() {
    let model: LrModel = fitted_test_model();
    let signals: Vec<f64> = synthetic_event(&model, 5.0, 5.0, 2.0);
    let saturated: Vec<bool> = vec![false; 16];

    let config: ReconstructorConfig = ReconstructorConfig {
        guess: InitialGuess::Max,
        rec_cutoff_radius: 10.5,
        ..Default::default()
    };
    let mut reconstructor: Reconstructor = Reconstructor::new(&model, config).expect("complete model");

    // The sensor at (5, 5) and its four nearest neighbours
    reconstructor.process_event(&signals, &saturated);
    assert_eq!(reconstructor.get_guess_x(), 5.0);
    assert_eq!(reconstructor.get_guess_y(), 5.0);
    assert_eq!(reconstructor.get_dof(), 2);
    assert_eq!((0..16).filter(|id| reconstructor.is_active(*id)).count(), 5);

    // Guessed energy is the total signal times the calibration
    let total: f64 = signals.iter().sum();
    assert!((reconstructor.get_guess_e() - total * 3.75e-5).abs() < 1e-12);

    assert!(!reconstructor.process_event(&signals[..10], &saturated));
    assert_eq!(reconstructor.get_rec_status(), RecStatus::InvalidInput);
    assert!(reconstructor.set_gain(16, 2.0).is_err());
}

#[test]
fn test_reconstructor_needs_complete_model() {
    let mut model: LrModel = LrModel::new(3);
    model.add_sensor(0, 0.0, 0.0).expect("in range");
    model.add_sensor(2, 1.0, 0.0).expect("in range");
    assert!(matches!(
        Reconstructor::new(&model, ReconstructorConfig::default()),
        Err(LrModelError::Incomplete(1))
    ));
}
