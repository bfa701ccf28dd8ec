use crate::compress::{Compress1d, compress_from_json};
use crate::errors::LrfError;
use crate::lrf::{Lrf, LrfData};
use bspline::{Bspline1d, BsFit1d, FitConstraints, ProfileHist1d};
use serde::Deserialize;
use serde_json::Value;
use std::any::Any;

#[derive(Deserialize)]
struct AxialLrfJson {
    rmax: f64,
    // Older configurations do not carry `rmin`, `x0` or `y0`
    #[serde(default)]
    rmin: f64,
    #[serde(default)]
    x0: f64,
    #[serde(default)]
    y0: f64,
    response: Option<Value>,
    compression: Option<Value>,
}

/// Radially symmetric LRF
///
/// The response is a cubic B-spline of the (optionally compressed) distance from the
/// origin `(x0, y0)`, defined on the annulus `rmin < r < rmax`.
/// The spline range is always `[rho(rmin), rho(rmax)]`.
#[derive(Debug, Clone)]
pub struct AxialLrf {
    x0: f64,
    y0: f64,
    rmin: f64,
    rmax: f64,
    rmin2: f64,
    rmax2: f64,
    n_intervals: usize,
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    z_min: f64,
    z_max: f64,
    spline: Bspline1d,
    compress: Option<Box<dyn Compress1d>>,
    fitter: Option<BsFit1d>,
    flat_top: bool,
    non_increasing: bool,
    non_negative: bool,
    binned: bool,
    valid: bool,
}

impl AxialLrf {
    /// Create an unfitted axial LRF centred on the origin
    ///
    /// # Arguments
    /// - `rmax`: outer radius of the domain, must be positive
    /// - `n_intervals`: number of spline intervals
    ///
    pub fn new(rmax: f64, n_intervals: usize) -> Result<Self, LrfError> {
        if !(rmax > 0.0) {
            return Err(LrfError::InvalidDomain { rmin: 0.0, rmax });
        }
        let spline: Bspline1d = Bspline1d::new(0.0, rmax, n_intervals).map_err(LrfError::InvalidSpline)?;

        let mut lrf: AxialLrf = AxialLrf {
            x0: 0.0,
            y0: 0.0,
            rmin: 0.0,
            rmax,
            rmin2: 0.0,
            rmax2: 0.0,
            n_intervals,
            x_min: 0.0,
            x_max: 0.0,
            y_min: 0.0,
            y_max: 0.0,
            z_min: f64::NEG_INFINITY,
            z_max: f64::INFINITY,
            spline,
            compress: None,
            fitter: None,
            flat_top: false,
            non_increasing: false,
            non_negative: false,
            binned: true,
            valid: false,
        };
        lrf.update_bounds();

        return Ok(lrf);
    }

    fn update_bounds(&mut self) {
        self.rmin2 = self.rmin * self.rmin;
        self.rmax2 = self.rmax * self.rmax;
        self.x_min = self.x0 - self.rmax;
        self.x_max = self.x0 + self.rmax;
        self.y_min = self.y0 - self.rmax;
        self.y_max = self.y0 + self.rmax;
    }

    /// Replace the spline by an empty one spanning `[rho(rmin), rho(rmax)]`
    ///
    /// Any fitted response and accumulated data are dropped. On error nothing is changed.
    fn rebuild_scaffold(&mut self, rmin: f64, rmax: f64, compress: Option<Box<dyn Compress1d>>) -> Result<(), LrfError> {
        if !(rmin >= 0.0) || !(rmax > rmin) {
            return Err(LrfError::InvalidDomain { rmin, rmax });
        }
        let rho_min: f64 = compress.as_ref().map_or(rmin, |compress| compress.rho(rmin));
        let rho_max: f64 = compress.as_ref().map_or(rmax, |compress| compress.rho(rmax));
        let spline: Bspline1d = Bspline1d::new(rho_min, rho_max, self.n_intervals).map_err(LrfError::InvalidSpline)?;

        self.rmin = rmin;
        self.rmax = rmax;
        self.compress = compress;
        self.spline = spline;
        self.fitter = None;
        self.valid = false;
        self.update_bounds();

        return Ok(());
    }

    pub fn set_origin(&mut self, x0: f64, y0: f64) -> Result<(), LrfError> {
        self.x0 = x0;
        self.y0 = y0;
        let compress: Option<Box<dyn Compress1d>> = self.compress.clone();
        return self.rebuild_scaffold(self.rmin, self.rmax, compress);
    }

    pub fn set_rmin(&mut self, rmin: f64) -> Result<(), LrfError> {
        let compress: Option<Box<dyn Compress1d>> = self.compress.clone();
        return self.rebuild_scaffold(rmin, self.rmax, compress);
    }

    pub fn set_rmax(&mut self, rmax: f64) -> Result<(), LrfError> {
        let compress: Option<Box<dyn Compress1d>> = self.compress.clone();
        return self.rebuild_scaffold(self.rmin, rmax, compress);
    }

    pub fn set_compression(&mut self, compress: Option<Box<dyn Compress1d>>) -> Result<(), LrfError> {
        return self.rebuild_scaffold(self.rmin, self.rmax, compress);
    }

    /// Force zero derivative at the inner edge
    pub fn set_flat_top(&mut self, flat_top: bool) {
        self.flat_top = flat_top;
    }

    pub fn set_non_increasing(&mut self, non_increasing: bool) {
        self.non_increasing = non_increasing;
    }

    pub fn get_origin(&self) -> (f64, f64) {
        return (self.x0, self.y0);
    }

    pub fn get_rmin(&self) -> f64 {
        return self.rmin;
    }

    pub fn get_compression(&self) -> Option<&dyn Compress1d> {
        return self.compress.as_deref();
    }

    pub fn get_spline(&self) -> &Bspline1d {
        return &self.spline;
    }

    /// Histogram of the data accumulated with `add_data`
    pub fn get_hist(&self) -> Option<&ProfileHist1d> {
        return self.fitter.as_ref().map(|fitter| fitter.get_hist());
    }

    pub fn r2(&self, x: f64, y: f64) -> f64 {
        let dx: f64 = x - self.x0;
        let dy: f64 = y - self.y0;
        return dx * dx + dy * dy;
    }

    pub fn r(&self, x: f64, y: f64) -> f64 {
        return self.r2(x, y).sqrt();
    }

    /// Compressed radius
    pub fn rho_r(&self, r: f64) -> f64 {
        return match &self.compress {
            Some(compress) => compress.rho(r),
            None => r,
        };
    }

    pub fn rho(&self, x: f64, y: f64) -> f64 {
        return self.rho_r(self.r(x, y));
    }

    /// d(rho)/dx, taken as zero at the origin
    pub fn rho_drv_x(&self, x: f64, y: f64) -> f64 {
        let r: f64 = self.r(x, y);
        if r == 0.0 {
            return 0.0;
        }
        let dr_dx: f64 = (x - self.x0) / r;
        return match &self.compress {
            Some(compress) => compress.rho_drv(r) * dr_dx,
            None => dr_dx,
        };
    }

    /// d(rho)/dy, taken as zero at the origin
    pub fn rho_drv_y(&self, x: f64, y: f64) -> f64 {
        let r: f64 = self.r(x, y);
        if r == 0.0 {
            return 0.0;
        }
        let dr_dy: f64 = (y - self.y0) / r;
        return match &self.compress {
            Some(compress) => compress.rho_drv(r) * dr_dy,
            None => dr_dy,
        };
    }

    fn init_fit(&self) -> Result<BsFit1d, LrfError> {
        let constraints: FitConstraints = FitConstraints {
            non_negative: self.non_negative,
            non_increasing: self.non_increasing,
            fix_drv_left: if self.flat_top { Some(0.0) } else { None },
        };
        return BsFit1d::with_constraints(&self.spline, constraints).map_err(LrfError::InvalidSpline);
    }

    /// Compressed radius and amplitude of the samples inside the domain
    fn in_domain_samples(&self, data: &[LrfData]) -> (Vec<f64>, Vec<f64>) {
        let mut rho: Vec<f64> = Vec::with_capacity(data.len());
        let mut amplitude: Vec<f64> = Vec::with_capacity(data.len());
        for sample in data {
            if !self.in_domain(sample[0], sample[1], sample[2]) {
                continue;
            }
            rho.push(self.rho(sample[0], sample[1]));
            amplitude.push(sample[3]);
        }
        return (rho, amplitude);
    }
}

impl Lrf for AxialLrf {
    fn lrf_type(&self) -> &'static str {
        return "Axial";
    }

    fn clone_box(&self) -> Box<dyn Lrf> {
        return Box::new(self.clone());
    }

    fn as_any(&self) -> &dyn Any {
        return self;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        return self;
    }

    fn in_domain(&self, x: f64, y: f64, _z: f64) -> bool {
        let r2: f64 = self.r2(x, y);
        return r2 < self.rmax2 && r2 > self.rmin2;
    }

    fn eval(&self, x: f64, y: f64, _z: f64) -> f64 {
        if !self.is_ready() {
            return 0.0;
        }
        return self.spline.eval(self.rho(x, y));
    }

    fn eval_drv_x(&self, x: f64, y: f64, _z: f64) -> f64 {
        if !self.is_ready() {
            return 0.0;
        }
        return self.spline.eval_drv(self.rho(x, y)) * self.rho_drv_x(x, y);
    }

    fn eval_drv_y(&self, x: f64, y: f64, _z: f64) -> f64 {
        if !self.is_ready() {
            return 0.0;
        }
        return self.spline.eval_drv(self.rho(x, y)) * self.rho_drv_y(x, y);
    }

    fn fit_data(&mut self, data: &[LrfData]) -> Result<(), LrfError> {
        let (rho, amplitude) = self.in_domain_samples(data);

        let mut fitter: BsFit1d = self.init_fit()?;
        let fit_result: Result<(), bspline::Error> = if self.binned {
            match fitter.add_data_vec(&rho, &amplitude) {
                Ok(()) => fitter.binned_fit(),
                Err(error) => Err(error),
            }
        } else {
            fitter.fit(&rho, &amplitude)
        };

        if let Err(error) = fit_result {
            self.valid = false;
            return Err(LrfError::FitFailed(error));
        }

        match fitter.make_spline() {
            Some(spline) => {
                self.spline = spline;
                self.valid = true;
                return Ok(());
            }
            None => {
                self.valid = false;
                return Err(LrfError::NoFitData);
            }
        }
    }

    fn add_data(&mut self, data: &[LrfData]) -> Result<(), LrfError> {
        let (rho, amplitude) = self.in_domain_samples(data);

        if self.fitter.is_none() {
            self.fitter = Some(self.init_fit()?);
        }
        if let Some(fitter) = self.fitter.as_mut() {
            fitter.add_data_vec(&rho, &amplitude)?;
        }

        return Ok(());
    }

    fn do_fit(&mut self) -> Result<(), LrfError> {
        let fitter: &mut BsFit1d = self.fitter.as_mut().ok_or(LrfError::NoFitData)?;

        if let Err(error) = fitter.binned_fit() {
            self.valid = false;
            return Err(LrfError::FitFailed(error));
        }

        match fitter.make_spline() {
            Some(spline) => {
                self.spline = spline;
                self.valid = true;
                return Ok(());
            }
            None => {
                self.valid = false;
                return Err(LrfError::NoFitData);
            }
        }
    }

    fn clear_fit_data(&mut self) {
        self.fitter = None;
    }

    fn is_valid(&self) -> bool {
        return self.valid;
    }

    fn is_ready(&self) -> bool {
        return self.spline.is_ready();
    }

    fn get_rmax(&self) -> f64 {
        return self.rmax;
    }

    fn get_xmin(&self) -> f64 {
        return self.x_min;
    }

    fn get_xmax(&self) -> f64 {
        return self.x_max;
    }

    fn get_ymin(&self) -> f64 {
        return self.y_min;
    }

    fn get_ymax(&self) -> f64 {
        return self.y_max;
    }

    fn get_zmin(&self) -> f64 {
        return self.z_min;
    }

    fn get_zmax(&self) -> f64 {
        return self.z_max;
    }

    fn set_binned(&mut self, binned: bool) {
        self.binned = binned;
    }

    fn set_non_negative(&mut self, non_negative: bool) {
        self.non_negative = non_negative;
    }

    fn get_ratio(&self, other: &dyn Lrf) -> f64 {
        let other: &AxialLrf = match other.as_any().downcast_ref::<AxialLrf>() {
            Some(other) => other,
            None => return -1.0,
        };
        let (hist_self, hist_other) = match (self.get_hist(), other.get_hist()) {
            (Some(hist_self), Some(hist_other)) => (hist_self, hist_other),
            _ => return -1.0,
        };

        let n_bins: usize = hist_self.get_bins_total();
        if hist_other.get_bins_total() != n_bins {
            return -1.0;
        }

        let mut sum_xy: f64 = 0.0;
        let mut sum_xx: f64 = 0.0;
        for i_bin in 0..n_bins {
            // Only bins filled on both sides
            if hist_self.get_flat_bin_entries(i_bin) == 0 || hist_other.get_flat_bin_entries(i_bin) == 0 {
                continue;
            }
            let z_self: f64 = hist_self.get_flat_bin_mean(i_bin);
            sum_xy += z_self * hist_other.get_flat_bin_mean(i_bin);
            sum_xx += z_self * z_self;
        }

        if sum_xx > 0.0 {
            return sum_xy / sum_xx;
        }
        return -1.0;
    }

    fn to_json(&self) -> Value {
        let mut json: serde_json::Map<String, Value> = serde_json::Map::new();
        json.insert("type".to_string(), Value::from(self.lrf_type()));
        json.insert("rmin".to_string(), Value::from(self.rmin));
        json.insert("rmax".to_string(), Value::from(self.rmax));
        json.insert("x0".to_string(), Value::from(self.x0));
        json.insert("y0".to_string(), Value::from(self.y0));
        json.insert("response".to_string(), serde_json::json!({"bspline3": self.spline.to_json()}));
        if let Some(compress) = &self.compress {
            json.insert("compression".to_string(), compress.to_json());
        }
        return Value::Object(json);
    }
}

/// Read an `AxialLrf` from json
///
/// Fails when `rmax` is missing, `rmax <= rmin`, or the response spline is missing or invalid
pub(crate) fn axial_from_json(json: &Value) -> Result<Box<dyn Lrf>, LrfError> {
    let parsed: AxialLrfJson = serde_json::from_value(json.clone()).map_err(|error| LrfError::Json(error.to_string()))?;

    if !(parsed.rmax > parsed.rmin) || !(parsed.rmin >= 0.0) {
        return Err(LrfError::InvalidDomain {
            rmin: parsed.rmin,
            rmax: parsed.rmax,
        });
    }

    let compress: Option<Box<dyn Compress1d>> = match &parsed.compression {
        Some(compression_json) => Some(compress_from_json(compression_json).ok_or_else(|| LrfError::Json("invalid compression".to_string()))?),
        None => None,
    };

    let spline_json: &Value = parsed
        .response
        .as_ref()
        .and_then(|response| response.get("bspline3"))
        .ok_or_else(|| LrfError::Json("missing 'response.bspline3'".to_string()))?;
    let spline: Bspline1d = Bspline1d::from_json(spline_json).map_err(LrfError::InvalidSpline)?;

    let mut lrf: AxialLrf = AxialLrf {
        x0: parsed.x0,
        y0: parsed.y0,
        rmin: parsed.rmin,
        rmax: parsed.rmax,
        rmin2: 0.0,
        rmax2: 0.0,
        n_intervals: spline.get_nint(),
        x_min: 0.0,
        x_max: 0.0,
        y_min: 0.0,
        y_max: 0.0,
        z_min: f64::NEG_INFINITY,
        z_max: f64::INFINITY,
        valid: spline.is_ready(),
        spline,
        compress,
        fitter: None,
        flat_top: false,
        non_increasing: false,
        non_negative: false,
        binned: true,
    };
    lrf.update_bounds();

    return Ok(Box::new(lrf));
}

#[cfg(test)]
fn radial_samples(x0: f64, y0: f64, rmax: f64, amplitude: impl Fn(f64) -> f64) -> Vec<LrfData> {
    let mut data: Vec<LrfData> = Vec::new();
    let n_r: usize = 400;
    let n_phi: usize = 12;
    for i_r in 0..n_r {
        let r: f64 = rmax * (i_r as f64 + 0.5) / n_r as f64;
        for i_phi in 0..n_phi {
            let phi: f64 = 2.0 * std::f64::consts::PI * (i_phi as f64 + 0.25 * i_r as f64) / n_phi as f64;
            data.push([x0 + r * phi.cos(), y0 + r * phi.sin(), 0.0, amplitude(r)]);
        }
    }
    return data;
}

#[test]
fn test_axial_domain() {
    let mut lrf: AxialLrf = AxialLrf::new(10.0, 5).expect("valid lrf");
    lrf.set_origin(1.0, -2.0).expect("valid origin");
    lrf.set_rmin(2.0).expect("valid rmin");

    // Both bounds are strict
    assert!(lrf.in_domain(1.0 + 5.0, -2.0, 0.0));
    assert!(!lrf.in_domain(1.0 + 10.0, -2.0, 0.0));
    assert!(!lrf.in_domain(1.0 + 2.0, -2.0, 0.0));
    assert!(!lrf.in_domain(1.0, -2.0, 0.0));
    assert!(!lrf.in_domain(1.0, 9.0, 0.0));

    assert_eq!(lrf.get_xmin(), -9.0);
    assert_eq!(lrf.get_ymax(), 8.0);

    // Not fitted yet
    assert!(!lrf.is_ready());
    assert!(!lrf.is_valid());
    assert_eq!(lrf.eval(1.0 + 5.0, -2.0, 0.0), 0.0);
    assert_eq!(lrf.eval_drv_x(1.0 + 5.0, -2.0, 0.0), 0.0);

    assert!(lrf.set_rmin(10.0).is_err());
    assert!(AxialLrf::new(0.0, 5).is_err());
    assert!(AxialLrf::new(10.0, 0).is_err());
}

#[test]
fn test_axial_fit_reproduces_profile() {
    use approx::assert_abs_diff_eq;

    let profile = |r: f64| 100.0 / (1.0 + (r / 15.0).powi(2));
    let data: Vec<LrfData> = radial_samples(3.0, 4.0, 60.0, profile);

    for binned in [true, false] {
        let mut lrf: AxialLrf = AxialLrf::new(60.0, 20).expect("valid lrf");
        lrf.set_origin(3.0, 4.0).expect("valid origin");
        lrf.set_binned(binned);
        lrf.fit_data(&data).expect("fit succeeds");
        assert!(lrf.is_valid());

        let precision: f64 = 1.0;
        for i_r in 1..58 {
            let r: f64 = i_r as f64;
            assert_abs_diff_eq!(lrf.eval(3.0 + r, 4.0, 0.0), profile(r), epsilon = precision);
            assert_abs_diff_eq!(lrf.eval(3.0, 4.0 - r, 0.0), profile(r), epsilon = precision);
        }
    }
}

#[test]
fn test_axial_derivative_matches_finite_difference() {
    use crate::compress::DualSlopeCompress;
    use approx::assert_abs_diff_eq;

    let profile = |r: f64| 100.0 * (-r / 20.0).exp();
    let data: Vec<LrfData> = radial_samples(0.0, 0.0, 50.0, profile);

    let mut lrf: AxialLrf = AxialLrf::new(50.0, 10).expect("valid lrf");
    let compress: DualSlopeCompress = DualSlopeCompress::new(5.0, 10.0, 3.0).expect("valid compression");
    lrf.set_compression(Some(Box::new(compress))).expect("valid compression");
    lrf.fit_data(&data).expect("fit succeeds");

    let d_x: f64 = 1e-5;
    let precision: f64 = 1e-4;
    for (x, y) in [(3.0, 4.0), (-10.0, 2.0), (20.0, -15.0), (0.5, 30.0)] {
        let drv_x: f64 = (lrf.eval(x + d_x, y, 0.0) - lrf.eval(x - d_x, y, 0.0)) / (2.0 * d_x);
        let drv_y: f64 = (lrf.eval(x, y + d_x, 0.0) - lrf.eval(x, y - d_x, 0.0)) / (2.0 * d_x);
        assert_abs_diff_eq!(lrf.eval_drv_x(x, y, 0.0), drv_x, epsilon = precision);
        assert_abs_diff_eq!(lrf.eval_drv_y(x, y, 0.0), drv_y, epsilon = precision);
    }
}

#[test]
fn test_axial_fit_idempotent() {
    use approx::assert_abs_diff_eq;

    let data: Vec<LrfData> = radial_samples(0.0, 0.0, 40.0, |r: f64| 50.0 - r);

    let mut lrf: AxialLrf = AxialLrf::new(40.0, 8).expect("valid lrf");
    lrf.set_non_increasing(true);
    lrf.set_flat_top(true);
    lrf.fit_data(&data).expect("fit succeeds");
    let first: Vec<f64> = lrf.get_spline().coefficients().expect("fitted").to_vec();

    lrf.fit_data(&data).expect("fit succeeds");
    let second: Vec<f64> = lrf.get_spline().coefficients().expect("fitted").to_vec();

    let precision: f64 = 1e-9;
    for (c_first, c_second) in first.iter().zip(second.iter()) {
        assert_abs_diff_eq!(*c_first, *c_second, epsilon = precision);
    }

    // Non-increasing response
    let mut previous: f64 = lrf.eval(0.01, 0.0, 0.0);
    for i_r in 1..40 {
        let value: f64 = lrf.eval(i_r as f64, 0.0, 0.0);
        assert!(value <= previous + 1e-9);
        previous = value;
    }
}

#[test]
fn test_axial_incremental_fit() {
    use approx::assert_abs_diff_eq;

    let profile = |r: f64| 80.0 / (1.0 + (r / 10.0).powi(2));
    let data: Vec<LrfData> = radial_samples(0.0, 0.0, 40.0, profile);

    let mut lrf: AxialLrf = AxialLrf::new(40.0, 16).expect("valid lrf");
    assert_eq!(lrf.do_fit(), Err(LrfError::NoFitData));

    // Data arriving in two passes
    let (first, second) = data.split_at(data.len() / 2);
    lrf.add_data(first).expect("accumulates");
    lrf.add_data(second).expect("accumulates");
    lrf.do_fit().expect("fit succeeds");
    assert!(lrf.is_valid());

    let precision: f64 = 1.0;
    for i_r in 1..38 {
        let r: f64 = i_r as f64;
        assert_abs_diff_eq!(lrf.eval(0.0, r, 0.0), profile(r), epsilon = precision);
    }

    // Changing the domain drops both the response and the accumulator
    lrf.set_rmax(45.0).expect("valid rmax");
    assert!(!lrf.is_valid());
    assert!(!lrf.is_ready());
    assert!(lrf.get_hist().is_none());
    assert_eq!(lrf.get_spline().get_xmax(), 45.0);
}

#[test]
fn test_axial_get_ratio() {
    use approx::assert_abs_diff_eq;

    let profile = |r: f64| 100.0 * (-r / 15.0).exp();
    let data: Vec<LrfData> = radial_samples(0.0, 0.0, 40.0, profile);
    let scale: f64 = 1.7;
    let data_scaled: Vec<LrfData> = data.iter().map(|d| [d[0], d[1], d[2], d[3] * scale]).collect();

    let prototype: AxialLrf = AxialLrf::new(40.0, 8).expect("valid lrf");
    let mut lrf_a: AxialLrf = prototype.clone();
    let mut lrf_b: AxialLrf = prototype.clone();
    let mut lrf_c: AxialLrf = prototype.clone();

    // No accumulator yet
    assert_eq!(lrf_a.get_ratio(&lrf_b), -1.0);

    lrf_a.add_data(&data).expect("accumulates");
    lrf_b.add_data(&data).expect("accumulates");
    lrf_c.add_data(&data_scaled).expect("accumulates");

    let precision: f64 = 1e-10;
    assert_abs_diff_eq!(lrf_a.get_ratio(&lrf_b), 1.0, epsilon = precision);
    assert_abs_diff_eq!(lrf_a.get_ratio(&lrf_c), scale, epsilon = precision);
    assert_abs_diff_eq!(lrf_c.get_ratio(&lrf_a), 1.0 / scale, epsilon = precision);

    // Disjoint radial ranges share no bins
    let inner: Vec<LrfData> = data.iter().filter(|d| d[0].hypot(d[1]) < 10.0).cloned().collect();
    let outer: Vec<LrfData> = data.iter().filter(|d| d[0].hypot(d[1]) > 30.0).cloned().collect();
    let mut lrf_inner: AxialLrf = prototype.clone();
    let mut lrf_outer: AxialLrf = prototype.clone();
    lrf_inner.add_data(&inner).expect("accumulates");
    lrf_outer.add_data(&outer).expect("accumulates");
    assert_eq!(lrf_inner.get_ratio(&lrf_outer), -1.0);

    // Different binning
    let mut lrf_other_binning: AxialLrf = AxialLrf::new(40.0, 9).expect("valid lrf");
    lrf_other_binning.add_data(&data).expect("accumulates");
    assert_eq!(lrf_a.get_ratio(&lrf_other_binning), -1.0);
}

#[test]
fn test_axial_json_round_trip() {
    use crate::compress::DualSlopeCompress;
    use crate::lrf::lrf_from_json;

    let data: Vec<LrfData> = radial_samples(2.0, -1.0, 30.0, |r: f64| 60.0 * (-r * r / 200.0).exp());
    let mut lrf: AxialLrf = AxialLrf::new(30.0, 6).expect("valid lrf");
    lrf.set_origin(2.0, -1.0).expect("valid origin");
    lrf.set_compression(Some(Box::new(DualSlopeCompress::new(4.0, 8.0, 2.0).expect("valid compression"))))
        .expect("valid compression");
    lrf.fit_data(&data).expect("fit succeeds");

    let json: Value = lrf.to_json();
    assert_eq!(json["type"], "Axial");
    assert_eq!(json["compression"]["method"], "dualslope");

    let restored: Box<dyn Lrf> = lrf_from_json(&json).expect("valid json");
    assert!(restored.is_valid());
    assert_eq!(restored.to_json(), json);
    for i_x in 0..30 {
        let x: f64 = -25.0 + 2.0 * i_x as f64;
        let y: f64 = 0.3 * x;
        assert_eq!(restored.eval(x, y, 0.0), lrf.eval(x, y, 0.0));
        assert_eq!(restored.eval_drv_y(x, y, 0.0), lrf.eval_drv_y(x, y, 0.0));
    }

    // Fields added later default to zero
    let legacy: Value = serde_json::json!({
        "type": "Axial",
        "rmax": 30.0,
        "response": {"bspline3": {"xmin": 0.0, "xmax": 30.0, "intervals": 1, "data": [1.0, 1.0, 1.0, 1.0]}}
    });
    let legacy_lrf: Box<dyn Lrf> = lrf_from_json(&legacy).expect("valid json");
    assert!(legacy_lrf.in_domain(1.0, 1.0, 0.0));
    assert_eq!(legacy_lrf.get_xmin(), -30.0);

    let mut missing_rmax: Value = json.clone();
    missing_rmax.as_object_mut().expect("object").remove("rmax");
    assert!(lrf_from_json(&missing_rmax).is_err());

    let mut inverted: Value = json.clone();
    inverted["rmin"] = Value::from(40.0);
    assert!(lrf_from_json(&inverted).is_err());

    let mut no_response: Value = json.clone();
    no_response.as_object_mut().expect("object").remove("response");
    assert!(lrf_from_json(&no_response).is_err());
}

#[test]
fn test_axial_failed_fit_keeps_previous_response() {
    let profile = |r: f64| 80.0 / (1.0 + (r / 10.0).powi(2));
    let data: Vec<LrfData> = radial_samples(0.0, 0.0, 40.0, profile);

    let mut lrf: AxialLrf = AxialLrf::new(40.0, 16).expect("valid lrf");
    lrf.fit_data(&data).expect("fit succeeds");
    assert!(lrf.is_valid());
    let before: f64 = lrf.eval(5.0, 0.0, 0.0);

    // Every sample beyond rmax
    let outside: Vec<LrfData> = radial_samples(0.0, 0.0, 40.0, profile)
        .iter()
        .map(|d| [d[0] + 100.0, d[1], d[2], d[3]])
        .collect();
    assert!(lrf.fit_data(&outside).is_err());
    assert!(!lrf.is_valid());
    assert!(lrf.is_ready());
    assert_eq!(lrf.eval(5.0, 0.0, 0.0), before);
}
