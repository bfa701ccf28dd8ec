use crate::dim_1::bounded_lsq::bounded_least_squares;
use crate::dim_1::bspline::Bspline1d;
use crate::dim_1::profile_hist::ProfileHist1d;
use crate::errors::Error;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Shape constraints applied when fitting a `Bspline1d`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FitConstraints {
    pub non_negative: bool,
    pub non_increasing: bool,
    /// Fixed first derivative at the left edge of the range
    pub fix_drv_left: Option<f64>,
}

impl FitConstraints {
    pub fn is_constrained(&self) -> bool {
        return self.non_negative || self.non_increasing || self.fix_drv_left.is_some();
    }
}

/// Linear map from free fit parameters to spline coefficients: `c = transform * p + offset`
struct Parametrisation {
    transform: DMatrix<f64>, // shape = [n_basis, n_par]
    offset: DVector<f64>,    // shape = [n_basis]
    bounded: Vec<bool>,      // shape = [n_par]
}

/// Least squares fit of a uniform cubic B-spline
///
/// Data can be fitted directly (`fit`), or accumulated into a profile histogram
/// over several calls (`add_data`) and fitted later (`binned_fit`).
/// The histogram uses `BINS_PER_INTERVAL` bins per spline interval.
#[derive(Debug, Clone)]
pub struct BsFit1d {
    x_min: f64,
    x_max: f64,
    n_intervals: usize,
    constraints: FitConstraints,
    hist: ProfileHist1d,
    coefficients: Option<Vec<f64>>,
}

impl BsFit1d {
    pub const BINS_PER_INTERVAL: usize = 8;

    /// Create a fitter with the same range and number of intervals as `spline`
    pub fn new(spline: &Bspline1d) -> Result<Self, Error> {
        return BsFit1d::with_constraints(spline, FitConstraints::default());
    }

    pub fn with_constraints(spline: &Bspline1d, constraints: FitConstraints) -> Result<Self, Error> {
        let n_intervals: usize = spline.get_nint();
        let hist: ProfileHist1d = ProfileHist1d::new(spline.get_xmin(), spline.get_xmax(), n_intervals * BsFit1d::BINS_PER_INTERVAL)?;

        return Ok(BsFit1d {
            x_min: spline.get_xmin(),
            x_max: spline.get_xmax(),
            n_intervals,
            constraints,
            hist,
            coefficients: None,
        });
    }

    pub fn force_non_negative(&mut self) {
        self.constraints.non_negative = true;
    }

    pub fn force_non_increasing(&mut self) {
        self.constraints.non_increasing = true;
    }

    pub fn fix_drv_left(&mut self, value: f64) {
        self.constraints.fix_drv_left = Some(value);
    }

    pub fn get_constraints(&self) -> FitConstraints {
        return self.constraints;
    }

    pub fn add_data(&mut self, x: f64, y: f64) {
        self.hist.fill(x, y);
    }

    pub fn add_data_vec(&mut self, x: &[f64], y: &[f64]) -> Result<(), Error> {
        if x.len() != y.len() {
            return Err(Error::XAndYLengthMismatch { x_len: x.len(), y_len: y.len() });
        }
        for i_point in 0..x.len() {
            self.hist.fill(x[i_point], y[i_point]);
        }
        return Ok(());
    }

    pub fn get_hist(&self) -> &ProfileHist1d {
        return &self.hist;
    }

    /// Drop the accumulated data and any previous fit result
    pub fn clear(&mut self) {
        self.hist.clear();
        self.coefficients = None;
    }

    /// Fit the bin means of the accumulated histogram, weighted by the bin entries
    pub fn binned_fit(&mut self) -> Result<(), Error> {
        let n_bins: usize = self.hist.get_bins_total();
        let mut x: Vec<f64> = Vec::with_capacity(n_bins);
        let mut y: Vec<f64> = Vec::with_capacity(n_bins);
        let mut weights: Vec<f64> = Vec::with_capacity(n_bins);
        for i_bin in 0..n_bins {
            let entries: usize = self.hist.get_flat_bin_entries(i_bin);
            if entries == 0 {
                continue;
            }
            x.push(self.hist.get_flat_bin_x_mean(i_bin));
            y.push(self.hist.get_flat_bin_mean(i_bin));
            weights.push(entries as f64);
        }

        let coefficients: Vec<f64> = self.solve(&x, &y, &weights)?;
        self.coefficients = Some(coefficients);
        return Ok(());
    }

    /// Fit individual samples
    pub fn fit(&mut self, x: &[f64], y: &[f64]) -> Result<(), Error> {
        if x.len() != y.len() {
            return Err(Error::XAndYLengthMismatch { x_len: x.len(), y_len: y.len() });
        }
        let weights: Vec<f64> = vec![1.0; x.len()];

        let coefficients: Vec<f64> = self.solve(x, y, &weights)?;
        self.coefficients = Some(coefficients);
        return Ok(());
    }

    /// A new spline holding the result of the last successful fit
    pub fn make_spline(&self) -> Option<Bspline1d> {
        let coefficients: Vec<f64> = self.coefficients.clone()?;
        return Bspline1d::with_coefficients(self.x_min, self.x_max, self.n_intervals, coefficients).ok();
    }

    fn scaffold(&self) -> Result<Bspline1d, Error> {
        return Bspline1d::new(self.x_min, self.x_max, self.n_intervals);
    }

    fn parametrisation(&self) -> Parametrisation {
        let n_basis: usize = self.n_intervals + 3;
        let h: f64 = (self.x_max - self.x_min) / self.n_intervals as f64;
        let mut offset: DVector<f64> = DVector::zeros(n_basis);

        if self.constraints.non_increasing {
            // c_k = c_last + sum_{j >= k} d_j, with d_j >= 0
            let mut columns: Vec<DVector<f64>> = Vec::with_capacity(n_basis);
            let mut bounded: Vec<bool> = Vec::with_capacity(n_basis);

            // Left derivative is (c_2 - c_0) / (2 h) = -(d_0 + d_1) / (2 h)
            let skip_first_two: bool = self.constraints.fix_drv_left.is_some();
            if let Some(drv_left) = self.constraints.fix_drv_left {
                let drop: f64 = (-2.0 * h * drv_left).max(0.0);
                if drv_left > 0.0 {
                    debug!("BsFit1d: positive left derivative is incompatible with non-increasing shape, using 0");
                }
                offset[0] = drop;
            }

            for j_step in 0..n_basis - 1 {
                if skip_first_two && j_step < 2 {
                    continue;
                }
                let column: DVector<f64> = DVector::from_fn(n_basis, |i_basis: usize, _| if i_basis <= j_step { 1.0 } else { 0.0 });
                columns.push(column);
                bounded.push(true);
            }
            columns.push(DVector::from_element(n_basis, 1.0));
            bounded.push(self.constraints.non_negative);

            return Parametrisation {
                transform: DMatrix::from_columns(&columns),
                offset,
                bounded,
            };
        }

        let mut transform: DMatrix<f64> = DMatrix::identity(n_basis, n_basis);
        if let Some(drv_left) = self.constraints.fix_drv_left {
            // c_0 = c_2 - 2 h drv_left
            transform = transform.remove_column(0);
            transform[(0, 1)] = 1.0; // column 1 is now c_2
            offset[0] = -2.0 * h * drv_left;
        }
        let n_par: usize = transform.ncols();

        return Parametrisation {
            transform,
            offset,
            bounded: vec![self.constraints.non_negative; n_par],
        };
    }

    fn solve(&self, x: &[f64], y: &[f64], weights: &[f64]) -> Result<Vec<f64>, Error> {
        let scaffold: Bspline1d = self.scaffold()?;
        let parametrisation: Parametrisation = self.parametrisation();
        let n_par: usize = parametrisation.transform.ncols();

        let mut gram: DMatrix<f64> = DMatrix::zeros(n_par, n_par);
        let mut rhs: DVector<f64> = DVector::zeros(n_par);
        let mut n_used: usize = 0;

        for i_point in 0..x.len() {
            if !y[i_point].is_finite() {
                continue;
            }
            let (i_first, values) = match scaffold.basis_functions(x[i_point]) {
                Some(basis) => basis,
                None => continue,
            };

            // Row of the design matrix in parameter space, and the target corrected for the fixed offset
            let mut row: DVector<f64> = DVector::zeros(n_par);
            let mut target: f64 = y[i_point];
            for k in 0..4 {
                row += parametrisation.transform.row(i_first + k).transpose() * values[k];
                target -= parametrisation.offset[i_first + k] * values[k];
            }

            gram += &row * row.transpose() * weights[i_point];
            rhs += &row * (target * weights[i_point]);
            n_used += 1;
        }

        if n_used == 0 {
            return Err(Error::NoData);
        }

        let parameters: DVector<f64> = bounded_least_squares(&gram, &rhs, &parametrisation.bounded)?;
        let coefficients: DVector<f64> = &parametrisation.transform * parameters + &parametrisation.offset;

        if coefficients.iter().any(|value: &f64| !value.is_finite()) {
            return Err(Error::SingularSystem);
        }

        return Ok(coefficients.iter().copied().collect());
    }
}

#[test]
fn test_fit_recovers_smooth_function() {
    use approx::assert_abs_diff_eq;

    // A gaussian is well inside the space spanned by 20 cubic intervals over 3 sigma
    let spline: Bspline1d = Bspline1d::new(0.0, 30.0, 20).expect("valid spline");
    let mut fitter: BsFit1d = BsFit1d::new(&spline).expect("valid fitter");
    let x: Vec<f64> = (0..=600).map(|i_x: usize| 30.0 * i_x as f64 / 600.0).collect();
    let y: Vec<f64> = x.iter().map(|x: &f64| 100.0 * (-x * x / (2.0 * 10.0 * 10.0)).exp()).collect();

    fitter.fit(&x, &y).expect("fit should succeed");
    let fitted: Bspline1d = fitter.make_spline().expect("spline after fit");

    let precision: f64 = 0.05;
    for i_x in 0..x.len() {
        assert_abs_diff_eq!(fitted.eval(x[i_x]), y[i_x], epsilon = precision);
    }
}

#[test]
fn test_binned_fit_with_constraints() {
    // Noisy, decreasing data with a flat top: constrained fit must respect the shape exactly
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let spline: Bspline1d = Bspline1d::new(0.0, 20.0, 10).expect("valid spline");
    let constraints: FitConstraints = FitConstraints {
        non_negative: true,
        non_increasing: true,
        fix_drv_left: Some(0.0),
    };
    let mut fitter: BsFit1d = BsFit1d::with_constraints(&spline, constraints).expect("valid fitter");

    let mut rng: StdRng = StdRng::seed_from_u64(12345);
    for _i_sample in 0..20000 {
        let x: f64 = rng.random_range(0.0..20.0);
        let y: f64 = 50.0 / (1.0 + (x / 6.0).powi(2)) + rng.random_range(-5.0..5.0);
        fitter.add_data(x, y);
    }

    fitter.binned_fit().expect("fit should succeed");
    let fitted: Bspline1d = fitter.make_spline().expect("spline after fit");
    let coefficients: &[f64] = fitted.coefficients().expect("coefficients");

    for i_coef in 1..coefficients.len() {
        assert!(coefficients[i_coef] <= coefficients[i_coef - 1] + 1e-9, "coefficients must be non-increasing");
    }
    assert!(coefficients.iter().all(|c: &f64| *c >= -1e-9), "coefficients must be non-negative");
    assert!(fitted.eval_drv(0.0).abs() < 1e-9, "flat top");
    assert!((fitted.eval(0.0) - 50.0).abs() < 2.0);
    assert!((fitted.eval(6.0) - 25.0).abs() < 2.0);
}

#[test]
fn test_fit_is_repeatable_and_fails_without_data() {
    let spline: Bspline1d = Bspline1d::new(0.0, 10.0, 5).expect("valid spline");
    let mut fitter: BsFit1d = BsFit1d::new(&spline).expect("valid fitter");
    assert_eq!(fitter.binned_fit(), Err(Error::NoData));
    assert!(fitter.make_spline().is_none());

    let x: Vec<f64> = (0..100).map(|i_x: usize| i_x as f64 * 0.1).collect();
    let y: Vec<f64> = x.iter().map(|x: &f64| (x * 0.5).sin()).collect();
    fitter.add_data_vec(&x, &y).expect("same length");
    fitter.binned_fit().expect("fit should succeed");
    let first: Bspline1d = fitter.make_spline().expect("spline after fit");
    fitter.binned_fit().expect("fit should succeed");
    let second: Bspline1d = fitter.make_spline().expect("spline after fit");
    assert_eq!(first, second);

    assert!(fitter.add_data_vec(&x, &y[0..10]).is_err());
}
