use crate::errors::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialised form of a `Bspline1d`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Bspline1dJson {
    xmin: f64,
    xmax: f64,
    intervals: usize,
    #[serde(default)]
    data: Vec<f64>,
}

/// Uniform cubic B-spline on `[x_min, x_max]`
///
/// The range is split into `n_intervals` equal intervals, which gives `n_intervals + 3`
/// basis functions. The spline is "ready" once its coefficients have been set, typically
/// by `BsFit1d::make_spline`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bspline1d {
    x_min: f64,
    x_max: f64,
    n_intervals: usize,
    h: f64,
    coefficients: Option<Vec<f64>>,
}

impl Bspline1d {
    /// Create an empty spline scaffold
    ///
    /// # Arguments
    /// - `x_min`: lower edge of the spline range
    /// - `x_max`: upper edge of the spline range, must be larger than `x_min`
    /// - `n_intervals`: number of uniform intervals, at least 1
    ///
    /// # Returns
    /// A spline without coefficients, `is_ready()` is false until coefficients are set
    ///
    pub fn new(x_min: f64, x_max: f64, n_intervals: usize) -> Result<Self, Error> {
        if !(x_max > x_min) || !x_min.is_finite() || !x_max.is_finite() {
            return Err(Error::InvalidRange { x_min, x_max });
        }
        if n_intervals < 1 {
            return Err(Error::InvalidIntervals { n_intervals });
        }

        let h: f64 = (x_max - x_min) / n_intervals as f64;

        return Ok(Bspline1d {
            x_min,
            x_max,
            n_intervals,
            h,
            coefficients: None,
        });
    }

    /// Create a spline with known coefficients
    pub fn with_coefficients(x_min: f64, x_max: f64, n_intervals: usize, coefficients: Vec<f64>) -> Result<Self, Error> {
        let mut spline: Bspline1d = Bspline1d::new(x_min, x_max, n_intervals)?;
        spline.set_coefficients(coefficients)?;
        return Ok(spline);
    }

    pub fn set_coefficients(&mut self, coefficients: Vec<f64>) -> Result<(), Error> {
        let n_basis: usize = self.get_n_basis();
        if coefficients.len() != n_basis {
            return Err(Error::CoefficientCount {
                expected: n_basis,
                found: coefficients.len(),
            });
        }
        self.coefficients = Some(coefficients);
        return Ok(());
    }

    pub fn is_ready(&self) -> bool {
        return self.coefficients.is_some();
    }

    pub fn get_nint(&self) -> usize {
        return self.n_intervals;
    }

    pub fn get_n_basis(&self) -> usize {
        return self.n_intervals + 3;
    }

    pub fn get_xmin(&self) -> f64 {
        return self.x_min;
    }

    pub fn get_xmax(&self) -> f64 {
        return self.x_max;
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        return self.coefficients.as_deref();
    }

    /// Locate `x` on the knot grid
    ///
    /// # Returns
    /// `(i_interval, t)` with `t` in [0.0, 1.0], or `None` when `x` is outside the range.
    /// The upper edge belongs to the last interval.
    fn locate(&self, x: f64) -> Option<(usize, f64)> {
        let edge_tolerance: f64 = 1.0e-12 * (self.x_max - self.x_min);
        if !(x >= self.x_min - edge_tolerance && x <= self.x_max + edge_tolerance) {
            return None;
        }

        let u: f64 = ((x - self.x_min) / self.h).max(0.0);
        let i_interval: usize = (u.floor() as usize).min(self.n_intervals - 1);
        let t: f64 = (u - i_interval as f64).clamp(0.0, 1.0);

        return Some((i_interval, t));
    }

    /// Values of the four basis functions that are non-zero at `x`
    ///
    /// # Returns
    /// `(i_first, values)`, where `values[k]` belongs to coefficient `i_first + k`
    pub fn basis_functions(&self, x: f64) -> Option<(usize, [f64; 4])> {
        let (i_interval, t) = self.locate(x)?;

        let one_minus_t: f64 = 1.0 - t;
        let t2: f64 = t * t;
        let t3: f64 = t2 * t;
        let values: [f64; 4] = [
            one_minus_t.powi(3) / 6.0,
            (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
            (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
            t3 / 6.0,
        ];

        return Some((i_interval, values));
    }

    /// First derivatives (with respect to `x`) of the four basis functions non-zero at `x`
    pub fn basis_derivatives(&self, x: f64) -> Option<(usize, [f64; 4])> {
        let (i_interval, t) = self.locate(x)?;

        let one_minus_t: f64 = 1.0 - t;
        let t2: f64 = t * t;
        let derivatives: [f64; 4] = [
            -0.5 * one_minus_t.powi(2) / self.h,
            (1.5 * t2 - 2.0 * t) / self.h,
            (-1.5 * t2 + t + 0.5) / self.h,
            0.5 * t2 / self.h,
        ];

        return Some((i_interval, derivatives));
    }

    /// Spline value, 0.0 outside the range or when not ready
    pub fn eval(&self, x: f64) -> f64 {
        let coefficients: &[f64] = match &self.coefficients {
            Some(coefficients) => coefficients,
            None => return 0.0,
        };
        let (i_first, values) = match self.basis_functions(x) {
            Some(basis) => basis,
            None => return 0.0,
        };

        let mut result: f64 = 0.0;
        for k in 0..4 {
            result += coefficients[i_first + k] * values[k];
        }

        return result;
    }

    /// Spline first derivative, 0.0 outside the range or when not ready
    pub fn eval_drv(&self, x: f64) -> f64 {
        let coefficients: &[f64] = match &self.coefficients {
            Some(coefficients) => coefficients,
            None => return 0.0,
        };
        let (i_first, derivatives) = match self.basis_derivatives(x) {
            Some(basis) => basis,
            None => return 0.0,
        };

        let mut result: f64 = 0.0;
        for k in 0..4 {
            result += coefficients[i_first + k] * derivatives[k];
        }

        return result;
    }

    /// `{xmin, xmax, intervals, data}`
    pub fn to_json(&self) -> Value {
        let json: Bspline1dJson = Bspline1dJson {
            xmin: self.x_min,
            xmax: self.x_max,
            intervals: self.n_intervals,
            data: self.coefficients.clone().unwrap_or_default(),
        };

        return serde_json::to_value(json).unwrap_or(Value::Null);
    }

    pub fn from_json(json: &Value) -> Result<Self, Error> {
        let parsed: Bspline1dJson = serde_json::from_value(json.clone()).map_err(|error| Error::Json(error.to_string()))?;

        let mut spline: Bspline1d = Bspline1d::new(parsed.xmin, parsed.xmax, parsed.intervals)?;
        if !parsed.data.is_empty() {
            spline.set_coefficients(parsed.data)?;
        }

        return Ok(spline);
    }
}

#[test]
fn test_bspline_partition_of_unity() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    // All coefficients equal to one reproduce a constant
    let n_intervals: usize = 7;
    let spline: Bspline1d = Bspline1d::with_coefficients(-1.5, 2.5, n_intervals, vec![1.0; n_intervals + 3]).expect("valid spline");

    let precision: f64 = 1e-12;
    for i_x in 0..=40 {
        let x: f64 = -1.5 + 4.0 * i_x as f64 / 40.0;
        assert_abs_diff_eq!(spline.eval(x), 1.0, epsilon = precision);
        assert_abs_diff_eq!(spline.eval_drv(x), 0.0, epsilon = precision);
    }
}

#[test]
fn test_bspline_reproduces_linear_function() {
    use approx::assert_abs_diff_eq;

    // Cubic B-splines reproduce straight lines when the coefficients sit on the
    // Greville abscissae, which for uniform knots are the knot positions shifted by one interval
    let x_min: f64 = 0.0;
    let x_max: f64 = 10.0;
    let n_intervals: usize = 5;
    let h: f64 = (x_max - x_min) / n_intervals as f64;
    let slope: f64 = -0.7;
    let offset: f64 = 3.0;

    let coefficients: Vec<f64> = (0..n_intervals + 3)
        .map(|i_basis: usize| {
            let greville_x: f64 = x_min + (i_basis as f64 - 1.0) * h;
            return offset + slope * greville_x;
        })
        .collect();
    let spline: Bspline1d = Bspline1d::with_coefficients(x_min, x_max, n_intervals, coefficients).expect("valid spline");

    let precision: f64 = 1e-10;
    for i_x in 0..=20 {
        let x: f64 = x_min + (x_max - x_min) * i_x as f64 / 20.0;
        assert_abs_diff_eq!(spline.eval(x), offset + slope * x, epsilon = precision);
        assert_abs_diff_eq!(spline.eval_drv(x), slope, epsilon = precision);
    }
}

#[test]
fn test_bspline_outside_range_and_not_ready() {
    let empty: Bspline1d = Bspline1d::new(0.0, 1.0, 4).expect("valid spline");
    assert!(!empty.is_ready());
    assert_eq!(empty.eval(0.5), 0.0);

    let spline: Bspline1d = Bspline1d::with_coefficients(0.0, 1.0, 4, vec![2.0; 7]).expect("valid spline");
    assert_eq!(spline.eval(-0.1), 0.0);
    assert_eq!(spline.eval(1.1), 0.0);
    assert!(spline.eval(1.0) > 1.99);

    assert!(Bspline1d::new(1.0, 1.0, 4).is_err());
    assert!(Bspline1d::new(0.0, 1.0, 0).is_err());
    assert!(Bspline1d::with_coefficients(0.0, 1.0, 4, vec![1.0; 6]).is_err());
}

#[test]
fn test_bspline_json() {
    let coefficients: Vec<f64> = vec![0.5, 1.25, -3.0, 4.0, 2.0, 0.125];
    let spline: Bspline1d = Bspline1d::with_coefficients(0.25, 9.75, 3, coefficients).expect("valid spline");

    let json: Value = spline.to_json();
    assert_eq!(json["intervals"], 3);

    let restored: Bspline1d = Bspline1d::from_json(&json).expect("spline json should parse");
    assert_eq!(restored, spline);

    let broken: Value = serde_json::json!({"xmin": 0.0, "xmax": 1.0, "intervals": 3, "data": [1.0, 2.0]});
    assert!(Bspline1d::from_json(&broken).is_err());
    let missing: Value = serde_json::json!({"xmin": 0.0, "intervals": 3});
    assert!(Bspline1d::from_json(&missing).is_err());
}
