use crate::compress::Compress1d;
use crate::errors::LrfError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct DualSlopeCompressJson {
    r0: f64,
    k: f64,
    lam: f64,
}

/// Dual-slope compression
///
/// `rho(r) = max(0, b + a (r - r0) - sqrt((r - r0)^2 + lam^2))`
///
/// Far below `r0` the curve has slope `a + 1`, far above it slope `a - 1`, so the ratio of the
/// two slopes is `k` and large radii are compressed. `lam` sets how smoothly the slope changes around `r0`.
#[derive(Debug, Clone, PartialEq)]
pub struct DualSlopeCompress {
    k: f64,
    r0: f64,
    lam: f64,
    a: f64,
    b: f64,
    lam2: f64,
}

impl DualSlopeCompress {
    /// # Arguments
    /// - `k`: ratio of the inner to the outer slope, must be > 1
    /// - `r0`: radius of the transition between the slopes, must be >= 0
    /// - `lam`: width of the transition
    ///
    pub fn new(k: f64, r0: f64, lam: f64) -> Result<Self, LrfError> {
        if !(r0 >= 0.0) || !(k > 1.0) {
            return Err(LrfError::InvalidCompression { k, r0 });
        }

        let a: f64 = (k + 1.0) / (k - 1.0);
        let lam2: f64 = lam * lam;
        let b: f64 = (r0 * r0 + lam2).sqrt() + a * r0;

        return Ok(DualSlopeCompress { k, r0, lam, a, b, lam2 });
    }

    pub fn get_k(&self) -> f64 {
        return self.k;
    }

    pub fn get_r0(&self) -> f64 {
        return self.r0;
    }

    pub fn get_lam(&self) -> f64 {
        return self.lam;
    }
}

impl Compress1d for DualSlopeCompress {
    fn clone_box(&self) -> Box<dyn Compress1d> {
        return Box::new(self.clone());
    }

    fn rho(&self, r: f64) -> f64 {
        let dr: f64 = r - self.r0;
        return (self.b + dr * self.a - (dr * dr + self.lam2).sqrt()).max(0.0);
    }

    fn rho_drv(&self, r: f64) -> f64 {
        let dr: f64 = r - self.r0;
        let norm: f64 = (dr * dr + self.lam2).sqrt();
        // With lam == 0 the curve has a kink at r0, use the mean of the one-sided slopes there
        if norm == 0.0 {
            return self.a;
        }
        return self.a - dr / norm;
    }

    fn to_json(&self) -> Value {
        return serde_json::json!({
            "method": "dualslope",
            "r0": self.r0,
            "k": self.k,
            "lam": self.lam,
        });
    }
}

pub(crate) fn dual_slope_from_json(json: &Value) -> Option<Box<dyn Compress1d>> {
    let parsed: DualSlopeCompressJson = serde_json::from_value(json.clone()).ok()?;
    let compress: DualSlopeCompress = DualSlopeCompress::new(parsed.k, parsed.r0, parsed.lam).ok()?;
    return Some(Box::new(compress));
}

#[test]
fn test_dual_slope_derivative_matches_finite_difference() {
    use approx::assert_abs_diff_eq;

    let parameter_sets: Vec<(f64, f64, f64)> = vec![(10.0, 7.0, 4.0), (2.0, 0.0, 1.0), (3.5, 12.0, 0.5), (1.5, 3.0, 10.0)];
    let d_r: f64 = 1e-6;
    let precision: f64 = 1e-6;

    for (k, r0, lam) in parameter_sets {
        let compress: DualSlopeCompress = DualSlopeCompress::new(k, r0, lam).expect("valid parameters");
        for i_r in 0..200 {
            let r: f64 = 0.173 * i_r as f64;
            // Skip the region where rho is clipped at zero
            if compress.rho(r - d_r) <= 0.0 {
                continue;
            }
            let finite_difference: f64 = (compress.rho(r + d_r) - compress.rho(r - d_r)) / (2.0 * d_r);
            assert_abs_diff_eq!(compress.rho_drv(r), finite_difference, epsilon = precision);
        }
    }
}

#[test]
fn test_dual_slope_values() {
    use approx::assert_abs_diff_eq;

    let compress: DualSlopeCompress = DualSlopeCompress::new(10.0, 7.0, 4.0).expect("valid parameters");
    let a: f64 = 11.0 / 9.0;
    let b: f64 = (49.0f64 + 16.0).sqrt() + a * 7.0;

    let precision: f64 = 1e-12;
    // At r0 the square root term is just lam
    assert_abs_diff_eq!(compress.rho(7.0), b - 4.0, epsilon = precision);
    // Origin maps to zero
    assert_abs_diff_eq!(compress.rho(0.0), 0.0, epsilon = precision);
    // Asymptotic slopes are a + 1 and a - 1, with ratio k
    assert_abs_diff_eq!(compress.rho_drv(-1.0e7), a + 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(compress.rho_drv(1.0e7), a - 1.0, epsilon = 1e-6);

    for i_r in 0..500 {
        let r: f64 = -20.0 + 0.2 * i_r as f64;
        assert!(compress.rho(r) >= 0.0);
    }
}

#[test]
fn test_dual_slope_sharp_transition() {
    use approx::assert_abs_diff_eq;

    // lam = 0: rho(r0) = b exactly, and the derivative at the kink is the mean slope a
    // k = 3  =>  a = 2, b = r0 + a r0 = 15
    let compress: DualSlopeCompress = DualSlopeCompress::new(3.0, 5.0, 0.0).expect("valid parameters");
    let precision: f64 = 1e-12;
    assert_abs_diff_eq!(compress.rho(5.0), 15.0, epsilon = precision);
    assert_abs_diff_eq!(compress.rho_drv(5.0), 2.0, epsilon = precision);
    assert_abs_diff_eq!(compress.rho_drv(4.0), 3.0, epsilon = precision);
    assert_abs_diff_eq!(compress.rho_drv(6.0), 1.0, epsilon = precision);

    // rho is non-decreasing above r0
    let mut previous: f64 = compress.rho(5.0);
    for i_r in 1..100 {
        let value: f64 = compress.rho(5.0 + 0.5 * i_r as f64);
        assert!(value >= previous);
        previous = value;
    }
}

#[test]
fn test_dual_slope_invalid() {
    assert!(DualSlopeCompress::new(1.0, 7.0, 4.0).is_err());
    assert!(DualSlopeCompress::new(0.5, 7.0, 4.0).is_err());
    assert!(DualSlopeCompress::new(10.0, -0.1, 4.0).is_err());
    assert!(DualSlopeCompress::new(f64::NAN, 1.0, 4.0).is_err());
}
