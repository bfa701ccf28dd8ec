use log::debug;
use nalgebra::DMatrix;
use ndarray::Array2;

/// Status codes reported in `MinimizerResult::status`
pub const STATUS_CONVERGED: i32 = 0;
pub const STATUS_NOT_CONVERGED: i32 = 3;
pub const STATUS_CALL_LIMIT: i32 = 4;
pub const STATUS_FAILED: i32 = 5;

/// One free parameter handed to a minimizer
#[derive(Debug, Clone)]
pub struct MinParameter {
    pub name: String,
    pub value: f64,
    /// Initial step size, sets the scale of the first simplex
    pub step: f64,
    pub lower: Option<f64>,
}

impl MinParameter {
    pub fn new(name: &str, value: f64, step: f64) -> Self {
        return MinParameter {
            name: name.to_string(),
            value,
            step,
            lower: None,
        };
    }

    pub fn with_lower(name: &str, value: f64, step: f64, lower: f64) -> Self {
        return MinParameter {
            name: name.to_string(),
            value: value.max(lower),
            step,
            lower: Some(lower),
        };
    }
}

#[derive(Debug, Clone)]
pub struct MinimizerResult {
    pub converged: bool,
    pub status: i32,
    /// Best parameters found
    pub x: Vec<f64>,
    pub min_value: f64,
    /// Parameter covariance, `None` when the Hessian at the minimum is not positive definite
    pub covariance: Option<Array2<f64>>,
    pub n_calls: usize,
}

/// Anything able to minimise a scalar function of a few parameters
pub trait Minimizer: Send {
    fn minimize(&mut self, objective: &mut dyn FnMut(&[f64]) -> f64, params: &[MinParameter]) -> MinimizerResult;
}

/// Nelder-Mead downhill simplex
///
/// Lower bounds are honoured by projecting every trial point onto the allowed region.
/// After convergence the search is restarted once from the best vertex, and the covariance is taken
/// from a finite difference Hessian at the minimum.
#[derive(Debug, Clone)]
pub struct Simplex {
    pub max_function_calls: usize,
    pub max_iterations: usize,
    /// Convergence when the spread of function values over the simplex is below `0.002 * tolerance * error_def`
    pub tolerance: f64,
    /// Change of the objective which defines one standard deviation: 1 for chi2, 0.5 for a negative log likelihood
    pub error_def: f64,
}

impl Default for Simplex {
    fn default() -> Self {
        return Simplex {
            max_function_calls: 500,
            max_iterations: 1000,
            tolerance: 0.001,
            error_def: 1.0,
        };
    }
}

/// Outcome of one Nelder-Mead descent
enum DescentEnd {
    Converged,
    Collapsed,
    Limit,
}

/// Bookkeeping shared between the descent and the Hessian
struct Counted<'a> {
    objective: &'a mut dyn FnMut(&[f64]) -> f64,
    lower: Vec<Option<f64>>,
    n_calls: usize,
}

impl Counted<'_> {
    fn project(&self, x: &mut [f64]) {
        for (value, lower) in x.iter_mut().zip(self.lower.iter()) {
            if let Some(bound) = lower {
                if *value < *bound {
                    *value = *bound;
                }
            }
        }
    }

    /// Evaluate at the projection of `x`, NaN counts as +infinity
    fn eval(&mut self, x: &mut [f64]) -> f64 {
        self.project(x);
        self.n_calls += 1;
        let value: f64 = (self.objective)(x);
        if value.is_nan() {
            return f64::INFINITY;
        }
        return value;
    }
}

impl Simplex {
    pub fn new(max_function_calls: usize, max_iterations: usize, tolerance: f64, error_def: f64) -> Self {
        return Simplex {
            max_function_calls,
            max_iterations,
            tolerance,
            error_def,
        };
    }

    fn spread_threshold(&self) -> f64 {
        return 0.002 * self.tolerance * self.error_def;
    }

    /// One descent starting from `start`
    ///
    /// # Returns
    /// `(best_x, best_value, end, iterations)`
    fn descend(&self, counted: &mut Counted, start: &[f64], steps: &[f64]) -> (Vec<f64>, f64, DescentEnd, usize) {
        let n_par: usize = start.len();
        let threshold: f64 = self.spread_threshold();

        // Initial simplex: the start point plus one displaced vertex per parameter
        let mut vertices: Vec<Vec<f64>> = Vec::with_capacity(n_par + 1);
        let mut values: Vec<f64> = Vec::with_capacity(n_par + 1);
        let mut first: Vec<f64> = start.to_vec();
        values.push(counted.eval(&mut first));
        vertices.push(first);
        for i_par in 0..n_par {
            let mut vertex: Vec<f64> = start.to_vec();
            vertex[i_par] += steps[i_par];
            counted.project(&mut vertex);
            // Stepping into a bound would give a degenerate vertex
            if vertex[i_par] == start[i_par] {
                vertex[i_par] -= steps[i_par];
            }
            values.push(counted.eval(&mut vertex));
            vertices.push(vertex);
        }

        let mut order: Vec<usize> = (0..=n_par).collect();
        let mut n_iterations: usize = 0;
        let end: DescentEnd = loop {
            order.sort_by(|a: &usize, b: &usize| values[*a].total_cmp(&values[*b]));
            let i_best: usize = order[0];
            let i_worst: usize = order[n_par];
            let i_second_worst: usize = order[n_par.saturating_sub(1)];

            if values[i_worst] - values[i_best] < threshold {
                break DescentEnd::Converged;
            }
            if counted.n_calls >= self.max_function_calls || n_iterations >= self.max_iterations {
                break DescentEnd::Limit;
            }

            // Simplex shrunk to machine precision without reaching the threshold
            let mut diameter: f64 = 0.0;
            for vertex in vertices.iter() {
                for i_par in 0..n_par {
                    let scale: f64 = 1.0 + vertices[i_best][i_par].abs();
                    diameter = diameter.max((vertex[i_par] - vertices[i_best][i_par]).abs() / scale);
                }
            }
            if diameter < 1.0e-13 {
                break DescentEnd::Collapsed;
            }
            n_iterations += 1;

            // Centroid of every vertex except the worst
            let mut centroid: Vec<f64> = vec![0.0; n_par];
            for i_vertex in order.iter().take(n_par) {
                for i_par in 0..n_par {
                    centroid[i_par] += vertices[*i_vertex][i_par] / n_par as f64;
                }
            }
            let along = |coefficient: f64, from: &[f64]| -> Vec<f64> {
                return (0..n_par).map(|i_par| centroid[i_par] + coefficient * (from[i_par] - centroid[i_par])).collect();
            };

            let mut reflected: Vec<f64> = along(-1.0, &vertices[i_worst]);
            let value_reflected: f64 = counted.eval(&mut reflected);

            if value_reflected < values[i_best] {
                let mut expanded: Vec<f64> = along(2.0, &reflected);
                let value_expanded: f64 = counted.eval(&mut expanded);
                if value_expanded < value_reflected {
                    vertices[i_worst] = expanded;
                    values[i_worst] = value_expanded;
                } else {
                    vertices[i_worst] = reflected;
                    values[i_worst] = value_reflected;
                }
                continue;
            }
            if value_reflected < values[i_second_worst] {
                vertices[i_worst] = reflected;
                values[i_worst] = value_reflected;
                continue;
            }

            // Contraction, outside or inside the simplex
            let (mut contracted, accept_below): (Vec<f64>, f64) = if value_reflected < values[i_worst] {
                (along(0.5, &reflected), value_reflected)
            } else {
                (along(0.5, &vertices[i_worst]), values[i_worst])
            };
            let value_contracted: f64 = counted.eval(&mut contracted);
            if value_contracted < accept_below {
                vertices[i_worst] = contracted;
                values[i_worst] = value_contracted;
                continue;
            }

            // Shrink towards the best vertex
            let best: Vec<f64> = vertices[i_best].clone();
            for i_vertex in order.iter().skip(1) {
                let mut shrunk: Vec<f64> = (0..n_par)
                    .map(|i_par| best[i_par] + 0.5 * (vertices[*i_vertex][i_par] - best[i_par]))
                    .collect();
                values[*i_vertex] = counted.eval(&mut shrunk);
                vertices[*i_vertex] = shrunk;
            }
        };

        let i_best: usize = (0..=n_par)
            .min_by(|a: &usize, b: &usize| values[*a].total_cmp(&values[*b]))
            .unwrap_or(0);
        return (vertices[i_best].clone(), values[i_best], end, n_iterations);
    }

    /// Covariance `2 * error_def * H^-1` from a central difference Hessian at `x_min`
    fn covariance(&self, counted: &mut Counted, x_min: &[f64], value_min: f64, steps: &[f64]) -> Option<Array2<f64>> {
        let n_par: usize = x_min.len();

        // Difference steps, kept clear of the lower bounds
        let mut h: Vec<f64> = vec![0.0; n_par];
        for i_par in 0..n_par {
            let mut h_this: f64 = (0.01 * steps[i_par].abs()).max(1.0e-8 * (1.0 + x_min[i_par].abs()));
            if let Some(bound) = counted.lower[i_par] {
                let room: f64 = 0.5 * (x_min[i_par] - bound);
                if room <= 0.0 {
                    return None;
                }
                h_this = h_this.min(room);
            }
            h[i_par] = h_this;
        }

        let eval_at = |counted: &mut Counted, shifts: &[(usize, f64)]| -> f64 {
            let mut x: Vec<f64> = x_min.to_vec();
            for (i_par, shift) in shifts {
                x[*i_par] += shift;
            }
            return counted.eval(&mut x);
        };

        let mut hessian: DMatrix<f64> = DMatrix::zeros(n_par, n_par);
        for i_par in 0..n_par {
            let f_plus: f64 = eval_at(counted, &[(i_par, h[i_par])]);
            let f_minus: f64 = eval_at(counted, &[(i_par, -h[i_par])]);
            hessian[(i_par, i_par)] = (f_plus - 2.0 * value_min + f_minus) / (h[i_par] * h[i_par]);
            for j_par in 0..i_par {
                let f_pp: f64 = eval_at(counted, &[(i_par, h[i_par]), (j_par, h[j_par])]);
                let f_pm: f64 = eval_at(counted, &[(i_par, h[i_par]), (j_par, -h[j_par])]);
                let f_mp: f64 = eval_at(counted, &[(i_par, -h[i_par]), (j_par, h[j_par])]);
                let f_mm: f64 = eval_at(counted, &[(i_par, -h[i_par]), (j_par, -h[j_par])]);
                let mixed: f64 = (f_pp - f_pm - f_mp + f_mm) / (4.0 * h[i_par] * h[j_par]);
                hessian[(i_par, j_par)] = mixed;
                hessian[(j_par, i_par)] = mixed;
            }
        }

        if hessian.iter().any(|value: &f64| !value.is_finite()) {
            return None;
        }
        // Positive definite, otherwise the minimum is not a proper one
        hessian.clone().cholesky()?;
        let inverse: DMatrix<f64> = hessian.try_inverse()?;

        let scale: f64 = 2.0 * self.error_def;
        let covariance: Array2<f64> = Array2::from_shape_fn((n_par, n_par), |(i_row, i_col)| scale * inverse[(i_row, i_col)]);
        return Some(covariance);
    }
}

impl Minimizer for Simplex {
    fn minimize(&mut self, objective: &mut dyn FnMut(&[f64]) -> f64, params: &[MinParameter]) -> MinimizerResult {
        let mut counted: Counted = Counted {
            objective,
            lower: params.iter().map(|param: &MinParameter| param.lower).collect(),
            n_calls: 0,
        };
        let steps: Vec<f64> = params.iter().map(|param: &MinParameter| param.step).collect();
        let mut start: Vec<f64> = params.iter().map(|param: &MinParameter| param.value).collect();
        counted.project(&mut start);

        let (mut x_best, mut value_best, mut end, n_iterations_first): (Vec<f64>, f64, DescentEnd, usize) =
            self.descend(&mut counted, &start, &steps);

        // One restart from the best vertex with a smaller simplex
        if matches!(end, DescentEnd::Converged) && counted.n_calls < self.max_function_calls {
            let restart_from: Vec<f64> = x_best.clone();
            let restart_steps: Vec<f64> = steps.iter().map(|step: &f64| 0.1 * step).collect();
            let (x_restart, value_restart, end_restart, _n_iterations): (Vec<f64>, f64, DescentEnd, usize) =
                self.descend(&mut counted, &restart_from, &restart_steps);
            if value_restart <= value_best {
                x_best = x_restart;
                value_best = value_restart;
            }
            // Running out of calls during the restart leaves the first convergence standing
            if !matches!(end_restart, DescentEnd::Limit) {
                end = end_restart;
            }
        }

        let status: i32 = if !value_best.is_finite() {
            STATUS_FAILED
        } else {
            match end {
                DescentEnd::Converged => STATUS_CONVERGED,
                DescentEnd::Collapsed => STATUS_NOT_CONVERGED,
                DescentEnd::Limit => STATUS_CALL_LIMIT,
            }
        };
        let converged: bool = status == STATUS_CONVERGED;

        let covariance: Option<Array2<f64>> = if converged {
            self.covariance(&mut counted, &x_best, value_best, &steps)
        } else {
            None
        };

        debug!(
            "simplex: status={}, min={}, n_calls={}, first descent iterations={}",
            status, value_best, counted.n_calls, n_iterations_first
        );

        return MinimizerResult {
            converged,
            status,
            x: x_best,
            min_value: value_best,
            covariance,
            n_calls: counted.n_calls,
        };
    }
}

#[test]
fn test_simplex_quadratic() {
    use approx::assert_abs_diff_eq;

    // chi2 with known minimum and standard deviations
    let sigma: [f64; 3] = [0.5, 2.0, 1.0];
    let centre: [f64; 3] = [1.0, -2.0, 3.0];
    let mut objective = |x: &[f64]| -> f64 {
        let mut chi2: f64 = 0.0;
        for i_par in 0..3 {
            chi2 += ((x[i_par] - centre[i_par]) / sigma[i_par]).powi(2);
        }
        chi2
    };
    let params: Vec<MinParameter> = vec![
        MinParameter::new("x", 0.0, 1.0),
        MinParameter::new("y", 0.0, 1.0),
        MinParameter::new("z", 0.0, 1.0),
    ];

    let mut simplex: Simplex = Simplex::default();
    let result: MinimizerResult = simplex.minimize(&mut objective, &params);

    assert!(result.converged);
    assert_eq!(result.status, STATUS_CONVERGED);
    let precision: f64 = 0.01;
    for i_par in 0..3 {
        assert_abs_diff_eq!(result.x[i_par], centre[i_par], epsilon = precision * sigma[i_par]);
    }

    // For a chi2 the covariance is the diagonal of sigma^2
    let covariance: Array2<f64> = result.covariance.expect("positive definite");
    let precision: f64 = 1e-6;
    for i_par in 0..3 {
        assert_abs_diff_eq!(covariance[[i_par, i_par]], sigma[i_par] * sigma[i_par], epsilon = precision);
        for j_par in 0..3 {
            if i_par != j_par {
                assert_abs_diff_eq!(covariance[[i_par, j_par]], 0.0, epsilon = precision);
            }
        }
    }
}

#[test]
fn test_simplex_rosenbrock() {
    use approx::assert_abs_diff_eq;

    let mut objective = |x: &[f64]| -> f64 { (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2) };
    let params: Vec<MinParameter> = vec![MinParameter::new("a", -1.2, 0.5), MinParameter::new("b", 1.0, 0.5)];

    let mut simplex: Simplex = Simplex::new(5000, 5000, 0.001, 1.0);
    let result: MinimizerResult = simplex.minimize(&mut objective, &params);

    assert!(result.converged);
    let precision: f64 = 0.05;
    assert_abs_diff_eq!(result.x[0], 1.0, epsilon = precision);
    assert_abs_diff_eq!(result.x[1], 1.0, epsilon = precision);
}

#[test]
fn test_simplex_lower_bound() {
    use approx::assert_abs_diff_eq;

    // Unconstrained minimum at -1, bound at 0
    let mut objective = |x: &[f64]| -> f64 { (x[0] + 1.0).powi(2) + (x[1] - 2.0).powi(2) };
    let params: Vec<MinParameter> = vec![MinParameter::with_lower("a", 3.0, 1.0, 0.0), MinParameter::new("b", 0.0, 1.0)];

    let mut simplex: Simplex = Simplex::default();
    let result: MinimizerResult = simplex.minimize(&mut objective, &params);

    assert!(result.converged);
    let precision: f64 = 1e-3;
    assert!(result.x[0] >= 0.0);
    assert_abs_diff_eq!(result.x[0], 0.0, epsilon = precision);
    assert_abs_diff_eq!(result.x[1], 2.0, epsilon = precision);
}

#[test]
fn test_simplex_call_limit() {
    let mut objective = |x: &[f64]| -> f64 { (x[0] - 100.0).powi(2) + (x[1] + 50.0).powi(2) };
    let params: Vec<MinParameter> = vec![MinParameter::new("a", 0.0, 0.1), MinParameter::new("b", 0.0, 0.1)];

    let mut simplex: Simplex = Simplex::new(10, 1000, 0.001, 1.0);
    let result: MinimizerResult = simplex.minimize(&mut objective, &params);

    assert!(!result.converged);
    assert_eq!(result.status, STATUS_CALL_LIMIT);
    assert!(result.covariance.is_none());
}

#[test]
fn test_simplex_non_finite() {
    let mut objective = |_x: &[f64]| -> f64 { f64::NAN };
    let params: Vec<MinParameter> = vec![MinParameter::new("a", 0.0, 1.0)];

    let mut simplex: Simplex = Simplex::default();
    let result: MinimizerResult = simplex.minimize(&mut objective, &params);

    assert!(!result.converged);
    assert_eq!(result.status, STATUS_FAILED);
}
