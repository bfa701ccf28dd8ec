use crate::errors::Error;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Least squares with non-negativity bounds on a subset of the parameters
///
/// Minimises `0.5 * p^T G p - b^T p` subject to `p[i] >= 0` for every `i` with `bounded[i] == true`,
/// which is the normal-equations form of `min |M p - y|^2` with `G = M^T M` and `b = M^T y`.
///
/// The algorithm is the Lawson-Hanson active set method. Unbounded parameters are kept in the
/// passive set from the start.
///
/// # Arguments
/// - `gram`: the normal matrix `G`, shape = [n_par, n_par]
/// - `rhs`: the right hand side `b`, shape = [n_par]
/// - `bounded`: which parameters are constrained to be non-negative
///
/// # Returns
/// The constrained least squares solution
///
pub fn bounded_least_squares(gram: &DMatrix<f64>, rhs: &DVector<f64>, bounded: &[bool]) -> Result<DVector<f64>, Error> {
    let n_par: usize = rhs.len();

    // Small ridge, so that parameters without any data support are pinned to zero
    let max_diagonal: f64 = gram.diagonal().amax();
    let ridge: f64 = (max_diagonal * 1.0e-12).max(1.0e-300);
    let mut gram_regularised: DMatrix<f64> = gram.clone();
    for i_par in 0..n_par {
        gram_regularised[(i_par, i_par)] += ridge;
    }

    let mut passive: Vec<bool> = bounded.iter().map(|is_bounded: &bool| !is_bounded).collect();
    let mut solution: DVector<f64> = DVector::zeros(n_par);
    if passive.iter().any(|is_passive: &bool| *is_passive) {
        solution = solve_passive(&gram_regularised, rhs, &passive)?;
    }

    // Nothing to constrain, the unconstrained solution is the answer
    if !bounded.iter().any(|is_bounded: &bool| *is_bounded) {
        return Ok(solution);
    }

    let tolerance: f64 = 1.0e-11 * rhs.amax().max(1.0e-300);
    let max_iterations: usize = 3 * n_par + 10;
    let mut converged: bool = false;

    for _i_iteration in 0..max_iterations {
        // Gradient of the negative objective
        let gradient: DVector<f64> = rhs - &gram_regularised * &solution;

        // Bounded parameter, currently held at zero, which would most decrease the objective
        let mut i_best: Option<usize> = None;
        let mut best_gradient: f64 = tolerance;
        for i_par in 0..n_par {
            if bounded[i_par] && !passive[i_par] && gradient[i_par] > best_gradient {
                best_gradient = gradient[i_par];
                i_best = Some(i_par);
            }
        }
        let i_best: usize = match i_best {
            Some(i_par) => i_par,
            None => {
                converged = true;
                break;
            }
        };
        passive[i_best] = true;

        // Inner loop: step back towards feasibility until the passive solution is positive
        for _i_inner in 0..=n_par {
            let trial: DVector<f64> = solve_passive(&gram_regularised, rhs, &passive)?;

            let mut alpha: f64 = f64::INFINITY;
            for i_par in 0..n_par {
                if bounded[i_par] && passive[i_par] && trial[i_par] <= 0.0 {
                    let denominator: f64 = solution[i_par] - trial[i_par];
                    let alpha_this: f64 = if denominator > 0.0 { solution[i_par] / denominator } else { 0.0 };
                    alpha = alpha.min(alpha_this);
                }
            }

            if alpha.is_infinite() {
                solution = trial;
                break;
            }

            solution = &solution + (&trial - &solution) * alpha;
            for i_par in 0..n_par {
                if bounded[i_par] && passive[i_par] && solution[i_par] <= tolerance.min(1.0e-14) {
                    passive[i_par] = false;
                    solution[i_par] = 0.0;
                }
            }
        }
    }

    if !converged {
        debug!("bounded_least_squares: active set did not settle after {} iterations, using last feasible point", max_iterations);
    }

    return Ok(solution);
}

/// Solve the normal equations restricted to the passive parameters, all others are zero
fn solve_passive(gram: &DMatrix<f64>, rhs: &DVector<f64>, passive: &[bool]) -> Result<DVector<f64>, Error> {
    let n_par: usize = rhs.len();
    let indices: Vec<usize> = (0..n_par).filter(|i_par: &usize| passive[*i_par]).collect();
    let n_passive: usize = indices.len();

    let mut solution: DVector<f64> = DVector::zeros(n_par);
    if n_passive == 0 {
        return Ok(solution);
    }

    let gram_passive: DMatrix<f64> = DMatrix::from_fn(n_passive, n_passive, |i_row: usize, i_col: usize| gram[(indices[i_row], indices[i_col])]);
    let rhs_passive: DVector<f64> = DVector::from_fn(n_passive, |i_row: usize, _| rhs[indices[i_row]]);

    let solution_passive: DVector<f64> = match gram_passive.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs_passive),
        None => gram_passive.lu().solve(&rhs_passive).ok_or(Error::SingularSystem)?,
    };

    if solution_passive.iter().any(|value: &f64| !value.is_finite()) {
        return Err(Error::SingularSystem);
    }

    for (i_passive, i_par) in indices.iter().enumerate() {
        solution[*i_par] = solution_passive[i_passive];
    }

    return Ok(solution);
}

#[test]
fn test_bounded_least_squares_unconstrained() {
    use approx::assert_abs_diff_eq;

    // G = diag(2, 4), b = (2, -4)  =>  p = (1, -1)
    let gram: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
    let rhs: DVector<f64> = DVector::from_vec(vec![2.0, -4.0]);
    let solution: DVector<f64> = bounded_least_squares(&gram, &rhs, &[false, false]).expect("solvable");

    let precision: f64 = 1e-9;
    assert_abs_diff_eq!(solution[0], 1.0, epsilon = precision);
    assert_abs_diff_eq!(solution[1], -1.0, epsilon = precision);
}

#[test]
fn test_bounded_least_squares_clips_negative() {
    use approx::assert_abs_diff_eq;

    // Same problem, second parameter bounded: it sits on the bound
    let gram: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
    let rhs: DVector<f64> = DVector::from_vec(vec![2.0, -4.0]);
    let solution: DVector<f64> = bounded_least_squares(&gram, &rhs, &[true, true]).expect("solvable");

    let precision: f64 = 1e-9;
    assert_abs_diff_eq!(solution[0], 1.0, epsilon = precision);
    assert_abs_diff_eq!(solution[1], 0.0, epsilon = precision);
}

#[test]
fn test_bounded_least_squares_coupled() {
    use approx::assert_abs_diff_eq;

    // Fit y = p0 * 1 + p1 * x to points on y = 2 - x with p1 >= 0: the best bounded fit is a constant at the mean
    let x: Vec<f64> = vec![0.0, 1.0, 2.0, 3.0];
    let y: Vec<f64> = x.iter().map(|x: &f64| 2.0 - x).collect();
    let design: DMatrix<f64> = DMatrix::from_fn(4, 2, |i_row: usize, i_col: usize| if i_col == 0 { 1.0 } else { x[i_row] });
    let gram: DMatrix<f64> = design.transpose() * &design;
    let rhs: DVector<f64> = design.transpose() * DVector::from_vec(y.clone());

    let solution: DVector<f64> = bounded_least_squares(&gram, &rhs, &[false, true]).expect("solvable");

    let precision: f64 = 1e-9;
    assert_abs_diff_eq!(solution[1], 0.0, epsilon = precision);
    assert_abs_diff_eq!(solution[0], 0.5, epsilon = precision);
}
