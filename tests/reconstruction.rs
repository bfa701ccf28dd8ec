mod common;

use lrmodel_rs::{LrModel, RecMethod, RecResult, RecStatus, Reconstructor, ReconstructorConfig, reconstruct_events};
use ndarray::Array2;

#[test]
fn test_reconstruct_square_array() {
    use approx::assert_abs_diff_eq;

    let model: LrModel = common::fitted_square_array();
    let positions: [(f64, f64); 5] = [(1.3, -2.2), (-6.0, 4.5), (0.0, 0.0), (8.4, 8.4), (-3.3, -10.1)];
    let energy: f64 = 2.0;

    let mut signals: Array2<f64> = Array2::zeros((positions.len(), 64));
    for (i_event, (x, y)) in positions.iter().enumerate() {
        for id in 0..64 {
            signals[[i_event, id]] = model.eval(id, &[*x, *y, 0.0]).expect("valid") * energy;
        }
    }

    for method in [RecMethod::LeastSquares, RecMethod::MaxLikelihood] {
        let config: ReconstructorConfig = ReconstructorConfig {
            cog_rel_cutoff: 0.1,
            rec_cutoff_radius: 10.0,
            energy_calibration: 0.0015,
            method,
            max_function_calls: 1000,
            ..Default::default()
        };
        let results: Vec<RecResult> = reconstruct_events(&model, &config, &signals, None).expect("complete model");

        let precision: f64 = 0.05;
        for (result, (x, y)) in results.iter().zip(positions.iter()) {
            assert_eq!(result.status, RecStatus::Ok, "event at ({}, {})", x, y);
            assert!(result.dof >= 1);
            assert_abs_diff_eq!(result.x, *x, epsilon = precision);
            assert_abs_diff_eq!(result.y, *y, epsilon = precision);
            assert_abs_diff_eq!(result.e, energy, epsilon = 0.01 * energy);
            assert!(result.cov_xx > 0.0 && result.cov_yy > 0.0);
        }
    }
}

#[test]
fn test_saturated_sensors_are_left_out() {
    use approx::assert_abs_diff_eq;

    let model: LrModel = common::fitted_square_array();
    let pos: [f64; 3] = [-1.0, 1.5, 0.0];
    let mut signals: Vec<f64> = (0..64).map(|id: usize| model.eval(id, &pos).expect("valid") * 3.0).collect();

    // The strongest sensor clips, flagging it keeps the fit unbiased
    let strongest: usize = (0..64).max_by(|a: &usize, b: &usize| signals[*a].total_cmp(&signals[*b])).expect("sensors");
    signals[strongest] *= 0.5;
    let mut saturated: Vec<bool> = vec![false; 64];
    saturated[strongest] = true;

    let config: ReconstructorConfig = ReconstructorConfig {
        rec_cutoff_radius: 10.0,
        energy_calibration: 0.0015,
        max_function_calls: 1000,
        ..Default::default()
    };
    let mut reconstructor: Reconstructor = Reconstructor::new(&model, config).expect("complete model");
    assert!(reconstructor.process_event(&signals, &saturated));
    assert!(!reconstructor.is_active(strongest));

    let precision: f64 = 0.05;
    assert_abs_diff_eq!(reconstructor.get_rec_x(), pos[0], epsilon = precision);
    assert_abs_diff_eq!(reconstructor.get_rec_y(), pos[1], epsilon = precision);
    assert_abs_diff_eq!(reconstructor.get_rec_e(), 3.0, epsilon = 0.03);
}
