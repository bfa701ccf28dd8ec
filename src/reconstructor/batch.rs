use crate::errors::LrModelError;
use crate::lr_model::LrModel;
use crate::reconstructor::config::ReconstructorConfig;
use crate::reconstructor::reconstructor::{RecResult, RecStatus, Reconstructor};
use log::info;
use ndarray::Array2;
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Reconstruct many events in parallel
///
/// Every rayon worker gets its own `Reconstructor`, all bound to the same read only model.
///
/// # Arguments
/// - `model`: fitted model, every sensor must have been added
/// - `config`: reconstruction settings, shared by all events
/// - `signals`: raw amplitudes, shape = [n_events, n_sensors]
/// - `saturated`: saturation flags, shape = [n_events, n_sensors]; `None` when nothing saturates
///
/// # Returns
/// One result per event, in input order
pub fn reconstruct_events(
    model: &LrModel,
    config: &ReconstructorConfig,
    signals: &Array2<f64>,
    saturated: Option<&Array2<bool>>,
) -> Result<Vec<RecResult>, LrModelError> {
    let n_events: usize = signals.nrows();
    let n_columns: usize = signals.ncols();
    if let Some(flags) = saturated {
        if flags.dim() != signals.dim() {
            return Err(LrModelError::Inconsistent(format!(
                "saturation flags have shape {:?}, signals have shape {:?}",
                flags.dim(),
                signals.dim()
            )));
        }
    }

    // Checks the model once, the workers clone this one
    let prototype: Reconstructor = Reconstructor::new(model, config.clone())?;

    let timing_start: Instant = Instant::now();
    let results: Vec<RecResult> = (0..n_events)
        .into_par_iter() // Use Rayon to create a parallel iterator
        .map_init(
            || prototype.clone(),
            |reconstructor: &mut Reconstructor, i_event: usize| {
                let event_signals: Vec<f64> = signals.row(i_event).to_vec();
                let event_saturated: Vec<bool> = match saturated {
                    Some(flags) => flags.row(i_event).to_vec(),
                    None => vec![false; n_columns],
                };
                reconstructor.process_event(&event_signals, &event_saturated);
                reconstructor.get_result()
            },
        )
        .collect();
    let duration: Duration = timing_start.elapsed();

    let n_ok: usize = results.iter().filter(|result: &&RecResult| result.status == RecStatus::Ok).count();
    info!("reconstruct_events: {}/{} events reconstructed, time elapsed: {:?}", n_ok, n_events, duration);

    return Ok(results);
}

#[test]
fn test_reconstruct_events_batch() {
    use crate::reconstructor::reconstructor::fitted_test_model;
    use approx::assert_abs_diff_eq;

    let model: LrModel = fitted_test_model();
    let n_sensors: usize = model.get_sensor_count();
    let positions: [(f64, f64); 4] = [(0.0, 0.0), (-7.5, 2.0), (4.0, 9.0), (11.0, -12.0)];
    let energy: f64 = 3.0;

    let mut signals: Array2<f64> = Array2::zeros((positions.len() + 1, n_sensors));
    for (i_event, (x, y)) in positions.iter().enumerate() {
        for id in 0..n_sensors {
            signals[[i_event, id]] = model.eval(id, &[*x, *y, 0.0]).expect("valid") * energy;
        }
    }
    // Last event has no signal at all

    let config: ReconstructorConfig = ReconstructorConfig {
        energy_calibration: 0.001,
        cog_rel_cutoff: 0.3,
        max_function_calls: 1000,
        ..Default::default()
    };
    let results: Vec<RecResult> = reconstruct_events(&model, &config, &signals, None).expect("complete model");

    assert_eq!(results.len(), positions.len() + 1);
    let precision: f64 = 0.05;
    for (result, (x, y)) in results.iter().zip(positions.iter()) {
        assert_eq!(result.status, RecStatus::Ok);
        assert_abs_diff_eq!(result.x, *x, epsilon = precision);
        assert_abs_diff_eq!(result.y, *y, epsilon = precision);
        assert_abs_diff_eq!(result.e, energy, epsilon = 0.01 * energy);
    }
    assert_eq!(results[positions.len()].status, RecStatus::InsufficientData);

    // Shape mismatch between signals and flags
    let flags: Array2<bool> = Array2::from_elem((2, n_sensors), false);
    assert!(reconstruct_events(&model, &config, &signals, Some(&flags)).is_err());
}
