mod common;

use lrmodel_rs::{LrModel, Reconstructor, ReconstructorConfig};
use std::path::PathBuf;

#[test]
fn test_fitted_model_file_round_trip() {
    let model: LrModel = common::fitted_square_array();

    let path: PathBuf = std::env::temp_dir().join(format!("lrmodel_rs_round_trip_{}.json", std::process::id()));
    model.save_json(&path).expect("writable");
    let restored: LrModel = LrModel::load_json(&path).expect("valid file");
    std::fs::remove_file(&path).expect("removable");

    assert_eq!(restored.get_sensor_count(), 64);
    assert_eq!(restored.group_ids(), model.group_ids());
    assert_eq!(restored.to_json(), model.to_json());

    // Bit equal responses across the array
    for id in 0..64 {
        assert_eq!(restored.get_group(id).expect("added"), model.get_group(id).expect("added"));
        for i_x in 0..15 {
            for i_y in 0..15 {
                let pos: [f64; 3] = [-14.0 + 2.0 * i_x as f64, -14.0 + 2.0 * i_y as f64, 0.0];
                assert_eq!(restored.eval(id, &pos).expect("valid"), model.eval(id, &pos).expect("valid"));
                assert_eq!(restored.eval_drv_x(id, &pos).expect("valid"), model.eval_drv_x(id, &pos).expect("valid"));
            }
        }
    }

    // Same event, same reconstruction
    let pos: [f64; 3] = [2.0, -1.0, 0.0];
    let signals: Vec<f64> = (0..64).map(|id: usize| model.eval(id, &pos).expect("valid")).collect();
    let saturated: Vec<bool> = vec![false; 64];
    let config: ReconstructorConfig = ReconstructorConfig {
        rec_cutoff_radius: 10.0,
        energy_calibration: 0.001,
        ..Default::default()
    };
    let mut original: Reconstructor = Reconstructor::new(&model, config.clone()).expect("complete model");
    let mut reloaded: Reconstructor = Reconstructor::new(&restored, config).expect("complete model");
    original.process_event(&signals, &saturated);
    reloaded.process_event(&signals, &saturated);
    assert_eq!(original.get_rec_status(), reloaded.get_rec_status());
    assert_eq!(original.get_rec_x(), reloaded.get_rec_x());
    assert_eq!(original.get_rec_y(), reloaded.get_rec_y());
    assert_eq!(original.get_rec_e(), reloaded.get_rec_e());
}

#[test]
fn test_load_missing_file() {
    let path: PathBuf = std::env::temp_dir().join("lrmodel_rs_does_not_exist.json");
    assert!(LrModel::load_json(&path).is_err());
}
