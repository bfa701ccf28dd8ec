#![allow(dead_code)]

use lrmodel_rs::{AxialLrf, DualSlopeCompress, Lrf, LrModel, LrfData};

pub const PITCH: f64 = 4.21;
pub const HEIGHT: f64 = 4.21;

/// Square array centred on the origin, row 0 at the top
pub fn square_array(n_side: usize, pitch: f64) -> LrModel {
    let mut model: LrModel = LrModel::new(n_side * n_side);
    add_square_sensors(&mut model, n_side, pitch);
    return model;
}

pub fn add_square_sensors(model: &mut LrModel, n_side: usize, pitch: f64) {
    let shift: f64 = pitch * (n_side as f64 - 1.0) / 2.0;
    for id in 0..n_side * n_side {
        let x: f64 = (id % n_side) as f64 * pitch - shift;
        let y: f64 = -((id / n_side) as f64 * pitch - shift);
        model.add_sensor(id, x, y).expect("in range");
    }
}

/// Light falling on a sensor at distance `r`, for a source `HEIGHT` above the sensor plane
pub fn true_response(r: f64) -> f64 {
    return 100.0 * HEIGHT.powi(3) / (HEIGHT * HEIGHT + r * r).powf(1.5);
}

/// 8 x 8 array grouped by square symmetry, group LRFs fitted to a noiseless flood
pub fn fitted_square_array() -> LrModel {
    let mut prototype: AxialLrf = AxialLrf::new(42.0, 10).expect("valid lrf");
    prototype
        .set_compression(Some(Box::new(DualSlopeCompress::new(10.0, 7.0, 4.0).expect("valid compression"))))
        .expect("valid compression");
    prototype.set_non_increasing(true);
    prototype.set_flat_top(true);
    prototype.set_non_negative(true);

    let mut model: LrModel = LrModel::with_default_lrf(64, Box::new(prototype));
    add_square_sensors(&mut model, 8, PITCH);
    let group_ids: Vec<usize> = model.make_groups_square().expect("valid");

    // Flood on a regular grid covering the array
    let mut flood: Vec<LrfData> = Vec::new();
    for i_x in 0..=68 {
        for i_y in 0..=68 {
            flood.push([-17.0 + 0.5 * i_x as f64, -17.0 + 0.5 * i_y as f64, 0.0, 0.0]);
        }
    }

    for gid in group_ids.iter() {
        let r_max: f64 = model.get_group_max_r(*gid, &flood).expect("exists");
        let lrf: &mut dyn Lrf = model.get_group_lrf_mut(*gid).expect("group lrf");
        lrf.as_any_mut()
            .downcast_mut::<AxialLrf>()
            .expect("axial")
            .set_rmax(r_max + 0.1)
            .expect("valid domain");
    }

    for id in 0..64 {
        let x0: f64 = model.get_x(id).expect("added");
        let y0: f64 = model.get_y(id).expect("added");
        let data: Vec<LrfData> = flood
            .iter()
            .map(|sample: &LrfData| [sample[0], sample[1], 0.0, true_response((sample[0] - x0).hypot(sample[1] - y0))])
            .collect();
        model.add_fit_data(id, &data).expect("valid");
    }
    for gid in group_ids.iter() {
        model.fit_group(*gid).expect("fit succeeds");
    }

    return model;
}
