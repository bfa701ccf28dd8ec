use crate::errors::LrModelError;
use crate::lr_model::model::{LrModel, polar_angle};
use crate::transform::Transform;
use log::info;
use std::f64::consts::PI;

/// Position of a sensor taking part in symmetry discovery
#[derive(Debug, Clone, Copy)]
struct Site {
    id: usize,
    x: f64,
    y: f64,
}

impl Site {
    fn radius(&self) -> f64 {
        return self.x.hypot(self.y);
    }

    fn phi(&self) -> f64 {
        return polar_angle(self.x, self.y);
    }
}

impl LrModel {
    /// Sensors which have been added and are not part of a group, by ascending id
    fn ungrouped_sites(&self) -> Vec<Site> {
        return self
            .sensors
            .iter()
            .flatten()
            .filter(|sensor| sensor.group_id.is_none())
            .map(|sensor| Site {
                id: sensor.id,
                x: sensor.x,
                y: sensor.y,
            })
            .collect();
    }

    /// Put every ungrouped sensor into one group with reference point at the origin
    ///
    /// Each member gets the translation moving it onto the origin.
    ///
    /// # Returns
    /// The id of the created group, empty when there was nothing to group
    pub fn make_groups_common(&mut self) -> Result<Vec<usize>, LrModelError> {
        let sites: Vec<Site> = self.ungrouped_sites();
        if sites.is_empty() {
            return Ok(Vec::new());
        }

        let gid: usize = self.create_group_at(0.0, 0.0)?;
        for site in sites.iter() {
            self.add_to_group(site.id, gid, Some(Transform::Translate { dx: -site.x, dy: -site.y }))?;
        }
        info!("make_groups_common: {} sensors in group {}", sites.len(), gid);

        return Ok(vec![gid]);
    }

    /// Group ungrouped sensors lying on the same circle around the origin
    ///
    /// Sensors are taken by increasing radius; a sensor whose radius is within the tolerance
    /// of the current ring radius joins the ring, otherwise it starts a new ring.
    /// Every ring with at least two sensors becomes a rotational group.
    ///
    /// # Returns
    /// Ids of the created groups
    pub fn make_groups_by_radius(&mut self) -> Result<Vec<usize>, LrModelError> {
        let mut sites: Vec<Site> = self.ungrouped_sites();
        sites.sort_by(|a, b| a.radius().total_cmp(&b.radius()));

        let mut group_ids: Vec<usize> = Vec::new();
        let mut ring_radius: f64 = 0.0;
        let mut ring: Vec<Site> = Vec::new();
        for site in sites {
            if (ring_radius - site.radius()).abs() <= self.tolerance {
                ring.push(site);
                continue;
            }
            if ring.len() >= 2 {
                group_ids.push(self.make_rot_group(&mut ring)?);
            }
            ring.clear();
            ring.push(site);
            ring_radius = site.radius();
        }
        if ring.len() >= 2 {
            group_ids.push(self.make_rot_group(&mut ring)?);
        }
        info!("make_groups_by_radius: {} groups", group_ids.len());

        return Ok(group_ids);
    }

    /// Rotational group from sensors on one ring
    ///
    /// The sensor with the smallest polar angle is the untransformed reference,
    /// every other member is rotated onto it.
    fn make_rot_group(&mut self, ring: &mut [Site]) -> Result<usize, LrModelError> {
        ring.sort_by(|a, b| a.phi().total_cmp(&b.phi()));
        let reference: Site = ring[0];
        let phi0: f64 = reference.phi();

        let gid: usize = self.create_group_at(reference.x, reference.y)?;
        self.add_to_group(reference.id, gid, None)?;
        for site in ring.iter().skip(1) {
            self.add_to_group(site.id, gid, Some(Transform::Rotate { phi: phi0 - site.phi() }))?;
        }

        return Ok(gid);
    }

    /// Group ungrouped sensors which are images of each other under `transforms`
    ///
    /// The innermost remaining sensor is the reference of a new group. For each candidate
    /// transform the first remaining sensor mapped onto the reference (within the tolerance)
    /// joins the group with that transform. Groups ending with a single member are dissolved.
    ///
    /// # Arguments
    /// - `transforms`: the non-identity elements of the symmetry, e.g. `LrModel::make_vtr_square()`
    ///
    /// # Returns
    /// Ids of the created groups
    pub fn make_groups_by_transform(&mut self, transforms: &[Transform]) -> Result<Vec<usize>, LrModelError> {
        let mut sites: Vec<Site> = self.ungrouped_sites();
        sites.sort_by(|a, b| a.radius().total_cmp(&b.radius()));

        let mut group_ids: Vec<usize> = Vec::new();
        while sites.len() > 1 {
            let reference: Site = sites.remove(0);
            let gid: usize = self.create_group_at(reference.x, reference.y)?;
            self.add_to_group(reference.id, gid, None)?;

            for transform in transforms {
                let matching: Option<usize> = sites.iter().position(|site| {
                    let (x1, y1): (f64, f64) = transform.apply(site.x, site.y);
                    (x1 - reference.x).abs() < self.tolerance && (y1 - reference.y).abs() < self.tolerance
                });
                if let Some(i_site) = matching {
                    let site: Site = sites.remove(i_site);
                    self.add_to_group(site.id, gid, Some(*transform))?;
                }
            }

            if self.get_group_members_count(gid)? < 2 {
                self.dissolve_group(gid)?;
            } else {
                group_ids.push(gid);
            }
        }
        info!("make_groups_by_transform: {} groups", group_ids.len());

        return Ok(group_ids);
    }

    /// Mirror symmetry about both axes
    pub fn make_groups_rectangle(&mut self) -> Result<Vec<usize>, LrModelError> {
        return self.make_groups_by_transform(&LrModel::make_vtr_rectangle());
    }

    pub fn make_groups_square(&mut self) -> Result<Vec<usize>, LrModelError> {
        return self.make_groups_by_transform(&LrModel::make_vtr_square());
    }

    pub fn make_groups_hexagon(&mut self) -> Result<Vec<usize>, LrModelError> {
        return self.make_groups_by_transform(&LrModel::make_vtr_hexagon());
    }

    pub fn make_groups_ngon(&mut self, n: usize) -> Result<Vec<usize>, LrModelError> {
        return self.make_groups_by_transform(&LrModel::make_vtr_ngon(n));
    }

    pub fn make_vtr_rectangle() -> Vec<Transform> {
        return vec![
            Transform::Reflect { phi: 0.0 },
            Transform::Reflect { phi: PI / 2.0 },
            Transform::Rotate { phi: PI },
        ];
    }

    pub fn make_vtr_square() -> Vec<Transform> {
        return LrModel::make_vtr_ngon(4);
    }

    pub fn make_vtr_hexagon() -> Vec<Transform> {
        return LrModel::make_vtr_ngon(6);
    }

    /// Symmetry of a regular n-gon centred on the origin: n reflections and n - 1 rotations
    pub fn make_vtr_ngon(n: usize) -> Vec<Transform> {
        let n_f64: f64 = n as f64;
        let mut transforms: Vec<Transform> = Vec::with_capacity(2 * n);
        for i in 0..n {
            transforms.push(Transform::Reflect { phi: i as f64 * PI / n_f64 });
        }
        for i in 1..n {
            transforms.push(Transform::Rotate { phi: i as f64 * 2.0 * PI / n_f64 });
        }
        return transforms;
    }
}

#[cfg(test)]
fn square_grid(n_side: usize, pitch: f64) -> LrModel {
    let mut model: LrModel = LrModel::new(n_side * n_side);
    let shift: f64 = pitch * (n_side as f64 - 1.0) / 2.0;
    for id in 0..n_side * n_side {
        let x: f64 = (id % n_side) as f64 * pitch - shift;
        let y: f64 = -((id / n_side) as f64 * pitch - shift);
        model.add_sensor(id, x, y).expect("in range");
    }
    return model;
}

#[test]
fn test_make_groups_common() {
    use approx::assert_abs_diff_eq;

    let mut model: LrModel = square_grid(3, 2.0);
    let group_ids: Vec<usize> = model.make_groups_common().expect("valid");
    assert_eq!(group_ids.len(), 1);
    let gid: usize = group_ids[0];
    assert_eq!(model.get_group_members_count(gid).expect("exists"), 9);
    assert_eq!((model.get_group_x(gid).expect("exists"), model.get_group_y(gid).expect("exists")), (0.0, 0.0));

    // Every sensor is moved onto the origin
    for id in 0..9 {
        let transform: Transform = *model.get_transform(id).expect("added").expect("grouped");
        let (x, y): (f64, f64) = transform.apply(model.get_x(id).expect("added"), model.get_y(id).expect("added"));
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-12);
    }

    // Nothing left to group
    assert!(model.make_groups_common().expect("valid").is_empty());
}

#[test]
fn test_make_groups_by_radius() {
    use approx::assert_abs_diff_eq;

    // Sensor 0 in the centre, a ring of 6 at radius 10 and a ring of 3 at radius 20
    let n_sensors: usize = 10;
    let mut model: LrModel = LrModel::new(n_sensors);
    model.add_sensor(0, 0.0, 0.0).expect("in range");
    for i in 0..6 {
        let phi: f64 = 0.3 + i as f64 * PI / 3.0;
        model.add_sensor(1 + i, 10.0 * phi.cos(), 10.0 * phi.sin()).expect("in range");
    }
    for i in 0..3 {
        let phi: f64 = 1.0 + i as f64 * 2.0 * PI / 3.0;
        model.add_sensor(7 + i, 20.0 * phi.cos(), 20.0 * phi.sin()).expect("in range");
    }

    let group_ids: Vec<usize> = model.make_groups_by_radius().expect("valid");
    assert_eq!(group_ids.len(), 2);
    assert_eq!(model.get_group(0).expect("added"), None);

    let inner: usize = model.get_group(1).expect("added").expect("grouped");
    let outer: usize = model.get_group(7).expect("added").expect("grouped");
    assert_eq!(model.get_group_members_count(inner).expect("exists"), 6);
    assert_eq!(model.get_group_members_count(outer).expect("exists"), 3);

    // Every member is rotated onto the reference point of its group
    for id in 1..n_sensors {
        let gid: usize = model.get_group(id).expect("added").expect("grouped");
        let (x, y): (f64, f64) = match model.get_transform(id).expect("added") {
            Some(transform) => transform.apply(model.get_x(id).expect("added"), model.get_y(id).expect("added")),
            None => (model.get_x(id).expect("added"), model.get_y(id).expect("added")),
        };
        assert_abs_diff_eq!(x, model.get_group_x(gid).expect("exists"), epsilon = 1e-9);
        assert_abs_diff_eq!(y, model.get_group_y(gid).expect("exists"), epsilon = 1e-9);
    }

    // The reference has the smallest polar angle
    assert_eq!(model.get_transform(1).expect("added"), None);
}

#[test]
fn test_make_groups_rectangle() {
    // 4 x 2 grid: orbits of 4 under the rectangle symmetry
    let mut model: LrModel = LrModel::new(8);
    let mut id: usize = 0;
    for x in [-3.0, -1.0, 1.0, 3.0] {
        for y in [-0.5, 0.5] {
            model.add_sensor(id, x, y).expect("in range");
            id += 1;
        }
    }

    let group_ids: Vec<usize> = model.make_groups_rectangle().expect("valid");
    assert_eq!(group_ids.len(), 2);
    for gid in group_ids {
        assert_eq!(model.get_group_members_count(gid).expect("exists"), 4);
    }
}

#[test]
fn test_make_groups_by_transform_dissolves_singletons() {
    // Off-centre sensors have no mirror image
    let mut model: LrModel = LrModel::new(3);
    model.add_sensor(0, 1.0, 0.3).expect("in range");
    model.add_sensor(1, 5.0, 2.0).expect("in range");
    model.add_sensor(2, -1.0, 0.3).expect("in range");

    let group_ids: Vec<usize> = model.make_groups_rectangle().expect("valid");
    assert_eq!(group_ids.len(), 1);
    assert_eq!(model.get_group_count(), 1);
    assert_eq!(model.get_group(1).expect("added"), None);
    let gid: usize = group_ids[0];
    assert_eq!(model.group_members(gid).expect("exists").iter().copied().collect::<Vec<usize>>(), vec![0, 2]);
}

#[test]
fn test_make_vtr_sets() {
    assert_eq!(LrModel::make_vtr_rectangle().len(), 3);
    assert_eq!(LrModel::make_vtr_square().len(), 7);
    assert_eq!(LrModel::make_vtr_hexagon().len(), 11);
    assert_eq!(LrModel::make_vtr_ngon(5).len(), 9);
    assert_eq!(LrModel::make_vtr_square()[1], Transform::Reflect { phi: PI / 4.0 });
    assert_eq!(LrModel::make_vtr_hexagon()[6], Transform::Rotate { phi: PI / 3.0 });
}

#[test]
fn test_make_groups_hexagon_and_ngon_rings() {
    use approx::assert_abs_diff_eq;

    // Hexagonal ring of 6 at radius 10 with a vertex on the x axis
    let mut model: LrModel = LrModel::new(6);
    for i in 0..6 {
        let phi: f64 = i as f64 * PI / 3.0;
        model.add_sensor(i, 10.0 * phi.cos(), 10.0 * phi.sin()).expect("in range");
    }
    let group_ids: Vec<usize> = model.make_groups_hexagon().expect("valid");
    assert_eq!(group_ids.len(), 1);
    let gid: usize = group_ids[0];
    assert_eq!(model.get_group_members_count(gid).expect("exists"), 6);
    assert_eq!((model.get_group_x(gid).expect("exists"), model.get_group_y(gid).expect("exists")), (10.0, 0.0));
    for id in 0..6 {
        let (x, y): (f64, f64) = match model.get_transform(id).expect("added") {
            Some(transform) => transform.apply(model.get_x(id).expect("added"), model.get_y(id).expect("added")),
            None => (model.get_x(id).expect("added"), model.get_y(id).expect("added")),
        };
        assert_abs_diff_eq!(x, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-9);
    }

    // Rotated pentagon plus a centre sensor: only rotations match, the centre stays alone
    let mut model: LrModel = LrModel::new(6);
    model.add_sensor(0, 0.0, 0.0).expect("in range");
    for i in 0..5 {
        let phi: f64 = 0.2 + i as f64 * 2.0 * PI / 5.0;
        model.add_sensor(1 + i, 7.0 * phi.cos(), 7.0 * phi.sin()).expect("in range");
    }
    let group_ids: Vec<usize> = model.make_groups_ngon(5).expect("valid");
    assert_eq!(group_ids.len(), 1);
    assert_eq!(model.get_group_members_count(group_ids[0]).expect("exists"), 5);
    assert_eq!(model.get_group(0).expect("added"), None);
    for id in 2..6 {
        assert!(matches!(model.get_transform(id).expect("added"), Some(Transform::Rotate { .. })));
    }
}
