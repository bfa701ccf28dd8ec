use crate::errors::LrModelError;
use crate::lrf::{AxialLrf, Lrf, LrfData};
use crate::transform::Transform;
use log::debug;
use std::collections::BTreeSet;
use std::f64::consts::PI;

/// Default tolerance used when matching sensor positions
pub const DEFAULT_TOLERANCE: f64 = 1.0e-4;

/// One light sensor of the detector
///
/// A sensor owns a private LRF only while it is not part of a group,
/// grouped sensors are evaluated through the group LRF.
#[derive(Debug, Clone)]
pub struct LrSensor {
    pub(crate) id: usize,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) gain: f64,
    pub(crate) group_id: Option<usize>,
    pub(crate) transform: Option<Transform>,
    pub(crate) lrf: Option<Box<dyn Lrf>>,
}

impl LrSensor {
    pub fn get_id(&self) -> usize {
        return self.id;
    }

    pub fn get_radius(&self) -> f64 {
        return self.x.hypot(self.y);
    }

    /// Polar angle in [0, 2 pi)
    pub fn get_phi(&self) -> f64 {
        return polar_angle(self.x, self.y);
    }

    pub fn get_distance(&self, x1: f64, y1: f64) -> f64 {
        return (x1 - self.x).hypot(y1 - self.y);
    }
}

/// `atan2` mapped from [-pi, pi] onto [0, 2 pi)
pub(crate) fn polar_angle(x: f64, y: f64) -> f64 {
    let mut phi: f64 = y.atan2(x);
    if phi < -1.0e-6 {
        phi += 2.0 * PI;
    }
    return phi;
}

/// Sensors sharing one LRF
///
/// Each member maps world coordinates onto the frame of the reference point `(x0, y0)`
/// with its own transform before the shared LRF is evaluated.
#[derive(Debug, Clone)]
pub struct LrGroup {
    pub(crate) id: usize,
    pub(crate) x0: f64,
    pub(crate) y0: f64,
    pub(crate) members: BTreeSet<usize>,
    pub(crate) lrf: Option<Box<dyn Lrf>>,
}

impl LrGroup {
    pub fn get_id(&self) -> usize {
        return self.id;
    }

    pub fn get_members(&self) -> &BTreeSet<usize> {
        return &self.members;
    }
}

/// What a sensor gets as its private LRF when it leaves a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UngroupPolicy {
    /// Copy of the group LRF, transform and gain are kept
    #[default]
    KeepLrf,
    /// Copy of the default LRF, transform cleared and gain reset to 1
    ResetLrf,
}

/// Detector model: sensors, symmetry groups and their light response functions
///
/// Sensor ids are indices into a fixed size array, each one is assigned once by `add_sensor`.
/// Groups live in slots: dissolving a group frees its slot without changing any other group id,
/// and `create_group` reuses the lowest free slot.
#[derive(Debug, Clone)]
pub struct LrModel {
    pub(crate) sensors: Vec<Option<LrSensor>>,
    pub(crate) groups: Vec<Option<LrGroup>>,
    pub(crate) default_lrf: Option<Box<dyn Lrf>>,
    pub(crate) tolerance: f64,
}

impl LrModel {
    /// Model for `n_sensors` sensors without a default LRF
    pub fn new(n_sensors: usize) -> Self {
        return LrModel {
            sensors: vec![None; n_sensors],
            groups: Vec::new(),
            default_lrf: None,
            tolerance: DEFAULT_TOLERANCE,
        };
    }

    /// Model whose new sensors and groups start from a copy of `default_lrf`
    pub fn with_default_lrf(n_sensors: usize, default_lrf: Box<dyn Lrf>) -> Self {
        let mut model: LrModel = LrModel::new(n_sensors);
        model.default_lrf = Some(default_lrf);
        return model;
    }

    pub fn set_default_lrf(&mut self, default_lrf: Option<Box<dyn Lrf>>) {
        self.default_lrf = default_lrf;
    }

    pub fn get_default_lrf(&self) -> Option<&dyn Lrf> {
        return match &self.default_lrf {
            Some(lrf) => Some(&**lrf),
            None => None,
        };
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    pub fn get_tolerance(&self) -> f64 {
        return self.tolerance;
    }

    pub(crate) fn sensor(&self, id: usize) -> Result<&LrSensor, LrModelError> {
        let n_sensors: usize = self.sensors.len();
        return match self.sensors.get(id) {
            Some(Some(sensor)) => Ok(sensor),
            Some(None) => Err(LrModelError::SensorNotAdded(id)),
            None => Err(LrModelError::SensorOutOfRange { id, n_sensors }),
        };
    }

    pub(crate) fn sensor_mut(&mut self, id: usize) -> Result<&mut LrSensor, LrModelError> {
        let n_sensors: usize = self.sensors.len();
        return match self.sensors.get_mut(id) {
            Some(Some(sensor)) => Ok(sensor),
            Some(None) => Err(LrModelError::SensorNotAdded(id)),
            None => Err(LrModelError::SensorOutOfRange { id, n_sensors }),
        };
    }

    pub(crate) fn group(&self, gid: usize) -> Result<&LrGroup, LrModelError> {
        return match self.groups.get(gid) {
            Some(Some(group)) => Ok(group),
            _ => Err(LrModelError::GroupNotFound(gid)),
        };
    }

    pub(crate) fn group_mut(&mut self, gid: usize) -> Result<&mut LrGroup, LrModelError> {
        return match self.groups.get_mut(gid) {
            Some(Some(group)) => Ok(group),
            _ => Err(LrModelError::GroupNotFound(gid)),
        };
    }

    /// Copy of the default LRF
    ///
    /// An unfitted axial default is centred on `(x0, y0)`, a fitted one is copied unchanged
    fn default_lrf_at(&self, x0: f64, y0: f64) -> Result<Option<Box<dyn Lrf>>, LrModelError> {
        let mut lrf: Box<dyn Lrf> = match &self.default_lrf {
            Some(default_lrf) => default_lrf.clone(),
            None => return Ok(None),
        };
        if !lrf.is_ready() {
            if let Some(axial) = lrf.as_any_mut().downcast_mut::<AxialLrf>() {
                axial.set_origin(x0, y0)?;
            }
        }
        return Ok(Some(lrf));
    }

    // Sensors

    /// Place sensor `id` at `(x, y)`
    ///
    /// The sensor gets a copy of the default LRF if one is configured, centred on its position while unfitted
    pub fn add_sensor(&mut self, id: usize, x: f64, y: f64) -> Result<(), LrModelError> {
        let n_sensors: usize = self.sensors.len();
        match self.sensors.get(id) {
            None => return Err(LrModelError::SensorOutOfRange { id, n_sensors }),
            Some(Some(_)) => return Err(LrModelError::SensorAlreadyAdded(id)),
            Some(None) => {}
        }

        let lrf: Option<Box<dyn Lrf>> = self.default_lrf_at(x, y)?;
        self.sensors[id] = Some(LrSensor {
            id,
            x,
            y,
            gain: 1.0,
            group_id: None,
            transform: None,
            lrf,
        });

        return Ok(());
    }

    /// Remove every sensor and group, the number of sensor slots is kept
    pub fn clear_all(&mut self) {
        for sensor in self.sensors.iter_mut() {
            *sensor = None;
        }
        self.groups.clear();
    }

    pub fn set_gain(&mut self, id: usize, gain: f64) -> Result<(), LrModelError> {
        self.sensor_mut(id)?.gain = gain;
        return Ok(());
    }

    pub fn get_gain(&self, id: usize) -> Result<f64, LrModelError> {
        return Ok(self.sensor(id)?.gain);
    }

    pub fn set_transform(&mut self, id: usize, transform: Option<Transform>) -> Result<(), LrModelError> {
        self.sensor_mut(id)?.transform = transform;
        return Ok(());
    }

    pub fn get_transform(&self, id: usize) -> Result<Option<&Transform>, LrModelError> {
        return Ok(self.sensor(id)?.transform.as_ref());
    }

    /// Group of sensor `id`, `None` when ungrouped
    pub fn get_group(&self, id: usize) -> Result<Option<usize>, LrModelError> {
        return Ok(self.sensor(id)?.group_id);
    }

    pub fn get_sensor(&self, id: usize) -> Result<&LrSensor, LrModelError> {
        return self.sensor(id);
    }

    pub fn get_x(&self, id: usize) -> Result<f64, LrModelError> {
        return Ok(self.sensor(id)?.x);
    }

    pub fn get_y(&self, id: usize) -> Result<f64, LrModelError> {
        return Ok(self.sensor(id)?.y);
    }

    /// x of every sensor, fails if a sensor has not been added
    pub fn get_all_x(&self) -> Result<Vec<f64>, LrModelError> {
        return (0..self.sensors.len()).map(|id| self.get_x(id)).collect();
    }

    /// y of every sensor, fails if a sensor has not been added
    pub fn get_all_y(&self) -> Result<Vec<f64>, LrModelError> {
        return (0..self.sensors.len()).map(|id| self.get_y(id)).collect();
    }

    pub fn get_radius(&self, id: usize) -> Result<f64, LrModelError> {
        return Ok(self.sensor(id)?.get_radius());
    }

    pub fn get_phi(&self, id: usize) -> Result<f64, LrModelError> {
        return Ok(self.sensor(id)?.get_phi());
    }

    pub fn get_distance(&self, id_a: usize, id_b: usize) -> Result<f64, LrModelError> {
        let sensor_b: &LrSensor = self.sensor(id_b)?;
        return Ok(self.sensor(id_a)?.get_distance(sensor_b.x, sensor_b.y));
    }

    pub fn get_sensor_count(&self) -> usize {
        return self.sensors.len();
    }

    /// Sensor `id` is in range and has been added
    pub fn sensor_exists(&self, id: usize) -> bool {
        return self.sensor(id).is_ok();
    }

    /// Every sensor has been added
    pub fn is_complete(&self) -> bool {
        return self.sensors.iter().all(|sensor| sensor.is_some());
    }

    // Groups

    /// Number of existing groups
    pub fn get_group_count(&self) -> usize {
        return self.groups.iter().filter(|group| group.is_some()).count();
    }

    /// Ids of the existing groups, ascending
    pub fn group_ids(&self) -> Vec<usize> {
        return self
            .groups
            .iter()
            .enumerate()
            .filter(|(_gid, group)| group.is_some())
            .map(|(gid, _group)| gid)
            .collect();
    }

    pub fn group_exists(&self, gid: usize) -> bool {
        return self.group(gid).is_ok();
    }

    pub fn get_group_info(&self, gid: usize) -> Result<&LrGroup, LrModelError> {
        return self.group(gid);
    }

    pub fn group_members(&self, gid: usize) -> Result<&BTreeSet<usize>, LrModelError> {
        return Ok(&self.group(gid)?.members);
    }

    pub fn get_group_members_count(&self, gid: usize) -> Result<usize, LrModelError> {
        return Ok(self.group(gid)?.members.len());
    }

    pub fn get_group_x(&self, gid: usize) -> Result<f64, LrModelError> {
        return Ok(self.group(gid)?.x0);
    }

    pub fn get_group_y(&self, gid: usize) -> Result<f64, LrModelError> {
        return Ok(self.group(gid)?.y0);
    }

    /// Create an empty group with reference point at the origin
    ///
    /// # Returns
    /// The id of the new group, the lowest free slot
    pub fn create_group(&mut self) -> usize {
        let lrf: Option<Box<dyn Lrf>> = self.default_lrf.clone();
        return self.insert_group(0.0, 0.0, lrf);
    }

    /// Create an empty group with reference point `(x0, y0)`
    ///
    /// The group LRF is a copy of the default LRF, centred on the reference point while unfitted
    pub fn create_group_at(&mut self, x0: f64, y0: f64) -> Result<usize, LrModelError> {
        let lrf: Option<Box<dyn Lrf>> = self.default_lrf_at(x0, y0)?;
        return Ok(self.insert_group(x0, y0, lrf));
    }

    fn insert_group(&mut self, x0: f64, y0: f64, lrf: Option<Box<dyn Lrf>>) -> usize {
        let gid: usize = match self.groups.iter().position(|group| group.is_none()) {
            Some(free_slot) => free_slot,
            None => {
                self.groups.push(None);
                self.groups.len() - 1
            }
        };

        self.groups[gid] = Some(LrGroup {
            id: gid,
            x0,
            y0,
            members: BTreeSet::new(),
            lrf,
        });
        debug!("created group {}", gid);

        return gid;
    }

    /// Move the reference point of group `gid`
    pub fn set_group_origin(&mut self, gid: usize, x0: f64, y0: f64) -> Result<(), LrModelError> {
        let group: &mut LrGroup = self.group_mut(gid)?;
        group.x0 = x0;
        group.y0 = y0;
        return Ok(());
    }

    /// Add sensor `id` to group `gid`, `transform` maps the sensor frame onto the group frame
    pub fn add_to_group(&mut self, id: usize, gid: usize, transform: Option<Transform>) -> Result<(), LrModelError> {
        self.group(gid)?;
        let sensor: &mut LrSensor = self.sensor_mut(id)?;
        if let Some(group_id) = sensor.group_id {
            return Err(LrModelError::SensorAlreadyGrouped { id, group_id });
        }

        sensor.group_id = Some(gid);
        sensor.transform = transform;
        sensor.lrf = None;
        self.group_mut(gid)?.members.insert(id);

        return Ok(());
    }

    /// Detach sensor `id` from its group
    ///
    /// A group left without members is removed.
    ///
    /// # Returns
    /// `false` when the sensor was not grouped
    pub fn remove_from_group(&mut self, id: usize, policy: UngroupPolicy) -> Result<bool, LrModelError> {
        let (gid, x, y) = {
            let sensor: &LrSensor = self.sensor(id)?;
            match sensor.group_id {
                Some(gid) => (gid, sensor.x, sensor.y),
                None => return Ok(false),
            }
        };

        let lrf: Option<Box<dyn Lrf>> = match policy {
            UngroupPolicy::KeepLrf => self.group(gid)?.lrf.clone(),
            UngroupPolicy::ResetLrf => self.default_lrf_at(x, y)?,
        };

        let sensor: &mut LrSensor = self.sensor_mut(id)?;
        sensor.group_id = None;
        sensor.lrf = lrf;
        if policy == UngroupPolicy::ResetLrf {
            sensor.transform = None;
            sensor.gain = 1.0;
        }

        let group: &mut LrGroup = self.group_mut(gid)?;
        group.members.remove(&id);
        if group.members.is_empty() {
            self.groups[gid] = None;
            debug!("group {} removed, no members left", gid);
        }

        return Ok(true);
    }

    /// Ungroup all members of `gid` (keeping a copy of the group LRF) and free the slot
    pub fn dissolve_group(&mut self, gid: usize) -> Result<(), LrModelError> {
        let members: Vec<usize> = self.group(gid)?.members.iter().copied().collect();
        for id in members {
            self.remove_from_group(id, UngroupPolicy::KeepLrf)?;
        }
        // An empty group is not removed by the loop above
        if let Some(slot) = self.groups.get_mut(gid) {
            *slot = None;
        }
        debug!("dissolved group {}", gid);

        return Ok(());
    }

    /// Dissolve every group
    pub fn reset_groups(&mut self) -> Result<(), LrModelError> {
        for gid in self.group_ids() {
            self.dissolve_group(gid)?;
        }
        self.groups.clear();
        return Ok(());
    }

    // LRF access

    /// Give sensor `id` its own LRF, taking it out of its group first
    pub fn set_lrf(&mut self, id: usize, lrf: Box<dyn Lrf>) -> Result<(), LrModelError> {
        self.remove_from_group(id, UngroupPolicy::KeepLrf)?;
        self.sensor_mut(id)?.lrf = Some(lrf);
        return Ok(());
    }

    /// LRF used for sensor `id`: the group LRF if grouped, the private one otherwise
    pub fn get_lrf(&self, id: usize) -> Result<&dyn Lrf, LrModelError> {
        let sensor: &LrSensor = self.sensor(id)?;
        let lrf: Option<&Box<dyn Lrf>> = match sensor.group_id {
            Some(gid) => self.group(gid)?.lrf.as_ref(),
            None => sensor.lrf.as_ref(),
        };
        return match lrf {
            Some(lrf) => Ok(&**lrf),
            None => Err(LrModelError::NoLrf(id)),
        };
    }

    pub fn get_lrf_mut(&mut self, id: usize) -> Result<&mut dyn Lrf, LrModelError> {
        let group_id: Option<usize> = self.sensor(id)?.group_id;
        return match group_id {
            Some(gid) => match self.group_mut(gid)?.lrf.as_mut() {
                Some(lrf) => Ok(&mut **lrf),
                None => Err(LrModelError::NoLrf(id)),
            },
            None => match self.sensor_mut(id)?.lrf.as_mut() {
                Some(lrf) => Ok(&mut **lrf),
                None => Err(LrModelError::NoLrf(id)),
            },
        };
    }

    pub fn set_group_lrf(&mut self, gid: usize, lrf: Box<dyn Lrf>) -> Result<(), LrModelError> {
        self.group_mut(gid)?.lrf = Some(lrf);
        return Ok(());
    }

    pub fn get_group_lrf(&self, gid: usize) -> Result<&dyn Lrf, LrModelError> {
        return match self.group(gid)?.lrf.as_ref() {
            Some(lrf) => Ok(&**lrf),
            None => Err(LrModelError::NoGroupLrf(gid)),
        };
    }

    pub fn get_group_lrf_mut(&mut self, gid: usize) -> Result<&mut dyn Lrf, LrModelError> {
        return match self.group_mut(gid)?.lrf.as_mut() {
            Some(lrf) => Ok(&mut **lrf),
            None => Err(LrModelError::NoGroupLrf(gid)),
        };
    }

    // Evaluation

    /// World position mapped into the frame of the LRF used by sensor `id`
    fn to_local(&self, id: usize, pos_world: &[f64; 3]) -> Result<[f64; 3], LrModelError> {
        let mut pos: [f64; 3] = *pos_world;
        if let Some(transform) = &self.sensor(id)?.transform {
            transform.transform(&mut pos);
        }
        return Ok(pos);
    }

    pub fn in_domain(&self, id: usize, pos_world: &[f64; 3]) -> Result<bool, LrModelError> {
        let pos: [f64; 3] = self.to_local(id, pos_world)?;
        return Ok(self.get_lrf(id)?.in_domain(pos[0], pos[1], pos[2]));
    }

    /// Expected signal of sensor `id` for a unit energy event at `pos_world`, including its gain
    pub fn eval(&self, id: usize, pos_world: &[f64; 3]) -> Result<f64, LrModelError> {
        let pos: [f64; 3] = self.to_local(id, pos_world)?;
        let gain: f64 = self.sensor(id)?.gain;
        return Ok(self.get_lrf(id)?.eval(pos[0], pos[1], pos[2]) * gain);
    }

    /// As `eval`, with the position already in the LRF frame
    pub fn eval_local(&self, id: usize, pos_local: &[f64; 3]) -> Result<f64, LrModelError> {
        let gain: f64 = self.sensor(id)?.gain;
        return Ok(self.get_lrf(id)?.eval(pos_local[0], pos_local[1], pos_local[2]) * gain);
    }

    /// World frame gradient of `eval`
    fn eval_gradient(&self, id: usize, pos_world: &[f64; 3]) -> Result<(f64, f64), LrModelError> {
        let sensor: &LrSensor = self.sensor(id)?;
        let pos: [f64; 3] = self.to_local(id, pos_world)?;
        let lrf: &dyn Lrf = self.get_lrf(id)?;

        let grad_x: f64 = lrf.eval_drv_x(pos[0], pos[1], pos[2]) * sensor.gain;
        let grad_y: f64 = lrf.eval_drv_y(pos[0], pos[1], pos[2]) * sensor.gain;

        return match &sensor.transform {
            Some(transform) => Ok(transform.gradient_to_source(grad_x, grad_y)),
            None => Ok((grad_x, grad_y)),
        };
    }

    /// Derivative of `eval` along the world `x` axis
    ///
    /// The LRF derivative is taken in the group frame and rotated back through the sensor
    /// transform, so members of a group get their own world frame gradient.
    pub fn eval_drv_x(&self, id: usize, pos_world: &[f64; 3]) -> Result<f64, LrModelError> {
        return Ok(self.eval_gradient(id, pos_world)?.0);
    }

    /// Derivative of `eval` along the world `y` axis, see `eval_drv_x`
    pub fn eval_drv_y(&self, id: usize, pos_world: &[f64; 3]) -> Result<f64, LrModelError> {
        return Ok(self.eval_gradient(id, pos_world)?.1);
    }

    // Fitting

    /// Calibration samples of sensor `id` moved into its LRF frame and divided by its gain
    fn to_local_data(&self, id: usize, data: &[LrfData]) -> Result<Vec<LrfData>, LrModelError> {
        let sensor: &LrSensor = self.sensor(id)?;
        let local_data: Vec<LrfData> = data
            .iter()
            .map(|sample| {
                let mut pos: [f64; 3] = [sample[0], sample[1], sample[2]];
                if let Some(transform) = &sensor.transform {
                    transform.transform(&mut pos);
                }
                [pos[0], pos[1], pos[2], sample[3] / sensor.gain]
            })
            .collect();
        return Ok(local_data);
    }

    /// Fit the LRF of sensor `id` directly to `data`
    pub fn fit_not_binned_data(&mut self, id: usize, data: &[LrfData]) -> Result<(), LrModelError> {
        let local_data: Vec<LrfData> = self.to_local_data(id, data)?;
        self.get_lrf_mut(id)?.fit_data(&local_data)?;
        return Ok(());
    }

    /// Accumulate `data` of sensor `id` into its (group) LRF for a later `fit_sensor` / `fit_group`
    pub fn add_fit_data(&mut self, id: usize, data: &[LrfData]) -> Result<(), LrModelError> {
        let local_data: Vec<LrfData> = self.to_local_data(id, data)?;
        self.get_lrf_mut(id)?.add_data(&local_data)?;
        return Ok(());
    }

    /// Fit the accumulated data of the LRF used by sensor `id`
    pub fn fit_sensor(&mut self, id: usize) -> Result<(), LrModelError> {
        self.get_lrf_mut(id)?.do_fit()?;
        return Ok(());
    }

    pub fn fit_group(&mut self, gid: usize) -> Result<(), LrModelError> {
        self.get_group_lrf_mut(gid)?.do_fit()?;
        return Ok(());
    }

    /// Drop the accumulated data of every sensor and group LRF
    pub fn clear_all_fit_data(&mut self) {
        for sensor in self.sensors.iter_mut().flatten() {
            if let Some(lrf) = sensor.lrf.as_mut() {
                lrf.clear_fit_data();
            }
        }
        for group in self.groups.iter_mut().flatten() {
            if let Some(lrf) = group.lrf.as_mut() {
                lrf.clear_fit_data();
            }
        }
    }

    // Utility

    /// Largest distance between sensor `id` and a sample position
    pub fn get_max_r(&self, id: usize, data: &[LrfData]) -> Result<f64, LrModelError> {
        let sensor: &LrSensor = self.sensor(id)?;
        let max_r: f64 = data.iter().map(|sample| sensor.get_distance(sample[0], sample[1])).fold(0.0, f64::max);
        return Ok(max_r);
    }

    /// Largest distance between any member of group `gid` and a sample position
    pub fn get_group_max_r(&self, gid: usize, data: &[LrfData]) -> Result<f64, LrModelError> {
        let mut max_r: f64 = 0.0;
        for id in self.group(gid)?.members.iter() {
            max_r = max_r.max(self.get_max_r(*id, data)?);
        }
        return Ok(max_r);
    }
}

#[cfg(test)]
fn axial_prototype() -> Box<dyn Lrf> {
    return Box::new(AxialLrf::new(30.0, 10).expect("valid lrf"));
}

#[test]
fn test_model_sensors() {
    let mut model: LrModel = LrModel::new(3);
    model.add_sensor(0, 1.0, 0.0).expect("in range");
    model.add_sensor(2, 0.0, -2.0).expect("in range");

    assert!(matches!(model.add_sensor(3, 0.0, 0.0), Err(LrModelError::SensorOutOfRange { id: 3, n_sensors: 3 })));
    assert!(matches!(model.add_sensor(0, 5.0, 5.0), Err(LrModelError::SensorAlreadyAdded(0))));
    assert!(matches!(model.get_x(1), Err(LrModelError::SensorNotAdded(1))));
    assert!(model.get_all_x().is_err());
    assert!(!model.is_complete());

    model.add_sensor(1, -1.0, 0.0).expect("in range");
    assert!(model.is_complete());
    assert_eq!(model.get_all_x().expect("complete"), vec![1.0, -1.0, 0.0]);
    assert_eq!(model.get_distance(0, 1).expect("added"), 2.0);
    assert_eq!(model.get_radius(2).expect("added"), 2.0);
    assert_eq!(model.get_phi(1).expect("added"), PI);
    assert!((model.get_phi(2).expect("added") - 1.5 * PI).abs() < 1e-12);

    // No default LRF
    assert!(matches!(model.get_lrf(0), Err(LrModelError::NoLrf(0))));
}

#[test]
fn test_model_group_slots() {
    let mut model: LrModel = LrModel::with_default_lrf(4, axial_prototype());
    for id in 0..4 {
        model.add_sensor(id, id as f64, 0.0).expect("in range");
    }

    let gid_a: usize = model.create_group();
    let gid_b: usize = model.create_group();
    let gid_c: usize = model.create_group();
    assert_eq!((gid_a, gid_b, gid_c), (0, 1, 2));

    model.add_to_group(0, gid_a, None).expect("valid");
    model.add_to_group(1, gid_b, None).expect("valid");
    model.add_to_group(2, gid_b, Some(Transform::Translate { dx: -1.0, dy: 0.0 })).expect("valid");
    model.add_to_group(3, gid_c, None).expect("valid");
    assert!(matches!(
        model.add_to_group(3, gid_a, None),
        Err(LrModelError::SensorAlreadyGrouped { id: 3, group_id: 2 })
    ));
    assert!(matches!(model.add_to_group(0, 7, None), Err(LrModelError::GroupNotFound(7))));

    // Removing the only member deletes the group, the other ids do not move
    assert!(model.remove_from_group(0, UngroupPolicy::KeepLrf).expect("valid"));
    assert!(!model.group_exists(gid_a));
    assert!(model.group_exists(gid_b));
    assert!(model.group_exists(gid_c));
    assert_eq!(model.group_ids(), vec![1, 2]);
    assert_eq!(model.get_group(3).expect("added"), Some(gid_c));
    assert!(!model.remove_from_group(0, UngroupPolicy::KeepLrf).expect("valid"));

    // The freed slot is reused
    let gid_d: usize = model.create_group();
    assert_eq!(gid_d, 0);
    assert_eq!(model.get_group_count(), 3);

    model.dissolve_group(gid_b).expect("exists");
    assert_eq!(model.get_group(1).expect("added"), None);
    assert_eq!(model.get_group(2).expect("added"), None);
    assert!(model.get_lrf(2).is_ok());
    // KeepLrf keeps the transform
    assert_eq!(model.get_transform(2).expect("added"), Some(&Transform::Translate { dx: -1.0, dy: 0.0 }));

    model.reset_groups().expect("valid");
    assert_eq!(model.get_group_count(), 0);
    for id in 0..4 {
        assert_eq!(model.get_group(id).expect("added"), None);
        assert!(model.get_lrf(id).is_ok());
    }
}

#[test]
fn test_model_ungroup_policy() {
    let mut model: LrModel = LrModel::new(2);
    model.add_sensor(0, 0.0, 0.0).expect("in range");
    model.add_sensor(1, 1.0, 0.0).expect("in range");

    let gid: usize = model.create_group();
    model.set_group_lrf(gid, axial_prototype()).expect("exists");
    model.add_to_group(0, gid, None).expect("valid");
    model.add_to_group(1, gid, Some(Transform::Rotate { phi: PI })).expect("valid");
    model.set_gain(1, 2.0).expect("added");

    // Without a default LRF the sensor is left without one
    model.remove_from_group(1, UngroupPolicy::ResetLrf).expect("valid");
    assert!(matches!(model.get_lrf(1), Err(LrModelError::NoLrf(1))));
    assert_eq!(model.get_gain(1).expect("added"), 1.0);
    assert_eq!(model.get_transform(1).expect("added"), None);

    model.set_default_lrf(Some(axial_prototype()));
    model.add_to_group(1, gid, None).expect("valid");
    model.remove_from_group(1, UngroupPolicy::ResetLrf).expect("valid");
    let lrf: &dyn Lrf = model.get_lrf(1).expect("default copy");
    let axial: &AxialLrf = lrf.as_any().downcast_ref::<AxialLrf>().expect("axial");
    assert_eq!(axial.get_origin(), (1.0, 0.0));
}

#[test]
fn test_model_eval_through_group() {
    use approx::assert_abs_diff_eq;

    // Two sensors related by a rotation of pi / 2 share one LRF centred on sensor 0
    let mut model: LrModel = LrModel::with_default_lrf(2, axial_prototype());
    model.add_sensor(0, 5.0, 0.0).expect("in range");
    model.add_sensor(1, 0.0, 5.0).expect("in range");
    let gid: usize = model.create_group_at(5.0, 0.0).expect("valid");
    model.add_to_group(0, gid, None).expect("valid");
    model.add_to_group(1, gid, Some(Transform::Rotate { phi: -PI / 2.0 })).expect("valid");

    let profile = |r: f64| 100.0 * (-r * r / 300.0).exp();
    let mut data_0: Vec<LrfData> = Vec::new();
    let mut data_1: Vec<LrfData> = Vec::new();
    for i_x in 0..60 {
        for i_y in 0..60 {
            let x: f64 = -25.0 + 0.85 * i_x as f64;
            let y: f64 = -25.0 + 0.85 * i_y as f64;
            data_0.push([x, y, 0.0, profile((x - 5.0).hypot(y))]);
            data_1.push([x, y, 0.0, 2.0 * profile(x.hypot(y - 5.0))]);
        }
    }
    model.set_gain(1, 2.0).expect("added");
    model.add_fit_data(0, &data_0).expect("valid");
    model.add_fit_data(1, &data_1).expect("valid");
    model.fit_group(gid).expect("fit succeeds");

    let precision: f64 = 0.5;
    let pos: [f64; 3] = [3.0, 4.0, 0.0];
    assert_abs_diff_eq!(model.eval(0, &pos).expect("valid"), profile((3.0f64 - 5.0).hypot(4.0)), epsilon = precision);
    assert_abs_diff_eq!(model.eval(1, &pos).expect("valid"), 2.0 * profile(3.0f64.hypot(4.0 - 5.0)), epsilon = precision);
    assert!(model.in_domain(1, &pos).expect("valid"));

    // Gradients are returned in the world frame
    let d_x: f64 = 1e-5;
    for id in 0..2 {
        let f = |x: f64, y: f64| model.eval(id, &[x, y, 0.0]).expect("valid");
        let fd_x: f64 = (f(3.0 + d_x, 4.0) - f(3.0 - d_x, 4.0)) / (2.0 * d_x);
        let fd_y: f64 = (f(3.0, 4.0 + d_x) - f(3.0, 4.0 - d_x)) / (2.0 * d_x);
        assert_abs_diff_eq!(model.eval_drv_x(id, &pos).expect("valid"), fd_x, epsilon = 1e-4);
        assert_abs_diff_eq!(model.eval_drv_y(id, &pos).expect("valid"), fd_y, epsilon = 1e-4);
    }

    // Farthest sample from (5, 0) is (-25, 25.15)
    assert_abs_diff_eq!(model.get_max_r(0, &data_0).expect("valid"), 30.0f64.hypot(25.15), epsilon = 1e-9);
    assert!(model.get_group_max_r(gid, &data_0).expect("valid") >= model.get_max_r(0, &data_0).expect("valid"));
}

#[test]
fn test_model_fitted_default_lrf_copied_unchanged() {
    let profile = |r: f64| 100.0 / (1.0 + (r / 10.0).powi(2));
    let mut data: Vec<LrfData> = Vec::new();
    for i_x in 0..80 {
        for i_y in 0..80 {
            let x: f64 = -29.5 + 0.75 * i_x as f64;
            let y: f64 = -29.5 + 0.75 * i_y as f64;
            data.push([x, y, 0.0, profile(x.hypot(y))]);
        }
    }
    let mut prototype: AxialLrf = AxialLrf::new(30.0, 10).expect("valid lrf");
    prototype.fit_data(&data).expect("fit succeeds");
    assert!(prototype.is_valid());
    let expected: f64 = prototype.eval(5.0, 0.0, 0.0);

    let mut model: LrModel = LrModel::with_default_lrf(2, Box::new(prototype));
    model.add_sensor(0, 0.0, 0.0).expect("in range");
    model.add_sensor(1, 4.0, 0.0).expect("in range");

    let is_copy = |lrf: &dyn Lrf| lrf.is_valid() && lrf.is_ready() && lrf.eval(5.0, 0.0, 0.0) == expected;

    // add_sensor
    assert!(is_copy(model.get_lrf(0).expect("default copy")));
    assert!(is_copy(model.get_lrf(1).expect("default copy")));

    // Both group constructors agree
    let gid_origin: usize = model.create_group();
    let gid_at: usize = model.create_group_at(4.0, 0.0).expect("valid");
    assert!(is_copy(model.get_group_lrf(gid_origin).expect("default copy")));
    assert!(is_copy(model.get_group_lrf(gid_at).expect("default copy")));

    // remove_from_group with ResetLrf
    model.add_to_group(1, gid_at, None).expect("valid");
    model.remove_from_group(1, UngroupPolicy::ResetLrf).expect("valid");
    assert!(is_copy(model.get_lrf(1).expect("default copy")));
}
