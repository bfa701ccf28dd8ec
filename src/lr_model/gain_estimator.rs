use crate::errors::LrModelError;
use crate::lr_model::model::LrModel;
use crate::lrf::{Lrf, LrfData};
use crate::transform::Transform;
use std::collections::BTreeMap;

/// Accumulator of one group member
#[derive(Debug, Clone)]
struct MemberAccumulator {
    transform: Option<Transform>,
    lrf: Box<dyn Lrf>,
}

/// Relative gains of the members of one group
///
/// Every member accumulates its own calibration data into a private copy of the group LRF,
/// so all members are binned identically. Comparing the accumulated profiles gives the
/// scale factor between two members.
#[derive(Debug, Clone)]
pub struct GainEstimator {
    gid: usize,
    members: BTreeMap<usize, MemberAccumulator>,
}

impl GainEstimator {
    /// Bind to group `gid` of `model`
    ///
    /// The member transforms are copied, later changes to the model are not seen.
    pub fn new(model: &LrModel, gid: usize) -> Result<Self, LrModelError> {
        let group_lrf: &dyn Lrf = model.get_group_lrf(gid)?;

        let mut members: BTreeMap<usize, MemberAccumulator> = BTreeMap::new();
        for id in model.group_members(gid)?.iter() {
            let mut lrf: Box<dyn Lrf> = group_lrf.clone_box();
            lrf.clear_fit_data();
            let transform: Option<Transform> = model.get_transform(*id)?.copied();
            members.insert(*id, MemberAccumulator { transform, lrf });
        }

        return Ok(GainEstimator { gid, members });
    }

    pub fn get_group_id(&self) -> usize {
        return self.gid;
    }

    fn member(&self, id: usize) -> Result<&MemberAccumulator, LrModelError> {
        return self.members.get(&id).ok_or(LrModelError::NotGroupMember { id, group_id: self.gid });
    }

    /// Accumulate calibration samples of member `id`
    ///
    /// Positions are moved into the group frame, amplitudes are taken as measured.
    pub fn add_data(&mut self, id: usize, data: &[LrfData]) -> Result<(), LrModelError> {
        let gid: usize = self.gid;
        let member: &mut MemberAccumulator = self.members.get_mut(&id).ok_or(LrModelError::NotGroupMember { id, group_id: gid })?;

        let local_data: Vec<LrfData> = data
            .iter()
            .map(|sample| {
                let mut pos: [f64; 3] = [sample[0], sample[1], sample[2]];
                if let Some(transform) = &member.transform {
                    transform.transform(&mut pos);
                }
                [pos[0], pos[1], pos[2], sample[3]]
            })
            .collect();
        member.lrf.add_data(&local_data)?;

        return Ok(());
    }

    /// Gain of member `id` relative to member `ref_id`
    ///
    /// Computed as `lrf[ref_id].get_ratio(lrf[id])`, so a member twice as bright as the
    /// reference gives 2.0. This is the reciprocal of `lrf[id].get_ratio(lrf[ref_id])`.
    ///
    /// # Returns
    /// -1.0 when the accumulated data do not allow an estimate
    pub fn get_relative_gain(&self, id: usize, ref_id: usize) -> Result<f64, LrModelError> {
        let member: &MemberAccumulator = self.member(id)?;
        let reference: &MemberAccumulator = self.member(ref_id)?;
        return Ok(reference.lrf.get_ratio(&*member.lrf));
    }

    /// Gain of every member relative to member `ref_id`, keyed by sensor id
    pub fn get_all_relative_gains(&self, ref_id: usize) -> Result<BTreeMap<usize, f64>, LrModelError> {
        let mut gains: BTreeMap<usize, f64> = BTreeMap::new();
        for id in self.members.keys() {
            gains.insert(*id, self.get_relative_gain(*id, ref_id)?);
        }
        return Ok(gains);
    }
}

#[test]
fn test_gain_estimator() {
    use crate::lrf::AxialLrf;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    // Four sensors on a ring, related by rotations
    let mut model: LrModel = LrModel::with_default_lrf(5, Box::new(AxialLrf::new(30.0, 10).expect("valid lrf")));
    for id in 0..4 {
        let phi: f64 = id as f64 * PI / 2.0;
        model.add_sensor(id, 8.0 * phi.cos(), 8.0 * phi.sin()).expect("in range");
    }
    model.add_sensor(4, 0.0, 0.0).expect("in range");
    let group_ids: Vec<usize> = model.make_groups_by_radius().expect("valid");
    assert_eq!(group_ids.len(), 1);
    let gid: usize = group_ids[0];

    let true_gains: [f64; 4] = [1.0, 1.25, 0.8, 2.0];
    let mut estimator: GainEstimator = GainEstimator::new(&model, gid).expect("group with lrf");

    // A flood on a grid symmetric under rotations by pi / 2
    for id in 0..4 {
        let x0: f64 = model.get_x(id).expect("added");
        let y0: f64 = model.get_y(id).expect("added");
        let mut data: Vec<LrfData> = Vec::new();
        for i_x in 0..=80 {
            for i_y in 0..=80 {
                let x: f64 = -20.0 + 0.5 * i_x as f64;
                let y: f64 = -20.0 + 0.5 * i_y as f64;
                let r2: f64 = (x - x0).powi(2) + (y - y0).powi(2);
                data.push([x, y, 0.0, true_gains[id] * 100.0 * (-r2 / 200.0).exp()]);
            }
        }
        estimator.add_data(id, &data).expect("member");
    }

    let precision: f64 = 5e-3;
    let gains: BTreeMap<usize, f64> = estimator.get_all_relative_gains(0).expect("member");
    assert_eq!(gains.len(), 4);
    for id in 0..4 {
        assert_abs_diff_eq!(gains[&id], true_gains[id], epsilon = precision);
    }
    assert_abs_diff_eq!(estimator.get_relative_gain(0, 3).expect("member"), 0.5, epsilon = precision);

    // Not a member
    assert!(matches!(estimator.add_data(4, &[]), Err(LrModelError::NotGroupMember { id: 4, .. })));
    assert!(estimator.get_relative_gain(4, 0).is_err());

    // Nothing accumulated yet
    let fresh: GainEstimator = GainEstimator::new(&model, gid).expect("group with lrf");
    assert_eq!(fresh.get_relative_gain(1, 0).expect("member"), -1.0);
}
