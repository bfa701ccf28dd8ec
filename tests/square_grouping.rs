mod common;

use lrmodel_rs::LrModel;
use std::collections::BTreeSet;

#[test]
fn test_square_grouping_covers_every_sensor_once() {
    use approx::assert_abs_diff_eq;

    let mut model: LrModel = common::square_array(8, 1.0);
    let group_ids: Vec<usize> = model.make_groups_square().expect("valid");

    // Orbits of the square symmetry on an 8 x 8 grid: 4 on the diagonals, 6 off them
    assert_eq!(group_ids.len(), 10);
    let mut sizes: Vec<usize> = group_ids
        .iter()
        .map(|gid: &usize| model.get_group_members_count(*gid).expect("exists"))
        .collect();
    sizes.sort();
    assert_eq!(sizes, vec![4, 4, 4, 4, 8, 8, 8, 8, 8, 8]);

    // Union is the whole array, no sensor twice
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    for gid in group_ids.iter() {
        for id in model.group_members(*gid).expect("exists").iter() {
            assert!(seen.insert(*id), "sensor {} in two groups", id);
            assert_eq!(model.get_group(*id).expect("added"), Some(*gid));
        }
    }
    assert_eq!(seen.len(), 64);

    // Each transform carries its sensor onto the group reference point
    for id in 0..64 {
        let gid: usize = model.get_group(id).expect("added").expect("grouped");
        let x: f64 = model.get_x(id).expect("added");
        let y: f64 = model.get_y(id).expect("added");
        let (x1, y1): (f64, f64) = match model.get_transform(id).expect("added") {
            Some(transform) => transform.apply(x, y),
            None => (x, y),
        };
        assert_abs_diff_eq!(x1, model.get_group_x(gid).expect("exists"), epsilon = 1e-9);
        assert_abs_diff_eq!(y1, model.get_group_y(gid).expect("exists"), epsilon = 1e-9);
    }
}

#[test]
fn test_square_grouping_odd_grid_leaves_centre_alone() {
    // The centre of a 5 x 5 grid is its own orbit and is not grouped
    let mut model: LrModel = common::square_array(5, 2.0);
    let group_ids: Vec<usize> = model.make_groups_square().expect("valid");

    assert_eq!(model.get_group(12).expect("added"), None);
    let grouped: usize = group_ids
        .iter()
        .map(|gid: &usize| model.get_group_members_count(*gid).expect("exists"))
        .sum();
    assert_eq!(grouped, 24);

    // Second pass only sees the centre, which cannot form a group
    assert!(model.make_groups_square().expect("valid").is_empty());
    assert_eq!(model.get_group_count(), group_ids.len());
}

#[test]
fn test_dissolved_group_ids_stay_stable() {
    let mut model: LrModel = common::square_array(4, 1.0);
    let group_ids: Vec<usize> = model.make_groups_square().expect("valid");
    assert_eq!(group_ids, vec![0, 1, 2]);

    model.dissolve_group(1).expect("exists");
    assert_eq!(model.group_ids(), vec![0, 2]);
    assert_eq!(model.get_group_count(), 2);

    // The freed slot is reused, the others keep their ids
    let gid: usize = model.create_group();
    assert_eq!(gid, 1);
    let members_0: usize = model.get_group_members_count(0).expect("exists");
    let members_2: usize = model.get_group_members_count(2).expect("exists");
    assert_eq!(members_0 + members_2, 8);
}
