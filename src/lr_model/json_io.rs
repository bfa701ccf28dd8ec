use crate::errors::LrModelError;
use crate::lr_model::model::{DEFAULT_TOLERANCE, LrGroup, LrModel, LrSensor};
use crate::lrf::{Lrf, lrf_from_json};
use crate::transform::Transform;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

fn default_gain() -> f64 {
    return 1.0;
}

fn default_tolerance() -> f64 {
    return DEFAULT_TOLERANCE;
}

#[derive(Debug, Serialize, Deserialize)]
struct SensorJson {
    id: usize,
    /// -1 when ungrouped
    group_id: i64,
    x: f64,
    y: f64,
    #[serde(default = "default_gain")]
    gain: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<Transform>,
    #[serde(default, rename = "LRF", skip_serializing_if = "Option::is_none")]
    lrf: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupJson {
    id: usize,
    #[serde(default)]
    x0: f64,
    #[serde(default)]
    y0: f64,
    #[serde(default)]
    members: Vec<usize>,
    #[serde(default, rename = "LRF", skip_serializing_if = "Option::is_none")]
    lrf: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LrModelJson {
    n_sensors: usize,
    n_groups: usize,
    #[serde(default)]
    sensors: Vec<SensorJson>,
    #[serde(default)]
    groups: Vec<GroupJson>,
    #[serde(default = "default_tolerance")]
    tolerance: f64,
    #[serde(default, rename = "default_LRF", skip_serializing_if = "Option::is_none")]
    default_lrf: Option<Value>,
}

impl LrModel {
    /// Whole model as json
    ///
    /// Groups keep their slot ids, so `n_groups` counts slots rather than existing groups.
    /// A sensor carries its own `LRF` only when it is not grouped.
    pub fn to_json(&self) -> Value {
        let sensors: Vec<SensorJson> = self
            .sensors
            .iter()
            .flatten()
            .map(|sensor| SensorJson {
                id: sensor.id,
                group_id: sensor.group_id.map_or(-1, |gid| gid as i64),
                x: sensor.x,
                y: sensor.y,
                gain: sensor.gain,
                transform: sensor.transform,
                lrf: match (sensor.group_id, &sensor.lrf) {
                    (None, Some(lrf)) => Some(lrf.to_json()),
                    _ => None,
                },
            })
            .collect();

        let groups: Vec<GroupJson> = self
            .groups
            .iter()
            .flatten()
            .map(|group| GroupJson {
                id: group.id,
                x0: group.x0,
                y0: group.y0,
                members: group.members.iter().copied().collect(),
                lrf: group.lrf.as_ref().map(|lrf| lrf.to_json()),
            })
            .collect();

        let json: LrModelJson = LrModelJson {
            n_sensors: self.sensors.len(),
            n_groups: self.groups.len(),
            sensors,
            groups,
            tolerance: self.tolerance,
            default_lrf: self.default_lrf.as_ref().map(|lrf| lrf.to_json()),
        };

        return serde_json::to_value(json).unwrap_or(Value::Null);
    }

    pub fn to_json_string(&self) -> String {
        return self.to_json().to_string();
    }

    /// Read a model written by `to_json`
    ///
    /// Sensor and group records are keyed by their `id` and may come in any order.
    /// Fails on ids outside the declared counts, on invalid LRFs and when sensor and
    /// group memberships disagree.
    pub fn from_json(json: &Value) -> Result<Self, LrModelError> {
        let parsed: LrModelJson = serde_json::from_value(json.clone())?;

        let mut model: LrModel = LrModel::new(parsed.n_sensors);
        model.tolerance = parsed.tolerance;
        if let Some(default_json) = &parsed.default_lrf {
            model.default_lrf = Some(lrf_from_json(default_json)?);
        }
        model.groups = vec![None; parsed.n_groups];

        for record in parsed.sensors {
            model.read_sensor(record)?;
        }
        for record in parsed.groups {
            model.read_group(record)?;
        }
        model.check_membership()?;

        info!(
            "model read: {} sensors, {} groups",
            model.get_sensor_count(),
            model.get_group_count()
        );

        return Ok(model);
    }

    pub fn from_json_str(json_str: &str) -> Result<Self, LrModelError> {
        let json: Value = serde_json::from_str(json_str)?;
        return LrModel::from_json(&json);
    }

    pub fn save_json(&self, path: &Path) -> Result<(), LrModelError> {
        let json_string: String = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, json_string)?;
        return Ok(());
    }

    pub fn load_json(path: &Path) -> Result<Self, LrModelError> {
        let json_string: String = std::fs::read_to_string(path)?;
        return LrModel::from_json_str(&json_string);
    }

    fn read_sensor(&mut self, record: SensorJson) -> Result<(), LrModelError> {
        let id: usize = record.id;
        let n_sensors: usize = self.sensors.len();
        if id >= n_sensors {
            return Err(LrModelError::SensorOutOfRange { id, n_sensors });
        }

        let group_id: Option<usize> = if record.group_id < 0 { None } else { Some(record.group_id as usize) };
        let lrf: Option<Box<dyn Lrf>> = match (&record.lrf, group_id) {
            (Some(lrf_json), None) => Some(lrf_from_json(lrf_json)?),
            (Some(_), Some(_)) => {
                warn!("sensor {} is grouped, its private LRF is ignored", id);
                None
            }
            (None, _) => None,
        };

        self.sensors[id] = Some(LrSensor {
            id,
            x: record.x,
            y: record.y,
            gain: record.gain,
            group_id,
            transform: record.transform,
            lrf,
        });

        return Ok(());
    }

    fn read_group(&mut self, record: GroupJson) -> Result<(), LrModelError> {
        let gid: usize = record.id;
        if gid >= self.groups.len() {
            return Err(LrModelError::GroupNotFound(gid));
        }

        let lrf: Option<Box<dyn Lrf>> = match &record.lrf {
            Some(lrf_json) => Some(lrf_from_json(lrf_json)?),
            None => None,
        };

        self.groups[gid] = Some(LrGroup {
            id: gid,
            x0: record.x0,
            y0: record.y0,
            members: record.members.into_iter().collect::<BTreeSet<usize>>(),
            lrf,
        });

        return Ok(());
    }

    /// Every grouped sensor is listed by its group and every listed member points back
    fn check_membership(&self) -> Result<(), LrModelError> {
        for sensor in self.sensors.iter().flatten() {
            if let Some(gid) = sensor.group_id {
                let group: &LrGroup = self.group(gid)?;
                if !group.members.contains(&sensor.id) {
                    return Err(LrModelError::Inconsistent(format!(
                        "sensor {} points to group {} which does not list it",
                        sensor.id, gid
                    )));
                }
            }
        }

        for group in self.groups.iter().flatten() {
            if group.members.is_empty() {
                return Err(LrModelError::Inconsistent(format!("group {} has no members", group.id)));
            }
            for id in group.members.iter() {
                if self.sensor(*id)?.group_id != Some(group.id) {
                    return Err(LrModelError::Inconsistent(format!(
                        "group {} lists sensor {} which belongs elsewhere",
                        group.id, id
                    )));
                }
            }
        }

        return Ok(());
    }
}

#[test]
fn test_model_json_round_trip() {
    use crate::compress::DualSlopeCompress;
    use crate::lrf::{AxialLrf, LrfData};

    let mut prototype: AxialLrf = AxialLrf::new(25.0, 8).expect("valid lrf");
    prototype
        .set_compression(Some(Box::new(DualSlopeCompress::new(3.0, 6.0, 2.0).expect("valid compression"))))
        .expect("valid compression");

    let mut model: LrModel = LrModel::with_default_lrf(5, Box::new(prototype));
    let positions: [(f64, f64); 5] = [(-4.0, -4.0), (4.0, -4.0), (-4.0, 4.0), (4.0, 4.0), (0.0, 0.0)];
    for (id, (x, y)) in positions.iter().enumerate() {
        model.add_sensor(id, *x, *y).expect("in range");
    }
    model.make_groups_square().expect("valid");
    model.set_gain(2, 1.3).expect("added");
    assert_eq!(model.get_group(4).expect("added"), None);

    let mut data: Vec<LrfData> = Vec::new();
    for i_x in 0..50 {
        for i_y in 0..50 {
            data.push([-12.0 + 0.5 * i_x as f64, -12.0 + 0.5 * i_y as f64, 0.0, 0.0]);
        }
    }
    for id in 0..5 {
        let (x, y): (f64, f64) = positions[id];
        let sensor_data: Vec<LrfData> = data
            .iter()
            .map(|d| [d[0], d[1], 0.0, 50.0 / (1.0 + ((d[0] - x).powi(2) + (d[1] - y).powi(2)) / 40.0)])
            .collect();
        model.add_fit_data(id, &sensor_data).expect("valid");
    }
    for gid in model.group_ids() {
        model.fit_group(gid).expect("fit succeeds");
    }
    model.fit_sensor(4).expect("fit succeeds");

    let json_string: String = model.to_json_string();
    let restored: LrModel = LrModel::from_json_str(&json_string).expect("valid json");

    assert_eq!(restored.get_sensor_count(), 5);
    assert_eq!(restored.group_ids(), model.group_ids());
    assert_eq!(restored.get_gain(2).expect("added"), 1.3);
    assert_eq!(restored.to_json(), model.to_json());
    for id in 0..5 {
        assert_eq!(restored.get_transform(id).expect("added"), model.get_transform(id).expect("added"));
        for (x, y) in [(0.5, 0.5), (-3.0, 2.0), (7.0, -1.0), (10.0, 10.0)] {
            let pos: [f64; 3] = [x, y, 0.0];
            assert_eq!(restored.eval(id, &pos).expect("valid"), model.eval(id, &pos).expect("valid"));
        }
    }

    // Private LRFs are written only for ungrouped sensors
    let json: Value = model.to_json();
    for sensor in json["sensors"].as_array().expect("array") {
        assert_eq!(sensor.get("LRF").is_some(), sensor["group_id"] == -1);
    }
}

#[test]
fn test_model_json_inconsistent() {
    let json: Value = serde_json::json!({
        "n_sensors": 2,
        "n_groups": 1,
        "sensors": [
            {"id": 0, "group_id": 0, "x": 0.0, "y": 0.0, "gain": 1.0},
            {"id": 1, "group_id": -1, "x": 1.0, "y": 0.0, "gain": 1.0}
        ],
        "groups": [{"id": 0, "x0": 0.0, "y0": 0.0, "members": [0, 1]}]
    });
    assert!(matches!(LrModel::from_json(&json), Err(LrModelError::Inconsistent(_))));

    let out_of_range: Value = serde_json::json!({
        "n_sensors": 1,
        "n_groups": 0,
        "sensors": [{"id": 3, "group_id": -1, "x": 0.0, "y": 0.0}]
    });
    assert!(matches!(LrModel::from_json(&out_of_range), Err(LrModelError::SensorOutOfRange { id: 3, n_sensors: 1 })));

    let consistent: Value = serde_json::json!({
        "n_sensors": 2,
        "n_groups": 2,
        "sensors": [
            {"id": 1, "group_id": 1, "x": 1.0, "y": 0.0, "transform": {"type": "Rotate", "phi": 3.141592653589793}},
            {"id": 0, "group_id": 1, "x": -1.0, "y": 0.0}
        ],
        "groups": [{"id": 1, "x0": -1.0, "y0": 0.0, "members": [0, 1]}]
    });
    let model: LrModel = LrModel::from_json(&consistent).expect("valid json");
    assert_eq!(model.group_ids(), vec![1]);
    assert_eq!(model.get_gain(0).expect("added"), 1.0);
    assert!(!model.group_exists(0));
}
