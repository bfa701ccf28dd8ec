use crate::errors::LrfError;
use crate::lrf::axial::axial_from_json;
use serde_json::Value;
use std::any::Any;
use std::fmt::Debug;

/// One calibration sample: `[x, y, z, amplitude]`
pub type LrfData = [f64; 4];

/// Light response function: expected sensor signal as a function of event position
///
/// An LRF is only usable for reconstruction once `is_valid()`, i.e. after a successful
/// fit or after being read from json with a fitted response.
pub trait Lrf: Debug + Send + Sync {
    /// Type discriminator written to json
    fn lrf_type(&self) -> &'static str;
    fn clone_box(&self) -> Box<dyn Lrf>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn in_domain(&self, x: f64, y: f64, z: f64) -> bool;
    fn eval(&self, x: f64, y: f64, z: f64) -> f64;
    fn eval_drv_x(&self, x: f64, y: f64, z: f64) -> f64;
    fn eval_drv_y(&self, x: f64, y: f64, z: f64) -> f64;

    /// Fit the response to `data` in one go, replacing the current response on success
    fn fit_data(&mut self, data: &[LrfData]) -> Result<(), LrfError>;
    /// Accumulate `data` for a later `do_fit`
    fn add_data(&mut self, data: &[LrfData]) -> Result<(), LrfError>;
    /// Fit the data accumulated with `add_data`
    fn do_fit(&mut self) -> Result<(), LrfError>;
    /// Drop the data accumulated with `add_data`
    fn clear_fit_data(&mut self);

    fn is_valid(&self) -> bool;
    fn is_ready(&self) -> bool;

    fn get_rmax(&self) -> f64;
    fn get_xmin(&self) -> f64;
    fn get_xmax(&self) -> f64;
    fn get_ymin(&self) -> f64;
    fn get_ymax(&self) -> f64;
    fn get_zmin(&self) -> f64;
    fn get_zmax(&self) -> f64;

    fn set_binned(&mut self, binned: bool);
    fn set_non_negative(&mut self, non_negative: bool);

    /// Least squares scale factor between the data accumulated by `other` and by `self`
    ///
    /// # Returns
    /// `sum(z_self * z_other) / sum(z_self^2)` over the histogram bins filled in both,
    /// or -1.0 when the two accumulators cannot be compared
    fn get_ratio(&self, other: &dyn Lrf) -> f64;

    fn to_json(&self) -> Value;
}

impl Clone for Box<dyn Lrf> {
    fn clone(&self) -> Self {
        return self.clone_box();
    }
}

type LrfConstructor = fn(&Value) -> Result<Box<dyn Lrf>, LrfError>;

/// Known LRF types, keyed by the json `type` field
const LRF_REGISTRY: &[(&str, LrfConstructor)] = &[("Axial", axial_from_json)];

/// Build an LRF from its json form
pub fn lrf_from_json(json: &Value) -> Result<Box<dyn Lrf>, LrfError> {
    let lrf_type: &str = json
        .get("type")
        .and_then(|value| value.as_str())
        .ok_or_else(|| LrfError::Json("missing 'type'".to_string()))?;

    let (_name, constructor) = LRF_REGISTRY
        .iter()
        .find(|(name, _)| *name == lrf_type)
        .ok_or_else(|| LrfError::UnknownType(lrf_type.to_string()))?;

    return constructor(json);
}

#[test]
fn test_lrf_factory() {
    let json: Value = serde_json::json!({
        "type": "Axial",
        "rmax": 50.0,
        "response": {"bspline3": {"xmin": 0.0, "xmax": 50.0, "intervals": 2, "data": [5.0, 4.0, 3.0, 2.0, 1.0]}}
    });
    let lrf: Box<dyn Lrf> = lrf_from_json(&json).expect("known type");
    assert_eq!(lrf.lrf_type(), "Axial");
    assert!(lrf.is_valid());

    let unknown: Value = serde_json::json!({"type": "Sliced3D", "rmax": 50.0});
    assert_eq!(lrf_from_json(&unknown).err(), Some(LrfError::UnknownType("Sliced3D".to_string())));

    assert!(lrf_from_json(&serde_json::json!({"rmax": 50.0})).is_err());
}
