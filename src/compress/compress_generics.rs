use crate::compress::dual_slope::dual_slope_from_json;
use serde_json::Value;
use std::fmt::Debug;

/// Monotone warp of a radial coordinate, `r -> rho(r)`
pub trait Compress1d: Debug + Send + Sync {
    fn clone_box(&self) -> Box<dyn Compress1d>;
    fn rho(&self, r: f64) -> f64;
    fn rho_drv(&self, r: f64) -> f64;
    /// Serialised form, carries a `method` discriminator
    fn to_json(&self) -> Value;
}

impl Clone for Box<dyn Compress1d> {
    fn clone(&self) -> Self {
        return self.clone_box();
    }
}

type CompressConstructor = fn(&Value) -> Option<Box<dyn Compress1d>>;

/// Known compression methods, keyed by the json `method` field
const COMPRESS_REGISTRY: &[(&str, CompressConstructor)] = &[("dualslope", dual_slope_from_json)];

/// Build a compression from its json form
///
/// # Returns
/// `None` for an unknown `method` or for invalid parameters
pub fn compress_from_json(json: &Value) -> Option<Box<dyn Compress1d>> {
    let method: &str = json.get("method")?.as_str()?;
    let (_name, constructor) = COMPRESS_REGISTRY.iter().find(|(name, _)| *name == method)?;
    return constructor(json);
}

#[test]
fn test_compress_factory() {
    let json: Value = serde_json::json!({"method": "dualslope", "r0": 7.0, "k": 10.0, "lam": 4.0});
    let compress: Box<dyn Compress1d> = compress_from_json(&json).expect("known method");
    assert_eq!(compress.to_json(), json);

    let unknown: Value = serde_json::json!({"method": "logarithmic", "r0": 7.0, "k": 10.0, "lam": 4.0});
    assert!(compress_from_json(&unknown).is_none());

    let invalid: Value = serde_json::json!({"method": "dualslope", "r0": -1.0, "k": 10.0, "lam": 4.0});
    assert!(compress_from_json(&invalid).is_none());

    let missing: Value = serde_json::json!({"method": "dualslope", "r0": 7.0, "k": 10.0});
    assert!(compress_from_json(&missing).is_none());

    assert!(compress_from_json(&serde_json::json!({"r0": 7.0})).is_none());
}
