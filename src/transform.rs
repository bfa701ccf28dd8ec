use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Planar coordinate transform applied to `[x, y, z]`
///
/// Used to map a sensor's local frame onto the reference frame of its symmetry group.
/// Rotations and reflections are about the origin, `z` is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transform {
    Translate { dx: f64, dy: f64 },
    /// Counter-clockwise rotation by `phi` radians
    Rotate { phi: f64 },
    /// Reflection across the line through the origin at angle `phi`
    Reflect { phi: f64 },
}

impl Transform {
    /// Apply the forward transform in place
    pub fn transform(&self, pos: &mut [f64; 3]) {
        let x: f64 = pos[0];
        let y: f64 = pos[1];
        match *self {
            Transform::Translate { dx, dy } => {
                pos[0] = x + dx;
                pos[1] = y + dy;
            }
            Transform::Rotate { phi } => {
                let (sin_phi, cos_phi): (f64, f64) = phi.sin_cos();
                pos[0] = x * cos_phi - y * sin_phi;
                pos[1] = x * sin_phi + y * cos_phi;
            }
            Transform::Reflect { phi } => {
                let (sin_2phi, cos_2phi): (f64, f64) = (2.0 * phi).sin_cos();
                pos[0] = x * cos_2phi + y * sin_2phi;
                pos[1] = x * sin_2phi - y * cos_2phi;
            }
        }
    }

    /// Transformed copy of `(x, y)`
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let mut pos: [f64; 3] = [x, y, 0.0];
        self.transform(&mut pos);
        return (pos[0], pos[1]);
    }

    /// Map a gradient taken in the transformed frame back to the original frame
    ///
    /// Multiplies by the transpose of the linear part of the transform.
    pub fn gradient_to_source(&self, grad_x: f64, grad_y: f64) -> (f64, f64) {
        return match *self {
            Transform::Translate { .. } => (grad_x, grad_y),
            Transform::Rotate { phi } => {
                let (sin_phi, cos_phi): (f64, f64) = phi.sin_cos();
                (cos_phi * grad_x + sin_phi * grad_y, -sin_phi * grad_x + cos_phi * grad_y)
            }
            Transform::Reflect { phi } => {
                let (sin_2phi, cos_2phi): (f64, f64) = (2.0 * phi).sin_cos();
                (cos_2phi * grad_x + sin_2phi * grad_y, sin_2phi * grad_x - cos_2phi * grad_y)
            }
        };
    }

    pub fn to_json(&self) -> Value {
        // Serialising a plain enum of floats cannot fail
        return serde_json::to_value(self).unwrap_or(Value::Null);
    }

    /// # Returns
    /// `None` for an unknown `type` or missing parameters
    pub fn from_json(json: &Value) -> Option<Transform> {
        return serde_json::from_value(json.clone()).ok();
    }
}

#[test]
fn test_transform_rotate() {
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    let precision: f64 = 1e-12;
    let rotate: Transform = Transform::Rotate { phi: PI / 2.0 };
    let mut pos: [f64; 3] = [1.0, 0.0, 3.0];
    rotate.transform(&mut pos);
    assert_abs_diff_eq!(pos[0], 0.0, epsilon = precision);
    assert_abs_diff_eq!(pos[1], 1.0, epsilon = precision);
    assert_abs_diff_eq!(pos[2], 3.0, epsilon = precision);

    // Rotation preserves the radius
    let (x, y): (f64, f64) = Transform::Rotate { phi: 0.7 }.apply(3.0, -4.0);
    assert_abs_diff_eq!((x * x + y * y).sqrt(), 5.0, epsilon = precision);
}

#[test]
fn test_transform_reflect() {
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    let precision: f64 = 1e-12;

    // Across the x axis
    let (x, y): (f64, f64) = Transform::Reflect { phi: 0.0 }.apply(2.0, 3.0);
    assert_abs_diff_eq!(x, 2.0, epsilon = precision);
    assert_abs_diff_eq!(y, -3.0, epsilon = precision);

    // Across the y axis
    let (x, y): (f64, f64) = Transform::Reflect { phi: PI / 2.0 }.apply(2.0, 3.0);
    assert_abs_diff_eq!(x, -2.0, epsilon = precision);
    assert_abs_diff_eq!(y, 3.0, epsilon = precision);

    // Across the diagonal swaps the coordinates
    let (x, y): (f64, f64) = Transform::Reflect { phi: PI / 4.0 }.apply(2.0, 3.0);
    assert_abs_diff_eq!(x, 3.0, epsilon = precision);
    assert_abs_diff_eq!(y, 2.0, epsilon = precision);

    // Reflecting twice is the identity
    let reflect: Transform = Transform::Reflect { phi: 0.3 };
    let (x1, y1): (f64, f64) = reflect.apply(-1.5, 0.25);
    let (x2, y2): (f64, f64) = reflect.apply(x1, y1);
    assert_abs_diff_eq!(x2, -1.5, epsilon = precision);
    assert_abs_diff_eq!(y2, 0.25, epsilon = precision);
}

#[test]
fn test_transform_json() {
    let translate: Transform = Transform::Translate { dx: -1.0, dy: 2.5 };
    let json: Value = translate.to_json();
    assert_eq!(json, serde_json::json!({"type": "Translate", "dx": -1.0, "dy": 2.5}));
    assert_eq!(Transform::from_json(&json), Some(translate));

    let reflect: Transform = Transform::Reflect { phi: 0.125 };
    assert_eq!(Transform::from_json(&reflect.to_json()), Some(reflect));

    assert_eq!(Transform::from_json(&serde_json::json!({"type": "Shear", "s": 1.0})), None);
    assert_eq!(Transform::from_json(&serde_json::json!({"type": "Rotate"})), None);
}

#[test]
fn test_transform_gradient_to_source() {
    use approx::assert_abs_diff_eq;

    // f(u, v) = 3 u + 5 v evaluated in the transformed frame
    let f_local = |u: f64, v: f64| 3.0 * u + 5.0 * v;
    let transforms: Vec<Transform> = vec![
        Transform::Translate { dx: 1.0, dy: -2.0 },
        Transform::Rotate { phi: 0.9 },
        Transform::Reflect { phi: -0.4 },
    ];

    let precision: f64 = 1e-6;
    let d_x: f64 = 1e-6;
    for transform in transforms {
        let f_source = |x: f64, y: f64| {
            let (u, v): (f64, f64) = transform.apply(x, y);
            f_local(u, v)
        };
        let (grad_x, grad_y): (f64, f64) = transform.gradient_to_source(3.0, 5.0);
        let fd_x: f64 = (f_source(0.3 + d_x, 0.7) - f_source(0.3 - d_x, 0.7)) / (2.0 * d_x);
        let fd_y: f64 = (f_source(0.3, 0.7 + d_x) - f_source(0.3, 0.7 - d_x)) / (2.0 * d_x);
        assert_abs_diff_eq!(grad_x, fd_x, epsilon = precision);
        assert_abs_diff_eq!(grad_y, fd_y, epsilon = precision);
    }
}
