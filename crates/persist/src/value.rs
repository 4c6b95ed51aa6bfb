use crate::schema::Shape;
use glam::{Quat, Vec3};
use replaylog_common::Pose;

/// One channel's value for one frame: a shape tag plus its `f64` slots.
///
/// `f32` sources (glam types, [`Pose`]) widen to `f64` exactly, so they read
/// back bit-identical through the typed accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    shape: Shape,
    slots: Vec<f64>,
}

impl Value {
    /// Caller guarantees `slots.len() == shape.width()`.
    pub(crate) fn from_parts(shape: Shape, slots: Vec<f64>) -> Self {
        debug_assert_eq!(slots.len(), shape.width());
        Self { shape, slots }
    }

    pub fn scalar(v: f64) -> Self {
        Self::from_parts(Shape::Scalar, vec![v])
    }

    /// Flat array value; its shape is `Array(slots.len())`.
    pub fn array(slots: &[f64]) -> Self {
        let n = u32::try_from(slots.len()).unwrap_or(u32::MAX);
        Self {
            shape: Shape::Array(n),
            slots: slots.to_vec(),
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn slots(&self) -> &[f64] {
        &self.slots
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self.shape {
            Shape::Scalar => Some(self.slots[0]),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self.shape {
            Shape::Vector3 => Some(vec3(&self.slots)),
            _ => None,
        }
    }

    pub fn as_quat(&self) -> Option<Quat> {
        match self.shape {
            Shape::Quaternion => Some(quat(&self.slots)),
            _ => None,
        }
    }

    pub fn as_pose(&self) -> Option<Pose> {
        match self.shape {
            Shape::Pose => Some(Pose::new(vec3(&self.slots[..3]), quat(&self.slots[3..]))),
            _ => None,
        }
    }
}

fn vec3(s: &[f64]) -> Vec3 {
    Vec3::new(s[0] as f32, s[1] as f32, s[2] as f32)
}

fn quat(s: &[f64]) -> Quat {
    Quat::from_xyzw(s[0] as f32, s[1] as f32, s[2] as f32, s[3] as f32)
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::scalar(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::scalar(f64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::scalar(f64::from(v))
    }
}

/// Button-style flags record as 1.0 / 0.0.
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::scalar(if v { 1.0 } else { 0.0 })
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::from_parts(
            Shape::Vector3,
            vec![f64::from(v.x), f64::from(v.y), f64::from(v.z)],
        )
    }
}

impl From<Quat> for Value {
    fn from(q: Quat) -> Self {
        Value::from_parts(
            Shape::Quaternion,
            vec![
                f64::from(q.x),
                f64::from(q.y),
                f64::from(q.z),
                f64::from(q.w),
            ],
        )
    }
}

impl From<Pose> for Value {
    fn from(p: Pose) -> Self {
        Value::from_parts(
            Shape::Pose,
            p.to_array().iter().map(|&v| f64::from(v)).collect(),
        )
    }
}

impl From<&[f64]> for Value {
    fn from(slots: &[f64]) -> Self {
        Value::array(slots)
    }
}

impl From<Vec<f64>> for Value {
    fn from(slots: Vec<f64>) -> Self {
        Value::array(&slots)
    }
}

impl<const N: usize> From<[f64; N]> for Value {
    fn from(slots: [f64; N]) -> Self {
        Value::array(&slots)
    }
}
