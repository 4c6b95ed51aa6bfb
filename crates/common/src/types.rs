use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Identifier for a simulated body.
///
/// Ids are handed out sequentially so that a recorded run and its replay
/// agree on every body's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "body{:03}", self.0)
    }
}

/// Rigid pose: position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Pose at `position` with identity orientation.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Flattened `[px, py, pz, qx, qy, qz, qw]`.
    pub fn to_array(&self) -> [f32; 7] {
        let p = self.position;
        let q = self.orientation;
        [p.x, p.y, p.z, q.x, q.y, q.z, q.w]
    }

    pub fn from_array(a: [f32; 7]) -> Self {
        Self {
            position: Vec3::new(a[0], a[1], a[2]),
            orientation: Quat::from_xyzw(a[3], a[4], a[5], a[6]),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}
