use glam::{Quat, Vec3};
use replaylog_common::{BodyId, Pose, SessionSettings};
use std::cell::Cell;
use std::collections::BTreeMap;

/// Scale of the per-step velocity jitter drawn from the world seed.
const JITTER_SCALE: f32 = 0.01;

/// A simulated body. Bodies only rotate about +z.
#[derive(Debug, Clone)]
pub struct Body {
    position: Vec3,
    velocity: Vec3,
    /// Heading in radians.
    yaw: f32,
    /// Angular velocity about +z, rad/s.
    spin: f32,
    /// Pose derived from position and heading, computed on first access
    /// after a mutation.
    pose_cache: Cell<Option<Pose>>,
}

impl Body {
    pub fn new(position: Vec3, spin: f32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            spin,
            pose_cache: Cell::new(None),
        }
    }

    /// Current pose. Cached until the body is next stepped or moved.
    pub fn pose(&self) -> Pose {
        if let Some(pose) = self.pose_cache.get() {
            return pose;
        }
        let pose = Pose::new(self.position, Quat::from_rotation_z(self.yaw));
        self.pose_cache.set(Some(pose));
        pose
    }

    /// Whether a pose is currently cached.
    pub fn pose_cached(&self) -> bool {
        self.pose_cache.get().is_some()
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn invalidate(&mut self) {
        self.pose_cache.set(None);
    }
}

/// The simulated world.
///
/// Uses BTreeMap for deterministic iteration order. Given the same settings
/// and sequence of impulses, two worlds step through identical states.
#[derive(Debug, Clone)]
pub struct World {
    bodies: BTreeMap<BodyId, Body>,
    tick: u64,
    /// Advanced with splitmix64 every step.
    seed: u64,
    next_id: u32,
    timestep: f32,
    gravity: f32,
    restitution: f32,
}

impl World {
    /// Build a world from session settings, spawning `body_count` bodies
    /// at fixed starting positions.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let mut world = Self {
            bodies: BTreeMap::new(),
            tick: 0,
            seed: settings.seed,
            next_id: 0,
            timestep: settings.timestep,
            gravity: settings.gravity,
            restitution: settings.restitution,
        };
        for i in 0..settings.body_count {
            let i = i as f32;
            world.spawn(Vec3::new(0.5 * i, 0.0, 1.0 + 0.25 * i), 0.5 + 0.1 * i);
        }
        tracing::debug!(
            bodies = world.bodies.len(),
            seed = world.seed,
            "world built from settings"
        );
        world
    }

    /// Current simulation tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Current RNG seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Read-only access to all bodies in id order.
    pub fn bodies(&self) -> &BTreeMap<BodyId, Body> {
        &self.bodies
    }

    pub fn get(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    /// Spawn a body at rest. Returns its id.
    pub fn spawn(&mut self, position: Vec3, spin: f32) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(id, Body::new(position, spin));
        id
    }

    /// Teleport a body. Only the heading of `pose.orientation` is kept.
    pub fn set_pose(&mut self, id: BodyId, pose: Pose) -> bool {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.position = pose.position;
            body.yaw = pose.orientation.to_euler(glam::EulerRot::ZYX).0;
            body.invalidate();
            true
        } else {
            false
        }
    }

    /// Advance one tick, pushing every body by `impulse` (m/s per step).
    pub fn step(&mut self, impulse: Vec3) {
        self.tick += 1;
        self.seed = splitmix64(self.seed);
        let dt = self.timestep;
        for (id, body) in self.bodies.iter_mut() {
            let jitter = jitter(self.seed, *id);
            body.velocity += impulse + Vec3::new(jitter, -jitter, 0.0);
            body.velocity.z -= self.gravity * dt;
            body.position += body.velocity * dt;
            if body.position.z < 0.0 {
                body.position.z = -body.position.z;
                body.velocity.z = -body.velocity.z * self.restitution;
            }
            body.yaw = (body.yaw + body.spin * dt).rem_euclid(std::f32::consts::TAU);
            body.invalidate();
        }
    }

    /// Deterministic hash of the world state, in canonical id order.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, &self.tick.to_le_bytes());
        mix(&mut h, &self.seed.to_le_bytes());
        for (id, body) in &self.bodies {
            mix(&mut h, &id.0.to_le_bytes());
            for v in [body.position, body.velocity] {
                mix(&mut h, &v.x.to_le_bytes());
                mix(&mut h, &v.y.to_le_bytes());
                mix(&mut h, &v.z.to_le_bytes());
            }
            mix(&mut h, &body.yaw.to_le_bytes());
        }
        h
    }
}

/// Small symmetric jitter in `[-JITTER_SCALE/2, JITTER_SCALE/2)` for one body.
fn jitter(seed: u64, id: BodyId) -> f32 {
    let bits = splitmix64(seed ^ u64::from(id.0));
    let unit = (bits >> 40) as f32 / (1u64 << 24) as f32;
    (unit - 0.5) * JITTER_SCALE
}

/// Splitmix64 step, used to advance the world seed each tick.
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(seed: u64) -> SessionSettings {
        SessionSettings {
            seed,
            body_count: 3,
            ..SessionSettings::default()
        }
    }

    #[test]
    fn world_from_settings_spawns_bodies() {
        let w = World::from_settings(&settings(1));
        assert_eq!(w.tick(), 0);
        assert_eq!(w.body_count(), 3);
        let ids: Vec<BodyId> = w.bodies().keys().copied().collect();
        assert_eq!(ids, vec![BodyId(0), BodyId(1), BodyId(2)]);
    }

    #[test]
    fn step_increments_tick() {
        let mut w = World::from_settings(&settings(1));
        w.step(Vec3::ZERO);
        w.step(Vec3::ZERO);
        w.step(Vec3::ZERO);
        assert_eq!(w.tick(), 3);
    }

    #[test]
    fn deterministic_same_seed_same_impulses() {
        let mut w1 = World::from_settings(&settings(42));
        let mut w2 = World::from_settings(&settings(42));
        for i in 0..200 {
            let impulse = Vec3::new((i % 7) as f32 * 0.01, 0.0, 0.0);
            w1.step(impulse);
            w2.step(impulse);
        }
        assert_eq!(w1.state_hash(), w2.state_hash());
        assert_eq!(w1.seed(), w2.seed());
    }

    #[test]
    fn different_seeds_diverge() {
        let mut w1 = World::from_settings(&settings(1));
        let mut w2 = World::from_settings(&settings(2));
        w1.step(Vec3::ZERO);
        w2.step(Vec3::ZERO);
        assert_ne!(w1.state_hash(), w2.state_hash());
    }

    #[test]
    fn different_impulses_diverge() {
        let mut w1 = World::from_settings(&settings(5));
        let mut w2 = World::from_settings(&settings(5));
        w1.step(Vec3::ZERO);
        w2.step(Vec3::X);
        assert_ne!(w1.state_hash(), w2.state_hash());
    }

    #[test]
    fn bodies_bounce_off_the_ground() {
        let mut w = World::from_settings(&settings(3));
        for _ in 0..2000 {
            w.step(Vec3::ZERO);
        }
        for body in w.bodies().values() {
            assert!(body.pose().position.z >= 0.0);
        }
    }

    #[test]
    fn pose_is_cached_until_step() {
        let mut w = World::from_settings(&settings(9));
        let id = BodyId(0);
        assert!(!w.get(id).unwrap().pose_cached());

        let first = w.get(id).unwrap().pose();
        assert!(w.get(id).unwrap().pose_cached());
        assert_eq!(w.get(id).unwrap().pose(), first);

        w.step(Vec3::ZERO);
        assert!(!w.get(id).unwrap().pose_cached());
        assert_ne!(w.get(id).unwrap().pose(), first);
    }

    #[test]
    fn set_pose_invalidates_cache() {
        let mut w = World::from_settings(&settings(9));
        let id = BodyId(1);
        let _ = w.get(id).unwrap().pose();

        let target = Pose::new(Vec3::new(3.0, 2.0, 1.0), Quat::from_rotation_z(0.25));
        assert!(w.set_pose(id, target));
        assert!(!w.get(id).unwrap().pose_cached());

        let pose = w.get(id).unwrap().pose();
        assert_eq!(pose.position, target.position);
        assert!(pose.orientation.angle_between(target.orientation) < 1e-5);
    }

    #[test]
    fn set_pose_unknown_body() {
        let mut w = World::from_settings(&settings(9));
        assert!(!w.set_pose(BodyId(99), Pose::default()));
    }
}
