//! Demo simulation kernel: the driving loop that recordings are made from.
//!
//! # Invariants
//! - `World::step` is a pure function of (state, seed, impulse).
//! - Bodies iterate in `BodyId` order, so every run visits them identically.

pub mod world;

pub use world::{Body, World};
