//! Transform cache.
//!
//! The server streams one transform per body per broadcast cycle. The client
//! keeps the two most recent per body so a renderer running at its own rate
//! can interpolate between them.

use std::collections::BTreeMap;

use simcast_shared::{
    math::Vec3,
    net::{BodyId, TransformUpdate},
};

#[derive(Debug, Clone, Copy)]
struct Entry {
    previous: Option<TransformUpdate>,
    latest: TransformUpdate,
}

/// Latest and previous transform per body.
#[derive(Debug, Default)]
pub struct TransformCache {
    bodies: BTreeMap<BodyId, Entry>,
    updates: u64,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: TransformUpdate) {
        self.updates += 1;
        self.bodies
            .entry(update.id)
            .and_modify(|e| {
                e.previous = Some(e.latest);
                e.latest = update;
            })
            .or_insert(Entry {
                previous: None,
                latest: update,
            });
    }

    /// Number of distinct bodies seen.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Total updates received, across all bodies.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn get(&self, id: BodyId) -> Option<&TransformUpdate> {
        self.bodies.get(&id).map(|e| &e.latest)
    }

    pub fn previous(&self, id: BodyId) -> Option<&TransformUpdate> {
        self.bodies.get(&id).and_then(|e| e.previous.as_ref())
    }

    /// Known body ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.bodies.keys().copied()
    }

    /// Position blended between the previous and latest update.
    ///
    /// `alpha` is clamped to $[0,1]$ where 0 = previous, 1 = latest. With only
    /// one update seen, that update's position is returned.
    pub fn interp_position(&self, id: BodyId, alpha: f32) -> Option<Vec3> {
        let entry = self.bodies.get(&id)?;
        let to = entry.latest.position;
        Some(match entry.previous {
            Some(prev) => prev.position.lerp(to, alpha.clamp(0.0, 1.0)),
            None => to,
        })
    }
}
