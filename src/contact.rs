//! Contact Persistence Cache
//!
//! Contacts are regenerated from scratch every tick; what persists between
//! ticks is the accumulated impulse of each contact point, keyed by the
//! collidable pair (plus compound child indices) and the point's feature id.
//! A new manifold whose feature ids match last tick's gets those impulses
//! back as warm starts, which is what lets stacks come to rest instead of
//! jittering.
//!
//! Author: Moroya Sakamoto

use std::collections::HashMap;

use crate::collision::{ContactManifold, MAX_CONTACTS};
use crate::handles::CollidableReference;
use crate::math::Vec3;

/// Frames a cache entry survives without being refreshed. Covers sleeping
/// islands: their pairs stop refreshing but should warm start on wake.
const DEFAULT_STALE_FRAME_LIMIT: u32 = 64;

// ============================================================================
// Keys
// ============================================================================

/// Canonically ordered collidable pair plus compound child indices.
///
/// The pair is ordered so (a, b) and (b, a) share one entry; `flipped`
/// records whether the caller's order was swapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairKey {
    /// Lower collidable of the pair
    pub a: CollidableReference,
    /// Higher collidable of the pair
    pub b: CollidableReference,
    /// Child index within a's shape (0 for non-compounds)
    pub child_a: u32,
    /// Child index within b's shape (0 for non-compounds)
    pub child_b: u32,
}

impl PairKey {
    /// Build a canonical key. Returns the key and whether the inputs were
    /// swapped to canonicalize.
    pub fn new(
        a: CollidableReference,
        b: CollidableReference,
        child_a: u32,
        child_b: u32,
    ) -> (Self, bool) {
        if a.packed <= b.packed {
            (
                Self {
                    a,
                    b,
                    child_a,
                    child_b,
                },
                false,
            )
        } else {
            (
                Self {
                    a: b,
                    b: a,
                    child_a: child_b,
                    child_b: child_a,
                },
                true,
            )
        }
    }
}

// ============================================================================
// Cached impulses
// ============================================================================

/// Accumulated impulses of one contact point at the end of a solve.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CachedImpulse {
    /// Feature id the impulses belong to
    pub feature_id: u32,
    /// Accumulated normal impulse
    pub normal: f32,
    /// Accumulated friction impulse along the first tangent
    pub tangent1: f32,
    /// Accumulated friction impulse along the second tangent
    pub tangent2: f32,
}

/// Cache entry for one pair: up to four point impulses plus staleness.
#[derive(Clone, Copy, Debug, Default)]
pub struct CachedManifold {
    /// Impulses; only the first `count` are valid
    pub impulses: [CachedImpulse; MAX_CONTACTS],
    /// Valid impulse count
    pub count: u32,
    /// Frames since last refresh
    stale_frames: u32,
}

impl CachedManifold {
    /// Impulses for a feature id, if this entry carries them.
    pub fn impulse_for(&self, feature_id: u32) -> Option<CachedImpulse> {
        self.impulses[..self.count as usize]
            .iter()
            .find(|c| c.feature_id == feature_id)
            .copied()
    }
}

// ============================================================================
// ContactCache
// ============================================================================

/// Warm-start impulse cache across ticks.
#[derive(Clone, Debug)]
pub struct ContactCache {
    entries: HashMap<PairKey, CachedManifold>,
    /// Entries older than this many frames are dropped
    pub stale_frame_limit: u32,
}

impl Default for ContactCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            stale_frame_limit: DEFAULT_STALE_FRAME_LIMIT,
        }
    }

    /// Warm-start impulses for a fresh manifold: per point, the cached
    /// impulses of the matching feature id, or zero for unmatched (cold)
    /// points.
    pub fn warm_start(&self, key: &PairKey, manifold: &ContactManifold) -> [CachedImpulse; MAX_CONTACTS] {
        let mut result = [CachedImpulse::default(); MAX_CONTACTS];
        if let Some(entry) = self.entries.get(key) {
            for i in 0..manifold.count as usize {
                let feature_id = manifold.points[i].feature_id;
                if let Some(cached) = entry.impulse_for(feature_id) {
                    result[i] = cached;
                } else {
                    result[i].feature_id = feature_id;
                }
            }
        } else {
            for i in 0..manifold.count as usize {
                result[i].feature_id = manifold.points[i].feature_id;
            }
        }
        result
    }

    /// Store end-of-solve impulses for a pair, resetting its staleness.
    pub fn store(&mut self, key: PairKey, impulses: &[CachedImpulse]) {
        let mut entry = CachedManifold::default();
        for &impulse in impulses.iter().take(MAX_CONTACTS) {
            entry.impulses[entry.count as usize] = impulse;
            entry.count += 1;
        }
        self.entries.insert(key, entry);
    }

    /// Drop a pair outright (a body in it was removed).
    pub fn remove_pairs_with(&mut self, collidable: CollidableReference) {
        self.entries
            .retain(|key, _| key.a != collidable && key.b != collidable);
    }

    /// Advance one frame: age every entry whose pair has an awake side and
    /// drop the expired. Fully-asleep pairs stop aging so a long-sleeping
    /// island still warm starts on wake; statics count as asleep.
    pub fn next_frame<F>(&mut self, is_awake: F)
    where
        F: Fn(CollidableReference) -> bool,
    {
        let limit = self.stale_frame_limit;
        self.entries.retain(|key, entry| {
            if !is_awake(key.a) && !is_awake(key.b) {
                return true;
            }
            entry.stale_frames += 1;
            entry.stale_frames <= limit
        });
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Orthonormal tangent basis for a unit normal. The basis is a pure
/// function of the normal, so friction directions are reproducible.
pub fn tangent_frame(normal: Vec3) -> (Vec3, Vec3) {
    let t1 = if normal.x.abs() > 0.57735 {
        Vec3::new(normal.y, -normal.x, 0.0).normalize()
    } else {
        Vec3::new(0.0, normal.z, -normal.y).normalize()
    };
    let t2 = normal.cross(t1);
    (t1, t2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{BodyHandle, StaticHandle};

    fn body_ref(index: u32) -> CollidableReference {
        CollidableReference::body(BodyHandle::new(index, 0), false)
    }

    fn manifold_with_ids(ids: &[u32]) -> ContactManifold {
        let mut manifold = ContactManifold::EMPTY;
        manifold.normal = Vec3::UNIT_Y;
        for &id in ids {
            manifold.push(crate::collision::ContactPoint {
                position: Vec3::ZERO,
                depth: 0.01,
                feature_id: id,
            });
        }
        manifold
    }

    #[test]
    fn test_pair_key_canonical() {
        let a = body_ref(1);
        let b = body_ref(2);
        let (k1, flipped1) = PairKey::new(a, b, 0, 0);
        let (k2, flipped2) = PairKey::new(b, a, 0, 0);
        assert_eq!(k1, k2, "Order-independent key");
        assert!(!flipped1);
        assert!(flipped2);
    }

    #[test]
    fn test_child_indices_swap_with_pair() {
        let a = body_ref(1);
        let b = body_ref(2);
        let (k1, _) = PairKey::new(a, b, 3, 7);
        let (k2, _) = PairKey::new(b, a, 7, 3);
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_warm_start_matches_feature_ids() {
        let mut cache = ContactCache::new();
        let (key, _) = PairKey::new(body_ref(0), body_ref(1), 0, 0);
        cache.store(
            key,
            &[
                CachedImpulse {
                    feature_id: 10,
                    normal: 2.0,
                    tangent1: 0.5,
                    tangent2: -0.25,
                },
                CachedImpulse {
                    feature_id: 11,
                    normal: 1.0,
                    tangent1: 0.0,
                    tangent2: 0.0,
                },
            ],
        );

        // New manifold: one matching id, one new id
        let manifold = manifold_with_ids(&[11, 99]);
        let warm = cache.warm_start(&key, &manifold);
        assert_eq!(warm[0].normal, 1.0, "Matched feature keeps its impulse");
        assert_eq!(warm[1].normal, 0.0, "Unmatched feature starts cold");
        assert_eq!(warm[1].feature_id, 99);
    }

    #[test]
    fn test_unknown_pair_starts_cold() {
        let cache = ContactCache::new();
        let (key, _) = PairKey::new(body_ref(0), body_ref(1), 0, 0);
        let warm = cache.warm_start(&key, &manifold_with_ids(&[5]));
        assert_eq!(warm[0].normal, 0.0);
    }

    #[test]
    fn test_stale_expiry() {
        let mut cache = ContactCache::new();
        cache.stale_frame_limit = 2;
        let (key, _) = PairKey::new(body_ref(0), body_ref(1), 0, 0);
        cache.store(key, &[CachedImpulse::default()]);
        cache.next_frame(|_| true);
        cache.next_frame(|_| true);
        assert_eq!(cache.len(), 1, "Within the limit the entry survives");
        cache.next_frame(|_| true);
        assert!(cache.is_empty(), "Past the limit the entry expires");
    }

    #[test]
    fn test_sleeping_pair_does_not_age() {
        let mut cache = ContactCache::new();
        let (key, _) = PairKey::new(body_ref(0), body_ref(1), 0, 0);
        cache.store(
            key,
            &[CachedImpulse {
                feature_id: 4,
                normal: 3.0,
                tangent1: 0.0,
                tangent2: 0.0,
            }],
        );
        // Sleep far past the stale limit
        for _ in 0..(DEFAULT_STALE_FRAME_LIMIT + 10) {
            cache.next_frame(|_| false);
        }
        assert_eq!(cache.len(), 1, "Asleep pairs keep their impulses");
        let warm = cache.warm_start(&key, &manifold_with_ids(&[4]));
        assert_eq!(warm[0].normal, 3.0, "Wake warm starts from the slept impulse");
        // Once awake again the clock runs
        for _ in 0..(DEFAULT_STALE_FRAME_LIMIT + 1) {
            cache.next_frame(|_| true);
        }
        assert!(cache.is_empty(), "Awake staleness still expires");
    }

    #[test]
    fn test_refresh_resets_staleness() {
        let mut cache = ContactCache::new();
        cache.stale_frame_limit = 2;
        let (key, _) = PairKey::new(body_ref(0), body_ref(1), 0, 0);
        cache.store(key, &[CachedImpulse::default()]);
        cache.next_frame(|_| true);
        cache.next_frame(|_| true);
        cache.store(key, &[CachedImpulse::default()]);
        cache.next_frame(|_| true);
        cache.next_frame(|_| true);
        assert_eq!(cache.len(), 1, "Refreshed entry restarts its clock");
    }

    #[test]
    fn test_remove_pairs_with_collidable() {
        let mut cache = ContactCache::new();
        let s = CollidableReference::static_ref(StaticHandle::new(0, 0));
        let (k1, _) = PairKey::new(body_ref(0), body_ref(1), 0, 0);
        let (k2, _) = PairKey::new(body_ref(1), s, 0, 0);
        cache.store(k1, &[CachedImpulse::default()]);
        cache.store(k2, &[CachedImpulse::default()]);
        cache.remove_pairs_with(body_ref(0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tangent_frame_orthonormal() {
        for normal in [
            Vec3::UNIT_X,
            Vec3::UNIT_Y,
            Vec3::UNIT_Z,
            Vec3::new(0.6, -0.64, 0.48).normalize(),
        ] {
            let (t1, t2) = tangent_frame(normal);
            assert!(t1.dot(normal).abs() < 1e-6);
            assert!(t2.dot(normal).abs() < 1e-6);
            assert!(t1.dot(t2).abs() < 1e-6);
            assert!((t1.length() - 1.0).abs() < 1e-5);
            assert!((t2.length() - 1.0).abs() < 1e-5);
        }
    }
}
