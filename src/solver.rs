//! Constraint Solver
//!
//! Sequential-impulse contact solver with soft constraints. Constraints are
//! partitioned into conflict-free batches by greedy first-fit over body
//! occupancy in creation order; constraints that would open a batch beyond
//! `fallback_batch_threshold` land in a single fallback batch that is always
//! processed serially. Within a tick the solver runs per substep: warm start
//! from the accumulated impulses, then a fixed number of velocity iterations
//! (overridable per substep through the scheduler).
//!
//! Penetration response is soft: the spring settings derive a
//! position-error-to-velocity gain and a constraint-force-mixing scale, and
//! the recovery velocity is clamped by the material. Speculative contacts
//! (negative depth) bias by `depth/dt` instead, which permits approach right
//! up to the surface but no further.
//!
//! # Features
//!
//! - Greedy first-fit constraint batching with serial fallback
//! - Soft normal constraints (frequency / damping ratio form)
//! - Coulomb friction bounded by the accumulated normal impulse
//! - Warm starting from cached impulses
//!
//! Author: Moroya Sakamoto

use crate::bodies::Bodies;
use crate::collision::MAX_CONTACTS;
use crate::contact::{tangent_frame, CachedImpulse, ContactCache, PairKey};
use crate::handles::CollidableReference;
use crate::math::Vec3;
use crate::narrow_phase::{PairContacts, SpringSettings};

// ============================================================================
// Configuration
// ============================================================================

/// How many velocity iterations a substep runs; `None` falls back to the
/// solver-wide count.
pub type VelocityIterationScheduler = fn(substep_index: usize) -> Option<usize>;

/// Solver-wide stepping configuration.
#[derive(Clone, Copy, Debug)]
pub struct SolveDescription {
    /// Substeps per timestep
    pub substep_count: usize,
    /// Velocity iterations per substep
    pub velocity_iteration_count: usize,
    /// Batch index at or beyond which constraints go to the fallback batch
    pub fallback_batch_threshold: usize,
    /// Optional per-substep iteration override
    pub velocity_iteration_scheduler: Option<VelocityIterationScheduler>,
}

impl SolveDescription {
    /// Substeps and iterations with default batching.
    pub fn new(substep_count: usize, velocity_iteration_count: usize) -> Self {
        Self {
            substep_count,
            velocity_iteration_count,
            fallback_batch_threshold: 64,
            velocity_iteration_scheduler: None,
        }
    }

    /// Velocity iterations to run for a given substep.
    pub fn iterations_for(&self, substep_index: usize) -> usize {
        if let Some(scheduler) = self.velocity_iteration_scheduler {
            // Only a positive override applies; None or zero keeps the default
            if let Some(count) = scheduler(substep_index) {
                if count > 0 {
                    return count;
                }
            }
        }
        self.velocity_iteration_count
    }
}

impl Default for SolveDescription {
    fn default() -> Self {
        Self::new(1, 8)
    }
}

// ============================================================================
// Constraints
// ============================================================================

/// Per-point solve state.
#[derive(Clone, Copy, Debug, Default)]
struct ContactPointConstraint {
    /// Contact offset from body A's center
    offset_a: Vec3,
    /// Contact offset from body B's center
    offset_b: Vec3,
    /// Penetration depth (negative for speculative)
    depth: f32,
    /// Feature id for impulse caching
    feature_id: u32,
    /// Accumulated impulses
    normal_impulse: f32,
    tangent1_impulse: f32,
    tangent2_impulse: f32,
    /// Effective masses, fixed at prepare time
    normal_mass: f32,
    tangent1_mass: f32,
    tangent2_mass: f32,
}

/// One contact constraint: a manifold bound to solver body slots.
#[derive(Clone, Debug)]
pub struct ContactConstraint {
    /// Active-set index of body A; `None` for statics
    body_a: Option<u32>,
    /// Active-set index of body B; `None` for statics
    body_b: Option<u32>,
    /// Cache key for impulse persistence
    key: PairKey,
    /// Contact normal from A toward B
    normal: Vec3,
    tangent1: Vec3,
    tangent2: Vec3,
    points: [ContactPointConstraint; MAX_CONTACTS],
    point_count: usize,
    friction_coefficient: f32,
    maximum_recovery_velocity: f32,
    springs: SpringSettings,
}

/// Soft constraint gains for one substep length.
#[derive(Clone, Copy, Debug)]
struct Springiness {
    position_error_to_velocity: f32,
    effective_mass_cfm_scale: f32,
    softness_impulse_scale: f32,
}

fn compute_springiness(springs: &SpringSettings, dt: f32) -> Springiness {
    let angular_frequency = 2.0 * std::f32::consts::PI * springs.frequency;
    let frequency_dt = angular_frequency * dt;
    let position_error_to_velocity =
        angular_frequency / (frequency_dt + springs.twice_damping_ratio);
    let extra = 1.0 / (frequency_dt * (frequency_dt + springs.twice_damping_ratio));
    let effective_mass_cfm_scale = 1.0 / (1.0 + extra);
    Springiness {
        position_error_to_velocity,
        effective_mass_cfm_scale,
        softness_impulse_scale: extra * effective_mass_cfm_scale,
    }
}

// ============================================================================
// Solver
// ============================================================================

/// Contact constraint solver for the active body set.
#[derive(Debug, Default)]
pub struct Solver {
    constraints: Vec<ContactConstraint>,
    /// Conflict-free batches of constraint indices
    batches: Vec<Vec<u32>>,
    /// Serially processed overflow batch
    fallback: Vec<u32>,
}

impl Solver {
    /// Create an empty solver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live constraints.
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Number of conflict-free batches (excluding the fallback batch).
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Number of constraints routed to the fallback batch.
    pub fn fallback_count(&self) -> usize {
        self.fallback.len()
    }

    /// Rebuild constraints from this tick's manifolds. Warm-start impulses
    /// come from the cache; batches are assigned greedily in `pairs` order.
    pub fn prepare(
        &mut self,
        pairs: &[PairContacts],
        bodies: &Bodies,
        cache: &ContactCache,
        fallback_batch_threshold: usize,
    ) {
        self.constraints.clear();
        self.batches.clear();
        self.fallback.clear();

        for pair in pairs {
            let body_a = active_index(bodies, pair.a);
            let body_b = active_index(bodies, pair.b);
            // At least one side must respond to impulses
            let dynamic_a = body_a.map_or(false, |i| {
                !bodies.active().local_inertias[i as usize].is_kinematic()
            });
            let dynamic_b = body_b.map_or(false, |i| {
                !bodies.active().local_inertias[i as usize].is_kinematic()
            });
            if !dynamic_a && !dynamic_b {
                continue;
            }

            let warm = cache.warm_start(&pair.key, &pair.manifold);
            let (tangent1, tangent2) = tangent_frame(pair.manifold.normal);
            let mut constraint = ContactConstraint {
                body_a,
                body_b,
                key: pair.key,
                normal: pair.manifold.normal,
                tangent1,
                tangent2,
                points: [ContactPointConstraint::default(); MAX_CONTACTS],
                point_count: pair.manifold.count as usize,
                friction_coefficient: pair.material.friction_coefficient,
                maximum_recovery_velocity: pair.material.maximum_recovery_velocity,
                springs: pair.material.spring_settings,
            };

            let center_a = body_a
                .map(|i| bodies.active().motion[i as usize].pose.position)
                .unwrap_or(Vec3::ZERO);
            let center_b = body_b
                .map(|i| bodies.active().motion[i as usize].pose.position)
                .unwrap_or(Vec3::ZERO);

            for i in 0..constraint.point_count {
                let point = &pair.manifold.points[i];
                let offset_a = point.position - center_a;
                let offset_b = point.position - center_b;
                constraint.points[i] = ContactPointConstraint {
                    offset_a,
                    offset_b,
                    depth: point.depth,
                    feature_id: point.feature_id,
                    normal_impulse: warm[i].normal,
                    tangent1_impulse: warm[i].tangent1,
                    tangent2_impulse: warm[i].tangent2,
                    normal_mass: effective_mass(bodies, body_a, body_b, offset_a, offset_b, constraint.normal),
                    tangent1_mass: effective_mass(bodies, body_a, body_b, offset_a, offset_b, tangent1),
                    tangent2_mass: effective_mass(bodies, body_a, body_b, offset_a, offset_b, tangent2),
                };
            }

            let index = self.constraints.len() as u32;
            self.constraints.push(constraint);
            self.assign_batch(index, fallback_batch_threshold);
        }
    }

    /// Greedy first-fit: the lowest batch whose occupied bodies are disjoint
    /// from this constraint's, else the fallback batch.
    fn assign_batch(&mut self, constraint_index: u32, fallback_batch_threshold: usize) {
        let constraint = &self.constraints[constraint_index as usize];
        let bodies_of = |c: &ContactConstraint| (c.body_a, c.body_b);
        let (a, b) = bodies_of(constraint);

        'batches: for (batch_index, batch) in self.batches.iter_mut().enumerate() {
            if batch_index >= fallback_batch_threshold {
                break;
            }
            for &other_index in batch.iter() {
                let (oa, ob) = bodies_of(&self.constraints[other_index as usize]);
                let conflict = (a.is_some() && (a == oa || a == ob))
                    || (b.is_some() && (b == oa || b == ob));
                if conflict {
                    continue 'batches;
                }
            }
            batch.push(constraint_index);
            return;
        }
        if self.batches.len() < fallback_batch_threshold {
            self.batches.push(vec![constraint_index]);
        } else {
            self.fallback.push(constraint_index);
        }
    }

    /// Apply the accumulated impulses of every constraint to the current
    /// velocities. Run once at the start of each substep.
    pub fn warm_start(&mut self, bodies: &mut Bodies) {
        for index in batch_order(&self.batches, &self.fallback) {
            let constraint = &self.constraints[index as usize];
            for i in 0..constraint.point_count {
                let point = constraint.points[i];
                let impulse = constraint.normal * point.normal_impulse
                    + constraint.tangent1 * point.tangent1_impulse
                    + constraint.tangent2 * point.tangent2_impulse;
                apply_impulse(bodies, constraint.body_a, constraint.body_b, point.offset_a, point.offset_b, impulse);
            }
        }
    }

    /// One impulse-projection pass over every batch.
    pub fn velocity_iteration(&mut self, bodies: &mut Bodies, dt: f32) {
        let inv_dt = 1.0 / dt;
        for index in batch_order(&self.batches, &self.fallback) {
            let constraint = &mut self.constraints[index as usize];
            let springiness = compute_springiness(&constraint.springs, dt);

            for i in 0..constraint.point_count {
                let point = &mut constraint.points[i];

                // Closing velocity of A toward B along the normal
                let closing = closing_velocity(
                    bodies,
                    constraint.body_a,
                    constraint.body_b,
                    point.offset_a,
                    point.offset_b,
                    constraint.normal,
                );
                let bias = if point.depth >= 0.0 {
                    (point.depth * springiness.position_error_to_velocity)
                        .min(constraint.maximum_recovery_velocity)
                } else {
                    // Speculative: allow closing the gap within the substep
                    point.depth * inv_dt
                };
                let delta = point.normal_mass
                    * springiness.effective_mass_cfm_scale
                    * (closing + bias)
                    - springiness.softness_impulse_scale * point.normal_impulse;
                let new_impulse = (point.normal_impulse + delta).max(0.0);
                let applied = new_impulse - point.normal_impulse;
                point.normal_impulse = new_impulse;
                apply_impulse(
                    bodies,
                    constraint.body_a,
                    constraint.body_b,
                    point.offset_a,
                    point.offset_b,
                    constraint.normal * applied,
                );

                // Coulomb friction on both tangents, clamped together by the
                // accumulated normal impulse
                let limit = constraint.friction_coefficient * point.normal_impulse;
                let vt1 = closing_velocity(
                    bodies,
                    constraint.body_a,
                    constraint.body_b,
                    point.offset_a,
                    point.offset_b,
                    constraint.tangent1,
                );
                let vt2 = closing_velocity(
                    bodies,
                    constraint.body_a,
                    constraint.body_b,
                    point.offset_a,
                    point.offset_b,
                    constraint.tangent2,
                );
                let mut new_t1 = point.tangent1_impulse + point.tangent1_mass * vt1;
                let mut new_t2 = point.tangent2_impulse + point.tangent2_mass * vt2;
                let magnitude = (new_t1 * new_t1 + new_t2 * new_t2).sqrt();
                if magnitude > limit {
                    let scale = if magnitude > 0.0 { limit / magnitude } else { 0.0 };
                    new_t1 *= scale;
                    new_t2 *= scale;
                }
                let applied_t1 = new_t1 - point.tangent1_impulse;
                let applied_t2 = new_t2 - point.tangent2_impulse;
                point.tangent1_impulse = new_t1;
                point.tangent2_impulse = new_t2;
                apply_impulse(
                    bodies,
                    constraint.body_a,
                    constraint.body_b,
                    point.offset_a,
                    point.offset_b,
                    constraint.tangent1 * applied_t1 + constraint.tangent2 * applied_t2,
                );
            }
        }
    }

    /// Write this tick's accumulated impulses back to the cache.
    pub fn store_impulses(&self, cache: &mut ContactCache) {
        for constraint in &self.constraints {
            let mut impulses = [CachedImpulse::default(); MAX_CONTACTS];
            for i in 0..constraint.point_count {
                let point = &constraint.points[i];
                impulses[i] = CachedImpulse {
                    feature_id: point.feature_id,
                    normal: point.normal_impulse,
                    tangent1: point.tangent1_impulse,
                    tangent2: point.tangent2_impulse,
                };
            }
            cache.store(constraint.key, &impulses[..constraint.point_count]);
        }
    }

    /// Constraint edges as active-set index pairs, for island analysis.
    pub fn constraint_edges(&self) -> impl Iterator<Item = (Option<u32>, Option<u32>)> + '_ {
        self.constraints.iter().map(|c| (c.body_a, c.body_b))
    }
}

/// Fixed traversal order: batches in sequence, fallback last.
fn batch_order<'a>(batches: &'a [Vec<u32>], fallback: &'a [u32]) -> impl Iterator<Item = u32> + 'a {
    batches
        .iter()
        .flat_map(|batch| batch.iter().copied())
        .chain(fallback.iter().copied())
}

/// Active-set slot of a collidable, `None` for statics. Sleeping bodies
/// never reach the solver; the narrow phase wakes their islands first.
fn active_index(bodies: &Bodies, reference: CollidableReference) -> Option<u32> {
    if !reference.is_body() {
        return None;
    }
    let location = bodies.location(reference.body_handle()).ok()?;
    debug_assert_eq!(location.set, crate::bodies::ACTIVE_SET);
    Some(location.index)
}

/// Effective mass of a unit impulse along `direction` at the contact.
fn effective_mass(
    bodies: &Bodies,
    body_a: Option<u32>,
    body_b: Option<u32>,
    offset_a: Vec3,
    offset_b: Vec3,
    direction: Vec3,
) -> f32 {
    let set = bodies.active();
    let mut inverse = 0.0;
    if let Some(a) = body_a {
        let inertia = &set.world_inertias[a as usize];
        let arm = offset_a.cross(direction);
        inverse += inertia.inverse_mass + arm.dot(inertia.inverse_inertia.mul_vec(arm));
    }
    if let Some(b) = body_b {
        let inertia = &set.world_inertias[b as usize];
        let arm = offset_b.cross(direction);
        inverse += inertia.inverse_mass + arm.dot(inertia.inverse_inertia.mul_vec(arm));
    }
    if inverse > 0.0 {
        1.0 / inverse
    } else {
        0.0
    }
}

/// Velocity of A's contact point toward B's along `direction`.
fn closing_velocity(
    bodies: &Bodies,
    body_a: Option<u32>,
    body_b: Option<u32>,
    offset_a: Vec3,
    offset_b: Vec3,
    direction: Vec3,
) -> f32 {
    let set = bodies.active();
    let mut velocity = Vec3::ZERO;
    if let Some(a) = body_a {
        let motion = &set.motion[a as usize];
        velocity += motion.velocity.linear + motion.velocity.angular.cross(offset_a);
    }
    if let Some(b) = body_b {
        let motion = &set.motion[b as usize];
        velocity -= motion.velocity.linear + motion.velocity.angular.cross(offset_b);
    }
    velocity.dot(direction)
}

/// Apply `impulse` to B and its negation to A.
fn apply_impulse(
    bodies: &mut Bodies,
    body_a: Option<u32>,
    body_b: Option<u32>,
    offset_a: Vec3,
    offset_b: Vec3,
    impulse: Vec3,
) {
    let set = bodies.active_mut();
    if let Some(a) = body_a {
        let inertia = set.world_inertias[a as usize];
        let motion = &mut set.motion[a as usize];
        motion.velocity.linear -= impulse * inertia.inverse_mass;
        motion.velocity.angular -= inertia.inverse_inertia.mul_vec(offset_a.cross(impulse));
    }
    if let Some(b) = body_b {
        let inertia = set.world_inertias[b as usize];
        let motion = &mut set.motion[b as usize];
        motion.velocity.linear += impulse * inertia.inverse_mass;
        motion.velocity.angular += inertia.inverse_inertia.mul_vec(offset_b.cross(impulse));
    }
}
