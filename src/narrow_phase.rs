//! Narrow Phase
//!
//! Turns broad phase candidate pairs into contact manifolds. Each pair walks
//! a short pipeline: the `allow_contact_generation` callback can reject it
//! (and tune its speculative margin), compound and mesh shapes recurse into
//! per-child convex pairs, continuous pairs run a conservative-advancement
//! sweep so contacts are generated at the predicted configuration, and a
//! configure callback gets the last word on the pair's contacts and material
//! before constraints are built. Convex pairs go through
//! `configure_contact_manifold`; compound and mesh pairs aggregate their
//! child manifolds into one multi-normal manifold and go through
//! `configure_nonconvex_contact_manifold` once.
//!
//! Pair work carries no shared mutable state; workers process disjoint pair
//! ranges into per-worker scratch and the caller merges scratch in pair
//! order, so results do not depend on thread scheduling.
//!
//! # Features
//!
//! - User callbacks for filtering and material assignment
//! - Compound/mesh recursion through per-shape acceleration trees
//! - Speculative contacts out to a per-pair margin
//! - Conservative advancement for `Continuous` collidables
//!
//! Author: Moroya Sakamoto

use crate::bodies::{BodyVelocity, ContinuousDetection, ContinuousDetectionMode};
use crate::broad_phase::Aabb;
use crate::ccd::conservative_advancement;
use crate::collision::{convex_ref, generate_contacts, ContactManifold, PlacedConvex};
use crate::contact::PairKey;
use crate::error::PhysicsError;
use crate::handles::{CollidableReference, TypedIndex};
use crate::math::{RigidPose, Vec3};
use crate::shapes::{ShapeCatalog, COMPOUND, MESH};

// ============================================================================
// Materials
// ============================================================================

/// Soft constraint response parameters.
///
/// `twice_damping_ratio` is stored pre-doubled because that is the form the
/// solver consumes every substep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpringSettings {
    /// Natural frequency in hertz
    pub frequency: f32,
    /// Two times the damping ratio
    pub twice_damping_ratio: f32,
}

impl SpringSettings {
    /// Construct from frequency and (undoubled) damping ratio.
    pub fn new(frequency: f32, damping_ratio: f32) -> Self {
        Self {
            frequency,
            twice_damping_ratio: damping_ratio * 2.0,
        }
    }

    /// Damping ratio in its conventional form.
    pub fn damping_ratio(&self) -> f32 {
        self.twice_damping_ratio * 0.5
    }
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self::new(30.0, 1.0)
    }
}

/// Contact response parameters, set per manifold by the callbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactMaterial {
    /// Coulomb friction coefficient
    pub friction_coefficient: f32,
    /// Cap on the velocity the penetration bias may request
    pub maximum_recovery_velocity: f32,
    /// Contact softness
    pub spring_settings: SpringSettings,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            friction_coefficient: 1.0,
            maximum_recovery_velocity: 2.0,
            spring_settings: SpringSettings::default(),
        }
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// One point of an aggregated nonconvex manifold. Unlike convex manifold
/// points, each carries its own normal because the points come from
/// different children of a compound or mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NonconvexContactPoint {
    /// World position of the contact
    pub position: Vec3,
    /// World normal, pointing from the first collidable toward the second
    pub normal: Vec3,
    /// Penetration depth (negative for speculative)
    pub depth: f32,
    /// Feature id within the owning child manifold
    pub feature_id: u32,
}

/// Aggregated view of every child manifold a compound or mesh pair
/// produced this tick. Depth edits made by the configure callback are
/// written back to the underlying child manifolds.
#[derive(Clone, Debug, Default)]
pub struct NonconvexContactManifold {
    /// All contact points, in child order
    pub points: Vec<NonconvexContactPoint>,
}

impl NonconvexContactManifold {
    /// Number of points across all children.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the pair produced any contacts at all.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// An unordered collidable pair as presented to the callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollidablePair {
    /// First collidable, in broad phase order
    pub a: CollidableReference,
    /// Second collidable
    pub b: CollidableReference,
}

/// User hooks into the narrow phase. Invoked concurrently from multiple
/// workers with distinct worker indices; implementations must be
/// `Send + Sync`.
pub trait NarrowPhaseCallbacks: Send + Sync {
    /// Called once before the first timestep that uses these callbacks.
    fn initialize(&mut self, _worker_count: usize) {}

    /// Whether a candidate pair should generate contacts at all. The
    /// speculative margin starts at the pair's collidable-derived value and
    /// may be rewritten.
    fn allow_contact_generation(
        &self,
        worker: usize,
        pair: CollidablePair,
        speculative_margin: &mut f32,
    ) -> bool;

    /// Per-child filter for compound and mesh pairs.
    fn allow_contact_generation_between_children(
        &self,
        _worker: usize,
        _pair: CollidablePair,
        _child_a: u32,
        _child_b: u32,
    ) -> bool {
        true
    }

    /// Final say on a convex pair's manifold and its material. Returning
    /// false discards the manifold.
    fn configure_contact_manifold(
        &self,
        worker: usize,
        pair: CollidablePair,
        manifold: &mut ContactManifold,
        material: &mut ContactMaterial,
    ) -> bool;

    /// Final say on a compound or mesh pair: one call sees every child's
    /// contacts with their per-child normals and sets the material shared
    /// by all of them. Depth edits are applied; returning false discards
    /// the whole pair.
    fn configure_nonconvex_contact_manifold(
        &self,
        _worker: usize,
        _pair: CollidablePair,
        _manifold: &mut NonconvexContactManifold,
        _material: &mut ContactMaterial,
    ) -> bool {
        true
    }

    /// Adjust one child manifold of a compound or mesh pair before the
    /// pair-level configuration runs.
    fn configure_child_contact_manifold(
        &self,
        _worker: usize,
        _pair: CollidablePair,
        _child_a: u32,
        _child_b: u32,
        _manifold: &mut ContactManifold,
    ) -> bool {
        true
    }
}

/// Accepts every pair and applies one uniform material.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultNarrowPhaseCallbacks {
    /// Material applied to every contact
    pub material: ContactMaterial,
}

impl NarrowPhaseCallbacks for DefaultNarrowPhaseCallbacks {
    fn allow_contact_generation(
        &self,
        _worker: usize,
        _pair: CollidablePair,
        _speculative_margin: &mut f32,
    ) -> bool {
        true
    }

    fn configure_contact_manifold(
        &self,
        _worker: usize,
        _pair: CollidablePair,
        _manifold: &mut ContactManifold,
        material: &mut ContactMaterial,
    ) -> bool {
        *material = self.material;
        true
    }

    fn configure_nonconvex_contact_manifold(
        &self,
        _worker: usize,
        _pair: CollidablePair,
        _manifold: &mut NonconvexContactManifold,
        material: &mut ContactMaterial,
    ) -> bool {
        *material = self.material;
        true
    }
}

// ============================================================================
// Pair processing
// ============================================================================

/// Resolved per-collidable state handed to the pair pipeline. Statics use a
/// zero velocity and their configured continuity.
#[derive(Clone, Copy, Debug)]
pub struct CollidableData {
    /// Identity in the broad phase
    pub reference: CollidableReference,
    /// Shape catalog entry
    pub shape: TypedIndex,
    /// World pose
    pub pose: RigidPose,
    /// World velocity; zero for statics
    pub velocity: BodyVelocity,
    /// Continuity settings
    pub continuity: ContinuousDetection,
    /// Speed-clamped speculative margin
    pub speculative_margin: f32,
}

/// One manifold ready for constraint construction. The manifold normal
/// points from `a` toward `b`.
#[derive(Clone, Copy, Debug)]
pub struct PairContacts {
    /// Canonical cache key (pair plus child indices)
    pub key: PairKey,
    /// First collidable, in the order the manifold was generated
    pub a: CollidableReference,
    /// Second collidable
    pub b: CollidableReference,
    /// Contact manifold
    pub manifold: ContactManifold,
    /// Material assigned by the callbacks
    pub material: ContactMaterial,
}

/// One child's manifold, gathered during recursion before the pair-level
/// configure callback runs.
#[derive(Clone, Copy, Debug)]
struct ChildManifold {
    child_a: u32,
    child_b: u32,
    manifold: ContactManifold,
}

/// Run one candidate pair through the full pipeline, appending any
/// resulting manifolds to `out`.
pub fn process_pair<C: NarrowPhaseCallbacks>(
    callbacks: &C,
    worker: usize,
    catalog: &ShapeCatalog,
    a: &CollidableData,
    b: &CollidableData,
    dt: f32,
    out: &mut Vec<PairContacts>,
) -> Result<(), PhysicsError> {
    let pair = CollidablePair {
        a: a.reference,
        b: b.reference,
    };
    let mut margin = a.speculative_margin.max(b.speculative_margin);
    if !callbacks.allow_contact_generation(worker, pair, &mut margin) {
        return Ok(());
    }
    let mut children = Vec::new();
    collide_shapes(
        callbacks, worker, catalog, pair, a, b, a.shape, &a.pose, 0, b.shape, &b.pose, 0, margin,
        dt, &mut children,
    )?;
    if children.is_empty() {
        return Ok(());
    }

    if is_composite(a.shape) || is_composite(b.shape) {
        // Aggregate every child's points so the callback sees the whole
        // pair at once, normals included
        let mut aggregate = NonconvexContactManifold::default();
        for child in &children {
            for i in 0..child.manifold.count as usize {
                let point = child.manifold.points[i];
                aggregate.points.push(NonconvexContactPoint {
                    position: point.position,
                    normal: child.manifold.normal,
                    depth: point.depth,
                    feature_id: point.feature_id,
                });
            }
        }
        let mut material = ContactMaterial::default();
        if !callbacks.configure_nonconvex_contact_manifold(worker, pair, &mut aggregate, &mut material)
        {
            return Ok(());
        }
        // Depth edits flow back to the child manifolds the constraints are
        // built from
        let mut cursor = 0;
        for child in &mut children {
            for i in 0..child.manifold.count as usize {
                if cursor >= aggregate.points.len() {
                    break;
                }
                child.manifold.points[i].depth = aggregate.points[cursor].depth;
                cursor += 1;
            }
        }
        for child in children {
            let (key, _) = PairKey::new(a.reference, b.reference, child.child_a, child.child_b);
            out.push(PairContacts {
                key,
                a: a.reference,
                b: b.reference,
                manifold: child.manifold,
                material,
            });
        }
    } else {
        // Convex pairs produce exactly one manifold
        for child in children {
            let mut manifold = child.manifold;
            let mut material = ContactMaterial::default();
            if !callbacks.configure_contact_manifold(worker, pair, &mut manifold, &mut material)
                || manifold.count == 0
            {
                continue;
            }
            let (key, _) = PairKey::new(a.reference, b.reference, child.child_a, child.child_b);
            out.push(PairContacts {
                key,
                a: a.reference,
                b: b.reference,
                manifold,
                material,
            });
        }
    }
    Ok(())
}

/// Recursive shape-vs-shape dispatch. Compounds and meshes peel one level
/// per call; convex leaves generate a manifold and run the per-child
/// callbacks. The pair-level configure callback runs on the gathered result.
#[allow(clippy::too_many_arguments)]
fn collide_shapes<C: NarrowPhaseCallbacks>(
    callbacks: &C,
    worker: usize,
    catalog: &ShapeCatalog,
    pair: CollidablePair,
    a: &CollidableData,
    b: &CollidableData,
    shape_a: TypedIndex,
    pose_a: &RigidPose,
    child_a: u32,
    shape_b: TypedIndex,
    pose_b: &RigidPose,
    child_b: u32,
    margin: f32,
    dt: f32,
    out: &mut Vec<ChildManifold>,
) -> Result<(), PhysicsError> {
    match (shape_a.shape_type(), shape_b.shape_type()) {
        (COMPOUND, _) => {
            let compound = catalog.compound(shape_a)?;
            let query = local_query_bounds(pose_a, &catalog.compute_bounds(shape_b, pose_b)?, margin);
            let mut children = Vec::new();
            compound.tree.query_callback(&query, |i| children.push(i));
            children.sort_unstable();
            for i in children {
                if !callbacks.allow_contact_generation_between_children(worker, pair, i, child_b) {
                    continue;
                }
                let child = &compound.children[i as usize];
                let child_pose = pose_a.compose(child.local_pose);
                collide_shapes(
                    callbacks, worker, catalog, pair, a, b, child.shape, &child_pose, i, shape_b,
                    pose_b, child_b, margin, dt, out,
                )?;
            }
            Ok(())
        }
        (_, COMPOUND) => {
            let compound = catalog.compound(shape_b)?;
            let query = local_query_bounds(pose_b, &catalog.compute_bounds(shape_a, pose_a)?, margin);
            let mut children = Vec::new();
            compound.tree.query_callback(&query, |i| children.push(i));
            children.sort_unstable();
            for i in children {
                if !callbacks.allow_contact_generation_between_children(worker, pair, child_a, i) {
                    continue;
                }
                let child = &compound.children[i as usize];
                let child_pose = pose_b.compose(child.local_pose);
                collide_shapes(
                    callbacks, worker, catalog, pair, a, b, shape_a, pose_a, child_a, child.shape,
                    &child_pose, i, margin, dt, out,
                )?;
            }
            Ok(())
        }
        (MESH, _) => {
            let mesh = catalog.mesh(shape_a)?;
            let query = local_query_bounds(pose_a, &catalog.compute_bounds(shape_b, pose_b)?, margin);
            let mut triangles = Vec::new();
            mesh.tree.query_callback(&query, |i| triangles.push(i));
            triangles.sort_unstable();
            for i in triangles {
                if !callbacks.allow_contact_generation_between_children(worker, pair, i, child_b) {
                    continue;
                }
                let triangle = mesh.triangles[i as usize];
                let placed_a = PlacedConvex {
                    shape: crate::collision::ConvexRef::Triangle(&triangle),
                    pose: *pose_a,
                };
                let placed_b = PlacedConvex {
                    shape: convex_ref(catalog, shape_b)?,
                    pose: *pose_b,
                };
                let manifold = generate_contacts(&placed_a, &placed_b, margin);
                gather_child(callbacks, worker, pair, i, child_b, true, manifold, out);
            }
            Ok(())
        }
        (_, MESH) => {
            let mesh = catalog.mesh(shape_b)?;
            let query = local_query_bounds(pose_b, &catalog.compute_bounds(shape_a, pose_a)?, margin);
            let mut triangles = Vec::new();
            mesh.tree.query_callback(&query, |i| triangles.push(i));
            triangles.sort_unstable();
            for i in triangles {
                if !callbacks.allow_contact_generation_between_children(worker, pair, child_a, i) {
                    continue;
                }
                let triangle = mesh.triangles[i as usize];
                let placed_a = PlacedConvex {
                    shape: convex_ref(catalog, shape_a)?,
                    pose: *pose_a,
                };
                let placed_b = PlacedConvex {
                    shape: crate::collision::ConvexRef::Triangle(&triangle),
                    pose: *pose_b,
                };
                let manifold = generate_contacts(&placed_a, &placed_b, margin);
                gather_child(callbacks, worker, pair, child_a, i, true, manifold, out);
            }
            Ok(())
        }
        _ => {
            let ref_a = convex_ref(catalog, shape_a)?;
            let ref_b = convex_ref(catalog, shape_b)?;
            let (mut pose_at, mut pose_bt) = (*pose_a, *pose_b);
            if let Some(sweep) = sweep_settings(a, b) {
                let toi = conservative_advancement(
                    &ref_a,
                    pose_a,
                    a.velocity.linear,
                    a.velocity.angular,
                    &ref_b,
                    pose_b,
                    b.velocity.linear,
                    b.velocity.angular,
                    dt,
                    sweep.0,
                    sweep.1,
                );
                if let Some(toi) = toi {
                    // Generate contacts at the predicted configuration
                    pose_at.position += a.velocity.linear * (toi.t * dt);
                    pose_bt.position += b.velocity.linear * (toi.t * dt);
                }
            }
            let placed_a = PlacedConvex {
                shape: ref_a,
                pose: pose_at,
            };
            let placed_b = PlacedConvex {
                shape: ref_b,
                pose: pose_bt,
            };
            let manifold = generate_contacts(&placed_a, &placed_b, margin);
            let is_child = is_composite(a.shape) || is_composite(b.shape);
            gather_child(callbacks, worker, pair, child_a, child_b, is_child, manifold, out);
            Ok(())
        }
    }
}

fn is_composite(shape: TypedIndex) -> bool {
    matches!(shape.shape_type(), COMPOUND | MESH)
}

/// Sweep parameters when either collidable asks for continuous detection.
fn sweep_settings(a: &CollidableData, b: &CollidableData) -> Option<(f32, f32)> {
    let mut result: Option<(f32, f32)> = None;
    for c in [&a.continuity, &b.continuity] {
        if c.mode == ContinuousDetectionMode::Continuous {
            result = Some(match result {
                Some((min_step, threshold)) => (
                    min_step.min(c.minimum_sweep_timestep),
                    threshold.min(c.sweep_convergence_threshold),
                ),
                None => (c.minimum_sweep_timestep, c.sweep_convergence_threshold),
            });
        }
    }
    result
}

/// Run the per-child hook on a freshly generated manifold and gather it for
/// the pair-level callback. Top-level convex manifolds skip the child hook.
#[allow(clippy::too_many_arguments)]
fn gather_child<C: NarrowPhaseCallbacks>(
    callbacks: &C,
    worker: usize,
    pair: CollidablePair,
    child_a: u32,
    child_b: u32,
    is_child: bool,
    mut manifold: ContactManifold,
    out: &mut Vec<ChildManifold>,
) {
    if manifold.count == 0 {
        return;
    }
    if is_child
        && !callbacks.configure_child_contact_manifold(worker, pair, child_a, child_b, &mut manifold)
    {
        return;
    }
    if manifold.count == 0 {
        return;
    }
    out.push(ChildManifold {
        child_a,
        child_b,
        manifold,
    });
}

/// Conservative transform of a world AABB into a shape's local frame,
/// expanded by the speculative margin.
fn local_query_bounds(pose: &RigidPose, world: &Aabb, margin: f32) -> Aabb {
    let corners = [
        Vec3::new(world.min.x, world.min.y, world.min.z),
        Vec3::new(world.max.x, world.min.y, world.min.z),
        Vec3::new(world.min.x, world.max.y, world.min.z),
        Vec3::new(world.max.x, world.max.y, world.min.z),
        Vec3::new(world.min.x, world.min.y, world.max.z),
        Vec3::new(world.max.x, world.min.y, world.max.z),
        Vec3::new(world.min.x, world.max.y, world.max.z),
        Vec3::new(world.max.x, world.max.y, world.max.z),
    ];
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for corner in corners {
        let local = pose.inverse_transform(corner);
        min = min.min(local);
        max = max.max(local);
    }
    let pad = Vec3::splat(margin);
    Aabb::new(min - pad, max + pad)
}
