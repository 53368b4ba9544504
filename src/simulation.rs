//! Timestep Orchestrator
//!
//! Owns every subsystem and runs the fixed-timestep loop. One `timestep` is
//! synchronous and blocking:
//!
//! 1. refit broad phase bounds from poses and velocities
//! 2. narrow phase over candidate pairs (waking sleeping islands touched by
//!    awake bodies)
//! 3. activity analysis and island sleep transitions
//! 4. substeps of integrate-velocities, warm start, velocity iterations,
//!    integrate poses
//! 5. finalize broad phase bounds
//!
//! Narrow phase pair work fans out across a [`ThreadDispatcher`] with
//! per-worker scratch; results merge in candidate order so a parallel run
//! matches the serial one.
//!
//! Author: Moroya Sakamoto

use std::sync::Mutex;

use crate::bodies::{Bodies, BodyDescription, BodyVelocity, ACTIVE_SET};
use crate::broad_phase::BroadPhase;
use crate::contact::ContactCache;
use crate::dispatcher::{SerialDispatcher, ThreadDispatcher};
use crate::error::PhysicsError;
use crate::handles::{BodyHandle, CollidableReference, ConstraintHandle, StaticHandle, TypedIndex};
use crate::integrator::{integrate_poses, integrate_velocities, PoseIntegratorCallbacks};
use crate::narrow_phase::{process_pair, CollidableData, NarrowPhaseCallbacks, PairContacts};
use crate::shapes::ShapeCatalog;
use crate::sleeping::{awaken, sleep_islands, update_sleep_candidacy};
use crate::solver::{SolveDescription, Solver};
use crate::statics::{StaticDescription, Statics};

/// A complete rigid body simulation.
pub struct Simulation<N: NarrowPhaseCallbacks, P: PoseIntegratorCallbacks> {
    /// Shape catalog shared by all collidables
    pub shapes: ShapeCatalog,
    /// All rigid bodies, active and sleeping
    pub bodies: Bodies,
    /// All statics
    pub statics: Statics,
    /// Incremental AABB tree over every collidable
    pub broad_phase: BroadPhase,
    /// Narrow phase hooks
    pub narrow_phase_callbacks: N,
    /// Integration hooks
    pub pose_integrator_callbacks: P,
    /// Solver stepping configuration
    pub solve_description: SolveDescription,
    solver: Solver,
    contact_cache: ContactCache,
    initialized: bool,
}

impl<N: NarrowPhaseCallbacks, P: PoseIntegratorCallbacks> Simulation<N, P> {
    /// Assemble a simulation from a shape catalog and callback sets.
    pub fn new(
        shapes: ShapeCatalog,
        narrow_phase_callbacks: N,
        pose_integrator_callbacks: P,
        solve_description: SolveDescription,
    ) -> Self {
        Self {
            shapes,
            bodies: Bodies::new(),
            statics: Statics::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase_callbacks,
            pose_integrator_callbacks,
            solve_description,
            solver: Solver::new(),
            contact_cache: ContactCache::new(),
            initialized: false,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Add a body and register it in the broad phase.
    pub fn add_body(&mut self, description: &BodyDescription) -> Result<BodyHandle, PhysicsError> {
        let handle = self.bodies.add(description)?;
        if description.collidable.shape.exists() {
            let bounds = self
                .shapes
                .compute_bounds(description.collidable.shape, &description.pose)?;
            let kinematic = description.local_inertia.is_kinematic();
            let reference = CollidableReference::body(handle, kinematic);
            let proxy = self.broad_phase.insert(bounds, reference.packed);
            let location = self.bodies.location(handle)?;
            self.bodies.sets[location.set as usize].collidables[location.index as usize]
                .broad_phase_proxy = proxy;
        }
        Ok(handle)
    }

    /// Remove a body, its broad phase proxy, and its cached contacts.
    /// Returns the final description.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<BodyDescription, PhysicsError> {
        // Wake the island first so neighbors resume simulation
        awaken(&mut self.bodies, handle);
        let location = self.bodies.location(handle)?;
        let kinematic = self.bodies.is_kinematic(handle)?;
        let proxy = self.bodies.sets[location.set as usize].collidables[location.index as usize]
            .broad_phase_proxy;
        if proxy != u32::MAX {
            self.broad_phase.remove(proxy);
        }
        self.contact_cache
            .remove_pairs_with(CollidableReference::body(handle, kinematic));
        self.bodies.remove(handle)
    }

    /// Add a static and register it in the broad phase.
    pub fn add_static(
        &mut self,
        description: &StaticDescription,
    ) -> Result<StaticHandle, PhysicsError> {
        let handle = self.statics.add(description)?;
        if description.shape.exists() {
            let bounds = self
                .shapes
                .compute_bounds(description.shape, &description.pose)?;
            let reference = CollidableReference::static_ref(handle);
            let proxy = self.broad_phase.insert(bounds, reference.packed);
            self.statics.get_mut(handle)?.broad_phase_proxy = proxy;
        }
        Ok(handle)
    }

    /// Remove a static, its broad phase proxy, and its cached contacts.
    pub fn remove_static(
        &mut self,
        handle: StaticHandle,
    ) -> Result<StaticDescription, PhysicsError> {
        let removed = self.statics.remove(handle)?;
        if removed.broad_phase_proxy != u32::MAX {
            self.broad_phase.remove(removed.broad_phase_proxy);
        }
        self.contact_cache
            .remove_pairs_with(CollidableReference::static_ref(handle));
        Ok(StaticDescription {
            pose: removed.pose,
            shape: removed.shape,
            continuity: removed.continuity,
        })
    }

    /// Remove a shape from the catalog.
    pub fn remove_shape(&mut self, index: TypedIndex) -> Result<(), PhysicsError> {
        self.shapes.remove(index)
    }

    /// Remove a shape and everything it owns (compound children cascade).
    pub fn remove_shape_recursively(&mut self, index: TypedIndex) -> Result<(), PhysicsError> {
        self.shapes.remove_recursively(index)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Snapshot a body's observable state.
    pub fn body_description(&self, handle: BodyHandle) -> Result<BodyDescription, PhysicsError> {
        self.bodies.get_description(handle)
    }

    /// Overwrite a body's observable state. Wakes the body's island; the
    /// broad phase follows the new pose.
    pub fn apply_body_description(
        &mut self,
        handle: BodyHandle,
        description: &BodyDescription,
    ) -> Result<(), PhysicsError> {
        awaken(&mut self.bodies, handle);
        self.bodies.apply_description(handle, description)?;
        self.refresh_body_bounds(handle)
    }

    /// Snapshot a static's observable state.
    pub fn static_description(
        &self,
        handle: StaticHandle,
    ) -> Result<StaticDescription, PhysicsError> {
        self.statics.get_description(handle)
    }

    /// Overwrite a static's observable state, refitting its proxy.
    pub fn apply_static_description(
        &mut self,
        handle: StaticHandle,
        description: &StaticDescription,
    ) -> Result<(), PhysicsError> {
        self.statics.apply_description(handle, description)?;
        let entry = self.statics.get(handle)?;
        if entry.broad_phase_proxy != u32::MAX {
            let bounds = self.shapes.compute_bounds(entry.shape, &entry.pose)?;
            self.broad_phase.update(entry.broad_phase_proxy, bounds);
        }
        Ok(())
    }

    /// Write a body's velocity. A velocity write wakes the island.
    pub fn set_body_velocity(
        &mut self,
        handle: BodyHandle,
        velocity: BodyVelocity,
    ) -> Result<(), PhysicsError> {
        awaken(&mut self.bodies, handle);
        let location = self.bodies.location(handle)?;
        self.bodies.sets[location.set as usize].motion[location.index as usize].velocity =
            velocity;
        Ok(())
    }

    /// Wake the island containing `handle`. Returns whether anything woke.
    pub fn awaken(&mut self, handle: BodyHandle) -> bool {
        awaken(&mut self.bodies, handle)
    }

    /// Live contact constraint count from the last timestep.
    pub fn contact_constraint_count(&self) -> usize {
        self.solver.constraint_count()
    }

    /// Constraints touching a body, as of the last timestep. Rebuilt every
    /// tick; the slice is valid only until the next structural mutation.
    pub fn body_constraints(
        &self,
        handle: BodyHandle,
    ) -> Result<&[ConstraintHandle], PhysicsError> {
        let location = self.bodies.location(handle)?;
        Ok(&self.bodies.sets[location.set as usize].constraints[location.index as usize])
    }

    // ========================================================================
    // Timestep
    // ========================================================================

    /// Advance the simulation by `dt` on the calling thread.
    pub fn timestep(&mut self, dt: f32) -> Result<(), PhysicsError> {
        self.timestep_with(dt, &SerialDispatcher)
    }

    /// Advance the simulation by `dt`, fanning narrow phase work across the
    /// dispatcher.
    pub fn timestep_with<D: ThreadDispatcher>(
        &mut self,
        dt: f32,
        dispatcher: &D,
    ) -> Result<(), PhysicsError> {
        if !(dt > 0.0) {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "timestep duration must be positive",
            });
        }
        if self.solve_description.substep_count == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "substep count must be nonzero",
            });
        }
        if !self.initialized {
            self.narrow_phase_callbacks
                .initialize(dispatcher.worker_count());
            self.initialized = true;
        }

        // Stage 1: refit broad phase from poses and velocities
        self.update_active_bounds(dt)?;

        // Stage 2: narrow phase
        let candidates = self.collect_candidates(dt)?;
        let pairs = self.run_narrow_phase(&candidates, dt, dispatcher)?;

        // Stage 3: activity analysis and island sleep
        update_sleep_candidacy(&mut self.bodies);
        let edges: Vec<(Option<u32>, Option<u32>)> = pairs
            .iter()
            .map(|pair| (self.active_index(pair.a), self.active_index(pair.b)))
            .collect();
        sleep_islands(&mut self.bodies, edges.into_iter());

        // Constraints materialize after sleep so body slots are stable;
        // pairs whose bodies just slept drop out (their impulses stay
        // cached for wake)
        let pairs: Vec<PairContacts> = pairs
            .into_iter()
            .filter(|pair| self.pair_is_awake(pair))
            .collect();
        let bodies = &self.bodies;
        self.contact_cache.next_frame(|collidable| {
            collidable.is_body() && bodies.is_awake(collidable.body_handle()).unwrap_or(false)
        });
        self.solver.prepare(
            &pairs,
            &self.bodies,
            &self.contact_cache,
            self.solve_description.fallback_batch_threshold,
        );
        self.rebuild_body_constraint_lists();

        // Stage 4: substeps
        let substep_dt = dt / self.solve_description.substep_count as f32;
        for substep in 0..self.solve_description.substep_count {
            integrate_velocities(
                &mut self.pose_integrator_callbacks,
                &mut self.bodies,
                substep_dt,
            );
            self.solver.warm_start(&mut self.bodies);
            for _ in 0..self.solve_description.iterations_for(substep) {
                self.solver.velocity_iteration(&mut self.bodies, substep_dt);
            }
            integrate_poses(&self.pose_integrator_callbacks, &mut self.bodies, substep_dt);
        }
        self.solver.store_impulses(&mut self.contact_cache);

        // Stage 5: finalize bounds at the integrated poses
        self.update_active_bounds(dt)?;
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Refit every active body's proxy to its current pose, expanded along
    /// its velocity. Discrete collidables cap the expansion at their
    /// speculative margin; other modes expand without bound.
    fn update_active_bounds(&mut self, dt: f32) -> Result<(), PhysicsError> {
        let set = &self.bodies.sets[ACTIVE_SET as usize];
        let mut updates = Vec::with_capacity(set.count());
        for i in 0..set.count() {
            let collidable = &set.collidables[i];
            if collidable.broad_phase_proxy == u32::MAX {
                continue;
            }
            let motion = &set.motion[i];
            let mut bounds = self
                .shapes
                .compute_bounds(collidable.shape, &motion.pose)?;
            let maximum_expansion = if collidable
                .continuity
                .allows_expansion_beyond_speculative_margin()
            {
                f32::MAX
            } else {
                collidable.speculative_margin(motion.velocity.linear.length(), dt)
            };
            bounds.expand_by_velocity(motion.velocity.linear, dt, maximum_expansion);
            updates.push((collidable.broad_phase_proxy, bounds));
        }
        for (proxy, bounds) in updates {
            self.broad_phase.update(proxy, bounds);
        }
        Ok(())
    }

    /// Broad phase candidates as resolved collidable data, in deterministic
    /// pair order. Wakes sleeping islands touched by awake bodies and skips
    /// pairs with no awake member.
    fn collect_candidates(
        &mut self,
        dt: f32,
    ) -> Result<Vec<(CollidableData, CollidableData)>, PhysicsError> {
        let raw = self.broad_phase.self_pairs();
        let mut candidates = Vec::with_capacity(raw.len());
        for (ud_a, ud_b) in raw {
            let ref_a = CollidableReference::from_packed(ud_a);
            let ref_b = CollidableReference::from_packed(ud_b);
            if !ref_a.is_body() && !ref_b.is_body() {
                continue;
            }
            let awake_a = self.reference_is_awake(ref_a)?;
            let awake_b = self.reference_is_awake(ref_b)?;
            match (awake_a, awake_b) {
                (false, false) => continue,
                (true, false) => {
                    if ref_b.is_body() {
                        awaken(&mut self.bodies, ref_b.body_handle());
                    }
                }
                (false, true) => {
                    if ref_a.is_body() {
                        awaken(&mut self.bodies, ref_a.body_handle());
                    }
                }
                (true, true) => {}
            }
            let a = self.resolve_collidable(ref_a, dt)?;
            let b = self.resolve_collidable(ref_b, dt)?;
            candidates.push((a, b));
        }
        Ok(candidates)
    }

    /// Process candidates across workers with per-worker scratch, merging
    /// results in candidate order.
    fn run_narrow_phase<D: ThreadDispatcher>(
        &self,
        candidates: &[(CollidableData, CollidableData)],
        dt: f32,
        dispatcher: &D,
    ) -> Result<Vec<PairContacts>, PhysicsError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let worker_count = dispatcher.worker_count().max(1);
        let chunk_size = candidates.len().div_ceil(worker_count);
        let scratch: Vec<Mutex<Vec<PairContacts>>> =
            (0..worker_count).map(|_| Mutex::new(Vec::new())).collect();
        let first_error: Mutex<Option<PhysicsError>> = Mutex::new(None);

        let callbacks = &self.narrow_phase_callbacks;
        let shapes = &self.shapes;
        dispatcher.dispatch(&|worker| {
            let start = worker * chunk_size;
            if start >= candidates.len() {
                return;
            }
            let end = (start + chunk_size).min(candidates.len());
            let mut local = Vec::new();
            for (a, b) in &candidates[start..end] {
                if let Err(error) = process_pair(callbacks, worker, shapes, a, b, dt, &mut local) {
                    if let Ok(mut slot) = first_error.lock() {
                        slot.get_or_insert(error);
                    }
                    return;
                }
            }
            if let Ok(mut slot) = scratch[worker].lock() {
                *slot = local;
            }
        });

        if let Ok(mut slot) = first_error.lock() {
            if let Some(error) = slot.take() {
                return Err(error);
            }
        }
        let mut merged = Vec::new();
        for worker_scratch in scratch {
            if let Ok(mut local) = worker_scratch.lock() {
                merged.append(&mut local);
            }
        }
        Ok(merged)
    }

    fn resolve_collidable(
        &self,
        reference: CollidableReference,
        dt: f32,
    ) -> Result<CollidableData, PhysicsError> {
        if reference.is_body() {
            let location = self.bodies.location(reference.body_handle())?;
            let set = &self.bodies.sets[location.set as usize];
            let i = location.index as usize;
            let motion = &set.motion[i];
            let collidable = &set.collidables[i];
            Ok(CollidableData {
                reference,
                shape: collidable.shape,
                pose: motion.pose,
                velocity: motion.velocity,
                continuity: collidable.continuity,
                speculative_margin: collidable
                    .speculative_margin(motion.velocity.linear.length(), dt),
            })
        } else {
            let entry = self.statics.get(reference.static_handle())?;
            Ok(CollidableData {
                reference,
                shape: entry.shape,
                pose: entry.pose,
                velocity: BodyVelocity::ZERO,
                continuity: entry.continuity,
                speculative_margin: 0.0,
            })
        }
    }

    fn reference_is_awake(&self, reference: CollidableReference) -> Result<bool, PhysicsError> {
        if reference.is_body() {
            self.bodies.is_awake(reference.body_handle())
        } else {
            // Statics never wake anything
            Ok(false)
        }
    }

    fn active_index(&self, reference: CollidableReference) -> Option<u32> {
        if !reference.is_body() {
            return None;
        }
        let location = self.bodies.location(reference.body_handle()).ok()?;
        (location.set == ACTIVE_SET).then_some(location.index)
    }

    fn pair_is_awake(&self, pair: &PairContacts) -> bool {
        let awake = |reference: CollidableReference| {
            reference.is_body()
                && self
                    .bodies
                    .is_awake(reference.body_handle())
                    .unwrap_or(false)
        };
        awake(pair.a) || awake(pair.b)
    }

    /// Rewrite every active body's constraint list from this tick's solver
    /// constraints.
    fn rebuild_body_constraint_lists(&mut self) {
        let active = &mut self.bodies.sets[ACTIVE_SET as usize];
        for list in &mut active.constraints {
            list.clear();
        }
        for (index, (a, b)) in self.solver.constraint_edges().enumerate() {
            let handle = ConstraintHandle::new(index as u32, 0);
            if let Some(a) = a {
                active.constraints[a as usize].push(handle);
            }
            if let Some(b) = b {
                active.constraints[b as usize].push(handle);
            }
        }
    }

    fn refresh_body_bounds(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        let location = self.bodies.location(handle)?;
        let set = &self.bodies.sets[location.set as usize];
        let i = location.index as usize;
        let proxy = set.collidables[i].broad_phase_proxy;
        if proxy == u32::MAX {
            return Ok(());
        }
        let bounds = self
            .shapes
            .compute_bounds(set.collidables[i].shape, &set.motion[i].pose)?;
        self.broad_phase.update(proxy, bounds);
        Ok(())
    }
}
