//! Rigid Body Store
//!
//! Structure-of-arrays storage for every rigid body in a simulation. Bodies
//! live in [`BodySet`]s: set 0 holds all awake bodies, every higher slot
//! holds one sleeping island. A handle→location indirection keeps handles
//! stable across swap-removes and sleep transitions.
//!
//! # Layout
//!
//! - `MotionState`: pose + velocity, the hot integration data
//! - `BodyInertia`: local inverse inertia, with a cached world-frame copy
//!   recomputed whenever orientation changes
//! - `Collidable`: shape reference, speculative margin range, continuity
//! - `BodyActivity`: sleep threshold and candidacy counters
//!
//! Author: Moroya Sakamoto

use crate::error::PhysicsError;
use crate::handles::{BodyHandle, ConstraintHandle, HandleAllocator, TypedIndex};
use crate::math::{Mat3, RigidPose, Symmetric3, Vec3};

/// Set index of the active (awake) body set.
pub const ACTIVE_SET: u32 = 0;

// ============================================================================
// Continuity
// ============================================================================

/// How a collidable handles fast motion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum ContinuousDetectionMode {
    /// Speculative contacts only; bounds expansion is capped at the
    /// speculative margin. Cheap, may tunnel at extreme speeds.
    #[default]
    Discrete = 0,
    /// No sweeps of its own, but unbounded bounds expansion so sweep-tested
    /// collidables can find it.
    Passive = 1,
    /// Conservative-advancement sweeps estimate time of impact before
    /// contact generation.
    Continuous = 2,
}

/// Continuous collision detection settings for one collidable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContinuousDetection {
    /// Detection mode
    pub mode: ContinuousDetectionMode,
    /// Smallest sweep interval worth refining (Continuous only)
    pub minimum_sweep_timestep: f32,
    /// Sweep terminates when the impact-time bracket is narrower than this
    /// (Continuous only)
    pub sweep_convergence_threshold: f32,
}

impl ContinuousDetection {
    /// Discrete motion: speculative contacts only.
    pub const fn discrete() -> Self {
        Self {
            mode: ContinuousDetectionMode::Discrete,
            minimum_sweep_timestep: 0.0,
            sweep_convergence_threshold: 0.0,
        }
    }

    /// Passive: no sweeps, but visible to sweeping collidables.
    pub const fn passive() -> Self {
        Self {
            mode: ContinuousDetectionMode::Passive,
            minimum_sweep_timestep: 0.0,
            sweep_convergence_threshold: 0.0,
        }
    }

    /// Fully continuous detection with the given sweep tolerances.
    pub const fn continuous(minimum_sweep_timestep: f32, sweep_convergence_threshold: f32) -> Self {
        Self {
            mode: ContinuousDetectionMode::Continuous,
            minimum_sweep_timestep,
            sweep_convergence_threshold,
        }
    }

    /// Whether bounds expansion is unbounded for this mode.
    #[inline]
    pub fn allows_expansion_beyond_speculative_margin(&self) -> bool {
        self.mode != ContinuousDetectionMode::Discrete
    }
}

impl Default for ContinuousDetection {
    fn default() -> Self {
        Self::discrete()
    }
}

// ============================================================================
// Per-body components
// ============================================================================

/// Linear and angular velocity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyVelocity {
    /// Linear velocity
    pub linear: Vec3,
    /// Angular velocity
    pub angular: Vec3,
}

impl BodyVelocity {
    /// Zero velocity.
    pub const ZERO: Self = Self {
        linear: Vec3::ZERO,
        angular: Vec3::ZERO,
    };

    /// Construct from linear velocity only.
    pub const fn linear(linear: Vec3) -> Self {
        Self {
            linear,
            angular: Vec3::ZERO,
        }
    }
}

/// Pose and velocity, the integrator's working state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionState {
    /// World pose
    pub pose: RigidPose,
    /// World velocity
    pub velocity: BodyVelocity,
}

/// Inverse mass and inverse inertia tensor. All zeroes means kinematic:
/// infinite mass, moved only by velocity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyInertia {
    /// Inverse inertia tensor
    pub inverse_inertia: Symmetric3,
    /// Inverse mass
    pub inverse_mass: f32,
}

impl BodyInertia {
    /// Kinematic inertia: unmoved by any impulse.
    pub const KINEMATIC: Self = Self {
        inverse_inertia: Symmetric3::ZERO,
        inverse_mass: 0.0,
    };

    /// Dynamic inertia from mass and a local inertia tensor.
    pub fn from_mass_and_inertia(mass: f32, inertia: Symmetric3) -> Self {
        Self {
            inverse_inertia: inertia.inverse(),
            inverse_mass: if mass > 0.0 { 1.0 / mass } else { 0.0 },
        }
    }

    /// True when every inverse term is zero.
    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.inverse_mass == 0.0 && self.inverse_inertia == Symmetric3::ZERO
    }
}

/// Shape reference and collision detection settings for one body.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Collidable {
    /// Shape catalog entry; `exists() == false` means no collision
    pub shape: TypedIndex,
    /// Continuous detection settings
    pub continuity: ContinuousDetection,
    /// Lower clamp on the speed-derived speculative margin
    pub minimum_speculative_margin: f32,
    /// Upper clamp on the speed-derived speculative margin
    pub maximum_speculative_margin: f32,
    /// Broad phase proxy id, managed by the simulation
    pub broad_phase_proxy: u32,
}

impl Collidable {
    /// Speculative margin for this tick: distance covered at `speed` over
    /// `dt`, clamped to the configured range.
    #[inline]
    pub fn speculative_margin(&self, speed: f32, dt: f32) -> f32 {
        (speed * dt).clamp(
            self.minimum_speculative_margin,
            self.maximum_speculative_margin,
        )
    }
}

/// Sleep candidacy state and thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyActivity {
    /// Squared-velocity threshold below which the body counts as idle.
    /// Negative makes sleep unreachable.
    pub sleep_threshold: f32,
    /// Consecutive idle timesteps required before sleep candidacy
    pub minimum_timesteps_under_threshold: u8,
    /// Whether the body currently qualifies as a sleep candidate
    pub sleep_candidate: bool,
    /// Consecutive timesteps spent under the threshold so far
    pub timesteps_under_threshold: u8,
}

impl Default for BodyActivity {
    fn default() -> Self {
        Self {
            sleep_threshold: 0.01,
            minimum_timesteps_under_threshold: 32,
            sleep_candidate: false,
            timesteps_under_threshold: 0,
        }
    }
}

// ============================================================================
// Descriptions
// ============================================================================

/// Collidable settings for construction and round-trip.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CollidableDescription {
    /// Shape catalog entry
    pub shape: TypedIndex,
    /// Continuous detection settings
    pub continuity: ContinuousDetection,
    /// Lower speculative margin clamp
    pub minimum_speculative_margin: f32,
    /// Upper speculative margin clamp
    pub maximum_speculative_margin: f32,
}

impl CollidableDescription {
    /// Discrete collidable with the default margin range.
    pub fn new(shape: TypedIndex) -> Self {
        Self {
            shape,
            continuity: ContinuousDetection::discrete(),
            minimum_speculative_margin: 0.0,
            maximum_speculative_margin: f32::MAX,
        }
    }
}

/// Activity settings for construction and round-trip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyActivityDescription {
    /// Squared-velocity sleep threshold
    pub sleep_threshold: f32,
    /// Consecutive idle timesteps before candidacy
    pub minimum_timesteps_under_threshold: u8,
}

impl Default for BodyActivityDescription {
    fn default() -> Self {
        Self {
            sleep_threshold: 0.01,
            minimum_timesteps_under_threshold: 32,
        }
    }
}

/// Everything needed to construct one body, and everything observable about
/// an existing one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyDescription {
    /// World pose
    pub pose: RigidPose,
    /// World velocity
    pub velocity: BodyVelocity,
    /// Local inverse inertia
    pub local_inertia: BodyInertia,
    /// Collidable settings
    pub collidable: CollidableDescription,
    /// Activity settings
    pub activity: BodyActivityDescription,
}

impl BodyDescription {
    /// Dynamic body description.
    pub fn create_dynamic(
        pose: RigidPose,
        local_inertia: BodyInertia,
        collidable: CollidableDescription,
        activity: BodyActivityDescription,
    ) -> Self {
        Self {
            pose,
            velocity: BodyVelocity::ZERO,
            local_inertia,
            collidable,
            activity,
        }
    }

    /// Kinematic body description: infinite mass, moved by velocity alone.
    pub fn create_kinematic(
        pose: RigidPose,
        collidable: CollidableDescription,
        activity: BodyActivityDescription,
    ) -> Self {
        Self {
            pose,
            velocity: BodyVelocity::ZERO,
            local_inertia: BodyInertia::KINEMATIC,
            collidable,
            activity,
        }
    }
}

// ============================================================================
// BodySet
// ============================================================================

/// Structure-of-arrays storage for one group of bodies: the active set or
/// one sleeping island.
#[derive(Clone, Debug, Default)]
pub struct BodySet {
    /// Slot → handle map
    pub index_to_handle: Vec<BodyHandle>,
    /// Pose and velocity per body
    pub motion: Vec<MotionState>,
    /// Local inverse inertia per body
    pub local_inertias: Vec<BodyInertia>,
    /// World inverse inertia per body, cached from the local inertia and the
    /// current orientation
    pub world_inertias: Vec<BodyInertia>,
    /// Collidable settings per body
    pub collidables: Vec<Collidable>,
    /// Activity state per body
    pub activity: Vec<BodyActivity>,
    /// Constraints attached to each body
    pub constraints: Vec<Vec<ConstraintHandle>>,
}

impl BodySet {
    /// Number of bodies in the set.
    #[inline]
    pub fn count(&self) -> usize {
        self.index_to_handle.len()
    }

    /// Whether the set holds no bodies.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index_to_handle.is_empty()
    }

    /// Append a body, returning its slot.
    fn push(
        &mut self,
        handle: BodyHandle,
        motion: MotionState,
        local_inertia: BodyInertia,
        collidable: Collidable,
        activity: BodyActivity,
        constraints: Vec<ConstraintHandle>,
    ) -> u32 {
        let index = self.count() as u32;
        self.index_to_handle.push(handle);
        self.motion.push(motion);
        self.local_inertias.push(local_inertia);
        self.world_inertias
            .push(world_inertia(&local_inertia, &motion.pose));
        self.collidables.push(collidable);
        self.activity.push(activity);
        self.constraints.push(constraints);
        index
    }

    /// Swap-remove a slot. Returns the handle of the body that moved into
    /// the vacated slot, if any.
    fn swap_remove(&mut self, index: usize) -> Option<BodyHandle> {
        self.index_to_handle.swap_remove(index);
        self.motion.swap_remove(index);
        self.local_inertias.swap_remove(index);
        self.world_inertias.swap_remove(index);
        self.collidables.swap_remove(index);
        self.activity.swap_remove(index);
        self.constraints.swap_remove(index);
        if index < self.count() {
            Some(self.index_to_handle[index])
        } else {
            None
        }
    }

    /// Refresh the cached world inverse inertia of one body from its
    /// orientation.
    #[inline]
    pub fn update_world_inertia(&mut self, index: usize) {
        self.world_inertias[index] =
            world_inertia(&self.local_inertias[index], &self.motion[index].pose);
    }
}

/// World-frame inverse inertia: `R * I_inv_local * R^T`.
fn world_inertia(local: &BodyInertia, pose: &RigidPose) -> BodyInertia {
    let r = Mat3::from_quat(pose.orientation);
    BodyInertia {
        inverse_inertia: local.inverse_inertia.rotation_sandwich(r),
        inverse_mass: local.inverse_mass,
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// Where a body currently lives: which set, and which slot within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BodyLocation {
    /// Set slot (`ACTIVE_SET` or a sleeping island slot)
    pub set: u32,
    /// Slot within the set
    pub index: u32,
}

/// All rigid bodies in a simulation.
#[derive(Clone, Debug, Default)]
pub struct Bodies {
    allocator: HandleAllocator,
    /// Set 0 is the active set; higher slots are sleeping islands. An empty
    /// non-zero set is a free slot awaiting reuse.
    pub sets: Vec<BodySet>,
    /// Handle index → location
    locations: Vec<BodyLocation>,
}

impl Bodies {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            allocator: HandleAllocator::new(),
            sets: vec![BodySet::default()],
            locations: Vec::new(),
        }
    }

    /// Number of live bodies across every set.
    pub fn count(&self) -> usize {
        self.allocator.live_count()
    }

    /// The active set.
    #[inline]
    pub fn active(&self) -> &BodySet {
        &self.sets[ACTIVE_SET as usize]
    }

    /// The active set, mutably.
    #[inline]
    pub fn active_mut(&mut self) -> &mut BodySet {
        &mut self.sets[ACTIVE_SET as usize]
    }

    /// Add a body to the active set.
    pub fn add(&mut self, description: &BodyDescription) -> Result<BodyHandle, PhysicsError> {
        let (index, generation) = self.allocator.take()?;
        let handle = BodyHandle::new(index, generation);

        let motion = MotionState {
            pose: description.pose,
            velocity: description.velocity,
        };
        let collidable = Collidable {
            shape: description.collidable.shape,
            continuity: description.collidable.continuity,
            minimum_speculative_margin: description.collidable.minimum_speculative_margin,
            maximum_speculative_margin: description.collidable.maximum_speculative_margin,
            broad_phase_proxy: u32::MAX,
        };
        let activity = BodyActivity {
            sleep_threshold: description.activity.sleep_threshold,
            minimum_timesteps_under_threshold: description
                .activity
                .minimum_timesteps_under_threshold,
            sleep_candidate: false,
            timesteps_under_threshold: 0,
        };

        let slot = self.sets[ACTIVE_SET as usize].push(
            handle,
            motion,
            description.local_inertia,
            collidable,
            activity,
            Vec::new(),
        );

        let location = BodyLocation {
            set: ACTIVE_SET,
            index: slot,
        };
        if (index as usize) < self.locations.len() {
            self.locations[index as usize] = location;
        } else {
            debug_assert_eq!(index as usize, self.locations.len());
            self.locations.push(location);
        }
        Ok(handle)
    }

    /// Remove a body, swap-filling its slot. The final observable state is
    /// returned so callers can detach the broad phase proxy.
    pub fn remove(&mut self, handle: BodyHandle) -> Result<BodyDescription, PhysicsError> {
        let location = self.location(handle)?;
        let description = self.description_at(location);

        let set = &mut self.sets[location.set as usize];
        if let Some(moved) = set.swap_remove(location.index as usize) {
            self.locations[moved.index() as usize].index = location.index;
        }
        self.allocator.recycle(handle.index());
        Ok(description)
    }

    /// Resolve a handle to its current location.
    pub fn location(&self, handle: BodyHandle) -> Result<BodyLocation, PhysicsError> {
        self.allocator
            .validate(handle.index(), handle.generation())?;
        Ok(self.locations[handle.index() as usize])
    }

    /// Whether a handle refers to a live body.
    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.allocator
            .validate(handle.index(), handle.generation())
            .is_ok()
    }

    /// Whether the body is in the active set. Errors on a dead handle.
    pub fn is_awake(&self, handle: BodyHandle) -> Result<bool, PhysicsError> {
        Ok(self.location(handle)?.set == ACTIVE_SET)
    }

    /// Snapshot a body's observable state.
    pub fn get_description(&self, handle: BodyHandle) -> Result<BodyDescription, PhysicsError> {
        let location = self.location(handle)?;
        Ok(self.description_at(location))
    }

    /// Overwrite a body's observable state from a description. The cached
    /// world inertia follows the new orientation.
    pub fn apply_description(
        &mut self,
        handle: BodyHandle,
        description: &BodyDescription,
    ) -> Result<(), PhysicsError> {
        let location = self.location(handle)?;
        let set = &mut self.sets[location.set as usize];
        let i = location.index as usize;
        set.motion[i] = MotionState {
            pose: description.pose,
            velocity: description.velocity,
        };
        set.local_inertias[i] = description.local_inertia;
        let proxy = set.collidables[i].broad_phase_proxy;
        set.collidables[i] = Collidable {
            shape: description.collidable.shape,
            continuity: description.collidable.continuity,
            minimum_speculative_margin: description.collidable.minimum_speculative_margin,
            maximum_speculative_margin: description.collidable.maximum_speculative_margin,
            broad_phase_proxy: proxy,
        };
        set.activity[i].sleep_threshold = description.activity.sleep_threshold;
        set.activity[i].minimum_timesteps_under_threshold =
            description.activity.minimum_timesteps_under_threshold;
        set.update_world_inertia(i);
        Ok(())
    }

    fn description_at(&self, location: BodyLocation) -> BodyDescription {
        let set = &self.sets[location.set as usize];
        let i = location.index as usize;
        BodyDescription {
            pose: set.motion[i].pose,
            velocity: set.motion[i].velocity,
            local_inertia: set.local_inertias[i],
            collidable: CollidableDescription {
                shape: set.collidables[i].shape,
                continuity: set.collidables[i].continuity,
                minimum_speculative_margin: set.collidables[i].minimum_speculative_margin,
                maximum_speculative_margin: set.collidables[i].maximum_speculative_margin,
            },
            activity: BodyActivityDescription {
                sleep_threshold: set.activity[i].sleep_threshold,
                minimum_timesteps_under_threshold: set.activity[i]
                    .minimum_timesteps_under_threshold,
            },
        }
    }

    /// Whether a body is kinematic. Errors on a dead handle.
    pub fn is_kinematic(&self, handle: BodyHandle) -> Result<bool, PhysicsError> {
        let location = self.location(handle)?;
        Ok(self.sets[location.set as usize].local_inertias[location.index as usize].is_kinematic())
    }

    /// Allocate a set slot for a sleeping island, reusing an empty slot when
    /// one exists.
    pub fn allocate_sleeping_set(&mut self) -> u32 {
        for (slot, set) in self.sets.iter().enumerate().skip(1) {
            if set.is_empty() {
                return slot as u32;
            }
        }
        self.sets.push(BodySet::default());
        (self.sets.len() - 1) as u32
    }

    /// Move one body from the active set into a sleeping set. The handle is
    /// preserved; only its location changes.
    pub fn move_to_sleeping_set(&mut self, handle: BodyHandle, target_set: u32) {
        debug_assert_ne!(target_set, ACTIVE_SET);
        let location = self.locations[handle.index() as usize];
        debug_assert_eq!(location.set, ACTIVE_SET);

        let source = &mut self.sets[ACTIVE_SET as usize];
        let i = location.index as usize;
        let motion = source.motion[i];
        let local_inertia = source.local_inertias[i];
        let collidable = source.collidables[i];
        let activity = source.activity[i];
        let constraints = core::mem::take(&mut source.constraints[i]);
        if let Some(moved) = source.swap_remove(i) {
            self.locations[moved.index() as usize].index = location.index;
        }

        let slot = self.sets[target_set as usize].push(
            handle,
            motion,
            local_inertia,
            collidable,
            activity,
            constraints,
        );
        self.locations[handle.index() as usize] = BodyLocation {
            set: target_set,
            index: slot,
        };
    }

    /// Move every body of a sleeping set back to the active set, leaving the
    /// set slot empty for reuse. Candidacy counters reset so freshly woken
    /// bodies do not immediately re-sleep.
    pub fn wake_set(&mut self, set_slot: u32) {
        debug_assert_ne!(set_slot, ACTIVE_SET);
        let mut sleeping = core::mem::take(&mut self.sets[set_slot as usize]);
        for i in 0..sleeping.count() {
            let handle = sleeping.index_to_handle[i];
            let mut activity = sleeping.activity[i];
            activity.sleep_candidate = false;
            activity.timesteps_under_threshold = 0;
            let slot = self.sets[ACTIVE_SET as usize].push(
                handle,
                sleeping.motion[i],
                sleeping.local_inertias[i],
                sleeping.collidables[i],
                activity,
                core::mem::take(&mut sleeping.constraints[i]),
            );
            self.locations[handle.index() as usize] = BodyLocation {
                set: ACTIVE_SET,
                index: slot,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;

    fn test_description() -> BodyDescription {
        BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(1.0, 2.0, 3.0)),
            BodyInertia::from_mass_and_inertia(2.0, Symmetric3::diagonal(0.3, 0.3, 0.3)),
            CollidableDescription::new(TypedIndex::new(0, 0)),
            BodyActivityDescription::default(),
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let mut bodies = Bodies::new();
        let handle = bodies.add(&test_description()).unwrap();
        assert_eq!(bodies.count(), 1);
        assert!(bodies.contains(handle));
        assert!(bodies.is_awake(handle).unwrap());
        let location = bodies.location(handle).unwrap();
        assert_eq!(location.set, ACTIVE_SET);
    }

    #[test]
    fn test_description_roundtrip() {
        let mut bodies = Bodies::new();
        let mut description = test_description();
        description.velocity = BodyVelocity {
            linear: Vec3::new(0.5, -1.0, 2.0),
            angular: Vec3::new(0.0, 3.0, 0.0),
        };
        description.collidable.continuity = ContinuousDetection::continuous(1e-3, 1e-4);
        description.collidable.minimum_speculative_margin = 0.01;
        description.collidable.maximum_speculative_margin = 2.0;
        description.activity.sleep_threshold = 0.5;

        let handle = bodies.add(&description).unwrap();
        let read_back = bodies.get_description(handle).unwrap();
        assert_eq!(read_back, description, "Round-trip must be exact");

        // apply_description then read again
        let mut changed = description;
        changed.pose.position = Vec3::new(9.0, 9.0, 9.0);
        bodies.apply_description(handle, &changed).unwrap();
        assert_eq!(bodies.get_description(handle).unwrap(), changed);
    }

    #[test]
    fn test_remove_swap_fill() {
        let mut bodies = Bodies::new();
        let a = bodies.add(&test_description()).unwrap();
        let b = bodies.add(&test_description()).unwrap();
        let c = bodies.add(&test_description()).unwrap();

        bodies.remove(a).unwrap();
        assert!(!bodies.contains(a));
        // c moved into a's slot; its handle still resolves
        let loc_c = bodies.location(c).unwrap();
        assert_eq!(loc_c.index, 0);
        assert!(bodies.contains(b));
        assert_eq!(bodies.count(), 2);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut bodies = Bodies::new();
        let a = bodies.add(&test_description()).unwrap();
        bodies.remove(a).unwrap();
        let b = bodies.add(&test_description()).unwrap();
        // a's slot was recycled into b; the old handle must fail
        assert_eq!(a.index(), b.index());
        assert!(bodies.get_description(a).is_err());
        assert!(bodies.get_description(b).is_ok());
    }

    #[test]
    fn test_kinematic_detection() {
        let mut bodies = Bodies::new();
        let kinematic = bodies
            .add(&BodyDescription::create_kinematic(
                RigidPose::IDENTITY,
                CollidableDescription::new(TypedIndex::NONE),
                BodyActivityDescription::default(),
            ))
            .unwrap();
        let dynamic = bodies.add(&test_description()).unwrap();
        assert!(bodies.is_kinematic(kinematic).unwrap());
        assert!(!bodies.is_kinematic(dynamic).unwrap());
    }

    #[test]
    fn test_world_inertia_follows_orientation() {
        let mut bodies = Bodies::new();
        let mut description = test_description();
        description.local_inertia =
            BodyInertia::from_mass_and_inertia(1.0, Symmetric3::diagonal(1.0, 2.0, 3.0));
        description.pose.orientation =
            Quat::from_axis_angle(Vec3::UNIT_Z, core::f32::consts::FRAC_PI_2);
        let handle = bodies.add(&description).unwrap();

        let location = bodies.location(handle).unwrap();
        let world = bodies.sets[location.set as usize].world_inertias[location.index as usize];
        // 90 degrees about Z swaps the xx and yy inverse terms
        assert!((world.inverse_inertia.xx - 0.5).abs() < 1e-5);
        assert!((world.inverse_inertia.yy - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sleep_transition_preserves_handles() {
        let mut bodies = Bodies::new();
        let a = bodies.add(&test_description()).unwrap();
        let b = bodies.add(&test_description()).unwrap();
        let c = bodies.add(&test_description()).unwrap();

        let island = bodies.allocate_sleeping_set();
        bodies.move_to_sleeping_set(a, island);
        bodies.move_to_sleeping_set(c, island);

        assert!(!bodies.is_awake(a).unwrap());
        assert!(bodies.is_awake(b).unwrap());
        assert_eq!(bodies.sets[island as usize].count(), 2);
        assert_eq!(bodies.active().count(), 1);

        // All state still reachable through the handles
        assert!(bodies.get_description(a).is_ok());
        assert!(bodies.get_description(c).is_ok());

        bodies.wake_set(island);
        assert!(bodies.is_awake(a).unwrap());
        assert!(bodies.is_awake(c).unwrap());
        assert!(bodies.sets[island as usize].is_empty());

        // Woken bodies reset their candidacy counters
        let loc = bodies.location(a).unwrap();
        assert!(!bodies.active().activity[loc.index as usize].sleep_candidate);
    }

    #[test]
    fn test_sleeping_set_slot_reuse() {
        let mut bodies = Bodies::new();
        let a = bodies.add(&test_description()).unwrap();
        let island = bodies.allocate_sleeping_set();
        bodies.move_to_sleeping_set(a, island);
        bodies.wake_set(island);
        let island2 = bodies.allocate_sleeping_set();
        assert_eq!(island, island2, "Empty set slots are reused");
    }

    #[test]
    fn test_speculative_margin_clamping() {
        let collidable = Collidable {
            shape: TypedIndex::NONE,
            continuity: ContinuousDetection::discrete(),
            minimum_speculative_margin: 0.05,
            maximum_speculative_margin: 0.5,
            broad_phase_proxy: u32::MAX,
        };
        let dt = 1.0 / 60.0;
        assert_eq!(collidable.speculative_margin(0.0, dt), 0.05, "Floor clamp");
        assert_eq!(
            collidable.speculative_margin(1000.0, dt),
            0.5,
            "Ceiling clamp"
        );
        let mid = collidable.speculative_margin(6.0, dt);
        assert!((mid - 0.1).abs() < 1e-6, "Unclamped: speed * dt");
    }
}
