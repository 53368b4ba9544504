//! Static Collidable Store
//!
//! Immobile collidables: one flat contiguous array with swap-remove slot
//! reuse and the same versioned-handle discipline as the body store. Statics
//! never move, never sleep, and never receive impulses; they exist purely as
//! collision geometry.

use crate::bodies::ContinuousDetection;
use crate::error::PhysicsError;
use crate::handles::{HandleAllocator, StaticHandle, TypedIndex};
use crate::math::RigidPose;

/// Everything needed to construct one static, and everything observable
/// about an existing one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StaticDescription {
    /// World pose
    pub pose: RigidPose,
    /// Shape catalog entry
    pub shape: TypedIndex,
    /// Continuity; relevant only as a sweep target (Passive vs Discrete)
    pub continuity: ContinuousDetection,
}

impl StaticDescription {
    /// Static at a pose with a shape and discrete continuity.
    pub fn new(pose: RigidPose, shape: TypedIndex) -> Self {
        Self {
            pose,
            shape,
            continuity: ContinuousDetection::discrete(),
        }
    }
}

/// One static's stored state.
#[derive(Clone, Copy, Debug)]
pub struct Static {
    /// Handle owning this slot
    pub handle: StaticHandle,
    /// World pose
    pub pose: RigidPose,
    /// Shape catalog entry
    pub shape: TypedIndex,
    /// Continuity settings
    pub continuity: ContinuousDetection,
    /// Broad phase proxy id, managed by the simulation
    pub broad_phase_proxy: u32,
}

/// All statics in a simulation.
#[derive(Clone, Debug, Default)]
pub struct Statics {
    allocator: HandleAllocator,
    /// Contiguous static storage
    pub statics: Vec<Static>,
    /// Handle index → slot
    locations: Vec<u32>,
}

impl Statics {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live statics.
    #[inline]
    pub fn count(&self) -> usize {
        self.statics.len()
    }

    /// Add a static.
    pub fn add(&mut self, description: &StaticDescription) -> Result<StaticHandle, PhysicsError> {
        let (index, generation) = self.allocator.take()?;
        let handle = StaticHandle::new(index, generation);
        let slot = self.statics.len() as u32;
        self.statics.push(Static {
            handle,
            pose: description.pose,
            shape: description.shape,
            continuity: description.continuity,
            broad_phase_proxy: u32::MAX,
        });
        if (index as usize) < self.locations.len() {
            self.locations[index as usize] = slot;
        } else {
            debug_assert_eq!(index as usize, self.locations.len());
            self.locations.push(slot);
        }
        Ok(handle)
    }

    /// Remove a static, swap-filling its slot. Returns the removed state so
    /// callers can detach the broad phase proxy.
    pub fn remove(&mut self, handle: StaticHandle) -> Result<Static, PhysicsError> {
        let slot = self.location(handle)?;
        let removed = self.statics.swap_remove(slot as usize);
        if (slot as usize) < self.statics.len() {
            let moved = self.statics[slot as usize].handle;
            self.locations[moved.index() as usize] = slot;
        }
        self.allocator.recycle(handle.index());
        Ok(removed)
    }

    /// Resolve a handle to its slot.
    pub fn location(&self, handle: StaticHandle) -> Result<u32, PhysicsError> {
        self.allocator
            .validate(handle.index(), handle.generation())?;
        Ok(self.locations[handle.index() as usize])
    }

    /// Whether a handle refers to a live static.
    pub fn contains(&self, handle: StaticHandle) -> bool {
        self.allocator
            .validate(handle.index(), handle.generation())
            .is_ok()
    }

    /// Borrow a static.
    pub fn get(&self, handle: StaticHandle) -> Result<&Static, PhysicsError> {
        let slot = self.location(handle)?;
        Ok(&self.statics[slot as usize])
    }

    /// Borrow a static mutably. Valid only until the next structural
    /// mutation of the store.
    pub fn get_mut(&mut self, handle: StaticHandle) -> Result<&mut Static, PhysicsError> {
        let slot = self.location(handle)?;
        Ok(&mut self.statics[slot as usize])
    }

    /// Snapshot a static's observable state.
    pub fn get_description(&self, handle: StaticHandle) -> Result<StaticDescription, PhysicsError> {
        let s = self.get(handle)?;
        Ok(StaticDescription {
            pose: s.pose,
            shape: s.shape,
            continuity: s.continuity,
        })
    }

    /// Overwrite a static's observable state from a description.
    pub fn apply_description(
        &mut self,
        handle: StaticHandle,
        description: &StaticDescription,
    ) -> Result<(), PhysicsError> {
        let s = self.get_mut(handle)?;
        s.pose = description.pose;
        s.shape = description.shape;
        s.continuity = description.continuity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn test_description() -> StaticDescription {
        StaticDescription::new(RigidPose::at(Vec3::new(0.0, -1.0, 0.0)), TypedIndex::new(2, 0))
    }

    #[test]
    fn test_add_remove() {
        let mut statics = Statics::new();
        let a = statics.add(&test_description()).unwrap();
        let b = statics.add(&test_description()).unwrap();
        assert_eq!(statics.count(), 2);

        statics.remove(a).unwrap();
        assert_eq!(statics.count(), 1);
        assert!(!statics.contains(a));
        // b swap-filled into slot 0 and still resolves
        assert_eq!(statics.location(b).unwrap(), 0);
    }

    #[test]
    fn test_description_roundtrip() {
        let mut statics = Statics::new();
        let mut description = test_description();
        description.continuity = ContinuousDetection::passive();
        let handle = statics.add(&description).unwrap();
        assert_eq!(statics.get_description(handle).unwrap(), description);

        let mut changed = description;
        changed.pose.position = Vec3::new(5.0, 0.0, 0.0);
        statics.apply_description(handle, &changed).unwrap();
        assert_eq!(statics.get_description(handle).unwrap(), changed);
    }

    #[test]
    fn test_stale_handle() {
        let mut statics = Statics::new();
        let a = statics.add(&test_description()).unwrap();
        statics.remove(a).unwrap();
        let b = statics.add(&test_description()).unwrap();
        assert_eq!(a.index(), b.index());
        assert!(statics.get(a).is_err(), "Recycled slot rejects old handle");
        assert!(statics.get(b).is_ok());
    }
}
