//! Versioned Handles and Packed Indices
//!
//! Every externally visible object (body, static, constraint) is addressed
//! through a versioned handle: a packed `u32` carrying a slot index, a
//! generation counter, and a type tag. Recycling a slot bumps its generation,
//! so a handle issued before the recycle no longer validates — stale access
//! becomes a detectable error instead of silent data corruption.
//!
//! # Layout
//!
//! ```text
//! bit 31      : existence flag
//! bits 28..31 : type tag (3 bits)
//! bits 24..28 : generation (4 bits, wrapping)
//! bits  0..24 : slot index (24 bits)
//! ```

use crate::error::PhysicsError;

/// Maximum addressable slot index (24 bits).
pub const MAX_HANDLE_INDEX: u32 = (1 << 24) - 1;

const INDEX_MASK: u32 = 0x00FF_FFFF;
const GENERATION_SHIFT: u32 = 24;
const GENERATION_MASK: u32 = 0xF;
const TYPE_SHIFT: u32 = 28;
const TYPE_MASK: u32 = 0x7;
const EXISTS_BIT: u32 = 1 << 31;

// ============================================================================
// Handle
// ============================================================================

/// Kind of object a handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HandleType {
    /// Rigid body
    Body = 0,
    /// Static collidable
    Static = 1,
    /// Constraint
    Constraint = 2,
}

/// Packed versioned handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    /// Bit-packed representation
    pub packed: u32,
}

impl Handle {
    /// The null handle; refers to nothing.
    pub const NULL: Self = Self { packed: 0 };

    /// Pack a handle from parts.
    #[inline]
    pub const fn new(index: u32, generation: u32, handle_type: HandleType) -> Self {
        Self {
            packed: EXISTS_BIT
                | ((handle_type as u32 & TYPE_MASK) << TYPE_SHIFT)
                | ((generation & GENERATION_MASK) << GENERATION_SHIFT)
                | (index & INDEX_MASK),
        }
    }

    /// Slot index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.packed & INDEX_MASK
    }

    /// Generation at issue time.
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.packed >> GENERATION_SHIFT) & GENERATION_MASK
    }

    /// Type tag.
    #[inline]
    pub const fn type_tag(self) -> u32 {
        (self.packed >> TYPE_SHIFT) & TYPE_MASK
    }

    /// Whether the handle refers to anything at all.
    #[inline]
    pub const fn exists(self) -> bool {
        self.packed & EXISTS_BIT != 0
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident, $handle_type:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub Handle);

        impl $name {
            /// Pack from a slot index and generation.
            #[inline]
            pub const fn new(index: u32, generation: u32) -> Self {
                Self(Handle::new(index, generation, $handle_type))
            }

            /// Slot index.
            #[inline]
            pub const fn index(self) -> u32 {
                self.0.index()
            }

            /// Generation at issue time.
            #[inline]
            pub const fn generation(self) -> u32 {
                self.0.generation()
            }
        }
    };
}

typed_handle!(
    /// Versioned reference to a rigid body.
    BodyHandle,
    HandleType::Body
);
typed_handle!(
    /// Versioned reference to a static collidable.
    StaticHandle,
    HandleType::Static
);
typed_handle!(
    /// Versioned reference to a constraint.
    ConstraintHandle,
    HandleType::Constraint
);

// ============================================================================
// HandleAllocator
// ============================================================================

/// Issues and recycles versioned handle slots for one store.
///
/// Slots are reused LIFO; each reuse bumps the slot's generation so handles
/// issued before the recycle fail validation.
#[derive(Clone, Debug, Default)]
pub struct HandleAllocator {
    generations: Vec<u32>,
    /// Per-slot liveness, so validation never scans the free list
    live: Vec<bool>,
    free: Vec<u32>,
}

impl HandleAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot, returning `(index, generation)`.
    pub fn take(&mut self) -> Result<(u32, u32), PhysicsError> {
        if let Some(index) = self.free.pop() {
            self.live[index as usize] = true;
            Ok((index, self.generations[index as usize]))
        } else {
            let index = self.generations.len() as u32;
            if index > MAX_HANDLE_INDEX {
                return Err(PhysicsError::CapacityExceeded {
                    resource: "handle index space",
                    limit: MAX_HANDLE_INDEX as usize,
                });
            }
            self.generations.push(0);
            self.live.push(true);
            Ok((index, 0))
        }
    }

    /// Return a slot, bumping its generation.
    pub fn recycle(&mut self, index: u32) {
        debug_assert!((index as usize) < self.generations.len());
        debug_assert!(self.live[index as usize], "double recycle");
        let gen = &mut self.generations[index as usize];
        *gen = (*gen + 1) & GENERATION_MASK;
        self.live[index as usize] = false;
        self.free.push(index);
    }

    /// Validate that `(index, generation)` refers to a live slot.
    pub fn validate(&self, index: u32, generation: u32) -> Result<(), PhysicsError> {
        let slot = index as usize;
        if slot >= self.generations.len() || !self.live[slot] {
            return Err(PhysicsError::InvalidHandle {
                index: slot,
                count: self.generations.len() - self.free.len(),
            });
        }
        let live = self.generations[slot];
        if live != generation {
            return Err(PhysicsError::StaleHandle {
                expected: generation,
                found: live,
            });
        }
        Ok(())
    }

    /// Number of live slots.
    pub fn live_count(&self) -> usize {
        self.generations.len() - self.free.len()
    }
}

// ============================================================================
// TypedIndex (shape catalog reference)
// ============================================================================

/// Packed reference into the shape catalog: type tag, slot index, and an
/// existence bit. `exists() == false` means "no shape" — a collidable that
/// cannot collide with anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypedIndex {
    /// Bit-packed representation
    pub packed: u32,
}

impl TypedIndex {
    /// The empty index; refers to no shape.
    pub const NONE: Self = Self { packed: 0 };

    /// Pack from a shape type tag and slot index.
    #[inline]
    pub const fn new(shape_type: u32, index: u32) -> Self {
        Self {
            packed: (1 << 31) | ((shape_type & 0x7F) << 24) | (index & INDEX_MASK),
        }
    }

    /// Shape type tag.
    #[inline]
    pub const fn shape_type(self) -> u32 {
        (self.packed >> 24) & 0x7F
    }

    /// Slot index within the type's batch.
    #[inline]
    pub const fn index(self) -> u32 {
        self.packed & INDEX_MASK
    }

    /// Whether this index refers to a shape at all.
    #[inline]
    pub const fn exists(self) -> bool {
        self.packed & (1 << 31) != 0
    }
}

// ============================================================================
// CollidableReference
// ============================================================================

/// Mobility classification for one side of a collision pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum CollidableMobility {
    /// Body with finite mass
    Dynamic = 0,
    /// Body with infinite mass moved by velocity
    Kinematic = 1,
    /// Immobile collidable in the statics store
    Static = 2,
}

/// Bitpacked reference to "whichever kind of collidable this is": a dynamic
/// or kinematic body, or a static. Mobility lives in the top two bits; the
/// referenced handle's index and generation live below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollidableReference {
    /// Bit-packed representation
    pub packed: u32,
}

impl CollidableReference {
    const MOBILITY_SHIFT: u32 = 30;

    /// Reference a dynamic or kinematic body.
    #[inline]
    pub const fn body(handle: BodyHandle, kinematic: bool) -> Self {
        let mobility = if kinematic {
            CollidableMobility::Kinematic
        } else {
            CollidableMobility::Dynamic
        };
        Self {
            packed: ((mobility as u32) << Self::MOBILITY_SHIFT)
                | (handle.0.packed & 0x0FFF_FFFF),
        }
    }

    /// Reference a static.
    #[inline]
    pub const fn static_ref(handle: StaticHandle) -> Self {
        Self {
            packed: ((CollidableMobility::Static as u32) << Self::MOBILITY_SHIFT)
                | (handle.0.packed & 0x0FFF_FFFF),
        }
    }

    /// Mobility of the referenced collidable.
    #[inline]
    pub fn mobility(self) -> CollidableMobility {
        match self.packed >> Self::MOBILITY_SHIFT {
            0 => CollidableMobility::Dynamic,
            1 => CollidableMobility::Kinematic,
            _ => CollidableMobility::Static,
        }
    }

    /// Rebuild a reference from its packed form, as stored in broad phase
    /// user data.
    #[inline]
    pub const fn from_packed(packed: u32) -> Self {
        Self { packed }
    }

    /// Whether this references a body (dynamic or kinematic).
    #[inline]
    pub fn is_body(self) -> bool {
        self.mobility() != CollidableMobility::Static
    }

    /// Reconstruct the body handle. Only meaningful when `is_body()`.
    #[inline]
    pub fn body_handle(self) -> BodyHandle {
        let index = self.packed & INDEX_MASK;
        let generation = (self.packed >> GENERATION_SHIFT) & GENERATION_MASK;
        BodyHandle::new(index, generation)
    }

    /// Reconstruct the static handle. Only meaningful when `!is_body()`.
    #[inline]
    pub fn static_handle(self) -> StaticHandle {
        let index = self.packed & INDEX_MASK;
        let generation = (self.packed >> GENERATION_SHIFT) & GENERATION_MASK;
        StaticHandle::new(index, generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_packing() {
        let h = BodyHandle::new(1234, 7);
        assert_eq!(h.index(), 1234);
        assert_eq!(h.generation(), 7);
        assert!(h.0.exists());
        assert_eq!(h.0.type_tag(), HandleType::Body as u32);
    }

    #[test]
    fn test_null_handle() {
        assert!(!Handle::NULL.exists());
    }

    #[test]
    fn test_allocator_reuse_bumps_generation() {
        let mut alloc = HandleAllocator::new();
        let (i0, g0) = alloc.take().unwrap();
        assert_eq!((i0, g0), (0, 0));
        alloc.recycle(i0);
        let (i1, g1) = alloc.take().unwrap();
        assert_eq!(i1, i0, "LIFO reuse of the freed slot");
        assert_eq!(g1, 1, "generation bumped on recycle");
    }

    #[test]
    fn test_allocator_stale_detection() {
        let mut alloc = HandleAllocator::new();
        let (i, g) = alloc.take().unwrap();
        assert!(alloc.validate(i, g).is_ok());

        alloc.recycle(i);
        let (i2, g2) = alloc.take().unwrap();
        assert_eq!(i, i2);
        // Old generation must no longer validate
        assert!(matches!(
            alloc.validate(i, g),
            Err(PhysicsError::StaleHandle { .. })
        ));
        assert!(alloc.validate(i2, g2).is_ok());
    }

    #[test]
    fn test_allocator_freed_slot_invalid() {
        let mut alloc = HandleAllocator::new();
        let (i, g) = alloc.take().unwrap();
        alloc.recycle(i);
        assert!(alloc.validate(i, g).is_err());
    }

    #[test]
    fn test_allocator_liveness_tracks_mixed_churn() {
        let mut alloc = HandleAllocator::new();
        let slots: Vec<_> = (0..8).map(|_| alloc.take().unwrap()).collect();
        // Free a scattered subset
        alloc.recycle(slots[1].0);
        alloc.recycle(slots[4].0);
        alloc.recycle(slots[6].0);
        for (i, &(index, generation)) in slots.iter().enumerate() {
            let result = alloc.validate(index, generation);
            if matches!(i, 1 | 4 | 6) {
                assert!(result.is_err(), "Freed slot {} validates", index);
            } else {
                assert!(result.is_ok(), "Live slot {} rejected", index);
            }
        }
        assert_eq!(alloc.live_count(), 5);
        // Retaking a freed slot makes it live again under its new generation
        let (index, generation) = alloc.take().unwrap();
        assert!(alloc.validate(index, generation).is_ok());
    }

    #[test]
    fn test_typed_index() {
        let idx = TypedIndex::new(5, 99);
        assert!(idx.exists());
        assert_eq!(idx.shape_type(), 5);
        assert_eq!(idx.index(), 99);
        assert!(!TypedIndex::NONE.exists());
    }

    #[test]
    fn test_collidable_reference() {
        let body = BodyHandle::new(42, 3);
        let r = CollidableReference::body(body, false);
        assert_eq!(r.mobility(), CollidableMobility::Dynamic);
        assert!(r.is_body());
        assert_eq!(r.body_handle(), body);

        let rk = CollidableReference::body(body, true);
        assert_eq!(rk.mobility(), CollidableMobility::Kinematic);
        assert!(rk.is_body());

        let s = StaticHandle::new(7, 1);
        let rs = CollidableReference::static_ref(s);
        assert_eq!(rs.mobility(), CollidableMobility::Static);
        assert!(!rs.is_body());
        assert_eq!(rs.static_handle(), s);
    }
}
