//! Simulation Error Types
//!
//! Unified error type for the engine. Handle-validated operations (body and
//! static lookup, shape catalog access, configuration) return
//! `Result<T, PhysicsError>`; hot internal paths rely on debug assertions
//! instead.
//!
//! Author: Moroya Sakamoto

use core::fmt;

/// Unified error type for simulation operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhysicsError {
    /// A handle's slot index is out of range for its store.
    InvalidHandle {
        /// The invalid slot index
        index: usize,
        /// Number of live slots in the store
        count: usize,
    },
    /// A handle's generation does not match the live slot's generation; the
    /// slot was recycled since the handle was issued.
    StaleHandle {
        /// Generation recorded in the handle
        expected: u32,
        /// Generation currently live in the slot
        found: u32,
    },
    /// A shape index does not refer to a live catalog entry.
    InvalidShapeIndex {
        /// Shape type tag of the offending index
        shape_type: u32,
        /// Slot index of the offending index
        index: usize,
    },
    /// A capacity limit was exceeded (handle index space, batch count, etc.).
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The limit that was exceeded
        limit: usize,
    },
    /// Invalid configuration parameter.
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle { index, count } => {
                write!(f, "handle index {index} out of range (count={count})")
            }
            Self::StaleHandle { expected, found } => {
                write!(
                    f,
                    "stale handle: generation {expected}, slot now at {found}"
                )
            }
            Self::InvalidShapeIndex { shape_type, index } => {
                write!(f, "shape index {index} (type {shape_type}) is not live")
            }
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "{resource} capacity exceeded (limit={limit})")
            }
            Self::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for PhysicsError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PhysicsError::InvalidHandle { index: 5, count: 3 };
        let s = format!("{}", e);
        assert!(s.contains("5"), "Should contain index");
        assert!(s.contains("3"), "Should contain count");
    }

    #[test]
    fn test_stale_handle_display() {
        let e = PhysicsError::StaleHandle {
            expected: 2,
            found: 3,
        };
        let s = format!("{}", e);
        assert!(s.contains("stale"));
    }

    #[test]
    fn test_error_variants() {
        let e1 = PhysicsError::InvalidHandle { index: 0, count: 0 };
        let e2 = PhysicsError::InvalidShapeIndex {
            shape_type: 1,
            index: 9,
        };
        let e3 = PhysicsError::InvalidConfiguration {
            reason: "substep count must be positive",
        };
        assert_ne!(e1, e2);
        let s = format!("{}", e3);
        assert!(s.contains("substep"));
    }

    #[test]
    fn test_capacity_exceeded() {
        let e = PhysicsError::CapacityExceeded {
            resource: "handle index space",
            limit: 1 << 24,
        };
        let s = format!("{}", e);
        assert!(s.contains("handle index space"));
    }
}
