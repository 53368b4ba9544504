//! # ALICE-Dynamics
//!
//! **Fixed-Timestep Rigid Body Simulation Core**
//!
//! A Rust library providing speculative-contact rigid body dynamics with
//! versioned handles, island sleeping, and a substepped soft-constraint
//! solver.
//!
//! ## Features
//!
//! | Feature | Description | Cost |
//! |---------|-------------|------|
//! | **Incremental broad phase** | SAH-guided AABB tree with fat margins | O(log N) per update |
//! | **Speculative contacts** | Negative-depth manifolds out to a speed-scaled margin | O(1) per pair |
//! | **Substepped solver** | Soft constraints, warm starting, Coulomb friction | O(iterations) |
//! | **Island sleeping** | Union-find islands sleep atomically, wake together | O(α(N)) |
//! | **Continuous detection** | Conservative advancement for fast movers | O(sweep iterations) |
//!
//! ## Design Principles
//!
//! - **Versioned handles**: every public identifier carries a generation;
//!   stale handles are rejected, never misresolved
//! - **Callbacks over configuration**: materials, gravity, and filtering are
//!   user code invoked inside the loop, not settings structs
//! - **Deterministic**: identical inputs produce identical simulations,
//!   serial or dispatched
//! - **No hidden threading**: the core never spawns threads; parallelism
//!   enters only through an explicit dispatcher
//!
//! ## Quick Start
//!
//! ```rust
//! use alice_dynamics::prelude::*;
//!
//! let mut catalog = ShapeCatalog::new();
//! let ground = catalog.add_box(BoxShape::new(100.0, 2.0, 100.0));
//! let ball = catalog.add_sphere(Sphere::new(0.5));
//!
//! let mut simulation = Simulation::new(
//!     catalog,
//!     DefaultNarrowPhaseCallbacks::default(),
//!     GravityCallbacks::default(),
//!     SolveDescription::new(1, 8),
//! );
//!
//! simulation
//!     .add_static(&StaticDescription::new(
//!         RigidPose::at(Vec3::new(0.0, -1.0, 0.0)),
//!         ground,
//!     ))
//!     .unwrap();
//! let handle = simulation
//!     .add_body(&BodyDescription::create_dynamic(
//!         RigidPose::at(Vec3::new(0.0, 4.0, 0.0)),
//!         BodyInertia::from_mass_and_inertia(1.0, Sphere::new(0.5).inertia_tensor(1.0)),
//!         CollidableDescription::new(ball),
//!         BodyActivityDescription::default(),
//!     ))
//!     .unwrap();
//!
//! // Fall for two seconds and come to rest on the slab
//! for _ in 0..120 {
//!     simulation.timestep(1.0 / 60.0).unwrap();
//! }
//! let description = simulation.body_description(handle).unwrap();
//! assert!(description.pose.position.y < 4.0);
//! ```
//!
//! Author: Moroya Sakamoto

pub mod bodies;
pub mod broad_phase;
pub mod ccd;
pub mod collision;
pub mod contact;
pub mod dispatcher;
pub mod error;
pub mod handles;
pub mod integrator;
pub mod math;
pub mod narrow_phase;
pub mod shapes;
pub mod simulation;
pub mod sleeping;
pub mod solver;
pub mod statics;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bodies::{
        BodyActivityDescription, BodyDescription, BodyInertia, BodyVelocity,
        CollidableDescription, ContinuousDetection, ContinuousDetectionMode,
    };
    pub use crate::broad_phase::{Aabb, BroadPhase};
    pub use crate::collision::{ContactManifold, ContactPoint};
    pub use crate::dispatcher::{SerialDispatcher, ThreadDispatcher};
    #[cfg(feature = "parallel")]
    pub use crate::dispatcher::RayonDispatcher;
    pub use crate::error::PhysicsError;
    pub use crate::handles::{
        BodyHandle, CollidableReference, ConstraintHandle, StaticHandle, TypedIndex,
    };
    pub use crate::integrator::{
        AngularIntegrationMode, GravityCallbacks, PoseIntegratorCallbacks,
    };
    pub use crate::math::{Quat, RigidPose, Symmetric3, Vec3};
    pub use crate::narrow_phase::{
        CollidablePair, ContactMaterial, DefaultNarrowPhaseCallbacks, NarrowPhaseCallbacks,
        NonconvexContactManifold, NonconvexContactPoint, SpringSettings,
    };
    pub use crate::shapes::{
        BoxShape, Capsule, CompoundChild, ConvexHull, Cylinder, Mesh, ShapeCatalog, Sphere,
        Triangle,
    };
    pub use crate::simulation::Simulation;
    pub use crate::solver::SolveDescription;
    pub use crate::statics::StaticDescription;
}

// Re-export main types at crate root
pub use prelude::*;

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::prelude::*;

    fn stack_simulation() -> Simulation<DefaultNarrowPhaseCallbacks, GravityCallbacks> {
        Simulation::new(
            ShapeCatalog::new(),
            DefaultNarrowPhaseCallbacks::default(),
            GravityCallbacks::default(),
            SolveDescription::new(2, 4),
        )
    }

    #[test]
    fn test_two_box_stack_settles() {
        let mut simulation = stack_simulation();
        let slab = simulation.shapes.add_box(BoxShape::new(100.0, 2.0, 100.0));
        simulation
            .add_static(&StaticDescription::new(
                RigidPose::at(Vec3::new(0.0, -1.0, 0.0)),
                slab,
            ))
            .unwrap();

        let cube = simulation.shapes.add_box(BoxShape::new(1.0, 1.0, 1.0));
        let inertia =
            BodyInertia::from_mass_and_inertia(1.0, BoxShape::new(1.0, 1.0, 1.0).inertia_tensor(1.0));
        let lower = simulation
            .add_body(&BodyDescription::create_dynamic(
                RigidPose::at(Vec3::new(0.0, 0.6, 0.0)),
                inertia,
                CollidableDescription::new(cube),
                BodyActivityDescription::default(),
            ))
            .unwrap();
        let upper = simulation
            .add_body(&BodyDescription::create_dynamic(
                RigidPose::at(Vec3::new(0.0, 1.7, 0.0)),
                inertia,
                CollidableDescription::new(cube),
                BodyActivityDescription::default(),
            ))
            .unwrap();

        for _ in 0..400 {
            simulation.timestep(1.0 / 60.0).unwrap();
        }

        let lower_y = simulation.body_description(lower).unwrap().pose.position.y;
        let upper_y = simulation.body_description(upper).unwrap().pose.position.y;
        assert!((lower_y - 0.5).abs() < 0.1, "Lower box rests on the slab, y={}", lower_y);
        assert!((upper_y - 1.5).abs() < 0.15, "Upper box rests on the lower, y={}", upper_y);
    }

    #[test]
    fn test_handle_churn_keeps_survivors_valid() {
        let mut simulation = stack_simulation();
        let sphere = simulation.shapes.add_sphere(Sphere::new(0.5));
        let inertia = BodyInertia::from_mass_and_inertia(1.0, Sphere::new(0.5).inertia_tensor(1.0));
        let description = |x: f32| {
            BodyDescription::create_dynamic(
                RigidPose::at(Vec3::new(x, 10.0, 0.0)),
                inertia,
                CollidableDescription::new(sphere),
                BodyActivityDescription::default(),
            )
        };

        let keeper = simulation.add_body(&description(0.0)).unwrap();
        let mut churned = Vec::new();
        for i in 0..20 {
            churned.push(simulation.add_body(&description(2.0 + i as f32)).unwrap());
        }
        for handle in churned.iter().step_by(2) {
            simulation.remove_body(*handle).unwrap();
        }
        for i in 0..10 {
            simulation.add_body(&description(40.0 + i as f32)).unwrap();
        }

        simulation.timestep(1.0 / 60.0).unwrap();
        assert!(simulation.bodies.contains(keeper));
        for (i, handle) in churned.iter().enumerate() {
            assert_eq!(
                simulation.bodies.contains(*handle),
                i % 2 == 1,
                "Removed handles stay dead, survivors stay live"
            );
        }
    }
}
