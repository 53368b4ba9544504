//! Pose Integrator
//!
//! Advances active bodies each substep. The `integrate_velocity` callback is
//! the only mechanism for external influence: gravity, damping, wind, and
//! scripted forces all live there, free to rewrite velocity outright. After
//! the callback, positions advance linearly and orientations advance
//! according to the configured [`AngularIntegrationMode`]; the cached world
//! inverse inertia is refreshed from the new orientation.
//!
//! # Algorithms
//!
//! - Nonconserving: incremental quaternion exponential map
//! - ConserveMomentum: angular velocity recomputed from conserved momentum
//!   after the orientation update
//! - ConserveMomentumWithGyroscopicTorque: implicit gyroscopic term in the
//!   body frame (extra damping is an accepted side effect)
//!
//! Author: Moroya Sakamoto

use crate::bodies::{Bodies, BodyVelocity};
use crate::handles::BodyHandle;
use crate::math::{Mat3, RigidPose, Symmetric3, Vec3};

/// Orientation update policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AngularIntegrationMode {
    /// Plain incremental integration; cheapest and adequate for most play
    #[default]
    Nonconserving,
    /// Keep angular momentum constant as the inertia tensor rotates
    ConserveMomentum,
    /// Momentum conservation plus an implicit gyroscopic torque term
    ConserveMomentumWithGyroscopicTorque,
}

/// User hooks into integration. `integrate_velocity` runs per body per
/// substep and may rewrite the velocity freely.
pub trait PoseIntegratorCallbacks: Send + Sync {
    /// Orientation update policy for every body.
    fn angular_integration_mode(&self) -> AngularIntegrationMode {
        AngularIntegrationMode::Nonconserving
    }

    /// Whether kinematic bodies also receive `integrate_velocity` calls.
    fn integrate_velocity_for_kinematics(&self) -> bool {
        false
    }

    /// Called once per substep before any body integrates.
    fn prepare_for_integration(&mut self, _dt: f32) {}

    /// Rewrite one body's velocity. Default leaves it untouched.
    fn integrate_velocity(
        &self,
        _handle: BodyHandle,
        _pose: &RigidPose,
        _dt: f32,
        _velocity: &mut BodyVelocity,
    ) {
    }
}

/// Uniform gravity with optional linear and angular damping.
#[derive(Clone, Copy, Debug)]
pub struct GravityCallbacks {
    /// Acceleration applied to every dynamic body
    pub gravity: Vec3,
    /// Linear velocity retained per second (1 = none lost)
    pub linear_damping: f32,
    /// Angular velocity retained per second
    pub angular_damping: f32,
}

impl Default for GravityCallbacks {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -10.0, 0.0),
            linear_damping: 1.0,
            angular_damping: 1.0,
        }
    }
}

impl PoseIntegratorCallbacks for GravityCallbacks {
    fn integrate_velocity(
        &self,
        _handle: BodyHandle,
        _pose: &RigidPose,
        dt: f32,
        velocity: &mut BodyVelocity,
    ) {
        velocity.linear += self.gravity * dt;
        if self.linear_damping != 1.0 {
            velocity.linear = velocity.linear * self.linear_damping.powf(dt);
        }
        if self.angular_damping != 1.0 {
            velocity.angular = velocity.angular * self.angular_damping.powf(dt);
        }
    }
}

/// Run the velocity callback over every active body. Called at the start of
/// each substep, before the solver touches velocities.
pub fn integrate_velocities<C: PoseIntegratorCallbacks>(
    callbacks: &mut C,
    bodies: &mut Bodies,
    dt: f32,
) {
    callbacks.prepare_for_integration(dt);
    let include_kinematics = callbacks.integrate_velocity_for_kinematics();
    let set = bodies.active_mut();
    for i in 0..set.motion.len() {
        if set.local_inertias[i].is_kinematic() && !include_kinematics {
            continue;
        }
        let handle = set.index_to_handle[i];
        let pose = set.motion[i].pose;
        callbacks.integrate_velocity(handle, &pose, dt, &mut set.motion[i].velocity);
    }
}

/// Advance every active body's pose by its velocity and refresh the cached
/// world inverse inertia. Called at the end of each substep, after the
/// solver.
pub fn integrate_poses<C: PoseIntegratorCallbacks>(callbacks: &C, bodies: &mut Bodies, dt: f32) {
    let mode = callbacks.angular_integration_mode();
    let set = bodies.active_mut();
    for i in 0..set.motion.len() {
        let velocity = set.motion[i].velocity;
        set.motion[i].pose.position += velocity.linear * dt;
        let rotated = set.motion[i].pose.orientation.integrate(velocity.angular, dt);
        set.motion[i].pose.orientation = rotated;

        match mode {
            AngularIntegrationMode::Nonconserving => {}
            AngularIntegrationMode::ConserveMomentum => {
                let old_inverse = set.world_inertias[i].inverse_inertia;
                if old_inverse != Symmetric3::ZERO {
                    // Momentum from the pre-update inertia, held fixed
                    let momentum = invert_mat3(&old_inverse.to_mat3()).mul_vec(velocity.angular);
                    set.update_world_inertia(i);
                    set.motion[i].velocity.angular =
                        set.world_inertias[i].inverse_inertia.mul_vec(momentum);
                    continue;
                }
            }
            AngularIntegrationMode::ConserveMomentumWithGyroscopicTorque => {
                let local_inverse = set.local_inertias[i].inverse_inertia;
                if local_inverse != Symmetric3::ZERO {
                    // Implicit gyroscopic step in the body frame:
                    // w' = w - dt * I^-1 (w x (I w))
                    let to_local = rotated.conjugate();
                    let w_local = to_local.rotate(velocity.angular);
                    let momentum_local = invert_mat3(&local_inverse.to_mat3()).mul_vec(w_local);
                    let gyro = w_local.cross(momentum_local);
                    let w_corrected = w_local - local_inverse.mul_vec(gyro) * dt;
                    set.motion[i].velocity.angular = rotated.rotate(w_corrected);
                }
            }
        }
        set.update_world_inertia(i);
    }
}

/// 3x3 inverse by cofactor expansion. Returns zero for singular input,
/// which only arises for kinematic inertia and is filtered before use.
fn invert_mat3(m: &Mat3) -> Mat3 {
    let c0 = m.y.cross(m.z);
    let c1 = m.z.cross(m.x);
    let c2 = m.x.cross(m.y);
    let det = m.x.dot(c0);
    if det.abs() < 1e-12 {
        return Mat3::ZERO;
    }
    let inv_det = 1.0 / det;
    // Inverse is the transposed cofactor matrix over the determinant
    Mat3::from_columns(
        Vec3::new(c0.x, c1.x, c2.x) * inv_det,
        Vec3::new(c0.y, c1.y, c2.y) * inv_det,
        Vec3::new(c0.z, c1.z, c2.z) * inv_det,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bodies::{
        BodyActivityDescription, BodyDescription, BodyInertia, CollidableDescription,
    };
    use crate::handles::TypedIndex;
    use crate::math::{Quat, RigidPose};
    use crate::shapes::{BoxShape, Sphere};

    fn add_dynamic(bodies: &mut Bodies, position: Vec3, inertia: BodyInertia) -> BodyHandle {
        let description = BodyDescription::create_dynamic(
            RigidPose::at(position),
            inertia,
            CollidableDescription::new(TypedIndex::new(0, 0)),
            BodyActivityDescription::default(),
        );
        bodies.add(&description).unwrap()
    }

    fn sphere_inertia() -> BodyInertia {
        BodyInertia::from_mass_and_inertia(1.0, Sphere::new(0.5).inertia_tensor(1.0))
    }

    #[test]
    fn test_gravity_accumulates() {
        let mut bodies = Bodies::new();
        add_dynamic(&mut bodies, Vec3::ZERO, sphere_inertia());
        let mut callbacks = GravityCallbacks::default();
        let dt = 1.0 / 60.0;
        integrate_velocities(&mut callbacks, &mut bodies, dt);
        let v = bodies.active().motion[0].velocity.linear;
        assert!((v.y - -10.0 * dt).abs() < 1e-6, "One tick of gravity, vy={}", v.y);
    }

    #[test]
    fn test_kinematics_skip_velocity_callback() {
        let mut bodies = Bodies::new();
        let description = BodyDescription::create_kinematic(
            RigidPose::at(Vec3::ZERO),
            CollidableDescription::new(TypedIndex::new(0, 0)),
            BodyActivityDescription::default(),
        );
        bodies.add(&description).unwrap();
        let mut callbacks = GravityCallbacks::default();
        integrate_velocities(&mut callbacks, &mut bodies, 1.0 / 60.0);
        let v = bodies.active().motion[0].velocity.linear;
        assert_eq!(v, Vec3::ZERO, "Gravity never touches kinematics");
    }

    #[test]
    fn test_position_integration() {
        let mut bodies = Bodies::new();
        add_dynamic(&mut bodies, Vec3::ZERO, sphere_inertia());
        bodies.active_mut().motion[0].velocity.linear = Vec3::new(3.0, 0.0, 0.0);
        let callbacks = GravityCallbacks::default();
        integrate_poses(&callbacks, &mut bodies, 0.5);
        let p = bodies.active().motion[0].pose.position;
        assert!((p.x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_orientation_integration() {
        let mut bodies = Bodies::new();
        add_dynamic(&mut bodies, Vec3::ZERO, sphere_inertia());
        // Half a revolution per second about y
        bodies.active_mut().motion[0].velocity.angular =
            Vec3::new(0.0, std::f32::consts::PI, 0.0);
        let callbacks = GravityCallbacks::default();
        integrate_poses(&callbacks, &mut bodies, 1.0);
        let q = bodies.active().motion[0].pose.orientation;
        let expected = Quat::from_axis_angle(Vec3::UNIT_Y, std::f32::consts::PI);
        let dot = (q.x * expected.x + q.y * expected.y + q.z * expected.z + q.w * expected.w).abs();
        assert!(dot > 0.999, "Rotated half a turn about y, dot={}", dot);
    }

    #[test]
    fn test_world_inertia_refreshed() {
        let mut bodies = Bodies::new();
        // Long box: strongly anisotropic inertia
        let inertia = BodyInertia::from_mass_and_inertia(
            1.0,
            BoxShape::new(4.0, 0.2, 0.2).inertia_tensor(1.0),
        );
        add_dynamic(&mut bodies, Vec3::ZERO, inertia);
        let before = bodies.active().world_inertias[0].inverse_inertia;
        // Quarter turn about z swaps the x and y inertia terms
        bodies.active_mut().motion[0].velocity.angular =
            Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2);
        let callbacks = GravityCallbacks::default();
        integrate_poses(&callbacks, &mut bodies, 1.0);
        let after = bodies.active().world_inertias[0].inverse_inertia;
        assert!(
            (after.xx - before.yy).abs() < 0.05 * before.yy.abs().max(1.0),
            "World inertia follows orientation, after.xx={} before.yy={}",
            after.xx,
            before.yy
        );
    }

    #[test]
    fn test_momentum_conservation_mode() {
        struct Conserving;
        impl PoseIntegratorCallbacks for Conserving {
            fn angular_integration_mode(&self) -> AngularIntegrationMode {
                AngularIntegrationMode::ConserveMomentum
            }
        }
        let mut bodies = Bodies::new();
        let inertia = BodyInertia::from_mass_and_inertia(
            1.0,
            BoxShape::new(4.0, 0.2, 0.2).inertia_tensor(1.0),
        );
        add_dynamic(&mut bodies, Vec3::ZERO, inertia);
        // Spin off-axis so the world inertia changes as the box turns
        bodies.active_mut().motion[0].velocity.angular = Vec3::new(1.0, 2.0, 0.0);

        let world = bodies.active().world_inertias[0].inverse_inertia.to_mat3();
        let momentum_before =
            super::invert_mat3(&world).mul_vec(bodies.active().motion[0].velocity.angular);

        let callbacks = Conserving;
        for _ in 0..10 {
            integrate_poses(&callbacks, &mut bodies, 1.0 / 240.0);
        }

        let world_after = bodies.active().world_inertias[0].inverse_inertia.to_mat3();
        let momentum_after =
            super::invert_mat3(&world_after).mul_vec(bodies.active().motion[0].velocity.angular);
        let drift = (momentum_after - momentum_before).length() / momentum_before.length();
        assert!(drift < 1e-3, "Momentum conserved, drift={}", drift);
    }

    #[test]
    fn test_damping() {
        let mut bodies = Bodies::new();
        add_dynamic(&mut bodies, Vec3::ZERO, sphere_inertia());
        bodies.active_mut().motion[0].velocity.linear = Vec3::new(10.0, 0.0, 0.0);
        let mut callbacks = GravityCallbacks {
            gravity: Vec3::ZERO,
            linear_damping: 0.5,
            angular_damping: 1.0,
        };
        // One full second in substeps: retain about half the speed
        for _ in 0..60 {
            integrate_velocities(&mut callbacks, &mut bodies, 1.0 / 60.0);
        }
        let v = bodies.active().motion[0].velocity.linear.x;
        assert!((v - 5.0).abs() < 0.05, "Half retained after 1s, v={}", v);
    }
}
