//! Scalar Math Primitives
//!
//! `f32` vector, quaternion, and matrix types used throughout the engine.
//!
//! # Types
//!
//! - [`Vec3`]: 3-component vector
//! - [`Quat`]: unit quaternion for orientations
//! - [`Mat3`]: 3x3 matrix (column-major)
//! - [`Symmetric3`]: symmetric 3x3 matrix stored lower-triangular, used for
//!   inertia tensors
//!
//! Author: Moroya Sakamoto

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

// ============================================================================
// Vec3
// ============================================================================

/// 3-component vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// All zeroes
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    /// Unit X axis
    pub const UNIT_X: Self = Self {
        x: 1.0,
        y: 0.0,
        z: 0.0,
    };
    /// Unit Y axis
    pub const UNIT_Y: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };
    /// Unit Z axis
    pub const UNIT_Z: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    /// Create a vector from components
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Vector with all components equal to `v`
    #[inline]
    pub const fn splat(v: f32) -> Self {
        Self { x: v, y: v, z: v }
    }

    /// Dot product
    #[inline]
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Cross product
    #[inline]
    pub fn cross(self, rhs: Self) -> Self {
        Self {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    /// Squared length
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Normalized copy. Returns `Vec3::ZERO` for a zero-length input rather
    /// than producing NaNs.
    #[inline]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self / len
        } else {
            Self::ZERO
        }
    }

    /// Component-wise minimum
    #[inline]
    pub fn min(self, rhs: Self) -> Self {
        Self {
            x: self.x.min(rhs.x),
            y: self.y.min(rhs.y),
            z: self.z.min(rhs.z),
        }
    }

    /// Component-wise maximum
    #[inline]
    pub fn max(self, rhs: Self) -> Self {
        Self {
            x: self.x.max(rhs.x),
            y: self.y.max(rhs.y),
            z: self.z.max(rhs.z),
        }
    }

    /// Component-wise absolute value
    #[inline]
    pub fn abs(self) -> Self {
        Self {
            x: self.x.abs(),
            y: self.y.abs(),
            z: self.z.abs(),
        }
    }

    /// Component-wise multiply
    #[inline]
    pub fn mul_components(self, rhs: Self) -> Self {
        Self {
            x: self.x * rhs.x,
            y: self.y * rhs.y,
            z: self.z * rhs.z,
        }
    }

    /// Largest component
    #[inline]
    pub fn max_component(self) -> f32 {
        self.x.max(self.y).max(self.z)
    }
}

impl Add for Vec3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Self;
    #[inline]
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ============================================================================
// Quat
// ============================================================================

/// Unit quaternion representing an orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quat {
    /// X (vector) component
    pub x: f32,
    /// Y (vector) component
    pub y: f32,
    /// Z (vector) component
    pub z: f32,
    /// W (scalar) component
    pub w: f32,
}

impl Quat {
    /// Identity rotation
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Create from raw components
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `angle` radians about a unit `axis`
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self {
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
            w: c,
        }
    }

    /// Hamilton product `self * rhs` (applies `rhs` first)
    pub fn mul(self, rhs: Self) -> Self {
        Self {
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        }
    }

    /// Conjugate (inverse for unit quaternions)
    #[inline]
    pub fn conjugate(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
            w: self.w,
        }
    }

    /// Squared length
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Normalized copy. Falls back to identity for a degenerate input.
    pub fn normalize(self) -> Self {
        let len = self.length_squared().sqrt();
        if len > 0.0 {
            let inv = 1.0 / len;
            Self {
                x: self.x * inv,
                y: self.y * inv,
                z: self.z * inv,
                w: self.w * inv,
            }
        } else {
            Self::IDENTITY
        }
    }

    /// Rotate a vector by this quaternion
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // v' = v + 2 * (q_vec x (q_vec x v) + w * (q_vec x v))
        let q = Vec3::new(self.x, self.y, self.z);
        let t = q.cross(v) * 2.0;
        v + t * self.w + q.cross(t)
    }

    /// Incrementally integrate this orientation by an angular velocity over
    /// `dt`, returning a renormalized result.
    ///
    /// Uses the exact exponential map for the per-step rotation rather than
    /// the first-order `q += 0.5 * w * q * dt` update; the difference matters
    /// at large angular speeds.
    pub fn integrate(self, angular_velocity: Vec3, dt: f32) -> Self {
        let angle = angular_velocity.length() * dt;
        if angle < 1e-9 {
            return self;
        }
        let axis = angular_velocity.normalize();
        Self::from_axis_angle(axis, angle).mul(self).normalize()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Mat3
// ============================================================================

/// 3x3 matrix, column-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat3 {
    /// First column
    pub x: Vec3,
    /// Second column
    pub y: Vec3,
    /// Third column
    pub z: Vec3,
}

impl Mat3 {
    /// Identity matrix
    pub const IDENTITY: Self = Self {
        x: Vec3::UNIT_X,
        y: Vec3::UNIT_Y,
        z: Vec3::UNIT_Z,
    };

    /// Zero matrix
    pub const ZERO: Self = Self {
        x: Vec3::ZERO,
        y: Vec3::ZERO,
        z: Vec3::ZERO,
    };

    /// Build from columns
    #[inline]
    pub const fn from_columns(x: Vec3, y: Vec3, z: Vec3) -> Self {
        Self { x, y, z }
    }

    /// Rotation matrix from a unit quaternion
    pub fn from_quat(q: Quat) -> Self {
        let (x, y, z, w) = (q.x, q.y, q.z, q.w);
        let (x2, y2, z2) = (x + x, y + y, z + z);
        let (xx, yy, zz) = (x * x2, y * y2, z * z2);
        let (xy, xz, yz) = (x * y2, x * z2, y * z2);
        let (wx, wy, wz) = (w * x2, w * y2, w * z2);
        Self {
            x: Vec3::new(1.0 - yy - zz, xy + wz, xz - wy),
            y: Vec3::new(xy - wz, 1.0 - xx - zz, yz + wx),
            z: Vec3::new(xz + wy, yz - wx, 1.0 - xx - yy),
        }
    }

    /// Matrix-vector product
    #[inline]
    pub fn mul_vec(self, v: Vec3) -> Vec3 {
        self.x * v.x + self.y * v.y + self.z * v.z
    }

    /// Matrix-matrix product
    pub fn mul_mat(self, rhs: Self) -> Self {
        Self {
            x: self.mul_vec(rhs.x),
            y: self.mul_vec(rhs.y),
            z: self.mul_vec(rhs.z),
        }
    }

    /// Transpose
    pub fn transpose(self) -> Self {
        Self {
            x: Vec3::new(self.x.x, self.y.x, self.z.x),
            y: Vec3::new(self.x.y, self.y.y, self.z.y),
            z: Vec3::new(self.x.z, self.y.z, self.z.z),
        }
    }
}

// ============================================================================
// Symmetric3
// ============================================================================

/// Symmetric 3x3 matrix stored lower-triangular.
///
/// Used for inertia tensors; storing six scalars rather than nine keeps the
/// body dynamics arrays compact.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Symmetric3 {
    /// Row 0, column 0
    pub xx: f32,
    /// Row 1, column 0
    pub yx: f32,
    /// Row 1, column 1
    pub yy: f32,
    /// Row 2, column 0
    pub zx: f32,
    /// Row 2, column 1
    pub zy: f32,
    /// Row 2, column 2
    pub zz: f32,
}

impl Symmetric3 {
    /// Zero matrix
    pub const ZERO: Self = Self {
        xx: 0.0,
        yx: 0.0,
        yy: 0.0,
        zx: 0.0,
        zy: 0.0,
        zz: 0.0,
    };

    /// Diagonal matrix
    #[inline]
    pub const fn diagonal(xx: f32, yy: f32, zz: f32) -> Self {
        Self {
            xx,
            yx: 0.0,
            yy,
            zx: 0.0,
            zy: 0.0,
            zz,
        }
    }

    /// Matrix-vector product
    #[inline]
    pub fn mul_vec(self, v: Vec3) -> Vec3 {
        Vec3 {
            x: self.xx * v.x + self.yx * v.y + self.zx * v.z,
            y: self.yx * v.x + self.yy * v.y + self.zy * v.z,
            z: self.zx * v.x + self.zy * v.y + self.zz * v.z,
        }
    }

    /// Scale every element
    #[inline]
    pub fn scale(self, s: f32) -> Self {
        Self {
            xx: self.xx * s,
            yx: self.yx * s,
            yy: self.yy * s,
            zx: self.zx * s,
            zy: self.zy * s,
            zz: self.zz * s,
        }
    }

    /// Element-wise sum
    #[inline]
    pub fn add(self, rhs: Self) -> Self {
        Self {
            xx: self.xx + rhs.xx,
            yx: self.yx + rhs.yx,
            yy: self.yy + rhs.yy,
            zx: self.zx + rhs.zx,
            zy: self.zy + rhs.zy,
            zz: self.zz + rhs.zz,
        }
    }

    /// Full matrix form
    pub fn to_mat3(self) -> Mat3 {
        Mat3 {
            x: Vec3::new(self.xx, self.yx, self.zx),
            y: Vec3::new(self.yx, self.yy, self.zy),
            z: Vec3::new(self.zx, self.zy, self.zz),
        }
    }

    /// Rotation sandwich `R * self * R^T` for a rotation matrix `R`.
    ///
    /// Transforms a local-frame tensor into the world frame.
    pub fn rotation_sandwich(self, r: Mat3) -> Self {
        let m = self.to_mat3();
        let result = r.mul_mat(m).mul_mat(r.transpose());
        Self {
            xx: result.x.x,
            yx: result.x.y,
            yy: result.y.y,
            zx: result.x.z,
            zy: result.y.z,
            zz: result.z.z,
        }
    }

    /// Inverse via the adjugate. Singular inputs (zero determinant) return
    /// `Symmetric3::ZERO`, the "infinite mass" sentinel.
    pub fn inverse(self) -> Self {
        let m = self;
        let c0 = m.yy * m.zz - m.zy * m.zy;
        let c1 = m.zx * m.zy - m.yx * m.zz;
        let c2 = m.yx * m.zy - m.zx * m.yy;
        let det = m.xx * c0 + m.yx * c1 + m.zx * c2;
        if det.abs() < 1e-12 {
            return Self::ZERO;
        }
        let inv = 1.0 / det;
        Self {
            xx: c0 * inv,
            yx: c1 * inv,
            yy: (m.xx * m.zz - m.zx * m.zx) * inv,
            zx: c2 * inv,
            zy: (m.zx * m.yx - m.xx * m.zy) * inv,
            zz: (m.xx * m.yy - m.yx * m.yx) * inv,
        }
    }
}

// ============================================================================
// RigidPose
// ============================================================================

/// Position and orientation of a body or static.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RigidPose {
    /// World-space position
    pub position: Vec3,
    /// World-space orientation
    pub orientation: Quat,
}

impl RigidPose {
    /// Identity pose at the origin
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    /// Pose at `position` with identity orientation
    #[inline]
    pub const fn at(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Create from position and orientation
    #[inline]
    pub const fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Transform a local point into world space
    #[inline]
    pub fn transform(self, local: Vec3) -> Vec3 {
        self.position + self.orientation.rotate(local)
    }

    /// Transform a world point into local space
    #[inline]
    pub fn inverse_transform(self, world: Vec3) -> Vec3 {
        self.orientation.conjugate().rotate(world - self.position)
    }

    /// Compose two poses: `self` applied after `local`
    pub fn compose(self, local: RigidPose) -> RigidPose {
        RigidPose {
            position: self.transform(local.position),
            orientation: self.orientation.mul(local.orientation).normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_vec3_ops() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);
        assert!(approx(a.dot(b), 32.0));
        let c = Vec3::UNIT_X.cross(Vec3::UNIT_Y);
        assert!(approx(c.z, 1.0));
        assert!(approx(Vec3::new(3.0, 4.0, 0.0).length(), 5.0));
    }

    #[test]
    fn test_vec3_normalize_zero() {
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn test_quat_rotate() {
        let q = Quat::from_axis_angle(Vec3::UNIT_Z, core::f32::consts::FRAC_PI_2);
        let v = q.rotate(Vec3::UNIT_X);
        assert!(approx(v.x, 0.0), "x = {}", v.x);
        assert!(approx(v.y, 1.0), "y = {}", v.y);
    }

    #[test]
    fn test_quat_mul_compose() {
        let a = Quat::from_axis_angle(Vec3::UNIT_Y, 0.3);
        let b = Quat::from_axis_angle(Vec3::UNIT_Y, 0.5);
        let composed = a.mul(b);
        let direct = Quat::from_axis_angle(Vec3::UNIT_Y, 0.8);
        assert!(approx(composed.y, direct.y));
        assert!(approx(composed.w, direct.w));
    }

    #[test]
    fn test_quat_integrate() {
        // pi/2 per second about Z for one second in small steps
        let mut q = Quat::IDENTITY;
        let w = Vec3::new(0.0, 0.0, core::f32::consts::FRAC_PI_2);
        for _ in 0..100 {
            q = q.integrate(w, 0.01);
        }
        let v = q.rotate(Vec3::UNIT_X);
        assert!(approx(v.y, 1.0), "expected rotation to +Y, got {:?}", v);
    }

    #[test]
    fn test_mat3_from_quat() {
        let q = Quat::from_axis_angle(Vec3::UNIT_Z, 0.7);
        let m = Mat3::from_quat(q);
        let v = Vec3::new(0.3, -0.9, 0.4);
        let via_q = q.rotate(v);
        let via_m = m.mul_vec(v);
        assert!(approx(via_q.x, via_m.x));
        assert!(approx(via_q.y, via_m.y));
        assert!(approx(via_q.z, via_m.z));
    }

    #[test]
    fn test_symmetric3_inverse() {
        let m = Symmetric3::diagonal(2.0, 4.0, 8.0);
        let inv = m.inverse();
        assert!(approx(inv.xx, 0.5));
        assert!(approx(inv.yy, 0.25));
        assert!(approx(inv.zz, 0.125));

        assert_eq!(Symmetric3::ZERO.inverse(), Symmetric3::ZERO);
    }

    #[test]
    fn test_symmetric3_rotation_sandwich() {
        // Rotating a diagonal tensor 90 degrees about Z swaps xx and yy
        let m = Symmetric3::diagonal(1.0, 2.0, 3.0);
        let r = Mat3::from_quat(Quat::from_axis_angle(
            Vec3::UNIT_Z,
            core::f32::consts::FRAC_PI_2,
        ));
        let rotated = m.rotation_sandwich(r);
        assert!(approx(rotated.xx, 2.0), "xx = {}", rotated.xx);
        assert!(approx(rotated.yy, 1.0), "yy = {}", rotated.yy);
        assert!(approx(rotated.zz, 3.0));
    }

    #[test]
    fn test_pose_transform_roundtrip() {
        let pose = RigidPose::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_axis_angle(Vec3::UNIT_Y, 0.4),
        );
        let p = Vec3::new(-2.0, 0.5, 7.0);
        let back = pose.inverse_transform(pose.transform(p));
        assert!(approx(back.x, p.x));
        assert!(approx(back.y, p.y));
        assert!(approx(back.z, p.z));
    }
}
