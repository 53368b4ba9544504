//! Contact Generation
//!
//! Produces contact manifolds for convex shape pairs. Analytic kernels cover
//! the sphere and box pairings; everything else goes through GJK for the
//! separated/touching case and EPA for penetration depth.
//!
//! # Algorithms
//!
//! - **Sphere kernels**: closed-form sphere-sphere and sphere-box
//! - **Box-box**: SAT over the 15 candidate axes, reference-face clipping
//!   for up to four contact points with stable feature ids
//! - **GJK (Gilbert-Johnson-Keerthi)**: closest-point query with witness
//!   tracking for speculative contacts between separated shapes
//! - **EPA (Expanding Polytope Algorithm)**: penetration depth and normal
//!   once GJK reports an overlap
//!
//! All normals point from shape A toward shape B. Positive depth is
//! penetration; negative depth is a speculative contact at that gap.
//!
//! Author: Moroya Sakamoto

use crate::error::PhysicsError;
use crate::handles::TypedIndex;
use crate::math::{Mat3, RigidPose, Vec3};
use crate::shapes::{
    BoxShape, Capsule, ConvexHull, Cylinder, ShapeCatalog, Sphere, SupportMap, Triangle, BOX,
    CAPSULE, CONVEX_HULL, CYLINDER, SPHERE, TRIANGLE,
};

/// Maximum contact points in one manifold.
pub const MAX_CONTACTS: usize = 4;

// ============================================================================
// Contact manifold
// ============================================================================

/// One contact point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContactPoint {
    /// World-space contact position
    pub position: Vec3,
    /// Penetration depth; negative means a speculative gap
    pub depth: f32,
    /// Stable id of the generating shape features; matching ids across
    /// frames carry warm-start impulses
    pub feature_id: u32,
}

/// Up to four contact points sharing one normal.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactManifold {
    /// Shared normal, from A toward B
    pub normal: Vec3,
    /// Contact points; only the first `count` are valid
    pub points: [ContactPoint; MAX_CONTACTS],
    /// Valid point count
    pub count: u32,
}

impl ContactManifold {
    /// Empty manifold.
    pub const EMPTY: Self = Self {
        normal: Vec3::ZERO,
        points: [ContactPoint {
            position: Vec3::ZERO,
            depth: 0.0,
            feature_id: 0,
        }; MAX_CONTACTS],
        count: 0,
    };

    /// Single-point manifold.
    pub fn single(normal: Vec3, position: Vec3, depth: f32, feature_id: u32) -> Self {
        let mut manifold = Self::EMPTY;
        manifold.normal = normal;
        manifold.points[0] = ContactPoint {
            position,
            depth,
            feature_id,
        };
        manifold.count = 1;
        manifold
    }

    /// Append a point if room remains.
    pub fn push(&mut self, point: ContactPoint) {
        if (self.count as usize) < MAX_CONTACTS {
            self.points[self.count as usize] = point;
            self.count += 1;
        }
    }

    /// Swap A and B: the normal reverses, positions and depths stand.
    pub fn flipped(mut self) -> Self {
        self.normal = -self.normal;
        self
    }

    /// Drop points whose gap exceeds the speculative margin.
    pub fn prune(&mut self, speculative_margin: f32) {
        let mut kept = 0usize;
        for i in 0..self.count as usize {
            if self.points[i].depth >= -speculative_margin {
                self.points[kept] = self.points[i];
                kept += 1;
            }
        }
        self.count = kept as u32;
    }
}

// ============================================================================
// Borrowed convex shapes
// ============================================================================

/// A borrowed convex catalog entry. Compounds and meshes decompose into
/// these before contact generation.
#[derive(Clone, Copy, Debug)]
pub enum ConvexRef<'a> {
    /// Sphere
    Sphere(&'a Sphere),
    /// Capsule
    Capsule(&'a Capsule),
    /// Box
    Box(&'a BoxShape),
    /// Cylinder
    Cylinder(&'a Cylinder),
    /// Triangle
    Triangle(&'a Triangle),
    /// Convex hull
    Hull(&'a ConvexHull),
}

impl SupportMap for ConvexRef<'_> {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        match self {
            ConvexRef::Sphere(s) => s.support_local(direction),
            ConvexRef::Capsule(c) => c.support_local(direction),
            ConvexRef::Box(b) => b.support_local(direction),
            ConvexRef::Cylinder(c) => c.support_local(direction),
            ConvexRef::Triangle(t) => t.support_local(direction),
            ConvexRef::Hull(h) => h.support_local(direction),
        }
    }
}

/// Resolve a convex catalog entry. Compounds and meshes are rejected; the
/// narrow phase recurses into their children instead.
pub fn convex_ref(catalog: &ShapeCatalog, index: TypedIndex) -> Result<ConvexRef<'_>, PhysicsError> {
    match index.shape_type() {
        SPHERE => Ok(ConvexRef::Sphere(catalog.sphere(index)?)),
        CAPSULE => Ok(ConvexRef::Capsule(catalog.capsule(index)?)),
        BOX => Ok(ConvexRef::Box(catalog.box_shape(index)?)),
        CYLINDER => Ok(ConvexRef::Cylinder(catalog.cylinder(index)?)),
        TRIANGLE => Ok(ConvexRef::Triangle(catalog.triangle(index)?)),
        CONVEX_HULL => Ok(ConvexRef::Hull(catalog.convex_hull(index)?)),
        other => Err(PhysicsError::InvalidShapeIndex {
            shape_type: other,
            index: index.index() as usize,
        }),
    }
}

/// A convex shape placed in the world; the GJK/EPA support source.
#[derive(Clone, Copy, Debug)]
pub struct PlacedConvex<'a> {
    /// Shape
    pub shape: ConvexRef<'a>,
    /// World pose
    pub pose: RigidPose,
}

impl PlacedConvex<'_> {
    /// World-space support point.
    #[inline]
    pub fn support(&self, direction: Vec3) -> Vec3 {
        let local_dir = self.pose.orientation.conjugate().rotate(direction);
        self.pose.transform(self.shape.support_local(local_dir))
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Generate the contact manifold for a convex pair. Points farther apart
/// than `speculative_margin` are pruned; the result may be empty.
pub fn generate_contacts(
    a: &PlacedConvex<'_>,
    b: &PlacedConvex<'_>,
    speculative_margin: f32,
) -> ContactManifold {
    let mut manifold = match (&a.shape, &b.shape) {
        (ConvexRef::Sphere(sa), ConvexRef::Sphere(sb)) => {
            sphere_sphere(sa, a.pose.position, sb, b.pose.position)
        }
        (ConvexRef::Sphere(s), ConvexRef::Box(bx)) => {
            sphere_box(s, a.pose.position, bx, &b.pose)
        }
        (ConvexRef::Box(bx), ConvexRef::Sphere(s)) => {
            sphere_box(s, b.pose.position, bx, &a.pose).flipped()
        }
        (ConvexRef::Box(ba), ConvexRef::Box(bb)) => {
            box_box(ba, &a.pose, bb, &b.pose, speculative_margin)
        }
        _ => general_convex(a, b),
    };
    manifold.prune(speculative_margin);
    manifold
}

// ============================================================================
// Analytic kernels
// ============================================================================

fn sphere_sphere(a: &Sphere, ca: Vec3, b: &Sphere, cb: Vec3) -> ContactManifold {
    let offset = cb - ca;
    let distance = offset.length();
    // Coincident centers: pick an arbitrary separating direction
    let normal = if distance > 1e-9 {
        offset / distance
    } else {
        Vec3::UNIT_Y
    };
    let depth = a.radius + b.radius - distance;
    let position = ca + normal * (a.radius - depth * 0.5);
    ContactManifold::single(normal, position, depth, 0)
}

fn sphere_box(sphere: &Sphere, center: Vec3, bx: &BoxShape, box_pose: &RigidPose) -> ContactManifold {
    // Work in box local space
    let local_center = box_pose.inverse_transform(center);
    let he = bx.half_extents;
    let clamped = local_center.max(-he).min(he);
    let offset = local_center - clamped;
    let distance_squared = offset.length_squared();

    if distance_squared > 1e-12 {
        // Center outside the box: normal from surface toward the sphere
        let distance = distance_squared.sqrt();
        let local_normal = offset / distance;
        let depth = sphere.radius - distance;
        let normal_to_sphere = box_pose.orientation.rotate(local_normal);
        // Midway between the box surface and the sphere surface
        let position =
            box_pose.transform(clamped) + normal_to_sphere * ((-depth).max(0.0) * 0.5);
        // A is the sphere: normal points sphere -> box
        ContactManifold::single(-normal_to_sphere, position, depth, 0)
    } else {
        // Center inside the box: exit through the nearest face
        let gaps = [
            he.x - local_center.x,
            local_center.x + he.x,
            he.y - local_center.y,
            local_center.y + he.y,
            he.z - local_center.z,
            local_center.z + he.z,
        ];
        let mut face = 0;
        for (i, &g) in gaps.iter().enumerate() {
            if g < gaps[face] {
                face = i;
            }
        }
        let local_normal = match face {
            0 => Vec3::UNIT_X,
            1 => -Vec3::UNIT_X,
            2 => Vec3::UNIT_Y,
            3 => -Vec3::UNIT_Y,
            4 => Vec3::UNIT_Z,
            _ => -Vec3::UNIT_Z,
        };
        let depth = gaps[face] + sphere.radius;
        let normal_to_sphere = box_pose.orientation.rotate(local_normal);
        ContactManifold::single(-normal_to_sphere, center, depth, face as u32)
    }
}

// ============================================================================
// Box-box SAT + clipping
// ============================================================================

/// SAT threshold preferring face axes over edge axes when penetrations are
/// nearly equal; face manifolds are far more stable.
const FACE_BIAS: f32 = 1e-4;

fn box_box(
    a: &BoxShape,
    pose_a: &RigidPose,
    b: &BoxShape,
    pose_b: &RigidPose,
    speculative_margin: f32,
) -> ContactManifold {
    let ra = Mat3::from_quat(pose_a.orientation);
    let rb = Mat3::from_quat(pose_b.orientation);
    let axes_a = [ra.x, ra.y, ra.z];
    let axes_b = [rb.x, rb.y, rb.z];
    let offset = pose_b.position - pose_a.position;

    let project = |axis: Vec3, axes: &[Vec3; 3], he: Vec3| -> f32 {
        he.x * axis.dot(axes[0]).abs()
            + he.y * axis.dot(axes[1]).abs()
            + he.z * axis.dot(axes[2]).abs()
    };

    // Track the least-penetration axis; faces first, then edge crosses
    let mut best_depth = f32::INFINITY;
    let mut best_axis = Vec3::UNIT_Y;
    let mut best_face: Option<(usize, bool)> = None; // (axis index, axis is on A)

    let mut test_axis = |axis: Vec3, face: Option<(usize, bool)>| -> f32 {
        let len = axis.length();
        if len < 1e-9 {
            return f32::INFINITY;
        }
        let axis = axis / len;
        let separation = offset.dot(axis);
        let overlap = project(axis, &axes_a, a.half_extents)
            + project(axis, &axes_b, b.half_extents)
            - separation.abs();
        // Edge axes pay a bias so face manifolds win near-ties
        let score = if face.is_some() {
            overlap
        } else {
            overlap + FACE_BIAS
        };
        if score < best_depth {
            best_depth = score;
            best_axis = if separation >= 0.0 { axis } else { -axis };
            best_face = face;
        }
        overlap
    };

    for (i, &axis) in axes_a.iter().enumerate() {
        if test_axis(axis, Some((i, true))) < -speculative_margin {
            return ContactManifold::EMPTY;
        }
    }
    for (i, &axis) in axes_b.iter().enumerate() {
        if test_axis(axis, Some((i, false))) < -speculative_margin {
            return ContactManifold::EMPTY;
        }
    }
    for &ea in &axes_a {
        for &eb in &axes_b {
            if test_axis(ea.cross(eb), None) < -speculative_margin {
                return ContactManifold::EMPTY;
            }
        }
    }

    // best_axis points from A toward B
    match best_face {
        Some((axis_index, on_a)) => {
            if on_a {
                clip_face_manifold(
                    b,
                    pose_b,
                    &axes_b,
                    a,
                    pose_a,
                    &axes_a,
                    axis_index,
                    best_axis,
                    false,
                )
            } else {
                // Reference face on B; clip A's incident face, flip at the end
                clip_face_manifold(
                    a,
                    pose_a,
                    &axes_a,
                    b,
                    pose_b,
                    &axes_b,
                    axis_index,
                    -best_axis,
                    true,
                )
            }
        }
        None => {
            // Edge-edge: single contact between the closest supporting points
            let pa = support_point(a, pose_a, best_axis);
            let pb = support_point(b, pose_b, -best_axis);
            ContactManifold::single(best_axis, (pa + pb) * 0.5, best_depth, 0xFFFF)
        }
    }
}

/// Box support point in world space.
fn support_point(bx: &BoxShape, pose: &RigidPose, direction: Vec3) -> Vec3 {
    let local_dir = pose.orientation.conjugate().rotate(direction);
    pose.transform(bx.support_local(local_dir))
}

/// Build a face contact manifold: find the incident face on `inc` most
/// opposed to the reference normal, clip it against the reference face's
/// side planes, and keep points near or below the reference plane.
///
/// `reference_normal` points from the reference box outward (toward the
/// incident box). `flip` reverses the final manifold normal so it always
/// runs A→B for the caller's pair order.
#[allow(clippy::too_many_arguments)]
fn clip_face_manifold(
    inc: &BoxShape,
    inc_pose: &RigidPose,
    inc_axes: &[Vec3; 3],
    reference: &BoxShape,
    ref_pose: &RigidPose,
    ref_axes: &[Vec3; 3],
    ref_axis: usize,
    reference_normal: Vec3,
    flip: bool,
) -> ContactManifold {
    // Incident face: the one whose outward normal is most anti-parallel to
    // the reference normal
    let mut inc_axis = 0;
    let mut inc_sign = 1.0f32;
    let mut most_opposed = f32::INFINITY;
    for (i, &axis) in inc_axes.iter().enumerate() {
        let d = axis.dot(reference_normal);
        if d < most_opposed {
            most_opposed = d;
            inc_axis = i;
            inc_sign = 1.0;
        }
        if -d < most_opposed {
            most_opposed = -d;
            inc_axis = i;
            inc_sign = -1.0;
        }
    }

    // Incident face corners in world space
    let he = inc.half_extents;
    let inc_extent = [he.x, he.y, he.z];
    let (u_axis, v_axis) = ((inc_axis + 1) % 3, (inc_axis + 2) % 3);
    let face_center =
        inc_pose.position + inc_axes[inc_axis] * (inc_sign * inc_extent[inc_axis]);
    let u = inc_axes[u_axis] * inc_extent[u_axis];
    let v = inc_axes[v_axis] * inc_extent[v_axis];
    let mut polygon: Vec<(Vec3, u32)> = vec![
        (face_center + u + v, 0),
        (face_center - u + v, 1),
        (face_center - u - v, 2),
        (face_center + u - v, 3),
    ];
    // Incident face identity feeds the feature id so ids change when a
    // different face takes over
    let face_code = ((inc_axis as u32) << 1 | (inc_sign < 0.0) as u32) << 4;

    // Clip against the four side planes of the reference face
    let ref_he = [
        reference.half_extents.x,
        reference.half_extents.y,
        reference.half_extents.z,
    ];
    for side in 0..3usize {
        if side == ref_axis {
            continue;
        }
        for sign in [1.0f32, -1.0] {
            let plane_normal = ref_axes[side] * -sign;
            let plane_offset =
                -(ref_pose.position + ref_axes[side] * (sign * ref_he[side])).dot(plane_normal);
            polygon = clip_polygon(&polygon, plane_normal, plane_offset, side as u32, sign);
            if polygon.is_empty() {
                return ContactManifold::EMPTY;
            }
        }
    }

    // Keep points at or below the reference face plane (within margin; the
    // caller prunes by speculative margin afterwards)
    let face_point = ref_pose.position + reference_normal * ref_he[ref_axis];
    let mut manifold = ContactManifold::EMPTY;
    manifold.normal = if flip {
        -reference_normal
    } else {
        reference_normal
    };
    // Sort deepest-first so truncation at four points keeps the load bearers
    polygon.sort_by(|x, y| {
        let dx = (x.0 - face_point).dot(reference_normal);
        let dy = (y.0 - face_point).dot(reference_normal);
        dx.partial_cmp(&dy).unwrap_or(core::cmp::Ordering::Equal)
    });
    for (point, id) in polygon {
        let depth = -(point - face_point).dot(reference_normal);
        manifold.push(ContactPoint {
            position: point - reference_normal * (depth.max(0.0) * 0.5),
            depth,
            feature_id: face_code | id,
        });
    }
    manifold
}

/// Sutherland-Hodgman clip of a polygon against one plane. Intersection
/// points take a feature id derived from the clipping plane so they stay
/// stable across frames.
fn clip_polygon(
    polygon: &[(Vec3, u32)],
    plane_normal: Vec3,
    plane_offset: f32,
    plane_axis: u32,
    plane_sign: f32,
) -> Vec<(Vec3, u32)> {
    let mut out = Vec::with_capacity(polygon.len() + 2);
    let edge_code = 0x100 << (plane_axis * 2 + (plane_sign < 0.0) as u32);
    for i in 0..polygon.len() {
        let (p0, id0) = polygon[i];
        let (p1, id1) = polygon[(i + 1) % polygon.len()];
        let d0 = p0.dot(plane_normal) + plane_offset;
        let d1 = p1.dot(plane_normal) + plane_offset;
        if d0 >= 0.0 {
            out.push((p0, id0));
        }
        if (d0 >= 0.0) != (d1 >= 0.0) {
            let t = d0 / (d0 - d1);
            out.push((p0 + (p1 - p0) * t, edge_code | id0 << 4 | id1));
        }
    }
    out
}

// ============================================================================
// GJK / EPA
// ============================================================================

const GJK_MAX_ITERATIONS: usize = 64;
const GJK_EPSILON: f32 = 1e-10;

#[derive(Clone, Copy, Debug, Default)]
struct SimplexVertex {
    /// Point on the Minkowski difference A - B
    m: Vec3,
    /// Witness point on A
    a: Vec3,
}

fn minkowski_support(a: &PlacedConvex<'_>, b: &PlacedConvex<'_>, direction: Vec3) -> SimplexVertex {
    let pa = a.support(direction);
    let pb = b.support(-direction);
    SimplexVertex { m: pa - pb, a: pa }
}

/// General convex pair: GJK for the separated case, EPA for penetration.
fn general_convex(a: &PlacedConvex<'_>, b: &PlacedConvex<'_>) -> ContactManifold {
    let mut direction = b.pose.position - a.pose.position;
    if direction.length_squared() < GJK_EPSILON {
        direction = Vec3::UNIT_X;
    }

    let mut simplex: Vec<SimplexVertex> = Vec::with_capacity(4);
    simplex.push(minkowski_support(a, b, direction));

    for _ in 0..GJK_MAX_ITERATIONS {
        // Closest point to the origin on the current simplex, with
        // barycentric weights for witness reconstruction
        let (closest, weights) = closest_on_simplex(&simplex);
        let dist_squared = closest.length_squared();
        if dist_squared < GJK_EPSILON || simplex.len() == 4 {
            // Origin enclosed (or numerically on the boundary): penetrating
            return epa(a, b, &simplex);
        }

        let d = -closest;
        let support = minkowski_support(a, b, d);
        // No progress past the current closest point: shapes are separated
        if d.dot(support.m) <= d.dot(closest) + 1e-7 * dist_squared.sqrt().max(1.0) {
            let gap = dist_squared.sqrt();
            let normal = d / gap;
            let mut witness_a = Vec3::ZERO;
            for (vertex, w) in simplex.iter().zip(weights.iter()) {
                witness_a += vertex.a * *w;
            }
            let witness_b = witness_a - closest;
            return ContactManifold::single(
                normal,
                (witness_a + witness_b) * 0.5,
                -gap,
                0,
            );
        }
        simplex.push(support);
        reduce_simplex(&mut simplex);
    }

    ContactManifold::EMPTY
}

/// Closest point to the origin on a 1-3 vertex simplex, with barycentric
/// weights matching the simplex vertex order.
fn closest_on_simplex(simplex: &[SimplexVertex]) -> (Vec3, [f32; 4]) {
    match simplex.len() {
        1 => (simplex[0].m, [1.0, 0.0, 0.0, 0.0]),
        2 => {
            let (p, q) = (simplex[0].m, simplex[1].m);
            let t = segment_param(p, q);
            (p + (q - p) * t, [1.0 - t, t, 0.0, 0.0])
        }
        _ => {
            let (p, q, r) = (simplex[0].m, simplex[1].m, simplex[2].m);
            let (u, v, w) = triangle_barycentric(p, q, r);
            (p * u + q * v + r * w, [u, v, w, 0.0])
        }
    }
}

/// Parameter of the origin's projection onto segment p-q, clamped to [0,1].
fn segment_param(p: Vec3, q: Vec3) -> f32 {
    let d = q - p;
    let len_squared = d.length_squared();
    if len_squared < GJK_EPSILON {
        return 0.0;
    }
    (-p.dot(d) / len_squared).clamp(0.0, 1.0)
}

/// Barycentric coordinates of the origin's closest point on triangle p-q-r.
fn triangle_barycentric(p: Vec3, q: Vec3, r: Vec3) -> (f32, f32, f32) {
    let ab = q - p;
    let ac = r - p;
    let ap = -p;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (1.0, 0.0, 0.0);
    }
    let bp = -q;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (0.0, 1.0, 0.0);
    }
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return (1.0 - t, t, 0.0);
    }
    let cp = -r;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (0.0, 0.0, 1.0);
    }
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return (1.0 - t, 0.0, t);
    }
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (0.0, 1.0 - t, t);
    }
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (1.0 - v - w, v, w)
}

/// Drop simplex vertices not supporting the closest point, keeping at most
/// the face nearest the origin when four points accumulate.
fn reduce_simplex(simplex: &mut Vec<SimplexVertex>) {
    if simplex.len() < 4 {
        return;
    }
    // Check whether the origin is inside the tetrahedron; if so keep all
    // four for EPA seeding
    let (a, b, c, d) = (simplex[0].m, simplex[1].m, simplex[2].m, simplex[3].m);
    let inside = |p: Vec3, q: Vec3, r: Vec3, other: Vec3| -> bool {
        let n = (q - p).cross(r - p);
        let sign_other = n.dot(other - p);
        // A degenerate face or flattened tetrahedron encloses nothing and
        // must not seed EPA
        if n.length_squared() < GJK_EPSILON || sign_other.abs() < GJK_EPSILON {
            return false;
        }
        sign_other * n.dot(-p) >= 0.0
    };
    if inside(a, b, c, d) && inside(a, b, d, c) && inside(a, c, d, b) && inside(b, c, d, a) {
        return;
    }
    // Otherwise keep the face closest to the origin
    let faces = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, face) in faces.iter().enumerate() {
        let (u, v, w) = triangle_barycentric(
            simplex[face[0]].m,
            simplex[face[1]].m,
            simplex[face[2]].m,
        );
        let closest = simplex[face[0]].m * u + simplex[face[1]].m * v + simplex[face[2]].m * w;
        let dist = closest.length_squared();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    let keep = faces[best];
    let kept = [simplex[keep[0]], simplex[keep[1]], simplex[keep[2]]];
    simplex.clear();
    simplex.extend_from_slice(&kept);
}

/// EPA face (triangle)
#[derive(Clone, Copy, Debug)]
struct EpaFace {
    indices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

/// EPA for penetration depth and normal. The seed simplex comes from GJK;
/// degenerate seeds are padded into a tetrahedron around the origin.
fn epa(a: &PlacedConvex<'_>, b: &PlacedConvex<'_>, seed: &[SimplexVertex]) -> ContactManifold {
    const MAX_ITERATIONS: usize = 64;
    const EPSILON: f32 = 1e-5;

    let mut vertices: Vec<Vec3> = seed.iter().map(|v| v.m).collect();
    // Pad degenerate seeds by sampling the cardinal directions
    let pads = [
        Vec3::UNIT_X,
        -Vec3::UNIT_X,
        Vec3::UNIT_Y,
        -Vec3::UNIT_Y,
        Vec3::UNIT_Z,
        -Vec3::UNIT_Z,
    ];
    let mut pad_index = 0;
    while vertices.len() < 4 && pad_index < pads.len() {
        let candidate = minkowski_support(a, b, pads[pad_index]).m;
        pad_index += 1;
        if !vertices
            .iter()
            .any(|v| (*v - candidate).length_squared() < GJK_EPSILON)
        {
            vertices.push(candidate);
        }
    }
    if vertices.len() < 4 {
        return ContactManifold::EMPTY;
    }

    let mut faces: Vec<EpaFace> = Vec::with_capacity(64);
    add_face(&mut faces, &vertices, 0, 1, 2);
    add_face(&mut faces, &vertices, 0, 3, 1);
    add_face(&mut faces, &vertices, 0, 2, 3);
    add_face(&mut faces, &vertices, 1, 3, 2);

    for _ in 0..MAX_ITERATIONS {
        let closest_face = match faces.iter().min_by(|x, y| {
            x.distance
                .partial_cmp(&y.distance)
                .unwrap_or(core::cmp::Ordering::Equal)
        }) {
            Some(f) => *f,
            None => return ContactManifold::EMPTY,
        };

        let support = minkowski_support(a, b, closest_face.normal);
        let distance = support.m.dot(closest_face.normal);

        if distance - closest_face.distance < EPSILON {
            let normal = closest_face.normal;
            let depth = closest_face.distance;
            let point_a = a.support(normal);
            let point_b = b.support(-normal);
            return ContactManifold::single(normal, (point_a + point_b) * 0.5, depth, 0);
        }

        let new_index = vertices.len();
        vertices.push(support.m);

        // Remove faces visible from the new vertex, keeping the horizon edges
        let mut edges: Vec<(usize, usize)> = Vec::new();
        faces.retain(|face| {
            let v = vertices[face.indices[0]];
            if face.normal.dot(support.m - v) > 0.0 {
                for i in 0..3 {
                    let edge = (face.indices[i], face.indices[(i + 1) % 3]);
                    if let Some(pos) = edges.iter().position(|&e| e == (edge.1, edge.0)) {
                        edges.remove(pos);
                    } else {
                        edges.push(edge);
                    }
                }
                false
            } else {
                true
            }
        });
        for (i, j) in edges {
            add_face(&mut faces, &vertices, i, j, new_index);
        }
    }

    ContactManifold::EMPTY
}

fn add_face(faces: &mut Vec<EpaFace>, vertices: &[Vec3], i: usize, j: usize, k: usize) {
    let a = vertices[i];
    let ab = vertices[j] - a;
    let ac = vertices[k] - a;
    let normal = ab.cross(ac).normalize();
    if normal == Vec3::ZERO {
        return;
    }
    let distance = a.dot(normal);
    let (normal, distance) = if distance < 0.0 {
        (-normal, -distance)
    } else {
        (normal, distance)
    };
    faces.push(EpaFace {
        indices: [i, j, k],
        normal,
        distance,
    });
}
