//! Shape Catalog
//!
//! Shape definitions and their central registry. Shapes are stored in
//! per-type growable batches and addressed by [`TypedIndex`]; collidables
//! reference shapes by index so many bodies can share one shape.
//!
//! # Supported Shapes
//!
//! - Sphere, Capsule, Box, Cylinder (primitive convexes)
//! - Triangle (one-sided, for mesh surfaces)
//! - Convex hull (point cloud, support-mapped)
//! - Compound (children referencing other catalog entries)
//! - Mesh (owned triangle soup with a static acceleration tree)
//!
//! Inertia computation is a pure function of shape and mass; compound
//! inertia composes child contributions with the parallel axis theorem.
//!
//! Author: Moroya Sakamoto

use crate::broad_phase::Aabb;
use crate::error::PhysicsError;
use crate::handles::TypedIndex;
use crate::math::{Mat3, RigidPose, Symmetric3, Vec3};

/// Shape type tag for [`Sphere`]
pub const SPHERE: u32 = 0;
/// Shape type tag for [`Capsule`]
pub const CAPSULE: u32 = 1;
/// Shape type tag for [`BoxShape`]
pub const BOX: u32 = 2;
/// Shape type tag for [`Cylinder`]
pub const CYLINDER: u32 = 3;
/// Shape type tag for [`Triangle`]
pub const TRIANGLE: u32 = 4;
/// Shape type tag for [`ConvexHull`]
pub const CONVEX_HULL: u32 = 5;
/// Shape type tag for [`Compound`]
pub const COMPOUND: u32 = 6;
/// Shape type tag for [`Mesh`]
pub const MESH: u32 = 7;

// ============================================================================
// Convex primitives
// ============================================================================

/// Support function of a convex shape in local space.
///
/// `support_local(d)` returns the local-space point of the shape farthest
/// along direction `d`.
pub trait SupportMap {
    /// Farthest local point along `direction` (need not be normalized).
    fn support_local(&self, direction: Vec3) -> Vec3;
}

/// Solid sphere centered on its pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    /// Radius
    pub radius: f32,
}

impl Sphere {
    /// Construct from radius.
    pub const fn new(radius: f32) -> Self {
        Self { radius }
    }

    /// Local bounds.
    pub fn local_bounds(&self) -> Aabb {
        let r = Vec3::splat(self.radius);
        Aabb::new(-r, r)
    }

    /// Inertia tensor for the given mass. `I = 2/5 m r^2` on every axis.
    pub fn inertia_tensor(&self, mass: f32) -> Symmetric3 {
        let i = 0.4 * mass * self.radius * self.radius;
        Symmetric3::diagonal(i, i, i)
    }
}

impl SupportMap for Sphere {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        direction.normalize() * self.radius
    }
}

/// Capsule aligned with the local Y axis: a segment of half length
/// `half_length` swept by a sphere of `radius`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capsule {
    /// Sphere radius
    pub radius: f32,
    /// Half the internal segment length
    pub half_length: f32,
}

impl Capsule {
    /// Construct from radius and internal segment half length.
    pub const fn new(radius: f32, half_length: f32) -> Self {
        Self {
            radius,
            half_length,
        }
    }

    /// Local bounds.
    pub fn local_bounds(&self) -> Aabb {
        let extent = Vec3::new(self.radius, self.half_length + self.radius, self.radius);
        Aabb::new(-extent, extent)
    }

    /// Inertia tensor: cylinder body plus hemispherical caps via the
    /// parallel axis theorem.
    pub fn inertia_tensor(&self, mass: f32) -> Symmetric3 {
        let r = self.radius;
        let r2 = r * r;
        let h = 2.0 * self.half_length;
        let cyl_vol = core::f32::consts::PI * r2 * h;
        let sph_vol = 4.0 / 3.0 * core::f32::consts::PI * r2 * r;
        let total_vol = cyl_vol + sph_vol;
        if total_vol <= 0.0 {
            let i = 0.4 * mass * r2;
            return Symmetric3::diagonal(i, i, i);
        }
        let cyl_mass = mass * cyl_vol / total_vol;
        let sph_mass = mass * sph_vol / total_vol;

        let iyy = cyl_mass * r2 * 0.5 + 0.4 * sph_mass * r2;
        let hemi_offset = self.half_length + 0.375 * r;
        let ixx = cyl_mass * (3.0 * r2 + h * h) / 12.0
            + 0.4 * sph_mass * r2
            + sph_mass * hemi_offset * hemi_offset;
        Symmetric3::diagonal(ixx, iyy, ixx)
    }
}

impl SupportMap for Capsule {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        let end = if direction.y >= 0.0 {
            Vec3::new(0.0, self.half_length, 0.0)
        } else {
            Vec3::new(0.0, -self.half_length, 0.0)
        };
        end + direction.normalize() * self.radius
    }
}

/// Axis-aligned box in local space, defined by half extents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxShape {
    /// Half extents along local X, Y, Z
    pub half_extents: Vec3,
}

impl BoxShape {
    /// Construct from full side lengths.
    pub fn new(width: f32, height: f32, length: f32) -> Self {
        Self {
            half_extents: Vec3::new(width * 0.5, height * 0.5, length * 0.5),
        }
    }

    /// Construct from half extents.
    pub const fn from_half_extents(half_extents: Vec3) -> Self {
        Self { half_extents }
    }

    /// Local bounds.
    pub fn local_bounds(&self) -> Aabb {
        Aabb::new(-self.half_extents, self.half_extents)
    }

    /// Inertia tensor: `Ixx = m/12 (h^2 + d^2)`, etc.
    pub fn inertia_tensor(&self, mass: f32) -> Symmetric3 {
        let w2 = 4.0 * self.half_extents.x * self.half_extents.x;
        let h2 = 4.0 * self.half_extents.y * self.half_extents.y;
        let d2 = 4.0 * self.half_extents.z * self.half_extents.z;
        let f = mass / 12.0;
        Symmetric3::diagonal(f * (h2 + d2), f * (w2 + d2), f * (w2 + h2))
    }
}

impl SupportMap for BoxShape {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        Vec3::new(
            if direction.x >= 0.0 {
                self.half_extents.x
            } else {
                -self.half_extents.x
            },
            if direction.y >= 0.0 {
                self.half_extents.y
            } else {
                -self.half_extents.y
            },
            if direction.z >= 0.0 {
                self.half_extents.z
            } else {
                -self.half_extents.z
            },
        )
    }
}

/// Cylinder aligned with the local Y axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cylinder {
    /// Radius
    pub radius: f32,
    /// Half the height
    pub half_length: f32,
}

impl Cylinder {
    /// Construct from radius and half height.
    pub const fn new(radius: f32, half_length: f32) -> Self {
        Self {
            radius,
            half_length,
        }
    }

    /// Local bounds.
    pub fn local_bounds(&self) -> Aabb {
        let extent = Vec3::new(self.radius, self.half_length, self.radius);
        Aabb::new(-extent, extent)
    }

    /// Inertia tensor: `Iyy = m r^2 / 2`, `Ixx = Izz = m (3r^2 + h^2) / 12`.
    pub fn inertia_tensor(&self, mass: f32) -> Symmetric3 {
        let r2 = self.radius * self.radius;
        let h = 2.0 * self.half_length;
        let iyy = mass * r2 * 0.5;
        let ixx = mass * (3.0 * r2 + h * h) / 12.0;
        Symmetric3::diagonal(ixx, iyy, ixx)
    }
}

impl SupportMap for Cylinder {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        let horizontal = Vec3::new(direction.x, 0.0, direction.z);
        let len = horizontal.length();
        let rim = if len > 1e-12 {
            horizontal * (self.radius / len)
        } else {
            Vec3::new(self.radius, 0.0, 0.0)
        };
        let y = if direction.y >= 0.0 {
            self.half_length
        } else {
            -self.half_length
        };
        Vec3::new(rim.x, y, rim.z)
    }
}

/// One triangle, for mesh surfaces. Winding a-b-c defines the outward face
/// via the right-hand rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    /// First vertex
    pub a: Vec3,
    /// Second vertex
    pub b: Vec3,
    /// Third vertex
    pub c: Vec3,
}

impl Triangle {
    /// Construct from vertices.
    pub const fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Local bounds.
    pub fn local_bounds(&self) -> Aabb {
        Aabb::new(
            self.a.min(self.b).min(self.c),
            self.a.max(self.b).max(self.c),
        )
    }

    /// Face normal (unnormalized).
    pub fn scaled_normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a)
    }

    /// Thin-shell inertia approximation: vertices weighted as point masses
    /// about the centroid.
    pub fn inertia_tensor(&self, mass: f32) -> Symmetric3 {
        let centroid = (self.a + self.b + self.c) * (1.0 / 3.0);
        let m = mass / 3.0;
        let mut sum = Symmetric3::ZERO;
        for v in [self.a, self.b, self.c] {
            sum = sum.add(point_mass_inertia(v - centroid, m));
        }
        sum
    }
}

impl SupportMap for Triangle {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        let da = self.a.dot(direction);
        let db = self.b.dot(direction);
        let dc = self.c.dot(direction);
        if da >= db && da >= dc {
            self.a
        } else if db >= dc {
            self.b
        } else {
            self.c
        }
    }
}

/// Convex hull as a support-mapped point cloud. Points are assumed to lie on
/// the hull; interior points only waste support evaluations.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexHull {
    /// Hull points, centered on the volume centroid at construction
    pub points: Vec<Vec3>,
}

impl ConvexHull {
    /// Construct from a point cloud, recentering the points onto their mean.
    pub fn new(mut points: Vec<Vec3>) -> Self {
        if !points.is_empty() {
            let mut center = Vec3::ZERO;
            for p in &points {
                center += *p;
            }
            center = center * (1.0 / points.len() as f32);
            for p in &mut points {
                *p -= center;
            }
        }
        Self { points }
    }

    /// Local bounds.
    pub fn local_bounds(&self) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in &self.points {
            min = min.min(*p);
            max = max.max(*p);
        }
        if self.points.is_empty() {
            return Aabb::new(Vec3::ZERO, Vec3::ZERO);
        }
        Aabb::new(min, max)
    }

    /// Point-mass approximation of the hull inertia about the centroid.
    pub fn inertia_tensor(&self, mass: f32) -> Symmetric3 {
        if self.points.is_empty() {
            return Symmetric3::ZERO;
        }
        let m = mass / self.points.len() as f32;
        let mut sum = Symmetric3::ZERO;
        for p in &self.points {
            sum = sum.add(point_mass_inertia(*p, m));
        }
        sum
    }
}

impl SupportMap for ConvexHull {
    fn support_local(&self, direction: Vec3) -> Vec3 {
        let mut best = Vec3::ZERO;
        let mut best_dot = f32::NEG_INFINITY;
        for p in &self.points {
            let d = p.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = *p;
            }
        }
        best
    }
}

/// Point mass inertia about the origin for the parallel axis theorem:
/// `m (r.r E - r (x) r)`.
fn point_mass_inertia(r: Vec3, m: f32) -> Symmetric3 {
    let r2 = r.dot(r);
    Symmetric3 {
        xx: m * (r2 - r.x * r.x),
        yx: m * (-r.x * r.y),
        yy: m * (r2 - r.y * r.y),
        zx: m * (-r.x * r.z),
        zy: m * (-r.y * r.z),
        zz: m * (r2 - r.z * r.z),
    }
}

// ============================================================================
// Static acceleration tree (compound/mesh children)
// ============================================================================

/// Immutable BVH over child bounds, built once at shape construction by a
/// recursive median sweep along the longest centroid axis.
#[derive(Clone, Debug, Default)]
pub struct StaticTree {
    nodes: Vec<StaticTreeNode>,
}

#[derive(Clone, Debug)]
struct StaticTreeNode {
    bounds: Aabb,
    /// Child index for leaves; left node index for internal
    a: u32,
    /// u32::MAX for leaves; right node index for internal
    b: u32,
}

impl StaticTree {
    /// Build from per-child bounds. Child `i`'s bounds are `bounds[i]`.
    pub fn build(bounds: &[Aabb]) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        if bounds.is_empty() {
            return tree;
        }
        let mut order: Vec<u32> = (0..bounds.len() as u32).collect();
        tree.nodes.reserve(2 * bounds.len());
        tree.build_node(bounds, &mut order[..]);
        tree
    }

    fn build_node(&mut self, bounds: &[Aabb], children: &mut [u32]) -> u32 {
        if children.len() == 1 {
            let id = self.nodes.len() as u32;
            self.nodes.push(StaticTreeNode {
                bounds: bounds[children[0] as usize],
                a: children[0],
                b: u32::MAX,
            });
            return id;
        }

        let mut merged = bounds[children[0] as usize];
        for &c in children[1..].iter() {
            merged = merged.union(&bounds[c as usize]);
        }

        // Split on the longest axis of the merged bounds, at the median
        let extent = merged.max - merged.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        children.sort_unstable_by(|&x, &y| {
            let cx = centroid_axis(&bounds[x as usize], axis);
            let cy = centroid_axis(&bounds[y as usize], axis);
            cx.partial_cmp(&cy).unwrap_or(core::cmp::Ordering::Equal)
        });
        let mid = children.len() / 2;

        let id = self.nodes.len() as u32;
        self.nodes.push(StaticTreeNode {
            bounds: merged,
            a: 0,
            b: 0,
        });
        let (left_slice, right_slice) = children.split_at_mut(mid);
        let left = self.build_node(bounds, left_slice);
        let right = self.build_node(bounds, right_slice);
        self.nodes[id as usize].a = left;
        self.nodes[id as usize].b = right;
        id
    }

    /// Visit every child whose bounds overlap `query`.
    pub fn query_callback<F: FnMut(u32)>(&self, query: &Aabb, mut callback: F) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = Vec::with_capacity(32);
        stack.push(0u32);
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if !node.bounds.intersects(query) {
                continue;
            }
            if node.b == u32::MAX {
                callback(node.a);
            } else {
                stack.push(node.a);
                stack.push(node.b);
            }
        }
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.b == u32::MAX).count()
    }
}

fn centroid_axis(aabb: &Aabb, axis: usize) -> f32 {
    match axis {
        0 => aabb.min.x + aabb.max.x,
        1 => aabb.min.y + aabb.max.y,
        _ => aabb.min.z + aabb.max.z,
    }
}

// ============================================================================
// Compound & Mesh
// ============================================================================

/// A child shape within a compound, with local transform.
#[derive(Clone, Copy, Debug)]
pub struct CompoundChild {
    /// Local pose relative to the compound frame
    pub local_pose: RigidPose,
    /// Catalog entry for the child's shape
    pub shape: TypedIndex,
}

/// Compound shape: children referencing other catalog entries, each with a
/// local pose. Owns a static tree over child local bounds.
#[derive(Clone, Debug)]
pub struct Compound {
    /// Child shapes with their local transforms
    pub children: Vec<CompoundChild>,
    /// Acceleration tree over child local bounds
    pub tree: StaticTree,
}

impl Compound {
    /// Construct from children. Child bounds are resolved against the
    /// catalog to build the tree eagerly.
    pub fn new(children: Vec<CompoundChild>, catalog: &ShapeCatalog) -> Result<Self, PhysicsError> {
        let mut bounds = Vec::with_capacity(children.len());
        for child in &children {
            bounds.push(catalog.compute_bounds(child.shape, &child.local_pose)?);
        }
        Ok(Self {
            children,
            tree: StaticTree::build(&bounds),
        })
    }

    /// Mass-weighted composition of child inertias via the parallel axis
    /// theorem, about the compound origin.
    ///
    /// `child_masses[i]` is child `i`'s share of the total mass.
    pub fn inertia_tensor(
        &self,
        child_masses: &[f32],
        catalog: &ShapeCatalog,
    ) -> Result<Symmetric3, PhysicsError> {
        debug_assert_eq!(child_masses.len(), self.children.len());
        let mut sum = Symmetric3::ZERO;
        for (child, &mass) in self.children.iter().zip(child_masses) {
            let local = catalog.compute_inertia(child.shape, mass)?;
            let rotation = Mat3::from_quat(child.local_pose.orientation);
            let rotated = local.rotation_sandwich(rotation);
            sum = sum
                .add(rotated)
                .add(point_mass_inertia(child.local_pose.position, mass));
        }
        Ok(sum)
    }

    /// Like [`Compound::inertia_tensor`], but about the computed center of
    /// mass; returns the inertia and the center the children were measured
    /// against.
    pub fn inertia_tensor_recentered(
        &self,
        child_masses: &[f32],
        catalog: &ShapeCatalog,
    ) -> Result<(Symmetric3, Vec3), PhysicsError> {
        let total: f32 = child_masses.iter().sum();
        let mut center = Vec3::ZERO;
        for (child, &mass) in self.children.iter().zip(child_masses) {
            center += child.local_pose.position * mass;
        }
        if total > 0.0 {
            center = center * (1.0 / total);
        }
        let mut sum = Symmetric3::ZERO;
        for (child, &mass) in self.children.iter().zip(child_masses) {
            let local = catalog.compute_inertia(child.shape, mass)?;
            let rotation = Mat3::from_quat(child.local_pose.orientation);
            let rotated = local.rotation_sandwich(rotation);
            sum = sum
                .add(rotated)
                .add(point_mass_inertia(child.local_pose.position - center, mass));
        }
        Ok((sum, center))
    }
}

/// Triangle mesh. Owns its triangles and a static acceleration tree over
/// their bounds, both built once at construction.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Triangles in mesh-local space
    pub triangles: Vec<Triangle>,
    /// Acceleration tree over triangle bounds
    pub tree: StaticTree,
}

impl Mesh {
    /// Construct from triangles, building the tree eagerly.
    pub fn new(triangles: Vec<Triangle>) -> Self {
        let bounds: Vec<Aabb> = triangles.iter().map(|t| t.local_bounds()).collect();
        Self {
            triangles,
            tree: StaticTree::build(&bounds),
        }
    }

    /// Local bounds over all triangles.
    pub fn local_bounds(&self) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for t in &self.triangles {
            let b = t.local_bounds();
            min = min.min(b.min);
            max = max.max(b.max);
        }
        if self.triangles.is_empty() {
            return Aabb::new(Vec3::ZERO, Vec3::ZERO);
        }
        Aabb::new(min, max)
    }
}

// ============================================================================
// ShapeCatalog
// ============================================================================

/// Growable batch of one shape type with slot reuse.
#[derive(Clone, Debug)]
struct ShapeBatch<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

// Derived `Default` would demand `T: Default`; an empty batch needs no
// default shape value.
impl<T> Default for ShapeBatch<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> ShapeBatch<T> {
    fn add(&mut self, shape: T) -> u32 {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(shape);
            index
        } else {
            self.slots.push(Some(shape));
            (self.slots.len() - 1) as u32
        }
    }

    fn get(&self, shape_type: u32, index: u32) -> Result<&T, PhysicsError> {
        self.slots
            .get(index as usize)
            .and_then(|s| s.as_ref())
            .ok_or(PhysicsError::InvalidShapeIndex {
                shape_type,
                index: index as usize,
            })
    }

    fn remove(&mut self, shape_type: u32, index: u32) -> Result<T, PhysicsError> {
        let slot =
            self.slots
                .get_mut(index as usize)
                .ok_or(PhysicsError::InvalidShapeIndex {
                    shape_type,
                    index: index as usize,
                })?;
        let shape = slot.take().ok_or(PhysicsError::InvalidShapeIndex {
            shape_type,
            index: index as usize,
        })?;
        self.free.push(index);
        Ok(shape)
    }

    fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Central shape registry: one batch per shape type, addressed by
/// [`TypedIndex`].
#[derive(Clone, Debug, Default)]
pub struct ShapeCatalog {
    spheres: ShapeBatch<Sphere>,
    capsules: ShapeBatch<Capsule>,
    boxes: ShapeBatch<BoxShape>,
    cylinders: ShapeBatch<Cylinder>,
    triangles: ShapeBatch<Triangle>,
    hulls: ShapeBatch<ConvexHull>,
    compounds: ShapeBatch<Compound>,
    meshes: ShapeBatch<Mesh>,
}

macro_rules! catalog_accessors {
    ($add:ident, $get:ident, $batch:ident, $ty:ty, $tag:expr) => {
        /// Add a shape, returning its catalog index.
        pub fn $add(&mut self, shape: $ty) -> TypedIndex {
            TypedIndex::new($tag, self.$batch.add(shape))
        }

        /// Look up a shape by index.
        pub fn $get(&self, index: TypedIndex) -> Result<&$ty, PhysicsError> {
            if !index.exists() || index.shape_type() != $tag {
                return Err(PhysicsError::InvalidShapeIndex {
                    shape_type: index.shape_type(),
                    index: index.index() as usize,
                });
            }
            self.$batch.get($tag, index.index())
        }
    };
}

impl ShapeCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    catalog_accessors!(add_sphere, sphere, spheres, Sphere, SPHERE);
    catalog_accessors!(add_capsule, capsule, capsules, Capsule, CAPSULE);
    catalog_accessors!(add_box, box_shape, boxes, BoxShape, BOX);
    catalog_accessors!(add_cylinder, cylinder, cylinders, Cylinder, CYLINDER);
    catalog_accessors!(add_triangle, triangle, triangles, Triangle, TRIANGLE);
    catalog_accessors!(add_convex_hull, convex_hull, hulls, ConvexHull, CONVEX_HULL);
    catalog_accessors!(add_mesh, mesh, meshes, Mesh, MESH);

    /// Add a compound built from children already in the catalog.
    pub fn add_compound(
        &mut self,
        children: Vec<CompoundChild>,
    ) -> Result<TypedIndex, PhysicsError> {
        let compound = Compound::new(children, self)?;
        Ok(TypedIndex::new(COMPOUND, self.compounds.add(compound)))
    }

    /// Look up a compound by index.
    pub fn compound(&self, index: TypedIndex) -> Result<&Compound, PhysicsError> {
        if !index.exists() || index.shape_type() != COMPOUND {
            return Err(PhysicsError::InvalidShapeIndex {
                shape_type: index.shape_type(),
                index: index.index() as usize,
            });
        }
        self.compounds.get(COMPOUND, index.index())
    }

    /// Remove one shape. Compound children are left in place; see
    /// [`ShapeCatalog::remove_recursively`].
    pub fn remove(&mut self, index: TypedIndex) -> Result<(), PhysicsError> {
        if !index.exists() {
            return Err(PhysicsError::InvalidShapeIndex {
                shape_type: index.shape_type(),
                index: index.index() as usize,
            });
        }
        let slot = index.index();
        match index.shape_type() {
            SPHERE => self.spheres.remove(SPHERE, slot).map(drop),
            CAPSULE => self.capsules.remove(CAPSULE, slot).map(drop),
            BOX => self.boxes.remove(BOX, slot).map(drop),
            CYLINDER => self.cylinders.remove(CYLINDER, slot).map(drop),
            TRIANGLE => self.triangles.remove(TRIANGLE, slot).map(drop),
            CONVEX_HULL => self.hulls.remove(CONVEX_HULL, slot).map(drop),
            COMPOUND => self.compounds.remove(COMPOUND, slot).map(drop),
            MESH => self.meshes.remove(MESH, slot).map(drop),
            other => Err(PhysicsError::InvalidShapeIndex {
                shape_type: other,
                index: slot as usize,
            }),
        }
    }

    /// Remove a shape and, for compounds, every child shape exactly once.
    /// Nested compounds cascade. Meshes own their triangles, so only the
    /// mesh entry itself is released.
    pub fn remove_recursively(&mut self, index: TypedIndex) -> Result<(), PhysicsError> {
        if index.exists() && index.shape_type() == COMPOUND {
            let compound = self.compounds.remove(COMPOUND, index.index())?;
            for child in &compound.children {
                self.remove_recursively(child.shape)?;
            }
            Ok(())
        } else {
            self.remove(index)
        }
    }

    /// World bounds of a shape at the given pose. Convex bounds rotate the
    /// local box corners; compound bounds merge transformed child bounds.
    pub fn compute_bounds(
        &self,
        index: TypedIndex,
        pose: &RigidPose,
    ) -> Result<Aabb, PhysicsError> {
        let slot = index.index();
        match index.shape_type() {
            _ if !index.exists() => Err(PhysicsError::InvalidShapeIndex {
                shape_type: index.shape_type(),
                index: slot as usize,
            }),
            SPHERE => {
                let s = self.spheres.get(SPHERE, slot)?;
                let r = Vec3::splat(s.radius);
                Ok(Aabb::new(pose.position - r, pose.position + r))
            }
            CAPSULE => {
                let c = self.capsules.get(CAPSULE, slot)?;
                let axis = pose.orientation.rotate(Vec3::new(0.0, c.half_length, 0.0));
                let extent = axis.abs() + Vec3::splat(c.radius);
                Ok(Aabb::new(pose.position - extent, pose.position + extent))
            }
            BOX => {
                let b = self.boxes.get(BOX, slot)?;
                Ok(rotated_box_bounds(b.half_extents, pose))
            }
            CYLINDER => {
                // Conservative: treat as a box of matching extents
                let c = self.cylinders.get(CYLINDER, slot)?;
                Ok(rotated_box_bounds(
                    Vec3::new(c.radius, c.half_length, c.radius),
                    pose,
                ))
            }
            TRIANGLE => {
                let t = self.triangles.get(TRIANGLE, slot)?;
                let a = pose.transform(t.a);
                let b = pose.transform(t.b);
                let c = pose.transform(t.c);
                Ok(Aabb::new(a.min(b).min(c), a.max(b).max(c)))
            }
            CONVEX_HULL => {
                let h = self.hulls.get(CONVEX_HULL, slot)?;
                let mut min = Vec3::splat(f32::INFINITY);
                let mut max = Vec3::splat(f32::NEG_INFINITY);
                for p in &h.points {
                    let w = pose.transform(*p);
                    min = min.min(w);
                    max = max.max(w);
                }
                if h.points.is_empty() {
                    return Ok(Aabb::new(pose.position, pose.position));
                }
                Ok(Aabb::new(min, max))
            }
            COMPOUND => {
                let compound = self.compounds.get(COMPOUND, slot)?;
                let mut merged: Option<Aabb> = None;
                for child in &compound.children {
                    let child_pose = pose.compose(child.local_pose);
                    let bounds = self.compute_bounds(child.shape, &child_pose)?;
                    merged = Some(match merged {
                        Some(m) => m.union(&bounds),
                        None => bounds,
                    });
                }
                Ok(merged.unwrap_or(Aabb::new(pose.position, pose.position)))
            }
            MESH => {
                let mesh = self.meshes.get(MESH, slot)?;
                let local = mesh.local_bounds();
                Ok(rotated_bounds(local, pose))
            }
            other => Err(PhysicsError::InvalidShapeIndex {
                shape_type: other,
                index: slot as usize,
            }),
        }
    }

    /// Inertia tensor of a shape for the given mass, about the shape origin.
    /// Compound children split the mass evenly; use
    /// [`Compound::inertia_tensor`] directly for custom distributions.
    pub fn compute_inertia(&self, index: TypedIndex, mass: f32) -> Result<Symmetric3, PhysicsError> {
        let slot = index.index();
        match index.shape_type() {
            _ if !index.exists() => Err(PhysicsError::InvalidShapeIndex {
                shape_type: index.shape_type(),
                index: slot as usize,
            }),
            SPHERE => Ok(self.spheres.get(SPHERE, slot)?.inertia_tensor(mass)),
            CAPSULE => Ok(self.capsules.get(CAPSULE, slot)?.inertia_tensor(mass)),
            BOX => Ok(self.boxes.get(BOX, slot)?.inertia_tensor(mass)),
            CYLINDER => Ok(self.cylinders.get(CYLINDER, slot)?.inertia_tensor(mass)),
            TRIANGLE => Ok(self.triangles.get(TRIANGLE, slot)?.inertia_tensor(mass)),
            CONVEX_HULL => Ok(self.hulls.get(CONVEX_HULL, slot)?.inertia_tensor(mass)),
            COMPOUND => {
                let compound = self.compounds.get(COMPOUND, slot)?;
                let n = compound.children.len().max(1);
                let child_masses = vec![mass / n as f32; compound.children.len()];
                compound.inertia_tensor(&child_masses, self)
            }
            MESH => {
                // Meshes are normally static; approximate as a thin shell of
                // per-triangle point masses
                let mesh = self.meshes.get(MESH, slot)?;
                let n = mesh.triangles.len().max(1);
                let m = mass / n as f32;
                let mut sum = Symmetric3::ZERO;
                for t in &mesh.triangles {
                    sum = sum.add(t.inertia_tensor(m));
                }
                Ok(sum)
            }
            other => Err(PhysicsError::InvalidShapeIndex {
                shape_type: other,
                index: slot as usize,
            }),
        }
    }

    /// Total live shape count across every batch.
    pub fn live_count(&self) -> usize {
        self.spheres.live_count()
            + self.capsules.live_count()
            + self.boxes.live_count()
            + self.cylinders.live_count()
            + self.triangles.live_count()
            + self.hulls.live_count()
            + self.compounds.live_count()
            + self.meshes.live_count()
    }
}

/// Bounds of a local box with the given half extents under a pose, via the
/// absolute rotation matrix.
fn rotated_box_bounds(half_extents: Vec3, pose: &RigidPose) -> Aabb {
    let m = Mat3::from_quat(pose.orientation);
    let extent =
        m.x.abs() * half_extents.x + m.y.abs() * half_extents.y + m.z.abs() * half_extents.z;
    Aabb::new(pose.position - extent, pose.position + extent)
}

/// Bounds of an arbitrary local box under a pose.
fn rotated_bounds(local: Aabb, pose: &RigidPose) -> Aabb {
    let center = (local.min + local.max) * 0.5;
    let half = (local.max - local.min) * 0.5;
    let world_center = pose.transform(center);
    let shifted = RigidPose {
        position: world_center,
        orientation: pose.orientation,
    };
    rotated_box_bounds(half, &shifted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;

    #[test]
    fn test_catalog_add_get() {
        let mut catalog = ShapeCatalog::new();
        let idx = catalog.add_sphere(Sphere::new(2.0));
        assert_eq!(idx.shape_type(), SPHERE);
        let s = catalog.sphere(idx).unwrap();
        assert_eq!(s.radius, 2.0);
    }

    #[test]
    fn test_catalog_remove_and_reuse() {
        let mut catalog = ShapeCatalog::new();
        let a = catalog.add_box(BoxShape::new(1.0, 1.0, 1.0));
        catalog.remove(a).unwrap();
        assert!(catalog.box_shape(a).is_err(), "Removed shape should not resolve");

        // Slot is recycled
        let b = catalog.add_box(BoxShape::new(2.0, 2.0, 2.0));
        assert_eq!(b.index(), a.index());
        assert_eq!(catalog.live_count(), 1);
    }

    #[test]
    fn test_wrong_type_lookup() {
        let mut catalog = ShapeCatalog::new();
        let idx = catalog.add_sphere(Sphere::new(1.0));
        assert!(catalog.box_shape(idx).is_err());
    }

    #[test]
    fn test_sphere_bounds() {
        let mut catalog = ShapeCatalog::new();
        let idx = catalog.add_sphere(Sphere::new(1.5));
        let pose = RigidPose::at(Vec3::new(10.0, 0.0, 0.0));
        let bounds = catalog.compute_bounds(idx, &pose).unwrap();
        assert!((bounds.min.x - 8.5).abs() < 1e-6);
        assert!((bounds.max.x - 11.5).abs() < 1e-6);
    }

    #[test]
    fn test_rotated_box_bounds() {
        let mut catalog = ShapeCatalog::new();
        let idx = catalog.add_box(BoxShape::new(2.0, 2.0, 2.0));
        // 45 degrees about Z: x extent grows to sqrt(2)
        let pose = RigidPose::new(
            Vec3::ZERO,
            Quat::from_axis_angle(Vec3::UNIT_Z, core::f32::consts::FRAC_PI_4),
        );
        let bounds = catalog.compute_bounds(idx, &pose).unwrap();
        let expected = 2.0f32.sqrt();
        assert!((bounds.max.x - expected).abs() < 1e-4);
    }

    #[test]
    fn test_box_support() {
        let b = BoxShape::new(2.0, 4.0, 6.0);
        let s = b.support_local(Vec3::new(1.0, -1.0, 1.0));
        assert_eq!(s, Vec3::new(1.0, -2.0, 3.0));
    }

    #[test]
    fn test_unit_cube_inertia() {
        let b = BoxShape::new(1.0, 1.0, 1.0);
        let i = b.inertia_tensor(1.0);
        // m/12 * (1 + 1) = 1/6
        assert!((i.xx - 1.0 / 6.0).abs() < 1e-6);
        assert!((i.yy - 1.0 / 6.0).abs() < 1e-6);
        assert!((i.zz - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_sphere_inertia() {
        let s = Sphere::new(2.0);
        let i = s.inertia_tensor(5.0);
        // 2/5 * 5 * 4 = 8
        assert!((i.xx - 8.0).abs() < 1e-5);
        assert_eq!(i.xx, i.yy);
        assert_eq!(i.yy, i.zz);
    }

    #[test]
    fn test_cylinder_axial_symmetry() {
        let c = Cylinder::new(1.0, 1.0);
        let i = c.inertia_tensor(1.0);
        assert_eq!(i.xx, i.zz, "Y-aligned cylinder: Ixx == Izz");
    }

    #[test]
    fn test_capsule_support() {
        let c = Capsule::new(0.5, 1.0);
        let s = c.support_local(Vec3::UNIT_Y);
        assert!((s.y - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_convex_hull_recentered() {
        // Cube corners offset from origin; construction recenters
        let points = vec![
            Vec3::new(9.0, 9.0, 9.0),
            Vec3::new(11.0, 9.0, 9.0),
            Vec3::new(9.0, 11.0, 9.0),
            Vec3::new(11.0, 11.0, 9.0),
            Vec3::new(9.0, 9.0, 11.0),
            Vec3::new(11.0, 9.0, 11.0),
            Vec3::new(9.0, 11.0, 11.0),
            Vec3::new(11.0, 11.0, 11.0),
        ];
        let hull = ConvexHull::new(points);
        let bounds = hull.local_bounds();
        assert!((bounds.min.x + 1.0).abs() < 1e-6);
        assert!((bounds.max.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_compound_bounds_and_removal() {
        let mut catalog = ShapeCatalog::new();
        let s0 = catalog.add_sphere(Sphere::new(1.0));
        let s1 = catalog.add_sphere(Sphere::new(1.0));
        let compound = catalog
            .add_compound(vec![
                CompoundChild {
                    local_pose: RigidPose::at(Vec3::ZERO),
                    shape: s0,
                },
                CompoundChild {
                    local_pose: RigidPose::at(Vec3::new(10.0, 0.0, 0.0)),
                    shape: s1,
                },
            ])
            .unwrap();

        let bounds = catalog
            .compute_bounds(compound, &RigidPose::at(Vec3::ZERO))
            .unwrap();
        assert!(bounds.min.x <= -1.0);
        assert!(bounds.max.x >= 11.0);

        // Recursive removal releases children exactly once
        assert_eq!(catalog.live_count(), 3);
        catalog.remove_recursively(compound).unwrap();
        assert_eq!(catalog.live_count(), 0);
        assert!(catalog.sphere(s0).is_err());
        assert!(catalog.sphere(s1).is_err());
    }

    #[test]
    fn test_nested_compound_removal() {
        let mut catalog = ShapeCatalog::new();
        let leaf = catalog.add_sphere(Sphere::new(1.0));
        let inner = catalog
            .add_compound(vec![CompoundChild {
                local_pose: RigidPose::at(Vec3::ZERO),
                shape: leaf,
            }])
            .unwrap();
        let outer = catalog
            .add_compound(vec![CompoundChild {
                local_pose: RigidPose::at(Vec3::new(1.0, 0.0, 0.0)),
                shape: inner,
            }])
            .unwrap();

        catalog.remove_recursively(outer).unwrap();
        assert_eq!(catalog.live_count(), 0, "Cascade removes nested children");
    }

    #[test]
    fn test_static_tree_query() {
        let bounds: Vec<Aabb> = (0..16)
            .map(|i| {
                let x = i as f32 * 3.0;
                Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
            })
            .collect();
        let tree = StaticTree::build(&bounds);
        assert_eq!(tree.leaf_count(), 16);

        let mut hits = Vec::new();
        tree.query_callback(
            &Aabb::new(Vec3::new(2.5, 0.0, 0.0), Vec3::new(7.0, 1.0, 1.0)),
            |i| hits.push(i),
        );
        hits.sort_unstable();
        assert_eq!(hits, vec![1, 2], "Only overlapping leaves reported");
    }

    #[test]
    fn test_mesh_tree_built_eagerly() {
        let triangles = vec![
            Triangle::new(
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ),
            Triangle::new(
                Vec3::new(5.0, 0.0, 0.0),
                Vec3::new(6.0, 0.0, 0.0),
                Vec3::new(5.0, 0.0, 1.0),
            ),
        ];
        let mesh = Mesh::new(triangles);
        assert_eq!(mesh.tree.leaf_count(), 2);
        let mut hits = Vec::new();
        mesh.tree.query_callback(
            &Aabb::new(Vec3::new(4.0, -1.0, -1.0), Vec3::new(7.0, 1.0, 2.0)),
            |i| hits.push(i),
        );
        assert_eq!(hits, vec![1]);
    }
}
