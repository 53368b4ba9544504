//! Broad Phase (Incremental AABB Tree)
//!
//! A self-balancing binary tree of axis-aligned bounding boxes producing the
//! candidate pair set for the narrow phase. Supports O(log n) insert, remove,
//! and update without full rebuilds.
//!
//! # Features
//!
//! - **Incremental updates**: Insert/remove/move collidables without rebuild
//! - **Fat AABBs**: Enlarged margins reduce re-insertions for moving bodies
//! - **Tree rotations**: AVL-style balancing for O(log n) query performance
//! - **No false negatives**: Every pair of overlapping fat bounds is reported
//!
//! Author: Moroya Sakamoto

use crate::math::Vec3;

/// Null node sentinel
pub const NULL_NODE: u32 = u32::MAX;

/// Default AABB fat margin (extends AABB by this amount in each direction)
const FAT_MARGIN: f32 = 0.1;

// ============================================================================
// Aabb
// ============================================================================

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Construct from corners.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Whether two boxes overlap (touching counts).
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Whether `other` fits entirely inside `self`.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Smallest box containing both.
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Surface area, the cost metric for tree insertion.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Volume, used as the insertion tie-break.
    #[inline]
    pub fn volume(&self) -> f32 {
        let d = self.max - self.min;
        d.x * d.y * d.z
    }

    /// Grow the box along the direction of motion over one timestep.
    ///
    /// Each axis extends by `velocity * dt` on the side the collidable is
    /// moving toward, with the expansion magnitude clamped to
    /// `maximum_expansion` per axis. Discrete collidables pass their
    /// speculative margin as the cap; passive and continuous collidables pass
    /// `f32::INFINITY` so fast motion stays inside the bounds.
    pub fn expand_by_velocity(&mut self, velocity: Vec3, dt: f32, maximum_expansion: f32) {
        let sweep = velocity * dt;
        let clamp = |v: f32| v.clamp(-maximum_expansion, maximum_expansion);
        let ex = clamp(sweep.x);
        let ey = clamp(sweep.y);
        let ez = clamp(sweep.z);
        if ex < 0.0 {
            self.min.x += ex;
        } else {
            self.max.x += ex;
        }
        if ey < 0.0 {
            self.min.y += ey;
        } else {
            self.max.y += ey;
        }
        if ez < 0.0 {
            self.min.z += ez;
        } else {
            self.max.z += ez;
        }
    }
}

// ============================================================================
// Tree nodes
// ============================================================================

/// A node in the broad-phase tree
#[derive(Clone, Debug)]
struct Node {
    /// Fat AABB (enlarged for movement prediction)
    aabb: Aabb,
    /// Parent node index (NULL_NODE if root)
    parent: u32,
    /// Left child (NULL_NODE if leaf)
    left: u32,
    /// Right child (NULL_NODE if leaf)
    right: u32,
    /// Height (0 for leaf, max(left.height, right.height) + 1)
    height: i32,
    /// Leaves in this subtree (1 for a leaf)
    leaf_count: u32,
    /// User data (collidable reference for leaves, unused for internal)
    user_data: u32,
    /// Whether this node is a leaf
    is_leaf: bool,
}

impl Node {
    fn new_leaf(aabb: Aabb, user_data: u32) -> Self {
        Self {
            aabb,
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: 0,
            leaf_count: 1,
            user_data,
            is_leaf: true,
        }
    }

    fn new_internal() -> Self {
        Self {
            aabb: Aabb::new(Vec3::ZERO, Vec3::ZERO),
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: 0,
            leaf_count: 0,
            user_data: NULL_NODE,
            is_leaf: false,
        }
    }
}

// ============================================================================
// BroadPhase
// ============================================================================

/// Incremental AABB tree broad phase.
pub struct BroadPhase {
    /// Node pool
    nodes: Vec<Node>,
    /// Free list (indices of unused nodes)
    free_list: Vec<u32>,
    /// Root node index
    root: u32,
    /// AABB fattening margin
    pub margin: f32,
}

impl BroadPhase {
    /// Create a new empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
            margin: FAT_MARGIN,
        }
    }

    /// Insert a new AABB, returns the proxy (node) ID.
    pub fn insert(&mut self, aabb: Aabb, user_data: u32) -> u32 {
        let fat_aabb = self.fatten(aabb);
        let node_id = self.alloc_node();

        self.nodes[node_id as usize] = Node::new_leaf(fat_aabb, user_data);

        self.insert_leaf(node_id);
        node_id
    }

    /// Remove a proxy by its ID.
    ///
    /// Removing a proxy that was never inserted (or already removed) is a
    /// caller error.
    pub fn remove(&mut self, proxy_id: u32) {
        debug_assert!(
            (proxy_id as usize) < self.nodes.len() && self.nodes[proxy_id as usize].is_leaf,
            "remove() requires a live proxy"
        );
        if proxy_id as usize >= self.nodes.len() {
            return;
        }
        self.remove_leaf(proxy_id);
        self.free_node(proxy_id);
    }

    /// Update a proxy's AABB. Returns true if the tree was modified.
    ///
    /// Only re-inserts if the tight AABB has left the fat AABB; otherwise the
    /// existing fat bounds remain valid and no tree surgery happens.
    pub fn update(&mut self, proxy_id: u32, new_aabb: Aabb) -> bool {
        if proxy_id as usize >= self.nodes.len() {
            return false;
        }

        if self.nodes[proxy_id as usize].aabb.contains(&new_aabb) {
            return false;
        }

        self.remove_leaf(proxy_id);
        self.nodes[proxy_id as usize].aabb = self.fatten(new_aabb);
        self.insert_leaf(proxy_id);
        true
    }

    /// Get user data for a proxy.
    #[inline]
    pub fn user_data(&self, proxy_id: u32) -> u32 {
        self.nodes[proxy_id as usize].user_data
    }

    /// Get the fat AABB for a proxy.
    #[inline]
    pub fn get_aabb(&self, proxy_id: u32) -> Aabb {
        self.nodes[proxy_id as usize].aabb
    }

    /// Query all proxies overlapping the given AABB.
    pub fn query(&self, aabb: &Aabb) -> Vec<u32> {
        let mut result = Vec::new();
        self.query_callback(aabb, |ud| result.push(ud));
        result
    }

    /// Query with callback (avoids allocation).
    pub fn query_callback<F: FnMut(u32)>(&self, aabb: &Aabb, mut callback: F) {
        if self.root == NULL_NODE {
            return;
        }

        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }

            let node = &self.nodes[node_id as usize];
            if !node.aabb.intersects(aabb) {
                continue;
            }

            if node.is_leaf {
                callback(node.user_data);
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Find all potentially overlapping pairs for this frame.
    ///
    /// Output is sorted and deduplicated, so pair order is independent of
    /// insertion history.
    pub fn self_pairs(&self) -> Vec<(u32, u32)> {
        let mut pairs = Vec::new();

        if self.root == NULL_NODE {
            return pairs;
        }

        let mut leaves = Vec::new();
        self.collect_leaves(self.root, &mut leaves);

        for &leaf_id in &leaves {
            let aabb = &self.nodes[leaf_id as usize].aabb;
            let ud_a = self.nodes[leaf_id as usize].user_data;

            self.query_callback(aabb, |ud_b| {
                if ud_a < ud_b {
                    pairs.push((ud_a, ud_b));
                }
            });
        }

        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    /// Number of active proxies (leaf nodes).
    pub fn proxy_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf && n.user_data != NULL_NODE)
            .count()
    }

    /// Total node count (including internal).
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Tree height.
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    // =========== Internal methods ===========

    fn fatten(&self, aabb: Aabb) -> Aabb {
        let m = Vec3::splat(self.margin);
        Aabb::new(aabb.min - m, aabb.max + m)
    }

    fn alloc_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            id
        } else {
            let id = self.nodes.len() as u32;
            self.nodes.push(Node::new_internal());
            id
        }
    }

    fn free_node(&mut self, node_id: u32) {
        let node = &mut self.nodes[node_id as usize];
        node.height = -1;
        node.leaf_count = 0;
        node.user_data = NULL_NODE;
        node.is_leaf = false;
        node.left = NULL_NODE;
        node.right = NULL_NODE;
        node.parent = NULL_NODE;
        self.free_list.push(node_id);
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find best sibling using surface area heuristic
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut sibling = self.root;

        while !self.nodes[sibling as usize].is_leaf {
            let left = self.nodes[sibling as usize].left;
            let right = self.nodes[sibling as usize].right;

            let area = self.nodes[sibling as usize].aabb.surface_area();
            let combined = leaf_aabb.union(&self.nodes[sibling as usize].aabb);
            let combined_area = combined.surface_area();

            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost_left = self.child_insertion_cost(left, &leaf_aabb, inheritance_cost);
            let cost_right = self.child_insertion_cost(right, &leaf_aabb, inheritance_cost);

            if cost < cost_left && cost < cost_right {
                break;
            }

            sibling = self.pick_child(left, right, cost_left, cost_right, &leaf_aabb);
        }

        // Create new parent
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        self.nodes[new_parent as usize] = Node::new_internal();
        self.nodes[new_parent as usize].parent = old_parent;
        self.nodes[new_parent as usize].aabb = leaf_aabb.union(&self.nodes[sibling as usize].aabb);
        self.nodes[new_parent as usize].height = self.nodes[sibling as usize].height + 1;
        self.nodes[new_parent as usize].leaf_count = self.nodes[sibling as usize].leaf_count + 1;

        if old_parent != NULL_NODE {
            if self.nodes[old_parent as usize].left == sibling {
                self.nodes[old_parent as usize].left = new_parent;
            } else {
                self.nodes[old_parent as usize].right = new_parent;
            }
        } else {
            self.root = new_parent;
        }

        self.nodes[new_parent as usize].left = sibling;
        self.nodes[new_parent as usize].right = leaf;
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        // Walk up and fix heights + AABBs + balance
        self.fix_upwards(new_parent);
    }

    fn child_insertion_cost(&self, child: u32, leaf_aabb: &Aabb, inheritance: f32) -> f32 {
        let combined = leaf_aabb.union(&self.nodes[child as usize].aabb);
        if self.nodes[child as usize].is_leaf {
            combined.surface_area() + inheritance
        } else {
            let old_area = self.nodes[child as usize].aabb.surface_area();
            let new_area = combined.surface_area();
            (new_area - old_area) + inheritance
        }
    }

    /// Descend toward the cheaper child; equal costs break toward the child
    /// whose combined box has the smaller volume, then toward the subtree
    /// with fewer leaves.
    fn pick_child(&self, left: u32, right: u32, cost_left: f32, cost_right: f32, leaf_aabb: &Aabb) -> u32 {
        if cost_left < cost_right {
            return left;
        }
        if cost_right < cost_left {
            return right;
        }
        let vol_left = leaf_aabb.union(&self.nodes[left as usize].aabb).volume();
        let vol_right = leaf_aabb.union(&self.nodes[right as usize].aabb).volume();
        if vol_left < vol_right {
            return left;
        }
        if vol_right < vol_left {
            return right;
        }
        if self.nodes[left as usize].leaf_count <= self.nodes[right as usize].leaf_count {
            left
        } else {
            right
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grand_parent != NULL_NODE {
            // Reconnect sibling to grandparent
            if self.nodes[grand_parent as usize].left == parent {
                self.nodes[grand_parent as usize].left = sibling;
            } else {
                self.nodes[grand_parent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);

            self.fix_upwards(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
    }

    fn fix_upwards(&mut self, start: u32) {
        let mut node_id = start;
        while node_id != NULL_NODE {
            node_id = self.balance(node_id);

            let left = self.nodes[node_id as usize].left;
            let right = self.nodes[node_id as usize].right;

            if left != NULL_NODE && right != NULL_NODE {
                let lh = self.nodes[left as usize].height;
                let rh = self.nodes[right as usize].height;
                self.nodes[node_id as usize].height = 1 + lh.max(rh);
                self.nodes[node_id as usize].leaf_count =
                    self.nodes[left as usize].leaf_count + self.nodes[right as usize].leaf_count;
                self.nodes[node_id as usize].aabb = self.nodes[left as usize]
                    .aabb
                    .union(&self.nodes[right as usize].aabb);
            }

            node_id = self.nodes[node_id as usize].parent;
        }
    }

    /// AVL-style tree rotation for balancing
    fn balance(&mut self, node_id: u32) -> u32 {
        if self.nodes[node_id as usize].is_leaf || self.nodes[node_id as usize].height < 2 {
            return node_id;
        }

        let left = self.nodes[node_id as usize].left;
        let right = self.nodes[node_id as usize].right;

        let balance_factor = self.nodes[right as usize].height - self.nodes[left as usize].height;

        if balance_factor > 1 {
            self.rotate_left(node_id)
        } else if balance_factor < -1 {
            self.rotate_right(node_id)
        } else {
            node_id
        }
    }

    fn rotate_left(&mut self, node_id: u32) -> u32 {
        let right = self.nodes[node_id as usize].right;
        let right_left = self.nodes[right as usize].left;
        let right_right = self.nodes[right as usize].right;
        let parent = self.nodes[node_id as usize].parent;

        // Right becomes new parent
        self.nodes[right as usize].left = node_id;
        self.nodes[right as usize].parent = parent;
        self.nodes[node_id as usize].parent = right;

        if parent != NULL_NODE {
            if self.nodes[parent as usize].left == node_id {
                self.nodes[parent as usize].left = right;
            } else {
                self.nodes[parent as usize].right = right;
            }
        } else {
            self.root = right;
        }

        // Rotate based on children heights
        let rl_h = self.height_of(right_left);
        let rr_h = self.height_of(right_right);

        if rl_h > rr_h {
            self.nodes[right as usize].right = right_left;
            self.nodes[node_id as usize].right = right_right;
            if right_right != NULL_NODE {
                self.nodes[right_right as usize].parent = node_id;
            }
            if right_left != NULL_NODE {
                self.nodes[right_left as usize].parent = right;
            }
        } else {
            self.nodes[node_id as usize].right = right_left;
            if right_left != NULL_NODE {
                self.nodes[right_left as usize].parent = node_id;
            }
        }

        self.refresh_node(node_id);
        self.refresh_node(right);

        right
    }

    fn rotate_right(&mut self, node_id: u32) -> u32 {
        let left = self.nodes[node_id as usize].left;
        let left_left = self.nodes[left as usize].left;
        let left_right = self.nodes[left as usize].right;
        let parent = self.nodes[node_id as usize].parent;

        self.nodes[left as usize].right = node_id;
        self.nodes[left as usize].parent = parent;
        self.nodes[node_id as usize].parent = left;

        if parent != NULL_NODE {
            if self.nodes[parent as usize].left == node_id {
                self.nodes[parent as usize].left = left;
            } else {
                self.nodes[parent as usize].right = left;
            }
        } else {
            self.root = left;
        }

        let ll_h = self.height_of(left_left);
        let lr_h = self.height_of(left_right);

        if lr_h > ll_h {
            self.nodes[left as usize].left = left_right;
            self.nodes[node_id as usize].left = left_left;
            if left_left != NULL_NODE {
                self.nodes[left_left as usize].parent = node_id;
            }
            if left_right != NULL_NODE {
                self.nodes[left_right as usize].parent = left;
            }
        } else {
            self.nodes[node_id as usize].left = left_right;
            if left_right != NULL_NODE {
                self.nodes[left_right as usize].parent = node_id;
            }
        }

        self.refresh_node(node_id);
        self.refresh_node(left);

        left
    }

    #[inline]
    fn height_of(&self, node_id: u32) -> i32 {
        if node_id == NULL_NODE {
            -1
        } else {
            self.nodes[node_id as usize].height
        }
    }

    /// Recompute an internal node's AABB, height, and leaf count from its
    /// children after a rotation.
    fn refresh_node(&mut self, node_id: u32) {
        let left = self.nodes[node_id as usize].left;
        let right = self.nodes[node_id as usize].right;
        if left != NULL_NODE && right != NULL_NODE {
            self.nodes[node_id as usize].aabb = self.nodes[left as usize]
                .aabb
                .union(&self.nodes[right as usize].aabb);
            let lh = self.nodes[left as usize].height;
            let rh = self.nodes[right as usize].height;
            self.nodes[node_id as usize].height = 1 + lh.max(rh);
            self.nodes[node_id as usize].leaf_count =
                self.nodes[left as usize].leaf_count + self.nodes[right as usize].leaf_count;
        }
    }

    fn collect_leaves(&self, node_id: u32, leaves: &mut Vec<u32>) {
        if node_id == NULL_NODE {
            return;
        }

        if self.nodes[node_id as usize].is_leaf {
            leaves.push(node_id);
        } else {
            self.collect_leaves(self.nodes[node_id as usize].left, leaves);
            self.collect_leaves(self.nodes[node_id as usize].right, leaves);
        }
    }
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new()
    }
}
