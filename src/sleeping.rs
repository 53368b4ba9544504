//! Activity Manager
//!
//! Decides which bodies sleep and when. A body becomes a sleep candidate
//! after its squared velocity stays under its threshold for enough
//! consecutive ticks; a negative threshold makes sleep unreachable. Bodies
//! never sleep alone while touching something awake: islands are connected
//! components over the constraint graph, and an island sleeps atomically
//! only when every member is a candidate. Waking any member wakes the whole
//! island.
//!
//! Kinematic bodies may sleep but never merge islands; a dynamic body
//! resting on a moving kinematic stays awake on its own candidacy, not
//! through graph connectivity.
//!
//! Author: Moroya Sakamoto

use crate::bodies::{Bodies, ACTIVE_SET};
use crate::handles::BodyHandle;

// ============================================================================
// Union-find
// ============================================================================

/// Union-find with path halving and union by rank.
struct IslandForest {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl IslandForest {
    fn new(count: usize) -> Self {
        Self {
            parent: (0..count as u32).collect(),
            rank: vec![0; count],
        }
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (low, high) = if self.rank[ra as usize] < self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[low as usize] = high;
        if self.rank[low as usize] == self.rank[high as usize] {
            self.rank[high as usize] += 1;
        }
    }
}

// ============================================================================
// Candidacy
// ============================================================================

/// Advance every active body's sleep candidacy by one tick.
pub fn update_sleep_candidacy(bodies: &mut Bodies) {
    let set = bodies.active_mut();
    for i in 0..set.motion.len() {
        let velocity = &set.motion[i].velocity;
        let squared = velocity.linear.length_squared() + velocity.angular.length_squared();
        let activity = &mut set.activity[i];
        if activity.sleep_threshold >= 0.0 && squared < activity.sleep_threshold {
            activity.timesteps_under_threshold = activity.timesteps_under_threshold.saturating_add(1);
            activity.sleep_candidate =
                activity.timesteps_under_threshold >= activity.minimum_timesteps_under_threshold;
        } else {
            activity.timesteps_under_threshold = 0;
            activity.sleep_candidate = false;
        }
    }
}

// ============================================================================
// Island sleep
// ============================================================================

/// Move every fully-candidate island into its own sleeping set. Edges are
/// active-set index pairs from this tick's constraints; `None` sides
/// (statics) never bind. Returns the slots of the sets that were filled.
pub fn sleep_islands(
    bodies: &mut Bodies,
    edges: impl Iterator<Item = (Option<u32>, Option<u32>)>,
) -> Vec<u32> {
    let count = bodies.active().count();
    if count == 0 {
        return Vec::new();
    }
    let mut forest = IslandForest::new(count);
    {
        let set = bodies.active();
        for (a, b) in edges {
            if let (Some(a), Some(b)) = (a, b) {
                // Kinematics anchor nothing
                if set.local_inertias[a as usize].is_kinematic()
                    || set.local_inertias[b as usize].is_kinematic()
                {
                    continue;
                }
                forest.union(a, b);
            }
        }
    }

    // Root → whether every member so far is a candidate
    let mut island_sleepable = vec![true; count];
    for i in 0..count {
        let root = forest.find(i as u32) as usize;
        if !bodies.active().activity[i].sleep_candidate {
            island_sleepable[root] = false;
        }
    }

    // Gather handles per sleepable island before any move invalidates
    // active-set indices
    let mut islands: Vec<Vec<BodyHandle>> = Vec::new();
    let mut island_slot = vec![u32::MAX; count];
    for i in 0..count {
        let root = forest.find(i as u32) as usize;
        if !island_sleepable[root] {
            continue;
        }
        if island_slot[root] == u32::MAX {
            island_slot[root] = islands.len() as u32;
            islands.push(Vec::new());
        }
        islands[island_slot[root] as usize].push(bodies.active().index_to_handle[i]);
    }

    let mut filled = Vec::with_capacity(islands.len());
    for island in islands {
        let slot = bodies.allocate_sleeping_set();
        for handle in island {
            bodies.move_to_sleeping_set(handle, slot);
        }
        filled.push(slot);
    }
    filled
}

/// Wake the island containing `handle`, if it is asleep.
pub fn awaken(bodies: &mut Bodies, handle: BodyHandle) -> bool {
    match bodies.location(handle) {
        Ok(location) if location.set != ACTIVE_SET => {
            bodies.wake_set(location.set);
            true
        }
        _ => false,
    }
}
