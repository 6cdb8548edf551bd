//! Single-entry single-exit regions
//!
//! A region `(entry, exit)` is the set of blocks reachable from `entry`
//! without passing through `exit`. It is well formed when the entry
//! dominates every member, the exit post-dominates every member, and only
//! the entry has predecessors outside the region.

use rustc_hash::FxHashSet;

use super::dominators::{DominatorTree, PostDominatorTree};
use super::loops::Loop;
use crate::ir::{BlockId, Routine};

#[derive(Debug, Clone)]
pub struct Region {
    pub entry: BlockId,
    pub exit: BlockId,
    blocks: Vec<BlockId>,
    block_set: FxHashSet<BlockId>,
}

impl Region {
    /// Member blocks in layout order
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.block_set.contains(&block)
    }
}

pub struct RegionInfo<'a> {
    routine: &'a Routine,
    dt: &'a DominatorTree,
    pdt: &'a PostDominatorTree,
}

impl<'a> RegionInfo<'a> {
    pub fn new(routine: &'a Routine, dt: &'a DominatorTree, pdt: &'a PostDominatorTree) -> Self {
        RegionInfo { routine, dt, pdt }
    }

    /// Smallest well-formed region containing every block of `lp`.
    ///
    /// Entries are tried from the header up the dominator tree, exits from
    /// the loop's exit block down the post-dominator tree.
    pub fn region_for_loop(&self, lp: &Loop) -> Option<Region> {
        let first_exit = lp.exit_block(self.routine)?;
        let exits: Vec<BlockId> =
            std::iter::successors(Some(first_exit), |b| self.pdt.ipdom(*b)).collect();

        let mut entry = Some(lp.header);
        while let Some(candidate) = entry {
            for &exit in &exits {
                if let Some(region) = self.region(candidate, exit) {
                    if lp.blocks().iter().all(|b| region.contains(*b)) {
                        return Some(region);
                    }
                }
            }
            entry = self.dt.idom(candidate);
        }
        None
    }

    /// The region between `entry` and `exit`, if it is well formed
    pub fn region(&self, entry: BlockId, exit: BlockId) -> Option<Region> {
        if entry == exit {
            return None;
        }

        let mut block_set = FxHashSet::default();
        let mut worklist = vec![entry];
        while let Some(block) = worklist.pop() {
            if block == exit || !block_set.insert(block) {
                continue;
            }
            let succs = self.routine.successors(block);
            if succs.is_empty() {
                // Control leaves the routine without reaching the exit
                return None;
            }
            worklist.extend(succs);
        }

        let preds = self.routine.predecessors();
        for &block in &block_set {
            if !self.dt.dominates(entry, block) || !self.pdt.post_dominates(exit, block) {
                return None;
            }
            if block == entry {
                continue;
            }
            let outside = preds
                .get(&block)
                .is_some_and(|ps| ps.iter().any(|p| !block_set.contains(p)));
            if outside {
                return None;
            }
        }

        let blocks = self
            .routine
            .layout()
            .iter()
            .copied()
            .filter(|b| block_set.contains(b))
            .collect();
        Some(Region { entry, exit, blocks, block_set })
    }
}
