//! Natural loop discovery
//!
//! A back edge is an edge `latch -> header` where the header dominates the
//! latch. Loops sharing a header are merged; nesting follows block
//! containment.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::fmt;

use super::dominators::DominatorTree;
use crate::ir::{BlockId, DebugLoc, Routine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "loop{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub latches: SmallVec<[BlockId; 2]>,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
    pub depth: u32,
    blocks: Vec<BlockId>,
    block_set: FxHashSet<BlockId>,
}

impl Loop {
    /// Member blocks in layout order
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.block_set.contains(&block)
    }

    pub fn is_outermost(&self) -> bool {
        self.parent.is_none()
    }

    /// The single block outside the loop that branches only to the header
    pub fn preheader(&self, routine: &Routine) -> Option<BlockId> {
        let preds = routine.predecessors();
        let mut outside = preds
            .get(&self.header)?
            .iter()
            .copied()
            .filter(|p| !self.contains(*p));
        let candidate = outside.next()?;
        if outside.next().is_some() {
            return None;
        }
        let succs = routine.successors(candidate);
        if succs.len() == 1 && succs[0] == self.header {
            Some(candidate)
        } else {
            None
        }
    }

    /// Edges leaving the loop as `(exiting, exit)` pairs
    pub fn exit_edges(&self, routine: &Routine) -> Vec<(BlockId, BlockId)> {
        let mut edges = Vec::new();
        for &block in &self.blocks {
            for succ in routine.successors(block) {
                if !self.contains(succ) {
                    edges.push((block, succ));
                }
            }
        }
        edges
    }

    /// Distinct blocks outside the loop reached from inside it
    pub fn exit_blocks(&self, routine: &Routine) -> Vec<BlockId> {
        let mut exits = Vec::new();
        for (_, exit) in self.exit_edges(routine) {
            if !exits.contains(&exit) {
                exits.push(exit);
            }
        }
        exits
    }

    /// The exit block when every exit edge reaches the same one
    pub fn exit_block(&self, routine: &Routine) -> Option<BlockId> {
        match self.exit_blocks(routine).as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Source position of the loop: the preheader's branch, then the header's
    pub fn start_loc(&self, routine: &Routine) -> Option<DebugLoc> {
        if let Some(preheader) = self.preheader(routine) {
            if let Some(loc) = routine.terminator(preheader).and_then(|t| t.loc.clone()) {
                return Some(loc);
            }
        }
        if let Some(loc) = routine.terminator(self.header).and_then(|t| t.loc.clone()) {
            return Some(loc);
        }
        routine
            .block(self.header)
            .insts
            .iter()
            .find_map(|i| routine.inst(*i).loc.clone())
    }

    pub fn loc_str(&self, routine: &Routine) -> String {
        self.start_loc(routine)
            .map(|loc| loc.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

/// Loop nest of one routine
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    loops: Vec<Loop>,
    header_map: FxHashMap<BlockId, LoopId>,
}

impl LoopInfo {
    pub fn compute(routine: &Routine, dt: &DominatorTree) -> Self {
        let rpo = dt.reverse_post_order();

        // Back edges grouped by header, headers in reverse post-order
        let mut headers: Vec<BlockId> = Vec::new();
        let mut latches: FxHashMap<BlockId, SmallVec<[BlockId; 2]>> = FxHashMap::default();
        for &block in &rpo {
            for succ in routine.successors(block) {
                if dt.dominates(succ, block) {
                    if !headers.contains(&succ) {
                        headers.push(succ);
                    }
                    latches.entry(succ).or_default().push(block);
                }
            }
        }
        headers.sort_by_key(|h| rpo.iter().position(|b| b == h));

        let preds = routine.predecessors();
        let mut loops = Vec::with_capacity(headers.len());
        for header in headers {
            let loop_latches = latches.remove(&header).unwrap_or_default();
            let mut block_set = FxHashSet::default();
            block_set.insert(header);
            let mut worklist: Vec<BlockId> = loop_latches.to_vec();
            while let Some(block) = worklist.pop() {
                if !dt.is_reachable(block) || !block_set.insert(block) {
                    continue;
                }
                if let Some(block_preds) = preds.get(&block) {
                    worklist.extend(block_preds.iter().copied());
                }
            }
            let blocks = routine
                .layout()
                .iter()
                .copied()
                .filter(|b| block_set.contains(b))
                .collect();
            loops.push(Loop {
                header,
                latches: loop_latches,
                parent: None,
                children: Vec::new(),
                depth: 1,
                blocks,
                block_set,
            });
        }

        // The parent is the smallest other loop containing the header
        for i in 0..loops.len() {
            let parent = (0..loops.len())
                .filter(|&j| j != i && loops[j].contains(loops[i].header))
                .min_by_key(|&j| loops[j].blocks.len());
            loops[i].parent = parent.map(|j| LoopId(j as u32));
        }
        for i in 0..loops.len() {
            if let Some(parent) = loops[i].parent {
                loops[parent.0 as usize].children.push(LoopId(i as u32));
            }
            let mut depth = 1;
            let mut current = loops[i].parent;
            while let Some(p) = current {
                depth += 1;
                current = loops[p.0 as usize].parent;
            }
            loops[i].depth = depth;
        }

        let header_map = loops
            .iter()
            .enumerate()
            .map(|(i, l)| (l.header, LoopId(i as u32)))
            .collect();
        LoopInfo { loops, header_map }
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (LoopId, &Loop)> {
        self.loops.iter().enumerate().map(|(i, l)| (LoopId(i as u32), l))
    }

    /// Loops with no enclosing loop, outermost headers first
    pub fn top_level(&self) -> impl Iterator<Item = (LoopId, &Loop)> {
        self.iter().filter(|(_, l)| l.is_outermost())
    }

    pub fn loop_for_header(&self, header: BlockId) -> Option<LoopId> {
        self.header_map.get(&header).copied()
    }

    /// Deepest loop containing `block`
    pub fn innermost_loop_for(&self, block: BlockId) -> Option<LoopId> {
        self.iter()
            .filter(|(_, l)| l.contains(block))
            .max_by_key(|(_, l)| l.depth)
            .map(|(id, _)| id)
    }
}
