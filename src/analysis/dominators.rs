//! Dominator and post-dominator trees
//!
//! Both trees use the iterative algorithm of Cooper, Harvey and Kennedy over
//! a reverse post-order. The post-dominator tree runs on the reversed graph
//! rooted at a virtual exit that every returning block flows into.

use rustc_hash::FxHashMap;

use crate::ir::{BlockId, Routine};

/// Immediate dominators over dense node indices
#[derive(Debug, Clone)]
struct DomForest {
    idom: Vec<Option<usize>>,
    rpo: Vec<usize>,
    rpo_number: Vec<Option<usize>>,
}

impl DomForest {
    fn compute(root: usize, succs: &[Vec<usize>], preds: &[Vec<usize>]) -> Self {
        let n = succs.len();

        // Iterative DFS post-order from the root
        let mut post_order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut stack = vec![(root, 0usize)];
        visited[root] = true;
        while let Some((node, child)) = stack.pop() {
            if child < succs[node].len() {
                stack.push((node, child + 1));
                let next = succs[node][child];
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                post_order.push(node);
            }
        }
        let rpo: Vec<usize> = post_order.into_iter().rev().collect();
        let mut rpo_number = vec![None; n];
        for (i, node) in rpo.iter().enumerate() {
            rpo_number[*node] = Some(i);
        }

        let mut idom: Vec<Option<usize>> = vec![None; n];
        idom[root] = Some(root);
        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let mut new_idom: Option<usize> = None;
                for &pred in &preds[node] {
                    if idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_number, pred, current),
                    });
                }
                if new_idom.is_some() && idom[node] != new_idom {
                    idom[node] = new_idom;
                    changed = true;
                }
            }
        }

        DomForest { idom, rpo, rpo_number }
    }

    fn reachable(&self, node: usize) -> bool {
        self.rpo_number[node].is_some()
    }

    fn dominates(&self, a: usize, b: usize) -> bool {
        if !self.reachable(a) || !self.reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom[current] {
                Some(parent) if parent != current => current = parent,
                _ => return false,
            }
        }
    }

    fn parent(&self, node: usize) -> Option<usize> {
        match self.idom[node] {
            Some(parent) if parent != node => Some(parent),
            _ => None,
        }
    }
}

fn intersect(idom: &[Option<usize>], rpo_number: &[Option<usize>], a: usize, b: usize) -> usize {
    let number = |n: usize| rpo_number[n].unwrap_or(usize::MAX);
    let (mut finger1, mut finger2) = (a, b);
    while finger1 != finger2 {
        while number(finger1) > number(finger2) {
            match idom[finger1] {
                Some(next) => finger1 = next,
                None => return finger2,
            }
        }
        while number(finger2) > number(finger1) {
            match idom[finger2] {
                Some(next) => finger2 = next,
                None => return finger1,
            }
        }
    }
    finger1
}

/// Dense numbering of a routine's attached blocks
fn number_blocks(routine: &Routine) -> (Vec<BlockId>, FxHashMap<BlockId, usize>) {
    let nodes = routine.layout().to_vec();
    let index = nodes.iter().enumerate().map(|(i, b)| (*b, i)).collect();
    (nodes, index)
}

/// Dominance relation of a routine's control flow graph
#[derive(Debug, Clone)]
pub struct DominatorTree {
    nodes: Vec<BlockId>,
    index: FxHashMap<BlockId, usize>,
    forest: DomForest,
}

impl DominatorTree {
    pub fn compute(routine: &Routine) -> Self {
        let (nodes, index) = number_blocks(routine);
        let mut succs = vec![Vec::new(); nodes.len()];
        let mut preds = vec![Vec::new(); nodes.len()];
        for (i, block) in nodes.iter().enumerate() {
            for succ in routine.successors(*block) {
                if let Some(&j) = index.get(&succ) {
                    if !succs[i].contains(&j) {
                        succs[i].push(j);
                        preds[j].push(i);
                    }
                }
            }
        }
        let forest = if nodes.is_empty() {
            DomForest { idom: Vec::new(), rpo: Vec::new(), rpo_number: Vec::new() }
        } else {
            DomForest::compute(0, &succs, &preds)
        };
        DominatorTree { nodes, index, forest }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.index.get(&block).is_some_and(|i| self.forest.reachable(*i))
    }

    /// Every path from the entry to `b` goes through `a`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(&a), Some(&b)) => self.forest.dominates(a, b),
            _ => false,
        }
    }

    pub fn properly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let i = *self.index.get(&block)?;
        self.forest.parent(i).map(|p| self.nodes[p])
    }

    /// Reachable blocks, entry first
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        self.forest.rpo.iter().map(|i| self.nodes[*i]).collect()
    }
}

/// Post-dominance relation, rooted at a virtual exit
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    nodes: Vec<BlockId>,
    index: FxHashMap<BlockId, usize>,
    forest: DomForest,
}

impl PostDominatorTree {
    pub fn compute(routine: &Routine) -> Self {
        let (nodes, index) = number_blocks(routine);
        let exit = nodes.len();
        let mut rev_succs = vec![Vec::new(); nodes.len() + 1];
        let mut rev_preds = vec![Vec::new(); nodes.len() + 1];
        for (i, block) in nodes.iter().enumerate() {
            let succs = routine.successors(*block);
            if succs.is_empty() {
                rev_succs[exit].push(i);
                rev_preds[i].push(exit);
            }
            for succ in succs {
                if let Some(&j) = index.get(&succ) {
                    if !rev_succs[j].contains(&i) {
                        rev_succs[j].push(i);
                        rev_preds[i].push(j);
                    }
                }
            }
        }
        let forest = DomForest::compute(exit, &rev_succs, &rev_preds);
        PostDominatorTree { nodes, index, forest }
    }

    /// Every path from `b` to a return goes through `a`
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(&a), Some(&b)) => self.forest.dominates(a, b),
            _ => false,
        }
    }

    /// Immediate post-dominator; `None` when only the virtual exit follows
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        let i = *self.index.get(&block)?;
        self.forest.parent(i).and_then(|p| self.nodes.get(p).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Terminator, TerminatorKind, Type, Value};

    fn diamond() -> (Routine, [BlockId; 4]) {
        let mut r = Routine::new("diamond", vec![Type::i1()], Type::Void);
        let a = r.add_block("a");
        let b = r.add_block("b");
        let c = r.add_block("c");
        let d = r.add_block("d");
        r.set_terminator(
            a,
            Terminator::new(TerminatorKind::CondBr { cond: Value::Arg(0), then_dest: b, else_dest: c }),
        );
        r.set_terminator(b, Terminator::new(TerminatorKind::Br(d)));
        r.set_terminator(c, Terminator::new(TerminatorKind::Br(d)));
        r.set_terminator(d, Terminator::new(TerminatorKind::Ret(None)));
        (r, [a, b, c, d])
    }

    #[test]
    fn test_diamond_dominance() {
        let (r, [a, b, c, d]) = diamond();
        let dt = DominatorTree::compute(&r);
        assert!(dt.dominates(a, d));
        assert!(!dt.dominates(b, d));
        assert_eq!(dt.idom(d), Some(a));
        assert_eq!(dt.idom(b), Some(a));
        assert_eq!(dt.idom(a), None);
        assert!(dt.dominates(c, c));
    }

    #[test]
    fn test_diamond_post_dominance() {
        let (r, [a, b, _c, d]) = diamond();
        let pdt = PostDominatorTree::compute(&r);
        assert!(pdt.post_dominates(d, a));
        assert!(!pdt.post_dominates(b, a));
        assert_eq!(pdt.ipdom(a), Some(d));
        assert_eq!(pdt.ipdom(d), None);
    }
}
