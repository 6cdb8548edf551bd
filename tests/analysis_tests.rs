//! Dominators, loops and regions

mod common;

use pretty_assertions::assert_eq;
use roofline_instr::analysis::{DominatorTree, LoopInfo, PostDominatorTree, RegionInfo};
use roofline_instr::ir::BlockId;

fn block_named(routine: &roofline_instr::Routine, name: &str) -> BlockId {
    routine
        .layout()
        .iter()
        .copied()
        .find(|b| routine.block(*b).name == name)
        .unwrap_or_else(|| panic!("no block named {}", name))
}

#[test]
fn test_dominator_tree() {
    let (routine, b) = common::sum_routine();
    let dt = DominatorTree::compute(&routine);

    assert_eq!(dt.idom(b.entry), None);
    assert_eq!(dt.idom(b.header), Some(b.entry));
    assert_eq!(dt.idom(b.body), Some(b.header));
    assert_eq!(dt.idom(b.exit), Some(b.header));
    assert!(dt.dominates(b.entry, b.exit));
    assert!(dt.dominates(b.header, b.header));
    assert!(!dt.properly_dominates(b.header, b.header));
    assert!(!dt.dominates(b.body, b.exit));
    assert_eq!(dt.reverse_post_order().first(), Some(&b.entry));
}

#[test]
fn test_post_dominator_tree() {
    let (routine, b) = common::sum_routine();
    let pdt = PostDominatorTree::compute(&routine);

    assert!(pdt.post_dominates(b.exit, b.entry));
    assert!(pdt.post_dominates(b.header, b.body));
    assert!(!pdt.post_dominates(b.body, b.header));
    assert_eq!(pdt.ipdom(b.body), Some(b.header));
    assert_eq!(pdt.ipdom(b.header), Some(b.exit));
}

#[test]
fn test_unreachable_block() {
    let (mut routine, b) = common::sum_routine();
    let dead = routine.add_block("dead");
    roofline_instr::ir::Builder::at_end(&mut routine, dead).br(b.exit);
    let dt = DominatorTree::compute(&routine);
    assert!(!dt.is_reachable(dead));
    assert!(dt.is_reachable(b.body));
}

#[test]
fn test_single_loop() {
    let (routine, b) = common::sum_routine();
    let dt = DominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);

    assert_eq!(loops.len(), 1);
    let id = loops.loop_for_header(b.header).expect("header starts a loop");
    let lp = loops.get(id);
    assert_eq!(lp.blocks(), &[b.header, b.body]);
    assert_eq!(lp.latches.as_slice(), &[b.body]);
    assert!(lp.is_outermost());
    assert_eq!(lp.depth, 1);
    assert_eq!(lp.preheader(&routine), Some(b.entry));
    assert_eq!(lp.exit_edges(&routine), vec![(b.header, b.exit)]);
    assert_eq!(lp.exit_block(&routine), Some(b.exit));
}

#[test]
fn test_loop_location_prefers_preheader_branch() {
    let (routine, b) = common::sum_routine();
    let dt = DominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);
    let lp = loops.get(loops.loop_for_header(b.header).expect("loop"));
    assert_eq!(lp.loc_str(&routine), "sum.c:4:3");
}

#[test]
fn test_loop_location_falls_back_to_header() {
    let (mut routine, b) = common::sum_routine();
    if let Some(term) = routine.block_mut(b.entry).terminator.as_mut() {
        term.loc = None;
    }
    let dt = DominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);
    let lp = loops.get(loops.loop_for_header(b.header).expect("loop"));
    assert_eq!(lp.loc_str(&routine), "sum.c:5:3");

    routine.strip_debug_locs();
    assert_eq!(lp.loc_str(&routine), "<unknown>");
}

#[test]
fn test_nested_loops() {
    let routine = common::nested_routine();
    let outer = block_named(&routine, "outer");
    let inner = block_named(&routine, "inner");
    let dt = DominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);

    assert_eq!(loops.len(), 2);
    let outer_id = loops.loop_for_header(outer).expect("outer loop");
    let inner_id = loops.loop_for_header(inner).expect("inner loop");
    assert_eq!(loops.get(inner_id).parent, Some(outer_id));
    assert_eq!(loops.get(inner_id).depth, 2);
    assert_eq!(loops.get(outer_id).children, vec![inner_id]);
    assert_eq!(loops.get(outer_id).blocks().len(), 4);
    assert_eq!(loops.innermost_loop_for(inner), Some(inner_id));
    assert_eq!(loops.top_level().count(), 1);
    // The inner loop's preheader lies inside the outer loop
    assert_eq!(loops.get(inner_id).preheader(&routine), Some(block_named(&routine, "inner.pre")));
}

#[test]
fn test_two_exit_loop() {
    let routine = common::two_exit_routine();
    let dt = DominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);
    let (_, lp) = loops.top_level().next().expect("one loop");

    assert_eq!(lp.exit_blocks(&routine).len(), 2);
    assert_eq!(lp.exit_block(&routine), None);
    assert!(lp.preheader(&routine).is_some());
}

#[test]
fn test_no_preheader() {
    let routine = common::no_preheader_routine();
    let dt = DominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);
    let (_, lp) = loops.top_level().next().expect("one loop");
    assert_eq!(lp.preheader(&routine), None);
    assert_eq!(lp.exit_block(&routine), Some(block_named(&routine, "exit")));
}

#[test]
fn test_region_for_loop() {
    let (routine, b) = common::sum_routine();
    let dt = DominatorTree::compute(&routine);
    let pdt = PostDominatorTree::compute(&routine);
    let loops = LoopInfo::compute(&routine, &dt);
    let lp = loops.get(loops.loop_for_header(b.header).expect("loop"));

    let region = RegionInfo::new(&routine, &dt, &pdt).region_for_loop(lp).expect("region");
    assert_eq!(region.entry, b.header);
    assert_eq!(region.exit, b.exit);
    assert_eq!(region.blocks(), &[b.header, b.body]);
    assert!(!region.contains(b.entry));
}

#[test]
fn test_region_rejects_side_entries() {
    let routine = common::two_exit_routine();
    let body = block_named(&routine, "for.body");
    let not_found = block_named(&routine, "not_found");
    let dt = DominatorTree::compute(&routine);
    let pdt = PostDominatorTree::compute(&routine);
    let info = RegionInfo::new(&routine, &dt, &pdt);
    // `found` returns without passing through the exit
    assert!(info.region(body, not_found).is_none());
    assert!(info.region(body, body).is_none());
}
