//! Runtime-selected original and instrumented paths
//!
//! After outlining, the loop site is one block calling the extracted
//! routine. It becomes:
//!
//! ```text
//!            dispatch            query, identity, begin
//!            /      \
//!      codeRepl    codeRepl.instrumented
//!            \      /
//!             merge              phis for live-outs, end
//!               |
//!              succ
//! ```

use rustc_hash::FxHashMap;

use super::extract::ExtractedRegion;
use super::protocol::{self, LoopIdentity, ProtocolDecls};
use crate::ir::{
    BlockId, Builder, Callee, InstId, InstKind, Module, Routine, RoutineAttrs, RoutineId,
    TerminatorKind, Type, Value,
};

/// Blocks and values of a rewired loop site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualPath {
    pub dispatch: BlockId,
    pub original: BlockId,
    pub instrumented: BlockId,
    pub merge: BlockId,
    pub handle: InstId,
    pub merged: Vec<InstId>,
}

/// Copies `extracted` with one more `ptr` parameter for the loop handle.
/// The copy has no source positions and is kept away from the optimizer.
pub fn clone_instrumented(module: &mut Module, extracted: RoutineId) -> RoutineId {
    let mut clone = module.routine(extracted).clone();
    clone.name = module.unique_routine_name(&format!("{}.instrumented", clone.name));
    clone.params.push(Type::Ptr);
    clone.strip_debug_locs();
    clone.attrs |= RoutineAttrs::OPTIMIZE_NONE | RoutineAttrs::NO_INLINE;
    module.add_routine(clone)
}

/// Call-block instructions read by other blocks
fn live_outs(routine: &Routine, block: BlockId) -> Vec<InstId> {
    routine
        .block(block)
        .insts
        .iter()
        .copied()
        .filter(|inst| {
            routine
                .uses_of(&Value::Inst(*inst))
                .iter()
                .any(|(user_block, _)| *user_block != block)
        })
        .collect()
}

/// Duplicates `block` right after itself, remapping values defined in it
fn clone_block(routine: &mut Routine, block: BlockId, name: &str) -> (BlockId, FxHashMap<InstId, InstId>) {
    let copy = routine.insert_block_after(name, block);
    let mut map = FxHashMap::default();
    for inst in routine.block(block).insts.clone() {
        let data = routine.inst(inst).clone();
        map.insert(inst, routine.push_inst(copy, data));
    }
    for new in map.values().copied().collect::<Vec<_>>() {
        for op in routine.inst_mut(new).kind.operands_mut() {
            if let Some(mapped) = op.as_inst().and_then(|i| map.get(&i)) {
                *op = Value::Inst(*mapped);
            }
        }
    }
    if let Some(term) = routine.terminator(block).cloned() {
        routine.set_terminator(copy, term);
    }
    (copy, map)
}

/// Rewires the call site of `extracted` into a dispatch between the
/// original call and a call to `instrumented`
pub fn build_dual_path(
    module: &mut Module,
    host: RoutineId,
    extracted: &ExtractedRegion,
    instrumented: RoutineId,
    decls: &ProtocolDecls,
    identity: &LoopIdentity,
) -> Option<DualPath> {
    let routine = module.routine_mut(host);
    let original = extracted.call_block;
    let succ = match routine.terminator(original).map(|t| &t.kind) {
        Some(TerminatorKind::Br(succ)) => *succ,
        _ => return None,
    };

    let outs = live_outs(routine, original);
    let preds: Vec<BlockId> = routine
        .predecessors()
        .get(&original)
        .map(|ps| ps.to_vec())
        .unwrap_or_default();

    let instr_name = format!("{}.instrumented", routine.block(original).name);
    let (instr_block, inst_map) = clone_block(routine, original, &instr_name);
    let dispatch = routine.insert_block_before("roofline.dispatch", original);
    let merge = routine.insert_block_after("roofline.merge", instr_block);

    for pred in preds {
        routine.retarget_edges(pred, original, dispatch);
    }
    routine.replace_phi_pred(succ, original, merge);
    routine.retarget_edges(original, succ, merge);
    routine.retarget_edges(instr_block, succ, merge);

    // Swap the cloned call over to the instrumented routine; the handle is
    // appended once it exists
    let instr_call = inst_map.get(&extracted.call).copied()?;
    if let InstKind::Call { callee, .. } = &mut routine.inst_mut(instr_call).kind {
        *callee = Callee::Routine(instrumented);
    }

    let handle = protocol::emit_dispatch(module, host, decls, identity, dispatch, instr_block, original)?;
    let routine = module.routine_mut(host);
    if let InstKind::Call { args, .. } = &mut routine.inst_mut(instr_call).kind {
        args.push(Value::Inst(handle));
    }

    let mut merged = Vec::with_capacity(outs.len());
    for out in outs {
        let ty = routine.inst(out).ty.clone();
        let clone = inst_map.get(&out).copied()?;
        let phi = Builder::at_end(routine, merge).phi(
            ty,
            vec![(original, Value::Inst(out)), (instr_block, Value::Inst(clone))],
        );
        routine.replace_uses_where(&Value::Inst(out), &Value::Inst(phi), |b| {
            b != original && b != merge
        });
        merged.push(phi);
    }

    protocol::emit_loop_end(routine, merge, decls, handle);
    Builder::at_end(routine, merge).br(succ);

    log::debug!(
        "`{}`: dispatch {} selects {} or {}, {} live-outs merged in {}",
        routine.name,
        dispatch,
        original,
        instr_block,
        merged.len(),
        merge
    );
    Some(DualPath { dispatch, original, instrumented: instr_block, merge, handle, merged })
}
