//! Region outlining
//!
//! Moves the blocks of a single-entry single-exit region into a new routine
//! and leaves a call in their place:
//!
//! ```text
//!   pred                      pred
//!    |                         |
//!  [entry .. region]   =>   codeRepl: call @host.roofline.loop(ins.., outs..)
//!    |                         |       reload outs
//!   exit                      exit
//! ```
//!
//! Values the region reads from outside become parameters. Values it defines
//! and the code after it reads are written through one pointer parameter
//! each into caller stack slots, then reloaded after the call. Phis of the
//! exit block that merge region values are rebuilt in the callee's return
//! stub and travel the same way.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::analysis::{DominatorTree, Region};
use crate::ir::{
    BlockId, Builder, Callee, InstId, InstKind, Linkage, Module, Routine, RoutineId,
    TerminatorKind, Type, User, Value,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("region contains the routine entry {0}")]
    ContainsEntryBlock(BlockId),
    #[error("region entry {0} has no predecessor outside the region")]
    NoOutsidePredecessor(BlockId),
    #[error("{block} is entered from {pred} outside the region")]
    SideEntry { block: BlockId, pred: BlockId },
    #[error("{block} is not dominated by the region entry {entry}")]
    NotDominated { entry: BlockId, block: BlockId },
    #[error("{0} returns from inside the region")]
    ReturnInRegion(BlockId),
    #[error("{0} has no terminator")]
    Unterminated(BlockId),
    #[error("edge {from} -> {to} leaves the region but not through its exit")]
    EscapingEdge { from: BlockId, to: BlockId },
}

/// The new routine and the call that replaced the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedRegion {
    pub callee: RoutineId,
    pub call_block: BlockId,
    pub call: InstId,
}

/// Outlines `region` out of `host` into a new internal routine tagged with
/// `generated_tag`
pub fn extract_region(
    module: &mut Module,
    host: RoutineId,
    region: &Region,
    generated_tag: &str,
) -> Result<ExtractedRegion, ExtractError> {
    check_region(module.routine(host), region)?;
    split_entry_phis(module.routine_mut(host), region);

    let routine = module.routine(host);
    let plan = Plan::new(routine, region);
    let name = module.unique_routine_name(&format!("{}.roofline.loop", routine.name));
    let callee = build_callee(routine, region, &plan, name, generated_tag);
    log::debug!(
        "outlining {} blocks of `{}` into `{}` ({} inputs, {} outputs, {} exit phis)",
        region.blocks().len(),
        routine.name,
        callee.name,
        plan.inputs.len(),
        plan.outputs.len(),
        plan.exit_phis.len()
    );

    let callee = module.add_routine(callee);
    let (call_block, call) = rewrite_caller(module.routine_mut(host), region, &plan, callee);
    Ok(ExtractedRegion { callee, call_block, call })
}

fn check_region(routine: &Routine, region: &Region) -> Result<(), ExtractError> {
    if let Some(entry) = routine.entry_block() {
        if region.contains(entry) {
            return Err(ExtractError::ContainsEntryBlock(entry));
        }
    }

    let dt = DominatorTree::compute(routine);
    let preds = routine.predecessors();
    for &block in region.blocks() {
        if !dt.dominates(region.entry, block) {
            return Err(ExtractError::NotDominated { entry: region.entry, block });
        }
        let term = routine.terminator(block).ok_or(ExtractError::Unterminated(block))?;
        if term.is_return() {
            return Err(ExtractError::ReturnInRegion(block));
        }
        for succ in term.successors() {
            if succ != region.exit && !region.contains(succ) {
                return Err(ExtractError::EscapingEdge { from: block, to: succ });
            }
        }
        if block == region.entry {
            continue;
        }
        if let Some(pred) = preds
            .get(&block)
            .and_then(|ps| ps.iter().copied().find(|p| !region.contains(*p)))
        {
            return Err(ExtractError::SideEntry { block, pred });
        }
    }

    let entered = preds
        .get(&region.entry)
        .is_some_and(|ps| ps.iter().any(|p| !region.contains(*p)));
    if !entered {
        return Err(ExtractError::NoOutsidePredecessor(region.entry));
    }
    Ok(())
}

/// Funnels several outside edges into the entry through one new block so
/// the entry phis see a single outside predecessor
fn split_entry_phis(routine: &mut Routine, region: &Region) {
    let outside: Vec<BlockId> = routine
        .predecessors()
        .get(&region.entry)
        .map(|ps| ps.iter().copied().filter(|p| !region.contains(*p)).collect())
        .unwrap_or_default();
    let phis = routine.phis(region.entry);
    if outside.len() < 2 || phis.is_empty() {
        return;
    }

    let name = format!("{}.split", routine.block(region.entry).name);
    let split = routine.insert_block_before(&name, region.entry);
    for phi in phis {
        let inst = routine.inst(phi);
        let ty = inst.ty.clone();
        let InstKind::Phi { incoming } = &inst.kind else {
            continue;
        };
        let (from_outside, from_region): (Vec<_>, Vec<_>) =
            incoming.iter().cloned().partition(|(p, _)| !region.contains(*p));

        let merged = Builder::at_end(routine, split).phi(ty, from_outside);
        let mut rebuilt = from_region;
        rebuilt.push((split, Value::Inst(merged)));
        routine.inst_mut(phi).kind = InstKind::Phi { incoming: rebuilt };
    }
    Builder::at_end(routine, split).br(region.entry);
    for pred in outside {
        routine.retarget_edges(pred, region.entry, split);
    }
}

/// What crosses the region boundary
struct Plan {
    /// Caller values read inside the region, in first-use order
    inputs: Vec<Value>,
    /// Region values read after it
    outputs: Vec<InstId>,
    /// Exit-block phis with at least one incoming edge from the region
    exit_phis: Vec<InstId>,
}

impl Plan {
    fn new(routine: &Routine, region: &Region) -> Self {
        let inst_blocks = routine.inst_blocks();
        let defined_outside = |value: &Value| match value {
            Value::Arg(_) => true,
            Value::Inst(id) => !inst_blocks.get(id).is_some_and(|b| region.contains(*b)),
            Value::Const(_) | Value::Global(_) => false,
        };

        let exit_phis: Vec<InstId> = routine
            .phis(region.exit)
            .into_iter()
            .filter(|phi| match &routine.inst(*phi).kind {
                InstKind::Phi { incoming } => incoming.iter().any(|(p, _)| region.contains(*p)),
                _ => false,
            })
            .collect();

        let mut inputs: Vec<Value> = Vec::new();
        let mut note_input = |value: &Value| {
            if defined_outside(value) && !inputs.contains(value) {
                inputs.push(value.clone());
            }
        };
        for &block in region.blocks() {
            for &inst in &routine.block(block).insts {
                for op in routine.inst(inst).kind.operands() {
                    note_input(op);
                }
            }
            if let Some(term) = routine.terminator(block) {
                for op in term.operands() {
                    note_input(op);
                }
            }
        }
        for &phi in &exit_phis {
            if let InstKind::Phi { incoming } = &routine.inst(phi).kind {
                for (_, value) in incoming.iter().filter(|(p, _)| region.contains(*p)) {
                    note_input(value);
                }
            }
        }

        let mut outputs = Vec::new();
        for &block in region.blocks() {
            for &inst in &routine.block(block).insts {
                if used_after_region(routine, region, inst) {
                    outputs.push(inst);
                }
            }
        }

        Plan { inputs, outputs, exit_phis }
    }

    fn param_types(&self, routine: &Routine) -> Vec<Type> {
        let mut params: Vec<Type> = self.inputs.iter().map(|v| routine.value_type(v)).collect();
        params.extend(std::iter::repeat(Type::Ptr).take(self.outputs.len() + self.exit_phis.len()));
        params
    }
}

/// Whether code outside `region` reads `inst`. Exit phi entries coming from
/// the region do not count: those phis are rebuilt in the callee.
fn used_after_region(routine: &Routine, region: &Region, inst: InstId) -> bool {
    let value = Value::Inst(inst);
    routine.uses_of(&value).into_iter().any(|(block, user)| {
        if region.contains(block) {
            return false;
        }
        match user {
            User::Inst(phi) if block == region.exit => match &routine.inst(phi).kind {
                InstKind::Phi { incoming } => incoming
                    .iter()
                    .any(|(p, v)| *v == value && !region.contains(*p)),
                _ => true,
            },
            _ => true,
        }
    })
}

fn build_callee(routine: &Routine, region: &Region, plan: &Plan, name: String, tag: &str) -> Routine {
    let mut callee = Routine::new(name, plan.param_types(routine), Type::Void);
    callee.linkage = Linkage::Internal;
    callee.set_metadata(tag, "true");

    let root = callee.add_block("newFuncRoot");
    let block_map: FxHashMap<BlockId, BlockId> = region
        .blocks()
        .iter()
        .map(|b| (*b, callee.add_block(&routine.block(*b).name)))
        .collect();
    let stub_name = format!("{}.exitStub", routine.block(region.exit).name);
    let stub = callee.add_block(&stub_name);

    let mut inst_map: FxHashMap<InstId, InstId> = FxHashMap::default();
    for &block in region.blocks() {
        for &inst in &routine.block(block).insts {
            let copy = callee.push_inst(block_map[&block], routine.inst(inst).clone());
            inst_map.insert(inst, copy);
        }
    }

    let map_value = |value: &Value| -> Value {
        if let Some(pos) = plan.inputs.iter().position(|i| i == value) {
            return Value::Arg(pos as u32);
        }
        match value {
            Value::Inst(id) => inst_map.get(id).map_or_else(|| value.clone(), |c| Value::Inst(*c)),
            other => other.clone(),
        }
    };
    let map_block = |block: BlockId| -> BlockId {
        if block == region.exit {
            stub
        } else {
            block_map.get(&block).copied().unwrap_or(root)
        }
    };

    for &copy in inst_map.values() {
        let kind = &mut callee.inst_mut(copy).kind;
        if let InstKind::Phi { incoming } = &mut *kind {
            for (pred, _) in incoming.iter_mut() {
                *pred = map_block(*pred);
            }
        }
        for op in kind.operands_mut() {
            *op = map_value(op);
        }
    }

    for &block in region.blocks() {
        if let Some(term) = routine.terminator(block) {
            let mut term = term.clone();
            term.map_successors(&map_block);
            for op in term.operands_mut() {
                *op = map_value(op);
            }
            callee.set_terminator(block_map[&block], term);
        }
    }
    Builder::at_end(&mut callee, root).br(map_block(region.entry));

    let first_slot = plan.inputs.len();
    let mut stub_phis = Vec::with_capacity(plan.exit_phis.len());
    for &phi in &plan.exit_phis {
        let inst = routine.inst(phi);
        let incoming: Vec<(BlockId, Value)> = match &inst.kind {
            InstKind::Phi { incoming } => incoming
                .iter()
                .filter(|(p, _)| region.contains(*p))
                .map(|(p, v)| (map_block(*p), map_value(v)))
                .collect(),
            _ => Vec::new(),
        };
        stub_phis.push(Builder::at_end(&mut callee, stub).phi(inst.ty.clone(), incoming));
    }

    let mut builder = Builder::at_end(&mut callee, stub);
    for (k, &out) in plan.outputs.iter().enumerate() {
        builder.store(map_value(&Value::Inst(out)), Value::Arg((first_slot + k) as u32));
    }
    let first_phi_slot = first_slot + plan.outputs.len();
    for (j, &phi) in stub_phis.iter().enumerate() {
        builder.store(Value::Inst(phi), Value::Arg((first_phi_slot + j) as u32));
    }
    builder.ret(None);

    callee
}

fn rewrite_caller(
    routine: &mut Routine,
    region: &Region,
    plan: &Plan,
    callee: RoutineId,
) -> (BlockId, InstId) {
    let outside_preds: Vec<BlockId> = routine
        .predecessors()
        .get(&region.entry)
        .map(|ps| ps.iter().copied().filter(|p| !region.contains(*p)).collect())
        .unwrap_or_default();

    let slot_types: Vec<Type> = plan
        .outputs
        .iter()
        .chain(&plan.exit_phis)
        .map(|i| routine.inst(*i).ty.clone())
        .collect();

    let mut slots = Vec::with_capacity(slot_types.len());
    if let Some(entry) = routine.entry_block() {
        let mut builder = Builder::at_first_insertion_point(routine, entry);
        for ty in &slot_types {
            slots.push(builder.alloca(ty.clone()));
        }
    }

    let call_block = routine.insert_block_before("codeRepl", region.entry);
    let mut builder = Builder::at_end(routine, call_block);
    let mut args = plan.inputs.clone();
    args.extend(slots.iter().map(|s| Value::Inst(*s)));
    let call = builder.call(Callee::Routine(callee), args, Type::Void);
    let reloads: Vec<InstId> = slots
        .iter()
        .zip(slot_types)
        .map(|(slot, ty)| builder.load(ty, Value::Inst(*slot)))
        .collect();
    builder.br(region.exit);

    for pred in outside_preds {
        routine.retarget_edges(pred, region.entry, call_block);
    }

    let (output_reloads, phi_reloads) = reloads.split_at(plan.outputs.len());
    for (&phi, &reload) in plan.exit_phis.iter().zip(phi_reloads) {
        if let InstKind::Phi { incoming } = &mut routine.inst_mut(phi).kind {
            incoming.retain(|(p, _)| !region.contains(*p));
            incoming.push((call_block, Value::Inst(reload)));
        }
    }

    for &block in region.blocks() {
        routine.detach_block(block);
    }
    for (&out, &reload) in plan.outputs.iter().zip(output_reloads) {
        routine.replace_all_uses(&Value::Inst(out), &Value::Inst(reload));
    }

    debug_assert!(matches!(
        routine.terminator(call_block).map(|t| &t.kind),
        Some(TerminatorKind::Br(_))
    ));
    (call_block, call)
}
