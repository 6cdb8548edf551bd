//! Structural verification of rewritten routines
//!
//! Checks the invariants every later consumer relies on:
//! - every attached block ends in a terminator whose targets are attached
//! - phis open their block and list each predecessor exactly once
//! - every operand refers to something that exists and dominates its use
//! - calls, memory accesses, branches and returns are well typed
//!
//! A routine that fails here is never handed on: [`enforce`] stops the
//! process through the configured [`VerifyFailureAction`].

use std::fmt;

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::analysis::DominatorTree;
use crate::config::VerifyFailureAction;
use crate::ir::{
    BlockId, Callee, InstId, InstKind, Intrinsic, Module, Routine, RoutineId, TerminatorKind,
    Type, Value,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{0} has no terminator")]
    MissingTerminator(BlockId),
    #[error("{block} branches to {target}, which is not in the routine")]
    InvalidSuccessor { block: BlockId, target: BlockId },
    #[error("entry block {0} has predecessors")]
    EntryHasPredecessors(BlockId),
    #[error("phi {inst} in {block} follows a non-phi instruction")]
    PhiNotAtStart { block: BlockId, inst: InstId },
    #[error("phi {inst} in {block} does not match the block's predecessors")]
    PhiPredecessorMismatch { block: BlockId, inst: InstId },
    #[error("{user} in {block} reads {value}, which is not defined in the routine")]
    UndefinedValue { block: BlockId, user: String, value: String },
    #[error("{user} in {block} reads {value} before it is defined")]
    UseNotDominated { block: BlockId, user: String, value: String },
    #[error("{inst} calls `{callee}` with a mismatched signature")]
    CallSignatureMismatch { inst: InstId, callee: String },
    #[error("{inst} accesses memory through a non-pointer")]
    NonPointerAddress { inst: InstId },
    #[error("{0} branches on a non-i1 condition")]
    ConditionNotBool(BlockId),
    #[error("{0} returns a value of the wrong type")]
    ReturnTypeMismatch(BlockId),
}

/// All problems found in one routine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("routine `{routine}` failed verification: {}", join(.errors))]
pub struct VerificationFailed {
    pub routine: String,
    pub errors: Vec<VerifyError>,
}

fn join(errors: &[VerifyError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Verifies `rid` and stops the process on failure
pub fn enforce(module: &Module, rid: RoutineId, action: VerifyFailureAction) {
    if let Err(failure) = verify_routine(module, rid) {
        action.fail(&failure);
    }
}

pub fn verify_routine(module: &Module, rid: RoutineId) -> Result<(), VerificationFailed> {
    let routine = module.routine(rid);
    if routine.is_declaration() {
        return Ok(());
    }
    let mut checker = Checker { module, routine, errors: Vec::new() };
    checker.check_cfg();
    // Dominance is meaningless on a broken graph
    if checker.errors.is_empty() {
        checker.check_insts();
    }
    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(VerificationFailed { routine: routine.name.clone(), errors: checker.errors })
    }
}

/// Verifies every routine of `module`
pub fn verify_module(module: &Module) -> Result<(), VerificationFailed> {
    module.routine_ids().into_iter().try_for_each(|rid| verify_routine(module, rid))
}

#[derive(Clone, Copy)]
enum Site {
    Inst(InstId),
    Terminator(BlockId),
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Site::Inst(id) => write!(f, "{}", id),
            Site::Terminator(block) => write!(f, "terminator of {}", block),
        }
    }
}

struct Checker<'a> {
    module: &'a Module,
    routine: &'a Routine,
    errors: Vec<VerifyError>,
}

impl Checker<'_> {
    fn check_cfg(&mut self) {
        let routine = self.routine;
        for &block in routine.layout() {
            let Some(term) = routine.terminator(block) else {
                self.errors.push(VerifyError::MissingTerminator(block));
                continue;
            };
            for target in term.successors() {
                if !routine.is_attached(target) {
                    self.errors.push(VerifyError::InvalidSuccessor { block, target });
                }
            }
        }
        if let Some(entry) = routine.entry_block() {
            let has_preds = routine.predecessors().get(&entry).is_some_and(|ps| !ps.is_empty());
            if has_preds {
                self.errors.push(VerifyError::EntryHasPredecessors(entry));
            }
        }
    }

    fn check_insts(&mut self) {
        let routine = self.routine;
        let dt = DominatorTree::compute(routine);
        let preds = routine.predecessors();
        let inst_blocks = routine.inst_blocks();

        for &block in routine.layout() {
            let insts = &routine.block(block).insts;
            let mut seen_non_phi = false;
            for (index, &id) in insts.iter().enumerate() {
                let inst = routine.inst(id);
                match &inst.kind {
                    InstKind::Phi { incoming } => {
                        if seen_non_phi {
                            self.errors.push(VerifyError::PhiNotAtStart { block, inst: id });
                        }
                        let expected: FxHashSet<BlockId> =
                            preds.get(&block).map(|ps| ps.iter().copied().collect()).unwrap_or_default();
                        let listed: Vec<BlockId> = incoming.iter().map(|(p, _)| *p).collect();
                        let distinct: FxHashSet<BlockId> = listed.iter().copied().collect();
                        if distinct != expected || distinct.len() != listed.len() {
                            self.errors.push(VerifyError::PhiPredecessorMismatch { block, inst: id });
                        }
                        for (pred, value) in incoming {
                            // A phi operand is read at the end of its predecessor
                            self.check_operand(&dt, &inst_blocks, Site::Inst(id), *pred, None, value);
                        }
                    }
                    kind => {
                        seen_non_phi = true;
                        for value in kind.operands() {
                            self.check_operand(&dt, &inst_blocks, Site::Inst(id), block, Some(index), value);
                        }
                        self.check_types(id);
                    }
                }
            }

            if let Some(term) = routine.terminator(block) {
                for value in term.operands() {
                    self.check_operand(&dt, &inst_blocks, Site::Terminator(block), block, None, value);
                }
                match &term.kind {
                    TerminatorKind::CondBr { cond, .. } if routine.value_type(cond) != Type::i1() => {
                        self.errors.push(VerifyError::ConditionNotBool(block));
                    }
                    TerminatorKind::Ret(value) => {
                        let ty = value.as_ref().map_or(Type::Void, |v| routine.value_type(v));
                        if ty != routine.ret {
                            self.errors.push(VerifyError::ReturnTypeMismatch(block));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// `index` is the user's position in `block`, `None` for the block end
    fn check_operand(
        &mut self,
        dt: &DominatorTree,
        inst_blocks: &rustc_hash::FxHashMap<InstId, BlockId>,
        site: Site,
        block: BlockId,
        index: Option<usize>,
        value: &Value,
    ) {
        let undefined = || VerifyError::UndefinedValue {
            block,
            user: site.to_string(),
            value: value.to_string(),
        };
        match value {
            Value::Inst(def) => {
                let Some(&def_block) = inst_blocks.get(def) else {
                    self.errors.push(undefined());
                    return;
                };
                if !dt.is_reachable(block) {
                    return;
                }
                let dominated = if def_block == block {
                    let position = self.routine.block(block).insts.iter().position(|i| i == def);
                    match (position, index) {
                        (Some(def_index), Some(use_index)) => def_index < use_index,
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
                } else {
                    dt.dominates(def_block, block)
                };
                if !dominated {
                    self.errors.push(VerifyError::UseNotDominated {
                        block,
                        user: site.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            Value::Arg(n) if *n as usize >= self.routine.params.len() => self.errors.push(undefined()),
            Value::Global(id) if self.module.globals().all(|(g, _)| g != *id) => {
                self.errors.push(undefined())
            }
            _ => {}
        }
    }

    fn check_types(&mut self, id: InstId) {
        let routine = self.routine;
        let module = self.module;
        let inst = routine.inst(id);
        match &inst.kind {
            InstKind::Load { ptr } | InstKind::Store { ptr, .. } => {
                if !routine.value_type(ptr).is_ptr() {
                    self.errors.push(VerifyError::NonPointerAddress { inst: id });
                }
            }
            InstKind::Call { callee: Callee::Routine(target), args } => {
                if target.index() >= module.routine_ids().len() {
                    self.errors.push(VerifyError::CallSignatureMismatch {
                        inst: id,
                        callee: target.to_string(),
                    });
                    return;
                }
                let signature = module.routine(*target);
                let args_match = args.len() == signature.params.len()
                    && args
                        .iter()
                        .zip(&signature.params)
                        .all(|(arg, param)| routine.value_type(arg) == *param);
                if !args_match || inst.ty != signature.ret {
                    self.errors.push(VerifyError::CallSignatureMismatch {
                        inst: id,
                        callee: signature.name.clone(),
                    });
                }
            }
            InstKind::Call { callee: Callee::Intrinsic(Intrinsic::MemSet), args } => {
                let ok = args.len() == 3 && args.first().is_some_and(|a| routine.value_type(a).is_ptr());
                if !ok {
                    self.errors.push(VerifyError::CallSignatureMismatch {
                        inst: id,
                        callee: Intrinsic::MemSet.name().to_string(),
                    });
                }
            }
            _ => {}
        }
    }
}
