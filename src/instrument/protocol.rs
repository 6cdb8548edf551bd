//! Runtime protocol emission
//!
//! The transformed program talks to the profiling runtime through four
//! external routines:
//!
//! ```text
//! notify_loop_begin(identity: ptr) -> ptr
//! notify_loop_end(handle: ptr)
//! notify_loop_stats(handle: ptr, stats: ptr)
//! is_instrumented_profiling() -> i32
//! ```
//!
//! They are only ever declared here, never defined.

use crate::analysis::Loop;
use crate::config::ProtocolSymbols;
use crate::ir::{
    BlockId, Builder, Callee, InstId, IntPredicate, Module, Routine, RoutineId, TerminatorKind,
    Type, Value,
};

/// Declarations of the runtime entry points inside one module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDecls {
    pub loop_begin: RoutineId,
    pub loop_end: RoutineId,
    pub loop_stats: RoutineId,
    pub is_enabled: RoutineId,
}

impl ProtocolDecls {
    /// Declares whichever of the four symbols `module` does not have yet
    pub fn declare(module: &mut Module, symbols: &ProtocolSymbols) -> Self {
        ProtocolDecls {
            loop_begin: module.declare_routine(&symbols.loop_begin, vec![Type::Ptr], Type::Ptr),
            loop_end: module.declare_routine(&symbols.loop_end, vec![Type::Ptr], Type::Void),
            loop_stats: module.declare_routine(
                &symbols.loop_stats,
                vec![Type::Ptr, Type::Ptr],
                Type::Void,
            ),
            is_enabled: module.declare_routine(&symbols.is_enabled, vec![], Type::i32()),
        }
    }
}

/// Where a loop came from, as reported to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopIdentity {
    pub line: u32,
    pub source_file: String,
    pub routine_name: String,
}

impl LoopIdentity {
    pub fn of_loop(routine: &Routine, lp: &Loop) -> Self {
        let loc = lp.start_loc(routine);
        LoopIdentity {
            line: loc.as_ref().map_or(0, |l| l.line),
            source_file: loc.map_or_else(|| "<unknown>".to_string(), |l| l.file),
            routine_name: routine.name.clone(),
        }
    }
}

/// `{ i32 line, ptr source_file, ptr routine_name }`
pub fn identity_record_type() -> Type {
    Type::Struct(identity_fields())
}

fn identity_fields() -> Vec<Type> {
    vec![Type::i32(), Type::Ptr, Type::Ptr]
}

/// Fills `dispatch` with the feature query, the identity record and the
/// begin call, then branches to `instrumented` or `original`.
///
/// Returns the loop handle.
pub fn emit_dispatch(
    module: &mut Module,
    host: RoutineId,
    decls: &ProtocolDecls,
    identity: &LoopIdentity,
    dispatch: BlockId,
    instrumented: BlockId,
    original: BlockId,
) -> Option<InstId> {
    let file = module.add_global_string(&identity.source_file);
    let name = module.add_global_string(&identity.routine_name);
    let routine = module.routine_mut(host);
    let entry = routine.entry_block()?;

    let record = Builder::at_first_insertion_point(routine, entry).alloca(identity_record_type());

    let fields = identity_fields();
    let mut builder = Builder::at_end(routine, dispatch);
    let enabled = builder.call(Callee::Routine(decls.is_enabled), vec![], Type::i32());
    let cond = builder.icmp(IntPredicate::Ne, Value::Inst(enabled), Value::i32(0));

    let line_ptr = builder.field_addr(&fields, Value::Inst(record), 0);
    let file_ptr = builder.field_addr(&fields, Value::Inst(record), 1);
    let name_ptr = builder.field_addr(&fields, Value::Inst(record), 2);
    builder.store(Value::Global(file), Value::Inst(file_ptr));
    builder.store(Value::Global(name), Value::Inst(name_ptr));
    builder.store(Value::i32(identity.line as i64), Value::Inst(line_ptr));

    let handle = builder.call(Callee::Routine(decls.loop_begin), vec![Value::Inst(record)], Type::Ptr);
    builder.cond_br(Value::Inst(cond), instrumented, original);
    Some(handle)
}

/// Appends the end call to `block`
pub fn emit_loop_end(routine: &mut Routine, block: BlockId, decls: &ProtocolDecls, handle: InstId) {
    Builder::at_end(routine, block).call(
        Callee::Routine(decls.loop_end),
        vec![Value::Inst(handle)],
        Type::Void,
    );
}

/// Reports `record` in front of every return of `routine`. The handle is
/// the routine's last parameter.
pub fn emit_stats_calls(routine: &mut Routine, decls: &ProtocolDecls, record: InstId) -> usize {
    let handle = Value::Arg(routine.params.len().saturating_sub(1) as u32);
    let returns: Vec<BlockId> = routine
        .layout()
        .iter()
        .copied()
        .filter(|b| matches!(routine.terminator(*b).map(|t| &t.kind), Some(TerminatorKind::Ret(_))))
        .collect();
    for &block in &returns {
        Builder::at_end(routine, block).call(
            Callee::Routine(decls.loop_stats),
            vec![handle.clone(), Value::Inst(record)],
            Type::Void,
        );
    }
    returns.len()
}
