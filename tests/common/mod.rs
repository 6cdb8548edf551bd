//! Shared fixtures for the integration tests
#![allow(dead_code)]

use roofline_instr::config::ProtocolSymbols;
use roofline_instr::instrument::{LoopIdentity, StatsRecord};
use roofline_instr::interp::{Interpreter, Runtime, Val};
use roofline_instr::ir::{
    BinaryOp, BlockId, Builder, DebugLoc, InstId, InstKind, IntPredicate, Module, Routine,
    RoutineId, Type, Value,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loc(file: &str, line: u32) -> Option<DebugLoc> {
    Some(DebugLoc::new(file, line, 3))
}

/// Adds `(pred, value)` to an existing phi
pub fn add_incoming(routine: &mut Routine, phi: InstId, pred: BlockId, value: Value) {
    if let InstKind::Phi { incoming } = &mut routine.inst_mut(phi).kind {
        incoming.push((pred, value));
    }
}

/// Blocks of the `sum` fixture
pub struct SumLoop {
    pub entry: BlockId,
    pub header: BlockId,
    pub body: BlockId,
    pub exit: BlockId,
    pub acc: InstId,
}

/// ```text
/// i64 sum(ptr a, i64 n) {
///   acc = 0
///   for (i = 0; i < n; i++) acc += a[i]
///   return acc
/// }
/// ```
pub fn sum_routine() -> (Routine, SumLoop) {
    let mut r = Routine::new("sum", vec![Type::Ptr, Type::i64()], Type::i64());
    let entry = r.add_block("entry");
    let header = r.add_block("for.cond");
    let body = r.add_block("for.body");
    let exit = r.add_block("for.end");

    let mut b = Builder::at_end(&mut r, entry);
    b.set_loc(loc("sum.c", 4));
    b.br(header);

    b.position_at_end(header);
    b.set_loc(loc("sum.c", 5));
    let i = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let acc = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let cond = b.icmp(IntPredicate::Slt, Value::Inst(i), Value::Arg(1));
    b.cond_br(Value::Inst(cond), body, exit);

    b.position_at_end(body);
    b.set_loc(loc("sum.c", 6));
    let ptr = b.element_addr(Type::i64(), Value::Arg(0), Value::Inst(i));
    let v = b.load(Type::i64(), Value::Inst(ptr));
    let acc_next = b.add(Value::Inst(acc), Value::Inst(v));
    let i_next = b.add(Value::Inst(i), Value::i64(1));
    b.br(header);

    b.position_at_end(exit);
    b.set_loc(loc("sum.c", 7));
    b.ret(Some(Value::Inst(acc)));

    add_incoming(&mut r, i, body, Value::Inst(i_next));
    add_incoming(&mut r, acc, body, Value::Inst(acc_next));
    (r, SumLoop { entry, header, body, exit, acc })
}

pub fn sum_module() -> (Module, RoutineId) {
    let mut module = Module::new("sum.c");
    let (routine, _) = sum_routine();
    let rid = module.add_routine(routine);
    (module, rid)
}

/// A loop leaving through two different blocks:
///
/// ```text
/// i64 find(ptr a, i64 n) {
///   for (i = 0; i < n; i++) if (a[i] == 0) return 1;
///   return 0;
/// }
/// ```
pub fn two_exit_routine() -> Routine {
    let mut r = Routine::new("find", vec![Type::Ptr, Type::i64()], Type::i64());
    let entry = r.add_block("entry");
    let header = r.add_block("for.cond");
    let body = r.add_block("for.body");
    let latch = r.add_block("for.inc");
    let not_found = r.add_block("not_found");
    let found = r.add_block("found");

    let mut b = Builder::at_end(&mut r, entry);
    b.set_loc(loc("find.c", 2));
    b.br(header);

    b.position_at_end(header);
    let i = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let cond = b.icmp(IntPredicate::Slt, Value::Inst(i), Value::Arg(1));
    b.cond_br(Value::Inst(cond), body, not_found);

    b.position_at_end(body);
    let ptr = b.element_addr(Type::i64(), Value::Arg(0), Value::Inst(i));
    let v = b.load(Type::i64(), Value::Inst(ptr));
    let zero = b.icmp(IntPredicate::Eq, Value::Inst(v), Value::i64(0));
    b.cond_br(Value::Inst(zero), found, latch);

    b.position_at_end(latch);
    let i_next = b.add(Value::Inst(i), Value::i64(1));
    b.br(header);

    b.position_at_end(not_found);
    b.ret(Some(Value::i64(0)));
    b.position_at_end(found);
    b.ret(Some(Value::i64(1)));

    add_incoming(&mut r, i, latch, Value::Inst(i_next));
    r
}

/// A loop entered from two blocks, so it has no preheader
pub fn no_preheader_routine() -> Routine {
    let mut r = Routine::new("skew", vec![Type::i1(), Type::i64()], Type::i64());
    let entry = r.add_block("entry");
    let side = r.add_block("side");
    let header = r.add_block("loop");
    let body = r.add_block("loop.body");
    let exit = r.add_block("exit");

    let mut b = Builder::at_end(&mut r, entry);
    b.set_loc(loc("skew.c", 9));
    b.cond_br(Value::Arg(0), header, side);
    b.position_at_end(side);
    b.br(header);

    b.position_at_end(header);
    let i = b.phi(Type::i64(), vec![(entry, Value::i64(0)), (side, Value::i64(1))]);
    let cond = b.icmp(IntPredicate::Slt, Value::Inst(i), Value::Arg(1));
    b.cond_br(Value::Inst(cond), body, exit);

    b.position_at_end(body);
    let i_next = b.add(Value::Inst(i), Value::i64(1));
    b.br(header);

    b.position_at_end(exit);
    b.ret(Some(Value::Inst(i)));

    add_incoming(&mut r, i, body, Value::Inst(i_next));
    r
}

/// Counts the iterations of a two-deep nest:
///
/// ```text
/// i64 nest(i64 n) {
///   acc = 0
///   for (i = 0; i < n; i++) { j = 0; do { acc++; j++; } while (j < n); }
///   return acc
/// }
/// ```
pub fn nested_routine() -> Routine {
    let mut r = Routine::new("nest", vec![Type::i64()], Type::i64());
    let entry = r.add_block("entry");
    let outer = r.add_block("outer");
    let inner_pre = r.add_block("inner.pre");
    let inner = r.add_block("inner");
    let outer_latch = r.add_block("outer.latch");
    let exit = r.add_block("exit");

    let mut b = Builder::at_end(&mut r, entry);
    b.set_loc(loc("nest.c", 3));
    b.br(outer);

    b.position_at_end(outer);
    let i = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let acc = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let cond = b.icmp(IntPredicate::Slt, Value::Inst(i), Value::Arg(0));
    b.cond_br(Value::Inst(cond), inner_pre, exit);

    b.position_at_end(inner_pre);
    b.br(inner);

    b.position_at_end(inner);
    let j = b.phi(Type::i64(), vec![(inner_pre, Value::i64(0))]);
    let s = b.phi(Type::i64(), vec![(inner_pre, Value::Inst(acc))]);
    let s_next = b.add(Value::Inst(s), Value::i64(1));
    let j_next = b.add(Value::Inst(j), Value::i64(1));
    let again = b.icmp(IntPredicate::Slt, Value::Inst(j_next), Value::Arg(0));
    b.cond_br(Value::Inst(again), inner, outer_latch);

    b.position_at_end(outer_latch);
    let i_next = b.add(Value::Inst(i), Value::i64(1));
    b.br(outer);

    b.position_at_end(exit);
    b.ret(Some(Value::Inst(acc)));

    add_incoming(&mut r, j, inner, Value::Inst(j_next));
    add_incoming(&mut r, s, inner, Value::Inst(s_next));
    add_incoming(&mut r, i, outer_latch, Value::Inst(i_next));
    add_incoming(&mut r, acc, outer_latch, Value::Inst(s_next));
    r
}

/// Squares `n` floats in place, four lanes at a time
pub fn vector_square_routine() -> Routine {
    let v4f32 = Type::vector(Type::f32(), 4);
    let mut r = Routine::new("square", vec![Type::Ptr, Type::i64()], Type::Void);
    let entry = r.add_block("entry");
    let header = r.add_block("vec.cond");
    let body = r.add_block("vec.body");
    let exit = r.add_block("vec.end");

    let mut b = Builder::at_end(&mut r, entry);
    b.set_loc(loc("square.c", 11));
    b.br(header);

    b.position_at_end(header);
    let i = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let cond = b.icmp(IntPredicate::Slt, Value::Inst(i), Value::Arg(1));
    b.cond_br(Value::Inst(cond), body, exit);

    b.position_at_end(body);
    let ptr = b.element_addr(Type::f32(), Value::Arg(0), Value::Inst(i));
    let v = b.load(v4f32, Value::Inst(ptr));
    let sq = b.binary(BinaryOp::FMul, Value::Inst(v), Value::Inst(v));
    b.store(Value::Inst(sq), Value::Inst(ptr));
    let i_next = b.add(Value::Inst(i), Value::i64(4));
    b.br(header);

    b.position_at_end(exit);
    b.ret(None);

    add_incoming(&mut r, i, body, Value::Inst(i_next));
    r
}

pub fn module_with(routine: Routine) -> (Module, RoutineId) {
    let mut module = Module::new("test");
    let rid = module.add_routine(routine);
    (module, rid)
}

/// One protocol call observed by [`RecordingRuntime`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Begin(LoopIdentity),
    End(u64),
    Stats(u64, StatsRecord),
}

#[derive(Debug, Default)]
pub struct RecordingRuntime {
    pub enabled: bool,
    pub queries: usize,
    pub events: Vec<Event>,
    next_handle: u64,
}

impl RecordingRuntime {
    pub fn new(enabled: bool) -> Self {
        RecordingRuntime { enabled, ..Default::default() }
    }

    pub fn stats(&self) -> Vec<StatsRecord> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Stats(_, record) => Some(*record),
                _ => None,
            })
            .collect()
    }
}

impl Runtime for RecordingRuntime {
    fn notify_loop_begin(&mut self, identity: &LoopIdentity) -> u64 {
        self.next_handle += 1;
        self.events.push(Event::Begin(identity.clone()));
        // Distinct from null so a lost handle shows up
        0x1000 + self.next_handle
    }

    fn notify_loop_end(&mut self, handle: u64) {
        self.events.push(Event::End(handle));
    }

    fn notify_loop_stats(&mut self, handle: u64, stats: &StatsRecord) {
        self.events.push(Event::Stats(handle, *stats));
    }

    fn is_instrumented_profiling(&mut self) -> i32 {
        self.queries += 1;
        self.enabled as i32
    }
}

pub fn recording(module: &Module, enabled: bool) -> Interpreter<'_, RecordingRuntime> {
    Interpreter::new(module, RecordingRuntime::new(enabled), ProtocolSymbols::default())
}

/// Runs `sum` over `values` and returns the result with the runtime
pub fn run_sum(module: &Module, values: &[i64], enabled: bool) -> (i64, RecordingRuntime) {
    let mut interp = recording(module, enabled);
    let a = interp.memory_mut().alloc_i64s(values);
    let result = interp
        .call_by_name("sum", vec![Val::Ptr(a), Val::i64(values.len() as i64)])
        .expect("sum runs");
    (result.as_i64().expect("integer result"), interp.into_runtime())
}
