//! # Reference Interpreter
//!
//! Executes routines over a flat byte memory. Calls to the runtime entry
//! points are forwarded to a [`Runtime`], which makes the protocol traffic
//! of an instrumented program observable without linking a real runtime.

pub mod memory;

pub use memory::Memory;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::config::ProtocolSymbols;
use crate::instrument::{LoopIdentity, StatsRecord};
use crate::instrument::stats::COUNTER_COUNT;
use crate::ir::{
    BinaryOp, BlockId, Callee, CastOp, Constant, FloatKind, FloatPredicate, GlobalId, InstId,
    InstKind, IntPredicate, Intrinsic, Module, Routine, RoutineId, TerminatorKind, Type, Value,
};

/// Default number of instructions a single top-level call may execute
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// The receiving side of the four protocol calls
pub trait Runtime {
    fn notify_loop_begin(&mut self, identity: &LoopIdentity) -> u64;
    fn notify_loop_end(&mut self, handle: u64);
    fn notify_loop_stats(&mut self, handle: u64, stats: &StatsRecord);
    fn is_instrumented_profiling(&mut self) -> i32;
}

/// A runtime with profiling switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRuntime;

impl Runtime for DisabledRuntime {
    fn notify_loop_begin(&mut self, _identity: &LoopIdentity) -> u64 {
        0
    }

    fn notify_loop_end(&mut self, _handle: u64) {}

    fn notify_loop_stats(&mut self, _handle: u64, _stats: &StatsRecord) {}

    fn is_instrumented_profiling(&mut self) -> i32 {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("no routine named `{0}`")]
    NoSuchRoutine(String),
    #[error("`{0}` is declared only and is not a runtime entry point")]
    UnknownExternal(String),
    #[error("`{routine}` expects {expected} arguments, got {got}")]
    ArgumentCount { routine: String, expected: usize, got: usize },
    #[error("access of {len} bytes at {addr:#x} is out of bounds")]
    OutOfBounds { addr: u64, len: usize },
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("{0} is read before it is computed")]
    Undefined(String),
    #[error("{0} has no terminator")]
    MissingTerminator(BlockId),
    #[error("reached `unreachable` in {0}")]
    Unreachable(BlockId),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// A runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Void,
    /// Low `bits` bits of `value`, the rest zero
    Int { bits: u32, value: u64 },
    Float(f64),
    Ptr(u64),
    Vector(Vec<Val>),
}

impl Val {
    pub fn int(bits: u32, value: i64) -> Val {
        Val::Int { bits, value: mask(bits, value as u64) }
    }

    pub fn i64(value: i64) -> Val {
        Val::int(64, value)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Val::Int { value, .. } | Val::Ptr(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Int { bits, value } => Some(sext(*bits, *value)),
            Val::Ptr(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Float(value) => Some(*value),
            _ => None,
        }
    }

    fn lanes(&self) -> Option<&[Val]> {
        match self {
            Val::Vector(lanes) => Some(lanes),
            _ => None,
        }
    }
}

fn mask(bits: u32, value: u64) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

fn sext(bits: u32, value: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

fn round_float(ty: &Type, value: f64) -> f64 {
    match ty.scalar_type() {
        Type::Float(FloatKind::Single) => value as f32 as f64,
        _ => value,
    }
}

fn unsupported(what: impl Into<String>) -> ExecError {
    ExecError::Unsupported(what.into())
}

/// Applies `f` to every lane of a vector, or to the scalar itself
fn lanewise<F>(value: &Val, mut f: F) -> Result<Val, ExecError>
where
    F: FnMut(&Val) -> Result<Val, ExecError>,
{
    match value {
        Val::Vector(lanes) => Ok(Val::Vector(lanes.iter().map(&mut f).collect::<Result<_, _>>()?)),
        scalar => f(scalar),
    }
}

fn lanewise2<F>(a: &Val, b: &Val, mut f: F) -> Result<Val, ExecError>
where
    F: FnMut(&Val, &Val) -> Result<Val, ExecError>,
{
    match (a.lanes(), b.lanes()) {
        (Some(xs), Some(ys)) if xs.len() == ys.len() => Ok(Val::Vector(
            xs.iter().zip(ys).map(|(x, y)| f(x, y)).collect::<Result<_, _>>()?,
        )),
        (None, None) => f(a, b),
        _ => Err(unsupported("mixed vector and scalar operands")),
    }
}

fn int_operand(value: &Val) -> Result<u64, ExecError> {
    value.as_u64().ok_or_else(|| unsupported(format!("{:?} used as an integer", value)))
}

fn float_operand(value: &Val) -> Result<f64, ExecError> {
    value.as_f64().ok_or_else(|| unsupported(format!("{:?} used as a float", value)))
}

fn int_binary(op: BinaryOp, bits: u32, a: u64, b: u64) -> Result<u64, ExecError> {
    let (sa, sb) = (sext(bits, a), sext(bits, b));
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::UDiv | BinaryOp::URem | BinaryOp::SDiv | BinaryOp::SRem if b == 0 => {
            return Err(ExecError::DivisionByZero)
        }
        BinaryOp::UDiv => a / b,
        BinaryOp::URem => a % b,
        BinaryOp::SDiv => sa.wrapping_div(sb) as u64,
        BinaryOp::SRem => sa.wrapping_rem(sb) as u64,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::LShr => a.wrapping_shr(b as u32),
        BinaryOp::AShr => (sa >> b.min(63)) as u64,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        op => return Err(unsupported(format!("{} on integers", op.name()))),
    };
    Ok(mask(bits, result))
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, ExecError> {
    Ok(match op {
        BinaryOp::FAdd => a + b,
        BinaryOp::FSub => a - b,
        BinaryOp::FMul => a * b,
        BinaryOp::FDiv => a / b,
        BinaryOp::FRem => a % b,
        op => return Err(unsupported(format!("{} on floats", op.name()))),
    })
}

fn int_compare(pred: IntPredicate, bits: u32, a: u64, b: u64) -> bool {
    let (sa, sb) = (sext(bits, a), sext(bits, b));
    match pred {
        IntPredicate::Eq => a == b,
        IntPredicate::Ne => a != b,
        IntPredicate::Ult => a < b,
        IntPredicate::Ule => a <= b,
        IntPredicate::Ugt => a > b,
        IntPredicate::Uge => a >= b,
        IntPredicate::Slt => sa < sb,
        IntPredicate::Sle => sa <= sb,
        IntPredicate::Sgt => sa > sb,
        IntPredicate::Sge => sa >= sb,
    }
}

fn float_compare(pred: FloatPredicate, a: f64, b: f64) -> bool {
    let ordered = !a.is_nan() && !b.is_nan();
    match pred {
        FloatPredicate::Oeq => ordered && a == b,
        FloatPredicate::One => ordered && a != b,
        FloatPredicate::Olt => ordered && a < b,
        FloatPredicate::Ole => ordered && a <= b,
        FloatPredicate::Ogt => ordered && a > b,
        FloatPredicate::Oge => ordered && a >= b,
        FloatPredicate::Ord => ordered,
        FloatPredicate::Uno => !ordered,
    }
}

fn zero_of(ty: &Type) -> Val {
    match ty {
        Type::Int(bits) => Val::Int { bits: *bits, value: 0 },
        Type::Float(_) => Val::Float(0.0),
        Type::Ptr => Val::Ptr(0),
        Type::Vector { elem, count } => Val::Vector(vec![zero_of(elem); count.min() as usize]),
        Type::Void | Type::Struct(_) => Val::Void,
    }
}

fn bits_of(ty: &Type) -> u32 {
    match ty.scalar_type() {
        Type::Int(bits) => *bits,
        _ => 64,
    }
}

/// Values computed so far in one activation
struct Frame {
    args: Vec<Val>,
    values: FxHashMap<InstId, Val>,
}

pub struct Interpreter<'m, R: Runtime> {
    module: &'m Module,
    runtime: R,
    symbols: ProtocolSymbols,
    memory: Memory,
    globals: FxHashMap<GlobalId, u64>,
    steps: u64,
    step_limit: u64,
}

impl<'m, R: Runtime> Interpreter<'m, R> {
    pub fn new(module: &'m Module, runtime: R, symbols: ProtocolSymbols) -> Self {
        let mut memory = Memory::new();
        let mut globals = FxHashMap::default();
        for (id, global) in module.globals() {
            let bytes = global.contents.as_bytes();
            let addr = memory.alloc(bytes.len() as u64 + 1, 1);
            // Fresh allocation, always in bounds
            let _ = memory.write(addr, bytes);
            globals.insert(id, addr);
        }
        Interpreter {
            module,
            runtime,
            symbols,
            memory,
            globals,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn into_runtime(self) -> R {
        self.runtime
    }

    pub fn call_by_name(&mut self, name: &str, args: Vec<Val>) -> Result<Val, ExecError> {
        let rid = self
            .module
            .routine_by_name(name)
            .ok_or_else(|| ExecError::NoSuchRoutine(name.to_string()))?;
        self.steps = 0;
        self.call(rid, args)
    }

    pub fn call(&mut self, rid: RoutineId, args: Vec<Val>) -> Result<Val, ExecError> {
        let module = self.module;
        let routine = module.routine(rid);
        if args.len() != routine.params.len() {
            return Err(ExecError::ArgumentCount {
                routine: routine.name.clone(),
                expected: routine.params.len(),
                got: args.len(),
            });
        }
        if routine.is_declaration() {
            return self.call_external(routine, args);
        }
        self.run(routine, args)
    }

    fn tick(&mut self) -> Result<(), ExecError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(ExecError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn run(&mut self, routine: &'m Routine, args: Vec<Val>) -> Result<Val, ExecError> {
        let mut frame = Frame { args, values: FxHashMap::default() };
        let mut block = routine.entry_block().ok_or_else(|| unsupported("empty routine"))?;
        let mut prev: Option<BlockId> = None;

        loop {
            let insts = &routine.block(block).insts;
            let first_non_phi = routine.first_non_phi(block);

            // Phis read the values live at the end of the previous block
            let mut incoming_values = Vec::with_capacity(first_non_phi);
            for &id in &insts[..first_non_phi] {
                if let InstKind::Phi { incoming } = &routine.inst(id).kind {
                    let value = prev
                        .and_then(|p| incoming.iter().find(|(b, _)| *b == p))
                        .map(|(_, v)| v)
                        .ok_or_else(|| unsupported(format!("phi {} has no entry for the edge taken", id)))?;
                    incoming_values.push((id, self.eval(&frame, value)?));
                }
            }
            frame.values.extend(incoming_values);

            for &id in &insts[first_non_phi..] {
                self.tick()?;
                let value = self.exec(routine, &frame, id)?;
                frame.values.insert(id, value);
            }

            self.tick()?;
            let term = routine.terminator(block).ok_or(ExecError::MissingTerminator(block))?;
            let next = match &term.kind {
                TerminatorKind::Br(dest) => *dest,
                TerminatorKind::CondBr { cond, then_dest, else_dest } => {
                    if int_operand(&self.eval(&frame, cond)?)? != 0 {
                        *then_dest
                    } else {
                        *else_dest
                    }
                }
                TerminatorKind::Ret(value) => {
                    return match value {
                        Some(value) => self.eval(&frame, value),
                        None => Ok(Val::Void),
                    };
                }
                TerminatorKind::Unreachable => return Err(ExecError::Unreachable(block)),
            };
            prev = Some(block);
            block = next;
        }
    }

    fn eval(&self, frame: &Frame, value: &Value) -> Result<Val, ExecError> {
        match value {
            Value::Inst(id) => frame
                .values
                .get(id)
                .cloned()
                .ok_or_else(|| ExecError::Undefined(id.to_string())),
            Value::Arg(n) => frame
                .args
                .get(*n as usize)
                .cloned()
                .ok_or_else(|| ExecError::Undefined(value.to_string())),
            Value::Const(constant) => Ok(match constant {
                Constant::Int { bits, value } => Val::int(*bits, *value),
                Constant::Float { kind, value } => Val::Float(round_float(&Type::Float(*kind), *value)),
                Constant::Null => Val::Ptr(0),
                Constant::Zero(ty) | Constant::Undef(ty) => zero_of(ty),
            }),
            Value::Global(id) => self
                .globals
                .get(id)
                .map(|addr| Val::Ptr(*addr))
                .ok_or_else(|| ExecError::Undefined(id.to_string())),
        }
    }

    fn exec(&mut self, routine: &'m Routine, frame: &Frame, id: InstId) -> Result<Val, ExecError> {
        let data_layout = self.module.data_layout;
        let inst = routine.inst(id);
        let ty = &inst.ty;
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                let (a, b) = (self.eval(frame, lhs)?, self.eval(frame, rhs)?);
                let bits = bits_of(ty);
                lanewise2(&a, &b, |x, y| {
                    if op.is_float() {
                        let r = float_binary(*op, float_operand(x)?, float_operand(y)?)?;
                        Ok(Val::Float(round_float(ty, r)))
                    } else {
                        Ok(Val::Int { bits, value: int_binary(*op, bits, int_operand(x)?, int_operand(y)?)? })
                    }
                })
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let bits = bits_of(&routine.value_type(lhs));
                let (a, b) = (self.eval(frame, lhs)?, self.eval(frame, rhs)?);
                lanewise2(&a, &b, |x, y| {
                    Ok(Val::int(1, int_compare(*pred, bits, int_operand(x)?, int_operand(y)?) as i64))
                })
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                let (a, b) = (self.eval(frame, lhs)?, self.eval(frame, rhs)?);
                lanewise2(&a, &b, |x, y| {
                    Ok(Val::int(1, float_compare(*pred, float_operand(x)?, float_operand(y)?) as i64))
                })
            }
            InstKind::Cast { op, value } => {
                let from = routine.value_type(value);
                let v = self.eval(frame, value)?;
                lanewise(&v, |x| cast(*op, from.scalar_type(), ty.scalar_type(), x))
            }
            InstKind::Load { ptr } => {
                let addr = int_operand(&self.eval(frame, ptr)?)?;
                self.load(ty, addr)
            }
            InstKind::Store { value, ptr } => {
                let stored_ty = routine.value_type(value);
                let v = self.eval(frame, value)?;
                let addr = int_operand(&self.eval(frame, ptr)?)?;
                self.store(&stored_ty, addr, &v)?;
                Ok(Val::Void)
            }
            InstKind::Alloca { allocated } => {
                let size = data_layout.alloc_size(allocated);
                Ok(Val::Ptr(self.memory.alloc(size, data_layout.abi_align(allocated).max(8))))
            }
            InstKind::FieldAddr { base, fields, index } => {
                let addr = int_operand(&self.eval(frame, base)?)?;
                Ok(Val::Ptr(addr + data_layout.field_offset(fields, *index as usize)))
            }
            InstKind::ElementAddr { base, elem, index } => {
                let addr = int_operand(&self.eval(frame, base)?)?;
                let index = self
                    .eval(frame, index)?
                    .as_i64()
                    .ok_or_else(|| unsupported("non-integer element index"))?;
                let offset = index.wrapping_mul(data_layout.alloc_size(elem) as i64);
                Ok(Val::Ptr(addr.wrapping_add(offset as u64)))
            }
            InstKind::Call { callee, args } => {
                let args = args.iter().map(|a| self.eval(frame, a)).collect::<Result<Vec<_>, _>>()?;
                match callee {
                    Callee::Routine(target) => self.call(*target, args),
                    Callee::Intrinsic(intrinsic) => self.intrinsic(*intrinsic, ty, &args),
                }
            }
            InstKind::Select { cond, then_value, else_value } => {
                if int_operand(&self.eval(frame, cond)?)? != 0 {
                    self.eval(frame, then_value)
                } else {
                    self.eval(frame, else_value)
                }
            }
            InstKind::Phi { .. } => Err(unsupported(format!("phi {} after a non-phi", id))),
        }
    }

    fn intrinsic(&mut self, intrinsic: Intrinsic, ty: &Type, args: &[Val]) -> Result<Val, ExecError> {
        let arg = |i: usize| args.get(i).ok_or_else(|| unsupported(format!("{} arity", intrinsic.name())));
        match intrinsic {
            Intrinsic::MemSet => {
                let addr = int_operand(arg(0)?)?;
                let byte = int_operand(arg(1)?)? as u8;
                let len = int_operand(arg(2)?)? as usize;
                self.memory.fill(addr, byte, len)?;
                Ok(Val::Void)
            }
            Intrinsic::FMulAdd | Intrinsic::Fma => {
                let product = lanewise2(arg(0)?, arg(1)?, |x, y| {
                    Ok(Val::Float(float_operand(x)? * float_operand(y)?))
                })?;
                lanewise2(&product, arg(2)?, |x, y| {
                    Ok(Val::Float(round_float(ty, float_operand(x)? + float_operand(y)?)))
                })
            }
            Intrinsic::MinNum | Intrinsic::Minimum => lanewise2(arg(0)?, arg(1)?, |x, y| {
                Ok(Val::Float(float_operand(x)?.min(float_operand(y)?)))
            }),
            Intrinsic::MaxNum | Intrinsic::Maximum => lanewise2(arg(0)?, arg(1)?, |x, y| {
                Ok(Val::Float(float_operand(x)?.max(float_operand(y)?)))
            }),
        }
    }

    fn call_external(&mut self, routine: &Routine, args: Vec<Val>) -> Result<Val, ExecError> {
        let name = routine.name.as_str();
        let ptr_arg = |i: usize| args.get(i).and_then(Val::as_u64).unwrap_or(0);

        if name == self.symbols.is_enabled {
            Ok(Val::int(32, self.runtime.is_instrumented_profiling() as i64))
        } else if name == self.symbols.loop_begin {
            let identity = self.read_identity(ptr_arg(0))?;
            Ok(Val::Ptr(self.runtime.notify_loop_begin(&identity)))
        } else if name == self.symbols.loop_end {
            self.runtime.notify_loop_end(ptr_arg(0));
            Ok(Val::Void)
        } else if name == self.symbols.loop_stats {
            let record = self.read_stats(ptr_arg(1))?;
            self.runtime.notify_loop_stats(ptr_arg(0), &record);
            Ok(Val::Void)
        } else {
            Err(ExecError::UnknownExternal(name.to_string()))
        }
    }

    /// Decodes a `{ i32, ptr, ptr }` identity record
    pub fn read_identity(&self, addr: u64) -> Result<LoopIdentity, ExecError> {
        let dl = self.module.data_layout;
        let fields = [Type::i32(), Type::Ptr, Type::Ptr];
        let ptr_size = dl.pointer_size as usize;
        let line = self.memory.read_uint(addr + dl.field_offset(&fields, 0), 4)? as u32;
        let file = self.memory.read_uint(addr + dl.field_offset(&fields, 1), ptr_size)?;
        let name = self.memory.read_uint(addr + dl.field_offset(&fields, 2), ptr_size)?;
        Ok(LoopIdentity {
            line,
            source_file: self.memory.read_c_str(file)?,
            routine_name: self.memory.read_c_str(name)?,
        })
    }

    pub fn read_stats(&self, addr: u64) -> Result<StatsRecord, ExecError> {
        let mut counters = [0u64; COUNTER_COUNT];
        for (i, counter) in counters.iter_mut().enumerate() {
            *counter = self.memory.read_uint(addr + 8 * i as u64, 8)?;
        }
        Ok(StatsRecord::from_counters(counters))
    }

    pub fn load(&self, ty: &Type, addr: u64) -> Result<Val, ExecError> {
        let dl = self.module.data_layout;
        match ty {
            Type::Int(bits) => {
                let raw = self.memory.read_uint(addr, dl.store_size(ty) as usize)?;
                Ok(Val::Int { bits: *bits, value: mask(*bits, raw) })
            }
            Type::Float(FloatKind::Single) => {
                Ok(Val::Float(f32::from_bits(self.memory.read_uint(addr, 4)? as u32) as f64))
            }
            Type::Float(FloatKind::Double) => Ok(Val::Float(f64::from_bits(self.memory.read_uint(addr, 8)?))),
            Type::Ptr => Ok(Val::Ptr(self.memory.read_uint(addr, dl.pointer_size as usize)?)),
            Type::Vector { elem, count } if !count.is_scalable() => {
                let stride = dl.alloc_size(elem);
                let lanes = (0..count.min() as u64)
                    .map(|i| self.load(elem, addr + i * stride))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Val::Vector(lanes))
            }
            _ => Err(unsupported(format!("load of {}", ty))),
        }
    }

    pub fn store(&mut self, ty: &Type, addr: u64, value: &Val) -> Result<(), ExecError> {
        let dl = self.module.data_layout;
        match (ty, value) {
            (Type::Int(_), Val::Int { value, .. }) => {
                self.memory.write_uint(addr, *value, dl.store_size(ty) as usize)
            }
            (Type::Float(FloatKind::Single), Val::Float(v)) => {
                self.memory.write_uint(addr, (*v as f32).to_bits() as u64, 4)
            }
            (Type::Float(FloatKind::Double), Val::Float(v)) => self.memory.write_uint(addr, v.to_bits(), 8),
            (Type::Ptr, Val::Ptr(p)) => self.memory.write_uint(addr, *p, dl.pointer_size as usize),
            (Type::Vector { elem, count }, Val::Vector(lanes)) if !count.is_scalable() => {
                let stride = dl.alloc_size(elem);
                for (i, lane) in lanes.iter().enumerate() {
                    self.store(elem, addr + i as u64 * stride, lane)?;
                }
                Ok(())
            }
            _ => Err(unsupported(format!("store of {:?} as {}", value, ty))),
        }
    }
}

fn cast(op: CastOp, from: &Type, to: &Type, value: &Val) -> Result<Val, ExecError> {
    let to_bits = bits_of(to);
    Ok(match op {
        CastOp::Trunc | CastOp::ZExt => Val::Int { bits: to_bits, value: mask(to_bits, int_operand(value)?) },
        CastOp::SExt => Val::int(to_bits, sext(bits_of(from), int_operand(value)?)),
        CastOp::FpTrunc | CastOp::FpExt => Val::Float(round_float(to, float_operand(value)?)),
        CastOp::FpToSi => Val::int(to_bits, float_operand(value)? as i64),
        CastOp::SiToFp => Val::Float(round_float(to, sext(bits_of(from), int_operand(value)?) as f64)),
        CastOp::PtrToInt => Val::Int { bits: to_bits, value: mask(to_bits, int_operand(value)?) },
        CastOp::IntToPtr => Val::Ptr(int_operand(value)?),
        CastOp::Bitcast => match (from, to, value) {
            (Type::Int(32), Type::Float(FloatKind::Single), Val::Int { value, .. }) => {
                Val::Float(f32::from_bits(*value as u32) as f64)
            }
            (Type::Float(FloatKind::Single), Type::Int(32), Val::Float(v)) => {
                Val::Int { bits: 32, value: (*v as f32).to_bits() as u64 }
            }
            (Type::Int(64), Type::Float(FloatKind::Double), Val::Int { value, .. }) => {
                Val::Float(f64::from_bits(*value))
            }
            (Type::Float(FloatKind::Double), Type::Int(64), Val::Float(v)) => {
                Val::Int { bits: 64, value: v.to_bits() }
            }
            _ if from == to => value.clone(),
            _ => return Err(unsupported(format!("bitcast {} to {}", from, to))),
        },
    })
}
