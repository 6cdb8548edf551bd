//! Static operation classification
//!
//! Maps one instruction to the counters it feeds. The mapping only looks at
//! the instruction's shape and the target data layout.
//!
//! | operation                                 | counter                        |
//! |-------------------------------------------|--------------------------------|
//! | load                                      | `bytes_loaded` += size         |
//! | store                                     | `bytes_stored` += size         |
//! | `add` `sub` `shl` `mul` `icmp`            | int ops += weight              |
//! | `fadd` `fsub` `fmul` `fdiv` `frem` `fcmp` | float or double ops += weight  |
//! | `fmuladd` `fma`                           | float or double ops += 2×weight|
//! | `minnum` `maxnum` `minimum` `maximum`     | float or double ops += weight  |
//!
//! The weight of a scalar is 1 and of a fixed vector its lane count. Scalable
//! vectors are estimated as `lane_estimate × element size`, for both memory
//! traffic and arithmetic. Only single precision counts as `float`; every
//! other float format lands in the `double` counters.

use super::stats::{Counter, StatsDelta};
use crate::ir::{
    BinaryOp, BlockId, Callee, DataLayout, ElementCount, FloatKind, Inst, InstKind, Intrinsic,
    Routine, Type,
};

/// Opcode families the classifier distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Load,
    Store,
    IntArith,
    FloatArith,
    FusedMulAdd,
    MinMax,
    /// Not counted
    Other,
}

impl OpKind {
    pub fn of(kind: &InstKind) -> OpKind {
        match kind {
            InstKind::Load { .. } => OpKind::Load,
            InstKind::Store { .. } => OpKind::Store,
            InstKind::Binary { op, .. } => match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Shl | BinaryOp::Mul => OpKind::IntArith,
                BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv | BinaryOp::FRem => {
                    OpKind::FloatArith
                }
                _ => OpKind::Other,
            },
            InstKind::ICmp { .. } => OpKind::IntArith,
            InstKind::FCmp { .. } => OpKind::FloatArith,
            InstKind::Call { callee: Callee::Intrinsic(intr), .. } => match intr {
                Intrinsic::FMulAdd | Intrinsic::Fma => OpKind::FusedMulAdd,
                Intrinsic::MinNum | Intrinsic::MaxNum | Intrinsic::Minimum | Intrinsic::Maximum => {
                    OpKind::MinMax
                }
                Intrinsic::MemSet => OpKind::Other,
            },
            _ => OpKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Int,
    Float,
    Double,
}

impl Bucket {
    fn of(ty: &Type) -> Bucket {
        match ty.scalar_type() {
            Type::Float(FloatKind::Single) => Bucket::Float,
            // Half and bfloat are counted as double as well
            Type::Float(_) => Bucket::Double,
            _ => Bucket::Int,
        }
    }

    fn counter(self, vector: bool) -> Counter {
        match (self, vector) {
            (Bucket::Int, false) => Counter::ScalarIntOps,
            (Bucket::Float, false) => Counter::ScalarFloatOps,
            (Bucket::Double, false) => Counter::ScalarDoubleOps,
            (Bucket::Int, true) => Counter::VectorIntOps,
            (Bucket::Float, true) => Counter::VectorFloatOps,
            (Bucket::Double, true) => Counter::VectorDoubleOps,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    data_layout: &'a DataLayout,
    scalable_lanes: u64,
}

impl<'a> Classifier<'a> {
    pub fn new(data_layout: &'a DataLayout, scalable_lanes: u64) -> Self {
        Classifier { data_layout, scalable_lanes }
    }

    /// Bytes moved by a load or store of `ty`
    pub fn memory_bytes(&self, ty: &Type) -> u64 {
        match ty {
            Type::Vector { elem, count: ElementCount::Fixed(lanes) } => {
                *lanes as u64 * self.data_layout.alloc_size(elem)
            }
            Type::Vector { elem, count: ElementCount::Scalable(_) } => {
                self.scalable_lanes * self.data_layout.alloc_size(elem)
            }
            _ => self.data_layout.alloc_size(ty),
        }
    }

    /// Operation count of one arithmetic instruction on `ty`
    pub fn op_weight(&self, ty: &Type) -> u64 {
        match ty {
            Type::Vector { count: ElementCount::Fixed(lanes), .. } => *lanes as u64,
            Type::Vector { elem, count: ElementCount::Scalable(_) } => {
                self.scalable_lanes * self.data_layout.alloc_size(elem)
            }
            _ => 1,
        }
    }

    fn arith(&self, ty: &Type, ops: u64) -> StatsDelta {
        let counter = Bucket::of(ty).counter(ty.is_vector());
        StatsDelta::of(counter, ops * self.op_weight(ty))
    }

    pub fn classify(&self, routine: &Routine, inst: &Inst) -> StatsDelta {
        match (OpKind::of(&inst.kind), &inst.kind) {
            (OpKind::Load, _) => StatsDelta::of(Counter::BytesLoaded, self.memory_bytes(&inst.ty)),
            (OpKind::Store, InstKind::Store { value, .. }) => {
                StatsDelta::of(Counter::BytesStored, self.memory_bytes(&routine.value_type(value)))
            }
            // Compares are sized by what they compare, not by their i1 result
            (OpKind::IntArith | OpKind::FloatArith, InstKind::ICmp { lhs, .. } | InstKind::FCmp { lhs, .. }) => {
                self.arith(&routine.value_type(lhs), 1)
            }
            (OpKind::IntArith | OpKind::FloatArith | OpKind::MinMax, _) => self.arith(&inst.ty, 1),
            (OpKind::FusedMulAdd, _) => self.arith(&inst.ty, 2),
            _ => StatsDelta::new(),
        }
    }

    /// Sum over the instructions of `block`
    pub fn classify_block(&self, routine: &Routine, block: BlockId) -> StatsDelta {
        let mut total = StatsDelta::new();
        for &inst in &routine.block(block).insts {
            total += self.classify(routine, routine.inst(inst));
        }
        total
    }
}
