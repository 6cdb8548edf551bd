//! # Program Representation
//!
//! SSA control flow graphs the instrumentation pass rewrites.
//!
//! ## Structure:
//! - **Module**: owns routines and constant strings
//! - **Routine**: arena of blocks and instructions plus a block layout
//! - **Block**: ordered instructions ending with a terminator
//! - **Value**: instruction result, argument, constant or global address
//!
//! Blocks and instructions are addressed by stable indices. Removing a block
//! only detaches it from the layout, so ids held by analyses stay valid for
//! the whole rewrite.

pub mod builder;
pub mod types;

pub use builder::{Builder, InsertPoint};
pub use types::{DataLayout, ElementCount, FloatKind, Type};

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Index of a block inside its routine
    BlockId,
    "bb"
);
entity_id!(
    /// Index of an instruction inside its routine
    InstId,
    "%"
);
entity_id!(
    /// Index of a routine inside its module
    RoutineId,
    "fn"
);
entity_id!(
    /// Index of a constant string inside its module
    GlobalId,
    "@g"
);

/// Source position attached to an instruction or terminator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl DebugLoc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        DebugLoc { file: file.into(), line, column }
    }
}

impl fmt::Display for DebugLoc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Constant operands
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int { bits: u32, value: i64 },
    Float { kind: FloatKind, value: f64 },
    Null,
    Zero(Type),
    Undef(Type),
}

impl Constant {
    pub fn int(bits: u32, value: i64) -> Self {
        Constant::Int { bits, value }
    }

    pub fn bool(value: bool) -> Self {
        Constant::Int { bits: 1, value: value as i64 }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { bits, .. } => Type::Int(*bits),
            Constant::Float { kind, .. } => Type::Float(*kind),
            Constant::Null => Type::Ptr,
            Constant::Zero(ty) | Constant::Undef(ty) => ty.clone(),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constant::Int { bits: 1, value } => write!(f, "{}", *value != 0),
            Constant::Int { value, .. } => write!(f, "{}", value),
            Constant::Float { value, .. } => write!(f, "{:?}", value),
            Constant::Null => write!(f, "null"),
            Constant::Zero(_) => write!(f, "zeroinitializer"),
            Constant::Undef(_) => write!(f, "undef"),
        }
    }
}

/// An SSA value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Inst(InstId),
    Arg(u32),
    Const(Constant),
    Global(GlobalId),
}

impl Value {
    pub fn i32(value: i64) -> Self {
        Value::Const(Constant::int(32, value))
    }

    pub fn i64(value: i64) -> Self {
        Value::Const(Constant::int(64, value))
    }

    pub fn f32(value: f32) -> Self {
        Value::Const(Constant::Float { kind: FloatKind::Single, value: value as f64 })
    }

    pub fn f64(value: f64) -> Self {
        Value::Const(Constant::Float { kind: FloatKind::Double, value })
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Inst(id) => write!(f, "{}", id),
            Value::Arg(n) => write!(f, "%arg{}", n),
            Value::Const(c) => write!(f, "{}", c),
            Value::Global(id) => write!(f, "{}", id),
        }
    }
}

/// Two-operand arithmetic and logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinaryOp {
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv | BinaryOp::FRem
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::URem => "urem",
            BinaryOp::SRem => "srem",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
            BinaryOp::FRem => "frem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Ord,
    Uno,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToSi,
    SiToFp,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

/// Built-in operations the code generator lowers directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    FMulAdd,
    Fma,
    MinNum,
    MaxNum,
    Minimum,
    Maximum,
    /// `memset(ptr, i8 byte, i64 len)`
    MemSet,
}

impl Intrinsic {
    pub fn name(&self) -> &'static str {
        match self {
            Intrinsic::FMulAdd => "fmuladd",
            Intrinsic::Fma => "fma",
            Intrinsic::MinNum => "minnum",
            Intrinsic::MaxNum => "maxnum",
            Intrinsic::Minimum => "minimum",
            Intrinsic::Maximum => "maximum",
            Intrinsic::MemSet => "memset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callee {
    Routine(RoutineId),
    Intrinsic(Intrinsic),
}

/// Instruction payload
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    ICmp { pred: IntPredicate, lhs: Value, rhs: Value },
    FCmp { pred: FloatPredicate, lhs: Value, rhs: Value },
    /// Converts `value` to the instruction's type
    Cast { op: CastOp, value: Value },
    /// Reads a value of the instruction's type
    Load { ptr: Value },
    Store { value: Value, ptr: Value },
    Alloca { allocated: Type },
    /// Address of field `index` of the struct at `base`
    FieldAddr { base: Value, fields: Vec<Type>, index: u32 },
    /// Address of element `index` of an array of `elem` at `base`
    ElementAddr { base: Value, elem: Type, index: Value },
    Call { callee: Callee, args: Vec<Value> },
    Phi { incoming: Vec<(BlockId, Value)> },
    Select { cond: Value, then_value: Value, else_value: Value },
}

impl InstKind {
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    pub fn operands(&self) -> SmallVec<[&Value; 4]> {
        let mut ops = SmallVec::new();
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => {
                ops.push(lhs);
                ops.push(rhs);
            }
            InstKind::Cast { value, .. } => ops.push(value),
            InstKind::Load { ptr } => ops.push(ptr),
            InstKind::Store { value, ptr } => {
                ops.push(value);
                ops.push(ptr);
            }
            InstKind::Alloca { .. } => {}
            InstKind::FieldAddr { base, .. } => ops.push(base),
            InstKind::ElementAddr { base, index, .. } => {
                ops.push(base);
                ops.push(index);
            }
            InstKind::Call { args, .. } => ops.extend(args.iter()),
            InstKind::Phi { incoming } => ops.extend(incoming.iter().map(|(_, v)| v)),
            InstKind::Select { cond, then_value, else_value } => {
                ops.push(cond);
                ops.push(then_value);
                ops.push(else_value);
            }
        }
        ops
    }

    pub fn operands_mut(&mut self) -> SmallVec<[&mut Value; 4]> {
        let mut ops = SmallVec::new();
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => {
                ops.push(lhs);
                ops.push(rhs);
            }
            InstKind::Cast { value, .. } => ops.push(value),
            InstKind::Load { ptr } => ops.push(ptr),
            InstKind::Store { value, ptr } => {
                ops.push(value);
                ops.push(ptr);
            }
            InstKind::Alloca { .. } => {}
            InstKind::FieldAddr { base, .. } => ops.push(base),
            InstKind::ElementAddr { base, index, .. } => {
                ops.push(base);
                ops.push(index);
            }
            InstKind::Call { args, .. } => ops.extend(args.iter_mut()),
            InstKind::Phi { incoming } => ops.extend(incoming.iter_mut().map(|(_, v)| v)),
            InstKind::Select { cond, then_value, else_value } => {
                ops.push(cond);
                ops.push(then_value);
                ops.push(else_value);
            }
        }
        ops
    }
}

/// An instruction with its result type and source position
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub kind: InstKind,
    pub ty: Type,
    pub loc: Option<DebugLoc>,
}

impl Inst {
    pub fn new(kind: InstKind, ty: Type) -> Self {
        Inst { kind, ty, loc: None }
    }

    pub fn with_loc(mut self, loc: Option<DebugLoc>) -> Self {
        self.loc = loc;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminatorKind {
    Br(BlockId),
    CondBr { cond: Value, then_dest: BlockId, else_dest: BlockId },
    Ret(Option<Value>),
    Unreachable,
}

/// Control flow leaving a block
#[derive(Debug, Clone, PartialEq)]
pub struct Terminator {
    pub kind: TerminatorKind,
    pub loc: Option<DebugLoc>,
}

impl Terminator {
    pub fn new(kind: TerminatorKind) -> Self {
        Terminator { kind, loc: None }
    }

    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match &self.kind {
            TerminatorKind::Br(dest) => smallvec::smallvec![*dest],
            TerminatorKind::CondBr { then_dest, else_dest, .. } => {
                smallvec::smallvec![*then_dest, *else_dest]
            }
            TerminatorKind::Ret(_) | TerminatorKind::Unreachable => SmallVec::new(),
        }
    }

    pub fn operands(&self) -> SmallVec<[&Value; 1]> {
        match &self.kind {
            TerminatorKind::CondBr { cond, .. } => smallvec::smallvec![cond],
            TerminatorKind::Ret(Some(value)) => smallvec::smallvec![value],
            _ => SmallVec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> SmallVec<[&mut Value; 1]> {
        match &mut self.kind {
            TerminatorKind::CondBr { cond, .. } => smallvec::smallvec![cond],
            TerminatorKind::Ret(Some(value)) => smallvec::smallvec![value],
            _ => SmallVec::new(),
        }
    }

    /// Rewrites every successor through `f`
    pub fn map_successors<F>(&mut self, mut f: F)
    where
        F: FnMut(BlockId) -> BlockId,
    {
        match &mut self.kind {
            TerminatorKind::Br(dest) => *dest = f(*dest),
            TerminatorKind::CondBr { then_dest, else_dest, .. } => {
                *then_dest = f(*then_dest);
                *else_dest = f(*else_dest);
            }
            TerminatorKind::Ret(_) | TerminatorKind::Unreachable => {}
        }
    }

    /// Points every edge to `from` at `to` instead
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match &mut self.kind {
            TerminatorKind::Br(dest) => {
                if *dest == from {
                    *dest = to;
                }
            }
            TerminatorKind::CondBr { then_dest, else_dest, .. } => {
                if *then_dest == from {
                    *then_dest = to;
                }
                if *else_dest == from {
                    *else_dest = to;
                }
            }
            TerminatorKind::Ret(_) | TerminatorKind::Unreachable => {}
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, TerminatorKind::Ret(_))
    }
}

/// A basic block
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
    attached: bool,
}

bitflags! {
    /// Code generation hints attached to a routine
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RoutineAttrs: u32 {
        /// Later optimization passes must leave the body alone
        const OPTIMIZE_NONE = 1 << 0;
        const NO_INLINE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    Internal,
}

/// Where an operand appears
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum User {
    Inst(InstId),
    Terminator(BlockId),
}

/// A named callable with a control flow graph
#[derive(Debug, Clone)]
pub struct Routine {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub linkage: Linkage,
    pub attrs: RoutineAttrs,
    metadata: FxHashMap<String, String>,
    blocks: Vec<Block>,
    insts: Vec<Inst>,
    layout: Vec<BlockId>,
}

impl Routine {
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Routine {
            name: name.into(),
            params,
            ret,
            linkage: Linkage::External,
            attrs: RoutineAttrs::empty(),
            metadata: FxHashMap::default(),
            blocks: Vec::new(),
            insts: Vec::new(),
            layout: Vec::new(),
        }
    }

    /// A routine without blocks is only declared here
    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Attached blocks in layout order
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn is_attached(&self, id: BlockId) -> bool {
        self.blocks.get(id.index()).is_some_and(|b| b.attached)
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    fn new_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.to_string(),
            insts: Vec::new(),
            terminator: None,
            attached: true,
        });
        id
    }

    /// Appends a new block to the layout
    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = self.new_block(name);
        self.layout.push(id);
        id
    }

    pub fn insert_block_before(&mut self, name: &str, before: BlockId) -> BlockId {
        let id = self.new_block(name);
        let pos = self.layout_position(before).unwrap_or(self.layout.len());
        self.layout.insert(pos, id);
        id
    }

    pub fn insert_block_after(&mut self, name: &str, after: BlockId) -> BlockId {
        let id = self.new_block(name);
        let pos = self.layout_position(after).map_or(self.layout.len(), |p| p + 1);
        self.layout.insert(pos, id);
        id
    }

    /// Takes a block out of the layout. Its id stays valid but it no longer
    /// takes part in control flow, use lists or printing.
    pub fn detach_block(&mut self, id: BlockId) {
        self.layout.retain(|b| *b != id);
        self.blocks[id.index()].attached = false;
    }

    pub fn layout_position(&self, id: BlockId) -> Option<usize> {
        self.layout.iter().position(|b| *b == id)
    }

    /// Creates an instruction that is not placed in any block yet
    pub fn create_inst(&mut self, inst: Inst) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    /// Appends an instruction in front of the block's terminator
    pub fn push_inst(&mut self, block: BlockId, inst: Inst) -> InstId {
        let id = self.create_inst(inst);
        self.blocks[block.index()].insts.push(id);
        id
    }

    pub fn insert_inst(&mut self, block: BlockId, index: usize, inst: Inst) -> InstId {
        let id = self.create_inst(inst);
        self.blocks[block.index()].insts.insert(index, id);
        id
    }

    pub fn remove_inst(&mut self, block: BlockId, id: InstId) {
        self.blocks[block.index()].insts.retain(|i| *i != id);
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        self.blocks[block.index()].terminator = Some(terminator);
    }

    pub fn terminator(&self, block: BlockId) -> Option<&Terminator> {
        self.blocks[block.index()].terminator.as_ref()
    }

    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        self.terminator(block).map(Terminator::successors).unwrap_or_default()
    }

    /// Predecessors of every attached block, deduplicated, in layout order
    pub fn predecessors(&self) -> FxHashMap<BlockId, SmallVec<[BlockId; 4]>> {
        let mut preds: FxHashMap<BlockId, SmallVec<[BlockId; 4]>> =
            self.layout.iter().map(|b| (*b, SmallVec::new())).collect();
        for &block in &self.layout {
            for succ in self.successors(block) {
                let entry = preds.entry(succ).or_default();
                if !entry.contains(&block) {
                    entry.push(block);
                }
            }
        }
        preds
    }

    /// Block holding each attached instruction
    pub fn inst_blocks(&self) -> FxHashMap<InstId, BlockId> {
        let mut map = FxHashMap::default();
        for &block in &self.layout {
            for &inst in &self.blocks[block.index()].insts {
                map.insert(inst, block);
            }
        }
        map
    }

    /// Index of the first instruction that is not a phi
    pub fn first_non_phi(&self, block: BlockId) -> usize {
        self.blocks[block.index()]
            .insts
            .iter()
            .position(|i| !self.inst(*i).kind.is_phi())
            .unwrap_or(self.blocks[block.index()].insts.len())
    }

    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.blocks[block.index()]
            .insts
            .iter()
            .copied()
            .take_while(|i| self.inst(*i).kind.is_phi())
            .collect()
    }

    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Inst(id) => self.inst(*id).ty.clone(),
            Value::Arg(n) => self.params.get(*n as usize).cloned().unwrap_or(Type::Void),
            Value::Const(c) => c.ty(),
            Value::Global(_) => Type::Ptr,
        }
    }

    /// Every place an attached instruction or terminator reads `value`
    pub fn uses_of(&self, value: &Value) -> Vec<(BlockId, User)> {
        let mut uses = Vec::new();
        for &block in &self.layout {
            let data = &self.blocks[block.index()];
            for &inst in &data.insts {
                if self.inst(inst).kind.operands().iter().any(|op| *op == value) {
                    uses.push((block, User::Inst(inst)));
                }
            }
            if let Some(term) = &data.terminator {
                if term.operands().iter().any(|op| *op == value) {
                    uses.push((block, User::Terminator(block)));
                }
            }
        }
        uses
    }

    pub fn replace_all_uses(&mut self, old: &Value, new: &Value) {
        self.replace_uses_where(old, new, |_| true);
    }

    /// Replaces `old` with `new` in every attached block accepted by `filter`
    pub fn replace_uses_where<F>(&mut self, old: &Value, new: &Value, filter: F)
    where
        F: Fn(BlockId) -> bool,
    {
        let layout = self.layout.clone();
        for block in layout {
            if !filter(block) {
                continue;
            }
            let insts = self.blocks[block.index()].insts.clone();
            for inst in insts {
                for op in self.insts[inst.index()].kind.operands_mut() {
                    if *op == *old {
                        *op = new.clone();
                    }
                }
            }
            if let Some(term) = &mut self.blocks[block.index()].terminator {
                for op in term.operands_mut() {
                    if *op == *old {
                        *op = new.clone();
                    }
                }
            }
        }
    }

    /// Redirects the terminator edges of `block` from `from` to `to`
    pub fn retarget_edges(&mut self, block: BlockId, from: BlockId, to: BlockId) {
        if let Some(term) = &mut self.blocks[block.index()].terminator {
            term.retarget(from, to);
        }
    }

    /// Rewrites phi entries of `block` that name `old_pred` to name `new_pred`
    pub fn replace_phi_pred(&mut self, block: BlockId, old_pred: BlockId, new_pred: BlockId) {
        for phi in self.phis(block) {
            if let InstKind::Phi { incoming } = &mut self.insts[phi.index()].kind {
                for (pred, _) in incoming.iter_mut() {
                    if *pred == old_pred {
                        *pred = new_pred;
                    }
                }
            }
        }
    }

    /// Drops every source position from the body
    pub fn strip_debug_locs(&mut self) {
        for inst in &mut self.insts {
            inst.loc = None;
        }
        for block in &mut self.blocks {
            if let Some(term) = &mut block.terminator {
                term.loc = None;
            }
        }
    }

    /// Routines called from attached blocks
    pub fn callees(&self) -> Vec<(BlockId, InstId, RoutineId)> {
        let mut calls = Vec::new();
        for &block in &self.layout {
            for &inst in &self.blocks[block.index()].insts {
                if let InstKind::Call { callee: Callee::Routine(target), .. } = &self.inst(inst).kind {
                    calls.push((block, inst, *target));
                }
            }
        }
        calls
    }
}

/// A constant, NUL-terminated string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalString {
    pub name: String,
    pub contents: String,
}

/// A whole program
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub data_layout: DataLayout,
    routines: Vec<Routine>,
    globals: Vec<GlobalString>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            data_layout: DataLayout::default(),
            routines: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn with_data_layout(mut self, data_layout: DataLayout) -> Self {
        self.data_layout = data_layout;
        self
    }

    pub fn add_routine(&mut self, routine: Routine) -> RoutineId {
        let id = RoutineId(self.routines.len() as u32);
        self.routines.push(routine);
        id
    }

    pub fn routine(&self, id: RoutineId) -> &Routine {
        &self.routines[id.index()]
    }

    pub fn routine_mut(&mut self, id: RoutineId) -> &mut Routine {
        &mut self.routines[id.index()]
    }

    pub fn routine_ids(&self) -> Vec<RoutineId> {
        (0..self.routines.len() as u32).map(RoutineId).collect()
    }

    pub fn routines(&self) -> impl Iterator<Item = (RoutineId, &Routine)> {
        self.routines.iter().enumerate().map(|(i, r)| (RoutineId(i as u32), r))
    }

    pub fn routine_by_name(&self, name: &str) -> Option<RoutineId> {
        self.routines
            .iter()
            .position(|r| r.name == name)
            .map(|i| RoutineId(i as u32))
    }

    /// Returns the routine named `name`, declaring it when absent
    pub fn declare_routine(&mut self, name: &str, params: Vec<Type>, ret: Type) -> RoutineId {
        match self.routine_by_name(name) {
            Some(id) => id,
            None => self.add_routine(Routine::new(name, params, ret)),
        }
    }

    /// Interns a constant string
    pub fn add_global_string(&mut self, contents: &str) -> GlobalId {
        if let Some(pos) = self.globals.iter().position(|g| g.contents == contents) {
            return GlobalId(pos as u32);
        }
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalString {
            name: format!(".str.{}", id.0),
            contents: contents.to_string(),
        });
        id
    }

    pub fn global(&self, id: GlobalId) -> &GlobalString {
        &self.globals[id.index()]
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalString)> {
        self.globals.iter().enumerate().map(|(i, g)| (GlobalId(i as u32), g))
    }

    /// `base`, or `base.N` for the first free `N`
    pub fn unique_routine_name(&self, base: &str) -> String {
        if self.routine_by_name(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}.{}", base, n))
            .find(|name| self.routine_by_name(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for (id, global) in self.globals() {
            writeln!(f, "{} = {} c{:?}", id, global.name, global.contents)?;
        }
        for (_, routine) in self.routines() {
            writeln!(f)?;
            write_routine(f, self, routine)?;
        }
        Ok(())
    }
}

fn write_routine(f: &mut fmt::Formatter, module: &Module, routine: &Routine) -> fmt::Result {
    let keyword = if routine.is_declaration() { "declare" } else { "define" };
    write!(f, "{} {} @{}(", keyword, routine.ret, routine.name)?;
    for (i, param) in routine.params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{} %arg{}", param, i)?;
    }
    write!(f, ")")?;
    if routine.linkage == Linkage::Internal {
        write!(f, " internal")?;
    }
    if routine.attrs.contains(RoutineAttrs::OPTIMIZE_NONE) {
        write!(f, " optnone")?;
    }
    if routine.attrs.contains(RoutineAttrs::NO_INLINE) {
        write!(f, " noinline")?;
    }
    let mut keys: Vec<_> = routine.metadata.iter().collect();
    keys.sort();
    for (key, value) in keys {
        write!(f, " !{{{:?}: {:?}}}", key, value)?;
    }
    if routine.is_declaration() {
        return writeln!(f);
    }
    writeln!(f, " {{")?;
    for &block in routine.layout() {
        let data = routine.block(block);
        writeln!(f, "{}: ; {}", block, data.name)?;
        for &id in &data.insts {
            let inst = routine.inst(id);
            write!(f, "  ")?;
            if !inst.ty.is_void() {
                write!(f, "{} = ", id)?;
            }
            write_inst(f, module, inst)?;
            if let Some(loc) = &inst.loc {
                write!(f, " !{}", loc)?;
            }
            writeln!(f)?;
        }
        match &data.terminator {
            Some(term) => {
                write!(f, "  ")?;
                match &term.kind {
                    TerminatorKind::Br(dest) => write!(f, "br {}", dest)?,
                    TerminatorKind::CondBr { cond, then_dest, else_dest } => {
                        write!(f, "br {}, {}, {}", cond, then_dest, else_dest)?
                    }
                    TerminatorKind::Ret(Some(value)) => write!(f, "ret {}", value)?,
                    TerminatorKind::Ret(None) => write!(f, "ret void")?,
                    TerminatorKind::Unreachable => write!(f, "unreachable")?,
                }
                if let Some(loc) = &term.loc {
                    write!(f, " !{}", loc)?;
                }
                writeln!(f)?;
            }
            None => writeln!(f, "  ; missing terminator")?,
        }
    }
    writeln!(f, "}}")
}

fn write_inst(f: &mut fmt::Formatter, module: &Module, inst: &Inst) -> fmt::Result {
    match &inst.kind {
        InstKind::Binary { op, lhs, rhs } => write!(f, "{} {} {}, {}", op.name(), inst.ty, lhs, rhs),
        InstKind::ICmp { pred, lhs, rhs } => write!(f, "icmp {:?} {}, {}", pred, lhs, rhs),
        InstKind::FCmp { pred, lhs, rhs } => write!(f, "fcmp {:?} {}, {}", pred, lhs, rhs),
        InstKind::Cast { op, value } => write!(f, "{:?} {} to {}", op, value, inst.ty),
        InstKind::Load { ptr } => write!(f, "load {}, {}", inst.ty, ptr),
        InstKind::Store { value, ptr } => write!(f, "store {}, {}", value, ptr),
        InstKind::Alloca { allocated } => write!(f, "alloca {}", allocated),
        InstKind::FieldAddr { base, fields, index } => {
            write!(f, "fieldaddr {}, {}, {}", Type::Struct(fields.clone()), base, index)
        }
        InstKind::ElementAddr { base, elem, index } => {
            write!(f, "elementaddr {}, {}, {}", elem, base, index)
        }
        InstKind::Call { callee, args } => {
            match callee {
                Callee::Routine(id) => write!(f, "call {} @{}(", inst.ty, module.routine(*id).name)?,
                Callee::Intrinsic(intr) => write!(f, "call {} @{}(", inst.ty, intr.name())?,
            }
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ")")
        }
        InstKind::Phi { incoming } => {
            write!(f, "phi {}", inst.ty)?;
            for (i, (pred, value)) in incoming.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{}[{}, {}]", sep, value, pred)?;
            }
            Ok(())
        }
        InstKind::Select { cond, then_value, else_value } => {
            write!(f, "select {}, {}, {}", cond, then_value, else_value)
        }
    }
}
