//! Instruction builder with an insertion point

use super::{
    BinaryOp, BlockId, Callee, CastOp, DebugLoc, FloatPredicate, Inst, InstId, InstKind,
    IntPredicate, Intrinsic, Routine, Terminator, TerminatorKind, Type, Value,
};

/// Where the next instruction goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// After the last instruction, in front of the terminator
    End(BlockId),
    /// At a fixed index; advances with every insertion
    At(BlockId, usize),
}

/// Appends instructions to a routine
pub struct Builder<'r> {
    routine: &'r mut Routine,
    point: InsertPoint,
    loc: Option<DebugLoc>,
}

impl<'r> Builder<'r> {
    pub fn at_end(routine: &'r mut Routine, block: BlockId) -> Self {
        Builder { routine, point: InsertPoint::End(block), loc: None }
    }

    /// After the phis of `block`
    pub fn at_first_insertion_point(routine: &'r mut Routine, block: BlockId) -> Self {
        let index = routine.first_non_phi(block);
        Builder { routine, point: InsertPoint::At(block, index), loc: None }
    }

    pub fn before(routine: &'r mut Routine, block: BlockId, inst: InstId) -> Self {
        let index = routine
            .block(block)
            .insts
            .iter()
            .position(|i| *i == inst)
            .unwrap_or(routine.block(block).insts.len());
        Builder { routine, point: InsertPoint::At(block, index), loc: None }
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.point = InsertPoint::End(block);
    }

    pub fn set_loc(&mut self, loc: Option<DebugLoc>) {
        self.loc = loc;
    }

    pub fn block(&self) -> BlockId {
        match self.point {
            InsertPoint::End(block) | InsertPoint::At(block, _) => block,
        }
    }

    pub fn routine(&self) -> &Routine {
        self.routine
    }

    pub fn insert(&mut self, kind: InstKind, ty: Type) -> InstId {
        let inst = Inst { kind, ty, loc: self.loc.clone() };
        match &mut self.point {
            InsertPoint::End(block) => self.routine.push_inst(*block, inst),
            InsertPoint::At(block, index) => {
                let id = self.routine.insert_inst(*block, *index, inst);
                *index += 1;
                id
            }
        }
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> InstId {
        let ty = self.routine.value_type(&lhs);
        self.insert(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> InstId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Value, rhs: Value) -> InstId {
        let ty = self.routine.value_type(&lhs).compare_result();
        self.insert(InstKind::ICmp { pred, lhs, rhs }, ty)
    }

    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: Value, rhs: Value) -> InstId {
        let ty = self.routine.value_type(&lhs).compare_result();
        self.insert(InstKind::FCmp { pred, lhs, rhs }, ty)
    }

    pub fn cast(&mut self, op: CastOp, value: Value, to: Type) -> InstId {
        self.insert(InstKind::Cast { op, value }, to)
    }

    pub fn load(&mut self, ty: Type, ptr: Value) -> InstId {
        self.insert(InstKind::Load { ptr }, ty)
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> InstId {
        self.insert(InstKind::Store { value, ptr }, Type::Void)
    }

    pub fn alloca(&mut self, allocated: Type) -> InstId {
        self.insert(InstKind::Alloca { allocated }, Type::Ptr)
    }

    pub fn field_addr(&mut self, fields: &[Type], base: Value, index: u32) -> InstId {
        self.insert(InstKind::FieldAddr { base, fields: fields.to_vec(), index }, Type::Ptr)
    }

    pub fn element_addr(&mut self, elem: Type, base: Value, index: Value) -> InstId {
        self.insert(InstKind::ElementAddr { base, elem, index }, Type::Ptr)
    }

    pub fn call(&mut self, callee: Callee, args: Vec<Value>, ret: Type) -> InstId {
        self.insert(InstKind::Call { callee, args }, ret)
    }

    pub fn intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<Value>) -> InstId {
        let ret = match intrinsic {
            Intrinsic::MemSet => Type::Void,
            _ => args.first().map(|a| self.routine.value_type(a)).unwrap_or(Type::Void),
        };
        self.call(Callee::Intrinsic(intrinsic), args, ret)
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(BlockId, Value)>) -> InstId {
        self.insert(InstKind::Phi { incoming }, ty)
    }

    pub fn select(&mut self, cond: Value, then_value: Value, else_value: Value) -> InstId {
        let ty = self.routine.value_type(&then_value);
        self.insert(InstKind::Select { cond, then_value, else_value }, ty)
    }

    fn terminate(&mut self, kind: TerminatorKind) {
        let block = self.block();
        self.routine.set_terminator(block, Terminator { kind, loc: self.loc.clone() });
    }

    pub fn br(&mut self, dest: BlockId) {
        self.terminate(TerminatorKind::Br(dest));
    }

    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) {
        self.terminate(TerminatorKind::CondBr { cond, then_dest, else_dest });
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.terminate(TerminatorKind::Ret(value));
    }

    pub fn unreachable(&mut self) {
        self.terminate(TerminatorKind::Unreachable);
    }
}
