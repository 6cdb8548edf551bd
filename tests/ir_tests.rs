//! IR construction and editing

mod common;

use pretty_assertions::assert_eq;
use roofline_instr::ir::{
    BlockId, Builder, DataLayout, InstKind, Linkage, Module, Routine, RoutineAttrs, Type, User,
    Value,
};

#[test]
fn test_builder_appends_in_order() {
    let (routine, blocks) = common::sum_routine();
    assert_eq!(routine.layout(), &[blocks.entry, blocks.header, blocks.body, blocks.exit]);
    assert_eq!(routine.entry_block(), Some(blocks.entry));
    assert_eq!(routine.phis(blocks.header).len(), 2);
    assert_eq!(routine.first_non_phi(blocks.header), 2);
    assert_eq!(routine.successors(blocks.header).as_slice(), &[blocks.body, blocks.exit]);
}

#[test]
fn test_predecessors() {
    let (routine, blocks) = common::sum_routine();
    let preds = routine.predecessors();
    let mut header_preds = preds[&blocks.header].to_vec();
    header_preds.sort();
    assert_eq!(header_preds, vec![blocks.entry, blocks.body]);
    assert!(preds.get(&blocks.entry).map_or(true, |ps| ps.is_empty()));
}

#[test]
fn test_insert_block_before_and_detach() {
    let (mut routine, blocks) = common::sum_routine();
    let extra = routine.insert_block_before("extra", blocks.header);
    assert_eq!(routine.layout_position(extra), Some(1));
    assert_eq!(routine.layout_position(blocks.header), Some(2));

    routine.detach_block(extra);
    assert!(!routine.is_attached(extra));
    assert_eq!(routine.layout_position(extra), None);
    assert_eq!(routine.layout().len(), 4);
}

#[test]
fn test_uses_and_replacement() {
    let (mut routine, blocks) = common::sum_routine();
    let acc = Value::Inst(blocks.acc);
    let uses = routine.uses_of(&acc);
    // The accumulating add in the body and the return
    assert_eq!(uses.len(), 2);
    assert!(uses.contains(&(blocks.exit, User::Terminator(blocks.exit))));

    routine.replace_uses_where(&acc, &Value::i64(7), |b| b == blocks.exit);
    assert_eq!(routine.uses_of(&acc).len(), 1);
    assert_eq!(routine.uses_of(&Value::i64(7)).len(), 1);
}

#[test]
fn test_retarget_and_phi_preds() {
    let (mut routine, blocks) = common::sum_routine();
    let bridge = routine.insert_block_before("bridge", blocks.header);
    Builder::at_end(&mut routine, bridge).br(blocks.header);
    routine.retarget_edges(blocks.entry, blocks.header, bridge);
    routine.replace_phi_pred(blocks.header, blocks.entry, bridge);

    assert_eq!(routine.successors(blocks.entry).as_slice(), &[bridge]);
    for phi in routine.phis(blocks.header) {
        let InstKind::Phi { incoming } = &routine.inst(phi).kind else {
            panic!("expected a phi");
        };
        let preds: Vec<BlockId> = incoming.iter().map(|(p, _)| *p).collect();
        assert!(preds.contains(&bridge));
        assert!(!preds.contains(&blocks.entry));
    }
}

#[test]
fn test_strip_debug_locs() {
    let (mut routine, blocks) = common::sum_routine();
    assert!(routine.terminator(blocks.entry).and_then(|t| t.loc.as_ref()).is_some());
    routine.strip_debug_locs();
    for &block in routine.layout() {
        assert!(routine.terminator(block).is_some_and(|t| t.loc.is_none()));
        for &inst in &routine.block(block).insts {
            assert!(routine.inst(inst).loc.is_none());
        }
    }
}

#[test]
fn test_value_types() {
    let (routine, blocks) = common::sum_routine();
    assert_eq!(routine.value_type(&Value::Arg(0)), Type::Ptr);
    assert_eq!(routine.value_type(&Value::Arg(1)), Type::i64());
    assert_eq!(routine.value_type(&Value::Inst(blocks.acc)), Type::i64());
    assert_eq!(routine.value_type(&Value::i32(3)), Type::i32());
}

#[test]
fn test_module_declarations_and_names() {
    let mut module = Module::new("m");
    let (routine, _) = common::sum_routine();
    let sum = module.add_routine(routine);
    let callee = module.declare_routine("callee", vec![Type::Ptr], Type::Void);

    assert!(module.routine(callee).is_declaration());
    assert!(!module.routine(sum).is_declaration());
    // Declaring twice resolves to the same routine
    assert_eq!(module.declare_routine("callee", vec![Type::Ptr], Type::Void), callee);
    assert_eq!(module.routine_by_name("sum"), Some(sum));

    assert_eq!(module.unique_routine_name("fresh"), "fresh");
    let taken = module.unique_routine_name("sum");
    assert_ne!(taken, "sum");
    assert!(taken.starts_with("sum"));
}

#[test]
fn test_module_display() {
    let mut module = Module::new("sum.c");
    let (mut routine, _) = common::sum_routine();
    routine.linkage = Linkage::Internal;
    routine.attrs |= RoutineAttrs::NO_INLINE;
    module.add_routine(routine);
    module.add_global_string("sum.c");

    let text = module.to_string();
    assert!(text.starts_with("; module sum.c"));
    assert!(text.contains("define i64 @sum(ptr %arg0, i64 %arg1) internal noinline {"));
    assert!(text.contains("!sum.c:4:3"));
    assert!(text.contains("ret"));
}

#[test]
fn test_declaration_display() {
    let mut module = Module::new("m");
    module.declare_routine("ext", vec![Type::i64()], Type::i32());
    assert!(module.to_string().contains("declare i32 @ext(i64 %arg0)"));
}

#[test]
fn test_data_layout_sizes() {
    let dl = DataLayout::default();
    assert_eq!(dl.store_size(&Type::i1()), 1);
    assert_eq!(dl.store_size(&Type::i64()), 8);
    assert_eq!(dl.store_size(&Type::f32()), 4);
    assert_eq!(dl.store_size(&Type::Ptr), 8);
    assert_eq!(dl.store_size(&Type::vector(Type::f64(), 4)), 32);

    let record = Type::Struct(vec![Type::i32(), Type::Ptr, Type::Ptr]);
    assert_eq!(dl.alloc_size(&record), 24);
    assert_eq!(dl.field_offset(&[Type::i32(), Type::Ptr, Type::Ptr], 1), 8);
    assert_eq!(dl.field_offset(&[Type::i32(), Type::Ptr, Type::Ptr], 2), 16);
}

#[test]
fn test_empty_routine_is_declaration() {
    let routine = Routine::new("decl", vec![], Type::Void);
    assert!(routine.is_declaration());
    assert_eq!(routine.entry_block(), None);
}
