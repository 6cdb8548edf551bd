//! Region outlining

mod common;

use pretty_assertions::assert_eq;
use roofline_instr::analysis::{DominatorTree, LoopInfo, PostDominatorTree, Region, RegionInfo};
use roofline_instr::config::{ProtocolSymbols, DEFAULT_GENERATED_TAG};
use roofline_instr::instrument::{extract_region, ExtractError};
use roofline_instr::interp::{DisabledRuntime, Interpreter, Val};
use roofline_instr::ir::{
    BlockId, Builder, Callee, InstKind, IntPredicate, Linkage, Module, Routine, RoutineId, Type,
    Value,
};
use roofline_instr::verify::verify_module;

fn block_named(routine: &Routine, name: &str) -> BlockId {
    routine
        .layout()
        .iter()
        .copied()
        .find(|b| routine.block(*b).name == name)
        .unwrap_or_else(|| panic!("no block named {}", name))
}

fn loop_region(module: &Module, rid: RoutineId) -> Region {
    let routine = module.routine(rid);
    let dt = DominatorTree::compute(routine);
    let pdt = PostDominatorTree::compute(routine);
    let loops = LoopInfo::compute(routine, &dt);
    let (_, lp) = loops.top_level().next().expect("a loop");
    RegionInfo::new(routine, &dt, &pdt).region_for_loop(lp).expect("a region")
}

fn call_i64(module: &Module, name: &str, args: Vec<Val>) -> i64 {
    let mut interp = Interpreter::new(module, DisabledRuntime, ProtocolSymbols::default());
    interp
        .call_by_name(name, args)
        .expect("routine runs")
        .as_i64()
        .expect("integer result")
}

#[test]
fn test_outlined_routine_shape() {
    common::init_logging();
    let (mut module, rid) = common::sum_module();
    let region = loop_region(&module, rid);
    let extracted =
        extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).expect("extracts");

    let callee = module.routine(extracted.callee);
    assert_eq!(callee.name, "sum.roofline.loop");
    assert_eq!(callee.linkage, Linkage::Internal);
    assert_eq!(callee.metadata(DEFAULT_GENERATED_TAG), Some("true"));
    // n, a, then the slot for the accumulator read after the loop
    assert_eq!(callee.params, vec![Type::i64(), Type::Ptr, Type::Ptr]);
    assert_eq!(callee.ret, Type::Void);
    let names: Vec<&str> = callee.layout().iter().map(|b| callee.block(*b).name.as_str()).collect();
    assert_eq!(names, vec!["newFuncRoot", "for.cond", "for.body", "for.end.exitStub"]);

    let host = module.routine(rid);
    let names: Vec<&str> = host.layout().iter().map(|b| host.block(*b).name.as_str()).collect();
    assert_eq!(names, vec!["entry", "codeRepl", "for.end"]);
    assert_eq!(host.callees(), vec![(extracted.call_block, extracted.call, extracted.callee)]);

    verify_module(&module).expect("outlined module verifies");
}

#[test]
fn test_outlining_preserves_results() {
    let (original, _) = common::sum_module();
    let (mut module, rid) = common::sum_module();
    let region = loop_region(&module, rid);
    extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).expect("extracts");

    for values in [vec![], vec![5], vec![1, 2, 3, 4], vec![-7, 100, 3]] {
        let run = |module: &Module| {
            let mut interp = Interpreter::new(module, DisabledRuntime, ProtocolSymbols::default());
            let a = interp.memory_mut().alloc_i64s(&values);
            interp
                .call_by_name("sum", vec![Val::Ptr(a), Val::i64(values.len() as i64)])
                .expect("sum runs")
                .as_i64()
        };
        assert_eq!(run(&module), run(&original));
    }
}

#[test]
fn test_unique_names_for_repeated_outlining() {
    let (mut module, rid) = common::sum_module();
    module.add_routine(Routine::new("sum.roofline.loop", vec![], Type::Void));
    let region = loop_region(&module, rid);
    let extracted =
        extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).expect("extracts");
    assert_eq!(module.routine(extracted.callee).name, "sum.roofline.loop.1");
}

#[test]
fn test_entry_phis_with_several_outside_predecessors() {
    let (mut module, rid) = common::module_with(common::no_preheader_routine());
    let region = loop_region(&module, rid);
    let extracted =
        extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).expect("extracts");

    let host = module.routine(rid);
    let split = block_named(host, "loop.split");
    assert!(host.is_attached(split));
    assert_eq!(host.successors(split).as_slice(), &[extracted.call_block]);
    // The split block merges the two incoming starts into one argument
    let phis = host.phis(split);
    assert_eq!(phis.len(), 1);
    let InstKind::Phi { incoming } = &host.inst(phis[0]).kind else {
        panic!("expected a phi");
    };
    assert_eq!(incoming.len(), 2);

    verify_module(&module).expect("outlined module verifies");
    let bool_arg = |b: bool| Val::int(1, b as i64);
    assert_eq!(call_i64(&module, "skew", vec![bool_arg(true), Val::i64(0)]), 0);
    assert_eq!(call_i64(&module, "skew", vec![bool_arg(false), Val::i64(0)]), 1);
    assert_eq!(call_i64(&module, "skew", vec![bool_arg(false), Val::i64(6)]), 6);
}

/// `sum` whose exit block reads the accumulator through a phi and
/// returns twice its value
fn exit_phi_routine() -> Routine {
    let mut r = Routine::new("sum", vec![Type::Ptr, Type::i64()], Type::i64());
    let entry = r.add_block("entry");
    let header = r.add_block("for.cond");
    let body = r.add_block("for.body");
    let exit = r.add_block("for.end");

    let mut b = Builder::at_end(&mut r, entry);
    b.br(header);
    b.position_at_end(header);
    let i = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let acc = b.phi(Type::i64(), vec![(entry, Value::i64(0))]);
    let cond = b.icmp(IntPredicate::Slt, Value::Inst(i), Value::Arg(1));
    b.cond_br(Value::Inst(cond), body, exit);

    b.position_at_end(body);
    let ptr = b.element_addr(Type::i64(), Value::Arg(0), Value::Inst(i));
    let v = b.load(Type::i64(), Value::Inst(ptr));
    let acc_next = b.add(Value::Inst(acc), Value::Inst(v));
    let i_next = b.add(Value::Inst(i), Value::i64(1));
    b.br(header);

    b.position_at_end(exit);
    let merged = b.phi(Type::i64(), vec![(header, Value::Inst(acc))]);
    let doubled = b.add(Value::Inst(merged), Value::Inst(merged));
    b.ret(Some(Value::Inst(doubled)));

    common::add_incoming(&mut r, i, body, Value::Inst(i_next));
    common::add_incoming(&mut r, acc, body, Value::Inst(acc_next));
    r
}

#[test]
fn test_exit_phis_travel_through_slots() {
    let (mut module, rid) = common::module_with(exit_phi_routine());
    let region = loop_region(&module, rid);
    let exit = region.exit;
    let extracted =
        extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).expect("extracts");

    let callee = module.routine(extracted.callee);
    // The accumulator only reaches the caller through the rebuilt phi
    assert_eq!(callee.params, vec![Type::i64(), Type::Ptr, Type::Ptr]);
    let stub = block_named(callee, "for.end.exitStub");
    assert_eq!(callee.phis(stub).len(), 1);

    let host = module.routine(rid);
    let phi = host.phis(exit)[0];
    let InstKind::Phi { incoming } = &host.inst(phi).kind else {
        panic!("expected a phi");
    };
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].0, extracted.call_block);

    verify_module(&module).expect("outlined module verifies");
    let mut interp = Interpreter::new(&module, DisabledRuntime, ProtocolSymbols::default());
    let a = interp.memory_mut().alloc_i64s(&[1, 2, 3]);
    let result = interp.call_by_name("sum", vec![Val::Ptr(a), Val::i64(3)]).expect("runs");
    assert_eq!(result.as_i64(), Some(12));
}

#[test]
fn test_region_with_entry_block_is_rejected() {
    let (mut module, rid) = common::sum_module();
    let region = {
        let routine = module.routine(rid);
        let entry = block_named(routine, "entry");
        let exit = block_named(routine, "for.end");
        let dt = DominatorTree::compute(routine);
        let pdt = PostDominatorTree::compute(routine);
        RegionInfo::new(routine, &dt, &pdt).region(entry, exit).expect("well formed")
    };
    let before = module.to_string();
    let err = extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).unwrap_err();
    assert!(matches!(err, ExtractError::ContainsEntryBlock(_)));
    assert_eq!(module.to_string(), before);
}

#[test]
fn test_outlined_call_takes_live_ins() {
    let (mut module, rid) = common::sum_module();
    let region = loop_region(&module, rid);
    let extracted =
        extract_region(&mut module, rid, &region, DEFAULT_GENERATED_TAG).expect("extracts");

    let host = module.routine(rid);
    let InstKind::Call { callee, args } = &host.inst(extracted.call).kind else {
        panic!("expected a call");
    };
    assert_eq!(*callee, Callee::Routine(extracted.callee));
    assert_eq!(args[0], Value::Arg(1));
    assert_eq!(args[1], Value::Arg(0));
    assert!(matches!(args[2], Value::Inst(_)));
}

#[test]
fn test_outline_loop_free_region() {
    let mut routine = Routine::new("early", vec![Type::i64()], Type::i64());
    let entry = routine.add_block("entry");
    let head = routine.add_block("head");
    let out = routine.add_block("out");
    let mut b = Builder::at_end(&mut routine, entry);
    b.br(head);
    b.position_at_end(head);
    let c = b.icmp(IntPredicate::Eq, Value::Arg(0), Value::i64(0));
    b.cond_br(Value::Inst(c), out, out);
    b.position_at_end(out);
    b.ret(Some(Value::i64(1)));

    let (mut module, rid) = common::module_with(routine);
    let region = {
        let routine = module.routine(rid);
        let dt = DominatorTree::compute(routine);
        let pdt = PostDominatorTree::compute(routine);
        RegionInfo::new(routine, &dt, &pdt).region(head, out).expect("well formed")
    };
    let extracted = extract_region(&mut module, rid, &region, "tag").expect("extracts");
    assert_eq!(module.routine(extracted.callee).params, vec![Type::i64()]);
    assert_eq!(call_i64(&module, "early", vec![Val::i64(0)]), 1);
}
