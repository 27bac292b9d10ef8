use crate::compile_source;
use crate::vm::bytecode::{CodeFlags, Constant, FunctionProto, OpCode};
use crate::vm::disasm::{Instruction, instructions};

fn compile(source: &str) -> FunctionProto {
    compile_source(source, "<test>").unwrap_or_else(|e| panic!("Failed to compile {:?}: {:?}", source, e))
}

fn compile_error(source: &str) -> String {
    match compile_source(source, "<test>") {
        Ok(_) => panic!("expected a compile error for {:?}", source),
        Err(errors) => errors[0].message.clone(),
    }
}

fn ops(proto: &FunctionProto) -> Vec<OpCode> {
    instructions(proto).into_iter().map(|i| i.op).collect()
}

fn find(proto: &FunctionProto, op: OpCode) -> Instruction {
    instructions(proto)
        .into_iter()
        .find(|i| i.op == op)
        .unwrap_or_else(|| panic!("no {} in {}", op, proto.name))
}

/// 이름으로 중첩 코드 객체를 찾습니다.
fn nested<'a>(proto: &'a FunctionProto, name: &str) -> &'a FunctionProto {
    proto
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Code(inner) if inner.name == name => Some(&**inner),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no code object {} in {}", name, proto.name))
}

// ========== 모듈과 이름 ==========

#[test]
fn test_module_assignment_uses_globals() {
    let proto = compile("x = 1\n");
    assert_eq!(
        ops(&proto),
        vec![OpCode::PushInt, OpCode::SetGlobal, OpCode::Pop, OpCode::None, OpCode::Return]
    );
    assert_eq!(proto.name, "<module>");
    assert_eq!(proto.local_count, 0);
}

#[test]
fn test_large_int_goes_to_constants() {
    let proto = compile("x = 100000\n");
    assert_eq!(find(&proto, OpCode::Constant).arg, 0);
    assert_eq!(proto.constants[0], Constant::Int(100000));
}

#[test]
fn test_function_locals_and_defaults() {
    let proto = compile("def f(a, b=2):\n  c = a + b\n  return c\n");
    let f = nested(&proto, "f");
    assert_eq!(f.arg_names, vec!["a", "b"]);
    assert_eq!(f.required_args, 1);
    assert_eq!(f.keyword_args, 1);
    assert_eq!(f.local_count, 3);

    let code = ops(f);
    // 기본값 프롤로그
    assert_eq!(&code[..4], &[OpCode::GetLocal, OpCode::Kwargs, OpCode::Is, OpCode::PopJumpIfFalse]);
    assert!(code.contains(&OpCode::Add));
    let store = find(f, OpCode::SetLocal);
    assert_eq!(store.arg, 1);
    assert!(!code.contains(&OpCode::SetGlobal));
}

#[test]
fn test_global_declaration_overrides_local() {
    let proto = compile("def f():\n  global g\n  g = 1\n");
    let f = nested(&proto, "f");
    assert_eq!(f.local_count, 0);
    assert!(ops(f).contains(&OpCode::SetGlobal));
}

#[test]
fn test_docstring_is_recorded_and_skipped() {
    let proto = compile("def f():\n  \"\"\"hello\"\"\"\n  return 1\n");
    let f = nested(&proto, "f");
    assert_eq!(f.docstring.as_deref(), Some("hello"));
    assert_eq!(ops(f)[..2], [OpCode::PushInt, OpCode::Return]);
}

// ========== 클로저 ==========

#[test]
fn test_closure_captures_enclosing_local() {
    let proto = compile("def outer():\n  x = 1\n  def inner():\n    return x\n  return inner\n");
    let outer = nested(&proto, "outer");
    let inner = nested(outer, "inner");
    assert_eq!(inner.upvalue_count, 1);
    assert_eq!(find(inner, OpCode::GetUpvalue).arg, 0);
    assert_eq!(find(outer, OpCode::MakeClosure).upvalues, vec![(true, 0)]);
}

#[test]
fn test_nonlocal_through_two_levels() {
    let source = "\
def a():
  v = 0
  def b():
    def c():
      nonlocal v
      v = 1
    return c
  return b
";
    let proto = compile(source);
    let a = nested(&proto, "a");
    let b = nested(a, "b");
    let c = nested(b, "c");
    assert_eq!(find(a, OpCode::MakeClosure).upvalues, vec![(true, 0)]);
    assert_eq!(find(b, OpCode::MakeClosure).upvalues, vec![(false, 0)]);
    assert_eq!(find(c, OpCode::SetUpvalue).arg, 0);
    assert_eq!(c.local_count, 0);
}

#[test]
fn test_generator_flag() {
    let proto = compile("def g():\n  yield 1\n  yield\n");
    let g = nested(&proto, "g");
    assert!(g.flags.contains(CodeFlags::IS_GENERATOR));
    assert_eq!(ops(g).iter().filter(|&&op| op == OpCode::Yield).count(), 2);
}

#[test]
fn test_varargs_flags_and_kwonly_check() {
    let proto = compile("def f(a, *rest, key, **extra):\n  pass\n");
    let f = nested(&proto, "f");
    assert_eq!(f.arg_names, vec!["a", "key", "rest", "extra"]);
    assert_eq!(f.kwonly_args, 1);
    assert!(f.flags.contains(CodeFlags::COLLECTS_ARGS | CodeFlags::COLLECTS_KWS));
    assert!(f.constants.iter().any(|c| matches!(
        c,
        Constant::Str(s) if s == "f() missing required keyword-only argument: 'key'"
    )));
}

// ========== 클래스 ==========

#[test]
fn test_class_body_opcodes() {
    let source = "\
class A(B):
  '''doc'''
  x = 1
  def __init__(self):
    self.y = 2
";
    let proto = compile(source);
    let code = ops(&proto);
    let class_at = code.iter().position(|&op| op == OpCode::Class).unwrap();
    assert_eq!(code[class_at + 1], OpCode::GetGlobal);
    assert_eq!(code[class_at + 2], OpCode::Inherit);
    assert_eq!(code.iter().filter(|&&op| op == OpCode::Method).count(), 3);
    assert!(code.contains(&OpCode::FinalizeClass));

    let init = nested(&proto, "__init__");
    let init_ops = ops(init);
    assert_eq!(init_ops[init_ops.len() - 2..], [OpCode::GetLocal, OpCode::Return]);
    assert!(init_ops.contains(&OpCode::SetAttr));
}

#[test]
fn test_super_attribute_compiles_to_get_super() {
    let proto = compile("class A(B):\n  def f(self):\n    return super().f()\n");
    let f = nested(&proto, "f");
    let code = ops(f);
    assert_eq!(&code[..2], &[OpCode::GetLocal, OpCode::GetSuper]);
}

#[test]
fn test_decorators_wrap_definition() {
    let proto = compile("@d\ndef f():\n  pass\n");
    let code = ops(&proto);
    assert_eq!(
        &code[..5],
        &[OpCode::GetGlobal, OpCode::MakeClosure, OpCode::Call, OpCode::SetGlobal, OpCode::Pop]
    );
}

// ========== 호출 ==========

#[test]
fn test_keyword_call_block() {
    let proto = compile("f(1, k=2)\n");
    let decoded = instructions(&proto);
    let kwargs = decoded.iter().find(|i| i.op == OpCode::Kwargs).unwrap();
    assert_eq!(kwargs.arg, 1);
    let call = decoded.iter().find(|i| i.op == OpCode::CallKw).unwrap();
    assert_eq!(call.arg, 4);
}

#[test]
fn test_star_call_uses_expand_marker() {
    let proto = compile("f(*a, **b)\n");
    let decoded = instructions(&proto);
    let expands: Vec<usize> = decoded.iter().filter(|i| i.op == OpCode::Expand).map(|i| i.arg).collect();
    assert_eq!(expands, vec![1, 2]);
    assert_eq!(decoded.iter().find(|i| i.op == OpCode::CallKw).unwrap().arg, 5);
}

#[test]
fn test_comprehension_is_called_function() {
    let proto = compile("xs = [n * 2 for n in range(3) if n]\n");
    let comp = nested(&proto, "<listcomp>");
    assert_eq!(comp.arg_names.len(), 0);
    // n + 누산기
    assert_eq!(comp.local_count, 2);
    assert!(ops(comp).contains(&OpCode::ListAppend));
    let code = ops(&proto);
    let closure = code.iter().position(|&op| op == OpCode::MakeClosure).unwrap();
    assert_eq!(code[closure + 1], OpCode::Call);
}

// ========== 제어 흐름 ==========

#[test]
fn test_for_loop_shape() {
    let proto = compile("for i in x:\n  pass\n");
    let decoded = instructions(&proto);
    let for_iter = decoded.iter().find(|i| i.op == OpCode::ForIter).unwrap();
    let target = for_iter.jump_target().unwrap();
    // 루프 탈출 지점에서 반복자를 버림
    let exit = decoded.iter().find(|i| i.offset == target).unwrap();
    assert_eq!(exit.op, OpCode::Pop);
    assert!(decoded.iter().any(|i| i.op == OpCode::Jump && i.jump_target() == Some(for_iter.offset)));
}

#[test]
fn test_try_except_finally_shape() {
    let source = "\
try:
  f()
except ValueError as e:
  g(e)
finally:
  h()
";
    let proto = compile(source);
    let code = ops(&proto);
    for op in [
        OpCode::SetupFinally,
        OpCode::SetupTry,
        OpCode::PopTry,
        OpCode::FilterExcept,
        OpCode::BeginFinally,
        OpCode::EndFinally,
    ] {
        assert!(code.contains(&op), "missing {}", op);
    }
    // 맞는 절이 없으면 다시 던짐
    assert!(code.contains(&OpCode::Raise));
}

#[test]
fn test_break_inside_try_pops_handler() {
    let proto = compile("while True:\n  try:\n    break\n  except:\n    pass\n");
    let code = ops(&proto);
    let first_pop_try = code.iter().position(|&op| op == OpCode::PopTry).unwrap();
    assert_eq!(code[first_pop_try + 1], OpCode::Jump);
}

#[test]
fn test_line_table_follows_statements() {
    let proto = compile("x = 1\n\ny = 2\n");
    let stores: Vec<u32> = instructions(&proto)
        .into_iter()
        .filter(|i| i.op == OpCode::SetGlobal)
        .map(|i| proto.line_for(i.offset))
        .collect();
    assert_eq!(stores, vec![1, 3]);
}

// ========== 오류 ==========

#[test]
fn test_compile_errors() {
    let cases = [
        ("break\n", "'break' outside loop"),
        ("continue\n", "'continue' outside loop"),
        ("return 1\n", "'return' outside function"),
        ("nonlocal x\n", "nonlocal declaration not allowed at module level"),
        ("def f():\n  nonlocal q\n", "no binding for nonlocal 'q' found"),
        ("def f(a):\n  global a\n", "name 'a' is parameter and global"),
        ("yield 1\n", "'yield' outside function"),
        ("1 = x\n", "cannot assign to expression"),
        ("f() += 1\n", "illegal expression for augmented assignment"),
        ("raise\n", "no active exception to re-raise"),
        ("f(a=1, a=2)\n", "keyword argument repeated: a"),
        ("f(k=1, 2)\n", "positional argument follows keyword argument"),
        ("class A:\n  def __init__(self):\n    return 1\n", "'__init__' may not return a value"),
        ("class A:\n  for i in x:\n    pass\n", "unsupported statement in class body"),
        ("class A:\n  a.b = 1\n", "only simple names can be assigned in a class body"),
        ("def f():\n  return super().x\n", "super() used outside of a method"),
    ];
    for (source, expected) in cases {
        assert_eq!(compile_error(source), expected, "source: {:?}", source);
    }
}
