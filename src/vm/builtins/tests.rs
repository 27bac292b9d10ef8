//! Builtin 함수와 메서드의 유닛 테스트
//!
//! 컴파일러 없이 VM에 등록된 네이티브를 직접 호출해 성공/실패 케이스를 확인합니다.

use super::*;
use crate::runtime_io::BufferIo;
use crate::vm::machine::{BinOp, VmConfig};

fn new_vm() -> (Vm, BufferIo) {
    let io = BufferIo::new();
    let vm = Vm::with_io(VmConfig::default(), Box::new(io.clone()));
    (vm, io)
}

fn call(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<Value> {
    let key = vm.intern(name);
    let f = vm.get_field(vm.builtins, key).unwrap_or_else(|| panic!("no builtin {}", name));
    vm.call_callable(f, args)
}

fn call_method(vm: &mut Vm, receiver: Value, name: &str, args: &[Value]) -> VmResult<Value> {
    let key = vm.intern(name);
    let method = vm.get_attribute(receiver, key)?;
    vm.call_callable(method, args)
}

fn s(vm: &mut Vm, text: &str) -> Value {
    vm.new_string(text)
}

fn repr(vm: &mut Vm, v: Value) -> String {
    vm.repr_value(v).unwrap()
}

/// 실패한 호출이 남긴 예외의 `Class: message`
fn error_text(vm: &mut Vm, result: VmResult<Value>) -> String {
    assert!(result.is_err(), "expected an exception");
    let exception = vm.ts.current_exception;
    vm.clear_exception();
    vm.exception_summary(exception)
}

fn class(vm: &mut Vm, name: &str) -> Value {
    let key = vm.intern(name);
    vm.get_field(vm.builtins, key).unwrap()
}

// ========== 생성자 ==========

#[test]
fn test_int_constructor() {
    let (mut vm, _) = new_vm();
    let int = class(&mut vm, "int");
    let text = s(&mut vm, "  -42 ");
    assert_eq!(vm.call_callable(int, &[text]).unwrap(), Value::Int(-42));
    assert_eq!(vm.call_callable(int, &[Value::Float(3.9)]).unwrap(), Value::Int(3));
    assert_eq!(vm.call_callable(int, &[Value::Bool(true)]).unwrap(), Value::Int(1));

    let hex = s(&mut vm, "ff");
    assert_eq!(vm.call_callable(int, &[hex, Value::Int(16)]).unwrap(), Value::Int(255));

    let bad = s(&mut vm, "12abc");
    let result = vm.call_callable(int, &[bad]);
    assert_eq!(
        error_text(&mut vm, result),
        "ValueError: invalid literal for int() with base 10: '12abc'"
    );
}

#[test]
fn test_float_and_bool_constructors() {
    let (mut vm, _) = new_vm();
    let float = class(&mut vm, "float");
    let text = s(&mut vm, "2.5");
    assert_eq!(vm.call_callable(float, &[text]).unwrap(), Value::Float(2.5));

    let bool_ = class(&mut vm, "bool");
    let empty = vm.new_list(vec![]);
    assert_eq!(vm.call_callable(bool_, &[empty]).unwrap(), Value::Bool(false));
    assert_eq!(vm.call_callable(bool_, &[Value::Int(7)]).unwrap(), Value::Bool(true));
}

#[test]
fn test_str_constructor_uses_str() {
    let (mut vm, _) = new_vm();
    let str_ = class(&mut vm, "str");
    let list = vm.new_list(vec![Value::Int(1), Value::None]);
    let result = vm.call_callable(str_, &[list]).unwrap();
    assert_eq!(vm.string_of(result).unwrap(), "[1, None]");
}

#[test]
fn test_type_of_value() {
    let (mut vm, _) = new_vm();
    let type_ = class(&mut vm, "type");
    let int = class(&mut vm, "int");
    assert_eq!(vm.call_callable(type_, &[Value::Int(3)]).unwrap(), int);
}

#[test]
fn test_value_classes_cannot_be_subclassed() {
    let (vm, _) = new_vm();
    for c in [vm.base.int, vm.base.list, vm.base.str] {
        assert!(vm.heap.flags(c).contains(ObjFlags::NO_INHERIT));
    }
    assert!(!vm.heap.flags(vm.base.object).contains(ObjFlags::NO_INHERIT));
    assert!(!vm.heap.flags(vm.exc(ExcKind::ValueError)).contains(ObjFlags::NO_INHERIT));
}

// ========== builtin 함수 ==========

#[test]
fn test_print_with_sep_and_end() {
    let (mut vm, io) = new_vm();
    let hello = s(&mut vm, "hello");
    call(&mut vm, "print", &[hello, Value::Int(1), Value::None]).unwrap();
    assert_eq!(io.get_output(), "hello 1 None\n");
}

#[test]
fn test_len_and_errors() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(call(&mut vm, "len", &[list]).unwrap(), Value::Int(2));

    let text = s(&mut vm, "한글");
    assert_eq!(call(&mut vm, "len", &[text]).unwrap(), Value::Int(2));

    let result = call(&mut vm, "len", &[Value::Int(5)]);
    assert_eq!(error_text(&mut vm, result), "TypeError: object of type 'int' has no len()");

    let result = call(&mut vm, "len", &[]);
    assert_eq!(
        error_text(&mut vm, result),
        "ArgumentError: len() takes exactly 1 argument (0 given)"
    );
}

#[test]
fn test_isinstance_with_tuple() {
    let (mut vm, _) = new_vm();
    let int = class(&mut vm, "int");
    let str_ = class(&mut vm, "str");
    let classes = vm.new_tuple(vec![str_, int]);
    assert_eq!(call(&mut vm, "isinstance", &[Value::Int(1), classes]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "isinstance", &[Value::None, int]).unwrap(), Value::Bool(false));

    let value_error = Value::Object(vm.exc(ExcKind::ValueError));
    let exception = Value::Object(vm.exc(ExcKind::Exception));
    assert_eq!(
        call(&mut vm, "issubclass", &[value_error, exception]).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_min_max_sum() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![Value::Int(3), Value::Int(-1), Value::Int(7)]);
    assert_eq!(call(&mut vm, "min", &[list]).unwrap(), Value::Int(-1));
    assert_eq!(call(&mut vm, "max", &[list]).unwrap(), Value::Int(7));
    assert_eq!(call(&mut vm, "sum", &[list]).unwrap(), Value::Int(9));
    assert_eq!(
        call(&mut vm, "max", &[Value::Int(1), Value::Float(2.5)]).unwrap(),
        Value::Float(2.5)
    );

    let empty = vm.new_list(vec![]);
    let result = call(&mut vm, "min", &[empty]);
    assert_eq!(error_text(&mut vm, result), "ValueError: min() arg is an empty sequence");
}

#[test]
fn test_sorted_is_stable_and_reversible() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
    let sorted = call(&mut vm, "sorted", &[list]).unwrap();
    assert_eq!(repr(&mut vm, sorted), "[1, 2, 3]");
    // 원본은 그대로
    assert_eq!(repr(&mut vm, list), "[3, 1, 2]");

    call_method(&mut vm, list, "sort", &[]).unwrap();
    assert_eq!(repr(&mut vm, list), "[1, 2, 3]");

    let a = s(&mut vm, "a");
    let mixed = vm.new_list(vec![Value::Int(1), a]);
    let result = call(&mut vm, "sorted", &[mixed]);
    assert!(error_text(&mut vm, result).starts_with("TypeError"));
}

#[test]
fn test_ord_chr_abs() {
    let (mut vm, _) = new_vm();
    let a = s(&mut vm, "A");
    assert_eq!(call(&mut vm, "ord", &[a]).unwrap(), Value::Int(65));
    let c = call(&mut vm, "chr", &[Value::Int(0xAC00)]).unwrap();
    assert_eq!(vm.string_of(c).unwrap(), "가");
    assert_eq!(call(&mut vm, "abs", &[Value::Int(-4)]).unwrap(), Value::Int(4));
    assert_eq!(call(&mut vm, "abs", &[Value::Float(-0.5)]).unwrap(), Value::Float(0.5));

    let result = call(&mut vm, "chr", &[Value::Int(-1)]);
    assert_eq!(error_text(&mut vm, result), "ValueError: chr() arg not in range(0x110000)");
}

#[test]
fn test_any_all() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![Value::Int(0), Value::Int(2)]);
    assert_eq!(call(&mut vm, "any", &[list]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "all", &[list]).unwrap(), Value::Bool(false));
    let empty = vm.new_list(vec![]);
    assert_eq!(call(&mut vm, "all", &[empty]).unwrap(), Value::Bool(true));
}

#[test]
fn test_getattr_default_and_hasattr() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![]);
    let name = s(&mut vm, "missing");
    assert_eq!(
        call(&mut vm, "getattr", &[list, name, Value::Int(0)]).unwrap(),
        Value::Int(0)
    );
    assert_eq!(call(&mut vm, "hasattr", &[list, name]).unwrap(), Value::Bool(false));
    let append = s(&mut vm, "append");
    assert_eq!(call(&mut vm, "hasattr", &[list, append]).unwrap(), Value::Bool(true));

    let result = call(&mut vm, "getattr", &[list, name]);
    assert_eq!(
        error_text(&mut vm, result),
        "AttributeError: 'list' object has no attribute 'missing'"
    );
}

#[test]
fn test_next_returns_iterator_when_exhausted() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![Value::Int(1)]);
    let it = call(&mut vm, "iter", &[list]).unwrap();
    assert_eq!(call(&mut vm, "next", &[it]).unwrap(), Value::Int(1));
    assert_eq!(call(&mut vm, "next", &[it]).unwrap(), it);
    assert_eq!(call(&mut vm, "next", &[it, Value::None]).unwrap(), Value::None);
}

#[test]
fn test_input_reads_line_and_raises_on_eof() {
    let (mut vm, io) = new_vm();
    io.push_input_line("kuroko");
    let prompt = s(&mut vm, "> ");
    let line = call(&mut vm, "input", &[prompt]).unwrap();
    assert_eq!(vm.string_of(line).unwrap(), "kuroko");
    assert_eq!(io.get_output(), "> ");

    let result = call(&mut vm, "input", &[]);
    assert!(error_text(&mut vm, result).starts_with("IOError"));
}

// ========== 메서드 ==========

#[test]
fn test_list_methods() {
    let (mut vm, _) = new_vm();
    let list = vm.new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    call_method(&mut vm, list, "append", &[Value::Int(4)]).unwrap();
    call_method(&mut vm, list, "insert", &[Value::Int(-100), Value::Int(0)]).unwrap();
    assert_eq!(repr(&mut vm, list), "[0, 1, 2, 3, 4]");

    assert_eq!(call_method(&mut vm, list, "pop", &[]).unwrap(), Value::Int(4));
    assert_eq!(call_method(&mut vm, list, "index", &[Value::Int(2)]).unwrap(), Value::Int(2));
    call_method(&mut vm, list, "remove", &[Value::Int(0)]).unwrap();
    call_method(&mut vm, list, "reverse", &[]).unwrap();
    assert_eq!(repr(&mut vm, list), "[3, 2, 1]");

    let result = call_method(&mut vm, list, "index", &[Value::Int(9)]);
    assert_eq!(error_text(&mut vm, result), "ValueError: 9 is not in list");

    let empty = vm.new_list(vec![]);
    let result = call_method(&mut vm, empty, "pop", &[]);
    assert_eq!(error_text(&mut vm, result), "IndexError: pop from empty list");
}

#[test]
fn test_str_methods() {
    let (mut vm, _) = new_vm();
    let text = s(&mut vm, "  a,b,,c  ");
    let stripped = call_method(&mut vm, text, "strip", &[]).unwrap();
    let comma = s(&mut vm, ",");
    let parts = call_method(&mut vm, stripped, "split", &[comma]).unwrap();
    assert_eq!(repr(&mut vm, parts), "['a', 'b', '', 'c']");

    let dash = s(&mut vm, "-");
    let joined = call_method(&mut vm, dash, "join", &[parts]).unwrap();
    assert_eq!(vm.string_of(joined).unwrap(), "a-b--c");

    let upper = call_method(&mut vm, joined, "upper", &[]).unwrap();
    assert_eq!(vm.string_of(upper).unwrap(), "A-B--C");

    let b = s(&mut vm, "b");
    assert_eq!(call_method(&mut vm, joined, "find", &[b]).unwrap(), Value::Int(2));

    let bad = vm.new_list(vec![Value::Int(1)]);
    let result = call_method(&mut vm, dash, "join", &[bad]);
    assert_eq!(
        error_text(&mut vm, result),
        "TypeError: sequence item 0: expected str instance, int found"
    );
}

#[test]
fn test_dict_methods() {
    let (mut vm, _) = new_vm();
    let dict = Value::Object(vm.new_dict());
    let key = s(&mut vm, "k");
    vm.set_item(dict, key, Value::Int(1)).unwrap();

    assert_eq!(call_method(&mut vm, dict, "get", &[key]).unwrap(), Value::Int(1));
    let missing = s(&mut vm, "missing");
    assert_eq!(call_method(&mut vm, dict, "get", &[missing]).unwrap(), Value::None);
    assert_eq!(
        call_method(&mut vm, dict, "setdefault", &[missing, Value::Int(2)]).unwrap(),
        Value::Int(2)
    );

    let items = call_method(&mut vm, dict, "items", &[]).unwrap();
    let list = vm.collect_iterable(items).unwrap();
    let list = vm.new_list(list);
    assert_eq!(repr(&mut vm, list), "[('k', 1), ('missing', 2)]");

    assert_eq!(call_method(&mut vm, dict, "pop", &[key]).unwrap(), Value::Int(1));
    let result = call_method(&mut vm, dict, "pop", &[key]);
    assert_eq!(error_text(&mut vm, result), "KeyError: 'k'");
}

#[test]
fn test_dict_from_pairs_round_trips() {
    let (mut vm, _) = new_vm();
    let dict = Value::Object(vm.new_dict());
    vm.set_item(dict, Value::Int(1), Value::Int(10)).unwrap();
    vm.set_item(dict, Value::Int(2), Value::Int(20)).unwrap();
    let items = call_method(&mut vm, dict, "items", &[]).unwrap();
    let dict_class = class(&mut vm, "dict");
    let copy = vm.call_callable(dict_class, &[items]).unwrap();
    assert!(vm.values_equal(dict, copy).unwrap());
}

#[test]
fn test_set_methods() {
    let (mut vm, _) = new_vm();
    let set_class = class(&mut vm, "set");
    let items = vm.new_list(vec![Value::Int(3), Value::Int(1), Value::Int(3), Value::Int(2)]);
    let set = vm.call_callable(set_class, &[items]).unwrap();
    assert_eq!(vm.len_of(set).unwrap(), 3);
    assert_eq!(repr(&mut vm, set), "{1, 2, 3}");
    assert!(vm.contains(set, Value::Int(2)).unwrap());

    call_method(&mut vm, set, "add", &[Value::Int(4)]).unwrap();
    call_method(&mut vm, set, "discard", &[Value::Int(1)]).unwrap();
    call_method(&mut vm, set, "discard", &[Value::Int(99)]).unwrap();
    assert!(!vm.contains(set, Value::Int(1)).unwrap());
    let result = call_method(&mut vm, set, "remove", &[Value::Int(1)]);
    assert_eq!(error_text(&mut vm, result), "KeyError: 1");

    let list = vm.new_list(vec![Value::Int(2)]);
    let hashed = vm.hash_value(list);
    assert!(hashed.is_err());
    vm.clear_exception();
    let result = call_method(&mut vm, set, "add", &[list]);
    assert_eq!(error_text(&mut vm, result), "TypeError: unhashable type: 'list'");

    let empty = vm.call_callable(set_class, &[]).unwrap();
    assert_eq!(repr(&mut vm, empty), "set()");
    assert!(!vm.is_truthy(empty).unwrap());
    let result = vm.hash_value(set);
    assert!(result.is_err());
    vm.clear_exception();
}

#[test]
fn test_set_operators() {
    let (mut vm, _) = new_vm();
    let set_class = class(&mut vm, "set");
    let left = vm.new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let left = vm.call_callable(set_class, &[left]).unwrap();
    let right = vm.new_list(vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
    let right = vm.call_callable(set_class, &[right]).unwrap();

    let and = vm.binary_op(BinOp::BitAnd, left, right).unwrap();
    assert_eq!(repr(&mut vm, and), "{2, 3}");
    let or = vm.binary_op(BinOp::BitOr, left, right).unwrap();
    assert_eq!(repr(&mut vm, or), "{1, 2, 3, 4}");
    let xor = vm.binary_op(BinOp::BitXor, left, right).unwrap();
    assert_eq!(repr(&mut vm, xor), "{1, 4}");
    let sub = vm.binary_op(BinOp::Sub, left, right).unwrap();
    assert_eq!(repr(&mut vm, sub), "{1}");

    let copy = call_method(&mut vm, left, "copy", &[]).unwrap();
    assert!(vm.values_equal(left, copy).unwrap());
    assert!(!vm.values_equal(left, right).unwrap());
    let result = vm.binary_op(BinOp::BitAnd, left, Value::Int(1));
    assert_eq!(error_text(&mut vm, result), "TypeError: unsupported operand types for &: 'set' and 'int'");
}

#[test]
fn test_bytes_constructor_range_check() {
    let (mut vm, _) = new_vm();
    let bytes = class(&mut vm, "bytes");
    let list = vm.new_list(vec![Value::Int(104), Value::Int(105)]);
    let b = vm.call_callable(bytes, &[list]).unwrap();
    assert_eq!(repr(&mut vm, b), "b'hi'");
    let decoded = call_method(&mut vm, b, "decode", &[]).unwrap();
    assert_eq!(vm.string_of(decoded).unwrap(), "hi");

    let bad = vm.new_list(vec![Value::Int(256)]);
    let result = vm.call_callable(bytes, &[bad]);
    assert_eq!(error_text(&mut vm, result), "ValueError: bytes must be in range(0, 256)");
}

#[test]
fn test_range_and_enumerate() {
    let (mut vm, _) = new_vm();
    let range = class(&mut vm, "range");
    let r = vm.call_callable(range, &[Value::Int(0), Value::Int(10), Value::Int(3)]).unwrap();
    assert_eq!(repr(&mut vm, r), "range(0, 10, 3)");
    let items = vm.collect_iterable(r).unwrap();
    assert_eq!(items, vec![Value::Int(0), Value::Int(3), Value::Int(6), Value::Int(9)]);

    let result = vm.call_callable(range, &[Value::Int(0), Value::Int(1), Value::Int(0)]);
    assert_eq!(error_text(&mut vm, result), "ValueError: range() arg 3 must not be zero");

    let enumerate = class(&mut vm, "enumerate");
    let a = s(&mut vm, "a");
    let list = vm.new_list(vec![a]);
    let e = vm.call_callable(enumerate, &[list, Value::Int(1)]).unwrap();
    let pairs = vm.collect_iterable(e).unwrap();
    let pairs = vm.new_list(pairs);
    assert_eq!(repr(&mut vm, pairs), "[(1, 'a')]");
}

#[test]
fn test_exception_repr_and_str() {
    let (mut vm, _) = new_vm();
    let class = Value::Object(vm.exc(ExcKind::ValueError));
    let arg = s(&mut vm, "x");
    let e = vm.call_callable(class, &[arg]).unwrap();
    assert_eq!(repr(&mut vm, e), "ValueError('x')");
    assert_eq!(vm.str_value(e).unwrap(), "x");

    let empty = vm.call_callable(class, &[]).unwrap();
    assert_eq!(repr(&mut vm, empty), "ValueError()");
    assert_eq!(vm.str_value(empty).unwrap(), "");
}

// ========== 네이티브 모듈 ==========

#[test]
fn test_gc_module_stats() {
    let (mut vm, _) = new_vm();
    let gc = vm.cached_module("gc").unwrap();
    let name = vm.intern("collect");
    let collect = vm.get_attribute(gc, name).unwrap();
    let freed = vm.call_callable(collect, &[]).unwrap();
    assert!(matches!(freed, Value::Int(n) if n >= 0));

    let name = vm.intern("stats");
    let stats = vm.get_attribute(gc, name).unwrap();
    let dict = vm.call_callable(stats, &[]).unwrap();
    let key = s(&mut vm, "collections");
    assert!(matches!(vm.get_item(dict, key).unwrap(), Value::Int(n) if n >= 1));
}

#[test]
fn test_system_module() {
    let (mut vm, _) = new_vm();
    system::set_argv(&mut vm, &["script.krk".to_string(), "x".to_string()]);
    let kuroko = vm.cached_module("kuroko").unwrap();
    let name = vm.intern("argv");
    let argv = vm.get_attribute(kuroko, name).unwrap();
    assert_eq!(repr(&mut vm, argv), "['script.krk', 'x']");
    let name = vm.intern("version");
    let version = vm.get_attribute(kuroko, name).unwrap();
    assert_eq!(vm.string_of(version).unwrap(), env!("CARGO_PKG_VERSION"));
}
