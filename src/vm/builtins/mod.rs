//! 내장 클래스, 내장 함수, 예외 계층, 네이티브 모듈
//!
//! `init`이 VM 생성 직후 한 번 호출되어 기본 클래스를 만들고 각 하위 모듈의
//! `register`로 네이티브를 붙인 뒤, 모든 클래스의 dunder 캐시를 채웁니다.

mod bytes;
mod dict;
mod exceptions;
mod functions;
mod gc_module;
mod generator;
mod list;
mod numeric;
mod object;
mod range;
mod set;
mod string;
pub mod system;
#[cfg(feature = "threading")]
pub mod threading;
mod tuple;

#[cfg(test)]
mod tests;

use strum::IntoEnumIterator;

use crate::vm::machine::{BaseClasses, ExcKind, Vm, VmResult};
use crate::vm::object::ObjKind;
use crate::vm::type_def::{Arity, Name, ObjFlags};
use crate::vm::value::{ObjRef, Value};

/// 기본 클래스, builtins 모듈, 예외 계층, 네이티브 모듈을 만듭니다.
pub fn init(vm: &mut Vm) {
    let object = vm.make_class("object", None);
    vm.base = BaseClasses {
        object,
        type_: vm.make_class("type", Some(object)),
        module: vm.make_class("module", Some(object)),
        none_type: vm.make_class("NoneType", Some(object)),
        not_implemented_type: vm.make_class("NotImplementedType", Some(object)),
        bool: vm.make_class("bool", Some(object)),
        int: vm.make_class("int", Some(object)),
        float: vm.make_class("float", Some(object)),
        str: vm.make_class("str", Some(object)),
        bytes: vm.make_class("bytes", Some(object)),
        bytearray: vm.make_class("bytearray", Some(object)),
        tuple: vm.make_class("tuple", Some(object)),
        list: vm.make_class("list", Some(object)),
        dict: vm.make_class("dict", Some(object)),
        set: vm.make_class("set", Some(object)),
        range: vm.make_class("range", Some(object)),
        slice: vm.make_class("slice", Some(object)),
        function: vm.make_class("function", Some(object)),
        method: vm.make_class("method", Some(object)),
        native: vm.make_class("builtin_function", Some(object)),
        property: vm.make_class("property", Some(object)),
        generator: vm.make_class("generator", Some(object)),
        code: vm.make_class("codeobject", Some(object)),
        seq_iterator: vm.make_class("sequence_iterator", Some(object)),
        range_iterator: vm.make_class("range_iterator", Some(object)),
        dict_iterator: vm.make_class("dict_iterator", Some(object)),
        enumerate: vm.make_class("enumerate", Some(object)),
        zip: vm.make_class("zip", Some(object)),
        thread: None,
    };

    let builtins = native_module(vm, "builtins");
    vm.builtins = builtins;

    for kind in ExcKind::iter() {
        let parent = kind.parent().map(|p| vm.exc(p)).unwrap_or(object);
        let class = vm.make_class(kind.name(), Some(parent));
        vm.exceptions[kind as usize] = class;
        vm.attach(builtins, kind.name(), Value::Object(class));
    }

    object::register(vm);
    numeric::register(vm);
    string::register(vm);
    list::register(vm);
    tuple::register(vm);
    dict::register(vm);
    bytes::register(vm);
    range::register(vm);
    set::register(vm);
    generator::register(vm);
    exceptions::register(vm);
    functions::register(vm);

    let b = vm.base;
    let exposed = [
        ("object", b.object),
        ("type", b.type_),
        ("bool", b.bool),
        ("int", b.int),
        ("float", b.float),
        ("str", b.str),
        ("bytes", b.bytes),
        ("bytearray", b.bytearray),
        ("tuple", b.tuple),
        ("list", b.list),
        ("dict", b.dict),
        ("set", b.set),
        ("range", b.range),
        ("slice", b.slice),
        ("property", b.property),
        ("enumerate", b.enumerate),
        ("zip", b.zip),
    ];
    for (name, class) in exposed {
        vm.attach(builtins, name, Value::Object(class));
    }
    vm.attach(builtins, "NotImplemented", Value::NotImplemented);

    // 값 타입은 상속할 수 없음. set은 인스턴스 레이아웃으로 상태를 물려줌
    for class in b.all().filter(|&c| c != b.object && c != b.set) {
        vm.heap.set_flag(class, ObjFlags::NO_INHERIT, true);
    }

    system::register(vm);
    gc_module::register(vm);
    #[cfg(feature = "threading")]
    if vm.flags().contains(crate::vm::machine::VmFlags::ENABLE_THREADING) {
        threading::register(vm);
    }

    vm.refinalize_tree(object);
}

/// 이름만 가진 빈 모듈을 만들어 모듈 캐시에 등록합니다.
pub(crate) fn native_module(vm: &mut Vm, name: &str) -> ObjRef {
    let module = vm.new_instance(vm.base.module);
    let text = vm.new_string(name);
    vm.set_field(module, vm.name(Name::DunderName), text);
    vm.register_module(name, module);
    module
}

// ========== 네이티브 공통 도우미 ==========

/// 인자 개수를 검사합니다. 실패 시 `ArgumentError: name() takes ...`
pub(crate) fn check_args(vm: &mut Vm, name: &str, arity: Arity, args: &[Value]) -> VmResult<()> {
    if arity.check(args.len()) {
        Ok(())
    } else {
        Err(vm.runtime_error(
            ExcKind::ArgumentError,
            format!("{}() {}", name, arity.describe(args.len())),
        ))
    }
}

pub(crate) fn type_error(vm: &mut Vm, name: &str, expected: &str, got: Value) -> crate::vm::machine::VmError {
    let got = vm.type_name(got);
    vm.runtime_error(
        ExcKind::TypeError,
        format!("{}() expects {}, not '{}'", name, expected, got),
    )
}

/// 정수 인자 (bool 포함)
pub(crate) fn arg_int(vm: &mut Vm, name: &str, v: Value) -> VmResult<i64> {
    match v {
        Value::Int(i) => Ok(i),
        Value::Bool(b) => Ok(b as i64),
        _ => Err(type_error(vm, name, "int", v)),
    }
}

pub(crate) fn arg_str(vm: &mut Vm, name: &str, v: Value) -> VmResult<String> {
    match vm.string_of(v) {
        Some(s) => Ok(s),
        None => Err(type_error(vm, name, "str", v)),
    }
}

/// 키워드 인자 dict에서 `name`을 꺼냅니다.
pub(crate) fn kwarg(vm: &Vm, kwargs: Option<ObjRef>, name: &str) -> Option<Value> {
    let kwargs = kwargs?;
    let key = vm.heap.find_interned(name)?;
    match vm.heap.kind(kwargs) {
        ObjKind::Dict(table) => vm.table_get(table, key),
        _ => None,
    }
}

/// `allowed`에 없는 키워드가 있으면 TypeError
pub(crate) fn check_kwargs(vm: &mut Vm, name: &str, kwargs: Option<ObjRef>, allowed: &[&str]) -> VmResult<()> {
    let Some(kwargs) = kwargs else { return Ok(()) };
    let unexpected = match vm.heap.kind(kwargs) {
        ObjKind::Dict(table) => table
            .iter()
            .filter_map(|e| vm.heap.value_str(e.key))
            .find(|k| !allowed.contains(k))
            .map(str::to_string),
        _ => None,
    };
    match unexpected {
        Some(key) => Err(vm.runtime_error(
            ExcKind::TypeError,
            format!("{}() got an unexpected keyword argument '{}'", name, key),
        )),
        None => Ok(()),
    }
}

/// 생성자 인자에서 앞의 클래스를 뺀 나머지
pub(crate) fn ctor_args(args: &[Value]) -> &[Value] {
    args.get(1..).unwrap_or_default()
}

/// `values`를 scratch에 올려 둔 채로 `f`를 실행합니다.
pub(crate) fn rooted<T>(vm: &mut Vm, values: &[Value], f: impl FnOnce(&mut Vm) -> VmResult<T>) -> VmResult<T> {
    let mark = vm.ts.scratch.len();
    vm.ts.scratch.extend_from_slice(values);
    let result = f(vm);
    vm.ts.scratch.truncate(mark);
    result
}

/// 메서드의 receiver가 기대한 종류인지 확인하고 꺼냅니다.
pub(crate) fn receiver(vm: &mut Vm, name: &str, args: &[Value], class: ObjRef) -> VmResult<Value> {
    match args.first() {
        Some(&v) if vm.is_instance(v, class) => Ok(v),
        Some(&v) => {
            let expected = vm.class_name(class);
            Err(type_error(vm, name, &expected, v))
        }
        None => {
            let expected = vm.class_name(class);
            Err(vm.runtime_error(
                ExcKind::ArgumentError,
                format!("{}() expects a '{}' receiver", name, expected),
            ))
        }
    }
}
