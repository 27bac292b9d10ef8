//! 반복자, 제너레이터, 함수 계열 클래스
//!
//! 내장 반복자는 "호출 가능한 반복자" 규약을 따릅니다: 호출하면 다음 값을,
//! 끝나면 자기 자신을 돌려줍니다.

use super::{check_args, ctor_args, rooted};
use crate::vm::machine::{Vm, VmResult};
use crate::vm::object::{InstanceData, ObjKind, PropertyObj};
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let b = vm.base;
    for class in [b.seq_iterator, b.range_iterator, b.dict_iterator, b.enumerate, b.zip] {
        vm.define_native(class, ".__call__", iterator_call);
        vm.define_native(class, ".__iter__", iterator_iter);
    }
    vm.define_native(b.enumerate, "__new__", enumerate_new);
    vm.define_native(b.zip, "__new__", zip_new);

    vm.define_native(b.generator, ".__call__", generator_call);
    vm.define_native(b.generator, ".send", generator_send);
    vm.define_native(b.generator, ".__iter__", iterator_iter);
    vm.define_native(b.generator, ":gi_running", generator_running);

    vm.define_native(b.function, ":__name__", function_name);
    vm.define_native(b.function, ":__doc__", function_doc);
    vm.define_native(b.function, ":__file__", function_file);
    vm.define_native(b.native, ":__name__", native_name);
    vm.define_native(b.native, ":__doc__", native_doc);
    vm.define_native(b.method, ":__self__", method_self);
    vm.define_native(b.method, ":__func__", method_func);
    vm.define_native(b.property, "__new__", property_new);
}

// ========== 반복자 ==========

fn iterator_call(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__call__", Arity::Exact(1), args)?;
    let this = args[0];
    Ok(vm.iter_next(this)?.unwrap_or(this))
}

fn iterator_iter(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__iter__", Arity::Exact(1), args)?;
    Ok(args[0])
}

fn enumerate_new(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "enumerate", Arity::Range(1, 2), args)?;
    let start = match args.get(1).copied().or_else(|| super::kwarg(vm, kwargs, "start")) {
        Some(v) => super::arg_int(vm, "enumerate", v)?,
        None => 0,
    };
    let iter = vm.get_iter(args[0])?;
    let class = vm.base.enumerate;
    Ok(vm.new_iterator(class, InstanceData::Enumerate { iter, index: start }))
}

fn zip_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    let mut iters = Vec::with_capacity(args.len());
    let mark = vm.ts.scratch.len();
    for &v in args {
        match vm.get_iter(v) {
            Ok(iter) => {
                vm.ts.scratch.push(iter);
                iters.push(iter);
            }
            Err(e) => {
                vm.ts.scratch.truncate(mark);
                return Err(e);
            }
        }
    }
    vm.ts.scratch.truncate(mark);
    let class = vm.base.zip;
    Ok(vm.new_iterator(class, InstanceData::Zip { iters }))
}

// ========== 제너레이터 ==========

fn generator_of(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<ObjRef> {
    match args.first().and_then(Value::as_object) {
        Some(r) if matches!(vm.heap.kind(r), ObjKind::Generator(_)) => Ok(r),
        _ => {
            let got = args.first().copied().unwrap_or(Value::None);
            Err(super::type_error(vm, name, "generator", got))
        }
    }
}

fn generator_call(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__call__", Arity::Exact(1), args)?;
    let generator = generator_of(vm, "__call__", args)?;
    vm.resume_generator(generator, Value::None)
}

/// 마지막 `yield` 식의 값으로 `value`를 넣고 재개합니다.
fn generator_send(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "send", Arity::Exact(2), args)?;
    let generator = generator_of(vm, "send", args)?;
    rooted(vm, &args[1..], |vm| vm.resume_generator(generator, args[1]))
}

fn generator_running(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let generator = generator_of(vm, "gi_running", args)?;
    let state = vm.generator_state(generator);
    Ok(Value::Bool(state == Some(crate::vm::object::GeneratorState::Running)))
}

// ========== 함수 ==========

/// 클로저의 코드 객체
fn code_of(vm: &Vm, v: Value) -> Option<&crate::vm::object::CodeObj> {
    let ObjKind::Closure(closure) = vm.heap.kind(v.as_object()?) else { return None };
    match vm.heap.kind(closure.code) {
        ObjKind::Code(code) => Some(code),
        _ => None,
    }
}

fn function_name(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__name__", Arity::Exact(1), args)?;
    Ok(code_of(vm, args[0]).map(|c| Value::Object(c.name)).unwrap_or(Value::None))
}

fn function_doc(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__doc__", Arity::Exact(1), args)?;
    Ok(code_of(vm, args[0])
        .and_then(|c| c.docstring)
        .map(Value::Object)
        .unwrap_or(Value::None))
}

fn function_file(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__file__", Arity::Exact(1), args)?;
    Ok(code_of(vm, args[0]).map(|c| Value::Object(c.filename)).unwrap_or(Value::None))
}

fn native_of(vm: &Vm, v: Value) -> Option<crate::vm::object::NativeObj> {
    match vm.heap.kind(v.as_object()?) {
        ObjKind::Native(native) => Some(*native),
        _ => None,
    }
}

fn native_name(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__name__", Arity::Exact(1), args)?;
    match native_of(vm, args[0]) {
        Some(native) => Ok(vm.new_string(native.name)),
        None => Ok(Value::None),
    }
}

fn native_doc(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__doc__", Arity::Exact(1), args)?;
    match native_of(vm, args[0]).and_then(|n| n.doc) {
        Some(doc) => Ok(vm.new_string(doc)),
        None => Ok(Value::None),
    }
}

fn bound_parts(vm: &Vm, v: Value) -> Option<(Value, Value)> {
    match vm.heap.kind(v.as_object()?) {
        ObjKind::BoundMethod(bound) => Some((bound.receiver, bound.method)),
        _ => None,
    }
}

fn method_self(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__self__", Arity::Exact(1), args)?;
    Ok(bound_parts(vm, args[0]).map(|(receiver, _)| receiver).unwrap_or(Value::None))
}

fn method_func(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__func__", Arity::Exact(1), args)?;
    Ok(bound_parts(vm, args[0]).map(|(_, method)| method).unwrap_or(Value::None))
}

/// `property(getter)`: 클래스에 두면 속성 접근 시 getter를 호출합니다.
fn property_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "property", Arity::Exact(1), args)?;
    let getter = args[0];
    Ok(Value::Object(vm.heap.alloc(ObjKind::Property(PropertyObj { getter }))))
}
