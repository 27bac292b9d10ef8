//! `gc` 모듈: 수집기 제어와 통계

use super::{check_args, native_module};
use crate::vm::machine::{Vm, VmResult};
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let gc = native_module(vm, "gc");
    vm.define_native(gc, "collect", gc_collect);
    vm.define_native(gc, "pause", gc_pause);
    vm.define_native(gc, "resume", gc_resume);
    vm.define_native(gc, "stats", gc_stats);
}

/// 해제한 객체 수를 돌려줍니다.
fn gc_collect(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "collect", Arity::Exact(0), args)?;
    Ok(Value::Int(vm.collect_garbage() as i64))
}

fn gc_pause(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "pause", Arity::Exact(0), args)?;
    vm.heap.pause();
    Ok(Value::None)
}

fn gc_resume(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "resume", Arity::Exact(0), args)?;
    vm.heap.resume();
    Ok(Value::None)
}

fn gc_stats(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "stats", Arity::Exact(0), args)?;
    let stats = [
        ("bytes_allocated", vm.heap.bytes_allocated),
        ("next_gc", vm.heap.next_gc),
        ("collections", vm.heap.collections),
    ];
    let dict = vm.new_dict();
    for (name, value) in stats {
        let key = vm.new_string(name);
        vm.dict_set(dict, key, Value::Int(value as i64))?;
    }
    Ok(Value::Object(dict))
}
