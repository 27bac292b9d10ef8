//! `tuple`

use super::list::count_equal;
use super::{check_args, ctor_args, receiver, rooted};
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::object::ObjKind;
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let tuple = vm.base.tuple;
    vm.define_native(tuple, "__new__", tuple_new);
    vm.define_native(tuple, ".index", tuple_index);
    vm.define_native(tuple, ".count", tuple_count);
}

fn items(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<Vec<Value>> {
    let class = vm.base.tuple;
    let v = receiver(vm, name, args, class)?;
    match v.as_object().map(|r| vm.heap.kind(r)) {
        Some(ObjKind::Tuple(items)) => Ok(items.to_vec()),
        _ => Err(super::type_error(vm, name, "tuple", v)),
    }
}

fn tuple_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "tuple", Arity::Range(0, 1), args)?;
    match args.first() {
        Some(&v) if matches!(v.as_object().map(|r| vm.heap.kind(r)), Some(ObjKind::Tuple(_))) => Ok(v),
        Some(&v) => {
            let items = vm.collect_iterable(v)?;
            Ok(vm.new_tuple(items))
        }
        None => Ok(vm.new_tuple(Vec::new())),
    }
}

fn tuple_index(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "index", Arity::Exact(2), args)?;
    let items = items(vm, "index", args)?;
    let needle = args[1];
    let found = rooted(vm, &items, |vm| {
        for (i, &item) in items.iter().enumerate() {
            if vm.values_equal(item, needle)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    })?;
    match found {
        Some(i) => Ok(Value::Int(i as i64)),
        None => Err(vm.runtime_error(ExcKind::ValueError, "tuple.index(x): x not in tuple")),
    }
}

fn tuple_count(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "count", Arity::Exact(2), args)?;
    let items = items(vm, "count", args)?;
    count_equal(vm, &items, args[1])
}
