//! `range`, `slice`

use super::{arg_int, check_args, ctor_args, receiver};
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::object::{InstanceData, InstanceObj, ObjKind};
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let range = vm.base.range;
    vm.define_native(range, "__new__", range_new);
    vm.define_native(range, ".__repr__", range_repr);
    vm.define_native(range, ":start", range_start);
    vm.define_native(range, ":stop", range_stop);
    vm.define_native(range, ":step", range_step);

    let slice = vm.base.slice;
    vm.define_native(slice, "__new__", slice_new);
    vm.define_native(slice, ".__repr__", slice_repr);
    vm.define_native(slice, ":start", slice_start);
    vm.define_native(slice, ":stop", slice_stop);
    vm.define_native(slice, ":step", slice_step);
}

// ========== range ==========

fn range_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "range", Arity::Range(1, 3), args)?;
    let mut ints = Vec::with_capacity(args.len());
    for &v in args {
        ints.push(arg_int(vm, "range", v)?);
    }
    let (start, stop, step) = match ints[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => (0, 0, 1),
    };
    if step == 0 {
        return Err(vm.runtime_error(ExcKind::ValueError, "range() arg 3 must not be zero"));
    }
    let class = vm.base.range;
    Ok(vm.new_iterator(class, InstanceData::Range { start, stop, step }))
}

fn range_parts(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<(i64, i64, i64)> {
    check_args(vm, name, Arity::Exact(1), args)?;
    let class = vm.base.range;
    let v = receiver(vm, name, args, class)?;
    match v.as_object().map(|r| vm.heap.kind(r)) {
        Some(ObjKind::Instance(InstanceObj {
            data: InstanceData::Range { start, stop, step },
            ..
        })) => Ok((*start, *stop, *step)),
        _ => Err(super::type_error(vm, name, "range", v)),
    }
}

fn range_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let (start, stop, step) = range_parts(vm, "__repr__", args)?;
    let text = if step == 1 {
        format!("range({}, {})", start, stop)
    } else {
        format!("range({}, {}, {})", start, stop, step)
    };
    Ok(vm.new_string(&text))
}

fn range_start(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Ok(Value::Int(range_parts(vm, "start", args)?.0))
}

fn range_stop(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Ok(Value::Int(range_parts(vm, "stop", args)?.1))
}

fn range_step(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Ok(Value::Int(range_parts(vm, "step", args)?.2))
}

// ========== slice ==========

fn slice_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "slice", Arity::Range(1, 3), args)?;
    let (start, stop, step) = match *args {
        [stop] => (Value::None, stop, Value::None),
        [start, stop] => (start, stop, Value::None),
        [start, stop, step] => (start, stop, step),
        _ => (Value::None, Value::None, Value::None),
    };
    Ok(vm.new_slice(start, stop, step))
}

fn slice_parts(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<[Value; 3]> {
    check_args(vm, name, Arity::Exact(1), args)?;
    let class = vm.base.slice;
    let v = receiver(vm, name, args, class)?;
    match v.as_object().map(|r| vm.heap.kind(r)) {
        Some(ObjKind::Instance(InstanceObj {
            data: InstanceData::Slice { start, stop, step },
            ..
        })) => Ok([*start, *stop, *step]),
        _ => Err(super::type_error(vm, name, "slice", v)),
    }
}

fn slice_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let parts = slice_parts(vm, "__repr__", args)?;
    let mut texts = Vec::with_capacity(3);
    for part in parts {
        texts.push(vm.repr_value(part)?);
    }
    let text = format!("slice({})", texts.join(", "));
    Ok(vm.new_string(&text))
}

fn slice_start(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Ok(slice_parts(vm, "start", args)?[0])
}

fn slice_stop(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Ok(slice_parts(vm, "stop", args)?[1])
}

fn slice_step(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Ok(slice_parts(vm, "step", args)?[2])
}
