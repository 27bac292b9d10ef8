//! `dict`

use super::{check_args, ctor_args, receiver, rooted};
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::object::{DictIterMode, ObjKind};
use crate::vm::table::Table;
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let dict = vm.base.dict;
    vm.define_native(dict, "__new__", dict_new);
    vm.define_native(dict, ".keys", dict_keys);
    vm.define_native(dict, ".values", dict_values);
    vm.define_native(dict, ".items", dict_items);
    vm.define_native(dict, ".get", dict_get);
    vm.define_native(dict, ".pop", dict_pop);
    vm.define_native(dict, ".setdefault", dict_setdefault);
    vm.define_native(dict, ".update", dict_update);
    vm.define_native(dict, ".copy", dict_copy);
    vm.define_native(dict, ".clear", dict_clear);
}

fn this(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<ObjRef> {
    let class = vm.base.dict;
    let v = receiver(vm, name, args, class)?;
    v.as_object()
        .filter(|r| matches!(vm.heap.kind(*r), ObjKind::Dict(_)))
        .ok_or_else(|| super::type_error(vm, name, "dict", v))
}

fn table_of(vm: &Vm, dict: ObjRef) -> Option<Table> {
    match vm.heap.kind(dict) {
        ObjKind::Dict(table) => Some(table.clone()),
        _ => None,
    }
}

/// `source`의 내용을 `dict`에 넣습니다. dict이면 엔트리를, 아니면 (key, value) 쌍을 순회합니다.
fn merge_into(vm: &mut Vm, dict: ObjRef, source: Value) -> VmResult<()> {
    if let Some(table) = source.as_object().and_then(|r| table_of(vm, r)) {
        for entry in table.iter() {
            vm.dict_set(dict, entry.key, entry.value)?;
        }
        return Ok(());
    }
    let pairs = vm.collect_iterable(source)?;
    rooted(vm, &pairs, |vm| {
        for &pair in &pairs {
            let kv = vm.unpack(pair, 2)?;
            vm.dict_set(dict, kv[0], kv[1])?;
        }
        Ok(())
    })
}

fn merge_kwargs(vm: &mut Vm, dict: ObjRef, kwargs: Option<ObjRef>) -> VmResult<()> {
    if let Some(kwargs) = kwargs {
        merge_into(vm, dict, Value::Object(kwargs))?;
    }
    Ok(())
}

fn dict_new(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "dict", Arity::Range(0, 1), args)?;
    let dict = vm.new_dict();
    rooted(vm, &[Value::Object(dict)], |vm| {
        if let Some(&source) = args.first() {
            merge_into(vm, dict, source)?;
        }
        merge_kwargs(vm, dict, kwargs)
    })?;
    Ok(Value::Object(dict))
}

fn view(vm: &mut Vm, name: &str, args: &[Value], mode: DictIterMode) -> VmResult<Value> {
    check_args(vm, name, Arity::Exact(1), args)?;
    let dict = this(vm, name, args)?;
    Ok(vm.new_dict_iterator(dict, mode))
}

fn dict_keys(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    view(vm, "keys", args, DictIterMode::Keys)
}

fn dict_values(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    view(vm, "values", args, DictIterMode::Values)
}

fn dict_items(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    view(vm, "items", args, DictIterMode::Items)
}

fn dict_get(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "get", Arity::Range(2, 3), args)?;
    let dict = this(vm, "get", args)?;
    let default = args.get(2).copied().unwrap_or(Value::None);
    Ok(vm.dict_get(dict, args[1])?.unwrap_or(default))
}

fn dict_pop(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "pop", Arity::Range(2, 3), args)?;
    let dict = this(vm, "pop", args)?;
    match (vm.dict_delete(dict, args[1])?, args.get(2)) {
        (Some(v), _) => Ok(v),
        (None, Some(&default)) => Ok(default),
        (None, None) => {
            let text = vm.repr_value(args[1])?;
            Err(vm.runtime_error(ExcKind::KeyError, text))
        }
    }
}

fn dict_setdefault(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "setdefault", Arity::Range(2, 3), args)?;
    let dict = this(vm, "setdefault", args)?;
    if let Some(v) = vm.dict_get(dict, args[1])? {
        return Ok(v);
    }
    let default = args.get(2).copied().unwrap_or(Value::None);
    vm.dict_set(dict, args[1], default)?;
    Ok(default)
}

fn dict_update(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "update", Arity::Range(1, 2), args)?;
    let dict = this(vm, "update", args)?;
    if let Some(&source) = args.get(1) {
        merge_into(vm, dict, source)?;
    }
    merge_kwargs(vm, dict, kwargs)?;
    Ok(Value::None)
}

fn dict_copy(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "copy", Arity::Exact(1), args)?;
    let dict = this(vm, "copy", args)?;
    let table = table_of(vm, dict).unwrap_or_default();
    Ok(Value::Object(vm.heap.alloc(ObjKind::Dict(table))))
}

fn dict_clear(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "clear", Arity::Exact(1), args)?;
    let dict = this(vm, "clear", args)?;
    if let ObjKind::Dict(table) = vm.heap.kind_mut(dict) {
        table.clear();
    }
    Ok(Value::None)
}
