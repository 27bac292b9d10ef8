//! `set`
//!
//! 원소는 인스턴스의 `InstanceData::Set` 테이블에 키로 들어가고 값은 모두 `True`입니다.
//! 해시와 키 비교는 dict와 같은 경로(`Vm::dict_get`, `Vm::dict_set`)를 씁니다.

use super::{check_args, receiver, rooted};
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::object::{DictIterMode, InstanceData, InstanceLayout, InstanceObj, ObjKind};
use crate::vm::table::Table;
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let set = vm.base.set;
    if let ObjKind::Class(class) = vm.heap.kind_mut(set) {
        class.layout = InstanceLayout::Set;
    }
    vm.define_native(set, ".__init__", set_init);
    vm.define_native(set, ".__repr__", set_repr);
    vm.define_native(set, ".__len__", set_len);
    vm.define_native(set, ".__contains__", set_contains);
    vm.define_native(set, ".__iter__", set_iter);
    vm.define_native(set, ".__eq__", set_eq);
    vm.define_native(set, ".__and__", set_and);
    vm.define_native(set, ".__or__", set_or);
    vm.define_native(set, ".__xor__", set_xor);
    vm.define_native(set, ".__sub__", set_sub);
    vm.define_native(set, ".add", set_add);
    vm.define_native(set, ".remove", set_remove);
    vm.define_native(set, ".discard", set_discard);
    vm.define_native(set, ".update", set_update);
    vm.define_native(set, ".copy", set_copy);
    vm.define_native(set, ".clear", set_clear);
}

// ========== 도우미 ==========

fn is_set(vm: &Vm, r: ObjRef) -> bool {
    matches!(
        vm.heap.kind(r),
        ObjKind::Instance(InstanceObj {
            data: InstanceData::Set(_),
            ..
        })
    )
}

fn this(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<ObjRef> {
    let class = vm.base.set;
    let v = receiver(vm, name, args, class)?;
    v.as_object()
        .filter(|&r| is_set(vm, r))
        .ok_or_else(|| super::type_error(vm, name, "set", v))
}

/// 이항 연산의 두 set. 오른쪽이 set이 아니면 `None`.
fn operands(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<Option<(ObjRef, ObjRef)>> {
    check_args(vm, name, Arity::Exact(2), args)?;
    let set = this(vm, name, args)?;
    Ok(args[1].as_object().filter(|&r| is_set(vm, r)).map(|other| (set, other)))
}

/// 테이블 순서의 원소 목록
fn members(vm: &Vm, set: ObjRef) -> Vec<Value> {
    match vm.heap.kind(set) {
        ObjKind::Instance(InstanceObj {
            data: InstanceData::Set(table),
            ..
        }) => table.iter().map(|e| e.key).collect(),
        _ => Vec::new(),
    }
}

fn count(vm: &Vm, set: ObjRef) -> usize {
    match vm.heap.kind(set) {
        ObjKind::Instance(InstanceObj {
            data: InstanceData::Set(table),
            ..
        }) => table.len(),
        _ => 0,
    }
}

/// `items`를 `set`에 넣습니다. 넣는 동안 `items`는 루트로 잡혀 있습니다.
fn insert_all(vm: &mut Vm, set: ObjRef, items: &[Value]) -> VmResult<()> {
    rooted(vm, items, |vm| {
        for &item in items {
            vm.dict_set(set, item, Value::Bool(true))?;
        }
        Ok(())
    })
}

/// `items`로 새 `set` 인스턴스를 만듭니다.
fn build_set(vm: &mut Vm, items: &[Value]) -> VmResult<Value> {
    let class = vm.base.set;
    let set = vm.new_instance(class);
    if let ObjKind::Instance(instance) = vm.heap.kind_mut(set) {
        instance.data = InstanceData::Set(Table::new());
    }
    let out = Value::Object(set);
    rooted(vm, &[out], |vm| insert_all(vm, set, items))?;
    Ok(out)
}

/// `items` 중 `other`에 들어 있는지가 `present`와 같은 원소
fn filter_members(vm: &mut Vm, items: &[Value], other: ObjRef, present: bool) -> VmResult<Vec<Value>> {
    rooted(vm, items, |vm| {
        let mut out = Vec::new();
        for &item in items {
            if vm.dict_get(other, item)?.is_some() == present {
                out.push(item);
            }
        }
        Ok(out)
    })
}

// ========== 생성과 조회 ==========

/// `set(iterable=())`
fn set_init(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "set", Arity::Range(1, 2), args)?;
    let set = this(vm, "__init__", args)?;
    if let ObjKind::Instance(instance) = vm.heap.kind_mut(set) {
        instance.data = InstanceData::Set(Table::new());
    }
    if let Some(&source) = args.get(1) {
        let items = vm.collect_iterable(source)?;
        insert_all(vm, set, &items)?;
    }
    Ok(Value::None)
}

fn set_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__repr__", Arity::Exact(1), args)?;
    let set = this(vm, "__repr__", args)?;
    let items = members(vm, set);
    if items.is_empty() {
        return Ok(vm.new_string("set()"));
    }
    let parts = rooted(vm, &items, |vm| {
        items.iter().map(|&item| vm.repr_value(item)).collect::<VmResult<Vec<_>>>()
    })?;
    let text = format!("{{{}}}", parts.join(", "));
    Ok(vm.new_string(&text))
}

fn set_len(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__len__", Arity::Exact(1), args)?;
    let set = this(vm, "__len__", args)?;
    Ok(Value::Int(count(vm, set) as i64))
}

fn set_contains(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__contains__", Arity::Exact(2), args)?;
    let set = this(vm, "__contains__", args)?;
    Ok(Value::Bool(vm.dict_get(set, args[1])?.is_some()))
}

fn set_iter(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__iter__", Arity::Exact(1), args)?;
    let set = this(vm, "__iter__", args)?;
    Ok(vm.new_dict_iterator(set, DictIterMode::Keys))
}

// ========== 집합 연산 ==========

fn set_eq(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let Some((set, other)) = operands(vm, "__eq__", args)? else {
        return Ok(Value::NotImplemented);
    };
    if count(vm, set) != count(vm, other) {
        return Ok(Value::Bool(false));
    }
    let items = members(vm, set);
    let missing = filter_members(vm, &items, other, false)?;
    Ok(Value::Bool(missing.is_empty()))
}

fn set_and(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let Some((set, other)) = operands(vm, "__and__", args)? else {
        return Ok(Value::NotImplemented);
    };
    let items = members(vm, set);
    let common = filter_members(vm, &items, other, true)?;
    build_set(vm, &common)
}

fn set_or(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let Some((set, other)) = operands(vm, "__or__", args)? else {
        return Ok(Value::NotImplemented);
    };
    let mut items = members(vm, set);
    items.extend(members(vm, other));
    build_set(vm, &items)
}

fn set_xor(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let Some((set, other)) = operands(vm, "__xor__", args)? else {
        return Ok(Value::NotImplemented);
    };
    let (left, right) = (members(vm, set), members(vm, other));
    let mut items = filter_members(vm, &left, other, false)?;
    items.extend(filter_members(vm, &right, set, false)?);
    build_set(vm, &items)
}

fn set_sub(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let Some((set, other)) = operands(vm, "__sub__", args)? else {
        return Ok(Value::NotImplemented);
    };
    let items = members(vm, set);
    let rest = filter_members(vm, &items, other, false)?;
    build_set(vm, &rest)
}

// ========== 변경 ==========

fn set_add(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "add", Arity::Exact(2), args)?;
    let set = this(vm, "add", args)?;
    vm.dict_set(set, args[1], Value::Bool(true))?;
    Ok(Value::None)
}

fn set_remove(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "remove", Arity::Exact(2), args)?;
    let set = this(vm, "remove", args)?;
    if vm.dict_delete(set, args[1])?.is_none() {
        let text = vm.repr_value(args[1])?;
        return Err(vm.runtime_error(ExcKind::KeyError, text));
    }
    Ok(Value::None)
}

fn set_discard(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "discard", Arity::Exact(2), args)?;
    let set = this(vm, "discard", args)?;
    vm.dict_delete(set, args[1])?;
    Ok(Value::None)
}

fn set_update(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "update", Arity::AtLeast(1), args)?;
    let set = this(vm, "update", args)?;
    for &source in &args[1..] {
        let items = vm.collect_iterable(source)?;
        insert_all(vm, set, &items)?;
    }
    Ok(Value::None)
}

fn set_copy(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "copy", Arity::Exact(1), args)?;
    let set = this(vm, "copy", args)?;
    let items = members(vm, set);
    build_set(vm, &items)
}

fn set_clear(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "clear", Arity::Exact(1), args)?;
    let set = this(vm, "clear", args)?;
    if let ObjKind::Instance(InstanceObj {
        data: InstanceData::Set(table),
        ..
    }) = vm.heap.kind_mut(set)
    {
        table.clear();
    }
    Ok(Value::None)
}
