//! `list` 생성자와 메서드, 그리고 `sorted()`와 공유하는 정렬

use super::{arg_int, check_args, check_kwargs, ctor_args, kwarg, receiver, rooted};
use crate::vm::bytecode::OpCode;
use crate::vm::machine::{ExcKind, Vm, VmResult, normalize_index};
use crate::vm::object::ObjKind;
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let list = vm.base.list;
    vm.define_native(list, "__new__", list_new);
    vm.define_native(list, ".append", list_append);
    vm.define_native(list, ".extend", list_extend);
    vm.define_native(list, ".pop", list_pop);
    vm.define_native(list, ".insert", list_insert);
    vm.define_native(list, ".index", list_index);
    vm.define_native(list, ".remove", list_remove);
    vm.define_native(list, ".reverse", list_reverse);
    vm.define_native(list, ".sort", list_sort);
    vm.define_native(list, ".copy", list_copy);
    vm.define_native(list, ".count", list_count);
    vm.define_native(list, ".clear", list_clear);
}

fn this(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<ObjRef> {
    let class = vm.base.list;
    let v = receiver(vm, name, args, class)?;
    v.as_object()
        .filter(|r| matches!(vm.heap.kind(*r), ObjKind::List(_)))
        .ok_or_else(|| super::type_error(vm, name, "list", v))
}

fn items_of(vm: &Vm, list: ObjRef) -> Vec<Value> {
    match vm.heap.kind(list) {
        ObjKind::List(items) => items.clone(),
        _ => Vec::new(),
    }
}

fn with_items<T>(vm: &mut Vm, list: ObjRef, f: impl FnOnce(&mut Vec<Value>) -> T) -> Option<T> {
    match vm.heap.kind_mut(list) {
        ObjKind::List(items) => Some(f(items)),
        _ => None,
    }
}

fn list_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "list", Arity::Range(0, 1), args)?;
    let items = match args.first() {
        Some(&v) => vm.collect_iterable(v)?,
        None => Vec::new(),
    };
    Ok(vm.new_list(items))
}

fn list_append(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "append", Arity::Exact(2), args)?;
    let list = this(vm, "append", args)?;
    with_items(vm, list, |items| items.push(args[1]));
    Ok(Value::None)
}

fn list_extend(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "extend", Arity::Exact(2), args)?;
    let list = this(vm, "extend", args)?;
    let extra = vm.collect_iterable(args[1])?;
    with_items(vm, list, |items| items.extend(extra));
    Ok(Value::None)
}

fn list_pop(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "pop", Arity::Range(1, 2), args)?;
    let list = this(vm, "pop", args)?;
    let index = match args.get(1) {
        Some(&v) => arg_int(vm, "pop", v)?,
        None => -1,
    };
    let len = items_of(vm, list).len();
    if len == 0 {
        return Err(vm.runtime_error(ExcKind::IndexError, "pop from empty list"));
    }
    let Some(at) = normalize_index(index, len) else {
        return Err(vm.runtime_error(ExcKind::IndexError, "pop index out of range"));
    };
    Ok(with_items(vm, list, |items| items.remove(at)).unwrap_or(Value::None))
}

fn list_insert(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "insert", Arity::Exact(3), args)?;
    let list = this(vm, "insert", args)?;
    let index = arg_int(vm, "insert", args[1])?;
    let len = items_of(vm, list).len() as i64;
    let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
    with_items(vm, list, |items| items.insert(at as usize, args[2]));
    Ok(Value::None)
}

/// 값이 처음 나타나는 위치. 비교 중 사용자 코드가 돌 수 있으므로 원소를 루팅합니다.
fn position(vm: &mut Vm, list: ObjRef, needle: Value) -> VmResult<Option<usize>> {
    let items = items_of(vm, list);
    rooted(vm, &items, |vm| {
        for (i, &item) in items.iter().enumerate() {
            if vm.values_equal(item, needle)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    })
}

fn list_index(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "index", Arity::Exact(2), args)?;
    let list = this(vm, "index", args)?;
    match position(vm, list, args[1])? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => {
            let text = vm.repr_value(args[1])?;
            Err(vm.runtime_error(ExcKind::ValueError, format!("{} is not in list", text)))
        }
    }
}

fn list_remove(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "remove", Arity::Exact(2), args)?;
    let list = this(vm, "remove", args)?;
    match position(vm, list, args[1])? {
        Some(i) => {
            with_items(vm, list, |items| {
                if i < items.len() {
                    items.remove(i);
                }
            });
            Ok(Value::None)
        }
        None => Err(vm.runtime_error(ExcKind::ValueError, "list.remove(x): x not in list")),
    }
}

fn list_reverse(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "reverse", Arity::Exact(1), args)?;
    let list = this(vm, "reverse", args)?;
    with_items(vm, list, |items| items.reverse());
    Ok(Value::None)
}

fn list_sort(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "sort", Arity::Exact(1), args)?;
    check_kwargs(vm, "sort", kwargs, &["key", "reverse"])?;
    let list = this(vm, "sort", args)?;
    let key = kwarg(vm, kwargs, "key").filter(|k| !k.is_none());
    let reverse = match kwarg(vm, kwargs, "reverse") {
        Some(v) => vm.is_truthy(v)?,
        None => false,
    };
    let items = items_of(vm, list);
    let sorted = sort_values(vm, items, key, reverse)?;
    with_items(vm, list, |items| *items = sorted);
    Ok(Value::None)
}

fn list_copy(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "copy", Arity::Exact(1), args)?;
    let list = this(vm, "copy", args)?;
    let items = items_of(vm, list);
    Ok(vm.new_list(items))
}

fn list_count(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "count", Arity::Exact(2), args)?;
    let list = this(vm, "count", args)?;
    let items = items_of(vm, list);
    count_equal(vm, &items, args[1])
}

fn list_clear(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "clear", Arity::Exact(1), args)?;
    let list = this(vm, "clear", args)?;
    with_items(vm, list, Vec::clear);
    Ok(Value::None)
}

pub(super) fn count_equal(vm: &mut Vm, items: &[Value], needle: Value) -> VmResult<Value> {
    rooted(vm, items, |vm| {
        let mut count = 0;
        for &item in items {
            if vm.values_equal(item, needle)? {
                count += 1;
            }
        }
        Ok(Value::Int(count))
    })
}

// ========== 정렬 ==========

/// 안정 병합 정렬. 비교는 `<`이며 실패하면 예외를 그대로 전파합니다.
pub(super) fn sort_values(vm: &mut Vm, items: Vec<Value>, key: Option<Value>, reverse: bool) -> VmResult<Vec<Value>> {
    let mark = vm.ts.scratch.len();
    vm.ts.scratch.extend_from_slice(&items);
    let result = (|| {
        let keys = match key {
            Some(key) => {
                let mut keys = Vec::with_capacity(items.len());
                for &item in &items {
                    let k = vm.call_callable(key, &[item])?;
                    vm.ts.scratch.push(k);
                    keys.push(k);
                }
                keys
            }
            None => items.clone(),
        };
        let mut order: Vec<usize> = (0..items.len()).collect();
        merge_sort(vm, &keys, &mut order, reverse)?;
        Ok(order.into_iter().map(|i| items[i]).collect())
    })();
    vm.ts.scratch.truncate(mark);
    result
}

fn less(vm: &mut Vm, a: Value, b: Value) -> VmResult<bool> {
    let result = vm.compare(OpCode::Less, a, b)?;
    vm.is_truthy(result)
}

fn merge_sort(vm: &mut Vm, keys: &[Value], order: &mut [usize], reverse: bool) -> VmResult<()> {
    if order.len() < 2 {
        return Ok(());
    }
    let mid = order.len() / 2;
    merge_sort(vm, keys, &mut order[..mid], reverse)?;
    merge_sort(vm, keys, &mut order[mid..], reverse)?;

    let mut merged = Vec::with_capacity(order.len());
    let (mut i, mut j) = (0, mid);
    while i < mid && j < order.len() {
        let (left, right) = (keys[order[i]], keys[order[j]]);
        // 같은 키는 왼쪽을 먼저 → 안정
        let take_right = if reverse { less(vm, left, right)? } else { less(vm, right, left)? };
        if take_right {
            merged.push(order[j]);
            j += 1;
        } else {
            merged.push(order[i]);
            i += 1;
        }
    }
    merged.extend_from_slice(&order[i..mid]);
    merged.extend_from_slice(&order[j..]);
    order.copy_from_slice(&merged);
    Ok(())
}
