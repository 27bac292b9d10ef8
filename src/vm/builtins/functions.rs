//! `builtins` 모듈의 전역 함수들

use super::{arg_int, arg_str, check_args, check_kwargs, kwarg, rooted, type_error};
use crate::runtime_io::ReadResult;
use crate::vm::bytecode::OpCode;
use crate::vm::machine::{BinOp, ExcKind, Vm, VmResult};
use crate::vm::object::ObjKind;
use crate::vm::type_def::{Arity, ObjFlags};
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let builtins = vm.builtins;
    vm.define_native(builtins, "print", builtin_print);
    vm.define_native(builtins, "len", builtin_len);
    vm.define_native(builtins, "repr", builtin_repr);
    vm.define_native(builtins, "isinstance", builtin_isinstance);
    vm.define_native(builtins, "issubclass", builtin_issubclass);
    vm.define_native(builtins, "hash", builtin_hash);
    vm.define_native(builtins, "id", builtin_id);
    vm.define_native(builtins, "iter", builtin_iter);
    vm.define_native(builtins, "next", builtin_next);
    vm.define_native(builtins, "getattr", builtin_getattr);
    vm.define_native(builtins, "setattr", builtin_setattr);
    vm.define_native(builtins, "hasattr", builtin_hasattr);
    vm.define_native(builtins, "delattr", builtin_delattr);
    vm.define_native(builtins, "dir", builtin_dir);
    vm.define_native(builtins, "min", builtin_min);
    vm.define_native(builtins, "max", builtin_max);
    vm.define_native(builtins, "sum", builtin_sum);
    vm.define_native(builtins, "abs", builtin_abs);
    vm.define_native(builtins, "ord", builtin_ord);
    vm.define_native(builtins, "chr", builtin_chr);
    vm.define_native(builtins, "sorted", builtin_sorted);
    vm.define_native(builtins, "any", builtin_any);
    vm.define_native(builtins, "all", builtin_all);
    vm.define_native(builtins, "input", builtin_input);
    vm.define_native(builtins, "staticmethod", builtin_staticmethod);
    vm.define_native(builtins, "classmethod", builtin_classmethod);
    vm.define_native(builtins, "super", builtin_super);
    vm.define_native(builtins, "globals", builtin_globals);
    vm.define_native(builtins, "callable", builtin_callable);
}

// ========== 입출력 ==========

fn builtin_print(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_kwargs(vm, "print", kwargs, &["sep", "end"])?;
    let text_kw = |vm: &mut Vm, name: &str, default: &str| -> VmResult<String> {
        match kwarg(vm, kwargs, name) {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(v) => arg_str(vm, "print", v),
        }
    };
    let sep = text_kw(vm, "sep", " ")?;
    let end = text_kw(vm, "end", "\n")?;

    let mut out = String::new();
    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&vm.str_value(arg)?);
    }
    out.push_str(&end);
    vm.io.write(&out);
    Ok(Value::None)
}

/// EOF는 IOError로 알립니다.
fn builtin_input(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "input", Arity::Range(0, 1), args)?;
    if let Some(&prompt) = args.first() {
        let prompt = vm.str_value(prompt)?;
        vm.io.write(&prompt);
    }
    match vm.io.read_line() {
        ReadResult::Ok(line) => Ok(vm.new_string(&line)),
        ReadResult::Eof => Err(vm.runtime_error(ExcKind::IOError, "EOF when reading a line")),
        ReadResult::Error(message) => Err(vm.runtime_error(ExcKind::IOError, message)),
    }
}

// ========== 객체 조회 ==========

fn builtin_len(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "len", Arity::Exact(1), args)?;
    Ok(Value::Int(vm.len_of(args[0])? as i64))
}

fn builtin_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "repr", Arity::Exact(1), args)?;
    let text = vm.repr_value(args[0])?;
    Ok(vm.new_string(&text))
}

/// 클래스 하나 또는 클래스 튜플
fn class_filter(vm: &mut Vm, name: &str, filter: Value) -> VmResult<Vec<ObjRef>> {
    if let Some(class) = filter.as_object().filter(|_| vm.is_class(filter)) {
        return Ok(vec![class]);
    }
    let items = match filter.as_object().map(|r| vm.heap.kind(r)) {
        Some(ObjKind::Tuple(items)) => items.to_vec(),
        _ => return Err(type_error(vm, name, "a class or tuple of classes", filter)),
    };
    let mut classes = Vec::with_capacity(items.len());
    for item in items {
        classes.extend(class_filter(vm, name, item)?);
    }
    Ok(classes)
}

fn builtin_isinstance(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "isinstance", Arity::Exact(2), args)?;
    let classes = class_filter(vm, "isinstance", args[1])?;
    Ok(Value::Bool(classes.into_iter().any(|c| vm.is_instance(args[0], c))))
}

fn builtin_issubclass(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "issubclass", Arity::Exact(2), args)?;
    let Some(class) = args[0].as_object().filter(|_| vm.is_class(args[0])) else {
        return Err(type_error(vm, "issubclass", "a class", args[0]));
    };
    let classes = class_filter(vm, "issubclass", args[1])?;
    Ok(Value::Bool(classes.into_iter().any(|c| vm.is_subclass(class, c))))
}

fn builtin_hash(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "hash", Arity::Exact(1), args)?;
    Ok(Value::Int(vm.hash_value(args[0])? as i64))
}

/// 힙 객체는 아레나 인덱스, 즉시값은 해시
fn builtin_id(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "id", Arity::Exact(1), args)?;
    match args[0] {
        Value::Object(r) => Ok(Value::Int(r.index() as i64)),
        v => Ok(Value::Int(vm.hash_value(v)? as i64)),
    }
}

fn builtin_callable(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "callable", Arity::Exact(1), args)?;
    let Some(r) = args[0].as_object() else { return Ok(Value::Bool(false)) };
    let callable = match vm.heap.kind(r) {
        ObjKind::Closure(_) | ObjKind::Native(_) | ObjKind::BoundMethod(_) | ObjKind::Class(_) => true,
        _ => {
            let class = vm.type_of(args[0]);
            vm.class_slot(class, crate::vm::type_def::Dunder::Call).is_some()
        }
    };
    Ok(Value::Bool(callable))
}

// ========== 반복 ==========

fn builtin_iter(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "iter", Arity::Exact(1), args)?;
    vm.get_iter(args[0])
}

/// 기본값 없이 끝에 도달하면 반복자 자신을 돌려줍니다.
fn builtin_next(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "next", Arity::Range(1, 2), args)?;
    match vm.iter_next(args[0])? {
        Some(v) => Ok(v),
        None => Ok(args.get(1).copied().unwrap_or(args[0])),
    }
}

fn builtin_any(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "any", Arity::Exact(1), args)?;
    let items = vm.collect_iterable(args[0])?;
    rooted(vm, &items, |vm| {
        for &item in &items {
            if vm.is_truthy(item)? {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    })
}

fn builtin_all(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "all", Arity::Exact(1), args)?;
    let items = vm.collect_iterable(args[0])?;
    rooted(vm, &items, |vm| {
        for &item in &items {
            if !vm.is_truthy(item)? {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    })
}

fn builtin_sorted(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "sorted", Arity::Exact(1), args)?;
    check_kwargs(vm, "sorted", kwargs, &["key", "reverse"])?;
    let key = kwarg(vm, kwargs, "key").filter(|k| !k.is_none());
    let reverse = match kwarg(vm, kwargs, "reverse") {
        Some(v) => vm.is_truthy(v)?,
        None => false,
    };
    let items = vm.collect_iterable(args[0])?;
    let sorted = super::list::sort_values(vm, items, key, reverse)?;
    Ok(vm.new_list(sorted))
}

/// `min`/`max` 공통: iterable 하나 또는 여러 위치 인자
fn extreme(vm: &mut Vm, name: &str, args: &[Value], kwargs: Option<ObjRef>, want: OpCode) -> VmResult<Value> {
    check_args(vm, name, Arity::AtLeast(1), args)?;
    check_kwargs(vm, name, kwargs, &["key", "default"])?;
    let key = kwarg(vm, kwargs, "key").filter(|k| !k.is_none());
    let default = kwarg(vm, kwargs, "default");
    let items = if args.len() == 1 {
        vm.collect_iterable(args[0])?
    } else {
        args.to_vec()
    };

    rooted(vm, &items, |vm| {
        let mut best: Option<(Value, Value)> = None;
        for &item in &items {
            let k = match key {
                Some(key) => vm.call_callable(key, &[item])?,
                None => item,
            };
            vm.ts.scratch.push(k);
            let replace = match best {
                None => true,
                Some((_, best_key)) => {
                    let result = vm.compare(want, k, best_key)?;
                    vm.is_truthy(result)?
                }
            };
            if replace {
                best = Some((item, k));
            }
        }
        match (best, default) {
            (Some((item, _)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(vm.runtime_error(ExcKind::ValueError, format!("{}() arg is an empty sequence", name))),
        }
    })
}

fn builtin_min(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    extreme(vm, "min", args, kwargs, OpCode::Less)
}

fn builtin_max(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    extreme(vm, "max", args, kwargs, OpCode::Greater)
}

fn builtin_sum(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "sum", Arity::Range(1, 2), args)?;
    let start = args.get(1).copied().or_else(|| kwarg(vm, kwargs, "start")).unwrap_or(Value::Int(0));
    let items = vm.collect_iterable(args[0])?;
    rooted(vm, &items, |vm| {
        let mut total = start;
        for &item in &items {
            total = vm.binary_op(BinOp::Add, total, item)?;
            vm.ts.scratch.push(total);
        }
        Ok(total)
    })
}

// ========== 숫자와 문자 ==========

fn builtin_abs(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "abs", Arity::Exact(1), args)?;
    match args[0] {
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => {
            let negative = vm.compare(OpCode::Less, v, Value::Int(0))?;
            if vm.is_truthy(negative)? {
                vm.unary(OpCode::Negate, v)
            } else {
                Ok(v)
            }
        }
    }
}

fn builtin_ord(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "ord", Arity::Exact(1), args)?;
    let s = arg_str(vm, "ord", args[0])?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(vm.runtime_error(
            ExcKind::TypeError,
            format!("ord() expected a character, but string of length {} found", s.chars().count()),
        )),
    }
}

fn builtin_chr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "chr", Arity::Exact(1), args)?;
    let code = arg_int(vm, "chr", args[0])?;
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => Ok(vm.new_string(c.encode_utf8(&mut [0; 4]))),
        None => Err(vm.runtime_error(ExcKind::ValueError, "chr() arg not in range(0x110000)")),
    }
}

// ========== 속성 ==========

fn attr_name(vm: &mut Vm, name: &str, v: Value) -> VmResult<ObjRef> {
    let text = arg_str(vm, name, v)?;
    Ok(vm.intern(&text))
}

fn builtin_getattr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "getattr", Arity::Range(2, 3), args)?;
    let name = attr_name(vm, "getattr", args[1])?;
    match args.get(2) {
        Some(&default) => Ok(vm.try_get_attribute(args[0], name)?.unwrap_or(default)),
        None => vm.get_attribute(args[0], name),
    }
}

fn builtin_setattr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "setattr", Arity::Exact(3), args)?;
    let name = attr_name(vm, "setattr", args[1])?;
    vm.set_attribute(args[0], name, args[2])?;
    Ok(Value::None)
}

fn builtin_hasattr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "hasattr", Arity::Exact(2), args)?;
    let name = attr_name(vm, "hasattr", args[1])?;
    Ok(Value::Bool(vm.try_get_attribute(args[0], name)?.is_some()))
}

fn builtin_delattr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "delattr", Arity::Exact(2), args)?;
    let name = attr_name(vm, "delattr", args[1])?;
    vm.del_attribute(args[0], name)?;
    Ok(Value::None)
}

/// 인자가 없으면 현재 모듈의 전역 이름들
fn builtin_dir(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "dir", Arity::Range(0, 1), args)?;
    let target = match args.first() {
        Some(&v) => v,
        None => match current_globals(vm) {
            Some(module) => Value::Object(module),
            None => return Ok(vm.new_list(Vec::new())),
        },
    };
    let names = super::object::attribute_names(vm, target);
    let items = names.iter().map(|n| vm.new_string(n)).collect();
    Ok(vm.new_list(items))
}

// ========== 함수 장식자 ==========

fn flag_function(vm: &mut Vm, name: &str, args: &[Value], flag: ObjFlags) -> VmResult<Value> {
    check_args(vm, name, Arity::Exact(1), args)?;
    match args[0].as_object() {
        Some(r) if matches!(vm.heap.kind(r), ObjKind::Closure(_) | ObjKind::Native(_)) => {
            vm.heap.set_flag(r, flag, true);
            Ok(args[0])
        }
        _ => Err(type_error(vm, name, "a function", args[0])),
    }
}

fn builtin_staticmethod(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    flag_function(vm, "staticmethod", args, ObjFlags::STATIC_METHOD)
}

fn builtin_classmethod(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    flag_function(vm, "classmethod", args, ObjFlags::CLASS_METHOD)
}

/// `super().name` 형태는 컴파일러가 직접 처리하므로, 여기까지 오면 잘못된 사용입니다.
fn builtin_super(vm: &mut Vm, _args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    Err(vm.runtime_error(
        ExcKind::TypeError,
        "super() is only supported as super().attribute inside a method",
    ))
}

// ========== 모듈 ==========

fn current_globals(vm: &Vm) -> Option<ObjRef> {
    vm.ts.frames.last().map(|f| f.globals).or(vm.ts.module)
}

/// 현재 모듈 필드의 dict 사본
fn builtin_globals(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "globals", Arity::Exact(0), args)?;
    let table = current_globals(vm)
        .and_then(|m| match vm.heap.kind(m) {
            ObjKind::Instance(instance) => Some(instance.fields.clone()),
            _ => None,
        })
        .unwrap_or_default();
    Ok(Value::Object(vm.heap.alloc(ObjKind::Dict(table))))
}
