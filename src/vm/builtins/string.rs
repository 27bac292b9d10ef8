//! `str` 생성자와 메서드

use super::{arg_int, arg_str, check_args, ctor_args, receiver};
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let str_ = vm.base.str;
    vm.define_native(str_, "__new__", str_new);
    vm.define_native(str_, ".join", str_join);
    vm.define_native(str_, ".split", str_split);
    vm.define_native(str_, ".strip", str_strip);
    vm.define_native(str_, ".lstrip", str_lstrip);
    vm.define_native(str_, ".rstrip", str_rstrip);
    vm.define_native(str_, ".upper", str_upper);
    vm.define_native(str_, ".lower", str_lower);
    vm.define_native(str_, ".startswith", str_startswith);
    vm.define_native(str_, ".endswith", str_endswith);
    vm.define_native(str_, ".replace", str_replace);
    vm.define_native(str_, ".find", str_find);
    vm.define_native(str_, ".count", str_count);
    vm.define_native(str_, ".encode", str_encode);
    vm.define_native(str_, ".isdigit", str_isdigit);
    vm.define_native(str_, ".isalpha", str_isalpha);
    vm.define_native(str_, ".isspace", str_isspace);
}

/// receiver 문자열의 복사본
fn this(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<String> {
    let class = vm.base.str;
    let v = receiver(vm, name, args, class)?;
    arg_str(vm, name, v)
}

fn str_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "str", Arity::Range(0, 1), args)?;
    match args.first() {
        Some(&v) if vm.heap.value_str(v).is_some() => Ok(v),
        Some(&v) => {
            let text = vm.str_value(v)?;
            Ok(vm.new_string(&text))
        }
        None => Ok(vm.new_string("")),
    }
}

fn str_join(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "join", Arity::Exact(2), args)?;
    let sep = this(vm, "join", args)?;
    let items = vm.collect_iterable(args[1])?;
    let mut parts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match vm.heap.value_str(*item) {
            Some(s) => parts.push(s.to_string()),
            None => {
                let name = vm.type_name(*item);
                return Err(vm.runtime_error(
                    ExcKind::TypeError,
                    format!("sequence item {}: expected str instance, {} found", i, name),
                ));
            }
        }
    }
    Ok(vm.new_string(&parts.join(&sep)))
}

fn str_split(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "split", Arity::Range(1, 3), args)?;
    let s = this(vm, "split", args)?;
    let sep = match args.get(1).copied().or_else(|| super::kwarg(vm, kwargs, "sep")) {
        None | Some(Value::None) => None,
        Some(v) => Some(arg_str(vm, "split", v)?),
    };
    let maxsplit = match args.get(2).copied().or_else(|| super::kwarg(vm, kwargs, "maxsplit")) {
        Some(v) => arg_int(vm, "split", v)?,
        None => -1,
    };
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };

    let parts: Vec<String> = match sep {
        Some(sep) if sep.is_empty() => {
            return Err(vm.runtime_error(ExcKind::ValueError, "empty separator"));
        }
        Some(sep) => s.splitn(limit, sep.as_str()).map(str::to_string).collect(),
        None => split_whitespace(&s, limit),
    };
    let items = parts.iter().map(|p| vm.new_string(p)).collect();
    Ok(vm.new_list(items))
}

/// 공백 기준 분리. `limit`번째 조각은 남은 문자열 전체(앞 공백 제외)입니다.
fn split_whitespace(s: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() + 1 == limit {
            parts.push(rest.trim_end().to_string());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    parts
}

fn strip_chars(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<(String, Option<Vec<char>>)> {
    check_args(vm, name, Arity::Range(1, 2), args)?;
    let s = this(vm, name, args)?;
    let chars = match args.get(1) {
        None | Some(Value::None) => None,
        Some(&v) => Some(arg_str(vm, name, v)?.chars().collect()),
    };
    Ok((s, chars))
}

fn str_strip(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let (s, chars) = strip_chars(vm, "strip", args)?;
    let out = match &chars {
        Some(set) => s.trim_matches(|c| set.contains(&c)),
        None => s.trim(),
    };
    Ok(vm.new_string(out))
}

fn str_lstrip(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let (s, chars) = strip_chars(vm, "lstrip", args)?;
    let out = match &chars {
        Some(set) => s.trim_start_matches(|c| set.contains(&c)),
        None => s.trim_start(),
    };
    Ok(vm.new_string(out))
}

fn str_rstrip(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let (s, chars) = strip_chars(vm, "rstrip", args)?;
    let out = match &chars {
        Some(set) => s.trim_end_matches(|c| set.contains(&c)),
        None => s.trim_end(),
    };
    Ok(vm.new_string(out))
}

fn str_upper(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "upper", Arity::Exact(1), args)?;
    let s = this(vm, "upper", args)?;
    Ok(vm.new_string(&s.to_uppercase()))
}

fn str_lower(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "lower", Arity::Exact(1), args)?;
    let s = this(vm, "lower", args)?;
    Ok(vm.new_string(&s.to_lowercase()))
}

/// 문자열 하나 또는 문자열 튜플
fn affixes(vm: &mut Vm, name: &str, v: Value) -> VmResult<Vec<String>> {
    if let Some(s) = vm.string_of(v) {
        return Ok(vec![s]);
    }
    let tuple = vm.base.tuple;
    if vm.is_instance(v, tuple) {
        let items = vm.collect_iterable(v)?;
        return items.into_iter().map(|item| arg_str(vm, name, item)).collect();
    }
    Err(super::type_error(vm, name, "str or a tuple of str", v))
}

fn str_startswith(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "startswith", Arity::Exact(2), args)?;
    let s = this(vm, "startswith", args)?;
    let prefixes = affixes(vm, "startswith", args[1])?;
    Ok(Value::Bool(prefixes.iter().any(|p| s.starts_with(p.as_str()))))
}

fn str_endswith(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "endswith", Arity::Exact(2), args)?;
    let s = this(vm, "endswith", args)?;
    let suffixes = affixes(vm, "endswith", args[1])?;
    Ok(Value::Bool(suffixes.iter().any(|p| s.ends_with(p.as_str()))))
}

fn str_replace(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "replace", Arity::Range(3, 4), args)?;
    let s = this(vm, "replace", args)?;
    let old = arg_str(vm, "replace", args[1])?;
    let new = arg_str(vm, "replace", args[2])?;
    let count = match args.get(3) {
        Some(&v) => arg_int(vm, "replace", v)?,
        None => -1,
    };
    let out = if count < 0 {
        s.replace(&old, &new)
    } else {
        s.replacen(&old, &new, count as usize)
    };
    Ok(vm.new_string(&out))
}

/// 코드포인트 단위 인덱스. 없으면 -1.
fn str_find(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "find", Arity::Exact(2), args)?;
    let s = this(vm, "find", args)?;
    let needle = arg_str(vm, "find", args[1])?;
    Ok(Value::Int(match s.find(&needle) {
        Some(byte) => s[..byte].chars().count() as i64,
        None => -1,
    }))
}

fn str_count(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "count", Arity::Exact(2), args)?;
    let s = this(vm, "count", args)?;
    let needle = arg_str(vm, "count", args[1])?;
    let count = if needle.is_empty() {
        s.chars().count() + 1
    } else {
        s.matches(needle.as_str()).count()
    };
    Ok(Value::Int(count as i64))
}

fn str_encode(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "encode", Arity::Range(1, 2), args)?;
    let s = this(vm, "encode", args)?;
    if let Some(&encoding) = args.get(1) {
        let encoding = arg_str(vm, "encode", encoding)?;
        if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(vm.runtime_error(ExcKind::ValueError, format!("unknown encoding: {}", encoding)));
        }
    }
    Ok(vm.new_bytes(s.into_bytes()))
}

fn char_test(vm: &mut Vm, name: &str, args: &[Value], test: fn(char) -> bool) -> VmResult<Value> {
    check_args(vm, name, Arity::Exact(1), args)?;
    let s = this(vm, name, args)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
}

fn str_isdigit(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    char_test(vm, "isdigit", args, |c| c.is_ascii_digit())
}

fn str_isalpha(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    char_test(vm, "isalpha", args, char::is_alphabetic)
}

fn str_isspace(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    char_test(vm, "isspace", args, char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace_limit() {
        assert_eq!(split_whitespace("  a b  c ", usize::MAX), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", 2), vec!["a", "b c"]);
        assert!(split_whitespace("   ", usize::MAX).is_empty());
    }
}
