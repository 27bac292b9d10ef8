//! `int`, `float`, `bool`

use super::{arg_int, check_args, ctor_args, kwarg, type_error};
use crate::vm::machine::{ExcKind, Vm, VmResult, quote_str};
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let int = vm.base.int;
    vm.define_native(int, "__new__", int_new);
    vm.define_native(int, ".bit_length", int_bit_length);

    let float = vm.base.float;
    vm.define_native(float, "__new__", float_new);
    vm.define_native(float, ".is_integer", float_is_integer);

    let bool_ = vm.base.bool;
    vm.define_native(bool_, "__new__", bool_new);
}

/// 정수 리터럴 파싱. `base`가 0이면 접두사로 진법을 정합니다.
pub(crate) fn parse_int(text: &str, base: u32) -> Option<i64> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (b, _) => (b, lower.as_str()),
    };
    if digits.is_empty() || digits.starts_with(['_', '+', '-']) || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    // 부호를 붙여서 파싱해야 i64::MIN도 받을 수 있음
    let signed = if negative { format!("-{}", cleaned) } else { cleaned };
    i64::from_str_radix(&signed, base).ok()
}

fn int_new(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    // args[0]은 클래스
    let args = ctor_args(args);
    check_args(vm, "int", Arity::Range(0, 2), args)?;
    let base = match args.get(1).copied().or_else(|| kwarg(vm, kwargs, "base")) {
        Some(b) => Some(arg_int(vm, "int", b)?),
        None => None,
    };
    let Some(&v) = args.first() else { return Ok(Value::Int(0)) };

    if let Some(base) = base {
        let Some(text) = vm.string_of(v) else {
            return Err(vm.runtime_error(
                ExcKind::TypeError,
                "int() can't convert non-string with explicit base",
            ));
        };
        if base != 0 && !(2..=36).contains(&base) {
            return Err(vm.runtime_error(ExcKind::ValueError, "int() base must be >= 2 and <= 36, or 0"));
        }
        return match parse_int(&text, base as u32) {
            Some(i) => Ok(Value::Int(i)),
            None => Err(vm.runtime_error(
                ExcKind::ValueError,
                format!("invalid literal for int() with base {}: {}", base, quote_str(&text)),
            )),
        };
    }

    match v {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) if f.is_nan() => Err(vm.runtime_error(ExcKind::ValueError, "cannot convert float NaN to integer")),
        Value::Float(f) if f.is_infinite() => Err(vm.runtime_error(
            ExcKind::ValueError,
            "cannot convert float infinity to integer",
        )),
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        _ => match vm.string_of(v) {
            Some(text) => match parse_int(&text, 10) {
                Some(i) => Ok(Value::Int(i)),
                None => Err(vm.runtime_error(
                    ExcKind::ValueError,
                    format!("invalid literal for int() with base 10: {}", quote_str(&text)),
                )),
            },
            None => Err(type_error(vm, "int", "a string or a number", v)),
        },
    }
}

fn int_bit_length(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "bit_length", Arity::Exact(1), args)?;
    let i = arg_int(vm, "bit_length", args[0])?;
    Ok(Value::Int((64 - i.unsigned_abs().leading_zeros()) as i64))
}

fn float_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "float", Arity::Range(0, 1), args)?;
    let Some(&v) = args.first() else { return Ok(Value::Float(0.0)) };
    match v {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Bool(b) => Ok(Value::Float(b as i64 as f64)),
        _ => match vm.string_of(v) {
            Some(text) => match text.trim().replace('_', "").parse::<f64>() {
                Ok(f) => Ok(Value::Float(f)),
                Err(_) => Err(vm.runtime_error(
                    ExcKind::ValueError,
                    format!("could not convert string to float: {}", quote_str(&text)),
                )),
            },
            None => Err(type_error(vm, "float", "a string or a number", v)),
        },
    }
}

fn float_is_integer(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "is_integer", Arity::Exact(1), args)?;
    match args[0] {
        Value::Float(f) => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
        v => Err(type_error(vm, "is_integer", "float", v)),
    }
}

fn bool_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let args = ctor_args(args);
    check_args(vm, "bool", Arity::Range(0, 1), args)?;
    match args.first() {
        Some(&v) => Ok(Value::Bool(vm.is_truthy(v)?)),
        None => Ok(Value::Bool(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_bases() {
        assert_eq!(parse_int("42", 10), Some(42));
        assert_eq!(parse_int("  -17 ", 10), Some(-17));
        assert_eq!(parse_int("0x1f", 0), Some(31));
        assert_eq!(parse_int("ff", 16), Some(255));
        assert_eq!(parse_int("0b101", 0), Some(5));
        assert_eq!(parse_int("1_000", 10), Some(1000));
        assert_eq!(parse_int("-9223372036854775808", 10), Some(i64::MIN));
    }

    #[test]
    fn test_parse_int_rejects_garbage() {
        assert_eq!(parse_int("", 10), None);
        assert_eq!(parse_int("12a", 10), None);
        assert_eq!(parse_int("_1", 10), None);
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("0x", 0), None);
    }
}
