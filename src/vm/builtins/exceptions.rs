//! 예외 계층의 공통 메서드 (`BaseException`에 붙어 모든 예외가 상속)

use super::check_args;
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::type_def::{Arity, Name};
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let base = vm.exc(ExcKind::BaseException);
    vm.define_native(base, ".__init__", exception_init);
    vm.define_native(base, ".__repr__", exception_repr);
    vm.define_native(base, ".__str__", exception_str);
}

fn arg_of(vm: &Vm, exception: Value) -> Value {
    exception
        .as_object()
        .and_then(|r| vm.get_field(r, vm.name(Name::Arg)))
        .unwrap_or(Value::None)
}

/// `BaseException(arg=None)`
fn exception_init(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__init__", Arity::Range(1, 2), args)?;
    if let Some(r) = args[0].as_object() {
        let arg = args.get(1).copied().unwrap_or(Value::None);
        vm.set_field(r, vm.name(Name::Arg), arg);
    }
    Ok(Value::None)
}

fn exception_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__repr__", Arity::Exact(1), args)?;
    let class = vm.type_name(args[0]);
    let text = match arg_of(vm, args[0]) {
        Value::None => format!("{}()", class),
        arg => format!("{}({})", class, vm.repr_value(arg)?),
    };
    Ok(vm.new_string(&text))
}

fn exception_str(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__str__", Arity::Exact(1), args)?;
    match arg_of(vm, args[0]) {
        Value::None => Ok(vm.new_string("")),
        arg if vm.heap.value_str(arg).is_some() => Ok(arg),
        arg => {
            let text = vm.str_value(arg)?;
            Ok(vm.new_string(&text))
        }
    }
}
