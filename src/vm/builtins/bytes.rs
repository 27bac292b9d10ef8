//! `bytes`, `bytearray`

use super::{arg_int, arg_str, check_args, ctor_args, receiver};
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::object::ObjKind;
use crate::vm::type_def::Arity;
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let bytes = vm.base.bytes;
    vm.define_native(bytes, "__new__", bytes_new);
    vm.define_native(bytes, ".decode", bytes_decode);

    let bytearray = vm.base.bytearray;
    vm.define_native(bytearray, "__new__", bytearray_new);
    vm.define_native(bytearray, ".decode", bytes_decode);
    vm.define_native(bytearray, ".append", bytearray_append);
}

fn byte_value(vm: &mut Vm, v: Value) -> VmResult<u8> {
    let i = arg_int(vm, "bytes", v)?;
    u8::try_from(i).map_err(|_| vm.runtime_error(ExcKind::ValueError, "bytes must be in range(0, 256)"))
}

/// 생성자 인자 하나를 바이트열로 바꿉니다.
fn to_bytes(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<Vec<u8>> {
    let args = ctor_args(args);
    check_args(vm, name, Arity::Range(0, 1), args)?;
    let Some(&v) = args.first() else { return Ok(Vec::new()) };
    if let Some(bytes) = vm.byte_slice(v) {
        return Ok(bytes);
    }
    if let Some(s) = vm.heap.value_str(v) {
        return Ok(s.as_bytes().to_vec());
    }
    match v {
        Value::None => Ok(Vec::new()),
        Value::Int(n) if n < 0 => Err(vm.runtime_error(ExcKind::ValueError, "negative count")),
        Value::Int(n) => Ok(vec![0; n as usize]),
        _ => {
            let items = vm.collect_iterable(v)?;
            items.into_iter().map(|item| byte_value(vm, item)).collect()
        }
    }
}

fn bytes_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let bytes = to_bytes(vm, "bytes", args)?;
    Ok(vm.new_bytes(bytes))
}

fn bytearray_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let bytes = to_bytes(vm, "bytearray", args)?;
    Ok(Value::Object(vm.heap.alloc(ObjKind::ByteArray(bytes))))
}

fn bytes_decode(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "decode", Arity::Range(1, 2), args)?;
    let Some(bytes) = vm.byte_slice(args[0]) else {
        return Err(super::type_error(vm, "decode", "bytes", args[0]));
    };
    if let Some(&encoding) = args.get(1) {
        let encoding = arg_str(vm, "decode", encoding)?;
        if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(vm.runtime_error(ExcKind::ValueError, format!("unknown encoding: {}", encoding)));
        }
    }
    match String::from_utf8(bytes) {
        Ok(text) => Ok(vm.new_string(&text)),
        Err(e) => Err(vm.runtime_error(
            ExcKind::ValueError,
            format!("'utf-8' codec can't decode byte at position {}", e.utf8_error().valid_up_to()),
        )),
    }
}

fn bytearray_append(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "append", Arity::Exact(2), args)?;
    let class = vm.base.bytearray;
    let this = receiver(vm, "append", args, class)?;
    let byte = byte_value(vm, args[1])?;
    if let Some(ObjKind::ByteArray(bytes)) = this.as_object().map(|r| vm.heap.kind_mut(r)) {
        bytes.push(byte);
    }
    Ok(Value::None)
}
