//! `object`, `type`, `module`

use super::check_args;
use crate::vm::machine::{ExcKind, Vm, VmResult};
use crate::vm::object::ObjKind;
use crate::vm::type_def::{Arity, Name};
use crate::vm::value::{ObjRef, Value};

pub(super) fn register(vm: &mut Vm) {
    let object = vm.base.object;
    vm.define_native(object, ".__init__", object_init);
    vm.define_native(object, ".__repr__", object_repr);
    vm.define_native(object, ".__str__", object_str);
    vm.define_native(object, ":__class__", object_class);
    vm.define_native(object, ".__dir__", object_dir);

    let type_ = vm.base.type_;
    vm.define_native(type_, "__new__", type_new);
    vm.define_native(type_, ":__name__", type_name);
    vm.define_native(type_, ":__base__", type_base);
    vm.define_native(type_, ":__file__", type_file);
    vm.define_native(type_, ":__doc__", type_doc);
    vm.define_native(type_, ".__subclasses__", type_subclasses);

    let module = vm.base.module;
    vm.define_native(module, ".__repr__", module_repr);
}

// ========== object ==========

fn object_init(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    let has_kw = kwargs.is_some_and(|k| matches!(vm.heap.kind(k), ObjKind::Dict(t) if !t.is_empty()));
    if args.len() > 1 || has_kw {
        let name = args.first().map(|&v| vm.type_name(v)).unwrap_or_default();
        return Err(vm.runtime_error(ExcKind::TypeError, format!("{}() takes no arguments", name)));
    }
    Ok(Value::None)
}

fn object_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__repr__", Arity::Exact(1), args)?;
    let name = vm.type_name(args[0]);
    let text = match args[0].as_object() {
        Some(r) => format!("<{} object at 0x{:x}>", name, r.index()),
        None => format!("<{} object>", name),
    };
    Ok(vm.new_string(&text))
}

fn object_str(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__str__", Arity::Exact(1), args)?;
    let text = vm.repr_value(args[0])?;
    Ok(vm.new_string(&text))
}

fn object_class(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__class__", Arity::Exact(1), args)?;
    Ok(Value::Object(vm.type_of(args[0])))
}

/// 필드와 클래스 chain의 이름을 정렬해 돌려줍니다.
fn object_dir(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__dir__", Arity::Exact(1), args)?;
    let names = attribute_names(vm, args[0]);
    let items = names.iter().map(|n| vm.new_string(n)).collect();
    Ok(vm.new_list(items))
}

pub(super) fn attribute_names(vm: &Vm, v: Value) -> Vec<String> {
    let mut names = Vec::new();
    let mut collect = |table: &crate::vm::table::Table| {
        names.extend(table.iter().filter_map(|e| vm.heap.value_str(e.key)).map(str::to_string));
    };
    let mut class = Some(vm.type_of(v));
    if let Some(r) = v.as_object() {
        match vm.heap.kind(r) {
            ObjKind::Instance(instance) => collect(&instance.fields),
            ObjKind::Class(_) => class = Some(r),
            _ => {}
        }
    }
    while let Some(c) = class {
        let ObjKind::Class(obj) = vm.heap.kind(c) else { break };
        collect(&obj.methods);
        class = obj.base;
    }
    names.sort();
    names.dedup();
    names
}

// ========== type ==========

/// `type(v)`: 값의 클래스
fn type_new(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    // args[0]은 type 자신
    if args.len() != 2 {
        return Err(vm.runtime_error(ExcKind::TypeError, "type() takes 1 argument"));
    }
    Ok(Value::Object(vm.type_of(args[1])))
}

fn class_arg(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<ObjRef> {
    check_args(vm, name, Arity::Exact(1), args)?;
    match args[0].as_object().filter(|_| vm.is_class(args[0])) {
        Some(class) => Ok(class),
        None => Err(super::type_error(vm, name, "type", args[0])),
    }
}

fn type_name(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let class = class_arg(vm, "__name__", args)?;
    match vm.heap.kind(class) {
        ObjKind::Class(c) => Ok(Value::Object(c.name)),
        _ => Ok(Value::None),
    }
}

fn type_base(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let class = class_arg(vm, "__base__", args)?;
    Ok(vm.class_base(class).map(Value::Object).unwrap_or(Value::None))
}

fn type_file(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let class = class_arg(vm, "__file__", args)?;
    match vm.heap.kind(class) {
        ObjKind::Class(c) => Ok(c.filename.map(Value::Object).unwrap_or(Value::None)),
        _ => Ok(Value::None),
    }
}

fn type_doc(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let class = class_arg(vm, "__doc__", args)?;
    match vm.heap.kind(class) {
        ObjKind::Class(c) => Ok(c.docstring.map(Value::Object).unwrap_or(Value::None)),
        _ => Ok(Value::None),
    }
}

fn type_subclasses(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let class = class_arg(vm, "__subclasses__", args)?;
    let items = match vm.heap.kind(class) {
        ObjKind::Class(c) => c.subclasses.iter().map(|e| e.key).collect(),
        _ => Vec::new(),
    };
    Ok(vm.new_list(items))
}

// ========== module ==========

fn module_repr(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__repr__", Arity::Exact(1), args)?;
    let module = args[0];
    let field = |vm: &Vm, name: Name| {
        module
            .as_object()
            .and_then(|m| vm.get_field(m, vm.name(name)))
            .and_then(|v| vm.string_of(v))
    };
    let name = field(vm, Name::DunderName).unwrap_or_else(|| "?".to_string());
    let text = match field(vm, Name::File) {
        Some(file) => format!("<module '{}' from '{}'>", name, file),
        None => format!("<module '{}' (built-in)>", name),
    };
    Ok(vm.new_string(&text))
}
