//! `threading` 모듈
//!
//! 각 `Thread`는 OS 스레드 하나와 VM의 `ThreadState` 하나를 가집니다. 모든 실행은
//! GIL(`Mutex<Vm>`) 아래에서 이루어지고, 최상위 디스패치 루프가 일정 명령마다
//! 양보합니다. 실제 OS 스레드 구동은 `vm::threads`에 있습니다.

use super::{check_args, check_kwargs, kwarg, native_module};
use crate::vm::machine::{ExcKind, ThreadState, Vm, VmResult};
use crate::vm::object::{InstanceData, InstanceLayout, InstanceObj, NativeFn, ObjKind};
use crate::vm::type_def::{Arity, Name};
use crate::vm::value::{ObjRef, Value};

/// 스레드마다의 호스트 스택 크기
const THREAD_STACK_SIZE: usize = 8 << 20;

pub(super) fn register(vm: &mut Vm) {
    let module = native_module(vm, "threading");
    vm.define_native(module, "current_thread_id", current_thread_id);

    let object = vm.base.object;
    let thread = vm.make_class("Thread", Some(object));
    if let ObjKind::Class(class) = vm.heap.kind_mut(thread) {
        class.layout = InstanceLayout::Thread;
    }
    vm.base.thread = Some(thread);
    vm.define_native(thread, ".__init__", thread_init);
    vm.define_native(thread, ".run", thread_run);
    vm.define_native(thread, ".start", thread_start);
    vm.define_native(thread, ".join", thread_join);
    vm.define_native(thread, ".is_alive", thread_is_alive);
    vm.define_native(thread, ":tid", thread_tid);
    vm.attach(module, "Thread", Value::Object(thread));
}

fn current_thread_id(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "current_thread_id", Arity::Exact(0), args)?;
    Ok(Value::Int(vm.ts.id as i64))
}

/// receiver 인스턴스와 그 스레드 id
fn this(vm: &mut Vm, name: &str, args: &[Value]) -> VmResult<(ObjRef, Option<u32>)> {
    let found = args.first().and_then(Value::as_object).and_then(|r| match vm.heap.kind(r) {
        ObjKind::Instance(InstanceObj {
            data: InstanceData::Thread { tid },
            ..
        }) => Some((r, *tid)),
        _ => None,
    });
    match found {
        Some(found) => Ok(found),
        None => {
            let got = args.first().copied().unwrap_or(Value::None);
            Err(super::type_error(vm, name, "Thread", got))
        }
    }
}

/// `Thread(target=None, args=())`
fn thread_init(vm: &mut Vm, args: &[Value], kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "__init__", Arity::Range(1, 3), args)?;
    check_kwargs(vm, "Thread", kwargs, &["target", "args"])?;
    let (this, _) = this(vm, "__init__", args)?;
    let target = args.get(1).copied().or_else(|| kwarg(vm, kwargs, "target")).unwrap_or(Value::None);
    let call_args = match args.get(2).copied().or_else(|| kwarg(vm, kwargs, "args")) {
        Some(v) => {
            let items = vm.collect_iterable(v)?;
            vm.new_tuple(items)
        }
        None => vm.new_tuple(Vec::new()),
    };
    vm.set_field_str(this, "target", target);
    vm.set_field_str(this, "args", call_args);
    Ok(Value::None)
}

fn target_and_args(vm: &mut Vm, this: ObjRef) -> VmResult<(Value, Vec<Value>)> {
    let field = |vm: &mut Vm, name: &str| {
        let key = vm.intern(name);
        vm.get_field(this, key).unwrap_or(Value::None)
    };
    let target = field(vm, "target");
    let args = field(vm, "args");
    let args = if args.is_none() { Vec::new() } else { vm.collect_iterable(args)? };
    Ok((target, args))
}

/// 기본 `run`: `target(*args)`를 현재 스레드에서 실행합니다.
fn thread_run(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "run", Arity::Exact(1), args)?;
    let (this, _) = this(vm, "run", args)?;
    let (target, call_args) = target_and_args(vm, this)?;
    if target.is_none() {
        return Ok(Value::None);
    }
    vm.call_callable(target, &call_args)
}

/// 새 스레드의 진입 호출: 기본 `run`이면 target을 직접, 재정의했으면 바인딩된 `run`.
fn entry_point(vm: &mut Vm, this: ObjRef) -> VmResult<Vec<Value>> {
    let class = vm.type_of(Value::Object(this));
    let run = vm.class_lookup(class, vm.name(Name::Run));
    let default_run: NativeFn = thread_run;
    let is_default = run.and_then(|r| r.as_object()).is_some_and(|r| {
        matches!(vm.heap.kind(r), ObjKind::Native(n) if std::ptr::fn_addr_eq(n.function, default_run))
    });

    if is_default {
        let (target, mut call_args) = target_and_args(vm, this)?;
        if !target.is_none() {
            call_args.insert(0, target);
            return Ok(call_args);
        }
    }
    let run = vm.get_attribute(Value::Object(this), vm.name(Name::Run))?;
    Ok(vec![run])
}

fn thread_start(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "start", Arity::Exact(1), args)?;
    let (this, tid) = this(vm, "start", args)?;
    if tid.is_some() {
        return Err(vm.runtime_error(ExcKind::ValueError, "threads can only be started once"));
    }
    let Some(shared) = vm.shared.as_ref().and_then(|weak| weak.upgrade()) else {
        return Err(vm.runtime_error(
            ExcKind::Exception,
            "threads require the VM to be owned by an Interpreter",
        ));
    };

    let stack = entry_point(vm, this)?;
    let tid = vm.next_thread_id;
    vm.next_thread_id += 1;

    let mut state = ThreadState::new(tid);
    state.module = vm.ts.module;
    state.stack = stack;
    vm.parked.insert(tid, state);
    if let ObjKind::Instance(instance) = vm.heap.kind_mut(this) {
        instance.data = InstanceData::Thread { tid: Some(tid) };
    }

    let spawned = std::thread::Builder::new()
        .name(format!("kuroko-{}", tid))
        .stack_size(THREAD_STACK_SIZE)
        .spawn(move || crate::vm::threads::thread_main(shared, tid));
    match spawned {
        Ok(handle) => {
            tracing::debug!(target: "kuroko::thread", tid, "thread started");
            vm.thread_handles.insert(tid, handle);
            Ok(Value::None)
        }
        Err(e) => {
            vm.parked.remove(&tid);
            Err(vm.runtime_error(ExcKind::Exception, format!("failed to start thread: {}", e)))
        }
    }
}

/// 실제 대기는 디스패치 루프가 `Dispatch::Join`으로 호출자에게 넘깁니다.
fn thread_join(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "join", Arity::Exact(1), args)?;
    let (_, tid) = this(vm, "join", args)?;
    let Some(tid) = tid else {
        return Err(vm.runtime_error(ExcKind::Exception, "cannot join thread before it is started"));
    };
    if tid == vm.ts.id {
        return Err(vm.runtime_error(ExcKind::Exception, "cannot join current thread"));
    }
    if vm.ts.nesting > 0 {
        return Err(vm.runtime_error(
            ExcKind::Exception,
            "join() can not be called from inside a native callback",
        ));
    }
    vm.ts.pending_join = Some(tid);
    Ok(Value::None)
}

fn thread_is_alive(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    check_args(vm, "is_alive", Arity::Exact(1), args)?;
    let (_, tid) = this(vm, "is_alive", args)?;
    Ok(Value::Bool(tid.is_some_and(|t| vm.is_thread_alive(t))))
}

fn thread_tid(vm: &mut Vm, args: &[Value], _kwargs: Option<ObjRef>) -> VmResult<Value> {
    let (_, tid) = this(vm, "tid", args)?;
    Ok(tid.map(|t| Value::Int(t as i64)).unwrap_or(Value::None))
}
