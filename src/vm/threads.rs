//! # GIL과 스레드 구동
//!
//! VM 전체가 하나의 `Mutex<Vm>` 안에 있고, 이 잠금이 곧 전역 인터프리터 잠금(GIL)입니다.
//! 스레드마다 OS 스레드가 하나씩 있으며, 잠금을 가진 스레드만 `vm.ts`를 자기 상태로
//! 바꿔 넣고 실행합니다.
//!
//! - 최상위 디스패치(`nesting == 0`)는 일정 명령마다 `Dispatch::Suspend`로 돌아오고,
//!   [`drive`]가 잠금을 공정하게 넘겼다가 다시 받아 자기 상태로 복귀합니다.
//! - `Thread.join`은 `Dispatch::Join`으로 돌아오고, 잠금을 푼 채 OS 스레드를 기다립니다.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::runtime_io::RuntimeIo;
use crate::vm::bytecode::FunctionProto;
use crate::vm::machine::{CallOutcome, Dispatch, ThreadState, Vm, VmConfig, VmError, VmFlags, VmResult, fatal};
use crate::vm::type_def::Name;
use crate::vm::value::Value;
use crate::InterpretError;

/// 모듈 이름이 `__main__`인 최상위 실행
const MAIN_MODULE: &str = "__main__";

/// 종료된 스레드의 상태 자리에 들어가는 id
const FINISHED_THREAD: u32 = u32::MAX;

/// VM 하나를 소유하고 GIL 아래에서 코드를 실행하는 핸들
#[derive(Clone)]
pub struct Interpreter {
    vm: Arc<Mutex<Vm>>,
    interrupt: Arc<AtomicBool>,
}

impl Interpreter {
    pub fn new(config: VmConfig) -> Self {
        Self::from_vm(Vm::new(config))
    }

    pub fn with_io(config: VmConfig, io: Box<dyn RuntimeIo + Send>) -> Self {
        Self::from_vm(Vm::with_io(config, io))
    }

    fn from_vm(vm: Vm) -> Self {
        let vm = Arc::new(Mutex::new(vm));
        let interrupt = {
            let mut guard = vm.lock();
            guard.shared = Some(Arc::downgrade(&vm));
            guard.interrupt.clone()
        };
        Self { vm, interrupt }
    }

    /// 실행 중인 코드에 `KeyboardInterrupt`를 요청합니다. GIL 없이 아무 스레드에서나 부를 수 있습니다.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// GIL을 잡고 VM에 직접 접근합니다.
    pub fn lock(&self) -> MutexGuard<'_, Vm> {
        self.vm.lock()
    }

    /// 소스를 `__main__` 모듈로 실행합니다.
    pub fn run_source(&self, source: &str, filename: &str) -> Result<(), InterpretError> {
        let proto = crate::compile_source(source, filename).map_err(InterpretError::Compile)?;
        let mut vm = self.vm.lock();
        vm.sources.insert(filename.to_string(), Arc::from(source));
        if vm.flags().contains(VmFlags::DISASSEMBLE_ON_COMPILE) {
            let listing = crate::vm::disasm::disassemble(&proto);
            vm.io.write_err(&listing);
        }
        run_main(&mut vm, &proto)
    }

    /// 컴파일된 코드 객체를 `__main__` 모듈로 실행합니다.
    pub fn run_proto(&self, proto: &FunctionProto) -> Result<(), InterpretError> {
        let mut vm = self.vm.lock();
        run_main(&mut vm, proto)
    }

    /// 모듈 검색 경로에서 `dotted`를 찾아 `__main__`으로 실행합니다 (`-m`).
    pub fn run_module(&self, dotted: &str) -> Result<(), InterpretError> {
        let found = self.vm.lock().find_module_file(dotted);
        let Some((path, _)) = found else {
            return Err(InterpretError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No module named '{}'", dotted),
            )));
        };
        self.run_file(&path)
    }

    pub fn run_file(&self, path: &Path) -> Result<(), InterpretError> {
        let source = std::fs::read_to_string(path)?;
        self.run_source(&source, &path.to_string_lossy())
    }
}

/// 주 모듈을 실행하고, 남은 스레드가 모두 끝날 때까지 기다립니다.
fn run_main(vm: &mut MutexGuard<'_, Vm>, proto: &FunctionProto) -> Result<(), InterpretError> {
    let main_tid = vm.ts.id;
    let module = vm.start_module(MAIN_MODULE);
    let file = vm.new_string(&proto.filename);
    let key = vm.name(Name::File);
    vm.set_field(module, key, file);
    vm.register_module(MAIN_MODULE, module);

    let closure = vm.module_closure(proto, module);
    let result = call_and_drive(vm, closure);

    let outcome = match result {
        Ok(_) => Ok(()),
        Err(VmError::Raised) => {
            let exception = vm.ts.current_exception;
            vm.clear_exception();
            let text = vm.format_traceback(exception);
            vm.io.write_err(&format!("{}\n", text));
            vm.unwind_all();
            Err(InterpretError::Uncaught(text))
        }
        Err(VmError::Fatal(message)) => {
            vm.unwind_all();
            Err(InterpretError::Fatal(message))
        }
    };

    join_all(vm);
    vm.switch_to(main_tid);
    outcome
}

fn call_and_drive(vm: &mut MutexGuard<'_, Vm>, callee: Value) -> VmResult<Value> {
    vm.push(callee)?;
    match vm.call_value(callee, 0, 1)? {
        CallOutcome::Pushed => drive(vm),
        CallOutcome::Done => vm.pop(),
    }
}

/// 현재 스레드의 최상위 디스패치를 끝까지 실행합니다. 양보와 join은 여기서 처리됩니다.
pub(crate) fn drive(vm: &mut MutexGuard<'_, Vm>) -> VmResult<Value> {
    let tid = vm.ts.id;
    loop {
        match vm.run()? {
            Dispatch::Return(v) => return Ok(v),
            Dispatch::Suspend => {
                vm.thread_handles.retain(|_, handle| !handle.is_finished());
                tracing::trace!(target: "kuroko::thread", tid, "yielding GIL");
                MutexGuard::bump(vm);
                vm.switch_to(tid);
            }
            Dispatch::Join(target) => {
                if let Some(handle) = vm.thread_handles.remove(&target) {
                    tracing::debug!(target: "kuroko::thread", tid, joining = target, "waiting for thread");
                    MutexGuard::unlocked(vm, || {
                        let _ = handle.join();
                    });
                }
                vm.switch_to(tid);
            }
        }
    }
}

/// 남은 OS 스레드를 잠금 없이 기다립니다.
fn join_all(vm: &mut MutexGuard<'_, Vm>) {
    while let Some(&tid) = vm.thread_handles.keys().next() {
        if let Some(handle) = vm.thread_handles.remove(&tid) {
            MutexGuard::unlocked(vm, || {
                let _ = handle.join();
            });
        }
    }
}

/// `Thread.start`가 띄운 OS 스레드의 본체. 상태의 스택에는 `[callee, args...]`가 있습니다.
pub(crate) fn thread_main(shared: Arc<Mutex<Vm>>, tid: u32) {
    let mut vm = shared.lock();
    vm.switch_to(tid);
    tracing::debug!(target: "kuroko::thread", tid, "thread running");

    match run_entry(&mut vm) {
        Ok(_) => {}
        Err(VmError::Raised) => vm.dump_traceback(),
        Err(VmError::Fatal(message)) => {
            let line = format!("fatal error in thread {}: {}\n", tid, message);
            vm.io.write_err(&line);
        }
    }
    vm.unwind_all();
    tracing::debug!(target: "kuroko::thread", tid, "thread finished");
    vm.ts = ThreadState::new(FINISHED_THREAD);
}

fn run_entry(vm: &mut MutexGuard<'_, Vm>) -> VmResult<Value> {
    let callee = vm.ts.stack.first().copied().ok_or_else(|| fatal("thread without entry point"))?;
    let argc = vm.ts.stack.len() - 1;
    match vm.call_value(callee, argc, 1)? {
        CallOutcome::Pushed => drive(vm),
        CallOutcome::Done => vm.pop(),
    }
}
