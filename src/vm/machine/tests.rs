//! VM 테스트 모듈
//!
//! 컴파일러를 거치지 않고 손으로 조립한 바이트코드를 실행합니다.

use super::*;
use crate::runtime_io::BufferIo;
use crate::vm::bytecode::{Constant, FunctionProto, OpCode};

fn new_vm() -> Vm {
    Vm::with_io(VmConfig::default(), Box::new(BufferIo::new()))
}

/// 작은 어셈블러: 줄 번호는 모두 1
struct Asm {
    proto: FunctionProto,
}

impl Asm {
    fn new(name: &str) -> Self {
        Self {
            proto: FunctionProto::new(name, "<asm>"),
        }
    }

    fn op(mut self, op: OpCode) -> Self {
        self.proto.write_op(op, 1);
        self
    }

    fn arg(mut self, op: OpCode, arg: usize) -> Self {
        self.proto.write_arg(op, arg, 1);
        self
    }

    fn name(mut self, op: OpCode, name: &str) -> Self {
        let index = self.proto.add_constant(Constant::Str(name.to_string()));
        self.proto.write_arg(op, index, 1);
        self
    }

    fn constant(mut self, constant: Constant) -> Self {
        let index = self.proto.add_constant(constant);
        self.proto.write_arg(OpCode::Constant, index, 1);
        self
    }

    fn closure(mut self, inner: FunctionProto, upvalues: &[(bool, u16)]) -> Self {
        let index = self.proto.add_constant(Constant::Code(Box::new(inner)));
        self.proto.write_arg(OpCode::MakeClosure, index, 1);
        for &(is_local, slot) in upvalues {
            self.proto.write_byte(is_local as u8, 1);
            self.proto.write_byte((slot >> 8) as u8, 1);
            self.proto.write_byte(slot as u8, 1);
        }
        self
    }

    fn jump(&mut self, op: OpCode) -> usize {
        self.proto.write_jump(op, 1)
    }

    fn patch(&mut self, at: usize) {
        self.proto.patch_jump(at).unwrap();
    }

    /// `result` 전역에 top을 저장하고 모듈을 끝냅니다.
    fn store_result(self) -> FunctionProto {
        self.name(OpCode::SetGlobal, "result")
            .op(OpCode::Pop)
            .op(OpCode::None)
            .op(OpCode::Return)
            .proto
    }
}

fn run(vm: &mut Vm, proto: &FunctionProto) -> VmResult<Value> {
    vm.run_proto_as(proto, "__main__", |_, _| {})
}

fn global(vm: &mut Vm, module: Value, name: &str) -> Value {
    let key = vm.intern(name);
    let module = module.as_object().unwrap();
    vm.get_field(module, key).unwrap_or_else(|| panic!("no global {}", name))
}

fn run_result(proto: FunctionProto) -> (Vm, Value) {
    let mut vm = new_vm();
    let module = run(&mut vm, &proto).unwrap_or_else(|e| panic!("run failed: {}", e));
    let result = global(&mut vm, module, "result");
    (vm, result)
}

// ========== 스택 연산 테스트 ==========

#[test]
fn test_stack_push_pop_peek() {
    let mut vm = new_vm();
    vm.push(Value::Int(1)).unwrap();
    vm.push(Value::Int(2)).unwrap();
    assert_eq!(vm.peek(0).unwrap(), Value::Int(2));
    assert_eq!(vm.peek(1).unwrap(), Value::Int(1));
    assert_eq!(vm.pop().unwrap(), Value::Int(2));
    assert_eq!(vm.pop().unwrap(), Value::Int(1));
    assert!(matches!(vm.pop(), Err(VmError::Fatal(_))));
}

#[test]
fn test_stack_limit_is_fatal() {
    let mut vm = new_vm();
    vm.ts.stack.clear();
    vm.config.max_stack = 2;
    vm.push(Value::Int(1)).unwrap();
    vm.push(Value::Int(2)).unwrap();
    assert!(matches!(vm.push(Value::Int(3)), Err(VmError::Fatal(_))));
}

// ========== 명령어별 단위 테스트 ==========

#[test]
fn test_arithmetic() {
    let proto = Asm::new("<module>")
        .arg(OpCode::PushInt, 6)
        .arg(OpCode::PushInt, 7)
        .op(OpCode::Mul)
        .arg(OpCode::PushInt, 2)
        .op(OpCode::Sub)
        .store_result();
    let (_, result) = run_result(proto);
    assert_eq!(result, Value::Int(40));
}

#[test]
fn test_extended_arg_constant() {
    let mut asm = Asm::new("<module>");
    for i in 0..300 {
        asm.proto.add_constant(Constant::Int(i * 10));
    }
    let proto = asm.arg(OpCode::Constant, 299).store_result();
    let (_, result) = run_result(proto);
    assert_eq!(result, Value::Int(2990));
}

#[test]
fn test_conditional_jump() {
    let mut asm = Asm::new("<module>").op(OpCode::False);
    let otherwise = asm.jump(OpCode::PopJumpIfFalse);
    let mut asm = asm.arg(OpCode::PushInt, 1);
    let end = asm.jump(OpCode::Jump);
    asm.patch(otherwise);
    let mut asm = asm.arg(OpCode::PushInt, 2);
    asm.patch(end);
    let (_, result) = run_result(asm.store_result());
    assert_eq!(result, Value::Int(2));
}

#[test]
fn test_stack_shuffles() {
    // [1, 2, 3] -ROT3-> [3, 1, 2] -SWAP-> [3, 2, 1]; 2 - 1 = 1, 3 - 1 = 2
    let proto = Asm::new("<module>")
        .arg(OpCode::PushInt, 1)
        .arg(OpCode::PushInt, 2)
        .arg(OpCode::PushInt, 3)
        .op(OpCode::Rot3)
        .op(OpCode::Swap)
        .op(OpCode::Sub)
        .op(OpCode::Sub)
        .store_result();
    let (_, result) = run_result(proto);
    assert_eq!(result, Value::Int(2));
}

#[test]
fn test_unpack_puts_first_item_on_top() {
    let proto = Asm::new("<module>")
        .arg(OpCode::PushInt, 1)
        .arg(OpCode::PushInt, 2)
        .arg(OpCode::BuildTuple, 2)
        .arg(OpCode::Unpack, 2)
        .name(OpCode::SetGlobal, "a")
        .op(OpCode::Pop)
        .store_result();
    let mut vm = new_vm();
    let module = run(&mut vm, &proto).unwrap();
    assert_eq!(global(&mut vm, module, "a"), Value::Int(1));
    assert_eq!(global(&mut vm, module, "result"), Value::Int(2));
}

#[test]
fn test_unpack_length_mismatch() {
    let proto = Asm::new("<module>")
        .arg(OpCode::PushInt, 1)
        .arg(OpCode::BuildList, 1)
        .arg(OpCode::Unpack, 2)
        .store_result();
    let mut vm = new_vm();
    assert!(matches!(run(&mut vm, &proto), Err(VmError::Raised)));
    let exception = vm.ts.current_exception;
    assert_eq!(vm.type_name(exception), "ValueError");
}

// ========== 함수와 클로저 ==========

#[test]
fn test_closure_outlives_its_frame() {
    // def outer(): x = 7; def inner(): return x; return inner
    let inner = {
        let mut p = Asm::new("inner").arg(OpCode::GetUpvalue, 0).op(OpCode::Return).proto;
        p.upvalue_count = 1;
        p
    };
    let outer = {
        let mut p = Asm::new("outer")
            .arg(OpCode::PushInt, 7)
            .arg(OpCode::SetLocal, 0)
            .op(OpCode::Pop)
            .closure(inner, &[(true, 0)])
            .op(OpCode::Return)
            .proto;
        p.local_count = 1;
        p
    };
    let proto = Asm::new("<module>")
        .closure(outer, &[])
        .arg(OpCode::Call, 0)
        .arg(OpCode::Call, 0)
        .store_result();
    let (_, result) = run_result(proto);
    assert_eq!(result, Value::Int(7));
}

#[test]
fn test_call_arity_error() {
    let mut f = Asm::new("f").arg(OpCode::GetLocal, 0).op(OpCode::Return).proto;
    f.required_args = 1;
    f.local_count = 1;
    f.arg_names = vec!["a".to_string()];
    let proto = Asm::new("<module>").closure(f, &[]).arg(OpCode::Call, 0).store_result();
    let mut vm = new_vm();
    assert!(matches!(run(&mut vm, &proto), Err(VmError::Raised)));
    let exception = vm.ts.current_exception;
    assert_eq!(
        vm.exception_summary(exception),
        "ArgumentError: f() takes exactly 1 argument (0 given)"
    );
}

#[test]
fn test_runaway_recursion_raises() {
    // def f(): return f()
    let f = Asm::new("f")
        .name(OpCode::GetGlobal, "f")
        .arg(OpCode::Call, 0)
        .op(OpCode::Return)
        .proto;
    let proto = Asm::new("<module>")
        .closure(f, &[])
        .name(OpCode::SetGlobal, "f")
        .arg(OpCode::Call, 0)
        .store_result();
    let mut vm = new_vm();
    assert!(matches!(run(&mut vm, &proto), Err(VmError::Raised)));
    let exception = vm.ts.current_exception;
    assert_eq!(vm.exception_summary(exception), "Exception: Too many call frames.");
}

// ========== 예외 ==========

#[test]
fn test_try_catches_raised_exception() {
    let mut asm = Asm::new("<module>");
    let handler = asm.jump(OpCode::SetupTry);
    let mut asm = asm
        .name(OpCode::GetGlobal, "ValueError")
        .constant(Constant::Str("boom".into()))
        .arg(OpCode::Call, 1)
        .op(OpCode::Raise)
        .op(OpCode::PopTry);
    let end = asm.jump(OpCode::Jump);
    asm.patch(handler);
    // [handler, exception]
    let mut asm = asm.name(OpCode::SetGlobal, "result").op(OpCode::Pop).op(OpCode::PopTry);
    asm.patch(end);
    let proto = asm.op(OpCode::None).op(OpCode::Return).proto;

    let mut vm = new_vm();
    let module = run(&mut vm, &proto).unwrap();
    let exception = global(&mut vm, module, "result");
    assert_eq!(vm.exception_summary(exception), "ValueError: boom");
    assert!(!vm.ts.has_exception());
}

#[test]
fn test_uncaught_exception_propagates() {
    let proto = Asm::new("<module>")
        .arg(OpCode::PushInt, 1)
        .arg(OpCode::PushInt, 0)
        .op(OpCode::FloorDiv)
        .store_result();
    let mut vm = new_vm();
    assert!(matches!(run(&mut vm, &proto), Err(VmError::Raised)));
    assert!(vm.ts.has_exception());
    let exception = vm.ts.current_exception;
    assert_eq!(vm.type_name(exception), "ZeroDivisionError");
    let traceback = vm.format_traceback(exception);
    assert!(traceback.starts_with("Traceback (most recent call last):\n"));
    assert!(traceback.contains("File \"<asm>\", line 1, in <module>"));
}

#[test]
fn test_finally_runs_on_normal_exit() {
    let mut asm = Asm::new("<module>").arg(OpCode::PushInt, 1).name(OpCode::SetGlobal, "result").op(OpCode::Pop);
    let setup = asm.jump(OpCode::SetupFinally);
    let mut asm = asm.op(OpCode::BeginFinally);
    asm.patch(setup);
    let proto = asm
        .arg(OpCode::PushInt, 2)
        .name(OpCode::SetGlobal, "result")
        .op(OpCode::Pop)
        .op(OpCode::EndFinally)
        .op(OpCode::None)
        .op(OpCode::Return)
        .proto;
    let mut vm = new_vm();
    let module = run(&mut vm, &proto).unwrap();
    assert_eq!(global(&mut vm, module, "result"), Value::Int(2));
}

// ========== 전역 ==========

#[test]
fn test_undefined_global_is_name_error() {
    let proto = Asm::new("<module>").name(OpCode::GetGlobal, "missing").store_result();
    let mut vm = new_vm();
    assert!(matches!(run(&mut vm, &proto), Err(VmError::Raised)));
    let exception = vm.ts.current_exception;
    assert_eq!(vm.type_name(exception), "NameError");
}

#[test]
fn test_builtins_resolve_through_module() {
    let proto = Asm::new("<module>")
        .name(OpCode::GetGlobal, "len")
        .arg(OpCode::PushInt, 1)
        .arg(OpCode::PushInt, 2)
        .arg(OpCode::BuildList, 2)
        .arg(OpCode::Call, 1)
        .store_result();
    let (_, result) = run_result(proto);
    assert_eq!(result, Value::Int(2));
}

#[test]
fn test_truncated_code_is_fatal() {
    let mut proto = FunctionProto::new("<module>", "<asm>");
    proto.code.push(OpCode::PushInt as u8);
    let mut vm = new_vm();
    assert!(matches!(run(&mut vm, &proto), Err(VmError::Fatal(_))));
}

// ========== 재초기화 ==========

#[test]
fn test_reset_rebuilds_fresh_state() {
    let io = BufferIo::new();
    let mut vm = Vm::with_io(VmConfig::default(), Box::new(io.clone()));
    let proto = Asm::new("<module>").arg(OpCode::PushInt, 5).store_result();
    run(&mut vm, &proto).unwrap();
    let main = vm.intern("__main__");
    assert!(vm.table_get(&vm.modules, main).is_some());

    vm.reset();
    let main = vm.intern("__main__");
    assert!(vm.table_get(&vm.modules, main).is_none());
    assert!(!vm.ts.has_exception());
    assert!(vm.ts.frames.is_empty());

    // 내장 함수와 출력 스트림은 그대로 쓸 수 있어야 함
    let proto = Asm::new("<module>")
        .name(OpCode::GetGlobal, "print")
        .constant(Constant::Str("again".into()))
        .arg(OpCode::Call, 1)
        .store_result();
    let module = run(&mut vm, &proto).unwrap();
    assert_eq!(global(&mut vm, module, "result"), Value::None);
    assert_eq!(io.get_output(), "again\n");
}
