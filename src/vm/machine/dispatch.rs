use std::sync::atomic::Ordering;

use super::exceptions::ExcKind;
use super::thread::ThreadFlags;
use super::{Vm, VmError, VmResult, fatal};
use crate::vm::bytecode::{OpCode, Operand};
use crate::vm::object::{ClassObj, ClosureObj, ObjKind};
use crate::vm::type_def::ObjFlags;
use crate::vm::value::{Handler, HandlerKind, KWARGS_SINGLE, ObjRef, Value};

/// 최상위 디스패치에서 다른 스레드에게 GIL을 넘기기까지의 명령 수
pub const GIL_SWITCH_INTERVAL: u32 = 1000;

/// 디스패치 루프가 호출자에게 돌아가는 이유
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    /// `exit_on_frame`까지의 프레임이 모두 반환됨
    Return(Value),
    /// 다른 스레드에게 GIL을 양보해야 함. 상태는 그대로이며 `run`으로 재개.
    Suspend,
    /// `Thread.join`이 다른 스레드의 종료를 기다려야 함
    Join(u32),
}

/// 이항 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl Vm {
    /// 현재 스레드를 `exit_on_frame`까지 실행합니다.
    pub fn run(&mut self) -> VmResult<Dispatch> {
        loop {
            // ===== safe point =====
            if self.interrupt.swap(false, Ordering::Relaxed) {
                self.ts.flags.insert(ThreadFlags::SIGNALLED);
            }
            let step = if self.ts.flags.contains(ThreadFlags::SIGNALLED) {
                self.ts.flags.remove(ThreadFlags::SIGNALLED);
                Err(self.runtime_error(ExcKind::KeyboardInterrupt, ""))
            } else {
                if self.heap.should_collect() {
                    self.collect_garbage();
                }
                if self.ts.nesting == 0 && self.has_other_threads() {
                    self.ts.ticks += 1;
                    if self.ts.ticks >= GIL_SWITCH_INTERVAL {
                        self.ts.ticks = 0;
                        return Ok(Dispatch::Suspend);
                    }
                }
                self.step()
            };

            match step {
                Ok(None) => {}
                Ok(Some(dispatch)) => return Ok(dispatch),
                Err(VmError::Raised) => {
                    if !self.handle_exception() {
                        return Err(VmError::Raised);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ========== 디코딩 ==========

    pub(super) fn read_byte(&mut self) -> VmResult<u8> {
        let frame = self.ts.frames.last_mut().ok_or_else(|| fatal("no active frame"))?;
        let byte = *frame
            .bytecode
            .get(frame.ip)
            .ok_or_else(|| fatal("instruction pointer out of range"))?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_short(&mut self) -> VmResult<u16> {
        let hi = self.read_byte()? as u16;
        let lo = self.read_byte()? as u16;
        Ok((hi << 8) | lo)
    }

    fn decode(&mut self) -> VmResult<(OpCode, usize)> {
        let mut ext = 0usize;
        loop {
            let byte = self.read_byte()?;
            let op = OpCode::from_repr(byte).ok_or_else(|| fatal(format!("invalid opcode {}", byte)))?;
            match op.operand() {
                Operand::None => return Ok((op, 0)),
                Operand::Byte => return Ok((op, (ext << 8) | self.read_byte()? as usize)),
                Operand::Jump => return Ok((op, self.read_short()? as usize)),
                Operand::Wide => ext = self.read_short()? as usize,
            }
        }
    }

    fn frame_ip(&self) -> usize {
        self.ts.frames.last().map(|f| f.ip).unwrap_or(0)
    }

    fn set_ip(&mut self, ip: usize) {
        if let Some(frame) = self.ts.frames.last_mut() {
            frame.ip = ip;
        }
    }

    fn frame_slots(&self) -> usize {
        self.ts.frames.last().map(|f| f.slots).unwrap_or(0)
    }

    pub(super) fn constant(&self, index: usize) -> VmResult<Value> {
        let frame = self.ts.frames.last().ok_or_else(|| fatal("no active frame"))?;
        match self.heap.kind(frame.code) {
            ObjKind::Code(code) => code
                .constants
                .get(index)
                .copied()
                .ok_or_else(|| fatal(format!("constant {} out of range", index))),
            _ => Err(fatal("frame without code object")),
        }
    }

    fn constant_name(&self, index: usize) -> VmResult<ObjRef> {
        self.constant(index)?
            .as_object()
            .ok_or_else(|| fatal("name constant is not a string"))
    }

    fn local_index(&self, slot: usize) -> VmResult<usize> {
        let index = self.frame_slots() + slot;
        if index < self.ts.stack.len() {
            Ok(index)
        } else {
            Err(fatal(format!("local slot {} out of range", slot)))
        }
    }

    // ========== 실행 ==========

    /// 명령 하나를 실행합니다. 디스패치 루프를 빠져나가야 하면 `Some`.
    fn step(&mut self) -> VmResult<Option<Dispatch>> {
        let start = self.frame_ip();
        let (op, arg) = self.decode()?;

        if self.config.flags.contains(super::VmFlags::TRACE_EXECUTION) {
            tracing::trace!(
                target: "kuroko::vm",
                offset = start,
                op = %op,
                arg,
                depth = self.ts.stack.len(),
                frames = self.ts.frames.len()
            );
        }

        match op {
            // ===== 상수 =====
            OpCode::Constant => {
                let v = self.constant(arg)?;
                self.push(v)?;
            }
            OpCode::PushInt => self.push(Value::Int(arg as i64))?,
            OpCode::None => self.push(Value::None)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,

            // ===== 스택 =====
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let v = self.peek(arg)?;
                self.push(v)?;
            }
            OpCode::Swap => {
                let len = self.ts.stack.len();
                if len < 2 {
                    return Err(fatal("stack underflow"));
                }
                self.ts.stack.swap(len - 1, len - 2);
            }
            OpCode::Rot3 => {
                // (x, y, z) -> (z, x, y)
                let z = self.pop()?;
                let len = self.ts.stack.len();
                if len < 2 {
                    return Err(fatal("stack underflow"));
                }
                self.ts.stack.insert(len - 2, z);
            }

            // ===== 지역/전역/upvalue =====
            OpCode::GetLocal => {
                let index = self.local_index(arg)?;
                let v = self.ts.stack[index];
                self.push(v)?;
            }
            OpCode::SetLocal => {
                let index = self.local_index(arg)?;
                self.ts.stack[index] = self.peek(0)?;
            }
            OpCode::GetGlobal => {
                let name = self.constant_name(arg)?;
                let v = self.get_global(name)?;
                self.push(v)?;
            }
            OpCode::SetGlobal => {
                let name = self.constant_name(arg)?;
                let v = self.peek(0)?;
                let globals = self.current_globals()?;
                self.set_field(globals, name, v);
            }
            OpCode::DelGlobal => {
                let name = self.constant_name(arg)?;
                let globals = self.current_globals()?;
                let hash = self.string_hash(name);
                let removed = match self.heap.kind_mut(globals) {
                    ObjKind::Instance(module) => module.fields.delete(Value::Object(name), hash),
                    _ => false,
                };
                if !removed {
                    let text = self.heap.str(name).unwrap_or("?").to_string();
                    return Err(self.runtime_error(
                        ExcKind::NameError,
                        format!("name '{}' is not defined", text),
                    ));
                }
            }
            OpCode::GetUpvalue => {
                let upvalue = self.frame_upvalue(arg)?;
                let v = self.upvalue_get(upvalue);
                self.push(v)?;
            }
            OpCode::SetUpvalue => {
                let upvalue = self.frame_upvalue(arg)?;
                let v = self.peek(0)?;
                self.upvalue_set(upvalue, v);
            }
            OpCode::CloseUpvalue => {
                let top = self.ts.stack.len().saturating_sub(1);
                self.close_upvalues(top);
                self.pop()?;
            }

            // ===== 속성 =====
            OpCode::GetAttr => {
                let name = self.constant_name(arg)?;
                let obj = self.peek(0)?;
                let v = self.get_attribute(obj, name)?;
                self.pop()?;
                self.push(v)?;
            }
            OpCode::SetAttr => {
                let name = self.constant_name(arg)?;
                let value = self.peek(0)?;
                let obj = self.peek(1)?;
                self.set_attribute(obj, name, value)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
                self.push(value)?;
            }
            OpCode::DelAttr => {
                let name = self.constant_name(arg)?;
                let obj = self.peek(0)?;
                self.del_attribute(obj, name)?;
                self.pop()?;
            }
            OpCode::GetSuper => {
                let name = self.constant_name(arg)?;
                let receiver = self.peek(0)?;
                let v = self.get_super(receiver, name)?;
                self.pop()?;
                self.push(v)?;
            }

            // ===== 첨자 =====
            OpCode::GetSubscript => {
                let key = self.peek(0)?;
                let obj = self.peek(1)?;
                let v = self.get_item(obj, key)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
                self.push(v)?;
            }
            OpCode::SetSubscript => {
                let value = self.peek(0)?;
                let key = self.peek(1)?;
                let obj = self.peek(2)?;
                self.set_item(obj, key, value)?;
                self.ts.stack.truncate(self.ts.stack.len() - 3);
                self.push(value)?;
            }
            OpCode::DelSubscript => {
                let key = self.peek(0)?;
                let obj = self.peek(1)?;
                self.del_item(obj, key)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
            }
            OpCode::BuildSlice => {
                let step = if arg == 3 { self.pop()? } else { Value::None };
                let stop = self.pop()?;
                let start = self.pop()?;
                let slice = self.new_slice(start, stop, step);
                self.push(slice)?;
            }

            // ===== 산술 =====
            OpCode::Add => self.binary(BinOp::Add)?,
            OpCode::Sub => self.binary(BinOp::Sub)?,
            OpCode::Mul => self.binary(BinOp::Mul)?,
            OpCode::Div => self.binary(BinOp::Div)?,
            OpCode::FloorDiv => self.binary(BinOp::FloorDiv)?,
            OpCode::Mod => self.binary(BinOp::Mod)?,
            OpCode::Pow => self.binary(BinOp::Pow)?,
            OpCode::BitAnd => self.binary(BinOp::BitAnd)?,
            OpCode::BitOr => self.binary(BinOp::BitOr)?,
            OpCode::BitXor => self.binary(BinOp::BitXor)?,
            OpCode::Shl => self.binary(BinOp::Shl)?,
            OpCode::Shr => self.binary(BinOp::Shr)?,
            OpCode::Negate | OpCode::Pos | OpCode::Invert => {
                let v = self.peek(0)?;
                let result = self.unary(op, v)?;
                self.pop()?;
                self.push(result)?;
            }
            OpCode::Not => {
                let v = self.peek(0)?;
                let truthy = self.is_truthy(v)?;
                self.pop()?;
                self.push(Value::Bool(!truthy))?;
            }

            // ===== 비교 =====
            OpCode::Equal => {
                let (a, b) = (self.peek(1)?, self.peek(0)?);
                let result = self.values_equal(a, b)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
                self.push(Value::Bool(result))?;
            }
            OpCode::Less | OpCode::Greater | OpCode::LessEqual | OpCode::GreaterEqual => {
                let (a, b) = (self.peek(1)?, self.peek(0)?);
                let result = self.compare(op, a, b)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
                self.push(result)?;
            }
            OpCode::Is => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a.same(&b)))?;
            }
            OpCode::In => {
                let (item, container) = (self.peek(1)?, self.peek(0)?);
                let result = self.contains(container, item)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
                self.push(Value::Bool(result))?;
            }

            // ===== 제어 =====
            OpCode::Jump => {
                let offset = arg as u16 as i16 as isize;
                let ip = self.frame_ip() as isize + offset;
                self.set_ip(ip as usize);
            }
            OpCode::JumpAbsolute => self.set_ip(arg),
            OpCode::JumpIfFalseOrPop | OpCode::JumpIfTrueOrPop => {
                let v = self.peek(0)?;
                let truthy = self.is_truthy(v)?;
                if truthy == (op == OpCode::JumpIfTrueOrPop) {
                    let ip = self.frame_ip() + arg;
                    self.set_ip(ip);
                } else {
                    self.pop()?;
                }
            }
            OpCode::PopJumpIfFalse | OpCode::PopJumpIfTrue => {
                let v = self.peek(0)?;
                let truthy = self.is_truthy(v)?;
                self.pop()?;
                if truthy == (op == OpCode::PopJumpIfTrue) {
                    let ip = self.frame_ip() + arg;
                    self.set_ip(ip);
                }
            }

            // ===== 호출 =====
            OpCode::Call | OpCode::CallKw => {
                let callee = self.peek(arg)?;
                self.call_value_kw(callee, arg, 1, op == OpCode::CallKw)?;
                if let Some(tid) = self.ts.pending_join.take() {
                    return Ok(Some(Dispatch::Join(tid)));
                }
            }
            OpCode::Kwargs => self.push(Value::Kwargs(arg as i64))?,
            OpCode::Expand => self.push(Value::Kwargs(KWARGS_SINGLE - arg as i64))?,

            // ===== 반복 =====
            OpCode::GetIter => {
                let v = self.peek(0)?;
                let iter = self.get_iter(v)?;
                self.pop()?;
                self.push(iter)?;
            }
            OpCode::ForIter => {
                let iter = self.peek(0)?;
                match self.iter_next(iter)? {
                    Some(v) => self.push(v)?,
                    None => {
                        let ip = self.frame_ip() + arg;
                        self.set_ip(ip);
                    }
                }
            }

            // ===== 예외 =====
            OpCode::SetupTry | OpCode::SetupFinally => {
                let kind = if op == OpCode::SetupTry {
                    HandlerKind::Try
                } else {
                    HandlerKind::Finally
                };
                let target = (self.frame_ip() + arg) as u32;
                self.push(Value::Handler(Handler { kind, target }))?;
            }
            OpCode::PopTry => match self.pop()? {
                Value::Handler(_) => {}
                _ => return Err(fatal("POP_TRY without handler")),
            },
            OpCode::BeginFinally => {
                match self.ts.stack.last_mut() {
                    Some(Value::Handler(handler)) => handler.kind = HandlerKind::FinallyNormal,
                    _ => return Err(fatal("BEGIN_FINALLY without handler")),
                }
                self.push(Value::None)?;
            }
            OpCode::EndFinally => return self.end_finally(),
            OpCode::Raise => {
                let v = self.peek(0)?;
                return Err(self.raise(v));
            }
            OpCode::FilterExcept => {
                let filter = self.pop()?;
                let exception = self.peek(0)?;
                let matched = self.exception_matches(exception, filter)?;
                self.push(Value::Bool(matched))?;
            }

            // ===== 클로저 =====
            OpCode::MakeClosure => self.make_closure(arg)?,

            // ===== 클래스 =====
            OpCode::Class => {
                let name = self.constant_name(arg)?;
                let class = self.heap.alloc(ObjKind::Class(Box::new(ClassObj::new(name))));
                let filename = self.current_code_filename();
                if let ObjKind::Class(c) = self.heap.kind_mut(class) {
                    c.filename = filename;
                }
                self.push(Value::Object(class))?;
            }
            OpCode::Inherit => {
                let base = self.peek(0)?;
                let class = self.peek(1)?.as_object().ok_or_else(|| fatal("INHERIT without class"))?;
                let Some(base_ref) = base.as_object().filter(|_| self.is_class(base)) else {
                    return Err(self.runtime_error(ExcKind::TypeError, "base class must be a class"));
                };
                if self.heap.flags(base_ref).contains(ObjFlags::NO_INHERIT) {
                    let name = self.class_name(base_ref);
                    return Err(self.runtime_error(
                        ExcKind::TypeError,
                        format!("'{}' cannot be subclassed", name),
                    ));
                }
                self.set_base(class, base_ref);
                self.pop()?;
            }
            OpCode::Method => {
                let name = self.constant_name(arg)?;
                let value = self.peek(0)?;
                let class = self.peek(1)?.as_object().ok_or_else(|| fatal("METHOD without class"))?;
                self.set_owner_class(value, class);
                self.set_method(class, name, value);
                self.pop()?;
            }
            OpCode::FinalizeClass => {
                let class = self.peek(0)?.as_object().ok_or_else(|| fatal("FINALIZE_CLASS without class"))?;
                if self.class_base(class).is_none() {
                    let object = self.base.object;
                    self.set_base(class, object);
                }
                self.finalize_class(class);
            }

            // ===== 컬렉션 =====
            OpCode::BuildList | OpCode::BuildTuple => {
                let len = self.ts.stack.len();
                if arg > len {
                    return Err(fatal("stack underflow"));
                }
                let items: Vec<Value> = self.ts.stack.drain(len - arg..).collect();
                let v = if op == OpCode::BuildList {
                    self.new_list(items)
                } else {
                    self.new_tuple(items)
                };
                self.push(v)?;
            }
            OpCode::BuildDict => {
                let dict = self.new_dict();
                self.push(Value::Object(dict))?;
                let top = self.ts.stack.len() - 1;
                if arg * 2 > top {
                    return Err(fatal("stack underflow"));
                }
                let base = top - arg * 2;
                for i in 0..arg {
                    let key = self.ts.stack[base + i * 2];
                    let value = self.ts.stack[base + i * 2 + 1];
                    self.dict_set(dict, key, value)?;
                }
                self.ts.stack.drain(base..top);
            }
            OpCode::ListAppend => {
                let value = self.pop()?;
                let index = self.local_index(arg)?;
                let target = self.ts.stack[index];
                match target.as_object().map(|r| (r, self.heap.kind(r))) {
                    Some((r, ObjKind::List(_))) => {
                        if let ObjKind::List(items) = self.heap.kind_mut(r) {
                            items.push(value);
                        }
                    }
                    _ => return Err(fatal("LIST_APPEND target is not a list")),
                }
            }
            OpCode::DictSet => {
                let value = self.peek(0)?;
                let key = self.peek(1)?;
                let index = self.local_index(arg)?;
                let dict = self.ts.stack[index]
                    .as_object()
                    .ok_or_else(|| fatal("DICT_SET target is not a dict"))?;
                self.dict_set(dict, key, value)?;
                self.ts.stack.truncate(self.ts.stack.len() - 2);
            }
            OpCode::Unpack => {
                let v = self.peek(0)?;
                let items = self.unpack(v, arg)?;
                self.pop()?;
                for item in items.into_iter().rev() {
                    self.push(item)?;
                }
            }

            // ===== 모듈 =====
            OpCode::ImportName => {
                let name = self.constant_name(arg)?;
                let path = self.heap.str(name).unwrap_or_default().to_string();
                let module = self.import_module(&path)?;
                self.push(module)?;
            }
            OpCode::ImportFrom => {
                let name = self.constant_name(arg)?;
                let module = self.peek(0)?;
                let v = self.import_from(module, name)?;
                self.push(v)?;
            }

            OpCode::Return => {
                let value = self.pop()?;
                return self.return_from_frame(value);
            }
            OpCode::Yield => {
                let value = self.pop()?;
                return self.yield_from_frame(value);
            }
            OpCode::ExtendedArg => return Err(fatal("dangling EXTENDED_ARG")),
        }
        Ok(None)
    }

    fn binary(&mut self, op: BinOp) -> VmResult<()> {
        let (a, b) = (self.peek(1)?, self.peek(0)?);
        let result = self.binary_op(op, a, b)?;
        self.ts.stack.truncate(self.ts.stack.len() - 2);
        self.push(result)
    }

    fn current_globals(&self) -> VmResult<ObjRef> {
        self.ts
            .frames
            .last()
            .map(|f| f.globals)
            .ok_or_else(|| fatal("no active frame"))
    }

    fn current_code_filename(&self) -> Option<ObjRef> {
        let frame = self.ts.frames.last()?;
        match self.heap.kind(frame.code) {
            ObjKind::Code(code) => Some(code.filename),
            _ => None,
        }
    }

    /// 프레임의 모듈, 그다음 builtins에서 찾습니다.
    fn get_global(&mut self, name: ObjRef) -> VmResult<Value> {
        let globals = self.current_globals()?;
        if let Some(v) = self.get_field(globals, name) {
            return Ok(v);
        }
        if let Some(v) = self.get_field(self.builtins, name) {
            return Ok(v);
        }
        let text = self.heap.str(name).unwrap_or("?").to_string();
        Err(self.runtime_error(ExcKind::NameError, format!("name '{}' is not defined", text)))
    }

    fn frame_upvalue(&self, index: usize) -> VmResult<ObjRef> {
        let frame = self.ts.frames.last().ok_or_else(|| fatal("no active frame"))?;
        match self.heap.kind(frame.closure) {
            ObjKind::Closure(closure) => closure
                .upvalues
                .get(index)
                .copied()
                .ok_or_else(|| fatal(format!("upvalue {} out of range", index))),
            _ => Err(fatal("frame without closure")),
        }
    }

    /// `MAKE_CLOSURE`: 코드 상수와 뒤따르는 upvalue 기술자로 클로저를 만듭니다.
    fn make_closure(&mut self, index: usize) -> VmResult<()> {
        let code = self.constant_name(index)?;
        let upvalue_count = match self.heap.kind(code) {
            ObjKind::Code(c) => c.upvalue_count as usize,
            _ => return Err(fatal("MAKE_CLOSURE operand is not a code object")),
        };
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte()? != 0;
            let index = self.read_short()? as usize;
            let upvalue = if is_local {
                let slot = self.local_index(index)?;
                self.capture_upvalue(slot)
            } else {
                self.frame_upvalue(index)?
            };
            upvalues.push(upvalue);
        }
        let globals = self.current_globals()?;
        let closure = self.heap.alloc(ObjKind::Closure(ClosureObj {
            code,
            upvalues,
            globals,
            owner_class: None,
        }));
        self.push(Value::Object(closure))
    }

    /// 클래스 본문에서 정의된 함수가 `super()`의 기준 클래스를 알 수 있게 합니다.
    fn set_owner_class(&mut self, value: Value, class: ObjRef) {
        let Some(r) = value.as_object() else { return };
        let target = match self.heap.kind(r) {
            ObjKind::Closure(_) => Some(r),
            ObjKind::Property(p) => p.getter.as_object(),
            _ => None,
        };
        if let Some(t) = target {
            if let ObjKind::Closure(closure) = self.heap.kind_mut(t) {
                if closure.owner_class.is_none() {
                    closure.owner_class = Some(class);
                }
            }
        }
    }

    /// `END_FINALLY`: finally 본문 진입 이유에 따라 계속, 재전파, 또는 반환합니다.
    fn end_finally(&mut self) -> VmResult<Option<Dispatch>> {
        let payload = self.pop()?;
        let kind = match self.pop()? {
            Value::Handler(handler) => handler.kind,
            _ => return Err(fatal("END_FINALLY without handler")),
        };
        match kind {
            HandlerKind::FinallyRaise => {
                self.set_exception(payload);
                Err(VmError::Raised)
            }
            HandlerKind::FinallyReturn => self.return_from_frame(payload),
            _ => Ok(None),
        }
    }
}
