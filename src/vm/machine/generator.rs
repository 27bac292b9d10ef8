//! 제너레이터: 중단된 프레임의 스택 조각과 ip를 보관했다가 다시 이어 실행합니다.
//! 그 프레임을 캡처한 upvalue도 함께 보관하므로 클로저와 제너레이터가 같은 변수를 봅니다.

use super::exceptions::ExcKind;
use super::thread::CallFrame;
use super::{Dispatch, Vm, VmResult, fatal};
use crate::vm::object::{GeneratorObj, GeneratorState, ObjKind, UpvalueObj};
use crate::vm::value::{ObjRef, Value};

impl Vm {
    /// 인자가 바인딩된 `stack[slots..]`을 가진 새 제너레이터
    pub(super) fn make_generator(&mut self, closure: ObjRef, slots: usize) -> ObjRef {
        let stack = self.ts.stack[slots..].to_vec();
        self.heap.alloc(ObjKind::Generator(Box::new(GeneratorObj {
            closure,
            stack,
            upvalues: Vec::new(),
            ip: 0,
            state: GeneratorState::Created,
            result: Value::None,
        })))
    }

    pub(super) fn finish_generator(&mut self, generator: ObjRef, result: Value) {
        let (stack, upvalues) = match self.heap.kind_mut(generator) {
            ObjKind::Generator(g) => {
                g.state = GeneratorState::Finished;
                g.result = result;
                (std::mem::take(&mut g.stack), std::mem::take(&mut g.upvalues))
            }
            _ => return,
        };
        for upvalue in upvalues {
            if let ObjKind::Upvalue(state) = self.heap.kind_mut(upvalue) {
                if let UpvalueObj::Suspended { slot, .. } = *state {
                    *state = UpvalueObj::Closed(stack.get(slot).copied().unwrap_or(Value::None));
                }
            }
        }
    }

    pub fn generator_state(&self, generator: ObjRef) -> Option<GeneratorState> {
        match self.heap.kind(generator) {
            ObjKind::Generator(g) => Some(g.state),
            _ => None,
        }
    }

    /// 다음 값까지 실행합니다. 끝났으면 제너레이터 자신을 돌려줍니다.
    pub fn resume_generator(&mut self, generator: ObjRef, sent: Value) -> VmResult<Value> {
        let (closure, stack, upvalues, ip, state) = match self.heap.kind_mut(generator) {
            ObjKind::Generator(g) => match g.state {
                GeneratorState::Finished => return Ok(Value::Object(generator)),
                GeneratorState::Running => (g.closure, Vec::new(), Vec::new(), 0, GeneratorState::Running),
                state => (
                    g.closure,
                    std::mem::take(&mut g.stack),
                    std::mem::take(&mut g.upvalues),
                    g.ip,
                    state,
                ),
            },
            _ => return Err(fatal("resume of non-generator")),
        };
        if state == GeneratorState::Running {
            return Err(self.runtime_error(ExcKind::ValueError, "generator already executing"));
        }
        if self.ts.frames.len() >= self.config.max_frames {
            if let ObjKind::Generator(g) = self.heap.kind_mut(generator) {
                g.stack = stack;
                g.upvalues = upvalues;
            }
            return Err(self.runtime_error(ExcKind::Exception, "Too many call frames."));
        }

        let (code, globals) = match self.heap.kind(closure) {
            ObjKind::Closure(c) => (c.code, c.globals),
            _ => return Err(fatal("generator without closure")),
        };
        let bytecode = match self.heap.kind(code) {
            ObjKind::Code(c) => c.bytecode.clone(),
            _ => return Err(fatal("closure without code object")),
        };

        let base = self.ts.stack.len();
        self.ts.stack.extend(stack);
        self.reopen_upvalues(upvalues, base);
        if state == GeneratorState::Suspended {
            self.push(sent)?;
        }
        if let ObjKind::Generator(g) = self.heap.kind_mut(generator) {
            g.state = GeneratorState::Running;
        }
        self.ts.frames.push(CallFrame {
            closure,
            code,
            bytecode,
            ip,
            slots: base,
            out_slots: base,
            globals,
            generator: Some(generator),
        });

        let result = self.run_next();
        if result.is_err() {
            self.finish_generator(generator, Value::None);
            self.ts.stack.truncate(base);
        }
        result
    }

    /// `YIELD`: 프레임의 스택 조각과 upvalue를 제너레이터로 옮기고 값을 재개한 쪽에 돌려줍니다.
    pub(super) fn yield_from_frame(&mut self, value: Value) -> VmResult<Option<Dispatch>> {
        let frame = self.ts.frames.pop().ok_or_else(|| fatal("no active frame"))?;
        let Some(generator) = frame.generator else {
            return Err(fatal("yield outside of a generator frame"));
        };
        let upvalues = self.suspend_upvalues(frame.slots, generator);
        let saved = self.ts.stack.split_off(frame.slots);
        if let ObjKind::Generator(g) = self.heap.kind_mut(generator) {
            g.stack = saved;
            g.upvalues = upvalues;
            g.ip = frame.ip;
            g.state = GeneratorState::Suspended;
        }
        self.ts.stack.truncate(frame.out_slots);
        if self.ts.frames.len() <= self.ts.exit_on_frame {
            return Ok(Some(Dispatch::Return(value)));
        }
        self.push(value)?;
        Ok(None)
    }
}
