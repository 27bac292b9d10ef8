//! 열린/닫힌 upvalue
//!
//! 스레드마다 열린 upvalue 목록을 슬롯 오름차순으로 유지합니다. 같은 슬롯을 캡처하는
//! 클로저들은 하나의 upvalue를 공유하고, 프레임이 반환되거나 블록이 끝나면
//! `close_upvalues`가 값을 upvalue 안으로 옮깁니다.
//!
//! 제너레이터가 `yield`하면 그 프레임의 upvalue는 닫히지 않고 제너레이터가 보관한
//! 스택 조각을 가리키도록 바뀌었다가(`Suspended`), 재개될 때 다시 열립니다.

use super::Vm;
use crate::vm::object::{ObjKind, UpvalueObj};
use crate::vm::value::{ObjRef, Value};

impl Vm {
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let position = self
            .ts
            .open_upvalues
            .partition_point(|&r| open_slot(self, r) < slot);
        if let Some(&existing) = self.ts.open_upvalues.get(position) {
            if open_slot(self, existing) == slot {
                return existing;
            }
        }
        let upvalue = self.heap.alloc(ObjKind::Upvalue(UpvalueObj::Open {
            thread: self.ts.id,
            slot,
        }));
        self.ts.open_upvalues.insert(position, upvalue);
        upvalue
    }

    /// `from` 이상의 슬롯을 가리키는 열린 upvalue를 모두 닫습니다.
    pub(super) fn close_upvalues(&mut self, from: usize) {
        while let Some(&last) = self.ts.open_upvalues.last() {
            let slot = open_slot(self, last);
            if slot < from {
                break;
            }
            let value = self.ts.stack.get(slot).copied().unwrap_or(Value::None);
            if let ObjKind::Upvalue(upvalue) = self.heap.kind_mut(last) {
                *upvalue = UpvalueObj::Closed(value);
            }
            self.ts.open_upvalues.pop();
        }
    }

    /// `from` 이상의 열린 upvalue를 `generator`의 스택 조각으로 옮깁니다.
    pub(super) fn suspend_upvalues(&mut self, from: usize, generator: ObjRef) -> Vec<ObjRef> {
        let position = self
            .ts
            .open_upvalues
            .partition_point(|&r| open_slot(self, r) < from);
        let moved = self.ts.open_upvalues.split_off(position);
        for &upvalue in &moved {
            if let ObjKind::Upvalue(state) = self.heap.kind_mut(upvalue) {
                if let UpvalueObj::Open { slot, .. } = *state {
                    *state = UpvalueObj::Suspended { generator, slot: slot - from };
                }
            }
        }
        moved
    }

    /// 재개된 제너레이터의 upvalue를 `base`부터 다시 엽니다.
    pub(super) fn reopen_upvalues(&mut self, upvalues: Vec<ObjRef>, base: usize) {
        for upvalue in upvalues {
            let thread = self.ts.id;
            if let ObjKind::Upvalue(state) = self.heap.kind_mut(upvalue) {
                if let UpvalueObj::Suspended { slot, .. } = *state {
                    *state = UpvalueObj::Open { thread, slot: base + slot };
                }
            }
            self.ts.open_upvalues.push(upvalue);
        }
    }

    pub(super) fn upvalue_get(&self, upvalue: ObjRef) -> Value {
        match self.heap.kind(upvalue) {
            ObjKind::Upvalue(UpvalueObj::Closed(v)) => *v,
            ObjKind::Upvalue(UpvalueObj::Suspended { generator, slot }) => match self.heap.kind(*generator) {
                ObjKind::Generator(g) => g.stack.get(*slot).copied().unwrap_or(Value::None),
                _ => Value::None,
            },
            ObjKind::Upvalue(UpvalueObj::Open { thread, slot }) => self.thread_stack(*thread).get(*slot).copied().unwrap_or(Value::None),
            _ => Value::None,
        }
    }

    pub(super) fn upvalue_set(&mut self, upvalue: ObjRef, value: Value) {
        let open = match self.heap.kind_mut(upvalue) {
            ObjKind::Upvalue(UpvalueObj::Closed(v)) => {
                *v = value;
                return;
            }
            ObjKind::Upvalue(UpvalueObj::Open { thread, slot }) => (*thread, *slot),
            ObjKind::Upvalue(UpvalueObj::Suspended { generator, slot }) => {
                let (generator, slot) = (*generator, *slot);
                if let ObjKind::Generator(g) = self.heap.kind_mut(generator) {
                    if let Some(cell) = g.stack.get_mut(slot) {
                        *cell = value;
                    }
                }
                return;
            }
            _ => return,
        };
        let (thread, slot) = open;
        let stack = if thread == self.ts.id {
            Some(&mut self.ts.stack)
        } else {
            self.parked.get_mut(&thread).map(|ts| &mut ts.stack)
        };
        if let Some(cell) = stack.and_then(|s| s.get_mut(slot)) {
            *cell = value;
        }
    }

    /// 스레드 `thread`의 값 스택 (현재 또는 대기 중)
    fn thread_stack(&self, thread: u32) -> &[Value] {
        if thread == self.ts.id {
            &self.ts.stack
        } else {
            self.parked.get(&thread).map(|ts| ts.stack.as_slice()).unwrap_or(&[])
        }
    }
}

fn open_slot(vm: &Vm, upvalue: ObjRef) -> usize {
    match vm.heap.kind(upvalue) {
        ObjKind::Upvalue(UpvalueObj::Open { slot, .. }) => *slot,
        _ => usize::MAX,
    }
}
