//! 스레드별 실행 상태: 값 스택, 호출 프레임, 열린 upvalue, 현재 예외

use std::sync::Arc;

use crate::vm::value::{ObjRef, Value};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// `current_exception`이 전파 중
        const HAS_EXCEPTION = 1 << 0;
        /// 인터럽트 요청됨; 다음 safe point에서 KeyboardInterrupt
        const SIGNALLED     = 1 << 1;
    }
}

/// 진행 중인 호출 하나
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub closure: ObjRef,
    pub code: ObjRef,
    pub bytecode: Arc<[u8]>,
    pub ip: usize,
    /// 지역 변수 시작 위치
    pub slots: usize,
    /// 반환 시 스택을 이 높이로 되돌림
    pub out_slots: usize,
    /// 전역 이름 공간 (모듈 인스턴스)
    pub globals: ObjRef,
    /// 제너레이터를 재개한 프레임이면 그 제너레이터
    pub generator: Option<ObjRef>,
}

#[derive(Debug)]
pub struct ThreadState {
    pub id: u32,
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// 슬롯 오름차순
    pub open_upvalues: Vec<ObjRef>,
    pub current_exception: Value,
    pub flags: ThreadFlags,
    /// 이 깊이 아래로 프레임이 내려가면 디스패치 루프가 호출자(네이티브)로 돌아감
    pub exit_on_frame: usize,
    /// 네이티브 코드가 관리 코드 호출 중 임시 값을 루팅하는 곳
    pub scratch: Vec<Value>,
    /// `Thread.join`이 요청한 대기 대상
    pub pending_join: Option<u32>,
    /// 네이티브 → 관리 코드 재진입 깊이. 0일 때만 GIL을 양보합니다.
    pub nesting: usize,
    /// 실행 중인 최상위 모듈
    pub module: Option<ObjRef>,
    /// 마지막 GIL 양보 이후 실행한 명령 수
    pub ticks: u32,
}

impl ThreadState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            open_upvalues: Vec::new(),
            current_exception: Value::None,
            flags: ThreadFlags::empty(),
            exit_on_frame: 0,
            scratch: Vec::new(),
            pending_join: None,
            nesting: 0,
            module: None,
            ticks: 0,
        }
    }

    pub fn has_exception(&self) -> bool {
        self.flags.contains(ThreadFlags::HAS_EXCEPTION)
    }

    /// GC 루트가 되는 값들
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.stack
            .iter()
            .copied()
            .chain(self.scratch.iter().copied())
            .chain(std::iter::once(self.current_exception))
            .chain(self.module.map(Value::Object))
            .chain(self.open_upvalues.iter().map(|&r| Value::Object(r)))
            .chain(self.frames.iter().flat_map(|f| {
                [
                    Value::Object(f.closure),
                    Value::Object(f.code),
                    Value::Object(f.globals),
                ]
                .into_iter()
                .chain(f.generator.map(Value::Object))
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_include_stack_scratch_and_exception() {
        let mut ts = ThreadState::new(0);
        ts.stack.push(Value::Object(ObjRef::new(1)));
        ts.scratch.push(Value::Object(ObjRef::new(2)));
        ts.current_exception = Value::Object(ObjRef::new(3));
        let roots: Vec<Value> = ts.roots().collect();
        for i in 1..=3 {
            assert!(roots.contains(&Value::Object(ObjRef::new(i))));
        }
    }
}
