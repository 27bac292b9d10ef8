//! GC 루트 표시와 수집
//!
//! 루트:
//! - 모든 스레드(현재 + 대기 중)의 스택, 프레임, scratch, 현재 예외, 열린 upvalue
//! - 미리 인터닝한 이름, 기본 클래스, 예외 클래스
//! - builtins, 시스템 모듈, 모듈 캐시
//!
//! 인터닝 테이블은 루트가 아닙니다. 표시되지 않은 문자열은 sweep 전에 테이블에서 빠집니다.

use instant::Instant;

use super::{Vm, VmFlags};
use crate::vm::value::Value;

impl Vm {
    /// 한 번 수집하고 해제한 객체 수를 돌려줍니다.
    pub fn collect_garbage(&mut self) -> usize {
        let started = Instant::now();
        self.mark_roots();
        self.heap.trace_references();
        self.heap.remove_white_strings();
        let stats = self.heap.sweep();
        let elapsed = started.elapsed();

        tracing::debug!(
            target: "kuroko::gc",
            freed = stats.freed,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            next_gc = self.heap.next_gc,
            elapsed_us = elapsed.as_micros() as u64,
            "collection finished"
        );
        if self.config.flags.contains(VmFlags::REPORT_GC_COLLECTS) {
            let line = format!(
                "[gc] freed {} objects, {} -> {} bytes, next at {} ({:?})\n",
                stats.freed, stats.bytes_before, stats.bytes_after, self.heap.next_gc, elapsed
            );
            self.io.write_err(&line);
        }
        stats.freed
    }

    fn mark_roots(&mut self) {
        let mut roots: Vec<Value> = self.ts.roots().collect();
        for ts in self.parked.values() {
            roots.extend(ts.roots());
        }
        roots.extend(self.names.iter().map(|&r| Value::Object(r)));
        roots.extend(self.base.all().map(Value::Object));
        roots.extend(self.exceptions.iter().map(|&r| Value::Object(r)));
        roots.push(Value::Object(self.builtins));
        roots.push(Value::Object(self.system));
        for entry in self.modules.iter() {
            roots.push(entry.key);
            roots.push(entry.value);
        }
        for root in roots {
            self.heap.mark_value(root);
        }
    }
}
