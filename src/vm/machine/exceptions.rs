//! 예외 생성, 전파, traceback
//!
//! 예외는 항상 스레드의 `current_exception`에 놓이고 `HAS_EXCEPTION` 플래그가 섭니다.
//! Rust 쪽에서는 `VmError::Raised`가 "설정된 예외가 있음"을 뜻할 뿐이고, 실제 정보는
//! 예외 인스턴스(`arg`, `traceback` 필드)에 있습니다.

use strum::{EnumCount, EnumIter, IntoStaticStr};

use super::thread::ThreadFlags;
use super::{Vm, VmError, VmResult};
use crate::vm::object::ObjKind;
use crate::vm::type_def::Name;
use crate::vm::value::{Handler, HandlerKind, ObjRef, Value};

/// 내장 예외 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, IntoStaticStr)]
pub enum ExcKind {
    BaseException,
    Exception,
    TypeError,
    ArgumentError,
    IndexError,
    KeyError,
    AttributeError,
    NameError,
    ImportError,
    IOError,
    ValueError,
    KeyboardInterrupt,
    ZeroDivisionError,
    NotImplementedError,
    SyntaxError,
    AssertionError,
}

impl ExcKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn parent(self) -> Option<ExcKind> {
        match self {
            ExcKind::BaseException => None,
            ExcKind::Exception | ExcKind::KeyboardInterrupt => Some(ExcKind::BaseException),
            _ => Some(ExcKind::Exception),
        }
    }
}

impl Vm {
    /// `kind` 인스턴스를 만들어 현재 예외로 설정합니다.
    pub fn runtime_error(&mut self, kind: ExcKind, message: impl Into<String>) -> VmError {
        let class = self.exc(kind);
        let instance = self.new_instance(class);
        let message = message.into();
        let arg = self.new_string(&message);
        self.set_field(instance, self.name(Name::Arg), arg);
        self.set_exception(Value::Object(instance));
        VmError::Raised
    }

    pub fn set_exception(&mut self, exception: Value) {
        self.ts.current_exception = exception;
        self.ts.flags.insert(ThreadFlags::HAS_EXCEPTION);
    }

    pub fn clear_exception(&mut self) {
        self.ts.current_exception = Value::None;
        self.ts.flags.remove(ThreadFlags::HAS_EXCEPTION);
    }

    /// `raise v`: 클래스면 인스턴스화하고, 예외 인스턴스면 그대로 설정합니다.
    pub fn raise(&mut self, v: Value) -> VmError {
        let base = self.exc(ExcKind::BaseException);
        if let Some(class) = v.as_object().filter(|_| self.is_class(v)) {
            if self.is_subclass(class, base) {
                return match self.call_callable(v, &[]) {
                    Ok(instance) => {
                        self.set_exception(instance);
                        VmError::Raised
                    }
                    Err(e) => e,
                };
            }
        } else if self.is_instance(v, base) {
            self.set_exception(v);
            return VmError::Raised;
        }
        self.runtime_error(ExcKind::TypeError, "exceptions must derive from BaseException")
    }

    /// `except` 필터: 클래스 또는 클래스 튜플
    pub(super) fn exception_matches(&mut self, exception: Value, filter: Value) -> VmResult<bool> {
        if let Some(class) = filter.as_object().filter(|_| self.is_class(filter)) {
            return Ok(self.is_instance(exception, class));
        }
        let classes = match filter.as_object().map(|r| self.heap.kind(r)) {
            Some(ObjKind::Tuple(items)) => items.to_vec(),
            _ => {
                return Err(self.runtime_error(
                    ExcKind::TypeError,
                    "catching classes that do not inherit from BaseException is not allowed",
                ));
            }
        };
        for class in classes {
            if self.exception_matches(exception, class)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 현재 예외를 받을 핸들러를 찾습니다. `exit_on_frame`까지 프레임을 내려도 없으면 `false`.
    pub(super) fn handle_exception(&mut self) -> bool {
        loop {
            if self.ts.frames.len() <= self.ts.exit_on_frame || self.ts.frames.is_empty() {
                return false;
            }
            let (slots, code, ip) = match self.ts.frames.last() {
                Some(f) => (f.slots, f.code, f.ip),
                None => return false,
            };
            let depth = self.ts.frames.len();
            self.push_traceback(code, ip.saturating_sub(1), depth);

            let found = self.find_handler(slots, |kind| matches!(kind, HandlerKind::Try | HandlerKind::Finally));
            if let Some((index, target)) = found {
                let kind = match self.ts.stack[index] {
                    Value::Handler(Handler { kind: HandlerKind::Try, .. }) => HandlerKind::Except,
                    _ => HandlerKind::FinallyRaise,
                };
                self.close_upvalues(index + 1);
                self.ts.stack.truncate(index + 1);
                self.ts.stack[index] = Value::Handler(Handler { kind, target });
                let exception = self.ts.current_exception;
                self.ts.stack.push(exception);
                if let Some(frame) = self.ts.frames.last_mut() {
                    frame.ip = target as usize;
                }
                self.ts.flags.remove(ThreadFlags::HAS_EXCEPTION);
                return true;
            }

            self.close_upvalues(slots);
            if let Some(frame) = self.ts.frames.pop() {
                if let Some(generator) = frame.generator {
                    self.finish_generator(generator, Value::None);
                }
                self.ts.stack.truncate(frame.out_slots);
            }
        }
    }

    /// 예외가 지나가는 프레임 하나를 현재 예외의 traceback에 추가합니다.
    ///
    /// 항목은 `(code, offset, depth)`입니다. 마지막 항목이 이미 같은 깊이의 프레임이면
    /// 같은 프레임에서 다시 던져진 것이므로 처음 기록한 위치를 그대로 둡니다.
    fn push_traceback(&mut self, code: ObjRef, offset: usize, depth: usize) {
        let Some(exception) = self.ts.current_exception.as_object() else { return };
        if !matches!(self.heap.kind(exception), ObjKind::Instance(_)) {
            return;
        }
        let key = self.name(Name::Traceback);
        let list = match self.get_field(exception, key).and_then(|v| v.as_object()) {
            Some(list) if matches!(self.heap.kind(list), ObjKind::List(_)) => list,
            _ => {
                let list = self.heap.alloc(ObjKind::List(Vec::new()));
                self.set_field(exception, key, Value::Object(list));
                list
            }
        };
        let last_depth = match self.heap.kind(list) {
            ObjKind::List(items) => items.last().and_then(|e| e.as_object()).and_then(|r| match self.heap.kind(r) {
                ObjKind::Tuple(entry) => entry.get(2).and_then(|d| d.as_int()),
                _ => None,
            }),
            _ => None,
        };
        if last_depth == Some(depth as i64) {
            return;
        }
        let entry = self.new_tuple(vec![Value::Object(code), Value::Int(offset as i64), Value::Int(depth as i64)]);
        if let ObjKind::List(items) = self.heap.kind_mut(list) {
            items.push(entry);
        }
    }

    /// 사용자에게 보여줄 traceback 텍스트 (가장 최근 호출이 마지막)
    pub fn format_traceback(&mut self, exception: Value) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        let entries = exception
            .as_object()
            .and_then(|r| self.get_field(r, self.name(Name::Traceback)))
            .and_then(|v| v.as_object())
            .and_then(|r| match self.heap.kind(r) {
                ObjKind::List(items) => Some(items.clone()),
                _ => None,
            })
            .unwrap_or_default();

        for entry in entries.iter().rev() {
            let Some((code, offset)) = entry.as_object().and_then(|r| match self.heap.kind(r) {
                ObjKind::Tuple(entry) if entry.len() >= 2 => Some((entry[0], entry[1])),
                _ => None,
            }) else {
                continue;
            };
            let Some(ObjKind::Code(code)) = code.as_object().map(|r| self.heap.kind(r)) else {
                continue;
            };
            let line = code.line_for(offset.as_int().unwrap_or(0) as usize);
            let filename = self.heap.str(code.filename).unwrap_or("?").to_string();
            let name = self.heap.str(code.name).unwrap_or("?").to_string();
            out.push_str(&format!("  File \"{}\", line {}, in {}\n", filename, line, name));
            if let Some(text) = self
                .sources
                .get(&filename)
                .and_then(|src| src.lines().nth((line as usize).saturating_sub(1)))
            {
                out.push_str(&format!("    {}\n", text.trim()));
            }
        }
        out.push_str(&self.exception_summary(exception));
        out
    }

    /// `ClassName: message` (메시지가 비면 클래스 이름만)
    pub fn exception_summary(&mut self, exception: Value) -> String {
        let class = self.type_name(exception);
        let message = self
            .str_value(exception)
            .unwrap_or_else(|_| "<exception str() failed>".to_string());
        if self.ts.has_exception() {
            // __str__ 내부 예외는 버림
            self.ts.flags.remove(ThreadFlags::HAS_EXCEPTION);
        }
        if message.is_empty() {
            class
        } else {
            format!("{}: {}", class, message)
        }
    }

    /// 처리되지 않은 현재 예외를 stderr로 출력하고 지웁니다.
    pub fn dump_traceback(&mut self) {
        let exception = self.ts.current_exception;
        self.ts.flags.remove(ThreadFlags::HAS_EXCEPTION);
        let text = self.format_traceback(exception);
        self.io.write_err(&format!("{}\n", text));
        self.ts.current_exception = Value::None;
    }
}
