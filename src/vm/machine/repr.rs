//! `repr()`와 `str()`
//!
//! 컨테이너와 인스턴스는 출력하는 동안 `IN_REPR` 플래그를 세워 순환 참조를 `[...]`로
//! 끊습니다. 플래그는 예외로 빠져나가는 경우에도 항상 내려갑니다.

use super::exceptions::ExcKind;
use super::{Vm, VmResult};
use crate::vm::object::{InstanceData, InstanceObj, ObjKind};
use crate::vm::type_def::{Dunder, ObjFlags};
use crate::vm::value::{ObjRef, Value, format_float};

/// Python 스타일 문자열 리터럴
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// `b'...'`
pub fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
    out
}

impl Vm {
    pub fn repr_value(&mut self, v: Value) -> VmResult<String> {
        let r = match v {
            Value::None => return Ok("None".to_string()),
            Value::NotImplemented => return Ok("NotImplemented".to_string()),
            Value::Bool(b) => return Ok(if b { "True" } else { "False" }.to_string()),
            Value::Int(i) => return Ok(i.to_string()),
            Value::Float(f) => return Ok(format_float(f)),
            Value::Kwargs(n) => return Ok(format!("<kwargs {}>", n)),
            Value::Handler(h) => return Ok(format!("<handler {:?} {}>", h.kind, h.target)),
            Value::Object(r) => r,
        };

        let simple = match self.heap.kind(r) {
            ObjKind::String(s) => Some(quote_str(&s.chars)),
            ObjKind::Bytes(b) => Some(quote_bytes(b)),
            ObjKind::ByteArray(b) => Some(format!("bytearray({})", quote_bytes(b))),
            ObjKind::Class(c) => Some(format!("<class '{}'>", self.heap.str(c.name).unwrap_or("?"))),
            ObjKind::Code(c) => Some(format!("<codeobject {}>", self.heap.str(c.name).unwrap_or("?"))),
            ObjKind::Closure(c) => Some(format!("<function {}>", self.code_name(c.code))),
            ObjKind::Native(n) => Some(format!("<built-in function {}>", n.name)),
            ObjKind::Property(_) => Some("<property object>".to_string()),
            ObjKind::Upvalue(_) => Some("<upvalue>".to_string()),
            ObjKind::Generator(g) => {
                let name = match self.heap.kind(g.closure) {
                    ObjKind::Closure(c) => self.code_name(c.code),
                    _ => "?".to_string(),
                };
                Some(format!("<generator object {}>", name))
            }
            ObjKind::BoundMethod(b) => {
                let name = match b.method.as_object().map(|m| self.heap.kind(m)) {
                    Some(ObjKind::Closure(c)) => self.code_name(c.code),
                    Some(ObjKind::Native(n)) => n.name.to_string(),
                    _ => "?".to_string(),
                };
                let owner = self.type_name(b.receiver);
                Some(format!("<bound method {}.{}>", owner, name))
            }
            _ => None,
        };
        if let Some(text) = simple {
            return Ok(text);
        }

        let (open, close) = match self.heap.kind(r) {
            ObjKind::List(_) => ("[", "]"),
            ObjKind::Tuple(_) => ("(", ")"),
            ObjKind::Dict(_)
            | ObjKind::Instance(InstanceObj {
                data: InstanceData::Set(_),
                ..
            }) => ("{", "}"),
            _ => ("", ""),
        };
        if self.heap.flags(r).contains(ObjFlags::IN_REPR) {
            return Ok(if open.is_empty() {
                "...".to_string()
            } else {
                format!("{}...{}", open, close)
            });
        }

        self.heap.set_flag(r, ObjFlags::IN_REPR, true);
        let result = self.repr_guarded(v, r);
        self.heap.set_flag(r, ObjFlags::IN_REPR, false);
        result
    }

    fn repr_guarded(&mut self, v: Value, r: ObjRef) -> VmResult<String> {
        enum Shape {
            Seq(Vec<Value>, bool),
            Dict(Vec<(Value, Value)>),
            Instance,
        }
        let shape = match self.heap.kind(r) {
            ObjKind::List(items) => Shape::Seq(items.clone(), true),
            ObjKind::Tuple(items) => Shape::Seq(items.to_vec(), false),
            ObjKind::Dict(table) => Shape::Dict(table.iter().map(|e| (e.key, e.value)).collect()),
            _ => Shape::Instance,
        };
        let mark = self.ts.scratch.len();
        let result = match shape {
            Shape::Seq(items, is_list) => {
                self.ts.scratch.extend_from_slice(&items);
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    match self.repr_value(*item) {
                        Ok(text) => parts.push(text),
                        Err(e) => {
                            self.ts.scratch.truncate(mark);
                            return Err(e);
                        }
                    }
                }
                Ok(if is_list {
                    format!("[{}]", parts.join(", "))
                } else if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                })
            }
            Shape::Dict(entries) => {
                for (key, value) in &entries {
                    self.ts.scratch.push(*key);
                    self.ts.scratch.push(*value);
                }
                self.repr_entries(&entries)
            }
            Shape::Instance => self.call_text_slot(v, Dunder::Repr),
        };
        self.ts.scratch.truncate(mark);
        result
    }

    fn repr_entries(&mut self, entries: &[(Value, Value)]) -> VmResult<String> {
        let mut parts = Vec::with_capacity(entries.len());
        for &(key, value) in entries {
            let key = self.repr_value(key)?;
            let value = self.repr_value(value)?;
            parts.push(format!("{}: {}", key, value));
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    }

    /// 인스턴스의 `__repr__`/`__str__` 호출. 결과는 문자열이어야 합니다.
    fn call_text_slot(&mut self, v: Value, dunder: Dunder) -> VmResult<String> {
        let class = self.type_of(v);
        let Some(method) = self.class_slot(class, dunder) else {
            return Ok(format!("<{} object>", self.class_name(class)));
        };
        let result = self.call_callable(method, &[v])?;
        match self.heap.value_str(result) {
            Some(s) => Ok(s.to_string()),
            None => {
                let which = if dunder == Dunder::Repr { "__repr__" } else { "__str__" };
                let name = self.type_name(result);
                Err(self.runtime_error(
                    ExcKind::TypeError,
                    format!("{} returned non-string (type {})", which, name),
                ))
            }
        }
    }

    pub fn str_value(&mut self, v: Value) -> VmResult<String> {
        if let Some(s) = self.heap.value_str(v) {
            return Ok(s.to_string());
        }
        let is_instance = v
            .as_object()
            .is_some_and(|r| matches!(self.heap.kind(r), ObjKind::Instance(_)));
        if is_instance && self.class_slot(self.type_of(v), Dunder::Str).is_some() {
            return self.call_text_slot(v, Dunder::Str);
        }
        self.repr_value(v)
    }

    fn code_name(&self, code: ObjRef) -> String {
        match self.heap.kind(code) {
            ObjKind::Code(c) => self.heap.str(c.name).unwrap_or("?").to_string(),
            _ => "?".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_str_picks_quotes() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(quote_str("'\""), "'\\'\"'");
    }

    #[test]
    fn test_quote_bytes() {
        assert_eq!(quote_bytes(b"hi"), "b'hi'");
        assert_eq!(quote_bytes(&[0, 255]), "b'\\x00\\xff'");
    }
}
