//! 연산자, 동등성, 해시, 첨자, dict 연산, 반복 프로토콜
//!
//! 숫자와 내장 시퀀스는 빠른 경로로 처리하고, 나머지는 클래스의 dunder 메서드로
//! 넘깁니다. 이항 연산자는 `NotImplemented`를 돌려받으면 오른쪽 피연산자의 반사
//! 메서드(`__radd__` 등)를 시도합니다.

use super::dispatch::BinOp;
use super::exceptions::ExcKind;
use super::{Vm, VmResult, fatal, normalize_index};
use crate::vm::bytecode::OpCode;
use crate::vm::object::{DictIterMode, InstanceData, InstanceObj, ObjKind, hash_str};
use crate::vm::table::{Entry, Probe, Table};
use crate::vm::type_def::{Dunder, Name};
use crate::vm::value::{ObjRef, Value};

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }

    /// (정방향, 반사) 메서드 이름
    fn dunders(self) -> (Name, Name) {
        match self {
            BinOp::Add => (Name::Add, Name::RAdd),
            BinOp::Sub => (Name::Sub, Name::RSub),
            BinOp::Mul => (Name::Mul, Name::RMul),
            BinOp::Div => (Name::TrueDiv, Name::RTrueDiv),
            BinOp::FloorDiv => (Name::FloorDiv, Name::RFloorDiv),
            BinOp::Mod => (Name::Mod, Name::RMod),
            BinOp::Pow => (Name::Pow, Name::RPow),
            BinOp::BitAnd => (Name::And, Name::RAnd),
            BinOp::BitOr => (Name::Or, Name::ROr),
            BinOp::BitXor => (Name::Xor, Name::RXor),
            BinOp::Shl => (Name::LShift, Name::RLShift),
            BinOp::Shr => (Name::RShift, Name::RRShift),
        }
    }
}

/// Python식 정수 나눗셈 (음의 무한대 방향)
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

/// 결과 부호가 나누는 수를 따르는 나머지
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

fn is_number(v: Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_) | Value::Float(_))
}

/// 반복 길이 (`[1] * n`)
fn repeat_count(v: Value) -> Option<usize> {
    match v {
        Value::Int(n) => Some(n.max(0) as usize),
        Value::Bool(b) => Some(b as usize),
        _ => None,
    }
}

/// dict 또는 set 인스턴스의 해시 테이블
pub(crate) fn hashed_table(kind: &ObjKind) -> Option<&Table> {
    match kind {
        ObjKind::Dict(table) => Some(table),
        ObjKind::Instance(InstanceObj {
            data: InstanceData::Set(table),
            ..
        }) => Some(table),
        _ => None,
    }
}

pub(crate) fn hashed_table_mut(kind: &mut ObjKind) -> Option<&mut Table> {
    match kind {
        ObjKind::Dict(table) => Some(table),
        ObjKind::Instance(InstanceObj {
            data: InstanceData::Set(table),
            ..
        }) => Some(table),
        _ => None,
    }
}

/// 반복 결과가 차지할 수 있는 최대 바이트 수
const MAX_REPEAT_BYTES: usize = 1 << 32;

/// `len`개짜리 시퀀스를 `n`번 반복한 길이. 넘치거나 한도를 넘으면 `None`.
fn repeat_len(len: usize, n: usize, item_size: usize) -> Option<usize> {
    let total = len.checked_mul(n)?;
    (total.checked_mul(item_size)? <= MAX_REPEAT_BYTES).then_some(total)
}

/// `slice(start, stop, step)`을 길이 `len`의 시퀀스 인덱스 목록으로
pub(crate) fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, low: i64, high: i64| v.max(low).min(high);
    let mut out = Vec::new();
    if step > 0 {
        let start = start.map(|s| if s < 0 { s + len } else { s }).map_or(0, |s| clamp(s, 0, len));
        let stop = stop.map(|s| if s < 0 { s + len } else { s }).map_or(len, |s| clamp(s, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = start
            .map(|s| if s < 0 { s + len } else { s })
            .map_or(len - 1, |s| clamp(s, -1, len - 1));
        let stop = stop
            .map(|s| if s < 0 { s + len } else { s })
            .map_or(-1, |s| clamp(s, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

impl Vm {
    // ========== 이항/단항 연산 ==========

    pub fn binary_op(&mut self, op: BinOp, a: Value, b: Value) -> VmResult<Value> {
        if is_number(a) && is_number(b) {
            return self.numeric_op(op, a, b);
        }
        if let Some(v) = self.sequence_op(op, a, b)? {
            return Ok(v);
        }

        let (forward, reflected) = op.dunders();
        if let Some(method) = self.class_lookup(self.type_of(a), self.name(forward)) {
            let result = self.call_callable(method, &[a, b])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if let Some(method) = self.class_lookup(self.type_of(b), self.name(reflected)) {
            let result = self.call_callable(method, &[b, a])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        let (left, right) = (self.type_name(a), self.type_name(b));
        Err(self.runtime_error(
            ExcKind::TypeError,
            format!("unsupported operand types for {}: '{}' and '{}'", op.symbol(), left, right),
        ))
    }

    fn numeric_op(&mut self, op: BinOp, a: Value, b: Value) -> VmResult<Value> {
        if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
            match op {
                BinOp::BitAnd => return Ok(Value::Bool(x & y)),
                BinOp::BitOr => return Ok(Value::Bool(x | y)),
                BinOp::BitXor => return Ok(Value::Bool(x ^ y)),
                _ => {}
            }
        }
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return self.int_op(op, x, y);
        }
        let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
            return Err(fatal("numeric operands expected"));
        };
        let result = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => {
                if y == 0.0 {
                    return Err(self.runtime_error(ExcKind::ZeroDivisionError, "float division by zero"));
                }
                x / y
            }
            BinOp::FloorDiv => {
                if y == 0.0 {
                    return Err(self.runtime_error(ExcKind::ZeroDivisionError, "float divmod()"));
                }
                (x / y).floor()
            }
            BinOp::Mod => {
                if y == 0.0 {
                    return Err(self.runtime_error(ExcKind::ZeroDivisionError, "float modulo"));
                }
                x - y * (x / y).floor()
            }
            BinOp::Pow => {
                if x == 0.0 && y < 0.0 {
                    return Err(self.runtime_error(
                        ExcKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                x.powf(y)
            }
            _ => {
                let (left, right) = (self.type_name(a), self.type_name(b));
                return Err(self.runtime_error(
                    ExcKind::TypeError,
                    format!("unsupported operand types for {}: '{}' and '{}'", op.symbol(), left, right),
                ));
            }
        };
        Ok(Value::Float(result))
    }

    fn int_op(&mut self, op: BinOp, x: i64, y: i64) -> VmResult<Value> {
        let result = match op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div => {
                if y == 0 {
                    return Err(self.runtime_error(ExcKind::ZeroDivisionError, "division by zero"));
                }
                return Ok(Value::Float(x as f64 / y as f64));
            }
            BinOp::FloorDiv | BinOp::Mod => {
                if y == 0 {
                    return Err(self.runtime_error(ExcKind::ZeroDivisionError, "integer division or modulo by zero"));
                }
                if op == BinOp::FloorDiv { floor_div(x, y) } else { floor_mod(x, y) }
            }
            BinOp::Pow => {
                if y < 0 {
                    return self.numeric_op(op, Value::Float(x as f64), Value::Float(y as f64));
                }
                x.wrapping_pow(u32::try_from(y).unwrap_or(u32::MAX))
            }
            BinOp::BitAnd => x & y,
            BinOp::BitOr => x | y,
            BinOp::BitXor => x ^ y,
            BinOp::Shl | BinOp::Shr => {
                if y < 0 {
                    return Err(self.runtime_error(ExcKind::ValueError, "negative shift count"));
                }
                match (op, y) {
                    (BinOp::Shl, 64..) => 0,
                    (BinOp::Shl, _) => x.wrapping_shl(y as u32),
                    (_, 64..) => x >> 63,
                    _ => x >> y,
                }
            }
        };
        Ok(Value::Int(result))
    }

    /// 내장 시퀀스의 `+`와 `*`
    fn sequence_op(&mut self, op: BinOp, a: Value, b: Value) -> VmResult<Option<Value>> {
        let (Some(ra), rb) = (a.as_object(), b.as_object()) else {
            // int * seq
            if op == BinOp::Mul {
                if let (Some(n), Some(_)) = (repeat_count(a), b.as_object()) {
                    return self.sequence_op(op, b, Value::Int(n as i64));
                }
            }
            return Ok(None);
        };
        match op {
            BinOp::Add => {
                let Some(rb) = rb else { return Ok(None) };
                let v = match (self.heap.kind(ra), self.heap.kind(rb)) {
                    (ObjKind::String(x), ObjKind::String(y)) => {
                        let joined = format!("{}{}", x.chars, y.chars);
                        self.new_string(&joined)
                    }
                    (ObjKind::List(x), ObjKind::List(y)) => {
                        let items = x.iter().chain(y.iter()).copied().collect();
                        self.new_list(items)
                    }
                    (ObjKind::Tuple(x), ObjKind::Tuple(y)) => {
                        let items = x.iter().chain(y.iter()).copied().collect();
                        self.new_tuple(items)
                    }
                    (ObjKind::Bytes(x), ObjKind::Bytes(y)) => {
                        let bytes = x.iter().chain(y.iter()).copied().collect();
                        self.new_bytes(bytes)
                    }
                    (ObjKind::ByteArray(_), ObjKind::ByteArray(_) | ObjKind::Bytes(_)) => {
                        let mut bytes = self.byte_slice(a).unwrap_or_default();
                        bytes.extend(self.byte_slice(b).unwrap_or_default());
                        Value::Object(self.heap.alloc(ObjKind::ByteArray(bytes)))
                    }
                    _ => return Ok(None),
                };
                Ok(Some(v))
            }
            BinOp::Mul => {
                let Some(n) = repeat_count(b) else { return Ok(None) };
                let (len, item_size) = match self.heap.kind(ra) {
                    ObjKind::String(s) => (s.chars.len(), 1),
                    ObjKind::List(items) => (items.len(), std::mem::size_of::<Value>()),
                    ObjKind::Tuple(items) => (items.len(), std::mem::size_of::<Value>()),
                    ObjKind::Bytes(bytes) => (bytes.len(), 1),
                    _ => return Ok(None),
                };
                if repeat_len(len, n, item_size).is_none() {
                    return Err(self.runtime_error(ExcKind::ValueError, "repeated sequence is too long"));
                }
                let v = match self.heap.kind(ra) {
                    ObjKind::String(s) => {
                        let repeated = s.chars.repeat(n);
                        self.new_string(&repeated)
                    }
                    ObjKind::List(items) => {
                        let items = items.repeat(n);
                        self.new_list(items)
                    }
                    ObjKind::Tuple(items) => {
                        let items = items.repeat(n);
                        self.new_tuple(items)
                    }
                    ObjKind::Bytes(bytes) => {
                        let bytes = bytes.repeat(n);
                        self.new_bytes(bytes)
                    }
                    _ => return Ok(None),
                };
                Ok(Some(v))
            }
            _ => Ok(None),
        }
    }

    pub fn unary(&mut self, op: OpCode, v: Value) -> VmResult<Value> {
        match (op, v) {
            (OpCode::Negate, Value::Int(i)) => return Ok(Value::Int(i.wrapping_neg())),
            (OpCode::Negate, Value::Bool(b)) => return Ok(Value::Int(-(b as i64))),
            (OpCode::Negate, Value::Float(f)) => return Ok(Value::Float(-f)),
            (OpCode::Pos, Value::Int(_) | Value::Float(_)) => return Ok(v),
            (OpCode::Pos, Value::Bool(b)) => return Ok(Value::Int(b as i64)),
            (OpCode::Invert, Value::Int(i)) => return Ok(Value::Int(!i)),
            (OpCode::Invert, Value::Bool(b)) => return Ok(Value::Int(!(b as i64))),
            _ => {}
        }
        let (name, symbol) = match op {
            OpCode::Negate => (Name::Neg, "-"),
            OpCode::Pos => (Name::Pos, "+"),
            _ => (Name::Invert, "~"),
        };
        if let Some(method) = self.class_lookup(self.type_of(v), self.name(name)) {
            return self.call_callable(method, &[v]);
        }
        let type_name = self.type_name(v);
        Err(self.runtime_error(
            ExcKind::TypeError,
            format!("bad operand type for unary {}: '{}'", symbol, type_name),
        ))
    }

    // ========== 비교 ==========

    /// `<`, `>`, `<=`, `>=`
    pub fn compare(&mut self, op: OpCode, a: Value, b: Value) -> VmResult<Value> {
        if is_number(a) && is_number(b) {
            let result = match (a, b) {
                (Value::Float(_), _) | (_, Value::Float(_)) => {
                    let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
                    match op {
                        OpCode::Less => x < y,
                        OpCode::Greater => x > y,
                        OpCode::LessEqual => x <= y,
                        _ => x >= y,
                    }
                }
                _ => {
                    let (x, y) = (a.as_int().unwrap_or(0), b.as_int().unwrap_or(0));
                    match op {
                        OpCode::Less => x < y,
                        OpCode::Greater => x > y,
                        OpCode::LessEqual => x <= y,
                        _ => x >= y,
                    }
                }
            };
            return Ok(Value::Bool(result));
        }

        if let (Some(ra), Some(rb)) = (a.as_object(), b.as_object()) {
            let ordering = match (self.heap.kind(ra), self.heap.kind(rb)) {
                (ObjKind::String(x), ObjKind::String(y)) => Some(x.chars.cmp(&y.chars)),
                (ObjKind::Bytes(x), ObjKind::Bytes(y)) => Some(x.cmp(y)),
                _ => None,
            };
            if let Some(ordering) = ordering {
                return Ok(Value::Bool(match op {
                    OpCode::Less => ordering.is_lt(),
                    OpCode::Greater => ordering.is_gt(),
                    OpCode::LessEqual => ordering.is_le(),
                    _ => ordering.is_ge(),
                }));
            }
            let sequences = match (self.heap.kind(ra), self.heap.kind(rb)) {
                (ObjKind::List(x), ObjKind::List(y)) => Some((x.clone(), y.clone())),
                (ObjKind::Tuple(x), ObjKind::Tuple(y)) => Some((x.to_vec(), y.to_vec())),
                _ => None,
            };
            if let Some((x, y)) = sequences {
                for (p, q) in x.iter().zip(y.iter()) {
                    if !self.values_equal(*p, *q)? {
                        return self.compare(op, *p, *q);
                    }
                }
                let (lx, ly) = (x.len(), y.len());
                return Ok(Value::Bool(match op {
                    OpCode::Less => lx < ly,
                    OpCode::Greater => lx > ly,
                    OpCode::LessEqual => lx <= ly,
                    _ => lx >= ly,
                }));
            }
        }

        let (forward, reflected, symbol) = match op {
            OpCode::Less => (Name::Lt, Name::Gt, "<"),
            OpCode::Greater => (Name::Gt, Name::Lt, ">"),
            OpCode::LessEqual => (Name::Le, Name::Ge, "<="),
            _ => (Name::Ge, Name::Le, ">="),
        };
        if let Some(method) = self.class_lookup(self.type_of(a), self.name(forward)) {
            let result = self.call_callable(method, &[a, b])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if let Some(method) = self.class_lookup(self.type_of(b), self.name(reflected)) {
            let result = self.call_callable(method, &[b, a])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        let (left, right) = (self.type_name(a), self.type_name(b));
        Err(self.runtime_error(
            ExcKind::TypeError,
            format!("'{}' not supported between instances of '{}' and '{}'", symbol, left, right),
        ))
    }

    /// `==`
    pub fn values_equal(&mut self, a: Value, b: Value) -> VmResult<bool> {
        if is_number(a) && is_number(b) {
            return Ok(a.shallow_eq(&b));
        }
        if a.same(&b) {
            return Ok(true);
        }
        let (Some(ra), Some(rb)) = (a.as_object(), b.as_object()) else {
            return self.instance_eq(a, b);
        };
        enum Pair {
            Seq(Vec<Value>, Vec<Value>),
            Dicts,
            Done(bool),
            Other,
        }
        let pair = match (self.heap.kind(ra), self.heap.kind(rb)) {
            (ObjKind::String(_), ObjKind::String(_)) => Pair::Done(false),
            (ObjKind::Tuple(x), ObjKind::Tuple(y)) => Pair::Seq(x.to_vec(), y.to_vec()),
            (ObjKind::List(x), ObjKind::List(y)) => Pair::Seq(x.clone(), y.clone()),
            (ObjKind::Bytes(x), ObjKind::Bytes(y)) => Pair::Done(x == y),
            (ObjKind::ByteArray(x), ObjKind::ByteArray(y)) => Pair::Done(x == y),
            (ObjKind::Bytes(x), ObjKind::ByteArray(y)) | (ObjKind::ByteArray(y), ObjKind::Bytes(x)) => {
                Pair::Done(x.as_ref() == y.as_slice())
            }
            (ObjKind::Dict(x), ObjKind::Dict(y)) => {
                if x.len() != y.len() {
                    Pair::Done(false)
                } else {
                    Pair::Dicts
                }
            }
            _ => Pair::Other,
        };
        match pair {
            Pair::Done(result) => Ok(result),
            Pair::Seq(x, y) => {
                if x.len() != y.len() {
                    return Ok(false);
                }
                for (p, q) in x.into_iter().zip(y) {
                    if !self.values_equal(p, q)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Pair::Dicts => {
                let entries: Vec<(Value, Value)> = match self.heap.kind(ra) {
                    ObjKind::Dict(t) => t.iter().map(|e| (e.key, e.value)).collect(),
                    _ => Vec::new(),
                };
                for (key, value) in entries {
                    match self.dict_get(rb, key)? {
                        Some(other) if self.values_equal(value, other)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            Pair::Other => self.instance_eq(a, b),
        }
    }

    /// `__eq__`, 그다음 반사된 `__eq__`, 마지막으로 identity
    fn instance_eq(&mut self, a: Value, b: Value) -> VmResult<bool> {
        for (x, y) in [(a, b), (b, a)] {
            let class = self.type_of(x);
            if let Some(method) = self.class_slot(class, Dunder::Eq) {
                let result = self.call_callable(method, &[x, y])?;
                if !matches!(result, Value::NotImplemented) {
                    return self.is_truthy(result);
                }
            }
        }
        Ok(a.same(&b))
    }

    // ========== 해시 ==========

    pub fn hash_value(&mut self, v: Value) -> VmResult<u32> {
        let r = match v {
            Value::None | Value::NotImplemented => return Ok(0),
            Value::Bool(b) => return Ok(b as u32),
            Value::Int(i) => return Ok(i as u32),
            Value::Float(f) => {
                return Ok(if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    f as i64 as u32
                } else {
                    (f * 1000.0) as i64 as u32
                });
            }
            Value::Kwargs(i) => return Ok(i as u32),
            Value::Handler(h) => return Ok(h.target),
            Value::Object(r) => r,
        };
        let tuple = match self.heap.kind(r) {
            ObjKind::String(s) => return Ok(s.hash),
            ObjKind::Bytes(bytes) => return Ok(bytes.iter().fold(0u32, |h, &c| {
                (c as u32).wrapping_add(h << 6).wrapping_add(h << 16).wrapping_sub(h)
            })),
            ObjKind::List(_)
            | ObjKind::Dict(_)
            | ObjKind::ByteArray(_)
            | ObjKind::Instance(InstanceObj {
                data: InstanceData::Set(_),
                ..
            }) => {
                let name = self.type_name(v);
                return Err(self.runtime_error(ExcKind::TypeError, format!("unhashable type: '{}'", name)));
            }
            ObjKind::Tuple(items) => items.to_vec(),
            ObjKind::Instance(InstanceObj { class, .. }) => {
                let class = *class;
                return match self.class_slot(class, Dunder::Hash) {
                    Some(method) => {
                        let result = self.call_callable(method, &[v])?;
                        match result {
                            Value::Int(i) => Ok(i as u32),
                            Value::Bool(b) => Ok(b as u32),
                            _ => Err(self.runtime_error(ExcKind::TypeError, "__hash__ method should return an integer")),
                        }
                    }
                    None => Ok(r.index() as u32),
                };
            }
            _ => return Ok(r.index() as u32),
        };
        let mut hash = hash_str("()");
        for item in tuple {
            let h = self.hash_value(item)?;
            hash = (hash << 7).wrapping_add(hash >> 25) ^ h;
        }
        Ok(hash)
    }

    // ========== dict ==========
    // set 인스턴스도 같은 해시 테이블 연산을 씁니다 (값은 `True`).

    /// 키의 해시와, 있으면 그 엔트리의 슬롯
    fn dict_find(&mut self, dict: ObjRef, key: Value) -> VmResult<(u32, Option<usize>)> {
        let hash = self.hash_value(key)?;
        let shallow = |vm: &Vm, v: Value| match v {
            Value::Object(r) => matches!(vm.heap.kind(r), ObjKind::String(_)),
            _ => true,
        };
        let key_shallow = shallow(self, key);
        let candidates = match hashed_table(self.heap.kind(dict)) {
            Some(table) => table.candidates(hash).0,
            None => return Ok((hash, None)),
        };
        for index in candidates {
            let Some(existing) = self.dict_key_at(dict, index) else { continue };
            let equal = if key_shallow && shallow(self, existing) {
                existing.shallow_eq(&key)
            } else {
                self.values_equal(existing, key)?
            };
            // __eq__가 dict를 바꿨을 수 있음
            if equal && self.dict_key_at(dict, index).is_some_and(|k| k.same(&existing)) {
                return Ok((hash, Some(index)));
            }
        }
        Ok((hash, None))
    }

    fn dict_key_at(&self, dict: ObjRef, index: usize) -> Option<Value> {
        hashed_table(self.heap.kind(dict)).and_then(|table| table.entry_at(index).map(|e| e.key))
    }

    pub fn dict_get(&mut self, dict: ObjRef, key: Value) -> VmResult<Option<Value>> {
        let (_, index) = self.dict_find(dict, key)?;
        Ok(index.and_then(|i| hashed_table(self.heap.kind(dict)).and_then(|table| table.entry_at(i).map(|e| e.value))))
    }

    pub fn dict_set(&mut self, dict: ObjRef, key: Value, value: Value) -> VmResult<()> {
        let (hash, index) = self.dict_find(dict, key)?;
        if let Some(table) = hashed_table_mut(self.heap.kind_mut(dict)) {
            let entry = Entry { key, value, hash };
            match index {
                Some(i) => {
                    table.insert_at(Probe::Found(i), entry);
                }
                None => {
                    table.reserve_one();
                    if let (_, Some(vacant)) = table.candidates(hash) {
                        table.insert_at(Probe::Vacant(vacant), entry);
                    }
                }
            }
        }
        Ok(())
    }

    /// 키가 있었으면 그 값을 돌려줍니다.
    pub fn dict_delete(&mut self, dict: ObjRef, key: Value) -> VmResult<Option<Value>> {
        let (_, index) = self.dict_find(dict, key)?;
        Ok(index.and_then(|i| hashed_table_mut(self.heap.kind_mut(dict)).and_then(|table| table.remove_at(i).map(|e| e.value))))
    }

    fn key_error(&mut self, key: Value) -> super::VmError {
        let text = self.repr_value(key).unwrap_or_default();
        self.runtime_error(ExcKind::KeyError, text)
    }

    // ========== 진리값, 길이, 포함 ==========

    pub fn is_truthy(&mut self, v: Value) -> VmResult<bool> {
        let r = match v {
            Value::None => return Ok(false),
            Value::Bool(b) => return Ok(b),
            Value::Int(i) => return Ok(i != 0),
            Value::Float(f) => return Ok(f != 0.0),
            Value::Object(r) => r,
            _ => return Ok(true),
        };
        match self.heap.kind(r) {
            ObjKind::String(s) => Ok(!s.chars.is_empty()),
            ObjKind::List(items) => Ok(!items.is_empty()),
            ObjKind::Tuple(items) => Ok(!items.is_empty()),
            ObjKind::Dict(table) => Ok(!table.is_empty()),
            ObjKind::Bytes(bytes) => Ok(!bytes.is_empty()),
            ObjKind::ByteArray(bytes) => Ok(!bytes.is_empty()),
            ObjKind::Instance(instance) => {
                if let InstanceData::Range { start, stop, step } = instance.data {
                    return Ok(slice_range_len(start, stop, step) > 0);
                }
                let class = instance.class;
                if let Some(method) = self.class_lookup(class, self.name(Name::Bool)) {
                    let result = self.call_callable(method, &[v])?;
                    return self.is_truthy(result);
                }
                if self.class_slot(class, Dunder::Len).is_some() {
                    return Ok(self.len_of(v)? > 0);
                }
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    /// `len(v)`
    pub fn len_of(&mut self, v: Value) -> VmResult<usize> {
        if let Some(r) = v.as_object() {
            let class = match self.heap.kind(r) {
                ObjKind::String(s) => return Ok(s.codes_len),
                ObjKind::List(items) => return Ok(items.len()),
                ObjKind::Tuple(items) => return Ok(items.len()),
                ObjKind::Dict(table) => return Ok(table.len()),
                ObjKind::Bytes(bytes) => return Ok(bytes.len()),
                ObjKind::ByteArray(bytes) => return Ok(bytes.len()),
                ObjKind::Instance(InstanceObj {
                    data: InstanceData::Range { start, stop, step },
                    ..
                }) => {
                    let len = slice_range_len(*start, *stop, *step);
                    return match usize::try_from(len).ok().filter(|&n| n <= i64::MAX as usize) {
                        Some(n) => Ok(n),
                        None => Err(self.runtime_error(ExcKind::ValueError, "range() result has too many items")),
                    };
                }
                ObjKind::Instance(instance) => Some(instance.class),
                _ => None,
            };
            if let Some(method) = class.and_then(|c| self.class_slot(c, Dunder::Len)) {
                let result = self.call_callable(method, &[v])?;
                return match result {
                    Value::Int(n) if n >= 0 => Ok(n as usize),
                    _ => Err(self.runtime_error(ExcKind::ValueError, "__len__() should return >= 0")),
                };
            }
        }
        let name = self.type_name(v);
        Err(self.runtime_error(ExcKind::TypeError, format!("object of type '{}' has no len()", name)))
    }

    /// `item in container`
    pub fn contains(&mut self, container: Value, item: Value) -> VmResult<bool> {
        if let Some(r) = container.as_object() {
            enum Plan {
                Scan(Vec<Value>),
                Dict,
                Custom(Value),
                Iterate,
            }
            let plan = match self.heap.kind(r) {
                ObjKind::String(haystack) => {
                    let Some(needle) = self.heap.value_str(item) else {
                        let name = self.type_name(item);
                        return Err(self.runtime_error(
                            ExcKind::TypeError,
                            format!("'in <string>' requires string as left operand, not {}", name),
                        ));
                    };
                    return Ok(haystack.chars.contains(needle));
                }
                ObjKind::Bytes(_) | ObjKind::ByteArray(_) => {
                    let bytes = self.byte_slice(container).unwrap_or_default();
                    return match item {
                        Value::Int(i) => Ok(bytes.contains(&(i as u8))),
                        _ => {
                            let needle = self.byte_slice(item).unwrap_or_default();
                            Ok(needle.is_empty() || bytes.windows(needle.len()).any(|w| w == needle.as_slice()))
                        }
                    };
                }
                ObjKind::List(items) => Plan::Scan(items.clone()),
                ObjKind::Tuple(items) => Plan::Scan(items.to_vec()),
                ObjKind::Dict(_) => Plan::Dict,
                ObjKind::Instance(InstanceObj {
                    data: InstanceData::Range { start, stop, step },
                    ..
                }) => {
                    let Some(i) = item.as_int().filter(|_| is_number(item)) else { return Ok(false) };
                    let (start, stop, step) = (*start, *stop, *step);
                    let inside = if step > 0 { i >= start && i < stop } else { i <= start && i > stop };
                    return Ok(inside && (i as i128 - start as i128) % step as i128 == 0);
                }
                ObjKind::Instance(instance) => match self.class_slot(instance.class, Dunder::Contains) {
                    Some(method) => Plan::Custom(method),
                    None => Plan::Iterate,
                },
                _ => Plan::Iterate,
            };
            match plan {
                Plan::Scan(items) => {
                    for candidate in items {
                        if self.values_equal(candidate, item)? {
                            return Ok(true);
                        }
                    }
                    return Ok(false);
                }
                Plan::Dict => return Ok(self.dict_find(r, item)?.1.is_some()),
                Plan::Custom(method) => {
                    let result = self.call_callable(method, &[container, item])?;
                    return self.is_truthy(result);
                }
                Plan::Iterate => {}
            }
        }

        let iter = self.get_iter(container)?;
        let mark = self.ts.scratch.len();
        self.ts.scratch.push(iter);
        let result = loop {
            match self.iter_next(iter) {
                Ok(Some(candidate)) => match self.values_equal(candidate, item) {
                    Ok(true) => break Ok(true),
                    Ok(false) => {}
                    Err(e) => break Err(e),
                },
                Ok(None) => break Ok(false),
                Err(e) => break Err(e),
            }
        };
        self.ts.scratch.truncate(mark);
        result
    }

    pub(crate) fn byte_slice(&self, v: Value) -> Option<Vec<u8>> {
        match self.heap.kind(v.as_object()?) {
            ObjKind::Bytes(b) => Some(b.to_vec()),
            ObjKind::ByteArray(b) => Some(b.clone()),
            _ => None,
        }
    }

    // ========== 첨자 ==========

    pub fn new_slice(&mut self, start: Value, stop: Value, step: Value) -> Value {
        let class = self.base.slice;
        let slice = self.new_instance(class);
        if let ObjKind::Instance(instance) = self.heap.kind_mut(slice) {
            instance.data = InstanceData::Slice { start, stop, step };
        }
        Value::Object(slice)
    }

    /// 슬라이스 객체이면 `(start, stop, step)`
    fn slice_parts(&mut self, key: Value) -> VmResult<Option<(Option<i64>, Option<i64>, i64)>> {
        let parts = match key.as_object().map(|r| self.heap.kind(r)) {
            Some(ObjKind::Instance(InstanceObj {
                data: InstanceData::Slice { start, stop, step },
                ..
            })) => (*start, *stop, *step),
            _ => return Ok(None),
        };
        let bound = |vm: &mut Vm, v: Value| -> VmResult<Option<i64>> {
            match v {
                Value::None => Ok(None),
                _ => match v.as_int() {
                    Some(i) => Ok(Some(i)),
                    None => Err(vm.runtime_error(
                        ExcKind::TypeError,
                        "slice indices must be integers or None",
                    )),
                },
            }
        };
        let start = bound(self, parts.0)?;
        let stop = bound(self, parts.1)?;
        let step = bound(self, parts.2)?.unwrap_or(1);
        if step == 0 {
            return Err(self.runtime_error(ExcKind::ValueError, "slice step cannot be zero"));
        }
        Ok(Some((start, stop, step)))
    }

    fn index_error(&mut self, what: &str) -> super::VmError {
        self.runtime_error(ExcKind::IndexError, format!("{} index out of range", what))
    }

    pub fn get_item(&mut self, obj: Value, key: Value) -> VmResult<Value> {
        let Some(r) = obj.as_object() else {
            return Err(self.not_subscriptable(obj));
        };
        let slice = self.slice_parts(key)?;

        match self.heap.kind(r) {
            ObjKind::List(_) | ObjKind::Tuple(_) => {
                let (items, is_list) = match self.heap.kind(r) {
                    ObjKind::List(items) => (items.as_slice(), true),
                    ObjKind::Tuple(items) => (&items[..], false),
                    _ => (&[][..], false),
                };
                if let Some((start, stop, step)) = slice {
                    let picked: Vec<Value> = slice_indices(items.len(), start, stop, step)
                        .into_iter()
                        .map(|i| items[i])
                        .collect();
                    return Ok(if is_list { self.new_list(picked) } else { self.new_tuple(picked) });
                }
                let Some(index) = key.as_int().filter(|_| is_number(key) && !matches!(key, Value::Float(_))) else {
                    return Err(self.bad_index_type(obj, key));
                };
                match normalize_index(index, items.len()) {
                    Some(i) => Ok(items[i]),
                    None => Err(self.index_error(if is_list { "list" } else { "tuple" })),
                }
            }
            ObjKind::String(s) => {
                let chars: Vec<char> = s.chars.chars().collect();
                if let Some((start, stop, step)) = slice {
                    let picked: String = slice_indices(chars.len(), start, stop, step)
                        .into_iter()
                        .map(|i| chars[i])
                        .collect();
                    return Ok(self.new_string(&picked));
                }
                let Some(index) = key.as_int().filter(|_| !matches!(key, Value::Float(_))) else {
                    return Err(self.bad_index_type(obj, key));
                };
                match normalize_index(index, chars.len()) {
                    Some(i) => {
                        let c = chars[i].to_string();
                        Ok(self.new_string(&c))
                    }
                    None => Err(self.index_error("string")),
                }
            }
            ObjKind::Bytes(_) | ObjKind::ByteArray(_) => {
                let is_array = matches!(self.heap.kind(r), ObjKind::ByteArray(_));
                let bytes = self.byte_slice(obj).unwrap_or_default();
                if let Some((start, stop, step)) = slice {
                    let picked: Vec<u8> = slice_indices(bytes.len(), start, stop, step)
                        .into_iter()
                        .map(|i| bytes[i])
                        .collect();
                    return Ok(if is_array {
                        Value::Object(self.heap.alloc(ObjKind::ByteArray(picked)))
                    } else {
                        self.new_bytes(picked)
                    });
                }
                let Some(index) = key.as_int().filter(|_| !matches!(key, Value::Float(_))) else {
                    return Err(self.bad_index_type(obj, key));
                };
                match normalize_index(index, bytes.len()) {
                    Some(i) => Ok(Value::Int(bytes[i] as i64)),
                    None => Err(self.index_error(if is_array { "bytearray" } else { "bytes" })),
                }
            }
            ObjKind::Dict(_) => match self.dict_get(r, key)? {
                Some(v) => Ok(v),
                None => Err(self.key_error(key)),
            },
            ObjKind::Instance(InstanceObj {
                data: InstanceData::Range { start, stop, step },
                ..
            }) => {
                let (start, stop, step) = (*start, *stop, *step);
                let len = slice_range_len(start, stop, step) as i128;
                let Some(index) = key.as_int() else {
                    return Err(self.bad_index_type(obj, key));
                };
                let index = if index < 0 { index as i128 + len } else { index as i128 };
                if (0..len).contains(&index) {
                    Ok(Value::Int((start as i128 + step as i128 * index) as i64))
                } else {
                    Err(self.index_error("range object"))
                }
            }
            _ => {
                let class = self.type_of(obj);
                match self.class_slot(class, Dunder::GetItem) {
                    Some(method) => self.call_callable(method, &[obj, key]),
                    None => Err(self.not_subscriptable(obj)),
                }
            }
        }
    }

    fn not_subscriptable(&mut self, obj: Value) -> super::VmError {
        let name = self.type_name(obj);
        self.runtime_error(ExcKind::TypeError, format!("'{}' object is not subscriptable", name))
    }

    fn bad_index_type(&mut self, obj: Value, key: Value) -> super::VmError {
        let (container, index) = (self.type_name(obj), self.type_name(key));
        self.runtime_error(
            ExcKind::TypeError,
            format!("{} indices must be integers, not {}", container, index),
        )
    }

    pub fn set_item(&mut self, obj: Value, key: Value, value: Value) -> VmResult<()> {
        let Some(r) = obj.as_object() else {
            return Err(self.no_item_assignment(obj));
        };
        match self.heap.kind(r) {
            ObjKind::List(items) => {
                let len = items.len();
                if let Some((start, stop, step)) = self.slice_parts(key)? {
                    let replacement = self.collect_iterable(value)?;
                    let indices = slice_indices(len, start, stop, step);
                    if step == 1 {
                        let from = indices.first().copied().unwrap_or_else(|| start.map_or(0, |s| {
                            (if s < 0 { s + len as i64 } else { s }).clamp(0, len as i64) as usize
                        }));
                        let to = from + indices.len();
                        if let ObjKind::List(items) = self.heap.kind_mut(r) {
                            items.splice(from..to, replacement);
                        }
                        return Ok(());
                    }
                    if indices.len() != replacement.len() {
                        return Err(self.runtime_error(
                            ExcKind::ValueError,
                            format!(
                                "attempt to assign sequence of size {} to extended slice of size {}",
                                replacement.len(),
                                indices.len()
                            ),
                        ));
                    }
                    if let ObjKind::List(items) = self.heap.kind_mut(r) {
                        for (i, v) in indices.into_iter().zip(replacement) {
                            items[i] = v;
                        }
                    }
                    return Ok(());
                }
                let Some(index) = key.as_int().filter(|_| !matches!(key, Value::Float(_))) else {
                    return Err(self.bad_index_type(obj, key));
                };
                match normalize_index(index, len) {
                    Some(i) => {
                        if let ObjKind::List(items) = self.heap.kind_mut(r) {
                            items[i] = value;
                        }
                        Ok(())
                    }
                    None => Err(self.runtime_error(ExcKind::IndexError, "list assignment index out of range")),
                }
            }
            ObjKind::ByteArray(bytes) => {
                let len = bytes.len();
                let (Some(index), Some(byte)) = (key.as_int(), value.as_int()) else {
                    return Err(self.bad_index_type(obj, key));
                };
                let Ok(byte) = u8::try_from(byte) else {
                    return Err(self.runtime_error(ExcKind::ValueError, "byte must be in range(0, 256)"));
                };
                match normalize_index(index, len) {
                    Some(i) => {
                        if let ObjKind::ByteArray(bytes) = self.heap.kind_mut(r) {
                            bytes[i] = byte;
                        }
                        Ok(())
                    }
                    None => Err(self.index_error("bytearray")),
                }
            }
            ObjKind::Dict(_) => self.dict_set(r, key, value),
            _ => {
                let class = self.type_of(obj);
                match self.class_slot(class, Dunder::SetItem) {
                    Some(method) => self.call_callable(method, &[obj, key, value]).map(|_| ()),
                    None => Err(self.no_item_assignment(obj)),
                }
            }
        }
    }

    fn no_item_assignment(&mut self, obj: Value) -> super::VmError {
        let name = self.type_name(obj);
        self.runtime_error(
            ExcKind::TypeError,
            format!("'{}' object does not support item assignment", name),
        )
    }

    pub fn del_item(&mut self, obj: Value, key: Value) -> VmResult<()> {
        let Some(r) = obj.as_object() else {
            return Err(self.no_item_deletion(obj));
        };
        match self.heap.kind(r) {
            ObjKind::List(items) => {
                let len = items.len();
                if let Some((start, stop, step)) = self.slice_parts(key)? {
                    let mut doomed = slice_indices(len, start, stop, step);
                    doomed.sort_unstable();
                    if let ObjKind::List(items) = self.heap.kind_mut(r) {
                        for i in doomed.into_iter().rev() {
                            items.remove(i);
                        }
                    }
                    return Ok(());
                }
                let Some(index) = key.as_int() else {
                    return Err(self.bad_index_type(obj, key));
                };
                match normalize_index(index, len) {
                    Some(i) => {
                        if let ObjKind::List(items) = self.heap.kind_mut(r) {
                            items.remove(i);
                        }
                        Ok(())
                    }
                    None => Err(self.runtime_error(ExcKind::IndexError, "list assignment index out of range")),
                }
            }
            ObjKind::Dict(_) => match self.dict_delete(r, key)? {
                Some(_) => Ok(()),
                None => Err(self.key_error(key)),
            },
            _ => {
                let class = self.type_of(obj);
                match self.class_slot(class, Dunder::DelItem) {
                    Some(method) => self.call_callable(method, &[obj, key]).map(|_| ()),
                    None => Err(self.no_item_deletion(obj)),
                }
            }
        }
    }

    fn no_item_deletion(&mut self, obj: Value) -> super::VmError {
        let name = self.type_name(obj);
        self.runtime_error(ExcKind::TypeError, format!("'{}' object doesn't support item deletion", name))
    }

    // ========== 반복 ==========

    pub(crate) fn new_iterator(&mut self, class: ObjRef, data: InstanceData) -> Value {
        let iter = self.new_instance(class);
        if let ObjKind::Instance(instance) = self.heap.kind_mut(iter) {
            instance.data = data;
        }
        Value::Object(iter)
    }

    pub fn new_dict_iterator(&mut self, dict: ObjRef, mode: DictIterMode) -> Value {
        let class = self.base.dict_iterator;
        self.new_iterator(class, InstanceData::DictIter { dict, index: 0, mode })
    }

    /// `iter(v)`
    pub fn get_iter(&mut self, v: Value) -> VmResult<Value> {
        if let Some(r) = v.as_object() {
            match self.heap.kind(r) {
                ObjKind::List(_) | ObjKind::Tuple(_) | ObjKind::String(_) | ObjKind::Bytes(_) | ObjKind::ByteArray(_) => {
                    let class = self.base.seq_iterator;
                    return Ok(self.new_iterator(class, InstanceData::SeqIter { target: v, index: 0 }));
                }
                ObjKind::Dict(_) => return Ok(self.new_dict_iterator(r, DictIterMode::Keys)),
                ObjKind::Generator(_) => return Ok(v),
                ObjKind::Instance(instance) => match instance.data {
                    InstanceData::Range { start, stop, step } => {
                        let class = self.base.range_iterator;
                        return Ok(self.new_iterator(class, InstanceData::RangeIter { current: start, stop, step }));
                    }
                    InstanceData::SeqIter { .. }
                    | InstanceData::RangeIter { .. }
                    | InstanceData::DictIter { .. }
                    | InstanceData::Enumerate { .. }
                    | InstanceData::Zip { .. } => return Ok(v),
                    _ => {}
                },
                _ => {}
            }
        }
        let class = self.type_of(v);
        match self.class_slot(class, Dunder::Iter) {
            Some(method) => self.call_callable(method, &[v]),
            None => {
                let name = self.type_name(v);
                Err(self.runtime_error(ExcKind::TypeError, format!("'{}' object is not iterable", name)))
            }
        }
    }

    /// 다음 값. 반복자가 끝났으면 `None`.
    pub fn iter_next(&mut self, iter: Value) -> VmResult<Option<Value>> {
        let Some(r) = iter.as_object() else {
            return self.call_iterator(iter);
        };
        enum Step {
            Seq(Value, usize),
            Range(i64, i64, i64),
            Dict(ObjRef, usize, DictIterMode),
            Enumerate(Value, i64),
            Zip(Vec<Value>),
            Generator,
            Call,
        }
        let step = match self.heap.kind(r) {
            ObjKind::Generator(_) => Step::Generator,
            ObjKind::Instance(instance) => match &instance.data {
                InstanceData::SeqIter { target, index } => Step::Seq(*target, *index),
                InstanceData::RangeIter { current, stop, step } => Step::Range(*current, *stop, *step),
                InstanceData::DictIter { dict, index, mode } => Step::Dict(*dict, *index, *mode),
                InstanceData::Enumerate { iter, index } => Step::Enumerate(*iter, *index),
                InstanceData::Zip { iters } => Step::Zip(iters.clone()),
                _ => Step::Call,
            },
            _ => Step::Call,
        };

        let set_data = |vm: &mut Vm, data: InstanceData| {
            if let ObjKind::Instance(instance) = vm.heap.kind_mut(r) {
                instance.data = data;
            }
        };

        match step {
            Step::Seq(target, index) => {
                let item = match target.as_object().map(|t| self.heap.kind(t)) {
                    Some(ObjKind::List(items)) => items.get(index).copied(),
                    Some(ObjKind::Tuple(items)) => items.get(index).copied(),
                    Some(ObjKind::Bytes(bytes)) => bytes.get(index).map(|&b| Value::Int(b as i64)),
                    Some(ObjKind::ByteArray(bytes)) => bytes.get(index).map(|&b| Value::Int(b as i64)),
                    Some(ObjKind::String(s)) => {
                        let c = if s.is_ascii() {
                            s.chars.get(index..index + 1).map(str::to_string)
                        } else {
                            s.chars.chars().nth(index).map(String::from)
                        };
                        c.map(|c| self.new_string(&c))
                    }
                    _ => None,
                };
                if item.is_some() {
                    set_data(self, InstanceData::SeqIter { target, index: index + 1 });
                }
                Ok(item)
            }
            Step::Range(current, stop, step) => {
                let more = if step > 0 { current < stop } else { current > stop };
                if !more {
                    return Ok(None);
                }
                let next = current.checked_add(step).unwrap_or(stop);
                set_data(self, InstanceData::RangeIter { current: next, stop, step });
                Ok(Some(Value::Int(current)))
            }
            Step::Dict(dict, index, mode) => {
                let entry = hashed_table(self.heap.kind(dict)).and_then(|table| table.next_entry(index).map(|(i, e)| (i, *e)));
                let Some((slot, entry)) = entry else { return Ok(None) };
                set_data(self, InstanceData::DictIter { dict, index: slot + 1, mode });
                Ok(Some(match mode {
                    DictIterMode::Keys => entry.key,
                    DictIterMode::Values => entry.value,
                    DictIterMode::Items => self.new_tuple(vec![entry.key, entry.value]),
                }))
            }
            Step::Enumerate(inner, index) => match self.iter_next(inner)? {
                Some(v) => {
                    set_data(self, InstanceData::Enumerate { iter: inner, index: index + 1 });
                    Ok(Some(self.new_tuple(vec![Value::Int(index), v])))
                }
                None => Ok(None),
            },
            Step::Zip(iters) => {
                let holder = self.heap.alloc(ObjKind::List(Vec::with_capacity(iters.len())));
                let mark = self.ts.scratch.len();
                self.ts.scratch.push(Value::Object(holder));
                let mut exhausted = false;
                let mut failure = None;
                for it in iters {
                    match self.iter_next(it) {
                        Ok(Some(v)) => {
                            if let ObjKind::List(items) = self.heap.kind_mut(holder) {
                                items.push(v);
                            }
                        }
                        Ok(None) => {
                            exhausted = true;
                            break;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                self.ts.scratch.truncate(mark);
                if let Some(e) = failure {
                    return Err(e);
                }
                if exhausted {
                    return Ok(None);
                }
                let items = match self.heap.kind_mut(holder) {
                    ObjKind::List(items) => std::mem::take(items),
                    _ => Vec::new(),
                };
                Ok(Some(self.new_tuple(items)))
            }
            Step::Generator => {
                let v = self.resume_generator(r, Value::None)?;
                Ok(if v.same(&iter) { None } else { Some(v) })
            }
            Step::Call => self.call_iterator(iter),
        }
    }

    /// 호출 가능한 반복자: 자기 자신을 돌려주면 끝
    fn call_iterator(&mut self, iter: Value) -> VmResult<Option<Value>> {
        let v = self.call_callable(iter, &[])?;
        Ok(if v.same(&iter) { None } else { Some(v) })
    }

    /// iterable의 모든 원소. 반복 중 수집한 값은 scratch로 루팅됩니다.
    pub fn collect_iterable(&mut self, v: Value) -> VmResult<Vec<Value>> {
        self.collect_limited(v, None)
    }

    fn collect_limited(&mut self, v: Value, limit: Option<usize>) -> VmResult<Vec<Value>> {
        if let Some(r) = v.as_object() {
            match self.heap.kind(r) {
                ObjKind::List(items) => return Ok(items.clone()),
                ObjKind::Tuple(items) => return Ok(items.to_vec()),
                _ => {}
            }
        }
        let mark = self.ts.scratch.len();
        self.ts.scratch.push(v);
        let iter = match self.get_iter(v) {
            Ok(iter) => iter,
            Err(e) => {
                self.ts.scratch.truncate(mark);
                return Err(e);
            }
        };
        let holder = self.heap.alloc(ObjKind::List(Vec::new()));
        self.ts.scratch.push(iter);
        self.ts.scratch.push(Value::Object(holder));
        let mut count = 0;
        let result = loop {
            if limit.is_some_and(|l| count >= l) {
                break Ok(());
            }
            match self.iter_next(iter) {
                Ok(Some(item)) => {
                    if let ObjKind::List(items) = self.heap.kind_mut(holder) {
                        items.push(item);
                    }
                    count += 1;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.ts.scratch.truncate(mark);
        result?;
        Ok(match self.heap.kind_mut(holder) {
            ObjKind::List(items) => std::mem::take(items),
            _ => Vec::new(),
        })
    }

    /// `a, b = v`
    pub fn unpack(&mut self, v: Value, count: usize) -> VmResult<Vec<Value>> {
        let items = self.collect_limited(v, Some(count + 1))?;
        if items.len() < count {
            return Err(self.runtime_error(
                ExcKind::ValueError,
                format!("not enough values to unpack (expected {}, got {})", count, items.len()),
            ));
        }
        if items.len() > count {
            return Err(self.runtime_error(
                ExcKind::ValueError,
                format!("too many values to unpack (expected {})", count),
            ));
        }
        Ok(items)
    }
}

/// `range(start, stop, step)`의 원소 수. i64 전 구간에서 넘치지 않도록 i128로 계산합니다.
pub(crate) fn slice_range_len(start: i64, stop: i64, step: i64) -> u64 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let len = if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    };
    len as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_div_and_mod_follow_divisor_sign() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_mod(-7, 2), 1);
        assert_eq!(floor_mod(7, -2), -1);
        assert_eq!(floor_mod(6, 3), 0);
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(5, None, None, 1), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_indices(5, Some(1), Some(3), 1), vec![1, 2]);
        assert_eq!(slice_indices(5, Some(-2), None, 1), vec![3, 4]);
        assert_eq!(slice_indices(5, None, None, -1), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, None, None, 2), vec![0, 2, 4]);
        assert_eq!(slice_indices(3, Some(10), None, 1), Vec::<usize>::new());
    }

    #[test]
    fn test_repeat_len_rejects_overflow() {
        assert_eq!(repeat_len(2, 3, 1), Some(6));
        assert_eq!(repeat_len(0, usize::MAX, 16), Some(0));
        assert_eq!(repeat_len(2, usize::MAX / 2 + 1, 1), None);
        assert_eq!(repeat_len(1, usize::MAX, 16), None);
        assert_eq!(repeat_len(1, MAX_REPEAT_BYTES + 1, 1), None);
    }

    #[test]
    fn test_range_len() {
        assert_eq!(slice_range_len(0, 10, 1), 10);
        assert_eq!(slice_range_len(0, 10, 3), 4);
        assert_eq!(slice_range_len(10, 0, -2), 5);
        assert_eq!(slice_range_len(5, 5, 1), 0);
        assert_eq!(slice_range_len(0, 5, -1), 0);
        assert_eq!(slice_range_len(i64::MIN, i64::MAX, 1), u64::MAX);
        assert_eq!(slice_range_len(i64::MAX, i64::MIN, -1), u64::MAX);
        assert_eq!(slice_range_len(i64::MAX - 7, i64::MAX, 3), 3);
    }
}
