//! # 값 표현
//!
//! 런타임의 모든 값은 `Value`로 표현됩니다. 즉시값(int, float, bool, None)은
//! 그대로 들고 다니고, 힙 객체는 `ObjRef` 핸들로 가리킵니다.
//!
//! `ObjRef`는 힙 아레나의 인덱스이므로 `Copy`이며, 같은 객체를 가리키는
//! 두 핸들은 항상 같습니다(identity).

use std::fmt;

/// 힙 객체 핸들
///
/// 객체가 살아있는 동안 인덱스는 바뀌지 않습니다. 해제된 슬롯은 재사용될 수 있으므로
/// 루트에서 도달할 수 없는 핸들을 보관하면 안 됩니다.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    pub(crate) fn new(index: usize) -> Self {
        ObjRef(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ========== kwargs 마커 ==========
// 호출 스택에서 복합 인자 블록을 구분하는 sentinel 값들

/// 다음 값은 단일 위치 인자
pub const KWARGS_SINGLE: i64 = i64::MAX;
/// 다음 값은 `*expr`로 풀어낼 iterable
pub const KWARGS_LIST: i64 = i64::MAX - 1;
/// 다음 값은 `**expr`로 풀어낼 dict
pub const KWARGS_DICT: i64 = i64::MAX - 2;
/// 인자 슬롯이 아직 채워지지 않았음을 표시 (기본값 채우기 대상)
pub const KWARGS_UNSET: i64 = 0;

/// `SETUP_TRY`/`SETUP_FINALLY`가 값 스택에 남기는 핸들러 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// 활성화된 try 블록
    Try,
    /// except 절 실행 중 (같은 try가 다시 잡지 않음)
    Except,
    /// 활성화된 finally 보호 블록
    Finally,
    /// finally 본문 진입: 정상 종료
    FinallyNormal,
    /// finally 본문 진입: 예외 전파 중
    FinallyRaise,
    /// finally 본문 진입: return 진행 중
    FinallyReturn,
}

/// 스택에 놓이는 예외 핸들러 레코드. `target`은 코드 내 절대 오프셋.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub kind: HandlerKind,
    pub target: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Value {
    #[default]
    None,
    NotImplemented,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// 내부 전용: 키워드 인자 블록 마커
    Kwargs(i64),
    /// 내부 전용: 예외 핸들러 레코드
    Handler(Handler),
    Object(ObjRef),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_kwargs(&self) -> bool {
        matches!(self, Value::Kwargs(_))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Kwargs(KWARGS_UNSET))
    }

    pub fn as_object(&self) -> Option<ObjRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// `is`의 의미인 identity 비교
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Kwargs(a), Value::Kwargs(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// 힙을 보지 않고 판정 가능한 동등성.
    ///
    /// 숫자는 타입을 넘어 비교하고(`1 == 1.0 == True`), 객체는 identity만 봅니다.
    /// 문자열은 인터닝되어 있으므로 identity로 충분합니다.
    pub fn shallow_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
                match (self, other) {
                    (Value::Float(_), _) | (_, Value::Float(_)) => {
                        self.as_float() == other.as_float()
                    }
                    _ => self.as_int() == other.as_int(),
                }
            }
            _ => self.same(other),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::NotImplemented => "NotImplementedType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Kwargs(_) => "kwargs",
            Value::Handler(_) => "handler",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Object(r)
    }
}

/// Python 스타일 float 표기 (`1.0`, `0.1`, `inf`, `nan`)
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_is_identity() {
        assert!(Value::Int(3).same(&Value::Int(3)));
        assert!(!Value::Int(3).same(&Value::Float(3.0)));
        assert!(Value::None.same(&Value::None));
        assert!(Value::Object(ObjRef::new(4)).same(&Value::Object(ObjRef::new(4))));
        assert!(!Value::Object(ObjRef::new(4)).same(&Value::Object(ObjRef::new(5))));
    }

    #[test]
    fn test_shallow_eq_crosses_numeric_types() {
        assert!(Value::Int(1).shallow_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).shallow_eq(&Value::Int(1)));
        assert!(!Value::Int(2).shallow_eq(&Value::Float(2.5)));
        assert!(!Value::None.shallow_eq(&Value::Int(0)));
    }

    #[test]
    fn test_kwargs_markers_are_distinct() {
        assert_ne!(KWARGS_SINGLE, KWARGS_LIST);
        assert_ne!(KWARGS_LIST, KWARGS_DICT);
        assert!(Value::Kwargs(KWARGS_UNSET).is_unset());
        assert!(!Value::Kwargs(KWARGS_SINGLE).is_unset());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }
}
