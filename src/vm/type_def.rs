//! - **ObjFlags**: 모든 힙 객체 헤더의 플래그 비트
//! - **Dunder**: 클래스마다 캐시되는 특수 메서드 슬롯
//! - **Name**: VM이 미리 인터닝해 두는 이름들
//! - **Arity**: 네이티브 함수 인자 개수 검증

use strum::{EnumCount, EnumIter, IntoStaticStr};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjFlags: u16 {
        /// `__repr__` 재진입 방지 (순환 구조 출력)
        const IN_REPR           = 1 << 0;
        /// GC mark 비트
        const IS_MARKED         = 1 << 1;
        /// 상속 불가 클래스
        const NO_INHERIT        = 1 << 2;
        /// 접근 시 즉시 호출되는 네이티브 (`:name`)
        const DYNAMIC_PROPERTY  = 1 << 3;
        /// 인스턴스 대신 클래스에 바인딩
        const CLASS_METHOD      = 1 << 4;
        /// 바인딩하지 않음
        const STATIC_METHOD     = 1 << 5;
    }
}

/// 클래스별로 캐시되는 dunder 슬롯.
///
/// `finalize_class`가 base chain을 따라 `methods`를 조회해 채웁니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter)]
pub enum Dunder {
    Repr,
    Str,
    GetItem,
    SetItem,
    DelItem,
    Hash,
    Eq,
    Lt,
    Gt,
    Iter,
    Call,
    Init,
    New,
    Contains,
    Len,
    GetAttr,
}

impl Dunder {
    pub fn name(self) -> Name {
        match self {
            Dunder::Repr => Name::Repr,
            Dunder::Str => Name::Str,
            Dunder::GetItem => Name::GetItem,
            Dunder::SetItem => Name::SetItem,
            Dunder::DelItem => Name::DelItem,
            Dunder::Hash => Name::Hash,
            Dunder::Eq => Name::Eq,
            Dunder::Lt => Name::Lt,
            Dunder::Gt => Name::Gt,
            Dunder::Iter => Name::Iter,
            Dunder::Call => Name::Call,
            Dunder::Init => Name::Init,
            Dunder::New => Name::New,
            Dunder::Contains => Name::Contains,
            Dunder::Len => Name::Len,
            Dunder::GetAttr => Name::GetAttr,
        }
    }
}

/// VM 초기화 시 인터닝되는 이름 테이블의 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, IntoStaticStr)]
pub enum Name {
    #[strum(serialize = "__repr__")]
    Repr,
    #[strum(serialize = "__str__")]
    Str,
    #[strum(serialize = "__getitem__")]
    GetItem,
    #[strum(serialize = "__setitem__")]
    SetItem,
    #[strum(serialize = "__delitem__")]
    DelItem,
    #[strum(serialize = "__hash__")]
    Hash,
    #[strum(serialize = "__eq__")]
    Eq,
    #[strum(serialize = "__lt__")]
    Lt,
    #[strum(serialize = "__gt__")]
    Gt,
    #[strum(serialize = "__le__")]
    Le,
    #[strum(serialize = "__ge__")]
    Ge,
    #[strum(serialize = "__iter__")]
    Iter,
    #[strum(serialize = "__call__")]
    Call,
    #[strum(serialize = "__init__")]
    Init,
    #[strum(serialize = "__new__")]
    New,
    #[strum(serialize = "__contains__")]
    Contains,
    #[strum(serialize = "__len__")]
    Len,
    #[strum(serialize = "__getattr__")]
    GetAttr,
    #[strum(serialize = "__bool__")]
    Bool,
    #[strum(serialize = "__add__")]
    Add,
    #[strum(serialize = "__radd__")]
    RAdd,
    #[strum(serialize = "__sub__")]
    Sub,
    #[strum(serialize = "__rsub__")]
    RSub,
    #[strum(serialize = "__mul__")]
    Mul,
    #[strum(serialize = "__rmul__")]
    RMul,
    #[strum(serialize = "__truediv__")]
    TrueDiv,
    #[strum(serialize = "__rtruediv__")]
    RTrueDiv,
    #[strum(serialize = "__floordiv__")]
    FloorDiv,
    #[strum(serialize = "__rfloordiv__")]
    RFloorDiv,
    #[strum(serialize = "__mod__")]
    Mod,
    #[strum(serialize = "__rmod__")]
    RMod,
    #[strum(serialize = "__pow__")]
    Pow,
    #[strum(serialize = "__rpow__")]
    RPow,
    #[strum(serialize = "__and__")]
    And,
    #[strum(serialize = "__rand__")]
    RAnd,
    #[strum(serialize = "__or__")]
    Or,
    #[strum(serialize = "__ror__")]
    ROr,
    #[strum(serialize = "__xor__")]
    Xor,
    #[strum(serialize = "__rxor__")]
    RXor,
    #[strum(serialize = "__lshift__")]
    LShift,
    #[strum(serialize = "__rlshift__")]
    RLShift,
    #[strum(serialize = "__rshift__")]
    RShift,
    #[strum(serialize = "__rrshift__")]
    RRShift,
    #[strum(serialize = "__neg__")]
    Neg,
    #[strum(serialize = "__pos__")]
    Pos,
    #[strum(serialize = "__invert__")]
    Invert,
    #[strum(serialize = "__name__")]
    DunderName,
    #[strum(serialize = "__builtins__")]
    Builtins,
    #[strum(serialize = "__file__")]
    File,
    #[strum(serialize = "__doc__")]
    Doc,
    #[strum(serialize = "__main__")]
    Main,
    #[strum(serialize = "__path__")]
    Path,
    #[strum(serialize = "arg")]
    Arg,
    #[strum(serialize = "traceback")]
    Traceback,
    #[strum(serialize = "run")]
    Run,
    #[strum(serialize = "<module>")]
    ModuleCode,
}

impl Name {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// 정확히 N개의 인자만 허용
    Exact(usize),

    /// min ~ max 개의 인자 허용
    Range(usize, usize),

    /// 최소 N개 이상
    AtLeast(usize),
}

impl Arity {
    pub fn check(&self, got: usize) -> bool {
        match self {
            Arity::Exact(n) => got == *n,
            Arity::Range(min, max) => got >= *min && got <= *max,
            Arity::AtLeast(min) => got >= *min,
        }
    }

    /// `len() takes exactly 1 argument (2 given)` 형태의 메시지 조각
    pub fn describe(&self, got: usize) -> String {
        let (word, n) = match self {
            Arity::Exact(n) => ("exactly", *n),
            Arity::Range(min, _) if got < *min => ("at least", *min),
            Arity::Range(_, max) => ("at most", *max),
            Arity::AtLeast(min) => ("at least", *min),
        };
        format!(
            "takes {} {} argument{} ({} given)",
            word,
            n,
            if n == 1 { "" } else { "s" },
            got
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_arity_check() {
        assert!(Arity::Exact(2).check(2));
        assert!(!Arity::Exact(2).check(3));

        assert!(Arity::Range(1, 3).check(2));
        assert!(!Arity::Range(1, 3).check(4));

        assert!(Arity::AtLeast(0).check(0));
        assert!(Arity::AtLeast(1).check(100));
        assert!(!Arity::AtLeast(1).check(0));
    }

    #[test]
    fn test_arity_describe() {
        assert_eq!(Arity::Exact(1).describe(2), "takes exactly 1 argument (2 given)");
        assert_eq!(Arity::Range(1, 3).describe(0), "takes at least 1 argument (0 given)");
        assert_eq!(Arity::Range(1, 3).describe(5), "takes at most 3 arguments (5 given)");
    }

    #[test]
    fn test_dunder_names() {
        assert_eq!(Dunder::Repr.name().as_str(), "__repr__");
        assert_eq!(Dunder::GetItem.name().as_str(), "__getitem__");
        assert_eq!(Name::RAdd.as_str(), "__radd__");
        for slot in Dunder::iter() {
            assert!(slot.name().as_str().starts_with("__"));
        }
    }

    #[test]
    fn test_obj_flags() {
        let flags = ObjFlags::IN_REPR | ObjFlags::NO_INHERIT;
        assert!(flags.contains(ObjFlags::IN_REPR));
        assert!(!flags.contains(ObjFlags::IS_MARKED));
    }
}
