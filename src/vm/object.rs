//! # 힙 객체
//!
//! 모든 힙 객체는 공통 헤더(`HeapObject`: 플래그, 크기)와 종류별 본문(`ObjKind`)으로
//! 이루어집니다. 객체끼리의 참조는 전부 `ObjRef`/`Value`로 표현되며, GC가 이를 따라
//! 추적합니다(`ObjKind::trace`).

use std::sync::Arc;

use strum::EnumCount;

use super::bytecode::{CodeFlags, LineEntry, LocalName};
use super::machine::Vm;
use super::machine::VmResult;
use super::table::Table;
use super::type_def::{Dunder, ObjFlags};
use super::value::{ObjRef, Value};

/// 네이티브 함수 ABI: `(vm, 위치 인자, 키워드 인자 dict)`
pub type NativeFn = fn(&mut Vm, &[Value], Option<ObjRef>) -> VmResult<Value>;

#[derive(Debug)]
pub struct HeapObject {
    pub flags: ObjFlags,
    /// 마지막으로 계산된 바이트 크기 (GC 회계용)
    pub size: u32,
    pub kind: ObjKind,
}

#[derive(Debug)]
pub enum ObjKind {
    String(StrObj),
    Tuple(Box<[Value]>),
    List(Vec<Value>),
    Bytes(Box<[u8]>),
    ByteArray(Vec<u8>),
    Dict(Table),
    Class(Box<ClassObj>),
    Instance(InstanceObj),
    Code(Box<CodeObj>),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
    BoundMethod(BoundMethodObj),
    Native(NativeObj),
    Property(PropertyObj),
    Generator(Box<GeneratorObj>),
}

// ========== 문자열 ==========

#[derive(Debug)]
pub struct StrObj {
    pub chars: Box<str>,
    pub hash: u32,
    /// 코드포인트 개수
    pub codes_len: usize,
}

impl StrObj {
    pub fn new(chars: &str) -> Self {
        Self {
            hash: hash_str(chars),
            codes_len: chars.chars().count(),
            chars: chars.into(),
        }
    }

    pub fn is_ascii(&self) -> bool {
        self.codes_len == self.chars.len()
    }
}

/// sdbm 문자열 해시
pub fn hash_str(s: &str) -> u32 {
    s.bytes().fold(0u32, |hash, c| {
        (c as u32)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash)
    })
}

// ========== 클래스와 인스턴스 ==========

/// 인스턴스가 네이티브 상태를 가지는 방식. 상속 시 자식 클래스로 전파됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceLayout {
    #[default]
    Plain,
    Thread,
    Set,
}

#[derive(Debug)]
pub struct ClassObj {
    pub name: ObjRef,
    pub base: Option<ObjRef>,
    pub methods: Table,
    /// 약한 집합: 키가 자식 클래스
    pub subclasses: Table,
    pub docstring: Option<ObjRef>,
    pub filename: Option<ObjRef>,
    /// `finalize_class`가 채우는 dunder 캐시
    pub cache: [Option<Value>; Dunder::COUNT],
    pub layout: InstanceLayout,
}

impl ClassObj {
    pub fn new(name: ObjRef) -> Self {
        Self {
            name,
            base: None,
            methods: Table::new(),
            subclasses: Table::new(),
            docstring: None,
            filename: None,
            cache: [None; Dunder::COUNT],
            layout: InstanceLayout::Plain,
        }
    }

    pub fn slot(&self, dunder: Dunder) -> Option<Value> {
        self.cache[dunder as usize]
    }
}

/// dict iterator가 돌려줄 것
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictIterMode {
    Keys,
    Values,
    Items,
}

/// 내장 클래스 인스턴스가 들고 있는 네이티브 상태
#[derive(Debug, Default)]
pub enum InstanceData {
    #[default]
    None,
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Slice {
        start: Value,
        stop: Value,
        step: Value,
    },
    /// list/tuple/str/bytes 순회
    SeqIter {
        target: Value,
        index: usize,
    },
    RangeIter {
        current: i64,
        stop: i64,
        step: i64,
    },
    DictIter {
        dict: ObjRef,
        index: usize,
        mode: DictIterMode,
    },
    Enumerate {
        iter: Value,
        index: i64,
    },
    Zip {
        iters: Vec<Value>,
    },
    Thread {
        tid: Option<u32>,
    },
    /// set의 원소. 값은 모두 `True`.
    Set(Table),
}

#[derive(Debug)]
pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Table,
    pub data: InstanceData,
}

impl InstanceObj {
    pub fn new(class: ObjRef) -> Self {
        Self {
            class,
            fields: Table::new(),
            data: InstanceData::None,
        }
    }
}

// ========== 함수 ==========

#[derive(Debug)]
pub struct CodeObj {
    pub name: ObjRef,
    pub filename: ObjRef,
    pub docstring: Option<ObjRef>,
    pub bytecode: Arc<[u8]>,
    pub lines: Vec<LineEntry>,
    pub constants: Vec<Value>,
    pub required_args: u16,
    pub keyword_args: u16,
    pub kwonly_args: u16,
    pub flags: CodeFlags,
    pub upvalue_count: u16,
    pub local_count: u16,
    /// 인터닝된 파라미터 이름
    pub arg_names: Vec<ObjRef>,
    pub local_names: Vec<LocalName>,
}

impl CodeObj {
    pub fn positional_count(&self) -> usize {
        (self.required_args + self.keyword_args) as usize
    }

    pub fn line_for(&self, offset: usize) -> u32 {
        super::bytecode::line_for(&self.lines, offset)
    }
}

#[derive(Debug)]
pub struct ClosureObj {
    pub code: ObjRef,
    pub upvalues: Vec<ObjRef>,
    /// 정의된 모듈 (전역 이름 공간)
    pub globals: ObjRef,
    /// `METHOD`로 클래스에 붙은 경우 그 클래스. `super()`의 기준.
    pub owner_class: Option<ObjRef>,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueObj {
    /// 스레드 `thread`의 스택 `slot`을 가리킴
    Open { thread: u32, slot: usize },
    /// 중단된 제너레이터가 보관한 스택 조각의 `slot`을 가리킴. 재개하면 다시 `Open`.
    Suspended { generator: ObjRef, slot: usize },
    Closed(Value),
}

#[derive(Debug, Clone, Copy)]
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Clone, Copy)]
pub struct NativeObj {
    pub name: &'static str,
    pub function: NativeFn,
    pub doc: Option<&'static str>,
}

impl std::fmt::Debug for NativeObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyObj {
    pub getter: Value,
}

// ========== 제너레이터 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Created,
    Suspended,
    Running,
    Finished,
}

#[derive(Debug)]
pub struct GeneratorObj {
    pub closure: ObjRef,
    /// 중단된 프레임의 스택 조각 (`slots`부터)
    pub stack: Vec<Value>,
    /// 중단 동안 `stack`을 가리키는 upvalue들 (슬롯 오름차순)
    pub upvalues: Vec<ObjRef>,
    pub ip: usize,
    pub state: GeneratorState,
    pub result: Value,
}

// ========== 추적 ==========

impl ObjKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjKind::String(_) => "str",
            ObjKind::Tuple(_) => "tuple",
            ObjKind::List(_) => "list",
            ObjKind::Bytes(_) => "bytes",
            ObjKind::ByteArray(_) => "bytearray",
            ObjKind::Dict(_) => "dict",
            ObjKind::Class(_) => "type",
            ObjKind::Instance(_) => "object",
            ObjKind::Code(_) => "codeobject",
            ObjKind::Closure(_) => "function",
            ObjKind::Upvalue(_) => "upvalue",
            ObjKind::BoundMethod(_) => "method",
            ObjKind::Native(_) => "builtin_function",
            ObjKind::Property(_) => "property",
            ObjKind::Generator(_) => "generator",
        }
    }

    /// 이 객체가 직접 참조하는 값들을 `out`에 모읍니다.
    pub fn trace(&self, out: &mut Vec<Value>) {
        fn table(t: &Table, out: &mut Vec<Value>) {
            for entry in t.iter() {
                out.push(entry.key);
                out.push(entry.value);
            }
        }
        let obj = |r: ObjRef| Value::Object(r);
        match self {
            ObjKind::String(_) | ObjKind::Bytes(_) | ObjKind::ByteArray(_) | ObjKind::Native(_) => {}
            ObjKind::Tuple(items) => out.extend_from_slice(items),
            ObjKind::List(items) => out.extend_from_slice(items),
            ObjKind::Dict(t) => table(t, out),
            ObjKind::Class(class) => {
                out.push(obj(class.name));
                out.extend(class.base.map(obj));
                out.extend(class.docstring.map(obj));
                out.extend(class.filename.map(obj));
                table(&class.methods, out);
                // subclasses는 약한 참조
                out.extend(class.cache.iter().flatten().copied());
            }
            ObjKind::Instance(instance) => {
                out.push(obj(instance.class));
                table(&instance.fields, out);
                match &instance.data {
                    InstanceData::Slice { start, stop, step } => out.extend([*start, *stop, *step]),
                    InstanceData::SeqIter { target, .. } => out.push(*target),
                    InstanceData::DictIter { dict, .. } => out.push(obj(*dict)),
                    InstanceData::Enumerate { iter, .. } => out.push(*iter),
                    InstanceData::Zip { iters } => out.extend_from_slice(iters),
                    InstanceData::Set(items) => table(items, out),
                    InstanceData::None
                    | InstanceData::Range { .. }
                    | InstanceData::RangeIter { .. }
                    | InstanceData::Thread { .. } => {}
                }
            }
            ObjKind::Code(code) => {
                out.push(obj(code.name));
                out.push(obj(code.filename));
                out.extend(code.docstring.map(obj));
                out.extend_from_slice(&code.constants);
                out.extend(code.arg_names.iter().copied().map(obj));
            }
            ObjKind::Closure(closure) => {
                out.push(obj(closure.code));
                out.push(obj(closure.globals));
                out.extend(closure.owner_class.map(obj));
                out.extend(closure.upvalues.iter().copied().map(obj));
            }
            ObjKind::Upvalue(UpvalueObj::Closed(value)) => out.push(*value),
            ObjKind::Upvalue(UpvalueObj::Suspended { generator, .. }) => out.push(obj(*generator)),
            ObjKind::Upvalue(UpvalueObj::Open { .. }) => {}
            ObjKind::BoundMethod(bound) => {
                out.push(bound.receiver);
                out.push(bound.method);
            }
            ObjKind::Property(property) => out.push(property.getter),
            ObjKind::Generator(generator) => {
                out.push(obj(generator.closure));
                out.extend_from_slice(&generator.stack);
                out.extend(generator.upvalues.iter().copied().map(obj));
                out.push(generator.result);
            }
        }
    }

    /// 대략적인 바이트 크기 (헤더 + 소유한 버퍼)
    pub fn size_hint(&self) -> usize {
        let value = std::mem::size_of::<Value>();
        let table = |t: &Table| t.capacity() * (value * 2 + 8);
        std::mem::size_of::<HeapObject>()
            + match self {
                ObjKind::String(s) => s.chars.len(),
                ObjKind::Tuple(items) => items.len() * value,
                ObjKind::List(items) => items.capacity() * value,
                ObjKind::Bytes(bytes) => bytes.len(),
                ObjKind::ByteArray(bytes) => bytes.capacity(),
                ObjKind::Dict(t) => table(t),
                ObjKind::Class(class) => {
                    std::mem::size_of::<ClassObj>() + table(&class.methods) + table(&class.subclasses)
                }
                ObjKind::Instance(instance) => {
                    table(&instance.fields)
                        + match &instance.data {
                            InstanceData::Set(items) => table(items),
                            _ => 0,
                        }
                }
                ObjKind::Code(code) => {
                    std::mem::size_of::<CodeObj>()
                        + code.bytecode.len()
                        + code.constants.len() * value
                        + code.lines.len() * 8
                }
                ObjKind::Closure(closure) => closure.upvalues.len() * 4,
                ObjKind::Generator(generator) => {
                    std::mem::size_of::<GeneratorObj>()
                        + generator.stack.capacity() * value
                        + generator.upvalues.len() * 4
                }
                ObjKind::Upvalue(_)
                | ObjKind::BoundMethod(_)
                | ObjKind::Native(_)
                | ObjKind::Property(_) => 0,
            }
    }
}
