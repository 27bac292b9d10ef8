// machine 모듈 - VM 실행 엔진
//
// 바이트코드 디스패치, 호출 규약, 예외 전파, 모듈 로딩, GC 루트 표시를 담당합니다.
// 프로세스 전역 상태(인터닝 테이블, 모듈 캐시, 기본 클래스)는 모두 `Vm` 하나에
// 들어 있고, 모든 연산은 `&mut Vm`을 명시적으로 받습니다.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strum::{EnumCount, IntoEnumIterator};
use thiserror::Error;

use crate::runtime_io::{RuntimeIo, StdIo};
use crate::vm::heap::Heap;
use crate::vm::object::{ClassObj, InstanceLayout, NativeFn, NativeObj, ObjKind};
use crate::vm::table::Table;
use crate::vm::type_def::{Dunder, Name, ObjFlags};
use crate::vm::value::{ObjRef, Value};

// 서브모듈
mod attr;
mod call;
mod dispatch;
pub mod exceptions;
mod gc;
mod generator;
mod import;
mod ops;
mod repr;
pub mod thread;
mod upvalue;

#[cfg(test)]
mod tests;

pub use call::CallOutcome;
pub use dispatch::{BinOp, Dispatch};
pub use exceptions::ExcKind;
pub use repr::{quote_bytes, quote_str};
pub use thread::{CallFrame, ThreadFlags, ThreadState};

// ========== 타입 정의 ==========

#[derive(Debug, Error)]
pub enum VmError {
    /// 현재 스레드에 예외가 설정되어 전파 중
    #[error("exception raised")]
    Raised,
    /// 복구할 수 없는 호스트 측 오류 (손상된 바이트코드 등)
    #[error("fatal VM error: {0}")]
    Fatal(String),
}

pub type VmResult<T> = Result<T, VmError>;

pub fn fatal(message: impl Into<String>) -> VmError {
    VmError::Fatal(message.into())
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VmFlags: u8 {
        /// 모든 safe point에서 수집
        const ENABLE_STRESS_GC       = 1 << 0;
        /// 명령마다 `kuroko::vm` trace 이벤트
        const TRACE_EXECUTION        = 1 << 1;
        /// 컴파일 직후 디스어셈블 출력
        const DISASSEMBLE_ON_COMPILE = 1 << 2;
        /// 수집마다 통계를 출력
        const REPORT_GC_COLLECTS     = 1 << 3;
        const ENABLE_THREADING       = 1 << 4;
    }
}

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub flags: VmFlags,
    pub module_paths: Vec<PathBuf>,
    pub max_stack: usize,
    pub max_frames: usize,
    pub gc_floor: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        let mut module_paths = vec![PathBuf::from("./")];
        if let Some(dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("modules"))) {
            module_paths.push(dir);
        }
        if let Some(home) = dirs::home_dir() {
            module_paths.push(home.join(".kuroko").join("modules"));
        }
        if let Some(extra) = std::env::var_os("KUROKO_PATH") {
            module_paths.extend(std::env::split_paths(&extra));
        }
        let mut flags = VmFlags::empty();
        if cfg!(feature = "threading") {
            flags |= VmFlags::ENABLE_THREADING;
        }
        Self {
            flags,
            module_paths,
            max_stack: 1 << 20,
            max_frames: 1000,
            gc_floor: crate::vm::heap::DEFAULT_GC_FLOOR,
        }
    }
}

/// 내장 클래스 핸들
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseClasses {
    pub object: ObjRef,
    pub type_: ObjRef,
    pub module: ObjRef,
    pub none_type: ObjRef,
    pub not_implemented_type: ObjRef,
    pub bool: ObjRef,
    pub int: ObjRef,
    pub float: ObjRef,
    pub str: ObjRef,
    pub bytes: ObjRef,
    pub bytearray: ObjRef,
    pub tuple: ObjRef,
    pub list: ObjRef,
    pub dict: ObjRef,
    pub set: ObjRef,
    pub range: ObjRef,
    pub slice: ObjRef,
    pub function: ObjRef,
    pub method: ObjRef,
    pub native: ObjRef,
    pub property: ObjRef,
    pub generator: ObjRef,
    pub code: ObjRef,
    pub seq_iterator: ObjRef,
    pub range_iterator: ObjRef,
    pub dict_iterator: ObjRef,
    pub enumerate: ObjRef,
    pub zip: ObjRef,
    pub thread: Option<ObjRef>,
}

impl BaseClasses {
    pub fn all(&self) -> impl Iterator<Item = ObjRef> + '_ {
        [
            self.object,
            self.type_,
            self.module,
            self.none_type,
            self.not_implemented_type,
            self.bool,
            self.int,
            self.float,
            self.str,
            self.bytes,
            self.bytearray,
            self.tuple,
            self.list,
            self.dict,
            self.set,
            self.range,
            self.slice,
            self.function,
            self.method,
            self.native,
            self.property,
            self.generator,
            self.code,
            self.seq_iterator,
            self.range_iterator,
            self.dict_iterator,
            self.enumerate,
            self.zip,
        ]
        .into_iter()
        .chain(self.thread)
    }
}

pub struct Vm {
    pub heap: Heap,
    /// 현재 GIL을 가진 스레드의 상태
    pub ts: ThreadState,
    /// 실행 대기 중인 다른 스레드들
    pub parked: FxHashMap<u32, ThreadState>,
    pub config: VmConfig,
    pub names: [ObjRef; Name::COUNT],
    pub base: BaseClasses,
    pub exceptions: [ObjRef; ExcKind::COUNT],
    pub builtins: ObjRef,
    pub system: ObjRef,
    /// 모듈 이름 → 모듈 인스턴스
    pub modules: Table,
    pub io: Box<dyn RuntimeIo + Send>,
    /// 외부(시그널 핸들러 등)에서 세우는 인터럽트 플래그
    pub interrupt: Arc<AtomicBool>,
    /// traceback 출력용 소스 캐시
    pub sources: FxHashMap<String, Arc<str>>,
    pub argv: Vec<String>,
    pub(crate) shared: Option<Weak<Mutex<Vm>>>,
    pub(crate) thread_handles: FxHashMap<u32, JoinHandle<()>>,
    pub(crate) next_thread_id: u32,
}

// ========== VM 구현 ==========

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self::with_io(config, Box::new(StdIo))
    }

    /// `init_vm`: 전역 상태와 주 스레드를 만들고 내장 클래스를 등록합니다.
    pub fn with_io(config: VmConfig, io: Box<dyn RuntimeIo + Send>) -> Self {
        let mut heap = Heap::new(config.gc_floor);
        heap.stress = config.flags.contains(VmFlags::ENABLE_STRESS_GC);
        let mut names = [ObjRef::default(); Name::COUNT];
        for name in Name::iter() {
            names[name as usize] = heap.intern(name.as_str());
        }
        let mut vm = Self {
            heap,
            ts: ThreadState::new(0),
            parked: FxHashMap::default(),
            config,
            names,
            base: BaseClasses::default(),
            exceptions: [ObjRef::default(); ExcKind::COUNT],
            builtins: ObjRef::default(),
            system: ObjRef::default(),
            modules: Table::new(),
            io,
            interrupt: Arc::new(AtomicBool::new(false)),
            sources: FxHashMap::default(),
            argv: Vec::new(),
            shared: None,
            thread_handles: FxHashMap::default(),
            next_thread_id: 1,
        };
        crate::vm::builtins::init(&mut vm);
        vm
    }

    /// `free_vm`: 모든 객체와 스레드 상태를 버리고 처음 상태로 다시 만듭니다.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        let io = std::mem::replace(&mut self.io, Box::new(StdIo));
        let interrupt = self.interrupt.clone();
        interrupt.store(false, Ordering::Relaxed);
        self.heap.clear();
        *self = Self::with_io(config, io);
        self.interrupt = interrupt;
    }

    pub fn flags(&self) -> VmFlags {
        self.config.flags
    }

    // ========== 스택 연산 ==========

    pub fn push(&mut self, v: Value) -> VmResult<()> {
        if self.ts.stack.len() >= self.config.max_stack {
            return Err(fatal("stack overflow"));
        }
        self.ts.stack.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.ts.stack.pop().ok_or_else(|| fatal("stack underflow"))
    }

    /// `depth` 0은 스택 top
    pub fn peek(&self, depth: usize) -> VmResult<Value> {
        let len = self.ts.stack.len();
        if depth < len {
            Ok(self.ts.stack[len - 1 - depth])
        } else {
            Err(fatal("stack underflow"))
        }
    }

    // ========== 이름과 문자열 ==========

    pub fn name(&self, name: Name) -> ObjRef {
        self.names[name as usize]
    }

    pub fn intern(&mut self, s: &str) -> ObjRef {
        self.heap.intern(s)
    }

    pub fn new_string(&mut self, s: &str) -> Value {
        Value::Object(self.heap.intern(s))
    }

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        match self.heap.kind(r) {
            ObjKind::String(s) => s.hash,
            _ => r.index() as u32,
        }
    }

    /// 문자열이면 그 내용을 복사해 돌려줍니다.
    pub fn string_of(&self, v: Value) -> Option<String> {
        self.heap.value_str(v).map(str::to_string)
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.heap.alloc(ObjKind::List(items)))
    }

    pub fn new_tuple(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.heap.alloc(ObjKind::Tuple(items.into_boxed_slice())))
    }

    pub fn new_dict(&mut self) -> ObjRef {
        self.heap.alloc(ObjKind::Dict(Table::new()))
    }

    pub fn new_bytes(&mut self, bytes: Vec<u8>) -> Value {
        Value::Object(self.heap.alloc(ObjKind::Bytes(bytes.into_boxed_slice())))
    }

    pub fn new_instance(&mut self, class: ObjRef) -> ObjRef {
        self.heap
            .alloc(ObjKind::Instance(crate::vm::object::InstanceObj::new(class)))
    }

    // ========== 문자열 키 테이블 ==========

    pub fn table_get(&self, table: &Table, name: ObjRef) -> Option<Value> {
        table.get(Value::Object(name), self.string_hash(name))
    }

    /// 인스턴스/모듈의 필드
    pub fn get_field(&self, obj: ObjRef, name: ObjRef) -> Option<Value> {
        match self.heap.kind(obj) {
            ObjKind::Instance(instance) => self.table_get(&instance.fields, name),
            _ => None,
        }
    }

    pub fn set_field(&mut self, obj: ObjRef, name: ObjRef, value: Value) {
        let hash = self.string_hash(name);
        if let ObjKind::Instance(instance) = self.heap.kind_mut(obj) {
            instance.fields.set(Value::Object(name), hash, value);
        }
    }

    pub fn set_field_str(&mut self, obj: ObjRef, name: &str, value: Value) {
        let name = self.intern(name);
        self.set_field(obj, name, value);
    }

    // ========== 클래스 ==========

    /// `make_class`: 새 클래스를 만들고 base의 subclass 집합에 등록합니다.
    pub fn make_class(&mut self, name: &str, base: Option<ObjRef>) -> ObjRef {
        let name = self.intern(name);
        let class = self.heap.alloc(ObjKind::Class(Box::new(ClassObj::new(name))));
        if let Some(base) = base {
            self.set_base(class, base);
        }
        class
    }

    /// base를 설정하고 인스턴스 레이아웃을 물려받습니다.
    pub fn set_base(&mut self, class: ObjRef, base: ObjRef) {
        let layout = match self.heap.kind(base) {
            ObjKind::Class(b) => b.layout,
            _ => InstanceLayout::Plain,
        };
        if let ObjKind::Class(c) = self.heap.kind_mut(class) {
            c.base = Some(base);
            c.layout = layout;
        }
        let hash = class.index() as u32;
        if let ObjKind::Class(b) = self.heap.kind_mut(base) {
            b.subclasses.set(Value::Object(class), hash, Value::None);
        }
    }

    pub fn class_base(&self, class: ObjRef) -> Option<ObjRef> {
        match self.heap.kind(class) {
            ObjKind::Class(c) => c.base,
            _ => None,
        }
    }

    pub fn class_name(&self, class: ObjRef) -> String {
        match self.heap.kind(class) {
            ObjKind::Class(c) => self.heap.str(c.name).unwrap_or("?").to_string(),
            _ => "?".to_string(),
        }
    }

    /// base chain을 따라 `methods`를 조회합니다.
    pub fn class_lookup(&self, class: ObjRef, name: ObjRef) -> Option<Value> {
        let hash = self.string_hash(name);
        let mut current = Some(class);
        while let Some(c) = current {
            let ObjKind::Class(obj) = self.heap.kind(c) else { return None };
            if let Some(v) = obj.methods.get(Value::Object(name), hash) {
                return Some(v);
            }
            current = obj.base;
        }
        None
    }

    /// 클래스가 직접 정의한 `name`의 소유 클래스
    pub fn class_lookup_owner(&self, class: ObjRef, name: ObjRef) -> Option<(ObjRef, Value)> {
        let hash = self.string_hash(name);
        let mut current = Some(class);
        while let Some(c) = current {
            let ObjKind::Class(obj) = self.heap.kind(c) else { return None };
            if let Some(v) = obj.methods.get(Value::Object(name), hash) {
                return Some((c, v));
            }
            current = obj.base;
        }
        None
    }

    pub fn set_method(&mut self, class: ObjRef, name: ObjRef, value: Value) {
        let hash = self.string_hash(name);
        if let ObjKind::Class(c) = self.heap.kind_mut(class) {
            c.methods.set(Value::Object(name), hash, value);
        }
    }

    /// `finalize_class`: dunder 캐시를 methods와 base chain에서 다시 채웁니다.
    pub fn finalize_class(&mut self, class: ObjRef) {
        let mut cache = [None; Dunder::COUNT];
        for dunder in Dunder::iter() {
            cache[dunder as usize] = self.class_lookup(class, self.name(dunder.name()));
        }
        let docstring = self
            .class_lookup(class, self.name(Name::Doc))
            .and_then(|v| v.as_object())
            .filter(|r| self.heap.str(*r).is_some());
        if let ObjKind::Class(c) = self.heap.kind_mut(class) {
            c.cache = cache;
            if docstring.is_some() {
                c.docstring = docstring;
            }
        }
    }

    /// 클래스와 모든 자식 클래스의 캐시를 갱신합니다.
    pub fn refinalize_tree(&mut self, class: ObjRef) {
        let mut pending = vec![class];
        while let Some(c) = pending.pop() {
            self.finalize_class(c);
            if let ObjKind::Class(obj) = self.heap.kind(c) {
                pending.extend(obj.subclasses.iter().filter_map(|e| e.key.as_object()));
            }
        }
    }

    pub fn class_slot(&self, class: ObjRef, dunder: Dunder) -> Option<Value> {
        match self.heap.kind(class) {
            ObjKind::Class(c) => c.slot(dunder),
            _ => None,
        }
    }

    /// 값의 클래스
    pub fn type_of(&self, v: Value) -> ObjRef {
        let b = &self.base;
        match v {
            Value::None => b.none_type,
            Value::NotImplemented => b.not_implemented_type,
            Value::Bool(_) => b.bool,
            Value::Int(_) => b.int,
            Value::Float(_) => b.float,
            Value::Kwargs(_) | Value::Handler(_) => b.object,
            Value::Object(r) => match self.heap.kind(r) {
                ObjKind::String(_) => b.str,
                ObjKind::Tuple(_) => b.tuple,
                ObjKind::List(_) => b.list,
                ObjKind::Bytes(_) => b.bytes,
                ObjKind::ByteArray(_) => b.bytearray,
                ObjKind::Dict(_) => b.dict,
                ObjKind::Class(_) => b.type_,
                ObjKind::Instance(i) => i.class,
                ObjKind::Code(_) => b.code,
                ObjKind::Closure(_) => b.function,
                ObjKind::Upvalue(_) => b.object,
                ObjKind::BoundMethod(_) => b.method,
                ObjKind::Native(_) => b.native,
                ObjKind::Property(_) => b.property,
                ObjKind::Generator(_) => b.generator,
            },
        }
    }

    pub fn type_name(&self, v: Value) -> String {
        self.class_name(self.type_of(v))
    }

    pub fn is_subclass(&self, class: ObjRef, base: ObjRef) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == base {
                return true;
            }
            current = self.class_base(c);
        }
        false
    }

    pub fn is_instance(&self, v: Value, class: ObjRef) -> bool {
        self.is_subclass(self.type_of(v), class)
    }

    pub fn is_class(&self, v: Value) -> bool {
        v.as_object()
            .is_some_and(|r| matches!(self.heap.kind(r), ObjKind::Class(_)))
    }

    // ========== 네이티브 등록 ==========

    /// `define_native`: `.name`은 메서드(접근 시 바인딩), `:name`은 동적 프로퍼티(접근 시 호출),
    /// 접두사가 없으면 바인딩하지 않는 함수입니다. `target`이 클래스면 `methods`,
    /// 인스턴스/모듈이면 `fields`에 등록됩니다.
    pub fn define_native(&mut self, target: ObjRef, name: &'static str, function: NativeFn) -> ObjRef {
        let (bare, flags) = match name.as_bytes().first() {
            Some(b'.') => (&name[1..], ObjFlags::empty()),
            Some(b':') => (&name[1..], ObjFlags::DYNAMIC_PROPERTY),
            _ => (name, ObjFlags::STATIC_METHOD),
        };
        let native = self.heap.alloc_with_flags(
            ObjKind::Native(NativeObj {
                name: bare,
                function,
                doc: None,
            }),
            flags,
        );
        self.attach(target, bare, Value::Object(native));
        native
    }

    /// 클래스면 methods, 그 외에는 fields에 값을 넣습니다.
    pub fn attach(&mut self, target: ObjRef, name: &str, value: Value) {
        let name = self.intern(name);
        if matches!(self.heap.kind(target), ObjKind::Class(_)) {
            self.set_method(target, name, value);
        } else {
            self.set_field(target, name, value);
        }
    }

    pub fn exc(&self, kind: ExcKind) -> ObjRef {
        self.exceptions[kind as usize]
    }

    // ========== 스레드 ==========

    /// 다른 스레드가 존재하는지
    pub fn has_other_threads(&self) -> bool {
        !self.parked.is_empty() || !self.thread_handles.is_empty()
    }

    /// `tid`의 상태를 현재 상태로 가져옵니다. 지금 상태는 parked로 돌아갑니다.
    pub fn switch_to(&mut self, tid: u32) {
        if self.ts.id == tid {
            return;
        }
        if let Some(next) = self.parked.remove(&tid) {
            let previous = std::mem::replace(&mut self.ts, next);
            // 종료된 스레드의 빈 상태는 다시 보관하지 않음
            if previous.id != u32::MAX {
                self.parked.insert(previous.id, previous);
            }
        }
    }

    /// 처리되지 않은 예외 이후 현재 스레드의 프레임과 스택을 모두 버립니다.
    pub fn unwind_all(&mut self) {
        self.close_upvalues(0);
        self.ts.stack.clear();
        self.ts.frames.clear();
        self.ts.scratch.clear();
        self.ts.exit_on_frame = 0;
        self.ts.nesting = 0;
        self.ts.pending_join = None;
    }

    pub fn is_thread_alive(&self, tid: u32) -> bool {
        self.ts.id == tid || self.parked.contains_key(&tid)
    }
}

// ========== 유틸리티 함수 ==========

/// 음수 인덱스를 보정하고 범위를 검사합니다.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}
