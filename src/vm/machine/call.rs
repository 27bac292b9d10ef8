//! # 호출 규약
//!
//! 인자 `argc`개 아래에 callee 슬롯이 있는 스택에서 호출을 시작합니다.
//!
//! ```text
//! [.., callee, a0, a1, .., (key, value)*, Kwargs(n)]
//!      ^out_slots  ^slots
//! ```
//!
//! - `extra`는 반환 시 인자 아래에서 함께 치울 슬롯 수입니다. 보통 callee 슬롯 1개이고,
//!   bound method/클래스/`__call__` 인스턴스는 callee 슬롯을 receiver로 바꿔 `argc + 1`,
//!   `extra = 0`으로 다시 호출합니다.
//! - 키워드 인자 블록은 이름/마커와 값의 쌍, 그리고 마지막의 쌍 개수로 이루어집니다.
//!   마커는 `*expr`(`KWARGS_LIST`), `**expr`(`KWARGS_DICT`), 위치 인자(`KWARGS_SINGLE`)입니다.
//! - 클로저는 파라미터를 이름으로 바인딩하고, 채워지지 않은 선택 인자 슬롯에는
//!   `KWARGS_UNSET` 마커를 둡니다. 컴파일된 prologue가 기본값을 계산합니다.

use super::exceptions::ExcKind;
use super::thread::CallFrame;
use super::{Dispatch, Vm, VmResult, fatal};
use crate::vm::bytecode::CodeFlags;
use crate::vm::object::{InstanceData, InstanceLayout, NativeObj, ObjKind};
use crate::vm::table::Table;
use crate::vm::type_def::Dunder;
use crate::vm::value::{
    HandlerKind, KWARGS_DICT, KWARGS_LIST, KWARGS_SINGLE, KWARGS_UNSET, ObjRef, Value,
};

/// `call_value`의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// 관리 코드 프레임이 쌓였음. 디스패치가 이어서 실행합니다.
    Pushed,
    /// 결과가 이미 스택 top에 있음
    Done,
}

/// 인자 바인딩에 필요한 코드 객체 정보
struct Signature {
    name: String,
    required: usize,
    optional: usize,
    kwonly: usize,
    flags: CodeFlags,
    arg_names: Vec<ObjRef>,
}

impl Signature {
    fn positional(&self) -> usize {
        self.required + self.optional
    }
}

impl Vm {
    pub fn call_value(&mut self, callee: Value, argc: usize, extra: usize) -> VmResult<CallOutcome> {
        self.call_value_kw(callee, argc, extra, false)
    }

    pub(super) fn call_value_kw(
        &mut self,
        callee: Value,
        argc: usize,
        extra: usize,
        has_kw: bool,
    ) -> VmResult<CallOutcome> {
        let Value::Object(r) = callee else {
            return Err(self.not_callable(callee));
        };
        match self.heap.kind(r) {
            ObjKind::Closure(_) => self.call_closure(r, argc, extra, has_kw),
            ObjKind::Native(native) => {
                let native = *native;
                self.call_native(native, argc, extra, has_kw)
            }
            ObjKind::BoundMethod(bound) => {
                let bound = *bound;
                self.insert_receiver(bound.receiver, argc, extra);
                self.call_value_kw(bound.method, argc + 1, 0, has_kw)
            }
            ObjKind::Class(_) => self.call_class(r, argc, extra, has_kw),
            ObjKind::Property(property) => {
                let getter = property.getter;
                self.call_value_kw(getter, argc, extra, has_kw)
            }
            _ => {
                let class = self.type_of(callee);
                match self.class_slot(class, Dunder::Call) {
                    Some(call) => {
                        self.insert_receiver(callee, argc, extra);
                        self.call_value_kw(call, argc + 1, 0, has_kw)
                    }
                    None => Err(self.not_callable(callee)),
                }
            }
        }
    }

    fn not_callable(&mut self, callee: Value) -> super::VmError {
        let name = self.type_name(callee);
        self.runtime_error(ExcKind::TypeError, format!("'{}' object is not callable", name))
    }

    /// callee 슬롯을 receiver로 바꾸거나(`extra == 1`), 인자 앞에 끼워 넣습니다.
    fn insert_receiver(&mut self, receiver: Value, argc: usize, extra: usize) {
        let at = self.ts.stack.len() - argc;
        if extra >= 1 {
            self.ts.stack[at - 1] = receiver;
        } else {
            self.ts.stack.insert(at, receiver);
        }
    }

    /// 네이티브에서 관리 코드를 호출하고 결과를 돌려받습니다.
    pub fn call_callable(&mut self, callee: Value, args: &[Value]) -> VmResult<Value> {
        let base = self.ts.stack.len();
        self.push(callee)?;
        for &arg in args {
            self.push(arg)?;
        }
        let result = match self.call_value(callee, args.len(), 1) {
            Ok(CallOutcome::Pushed) => self.run_next(),
            Ok(CallOutcome::Done) => self.pop(),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.ts.stack.truncate(base);
        }
        result
    }

    /// 방금 쌓인 프레임이 반환될 때까지 실행합니다.
    pub fn run_next(&mut self) -> VmResult<Value> {
        let saved = self.ts.exit_on_frame;
        self.ts.exit_on_frame = self.ts.frames.len().saturating_sub(1);
        self.ts.nesting += 1;
        let result = self.run();
        self.ts.nesting -= 1;
        self.ts.exit_on_frame = saved;
        match result? {
            Dispatch::Return(v) => Ok(v),
            other => Err(fatal(format!("unexpected {:?} in nested call", other))),
        }
    }

    // ========== 클래스 ==========

    fn call_class(&mut self, class: ObjRef, argc: usize, extra: usize, has_kw: bool) -> VmResult<CallOutcome> {
        if let Some(new) = self.class_slot(class, Dunder::New) {
            self.insert_receiver(Value::Object(class), argc, extra);
            return self.call_value_kw(new, argc + 1, 0, has_kw);
        }

        let instance = self.new_instance(class);
        let layout = match self.heap.kind(class) {
            ObjKind::Class(c) => c.layout,
            _ => InstanceLayout::Plain,
        };
        let data = match layout {
            InstanceLayout::Plain => InstanceData::None,
            InstanceLayout::Thread => InstanceData::Thread { tid: None },
            InstanceLayout::Set => InstanceData::Set(Table::new()),
        };
        if let ObjKind::Instance(i) = self.heap.kind_mut(instance) {
            i.data = data;
        }
        let instance = Value::Object(instance);
        self.insert_receiver(instance, argc, extra);

        match self.class_slot(class, Dunder::Init) {
            Some(init) => {
                let outcome = self.call_value_kw(init, argc + 1, 0, has_kw)?;
                if outcome == CallOutcome::Done {
                    // 네이티브 __init__의 반환값 대신 인스턴스
                    self.pop()?;
                    self.push(instance)?;
                }
                Ok(outcome)
            }
            None => {
                if argc > 0 {
                    let name = self.class_name(class);
                    return Err(self.runtime_error(ExcKind::TypeError, format!("{}() takes no arguments", name)));
                }
                let len = self.ts.stack.len();
                self.ts.stack.truncate(len - 1);
                self.push(instance)?;
                Ok(CallOutcome::Done)
            }
        }
    }

    // ========== 네이티브 ==========

    fn call_native(&mut self, native: NativeObj, argc: usize, extra: usize, has_kw: bool) -> VmResult<CallOutcome> {
        let (count, kwargs) = if has_kw {
            self.collapse_kwargs(argc, native.name)?
        } else {
            (argc, None)
        };
        let top = self.ts.stack.len();
        let start = top - kwargs.is_some() as usize - count;
        let out = start - extra;
        let args: Vec<Value> = self.ts.stack[start..start + count].to_vec();
        let result = (native.function)(self, &args, kwargs)?;
        self.ts.stack.truncate(out);
        self.push(result)?;
        Ok(CallOutcome::Done)
    }

    /// 키워드 블록을 풀어 위치 인자 + kwargs dict로 바꿉니다.
    /// 결과 스택: `[.., positional*, dict]`
    fn collapse_kwargs(&mut self, argc: usize, callee_name: &str) -> VmResult<(usize, Option<ObjRef>)> {
        let top = self.ts.stack.len();
        let pairs = match self.ts.stack.last() {
            Some(Value::Kwargs(n)) => *n as usize,
            _ => return Err(fatal("CALL_KW without keyword block")),
        };
        let block = top - 1 - pairs * 2;
        let direct = block - (top - argc);

        let list = self.heap.alloc(ObjKind::List(Vec::new()));
        let dict = self.new_dict();
        self.ts.scratch.push(Value::Object(list));
        self.ts.scratch.push(Value::Object(dict));

        let result = (|| -> VmResult<()> {
            for i in 0..pairs {
                let key = self.ts.stack[block + i * 2];
                let value = self.ts.stack[block + i * 2 + 1];
                match key {
                    Value::Kwargs(KWARGS_SINGLE) => self.list_push(list, value),
                    Value::Kwargs(KWARGS_LIST) => {
                        let items = self.collect_iterable(value)?;
                        for item in items {
                            self.list_push(list, item);
                        }
                    }
                    Value::Kwargs(KWARGS_DICT) => {
                        let entries = match value.as_object().map(|r| self.heap.kind(r)) {
                            Some(ObjKind::Dict(table)) => table.iter().map(|e| (e.key, e.value)).collect::<Vec<_>>(),
                            _ => {
                                let name = self.type_name(value);
                                return Err(self.runtime_error(
                                    ExcKind::TypeError,
                                    format!("{}() argument after ** must be a dict, not {}", callee_name, name),
                                ));
                            }
                        };
                        for (k, v) in entries {
                            self.add_keyword(dict, k, v, callee_name)?;
                        }
                    }
                    Value::Object(_) => self.add_keyword(dict, key, value, callee_name)?,
                    _ => return Err(fatal("malformed keyword block")),
                }
            }
            Ok(())
        })();

        self.ts.scratch.truncate(self.ts.scratch.len() - 2);
        result?;

        let expanded = match self.heap.kind(list) {
            ObjKind::List(items) => items.clone(),
            _ => Vec::new(),
        };
        self.ts.stack.truncate(block);
        let count = direct + expanded.len();
        self.ts.stack.extend(expanded);
        self.push(Value::Object(dict))?;
        Ok((count, Some(dict)))
    }

    fn list_push(&mut self, list: ObjRef, value: Value) {
        if let ObjKind::List(items) = self.heap.kind_mut(list) {
            items.push(value);
        }
    }

    fn add_keyword(&mut self, dict: ObjRef, key: Value, value: Value, callee_name: &str) -> VmResult<()> {
        let Some(name) = key.as_object().filter(|r| self.heap.str(*r).is_some()) else {
            return Err(self.runtime_error(ExcKind::TypeError, format!("{}() keywords must be strings", callee_name)));
        };
        let hash = self.string_hash(name);
        let exists = match self.heap.kind(dict) {
            ObjKind::Dict(table) => table.get(key, hash).is_some(),
            _ => false,
        };
        if exists {
            let text = self.heap.str(name).unwrap_or_default().to_string();
            return Err(self.runtime_error(
                ExcKind::TypeError,
                format!("{}() got multiple values for keyword argument '{}'", callee_name, text),
            ));
        }
        if let ObjKind::Dict(table) = self.heap.kind_mut(dict) {
            table.set(key, hash, value);
        }
        Ok(())
    }

    // ========== 클로저 ==========

    fn signature(&self, code: ObjRef) -> VmResult<Signature> {
        match self.heap.kind(code) {
            ObjKind::Code(c) => Ok(Signature {
                name: self.heap.str(c.name).unwrap_or("?").to_string(),
                required: c.required_args as usize,
                optional: c.keyword_args as usize,
                kwonly: c.kwonly_args as usize,
                flags: c.flags,
                arg_names: c.arg_names.clone(),
            }),
            _ => Err(fatal("closure without code object")),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: usize, extra: usize, has_kw: bool) -> VmResult<CallOutcome> {
        if self.ts.frames.len() >= self.config.max_frames {
            return Err(self.runtime_error(ExcKind::Exception, "Too many call frames."));
        }
        let (code, globals) = match self.heap.kind(closure) {
            ObjKind::Closure(c) => (c.code, c.globals),
            _ => return Err(fatal("not a closure")),
        };
        let (bytecode, flags, local_count, required, positional, kwonly) = match self.heap.kind(code) {
            ObjKind::Code(c) => (
                c.bytecode.clone(),
                c.flags,
                c.local_count as usize,
                c.required_args as usize,
                c.positional_count(),
                c.kwonly_args as usize,
            ),
            _ => return Err(fatal("closure without code object")),
        };

        let simple = !has_kw
            && kwonly == 0
            && !flags.intersects(CodeFlags::COLLECTS_ARGS | CodeFlags::COLLECTS_KWS)
            && argc >= required
            && argc <= positional;
        let slots = if simple {
            let slots = self.ts.stack.len() - argc;
            for _ in argc..positional {
                self.push(Value::Kwargs(KWARGS_UNSET))?;
            }
            slots
        } else {
            let signature = self.signature(code)?;
            self.bind_arguments(&signature, argc, has_kw)?
        };
        let out_slots = slots - extra;

        let frame_top = slots + local_count;
        while self.ts.stack.len() < frame_top {
            self.push(Value::None)?;
        }

        if flags.contains(CodeFlags::IS_GENERATOR) {
            let generator = self.make_generator(closure, slots);
            self.ts.stack.truncate(out_slots);
            self.push(Value::Object(generator))?;
            return Ok(CallOutcome::Done);
        }

        self.ts.frames.push(CallFrame {
            closure,
            code,
            bytecode,
            ip: 0,
            slots,
            out_slots,
            globals,
            generator: None,
        });
        Ok(CallOutcome::Pushed)
    }

    /// 파라미터 순서(위치, 키워드 전용, `*args`, `**kwargs`)로 스택을 다시 씁니다.
    /// 반환값은 첫 파라미터 슬롯.
    fn bind_arguments(&mut self, sig: &Signature, argc: usize, has_kw: bool) -> VmResult<usize> {
        let (count, kwargs) = if has_kw {
            self.collapse_kwargs(argc, &sig.name)?
        } else {
            (argc, None)
        };
        let kw_slot = kwargs.is_some() as usize;
        let slots = self.ts.stack.len() - kw_slot - count;
        let positional = sig.positional();
        let collects_args = sig.flags.contains(CodeFlags::COLLECTS_ARGS);
        let collects_kws = sig.flags.contains(CodeFlags::COLLECTS_KWS);

        if count > positional && !collects_args {
            return Err(self.arity_error(sig, count));
        }

        let mut params = vec![Value::Kwargs(KWARGS_UNSET); positional + sig.kwonly];
        let given = count.min(positional);
        params[..given].copy_from_slice(&self.ts.stack[slots..slots + given]);
        let excess: Vec<Value> = self.ts.stack[slots + given..slots + count].to_vec();

        let collected = if collects_kws { Some(self.new_dict()) } else { None };
        if let Some(kwargs) = kwargs {
            let entries: Vec<(Value, Value, u32)> = match self.heap.kind(kwargs) {
                ObjKind::Dict(table) => table.iter().map(|e| (e.key, e.value, e.hash)).collect(),
                _ => Vec::new(),
            };
            for (key, value, hash) in entries {
                let position = sig.arg_names[..params.len()]
                    .iter()
                    .position(|&n| Value::Object(n).same(&key));
                match (position, collected) {
                    (Some(i), _) => {
                        if !params[i].is_unset() {
                            let text = self.heap.value_str(key).unwrap_or_default().to_string();
                            return Err(self.runtime_error(
                                ExcKind::TypeError,
                                format!("{}() got multiple values for argument '{}'", sig.name, text),
                            ));
                        }
                        params[i] = value;
                    }
                    (None, Some(dict)) => {
                        if let ObjKind::Dict(table) = self.heap.kind_mut(dict) {
                            table.set(key, hash, value);
                        }
                    }
                    (None, None) => {
                        let text = self.heap.value_str(key).unwrap_or_default().to_string();
                        return Err(self.runtime_error(
                            ExcKind::TypeError,
                            format!("{}() got an unexpected keyword argument '{}'", sig.name, text),
                        ));
                    }
                }
            }
        }

        for i in 0..sig.required {
            if params[i].is_unset() {
                if kwargs.is_none() {
                    return Err(self.arity_error(sig, count));
                }
                let text = self
                    .heap
                    .str(sig.arg_names[i])
                    .unwrap_or_default()
                    .to_string();
                return Err(self.runtime_error(
                    ExcKind::TypeError,
                    format!("{}() missing required positional argument: '{}'", sig.name, text),
                ));
            }
        }

        let star = if collects_args { Some(self.new_tuple(excess)) } else { None };
        self.ts.stack.truncate(slots);
        self.ts.stack.extend(params);
        if let Some(star) = star {
            self.push(star)?;
        }
        if let Some(dict) = collected {
            self.push(Value::Object(dict))?;
        }
        Ok(slots)
    }

    fn arity_error(&mut self, sig: &Signature, given: usize) -> super::VmError {
        let collects_args = sig.flags.contains(CodeFlags::COLLECTS_ARGS);
        let (word, expected) = if given < sig.required {
            let word = if sig.optional > 0 || collects_args { "at least" } else { "exactly" };
            (word, sig.required)
        } else {
            let word = if sig.optional > 0 { "at most" } else { "exactly" };
            (word, sig.positional())
        };
        self.runtime_error(
            ExcKind::ArgumentError,
            format!(
                "{}() takes {} {} argument{} ({} given)",
                sig.name,
                word,
                expected,
                if expected == 1 { "" } else { "s" },
                given
            ),
        )
    }

    // ========== 반환 ==========

    /// `RETURN`: 활성 finally가 있으면 그쪽으로, 아니면 프레임을 내립니다.
    pub(super) fn return_from_frame(&mut self, value: Value) -> VmResult<Option<Dispatch>> {
        let slots = self.ts.frames.last().map(|f| f.slots).ok_or_else(|| fatal("no active frame"))?;
        if let Some((index, target)) = self.find_handler(slots, |kind| kind == HandlerKind::Finally) {
            self.close_upvalues(index + 1);
            self.ts.stack.truncate(index + 1);
            self.ts.stack[index] = Value::Handler(crate::vm::value::Handler {
                kind: HandlerKind::FinallyReturn,
                target,
            });
            self.push(value)?;
            if let Some(frame) = self.ts.frames.last_mut() {
                frame.ip = target as usize;
            }
            return Ok(None);
        }

        self.close_upvalues(slots);
        let frame = self.ts.frames.pop().ok_or_else(|| fatal("no active frame"))?;
        let value = match frame.generator {
            Some(generator) => {
                self.finish_generator(generator, value);
                Value::Object(generator)
            }
            None => value,
        };
        self.ts.stack.truncate(frame.out_slots);
        if self.ts.frames.len() <= self.ts.exit_on_frame {
            return Ok(Some(Dispatch::Return(value)));
        }
        self.push(value)?;
        Ok(None)
    }

    /// 프레임 영역에서 가장 안쪽의 조건에 맞는 핸들러 `(스택 위치, 대상)`
    pub(super) fn find_handler(&self, slots: usize, accept: impl Fn(HandlerKind) -> bool) -> Option<(usize, u32)> {
        (slots..self.ts.stack.len()).rev().find_map(|i| match self.ts.stack[i] {
            Value::Handler(handler) if accept(handler.kind) => Some((i, handler.target)),
            _ => None,
        })
    }
}
