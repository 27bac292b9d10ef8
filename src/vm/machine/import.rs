//! 모듈: 코드 객체 적재, 모듈 인스턴스 생성, `import` 경로 탐색
//!
//! 모듈 캐시(`Vm::modules`)는 점으로 구분된 전체 이름을 키로 씁니다. 모듈은 실행 전에
//! 캐시에 들어가므로 순환 import는 부분적으로 초기화된 모듈을 보게 됩니다.

use std::path::PathBuf;
use std::sync::Arc;

use super::exceptions::ExcKind;
use super::{Vm, VmResult};
use crate::vm::bytecode::{Constant, FunctionProto};
use crate::vm::object::{ClosureObj, CodeObj, ObjKind};
use crate::vm::type_def::Name;
use crate::vm::value::{ObjRef, Value};

/// 모듈 파일 확장자
pub const MODULE_EXTENSION: &str = "krk";
pub const PACKAGE_INIT: &str = "__init__.krk";

impl Vm {
    // ========== 코드 객체 ==========

    /// 순수 데이터 코드 객체를 힙으로 올립니다. 중첩된 코드 상수도 함께 올라갑니다.
    pub fn load_proto(&mut self, proto: &FunctionProto) -> ObjRef {
        let constants = proto
            .constants
            .iter()
            .map(|constant| match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => self.new_string(s),
                Constant::Bytes(b) => self.new_bytes(b.clone()),
                Constant::Code(inner) => Value::Object(self.load_proto(inner)),
            })
            .collect();
        let name = self.intern(&proto.name);
        let filename = self.intern(&proto.filename);
        let docstring = proto.docstring.as_deref().map(|d| self.intern(d));
        let arg_names = proto.arg_names.iter().map(|n| self.intern(n)).collect();
        self.heap.alloc(ObjKind::Code(Box::new(CodeObj {
            name,
            filename,
            docstring,
            bytecode: proto.code.clone().into(),
            lines: proto.lines.clone(),
            constants,
            required_args: proto.required_args,
            keyword_args: proto.keyword_args,
            kwonly_args: proto.kwonly_args,
            flags: proto.flags,
            upvalue_count: proto.upvalue_count,
            local_count: proto.local_count,
            arg_names,
            local_names: proto.local_names.clone(),
        })))
    }

    /// 모듈 최상위 코드를 실행할 클로저
    pub fn module_closure(&mut self, proto: &FunctionProto, module: ObjRef) -> Value {
        let code = self.load_proto(proto);
        Value::Object(self.heap.alloc(ObjKind::Closure(ClosureObj {
            code,
            upvalues: Vec::new(),
            globals: module,
            owner_class: None,
        })))
    }

    // ========== 모듈 ==========

    /// `start_module`: builtins가 연결된 새 모듈 인스턴스를 만들고 현재 모듈로 설정합니다.
    pub fn start_module(&mut self, name: &str) -> ObjRef {
        let module = self.new_instance(self.base.module);
        self.set_field(module, self.name(Name::Builtins), Value::Object(self.builtins));
        let name = self.new_string(name);
        self.set_field(module, self.name(Name::DunderName), name);
        self.ts.module = Some(module);
        module
    }

    pub fn cached_module(&self, name: &str) -> Option<Value> {
        let key = self.heap.find_interned(name)?;
        self.modules.get(Value::Object(key), self.string_hash(key))
    }

    pub fn register_module(&mut self, name: &str, module: ObjRef) {
        let key = self.intern(name);
        let hash = self.string_hash(key);
        self.modules.set(Value::Object(key), hash, Value::Object(module));
    }

    fn unregister_module(&mut self, name: &str) {
        if let Some(key) = self.heap.find_interned(name) {
            let hash = self.string_hash(key);
            self.modules.delete(Value::Object(key), hash);
        }
    }

    /// `kuroko.module_paths`가 리스트면 그것을, 아니면 설정의 경로를 씁니다.
    pub fn module_search_paths(&self) -> Vec<PathBuf> {
        let from_system = self
            .heap
            .find_interned("module_paths")
            .and_then(|name| self.get_field(self.system, name))
            .and_then(|v| v.as_object())
            .and_then(|r| match self.heap.kind(r) {
                ObjKind::List(items) => Some(
                    items
                        .iter()
                        .filter_map(|v| self.heap.value_str(*v).map(PathBuf::from))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            });
        from_system.unwrap_or_else(|| self.config.module_paths.clone())
    }

    /// `a.b` → `a/b.krk` 또는 `a/b/__init__.krk`
    pub fn find_module_file(&self, dotted: &str) -> Option<(PathBuf, bool)> {
        let relative: PathBuf = dotted.split('.').collect();
        for dir in self.module_search_paths() {
            let base = dir.join(&relative);
            let file = base.with_extension(MODULE_EXTENSION);
            tracing::debug!(target: "kuroko::import", candidate = %file.display(), "probing");
            if file.is_file() {
                return Some((file, false));
            }
            let package = base.join(PACKAGE_INIT);
            if package.is_file() {
                return Some((package, true));
            }
        }
        None
    }

    /// `import a.b`: 부모부터 차례로 적재하고 마지막 모듈을 돌려줍니다.
    pub fn import_module(&mut self, dotted: &str) -> VmResult<Value> {
        if let Some(module) = self.cached_module(dotted) {
            return Ok(module);
        }
        let parent = match dotted.rsplit_once('.') {
            Some((parent, _)) => Some(self.import_module(parent)?),
            None => None,
        };
        if parent.is_some_and(|p| p.as_object().is_none()) {
            return Err(fatal_import(dotted));
        }

        let Some((path, is_package)) = self.find_module_file(dotted) else {
            return Err(self.runtime_error(ExcKind::ImportError, format!("No module named '{}'", dotted)));
        };
        let module = self.load_module_file(&path, dotted, is_package)?;

        // 부모 패키지에 하위 모듈을 속성으로 연결
        if let (Some(parent), Some((_, leaf))) = (parent.and_then(|p| p.as_object()), dotted.rsplit_once('.')) {
            self.set_field_str(parent, leaf, module);
        }
        Ok(module)
    }

    /// 파일을 컴파일해 `name` 모듈로 실행합니다.
    pub fn load_module_file(&mut self, path: &std::path::Path, name: &str, is_package: bool) -> VmResult<Value> {
        let filename = path.display().to_string();
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                return Err(self.runtime_error(ExcKind::IOError, format!("{}: {}", filename, e)));
            }
        };
        tracing::debug!(target: "kuroko::import", module = name, file = %filename, "loading module");
        self.run_source_as(&source, &filename, name, |vm, module| {
            if is_package {
                let dir = path
                    .parent()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                let dir = vm.new_string(&dir);
                vm.set_field(module, vm.name(Name::Path), dir);
            }
        })
    }

    /// 소스를 컴파일하고 새 모듈 `name`으로 실행합니다. 모듈은 실행 전에 캐시에 들어갑니다.
    pub fn run_source_as(
        &mut self,
        source: &str,
        filename: &str,
        name: &str,
        setup: impl FnOnce(&mut Vm, ObjRef),
    ) -> VmResult<Value> {
        let proto = match crate::compile_source(source, filename) {
            Ok(proto) => proto,
            Err(diagnostics) => {
                let message = diagnostics
                    .first()
                    .map(|d| d.summary(source, filename))
                    .unwrap_or_else(|| "invalid syntax".to_string());
                return Err(self.runtime_error(ExcKind::SyntaxError, message));
            }
        };
        self.sources.insert(filename.to_string(), Arc::from(source));
        self.run_proto_as(&proto, name, setup)
    }

    /// 컴파일된 코드를 새 모듈로 실행하고 모듈을 돌려줍니다.
    pub fn run_proto_as(
        &mut self,
        proto: &FunctionProto,
        name: &str,
        setup: impl FnOnce(&mut Vm, ObjRef),
    ) -> VmResult<Value> {
        let previous = self.ts.module;
        let module = self.start_module(name);
        let file = self.new_string(&proto.filename);
        self.set_field(module, self.name(Name::File), file);
        setup(self, module);
        self.register_module(name, module);

        let closure = self.module_closure(proto, module);
        let result = self.call_callable(closure, &[]);
        self.ts.module = previous;
        match result {
            Ok(_) => {
                tracing::debug!(target: "kuroko::import", module = name, "module loaded");
                Ok(Value::Object(module))
            }
            Err(e) => {
                self.unregister_module(name);
                Err(e)
            }
        }
    }

    /// `from m import name`: 모듈 속성, 없으면 하위 모듈을 시도합니다.
    pub(super) fn import_from(&mut self, module: Value, name: ObjRef) -> VmResult<Value> {
        if let Some(v) = module.as_object().and_then(|m| self.get_field(m, name)) {
            return Ok(v);
        }
        let module_name = module
            .as_object()
            .and_then(|m| self.get_field(m, self.name(Name::DunderName)))
            .and_then(|v| self.string_of(v))
            .unwrap_or_else(|| "?".to_string());
        let leaf = self.heap.str(name).unwrap_or("?").to_string();
        let dotted = format!("{}.{}", module_name, leaf);
        if self.find_module_file(&dotted).is_some() {
            return self.import_module(&dotted);
        }
        Err(self.runtime_error(
            ExcKind::ImportError,
            format!("cannot import name '{}' from '{}'", leaf, module_name),
        ))
    }
}

fn fatal_import(dotted: &str) -> super::VmError {
    super::fatal(format!("parent of '{}' is not a module", dotted))
}
