//! AST → 바이트코드 컴파일러
//!
//! 함수마다 `FunctionState` 하나를 쌓아 가며 `FunctionProto`를 만듭니다. 지역 변수는
//! 함수 단위 슬롯이고(파라미터가 먼저), 루프 반복자나 예외 핸들러 같은 숨은 값은
//! 지역 슬롯 위의 임시 스택에 놓입니다.

mod expr;
mod scope;

use rustc_hash::FxHashSet;

use crate::Diagnostic;
use crate::parser::ast::{BinaryOp, ClassDef, ExceptHandler, Expr, ExprS, FunctionDef, Literal, Params, Span, Stmt, StmtS};
use crate::vm::bytecode::{CodeFlags, Constant, FunctionProto, LocalName, OpCode};
use scope::ScopeScan;

pub type CompileResult<T> = Result<T, Diagnostic>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Module,
    Function,
    Method,
    /// `__init__`: 반환값은 항상 `self`
    Initializer,
    Lambda,
    Comprehension,
}

/// 이름이 가리키는 저장소
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarRef {
    Local(usize),
    Upvalue(usize),
    Global,
}

#[derive(Debug, Clone)]
struct UpvalueDesc {
    is_local: bool,
    index: u16,
}

/// `break`/`continue`가 빠져나가며 정리해야 하는 영역
#[derive(Debug, Clone)]
enum Block {
    Loop {
        start: usize,
        breaks: Vec<usize>,
    },
    /// try 본문: 스택에 핸들러
    Try,
    /// except 절: 핸들러와 예외
    Except,
    /// try/finally의 보호 영역: 빠져나갈 때 finally 본문을 인라인
    Finally(Vec<StmtS>),
    /// finally 본문: 핸들러와 payload
    FinallyBody,
}

struct FunctionState {
    proto: FunctionProto,
    kind: FunctionKind,
    /// 인덱스가 슬롯
    locals: Vec<String>,
    upvalues: Vec<UpvalueDesc>,
    globals: FxHashSet<String>,
    nonlocals: FxHashSet<String>,
    blocks: Vec<Block>,
    /// 처리 중인 예외를 담은 숨은 슬롯 (`raise`만 쓸 때)
    handling: Vec<usize>,
    line: u32,
}

impl FunctionState {
    fn new(name: &str, filename: &str, kind: FunctionKind, line: u32) -> Self {
        Self {
            proto: FunctionProto::new(name, filename),
            kind,
            locals: Vec::new(),
            upvalues: Vec::new(),
            globals: FxHashSet::default(),
            nonlocals: FxHashSet::default(),
            blocks: Vec::new(),
            handling: Vec::new(),
            line,
        }
    }

    fn local_slot(&self, name: &str) -> Option<usize> {
        self.locals.iter().position(|n| n == name)
    }
}

pub struct Compiler {
    filename: String,
    /// 각 줄의 시작 바이트 오프셋
    line_starts: Vec<usize>,
    functions: Vec<FunctionState>,
}

/// 소스 전체를 모듈 코드 객체로 컴파일합니다.
pub fn compile(program: &[StmtS], source: &str, filename: &str) -> CompileResult<FunctionProto> {
    Compiler::new(source, filename).compile_module(program)
}

impl Compiler {
    pub fn new(source: &str, filename: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            filename: filename.to_string(),
            line_starts,
            functions: Vec::new(),
        }
    }

    pub fn compile_module(mut self, program: &[StmtS]) -> CompileResult<FunctionProto> {
        let mut state = FunctionState::new("<module>", &self.filename, FunctionKind::Module, 1);
        if let Some((_, span)) = program.iter().find(|s| matches!(s.0, Stmt::Nonlocal(_))) {
            return Err(Diagnostic::new("nonlocal declaration not allowed at module level", span.clone()));
        }
        state.proto.docstring = docstring(program);
        self.functions.push(state);

        self.block(program)?;
        self.emit(OpCode::None);
        self.emit(OpCode::Return);
        Ok(self.finish_function())
    }

    // ========== 코드 작성 ==========

    fn state(&mut self) -> &mut FunctionState {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn state_ref(&self) -> &FunctionState {
        &self.functions[self.functions.len() - 1]
    }

    fn line_of(&self, offset: usize) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset) as u32
    }

    fn set_line(&mut self, span: &Span) {
        let line = self.line_of(span.start);
        self.state().line = line;
    }

    fn emit(&mut self, op: OpCode) {
        let state = self.state();
        let line = state.line;
        state.proto.write_op(op, line);
    }

    fn emit_arg(&mut self, op: OpCode, arg: usize) {
        let state = self.state();
        let line = state.line;
        state.proto.write_arg(op, arg, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let state = self.state();
        let line = state.line;
        state.proto.write_byte(byte, line);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let state = self.state();
        let line = state.line;
        state.proto.write_jump(op, line)
    }

    fn patch_jump(&mut self, at: usize, span: &Span) -> CompileResult<()> {
        self.state()
            .proto
            .patch_jump(at)
            .ok_or_else(|| Diagnostic::new("too much code to jump over", span.clone()))
    }

    fn emit_loop(&mut self, target: usize, span: &Span) -> CompileResult<()> {
        let state = self.state();
        let line = state.line;
        state
            .proto
            .write_loop(target, line)
            .ok_or_else(|| Diagnostic::new("loop body is too large", span.clone()))
    }

    fn offset(&self) -> usize {
        self.state_ref().proto.code.len()
    }

    fn add_constant(&mut self, constant: Constant) -> usize {
        self.state().proto.add_constant(constant)
    }

    fn name_constant(&mut self, name: &str) -> usize {
        self.add_constant(Constant::Str(name.to_string()))
    }

    fn emit_constant(&mut self, constant: Constant) {
        let index = self.add_constant(constant);
        self.emit_arg(OpCode::Constant, index);
    }

    /// 이름 없는 슬롯 하나를 예약합니다.
    fn hidden_local(&mut self, label: &str) -> usize {
        let state = self.state();
        state.locals.push(format!("<{}>", label));
        state.locals.len() - 1
    }

    // ========== 이름 해석 ==========

    fn resolve(&mut self, name: &str) -> VarRef {
        let depth = self.functions.len() - 1;
        self.resolve_at(depth, name)
    }

    fn resolve_at(&mut self, depth: usize, name: &str) -> VarRef {
        let state = &self.functions[depth];
        if state.kind == FunctionKind::Module || state.globals.contains(name) {
            return VarRef::Global;
        }
        if !state.nonlocals.contains(name) {
            if let Some(slot) = state.local_slot(name) {
                return VarRef::Local(slot);
            }
        }
        if depth == 0 {
            return VarRef::Global;
        }
        match self.resolve_at(depth - 1, name) {
            VarRef::Local(slot) => VarRef::Upvalue(self.add_upvalue(depth, true, slot)),
            VarRef::Upvalue(index) => VarRef::Upvalue(self.add_upvalue(depth, false, index)),
            VarRef::Global => VarRef::Global,
        }
    }

    fn add_upvalue(&mut self, depth: usize, is_local: bool, index: usize) -> usize {
        let state = &mut self.functions[depth];
        let index = index as u16;
        if let Some(i) = state
            .upvalues
            .iter()
            .position(|u| u.is_local == is_local && u.index == index)
        {
            return i;
        }
        state.upvalues.push(UpvalueDesc { is_local, index });
        state.upvalues.len() - 1
    }

    fn emit_load(&mut self, name: &str) {
        match self.resolve(name) {
            VarRef::Local(slot) => self.emit_arg(OpCode::GetLocal, slot),
            VarRef::Upvalue(index) => self.emit_arg(OpCode::GetUpvalue, index),
            VarRef::Global => {
                let index = self.name_constant(name);
                self.emit_arg(OpCode::GetGlobal, index);
            }
        }
    }

    /// 스택 top의 값을 저장하고 그대로 남깁니다.
    fn emit_store(&mut self, name: &str) {
        match self.resolve(name) {
            VarRef::Local(slot) => self.emit_arg(OpCode::SetLocal, slot),
            VarRef::Upvalue(index) => self.emit_arg(OpCode::SetUpvalue, index),
            VarRef::Global => {
                let index = self.name_constant(name);
                self.emit_arg(OpCode::SetGlobal, index);
            }
        }
    }

    // ========== 문장 ==========

    fn block(&mut self, body: &[StmtS]) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &StmtS) -> CompileResult<()> {
        let (node, span) = stmt;
        self.set_line(span);
        match node {
            Stmt::Expr(e) => {
                self.expr(e)?;
                self.emit(OpCode::Pop);
            }
            Stmt::Assign { targets, value } => {
                self.expr(value)?;
                for target in targets {
                    self.store_target(target)?;
                }
                self.emit(OpCode::Pop);
            }
            Stmt::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            Stmt::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            Stmt::Pass => {}
            Stmt::Break => {
                let loop_index = self.unwind_to_loop("break", span)?;
                let jump = self.emit_jump(OpCode::Jump);
                if let Some(Block::Loop { breaks, .. }) = self.state().blocks.get_mut(loop_index) {
                    breaks.push(jump);
                }
            }
            Stmt::Continue => {
                let loop_index = self.unwind_to_loop("continue", span)?;
                let start = match &self.state_ref().blocks[loop_index] {
                    Block::Loop { start, .. } => *start,
                    _ => 0,
                };
                self.emit_loop(start, span)?;
            }
            Stmt::Return(value) => self.return_stmt(value.as_ref(), span)?,
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                let mut end_jumps = Vec::new();
                let branches = std::iter::once((condition, then_block))
                    .chain(elif_blocks.iter().map(|(c, b)| (c, b)));
                for (cond, block) in branches {
                    self.expr(cond)?;
                    let skip = self.emit_jump(OpCode::PopJumpIfFalse);
                    self.block(block)?;
                    end_jumps.push(self.emit_jump(OpCode::Jump));
                    self.patch_jump(skip, span)?;
                }
                if let Some(block) = else_block {
                    self.block(block)?;
                }
                for jump in end_jumps {
                    self.patch_jump(jump, span)?;
                }
            }
            Stmt::While { condition, body } => {
                let start = self.offset();
                self.expr(condition)?;
                let exit = self.emit_jump(OpCode::PopJumpIfFalse);
                self.state().blocks.push(Block::Loop {
                    start,
                    breaks: Vec::new(),
                });
                self.block(body)?;
                self.emit_loop(start, span)?;
                let breaks = self.pop_loop();
                self.patch_jump(exit, span)?;
                for jump in breaks {
                    self.patch_jump(jump, span)?;
                }
            }
            Stmt::For { target, iter, body } => {
                self.expr(iter)?;
                self.set_line(span);
                self.emit(OpCode::GetIter);
                let start = self.offset();
                let exit = self.emit_jump(OpCode::ForIter);
                self.store_target(target)?;
                self.emit(OpCode::Pop);
                self.state().blocks.push(Block::Loop {
                    start,
                    breaks: Vec::new(),
                });
                self.block(body)?;
                self.emit_loop(start, span)?;
                let breaks = self.pop_loop();
                self.patch_jump(exit, span)?;
                for jump in breaks {
                    self.patch_jump(jump, span)?;
                }
                // 반복자
                self.emit(OpCode::Pop);
            }
            Stmt::Def(def) => {
                for decorator in &def.decorators {
                    self.expr(decorator)?;
                }
                self.set_line(span);
                self.function(def, FunctionKind::Function, span)?;
                for _ in &def.decorators {
                    self.emit_arg(OpCode::Call, 1);
                }
                self.emit_store(&def.name);
                self.emit(OpCode::Pop);
            }
            Stmt::Class(class) => {
                self.class(class, span)?;
                self.emit_store(&class.name);
                self.emit(OpCode::Pop);
            }
            Stmt::Try {
                body,
                handlers,
                else_block,
                finally_block,
            } => self.try_stmt(body, handlers, else_block.as_deref(), finally_block.as_deref(), span)?,
            Stmt::Raise(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => match self.state_ref().handling.last() {
                        Some(&slot) => self.emit_arg(OpCode::GetLocal, slot),
                        None => return Err(Diagnostic::new("no active exception to re-raise", span.clone())),
                    },
                }
                self.emit(OpCode::Raise);
            }
            Stmt::Import(names) => {
                for (path, alias) in names {
                    let index = self.name_constant(path);
                    self.emit_arg(OpCode::ImportName, index);
                    match alias {
                        Some(alias) => self.emit_store(alias),
                        None => match path.split_once('.') {
                            // `import a.b`는 `a`를 바인딩
                            Some((root, _)) => {
                                self.emit(OpCode::Pop);
                                let index = self.name_constant(root);
                                self.emit_arg(OpCode::ImportName, index);
                                self.emit_store(root);
                            }
                            None => self.emit_store(path),
                        },
                    }
                    self.emit(OpCode::Pop);
                }
            }
            Stmt::FromImport { module, names } => {
                let index = self.name_constant(module);
                self.emit_arg(OpCode::ImportName, index);
                for (name, alias) in names {
                    let index = self.name_constant(name);
                    self.emit_arg(OpCode::ImportFrom, index);
                    self.emit_store(alias.as_ref().unwrap_or(name));
                    self.emit(OpCode::Pop);
                }
                self.emit(OpCode::Pop);
            }
            // 스코프 분석에서 처리됨
            Stmt::Global(_) | Stmt::Nonlocal(_) => {}
            Stmt::Assert { condition, message } => {
                self.expr(condition)?;
                let ok = self.emit_jump(OpCode::PopJumpIfTrue);
                self.emit_load("AssertionError");
                match message {
                    Some(message) => {
                        self.expr(message)?;
                        self.emit_arg(OpCode::Call, 1);
                    }
                    None => self.emit_arg(OpCode::Call, 0),
                }
                self.emit(OpCode::Raise);
                self.patch_jump(ok, span)?;
            }
        }
        Ok(())
    }

    fn pop_loop(&mut self) -> Vec<usize> {
        match self.state().blocks.pop() {
            Some(Block::Loop { breaks, .. }) => breaks,
            _ => Vec::new(),
        }
    }

    /// 가장 안쪽 루프까지의 try/except/finally 영역을 정리하는 코드를 냅니다.
    fn unwind_to_loop(&mut self, keyword: &str, span: &Span) -> CompileResult<usize> {
        let blocks = &self.state_ref().blocks;
        let Some(loop_index) = blocks.iter().rposition(|b| matches!(b, Block::Loop { .. })) else {
            return Err(Diagnostic::new(format!("'{}' outside loop", keyword), span.clone()));
        };
        let pending: Vec<Block> = blocks[loop_index + 1..].to_vec();
        for (i, block) in pending.iter().enumerate().rev() {
            match block {
                Block::Try => self.emit(OpCode::PopTry),
                Block::Except | Block::FinallyBody => {
                    self.emit(OpCode::Pop);
                    self.emit(OpCode::PopTry);
                }
                Block::Finally(body) => {
                    self.emit(OpCode::PopTry);
                    // finally 본문은 이 영역 바깥에서 실행됨
                    let saved = self.state().blocks.split_off(loop_index + 1 + i);
                    let result = self.block(body);
                    self.state().blocks.extend(saved);
                    result?;
                    self.set_line(span);
                }
                Block::Loop { .. } => {}
            }
        }
        Ok(loop_index)
    }

    fn return_stmt(&mut self, value: Option<&ExprS>, span: &Span) -> CompileResult<()> {
        match self.state_ref().kind {
            FunctionKind::Module => return Err(Diagnostic::new("'return' outside function", span.clone())),
            FunctionKind::Initializer => {
                if value.is_some() {
                    return Err(Diagnostic::new("'__init__' may not return a value", span.clone()));
                }
                self.emit_arg(OpCode::GetLocal, 0);
            }
            _ => match value {
                Some(value) => self.expr(value)?,
                None => self.emit(OpCode::None),
            },
        }
        self.emit(OpCode::Return);
        Ok(())
    }

    /// 스택 top의 값을 대상에 저장하고 그대로 남깁니다.
    fn store_target(&mut self, target: &ExprS) -> CompileResult<()> {
        match &target.0 {
            Expr::Variable(name) => self.emit_store(name),
            Expr::Attribute { object, attr } => {
                self.expr(object)?;
                self.emit(OpCode::Swap);
                let index = self.name_constant(attr);
                self.emit_arg(OpCode::SetAttr, index);
            }
            Expr::Subscript { object, index } => {
                // [value, obj, key] -> [obj, key, value]
                self.expr(object)?;
                self.subscript_index(index)?;
                self.emit(OpCode::Rot3);
                self.emit(OpCode::Rot3);
                self.emit(OpCode::SetSubscript);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                self.emit_arg(OpCode::Dup, 0);
                self.emit_arg(OpCode::Unpack, items.len());
                for item in items {
                    self.store_target(item)?;
                    self.emit(OpCode::Pop);
                }
            }
            _ => return Err(Diagnostic::new("cannot assign to expression", target.1.clone())),
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &ExprS, op: BinaryOp, value: &ExprS) -> CompileResult<()> {
        let opcode = expr::binary_opcode(op);
        match &target.0 {
            Expr::Variable(name) => {
                self.emit_load(name);
                self.expr(value)?;
                self.emit(opcode);
                self.emit_store(name);
            }
            Expr::Attribute { object, attr } => {
                self.expr(object)?;
                self.emit_arg(OpCode::Dup, 0);
                let index = self.name_constant(attr);
                self.emit_arg(OpCode::GetAttr, index);
                self.expr(value)?;
                self.emit(opcode);
                self.emit_arg(OpCode::SetAttr, index);
            }
            Expr::Subscript { object, index } => {
                self.expr(object)?;
                self.subscript_index(index)?;
                self.emit_arg(OpCode::Dup, 1);
                self.emit_arg(OpCode::Dup, 1);
                self.emit(OpCode::GetSubscript);
                self.expr(value)?;
                self.emit(opcode);
                self.emit(OpCode::SetSubscript);
            }
            _ => {
                return Err(Diagnostic::new(
                    "illegal expression for augmented assignment",
                    target.1.clone(),
                ));
            }
        }
        self.emit(OpCode::Pop);
        Ok(())
    }

    fn delete(&mut self, target: &ExprS) -> CompileResult<()> {
        match &target.0 {
            Expr::Variable(name) => match self.resolve(name) {
                VarRef::Global => {
                    let index = self.name_constant(name);
                    self.emit_arg(OpCode::DelGlobal, index);
                }
                // 지역/upvalue는 None으로 되돌림
                _ => {
                    self.emit(OpCode::None);
                    self.emit_store(name);
                    self.emit(OpCode::Pop);
                }
            },
            Expr::Attribute { object, attr } => {
                self.expr(object)?;
                let index = self.name_constant(attr);
                self.emit_arg(OpCode::DelAttr, index);
            }
            Expr::Subscript { object, index } => {
                self.expr(object)?;
                self.subscript_index(index)?;
                self.emit(OpCode::DelSubscript);
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(item)?;
                }
            }
            _ => return Err(Diagnostic::new("cannot delete expression", target.1.clone())),
        }
        Ok(())
    }

    // ========== try ==========

    fn try_stmt(
        &mut self,
        body: &[StmtS],
        handlers: &[ExceptHandler],
        else_block: Option<&[StmtS]>,
        finally_block: Option<&[StmtS]>,
        span: &Span,
    ) -> CompileResult<()> {
        let finally_setup = match finally_block {
            Some(finally) => {
                let setup = self.emit_jump(OpCode::SetupFinally);
                self.state().blocks.push(Block::Finally(finally.to_vec()));
                Some(setup)
            }
            None => None,
        };

        if handlers.is_empty() {
            self.block(body)?;
        } else {
            self.try_except(body, handlers, else_block, span)?;
        }

        if let (Some(setup), Some(finally)) = (finally_setup, finally_block) {
            self.state().blocks.pop();
            self.set_line(span);
            self.emit(OpCode::BeginFinally);
            self.patch_jump(setup, span)?;
            self.state().blocks.push(Block::FinallyBody);
            self.block(finally)?;
            self.state().blocks.pop();
            self.emit(OpCode::EndFinally);
        }
        Ok(())
    }

    fn try_except(
        &mut self,
        body: &[StmtS],
        handlers: &[ExceptHandler],
        else_block: Option<&[StmtS]>,
        span: &Span,
    ) -> CompileResult<()> {
        let setup = self.emit_jump(OpCode::SetupTry);
        self.state().blocks.push(Block::Try);
        self.block(body)?;
        self.state().blocks.pop();
        self.emit(OpCode::PopTry);
        if let Some(else_block) = else_block {
            self.block(else_block)?;
        }
        let mut end_jumps = vec![self.emit_jump(OpCode::Jump)];

        // 스택: [handler(Except), exception]
        self.patch_jump(setup, span)?;
        let slot = self.hidden_local("exception");
        self.emit_arg(OpCode::SetLocal, slot);
        for handler in handlers {
            self.set_line(&handler.span);
            let next = match &handler.filter {
                Some(filter) => {
                    self.expr(filter)?;
                    self.emit(OpCode::FilterExcept);
                    Some(self.emit_jump(OpCode::PopJumpIfFalse))
                }
                None => None,
            };
            if let Some(name) = &handler.name {
                self.emit_store(name);
            }
            self.state().blocks.push(Block::Except);
            self.state().handling.push(slot);
            self.block(&handler.body)?;
            self.state().handling.pop();
            self.state().blocks.pop();
            self.emit(OpCode::Pop);
            self.emit(OpCode::PopTry);
            end_jumps.push(self.emit_jump(OpCode::Jump));
            match next {
                Some(next) => self.patch_jump(next, &handler.span)?,
                // 모든 예외를 받는 절 뒤의 절은 도달하지 않음
                None => break,
            }
        }
        if handlers.last().is_some_and(|h| h.filter.is_some()) {
            // 맞는 절 없음: 다시 던짐
            self.emit(OpCode::Raise);
        }
        for jump in end_jumps {
            self.patch_jump(jump, span)?;
        }
        Ok(())
    }

    // ========== 함수 ==========

    /// 함수 본문을 컴파일하고 클로저를 만드는 코드를 냅니다.
    fn function(&mut self, def: &FunctionDef, kind: FunctionKind, span: &Span) -> CompileResult<()> {
        let line = self.line_of(span.start);
        let mut state = FunctionState::new(&def.name, &self.filename, kind, line);
        state.proto.docstring = docstring(&def.body);
        let scan = ScopeScan::of_body(&def.body);
        self.begin_function(state, &def.params, scan, span)?;
        self.prologue(&def.params)?;

        let body = match docstring(&def.body) {
            Some(_) => &def.body[1..],
            None => &def.body[..],
        };
        self.block(body)?;
        if kind == FunctionKind::Initializer {
            self.emit_arg(OpCode::GetLocal, 0);
        } else {
            self.emit(OpCode::None);
        }
        self.emit(OpCode::Return);
        self.end_function(span)
    }

    pub(super) fn lambda(&mut self, params: &Params, body: &ExprS, span: &Span) -> CompileResult<()> {
        let line = self.line_of(span.start);
        let state = FunctionState::new("<lambda>", &self.filename, FunctionKind::Lambda, line);
        let scan = ScopeScan::of_expr(body);
        self.begin_function(state, params, scan, span)?;
        self.prologue(params)?;
        self.expr(body)?;
        self.emit(OpCode::Return);
        self.end_function(span)
    }

    /// 파라미터와 지역 변수를 배치하고 새 함수 상태를 쌓습니다.
    fn begin_function(
        &mut self,
        mut state: FunctionState,
        params: &Params,
        scan: ScopeScan,
        span: &Span,
    ) -> CompileResult<()> {
        let proto = &mut state.proto;
        proto.required_args = params.positional.iter().filter(|p| p.default.is_none()).count() as u16;
        proto.keyword_args = params.positional.len() as u16 - proto.required_args;
        proto.kwonly_args = params.kwonly.len() as u16;
        if params.star.is_some() {
            proto.flags |= CodeFlags::COLLECTS_ARGS;
        }
        if params.kwargs.is_some() {
            proto.flags |= CodeFlags::COLLECTS_KWS;
        }
        if scan.has_yield {
            proto.flags |= CodeFlags::IS_GENERATOR;
        }
        proto.arg_names = params.names().map(str::to_string).collect();
        state.locals = proto.arg_names.clone();

        if let Some(name) = state.locals.iter().find(|n| scan.globals.contains(*n)) {
            return Err(Diagnostic::new(format!("name '{}' is parameter and global", name), span.clone()));
        }
        for name in &scan.assigned {
            if !scan.globals.contains(name) && !scan.nonlocals.contains(name) && state.local_slot(name).is_none() {
                state.locals.push(name.clone());
            }
        }
        state.globals = scan.globals;
        state.nonlocals = scan.nonlocals;
        let nonlocals: Vec<String> = state.nonlocals.iter().cloned().collect();
        self.functions.push(state);

        let depth = self.functions.len() - 1;
        for name in nonlocals {
            if self.resolve_at(depth - 1, &name) == VarRef::Global {
                return Err(Diagnostic::new(format!("no binding for nonlocal '{}' found", name), span.clone()));
            }
        }
        Ok(())
    }

    /// 채워지지 않은 선택 인자의 기본값을 계산하고, 빠진 키워드 전용 인자를 검사합니다.
    fn prologue(&mut self, params: &Params) -> CompileResult<()> {
        let positional = params.positional.len();
        let slots = params.positional.iter().enumerate().chain(
            params
                .kwonly
                .iter()
                .enumerate()
                .map(|(i, p)| (positional + i, p)),
        );
        for (slot, param) in slots {
            let is_kwonly = slot >= positional;
            if param.default.is_none() && !is_kwonly {
                continue;
            }
            self.emit_arg(OpCode::GetLocal, slot);
            self.emit_arg(OpCode::Kwargs, 0);
            self.emit(OpCode::Is);
            let skip = self.emit_jump(OpCode::PopJumpIfFalse);
            match &param.default {
                Some(default) => {
                    self.expr(default)?;
                    self.emit_arg(OpCode::SetLocal, slot);
                    self.emit(OpCode::Pop);
                }
                None => {
                    let name = self.state_ref().proto.name.clone();
                    self.emit_load("TypeError");
                    self.emit_constant(Constant::Str(format!(
                        "{}() missing required keyword-only argument: '{}'",
                        name, param.name
                    )));
                    self.emit_arg(OpCode::Call, 1);
                    self.emit(OpCode::Raise);
                }
            }
            let span = param.default.as_ref().map(|d| d.1.clone()).unwrap_or(0..0);
            self.patch_jump(skip, &span)?;
        }
        Ok(())
    }

    /// 현재 함수를 마치고 바깥 함수에 `MAKE_CLOSURE`를 냅니다.
    fn end_function(&mut self, span: &Span) -> CompileResult<()> {
        let upvalues = self.state_ref().upvalues.clone();
        let proto = self.finish_function();
        self.set_line(span);
        let index = self.add_constant(Constant::Code(Box::new(proto)));
        self.emit_arg(OpCode::MakeClosure, index);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte((upvalue.index >> 8) as u8);
            self.emit_byte(upvalue.index as u8);
        }
        Ok(())
    }

    fn finish_function(&mut self) -> FunctionProto {
        let Some(state) = self.functions.pop() else {
            return FunctionProto::default();
        };
        let mut proto = state.proto;
        let end = proto.code.len() as u32;
        proto.local_count = state.locals.len() as u16;
        proto.upvalue_count = state.upvalues.len() as u16;
        proto.local_names = state
            .locals
            .into_iter()
            .enumerate()
            .map(|(slot, name)| LocalName {
                slot: slot as u16,
                name,
                start: 0,
                end,
            })
            .collect();
        tracing::trace!(
            target: "kuroko::compiler",
            name = %proto.name,
            bytes = proto.code.len(),
            constants = proto.constants.len(),
            "compiled function"
        );
        proto
    }

    // ========== 클래스 ==========

    /// 클래스를 만들어 스택에 남깁니다.
    fn class(&mut self, class: &ClassDef, span: &Span) -> CompileResult<()> {
        for decorator in &class.decorators {
            self.expr(decorator)?;
        }
        self.set_line(span);
        let name = self.name_constant(&class.name);
        self.emit_arg(OpCode::Class, name);
        if let Some(base) = &class.base {
            self.expr(base)?;
            self.emit(OpCode::Inherit);
        }

        let mut body = &class.body[..];
        if let Some(doc) = docstring(body) {
            self.emit_constant(Constant::Str(doc));
            let index = self.name_constant("__doc__");
            self.emit_arg(OpCode::Method, index);
            body = &body[1..];
        }

        for (node, stmt_span) in body {
            self.set_line(stmt_span);
            match node {
                Stmt::Def(def) => {
                    for decorator in &def.decorators {
                        self.expr(decorator)?;
                    }
                    let kind = if def.name == "__init__" {
                        FunctionKind::Initializer
                    } else {
                        FunctionKind::Method
                    };
                    self.function(def, kind, stmt_span)?;
                    for _ in &def.decorators {
                        self.emit_arg(OpCode::Call, 1);
                    }
                    let index = self.name_constant(&def.name);
                    self.emit_arg(OpCode::Method, index);
                }
                Stmt::Class(inner) => {
                    self.class(inner, stmt_span)?;
                    let index = self.name_constant(&inner.name);
                    self.emit_arg(OpCode::Method, index);
                }
                Stmt::Assign { targets, value } => {
                    self.expr(value)?;
                    for (i, target) in targets.iter().enumerate() {
                        let Expr::Variable(name) = &target.0 else {
                            return Err(Diagnostic::new(
                                "only simple names can be assigned in a class body",
                                target.1.clone(),
                            ));
                        };
                        if i + 1 < targets.len() {
                            self.emit_arg(OpCode::Dup, 0);
                        }
                        let index = self.name_constant(name);
                        self.emit_arg(OpCode::Method, index);
                    }
                }
                Stmt::Expr(e) => {
                    self.expr(e)?;
                    self.emit(OpCode::Pop);
                }
                Stmt::Pass => {}
                _ => {
                    return Err(Diagnostic::new(
                        "unsupported statement in class body",
                        stmt_span.clone(),
                    ));
                }
            }
        }

        self.set_line(span);
        self.emit(OpCode::FinalizeClass);
        for _ in &class.decorators {
            self.emit_arg(OpCode::Call, 1);
        }
        Ok(())
    }

    fn in_method(&self) -> bool {
        matches!(
            self.state_ref().kind,
            FunctionKind::Method | FunctionKind::Initializer
        )
    }

    fn is_comprehension(&self) -> bool {
        self.state_ref().kind == FunctionKind::Comprehension
    }
}

/// 본문 첫 문장이 문자열 리터럴이면 그 내용
fn docstring(body: &[StmtS]) -> Option<String> {
    match body.first() {
        Some((Stmt::Expr((Expr::Literal(Literal::String(s)), _)), _)) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
