use super::scope::ScopeScan;
use super::{Compiler, CompileResult, FunctionKind, FunctionState};
use crate::Diagnostic;
use crate::parser::ast::{
    Arg, BinaryOp, CompClause, CompareOp, Expr, ExprS, Literal, LogicalOp, Params, Span, UnaryOp,
};
use crate::vm::bytecode::{Constant, OpCode};

/// `PUSH_INT`로 바로 넣을 수 있는 정수 범위
const MAX_INLINE_INT: i64 = 0xFFFF;

pub(super) fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Sub,
        BinaryOp::Multiply => OpCode::Mul,
        BinaryOp::Divide => OpCode::Div,
        BinaryOp::FloorDivide => OpCode::FloorDiv,
        BinaryOp::Modulo => OpCode::Mod,
        BinaryOp::Power => OpCode::Pow,
        BinaryOp::BitAnd => OpCode::BitAnd,
        BinaryOp::BitOr => OpCode::BitOr,
        BinaryOp::BitXor => OpCode::BitXor,
        BinaryOp::Shl => OpCode::Shl,
        BinaryOp::Shr => OpCode::Shr,
    }
}

/// 컴프리헨션이 모으는 결과
#[derive(Clone, Copy)]
enum Element<'a> {
    List(&'a ExprS),
    Dict(&'a ExprS, &'a ExprS),
}

impl Compiler {
    pub(super) fn expr(&mut self, expr: &ExprS) -> CompileResult<()> {
        let (node, span) = expr;
        match node {
            Expr::Literal(literal) => self.literal(literal),
            Expr::Variable(name) => self.emit_load(name),
            Expr::Unary { op, expr } => {
                self.expr(expr)?;
                self.emit(match op {
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::Negate => OpCode::Negate,
                    UnaryOp::Pos => OpCode::Pos,
                    UnaryOp::Invert => OpCode::Invert,
                });
            }
            Expr::Binary { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.set_line(span);
                self.emit(binary_opcode(*op));
            }
            Expr::Compare { left, rest } => self.compare(left, rest, span)?,
            Expr::Logical { op, left, right } => {
                self.expr(left)?;
                let jump = self.emit_jump(match op {
                    LogicalOp::And => OpCode::JumpIfFalseOrPop,
                    LogicalOp::Or => OpCode::JumpIfTrueOrPop,
                });
                self.expr(right)?;
                self.patch_jump(jump, span)?;
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition)?;
                let otherwise_jump = self.emit_jump(OpCode::PopJumpIfFalse);
                self.expr(then)?;
                let end = self.emit_jump(OpCode::Jump);
                self.patch_jump(otherwise_jump, span)?;
                self.expr(otherwise)?;
                self.patch_jump(end, span)?;
            }
            Expr::Call { callee, args } => self.call(callee, args, span)?,
            Expr::Attribute { object, attr } => {
                let index = self.name_constant(attr);
                if is_super_call(object) {
                    if !self.in_method() {
                        return Err(Diagnostic::new("super() used outside of a method", object.1.clone()));
                    }
                    self.emit_arg(OpCode::GetLocal, 0);
                    self.set_line(span);
                    self.emit_arg(OpCode::GetSuper, index);
                } else {
                    self.expr(object)?;
                    self.set_line(span);
                    self.emit_arg(OpCode::GetAttr, index);
                }
            }
            Expr::Subscript { object, index } => {
                self.expr(object)?;
                self.subscript_index(index)?;
                self.set_line(span);
                self.emit(OpCode::GetSubscript);
            }
            Expr::Slice { .. } => {
                return Err(Diagnostic::new("slice outside of a subscript", span.clone()));
            }
            Expr::List(items) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit_arg(OpCode::BuildList, items.len());
            }
            Expr::Tuple(items) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit_arg(OpCode::BuildTuple, items.len());
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(key)?;
                    self.expr(value)?;
                }
                self.emit_arg(OpCode::BuildDict, pairs.len());
            }
            Expr::ListComp { element, clauses } => {
                self.comprehension(Element::List(element), clauses, span)?;
            }
            Expr::DictComp { key, value, clauses } => {
                self.comprehension(Element::Dict(key, value), clauses, span)?;
            }
            Expr::Lambda { params, body } => self.lambda(params, body, span)?,
            Expr::Yield(value) => {
                if self.is_comprehension() {
                    return Err(Diagnostic::new("'yield' inside comprehension", span.clone()));
                }
                if !self.is_generator() {
                    return Err(Diagnostic::new("'yield' outside function", span.clone()));
                }
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.emit(OpCode::None),
                }
                self.set_line(span);
                self.emit(OpCode::Yield);
            }
        }
        Ok(())
    }

    fn literal(&mut self, literal: &Literal) {
        match literal {
            Literal::None => self.emit(OpCode::None),
            Literal::Bool(true) => self.emit(OpCode::True),
            Literal::Bool(false) => self.emit(OpCode::False),
            Literal::Int(i) if (0..=MAX_INLINE_INT).contains(i) => self.emit_arg(OpCode::PushInt, *i as usize),
            Literal::Int(i) => self.emit_constant(Constant::Int(*i)),
            Literal::Float(f) => self.emit_constant(Constant::Float(*f)),
            Literal::String(s) => self.emit_constant(Constant::Str(s.clone())),
            Literal::Bytes(b) => self.emit_constant(Constant::Bytes(b.clone())),
        }
    }

    /// 첨자 안의 식. 슬라이스면 `BUILD_SLICE`.
    pub(super) fn subscript_index(&mut self, index: &ExprS) -> CompileResult<()> {
        let Expr::Slice { start, stop, step } = &index.0 else {
            return self.expr(index);
        };
        for part in [start, stop] {
            match part {
                Some(part) => self.expr(part)?,
                None => self.emit(OpCode::None),
            }
        }
        match step {
            Some(step) => {
                self.expr(step)?;
                self.emit_arg(OpCode::BuildSlice, 3);
            }
            None => self.emit_arg(OpCode::BuildSlice, 2),
        }
        Ok(())
    }

    // ========== 비교 ==========

    /// `a < b < c`: 가운데 피연산자를 복제해 다음 비교에 씁니다.
    fn compare(&mut self, left: &ExprS, rest: &[(CompareOp, ExprS)], span: &Span) -> CompileResult<()> {
        self.expr(left)?;
        let mut cleanup = Vec::new();
        for (i, (op, right)) in rest.iter().enumerate() {
            self.expr(right)?;
            let last = i + 1 == rest.len();
            if !last {
                // [a, b] -> [b, a, b]
                self.emit_arg(OpCode::Dup, 0);
                self.emit(OpCode::Rot3);
            }
            self.set_line(span);
            self.compare_op(*op);
            if !last {
                cleanup.push(self.emit_jump(OpCode::JumpIfFalseOrPop));
            }
        }
        if !cleanup.is_empty() {
            let end = self.emit_jump(OpCode::Jump);
            for jump in cleanup {
                self.patch_jump(jump, span)?;
            }
            // [b, False] -> [False]
            self.emit(OpCode::Swap);
            self.emit(OpCode::Pop);
            self.patch_jump(end, span)?;
        }
        Ok(())
    }

    fn compare_op(&mut self, op: CompareOp) {
        let (opcode, negate) = match op {
            CompareOp::Equal => (OpCode::Equal, false),
            CompareOp::NotEqual => (OpCode::Equal, true),
            CompareOp::Less => (OpCode::Less, false),
            CompareOp::LessEqual => (OpCode::LessEqual, false),
            CompareOp::Greater => (OpCode::Greater, false),
            CompareOp::GreaterEqual => (OpCode::GreaterEqual, false),
            CompareOp::In => (OpCode::In, false),
            CompareOp::NotIn => (OpCode::In, true),
            CompareOp::Is => (OpCode::Is, false),
            CompareOp::IsNot => (OpCode::Is, true),
        };
        self.emit(opcode);
        if negate {
            self.emit(OpCode::Not);
        }
    }

    // ========== 호출 ==========

    fn call(&mut self, callee: &ExprS, args: &[Arg], span: &Span) -> CompileResult<()> {
        self.expr(callee)?;

        let direct = args
            .iter()
            .position(|a| !matches!(a, Arg::Positional(_)))
            .unwrap_or(args.len());
        for arg in &args[..direct] {
            if let Arg::Positional(e) = arg {
                self.expr(e)?;
            }
        }
        if direct == args.len() {
            self.set_line(span);
            self.emit_arg(OpCode::Call, direct);
            return Ok(());
        }

        // 키워드 블록: (이름 또는 마커, 값) 쌍
        let mut seen_keyword = false;
        let mut keywords: Vec<&str> = Vec::new();
        for arg in &args[direct..] {
            match arg {
                Arg::Positional(e) => {
                    if seen_keyword {
                        return Err(Diagnostic::new("positional argument follows keyword argument", e.1.clone()));
                    }
                    self.emit_arg(OpCode::Expand, 0);
                    self.expr(e)?;
                }
                Arg::Star(e) => {
                    self.emit_arg(OpCode::Expand, 1);
                    self.expr(e)?;
                }
                Arg::StarStar(e) => {
                    seen_keyword = true;
                    self.emit_arg(OpCode::Expand, 2);
                    self.expr(e)?;
                }
                Arg::Keyword(name, e) => {
                    if keywords.contains(&name.as_str()) {
                        return Err(Diagnostic::new(format!("keyword argument repeated: {}", name), e.1.clone()));
                    }
                    keywords.push(name);
                    seen_keyword = true;
                    self.emit_constant(Constant::Str(name.clone()));
                    self.expr(e)?;
                }
            }
        }
        let pairs = args.len() - direct;
        self.set_line(span);
        self.emit_arg(OpCode::Kwargs, pairs);
        self.emit_arg(OpCode::CallKw, direct + pairs * 2 + 1);
        Ok(())
    }

    // ========== 컴프리헨션 ==========

    /// 컴프리헨션은 즉시 호출되는 인자 없는 함수로 컴파일됩니다.
    fn comprehension(&mut self, element: Element, clauses: &[CompClause], span: &Span) -> CompileResult<()> {
        let (name, build) = match element {
            Element::List(_) => ("<listcomp>", OpCode::BuildList),
            Element::Dict(..) => ("<dictcomp>", OpCode::BuildDict),
        };
        let line = self.line_of(span.start);
        let state = FunctionState::new(name, &self.filename, FunctionKind::Comprehension, line);
        self.begin_function(state, &Params::default(), ScopeScan::of_clauses(clauses), span)?;

        let accumulator = self.hidden_local("accumulator");
        self.emit_arg(build, 0);
        self.emit_arg(OpCode::SetLocal, accumulator);
        self.emit(OpCode::Pop);
        self.comp_clause(element, clauses, accumulator, span)?;
        self.emit_arg(OpCode::GetLocal, accumulator);
        self.emit(OpCode::Return);

        self.end_function(span)?;
        self.emit_arg(OpCode::Call, 0);
        Ok(())
    }

    fn comp_clause(
        &mut self,
        element: Element,
        clauses: &[CompClause],
        accumulator: usize,
        span: &Span,
    ) -> CompileResult<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            match element {
                Element::List(value) => {
                    self.expr(value)?;
                    self.emit_arg(OpCode::ListAppend, accumulator);
                }
                Element::Dict(key, value) => {
                    self.expr(key)?;
                    self.expr(value)?;
                    self.emit_arg(OpCode::DictSet, accumulator);
                }
            }
            return Ok(());
        };
        match clause {
            CompClause::For { target, iter } => {
                self.expr(iter)?;
                self.emit(OpCode::GetIter);
                let start = self.offset();
                let exit = self.emit_jump(OpCode::ForIter);
                self.store_target(target)?;
                self.emit(OpCode::Pop);
                self.comp_clause(element, rest, accumulator, span)?;
                self.emit_loop(start, span)?;
                self.patch_jump(exit, span)?;
                self.emit(OpCode::Pop);
            }
            CompClause::If(condition) => {
                self.expr(condition)?;
                let skip = self.emit_jump(OpCode::PopJumpIfFalse);
                self.comp_clause(element, rest, accumulator, span)?;
                self.patch_jump(skip, span)?;
            }
        }
        Ok(())
    }

    fn is_generator(&self) -> bool {
        self.state_ref()
            .proto
            .flags
            .contains(crate::vm::bytecode::CodeFlags::IS_GENERATOR)
    }
}

/// `super().name`의 `super()` 부분
fn is_super_call(object: &ExprS) -> bool {
    matches!(
        &object.0,
        Expr::Call { callee, args } if args.is_empty() && matches!(&callee.0, Expr::Variable(name) if name == "super")
    )
}
