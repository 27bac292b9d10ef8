//! 함수 스코프 분석
//!
//! 함수 본문에서 대입되는 이름은 `global`/`nonlocal` 선언이 없는 한 그 함수의 지역 변수입니다.
//! 중첩 함수, 람다, 컴프리헨션은 자기 스코프를 가지므로 들어가지 않습니다. 클래스 본문의
//! 대입은 클래스 속성이 되므로 역시 제외합니다.

use rustc_hash::FxHashSet;

use crate::parser::ast::{Arg, CompClause, Expr, ExprS, Stmt, StmtS};

#[derive(Debug, Default)]
pub(super) struct ScopeScan {
    /// 처음 대입된 순서
    pub assigned: Vec<String>,
    pub globals: FxHashSet<String>,
    pub nonlocals: FxHashSet<String>,
    pub has_yield: bool,
}

impl ScopeScan {
    pub fn of_body(body: &[StmtS]) -> Self {
        let mut scan = Self::default();
        for stmt in body {
            scan.stmt(stmt);
        }
        scan
    }

    /// 람다 본문: 대입은 없고 `yield`만 봄
    pub fn of_expr(body: &ExprS) -> Self {
        let mut scan = Self::default();
        scan.expr(body);
        scan
    }

    pub fn of_clauses(clauses: &[CompClause]) -> Self {
        let mut scan = Self::default();
        for clause in clauses {
            if let CompClause::For { target, .. } = clause {
                scan.target(target);
            }
        }
        scan
    }

    fn bind(&mut self, name: &str) {
        if !self.assigned.iter().any(|n| n == name) {
            self.assigned.push(name.to_string());
        }
    }

    fn target(&mut self, target: &ExprS) {
        match &target.0 {
            Expr::Variable(name) => self.bind(name),
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.target(item);
                }
            }
            _ => self.expr(target),
        }
    }

    fn block(&mut self, body: &[StmtS]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &StmtS) {
        match &stmt.0 {
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign { targets, value } => {
                for target in targets {
                    self.target(target);
                }
                self.expr(value);
            }
            Stmt::AugAssign { target, value, .. } => {
                self.target(target);
                self.expr(value);
            }
            Stmt::Del(targets) => {
                for target in targets {
                    self.target(target);
                }
            }
            Stmt::Pass | Stmt::Break | Stmt::Continue => {}
            Stmt::Return(value) | Stmt::Raise(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                self.expr(condition);
                self.block(then_block);
                for (cond, block) in elif_blocks {
                    self.expr(cond);
                    self.block(block);
                }
                if let Some(block) = else_block {
                    self.block(block);
                }
            }
            Stmt::While { condition, body } => {
                self.expr(condition);
                self.block(body);
            }
            Stmt::For { target, iter, body } => {
                self.target(target);
                self.expr(iter);
                self.block(body);
            }
            Stmt::Def(def) => {
                for decorator in &def.decorators {
                    self.expr(decorator);
                }
                self.bind(&def.name);
            }
            Stmt::Class(class) => {
                for decorator in &class.decorators {
                    self.expr(decorator);
                }
                if let Some(base) = &class.base {
                    self.expr(base);
                }
                self.bind(&class.name);
            }
            Stmt::Try {
                body,
                handlers,
                else_block,
                finally_block,
            } => {
                self.block(body);
                for handler in handlers {
                    if let Some(filter) = &handler.filter {
                        self.expr(filter);
                    }
                    if let Some(name) = &handler.name {
                        self.bind(name);
                    }
                    self.block(&handler.body);
                }
                if let Some(block) = else_block {
                    self.block(block);
                }
                if let Some(block) = finally_block {
                    self.block(block);
                }
            }
            Stmt::Import(names) => {
                for (path, alias) in names {
                    match alias {
                        Some(alias) => self.bind(alias),
                        None => {
                            let root = path.split('.').next().unwrap_or(path);
                            self.bind(root);
                        }
                    }
                }
            }
            Stmt::FromImport { names, .. } => {
                for (name, alias) in names {
                    self.bind(alias.as_ref().unwrap_or(name));
                }
            }
            Stmt::Global(names) => self.globals.extend(names.iter().cloned()),
            Stmt::Nonlocal(names) => self.nonlocals.extend(names.iter().cloned()),
            Stmt::Assert { condition, message } => {
                self.expr(condition);
                if let Some(message) = message {
                    self.expr(message);
                }
            }
        }
    }

    /// 식에서는 `yield`만 찾습니다.
    fn expr(&mut self, expr: &ExprS) {
        match &expr.0 {
            Expr::Yield(value) => {
                self.has_yield = true;
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Expr::Literal(_) | Expr::Variable(_) => {}
            Expr::Unary { expr, .. } => self.expr(expr),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Compare { left, rest } => {
                self.expr(left);
                for (_, operand) in rest {
                    self.expr(operand);
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition);
                self.expr(then);
                self.expr(otherwise);
            }
            Expr::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    match arg {
                        Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::StarStar(e) => self.expr(e),
                    }
                }
            }
            Expr::Attribute { object, .. } => self.expr(object),
            Expr::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Slice { start, stop, step } => {
                for part in [start, stop, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(key);
                    self.expr(value);
                }
            }
            // 자기 스코프를 가짐
            Expr::ListComp { .. } | Expr::DictComp { .. } | Expr::Lambda { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_source;

    fn scan(source: &str) -> ScopeScan {
        let program = parse_source(source).expect("parse");
        ScopeScan::of_body(&program)
    }

    #[test]
    fn test_assigned_names_in_order() {
        let s = scan("a = 1\nfor i, j in x:\n  b = i\nimport os.path\nfrom m import y as z\n");
        assert_eq!(s.assigned, vec!["a", "i", "j", "b", "os", "z"]);
    }

    #[test]
    fn test_nested_scopes_are_skipped() {
        let s = scan("def f():\n  inner = 1\nclass C:\n  attr = 2\ng = lambda q: q\nxs = [n for n in y]\n");
        assert_eq!(s.assigned, vec!["f", "C", "g", "xs"]);
    }

    #[test]
    fn test_declarations_and_yield() {
        let s = scan("global a\nnonlocal b\nx = yield 1\n");
        assert!(s.globals.contains("a"));
        assert!(s.nonlocals.contains("b"));
        assert!(s.has_yield);
    }

    #[test]
    fn test_except_alias_is_bound() {
        let s = scan("try:\n  pass\nexcept E as err:\n  pass\n");
        assert_eq!(s.assigned, vec!["err"]);
    }
}
