pub type Span = std::ops::Range<usize>;

pub type ExprS = (Expr, Span);
pub type StmtS = (Stmt, Span);

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// 호출 인자 하나
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(ExprS),
    Keyword(String, ExprS),
    /// `*expr`
    Star(ExprS),
    /// `**expr`
    StarStar(ExprS),
}

/// 컴프리헨션의 `for`/`if` 절
#[derive(Debug, Clone, PartialEq)]
pub enum CompClause {
    For { target: ExprS, iter: ExprS },
    If(ExprS),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<ExprS>,
}

/// 함수 시그니처: 위치 인자, `*args`, 키워드 전용 인자, `**kwargs`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub positional: Vec<Param>,
    pub star: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwargs: Option<String>,
}

impl Params {
    /// 선언 순서대로의 모든 파라미터 이름
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positional
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.kwonly.iter().map(|p| p.name.as_str()))
            .chain(self.star.as_deref())
            .chain(self.kwargs.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Unary {
        op: UnaryOp,
        expr: Box<ExprS>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    /// `a < b < c` 같은 연쇄 비교
    Compare {
        left: Box<ExprS>,
        rest: Vec<(CompareOp, ExprS)>,
    },
    Logical {
        op: LogicalOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    Conditional {
        condition: Box<ExprS>,
        then: Box<ExprS>,
        otherwise: Box<ExprS>,
    },
    Call {
        callee: Box<ExprS>,
        args: Vec<Arg>,
    },
    Attribute {
        object: Box<ExprS>,
        attr: String,
    },
    Subscript {
        object: Box<ExprS>,
        index: Box<ExprS>,
    },
    /// 첨자 안에서만 나타남
    Slice {
        start: Option<Box<ExprS>>,
        stop: Option<Box<ExprS>>,
        step: Option<Box<ExprS>>,
    },
    List(Vec<ExprS>),
    Tuple(Vec<ExprS>),
    Dict(Vec<(ExprS, ExprS)>),
    ListComp {
        element: Box<ExprS>,
        clauses: Vec<CompClause>,
    },
    DictComp {
        key: Box<ExprS>,
        value: Box<ExprS>,
        clauses: Vec<CompClause>,
    },
    Lambda {
        params: Box<Params>,
        body: Box<ExprS>,
    },
    Yield(Option<Box<ExprS>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Params,
    pub body: Vec<StmtS>,
    pub decorators: Vec<ExprS>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub base: Option<ExprS>,
    pub body: Vec<StmtS>,
    pub decorators: Vec<ExprS>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub filter: Option<ExprS>,
    pub name: Option<String>,
    pub body: Vec<StmtS>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(ExprS),
    /// `a = b = value`: 대상이 여럿일 수 있음
    Assign {
        targets: Vec<ExprS>,
        value: ExprS,
    },
    AugAssign {
        target: ExprS,
        op: BinaryOp,
        value: ExprS,
    },
    Del(Vec<ExprS>),
    Pass,
    Break,
    Continue,
    Return(Option<ExprS>),
    If {
        condition: ExprS,
        then_block: Vec<StmtS>,
        elif_blocks: Vec<(ExprS, Vec<StmtS>)>,
        else_block: Option<Vec<StmtS>>,
    },
    While {
        condition: ExprS,
        body: Vec<StmtS>,
    },
    For {
        target: ExprS,
        iter: ExprS,
        body: Vec<StmtS>,
    },
    Def(Box<FunctionDef>),
    Class(Box<ClassDef>),
    Try {
        body: Vec<StmtS>,
        handlers: Vec<ExceptHandler>,
        else_block: Option<Vec<StmtS>>,
        finally_block: Option<Vec<StmtS>>,
    },
    Raise(Option<ExprS>),
    /// `import a.b as c, d`
    Import(Vec<(String, Option<String>)>),
    /// `from a import x as y`
    FromImport {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Assert {
        condition: ExprS,
        message: Option<ExprS>,
    },
}
