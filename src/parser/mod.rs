pub mod ast;

use crate::lexer::Token;
use ast::*;
use chumsky::Parser;
use chumsky::input::ValueInput;
use chumsky::prelude::*;
use rustc_hash::FxHashSet;

pub use chumsky::span::SimpleSpan;

type RichTokenError<'a> = Rich<'a, Token>;
type Extra<'a> = extra::Err<RichTokenError<'a>>;

#[derive(Debug, Clone)]
enum PostfixOp {
    Attr(String),
    Call(Vec<Arg>),
    Subscript(ExprS),
}

#[derive(Debug, Clone)]
enum ParamItem {
    Plain(Param),
    /// `*args` 또는 키워드 전용 인자 구분용 맨 `*`
    Star(Option<String>),
    StarStar(String),
}

/// 대입문의 `=` / `op=` 뒷부분
#[derive(Debug, Clone)]
enum AssignTail {
    Aug(BinaryOp, ExprS),
    Chain(Vec<ExprS>),
}

fn ident<'tokens, I>() -> impl Parser<'tokens, I, String, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    select! { Token::Identifier(s) => s }.labelled("identifier")
}

/// `item (, item)* [,]`: 쉼표가 하나라도 있으면 튜플
fn sequence<'tokens, I, P>(item: P) -> impl Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
    P: Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone,
{
    item.clone()
        .then(
            just(Token::Comma)
                .ignore_then(item)
                .repeated()
                .collect::<Vec<ExprS>>(),
        )
        .then(just(Token::Comma).or_not())
        .map_with(|((first, rest), trailing), e| {
            if rest.is_empty() && trailing.is_none() {
                first
            } else {
                let s: I::Span = e.span();
                let mut items = Vec::with_capacity(rest.len() + 1);
                items.push(first);
                items.extend(rest);
                (Expr::Tuple(items), s.into_range())
            }
        })
}

fn binary_level<'tokens, I, P, O>(operand: P, op: O) -> impl Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
    P: Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone,
    O: Parser<'tokens, I, BinaryOp, Extra<'tokens>> + Clone,
{
    operand.clone().foldl(
        op.then(operand).repeated(),
        |left: ExprS, (op, right): (BinaryOp, ExprS)| {
            let span = left.1.start..right.1.end;
            (
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            )
        },
    )
}

fn build_params(items: Vec<ParamItem>) -> Result<Params, String> {
    let mut params = Params::default();
    let mut seen_star = false;
    for item in items {
        if params.kwargs.is_some() {
            return Err("parameters cannot follow '**' parameter".to_string());
        }
        match item {
            ParamItem::Plain(param) if seen_star => params.kwonly.push(param),
            ParamItem::Plain(param) => {
                if param.default.is_none() && params.positional.iter().any(|p| p.default.is_some()) {
                    return Err("non-default argument follows default argument".to_string());
                }
                params.positional.push(param);
            }
            ParamItem::Star(name) => {
                if seen_star {
                    return Err("'*' parameter may appear only once".to_string());
                }
                seen_star = true;
                params.star = name;
            }
            ParamItem::StarStar(name) => params.kwargs = Some(name),
        }
    }
    let mut seen = FxHashSet::default();
    for name in params.names() {
        if !seen.insert(name) {
            return Err(format!("duplicate argument '{}' in function definition", name));
        }
    }
    Ok(params)
}

/// 함수와 lambda의 파라미터 목록 (괄호 제외)
fn params_parser<'tokens, I, P>(expr: P) -> impl Parser<'tokens, I, Params, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
    P: Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone,
{
    let item = choice((
        just(Token::StarStar).ignore_then(ident()).map(ParamItem::StarStar),
        just(Token::Star).ignore_then(ident().or_not()).map(ParamItem::Star),
        ident()
            .then(just(Token::Equal).ignore_then(expr).or_not())
            .map(|(name, default)| ParamItem::Plain(Param { name, default })),
    ));
    item.separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<ParamItem>>()
        .try_map(|items, span| build_params(items).map_err(|message| Rich::custom(span, message)))
        .labelled("parameters")
}

/// 대입과 `for`의 이름 대상: 이름, 또는 괄호로 묶은 대상의 튜플
pub fn target_parser<'tokens, I>() -> impl Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    recursive(|target| {
        let single = choice((
            ident().map_with(|name, e| {
                let s: I::Span = e.span();
                (Expr::Variable(name), s.into_range())
            }),
            target
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
            target.delimited_by(just(Token::LBracket), just(Token::RBracket)),
        ));
        sequence(single)
    })
    .labelled("target")
    .boxed()
}

pub fn expr_parser<'tokens, I>() -> impl Parser<'tokens, I, ExprS, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    recursive(|expr| {
        let expr_list = sequence(expr.clone()).boxed();

        // Primary: 리터럴, 변수, 리스트/dict 표기, 괄호 식
        let literal = select! {
            Token::Int(i) => Expr::Literal(Literal::Int(i)),
            Token::Float(f) => Expr::Literal(Literal::Float(f)),
            Token::Bool(b) => Expr::Literal(Literal::Bool(b)),
            Token::None => Expr::Literal(Literal::None),
            Token::Bytes(b) => Expr::Literal(Literal::Bytes(b)),
        }
        .labelled("literal");

        // 이웃한 문자열 리터럴은 이어 붙임
        let strings = select! { Token::String(s) => s }
            .repeated()
            .at_least(1)
            .collect::<Vec<String>>()
            .map(|parts| Expr::Literal(Literal::String(parts.concat())));

        let comp_clauses = {
            let comp_for = just(Token::For)
                .ignore_then(target_parser())
                .then_ignore(just(Token::In))
                .then(expr.clone())
                .map(|(target, iter)| CompClause::For { target, iter });
            let comp_if = just(Token::If).ignore_then(expr.clone()).map(CompClause::If);
            comp_for
                .clone()
                .then(choice((comp_for, comp_if)).repeated().collect::<Vec<CompClause>>())
                .map(|(first, rest)| {
                    let mut clauses = vec![first];
                    clauses.extend(rest);
                    clauses
                })
                .boxed()
        };

        let list = choice((
            expr.clone()
                .then(comp_clauses.clone())
                .map(|(element, clauses)| Expr::ListComp {
                    element: Box::new(element),
                    clauses,
                }),
            expr.clone()
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<ExprS>>()
                .map(Expr::List),
        ))
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let pair = expr
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expr.clone());
        let dict = choice((
            pair.clone()
                .then(comp_clauses)
                .map(|((key, value), clauses)| Expr::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    clauses,
                }),
            pair.separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<(ExprS, ExprS)>>()
                .map(Expr::Dict),
        ))
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let primary = choice((
            choice((literal, strings, ident().map(Expr::Variable), list, dict)).map_with(
                |node: Expr, e| {
                    let s: I::Span = e.span();
                    (node, s.into_range())
                },
            ),
            expr_list
                .clone()
                .or_not()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map_with(|inner, e| {
                    let s: I::Span = e.span();
                    match inner {
                        Some((node, _)) => (node, s.into_range()),
                        None => (Expr::Tuple(Vec::new()), s.into_range()),
                    }
                }),
        ))
        .boxed();

        // Postfix: ., (), [] 연쇄
        let arg = choice((
            just(Token::StarStar).ignore_then(expr.clone()).map(Arg::StarStar),
            just(Token::Star).ignore_then(expr.clone()).map(Arg::Star),
            ident()
                .then_ignore(just(Token::Equal))
                .then(expr.clone())
                .map(|(name, value)| Arg::Keyword(name, value)),
            expr.clone().map(Arg::Positional),
        ));

        let slice_part = expr.clone().or_not();
        let slice = slice_part
            .clone()
            .then_ignore(just(Token::Colon))
            .then(slice_part.clone())
            .then(just(Token::Colon).ignore_then(slice_part).or_not())
            .map_with(|((start, stop), step), e| {
                let s: I::Span = e.span();
                (
                    Expr::Slice {
                        start: start.map(Box::new),
                        stop: stop.map(Box::new),
                        step: step.flatten().map(Box::new),
                    },
                    s.into_range(),
                )
            });

        let postfix_op = choice((
            just(Token::Dot).ignore_then(ident()).map(PostfixOp::Attr),
            arg.separated_by(just(Token::Comma))
                .allow_trailing()
                .collect()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(PostfixOp::Call),
            choice((slice, expr_list.clone()))
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map(PostfixOp::Subscript),
        ))
        .map_with(|op, e| {
            let s: I::Span = e.span();
            (op, s.end)
        });

        let postfix = primary
            .foldl(postfix_op.repeated(), |base: ExprS, (op, end): (PostfixOp, usize)| {
                let span = base.1.start..end;
                let node = match op {
                    PostfixOp::Attr(attr) => Expr::Attribute {
                        object: Box::new(base),
                        attr,
                    },
                    PostfixOp::Call(args) => Expr::Call {
                        callee: Box::new(base),
                        args,
                    },
                    PostfixOp::Subscript(index) => Expr::Subscript {
                        object: Box::new(base),
                        index: Box::new(index),
                    },
                };
                (node, span)
            })
            .boxed();

        // 거듭제곱은 왼쪽 단항보다 강하고 오른쪽 단항보다 약하게 묶임: -2 ** -1
        let mut factor = Recursive::declare();
        let power = postfix
            .then(just(Token::StarStar).ignore_then(factor.clone()).or_not())
            .map(|(base, exponent): (ExprS, Option<ExprS>)| match exponent {
                Some(exponent) => {
                    let span = base.1.start..exponent.1.end;
                    (
                        Expr::Binary {
                            op: BinaryOp::Power,
                            left: Box::new(base),
                            right: Box::new(exponent),
                        },
                        span,
                    )
                }
                None => base,
            });

        // 단항 연산자를 span과 함께 캡처
        let op_unary = choice((
            just(Token::Minus).to(UnaryOp::Negate),
            just(Token::Plus).to(UnaryOp::Pos),
            just(Token::Tilde).to(UnaryOp::Invert),
        ))
        .map_with(|op, e| {
            let s: I::Span = e.span();
            (op, s.into_range())
        });
        factor.define(op_unary.repeated().foldr(
            power,
            |(op, op_span): (UnaryOp, Span), right: ExprS| {
                let span = op_span.start..right.1.end;
                (
                    Expr::Unary {
                        op,
                        expr: Box::new(right),
                    },
                    span,
                )
            },
        ));

        let op = |t| just(t).ignored();
        let term = binary_level(
            factor.boxed(),
            choice((
                op(Token::Star).to(BinaryOp::Multiply),
                op(Token::Slash).to(BinaryOp::Divide),
                op(Token::SlashSlash).to(BinaryOp::FloorDivide),
                op(Token::Percent).to(BinaryOp::Modulo),
            )),
        )
        .boxed();
        let sum = binary_level(
            term,
            choice((
                op(Token::Plus).to(BinaryOp::Add),
                op(Token::Minus).to(BinaryOp::Subtract),
            )),
        )
        .boxed();
        let shift = binary_level(
            sum,
            choice((op(Token::Shl).to(BinaryOp::Shl), op(Token::Shr).to(BinaryOp::Shr))),
        )
        .boxed();
        let bit_and = binary_level(shift, op(Token::Amp).to(BinaryOp::BitAnd)).boxed();
        let bit_xor = binary_level(bit_and, op(Token::Caret).to(BinaryOp::BitXor)).boxed();
        let bit_or = binary_level(bit_xor, op(Token::Pipe).to(BinaryOp::BitOr)).boxed();

        let compare_op = choice((
            op(Token::EqualEqual).to(CompareOp::Equal),
            op(Token::NotEqual).to(CompareOp::NotEqual),
            op(Token::LessEqual).to(CompareOp::LessEqual),
            op(Token::Less).to(CompareOp::Less),
            op(Token::GreaterEqual).to(CompareOp::GreaterEqual),
            op(Token::Greater).to(CompareOp::Greater),
            op(Token::Not).then(op(Token::In)).to(CompareOp::NotIn),
            op(Token::In).to(CompareOp::In),
            op(Token::Is).then(op(Token::Not)).to(CompareOp::IsNot),
            op(Token::Is).to(CompareOp::Is),
        ));
        let comparison = bit_or
            .clone()
            .then(compare_op.then(bit_or).repeated().collect::<Vec<(CompareOp, ExprS)>>())
            .map(|(left, rest): (ExprS, Vec<(CompareOp, ExprS)>)| match rest.last() {
                None => left,
                Some((_, last)) => {
                    let span = left.1.start..last.1.end;
                    (
                        Expr::Compare {
                            left: Box::new(left),
                            rest,
                        },
                        span,
                    )
                }
            });

        let not_test = just(Token::Not)
            .map_with(|_, e| {
                let s: I::Span = e.span();
                s.into_range()
            })
            .repeated()
            .foldr(comparison, |op_span: Span, right: ExprS| {
                let span = op_span.start..right.1.end;
                (
                    Expr::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(right),
                    },
                    span,
                )
            })
            .boxed();

        let logical = |operand: Boxed<'tokens, 'tokens, I, ExprS, Extra<'tokens>>, token: Token, kind: LogicalOp| {
            operand
                .clone()
                .foldl(
                    just(token).ignore_then(operand).repeated(),
                    move |left: ExprS, right: ExprS| {
                        let span = left.1.start..right.1.end;
                        (
                            Expr::Logical {
                                op: kind,
                                left: Box::new(left),
                                right: Box::new(right),
                            },
                            span,
                        )
                    },
                )
                .boxed()
        };
        let and_test = logical(not_test, Token::And, LogicalOp::And);
        let or_test = logical(and_test, Token::Or, LogicalOp::Or);

        let conditional = or_test
            .clone()
            .then(
                just(Token::If)
                    .ignore_then(or_test)
                    .then_ignore(just(Token::Else))
                    .then(expr.clone())
                    .or_not(),
            )
            .map(|(then, rest): (ExprS, Option<(ExprS, ExprS)>)| match rest {
                None => then,
                Some((condition, otherwise)) => {
                    let span = then.1.start..otherwise.1.end;
                    (
                        Expr::Conditional {
                            condition: Box::new(condition),
                            then: Box::new(then),
                            otherwise: Box::new(otherwise),
                        },
                        span,
                    )
                }
            });

        let lambda = just(Token::Lambda)
            .ignore_then(params_parser(expr.clone()))
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .map_with(|(params, body), e| {
                let s: I::Span = e.span();
                (
                    Expr::Lambda {
                        params: Box::new(params),
                        body: Box::new(body),
                    },
                    s.into_range(),
                )
            });

        let yield_expr = just(Token::Yield)
            .ignore_then(expr_list.or_not())
            .map_with(|value, e| {
                let s: I::Span = e.span();
                (Expr::Yield(value.map(Box::new)), s.into_range())
            });

        choice((yield_expr, lambda, conditional)).labelled("expression")
    })
    .boxed()
}

pub fn stmt_parser<'tokens, I>() -> impl Parser<'tokens, I, Vec<StmtS>, Extra<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    let expr = expr_parser().boxed();
    let expr_list = sequence(expr.clone()).boxed();

    recursive(|stmt| {
        // 줄 끝 (newline 또는 입력 끝)
        let line_end = just(Token::Newline).ignored().or(end().ignored());

        let dotted = ident()
            .separated_by(just(Token::Dot))
            .at_least(1)
            .collect::<Vec<String>>()
            .map(|parts| parts.join("."));
        let alias = just(Token::As).ignore_then(ident()).or_not();

        // 단순 문장 (여기서는 줄 끝을 소비하지 않음)
        let keyword_stmt = choice((
            just(Token::Pass).to(Stmt::Pass),
            just(Token::Break).to(Stmt::Break),
            just(Token::Continue).to(Stmt::Continue),
            just(Token::Return)
                .ignore_then(expr_list.clone().or_not())
                .map(Stmt::Return)
                .labelled("return statement"),
            just(Token::Raise)
                .ignore_then(expr.clone().or_not())
                .map(Stmt::Raise),
            just(Token::Del)
                .ignore_then(
                    expr.clone()
                        .separated_by(just(Token::Comma))
                        .at_least(1)
                        .allow_trailing()
                        .collect(),
                )
                .map(Stmt::Del),
            just(Token::Global)
                .ignore_then(ident().separated_by(just(Token::Comma)).at_least(1).collect())
                .map(Stmt::Global),
            just(Token::Nonlocal)
                .ignore_then(ident().separated_by(just(Token::Comma)).at_least(1).collect())
                .map(Stmt::Nonlocal),
            just(Token::Assert)
                .ignore_then(expr.clone())
                .then(just(Token::Comma).ignore_then(expr.clone()).or_not())
                .map(|(condition, message)| Stmt::Assert { condition, message }),
        ));

        let import_stmt = just(Token::Import)
            .ignore_then(
                dotted
                    .clone()
                    .then(alias.clone())
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect(),
            )
            .map(Stmt::Import)
            .labelled("import statement");

        let import_name = ident().then(alias);
        let from_import = just(Token::From)
            .ignore_then(dotted)
            .then_ignore(just(Token::Import))
            .then(choice((
                import_name
                    .clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .allow_trailing()
                    .collect()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
                import_name.separated_by(just(Token::Comma)).at_least(1).collect(),
            )))
            .map(|(module, names)| Stmt::FromImport { module, names })
            .labelled("from-import statement");

        let aug_op = choice((
            just(Token::PlusEqual).to(BinaryOp::Add),
            just(Token::MinusEqual).to(BinaryOp::Subtract),
            just(Token::StarEqual).to(BinaryOp::Multiply),
            just(Token::SlashEqual).to(BinaryOp::Divide),
            just(Token::SlashSlashEqual).to(BinaryOp::FloorDivide),
            just(Token::PercentEqual).to(BinaryOp::Modulo),
        ));
        let expr_or_assign = expr_list
            .clone()
            .then(
                choice((
                    aug_op
                        .then(expr_list.clone())
                        .map(|(op, value)| AssignTail::Aug(op, value)),
                    just(Token::Equal)
                        .ignore_then(expr_list.clone())
                        .repeated()
                        .at_least(1)
                        .collect::<Vec<ExprS>>()
                        .map(AssignTail::Chain),
                ))
                .or_not(),
            )
            .map(|(first, tail)| match tail {
                None => Stmt::Expr(first),
                Some(AssignTail::Aug(op, value)) => Stmt::AugAssign {
                    target: first,
                    op,
                    value,
                },
                Some(AssignTail::Chain(mut rest)) => match rest.pop() {
                    Some(value) => {
                        let mut targets = vec![first];
                        targets.extend(rest);
                        Stmt::Assign { targets, value }
                    }
                    None => Stmt::Expr(first),
                },
            })
            .labelled("expression statement");

        // ';'로 구분된 단순 문장 한 줄 (끝의 ';'는 선택)
        let simple_stmt = choice((keyword_stmt, import_stmt, from_import, expr_or_assign)).map_with(
            |node: Stmt, e| {
                let s: I::Span = e.span();
                (node, s.into_range())
            },
        );

        let simple_stmts_line = simple_stmt
            .separated_by(just(Token::Semicolon))
            .allow_trailing()
            .at_least(1)
            .collect::<Vec<StmtS>>()
            .then_ignore(line_end)
            .labelled("simple statements")
            .boxed();

        // ':' 뒤의 블록
        // 들여쓴 블록과 같은 줄의 단순 문장을 모두 허용
        let indented_block = stmt
            .clone()
            .repeated()
            .at_least(1)
            .collect::<Vec<Vec<StmtS>>>()
            .map(|lines| lines.into_iter().flatten().collect::<Vec<StmtS>>())
            .delimited_by(
                just(Token::Newline).ignore_then(just(Token::Indent)),
                just(Token::Dedent),
            );

        let block = just(Token::Colon)
            .ignore_then(choice((indented_block, simple_stmts_line.clone())))
            .boxed();

        let if_stmt = just(Token::If)
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(
                just(Token::Elif)
                    .ignore_then(expr.clone())
                    .then(block.clone())
                    .repeated()
                    .collect::<Vec<(ExprS, Vec<StmtS>)>>(),
            )
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .map(|(((condition, then_block), elif_blocks), else_block)| Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            })
            .labelled("if statement");

        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(condition, body)| Stmt::While { condition, body })
            .labelled("while statement");

        let for_stmt = just(Token::For)
            .ignore_then(target_parser())
            .then_ignore(just(Token::In))
            .then(expr_list.clone())
            .then(block.clone())
            .map(|((target, iter), body)| Stmt::For { target, iter, body })
            .labelled("for statement");

        let def_stmt = just(Token::Def)
            .ignore_then(ident())
            .then(params_parser(expr.clone()).delimited_by(just(Token::LParen), just(Token::RParen)))
            .then_ignore(just(Token::Arrow).ignore_then(expr.clone()).or_not())
            .then(block.clone())
            .map(|((name, params), body)| {
                Stmt::Def(Box::new(FunctionDef {
                    name,
                    params,
                    body,
                    decorators: Vec::new(),
                }))
            })
            .labelled("def statement");

        let class_stmt = just(Token::Class)
            .ignore_then(ident())
            .then(
                expr.clone()
                    .or_not()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .then(block.clone())
            .map(|((name, base), body)| {
                Stmt::Class(Box::new(ClassDef {
                    name,
                    base: base.flatten(),
                    body,
                    decorators: Vec::new(),
                }))
            })
            .labelled("class statement");

        let decorated = just(Token::At)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Newline))
            .repeated()
            .collect::<Vec<ExprS>>()
            .then(choice((def_stmt, class_stmt)))
            .map(|(decorators, mut stmt)| {
                match &mut stmt {
                    Stmt::Def(def) => def.decorators = decorators,
                    Stmt::Class(class) => class.decorators = decorators,
                    _ => {}
                }
                stmt
            });

        let handler = just(Token::Except)
            .ignore_then(
                expr.clone()
                    .then(just(Token::As).ignore_then(ident()).or_not())
                    .or_not(),
            )
            .then(block.clone())
            .map_with(|(clause, body), e| {
                let s: I::Span = e.span();
                let (filter, name) = match clause {
                    Some((filter, name)) => (Some(filter), name),
                    None => (None, None),
                };
                ExceptHandler {
                    filter,
                    name,
                    body,
                    span: s.into_range(),
                }
            });

        let try_stmt = just(Token::Try)
            .ignore_then(block.clone())
            .then(handler.repeated().collect::<Vec<ExceptHandler>>())
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .then(just(Token::Finally).ignore_then(block).or_not())
            .try_map(|(((body, handlers), else_block), finally_block), span| {
                if handlers.is_empty() && finally_block.is_none() {
                    return Err(Rich::custom(span, "expected 'except' or 'finally' block"));
                }
                if handlers.is_empty() && else_block.is_some() {
                    return Err(Rich::custom(span, "'else' requires at least one 'except' clause"));
                }
                Ok(Stmt::Try {
                    body,
                    handlers,
                    else_block,
                    finally_block,
                })
            })
            .labelled("try statement");

        // 복합 문장은 논리적 한 줄 전체를 차지
        let compound_stmt_line = choice((if_stmt, while_stmt, for_stmt, try_stmt, decorated))
            .map_with(|node: Stmt, e| {
                let s: I::Span = e.span();
                (node, s.into_range())
            })
            .map(|s| vec![s]);

        choice((compound_stmt_line, simple_stmts_line)).recover_with(skip_then_retry_until(
            any().ignored(),
            just(Token::Newline)
                .ignored()
                .or(just(Token::Dedent).ignored())
                .or(end().ignored()),
        ))
    })
    .boxed()
}

pub fn program_parser<'tokens, I>() -> impl Parser<'tokens, I, Vec<StmtS>, Extra<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    stmt_parser()
        .repeated()
        .collect::<Vec<Vec<StmtS>>>()
        .map(|lines| lines.into_iter().flatten().collect::<Vec<StmtS>>())
        .then_ignore(end())
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn tokens(source: &str) -> Vec<(Token, SimpleSpan)> {
        tokenize(source)
            .into_iter()
            .map(|(t, span)| (t, SimpleSpan::from(span)))
            .collect()
    }

    fn parse_expr(source: &str) -> Result<ExprS, Vec<RichTokenError<'_>>> {
        let mut tokens = tokens(source);
        // 줄 끝 토큰을 버림: 식은 그대로 파싱
        if tokens.last().is_some_and(|(t, _)| *t == Token::Newline) {
            tokens.pop();
        }
        let eoi_span = SimpleSpan::new(source.len(), source.len());
        let stream = chumsky::input::Stream::from_iter(tokens).map(eoi_span, |(t, s)| (t, s));
        expr_parser().then_ignore(end()).parse(stream).into_result()
    }

    fn parse_program(source: &str) -> Result<Vec<StmtS>, Vec<RichTokenError<'_>>> {
        let tokens = tokens(source);
        let eoi_span = SimpleSpan::new(source.len(), source.len());
        let stream = chumsky::input::Stream::from_iter(tokens).map(eoi_span, |(t, s)| (t, s));
        program_parser().parse(stream).into_result()
    }

    fn single_stmt(source: &str) -> Stmt {
        let stmts = parse_program(source).unwrap_or_else(|e| panic!("Failed to parse {:?}: {:?}", source, e));
        assert_eq!(stmts.len(), 1, "expected a single statement in {:?}", source);
        stmts.into_iter().next().map(|(s, _)| s).unwrap()
    }

    // ========== 표현식 파싱 테스트 ==========

    #[test]
    fn test_parse_literals() {
        assert!(matches!(parse_expr("42").unwrap().0, Expr::Literal(Literal::Int(42))));
        assert!(matches!(parse_expr("True").unwrap().0, Expr::Literal(Literal::Bool(true))));
        assert!(matches!(parse_expr("None").unwrap().0, Expr::Literal(Literal::None)));
        assert!(matches!(parse_expr("2.5").unwrap().0, Expr::Literal(Literal::Float(_))));
    }

    #[test]
    fn test_adjacent_strings_concatenate() {
        let expr = parse_expr("'ab' \"cd\"").unwrap();
        assert_eq!(expr.0, Expr::Literal(Literal::String("abcd".to_string())));
    }

    #[test]
    fn test_parse_binary_precedence() {
        // 1 + 2 * 3 은 1 + (2 * 3)
        let expr = parse_expr("1 + 2 * 3").unwrap();
        if let Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } = expr.0
        {
            assert!(matches!(left.0, Expr::Literal(Literal::Int(1))));
            assert!(matches!(
                right.0,
                Expr::Binary {
                    op: BinaryOp::Multiply,
                    ..
                }
            ));
        } else {
            panic!("Expected addition at top level");
        }
    }

    #[test]
    fn test_power_is_right_associative_and_binds_tighter_than_negation() {
        let expr = parse_expr("-2 ** 3 ** 2").unwrap();
        let Expr::Unary {
            op: UnaryOp::Negate,
            expr: inner,
        } = expr.0
        else {
            panic!("Expected negation at top level");
        };
        let Expr::Binary {
            op: BinaryOp::Power,
            right,
            ..
        } = inner.0
        else {
            panic!("Expected power under negation");
        };
        assert!(matches!(
            right.0,
            Expr::Binary {
                op: BinaryOp::Power,
                ..
            }
        ));
    }

    #[test]
    fn test_bitwise_precedence() {
        // a | b & c  ->  a | (b & c)
        let expr = parse_expr("a | b & c").unwrap();
        let Expr::Binary {
            op: BinaryOp::BitOr,
            right,
            ..
        } = expr.0
        else {
            panic!("Expected bitwise or");
        };
        assert!(matches!(
            right.0,
            Expr::Binary {
                op: BinaryOp::BitAnd,
                ..
            }
        ));
    }

    #[test]
    fn test_comparison_chain_and_negated_operators() {
        let expr = parse_expr("a < b <= c").unwrap();
        let Expr::Compare { rest, .. } = expr.0 else {
            panic!("Expected comparison");
        };
        assert_eq!(rest.len(), 2);

        let expr = parse_expr("x not in y").unwrap();
        assert!(matches!(&expr.0, Expr::Compare { rest, .. } if rest[0].0 == CompareOp::NotIn));
        let expr = parse_expr("x is not None").unwrap();
        assert!(matches!(&expr.0, Expr::Compare { rest, .. } if rest[0].0 == CompareOp::IsNot));
    }

    #[test]
    fn test_parse_logical() {
        let expr = parse_expr("not a and b or c").unwrap();
        let Expr::Logical {
            op: LogicalOp::Or,
            left,
            ..
        } = expr.0
        else {
            panic!("Expected or at top level");
        };
        assert!(matches!(
            left.0,
            Expr::Logical {
                op: LogicalOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_conditional_expression() {
        let expr = parse_expr("a if c else b").unwrap();
        assert!(matches!(expr.0, Expr::Conditional { .. }));
    }

    #[test]
    fn test_parse_call_with_arguments() {
        let expr = parse_expr("f(1, x=2, *rest, **opts)").unwrap();
        let Expr::Call { callee, args } = expr.0 else {
            panic!("Expected call");
        };
        assert!(matches!(callee.0, Expr::Variable(ref name) if name == "f"));
        assert_eq!(args.len(), 4);
        assert!(matches!(args[0], Arg::Positional(_)));
        assert!(matches!(&args[1], Arg::Keyword(name, _) if name == "x"));
        assert!(matches!(args[2], Arg::Star(_)));
        assert!(matches!(args[3], Arg::StarStar(_)));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expr("obj.items[0].name()").unwrap();
        let Expr::Call { callee, .. } = expr.0 else {
            panic!("Expected call");
        };
        let Expr::Attribute { object, attr } = callee.0 else {
            panic!("Expected attribute");
        };
        assert_eq!(attr, "name");
        assert!(matches!(object.0, Expr::Subscript { .. }));
    }

    #[test]
    fn test_slices() {
        let expr = parse_expr("xs[1:]").unwrap();
        let Expr::Subscript { index, .. } = expr.0 else {
            panic!("Expected subscript");
        };
        assert!(matches!(
            index.0,
            Expr::Slice {
                start: Some(_),
                stop: None,
                step: None
            }
        ));
        let expr = parse_expr("xs[::-1]").unwrap();
        let Expr::Subscript { index, .. } = expr.0 else {
            panic!("Expected subscript");
        };
        assert!(matches!(
            index.0,
            Expr::Slice {
                start: None,
                stop: None,
                step: Some(_)
            }
        ));
    }

    #[test]
    fn test_displays() {
        assert!(matches!(parse_expr("[]").unwrap().0, Expr::List(ref v) if v.is_empty()));
        assert!(matches!(parse_expr("()").unwrap().0, Expr::Tuple(ref v) if v.is_empty()));
        assert!(matches!(parse_expr("(1,)").unwrap().0, Expr::Tuple(ref v) if v.len() == 1));
        assert!(matches!(parse_expr("(1)").unwrap().0, Expr::Literal(Literal::Int(1))));
        assert!(matches!(parse_expr("{'a': 1, 'b': 2}").unwrap().0, Expr::Dict(ref v) if v.len() == 2));
    }

    #[test]
    fn test_comprehensions() {
        let expr = parse_expr("[x * 2 for x in xs if x > 1]").unwrap();
        let Expr::ListComp { clauses, .. } = expr.0 else {
            panic!("Expected list comprehension");
        };
        assert_eq!(clauses.len(), 2);
        assert!(matches!(clauses[0], CompClause::For { .. }));
        assert!(matches!(clauses[1], CompClause::If(_)));

        let expr = parse_expr("{k: v for k, v in pairs}").unwrap();
        let Expr::DictComp { clauses, .. } = expr.0 else {
            panic!("Expected dict comprehension");
        };
        assert!(matches!(&clauses[0], CompClause::For { target: (Expr::Tuple(t), _), .. } if t.len() == 2));
    }

    #[test]
    fn test_lambda() {
        let expr = parse_expr("lambda a, b=2: a + b").unwrap();
        let Expr::Lambda { params, .. } = expr.0 else {
            panic!("Expected lambda");
        };
        assert_eq!(params.positional.len(), 2);
        assert!(params.positional[1].default.is_some());
    }

    #[test]
    fn test_parse_error_unclosed_paren() {
        assert!(parse_expr("(1 + 2").is_err());
    }

    // ========== 문장 파싱 테스트 ==========

    #[test]
    fn test_parse_assign() {
        let Stmt::Assign { targets, value } = single_stmt("x = 42\n") else {
            panic!("Expected assignment");
        };
        assert_eq!(targets.len(), 1);
        assert!(matches!(targets[0].0, Expr::Variable(ref name) if name == "x"));
        assert!(matches!(value.0, Expr::Literal(Literal::Int(42))));
    }

    #[test]
    fn test_chained_and_tuple_assignment() {
        let Stmt::Assign { targets, .. } = single_stmt("a = b = 1\n") else {
            panic!("Expected assignment");
        };
        assert_eq!(targets.len(), 2);

        let Stmt::Assign { targets, value } = single_stmt("a, b = b, a\n") else {
            panic!("Expected assignment");
        };
        assert!(matches!(targets[0].0, Expr::Tuple(ref t) if t.len() == 2));
        assert!(matches!(value.0, Expr::Tuple(ref t) if t.len() == 2));
    }

    #[test]
    fn test_aug_assign() {
        let stmt = single_stmt("total += x * 2\n");
        assert!(matches!(stmt, Stmt::AugAssign { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_parse_if_elif_else() {
        let source = "\
if x > 0:
  y = 1
elif x == 0:
  y = 0
else:
  y = -1
";
        let Stmt::If {
            elif_blocks,
            else_block,
            ..
        } = single_stmt(source)
        else {
            panic!("Expected if statement");
        };
        assert_eq!(elif_blocks.len(), 1);
        assert!(else_block.is_some());
    }

    #[test]
    fn test_parse_for_with_tuple_target() {
        let Stmt::For { target, body, .. } = single_stmt("for k, v in d.items():\n    print(k, v)\n") else {
            panic!("Expected for statement");
        };
        assert!(matches!(target.0, Expr::Tuple(ref t) if t.len() == 2));
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_parse_def_signature() {
        let source = "def f(a, b=1, *args, c, d=2, **kw):\n  return a\n";
        let Stmt::Def(def) = single_stmt(source) else {
            panic!("Expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.positional.len(), 2);
        assert_eq!(def.params.star.as_deref(), Some("args"));
        assert_eq!(def.params.kwonly.len(), 2);
        assert_eq!(def.params.kwargs.as_deref(), Some("kw"));
    }

    #[test]
    fn test_def_rejects_default_ordering() {
        assert!(parse_program("def f(a=1, b):\n  pass\n").is_err());
        assert!(parse_program("def f(a, a):\n  pass\n").is_err());
    }

    #[test]
    fn test_parse_decorated_class() {
        let source = "\
@decorate
class Point(Base):
    '''A point.'''
    origin = 0
    def __init__(self, x):
        self.x = x
";
        let Stmt::Class(class) = single_stmt(source) else {
            panic!("Expected class");
        };
        assert_eq!(class.name, "Point");
        assert!(class.base.is_some());
        assert_eq!(class.decorators.len(), 1);
        assert_eq!(class.body.len(), 3);
    }

    #[test]
    fn test_parse_try() {
        let source = "\
try:
    risky()
except (KeyError, IndexError) as e:
    handle(e)
except:
    pass
else:
    ok()
finally:
    done()
";
        let Stmt::Try {
            handlers,
            else_block,
            finally_block,
            ..
        } = single_stmt(source)
        else {
            panic!("Expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(handlers[1].filter.is_none());
        assert!(else_block.is_some());
        assert!(finally_block.is_some());
    }

    #[test]
    fn test_try_requires_handler() {
        assert!(parse_program("try:\n  x()\n").is_err());
    }

    #[test]
    fn test_parse_imports() {
        let Stmt::Import(names) = single_stmt("import a.b as c, d\n") else {
            panic!("Expected import");
        };
        assert_eq!(names[0], ("a.b".to_string(), Some("c".to_string())));
        assert_eq!(names[1], ("d".to_string(), None));

        let Stmt::FromImport { module, names } = single_stmt("from pkg.mod import (x, y as z)\n") else {
            panic!("Expected from-import");
        };
        assert_eq!(module, "pkg.mod");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_simple_statements_on_one_line() {
        let stmts = parse_program("x = 1; y = 2; pass\n").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_inline_block() {
        let Stmt::While { body, .. } = single_stmt("while x: x -= 1\n") else {
            panic!("Expected while");
        };
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_misc_keyword_statements() {
        assert!(matches!(single_stmt("del x[0], y\n"), Stmt::Del(ref t) if t.len() == 2));
        assert!(matches!(single_stmt("global a, b\n"), Stmt::Global(ref n) if n.len() == 2));
        assert!(matches!(single_stmt("assert x, 'msg'\n"), Stmt::Assert { message: Some(_), .. }));
        assert!(matches!(single_stmt("raise\n"), Stmt::Raise(None)));
        assert!(matches!(single_stmt("return a, b\n"), Stmt::Return(Some((Expr::Tuple(_), _)))));
        assert!(matches!(single_stmt("x = yield\n"), Stmt::Assign { value: (Expr::Yield(None), _), .. }));
    }

    #[test]
    fn test_parse_error_invalid_syntax() {
        assert!(parse_program("x = = 42\n").is_err());
    }
}
