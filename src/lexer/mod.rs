mod raw_token;
pub mod token;

use logos::{Lexer as LogosLexer, Logos};
use raw_token::RawToken;
use std::collections::VecDeque;
use std::ops::Range;
pub use token::Token;

/// logos 토큰 위에 들여쓰기(`Indent`/`Dedent`)와 논리적 줄(`Newline`)을 얹는 렉서
///
/// - 괄호 안의 줄바꿈은 무시됩니다 (암묵적 줄 이음).
/// - 빈 줄과 주석만 있는 줄은 `Newline`을 만들지 않습니다.
/// - 입력 끝에서는 열린 블록 수만큼 `Dedent`를 내고 `Eof`로 끝납니다.
pub struct Lexer<'source> {
    inner: LogosLexer<'source, RawToken>,
    token_queue: VecDeque<(Token, Range<usize>)>,
    indent_stack: Vec<usize>,
    at_start_of_line: bool,
    /// 열린 괄호 깊이
    depth: usize,
    /// 현재 논리적 줄에 토큰이 하나라도 나왔는지
    line_has_tokens: bool,
    finished: bool,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Lexer {
            inner: RawToken::lexer(source),
            token_queue: VecDeque::new(),
            indent_stack: vec![0],
            at_start_of_line: true,
            depth: 0,
            line_has_tokens: false,
            finished: false,
        }
    }

    pub fn next_token(&mut self) -> Token {
        let (tok, _) = self.next_token_with_span();
        tok
    }

    pub fn next_token_with_span(&mut self) -> (Token, Range<usize>) {
        loop {
            if let Some((token, span)) = self.token_queue.pop_front() {
                return (token, span);
            }
            if self.finished {
                let pos = self.inner.source().len();
                return (Token::Eof, pos..pos);
            }

            if self.at_start_of_line && self.depth == 0 {
                self.at_start_of_line = false;
                self.handle_indentation();
                if let Some((token, span)) = self.token_queue.pop_front() {
                    return (token, span);
                }
            }

            match self.inner.next() {
                Some(Ok(RawToken::Newline)) => {
                    let span = self.inner.span();
                    if self.depth > 0 {
                        continue;
                    }
                    self.at_start_of_line = true;
                    if !self.line_has_tokens {
                        continue;
                    }
                    self.line_has_tokens = false;
                    return (Token::Newline, span);
                }
                Some(Ok(raw_token)) => {
                    let span = self.inner.span();
                    match raw_token {
                        RawToken::LParen | RawToken::LBracket | RawToken::LBrace => self.depth += 1,
                        RawToken::RParen | RawToken::RBracket | RawToken::RBrace => {
                            self.depth = self.depth.saturating_sub(1)
                        }
                        _ => {}
                    }
                    self.line_has_tokens = true;
                    return (Self::convert_token(raw_token), span);
                }
                Some(Err(_)) => {
                    let span = self.inner.span();
                    self.line_has_tokens = true;
                    // extras에 저장된 구체적인 오류 메시지가 있는지 확인
                    let error_msg = self
                        .inner
                        .extras
                        .error_message
                        .take()
                        .unwrap_or_else(|| format!("Invalid token '{}'", self.inner.slice()));
                    return (Token::Error(error_msg, span.clone()), span);
                }
                None => {
                    self.finished = true;
                    let pos = self.inner.source().len();
                    if self.line_has_tokens {
                        self.line_has_tokens = false;
                        self.token_queue.push_back((Token::Newline, pos..pos));
                    }
                    while self.indent_stack.len() > 1 {
                        self.indent_stack.pop();
                        self.token_queue.push_back((Token::Dedent, pos..pos));
                    }
                }
            }
        }
    }

    fn handle_indentation(&mut self) {
        let line_start = self.inner.span().end; // last token was Newline
        let remainder = self.inner.remainder();

        let mut current_indent = 0;
        for ch in remainder.chars() {
            match ch {
                ' ' => current_indent += 1,
                '\t' => {
                    // 탭은 허용하지 않음
                    let tab_span = (line_start + current_indent)..(line_start + current_indent + 1);
                    self.token_queue.push_back((
                        Token::Error("Tabs are not allowed for indentation.".to_string(), tab_span.clone()),
                        tab_span,
                    ));
                    self.line_has_tokens = true;
                    return;
                }
                _ => break,
            }
        }

        self.inner.bump(current_indent);
        let indent_span = line_start..(line_start + current_indent);

        // 빈 줄, 주석 줄, 입력 끝은 들여쓰기에 영향을 주지 않음
        match remainder[current_indent..].chars().next() {
            None | Some('\n' | '\r' | '#') => return,
            Some(_) => {}
        }

        let last_indent = *self.indent_stack.last().unwrap_or(&0);
        if current_indent > last_indent {
            self.indent_stack.push(current_indent);
            self.token_queue.push_back((Token::Indent, indent_span));
        } else if current_indent < last_indent {
            while current_indent < *self.indent_stack.last().unwrap_or(&0) {
                self.indent_stack.pop();
                self.token_queue.push_back((Token::Dedent, indent_span.clone()));
            }
            if current_indent != *self.indent_stack.last().unwrap_or(&0) {
                self.token_queue.push_back((
                    Token::Error(
                        "Unindent does not match any outer indentation level.".to_string(),
                        indent_span.clone(),
                    ),
                    indent_span,
                ));
            }
        }
    }

    fn convert_token(raw: RawToken) -> Token {
        match raw {
            RawToken::If => Token::If,
            RawToken::Elif => Token::Elif,
            RawToken::Else => Token::Else,
            RawToken::While => Token::While,
            RawToken::For => Token::For,
            RawToken::In => Token::In,
            RawToken::Def => Token::Def,
            RawToken::Return => Token::Return,
            RawToken::And => Token::And,
            RawToken::Or => Token::Or,
            RawToken::Not => Token::Not,
            RawToken::Is => Token::Is,
            RawToken::Class => Token::Class,
            RawToken::Break => Token::Break,
            RawToken::Continue => Token::Continue,
            RawToken::Pass => Token::Pass,
            RawToken::None => Token::None,
            RawToken::Import => Token::Import,
            RawToken::From => Token::From,
            RawToken::As => Token::As,
            RawToken::Try => Token::Try,
            RawToken::Except => Token::Except,
            RawToken::Finally => Token::Finally,
            RawToken::Raise => Token::Raise,
            RawToken::Lambda => Token::Lambda,
            RawToken::Yield => Token::Yield,
            RawToken::Del => Token::Del,
            RawToken::Global => Token::Global,
            RawToken::Nonlocal => Token::Nonlocal,
            RawToken::Assert => Token::Assert,

            RawToken::Bool(b) => Token::Bool(b),
            RawToken::Int(i) => Token::Int(i),
            RawToken::Float(f) => Token::Float(f),
            RawToken::String(s) => Token::String(s),
            RawToken::Bytes(b) => Token::Bytes(b),
            RawToken::Identifier(name) => Token::Identifier(name),

            RawToken::Plus => Token::Plus,
            RawToken::Minus => Token::Minus,
            RawToken::Star => Token::Star,
            RawToken::StarStar => Token::StarStar,
            RawToken::Slash => Token::Slash,
            RawToken::SlashSlash => Token::SlashSlash,
            RawToken::Percent => Token::Percent,
            RawToken::Amp => Token::Amp,
            RawToken::Pipe => Token::Pipe,
            RawToken::Caret => Token::Caret,
            RawToken::Tilde => Token::Tilde,
            RawToken::Shl => Token::Shl,
            RawToken::Shr => Token::Shr,
            RawToken::EqualEqual => Token::EqualEqual,
            RawToken::NotEqual => Token::NotEqual,
            RawToken::Less => Token::Less,
            RawToken::LessEqual => Token::LessEqual,
            RawToken::Greater => Token::Greater,
            RawToken::GreaterEqual => Token::GreaterEqual,
            RawToken::Equal => Token::Equal,
            RawToken::PlusEqual => Token::PlusEqual,
            RawToken::MinusEqual => Token::MinusEqual,
            RawToken::StarEqual => Token::StarEqual,
            RawToken::SlashEqual => Token::SlashEqual,
            RawToken::SlashSlashEqual => Token::SlashSlashEqual,
            RawToken::PercentEqual => Token::PercentEqual,
            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
            RawToken::LBracket => Token::LBracket,
            RawToken::RBracket => Token::RBracket,
            RawToken::LBrace => Token::LBrace,
            RawToken::RBrace => Token::RBrace,
            RawToken::Colon => Token::Colon,
            RawToken::Comma => Token::Comma,
            RawToken::Semicolon => Token::Semicolon,
            RawToken::Dot => Token::Dot,
            RawToken::At => Token::At,
            RawToken::Arrow => Token::Arrow,

            RawToken::Newline => Token::Newline,
        }
    }
}

/// 전체 소스를 `Eof` 직전까지 토큰으로 나눕니다.
pub fn tokenize(source: &str) -> Vec<(Token, Range<usize>)> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let (token, span) = lexer.next_token_with_span();
        if token == Token::Eof {
            break;
        }
        tokens.push((token, span));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Token {
        Token::Identifier(name.to_string())
    }

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_factorial() {
        let source = "\
def factorial(n):
  if n == 0:
    return 1
  else:
    return n * factorial(n - 1)
";
        let mut lexer = Lexer::new(source);
        let expected_tokens = vec![
            Token::Def,
            ident("factorial"),
            Token::LParen,
            ident("n"),
            Token::RParen,
            Token::Colon,
            Token::Newline,
            Token::Indent,
            Token::If,
            ident("n"),
            Token::EqualEqual,
            Token::Int(0),
            Token::Colon,
            Token::Newline,
            Token::Indent,
            Token::Return,
            Token::Int(1),
            Token::Newline,
            Token::Dedent,
            Token::Else,
            Token::Colon,
            Token::Newline,
            Token::Indent,
            Token::Return,
            ident("n"),
            Token::Star,
            ident("factorial"),
            Token::LParen,
            ident("n"),
            Token::Minus,
            Token::Int(1),
            Token::RParen,
            Token::Newline,
            Token::Dedent,
            Token::Dedent,
            Token::Eof,
        ];
        for expected in expected_tokens {
            let token = lexer.next_token();
            assert_eq!(token, expected);
        }
    }

    #[test]
    fn test_any_consistent_indent_width() {
        let source = "while x:\n    x = x - 1\n    y = 2\nz = 3\n";
        let tokens = kinds(source);
        assert_eq!(tokens.iter().filter(|t| **t == Token::Indent).count(), 1);
        assert_eq!(tokens.iter().filter(|t| **t == Token::Dedent).count(), 1);
        assert!(!tokens.iter().any(|t| matches!(t, Token::Error(..))));
    }

    #[test]
    fn test_blank_lines_and_comments_are_skipped() {
        let source = "\n# header\nx = 1\n\n   # indented comment\ny = 2  # trailing\n";
        assert_eq!(
            kinds(source),
            vec![
                ident("x"),
                Token::Equal,
                Token::Int(1),
                Token::Newline,
                ident("y"),
                Token::Equal,
                Token::Int(2),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let source = "x = [1,\n     2,\n  3]\n";
        assert_eq!(
            kinds(source),
            vec![
                ident("x"),
                Token::Equal,
                Token::LBracket,
                Token::Int(1),
                Token::Comma,
                Token::Int(2),
                Token::Comma,
                Token::Int(3),
                Token::RBracket,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_missing_trailing_newline() {
        let source = "if x:\n  y";
        assert_eq!(
            kinds(source),
            vec![
                Token::If,
                ident("x"),
                Token::Colon,
                Token::Newline,
                Token::Indent,
                ident("y"),
                Token::Newline,
                Token::Dedent,
            ]
        );
    }

    #[test]
    fn test_tabs_are_rejected() {
        let tokens = kinds("if x:\n\ty = 1\n");
        assert!(tokens.iter().any(|t| matches!(t, Token::Error(msg, _) if msg.contains("Tabs"))));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let tokens = kinds("if x:\n    y = 1\n  z = 2\n");
        assert!(tokens.iter().any(|t| matches!(t, Token::Error(msg, _) if msg.contains("Unindent"))));
    }

    #[test]
    fn test_keywords_and_operators() {
        assert_eq!(
            kinds("a is not b ** 2 // 3 << 1 != c"),
            vec![
                ident("a"),
                Token::Is,
                Token::Not,
                ident("b"),
                Token::StarStar,
                Token::Int(2),
                Token::SlashSlash,
                Token::Int(3),
                Token::Shl,
                Token::Int(1),
                Token::NotEqual,
                ident("c"),
                Token::Newline,
            ]
        );
        assert_eq!(
            kinds("x //= 2"),
            vec![ident("x"), Token::SlashSlashEqual, Token::Int(2), Token::Newline]
        );
    }

    #[test]
    fn test_underscore_identifiers() {
        assert_eq!(kinds("__init__ _x"), vec![ident("__init__"), ident("_x"), Token::Newline]);
    }

    #[test]
    fn test_number_radixes() {
        assert_eq!(
            kinds("0x1F 0o17 0b101 1_000"),
            vec![
                Token::Int(31),
                Token::Int(15),
                Token::Int(5),
                Token::Int(1000),
                Token::Newline
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'a\tb' "q\"x" '\x41\u00e9'"#),
            vec![
                Token::String("a\tb".to_string()),
                Token::String("q\"x".to_string()),
                Token::String("Aé".to_string()),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let source = "x = \"\"\"one\ntwo\"\"\"\ny = ''\n";
        assert_eq!(
            kinds(source),
            vec![
                ident("x"),
                Token::Equal,
                Token::String("one\ntwo".to_string()),
                Token::Newline,
                ident("y"),
                Token::Equal,
                Token::String(String::new()),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_bytes_literal() {
        assert_eq!(
            kinds(r"b'ab\xff'"),
            vec![Token::Bytes(vec![b'a', b'b', 0xff]), Token::Newline]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = kinds("x = 'abc\n");
        assert!(tokens.iter().any(|t| matches!(t, Token::Error(msg, _) if msg.contains("Unterminated"))));
    }

    #[test]
    fn test_integer_overflow() {
        // i64::MAX = 9223372036854775807
        let source = "99999999999999999999";
        let mut lexer = Lexer::new(source);
        let token = lexer.next_token();
        match token {
            Token::Error(msg, _) => {
                assert!(msg.contains("out of range"), "Expected overflow error, got: {}", msg);
                assert!(msg.contains("99999999999999999999"), "Error should include the literal");
            }
            _ => panic!("Expected error token for integer overflow, got: {:?}", token),
        }
    }

    #[test]
    fn test_integer_just_below_max() {
        let source = "9223372036854775807";
        let mut lexer = Lexer::new(source);
        let token = lexer.next_token();
        assert_eq!(token, Token::Int(9223372036854775807));
    }

    #[test]
    fn test_float_overflow() {
        let source = "9.9e999";
        let mut lexer = Lexer::new(source);
        let token = lexer.next_token();
        match token {
            Token::Error(msg, _) => {
                assert!(msg.contains("out of range"), "Expected float overflow error, got: {}", msg);
                assert!(msg.contains("9.9e999"), "Error should include the literal");
            }
            _ => panic!("Expected error token for float overflow, got: {:?}", token),
        }
    }

    #[test]
    fn test_float_forms() {
        assert_eq!(
            kinds("3.5 .25 1e3 2."),
            vec![
                Token::Float(3.5),
                Token::Float(0.25),
                Token::Float(1000.0),
                Token::Float(2.0),
                Token::Newline
            ]
        );
    }
}
