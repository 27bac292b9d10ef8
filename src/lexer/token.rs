use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Range;

/// 렉서가 만드는 토큰. 들여쓰기는 `Indent`/`Dedent`로 펼쳐집니다.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // ===== 키워드 =====
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Def,
    Return,
    And,
    Or,
    Not,
    Is,
    Class,
    Break,
    Continue,
    Pass,
    Import,
    From,
    As,
    Try,
    Except,
    Finally,
    Raise,
    Lambda,
    Yield,
    Del,
    Global,
    Nonlocal,
    Assert,

    // ===== 리터럴 =====
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Identifier(String),

    // ===== 산술/비트 연산자 =====
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,

    // ===== 비교와 대입 =====
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    SlashSlashEqual,
    PercentEqual,

    // ===== 구두점 =====
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Semicolon,
    Dot,
    At,
    Arrow,

    // ===== 레이아웃 =====
    Indent,
    Dedent,
    Newline,
    Eof,

    /// 렉싱 실패. 메시지와 원문 범위를 담아 진단으로 옮겨집니다.
    Error(String, Range<usize>),
}

impl Token {
    /// 철자가 고정된 토큰(키워드, 연산자, 구두점)의 원문
    pub fn spelling(&self) -> Option<&'static str> {
        let text = match self {
            Token::If => "if",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::In => "in",
            Token::Def => "def",
            Token::Return => "return",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Is => "is",
            Token::Class => "class",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Pass => "pass",
            Token::Import => "import",
            Token::From => "from",
            Token::As => "as",
            Token::Try => "try",
            Token::Except => "except",
            Token::Finally => "finally",
            Token::Raise => "raise",
            Token::Lambda => "lambda",
            Token::Yield => "yield",
            Token::Del => "del",
            Token::Global => "global",
            Token::Nonlocal => "nonlocal",
            Token::Assert => "assert",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::StarStar => "**",
            Token::Slash => "/",
            Token::SlashSlash => "//",
            Token::Percent => "%",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::EqualEqual => "==",
            Token::NotEqual => "!=",
            Token::Less => "<",
            Token::LessEqual => "<=",
            Token::Greater => ">",
            Token::GreaterEqual => ">=",
            Token::Equal => "=",
            Token::PlusEqual => "+=",
            Token::MinusEqual => "-=",
            Token::StarEqual => "*=",
            Token::SlashEqual => "/=",
            Token::SlashSlashEqual => "//=",
            Token::PercentEqual => "%=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::At => "@",
            Token::Arrow => "->",
            Token::None => "None",
            Token::Bool(true) => "True",
            Token::Bool(false) => "False",
            _ => return Option::None,
        };
        Some(text)
    }

    pub fn is_keyword(&self) -> bool {
        self.spelling().is_some_and(|s| s.chars().all(|c| c.is_ascii_alphabetic()))
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if let Some(text) = self.spelling() {
            return f.write_str(text);
        }
        match self {










            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spelling_covers_fixed_tokens() {
        assert_eq!(Token::Nonlocal.to_string(), "nonlocal");
        assert_eq!(Token::SlashSlashEqual.to_string(), "//=");
        assert_eq!(Token::LBrace.to_string(), "{");
        assert_eq!(Token::Bool(false).to_string(), "False");
        assert_eq!(Token::Identifier("x".into()).spelling(), Option::None);
        assert!(Token::Yield.is_keyword());
        assert!(!Token::Arrow.is_keyword());
        assert!(Token::None.is_keyword());
    }
}
