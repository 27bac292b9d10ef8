use logos::Logos;

/// 토큰 콜백이 남기는 구체적인 오류 메시지
#[derive(Debug, Default)]
pub struct LexExtras {
    pub error_message: Option<String>,
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(extras = LexExtras)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum RawToken {
    // 키워드
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("is")]
    Is,
    #[token("class")]
    Class,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("pass")]
    Pass,
    #[token("None")]
    None,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,
    #[token("try")]
    Try,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("raise")]
    Raise,
    #[token("lambda")]
    Lambda,
    #[token("yield")]
    Yield,
    #[token("del")]
    Del,
    #[token("global")]
    Global,
    #[token("nonlocal")]
    Nonlocal,
    #[token("assert")]
    Assert,

    // 식별자와 리터럴
    #[token("True", |_| true)]
    #[token("False", |_| false)]
    Bool(bool),
    #[regex(r"[0-9][0-9_]*", |lex| lex_integer(lex, 10, 0))]
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| lex_integer(lex, 16, 2))]
    #[regex(r"0[oO][0-7_]+", |lex| lex_integer(lex, 8, 2))]
    #[regex(r"0[bB][01_]+", |lex| lex_integer(lex, 2, 2))]
    Int(i64),
    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", lex_float)]
    Float(f64),
    #[regex(r#"["']"#, lex_string)]
    String(String),
    #[regex(r#"[bB]["']"#, lex_bytes)]
    Bytes(Vec<u8>),
    #[regex(r"\p{XID_Start}\p{XID_Continue}*", lex_identifier)]
    #[regex(r"_\p{XID_Continue}*", lex_identifier)]
    Identifier(String),

    // 연산자와 구두점
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("=")]
    Equal,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("//=")]
    SlashSlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token("->")]
    Arrow,

    #[token("\n")]
    Newline,
}

fn lex_integer(lexer: &mut logos::Lexer<RawToken>, radix: u32, prefix: usize) -> Option<i64> {
    let slice = lexer.slice();
    let digits: String = slice[prefix..].chars().filter(|&c| c != '_').collect();
    match i64::from_str_radix(&digits, radix) {
        Ok(value) => Some(value),
        Err(_) => {
            lexer.extras.error_message = Some(format!("Integer literal '{}' is out of range.", slice));
            None
        }
    }
}

fn lex_float(lexer: &mut logos::Lexer<RawToken>) -> Option<f64> {
    let slice = lexer.slice();
    let digits: String = slice.chars().filter(|&c| c != '_').collect();
    match digits.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            lexer.extras.error_message = Some(format!("Float literal '{}' is out of range.", slice));
            None
        }
    }
}

fn lex_identifier(lexer: &mut logos::Lexer<RawToken>) -> Option<String> {
    let slice = lexer.slice();
    Some(slice.to_string())
}

// ========== 문자열 리터럴 ==========

fn lex_string(lexer: &mut logos::Lexer<RawToken>) -> Option<String> {
    let (text, consumed) = match scan_quoted(lexer.slice(), lexer.remainder(), false) {
        Ok(scanned) => scanned,
        Err(message) => {
            lexer.extras.error_message = Some(message);
            return None;
        }
    };
    lexer.bump(consumed);
    let mut out = String::new();
    for piece in text {
        match piece {
            Piece::Char(c) => out.push(c),
            Piece::Byte(b) => out.push(b as char),
        }
    }
    Some(out)
}

fn lex_bytes(lexer: &mut logos::Lexer<RawToken>) -> Option<Vec<u8>> {
    let (text, consumed) = match scan_quoted(lexer.slice(), lexer.remainder(), true) {
        Ok(scanned) => scanned,
        Err(message) => {
            lexer.extras.error_message = Some(message);
            return None;
        }
    };
    lexer.bump(consumed);
    let mut out = Vec::new();
    for piece in text {
        match piece {
            Piece::Byte(b) => out.push(b),
            Piece::Char(c) if c.is_ascii() => out.push(c as u8),
            Piece::Char(_) => {
                lexer.extras.error_message = Some("bytes can only contain ASCII literal characters.".to_string());
                return None;
            }
        }
    }
    Some(out)
}

enum Piece {
    Char(char),
    /// `\xHH` 이스케이프
    Byte(u8),
}

/// 여는 따옴표 뒤의 나머지를 닫는 따옴표까지 읽습니다. `(내용, 소비한 바이트 수)`
fn scan_quoted(opening: &str, rest: &str, bytes: bool) -> Result<(Vec<Piece>, usize), String> {
    let quote = opening.chars().last().unwrap_or('"');
    let triple_marker = format!("{0}{0}", quote);
    let triple = rest.starts_with(&triple_marker);
    let body_start = if triple { 2 } else { 0 };

    let mut pieces = Vec::new();
    let mut chars = rest[body_start..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let Some((_, e)) = chars.next() else { break };
                match e {
                    'n' => pieces.push(Piece::Char('\n')),
                    't' => pieces.push(Piece::Char('\t')),
                    'r' => pieces.push(Piece::Char('\r')),
                    '0' => pieces.push(Piece::Char('\0')),
                    'a' => pieces.push(Piece::Char('\x07')),
                    'b' => pieces.push(Piece::Char('\x08')),
                    'f' => pieces.push(Piece::Char('\x0c')),
                    'v' => pieces.push(Piece::Char('\x0b')),
                    '\\' | '\'' | '"' => pieces.push(Piece::Char(e)),
                    '\n' => {}
                    'x' => {
                        let hex: String = (0..2).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                        let value = u8::from_str_radix(&hex, 16)
                            .map_err(|_| format!("Invalid \\x escape '\\x{}'.", hex))?;
                        if bytes {
                            pieces.push(Piece::Byte(value));
                        } else {
                            pieces.push(Piece::Char(value as char));
                        }
                    }
                    'u' if !bytes => {
                        let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                        let c = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| format!("Invalid \\u escape '\\u{}'.", hex))?;
                        pieces.push(Piece::Char(c));
                    }
                    other => {
                        pieces.push(Piece::Char('\\'));
                        pieces.push(Piece::Char(other));
                    }
                }
            }
            '\n' if !triple => return Err("Unterminated string literal.".to_string()),
            c if c == quote => {
                let end = body_start + i + 1;
                if !triple {
                    return Ok((pieces, end));
                }
                if rest[end..].starts_with(&triple_marker) {
                    return Ok((pieces, end + 2));
                }
                pieces.push(Piece::Char(c));
            }
            c => pieces.push(Piece::Char(c)),
        }
    }
    Err("Unterminated string literal.".to_string())
}
