pub mod lexer;
pub mod parser;
pub mod runtime_io;
pub mod vm;

use std::path::Path;

use ariadne::{Color, Label, Report, ReportKind, Source};
use chumsky::Parser;
use chumsky::input::{Input, Stream};
use chumsky::span::SimpleSpan;
use thiserror::Error;

use lexer::Token;
use vm::bytecode::{CodeFormatError, FunctionProto};

pub use vm::{Interpreter, VmConfig, VmFlags};

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub span: std::ops::Range<usize>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: std::ops::Range<usize>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// 1부터 시작하는 줄 번호
    pub fn line(&self, src: &str) -> usize {
        let end = self.span.start.min(src.len());
        src.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
    }

    /// `file:line: message` 한 줄 요약 (`SyntaxError` 메시지용)
    pub fn summary(&self, src: &str, path: &str) -> String {
        format!("{}:{}: {}", path, self.line(src), self.message)
    }

    pub fn format(&self, path: &str, src: &str, kind: &str, code: usize) -> String {
        let mut buffer = Vec::new();
        Report::build(ReportKind::Error, (path, self.span.clone()))
            .with_config(ariadne::Config::new().with_index_type(ariadne::IndexType::Byte))
            .with_code(code)
            .with_message(kind)
            .with_label(
                Label::new((path, self.span.clone()))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(src)), &mut buffer)
            .ok();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

/// 실행 경로 전체에서 호스트로 올라오는 오류
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("compilation failed with {} error(s)", .0.len())]
    Compile(Vec<Diagnostic>),
    /// 잡히지 않은 예외. 트레이스백 텍스트를 담습니다.
    #[error("{0}")]
    Uncaught(String),
    #[error("fatal VM error: {0}")]
    Fatal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Code(#[from] CodeFormatError),
}

pub fn parse_source(src: &str) -> Result<Vec<parser::ast::StmtS>, Vec<Diagnostic>> {
    let tokens = lexer::tokenize(src);

    let lex_errors: Vec<Diagnostic> = tokens
        .iter()
        .filter_map(|(t, _)| match t {
            Token::Error(message, span) => Some(Diagnostic::new(message.clone(), span.clone())),
            _ => None,
        })
        .collect();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }

    let token_iter = tokens
        .into_iter()
        .map(|(t, span)| (t, SimpleSpan::new(span.start, span.end)));
    let eoi_span = SimpleSpan::new(src.len(), src.len());
    let token_stream = Stream::from_iter(token_iter).map(eoi_span, |(t, s)| (t, s));
    match parser::program_parser().parse(token_stream).into_result() {
        Ok(program) => Ok(program),
        Err(errors) => {
            let mut errors = errors;
            errors.sort_by(|x1, x2| {
                let x1 = (x1.span().start, x1.span().end);
                let x2 = (x2.span().start, x2.span().end);
                x1.cmp(&x2)
            });
            let diagnostics = errors
                .into_iter()
                .map(|e| Diagnostic::new(e.reason().to_string(), e.span().into_range()))
                .collect();
            Err(diagnostics)
        }
    }
}

/// 소스 한 덩어리를 모듈 코드 객체로 컴파일합니다.
pub fn compile_source(src: &str, filename: &str) -> Result<FunctionProto, Vec<Diagnostic>> {
    let program = parse_source(src)?;
    vm::compile(&program, src, filename).map_err(|d| vec![d])
}

pub fn save_code(proto: &FunctionProto, path: &Path) -> Result<(), InterpretError> {
    let bytes = vm::encode_proto(proto)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_code(path: &Path) -> Result<FunctionProto, InterpretError> {
    let bytes = std::fs::read(path)?;
    Ok(vm::decode_proto(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_summary_uses_line_of_span_start() {
        let src = "a = 1\nb = (\n";
        let diag = Diagnostic::new("unexpected end of input", 10..11);
        assert_eq!(diag.line(src), 2);
        assert_eq!(diag.summary(src, "t.krk"), "t.krk:2: unexpected end of input");
    }

    #[test]
    fn test_lexer_errors_become_diagnostics() {
        let errors = parse_source("x = \"unterminated\n").unwrap_err();
        assert!(errors[0].message.contains("Unterminated"));
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let errors = parse_source("x = = 1\n").unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_compile_source_reports_compiler_errors() {
        let errors = compile_source("break\n", "<test>").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "'break' outside loop");
    }

    #[test]
    fn test_code_file_roundtrip() {
        let proto = compile_source("print(1 + 2)\n", "t.krk").expect("compile");
        let path = std::env::temp_dir().join(format!("kuroko-lib-test-{}.krkc", std::process::id()));
        save_code(&proto, &path).expect("save");
        let loaded = load_code(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.code, proto.code);
        assert_eq!(loaded.filename, "t.krk");
    }
}
