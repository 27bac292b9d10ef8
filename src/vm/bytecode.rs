//! 바이트코드 형식
//!
//! 컴파일러는 순수 데이터인 `FunctionProto`를 만들고, VM은 이를 힙의 코드 객체로
//! 올립니다(`Vm::load_proto`). `FunctionProto`는 serde로 직렬화되어 `.krkc` 파일로
//! 저장될 수 있습니다.
//!
//! # 인코딩
//!
//! - 1바이트 opcode 뒤에 0/1/2바이트 피연산자 (빅엔디언)
//! - 1바이트 피연산자가 255를 넘으면 `EXTENDED_ARG hi lo`가 앞에 붙어 최대 24비트
//! - `JUMP`는 부호 있는 16비트 상대 오프셋, 조건 점프와 `SETUP_*`/`FOR_ITER`는
//!   다음 명령 기준 16비트 전방 오프셋, `JUMP_ABSOLUTE`는 16비트 절대 오프셋
//! - `MAKE_CLOSURE`는 코드 객체의 upvalue 개수만큼 `(is_local: u8, index: u16)` 기술자가 뒤따름

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};
use thiserror::Error;

/// 저장된 코드 파일의 매직 헤더
pub const CODE_MAGIC: &[u8; 4] = b"KRKC";
pub const CODE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OpCode {
    // 상수
    Constant,
    PushInt,
    None,
    True,
    False,

    // 스택
    Pop,
    /// 스택 top에서 `n`번째 값을 복제
    Dup,
    Swap,
    Rot3,

    // 지역 / 전역 / upvalue
    GetLocal,
    /// 값을 스택에 남긴 채로 저장
    SetLocal,
    GetGlobal,
    SetGlobal,
    DelGlobal,
    GetUpvalue,
    SetUpvalue,
    CloseUpvalue,

    // 속성
    GetAttr,
    SetAttr,
    DelAttr,
    GetSuper,

    // 첨자
    GetSubscript,
    SetSubscript,
    DelSubscript,
    BuildSlice,

    // 산술
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Negate,
    Pos,
    Invert,
    Not,

    // 비교
    Equal,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Is,
    In,

    // 제어 흐름
    Jump,
    JumpAbsolute,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    PopJumpIfFalse,
    PopJumpIfTrue,

    // 호출
    Call,
    CallKw,
    Kwargs,
    Expand,

    // 반복
    GetIter,
    ForIter,

    // 예외
    SetupTry,
    SetupFinally,
    PopTry,
    BeginFinally,
    EndFinally,
    Raise,
    FilterExcept,

    // 클로저
    MakeClosure,

    // 클래스
    Class,
    Inherit,
    Method,
    FinalizeClass,

    // 컬렉션
    BuildList,
    BuildTuple,
    BuildDict,
    ListAppend,
    DictSet,
    Unpack,

    // 모듈
    ImportName,
    ImportFrom,

    Return,
    Yield,
    ExtendedArg,
}

/// 피연산자 형태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    /// 1바이트 (EXTENDED_ARG로 확장 가능)
    Byte,
    /// 2바이트 점프 오프셋
    Jump,
    /// EXTENDED_ARG 자체의 2바이트
    Wide,
}

impl OpCode {
    pub fn operand(self) -> Operand {
        use OpCode::*;
        match self {
            Constant | PushInt | Dup | GetLocal | SetLocal | GetGlobal | SetGlobal | DelGlobal
            | GetUpvalue | SetUpvalue | GetAttr | SetAttr | DelAttr | GetSuper | BuildSlice
            | Call | CallKw | Kwargs | Expand | MakeClosure | Class | Method | BuildList
            | BuildTuple | BuildDict | ListAppend | DictSet | Unpack | ImportName | ImportFrom => {
                Operand::Byte
            }
            Jump | JumpAbsolute | JumpIfFalseOrPop | JumpIfTrueOrPop | PopJumpIfFalse
            | PopJumpIfTrue | ForIter | SetupTry | SetupFinally => Operand::Jump,
            ExtendedArg => Operand::Wide,
            _ => Operand::None,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct CodeFlags: u8 {
        /// `*args` 파라미터가 있음
        const COLLECTS_ARGS = 1 << 0;
        /// `**kwargs` 파라미터가 있음
        const COLLECTS_KWS  = 1 << 1;
        /// 본문에 `yield`가 있음
        const IS_GENERATOR  = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Code(Box<FunctionProto>),
}

/// 바이트코드 오프셋 → 소스 라인
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// 디버깅용 지역 변수 이름 (슬롯과 유효 구간)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalName {
    pub slot: u16,
    pub name: String,
    pub start: u32,
    pub end: u32,
}

/// 컴파일된 함수 하나의 코드 객체 (순수 데이터)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionProto {
    pub name: String,
    pub filename: String,
    pub docstring: Option<String>,
    pub code: Vec<u8>,
    pub lines: Vec<LineEntry>,
    pub constants: Vec<Constant>,
    /// 기본값 없는 위치 인자 수
    pub required_args: u16,
    /// 기본값 있는 위치 인자 수
    pub keyword_args: u16,
    /// `*` 뒤의 키워드 전용 인자 수
    pub kwonly_args: u16,
    pub flags: CodeFlags,
    pub upvalue_count: u16,
    /// 프레임이 차지하는 최대 지역 슬롯 수
    pub local_count: u16,
    /// 위치 인자, 키워드 전용 인자, `*args`, `**kwargs` 순서의 파라미터 이름
    pub arg_names: Vec<String>,
    pub local_names: Vec<LocalName>,
}

impl FunctionProto {
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn positional_count(&self) -> usize {
        (self.required_args + self.keyword_args) as usize
    }

    // ========== 코드 작성 ==========

    pub fn write_byte(&mut self, byte: u8, line: u32) {
        let offset = self.code.len() as u32;
        if self.lines.last().is_none_or(|e| e.line != line) {
            self.lines.push(LineEntry { offset, line });
        }
        self.code.push(byte);
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write_byte(op as u8, line);
    }

    /// 1바이트 피연산자 명령. 255를 넘으면 `EXTENDED_ARG`를 앞에 붙입니다.
    pub fn write_arg(&mut self, op: OpCode, arg: usize, line: u32) {
        if arg > 0xFF {
            let ext = (arg >> 8) & 0xFFFF;
            self.write_op(OpCode::ExtendedArg, line);
            self.write_byte((ext >> 8) as u8, line);
            self.write_byte(ext as u8, line);
        }
        self.write_op(op, line);
        self.write_byte(arg as u8, line);
    }

    /// 전방 점프를 쓰고 패치할 위치를 돌려줍니다.
    pub fn write_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.write_op(op, line);
        self.write_byte(0xFF, line);
        self.write_byte(0xFF, line);
        self.code.len() - 2
    }

    /// `at`의 전방 점프가 현재 위치를 가리키도록 패치. `JUMP`가 부호 있는 오프셋이므로
    /// 모든 전방 점프는 `i16::MAX` 이내여야 합니다.
    pub fn patch_jump(&mut self, at: usize) -> Option<()> {
        let distance = self.code.len() - (at + 2);
        let distance = i16::try_from(distance).ok()? as u16;
        self.code[at] = (distance >> 8) as u8;
        self.code[at + 1] = distance as u8;
        Some(())
    }

    /// 역방향 점프(루프)를 씁니다.
    pub fn write_loop(&mut self, target: usize, line: u32) -> Option<()> {
        let target = u16::try_from(target).ok()?;
        self.write_op(OpCode::JumpAbsolute, line);
        self.write_byte((target >> 8) as u8, line);
        self.write_byte(target as u8, line);
        Some(())
    }

    pub fn add_constant(&mut self, constant: Constant) -> usize {
        // 코드 객체는 중복 제거하지 않음
        if !matches!(constant, Constant::Code(_)) {
            if let Some(i) = self.constants.iter().position(|c| c == &constant) {
                return i;
            }
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    // ========== 조회 ==========

    pub fn line_for(&self, offset: usize) -> u32 {
        line_for(&self.lines, offset)
    }
}

pub fn line_for(lines: &[LineEntry], offset: usize) -> u32 {
    let index = lines.partition_point(|e| e.offset as usize <= offset);
    if index == 0 {
        lines.first().map(|e| e.line).unwrap_or(0)
    } else {
        lines[index - 1].line
    }
}

pub fn read_u16(code: &[u8], at: usize) -> u16 {
    ((code[at] as u16) << 8) | code[at + 1] as u16
}

// ========== 직렬화 ==========

#[derive(Debug, Error)]
pub enum CodeFormatError {
    #[error("not a compiled kuroko file (bad magic)")]
    BadMagic,
    #[error("unsupported code format version {0} (expected {CODE_FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("failed to encode code object: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode code object: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub fn encode_proto(proto: &FunctionProto) -> Result<Vec<u8>, CodeFormatError> {
    let cfg = bincode::config::standard();
    let payload = bincode::serde::encode_to_vec(proto, cfg)?;
    let mut bytes = Vec::with_capacity(payload.len() + 8);
    bytes.extend_from_slice(CODE_MAGIC);
    bytes.extend_from_slice(&CODE_FORMAT_VERSION.to_be_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn decode_proto(bytes: &[u8]) -> Result<FunctionProto, CodeFormatError> {
    if bytes.len() < 8 || &bytes[..4] != CODE_MAGIC {
        return Err(CodeFormatError::BadMagic);
    }
    let version = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != CODE_FORMAT_VERSION {
        return Err(CodeFormatError::UnsupportedVersion(version));
    }
    let cfg = bincode::config::standard();
    let (proto, _) = bincode::serde::decode_from_slice(&bytes[8..], cfg)?;
    Ok(proto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_repr() {
        assert_eq!(OpCode::from_repr(OpCode::Return as u8), Some(OpCode::Return));
        assert_eq!(OpCode::from_repr(255), None);
        assert_eq!(OpCode::GetLocal.to_string(), "GET_LOCAL");
    }

    #[test]
    fn test_extended_arg_encoding() {
        let mut proto = FunctionProto::new("f", "<test>");
        proto.write_arg(OpCode::Constant, 3, 1);
        proto.write_arg(OpCode::Constant, 0x1234, 1);
        assert_eq!(
            proto.code,
            vec![
                OpCode::Constant as u8,
                3,
                OpCode::ExtendedArg as u8,
                0x00,
                0x12,
                OpCode::Constant as u8,
                0x34
            ]
        );
    }

    #[test]
    fn test_patch_jump() {
        let mut proto = FunctionProto::new("f", "<test>");
        let at = proto.write_jump(OpCode::PopJumpIfFalse, 1);
        proto.write_op(OpCode::Pop, 1);
        proto.write_op(OpCode::Pop, 1);
        proto.patch_jump(at).unwrap();
        assert_eq!(read_u16(&proto.code, at), 2);
    }

    #[test]
    fn test_line_map() {
        let mut proto = FunctionProto::new("f", "<test>");
        proto.write_op(OpCode::None, 1);
        proto.write_op(OpCode::Pop, 1);
        proto.write_op(OpCode::None, 3);
        proto.write_op(OpCode::Return, 4);
        assert_eq!(proto.lines.len(), 3);
        assert_eq!(proto.line_for(0), 1);
        assert_eq!(proto.line_for(1), 1);
        assert_eq!(proto.line_for(2), 3);
        assert_eq!(proto.line_for(3), 4);
    }

    #[test]
    fn test_constant_dedup_respects_kind() {
        let mut proto = FunctionProto::new("f", "<test>");
        let a = proto.add_constant(Constant::Int(1));
        let b = proto.add_constant(Constant::Float(1.0));
        let c = proto.add_constant(Constant::Int(1));
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_encode_decode_with_header() {
        let mut proto = FunctionProto::new("<module>", "t.krk");
        proto.write_op(OpCode::None, 1);
        proto.write_op(OpCode::Return, 1);
        proto.add_constant(Constant::Code(Box::new(FunctionProto::new("inner", "t.krk"))));
        let bytes = encode_proto(&proto).unwrap();
        assert_eq!(&bytes[..4], CODE_MAGIC);
        let back = decode_proto(&bytes).unwrap();
        assert_eq!(back, proto);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        assert!(matches!(decode_proto(b"NOPE0000"), Err(CodeFormatError::BadMagic)));
    }
}
