pub mod builtins; // 내장 클래스/함수/네이티브 모듈
pub mod bytecode;
pub mod compiler;
pub mod disasm; // 디스어셈블러
pub mod heap;
pub mod machine; // machine/ 디렉토리
pub mod object;
pub mod table;
pub mod threads; // GIL 아래의 실행 핸들
pub mod type_def;
pub mod value;

pub use bytecode::{CodeFormatError, Constant, FunctionProto, OpCode, decode_proto, encode_proto};
pub use compiler::{CompileResult, Compiler, compile};
pub use machine::{ExcKind, Vm, VmConfig, VmError, VmFlags, VmResult};
pub use threads::Interpreter;
pub use value::{ObjRef, Value};
