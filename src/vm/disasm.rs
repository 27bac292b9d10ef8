use super::bytecode::{Constant, FunctionProto, OpCode, Operand, read_u16};
use std::fmt::{self, Write};

/// 디코딩된 명령 하나 (`EXTENDED_ARG` 접두는 합쳐짐)
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub offset: usize,
    /// 다음 명령의 오프셋
    pub next: usize,
    pub op: OpCode,
    pub arg: usize,
    /// `MAKE_CLOSURE` 뒤의 `(is_local, index)` 기술자
    pub upvalues: Vec<(bool, u16)>,
}

impl Instruction {
    /// 점프 명령의 대상 오프셋
    pub fn jump_target(&self) -> Option<usize> {
        match self.op {
            OpCode::Jump => Some((self.next as isize + self.arg as u16 as i16 as isize) as usize),
            OpCode::JumpAbsolute => Some(self.arg),
            op if op.operand() == Operand::Jump => Some(self.next + self.arg),
            _ => None,
        }
    }
}

/// 코드를 명령 단위로 디코딩합니다. 잘린 코드는 거기서 멈춥니다.
pub fn instructions(proto: &FunctionProto) -> Vec<Instruction> {
    let code = &proto.code;
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let offset = ip;
        let mut ext = 0usize;
        let (op, arg) = loop {
            let Some(op) = code.get(ip).and_then(|&b| OpCode::from_repr(b)) else {
                return out;
            };
            ip += 1;
            match op.operand() {
                Operand::None => break (op, 0),
                Operand::Byte => {
                    let Some(&byte) = code.get(ip) else { return out };
                    ip += 1;
                    break (op, (ext << 8) | byte as usize);
                }
                Operand::Jump => {
                    if ip + 2 > code.len() {
                        return out;
                    }
                    let arg = read_u16(code, ip) as usize;
                    ip += 2;
                    break (op, arg);
                }
                Operand::Wide => {
                    if ip + 2 > code.len() {
                        return out;
                    }
                    ext = read_u16(code, ip) as usize;
                    ip += 2;
                }
            }
        };
        let mut upvalues = Vec::new();
        if op == OpCode::MakeClosure {
            if let Some(Constant::Code(inner)) = proto.constants.get(arg) {
                for _ in 0..inner.upvalue_count {
                    if ip + 3 > code.len() {
                        return out;
                    }
                    upvalues.push((code[ip] != 0, read_u16(code, ip + 1)));
                    ip += 3;
                }
            }
        }
        out.push(Instruction {
            offset,
            next: ip,
            op,
            arg,
            upvalues,
        });
    }
    out
}

pub fn disassemble(proto: &FunctionProto) -> String {
    let mut output = String::new();
    let _ = disassemble_to(proto, &mut output);
    output
}

/// 함수와 그 안의 모든 코드 상수를 차례로 출력합니다.
pub fn disassemble_to(proto: &FunctionProto, w: &mut impl Write) -> fmt::Result {
    writeln!(
        w,
        "<{}> from {} (args={}, locals={}, upvalues={}{})",
        proto.name,
        proto.filename,
        proto.positional_count() + proto.kwonly_args as usize,
        proto.local_count,
        proto.upvalue_count,
        if proto.flags.is_empty() {
            String::new()
        } else {
            format!(", flags={:?}", proto.flags)
        }
    )?;

    let mut last_line = None;
    for ins in instructions(proto) {
        let line = proto.line_for(ins.offset);
        if last_line == Some(line) {
            write!(w, "     ")?;
        } else {
            write!(w, "{:4} ", line)?;
            last_line = Some(line);
        }
        write!(w, "{:5} {:<18}", ins.offset, ins.op.to_string())?;
        if ins.op.operand() != Operand::None {
            write!(w, " {:5}", ins.arg)?;
        }
        describe(proto, &ins, w)?;
        writeln!(w)?;
    }

    for constant in &proto.constants {
        if let Constant::Code(inner) = constant {
            writeln!(w)?;
            disassemble_to(inner, w)?;
        }
    }
    Ok(())
}

/// 피연산자의 의미를 괄호 안에 덧붙입니다.
fn describe(proto: &FunctionProto, ins: &Instruction, w: &mut impl Write) -> fmt::Result {
    if let Some(target) = ins.jump_target() {
        return write!(w, " (to {})", target);
    }
    match ins.op {
        OpCode::Constant => match proto.constants.get(ins.arg) {
            Some(c) => write!(w, " ({})", constant_repr(c)),
            None => write!(w, " (?)"),
        },
        OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::DelGlobal
        | OpCode::GetAttr
        | OpCode::SetAttr
        | OpCode::DelAttr
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method
        | OpCode::ImportName
        | OpCode::ImportFrom => match proto.constants.get(ins.arg) {
            Some(Constant::Str(s)) => write!(w, " ({})", s),
            _ => write!(w, " (?)"),
        },
        OpCode::GetLocal | OpCode::SetLocal | OpCode::ListAppend | OpCode::DictSet => {
            match proto.local_names.iter().find(|l| l.slot as usize == ins.arg) {
                Some(local) => write!(w, " ({})", local.name),
                None => Ok(()),
            }
        }
        OpCode::MakeClosure => {
            if let Some(Constant::Code(inner)) = proto.constants.get(ins.arg) {
                write!(w, " (<{}>)", inner.name)?;
            }
            for (is_local, index) in &ins.upvalues {
                write!(w, " {} {}", if *is_local { "local" } else { "upvalue" }, index)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn constant_repr(constant: &Constant) -> String {
    match constant {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(i) => i.to_string(),
        Constant::Float(f) => format!("{:?}", f),
        Constant::Str(s) => format!("{:?}", s),
        Constant::Bytes(b) => format!("b{:?}", String::from_utf8_lossy(b)),
        Constant::Code(inner) => format!("<code {}>", inner.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_fold_extended_arg_and_closure_descriptors() {
        let mut inner = FunctionProto::new("inner", "<test>");
        inner.upvalue_count = 1;
        let mut proto = FunctionProto::new("outer", "<test>");
        for i in 0..300 {
            proto.add_constant(Constant::Int(i));
        }
        proto.write_arg(OpCode::Constant, 299, 1);
        let code = proto.add_constant(Constant::Code(Box::new(inner)));
        proto.write_arg(OpCode::MakeClosure, code, 2);
        proto.write_byte(1, 2);
        proto.write_byte(0, 2);
        proto.write_byte(3, 2);
        proto.write_op(OpCode::Return, 2);

        let decoded = instructions(&proto);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].op, OpCode::Constant);
        assert_eq!(decoded[0].arg, 299);
        assert_eq!(decoded[1].op, OpCode::MakeClosure);
        assert_eq!(decoded[1].upvalues, vec![(true, 3)]);
        assert_eq!(decoded[2].op, OpCode::Return);
    }

    #[test]
    fn test_jump_targets() {
        let mut proto = FunctionProto::new("f", "<test>");
        let jump = proto.write_jump(OpCode::PopJumpIfFalse, 1);
        proto.write_op(OpCode::None, 1);
        proto.patch_jump(jump);
        proto.write_loop(0, 2);

        let decoded = instructions(&proto);
        assert_eq!(decoded[0].jump_target(), Some(4));
        assert_eq!(decoded[2].jump_target(), Some(0));
    }

    #[test]
    fn test_disassemble_lists_nested_code() {
        let mut inner = FunctionProto::new("helper", "<test>");
        inner.write_op(OpCode::None, 3);
        inner.write_op(OpCode::Return, 3);
        let mut proto = FunctionProto::new("<module>", "<test>");
        let name = proto.add_constant(Constant::Str("x".into()));
        proto.write_arg(OpCode::GetGlobal, name, 1);
        let code = proto.add_constant(Constant::Code(Box::new(inner)));
        proto.write_arg(OpCode::MakeClosure, code, 2);
        proto.write_op(OpCode::Return, 2);

        let text = disassemble(&proto);
        assert!(text.contains("GET_GLOBAL"));
        assert!(text.contains("(x)"));
        assert!(text.contains("(<helper>)"));
        assert!(text.contains("<helper> from <test>"));
    }
}
