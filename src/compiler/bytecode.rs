//! Instruction encoding.
//!
//! Every instruction is one `u32`. The low byte is the [`Opcode`]; the
//! operands take the upper three bytes in one of the layouts of [`Layout`].
//! Register operands are written `$n` in disassembly.
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    ReturnNil,
    Return,
    Jump,
    JumpIf,
    JumpIfNot,
    LoadNil,
    LoadTrue,
    LoadFalse,
    LoadInteger,
    LoadConstant,
    LoadUpvalue,
    SetUpvalue,
    LoadSelf,
    MoveNear,
    MoveFar,
    Closure,
    Push,
    Push2,
    Push3,
    Call,
    TailCall,
    Get,
    Put,
    GetIndex,
    PutIndex,
    MakeArray,
    MakeTuple,
    MakeStruct,
    MakeTable,
}

/// How the operand bytes of an instruction are split up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// No operands.
    Zero,
    /// One register in the upper 24 bits.
    S,
    /// A signed 24-bit jump offset.
    L,
    /// An 8-bit register and a signed 16-bit immediate.
    SI,
    /// An 8-bit register and an unsigned 16-bit immediate.
    SU,
    /// An 8-bit register and a 16-bit register.
    SS,
    /// Three 8-bit registers.
    SSS,
    /// Two 8-bit registers and an unsigned 8-bit immediate.
    SSU,
    /// An 8-bit register, an environment index and a register in that environment.
    Upvalue,
}

impl Opcode {
    const ALL: [Opcode; 29] = [
        Opcode::ReturnNil,
        Opcode::Return,
        Opcode::Jump,
        Opcode::JumpIf,
        Opcode::JumpIfNot,
        Opcode::LoadNil,
        Opcode::LoadTrue,
        Opcode::LoadFalse,
        Opcode::LoadInteger,
        Opcode::LoadConstant,
        Opcode::LoadUpvalue,
        Opcode::SetUpvalue,
        Opcode::LoadSelf,
        Opcode::MoveNear,
        Opcode::MoveFar,
        Opcode::Closure,
        Opcode::Push,
        Opcode::Push2,
        Opcode::Push3,
        Opcode::Call,
        Opcode::TailCall,
        Opcode::Get,
        Opcode::Put,
        Opcode::GetIndex,
        Opcode::PutIndex,
        Opcode::MakeArray,
        Opcode::MakeTuple,
        Opcode::MakeStruct,
        Opcode::MakeTable,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(usize::from(byte)).copied()
    }

    /// The instruction with every operand zeroed.
    pub const fn encode(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::ReturnNil => "return-nil",
            Opcode::Return => "return",
            Opcode::Jump => "jump",
            Opcode::JumpIf => "jump-if",
            Opcode::JumpIfNot => "jump-if-not",
            Opcode::LoadNil => "load-nil",
            Opcode::LoadTrue => "load-true",
            Opcode::LoadFalse => "load-false",
            Opcode::LoadInteger => "load-integer",
            Opcode::LoadConstant => "load-constant",
            Opcode::LoadUpvalue => "load-upvalue",
            Opcode::SetUpvalue => "set-upvalue",
            Opcode::LoadSelf => "load-self",
            Opcode::MoveNear => "move-near",
            Opcode::MoveFar => "move-far",
            Opcode::Closure => "closure",
            Opcode::Push => "push",
            Opcode::Push2 => "push-2",
            Opcode::Push3 => "push-3",
            Opcode::Call => "call",
            Opcode::TailCall => "tail-call",
            Opcode::Get => "get",
            Opcode::Put => "put",
            Opcode::GetIndex => "get-index",
            Opcode::PutIndex => "put-index",
            Opcode::MakeArray => "make-array",
            Opcode::MakeTuple => "make-tuple",
            Opcode::MakeStruct => "make-struct",
            Opcode::MakeTable => "make-table",
        }
    }

    pub fn layout(self) -> Layout {
        match self {
            Opcode::ReturnNil => Layout::Zero,
            Opcode::Return
            | Opcode::LoadNil
            | Opcode::LoadTrue
            | Opcode::LoadFalse
            | Opcode::LoadSelf
            | Opcode::Push
            | Opcode::TailCall
            | Opcode::MakeArray
            | Opcode::MakeTuple
            | Opcode::MakeStruct
            | Opcode::MakeTable => Layout::S,
            Opcode::Jump => Layout::L,
            Opcode::JumpIf | Opcode::JumpIfNot | Opcode::LoadInteger => Layout::SI,
            Opcode::LoadConstant | Opcode::Closure => Layout::SU,
            Opcode::MoveNear | Opcode::MoveFar | Opcode::Push2 | Opcode::Call => Layout::SS,
            Opcode::Push3 | Opcode::Get | Opcode::Put => Layout::SSS,
            Opcode::GetIndex | Opcode::PutIndex => Layout::SSU,
            Opcode::LoadUpvalue | Opcode::SetUpvalue => Layout::Upvalue,
        }
    }
}

/// A decoded view of one instruction word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_byte(self.0 as u8)
    }

    pub fn a(self) -> usize {
        ((self.0 >> 8) & 0xFF) as usize
    }

    pub fn a24(self) -> usize {
        (self.0 >> 8) as usize
    }

    pub fn b(self) -> usize {
        ((self.0 >> 16) & 0xFF) as usize
    }

    pub fn b16(self) -> usize {
        (self.0 >> 16) as usize
    }

    pub fn c(self) -> usize {
        (self.0 >> 24) as usize
    }

    pub fn immediate(self) -> i16 {
        (self.0 >> 16) as u16 as i16
    }

    /// Offset of a `jump`, relative to the jump itself.
    pub fn jump_offset(self) -> i32 {
        (self.0 as i32) >> 8
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self} ({:#010x})", self.0)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<unknown {:#04x}>", self.0 as u8);
        };
        let name = op.name();
        match op.layout() {
            Layout::Zero => f.write_str(name),
            Layout::S => write!(f, "{name:<14} ${}", self.a24()),
            Layout::L => write!(f, "{name:<14} {:+}", self.jump_offset()),
            Layout::SI if op == Opcode::LoadInteger => {
                write!(f, "{name:<14} ${} {}", self.a(), self.immediate())
            }
            Layout::SI => write!(f, "{name:<14} ${} {:+}", self.a(), self.immediate()),
            Layout::SU => write!(f, "{name:<14} ${} {}", self.a(), self.b16()),
            Layout::SS => write!(f, "{name:<14} ${} ${}", self.a(), self.b16()),
            Layout::SSS => write!(f, "{name:<14} ${} ${} ${}", self.a(), self.b(), self.c()),
            Layout::SSU => write!(f, "{name:<14} ${} ${} {}", self.a(), self.b(), self.c()),
            Layout::Upvalue => {
                write!(f, "{name:<14} ${} env {} ${}", self.a(), self.b(), self.c())
            }
        }
    }
}

/// `op $a`, with a 24-bit register.
pub fn encode_s(op: Opcode, a: u32) -> u32 {
    op.encode() | a << 8
}

/// `op $a $b`, or `op $a imm` for 16-bit immediates.
pub fn encode_ss(op: Opcode, a: u32, b: u32) -> u32 {
    op.encode() | a << 8 | b << 16
}

pub fn encode_sss(op: Opcode, a: u32, b: u32, c: u32) -> u32 {
    op.encode() | a << 8 | b << 16 | c << 24
}

#[cfg(test)]
mod tests {
    use super::{encode_ss, encode_sss, Instruction, Opcode};
    use assert2::check;

    #[test]
    fn opcodes_roundtrip_through_bytes() {
        for op in Opcode::ALL {
            check!(Opcode::from_byte(op as u8) == Some(op));
        }
        check!(Opcode::from_byte(Opcode::ALL.len() as u8) == None);
    }

    #[test]
    fn operand_fields() {
        let instr = Instruction(encode_sss(Opcode::Get, 1, 2, 3));
        check!(instr.opcode() == Some(Opcode::Get));
        check!((instr.a(), instr.b(), instr.c()) == (1, 2, 3));

        let instr = Instruction(encode_ss(Opcode::LoadInteger, 4, (-7i16) as u16 as u32));
        check!(instr.immediate() == -7);

        let instr = Instruction(Opcode::Jump.encode() | (((-3i32) as u32) & 0xFF_FFFF) << 8);
        check!(instr.jump_offset() == -3);
    }

    #[test]
    fn disassembly() {
        check!(Instruction(Opcode::ReturnNil.encode()).to_string() == "return-nil");
        check!(
            Instruction(encode_ss(Opcode::Call, 2, 0x120)).to_string()
                == "call           $2 $288"
        );
        check!(
            Instruction(encode_sss(Opcode::LoadUpvalue, 0, 1, 5)).to_string()
                == "load-upvalue   $0 env 1 $5"
        );
        check!(Instruction(0xFF).to_string() == "<unknown 0xff>");
    }
}
