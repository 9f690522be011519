use core::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use super::bytecode::{Instruction, Opcode};
use crate::{lexer::Span, value::Value};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FuncDefFlags: u8 {
        /// Extra arguments are collected into a tuple in the register after the fixed ones.
        const VARARG = 1;
        /// Calls must pass exactly `arity` arguments.
        const FIXARITY = 1 << 1;
        /// Closures of this definition keep their frame alive for inner closures.
        const NEEDSENV = 1 << 2;
    }
}

/// Where a closure finds one of its captured environments when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// The register frame of the function creating the closure.
    Frame,
    /// One of the creating closure's own environments.
    Env(u32),
}

/// A finished, immutable function definition.
#[derive(Debug, Clone, Default)]
pub struct FuncDef {
    pub name: Option<Box<str>>,
    pub arity: u32,
    pub flags: FuncDefFlags,
    pub slot_count: u32,
    pub bytecode: Vec<u32>,
    /// Source span for each instruction, parallel to `bytecode`.
    pub source_map: Vec<Option<Span>>,
    pub constants: Vec<Value>,
    pub environments: Vec<Capture>,
    pub defs: Vec<Rc<FuncDef>>,
}

impl FuncDef {
    pub fn instructions(&self) -> impl Iterator<Item = Instruction> + '_ {
        self.bytecode.iter().copied().map(Instruction)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    fn write_disassembly(&self, f: &mut fmt::Formatter<'_>, path: &str) -> fmt::Result {
        write!(
            f,
            "== {path}: arity {}, slots {}",
            self.arity, self.slot_count
        )?;
        if !self.flags.is_empty() {
            f.write_str(", ")?;
            bitflags::parser::to_writer(&self.flags, &mut *f)?;
        }
        writeln!(f, " ==")?;
        if !self.environments.is_empty() {
            writeln!(f, "environments: {:?}", self.environments)?;
        }
        for (idx, constant) in self.constants.iter().enumerate() {
            writeln!(f, "  const {idx}: {constant}")?;
        }
        for (pc, instr) in self.instructions().enumerate() {
            write!(f, "  {pc:04}  {instr}")?;
            match instr.opcode() {
                Some(Opcode::LoadConstant) => {
                    if let Some(constant) = self.constants.get(instr.b16()) {
                        write!(f, "  ; {constant}")?;
                    }
                }
                Some(Opcode::Jump) => {
                    write!(f, "  ; to {}", pc as i64 + i64::from(instr.jump_offset()))?
                }
                Some(Opcode::JumpIf | Opcode::JumpIfNot) => {
                    write!(f, "  ; to {}", pc as i64 + i64::from(instr.immediate()))?
                }
                Some(Opcode::Closure) => {
                    if let Some(def) = self.defs.get(instr.b16()) {
                        write!(f, "  ; {}", def.display_name())?;
                    }
                }
                _ => {}
            }
            writeln!(f)?;
        }
        for (idx, def) in self.defs.iter().enumerate() {
            let path = format!("{path}/{idx} {}", def.display_name());
            def.write_disassembly(f, &path)?;
        }
        Ok(())
    }
}

impl fmt::Display for FuncDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_disassembly(f, self.display_name())
    }
}
