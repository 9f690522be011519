//! Instruction emission.
//!
//! Operands of an instruction must be registers, and most operand fields only
//! hold 8 bits. The `emit_*` helpers move slots that are not near registers
//! into tagged temporaries before the instruction and, when asked to write
//! back, move the result out again afterwards.
use super::{
    bytecode::{encode_s, encode_ss, encode_sss, Opcode},
    regalloc::RegisterTemp,
    CompileErrorKind, CompileResult, Compiler, Slot, SlotKind,
};
use crate::value::Value;

impl Compiler<'_> {
    /// Appends `instruction`, returning its label.
    pub(crate) fn emit(&mut self, instruction: u32) -> usize {
        self.buffer.push(instruction);
        self.source_map.push(self.current_span.clone());
        self.buffer.len() - 1
    }

    /// The label the next instruction will get.
    pub(crate) fn label(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn truncate(&mut self, label: usize) {
        self.buffer.truncate(label);
        self.source_map.truncate(label);
    }

    fn add_constant(&mut self, value: &Value) -> CompileResult<u32> {
        let scope = self.function_scope_mut();
        if let Some(index) = scope.consts.iter().position(|c| c == value) {
            return Ok(index as u32);
        }
        let index = scope.consts.len();
        if index < 0xFFFF {
            scope.consts.push(value.clone());
            return Ok(index as u32);
        }
        Err(self.error(CompileErrorKind::TooManyConstants))
    }

    fn load_constant(&mut self, value: &Value, reg: u32) -> CompileResult<()> {
        match value {
            Value::Nil => {
                self.emit(encode_s(Opcode::LoadNil, reg));
            }
            Value::Boolean(true) => {
                self.emit(encode_s(Opcode::LoadTrue, reg));
            }
            Value::Boolean(false) => {
                self.emit(encode_s(Opcode::LoadFalse, reg));
            }
            Value::Number(n)
                if n.fract() == 0.0 && (f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(n) =>
            {
                let immediate = u32::from(*n as i16 as u16);
                self.emit(encode_ss(Opcode::LoadInteger, reg, immediate));
            }
            _ => {
                let index = self.add_constant(value)?;
                self.emit(encode_ss(Opcode::LoadConstant, reg, index));
            }
        }
        Ok(())
    }

    fn check_upvalue(&self, env: u32, index: u32) -> CompileResult<()> {
        if env > 0xFF || index > 0xFF {
            return Err(self.error(CompileErrorKind::UpvalueOutOfRange));
        }
        Ok(())
    }

    /// Loads `src` into the near register `dest`.
    fn move_near(&mut self, dest: u32, src: &Slot) -> CompileResult<()> {
        match &src.kind {
            SlotKind::Constant(value) => self.load_constant(value, dest)?,
            SlotKind::Reference(cell) => {
                self.load_constant(&Value::Array(cell.clone()), dest)?;
                self.emit(encode_sss(Opcode::GetIndex, dest, dest, 0));
            }
            SlotKind::Upvalue { env, index } => {
                self.check_upvalue(*env, *index)?;
                self.emit(encode_sss(Opcode::LoadUpvalue, dest, *env, *index));
            }
            SlotKind::Register(index) => {
                if *index != dest {
                    self.emit(encode_ss(Opcode::MoveNear, dest, *index));
                }
            }
        }
        Ok(())
    }

    /// Stores the near register `src` into `dest`.
    fn move_back(&mut self, dest: &Slot, src: u32) -> CompileResult<()> {
        match &dest.kind {
            SlotKind::Constant(_) => return Err(self.error(CompileErrorKind::CannotWriteConstant)),
            SlotKind::Reference(cell) => {
                let refreg = self.scope.registers.allocate_temp(RegisterTemp::T5);
                self.load_constant(&Value::Array(cell.clone()), refreg)?;
                self.emit(encode_sss(Opcode::PutIndex, refreg, src, 0));
                self.scope.registers.free_temp(refreg, RegisterTemp::T5);
            }
            SlotKind::Upvalue { env, index } => {
                self.check_upvalue(*env, *index)?;
                self.emit(encode_sss(Opcode::SetUpvalue, src, *env, *index));
            }
            SlotKind::Register(index) => {
                if *index != src {
                    self.emit(encode_ss(Opcode::MoveFar, src, *index));
                }
            }
        }
        Ok(())
    }

    /// A register below 256 holding the value of `slot`.
    fn register_near(&mut self, slot: &Slot, tag: RegisterTemp) -> CompileResult<u32> {
        if let Some(reg) = slot.near_register() {
            return Ok(reg);
        }
        let reg = self.scope.registers.allocate_temp(tag);
        self.move_near(reg, slot)?;
        Ok(reg)
    }

    /// A register of any index holding the value of `slot`.
    fn register_far(&mut self, slot: &Slot, tag: RegisterTemp) -> CompileResult<u32> {
        match slot.kind {
            SlotKind::Register(reg) => Ok(reg),
            _ => self.register_near(slot, tag),
        }
    }

    fn free_register(&mut self, slot: &Slot, reg: u32, tag: RegisterTemp) {
        if slot.kind != SlotKind::Register(reg) {
            self.scope.registers.free_temp(reg, tag);
        }
    }

    /// Emits `op` with a register operand of up to 24 bits.
    pub(crate) fn emit_s(&mut self, op: Opcode, slot: &Slot, write_back: bool) -> CompileResult<usize> {
        let reg = self.register_far(slot, RegisterTemp::T0)?;
        let label = self.emit(encode_s(op, reg));
        if write_back {
            self.move_back(slot, reg)?;
        }
        self.free_register(slot, reg, RegisterTemp::T0);
        Ok(label)
    }

    fn emit_one(&mut self, op: Opcode, slot: &Slot, rest: u32, write_back: bool) -> CompileResult<usize> {
        let reg = self.register_near(slot, RegisterTemp::T0)?;
        let label = self.emit(encode_ss(op, reg, rest));
        if write_back {
            self.move_back(slot, reg)?;
        }
        self.free_register(slot, reg, RegisterTemp::T0);
        Ok(label)
    }

    pub(crate) fn emit_si(&mut self, op: Opcode, slot: &Slot, immediate: i16, write_back: bool) -> CompileResult<usize> {
        self.emit_one(op, slot, u32::from(immediate as u16), write_back)
    }

    pub(crate) fn emit_su(&mut self, op: Opcode, slot: &Slot, immediate: u16, write_back: bool) -> CompileResult<usize> {
        self.emit_one(op, slot, u32::from(immediate), write_back)
    }

    /// Emits `op` with a near register and a far register.
    pub(crate) fn emit_ss(&mut self, op: Opcode, s1: &Slot, s2: &Slot, write_back: bool) -> CompileResult<usize> {
        let reg1 = self.register_near(s1, RegisterTemp::T0)?;
        let reg2 = self.register_far(s2, RegisterTemp::T1)?;
        let label = self.emit(encode_ss(op, reg1, reg2));
        self.free_register(s2, reg2, RegisterTemp::T1);
        if write_back {
            self.move_back(s1, reg1)?;
        }
        self.free_register(s1, reg1, RegisterTemp::T0);
        Ok(label)
    }

    pub(crate) fn emit_ssu(
        &mut self,
        op: Opcode,
        s1: &Slot,
        s2: &Slot,
        immediate: u8,
        write_back: bool,
    ) -> CompileResult<usize> {
        let reg1 = self.register_near(s1, RegisterTemp::T0)?;
        let reg2 = self.register_near(s2, RegisterTemp::T1)?;
        let label = self.emit(encode_sss(op, reg1, reg2, u32::from(immediate)));
        self.free_register(s2, reg2, RegisterTemp::T1);
        if write_back {
            self.move_back(s1, reg1)?;
        }
        self.free_register(s1, reg1, RegisterTemp::T0);
        Ok(label)
    }

    pub(crate) fn emit_sss(
        &mut self,
        op: Opcode,
        s1: &Slot,
        s2: &Slot,
        s3: &Slot,
        write_back: bool,
    ) -> CompileResult<usize> {
        let reg1 = self.register_near(s1, RegisterTemp::T0)?;
        let reg2 = self.register_near(s2, RegisterTemp::T1)?;
        let reg3 = self.register_near(s3, RegisterTemp::T2)?;
        let label = self.emit(encode_sss(op, reg1, reg2, reg3));
        self.free_register(s2, reg2, RegisterTemp::T1);
        self.free_register(s3, reg3, RegisterTemp::T2);
        if write_back {
            self.move_back(s1, reg1)?;
        }
        self.free_register(s1, reg1, RegisterTemp::T0);
        Ok(label)
    }

    /// Copies the value of `src` into `dest`.
    pub(crate) fn copy(&mut self, dest: &Slot, src: &Slot) -> CompileResult<()> {
        if dest.is_constant() {
            return Err(self.error(CompileErrorKind::CannotWriteConstant));
        }
        if dest.kind == src.kind {
            return Ok(());
        }
        if let Some(reg) = dest.near_register() {
            return self.move_near(reg, src);
        }
        if let Some(reg) = src.near_register() {
            return self.move_back(dest, reg);
        }
        let near = self.scope.registers.allocate_temp(RegisterTemp::T3);
        self.move_near(near, src)?;
        self.move_back(dest, near)?;
        self.scope.registers.free_temp(near, RegisterTemp::T3);
        Ok(())
    }

    /// Points the conditional jump at `at` to `target`.
    pub(crate) fn patch_conditional_jump(&mut self, at: usize, target: usize) -> CompileResult<()> {
        let offset = target as i64 - at as i64;
        let Ok(offset16) = i16::try_from(offset) else {
            return Err(self.error(CompileErrorKind::JumpOutOfRange(offset)));
        };
        self.buffer[at] |= u32::from(offset16 as u16) << 16;
        Ok(())
    }

    /// Points the unconditional jump at `at` to `target`.
    pub(crate) fn patch_jump(&mut self, at: usize, target: usize) -> CompileResult<()> {
        let offset = target as i64 - at as i64;
        if !(-(1 << 23)..(1 << 23)).contains(&offset) {
            return Err(self.error(CompileErrorKind::JumpOutOfRange(offset)));
        }
        self.buffer[at] |= (offset as u32 & 0xFF_FFFF) << 8;
        Ok(())
    }
}
