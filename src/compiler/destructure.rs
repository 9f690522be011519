//! Binding patterns for `def`, `var` and function parameters.
use super::{
    bytecode::Opcode, CompileErrorKind, CompileResult, Compiler, Options, Slot,
};
use crate::value::{Symbol, Table, Value};

/// Binds one symbol of a pattern to the slot holding its value. Returns
/// whether the caller may free that slot.
pub(crate) type Leaf = fn(&mut Compiler<'_>, Symbol, Slot, &Table) -> CompileResult<bool>;

impl Compiler<'_> {
    /// Walks `pattern` against the value in `right`, calling `leaf` for every
    /// symbol in it. Returns whether `right` may be freed afterwards.
    pub(crate) fn destructure(
        &mut self,
        pattern: &Value,
        right: Slot,
        leaf: Leaf,
        attributes: &Table,
    ) -> CompileResult<bool> {
        if let Value::Symbol(symbol) = pattern {
            return leaf(self, *symbol, right, attributes);
        }
        if let Some(items) = pattern.indexed_items() {
            for (index, sub) in items.iter().enumerate() {
                let next = self.far_slot()?;
                match u8::try_from(index) {
                    Ok(index) => self.emit_ssu(Opcode::GetIndex, &next, &right, index, true)?,
                    Err(_) => {
                        let key = Slot::constant(Value::Number(index as f64));
                        self.emit_sss(Opcode::Get, &next, &right, &key, true)?
                    }
                };
                if self.destructure(sub, next.clone(), leaf, attributes)? {
                    self.free_slot(&next);
                }
            }
            return Ok(true);
        }
        if let Some(entries) = pattern.dictionary_entries() {
            for (key, sub) in entries.iter().filter(|(key, _)| !key.is_nil()) {
                let next = self.far_slot()?;
                let key = self.compile_value(Options::default(), key)?;
                self.emit_sss(Opcode::Get, &next, &right, &key, true)?;
                self.free_slot(&key);
                if self.destructure(sub, next.clone(), leaf, attributes)? {
                    self.free_slot(&next);
                }
            }
            return Ok(true);
        }
        Err(self.error(CompileErrorKind::InvalidPattern))
    }
}
