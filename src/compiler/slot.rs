use bitflags::bitflags;

use crate::value::{Array, Value};

bitflags! {
    /// Properties of a [`Slot`] that travel with it through compilation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SlotFlags: u8 {
        const NAMED = 1;
        const MUTABLE = 1 << 1;
        /// The slot is known to hold a function.
        const FUNCTION = 1 << 2;
        /// The value has already been returned from the current function.
        const RETURNED = 1 << 3;
    }
}

/// Where a value lives at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotKind {
    /// Embedded in the instruction stream or the constant table.
    Constant(Value),
    /// The one-element cell backing a global `var`.
    Reference(Array),
    /// A register of the current function's frame.
    Register(u32),
    /// A register of an enclosing function's frame, reached through the closure's environments.
    Upvalue { env: u32, index: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub kind: SlotKind,
    pub flags: SlotFlags,
}

impl Slot {
    pub fn constant(value: Value) -> Self {
        Self {
            kind: SlotKind::Constant(value),
            flags: SlotFlags::empty(),
        }
    }

    pub fn nil() -> Self {
        Self::constant(Value::Nil)
    }

    pub fn register(index: u32) -> Self {
        Self {
            kind: SlotKind::Register(index),
            flags: SlotFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: SlotFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, SlotKind::Constant(_))
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            SlotKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// The register index if this slot is a local register addressable by an 8-bit operand.
    pub fn near_register(&self) -> Option<u32> {
        match self.kind {
            SlotKind::Register(index) if index <= 0xFF => Some(index),
            _ => None,
        }
    }

    pub fn is_nil_constant(&self) -> bool {
        matches!(self.kind, SlotKind::Constant(Value::Nil))
    }
}

#[cfg(test)]
mod tests {
    use super::{Slot, SlotFlags, SlotKind};
    use crate::value::Value;
    use assert2::check;

    #[test]
    fn flags_compose() {
        let mut flags = SlotFlags::NAMED | SlotFlags::MUTABLE;
        check!(flags.contains(SlotFlags::NAMED));
        check!(!flags.contains(SlotFlags::NAMED | SlotFlags::RETURNED));
        check!(flags.intersects(SlotFlags::NAMED | SlotFlags::RETURNED));
        flags.remove(SlotFlags::NAMED);
        check!(flags == SlotFlags::MUTABLE);
        check!(format!("{flags:?}") == "SlotFlags(MUTABLE)");
    }

    #[test]
    fn near_registers() {
        check!(Slot::register(3).near_register() == Some(3));
        check!(Slot::register(0x100).near_register() == None);
        check!(Slot::constant(Value::Number(3.0)).near_register() == None);
        check!(
            Slot {
                kind: SlotKind::Upvalue { env: 0, index: 1 },
                flags: SlotFlags::NAMED
            }
            .near_register()
                == None
        );
    }
}
