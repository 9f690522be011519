use std::rc::Rc;

use bitflags::bitflags;

use super::{
    funcdef::{Capture, FuncDef},
    regalloc::RegisterAllocator,
    slot::Slot,
};
use crate::value::{Symbol, Value};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScopeFlags: u8 {
        /// The outermost scope of a compilation unit. Bindings made here are global.
        const TOP = 1;
        /// Boundary of a function body.
        const FUNCTION = 1 << 1;
        /// A closure was created somewhere inside this scope.
        const CLOSURE = 1 << 2;
        /// Code compiled here is thrown away.
        const UNUSED = 1 << 3;
        /// Some local of this function is captured by an inner function.
        const ENV = 1 << 4;
    }
}

/// A local name and the slot it refers to.
///
/// Pairs without a symbol are anonymous holds on registers captured by closures
/// in an inner scope, so the registers are not reused after that scope ends.
#[derive(Debug, Clone)]
pub struct SymbolPair {
    pub symbol: Option<Symbol>,
    pub slot: Slot,
    pub keep: bool,
}

#[derive(Debug, Default)]
pub struct Scope {
    pub name: &'static str,
    pub flags: ScopeFlags,
    pub symbols: Vec<SymbolPair>,
    /// Constant table. Only used by function scopes.
    pub consts: Vec<Value>,
    /// Environments captured by a function scope.
    pub envs: Vec<Capture>,
    /// Nested function definitions. Only used by function scopes.
    pub defs: Vec<Rc<FuncDef>>,
    pub registers: RegisterAllocator,
    pub bytecode_start: usize,
}

impl Scope {
    pub fn new(
        name: &'static str,
        flags: ScopeFlags,
        registers: RegisterAllocator,
        bytecode_start: usize,
    ) -> Self {
        Self {
            name,
            flags,
            registers,
            bytecode_start,
            ..Default::default()
        }
    }

    /// Index of the most recent pair binding `symbol`.
    pub fn lookup(&self, symbol: Symbol) -> Option<usize> {
        self.symbols
            .iter()
            .rposition(|pair| pair.symbol == Some(symbol))
    }

    /// Index of `capture` in this scope's environments, adding it if missing.
    pub fn capture_index(&mut self, capture: Capture) -> u32 {
        let index = match self.envs.iter().position(|env| *env == capture) {
            Some(index) => index,
            None => {
                self.envs.push(capture);
                self.envs.len() - 1
            }
        };
        index as u32
    }
}
