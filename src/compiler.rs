//! Compile forms into register bytecode
//! to execute!
//!
//! For example:
//!
//! (def add (fn add [x] (fn [y] (+ x y))))
//!
//! compiles to
//!
//! == _thunk: arity 0, slots 1 ==
//!   const 0: <function add>
//!   ...
//! == _thunk/0 add: arity 1, slots 3, FIXARITY | NEEDSENV ==
//!   0000  load-self      $1
//!   0001  closure        $2 0  ; <anonymous>
//!   0002  return         $2
//! == _thunk/0 add/0 <anonymous>: arity 1, slots 3, FIXARITY ==
//! environments: [Frame]
//!   0000  load-upvalue   $1 env 0 $0
//!   ...
//!
//! Every value lives in a [`Slot`]: a register, a constant, the cell of a
//! global `var` or a register captured from an enclosing function. Special
//! forms (see [`specials`]) decide where their results go through the
//! [`Options`] they are given, so most forms compile straight into the
//! register their consumer wants.
use core::mem;
use std::rc::Rc;

use crate::{
    lexer::Span,
    value::{Symbol, Tuple, TupleKind, Value},
};

pub mod bytecode;
mod destructure;
mod emit;
pub mod environment;
mod error;
pub mod funcdef;
pub mod regalloc;
pub mod scope;
pub mod slot;
pub mod specials;

pub use bytecode::{Instruction, Opcode};
pub use environment::{Binding, Environment};
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use funcdef::{Capture, FuncDef, FuncDefFlags};
pub use slot::{Slot, SlotFlags, SlotKind};

use regalloc::RegisterAllocator;
use scope::{Scope, ScopeFlags, SymbolPair};
use specials::SpecialForm;

/// How deeply forms may nest before compilation gives up.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Directives from a form to the sub-form it compiles.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// The value is returned from the current function.
    pub tail: bool,
    /// The value is never used.
    pub drop: bool,
    /// Preferred destination for the value.
    pub hint: Option<Slot>,
}

impl Options {
    pub fn tail() -> Self {
        Self {
            tail: true,
            ..Self::default()
        }
    }

    pub fn drop() -> Self {
        Self {
            drop: true,
            ..Self::default()
        }
    }

    pub fn hinted(slot: Slot) -> Self {
        Self {
            hint: Some(slot),
            ..Self::default()
        }
    }
}

pub struct Compiler<'env> {
    env: &'env mut Environment,
    /// The innermost scope.
    scope: Scope,
    /// Enclosing scopes, outermost first.
    parents: Vec<Scope>,
    buffer: Vec<u32>,
    source_map: Vec<Option<Span>>,
    current_span: Option<Span>,
    depth: usize,
    max_depth: usize,
}

/// Compiles a single top-level form into a function of no arguments.
pub fn compile(env: &mut Environment, form: &Value) -> CompileResult<FuncDef> {
    Compiler::new(env).compile(form)
}

impl<'env> Compiler<'env> {
    pub fn new(env: &'env mut Environment) -> Self {
        Self {
            env,
            scope: Scope::new(
                "root",
                ScopeFlags::FUNCTION | ScopeFlags::TOP,
                RegisterAllocator::new(),
                0,
            ),
            parents: vec![],
            buffer: vec![],
            source_map: vec![],
            current_span: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn compile(mut self, form: &Value) -> CompileResult<FuncDef> {
        self.compile_value(Options::tail(), form)?;
        let mut def = self.pop_funcdef();
        def.name = Some("_thunk".into());
        log::debug!(
            "compiled top-level form into {} instructions",
            def.bytecode.len()
        );
        Ok(def)
    }

    pub(crate) fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            kind,
            span: self.current_span.clone(),
        }
    }

    pub fn compile_value(&mut self, opts: Options, form: &Value) -> CompileResult<Slot> {
        if self.depth >= self.max_depth {
            return Err(self.error(CompileErrorKind::RecursionLimit));
        }
        self.depth += 1;
        let last_span = self.current_span.clone();
        let result = self.compile_form(&opts, form);
        self.current_span = last_span;
        self.depth -= 1;
        let mut ret = result?;

        if opts.tail {
            ret = self.emit_return(ret)?;
        }
        if let Some(hint) = opts.hint {
            self.copy(&hint, &ret)?;
            ret = hint;
        }
        Ok(ret)
    }

    fn compile_form(&mut self, opts: &Options, form: &Value) -> CompileResult<Slot> {
        match form {
            Value::Tuple(tuple) if !tuple.is_empty() => {
                if let Some(span) = tuple.span() {
                    self.current_span = Some(span);
                }
                self.compile_tuple(opts, tuple)
            }
            Value::Symbol(symbol) if !symbol.is_keyword() => self.resolve(*symbol),
            Value::Array(array) => self.compile_maker(opts, &array.to_vec(), Opcode::MakeArray),
            Value::Struct(st) => {
                self.compile_maker(opts, &flatten(st.entries()), Opcode::MakeStruct)
            }
            Value::Table(table) => {
                self.compile_maker(opts, &flatten(&table.entries()), Opcode::MakeTable)
            }
            _ => Ok(Slot::constant(form.clone())),
        }
    }

    fn compile_tuple(&mut self, opts: &Options, tuple: &Tuple) -> CompileResult<Slot> {
        let items = tuple.items();
        if tuple.kind() == TupleKind::Brackets {
            return self.compile_maker(opts, items, Opcode::MakeTuple);
        }
        let (head, args) = (&items[0], &items[1..]);
        if let Some(special) = head.as_symbol().and_then(SpecialForm::lookup) {
            log::trace!("compiling special form `{}`", special.name());
            return special.compile(self, opts.clone(), args);
        }
        self.compile_call(opts, head, args)
    }

    /// Compiles each form into its own slot, in order.
    fn compile_slots(&mut self, forms: &[Value]) -> CompileResult<Vec<Slot>> {
        forms
            .iter()
            .map(|form| self.compile_value(Options::default(), form))
            .collect()
    }

    fn free_slots(&mut self, slots: &[Slot]) {
        for slot in slots {
            self.free_slot(slot);
        }
    }

    /// Pushes `slots` onto the pending argument list, three at a time.
    fn push_slots(&mut self, slots: &[Slot]) -> CompileResult<()> {
        let mut chunks = slots.chunks_exact(3);
        for chunk in &mut chunks {
            self.emit_sss(Opcode::Push3, &chunk[0], &chunk[1], &chunk[2], false)?;
        }
        match chunks.remainder() {
            [one] => {
                self.emit_s(Opcode::Push, one, false)?;
            }
            [one, two] => {
                self.emit_ss(Opcode::Push2, one, two, false)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn compile_call(&mut self, opts: &Options, head: &Value, args: &[Value]) -> CompileResult<Slot> {
        let function = self.compile_value(Options::default(), head)?;
        let slots = self.compile_slots(args)?;
        self.push_slots(&slots)?;
        let ret = if opts.tail {
            self.emit_s(Opcode::TailCall, &function, false)?;
            Slot::nil().with_flags(SlotFlags::RETURNED)
        } else {
            let target = self.target(opts)?;
            self.emit_ss(Opcode::Call, &target, &function, true)?;
            target
        };
        self.free_slots(&slots);
        self.free_slot(&function);
        Ok(ret)
    }

    /// Builds a fresh collection from the compiled `items`.
    fn compile_maker(&mut self, opts: &Options, items: &[Value], op: Opcode) -> CompileResult<Slot> {
        let slots = self.compile_slots(items)?;
        self.push_slots(&slots)?;
        self.free_slots(&slots);
        let target = self.target(opts)?;
        self.emit_s(op, &target, true)?;
        Ok(target)
    }

    fn emit_return(&mut self, mut slot: Slot) -> CompileResult<Slot> {
        if slot.flags.contains(SlotFlags::RETURNED) {
            return Ok(slot);
        }
        if slot.is_nil_constant() {
            self.emit(Opcode::ReturnNil.encode());
        } else {
            self.emit_s(Opcode::Return, &slot, false)?;
        }
        slot.flags.insert(SlotFlags::RETURNED);
        Ok(slot)
    }

    /// The hinted register if it is near, otherwise a fresh register.
    pub(crate) fn target(&mut self, opts: &Options) -> CompileResult<Slot> {
        match &opts.hint {
            Some(hint) if hint.near_register().is_some() => Ok(hint.clone()),
            _ => self.far_slot(),
        }
    }

    pub(crate) fn far_slot(&mut self) -> CompileResult<Slot> {
        let reg = self.scope.registers.allocate();
        if reg > 0xFFFF {
            return Err(self.error(CompileErrorKind::OutOfRegisters));
        }
        Ok(Slot::register(reg))
    }

    /// Releases the register behind a temporary slot. Named slots and
    /// non-register slots are left alone.
    pub(crate) fn free_slot(&mut self, slot: &Slot) {
        if slot.flags.contains(SlotFlags::NAMED) {
            return;
        }
        if let SlotKind::Register(reg) = slot.kind {
            self.scope.registers.free(reg);
        }
    }

    pub(crate) fn name_slot(&mut self, symbol: Symbol, mut slot: Slot) {
        slot.flags.insert(SlotFlags::NAMED);
        self.scope.symbols.push(SymbolPair {
            symbol: Some(symbol),
            slot,
            keep: false,
        });
    }

    pub(crate) fn in_top_scope(&self) -> bool {
        self.scope.flags.contains(ScopeFlags::TOP)
    }

    pub(crate) fn mark_closure(&mut self) {
        self.scope.flags.insert(ScopeFlags::CLOSURE);
    }

    pub(crate) fn push_scope(&mut self, flags: ScopeFlags, name: &'static str) {
        let registers = if flags.contains(ScopeFlags::FUNCTION) {
            RegisterAllocator::new()
        } else {
            self.scope.registers.clone()
        };
        let scope = Scope::new(name, flags, registers, self.buffer.len());
        self.parents.push(mem::replace(&mut self.scope, scope));
    }

    /// Leaves the innermost scope.
    ///
    /// A non-function scope hands its register high-water mark, its closure
    /// flag and any captured registers back to its parent.
    pub(crate) fn pop_scope(&mut self) -> Scope {
        let Some(parent) = self.parents.pop() else {
            return mem::take(&mut self.scope);
        };
        let old = mem::replace(&mut self.scope, parent);
        if !old.flags.intersects(ScopeFlags::FUNCTION | ScopeFlags::UNUSED) {
            if old.flags.contains(ScopeFlags::CLOSURE) {
                self.scope.flags.insert(ScopeFlags::CLOSURE);
            }
            self.scope.registers.raise_max(old.registers.max());
            for pair in old.symbols.iter().filter(|pair| pair.keep) {
                if let SlotKind::Register(reg) = pair.slot.kind {
                    self.scope.registers.touch(reg);
                }
                self.scope.symbols.push(SymbolPair {
                    symbol: None,
                    slot: pair.slot.clone(),
                    keep: true,
                });
            }
        }
        old
    }

    /// Leaves the innermost scope, keeping the register of `slot` reserved in the parent.
    pub(crate) fn pop_scope_keep_slot(&mut self, slot: &Slot) {
        self.pop_scope();
        if let SlotKind::Register(reg) = slot.kind {
            self.scope.registers.touch(reg);
        }
    }

    /// Finishes the innermost function scope into a definition.
    pub(crate) fn pop_funcdef(&mut self) -> FuncDef {
        let start = self.scope.bytecode_start.min(self.buffer.len());
        let bytecode = self.buffer.split_off(start);
        let source_map = self.source_map.split_off(start);
        let scope = self.pop_scope();
        let mut flags = FuncDefFlags::empty();
        if scope.flags.contains(ScopeFlags::ENV) {
            flags.insert(FuncDefFlags::NEEDSENV);
        }
        FuncDef {
            name: None,
            arity: 0,
            flags,
            slot_count: scope.registers.max() + 1,
            bytecode,
            source_map,
            constants: scope.consts,
            environments: scope.envs,
            defs: scope.defs,
        }
    }

    /// Registers `def` with the enclosing function and returns its index.
    pub(crate) fn add_funcdef(&mut self, def: FuncDef) -> CompileResult<u32> {
        log::debug!(
            "finished function `{}`: arity {}, {} slots, {} instructions",
            def.display_name(),
            def.arity,
            def.slot_count,
            def.bytecode.len()
        );
        let scope = self.function_scope_mut();
        let index = scope.defs.len();
        if index > 0xFFFF {
            return Err(self.error(CompileErrorKind::TooManyDefinitions));
        }
        scope.defs.push(Rc::new(def));
        Ok(index as u32)
    }

    fn scope_ref(&self, depth: usize) -> &Scope {
        self.parents.get(depth).unwrap_or(&self.scope)
    }

    fn scope_at(&mut self, depth: usize) -> &mut Scope {
        if depth == self.parents.len() {
            &mut self.scope
        } else {
            &mut self.parents[depth]
        }
    }

    /// The innermost function scope, which owns constants and nested definitions.
    pub(crate) fn function_scope_mut(&mut self) -> &mut Scope {
        let depth = (0..=self.parents.len())
            .rev()
            .find(|&depth| self.scope_ref(depth).flags.contains(ScopeFlags::FUNCTION))
            .unwrap_or(0);
        self.scope_at(depth)
    }

    /// Finds the slot `symbol` refers to from the innermost scope.
    ///
    /// Locals of an enclosing function become upvalues, and every function in
    /// between records the environment it needs to reach them.
    pub(crate) fn resolve(&mut self, symbol: Symbol) -> CompileResult<Slot> {
        let top = self.parents.len();
        let mut found_local = true;
        let mut unused = false;
        let mut hit = None;
        for depth in (0..=top).rev() {
            let scope = self.scope_ref(depth);
            if scope.flags.contains(ScopeFlags::UNUSED) {
                unused = true;
            }
            if let Some(index) = scope.lookup(symbol) {
                hit = Some((depth, index));
                break;
            }
            if scope.flags.contains(ScopeFlags::FUNCTION) {
                found_local = false;
            }
        }

        let Some((depth, index)) = hit else {
            return self.resolve_global(symbol);
        };
        let slot = self.scope_at(depth).symbols[index].slot.clone();
        let SlotKind::Register(reg) = slot.kind else {
            return Ok(slot);
        };
        if unused || found_local {
            return Ok(slot);
        }

        self.scope_at(depth).symbols[index].keep = true;
        let owner = (0..=depth)
            .rev()
            .find(|&d| self.scope_ref(d).flags.contains(ScopeFlags::FUNCTION))
            .unwrap_or(0);
        let owner_scope = self.scope_at(owner);
        owner_scope.flags.insert(ScopeFlags::ENV);
        owner_scope.registers.touch(reg);

        let mut env = None;
        for d in owner + 1..=top {
            let scope = self.scope_at(d);
            if scope.flags.contains(ScopeFlags::FUNCTION) {
                let capture = env.map_or(Capture::Frame, Capture::Env);
                env = Some(scope.capture_index(capture));
            }
        }
        let Some(env) = env else {
            return Ok(slot);
        };
        Ok(Slot {
            kind: SlotKind::Upvalue { env, index: reg },
            flags: slot.flags,
        })
    }

    fn resolve_global(&self, symbol: Symbol) -> CompileResult<Slot> {
        let Some(binding) = self.env.get(symbol) else {
            return Err(self.error(CompileErrorKind::UnknownSymbol(symbol)));
        };
        Ok(match binding.cell() {
            Some(cell) => Slot {
                kind: SlotKind::Reference(cell.clone()),
                flags: SlotFlags::NAMED | SlotFlags::MUTABLE,
            },
            None => Slot::constant(binding.value()),
        })
    }

    /// Compiles `form` for its side effects on the compiler only. The emitted code is discarded.
    pub(crate) fn throwaway(&mut self, opts: Options, form: &Value) -> CompileResult<()> {
        let start = self.label();
        self.push_scope(ScopeFlags::UNUSED, "unused");
        self.compile_value(opts, form)?;
        self.pop_scope();
        self.truncate(start);
        Ok(())
    }
}

fn flatten(entries: &[(Value, Value)]) -> Vec<Value> {
    entries
        .iter()
        .flat_map(|(key, value)| [key.clone(), value.clone()])
        .collect()
}
