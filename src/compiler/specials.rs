//! The special forms.
//!
//! A tuple whose head is one of these symbols is compiled by its handler
//! instead of as a call. The set is closed; there is no way to add forms at
//! runtime.
use core::mem;

use super::{
    bytecode::{encode_s, encode_ss, Opcode},
    regalloc::RegisterTemp,
    scope::ScopeFlags,
    Binding, CompileErrorKind, CompileResult, Compiler, FuncDefFlags, Options, Slot, SlotFlags,
    SlotKind,
};
use crate::value::{Array, Symbol, Table, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Assign,
    Def,
    Do,
    Fn,
    If,
    Quote,
    Var,
    While,
}

// sorted by name for binary search
const SPECIAL_FORMS: [(&str, SpecialForm); 8] = [
    (":=", SpecialForm::Assign),
    ("def", SpecialForm::Def),
    ("do", SpecialForm::Do),
    ("fn", SpecialForm::Fn),
    ("if", SpecialForm::If),
    ("quote", SpecialForm::Quote),
    ("var", SpecialForm::Var),
    ("while", SpecialForm::While),
];

impl SpecialForm {
    pub fn lookup(symbol: Symbol) -> Option<Self> {
        let name = symbol.as_str();
        SPECIAL_FORMS
            .binary_search_by(|(probe, _)| (*probe).cmp(name))
            .ok()
            .map(|index| SPECIAL_FORMS[index].1)
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Assign => ":=",
            SpecialForm::Def => "def",
            SpecialForm::Do => "do",
            SpecialForm::Fn => "fn",
            SpecialForm::If => "if",
            SpecialForm::Quote => "quote",
            SpecialForm::Var => "var",
            SpecialForm::While => "while",
        }
    }

    /// Compiles `(form args...)`.
    pub fn compile(self, c: &mut Compiler<'_>, opts: Options, args: &[Value]) -> CompileResult<Slot> {
        match self {
            SpecialForm::Assign => compile_assign(c, args),
            SpecialForm::Def => compile_def(c, opts, args),
            SpecialForm::Do => compile_do(c, opts, args),
            SpecialForm::Fn => compile_fn(c, opts, args),
            SpecialForm::If => compile_if(c, opts, args),
            SpecialForm::Quote => compile_quote(c, args),
            SpecialForm::Var => compile_var(c, opts, args),
            SpecialForm::While => compile_while(c, args),
        }
    }
}

fn compile_quote(c: &mut Compiler<'_>, args: &[Value]) -> CompileResult<Slot> {
    match args {
        [quoted] => Ok(Slot::constant(quoted.clone())),
        _ => Err(c.error(CompileErrorKind::Arity("1 argument"))),
    }
}

fn compile_assign(c: &mut Compiler<'_>, args: &[Value]) -> CompileResult<Slot> {
    let [target, value] = args else {
        return Err(c.error(CompileErrorKind::Arity("2 arguments")));
    };
    let Some(symbol) = target.as_symbol() else {
        return Err(c.error(CompileErrorKind::ExpectedSymbol));
    };
    let dest = c.resolve(symbol)?;
    if !dest.flags.contains(SlotFlags::MUTABLE) {
        return Err(c.error(CompileErrorKind::CannotSetConstant));
    }
    let ret = c.compile_value(Options::hinted(dest.clone()), value)?;
    c.copy(&dest, &ret)?;
    Ok(ret)
}

/// Compiles the value of a `def` or `var`, the last of its arguments.
fn compile_binding_value(c: &mut Compiler<'_>, opts: Options, args: &[Value]) -> CompileResult<Slot> {
    if args.len() < 2 {
        return Err(c.error(CompileErrorKind::Arity("at least 2 arguments")));
    }
    let value = &args[args.len() - 1];
    let opts = Options {
        tail: false,
        drop: false,
        hint: opts.hint,
    };
    c.compile_value(opts, value)
}

/// Collects the metadata between the pattern and the value of a binding form.
/// Symbols become flags set to true and strings become the `doc` entry.
fn attributes(c: &Compiler<'_>, args: &[Value]) -> CompileResult<Table> {
    let table = Table::new();
    for attribute in &args[1..args.len() - 1] {
        match attribute {
            Value::Symbol(_) => table.put(attribute.clone(), Value::Boolean(true)),
            Value::String(_) => table.put(Value::symbol("doc"), attribute.clone()),
            _ => return Err(c.error(CompileErrorKind::InvalidAttribute)),
        }
    }
    Ok(table)
}

/// Names `slot` in the current scope, copying it to a fresh register first
/// unless it is an unnamed local register. Returns whether the caller may
/// free `slot`.
fn name_local(c: &mut Compiler<'_>, symbol: Symbol, flags: SlotFlags, slot: Slot) -> CompileResult<bool> {
    let unnamed_register = !slot.flags.contains(SlotFlags::NAMED)
        && matches!(slot.kind, SlotKind::Register(index) if index > 0);
    let mut local = if unnamed_register {
        slot
    } else {
        let local = c.far_slot()?;
        c.copy(&local, &slot)?;
        local
    };
    local.flags.insert(flags);
    c.name_slot(symbol, local);
    Ok(!unnamed_register)
}

fn bind_def(c: &mut Compiler<'_>, symbol: Symbol, slot: Slot, attributes: &Table) -> CompileResult<bool> {
    if !c.in_top_scope() {
        return name_local(c, symbol, SlotFlags::empty(), slot);
    }
    let binding = Binding::def(attributes.clone());
    let entry = Slot::constant(Value::Table(binding.entry().clone()));
    c.env.define(symbol, binding);
    let key = Slot::constant(Value::symbol(":value"));
    c.emit_sss(Opcode::Put, &entry, &key, &slot, false)?;
    Ok(true)
}

fn bind_var(c: &mut Compiler<'_>, symbol: Symbol, slot: Slot, attributes: &Table) -> CompileResult<bool> {
    if !c.in_top_scope() {
        return name_local(c, symbol, SlotFlags::MUTABLE, slot);
    }
    let cell = Array::new(vec![Value::Nil]);
    c.env.define(symbol, Binding::var(attributes.clone(), cell.clone()));
    let cell = Slot::constant(Value::Array(cell));
    c.emit_ssu(Opcode::PutIndex, &cell, &slot, 0, false)?;
    Ok(true)
}

fn compile_def(c: &mut Compiler<'_>, mut opts: Options, args: &[Value]) -> CompileResult<Slot> {
    opts.hint = None;
    let ret = compile_binding_value(c, opts, args)?;
    let attributes = attributes(c, args)?;
    if c.destructure(&args[0], ret.clone(), bind_def, &attributes)? {
        c.free_slot(&ret);
    }
    Ok(Slot::nil())
}

fn compile_var(c: &mut Compiler<'_>, opts: Options, args: &[Value]) -> CompileResult<Slot> {
    let ret = compile_binding_value(c, opts, args)?;
    let attributes = attributes(c, args)?;
    if c.destructure(&args[0], ret.clone(), bind_var, &attributes)? {
        c.free_slot(&ret);
    }
    Ok(Slot::nil())
}

fn compile_do(c: &mut Compiler<'_>, opts: Options, args: &[Value]) -> CompileResult<Slot> {
    c.push_scope(ScopeFlags::empty(), "do");
    let mut ret = Slot::nil();
    if let [body @ .., last] = args {
        for form in body {
            let slot = c.compile_value(Options::drop(), form)?;
            c.free_slot(&slot);
        }
        ret = c.compile_value(opts, last)?;
    }
    c.pop_scope_keep_slot(&ret);
    Ok(ret)
}

/// `(if cond then else?)`
///
/// A condition that is a compile-time constant selects its branch outright;
/// the other branch is still compiled, so it gets checked, but its code is
/// thrown away.
fn compile_if(c: &mut Compiler<'_>, opts: Options, args: &[Value]) -> CompileResult<Slot> {
    if !(2..=3).contains(&args.len()) {
        return Err(c.error(CompileErrorKind::Arity("2 or 3 arguments to if")));
    }
    let nil = Value::Nil;
    let mut true_body = &args[1];
    let mut false_body = args.get(2).unwrap_or(&nil);
    let discard = opts.drop || opts.tail;

    c.push_scope(ScopeFlags::empty(), "if");
    let cond = c.compile_value(Options::default(), &args[0])?;

    if let Some(value) = cond.constant_value() {
        if !value.is_truthy() {
            mem::swap(&mut true_body, &mut false_body);
        }
        c.push_scope(ScopeFlags::empty(), "if-body");
        let target = c.compile_value(opts.clone(), true_body)?;
        c.pop_scope_keep_slot(&target);
        c.pop_scope_keep_slot(&target);
        c.throwaway(opts, false_body)?;
        return Ok(target);
    }

    let mut target = if discard { Slot::nil() } else { c.target(&opts)? };
    let jump_to_false = c.emit_si(Opcode::JumpIfNot, &cond, 0, false)?;

    c.push_scope(ScopeFlags::empty(), "if-true");
    let left = c.compile_value(opts.clone(), true_body)?;
    if !discard {
        c.copy(&target, &left)?;
    }
    c.pop_scope();

    let jump_to_end = c.label();
    if !opts.tail {
        c.emit(Opcode::Jump.encode());
    }

    let false_label = c.label();
    c.push_scope(ScopeFlags::empty(), "if-false");
    let right = c.compile_value(opts.clone(), false_body)?;
    if !discard {
        c.copy(&target, &right)?;
    }
    c.pop_scope();
    c.pop_scope_keep_slot(&target);

    let done = c.label();
    c.patch_conditional_jump(jump_to_false, false_label)?;
    if !opts.tail {
        c.patch_jump(jump_to_end, done)?;
    }
    if opts.tail {
        target.flags.insert(SlotFlags::RETURNED);
    }
    Ok(target)
}

/// `(while cond body...)`
///
/// Compiles to a plain backwards jump unless the body creates a closure. In
/// that case each iteration needs fresh registers for its locals, so the loop
/// is compiled again as a function that tail-calls itself and is invoked in
/// place.
fn compile_while(c: &mut Compiler<'_>, args: &[Value]) -> CompileResult<Slot> {
    let [cond_form, body @ ..] = args else {
        return Err(c.error(CompileErrorKind::Arity("at least 2 arguments")));
    };
    if body.is_empty() {
        return Err(c.error(CompileErrorKind::Arity("at least 2 arguments")));
    }

    let loop_start = c.label();
    c.push_scope(ScopeFlags::empty(), "while");
    let cond = c.compile_value(Options::default(), cond_form)?;

    let mut exit_jump = None;
    match cond.constant_value() {
        Some(value) if !value.is_truthy() => {
            c.pop_scope();
            return Ok(Slot::nil());
        }
        Some(_) => {}
        None => exit_jump = Some(c.emit_si(Opcode::JumpIfNot, &cond, 0, false)?),
    }

    for form in body {
        let slot = c.compile_value(Options::drop(), form)?;
        c.free_slot(&slot);
    }

    if c.scope.flags.contains(ScopeFlags::CLOSURE) {
        c.scope.flags.insert(ScopeFlags::UNUSED);
        c.pop_scope();
        c.truncate(loop_start);
        return compile_while_function(c, cond_form, body);
    }

    let back_jump = c.emit(Opcode::Jump.encode());
    let done = c.label();
    if let Some(exit_jump) = exit_jump {
        c.patch_conditional_jump(exit_jump, done)?;
    }
    c.patch_jump(back_jump, loop_start)?;
    c.pop_scope();
    Ok(Slot::nil())
}

fn compile_while_function(c: &mut Compiler<'_>, cond_form: &Value, body: &[Value]) -> CompileResult<Slot> {
    log::debug!("loop body creates a closure, compiling it as a self-calling function");
    c.push_scope(ScopeFlags::FUNCTION, "while-iife");
    let cond = c.compile_value(Options::default(), cond_form)?;
    if !cond.is_constant() {
        c.emit_si(Opcode::JumpIf, &cond, 2, false)?;
        c.emit(Opcode::ReturnNil.encode());
    }
    for form in body {
        let slot = c.compile_value(Options::drop(), form)?;
        c.free_slot(&slot);
    }
    let this = c.scope.registers.allocate_temp(RegisterTemp::T0);
    c.emit(encode_s(Opcode::LoadSelf, this));
    c.emit(encode_s(Opcode::TailCall, this));

    let mut def = c.pop_funcdef();
    def.name = Some("_while".into());
    let index = c.add_funcdef(def)?;

    let closure = c.scope.registers.allocate_temp(RegisterTemp::T0);
    c.emit(encode_ss(Opcode::Closure, closure, index));
    c.emit(encode_ss(Opcode::Call, closure, closure));
    c.scope.registers.free_temp(closure, RegisterTemp::T0);
    c.mark_closure();
    Ok(Slot::nil())
}

/// `(fn name? [params...] body...)`
fn compile_fn(c: &mut Compiler<'_>, opts: Options, args: &[Value]) -> CompileResult<Slot> {
    if args.len() < 2 {
        return Err(c.error(CompileErrorKind::Arity(
            "at least 2 arguments to function literal",
        )));
    }
    let self_name = args[0].as_symbol();
    let param_index = usize::from(self_name.is_some());
    let param_form = &args[param_index];
    let fixed_arity = matches!(param_form, Value::Tuple(_));
    let Some(params) = param_form.indexed_items() else {
        return Err(c.error(CompileErrorKind::ExpectedParameters));
    };
    let vararg_marker = Symbol::intern("&");
    let mut markers = params
        .iter()
        .enumerate()
        .filter(|(_, param)| param.as_symbol() == Some(vararg_marker))
        .map(|(index, _)| index);
    let marker = markers.next();
    let varargs = match (marker, markers.next()) {
        (None, _) => false,
        (Some(index), None) if index + 2 == params.len() => true,
        _ => return Err(c.error(CompileErrorKind::MisplacedVararg)),
    };

    c.mark_closure();
    c.push_scope(ScopeFlags::FUNCTION, "function");

    // every parameter gets its positional register before any pattern is bound
    let mut positional = Vec::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        if Some(index) != marker {
            positional.push((param, c.far_slot()?));
        }
    }
    let arity = (positional.len() - usize::from(varargs)) as u32;
    for (param, slot) in positional {
        match param {
            Value::Symbol(symbol) => c.name_slot(*symbol, slot),
            pattern => {
                c.destructure(pattern, slot, bind_def, &Table::new())?;
            }
        }
    }

    if let Some(name) = self_name {
        let slot = c.far_slot()?.with_flags(SlotFlags::NAMED | SlotFlags::FUNCTION);
        c.emit_s(Opcode::LoadSelf, &slot, true)?;
        c.name_slot(name, slot);
    }

    match &args[param_index + 1..] {
        [] => {
            c.emit(Opcode::ReturnNil.encode());
        }
        [body @ .., last] => {
            for form in body {
                c.compile_value(Options::drop(), form)?;
            }
            c.compile_value(Options::tail(), last)?;
        }
    }

    let mut def = c.pop_funcdef();
    def.arity = arity;
    if varargs {
        def.flags.insert(FuncDefFlags::VARARG);
    } else if fixed_arity {
        def.flags.insert(FuncDefFlags::FIXARITY);
    }
    if let Some(name) = self_name {
        def.name = Some(name.as_str().into());
    }
    def.slot_count = def.slot_count.max(arity + u32::from(varargs));
    let index = c.add_funcdef(def)?;

    let ret = c.target(&opts)?;
    c.emit_su(Opcode::Closure, &ret, index as u16, true)?;
    Ok(ret)
}
