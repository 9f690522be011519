//! The register machine that runs compiled function definitions.
//!
//! Each call gets a frame of `slot_count` registers. Frames are reference
//! counted so closures created in a call can keep reading and writing its
//! registers after it returns.
use core::{fmt, mem};
use std::{cell::RefCell, rc::Rc};

use crate::{
    compiler::{Capture, FuncDef, FuncDefFlags, Instruction, Opcode},
    lexer::Span,
    value::{Array, Struct, Tuple, TupleKind, Value},
};

pub mod fuel;
pub mod natives;

pub use fuel::Fuel;

/// How many calls may be active at once before the machine reports a stack overflow.
pub const DEFAULT_MAX_FRAMES: usize = 1024;

/// A register frame, shared between a call and the closures created in it.
pub type Env = Rc<RefCell<Vec<Value>>>;

/// A function definition together with the environments it captured.
pub struct Closure {
    pub def: Rc<FuncDef>,
    pub envs: Vec<Env>,
}

impl Closure {
    pub fn new(def: Rc<FuncDef>, envs: Vec<Env>) -> Self {
        Self { def, envs }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.def.display_name())
    }
}

pub type NativeResult = Result<Value, RuntimeErrorKind>;

/// A function implemented in Rust.
#[derive(Clone, Copy)]
pub struct Native {
    pub name: &'static str,
    pub call: fn(&[Value]) -> NativeResult,
}

impl PartialEq for Native {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    #[error("{0} is not callable")]
    NotCallable(&'static str),
    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: u32,
        got: usize,
    },
    #[error("expected {expected}, got {got}")]
    Type {
        expected: &'static str,
        got: &'static str,
    },
    #[error("index {index} out of range for array of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("cannot put into {0}")]
    CannotPut(&'static str),
    #[error("{0}")]
    Message(String),
    #[error("out of fuel")]
    OutOfFuel,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid instruction at {pc}")]
    InvalidInstruction { pc: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Span of the form whose code raised the error.
    pub span: Option<Span>,
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self { kind, span: None }
    }
}

struct Frame {
    closure: Rc<Closure>,
    regs: Env,
    pc: usize,
    /// Register receiving the result of the call this frame is waiting on.
    return_to: usize,
}

impl Frame {
    fn enter(closure: Rc<Closure>, mut args: Vec<Value>) -> Result<Self, RuntimeErrorKind> {
        let def = &closure.def;
        let arity = def.arity as usize;
        if def.flags.contains(FuncDefFlags::FIXARITY) && args.len() != arity {
            return Err(RuntimeErrorKind::Arity {
                name: def.display_name().to_owned(),
                expected: def.arity,
                got: args.len(),
            });
        }
        if def.flags.contains(FuncDefFlags::VARARG) {
            let rest = if args.len() > arity {
                args.split_off(arity)
            } else {
                vec![]
            };
            args.resize(arity, Value::Nil);
            args.push(Value::Tuple(Tuple::new(rest, TupleKind::Brackets)));
        } else {
            args.resize(arity, Value::Nil);
        }
        let slot_count = (def.slot_count as usize).max(args.len());
        args.resize(slot_count, Value::Nil);
        Ok(Self {
            closure,
            regs: Rc::new(RefCell::new(args)),
            pc: 0,
            return_to: 0,
        })
    }

    fn get(&self, reg: usize) -> Value {
        self.regs.borrow().get(reg).cloned().unwrap_or_default()
    }

    fn set(&self, reg: usize, value: Value) {
        let mut regs = self.regs.borrow_mut();
        if reg >= regs.len() {
            regs.resize(reg + 1, Value::Nil);
        }
        regs[reg] = value;
    }

    fn jump(&mut self, from: usize, offset: i32) {
        self.pc = (from as i64 + i64::from(offset)) as usize;
    }

    fn env(&self, env: usize) -> Result<&Env, RuntimeErrorKind> {
        self.closure
            .envs
            .get(env)
            .ok_or(RuntimeErrorKind::InvalidInstruction { pc: self.pc - 1 })
    }

    fn instantiate(&self, index: usize) -> Result<Closure, RuntimeErrorKind> {
        let Some(def) = self.closure.def.defs.get(index) else {
            return Err(RuntimeErrorKind::InvalidInstruction { pc: self.pc - 1 });
        };
        let envs = def
            .environments
            .iter()
            .map(|capture| match capture {
                Capture::Frame => Ok(self.regs.clone()),
                Capture::Env(env) => self.env(*env as usize).cloned(),
            })
            .collect::<Result<_, _>>()?;
        Ok(Closure::new(def.clone(), envs))
    }

    fn span(&self) -> Option<Span> {
        self.closure
            .def
            .source_map
            .get(self.pc.wrapping_sub(1))
            .cloned()
            .flatten()
    }
}

pub struct Executor {
    /// Suspended callers of the running frame.
    frames: Vec<Frame>,
    /// Arguments pushed for the next call or constructor.
    args: Vec<Value>,
    max_frames: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAMES)
    }
}

impl Executor {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: vec![],
            args: vec![],
            max_frames,
        }
    }

    /// Runs a top-level definition, which takes no arguments.
    pub fn run(&mut self, def: Rc<FuncDef>, fuel: &mut Fuel) -> Result<Value, RuntimeError> {
        let closure = Rc::new(Closure::new(def, vec![]));
        self.call(&Value::Function(closure), vec![], fuel)
    }

    pub fn call(
        &mut self,
        function: &Value,
        args: Vec<Value>,
        fuel: &mut Fuel,
    ) -> Result<Value, RuntimeError> {
        let result = match function {
            Value::Function(closure) => self.execute(closure.clone(), args, fuel),
            Value::Native(native) => (native.call)(&args).map_err(RuntimeError::from),
            other => Err(RuntimeErrorKind::NotCallable(other.type_name()).into()),
        };
        if result.is_err() {
            self.frames.clear();
            self.args.clear();
        }
        result
    }

    fn execute(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        fuel: &mut Fuel,
    ) -> Result<Value, RuntimeError> {
        let base = self.frames.len();
        let mut frame = Frame::enter(closure, args)?;
        loop {
            match self.step(&mut frame, base, fuel) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(kind) => {
                    self.frames.truncate(base);
                    return Err(RuntimeError {
                        kind,
                        span: frame.span(),
                    });
                }
            }
        }
    }

    /// Leaves `frame` with `value`, resuming its caller. Returns the value
    /// once the outermost frame of this execution returns.
    fn leave(&mut self, frame: &mut Frame, base: usize, value: Value) -> Option<Value> {
        if self.frames.len() == base {
            return Some(value);
        }
        let caller = self.frames.pop()?;
        *frame = caller;
        frame.set(frame.return_to, value);
        None
    }

    fn call_native(&mut self, native: Native, fuel: &mut Fuel) -> NativeResult {
        let args = mem::take(&mut self.args);
        fuel.consume(fuel::count_fuel(1, args.len()));
        log::trace!("calling native `{}` with {} arguments", native.name, args.len());
        (native.call)(&args)
    }

    fn enter_closure(&mut self, closure: Rc<Closure>) -> Result<Frame, RuntimeErrorKind> {
        if self.frames.len() >= self.max_frames {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        log::trace!(
            "calling `{}` with {} arguments",
            closure.def.display_name(),
            self.args.len()
        );
        Frame::enter(closure, mem::take(&mut self.args))
    }

    fn step(
        &mut self,
        frame: &mut Frame,
        base: usize,
        fuel: &mut Fuel,
    ) -> Result<Option<Value>, RuntimeErrorKind> {
        if !fuel.should_continue() {
            return Err(RuntimeErrorKind::OutOfFuel);
        }
        fuel.consume(1);

        let pc = frame.pc;
        frame.pc += 1;
        let Some(&word) = frame.closure.def.bytecode.get(pc) else {
            return Err(RuntimeErrorKind::InvalidInstruction { pc });
        };
        let instr = Instruction(word);
        let Some(op) = instr.opcode() else {
            return Err(RuntimeErrorKind::InvalidInstruction { pc });
        };

        match op {
            Opcode::ReturnNil => return Ok(self.leave(frame, base, Value::Nil)),
            Opcode::Return => {
                let value = frame.get(instr.a24());
                return Ok(self.leave(frame, base, value));
            }
            Opcode::Jump => frame.jump(pc, instr.jump_offset()),
            Opcode::JumpIf => {
                if frame.get(instr.a()).is_truthy() {
                    frame.jump(pc, instr.immediate().into());
                }
            }
            Opcode::JumpIfNot => {
                if !frame.get(instr.a()).is_truthy() {
                    frame.jump(pc, instr.immediate().into());
                }
            }
            Opcode::LoadNil => frame.set(instr.a24(), Value::Nil),
            Opcode::LoadTrue => frame.set(instr.a24(), Value::Boolean(true)),
            Opcode::LoadFalse => frame.set(instr.a24(), Value::Boolean(false)),
            Opcode::LoadInteger => {
                frame.set(instr.a(), Value::Number(f64::from(instr.immediate())));
            }
            Opcode::LoadConstant => {
                let Some(value) = frame.closure.def.constants.get(instr.b16()).cloned() else {
                    return Err(RuntimeErrorKind::InvalidInstruction { pc });
                };
                frame.set(instr.a(), value);
            }
            Opcode::LoadUpvalue => {
                let value = frame
                    .env(instr.b())?
                    .borrow()
                    .get(instr.c())
                    .cloned()
                    .unwrap_or_default();
                frame.set(instr.a(), value);
            }
            Opcode::SetUpvalue => {
                let value = frame.get(instr.a());
                let mut env = frame.env(instr.b())?.borrow_mut();
                match env.get_mut(instr.c()) {
                    Some(slot) => *slot = value,
                    None => return Err(RuntimeErrorKind::InvalidInstruction { pc }),
                }
            }
            Opcode::LoadSelf => frame.set(instr.a24(), Value::Function(frame.closure.clone())),
            Opcode::MoveNear => frame.set(instr.a(), frame.get(instr.b16())),
            Opcode::MoveFar => frame.set(instr.b16(), frame.get(instr.a())),
            Opcode::Closure => {
                let closure = frame.instantiate(instr.b16())?;
                frame.set(instr.a(), Value::Function(Rc::new(closure)));
            }
            Opcode::Push => self.args.push(frame.get(instr.a24())),
            Opcode::Push2 => {
                self.args.push(frame.get(instr.a()));
                self.args.push(frame.get(instr.b16()));
            }
            Opcode::Push3 => {
                self.args.push(frame.get(instr.a()));
                self.args.push(frame.get(instr.b()));
                self.args.push(frame.get(instr.c()));
            }
            Opcode::Call => match frame.get(instr.b16()) {
                Value::Function(closure) => {
                    let callee = self.enter_closure(closure)?;
                    let mut caller = mem::replace(frame, callee);
                    caller.return_to = instr.a();
                    self.frames.push(caller);
                }
                Value::Native(native) => {
                    let value = self.call_native(native, fuel)?;
                    frame.set(instr.a(), value);
                }
                other => return Err(RuntimeErrorKind::NotCallable(other.type_name())),
            },
            Opcode::TailCall => match frame.get(instr.a24()) {
                Value::Function(closure) => {
                    *frame = Frame::enter(closure, mem::take(&mut self.args))?;
                }
                Value::Native(native) => {
                    let value = self.call_native(native, fuel)?;
                    return Ok(self.leave(frame, base, value));
                }
                other => return Err(RuntimeErrorKind::NotCallable(other.type_name())),
            },
            Opcode::Get => {
                let value = natives::get(&frame.get(instr.b()), &frame.get(instr.c()))?;
                frame.set(instr.a(), value);
            }
            Opcode::Put => {
                natives::put(&frame.get(instr.a()), frame.get(instr.b()), frame.get(instr.c()))?;
            }
            Opcode::GetIndex => {
                let key = Value::Number(instr.c() as f64);
                let value = natives::get(&frame.get(instr.b()), &key)?;
                frame.set(instr.a(), value);
            }
            Opcode::PutIndex => {
                let key = Value::Number(instr.c() as f64);
                natives::put(&frame.get(instr.a()), key, frame.get(instr.b()))?;
            }
            Opcode::MakeArray => {
                let items = mem::take(&mut self.args);
                frame.set(instr.a24(), Value::Array(Array::new(items)));
            }
            Opcode::MakeTuple => {
                let items = mem::take(&mut self.args);
                frame.set(
                    instr.a24(),
                    Value::Tuple(Tuple::new(items, TupleKind::Brackets)),
                );
            }
            Opcode::MakeStruct => {
                let items = mem::take(&mut self.args);
                let st = Struct::from_pairs(pairs(items));
                frame.set(instr.a24(), Value::Struct(st));
            }
            Opcode::MakeTable => {
                let items = mem::take(&mut self.args);
                frame.set(instr.a24(), Value::Table(pairs(items).collect()));
            }
        }
        Ok(None)
    }
}

fn pairs(items: Vec<Value>) -> impl Iterator<Item = (Value, Value)> {
    let mut items = items.into_iter();
    std::iter::from_fn(move || Some((items.next()?, items.next().unwrap_or_default())))
}

#[cfg(test)]
mod tests {
    use super::{Executor, Fuel, RuntimeErrorKind};
    use crate::{Context, Error, Value};
    use assert2::{check, let_assert};

    fn eval(source: &str) -> Result<Value, Error> {
        Context::default().eval_str(source)
    }

    fn runtime_error(source: &str) -> RuntimeErrorKind {
        let_assert!(Err(Error::Runtime(err)) = eval(source));
        err.kind
    }

    #[test]
    fn fixed_arity_is_checked() {
        check!(eval("((fn [a b] a) 1 2)") == Ok(Value::Number(1.0)));
        let_assert!(
            RuntimeErrorKind::Arity { expected: 2, got: 1, .. } = runtime_error("((fn [a b] a) 1)")
        );
    }

    #[test]
    fn flexible_arity_pads_and_drops() {
        check!(eval("((fn @[a b] b) 1)") == Ok(Value::Nil));
        check!(eval("((fn @[a] a) 1 2 3)") == Ok(Value::Number(1.0)));
    }

    #[test]
    fn varargs_collect_the_rest() {
        check!(eval("((fn [a & rest] rest) 1 2 3)") == Ok(Value::brackets([Value::Number(2.0), Value::Number(3.0)])));
        check!(eval("((fn [& rest] rest))") == Ok(Value::brackets([])));
    }

    #[test]
    fn tail_calls_do_not_grow_the_stack() {
        let mut ctx = Context::new(crate::Config {
            max_frames: 8,
            ..crate::Config::default()
        });
        let source = "(def count (fn count [n] (if (< n 1000) (count (+ n 1)) n)))\n(count 0)";
        check!(ctx.eval_str(source) == Ok(Value::Number(1000.0)));
    }

    #[test]
    fn calling_non_functions() {
        check!(runtime_error("(1 2)") == RuntimeErrorKind::NotCallable("number"));
        check!(runtime_error("(:a)") == RuntimeErrorKind::NotCallable("symbol"));
    }

    #[test]
    fn executor_recovers_after_errors() {
        let mut executor = Executor::default();
        let mut fuel = Fuel::unlimited();
        let native = Value::Native(super::Native {
            name: "fail",
            call: |_| Err(RuntimeErrorKind::Message("failed".into())),
        });
        let_assert!(Err(err) = executor.call(&native, vec![], &mut fuel));
        check!(err.to_string() == "failed");
        let count = Value::Native(super::Native {
            name: "count",
            call: |args| Ok(Value::Number(args.len() as f64)),
        });
        check!(executor.call(&count, vec![Value::Nil; 2], &mut fuel) == Ok(Value::Number(2.0)));
    }
}
