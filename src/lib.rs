//! A small Lisp with a register bytecode compiler.
//!
//! Source text is read into [`Value`]s, each top-level form is compiled into
//! a [`FuncDef`] of no arguments and run on an [`Executor`]. A [`Context`]
//! ties these together around one global [`Environment`].
use std::rc::Rc;

pub mod compiler;
pub mod lexer;
pub mod reader;
pub mod runtime;
pub mod value;

pub use compiler::{CompileError, CompileErrorKind, Environment, FuncDef};
pub use lexer::Span;
pub use reader::{read, ReadError};
pub use runtime::{Executor, Fuel, RuntimeError, RuntimeErrorKind};
pub use value::{Symbol, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Read(err) => Some(err.span()),
            Error::Compile(err) => err.span.clone(),
            Error::Runtime(err) => err.span.clone(),
        }
    }
}

/// Limits applied to every evaluation in a [`Context`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum nesting of forms the compiler accepts.
    pub max_depth: usize,
    /// Instructions each top-level form may execute. `None` means unlimited.
    pub fuel: Option<i32>,
    /// Maximum number of active calls.
    pub max_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: compiler::DEFAULT_MAX_DEPTH,
            fuel: None,
            max_frames: runtime::DEFAULT_MAX_FRAMES,
        }
    }
}

pub struct Context {
    env: Environment,
    executor: Executor,
    fuel: Fuel,
    config: Config,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Context {
    /// A context whose environment holds the core natives.
    pub fn new(config: Config) -> Self {
        let mut env = Environment::new();
        runtime::natives::install(&mut env);
        Self {
            env,
            executor: Executor::new(config.max_frames),
            fuel: Fuel::with(0),
            config,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn compile_form(&mut self, form: &Value) -> Result<FuncDef, Error> {
        let def = compiler::Compiler::new(&mut self.env)
            .with_max_depth(self.config.max_depth)
            .compile(form)?;
        Ok(def)
    }

    /// Compiles and runs a single top-level form.
    pub fn eval_form(&mut self, form: &Value) -> Result<Value, Error> {
        let def = self.compile_form(form)?;
        match self.config.fuel {
            Some(budget) => self.fuel.refill(budget, budget),
            None => self.fuel = Fuel::unlimited(),
        }
        let value = self.executor.run(Rc::new(def), &mut self.fuel)?;
        Ok(value)
    }

    /// Reads `source` and evaluates its forms in order, returning the value of
    /// the last one, or nil if there are none.
    pub fn eval_str(&mut self, source: &str) -> Result<Value, Error> {
        let mut last = Value::Nil;
        for form in reader::Reader::new(source) {
            last = self.eval_form(&form?)?;
        }
        Ok(last)
    }

    /// Reads and compiles every form of `source` without running any of them.
    ///
    /// Top-level definitions are still registered, so later forms can refer
    /// to earlier names, but their values stay nil.
    pub fn compile_str(&mut self, source: &str) -> Result<Vec<FuncDef>, Error> {
        reader::Reader::new(source)
            .map(|form| self.compile_form(&form?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Context, Error, Value};
    use crate::{compiler::CompileErrorKind, runtime::RuntimeErrorKind};
    use assert2::{check, let_assert};

    fn eval(source: &str) -> Result<Value, Error> {
        Context::default().eval_str(source)
    }

    #[test]
    fn empty_source_is_nil() {
        check!(eval("") == Ok(Value::Nil));
        check!(eval("# only a comment") == Ok(Value::Nil));
    }

    #[test]
    fn globals_persist_between_forms() {
        let mut ctx = Context::default();
        check!(ctx.eval_str("(def x 40)") == Ok(Value::Nil));
        check!(ctx.eval_str("(+ x 2)") == Ok(Value::Number(42.0)));
        let_assert!(Some(binding) = ctx.environment().lookup("x"));
        check!(binding.value() == Value::Number(40.0));
    }

    #[test]
    fn errors_carry_spans() {
        let_assert!(Err(Error::Compile(err)) = eval("(def a 1)\n(:= a 2)"));
        check!(err.kind == CompileErrorKind::CannotSetConstant);
        check!(err.span == Some(10..18));

        let_assert!(Err(Error::Runtime(err)) = eval("(+ 1 :a)"));
        check!(err.kind == RuntimeErrorKind::Type { expected: "number", got: "symbol" });
        check!(err.span == Some(0..8));

        let_assert!(Err(Error::Read(err)) = eval("(+ 1"));
        check!(err.span() == (0..1));
    }

    #[test]
    fn fuel_limits_loops() {
        let mut ctx = Context::new(Config {
            fuel: Some(1_000),
            ..Config::default()
        });
        let_assert!(Err(Error::Runtime(err)) = ctx.eval_str("(while true 1)"));
        check!(err.kind == RuntimeErrorKind::OutOfFuel);
        // the budget is refilled for every form
        check!(ctx.eval_str("(+ 1 1)") == Ok(Value::Number(2.0)));
    }

    #[test]
    fn deep_recursion_overflows() {
        let mut ctx = Context::new(Config {
            max_frames: 64,
            ..Config::default()
        });
        let_assert!(
            Err(Error::Runtime(err)) =
                ctx.eval_str("(def f (fn f [n] (+ 1 (f n))))\n(f 1)")
        );
        check!(err.kind == RuntimeErrorKind::StackOverflow);
    }

    #[test]
    fn compile_only_defines_names() {
        let mut ctx = Context::default();
        let_assert!(Ok(defs) = ctx.compile_str("(def y 1) (+ y 1)"));
        check!(defs.len() == 2);
        check!(defs[0].name.as_deref() == Some("_thunk"));
    }
}
