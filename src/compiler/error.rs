use crate::{lexer::Span, value::Symbol};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// Span of the innermost form being compiled when the error was raised.
    pub span: Option<Span>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    /// Wrong number of arguments to a special form. Holds the expectation, e.g. `2 arguments`.
    #[error("expected {0}")]
    Arity(&'static str),
    #[error("expected symbol")]
    ExpectedSymbol,
    #[error("expected function parameters")]
    ExpectedParameters,
    #[error("cannot set constant")]
    CannotSetConstant,
    #[error("cannot write to constant")]
    CannotWriteConstant,
    #[error("unknown symbol {0}")]
    UnknownSymbol(Symbol),
    #[error("could not add metadata to binding")]
    InvalidAttribute,
    #[error("unexpected type in destructuring")]
    InvalidPattern,
    #[error("variable argument symbol in unexpected location")]
    MisplacedVararg,
    #[error("recursed too deeply")]
    RecursionLimit,
    #[error("ran out of internal registers")]
    OutOfRegisters,
    #[error("too many constants")]
    TooManyConstants,
    #[error("too many function definitions")]
    TooManyDefinitions,
    #[error("jump offset {0} does not fit its instruction")]
    JumpOutOfRange(i64),
    #[error("captured variable is out of upvalue range")]
    UpvalueOutOfRange,
}

pub type CompileResult<T> = Result<T, CompileError>;
