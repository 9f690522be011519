//! Values shared by the reader, the compiler and the executor.
//!
//! Source code is read directly into [`Value`]s, so the compiler works on the
//! same representation that quoted data and runtime results use.
use core::{cmp::Ordering, fmt};
use std::{cell::RefCell, rc::Rc};

use arbitrary::{Arbitrary, Unstructured};

use crate::{
    lexer::Span,
    runtime::{Closure, Native},
};

pub use symbol::Symbol;
pub use table::{Struct, Table};

mod symbol;
mod table;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Symbol(Symbol),
    Tuple(Tuple),
    Array(Array),
    Struct(Struct),
    Table(Table),
    Function(Rc<Closure>),
    Native(Native),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Tuple(_) => "tuple",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Native(_) => "native",
        }
    }

    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Symbol::intern(name))
    }

    /// A parenthesised tuple, the shape of a call or special form.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Tuple(Tuple::new(items, TupleKind::Parens))
    }

    /// A bracketed tuple, which compiles to a tuple constructor.
    pub fn brackets(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Tuple(Tuple::new(items, TupleKind::Brackets))
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(Array::new(items.into_iter().collect()))
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Self::Symbol(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Elements of a tuple or array, copied out so the caller holds no borrow.
    pub fn indexed_items(&self) -> Option<Vec<Value>> {
        match self {
            Self::Tuple(tuple) => Some(tuple.items().to_vec()),
            Self::Array(array) => Some(array.to_vec()),
            _ => None,
        }
    }

    /// Entries of a struct or table, in storage order.
    pub fn dictionary_entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Self::Struct(st) => Some(st.entries().to_vec()),
            Self::Table(table) => Some(table.entries()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleKind {
    /// `(a b)`
    Parens,
    /// `[a b]`
    Brackets,
}

/// An immutable sequence.
///
/// The reader records where a tuple came from so the compiler can map
/// instructions and errors back to source. Neither the kind nor the span take
/// part in equality.
#[derive(Clone)]
pub struct Tuple {
    items: Rc<[Value]>,
    kind: TupleKind,
    span: Option<Span>,
}

impl Tuple {
    pub fn new(items: impl IntoIterator<Item = Value>, kind: TupleKind) -> Self {
        Self {
            items: items.into_iter().collect(),
            kind,
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn kind(&self) -> TupleKind {
        self.kind
    }

    pub fn span(&self) -> Option<Span> {
        self.span.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

/// A shared, growable sequence. Compared by identity.
#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Value>>>);

impl Array {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    /// Replaces the item at `index`, or appends when `index` is the length.
    /// Returns false and leaves the array alone for any index further out.
    pub fn put(&self, index: usize, value: Value) -> bool {
        let mut items = self.0.borrow_mut();
        match index.cmp(&items.len()) {
            Ordering::Less => items[index] = value,
            Ordering::Equal => items.push(value),
            Ordering::Greater => return false,
        }
        true
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl IntoIterator<Item = &'a Value>,
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (idx, item) in items.into_iter().enumerate() {
        if idx > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

fn write_pairs<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    pairs: impl IntoIterator<Item = &'a (Value, Value)>,
) -> fmt::Result {
    f.write_str(open)?;
    for (idx, (key, value)) in pairs.into_iter().enumerate() {
        if idx > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{key} {value}")?;
    }
    f.write_str("}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write_number(f, *n),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(sym) => write!(f, "{sym}"),
            Value::Tuple(tuple) => match tuple.kind() {
                TupleKind::Parens => write_seq(f, "(", tuple.items(), ")"),
                TupleKind::Brackets => write_seq(f, "[", tuple.items(), "]"),
            },
            Value::Array(array) => write_seq(f, "@[", &array.to_vec(), "]"),
            Value::Struct(st) => write_pairs(f, "{", st.entries()),
            Value::Table(table) => write_pairs(f, "@{", &table.entries()),
            Value::Function(closure) => match closure.def.name.as_deref() {
                Some(name) => write!(f, "<function {name}>"),
                None => f.write_str("<function>"),
            },
            Value::Native(native) => write!(f, "<native {}>", native.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

const ARBITRARY_SYMBOLS: &[&str] = &["a", "b", "x", "y", "value", ":k", ":ref", "&"];

fn arbitrary_value(u: &mut Unstructured<'_>, depth: u32) -> arbitrary::Result<Value> {
    let choice = if depth == 0 {
        u.int_in_range(0..=4)?
    } else {
        u.int_in_range(0..=8)?
    };
    let children = |u: &mut Unstructured<'_>| -> arbitrary::Result<Vec<Value>> {
        let len = u.int_in_range(0..=4)?;
        (0..len).map(|_| arbitrary_value(u, depth - 1)).collect()
    };
    Ok(match choice {
        0 => Value::Nil,
        1 => Value::Boolean(u.arbitrary()?),
        2 => Value::Number(f64::from(u.arbitrary::<i32>()?)),
        3 => Value::from(<&str>::arbitrary(u)?),
        4 => Value::symbol(u.choose(ARBITRARY_SYMBOLS)?),
        5 => Value::brackets(children(u)?),
        6 => Value::array(children(u)?),
        7 => {
            let items = children(u)?;
            Value::Struct(Struct::from_pairs(
                items.chunks(2).map(|pair| (pair[0].clone(), pair.get(1).cloned().unwrap_or_default())),
            ))
        }
        _ => {
            let items = children(u)?;
            Value::Table(
                items
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair.get(1).cloned().unwrap_or_default()))
                    .collect(),
            )
        }
    })
}

impl<'a> Arbitrary<'a> for Value {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        arbitrary_value(u, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::{Array, Value};
    use arbtest::arbtest;
    use assert2::{assert, check};

    #[test]
    fn truthiness() {
        check!(!Value::Nil.is_truthy());
        check!(!Value::Boolean(false).is_truthy());
        check!(Value::Number(0.0).is_truthy());
        check!(Value::from("").is_truthy());
        check!(Value::brackets([]).is_truthy());
    }

    #[test]
    fn identity_for_mutable_containers() {
        let a = Value::array([Value::Number(1.0)]);
        let b = Value::array([Value::Number(1.0)]);
        check!(a != b);
        check!(a == a.clone());
        check!(Value::brackets([Value::Nil]) == Value::list([Value::Nil]));
    }

    #[test]
    fn array_put_grows_by_one() {
        let array = Array::default();
        check!(!array.put(2, Value::Boolean(true)));
        check!(array.is_empty());
        check!(array.put(0, Value::Boolean(true)));
        check!(array.put(1, Value::Nil));
        check!(array.put(0, Value::Number(1.0)));
        check!(array.to_vec() == vec![Value::Number(1.0), Value::Nil]);
        check!(format!("{array:?}") == "[1, nil]");
    }

    #[test]
    fn display() {
        let value = Value::list([
            Value::symbol("fn"),
            Value::brackets([Value::symbol("a"), Value::symbol("&"), Value::symbol("rest")]),
            Value::array([Value::Number(1.5), Value::Number(-3.0), Value::from("s")]),
        ]);
        check!(value.to_string() == r#"(fn [a & rest] @[1.5 -3 "s"])"#);
    }

    #[test]
    fn arbitrary_values_equal_their_clones() {
        arbtest(|u| {
            let value: Value = u.arbitrary()?;
            assert!(value == value.clone());
            Ok(())
        });
    }
}
