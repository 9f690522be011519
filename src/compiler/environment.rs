use std::{collections::HashMap, rc::Rc};

use crate::value::{Array, Symbol, Table, Value};

/// The global environment that top-level `def` and `var` write into and that
/// unresolved symbols are looked up in.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: HashMap<Symbol, Binding>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Symbol) -> Option<&Binding> {
        self.bindings.get(&name)
    }

    pub fn lookup(&self, name: impl AsRef<str>) -> Option<&Binding> {
        self.get(Symbol::intern(name))
    }

    /// Creates a new binding, replacing any binding that might already exist,
    /// which is returned.
    pub fn define(&mut self, name: Symbol, binding: Binding) -> Option<Binding> {
        log::trace!("defining global `{name}`");
        self.bindings.insert(name, binding)
    }

    pub fn names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.bindings.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// An environment entry.
///
/// The entry table inherits from the attribute table the binding was
/// declared with. A `def` stores its value under `:value`; a `var` stores a
/// one-element array under `:ref` and keeps its value in that cell, so code
/// compiled against the cell sees every later assignment.
#[derive(Debug, Clone)]
pub struct Binding {
    entry: Table,
    cell: Option<Array>,
}

fn value_key() -> Value {
    Value::symbol(":value")
}

impl Binding {
    /// A binding whose value is filled in when the defining code runs.
    pub fn def(attributes: Table) -> Self {
        Self {
            entry: Table::with_proto(attributes),
            cell: None,
        }
    }

    pub fn var(attributes: Table, cell: Array) -> Self {
        let entry = Table::with_proto(attributes);
        entry.put(Value::symbol(":ref"), Value::Array(cell.clone()));
        Self {
            entry,
            cell: Some(cell),
        }
    }

    /// An immutable binding with a value known up front.
    pub fn constant(value: Value, doc: &str) -> Self {
        let attributes = Table::new();
        attributes.put(Value::symbol("doc"), Value::String(Rc::from(doc)));
        let binding = Self::def(attributes);
        binding.entry.put(value_key(), value);
        binding
    }

    pub fn entry(&self) -> &Table {
        &self.entry
    }

    pub fn cell(&self) -> Option<&Array> {
        self.cell.as_ref()
    }

    pub fn is_mutable(&self) -> bool {
        self.cell.is_some()
    }

    pub fn value(&self) -> Value {
        match &self.cell {
            Some(cell) => cell.get(0).unwrap_or_default(),
            None => self.entry.raw_get(&value_key()).unwrap_or_default(),
        }
    }

    /// Looks up a declared attribute such as `:private` or `doc`.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.entry.get(&Value::symbol(name))
    }

    pub fn doc(&self) -> Option<Rc<str>> {
        match self.attribute("doc")? {
            Value::String(doc) => Some(doc),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Binding, Environment};
    use crate::value::{Array, Symbol, Table, Value};
    use assert2::{check, let_assert};

    #[test]
    fn define_replaces() {
        let mut env = Environment::new();
        let first = Binding::constant(Value::Number(1.0), "one");
        check!(env.define(Symbol::intern("x"), first).is_none());
        let replaced = env.define(
            Symbol::intern("x"),
            Binding::constant(Value::Number(2.0), "two"),
        );
        let_assert!(Some(old) = replaced);
        check!(old.value() == Value::Number(1.0));
        let_assert!(Some(binding) = env.lookup("x"));
        check!(binding.value() == Value::Number(2.0));
        check!(binding.doc().as_deref() == Some("two"));
        check!(env.len() == 1);
    }

    #[test]
    fn var_reads_through_cell() {
        let cell = Array::new(vec![Value::Nil]);
        let binding = Binding::var(Table::new(), cell.clone());
        check!(binding.is_mutable());
        check!(binding.value() == Value::Nil);
        check!(cell.put(0, Value::Number(5.0)));
        check!(binding.value() == Value::Number(5.0));
        check!(binding.entry().get(&Value::symbol(":ref")) == Some(Value::Array(cell)));
    }

    #[test]
    fn attributes_come_from_proto() {
        let attributes = Table::new();
        attributes.put(Value::symbol(":private"), Value::Boolean(true));
        let binding = Binding::def(attributes);
        check!(!binding.is_mutable());
        check!(binding.attribute(":private") == Some(Value::Boolean(true)));
        check!(binding.attribute(":missing") == None);
        check!(binding.doc() == None);
    }
}
