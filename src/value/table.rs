use std::{cell::RefCell, rc::Rc};

use super::Value;

/// A mutable associative table with an optional prototype.
///
/// Lookups that miss fall through to the prototype chain. Entries keep their
/// insertion order.
#[derive(Clone, Default)]
pub struct Table(Rc<RefCell<TableData>>);

#[derive(Debug, Default)]
struct TableData {
    entries: Vec<(Value, Value)>,
    proto: Option<Table>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proto(proto: Table) -> Self {
        Self(Rc::new(RefCell::new(TableData {
            entries: vec![],
            proto: Some(proto),
        })))
    }

    pub fn proto(&self) -> Option<Table> {
        self.0.borrow().proto.clone()
    }

    /// Looks up `key` in this table only, ignoring the prototype.
    pub fn raw_get(&self, key: &Value) -> Option<Value> {
        self.0
            .borrow()
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let mut table = Some(self.clone());
        while let Some(current) = table {
            if let Some(value) = current.raw_get(key) {
                return Some(value);
            }
            table = current.proto();
        }
        None
    }

    /// Nil keys are ignored, and a nil value removes the entry.
    pub fn put(&self, key: Value, value: Value) {
        if key.is_nil() {
            return;
        }
        let mut data = self.0.borrow_mut();
        let position = data.entries.iter().position(|(k, _)| *k == key);
        match (position, value.is_nil()) {
            (Some(idx), true) => {
                _ = data.entries.remove(idx);
            }
            (Some(idx), false) => data.entries[idx].1 = value,
            (None, true) => {}
            (None, false) => data.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entries, so callers may mutate the table while walking them.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0.borrow().entries.clone()
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl core::fmt::Debug for Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.0.borrow().entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl FromIterator<(Value, Value)> for Table {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        let table = Table::new();
        for (key, value) in iter {
            table.put(key, value);
        }
        table
    }
}

/// An immutable associative structure, compared by contents.
#[derive(Clone, Debug)]
pub struct Struct(Rc<[(Value, Value)]>);

impl Struct {
    /// Later duplicates replace earlier ones; nil keys and nil values are dropped.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut entries: Vec<(Value, Value)> = vec![];
        for (key, value) in pairs {
            if key.is_nil() {
                continue;
            }
            match entries.iter().position(|(k, _)| *k == key) {
                Some(idx) if value.is_nil() => {
                    _ = entries.remove(idx);
                }
                Some(idx) => entries[idx].1 = value,
                None if value.is_nil() => {}
                None => entries.push((key, value)),
            }
        }
        Self(Rc::from(entries))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries()
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

#[cfg(test)]
mod tests {
    use super::{Struct, Table};
    use crate::value::{Symbol, Value};
    use assert2::{assert, check};

    fn sym(name: &str) -> Value {
        Value::Symbol(Symbol::intern(name))
    }

    #[test]
    fn prototype_lookup() {
        let attrs = Table::new();
        attrs.put(sym("doc"), Value::from("the answer"));
        let entry = Table::with_proto(attrs);
        entry.put(sym(":value"), Value::Number(42.0));

        check!(entry.get(&sym(":value")) == Some(Value::Number(42.0)));
        check!(entry.get(&sym("doc")) == Some(Value::from("the answer")));
        check!(entry.raw_get(&sym("doc")) == None);
    }

    #[test]
    fn nil_removes() {
        let table = Table::new();
        table.put(sym("a"), Value::Number(1.0));
        table.put(Value::Nil, Value::Number(2.0));
        check!(table.len() == 1);
        table.put(sym("a"), Value::Nil);
        assert!(table.is_empty());
    }

    #[test]
    fn struct_equality_ignores_order() {
        let a = Struct::from_pairs([
            (sym(":x"), Value::Number(1.0)),
            (sym(":y"), Value::Number(2.0)),
        ]);
        let b = Struct::from_pairs([
            (sym(":y"), Value::Number(2.0)),
            (sym(":x"), Value::Number(1.0)),
            (Value::Nil, Value::Number(3.0)),
        ]);
        check!(a == b);
    }
}
