//! The core library: natives every context starts with.
use super::{Native, NativeResult, RuntimeErrorKind};
use crate::{
    compiler::{Binding, Environment},
    value::{Array, Symbol, Tuple, TupleKind, Value},
};

const NATIVES: &[(Native, &str)] = &[
    (native("+", add), "(+ & xs)\n\nSum of the numbers xs."),
    (native("-", subtract), "(- x & xs)\n\nSubtracts xs from x, or negates x."),
    (native("*", multiply), "(* & xs)\n\nProduct of the numbers xs."),
    (native("/", divide), "(/ x & xs)\n\nDivides x by xs, or inverts x."),
    (native("<", less), "(< & xs)\n\nTrue if xs are strictly ascending."),
    (native("<=", less_equal), "(<= & xs)\n\nTrue if xs are ascending."),
    (native(">", greater), "(> & xs)\n\nTrue if xs are strictly descending."),
    (native(">=", greater_equal), "(>= & xs)\n\nTrue if xs are descending."),
    (native("=", equal), "(= & xs)\n\nTrue if all xs are equal."),
    (native("not", not), "(not x)\n\nTrue if x is false or nil."),
    (native("length", length), "(length ds)\n\nNumber of items in a data structure or bytes in a string."),
    (native("array", array), "(array & items)\n\nA new array of items."),
    (native("tuple", tuple), "(tuple & items)\n\nA new tuple of items."),
    (native("push", push), "(push arr & items)\n\nAppends items to arr and returns it."),
    (native("get", get_native), "(get ds key)\n\nValue of key in ds, or nil."),
    (native("put", put_native), "(put ds key value)\n\nSets key in ds to value and returns ds."),
    (native("type", type_of), "(type x)\n\nThe type of x as a keyword."),
];

const fn native(name: &'static str, call: fn(&[Value]) -> NativeResult) -> Native {
    Native { name, call }
}

/// Defines every core native in `env`.
pub fn install(env: &mut Environment) {
    for (native, doc) in NATIVES {
        env.define(
            Symbol::intern(native.name),
            Binding::constant(Value::Native(*native), doc),
        );
    }
}

fn number(value: &Value) -> Result<f64, RuntimeErrorKind> {
    value.as_number().ok_or(RuntimeErrorKind::Type {
        expected: "number",
        got: value.type_name(),
    })
}

fn numbers(args: &[Value]) -> Result<Vec<f64>, RuntimeErrorKind> {
    args.iter().map(number).collect()
}

fn arity(name: &str, expected: u32, args: &[Value]) -> Result<(), RuntimeErrorKind> {
    if args.len() == expected as usize {
        return Ok(());
    }
    Err(RuntimeErrorKind::Arity {
        name: name.to_owned(),
        expected,
        got: args.len(),
    })
}

fn add(args: &[Value]) -> NativeResult {
    Ok(Value::Number(numbers(args)?.into_iter().sum()))
}

fn multiply(args: &[Value]) -> NativeResult {
    Ok(Value::Number(numbers(args)?.into_iter().product()))
}

fn fold_inverse(
    name: &str,
    args: &[Value],
    identity: f64,
    op: fn(f64, f64) -> f64,
) -> NativeResult {
    match numbers(args)?.as_slice() {
        [] => Err(RuntimeErrorKind::Arity {
            name: name.to_owned(),
            expected: 1,
            got: 0,
        }),
        [only] => Ok(Value::Number(op(identity, *only))),
        [first, rest @ ..] => Ok(Value::Number(rest.iter().fold(*first, |acc, n| op(acc, *n)))),
    }
}

fn subtract(args: &[Value]) -> NativeResult {
    fold_inverse("-", args, 0.0, |a, b| a - b)
}

fn divide(args: &[Value]) -> NativeResult {
    fold_inverse("/", args, 1.0, |a, b| a / b)
}

fn compare(args: &[Value], ok: fn(f64, f64) -> bool) -> NativeResult {
    let numbers = numbers(args)?;
    Ok(Value::Boolean(numbers.windows(2).all(|pair| ok(pair[0], pair[1]))))
}

fn less(args: &[Value]) -> NativeResult {
    compare(args, |a, b| a < b)
}

fn less_equal(args: &[Value]) -> NativeResult {
    compare(args, |a, b| a <= b)
}

fn greater(args: &[Value]) -> NativeResult {
    compare(args, |a, b| a > b)
}

fn greater_equal(args: &[Value]) -> NativeResult {
    compare(args, |a, b| a >= b)
}

fn equal(args: &[Value]) -> NativeResult {
    Ok(Value::Boolean(args.windows(2).all(|pair| pair[0] == pair[1])))
}

fn not(args: &[Value]) -> NativeResult {
    arity("not", 1, args)?;
    Ok(Value::Boolean(!args[0].is_truthy()))
}

fn length(args: &[Value]) -> NativeResult {
    arity("length", 1, args)?;
    let len = match &args[0] {
        Value::String(s) => s.len(),
        Value::Tuple(tuple) => tuple.len(),
        Value::Array(array) => array.len(),
        Value::Struct(st) => st.len(),
        Value::Table(table) => table.len(),
        other => {
            return Err(RuntimeErrorKind::Type {
                expected: "data structure",
                got: other.type_name(),
            })
        }
    };
    Ok(Value::Number(len as f64))
}

fn array(args: &[Value]) -> NativeResult {
    Ok(Value::Array(Array::new(args.to_vec())))
}

fn tuple(args: &[Value]) -> NativeResult {
    Ok(Value::Tuple(Tuple::new(args.iter().cloned(), TupleKind::Brackets)))
}

fn push(args: &[Value]) -> NativeResult {
    let Some((Value::Array(target), items)) = args.split_first() else {
        return Err(RuntimeErrorKind::Type {
            expected: "array",
            got: args.first().map_or("nothing", Value::type_name),
        });
    };
    for item in items {
        target.push(item.clone());
    }
    Ok(Value::Array(target.clone()))
}

fn get_native(args: &[Value]) -> NativeResult {
    arity("get", 2, args)?;
    get(&args[0], &args[1])
}

fn put_native(args: &[Value]) -> NativeResult {
    arity("put", 3, args)?;
    put(&args[0], args[1].clone(), args[2].clone())?;
    Ok(args[0].clone())
}

fn type_of(args: &[Value]) -> NativeResult {
    arity("type", 1, args)?;
    Ok(Value::symbol(&format!(":{}", args[0].type_name())))
}

fn index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Looks `key` up in `ds`. Missing keys and out-of-range indices give nil.
pub fn get(ds: &Value, key: &Value) -> NativeResult {
    Ok(match ds {
        Value::Nil => Value::Nil,
        Value::Tuple(tuple) => index(key)
            .and_then(|index| tuple.items().get(index).cloned())
            .unwrap_or_default(),
        Value::Array(array) => index(key)
            .and_then(|index| array.get(index))
            .unwrap_or_default(),
        Value::String(s) => index(key)
            .and_then(|index| s.as_bytes().get(index))
            .map_or(Value::Nil, |byte| Value::Number(f64::from(*byte))),
        Value::Struct(st) => st.get(key).cloned().unwrap_or_default(),
        Value::Table(table) => table.get(key).unwrap_or_default(),
        other => {
            return Err(RuntimeErrorKind::Type {
                expected: "data structure",
                got: other.type_name(),
            })
        }
    })
}

/// Stores `value` under `key` in a mutable `ds`. Arrays grow by at most one item at a time.
pub fn put(ds: &Value, key: Value, value: Value) -> Result<(), RuntimeErrorKind> {
    match ds {
        Value::Array(array) => {
            let Some(index) = index(&key) else {
                return Err(RuntimeErrorKind::Type {
                    expected: "array index",
                    got: key.type_name(),
                });
            };
            let len = array.len();
            if !array.put(index, value) {
                return Err(RuntimeErrorKind::OutOfRange { index, len });
            }
        }
        Value::Table(table) => table.put(key, value),
        other => return Err(RuntimeErrorKind::CannotPut(other.type_name())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{get, install, put, NATIVES};
    use crate::{
        compiler::Environment,
        runtime::RuntimeErrorKind,
        value::{Table, Value},
    };
    use assert2::{check, let_assert};

    fn call(name: &str, args: &[Value]) -> Result<Value, RuntimeErrorKind> {
        let (native, _) = NATIVES
            .iter()
            .find(|(native, _)| native.name == name)
            .expect("no such native");
        (native.call)(args)
    }

    fn numbers(ns: &[f64]) -> Vec<Value> {
        ns.iter().copied().map(Value::Number).collect()
    }

    #[test]
    fn arithmetic() {
        check!(call("+", &[]) == Ok(Value::Number(0.0)));
        check!(call("+", &numbers(&[1.0, 2.0, 3.0])) == Ok(Value::Number(6.0)));
        check!(call("-", &numbers(&[5.0])) == Ok(Value::Number(-5.0)));
        check!(call("-", &numbers(&[5.0, 1.0, 1.0])) == Ok(Value::Number(3.0)));
        check!(call("*", &numbers(&[2.0, 4.0])) == Ok(Value::Number(8.0)));
        check!(call("/", &numbers(&[4.0])) == Ok(Value::Number(0.25)));
        let_assert!(Err(RuntimeErrorKind::Type { expected: "number", got: "string" }) = call("+", &[Value::from("1")]));
    }

    #[test]
    fn comparisons_chain() {
        check!(call("<", &numbers(&[1.0, 2.0, 3.0])) == Ok(Value::Boolean(true)));
        check!(call("<", &numbers(&[1.0, 3.0, 2.0])) == Ok(Value::Boolean(false)));
        check!(call(">=", &numbers(&[3.0, 3.0, 1.0])) == Ok(Value::Boolean(true)));
        check!(call("=", &[Value::from("a"), Value::from("a")]) == Ok(Value::Boolean(true)));
        check!(call("not", &[Value::Nil]) == Ok(Value::Boolean(true)));
    }

    #[test]
    fn data_structures() {
        let array = Value::array(numbers(&[1.0]));
        check!(call("push", &[array.clone(), Value::Number(2.0)]) == Ok(array.clone()));
        check!(call("length", &[array.clone()]) == Ok(Value::Number(2.0)));
        check!(get(&array, &Value::Number(1.0)) == Ok(Value::Number(2.0)));
        check!(get(&array, &Value::Number(7.0)) == Ok(Value::Nil));
        check!(put(&array, Value::Number(2.0), Value::Nil).is_ok());
        check!(put(&array, Value::Number(9.0), Value::Nil).is_err());
        check!(put(&Value::brackets([]), Value::Number(0.0), Value::Nil) == Err(RuntimeErrorKind::CannotPut("tuple")));

        let table = Table::new();
        let table = Value::Table(table);
        check!(call("put", &[table.clone(), Value::symbol(":a"), Value::Number(1.0)]) == Ok(table.clone()));
        check!(get(&table, &Value::symbol(":a")) == Ok(Value::Number(1.0)));
        check!(get(&Value::Number(1.0), &Value::Nil).is_err());
    }

    #[test]
    fn install_defines_docs() {
        let mut env = Environment::new();
        install(&mut env);
        let_assert!(Some(binding) = env.lookup("+"));
        check!(binding.doc().is_some_and(|doc| doc.starts_with("(+ & xs)")));
    }
}
