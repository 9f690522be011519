use core::fmt;
use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// An interned name.
///
/// Symbols are shared by every compilation in the process, so two symbols with
/// the same text always compare equal no matter which reader produced them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    pub fn intern(name: impl AsRef<str>) -> Self {
        Self(INTERNER.get_or_intern(name.as_ref()))
    }

    pub fn as_str(self) -> &'static str {
        LazyLock::force(&INTERNER).resolve(&self.0)
    }

    /// Symbols written with a leading `:` evaluate to themselves.
    pub fn is_keyword(self) -> bool {
        self.as_str().starts_with(':')
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::intern(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Symbol;
    use assert2::check;

    #[test]
    fn interning_is_stable() {
        check!(Symbol::intern("while") == Symbol::intern("while"));
        check!(Symbol::intern("while") != Symbol::intern("whilst"));
        check!(Symbol::intern("fn").as_str() == "fn");
    }

    #[test]
    fn keywords() {
        check!(Symbol::intern(":value").is_keyword());
        check!(Symbol::intern(":=").is_keyword());
        check!(!Symbol::intern("doc").is_keyword());
    }
}
