//! Global String Interner
//!
//! Maps parameter and switch names to compact [`Symbol`]s so override tables
//! compare and hash integers instead of strings.
//!
//! Symbol values depend on interning order and are only meaningful inside
//! one process. Anything that feeds a persistent hash must resolve symbols
//! back to strings first.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact interned string identifier.
pub type Symbol = Spur;

/// Interns `s`, returning the existing symbol if it was seen before.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up the symbol of an already interned string without allocating.
#[inline]
#[must_use]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
#[must_use]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = intern("BaseColor");
        let b = intern("BaseColor");
        assert_eq!(a, b);
        assert_eq!(resolve(a), "BaseColor");
        assert_eq!(get("BaseColor"), Some(a));
    }

    #[test]
    fn test_get_does_not_intern() {
        assert!(get("never-interned-name-7d1f").is_none());
    }
}
