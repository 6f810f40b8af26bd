use std::collections::HashMap;
use std::fmt;

/// Handle to an interned string.
///
/// Two names compare equal iff the interned byte content is equal, which is
/// the interner's whole contract: identity comparison replaces content
/// comparison everywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(u32);

impl Name {
    /// Index into the interner's storage.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name#{}", self.0)
    }
}

/// Deduplicating store of owned strings.
///
/// Storage is append-only; a [`Name`] handed out once stays valid for the
/// interner's lifetime.
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, Name>,
}

impl StringInterner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, returning the existing handle when the content was
    /// seen before.
    pub fn intern(&mut self, text: &str) -> Name {
        if let Some(&name) = self.lookup.get(text) {
            return name;
        }

        let name = Name(u32::try_from(self.strings.len()).expect("interner overflow"));
        self.strings.push(text.into());
        self.lookup.insert(text.into(), name);
        name
    }

    /// Resolve a handle back to its content.
    pub fn resolve(&self, name: Name) -> &str {
        &self.strings[name.index()]
    }

    /// Number of distinct strings interned so far.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_content_yields_equal_names() {
        let mut interner = StringInterner::new();
        let a = interner.intern("main");
        let b = interner.intern("main");
        let c = interner.intern("other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "main");
        assert_eq!(interner.resolve(c), "other");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn names_survive_growth() {
        let mut interner = StringInterner::new();
        let first = interner.intern("f0");
        for i in 1..512 {
            interner.intern(&format!("f{i}"));
        }
        assert_eq!(interner.resolve(first), "f0");
        assert_eq!(interner.intern("f0"), first);
    }
}
