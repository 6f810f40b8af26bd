use std::path::{Path, PathBuf};

use crate::function::Function;
use crate::interner::{Name, StringInterner};
use crate::symbol::{SymbolKind, SymbolTable};
use crate::types::TypeInterner;
use crate::value::{ConstantId, Constants, LabelId, Labels, Value};

/// The compilation context.
///
/// Single owner of the interners, pools, and the symbol table. Every phase
/// receives a mutable borrow and mutates through the methods below; there is
/// no global state.
#[derive(Debug)]
pub struct Context {
    /// Type interner.
    pub types: TypeInterner,
    /// String interner.
    pub strings: StringInterner,
    /// Constant pool.
    pub constants: Constants,
    /// Label list.
    pub labels: Labels,
    /// Global symbol table.
    pub symbols: SymbolTable,
    /// Path of the source being compiled, for diagnostics and directives.
    pub source_path: PathBuf,
    current_function: Option<Name>,
}

impl Context {
    /// Create a context for compiling `source_path`.
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            types: TypeInterner::new(),
            strings: StringInterner::new(),
            constants: Constants::default(),
            labels: Labels::default(),
            symbols: SymbolTable::default(),
            source_path: source_path.into(),
            current_function: None,
        }
    }

    /// Intern a string.
    pub fn intern(&mut self, text: &str) -> Name {
        self.strings.intern(text)
    }

    /// Append a constant, deduplicated.
    pub fn constants_push(&mut self, value: Value) -> ConstantId {
        self.constants.push(value)
    }

    /// Append a label, deduplicated.
    pub fn labels_push(&mut self, name: Name) -> LabelId {
        self.labels.push(name)
    }

    /// Begin building the body of the function named `name`.
    ///
    /// Marks the symbol as a function definition and points the IR-builder
    /// cursor at it.
    pub fn enter_function(&mut self, name: Name) -> &mut Function {
        let symbol = self.symbols.at(name);
        symbol.kind = SymbolKind::Function;
        self.current_function = Some(name);
        &mut symbol.function
    }

    /// Leave the function currently under construction.
    pub fn leave_function(&mut self) {
        self.current_function = None;
    }

    /// Name of the function currently under construction.
    pub fn current_function_name(&self) -> Option<Name> {
        self.current_function
    }

    /// The function currently under construction.
    ///
    /// Panics when called outside `enter_function`/`leave_function`; the
    /// parser is the only caller and always holds a current function.
    pub fn current_function_mut(&mut self) -> &mut Function {
        let name = self.current_function.expect("no function under construction");
        &mut self.symbols.at(name).function
    }

    /// Source path for diagnostics.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_function_defines_the_symbol() {
        let mut context = Context::new("test.exp");
        let name = context.intern("main");
        context.enter_function(name);

        let ssa = context.current_function_mut().declare_local();
        assert_eq!(ssa.index(), 0);

        context.leave_function();
        assert_eq!(
            context.symbols.get(name).unwrap().kind,
            SymbolKind::Function
        );
    }
}
