//! Structured error reporting for the compilation pipeline.

use std::fmt;
use std::path::Path;

/// Everything the front end and the typechecker can reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, strum::EnumIter)]
pub enum ErrorKind {
    /// `(` expected.
    #[error("expected `(`")]
    ExpectedBeginParen,
    /// `)` expected.
    #[error("expected `)`")]
    ExpectedEndParen,
    /// `{` expected.
    #[error("expected `{{`")]
    ExpectedBeginBrace,
    /// `}` expected.
    #[error("expected `}}`")]
    ExpectedEndBrace,
    /// `;` expected.
    #[error("expected `;`")]
    ExpectedSemicolon,
    /// `:` expected.
    #[error("expected `:`")]
    ExpectedColon,
    /// `=` expected.
    #[error("expected `=`")]
    ExpectedEqual,
    /// An identifier was expected.
    #[error("expected an identifier")]
    ExpectedIdentifier,
    /// The `fn` keyword was expected.
    #[error("expected keyword `fn`")]
    ExpectedKeywordFn,
    /// A type was expected.
    #[error("expected a type")]
    ExpectedType,
    /// An expression was expected.
    #[error("expected an expression")]
    ExpectedExpression,
    /// A comment was left unterminated.
    #[error("expected `*/` closing the comment")]
    ExpectedEndComment,
    /// An integer literal does not fit the literal type.
    #[error("integer literal out of range")]
    IntegerLiteralOutOfRange,
    /// A referenced symbol has no definition.
    #[error("undefined symbol")]
    UndefinedSymbol,
    /// Two types were required to be equal and are not.
    #[error("type mismatch")]
    TypeMismatch,
    /// A non-function was called.
    #[error("type is not callable")]
    TypeNotCallable,
    /// A non-tuple was projected.
    #[error("type is not indexable")]
    TypeNotIndexable,
    /// A tuple was indexed by something other than an immediate integer.
    #[error("tuple index is not an immediate")]
    TupleIndexNotImmediate,
    /// A tuple was indexed outside `[0, len)`.
    #[error("tuple index out of bounds")]
    TupleIndexOutOfBounds,
    /// A call supplied the wrong number of arguments.
    #[error("argument count mismatch")]
    ArgumentCountMismatch,
    /// Typing a symbol required the symbol's own type.
    #[error("recursive symbol type")]
    RecursiveSymbolType,
}

/// One reported diagnostic: a kind plus the quoted source context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}: {kind}: {message}")]
pub struct SourceError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Quoted context, e.g. the offending token text or the two types.
    pub message: String,
    /// 1-based source line, or 0 when no location is known.
    pub line: u32,
}

impl SourceError {
    /// A diagnostic at a known line.
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }

    /// Render as `<path>:<line>: <kind>: <context>`.
    pub fn display_with_path<'a>(&'a self, path: &'a Path) -> impl fmt::Display + 'a {
        struct WithPath<'a> {
            error: &'a SourceError,
            path: &'a Path,
        }

        impl fmt::Display for WithPath<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", self.path.display(), self.error)
            }
        }

        WithPath { error: self, path }
    }
}

/// Top-level pipeline failure.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// One or more diagnostics were reported against the source.
    #[error("{} error(s) reported", .0.len())]
    Reported(Vec<SourceError>),
    /// The source or output file could not be accessed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_kind_renders() {
        for kind in ErrorKind::iter() {
            assert!(!kind.to_string().is_empty());
        }
    }

    #[test]
    fn path_prefixed_rendering() {
        let error = SourceError::new(ErrorKind::ExpectedSemicolon, "`return`", 3);
        let rendered = error.display_with_path(Path::new("demo.exp")).to_string();
        assert_eq!(rendered, "demo.exp:3: expected `;`: `return`");
    }
}
