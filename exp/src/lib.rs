//! Ahead-of-time compiler for the exp language.
//!
//! The pipeline is a straight line: parse into typed-SSA IR, typecheck,
//! compute lifetimes, select x86-64 instructions with linear-scan
//! allocation, and print GNU-assembler text. Everything is single threaded
//! and deterministic; compiling the same source twice yields byte-identical
//! assembly.

#![warn(missing_docs)]

pub mod codegen;
pub mod emit;
pub mod error;
pub mod frontend;
pub mod lifetimes;
pub mod typecheck;

use std::path::Path;

use tracing::debug;

pub use error::{CompileError, ErrorKind, SourceError};
pub use exp_ir::Context;

/// Compile `source` to x86-64 GNU-assembler text.
///
/// `source_path` only feeds diagnostics and the `.file` directive.
pub fn compile(source: &str, source_path: impl AsRef<Path>) -> Result<String, CompileError> {
    let mut context = Context::new(source_path.as_ref());

    frontend::parse(source, &mut context)
        .map_err(|error| CompileError::Reported(vec![error]))?;
    debug!(symbols = context.symbols.len(), "parsed");

    typecheck::typecheck(&mut context).map_err(CompileError::Reported)?;

    let functions = codegen::codegen(&mut context);
    Ok(emit::emit(&context, &functions))
}

/// Compile the file at `source_path`, writing `<source>.s` next to it (or
/// to `output_path` when given). Returns the path written.
pub fn compile_file(
    source_path: &Path,
    output_path: Option<&Path>,
) -> Result<std::path::PathBuf, CompileError> {
    let source = std::fs::read_to_string(source_path)?;
    let assembly = compile(&source, source_path)?;

    let output = match output_path {
        Some(path) => path.to_path_buf(),
        None => source_path.with_extension("s"),
    };
    std::fs::write(&output, assembly)?;
    Ok(output)
}
