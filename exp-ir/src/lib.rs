//! Typed SSA intermediate representation and environment of the exp compiler.
//!
//! The crate owns everything the front end and the back end communicate
//! through: interned types and names, the constant pool, the three-address
//! SSA instruction stream, the global symbol table, and the [`Context`]
//! that ties them together.

#![warn(missing_docs)]

mod context;
mod function;
mod instruction;
mod interner;
mod symbol;
mod types;
mod value;

pub use context::Context;
pub use function::{FormalArgument, Function, Interval, Local, SsaId};
pub use instruction::{Block, Instruction, Opcode, Operand};
pub use interner::{Name, StringInterner};
pub use symbol::{Symbol, SymbolKind, SymbolTable};
pub use types::{FunctionType, TupleType, Type, TypeId, TypeInterner};
pub use value::{ConstantId, Constants, LabelId, Labels, Scalar, Tuple, Value};
