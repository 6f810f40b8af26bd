use crate::instruction::{Block, Instruction};
use crate::interner::Name;
use crate::types::TypeId;

/// Index of an SSA local within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SsaId(u32);

impl SsaId {
    /// Index into the function's locals.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Construct from a raw SSA number.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Block-relative lifetime of an SSA local.
///
/// `first_def` is the index of the defining instruction; `last_use` the
/// largest index of any instruction reading the local, or `first_def` when
/// the local is never read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Defining instruction index.
    pub first_def: u32,
    /// Last reading instruction index.
    pub last_use: u32,
}

/// An SSA local of a function.
#[derive(Debug, Clone)]
pub struct Local {
    /// The local's SSA number.
    pub ssa: SsaId,
    /// Source name, present for formal arguments and `const` bindings.
    pub name: Option<Name>,
    /// Assigned by the typechecker.
    pub ty: Option<TypeId>,
    /// Assigned by lifetime analysis.
    pub lifetime: Interval,
}

/// A formal argument: a named local bound at function entry.
#[derive(Debug, Clone, Copy)]
pub struct FormalArgument {
    /// The argument's SSA number.
    pub ssa: SsaId,
    /// Source name.
    pub name: Name,
    /// Annotated type.
    pub ty: TypeId,
}

/// A function under construction or compilation.
#[derive(Debug, Default, Clone)]
pub struct Function {
    /// Formal arguments, in declaration order.
    pub arguments: Vec<FormalArgument>,
    /// Annotated or inferred return type.
    pub return_type: Option<TypeId>,
    /// Every SSA local, indexed by [`SsaId`].
    locals: Vec<Local>,
    /// The function body.
    pub block: Block,
}

impl Function {
    /// Declare a fresh anonymous SSA local.
    pub fn declare_local(&mut self) -> SsaId {
        let ssa = SsaId(u32::try_from(self.locals.len()).expect("ssa overflow"));
        self.locals.push(Local {
            ssa,
            name: None,
            ty: None,
            lifetime: Interval::default(),
        });
        ssa
    }

    /// Declare a formal argument. Arguments occupy the lowest SSA numbers.
    pub fn declare_argument(&mut self, name: Name, ty: TypeId) -> SsaId {
        let ssa = self.declare_local();
        let local = &mut self.locals[ssa.index()];
        local.name = Some(name);
        local.ty = Some(ty);
        self.arguments.push(FormalArgument { ssa, name, ty });
        ssa
    }

    /// Borrow a local.
    pub fn local_at(&self, ssa: SsaId) -> &Local {
        &self.locals[ssa.index()]
    }

    /// Mutably borrow a local.
    pub fn local_at_mut(&mut self, ssa: SsaId) -> &mut Local {
        &mut self.locals[ssa.index()]
    }

    /// Look up a named local.
    pub fn local_named(&self, name: Name) -> Option<&Local> {
        self.locals.iter().find(|local| local.name == Some(name))
    }

    /// All locals in SSA order.
    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    /// Number of declared locals (arguments included).
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Append an instruction to the body.
    ///
    /// A defining instruction must write the most recently declared local;
    /// this is what makes SSA numbers dense and definition-ordered.
    pub fn append(&mut self, instruction: Instruction) {
        if let Some(dst) = instruction.def() {
            debug_assert_eq!(
                dst.index() + 1,
                self.locals.len(),
                "definition of a stale SSA local"
            );
        }
        self.block.push(instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operand;
    use crate::value::Scalar;

    #[test]
    fn locals_are_densely_numbered() {
        let mut function = Function::default();
        let a = function.declare_local();
        let b = function.declare_local();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(function.local_count(), 2);
    }

    #[test]
    fn append_accepts_a_fresh_definition() {
        let mut function = Function::default();
        let dst = function.declare_local();
        function.append(Instruction::Load {
            dst,
            src: Operand::Immediate(Scalar::I32(7)),
        });
        assert_eq!(function.block.len(), 1);
    }
}
