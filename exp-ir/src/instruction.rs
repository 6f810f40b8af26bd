use std::fmt;

use crate::function::SsaId;
use crate::value::{ConstantId, LabelId, Scalar};

/// An instruction operand.
///
/// Immediates are carried inline when they fit a scalar; larger values are
/// promoted to the constant pool by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Reference to an SSA local of the enclosing function.
    Ssa(SsaId),
    /// Reference into the constant pool.
    Constant(ConstantId),
    /// Reference to a global symbol by label index.
    Label(LabelId),
    /// Inline scalar immediate.
    Immediate(Scalar),
}

/// Instruction discriminant, used for dispatch traces and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    /// `A <- B`
    Load,
    /// `A <- -B`
    Negate,
    /// `A <- B + C`
    Add,
    /// `A <- B - C`
    Sub,
    /// `A <- B * C`
    Mul,
    /// `A <- B / C`
    Div,
    /// `A <- B % C`
    Rem,
    /// `A <- B.C`, `C` an immediate element index
    Dot,
    /// `A <- B(C)`, `C` a constant tuple of arguments
    Call,
    /// `return B`
    Return,
}

/// A three-address SSA instruction.
///
/// Every defining variant writes a fresh SSA local (invariant: the local was
/// declared immediately before the instruction was appended); `Return` is
/// the only non-defining opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Copy a value into a fresh local.
    Load {
        /// Defined local.
        dst: SsaId,
        /// Source operand.
        src: Operand,
    },
    /// Arithmetic negation.
    Negate {
        /// Defined local.
        dst: SsaId,
        /// Negated operand.
        src: Operand,
    },
    /// Addition.
    Add {
        /// Defined local.
        dst: SsaId,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Subtraction.
    Sub {
        /// Defined local.
        dst: SsaId,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Multiplication.
    Mul {
        /// Defined local.
        dst: SsaId,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Division.
    Div {
        /// Defined local.
        dst: SsaId,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Remainder.
    Rem {
        /// Defined local.
        dst: SsaId,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Tuple element projection.
    Dot {
        /// Defined local.
        dst: SsaId,
        /// Tuple operand.
        tuple: Operand,
        /// Element index; must be an inline `i32` immediate.
        index: Operand,
    },
    /// Function call.
    Call {
        /// Defined local receiving the result.
        dst: SsaId,
        /// Callee; a label operand.
        callee: Operand,
        /// Arguments; a constant tuple operand.
        arguments: Operand,
    },
    /// Return from the enclosing function.
    Return {
        /// Returned operand.
        value: Operand,
    },
}

impl Instruction {
    /// The instruction's discriminant.
    pub const fn opcode(&self) -> Opcode {
        match self {
            Instruction::Load { .. } => Opcode::Load,
            Instruction::Negate { .. } => Opcode::Negate,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Mul { .. } => Opcode::Mul,
            Instruction::Div { .. } => Opcode::Div,
            Instruction::Rem { .. } => Opcode::Rem,
            Instruction::Dot { .. } => Opcode::Dot,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Return { .. } => Opcode::Return,
        }
    }

    /// The SSA local this instruction defines, if any.
    pub const fn def(&self) -> Option<SsaId> {
        match *self {
            Instruction::Load { dst, .. }
            | Instruction::Negate { dst, .. }
            | Instruction::Add { dst, .. }
            | Instruction::Sub { dst, .. }
            | Instruction::Mul { dst, .. }
            | Instruction::Div { dst, .. }
            | Instruction::Rem { dst, .. }
            | Instruction::Dot { dst, .. }
            | Instruction::Call { dst, .. } => Some(dst),
            Instruction::Return { .. } => None,
        }
    }

    /// The instruction's source operands in `(B, C)` position.
    pub fn operands(&self) -> (Option<&Operand>, Option<&Operand>) {
        match self {
            Instruction::Load { src, .. } | Instruction::Negate { src, .. } => (Some(src), None),
            Instruction::Add { lhs, rhs, .. }
            | Instruction::Sub { lhs, rhs, .. }
            | Instruction::Mul { lhs, rhs, .. }
            | Instruction::Div { lhs, rhs, .. }
            | Instruction::Rem { lhs, rhs, .. } => (Some(lhs), Some(rhs)),
            Instruction::Dot { tuple, index, .. } => (Some(tuple), Some(index)),
            Instruction::Call {
                callee, arguments, ..
            } => (Some(callee), Some(arguments)),
            Instruction::Return { value } => (Some(value), None),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode())?;
        if let Some(dst) = self.def() {
            write!(f, " %{}", dst.index())?;
        }
        let (b, c) = self.operands();
        for operand in [b, c].into_iter().flatten() {
            match operand {
                Operand::Ssa(ssa) => write!(f, " %{}", ssa.index())?,
                Operand::Constant(id) => write!(f, " const[{}]", id.index())?,
                Operand::Label(id) => write!(f, " label[{}]", id.index())?,
                Operand::Immediate(scalar) => write!(f, " {scalar}")?,
            }
        }
        Ok(())
    }
}

/// Ordered sequence of instructions forming a function body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Block {
    instructions: Vec<Instruction>,
}

impl Block {
    /// Append an instruction.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True for a body with no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterate the instructions in program order.
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    /// Instruction at `index`.
    pub fn get(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }
}

impl<'a> IntoIterator for &'a Block {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}
