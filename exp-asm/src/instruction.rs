use std::fmt::{self, Write};

use crate::address::Address;
use crate::gpr::{Gpr, Reg, Width};
use crate::operand::Operand;

use exp_ir::{ConstantId, LabelId};

/// Resolves pool-indexed operands to their printable form.
///
/// Label and constant operands carry indices into the compilation unit's
/// pools; the emitter implements this trait over its context.
pub trait OperandResolver {
    /// Symbol name for a label operand.
    fn label_name(&self, label: LabelId) -> &str;
    /// Immediate value of a scalar constant operand.
    fn constant_value(&self, constant: ConstantId) -> i64;
}

/// An x86-64 instruction as emitted by instruction selection.
///
/// Binary forms store the AT&T destination separately from the source; the
/// renderer prints `src, dst` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Push a 64-bit register.
    Push(Reg),
    /// Pop into a 64-bit register.
    Pop(Reg),
    /// Move.
    Mov {
        /// Access width.
        width: Width,
        /// Destination.
        dst: Operand,
        /// Source.
        src: Operand,
    },
    /// Load effective address.
    Lea {
        /// Destination register.
        dst: Gpr,
        /// Address whose effective value is taken.
        src: Address,
    },
    /// Two's complement negation in place.
    Neg {
        /// Access width.
        width: Width,
        /// Negated operand.
        operand: Operand,
    },
    /// Addition into `dst`.
    Add {
        /// Access width.
        width: Width,
        /// Destination and left operand.
        dst: Operand,
        /// Right operand.
        src: Operand,
    },
    /// Subtraction from `dst`.
    Sub {
        /// Access width.
        width: Width,
        /// Destination and left operand.
        dst: Operand,
        /// Right operand.
        src: Operand,
    },
    /// One-operand signed multiply: `rDX:rAX <- rAX * src`.
    IMul {
        /// Access width.
        width: Width,
        /// Multiplier.
        src: Operand,
    },
    /// One-operand signed divide: quotient to `rAX`, remainder to `rDX`.
    IDiv {
        /// Access width.
        width: Width,
        /// Divisor.
        src: Operand,
    },
    /// Near call of a global symbol.
    Call(LabelId),
    /// Near return.
    Ret,
}

impl Instruction {
    /// `mov` with an explicit access width.
    pub const fn mov(width: Width, dst: Operand, src: Operand) -> Self {
        Instruction::Mov { width, dst, src }
    }

    /// `lea` of `src` into `dst`.
    pub const fn lea(dst: Gpr, src: Address) -> Self {
        Instruction::Lea { dst, src }
    }

    /// In-place negation.
    pub const fn neg(width: Width, operand: Operand) -> Self {
        Instruction::Neg { width, operand }
    }

    /// `add src, dst`.
    pub const fn add(width: Width, dst: Operand, src: Operand) -> Self {
        Instruction::Add { width, dst, src }
    }

    /// `sub src, dst`.
    pub const fn sub(width: Width, dst: Operand, src: Operand) -> Self {
        Instruction::Sub { width, dst, src }
    }

    /// One-operand `imul`.
    pub const fn imul(width: Width, src: Operand) -> Self {
        Instruction::IMul { width, src }
    }

    /// One-operand `idiv`.
    pub const fn idiv(width: Width, src: Operand) -> Self {
        Instruction::IDiv { width, src }
    }

    /// Render in AT&T syntax, without a trailing newline.
    pub fn write_att(
        &self,
        out: &mut String,
        resolver: &dyn OperandResolver,
    ) -> fmt::Result {
        match self {
            Instruction::Push(reg) => write!(out, "pushq\t%{}", reg.quad_name()),
            Instruction::Pop(reg) => write!(out, "popq\t%{}", reg.quad_name()),
            Instruction::Mov { width, dst, src } => {
                write!(out, "mov{}\t", width.suffix())?;
                write_operand(out, src, resolver)?;
                out.push_str(", ");
                write_operand(out, dst, resolver)
            }
            Instruction::Lea { dst, src } => write!(out, "leaq\t{src}, {dst}"),
            Instruction::Neg { width, operand } => {
                write!(out, "neg{}\t", width.suffix())?;
                write_operand(out, operand, resolver)
            }
            Instruction::Add { width, dst, src } => {
                write!(out, "add{}\t", width.suffix())?;
                write_operand(out, src, resolver)?;
                out.push_str(", ");
                write_operand(out, dst, resolver)
            }
            Instruction::Sub { width, dst, src } => {
                write!(out, "sub{}\t", width.suffix())?;
                write_operand(out, src, resolver)?;
                out.push_str(", ");
                write_operand(out, dst, resolver)
            }
            Instruction::IMul { width, src } => {
                write!(out, "imul{}\t", width.suffix())?;
                write_operand(out, src, resolver)
            }
            Instruction::IDiv { width, src } => {
                write!(out, "idiv{}\t", width.suffix())?;
                write_operand(out, src, resolver)
            }
            Instruction::Call(label) => write!(out, "call\t{}", resolver.label_name(*label)),
            Instruction::Ret => out.write_str("ret"),
        }
    }
}

fn write_operand(
    out: &mut String,
    operand: &Operand,
    resolver: &dyn OperandResolver,
) -> fmt::Result {
    match operand {
        Operand::Gpr(gpr) => write!(out, "{gpr}"),
        Operand::Address(address) => write!(out, "{address}"),
        Operand::Immediate(value) => write!(out, "${value}"),
        Operand::Label(label) => out.write_str(resolver.label_name(*label)),
        Operand::Constant(constant) => {
            write!(out, "${}", resolver.constant_value(*constant))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoPools;

    impl OperandResolver for NoPools {
        fn label_name(&self, _label: LabelId) -> &str {
            unreachable!("test emits no label operands")
        }

        fn constant_value(&self, _constant: ConstantId) -> i64 {
            unreachable!("test emits no constant operands")
        }
    }

    fn render(instruction: Instruction) -> String {
        let mut out = String::new();
        instruction.write_att(&mut out, &NoPools).unwrap();
        out
    }

    #[test]
    fn att_operand_order_is_src_dst() {
        let eax = Operand::Gpr(Gpr::new(Reg::Rax, Width::Long));
        assert_eq!(render(Instruction::mov(Width::Long, eax, 7.into())), "movl\t$7, %eax");
        assert_eq!(
            render(Instruction::sub(
                Width::Long,
                eax,
                Operand::Address(Address::new(Reg::Rbp, -4))
            )),
            "subl\t-4(%rbp), %eax"
        );
    }

    #[test]
    fn prologue_shapes() {
        assert_eq!(render(Instruction::Push(Reg::Rbp)), "pushq\t%rbp");
        assert_eq!(
            render(Instruction::mov(
                Width::Quad,
                Operand::Gpr(Gpr::quad(Reg::Rbp)),
                Operand::Gpr(Gpr::quad(Reg::Rsp)),
            )),
            "movq\t%rsp, %rbp"
        );
        assert_eq!(render(Instruction::Ret), "ret");
    }

    #[test]
    fn implicit_operand_forms() {
        let divisor = Operand::Gpr(Gpr::new(Reg::Rcx, Width::Long));
        assert_eq!(render(Instruction::idiv(Width::Long, divisor)), "idivl\t%ecx");
        assert_eq!(render(Instruction::imul(Width::Long, divisor)), "imull\t%ecx");
    }
}
