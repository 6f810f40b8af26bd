use crate::address::Address;
use crate::gpr::{Gpr, Width};

use exp_ir::{ConstantId, LabelId};

/// An x86 instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Sized register.
    Gpr(Gpr),
    /// Memory operand.
    Address(Address),
    /// Inline immediate.
    Immediate(i64),
    /// Global symbol, by label index.
    Label(LabelId),
    /// Scalar constant-pool reference, rendered as an immediate.
    Constant(ConstantId),
}

impl Operand {
    /// The operand's register width, when it is a register.
    pub const fn gpr_width(&self) -> Option<Width> {
        match self {
            Operand::Gpr(gpr) => Some(gpr.width),
            _ => None,
        }
    }
}

impl From<Gpr> for Operand {
    fn from(gpr: Gpr) -> Self {
        Operand::Gpr(gpr)
    }
}

impl From<Address> for Operand {
    fn from(address: Address) -> Self {
        Operand::Address(address)
    }
}

impl From<i64> for Operand {
    fn from(immediate: i64) -> Self {
        Operand::Immediate(immediate)
    }
}
