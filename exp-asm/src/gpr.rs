use std::fmt;

/// One of the sixteen general purpose registers, by encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum Reg {
    /// Accumulator; scalar return value, implicit `imul`/`idiv` operand.
    Rax = 0,
    /// Fourth System V integer argument.
    Rcx = 1,
    /// Third System V integer argument; high half of `imul`/`idiv`.
    Rdx = 2,
    /// Callee saved.
    Rbx = 3,
    /// Stack pointer. Never allocated.
    Rsp = 4,
    /// Frame pointer. Never allocated.
    Rbp = 5,
    /// Second System V integer argument.
    Rsi = 6,
    /// First System V integer argument.
    Rdi = 7,
    /// Fifth System V integer argument.
    R8 = 8,
    /// Sixth System V integer argument.
    R9 = 9,
    /// Caller saved.
    R10 = 10,
    /// Caller saved.
    R11 = 11,
    /// Callee saved.
    R12 = 12,
    /// Callee saved.
    R13 = 13,
    /// Callee saved.
    R14 = 14,
    /// Callee saved.
    R15 = 15,
}

/// System V integer argument registers, in consumption order.
pub const SYSV_ARGUMENT_SEQUENCE: [Reg; 6] =
    [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

const QUAD_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const LONG_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];

const WORD_NAMES: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];

const BYTE_NAMES: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];

impl Reg {
    /// Encoding index, `0..16`.
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Register for an encoding index.
    pub fn from_index(index: u8) -> Self {
        use strum::IntoEnumIterator;
        Self::iter().nth(index as usize).expect("register index out of range")
    }

    /// 64-bit register name without the `%` sigil.
    pub const fn quad_name(self) -> &'static str {
        QUAD_NAMES[self as usize]
    }
}

/// Operand width of a register or memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Width {
    /// One byte.
    Byte,
    /// Two bytes.
    Word,
    /// Four bytes.
    Long,
    /// Eight bytes.
    Quad,
}

impl Width {
    /// Width covering exactly `size` bytes.
    pub const fn from_size(size: u64) -> Option<Self> {
        match size {
            1 => Some(Width::Byte),
            2 => Some(Width::Word),
            4 => Some(Width::Long),
            8 => Some(Width::Quad),
            _ => None,
        }
    }

    /// Width in bytes.
    pub const fn size(self) -> u64 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Long => 4,
            Width::Quad => 8,
        }
    }

    /// AT&T mnemonic suffix.
    pub const fn suffix(self) -> char {
        match self {
            Width::Byte => 'b',
            Width::Word => 'w',
            Width::Long => 'l',
            Width::Quad => 'q',
        }
    }
}

/// A register together with the width it is accessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gpr {
    /// The register.
    pub reg: Reg,
    /// Access width.
    pub width: Width,
}

impl Gpr {
    /// A sized register.
    pub const fn new(reg: Reg, width: Width) -> Self {
        Self { reg, width }
    }

    /// The full 64-bit register.
    pub const fn quad(reg: Reg) -> Self {
        Self::new(reg, Width::Quad)
    }

    /// Same register at a different width.
    pub const fn resized(self, width: Width) -> Self {
        Self::new(self.reg, width)
    }

    /// AT&T name without the `%` sigil.
    pub const fn name(self) -> &'static str {
        match self.width {
            Width::Byte => BYTE_NAMES[self.reg as usize],
            Width::Word => WORD_NAMES[self.reg as usize],
            Width::Long => LONG_NAMES[self.reg as usize],
            Width::Quad => QUAD_NAMES[self.reg as usize],
        }
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Reg::Rax, Width::Quad, "%rax")]
    #[case(Reg::Rax, Width::Long, "%eax")]
    #[case(Reg::Rax, Width::Word, "%ax")]
    #[case(Reg::Rax, Width::Byte, "%al")]
    #[case(Reg::Rsi, Width::Byte, "%sil")]
    #[case(Reg::R9, Width::Long, "%r9d")]
    #[case(Reg::R15, Width::Word, "%r15w")]
    fn att_register_names(#[case] reg: Reg, #[case] width: Width, #[case] expected: &str) {
        assert_eq!(Gpr::new(reg, width).to_string(), expected);
    }

    #[test]
    fn index_round_trips() {
        use strum::IntoEnumIterator;
        for reg in Reg::iter() {
            assert_eq!(Reg::from_index(reg.index()), reg);
        }
    }

    #[test]
    fn widths_cover_scalar_sizes() {
        assert_eq!(Width::from_size(4), Some(Width::Long));
        assert_eq!(Width::from_size(3), None);
        assert_eq!(Width::Quad.suffix(), 'q');
    }
}
