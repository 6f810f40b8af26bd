//! Ordered x86 instruction sequence for one function body.

use exp_asm::Instruction;

/// Instructions in emission order.
///
/// The prologue is prepended once the body is complete (stack usage is only
/// known then), and call-site `rsp` adjustments are inserted at a recorded
/// offset, so the block supports cheap front and middle insertion.
#[derive(Debug, Default)]
pub struct X86Block {
    instructions: Vec<Instruction>,
}

impl X86Block {
    /// Append an instruction.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Prepend an instruction.
    pub fn prepend(&mut self, instruction: Instruction) {
        self.instructions.insert(0, instruction);
    }

    /// Insert at `offset`, shifting later instructions.
    pub fn insert(&mut self, offset: usize, instruction: Instruction) {
        self.instructions.insert(offset, instruction);
    }

    /// Offset the next appended instruction will occupy.
    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when no instruction was emitted.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterate in emission order.
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }
}
