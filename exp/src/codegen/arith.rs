//! Lowering of the arithmetic opcodes.
//!
//! `add`/`sub` are two-operand instructions, so the destination is renamed
//! from an input whenever that input dies here. `imul`/`idiv` bind `rax` and
//! `rdx`, so those lowerings choreograph the pool around the fixed
//! registers. The destination of an arithmetic instruction is only ever a
//! memory operand when that memory is the new local's own storage.

use exp_asm::{Gpr, Instruction as X86Instruction, Operand as X86Operand, Reg, Width};
use exp_ir::{Operand, SsaId};

use super::allocator::AllocationId;
use super::FunctionCodegen;

/// `NEGATE A, B`.
pub(super) fn negate(cg: &mut FunctionCodegen, dst: SsaId, src: &Operand, index: u32) {
    let a = match src {
        Operand::Ssa(ssa) => {
            let active = cg.allocator.allocation_of(*ssa);
            cg.allocate_from_active(dst, active, index)
        }
        _ => {
            let a = cg.allocate(dst, index);
            let width = cg.allocator.get(a).width();
            let dst_op = cg.allocator.operand(a);
            let src_op = cg.x86_source(src);
            cg.block.push(X86Instruction::mov(width, dst_op, src_op));
            a
        }
    };

    let width = cg.allocator.get(a).width();
    let operand = cg.allocator.operand(a);
    cg.block.push(X86Instruction::neg(width, operand));
}

/// `ADD A, B, C`.
pub(super) fn add(cg: &mut FunctionCodegen, dst: SsaId, lhs: &Operand, rhs: &Operand, index: u32) {
    match (lhs, rhs) {
        (Operand::Ssa(b), Operand::Ssa(c)) => {
            let b = cg.allocator.allocation_of(*b);
            let c = cg.allocator.allocation_of(*c);

            // Prefer renaming the destination from whichever input already
            // sits in a register, keeping the result register resident.
            if !cg.allocator.get(b).location.is_address() {
                let a = cg.allocate_from_active(dst, b, index);
                let src = cg.allocator.operand(c);
                emit_binary(cg, Mnemonic::Add, a, src);
                return;
            }
            if !cg.allocator.get(c).location.is_address() {
                let a = cg.allocate_from_active(dst, c, index);
                let src = cg.allocator.operand(b);
                emit_binary(cg, Mnemonic::Add, a, src);
                return;
            }

            // Both inputs are memory resident. The destination must be a
            // register so no still-live memory operand is written through.
            let a = cg.allocate_to_any_gpr(dst);
            let (moved, added) = if cg.allocator.get(b).lifetime.last_use
                <= cg.allocator.get(c).lifetime.last_use
            {
                (c, b)
            } else {
                (b, c)
            };
            emit_move_from(cg, a, moved);
            let src = cg.allocator.operand(added);
            emit_binary(cg, Mnemonic::Add, a, src);
        }
        (Operand::Ssa(b), other) | (other, Operand::Ssa(b)) => {
            let b = cg.allocator.allocation_of(*b);
            let a = cg.allocate_from_active(dst, b, index);
            let src = cg.x86_source(other);
            emit_binary(cg, Mnemonic::Add, a, src);
        }
        _ => {
            let a = cg.allocate(dst, index);
            let width = cg.allocator.get(a).width();
            let dst_op = cg.allocator.operand(a);
            let lhs_op = cg.x86_source(lhs);
            let rhs_op = cg.x86_source(rhs);
            cg.block.push(X86Instruction::mov(width, dst_op, lhs_op));
            cg.block.push(X86Instruction::add(width, dst_op, rhs_op));
        }
    }
}

/// `SUB A, B, C`. Subtraction is not commutative: the destination is always
/// renamed from (or initialized with) the left operand.
pub(super) fn sub(cg: &mut FunctionCodegen, dst: SsaId, lhs: &Operand, rhs: &Operand, index: u32) {
    match (lhs, rhs) {
        (Operand::Ssa(b), Operand::Ssa(c)) => {
            let b = cg.allocator.allocation_of(*b);
            let c = cg.allocator.allocation_of(*c);

            if !cg.allocator.get(b).location.is_address()
                || !cg.allocator.get(c).location.is_address()
            {
                let a = cg.allocate_from_active(dst, b, index);
                let src = cg.allocator.operand(c);
                emit_binary(cg, Mnemonic::Sub, a, src);
                return;
            }

            let a = cg.allocate_to_any_gpr(dst);
            emit_move_from(cg, a, b);
            let src = cg.allocator.operand(c);
            emit_binary(cg, Mnemonic::Sub, a, src);
        }
        (Operand::Ssa(b), _) => {
            let b = cg.allocator.allocation_of(*b);
            let a = cg.allocate_from_active(dst, b, index);
            let src = cg.x86_source(rhs);
            emit_binary(cg, Mnemonic::Sub, a, src);
        }
        (_, Operand::Ssa(c)) => {
            // No sub form takes an immediate left operand; materialize it
            // in the destination register first.
            let c = cg.allocator.allocation_of(*c);
            let a = cg.allocate_to_any_gpr(dst);
            let width = cg.allocator.get(a).width();
            let dst_op = cg.allocator.operand(a);
            let lhs_op = cg.x86_source(lhs);
            cg.block.push(X86Instruction::mov(width, dst_op, lhs_op));
            let src = cg.allocator.operand(c);
            emit_binary(cg, Mnemonic::Sub, a, src);
        }
        _ => {
            let a = cg.allocate(dst, index);
            let width = cg.allocator.get(a).width();
            let dst_op = cg.allocator.operand(a);
            let lhs_op = cg.x86_source(lhs);
            let rhs_op = cg.x86_source(rhs);
            cg.block.push(X86Instruction::mov(width, dst_op, lhs_op));
            cg.block.push(X86Instruction::sub(width, dst_op, rhs_op));
        }
    }
}

/// `MUL A, B, C`: one-operand `imul` reads `rax` and writes `rdx:rax`, so
/// the result lands in `rax` and `rdx` is clobbered.
pub(super) fn mul(cg: &mut FunctionCodegen, dst: SsaId, lhs: &Operand, rhs: &Operand, index: u32) {
    let width = arithmetic_width(cg, dst);
    match (lhs, rhs) {
        (Operand::Ssa(b), Operand::Ssa(c)) => {
            let b = cg.allocator.allocation_of(*b);
            let c = cg.allocator.allocation_of(*c);

            if let Some(a) = rename_in_rax(cg, dst, b, index) {
                cg.allocator.release_gpr(Reg::Rdx, index, &mut cg.block);
                let src = operand_unless_renamed(cg, c, a);
                cg.block.push(X86Instruction::imul(width, src));
                return;
            }
            if let Some(a) = rename_in_rax(cg, dst, c, index) {
                cg.allocator.release_gpr(Reg::Rdx, index, &mut cg.block);
                let src = operand_unless_renamed(cg, b, a);
                cg.block.push(X86Instruction::imul(width, src));
                return;
            }

            cg.allocate_to_gpr(dst, Reg::Rax, index);
            cg.allocator.release_gpr(Reg::Rdx, index, &mut cg.block);
            let (moved, multiplier) = if cg.allocator.get(b).lifetime.last_use
                <= cg.allocator.get(c).lifetime.last_use
            {
                (b, c)
            } else {
                (c, b)
            };
            let src = cg.allocator.operand(moved);
            cg.block
                .push(X86Instruction::mov(width, rax_operand(width), src));
            let src = cg.allocator.operand(multiplier);
            cg.block.push(X86Instruction::imul(width, src));
        }
        (Operand::Ssa(b), other) | (other, Operand::Ssa(b)) => {
            let b = cg.allocator.allocation_of(*b);
            let value = cg.x86_source(other);

            if rename_in_rax(cg, dst, b, index).is_some() {
                // The multiplier goes through rdx, which is clobbered anyway.
                cg.allocator.release_gpr(Reg::Rdx, index, &mut cg.block);
                cg.block
                    .push(X86Instruction::mov(width, rdx_operand(width), value));
                cg.block
                    .push(X86Instruction::imul(width, rdx_operand(width)));
                return;
            }

            cg.allocate_to_gpr(dst, Reg::Rax, index);
            cg.allocator.release_gpr(Reg::Rdx, index, &mut cg.block);
            cg.block
                .push(X86Instruction::mov(width, rax_operand(width), value));
            let src = cg.allocator.operand(b);
            cg.block.push(X86Instruction::imul(width, src));
        }
        _ => {
            cg.allocate_to_gpr(dst, Reg::Rax, index);
            cg.allocator.release_gpr(Reg::Rdx, index, &mut cg.block);
            let lhs_op = cg.x86_source(lhs);
            let rhs_op = cg.x86_source(rhs);
            cg.block
                .push(X86Instruction::mov(width, rax_operand(width), lhs_op));
            cg.block
                .push(X86Instruction::mov(width, rdx_operand(width), rhs_op));
            cg.block
                .push(X86Instruction::imul(width, rdx_operand(width)));
        }
    }
}

/// `DIV A, B, C`: `idiv` divides `rdx:rax`, quotient to `rax`.
pub(super) fn div(cg: &mut FunctionCodegen, dst: SsaId, lhs: &Operand, rhs: &Operand, index: u32) {
    divide(cg, dst, lhs, rhs, index, Reg::Rax)
}

/// `MOD A, B, C`: same choreography, remainder lands in `rdx`.
pub(super) fn rem(cg: &mut FunctionCodegen, dst: SsaId, lhs: &Operand, rhs: &Operand, index: u32) {
    divide(cg, dst, lhs, rhs, index, Reg::Rdx)
}

fn divide(
    cg: &mut FunctionCodegen,
    dst: SsaId,
    lhs: &Operand,
    rhs: &Operand,
    index: u32,
    result_reg: Reg,
) {
    let width = arithmetic_width(cg, dst);
    let other_reg = if result_reg == Reg::Rax {
        Reg::Rdx
    } else {
        Reg::Rax
    };
    let same_input = lhs == rhs;

    // Pin the result register and the other half of the rdx:rax pair.
    // Forced placement relocates any input still holding one of the two,
    // so a divisor sitting in rax or rdx is moved out, not overwritten.
    let (a, renamed_from_lhs) = match lhs {
        Operand::Ssa(b) if result_reg == Reg::Rax => {
            let b = cg.allocator.allocation_of(*b);
            match rename_in_rax(cg, dst, b, index) {
                Some(a) => (a, true),
                None => (cg.allocate_to_gpr(dst, result_reg, index), false),
            }
        }
        _ => (cg.allocate_to_gpr(dst, result_reg, index), false),
    };
    cg.allocator.acquire_gpr(other_reg, index, &mut cg.block);

    // High half of the dividend.
    cg.block.push(X86Instruction::mov(
        width,
        rdx_operand(width),
        X86Operand::Immediate(0),
    ));

    // Low half: materialize B into rax unless it already lives there.
    let dividend_in_rax = renamed_from_lhs
        || match lhs {
            Operand::Ssa(ssa) => {
                let b = cg.allocator.allocation_of(*ssa);
                cg.allocator.get(b).location.is_reg(Reg::Rax)
            }
            _ => false,
        };
    if !dividend_in_rax {
        let src = match lhs {
            Operand::Ssa(ssa) => {
                let b = cg.allocator.allocation_of(*ssa);
                cg.allocator.operand(b)
            }
            _ => cg.x86_source(lhs),
        };
        cg.block
            .push(X86Instruction::mov(width, rax_operand(width), src));
    }

    // Divisor: registers and memory divide directly; immediates and
    // constants are materialized into a scratch register first.
    match rhs {
        Operand::Ssa(ssa) => {
            let c = if same_input && renamed_from_lhs {
                a
            } else {
                cg.allocator.allocation_of(*ssa)
            };
            let src = cg.allocator.operand(c);
            cg.block.push(X86Instruction::idiv(width, src));
        }
        _ => {
            let value = cg.x86_source(rhs);
            let scratch = cg
                .allocator
                .acquire_any_gpr(width.size(), index, &mut cg.block);
            cg.block
                .push(X86Instruction::mov(width, X86Operand::Gpr(scratch), value));
            cg.block
                .push(X86Instruction::idiv(width, X86Operand::Gpr(scratch)));
            cg.allocator.release_gpr(scratch.reg, index, &mut cg.block);
        }
    }
    cg.allocator.release_gpr(other_reg, index, &mut cg.block);
}

/// Rename `dst` into `active`'s register when `active` occupies `rax` and
/// dies at this instruction. Returns `None` when the caller must place the
/// destination explicitly.
fn rename_in_rax(
    cg: &mut FunctionCodegen,
    dst: SsaId,
    active: AllocationId,
    index: u32,
) -> Option<AllocationId> {
    if !cg.allocator.get(active).location.is_reg(Reg::Rax) {
        return None;
    }
    let spec = cg.spec(dst);
    cg.allocator.try_rename(spec, active, index)
}

/// Source operand of `input`, falling back to the renamed destination when
/// both instruction inputs were the same local.
fn operand_unless_renamed(
    cg: &FunctionCodegen,
    input: AllocationId,
    renamed: AllocationId,
) -> X86Operand {
    if input == renamed {
        cg.allocator.operand(renamed)
    } else {
        cg.allocator.operand(input)
    }
}

#[derive(Clone, Copy)]
enum Mnemonic {
    Add,
    Sub,
}

fn emit_binary(cg: &mut FunctionCodegen, mnemonic: Mnemonic, a: AllocationId, src: X86Operand) {
    let width = cg.allocator.get(a).width();
    let dst = cg.allocator.operand(a);
    let instruction = match mnemonic {
        Mnemonic::Add => X86Instruction::add(width, dst, src),
        Mnemonic::Sub => X86Instruction::sub(width, dst, src),
    };
    cg.block.push(instruction);
}

fn emit_move_from(cg: &mut FunctionCodegen, a: AllocationId, src: AllocationId) {
    let width = cg.allocator.get(a).width();
    let dst = cg.allocator.operand(a);
    let src = cg.allocator.operand(src);
    cg.block.push(X86Instruction::mov(width, dst, src));
}

fn arithmetic_width(cg: &mut FunctionCodegen, dst: SsaId) -> Width {
    let ty = cg
        .function
        .local_at(dst)
        .ty
        .expect("codegen runs on typechecked functions");
    cg.width_of(ty)
}

fn rax_operand(width: Width) -> X86Operand {
    X86Operand::Gpr(Gpr::new(Reg::Rax, width))
}

fn rdx_operand(width: Width) -> X86Operand {
    X86Operand::Gpr(Gpr::new(Reg::Rdx, width))
}
