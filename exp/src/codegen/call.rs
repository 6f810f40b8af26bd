//! Lowering of `CALL` and `RETURN`.

use exp_asm::{Address, Gpr, Instruction as X86Instruction, Operand as X86Operand, Reg, Width,
    SYSV_ARGUMENT_SEQUENCE};
use exp_ir::{Operand, SsaId, Value};

use super::mem;
use super::FunctionCodegen;

/// `CALL A, B, C`: System V call sequence.
///
/// Scalar results are bound to `rax`; an aggregate result is allocated in
/// the caller's frame and its address passed as a hidden first argument in
/// `rdi`. Scalar arguments fill the six integer argument registers, the
/// rest are written to the outgoing stack area, with the `rsp` adjustment
/// inserted at the call start once the total is known.
pub(super) fn call(
    cg: &mut FunctionCodegen,
    dst: SsaId,
    callee: &Operand,
    arguments: &Operand,
    index: u32,
) {
    let Operand::Label(label) = callee else {
        unreachable!("call targets are label operands")
    };
    let Operand::Constant(constant) = arguments else {
        unreachable!("call arguments are a constant tuple")
    };
    let Value::Tuple(tuple) = cg.context.constants.get(*constant).clone() else {
        unreachable!("call arguments are a constant tuple")
    };

    let mut scalar_count = 0usize;
    let mut loaded_regs: Vec<Reg> = Vec::new();
    let dst_ty = cg
        .function
        .local_at(dst)
        .ty
        .expect("codegen runs on typechecked functions");
    if cg.context.types.is_scalar(dst_ty) {
        cg.allocate_to_gpr(dst, Reg::Rax, index);
    } else {
        let result = cg.allocate(dst, index);
        let address = match cg.allocator.get(result).location {
            super::allocator::Location::Address(address) => address,
            super::allocator::Location::Gpr(_) => {
                unreachable!("aggregate results are stack allocated")
            }
        };
        let pointer = SYSV_ARGUMENT_SEQUENCE[scalar_count];
        scalar_count += 1;
        cg.allocator.release_gpr(pointer, index, &mut cg.block);
        cg.block.push(X86Instruction::lea(Gpr::quad(pointer), address));
        cg.allocator.reserve(pointer);
        loaded_regs.push(pointer);
    }

    let call_start = cg.block.current_offset();
    let mut stack_arguments = Vec::new();

    for argument in &tuple.elements {
        let ty = cg.operand_type(argument);
        if cg.context.types.is_scalar(ty) && scalar_count < SYSV_ARGUMENT_SEQUENCE.len() {
            let reg = SYSV_ARGUMENT_SEQUENCE[scalar_count];
            scalar_count += 1;

            // Skip the move when the value already occupies its register;
            // otherwise evict any live holder before clobbering it.
            let already_placed = matches!(argument, Operand::Ssa(ssa)
                if cg.allocator.get(cg.allocator.allocation_of(*ssa)).location.is_reg(reg));
            if !already_placed {
                cg.allocator.release_gpr(reg, index, &mut cg.block);
                let size = cg.layouts.size_of(ty, &cg.context.types);
                let width = Width::from_size(size).unwrap_or(Width::Quad);
                mem::load_gpr_from_operand(cg, Gpr::new(reg, width), argument, index);
            }
            cg.allocator.reserve(reg);
            loaded_regs.push(reg);
        } else {
            stack_arguments.push((*argument, ty));
        }
    }

    if stack_arguments.is_empty() {
        cg.block.push(X86Instruction::Call(*label));
        release_argument_registers(cg, &loaded_regs, index);
        return;
    }

    // Outgoing stack arguments are written upward from the (about to be
    // lowered) stack pointer.
    let mut argument_address = Address::new(Reg::Rsp, 0);
    let mut stack_space = 0i64;
    for (argument, ty) in &stack_arguments {
        let size = i64::try_from(cg.layouts.size_of(*ty, &cg.context.types))
            .expect("argument size overflow");
        mem::load_address_from_operand(cg, argument_address, argument, *ty, index);
        argument_address = argument_address.displaced(size);
        stack_space += size;
    }

    let rsp = X86Operand::Gpr(Gpr::quad(Reg::Rsp));
    let amount = cg.frame_size_operand(stack_space);
    cg.block.insert(
        call_start,
        X86Instruction::sub(Width::Quad, rsp, amount),
    );

    cg.block.push(X86Instruction::Call(*label));
    cg.block.push(X86Instruction::add(Width::Quad, rsp, amount));
    release_argument_registers(cg, &loaded_regs, index);
}

/// Free the argument registers once the call is emitted. Arguments whose
/// lifetime ends at the call are dead here, so `index + 1` lets them drop
/// without a relocation.
fn release_argument_registers(cg: &mut FunctionCodegen, regs: &[Reg], index: u32) {
    for &reg in regs {
        cg.allocator.release_gpr(reg, index + 1, &mut cg.block);
    }
}

/// `RETURN B`: place the value in the function's result location and emit
/// the epilogue.
pub(super) fn ret(cg: &mut FunctionCodegen, value: &Operand, index: u32) {
    let result = cg.result;
    match value {
        Operand::Ssa(ssa) => {
            let b = cg.allocator.allocation_of(*ssa);
            if cg.allocator.get(b).location != cg.allocator.get(result).location {
                mem::copy_allocation(cg, result, b, index);
            }
        }
        Operand::Immediate(scalar) => {
            let width = cg.allocator.get(result).width();
            let dst = cg.allocator.operand(result);
            cg.block.push(X86Instruction::mov(
                width,
                dst,
                X86Operand::Immediate(scalar.as_i64()),
            ));
        }
        Operand::Constant(id) => {
            mem::load_allocation_from_value(cg, result, *id, index);
        }
        Operand::Label(_) => unreachable!("global constants are not returnable yet"),
    }

    cg.block.push(X86Instruction::mov(
        Width::Quad,
        X86Operand::Gpr(Gpr::quad(Reg::Rsp)),
        X86Operand::Gpr(Gpr::quad(Reg::Rbp)),
    ));
    cg.block.push(X86Instruction::Pop(Reg::Rbp));
    cg.block.push(X86Instruction::Ret);
}
