//! Loads, tuple projection, and the memory-copy intrinsics shared by the
//! other lowering routines.

use exp_asm::{Address, Gpr, Instruction as X86Instruction, Operand as X86Operand};
use exp_ir::{ConstantId, Operand, Scalar, SsaId, Type, TypeId, Value};

use super::allocator::{AllocationId, Location};
use super::FunctionCodegen;

/// `LOAD A, B`: copy an operand into a fresh local.
pub(super) fn load(cg: &mut FunctionCodegen, dst: SsaId, src: &Operand, index: u32) {
    match src {
        Operand::Ssa(ssa) => {
            let active = cg.allocator.allocation_of(*ssa);
            cg.allocate_from_active(dst, active, index);
        }
        Operand::Immediate(scalar) => {
            let a = cg.allocate(dst, index);
            let width = cg.allocator.get(a).width();
            let dst_op = cg.allocator.operand(a);
            cg.block.push(X86Instruction::mov(
                width,
                dst_op,
                X86Operand::Immediate(scalar.as_i64()),
            ));
        }
        Operand::Constant(id) => {
            let a = cg.allocate(dst, index);
            load_allocation_from_value(cg, a, *id, index);
        }
        Operand::Label(_) => unreachable!("global constants are not loadable yet"),
    }
}

/// `DOT A, B, C`: project element `C` out of tuple `B`.
pub(super) fn dot(
    cg: &mut FunctionCodegen,
    dst: SsaId,
    tuple: &Operand,
    element: &Operand,
    index: u32,
) {
    let Operand::Immediate(Scalar::I32(at)) = element else {
        unreachable!("typechecker guarantees an immediate i32 tuple index")
    };
    let at = *at as usize;

    match tuple {
        Operand::Ssa(ssa) => {
            let base = cg.allocator.allocation_of(*ssa);
            let tuple_ty = cg.allocator.get(base).ty;
            let Location::Address(base_address) = cg.allocator.get(base).location else {
                unreachable!("tuples are always memory resident")
            };

            let element_ty = tuple_element_type(cg, tuple_ty, at);
            let offset = cg.layouts.offset_of(tuple_ty, at, &cg.context.types);
            let source = base_address.displaced(offset);

            let a = cg.allocate(dst, index);
            if cg.context.types.is_scalar(element_ty) {
                copy_allocation_from_memory(cg, a, source, index);
            } else {
                let Location::Address(dst_address) = cg.allocator.get(a).location else {
                    unreachable!("aggregate projections are stack allocated")
                };
                copy_composite_memory(cg, dst_address, source, element_ty, index);
            }
        }
        // Projecting an immediate tuple reduces to loading its element.
        Operand::Constant(id) => {
            let Value::Tuple(value) = cg.context.constants.get(*id) else {
                unreachable!("typechecker guarantees a tuple operand")
            };
            let element = value.elements[at];
            load(cg, dst, &element, index);
        }
        _ => unreachable!("typechecker guarantees an indexable operand"),
    }
}

/// Copy between two allocations of the same type, whatever their placement.
pub(super) fn copy_allocation(
    cg: &mut FunctionCodegen,
    dst: AllocationId,
    src: AllocationId,
    index: u32,
) {
    let (dst_location, src_location) = (cg.allocator.get(dst).location, cg.allocator.get(src).location);
    if dst_location == src_location {
        return;
    }

    let ty = cg.allocator.get(dst).ty;
    if cg.context.types.is_scalar(ty) {
        match (dst_location, src_location) {
            (Location::Address(to), Location::Address(from)) => {
                let size = cg.allocator.get(dst).size;
                copy_scalar_memory(cg, to, from, size, index);
            }
            _ => {
                let width = cg.allocator.get(dst).width();
                let dst_op = cg.allocator.operand(dst);
                let src_op = cg.allocator.operand(src);
                cg.block.push(X86Instruction::mov(width, dst_op, src_op));
            }
        }
    } else {
        let (Location::Address(to), Location::Address(from)) = (dst_location, src_location) else {
            unreachable!("aggregates are always memory resident")
        };
        copy_composite_memory(cg, to, from, ty, index);
    }
}

/// Scalar memory-to-memory copy through a scratch register.
pub(super) fn copy_scalar_memory(
    cg: &mut FunctionCodegen,
    dst: Address,
    src: Address,
    size: u64,
    index: u32,
) {
    let scratch = cg.allocator.acquire_any_gpr(size, index, &mut cg.block);
    cg.block.push(X86Instruction::mov(
        scratch.width,
        X86Operand::Gpr(scratch),
        X86Operand::Address(src),
    ));
    cg.block.push(X86Instruction::mov(
        scratch.width,
        X86Operand::Address(dst),
        X86Operand::Gpr(scratch),
    ));
    cg.allocator.release_gpr(scratch.reg, index, &mut cg.block);
}

/// Tuple copy: elementwise at layout offsets, recursing into nested tuples.
pub(super) fn copy_composite_memory(
    cg: &mut FunctionCodegen,
    dst: Address,
    src: Address,
    tuple_ty: TypeId,
    index: u32,
) {
    let elements = tuple_element_types(cg, tuple_ty);
    for (at, element_ty) in elements.into_iter().enumerate() {
        let offset = cg.layouts.offset_of(tuple_ty, at, &cg.context.types);
        let to = dst.displaced(offset);
        let from = src.displaced(offset);
        if cg.context.types.is_scalar(element_ty) {
            let size = cg.layouts.size_of(element_ty, &cg.context.types);
            copy_scalar_memory(cg, to, from, size, index);
        } else {
            copy_composite_memory(cg, to, from, element_ty, index);
        }
    }
}

/// Read a scalar out of memory into an allocation.
pub(super) fn copy_allocation_from_memory(
    cg: &mut FunctionCodegen,
    dst: AllocationId,
    src: Address,
    index: u32,
) {
    match cg.allocator.get(dst).location {
        Location::Gpr(gpr) => {
            cg.block.push(X86Instruction::mov(
                gpr.width,
                X86Operand::Gpr(gpr),
                X86Operand::Address(src),
            ));
        }
        Location::Address(to) => {
            let size = cg.allocator.get(dst).size;
            copy_scalar_memory(cg, to, src, size, index);
        }
    }
}

/// Initialize an allocation from a constant-pool value.
pub(super) fn load_allocation_from_value(
    cg: &mut FunctionCodegen,
    dst: AllocationId,
    constant: ConstantId,
    index: u32,
) {
    let value = cg.context.constants.get(constant).clone();
    match value {
        // Reserved storage keeps whatever bytes were there.
        Value::Uninitialized => {}
        Value::Scalar(scalar) => {
            let width = cg.allocator.get(dst).width();
            let dst_op = cg.allocator.operand(dst);
            cg.block.push(X86Instruction::mov(
                width,
                dst_op,
                X86Operand::Immediate(scalar.as_i64()),
            ));
        }
        Value::Tuple(tuple) => {
            let ty = cg.allocator.get(dst).ty;
            let Location::Address(base) = cg.allocator.get(dst).location else {
                unreachable!("tuple constants load into memory")
            };
            for (at, element) in tuple.elements.iter().enumerate() {
                let element_ty = cg.operand_type(element);
                let offset = cg.layouts.offset_of(ty, at, &cg.context.types);
                load_address_from_operand(cg, base.displaced(offset), element, element_ty, index);
            }
        }
    }
}

/// Write an operand's value to memory.
pub(super) fn load_address_from_operand(
    cg: &mut FunctionCodegen,
    dst: Address,
    operand: &Operand,
    ty: TypeId,
    index: u32,
) {
    if cg.context.types.is_scalar(ty) {
        match operand {
            Operand::Ssa(ssa) => {
                let src = cg.allocator.allocation_of(*ssa);
                match cg.allocator.get(src).location {
                    Location::Gpr(gpr) => {
                        cg.block.push(X86Instruction::mov(
                            gpr.width,
                            X86Operand::Address(dst),
                            X86Operand::Gpr(gpr),
                        ));
                    }
                    Location::Address(from) => {
                        let size = cg.allocator.get(src).size;
                        copy_scalar_memory(cg, dst, from, size, index);
                    }
                }
            }
            Operand::Immediate(scalar) => {
                let width = cg.width_of(ty);
                cg.block.push(X86Instruction::mov(
                    width,
                    X86Operand::Address(dst),
                    X86Operand::Immediate(scalar.as_i64()),
                ));
            }
            Operand::Constant(id) => {
                let Value::Scalar(scalar) = cg.context.constants.get(*id) else {
                    unreachable!("scalar type with non-scalar constant")
                };
                let value = scalar.as_i64();
                let width = cg.width_of(ty);
                cg.block.push(X86Instruction::mov(
                    width,
                    X86Operand::Address(dst),
                    X86Operand::Immediate(value),
                ));
            }
            Operand::Label(_) => unreachable!("global constants are not loadable yet"),
        }
    } else {
        match operand {
            Operand::Ssa(ssa) => {
                let src = cg.allocator.allocation_of(*ssa);
                let Location::Address(from) = cg.allocator.get(src).location else {
                    unreachable!("aggregates are always memory resident")
                };
                copy_composite_memory(cg, dst, from, ty, index);
            }
            Operand::Constant(id) => {
                let Value::Tuple(tuple) = cg.context.constants.get(*id).clone() else {
                    unreachable!("aggregate type with non-tuple constant")
                };
                for (at, element) in tuple.elements.iter().enumerate() {
                    let element_ty = cg.operand_type(element);
                    let offset = cg.layouts.offset_of(ty, at, &cg.context.types);
                    load_address_from_operand(
                        cg,
                        dst.displaced(offset),
                        element,
                        element_ty,
                        index,
                    );
                }
            }
            _ => unreachable!("immediates are never composite"),
        }
    }
}

/// Materialize an operand into a specific register.
pub(super) fn load_gpr_from_operand(
    cg: &mut FunctionCodegen,
    gpr: Gpr,
    operand: &Operand,
    _index: u32,
) {
    match operand {
        Operand::Ssa(ssa) => {
            let src = cg.allocator.allocation_of(*ssa);
            let width = cg.allocator.get(src).width();
            let src_op = cg.allocator.operand(src);
            cg.block.push(X86Instruction::mov(
                width,
                X86Operand::Gpr(gpr.resized(width)),
                src_op,
            ));
        }
        Operand::Immediate(scalar) => {
            cg.block.push(X86Instruction::mov(
                gpr.width,
                X86Operand::Gpr(gpr),
                X86Operand::Immediate(scalar.as_i64()),
            ));
        }
        Operand::Constant(id) => {
            let Value::Scalar(scalar) = cg.context.constants.get(*id) else {
                unreachable!("aggregate constants never load into a register")
            };
            let value = scalar.as_i64();
            cg.block.push(X86Instruction::mov(
                gpr.width,
                X86Operand::Gpr(gpr),
                X86Operand::Immediate(value),
            ));
        }
        Operand::Label(_) => unreachable!("global constants are not loadable yet"),
    }
}

fn tuple_element_type(cg: &FunctionCodegen, tuple_ty: TypeId, at: usize) -> TypeId {
    let Type::Tuple(tuple) = cg.context.types.get(tuple_ty) else {
        unreachable!("typechecker guarantees a tuple type")
    };
    tuple.elements[at]
}

fn tuple_element_types(cg: &FunctionCodegen, tuple_ty: TypeId) -> Vec<TypeId> {
    let Type::Tuple(tuple) = cg.context.types.get(tuple_ty) else {
        unreachable!("typechecker guarantees a tuple type")
    };
    tuple.elements.clone()
}
