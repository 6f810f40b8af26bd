//! Instruction selection: typed SSA IR to x86-64.
//!
//! One pass per function, in program order. Every allocator request is
//! issued by the lowering routines below, so allocator state always mirrors
//! the emitted instruction stream up to the current index. The prologue is
//! prepended after the body is lowered, once total stack usage is known.

pub mod allocator;
pub mod block;
pub mod layout;

mod arith;
mod call;
mod mem;

use tracing::{debug, trace};

use exp_asm::{Address, Gpr, Instruction as X86Instruction, Operand as X86Operand, Reg, Width,
    SYSV_ARGUMENT_SEQUENCE};
use exp_ir::{Context, Function, Instruction, Name, Operand, Scalar, SsaId, SymbolKind, TypeId,
    Value};

use allocator::{AllocationId, Allocator, LocalSpec, Location};
use block::X86Block;
use layout::Layouts;

use crate::lifetimes;

/// A lowered function, ready for the emitter.
#[derive(Debug)]
pub struct X86Function {
    /// Symbol name.
    pub name: Name,
    /// Emitted instructions, prologue included.
    pub block: X86Block,
}

/// Lower every function symbol, in declaration order.
///
/// Requires a successful typecheck: every local and every function carries
/// its type.
pub fn codegen(context: &mut Context) -> Vec<X86Function> {
    let mut layouts = Layouts::default();
    let mut functions = Vec::new();

    for name in context.symbols.names() {
        let symbol = context.symbols.at(name);
        if symbol.kind != SymbolKind::Function {
            continue;
        }
        debug!(symbol = context.strings.resolve(name), "lowering function");

        let mut function = std::mem::take(&mut context.symbols.at(name).function);
        lifetimes::annotate(&mut function, &context.constants);

        let lowered = FunctionCodegen::run(context, &mut layouts, &function, name);
        context.symbols.at(name).function = function;
        functions.push(lowered);
    }

    functions
}

/// State shared by every lowering routine while one function is selected.
pub(crate) struct FunctionCodegen<'a> {
    pub context: &'a mut Context,
    pub layouts: &'a mut Layouts,
    pub function: &'a Function,
    pub allocator: Allocator,
    pub block: X86Block,
    pub result: AllocationId,
}

impl<'a> FunctionCodegen<'a> {
    fn run(
        context: &'a mut Context,
        layouts: &'a mut Layouts,
        function: &'a Function,
        name: Name,
    ) -> X86Function {
        let mut allocator = Allocator::new();

        let result_ty = function
            .return_type
            .expect("codegen runs on typechecked functions");
        let result_size = layouts.size_of(result_ty, &context.types);
        let result_align = layouts.align_of(result_ty, &context.types);
        let result = if context.types.is_scalar(result_ty) {
            let width = Width::from_size(result_size).unwrap_or(Width::Quad);
            allocator.allocate_result(
                Location::Gpr(Gpr::new(Reg::Rax, width)),
                result_ty,
                result_size,
                result_align,
            )
        } else {
            // Aggregate return: the caller passes a buffer address in rdi,
            // which stays pinned for the whole body.
            allocator.reserve(Reg::Rdi);
            allocator.allocate_result(
                Location::Address(Address::new(Reg::Rdi, 0)),
                result_ty,
                result_size,
                result_align,
            )
        };

        let mut this = Self {
            context,
            layouts,
            function,
            allocator,
            block: X86Block::default(),
            result,
        };

        this.bind_arguments();
        for (index, instruction) in function.block.iter().enumerate() {
            this.lower(instruction, index as u32);
        }
        this.prepend_prologue();

        X86Function {
            name,
            block: this.block,
        }
    }

    /// Bind formal arguments to their System V locations: scalars to the
    /// integer argument registers, the rest to caller-written stack slots
    /// above the saved frame pointer.
    fn bind_arguments(&mut self) {
        let mut scalar_count = self.aggregate_result_pointer() as usize;
        let mut stack_offset = 16i64;

        let function = self.function;
        for argument in &function.arguments {
            let spec = self.spec(argument.ssa);
            if spec.scalar && scalar_count < SYSV_ARGUMENT_SEQUENCE.len() {
                let reg = SYSV_ARGUMENT_SEQUENCE[scalar_count];
                scalar_count += 1;
                self.allocator.allocate_to_gpr(spec, reg, 0, &mut self.block);
            } else {
                let address = Address::new(Reg::Rbp, stack_offset);
                stack_offset += i64::try_from(spec.size).expect("argument size overflow");
                self.allocator.allocate_to_address(spec, address);
            }
        }
    }

    fn aggregate_result_pointer(&self) -> bool {
        self.allocator.get(self.result).location.is_address()
    }

    fn lower(&mut self, instruction: &Instruction, index: u32) {
        trace!(%instruction, index, "select");
        match instruction {
            Instruction::Load { dst, src } => mem::load(self, *dst, src, index),
            Instruction::Negate { dst, src } => arith::negate(self, *dst, src, index),
            Instruction::Add { dst, lhs, rhs } => arith::add(self, *dst, lhs, rhs, index),
            Instruction::Sub { dst, lhs, rhs } => arith::sub(self, *dst, lhs, rhs, index),
            Instruction::Mul { dst, lhs, rhs } => arith::mul(self, *dst, lhs, rhs, index),
            Instruction::Div { dst, lhs, rhs } => arith::div(self, *dst, lhs, rhs, index),
            Instruction::Rem { dst, lhs, rhs } => arith::rem(self, *dst, lhs, rhs, index),
            Instruction::Dot { dst, tuple, index: element } => {
                mem::dot(self, *dst, tuple, element, index)
            }
            Instruction::Call {
                dst,
                callee,
                arguments,
            } => call::call(self, *dst, callee, arguments, index),
            Instruction::Return { value } => call::ret(self, value, index),
        }
    }

    /// `push rbp; mov rbp, rsp; sub rsp, N` with `N` the high-water mark
    /// rounded up to 16; the `sub` is omitted for leaf frames.
    fn prepend_prologue(&mut self) {
        if self.allocator.uses_stack() {
            let frame = (self.allocator.total_stack_size() + 15) / 16 * 16;
            let rsp = X86Operand::Gpr(Gpr::quad(Reg::Rsp));
            let amount = self.frame_size_operand(frame);
            self.block
                .prepend(X86Instruction::sub(Width::Quad, rsp, amount));
        }
        self.block.prepend(X86Instruction::mov(
            Width::Quad,
            X86Operand::Gpr(Gpr::quad(Reg::Rbp)),
            X86Operand::Gpr(Gpr::quad(Reg::Rsp)),
        ));
        self.block.prepend(X86Instruction::Push(Reg::Rbp));
    }

    /// Frame adjustments fit an inline immediate up to `i16`; anything
    /// larger is materialized through the constant pool.
    pub(crate) fn frame_size_operand(&mut self, size: i64) -> X86Operand {
        if i16::try_from(size).is_ok() {
            X86Operand::Immediate(size)
        } else {
            let id = self.context.constants_push(Value::Scalar(Scalar::I64(size)));
            X86Operand::Constant(id)
        }
    }

    /// Allocation request data for a local.
    pub(crate) fn spec(&mut self, ssa: SsaId) -> LocalSpec {
        let local = self.function.local_at(ssa);
        let ty = local.ty.expect("codegen runs on typechecked functions");
        LocalSpec {
            ssa,
            ty,
            size: self.layouts.size_of(ty, &self.context.types),
            align: self.layouts.align_of(ty, &self.context.types),
            lifetime: local.lifetime,
            named: local.name.is_some(),
            scalar: self.context.types.is_scalar(ty),
        }
    }

    /// Allocate storage for `ssa` per the allocator's placement policy.
    pub(crate) fn allocate(&mut self, ssa: SsaId, index: u32) -> AllocationId {
        let spec = self.spec(ssa);
        self.allocator.allocate(spec, index, &mut self.block)
    }

    /// Allocate `ssa` into some register.
    pub(crate) fn allocate_to_any_gpr(&mut self, ssa: SsaId) -> AllocationId {
        let spec = self.spec(ssa);
        self.allocator.allocate_to_any_gpr(spec, &mut self.block)
    }

    /// Allocate `ssa` into a specific register, evicting any live holder.
    pub(crate) fn allocate_to_gpr(&mut self, ssa: SsaId, reg: Reg, index: u32) -> AllocationId {
        let spec = self.spec(ssa);
        self.allocator
            .allocate_to_gpr(spec, reg, index, &mut self.block)
    }

    /// Place `ssa` in `active`'s storage when `active` dies here (a rename);
    /// otherwise allocate fresh storage and copy.
    pub(crate) fn allocate_from_active(
        &mut self,
        ssa: SsaId,
        active: AllocationId,
        index: u32,
    ) -> AllocationId {
        let spec = self.spec(ssa);
        if let Some(renamed) = self.allocator.try_rename(spec, active, index) {
            return renamed;
        }

        let fresh = self.allocator.allocate(spec, index, &mut self.block);
        mem::copy_allocation(self, fresh, active, index);
        fresh
    }

    /// The x86 source operand for a non-SSA IR operand; SSA operands go
    /// through the allocator instead.
    pub(crate) fn x86_source(&self, operand: &Operand) -> X86Operand {
        match operand {
            Operand::Ssa(ssa) => self.allocator.operand(self.allocator.allocation_of(*ssa)),
            Operand::Immediate(scalar) => X86Operand::Immediate(scalar.as_i64()),
            Operand::Constant(id) => X86Operand::Constant(*id),
            Operand::Label(_) => unreachable!("labels are not data operands"),
        }
    }

    /// The type of an IR operand, as assigned by the typechecker.
    pub(crate) fn operand_type(&mut self, operand: &Operand) -> TypeId {
        match operand {
            Operand::Ssa(ssa) => self
                .function
                .local_at(*ssa)
                .ty
                .expect("codegen runs on typechecked functions"),
            Operand::Immediate(scalar) => scalar.type_of(&self.context.types),
            Operand::Constant(id) => {
                let value = self.context.constants.get(*id).clone();
                self.value_type(&value)
            }
            Operand::Label(label) => {
                let name = self.context.labels.get(*label);
                self.context
                    .symbols
                    .get(name)
                    .and_then(|symbol| symbol.ty)
                    .expect("codegen runs on typechecked symbols")
            }
        }
    }

    fn value_type(&mut self, value: &Value) -> TypeId {
        match value {
            Value::Uninitialized => unreachable!("uninitialized constants are never typed"),
            Value::Scalar(scalar) => scalar.type_of(&self.context.types),
            Value::Tuple(tuple) => {
                let elements = tuple.elements.clone();
                let element_types: Vec<TypeId> = elements
                    .iter()
                    .map(|element| self.operand_type(element))
                    .collect();
                self.context.types.tuple_type(element_types.into())
            }
        }
    }

    /// Access width of a scalar type.
    pub(crate) fn width_of(&mut self, ty: TypeId) -> Width {
        let size = self.layouts.size_of(ty, &self.context.types);
        Width::from_size(size).unwrap_or(Width::Quad)
    }
}
