//! Linear-scan register and stack allocation for one function.
//!
//! Allocation requests arrive in program order from instruction selection,
//! so the pool state always reflects the dynamic execution order of the
//! emitted instruction stream. Sixteen GPRs are tracked in a bitset with
//! `rsp`/`rbp` permanently reserved; when no register is free the active
//! allocation dying last is spilled to the frame, unless it outlives the
//! requester, in which case the requester goes to the frame instead.

use bitflags::bitflags;

use exp_asm::{Address, Gpr, Operand, Reg, Width};
use exp_ir::{Interval, SsaId, TypeId};

use super::block::X86Block;

bitflags! {
    /// Occupancy of the sixteen GPRs, one bit per encoding index.
    struct GprSet: u16 {
        const RAX = 1 << 0;
        const RCX = 1 << 1;
        const RDX = 1 << 2;
        const RBX = 1 << 3;
        const RSP = 1 << 4;
        const RBP = 1 << 5;
        const RSI = 1 << 6;
        const RDI = 1 << 7;
        const R8 = 1 << 8;
        const R9 = 1 << 9;
        const R10 = 1 << 10;
        const R11 = 1 << 11;
        const R12 = 1 << 12;
        const R13 = 1 << 13;
        const R14 = 1 << 14;
        const R15 = 1 << 15;
    }
}

impl GprSet {
    fn bit(index: u8) -> Self {
        GprSet::from_bits_truncate(1 << index)
    }
}

/// Handle to an [`Allocation`] owned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationId(u32);

impl AllocationId {
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// In a register.
    Gpr(Gpr),
    /// In memory.
    Address(Address),
}

impl Location {
    /// True when the location is the given register, at any width.
    pub fn is_reg(&self, reg: Reg) -> bool {
        matches!(self, Location::Gpr(gpr) if gpr.reg == reg)
    }

    /// True for a memory location.
    pub const fn is_address(&self) -> bool {
        matches!(self, Location::Address(_))
    }
}

/// Storage assigned to one SSA local (or to the function result).
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    /// The local this storage belongs to.
    pub ssa: SsaId,
    /// The local's type.
    pub ty: TypeId,
    /// Laid-out size in bytes.
    pub size: u64,
    /// Laid-out alignment in bytes.
    pub align: u64,
    /// The local's lifetime.
    pub lifetime: Interval,
    /// Current placement.
    pub location: Location,
}

impl Allocation {
    /// Access width for scalar movs; aggregates are copied elementwise and
    /// never read at their own width.
    pub fn width(&self) -> Width {
        Width::from_size(self.size).unwrap_or(Width::Quad)
    }
}

/// Everything the allocator needs to know about a local when storage is
/// first requested.
#[derive(Debug, Clone, Copy)]
pub struct LocalSpec {
    /// SSA number.
    pub ssa: SsaId,
    /// Type handle.
    pub ty: TypeId,
    /// Laid-out size.
    pub size: u64,
    /// Laid-out alignment.
    pub align: u64,
    /// Lifetime interval.
    pub lifetime: Interval,
    /// True when the local has a source name. Named locals live on the
    /// stack so their storage survives register pressure unchanged.
    pub named: bool,
    /// True for scalar types.
    pub scalar: bool,
}

/// Per-function allocator state.
#[derive(Debug)]
pub struct Allocator {
    pool: GprSet,
    held: [Option<AllocationId>; 16],
    stack_live: Vec<AllocationId>,
    total_stack_size: i64,
    allocations: Vec<Allocation>,
}

impl Allocator {
    /// Fresh state with `rsp` and `rbp` reserved.
    pub fn new() -> Self {
        Self {
            pool: GprSet::RSP | GprSet::RBP,
            held: [None; 16],
            stack_live: Vec::new(),
            total_stack_size: 0,
            allocations: Vec::new(),
        }
    }

    /// Reserve a register for the whole function (aggregate-return pointer).
    pub fn reserve(&mut self, reg: Reg) {
        self.pool.insert(GprSet::bit(reg.index()));
    }

    /// Borrow an allocation.
    pub fn get(&self, id: AllocationId) -> &Allocation {
        &self.allocations[id.index()]
    }

    /// The x86 operand an allocation currently denotes.
    pub fn operand(&self, id: AllocationId) -> Operand {
        match self.get(id).location {
            Location::Gpr(gpr) => Operand::Gpr(gpr),
            Location::Address(address) => Operand::Address(address),
        }
    }

    /// High-water stack usage in bytes.
    pub const fn total_stack_size(&self) -> i64 {
        self.total_stack_size
    }

    /// True when any allocation spilled or lived on the stack.
    pub const fn uses_stack(&self) -> bool {
        self.total_stack_size > 0
    }

    /// The allocation of `ssa`.
    ///
    /// Renames reuse allocation objects, so the latest matching entry is
    /// the live one.
    pub fn allocation_of(&self, ssa: SsaId) -> AllocationId {
        let index = self
            .allocations
            .iter()
            .rposition(|allocation| allocation.ssa == ssa)
            .expect("allocation exists for every lowered ssa local");
        AllocationId(index as u32)
    }

    /// Allocate storage for a local: a register for anonymous scalars, the
    /// stack for named locals and aggregates.
    pub fn allocate(&mut self, spec: LocalSpec, index: u32, block: &mut X86Block) -> AllocationId {
        let id = self.push(spec);
        if !spec.named && spec.scalar {
            self.register_allocate(id, index, block);
        } else {
            self.stack_allocate(id);
        }
        id
    }

    /// Rename a dying allocation to `spec` without emitting a move.
    ///
    /// Returns `None` when `active` is still live past `index`; the caller
    /// allocates fresh storage and copies instead.
    pub fn try_rename(
        &mut self,
        spec: LocalSpec,
        active: AllocationId,
        index: u32,
    ) -> Option<AllocationId> {
        if self.get(active).lifetime.last_use > index {
            return None;
        }

        let allocation = &mut self.allocations[active.index()];
        allocation.ssa = spec.ssa;
        allocation.ty = spec.ty;
        allocation.lifetime = spec.lifetime;
        allocation.size = spec.size;
        allocation.align = spec.align;
        if let Location::Gpr(gpr) = allocation.location {
            let width = Width::from_size(spec.size).unwrap_or(Width::Quad);
            allocation.location = Location::Gpr(gpr.resized(width));
        }
        Some(active)
    }

    /// Force the local into `reg`, evicting any live holder.
    pub fn allocate_to_gpr(
        &mut self,
        spec: LocalSpec,
        reg: Reg,
        index: u32,
        block: &mut X86Block,
    ) -> AllocationId {
        self.release_gpr(reg, index, block);
        let id = self.push(spec);
        self.place_in_gpr(reg.index(), id);
        id
    }

    /// Allocate into some register, spilling the oldest active allocation
    /// when none is free. Used when the instruction form requires a
    /// register destination.
    pub fn allocate_to_any_gpr(&mut self, spec: LocalSpec, block: &mut X86Block) -> AllocationId {
        let id = self.push(spec);
        match self.free_gpr() {
            Some(free) => self.place_in_gpr(free, id),
            None => {
                let free = self.spill_oldest(block);
                self.place_in_gpr(free, id);
            }
        }
        id
    }

    /// Bind a local to caller-provided storage (stack-passed arguments).
    pub fn allocate_to_address(&mut self, spec: LocalSpec, address: Address) -> AllocationId {
        let id = self.push(spec);
        self.allocations[id.index()].location = Location::Address(address);
        self.stack_live.push(id);
        id
    }

    /// Bind the function result to its ABI location.
    ///
    /// The location is deliberately not marked occupied: the body may use
    /// the result register as a temporary, and in the best case computes
    /// the result in place.
    pub fn allocate_result(&mut self, location: Location, ty: TypeId, size: u64, align: u64) -> AllocationId {
        let id = self.push(LocalSpec {
            ssa: SsaId::from_raw(u32::MAX),
            ty,
            size,
            align,
            lifetime: Interval {
                first_def: 0,
                last_use: u32::MAX,
            },
            named: false,
            scalar: true,
        });
        self.allocations[id.index()].location = location;
        id
    }

    /// Acquire a transient scratch register of the given access size.
    /// The register is marked occupied until released.
    pub fn acquire_any_gpr(&mut self, size: u64, index: u32, block: &mut X86Block) -> Gpr {
        self.release_expired(index);
        let free = match self.free_gpr() {
            Some(free) => free,
            None => self.spill_oldest(block),
        };
        self.pool.insert(GprSet::bit(free));
        Gpr::new(
            Reg::from_index(free),
            Width::from_size(size).unwrap_or(Width::Quad),
        )
    }

    /// Acquire `reg` for an implicit-operand instruction, relocating any
    /// live holder out of the way first.
    ///
    /// A holder whose lifetime ends at `index` counts as live: it may still
    /// be an input of the instruction being lowered.
    pub fn acquire_gpr(&mut self, reg: Reg, index: u32, block: &mut X86Block) {
        let slot = reg.index() as usize;
        match self.held[slot] {
            None => {}
            Some(holder) if self.get(holder).lifetime.last_use < index => {
                self.held[slot] = None;
            }
            Some(holder) => {
                self.reallocate_active(holder, block);
            }
        }
        self.pool.insert(GprSet::bit(reg.index()));
    }

    /// Release `reg`: relocate a holder that outlives `index`, otherwise
    /// just clear the occupancy bit.
    pub fn release_gpr(&mut self, reg: Reg, index: u32, block: &mut X86Block) {
        let slot = reg.index() as usize;
        match self.held[slot] {
            Some(holder) if self.get(holder).lifetime.last_use >= index => {
                self.reallocate_active(holder, block);
            }
            _ => {
                self.held[slot] = None;
                self.pool.remove(GprSet::bit(reg.index()));
            }
        }
    }

    /// Move a live register allocation elsewhere: to a free register when
    /// one exists, to the stack otherwise.
    pub fn reallocate_active(&mut self, active: AllocationId, block: &mut X86Block) {
        let allocation = self.get(active);
        let Location::Gpr(prev) = allocation.location else {
            return;
        };

        // Pick the new home before vacating the old one, so the vacated
        // register is never its own destination.
        let free = self.free_gpr();
        self.held[prev.reg.index() as usize] = None;
        self.pool.remove(GprSet::bit(prev.reg.index()));

        match free {
            Some(free) => {
                self.place_in_gpr(free, active);
                let Location::Gpr(next) = self.get(active).location else {
                    unreachable!()
                };
                block.push(exp_asm::Instruction::mov(
                    next.width,
                    Operand::Gpr(next),
                    Operand::Gpr(prev),
                ));
            }
            None => self.spill(active, prev, block),
        }
    }

    fn push(&mut self, spec: LocalSpec) -> AllocationId {
        let id = AllocationId(u32::try_from(self.allocations.len()).expect("allocator overflow"));
        self.allocations.push(Allocation {
            ssa: spec.ssa,
            ty: spec.ty,
            size: spec.size,
            align: spec.align,
            lifetime: spec.lifetime,
            // Placeholder until one of the placement paths runs.
            location: Location::Address(Address::new(Reg::Rbp, 0)),
        });
        id
    }

    fn register_allocate(&mut self, id: AllocationId, index: u32, block: &mut X86Block) {
        self.release_expired(index);

        if let Some(free) = self.free_gpr() {
            self.place_in_gpr(free, id);
            return;
        }

        let oldest = self.oldest_active().expect("no free register and no holder");
        if self.get(oldest).lifetime.last_use > self.get(id).lifetime.last_use {
            let Location::Gpr(prev) = self.get(oldest).location else {
                unreachable!()
            };
            self.held[prev.reg.index() as usize] = None;
            self.pool.remove(GprSet::bit(prev.reg.index()));
            self.spill(oldest, prev, block);
            let free = self.free_gpr().expect("spill freed a register");
            self.place_in_gpr(free, id);
        } else {
            self.stack_allocate(id);
        }
    }

    fn release_expired(&mut self, index: u32) {
        for slot in 0..16 {
            if let Some(holder) = self.held[slot] {
                if self.get(holder).lifetime.last_use < index {
                    self.held[slot] = None;
                    self.pool.remove(GprSet::bit(slot as u8));
                }
            }
        }

        let allocations = &self.allocations;
        self.stack_live
            .retain(|id| allocations[id.index()].lifetime.last_use >= index);
    }

    fn free_gpr(&self) -> Option<u8> {
        (0..16u8).find(|&index| !self.pool.contains(GprSet::bit(index)))
    }

    fn place_in_gpr(&mut self, slot: u8, id: AllocationId) {
        let allocation = &mut self.allocations[id.index()];
        let width = Width::from_size(allocation.size).unwrap_or(Width::Quad);
        allocation.location = Location::Gpr(Gpr::new(Reg::from_index(slot), width));
        self.pool.insert(GprSet::bit(slot));
        self.held[slot as usize] = Some(id);
    }

    fn oldest_active(&self) -> Option<AllocationId> {
        self.held
            .iter()
            .flatten()
            .copied()
            .max_by_key(|&id| self.get(id).lifetime.last_use)
    }

    /// Spill the latest-dying register allocation, returning the freed slot.
    fn spill_oldest(&mut self, block: &mut X86Block) -> u8 {
        match self.oldest_active() {
            Some(oldest) => {
                let Location::Gpr(prev) = self.get(oldest).location else {
                    unreachable!()
                };
                let slot = prev.reg.index();
                self.held[slot as usize] = None;
                self.pool.remove(GprSet::bit(slot));
                self.spill(oldest, prev, block);
                slot
            }
            None => self.free_gpr().expect("a register is free when none is held"),
        }
    }

    fn spill(&mut self, id: AllocationId, prev: Gpr, block: &mut X86Block) {
        self.stack_allocate(id);
        let allocation = self.get(id);
        let Location::Address(address) = allocation.location else {
            unreachable!()
        };
        block.push(exp_asm::Instruction::mov(
            prev.width,
            Operand::Address(address),
            Operand::Gpr(prev),
        ));
    }

    fn stack_allocate(&mut self, id: AllocationId) {
        let allocation = &mut self.allocations[id.index()];
        let size = i64::try_from(allocation.size).expect("stack size overflow");
        let align = i64::try_from(allocation.align).expect("stack align overflow");
        let aligned = (self.total_stack_size + size + align - 1) / align * align;
        self.total_stack_size = aligned;
        allocation.location = Location::Address(Address::new(Reg::Rbp, -aligned));
        self.stack_live.push(id);
    }

    /// Live register holders, for sanity checks.
    #[cfg(test)]
    fn holders(&self) -> Vec<(u8, AllocationId)> {
        (0..16u8)
            .filter_map(|slot| self.held[slot as usize].map(|id| (slot, id)))
            .collect()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ssa: u32, first_def: u32, last_use: u32) -> LocalSpec {
        LocalSpec {
            ssa: SsaId::from_raw(ssa),
            ty: exp_ir::TypeInterner::new().i32_type(),
            size: 4,
            align: 4,
            lifetime: Interval { first_def, last_use },
            named: false,
            scalar: true,
        }
    }

    #[test]
    fn anonymous_scalars_prefer_registers() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let id = allocator.allocate(spec(0, 0, 3), 0, &mut block);
        assert!(matches!(allocator.get(id).location, Location::Gpr(_)));
        assert!(block.is_empty());
    }

    #[test]
    fn named_locals_go_to_the_stack() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let mut named = spec(0, 0, 3);
        named.named = true;
        let id = allocator.allocate(named, 0, &mut block);
        assert_eq!(
            allocator.get(id).location,
            Location::Address(Address::new(Reg::Rbp, -4))
        );
        assert_eq!(allocator.total_stack_size(), 4);
    }

    #[test]
    fn no_two_live_allocations_share_a_register() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        for ssa in 0..14 {
            allocator.allocate(spec(ssa, 0, 100), 0, &mut block);
        }

        let holders = allocator.holders();
        let mut regs: Vec<u8> = holders.iter().map(|&(slot, _)| slot).collect();
        regs.sort_unstable();
        regs.dedup();
        assert_eq!(regs.len(), holders.len());
        assert_eq!(holders.len(), 14);
    }

    #[test]
    fn pressure_spills_the_longest_lived() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        // Fill all fourteen allocatable registers; ssa 0 dies last.
        let long_lived = allocator.allocate(spec(0, 0, 500), 0, &mut block);
        for ssa in 1..14 {
            allocator.allocate(spec(ssa, 0, 100), 0, &mut block);
        }
        // The newcomer dies sooner than every holder, so the oldest (ssa 0)
        // is spilled and the newcomer takes its register.
        let newcomer = allocator.allocate(spec(14, 1, 50), 1, &mut block);

        assert!(allocator.get(long_lived).location.is_address());
        assert!(matches!(allocator.get(newcomer).location, Location::Gpr(_)));
        assert_eq!(block.len(), 1, "one spill mov");
    }

    #[test]
    fn newcomer_outlived_by_everyone_goes_to_the_stack() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        for ssa in 0..14 {
            allocator.allocate(spec(ssa, 0, 10), 0, &mut block);
        }
        let newcomer = allocator.allocate(spec(14, 1, 200), 1, &mut block);
        assert!(allocator.get(newcomer).location.is_address());
        assert!(block.is_empty(), "no spill needed");
    }

    #[test]
    fn rename_reuses_a_dying_allocation() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let dying = allocator.allocate(spec(0, 0, 1), 0, &mut block);
        let before = allocator.get(dying).location;

        let renamed = allocator.try_rename(spec(1, 1, 4), dying, 1).unwrap();
        assert_eq!(renamed, dying);
        assert_eq!(allocator.get(renamed).ssa, SsaId::from_raw(1));
        assert_eq!(allocator.get(renamed).location, before);
    }

    #[test]
    fn rename_refuses_a_live_allocation() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let live = allocator.allocate(spec(0, 0, 9), 0, &mut block);
        assert!(allocator.try_rename(spec(1, 1, 4), live, 1).is_none());
    }

    #[test]
    fn forced_register_evicts_the_holder() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let first = allocator.allocate(spec(0, 0, 9), 0, &mut block);
        assert!(allocator.get(first).location.is_reg(Reg::Rax));

        let forced = allocator.allocate_to_gpr(spec(1, 1, 5), Reg::Rax, 1, &mut block);
        assert!(allocator.get(forced).location.is_reg(Reg::Rax));
        assert!(!allocator.get(first).location.is_reg(Reg::Rax));
        assert_eq!(block.len(), 1, "holder relocated with one mov");
    }

    #[test]
    fn stack_growth_is_monotone_and_offsets_unique() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let mut offsets = Vec::new();
        let mut last_total = 0;
        for ssa in 0..6 {
            let mut named = spec(ssa, 0, 100);
            named.named = true;
            let id = allocator.allocate(named, 0, &mut block);
            let Location::Address(address) = allocator.get(id).location else {
                unreachable!()
            };
            offsets.push(address.offset);
            assert!(allocator.total_stack_size() >= last_total);
            last_total = allocator.total_stack_size();
        }
        let mut unique = offsets.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), offsets.len());
    }

    #[test]
    fn scratch_registers_are_reserved_until_released() {
        let mut allocator = Allocator::new();
        let mut block = X86Block::default();
        let scratch = allocator.acquire_any_gpr(8, 0, &mut block);
        let other = allocator.acquire_any_gpr(8, 0, &mut block);
        assert_ne!(scratch.reg, other.reg);

        allocator.release_gpr(scratch.reg, 0, &mut block);
        let reuse = allocator.acquire_any_gpr(8, 0, &mut block);
        assert_eq!(reuse.reg, scratch.reg);
    }
}
