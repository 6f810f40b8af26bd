//! Per-function lifetime intervals for SSA locals.
//!
//! A single backward pass over the block: the first definition seen walking
//! backwards is the earliest definition (there is exactly one in SSA form),
//! and the first use seen walking backwards is the last use. Intervals are
//! kept sorted by ascending `first_def` for the linear-scan allocator.

use exp_ir::{Constants, Function, Instruction, Interval, Operand, SsaId, Value};

/// An SSA local's interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsaInterval {
    /// The local.
    pub ssa: SsaId,
    /// Its `[first_def, last_use]` range of block indices.
    pub interval: Interval,
}

/// A function's lifetime intervals, sorted by ascending `first_def` with
/// ties broken by ascending SSA number.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Lifetimes {
    intervals: Vec<SsaInterval>,
}

impl Lifetimes {
    fn insert_sorted(&mut self, entry: SsaInterval) {
        let at = self
            .intervals
            .iter()
            .position(|existing| existing.interval.first_def > entry.interval.first_def)
            .unwrap_or(self.intervals.len());
        self.intervals.insert(at, entry);
    }

    /// Iterate intervals in allocation order.
    pub fn iter(&self) -> std::slice::Iter<'_, SsaInterval> {
        self.intervals.iter()
    }

    /// Number of intervals; one per declared local.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// True for a function with no locals.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The interval of `ssa`.
    pub fn interval_of(&self, ssa: SsaId) -> Interval {
        self.intervals
            .iter()
            .find(|entry| entry.ssa == ssa)
            .map(|entry| entry.interval)
            .expect("interval exists for every declared local")
    }
}

/// Compute intervals and annotate each of the function's locals with its
/// lifetime, returning the sorted interval list.
pub fn annotate(function: &mut Function, constants: &Constants) -> Lifetimes {
    let lifetimes = analyze(function, constants);
    for entry in lifetimes.iter() {
        function.local_at_mut(entry.ssa).lifetime = entry.interval;
    }
    lifetimes
}

/// Compute the lifetime intervals of every declared local.
///
/// Formal arguments are live from index 0; a local that is never read has
/// `last_use == first_def`.
pub fn analyze(function: &Function, constants: &Constants) -> Lifetimes {
    let mut scratch = vec![Interval::default(); function.local_count()];

    for (index, instruction) in function.block.iter().enumerate().rev() {
        let index = index as u32;
        if let Some(dst) = instruction.def() {
            scratch[dst.index()].first_def = index;
        }

        let (b, c) = instruction.operands();
        for operand in [b, c].into_iter().flatten() {
            mark_use(&mut scratch, operand, index);
        }

        // A call references its argument locals through the constant tuple
        // in operand C; they stay live up to the call itself.
        if let Instruction::Call { arguments, .. } = instruction {
            if let Operand::Constant(id) = arguments {
                if let Value::Tuple(tuple) = constants.get(*id) {
                    for element in &tuple.elements {
                        mark_use(&mut scratch, element, index);
                    }
                }
            }
        }
    }

    let mut lifetimes = Lifetimes::default();
    for (ssa, local) in function.locals().iter().enumerate() {
        let mut interval = scratch[ssa];
        if interval.last_use < interval.first_def {
            interval.last_use = interval.first_def;
        }
        lifetimes.insert_sorted(SsaInterval {
            ssa: local.ssa,
            interval,
        });
    }
    lifetimes
}

fn mark_use(scratch: &mut [Interval], operand: &Operand, index: u32) {
    if let Operand::Ssa(ssa) = operand {
        let interval = &mut scratch[ssa.index()];
        if index > interval.last_use {
            interval.last_use = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exp_ir::{Context, Instruction, Scalar, Tuple};

    fn body(build: impl FnOnce(&mut Function, &mut Context)) -> (Function, Context) {
        let mut context = Context::new("test.exp");
        let mut function = Function::default();
        build(&mut function, &mut context);
        (function, context)
    }

    #[test]
    fn first_def_is_the_defining_index() {
        // %0 = load 1; %1 = load 2; %2 = %0 + %1; return %2
        let (function, context) = body(|f, _| {
            let a = f.declare_local();
            f.append(Instruction::Load {
                dst: a,
                src: Operand::Immediate(Scalar::I32(1)),
            });
            let b = f.declare_local();
            f.append(Instruction::Load {
                dst: b,
                src: Operand::Immediate(Scalar::I32(2)),
            });
            let sum = f.declare_local();
            f.append(Instruction::Add {
                dst: sum,
                lhs: Operand::Ssa(a),
                rhs: Operand::Ssa(b),
            });
            f.append(Instruction::Return {
                value: Operand::Ssa(sum),
            });
        });

        let lifetimes = analyze(&function, &context.constants);
        let ordered: Vec<_> = lifetimes
            .iter()
            .map(|e| (e.ssa.index(), e.interval.first_def, e.interval.last_use))
            .collect();
        assert_eq!(ordered, vec![(0, 0, 2), (1, 1, 2), (2, 2, 3)]);
    }

    #[test]
    fn unread_locals_end_where_they_begin() {
        let (function, context) = body(|f, _| {
            let unused = f.declare_local();
            f.append(Instruction::Load {
                dst: unused,
                src: Operand::Immediate(Scalar::I32(5)),
            });
            f.append(Instruction::Return {
                value: Operand::Immediate(Scalar::I32(0)),
            });
        });

        let lifetimes = analyze(&function, &context.constants);
        assert_eq!(lifetimes.interval_of(SsaId::from_raw(0)), Interval {
            first_def: 0,
            last_use: 0,
        });
    }

    #[test]
    fn call_arguments_stay_live_until_the_call() {
        let (function, context) = body(|f, context| {
            let callee = context.intern("callee");
            let label = context.labels_push(callee);
            let arg = f.declare_local();
            f.append(Instruction::Load {
                dst: arg,
                src: Operand::Immediate(Scalar::I32(40)),
            });
            let arguments = context.constants_push(Value::Tuple(Tuple {
                elements: vec![Operand::Ssa(arg)],
            }));
            let result = f.declare_local();
            f.append(Instruction::Call {
                dst: result,
                callee: Operand::Label(label),
                arguments: Operand::Constant(arguments),
            });
            f.append(Instruction::Return {
                value: Operand::Ssa(result),
            });
        });

        let lifetimes = analyze(&function, &context.constants);
        let arg = lifetimes.interval_of(SsaId::from_raw(0));
        assert_eq!((arg.first_def, arg.last_use), (0, 1));
    }

    #[test]
    fn arguments_are_live_from_entry() {
        let (function, context) = body(|f, context| {
            let name = context.intern("a");
            let ty = context.types.i32_type();
            let a = f.declare_argument(name, ty);
            f.append(Instruction::Return {
                value: Operand::Ssa(a),
            });
        });

        let lifetimes = analyze(&function, &context.constants);
        assert_eq!(lifetimes.interval_of(SsaId::from_raw(0)), Interval {
            first_def: 0,
            last_use: 0,
        });
    }
}
