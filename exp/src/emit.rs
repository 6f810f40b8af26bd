//! Final assembly text: GNU assembler directives around the lowered
//! function bodies, AT&T operand syntax, byte-identical across runs for
//! identical inputs.

use std::fmt::Write;

use exp_asm::OperandResolver;
use exp_ir::{ConstantId, Context, LabelId, Value};

use crate::codegen::X86Function;

/// Argument of the `.arch` directive.
///
/// TODO: derive from a target selection mechanism instead of assuming the
/// development machine's microarchitecture.
const CPU_TYPE: &str = "znver3";

struct PoolResolver<'a> {
    context: &'a Context,
}

impl OperandResolver for PoolResolver<'_> {
    fn label_name(&self, label: LabelId) -> &str {
        self.context.strings.resolve(self.context.labels.get(label))
    }

    fn constant_value(&self, constant: ConstantId) -> i64 {
        match self.context.constants.get(constant) {
            Value::Scalar(scalar) => scalar.as_i64(),
            _ => unreachable!("only scalar constants appear as x86 operands"),
        }
    }
}

/// Render the whole compilation unit.
pub fn emit(context: &Context, functions: &[X86Function]) -> String {
    let mut out = String::new();
    let resolver = PoolResolver { context };

    emit_header(context, &mut out);
    for function in functions {
        emit_function(context, &resolver, function, &mut out);
    }
    emit_footer(&mut out);

    out
}

fn emit_header(context: &Context, out: &mut String) {
    directive_file(&context.source_path.display().to_string(), out);
    directive_arch(out);
    out.push('\n');
}

fn emit_footer(out: &mut String) {
    let _ = writeln!(
        out,
        "  .ident \"exp {}\"",
        env!("CARGO_PKG_VERSION")
    );
    // Marks the stack non-executable.
    out.push_str("  .section .note.GNU-stack,\"\",@progbits\n");
}

fn emit_function(
    context: &Context,
    resolver: &PoolResolver<'_>,
    function: &X86Function,
    out: &mut String,
) {
    let name = context.strings.resolve(function.name);

    directive_globl(name, out);
    directive_text(out);
    directive_type_function(name, out);
    directive_label(name, out);

    for instruction in function.block.iter() {
        out.push('\t');
        instruction
            .write_att(out, resolver)
            .expect("writing to a String cannot fail");
        out.push('\n');
    }

    directive_size_label_relative(name, out);
    out.push('\n');
}

fn directive_file(path: &str, out: &mut String) {
    let _ = writeln!(out, "  .file \"{path}\"");
}

fn directive_arch(out: &mut String) {
    let _ = writeln!(out, "  .arch {CPU_TYPE}");
}

fn directive_globl(name: &str, out: &mut String) {
    let _ = writeln!(out, "  .globl {name}");
}

fn directive_text(out: &mut String) {
    out.push_str("  .text\n");
}

fn directive_type_function(name: &str, out: &mut String) {
    let _ = writeln!(out, "  .type {name}, @function");
}

fn directive_label(name: &str, out: &mut String) {
    let _ = writeln!(out, "{name}:");
}

/// `.size name, .-name`: the assembler computes the distance between the
/// current address and the label.
fn directive_size_label_relative(name: &str, out: &mut String) {
    let _ = writeln!(out, "  .size {name}, .-{name}");
}
