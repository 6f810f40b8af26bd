//! End-to-end scenarios: source text in, assembly text out.
//!
//! Each scenario names the exit code the assembled program produces when
//! run; executing the output is the external toolchain's job, so these
//! tests pin the assembly itself: the instruction sequences that produce
//! those exit codes, and byte-identical output across runs.

use rstest::rstest;

fn compile(source: &str) -> String {
    exp::compile(source, "main.exp").expect("scenario compiles")
}

#[rstest]
#[case::exit_7("fn main() -> i32 { return 7; }")]
#[case::exit_7_via_negate("fn main() -> i32 { return -3 + 10; }")]
#[case::exit_9("fn main() -> i32 { return 6 * 7 / 3 - 5; }")]
#[case::exit_2("fn main() -> i32 { return 17 % 5; }")]
#[case::exit_42(
    "fn add(a: i32, b: i32) -> i32 { return a + b; } fn main() -> i32 { return add(40, 2); }"
)]
#[case::exit_5("fn main() -> i32 { const t = (1, 2, 3); return t.1 + t.2; }")]
fn scenarios_compile_and_are_stable(#[case] source: &str) {
    let first = compile(source);
    let second = compile(source);
    assert_eq!(first, second, "same input must emit identical bytes");
    assert!(first.contains("  .globl main\n"));
    assert!(first.contains("main:\n"));
    assert!(first.ends_with("  .section .note.GNU-stack,\"\",@progbits\n"));
}

#[test]
fn return_of_a_literal_is_a_single_mov() {
    let expected = format!(
        "  .file \"main.exp\"\n\
         \x20 .arch znver3\n\
         \n\
         \x20 .globl main\n\
         \x20 .text\n\
         \x20 .type main, @function\n\
         main:\n\
         \tpushq\t%rbp\n\
         \tmovq\t%rsp, %rbp\n\
         \tmovl\t$7, %eax\n\
         \tmovq\t%rbp, %rsp\n\
         \tpopq\t%rbp\n\
         \tret\n\
         \x20 .size main, .-main\n\
         \n\
         \x20 .ident \"exp {}\"\n\
         \x20 .section .note.GNU-stack,\"\",@progbits\n",
        env!("CARGO_PKG_VERSION")
    );
    assert_eq!(compile("fn main() -> i32 { return 7; }"), expected);
}

#[test]
fn negation_lowers_through_neg() {
    let assembly = compile("fn main() -> i32 { return -3 + 10; }");
    assert!(assembly.contains("\tmovl\t$3, %eax\n"));
    assert!(assembly.contains("\tnegl\t%eax\n"));
    assert!(assembly.contains("\taddl\t$10, %eax\n"));
}

#[test]
fn multiplication_and_division_bind_rax_rdx() {
    let assembly = compile("fn main() -> i32 { return 6 * 7 / 3 - 5; }");
    assert!(assembly.contains("\timull\t%edx\n"));
    assert!(assembly.contains("\tmovl\t$0, %edx\n"));
    assert!(assembly.contains("\tidivl\t%ecx\n"));
    assert!(assembly.contains("\tsubl\t$5, %eax\n"));
}

#[test]
fn remainder_lands_in_rdx() {
    let assembly = compile("fn main() -> i32 { return 17 % 5; }");
    assert!(assembly.contains("\tmovl\t$17, %eax\n"));
    assert!(assembly.contains("\tidivl\t"));
    // The remainder is copied from rdx into the result register.
    assert!(assembly.contains("\tmovl\t%edx, %eax\n"));
}

#[test]
fn calls_follow_the_system_v_sequence() {
    let assembly = compile(
        "fn add(a: i32, b: i32) -> i32 { return a + b; } fn main() -> i32 { return add(40, 2); }",
    );
    assert!(assembly.contains("\tmovl\t$40, %edi\n"));
    assert!(assembly.contains("\tmovl\t$2, %esi\n"));
    assert!(assembly.contains("\tcall\tadd\n"));
    // Callee: the sum is renamed into the first argument's register.
    assert!(assembly.contains("\taddl\t%esi, %edi\n"));
    assert!(assembly.contains("\tmovl\t%edi, %eax\n"));
    // Both functions are emitted, in declaration order.
    let add_at = assembly.find("add:").unwrap();
    let main_at = assembly.find("main:").unwrap();
    assert!(add_at < main_at);
}

#[test]
fn tuples_live_in_the_frame() {
    let assembly = compile("fn main() -> i32 { const t = (1, 2, 3); return t.1 + t.2; }");
    // 12 bytes of locals, frame rounded to 16.
    assert!(assembly.contains("\tsubq\t$16, %rsp\n"));
    assert!(assembly.contains("\tmovl\t$1, -12(%rbp)\n"));
    assert!(assembly.contains("\tmovl\t$2, -8(%rbp)\n"));
    assert!(assembly.contains("\tmovl\t$3, -4(%rbp)\n"));
    // Projections read back at the element offsets.
    assert!(assembly.contains("\tmovl\t-8(%rbp), %eax\n"));
    assert!(assembly.contains("\tmovl\t-4(%rbp), %ecx\n"));
}

#[test]
fn seventh_scalar_argument_overflows_to_the_stack() {
    let assembly = compile(
        "fn pick(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32) -> i32 { return g; }\n\
         fn main() -> i32 { return pick(1, 2, 3, 4, 5, 6, 7); }",
    );
    // Caller: six register arguments, the seventh written below rsp.
    assert!(assembly.contains("\tmovl\t$6, %r9d\n"));
    assert!(assembly.contains("\tmovl\t$7, (%rsp)\n"));
    assert!(assembly.contains("\tsubq\t$4, %rsp\n"));
    assert!(assembly.contains("\taddq\t$4, %rsp\n"));
    // Callee: the seventh argument lives above the saved frame pointer.
    assert!(assembly.contains("\tmovl\t16(%rbp), %eax\n"));
}

#[test]
fn parse_errors_surface_the_offending_token() {
    let error = exp::compile("fn main() -> i32 { return 7 }", "main.exp").unwrap_err();
    let exp::CompileError::Reported(errors) = error else {
        panic!("expected reported diagnostics");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, exp::ErrorKind::ExpectedSemicolon);
    assert_eq!(errors[0].message, "`}`");
}

#[test]
fn typecheck_reports_every_failing_symbol() {
    let source = "fn f() -> i32 { return (1, 2); }\n\
                  fn g() -> i32 { return (3, 4); }";
    let error = exp::compile(source, "main.exp").unwrap_err();
    let exp::CompileError::Reported(errors) = error else {
        panic!("expected reported diagnostics");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|error| error.kind == exp::ErrorKind::TypeMismatch));
}

#[test]
fn mutual_recursion_is_rejected_not_diverging() {
    let source = "fn even(n: i32) -> i32 { return odd(n - 1); }\n\
                  fn odd(n: i32) -> i32 { return even(n - 1); }";
    let error = exp::compile(source, "main.exp").unwrap_err();
    let exp::CompileError::Reported(errors) = error else {
        panic!("expected reported diagnostics");
    };
    assert!(errors
        .iter()
        .any(|error| error.kind == exp::ErrorKind::RecursiveSymbolType));
}
