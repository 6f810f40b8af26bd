//! Assigns a type to every SSA local and to every function symbol.
//!
//! Symbols referenced before they are typed are checked on demand,
//! recursively. Arithmetic is committed to `i32` in this version even
//! though the IR carries every scalar width.
//
// TODO: the surface type policy for the other integer widths is undecided;
// the IR and the x86 model already carry them.

use std::collections::HashSet;

use tracing::debug;

use exp_ir::{Context, Function, Instruction, Name, Operand, Scalar, SymbolKind, Type, TypeId,
    Value};

use crate::error::{ErrorKind, SourceError};

/// Typecheck every symbol, collecting one error per failed symbol so a
/// single run reports as much as possible.
pub fn typecheck(context: &mut Context) -> Result<(), Vec<SourceError>> {
    let mut checker = Typechecker {
        context,
        typing: HashSet::new(),
    };

    let mut errors = Vec::new();
    for name in checker.context.symbols.names() {
        if let Err(error) = checker.typecheck_symbol(name) {
            errors.push(error);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct Typechecker<'a> {
    context: &'a mut Context,
    /// Symbols whose type is currently being computed; a re-entry means the
    /// symbol's type depends on itself.
    //
    // TODO: a two-pass scheme (declare signatures first) would type
    // mutually recursive functions instead of rejecting them.
    typing: HashSet<Name>,
}

impl Typechecker<'_> {
    fn typecheck_symbol(&mut self, name: Name) -> Result<(), SourceError> {
        if self
            .context
            .symbols
            .get(name)
            .is_some_and(|symbol| symbol.ty.is_some())
        {
            return Ok(());
        }

        if !self.typing.insert(name) {
            let text = self.context.strings.resolve(name).to_owned();
            return Err(error(ErrorKind::RecursiveSymbolType, format!("[{text}]")));
        }

        let result = self.typecheck_symbol_body(name);
        self.typing.remove(&name);
        result
    }

    fn typecheck_symbol_body(&mut self, name: Name) -> Result<(), SourceError> {
        debug!(symbol = self.context.strings.resolve(name), "typecheck");

        let symbol = self.context.symbols.at(name);
        if symbol.kind != SymbolKind::Function {
            let text = self.context.strings.resolve(name).to_owned();
            return Err(error(ErrorKind::UndefinedSymbol, format!("[{text}]")));
        }

        let mut function = std::mem::take(&mut self.context.symbols.at(name).function);
        let checked = self.typecheck_function(&mut function);
        let function_type = checked.map(|()| self.type_of_function(&function));
        self.context.symbols.at(name).function = function;

        let function_type = function_type?;
        self.context.symbols.at(name).ty = Some(function_type);
        Ok(())
    }

    fn typecheck_function(&mut self, function: &mut Function) -> Result<(), SourceError> {
        for index in 0..function.block.len() {
            let instruction = function.block.get(index).clone();
            match instruction {
                Instruction::Load { dst, src } => {
                    let ty = self.type_of_operand(function, &src)?;
                    function.local_at_mut(dst).ty = Some(ty);
                }
                Instruction::Negate { dst, src } => {
                    let i32_type = self.context.types.i32_type();
                    self.expect_operand(function, &src, i32_type)?;
                    function.local_at_mut(dst).ty = Some(i32_type);
                }
                Instruction::Add { dst, lhs, rhs }
                | Instruction::Sub { dst, lhs, rhs }
                | Instruction::Mul { dst, lhs, rhs }
                | Instruction::Div { dst, lhs, rhs }
                | Instruction::Rem { dst, lhs, rhs } => {
                    let i32_type = self.context.types.i32_type();
                    self.expect_operand(function, &lhs, i32_type)?;
                    self.expect_operand(function, &rhs, i32_type)?;
                    function.local_at_mut(dst).ty = Some(i32_type);
                }
                Instruction::Dot { dst, tuple, index } => {
                    let ty = self.typecheck_dot(function, &tuple, &index)?;
                    function.local_at_mut(dst).ty = Some(ty);
                }
                Instruction::Call {
                    dst,
                    callee,
                    arguments,
                } => {
                    let ty = self.typecheck_call(function, &callee, &arguments)?;
                    function.local_at_mut(dst).ty = Some(ty);
                }
                Instruction::Return { value } => {
                    let ty = self.type_of_operand(function, &value)?;
                    match function.return_type {
                        None => function.return_type = Some(ty),
                        Some(expected) if expected != ty => {
                            return Err(self.type_mismatch(expected, ty));
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        // A body that never returns yields nil.
        if function.return_type.is_none() {
            function.return_type = Some(self.context.types.nil_type());
        }
        Ok(())
    }

    fn typecheck_dot(
        &mut self,
        function: &Function,
        tuple: &Operand,
        index: &Operand,
    ) -> Result<TypeId, SourceError> {
        let tuple_ty = self.type_of_operand(function, tuple)?;
        let Type::Tuple(elements) = self.context.types.get(tuple_ty) else {
            let rendered = self.context.types.display(tuple_ty);
            return Err(error(
                ErrorKind::TypeNotIndexable,
                format!("Type: [{rendered}]"),
            ));
        };
        let elements = elements.elements.clone();

        let Operand::Immediate(Scalar::I32(at)) = index else {
            let index_ty = self.type_of_operand(function, index)?;
            let rendered = self.context.types.display(index_ty);
            return Err(error(
                ErrorKind::TupleIndexNotImmediate,
                format!("Index type: [{rendered}]"),
            ));
        };

        if *at < 0 || *at as usize >= elements.len() {
            return Err(error(
                ErrorKind::TupleIndexOutOfBounds,
                format!("Index: [{at}] Bounds: [0-{}]", elements.len()),
            ));
        }

        Ok(elements[*at as usize])
    }

    fn typecheck_call(
        &mut self,
        function: &Function,
        callee: &Operand,
        arguments: &Operand,
    ) -> Result<TypeId, SourceError> {
        let callee_ty = self.type_of_operand(function, callee)?;
        let Type::Function(signature) = self.context.types.get(callee_ty) else {
            let rendered = self.context.types.display(callee_ty);
            return Err(error(
                ErrorKind::TypeNotCallable,
                format!("Type: [{rendered}]"),
            ));
        };
        let formal = signature.arguments.elements.clone();
        let result = signature.result;

        let Operand::Constant(id) = arguments else {
            unreachable!("call arguments are a constant tuple")
        };
        let Value::Tuple(actual) = self.context.constants.get(*id) else {
            unreachable!("call arguments are a constant tuple")
        };
        let actual = actual.elements.clone();

        if formal.len() != actual.len() {
            return Err(error(
                ErrorKind::ArgumentCountMismatch,
                format!(
                    "Expected [{}] arguments. Have [{}] arguments.",
                    formal.len(),
                    actual.len()
                ),
            ));
        }

        for (expected, operand) in formal.iter().zip(&actual) {
            self.expect_operand(function, operand, *expected)?;
        }

        Ok(result)
    }

    fn expect_operand(
        &mut self,
        function: &Function,
        operand: &Operand,
        expected: TypeId,
    ) -> Result<(), SourceError> {
        let actual = self.type_of_operand(function, operand)?;
        if actual != expected {
            return Err(self.type_mismatch(expected, actual));
        }
        Ok(())
    }

    fn type_of_operand(
        &mut self,
        function: &Function,
        operand: &Operand,
    ) -> Result<TypeId, SourceError> {
        match operand {
            // A typed declaration always precedes a use, so an untyped
            // local here is a compiler bug, not a user error.
            Operand::Ssa(ssa) => Ok(function
                .local_at(*ssa)
                .ty
                .expect("ssa local typed at its declaration")),
            Operand::Immediate(scalar) => Ok(scalar.type_of(&self.context.types)),
            Operand::Constant(id) => {
                let value = self.context.constants.get(*id).clone();
                self.type_of_value(function, &value)
            }
            Operand::Label(label) => {
                let name = self.context.labels.get(*label);
                match self.context.symbols.get(name).and_then(|symbol| symbol.ty) {
                    Some(ty) => Ok(ty),
                    None => {
                        self.typecheck_symbol(name)?;
                        Ok(self
                            .context
                            .symbols
                            .get(name)
                            .and_then(|symbol| symbol.ty)
                            .expect("symbol typed by typecheck_symbol"))
                    }
                }
            }
        }
    }

    fn type_of_value(
        &mut self,
        function: &Function,
        value: &Value,
    ) -> Result<TypeId, SourceError> {
        match value {
            Value::Uninitialized => Ok(self.context.types.nil_type()),
            Value::Scalar(scalar) => Ok(scalar.type_of(&self.context.types)),
            Value::Tuple(tuple) => {
                let mut elements = Vec::with_capacity(tuple.len());
                for operand in tuple.elements.clone() {
                    elements.push(self.type_of_operand(function, &operand)?);
                }
                Ok(self.context.types.tuple_type(elements.into()))
            }
        }
    }

    fn type_of_function(&mut self, function: &Function) -> TypeId {
        let arguments: Vec<TypeId> = function
            .arguments
            .iter()
            .map(|argument| argument.ty)
            .collect();
        let result = function
            .return_type
            .unwrap_or_else(|| self.context.types.nil_type());
        self.context.types.function_type(result, arguments.into())
    }

    fn type_mismatch(&self, expected: TypeId, actual: TypeId) -> SourceError {
        let expected = self.context.types.display(expected);
        let actual = self.context.types.display(actual);
        error(
            ErrorKind::TypeMismatch,
            format!("Expected type: [{expected}] Actual type: [{actual}]"),
        )
    }
}

// Typecheck diagnostics carry no line information yet.
fn error(kind: ErrorKind, message: String) -> SourceError {
    SourceError::new(kind, message, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use exp_ir::{Instruction, Tuple};

    fn context_with_main(build: impl FnOnce(&mut Function, &mut Context)) -> Context {
        let mut context = Context::new("test.exp");
        let name = context.intern("main");
        context.enter_function(name);
        let mut function = std::mem::take(context.current_function_mut());
        build(&mut function, &mut context);
        *context.current_function_mut() = function;
        context.leave_function();
        context
    }

    #[test]
    fn return_infers_the_function_type() {
        let mut context = context_with_main(|f, _| {
            f.append(Instruction::Return {
                value: Operand::Immediate(Scalar::I32(7)),
            });
        });

        typecheck(&mut context).unwrap();
        let name = context.intern("main");
        let ty = context.symbols.get(name).unwrap().ty.unwrap();
        assert_eq!(context.types.display(ty), "fn () -> i32");
    }

    #[test]
    fn annotated_return_type_is_checked() {
        let mut context = context_with_main(|f, ctx| {
            f.return_type = Some(ctx.types.bool_type());
            f.append(Instruction::Return {
                value: Operand::Immediate(Scalar::I32(7)),
            });
        });

        let errors = typecheck(&mut context).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn arithmetic_requires_i32() {
        let mut context = context_with_main(|f, _| {
            let dst = f.declare_local();
            f.append(Instruction::Add {
                dst,
                lhs: Operand::Immediate(Scalar::I32(1)),
                rhs: Operand::Immediate(Scalar::Bool(true)),
            });
            f.append(Instruction::Return {
                value: Operand::Ssa(dst),
            });
        });

        let errors = typecheck(&mut context).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn dot_checks_bounds() {
        let mut context = context_with_main(|f, ctx| {
            let tuple = ctx.constants_push(Value::Tuple(Tuple {
                elements: vec![
                    Operand::Immediate(Scalar::I32(1)),
                    Operand::Immediate(Scalar::I32(2)),
                ],
            }));
            let loaded = f.declare_local();
            f.append(Instruction::Load {
                dst: loaded,
                src: Operand::Constant(tuple),
            });
            let projected = f.declare_local();
            f.append(Instruction::Dot {
                dst: projected,
                tuple: Operand::Ssa(loaded),
                index: Operand::Immediate(Scalar::I32(5)),
            });
            f.append(Instruction::Return {
                value: Operand::Ssa(projected),
            });
        });

        let errors = typecheck(&mut context).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::TupleIndexOutOfBounds);
    }

    #[test]
    fn dot_requires_a_tuple() {
        let mut context = context_with_main(|f, _| {
            let loaded = f.declare_local();
            f.append(Instruction::Load {
                dst: loaded,
                src: Operand::Immediate(Scalar::I32(3)),
            });
            let projected = f.declare_local();
            f.append(Instruction::Dot {
                dst: projected,
                tuple: Operand::Ssa(loaded),
                index: Operand::Immediate(Scalar::I32(0)),
            });
            f.append(Instruction::Return {
                value: Operand::Ssa(projected),
            });
        });

        let errors = typecheck(&mut context).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::TypeNotIndexable);
    }

    #[test]
    fn calling_an_undefined_symbol_is_reported() {
        let mut context = Context::new("test.exp");
        let main = context.intern("main");
        let missing = context.intern("missing");
        let label = context.labels_push(missing);
        // Insert the undefined symbol as a call target.
        context.symbols.at(missing);
        context.enter_function(main);
        let arguments = context.constants_push(Value::Tuple(Tuple::default()));
        let function = context.current_function_mut();
        let dst = function.declare_local();
        function.append(Instruction::Call {
            dst,
            callee: Operand::Label(label),
            arguments: Operand::Constant(arguments),
        });
        function.append(Instruction::Return {
            value: Operand::Ssa(dst),
        });
        context.leave_function();

        let errors = typecheck(&mut context).unwrap_err();
        assert!(errors
            .iter()
            .any(|error| error.kind == ErrorKind::UndefinedSymbol));
    }

    #[test]
    fn typechecking_twice_is_deterministic() {
        let mut context = context_with_main(|f, _| {
            let dst = f.declare_local();
            f.append(Instruction::Add {
                dst,
                lhs: Operand::Immediate(Scalar::I32(1)),
                rhs: Operand::Immediate(Scalar::I32(2)),
            });
            f.append(Instruction::Return {
                value: Operand::Ssa(dst),
            });
        });

        typecheck(&mut context).unwrap();
        let name = context.intern("main");
        let first = context.symbols.get(name).unwrap().ty;
        typecheck(&mut context).unwrap();
        assert_eq!(context.symbols.get(name).unwrap().ty, first);
    }
}
