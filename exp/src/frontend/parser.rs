//! Pratt parser building SSA IR as it goes.

use exp_ir::{Context, Instruction, Operand, Scalar, Tuple, TypeId, Value};

use crate::error::{ErrorKind, SourceError};

use super::lexer::{Lexer, Token, TokenKind};

// Binding powers, loosest to tightest.
const PREC_TERM: u8 = 1;
const PREC_FACTOR: u8 = 2;
const PREC_UNARY: u8 = 3;
const PREC_CALL: u8 = 4;
const PREC_PRIMARY: u8 = 5;

/// Parse a compilation unit into `context`.
pub fn parse(source: &str, context: &mut Context) -> Result<(), SourceError> {
    let mut parser = Parser::new(source, context)?;
    while parser.current.kind != TokenKind::End {
        parser.function()?;
    }
    Ok(())
}

struct Parser<'a, 'c> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    context: &'c mut Context,
}

impl<'a, 'c> Parser<'a, 'c> {
    fn new(source: &'a str, context: &'c mut Context) -> Result<Self, SourceError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.scan()?;
        Ok(Self {
            lexer,
            current,
            context,
        })
    }

    fn advance(&mut self) -> Result<(), SourceError> {
        self.current = self.lexer.scan()?;
        Ok(())
    }

    fn error(&self, kind: ErrorKind) -> SourceError {
        SourceError::new(
            kind,
            format!("`{}`", self.current.text),
            self.current.line,
        )
    }

    fn expect(&mut self, kind: TokenKind, error: ErrorKind) -> Result<(), SourceError> {
        if self.current.kind != kind {
            return Err(self.error(error));
        }
        self.advance()
    }

    /// `fn name(arg: type, ...) -> type { statement* }`
    fn function(&mut self) -> Result<(), SourceError> {
        self.expect(TokenKind::KeywordFn, ErrorKind::ExpectedKeywordFn)?;

        if self.current.kind != TokenKind::Identifier {
            return Err(self.error(ErrorKind::ExpectedIdentifier));
        }
        let name = self.context.intern(self.current.text);
        self.advance()?;

        self.context.enter_function(name);
        let result = self.function_signature_and_body();
        self.context.leave_function();
        result
    }

    fn function_signature_and_body(&mut self) -> Result<(), SourceError> {
        self.expect(TokenKind::BeginParen, ErrorKind::ExpectedBeginParen)?;
        if self.current.kind != TokenKind::EndParen {
            loop {
                self.formal_argument()?;
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(TokenKind::EndParen, ErrorKind::ExpectedEndParen)?;

        // The annotation is optional; an unannotated function's return
        // type is inferred from its first return.
        if self.current.kind == TokenKind::Arrow {
            self.advance()?;
            let return_type = self.parse_type()?;
            self.context.current_function_mut().return_type = Some(return_type);
        }

        self.expect(TokenKind::BeginBrace, ErrorKind::ExpectedBeginBrace)?;
        while !matches!(self.current.kind, TokenKind::EndBrace | TokenKind::End) {
            self.statement()?;
        }
        self.expect(TokenKind::EndBrace, ErrorKind::ExpectedEndBrace)
    }

    fn formal_argument(&mut self) -> Result<(), SourceError> {
        if self.current.kind != TokenKind::Identifier {
            return Err(self.error(ErrorKind::ExpectedIdentifier));
        }
        let name = self.context.intern(self.current.text);
        self.advance()?;
        self.expect(TokenKind::Colon, ErrorKind::ExpectedColon)?;
        let ty = self.parse_type()?;
        self.context
            .current_function_mut()
            .declare_argument(name, ty);
        Ok(())
    }

    fn parse_type(&mut self) -> Result<TypeId, SourceError> {
        let scalar = match self.current.kind {
            TokenKind::TypeNil => Some(self.context.types.nil_type()),
            TokenKind::TypeBool => Some(self.context.types.bool_type()),
            TokenKind::TypeI8 => Some(self.context.types.i8_type()),
            TokenKind::TypeI16 => Some(self.context.types.i16_type()),
            TokenKind::TypeI32 => Some(self.context.types.i32_type()),
            TokenKind::TypeI64 => Some(self.context.types.i64_type()),
            TokenKind::TypeU8 => Some(self.context.types.u8_type()),
            TokenKind::TypeU16 => Some(self.context.types.u16_type()),
            TokenKind::TypeU32 => Some(self.context.types.u32_type()),
            TokenKind::TypeU64 => Some(self.context.types.u64_type()),
            _ => None,
        };
        if let Some(ty) = scalar {
            self.advance()?;
            return Ok(ty);
        }

        if self.current.kind != TokenKind::BeginParen {
            return Err(self.error(ErrorKind::ExpectedType));
        }
        self.advance()?;

        if self.current.kind == TokenKind::EndParen {
            self.advance()?;
            return Ok(self.context.types.nil_type());
        }

        let mut elements = vec![self.parse_type()?];
        while self.current.kind == TokenKind::Comma {
            self.advance()?;
            elements.push(self.parse_type()?);
        }
        self.expect(TokenKind::EndParen, ErrorKind::ExpectedEndParen)?;

        // A 1-tuple is its element.
        if elements.len() == 1 {
            return Ok(elements[0]);
        }
        Ok(self.context.types.tuple_type(elements.into()))
    }

    fn statement(&mut self) -> Result<(), SourceError> {
        match self.current.kind {
            TokenKind::KeywordReturn => {
                self.advance()?;
                let value = self.expression()?;
                self.expect(TokenKind::Semicolon, ErrorKind::ExpectedSemicolon)?;
                self.context
                    .current_function_mut()
                    .append(Instruction::Return { value });
                Ok(())
            }
            TokenKind::KeywordConst => {
                self.advance()?;
                if self.current.kind != TokenKind::Identifier {
                    return Err(self.error(ErrorKind::ExpectedIdentifier));
                }
                let name = self.context.intern(self.current.text);
                self.advance()?;
                self.expect(TokenKind::Equal, ErrorKind::ExpectedEqual)?;
                let src = self.expression()?;
                self.expect(TokenKind::Semicolon, ErrorKind::ExpectedSemicolon)?;

                let function = self.context.current_function_mut();
                let dst = function.declare_local();
                function.local_at_mut(dst).name = Some(name);
                function.append(Instruction::Load { dst, src });
                Ok(())
            }
            _ => Err(self.error(ErrorKind::ExpectedExpression)),
        }
    }

    fn expression(&mut self) -> Result<Operand, SourceError> {
        self.precedence(PREC_TERM)
    }

    fn precedence(&mut self, min: u8) -> Result<Operand, SourceError> {
        let mut lhs = self.prefix()?;
        loop {
            lhs = match self.current.kind {
                TokenKind::Plus | TokenKind::Minus if PREC_TERM >= min => {
                    self.binary(lhs, PREC_TERM)?
                }
                TokenKind::Star | TokenKind::Slash | TokenKind::Percent
                    if PREC_FACTOR >= min =>
                {
                    self.binary(lhs, PREC_FACTOR)?
                }
                TokenKind::Dot if PREC_CALL >= min => self.projection(lhs)?,
                TokenKind::BeginParen if PREC_CALL >= min => self.call(lhs)?,
                _ => return Ok(lhs),
            };
        }
    }

    fn prefix(&mut self) -> Result<Operand, SourceError> {
        match self.current.kind {
            TokenKind::Integer => self.integer_literal(),
            TokenKind::Minus => {
                self.advance()?;
                let src = self.precedence(PREC_UNARY)?;
                let function = self.context.current_function_mut();
                let dst = function.declare_local();
                function.append(Instruction::Negate { dst, src });
                Ok(Operand::Ssa(dst))
            }
            TokenKind::Identifier => self.identifier(),
            TokenKind::BeginParen => self.parenthesized(),
            _ => Err(self.error(ErrorKind::ExpectedExpression)),
        }
    }

    fn integer_literal(&mut self) -> Result<Operand, SourceError> {
        let value: i64 = self
            .current
            .text
            .parse()
            .map_err(|_| self.error(ErrorKind::IntegerLiteralOutOfRange))?;
        self.advance()?;

        // Inline immediates stay as narrow as they fit.
        match i32::try_from(value) {
            Ok(value) => Ok(Operand::Immediate(Scalar::I32(value))),
            Err(_) => Ok(Operand::Immediate(Scalar::I64(value))),
        }
    }

    /// Formal argument, then named local, then global symbol.
    fn identifier(&mut self) -> Result<Operand, SourceError> {
        let name = self.context.intern(self.current.text);
        self.advance()?;

        let function = self.context.current_function_mut();
        if let Some(argument) = function
            .arguments
            .iter()
            .find(|argument| argument.name == name)
        {
            return Ok(Operand::Ssa(argument.ssa));
        }
        if let Some(local) = function.local_named(name) {
            return Ok(Operand::Ssa(local.ssa));
        }

        let label = self.context.labels_push(name);
        Ok(Operand::Label(label))
    }

    /// `( )` is nil, `(e)` is `e`, `(e, ...)` is a tuple constant.
    fn parenthesized(&mut self) -> Result<Operand, SourceError> {
        self.advance()?;

        if self.current.kind == TokenKind::EndParen {
            self.advance()?;
            return Ok(Operand::Immediate(Scalar::Nil));
        }

        let first = self.expression()?;
        if self.current.kind != TokenKind::Comma {
            self.expect(TokenKind::EndParen, ErrorKind::ExpectedEndParen)?;
            return Ok(first);
        }

        let mut elements = vec![first];
        while self.current.kind == TokenKind::Comma {
            self.advance()?;
            elements.push(self.expression()?);
        }
        self.expect(TokenKind::EndParen, ErrorKind::ExpectedEndParen)?;

        let constant = self.context.constants_push(Value::Tuple(Tuple { elements }));
        Ok(Operand::Constant(constant))
    }

    fn binary(&mut self, lhs: Operand, prec: u8) -> Result<Operand, SourceError> {
        let operator = self.current.kind;
        self.advance()?;
        let rhs = self.precedence(prec + 1)?;

        let function = self.context.current_function_mut();
        let dst = function.declare_local();
        let instruction = match operator {
            TokenKind::Plus => Instruction::Add { dst, lhs, rhs },
            TokenKind::Minus => Instruction::Sub { dst, lhs, rhs },
            TokenKind::Star => Instruction::Mul { dst, lhs, rhs },
            TokenKind::Slash => Instruction::Div { dst, lhs, rhs },
            TokenKind::Percent => Instruction::Rem { dst, lhs, rhs },
            _ => unreachable!("binary called on a non-operator token"),
        };
        function.append(instruction);
        Ok(Operand::Ssa(dst))
    }

    /// `e.N`: tuple projection. The index parses as a primary expression;
    /// the typechecker enforces that it is an immediate integer.
    fn projection(&mut self, tuple: Operand) -> Result<Operand, SourceError> {
        self.advance()?;
        let index = self.precedence(PREC_PRIMARY)?;

        let function = self.context.current_function_mut();
        let dst = function.declare_local();
        function.append(Instruction::Dot { dst, tuple, index });
        Ok(Operand::Ssa(dst))
    }

    /// `e(arg, ...)`: the arguments become a constant tuple.
    fn call(&mut self, callee: Operand) -> Result<Operand, SourceError> {
        self.advance()?;

        let mut elements = Vec::new();
        if self.current.kind != TokenKind::EndParen {
            loop {
                elements.push(self.expression()?);
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(TokenKind::EndParen, ErrorKind::ExpectedEndParen)?;

        let arguments = self.context.constants_push(Value::Tuple(Tuple { elements }));
        let function = self.context.current_function_mut();
        let dst = function.declare_local();
        function.append(Instruction::Call {
            dst,
            callee,
            arguments: Operand::Constant(arguments),
        });
        Ok(Operand::Ssa(dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exp_ir::Opcode;

    fn parse_source(source: &str) -> Context {
        let mut context = Context::new("test.exp");
        parse(source, &mut context).unwrap();
        context
    }

    fn main_opcodes(context: &Context) -> Vec<Opcode> {
        let name = *context
            .symbols
            .names()
            .iter()
            .find(|&&name| context.strings.resolve(name) == "main")
            .unwrap();
        context
            .symbols
            .get(name)
            .unwrap()
            .function
            .block
            .iter()
            .map(|instruction| instruction.opcode())
            .collect()
    }

    #[test]
    fn return_of_a_literal() {
        let context = parse_source("fn main() -> i32 { return 7; }");
        assert_eq!(main_opcodes(&context), vec![Opcode::Return]);
    }

    #[test]
    fn precedence_factors_bind_tighter() {
        // 6 * 7 / 3 - 5 parses as ((6 * 7) / 3) - 5.
        let context = parse_source("fn main() -> i32 { return 6 * 7 / 3 - 5; }");
        assert_eq!(
            main_opcodes(&context),
            vec![Opcode::Mul, Opcode::Div, Opcode::Sub, Opcode::Return]
        );
    }

    #[test]
    fn unary_minus_emits_negate() {
        let context = parse_source("fn main() -> i32 { return -3 + 10; }");
        assert_eq!(
            main_opcodes(&context),
            vec![Opcode::Negate, Opcode::Add, Opcode::Return]
        );
    }

    #[test]
    fn const_binds_a_named_local() {
        let context = parse_source(
            "fn main() -> i32 { const t = (1, 2, 3); return t.1 + t.2; }",
        );
        assert_eq!(
            main_opcodes(&context),
            vec![
                Opcode::Load,
                Opcode::Dot,
                Opcode::Dot,
                Opcode::Add,
                Opcode::Return
            ]
        );
    }

    #[test]
    fn one_tuples_collapse() {
        let context = parse_source("fn main() -> i32 { return (7); }");
        assert_eq!(main_opcodes(&context), vec![Opcode::Return]);
        assert!(context.constants.is_empty());
    }

    #[test]
    fn calls_take_a_constant_argument_tuple() {
        let context = parse_source(
            "fn add(a: i32, b: i32) -> i32 { return a + b; }\n\
             fn main() -> i32 { return add(40, 2); }",
        );
        assert_eq!(main_opcodes(&context), vec![Opcode::Call, Opcode::Return]);
        assert_eq!(context.constants.len(), 1);
    }

    #[test]
    fn missing_semicolon_is_reported_with_line() {
        let mut context = Context::new("test.exp");
        let error = parse("fn main() -> i32 {\n return 7 }", &mut context).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ExpectedSemicolon);
        assert_eq!(error.line, 2);
    }

    #[test]
    fn arguments_resolve_before_globals() {
        let context = parse_source("fn id(x: i32) -> i32 { return x; }");
        let name = *context.symbols.names().first().unwrap();
        let function = &context.symbols.get(name).unwrap().function;
        assert_eq!(function.arguments.len(), 1);
        assert!(matches!(
            function.block.get(0),
            Instruction::Return {
                value: Operand::Ssa(ssa)
            } if ssa.index() == 0
        ));
    }
}
