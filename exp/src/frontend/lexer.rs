use crate::error::{ErrorKind, SourceError};

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    BeginParen,
    EndParen,
    BeginBrace,
    EndBrace,
    Semicolon,
    Colon,
    Comma,
    Dot,
    Equal,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Arrow,
    Integer,
    Identifier,
    KeywordFn,
    KeywordConst,
    KeywordReturn,
    TypeNil,
    TypeBool,
    TypeI8,
    TypeI16,
    TypeI32,
    TypeI64,
    TypeU8,
    TypeU16,
    TypeU32,
    TypeU64,
    End,
}

/// One scanned token: kind, source text, and the line it starts on.
#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: u32,
}

/// Hand-rolled scanner with line tracking and `/* */` comments.
pub struct Lexer<'a> {
    source: &'a str,
    position: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            position: 0,
            line: 1,
        }
    }

    pub fn scan(&mut self) -> Result<Token<'a>, SourceError> {
        self.skip_trivia()?;

        let start = self.position;
        let line = self.line;
        let Some(first) = self.peek() else {
            return Ok(self.token(TokenKind::End, start, line));
        };

        let kind = match first {
            '(' => self.single(TokenKind::BeginParen),
            ')' => self.single(TokenKind::EndParen),
            '{' => self.single(TokenKind::BeginBrace),
            '}' => self.single(TokenKind::EndBrace),
            ';' => self.single(TokenKind::Semicolon),
            ':' => self.single(TokenKind::Colon),
            ',' => self.single(TokenKind::Comma),
            '.' => self.single(TokenKind::Dot),
            '=' => self.single(TokenKind::Equal),
            '+' => self.single(TokenKind::Plus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),
            '-' => {
                self.advance();
                if self.peek() == Some('>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '0'..='9' => {
                while matches!(self.peek(), Some('0'..='9')) {
                    self.advance();
                }
                TokenKind::Integer
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                while matches!(self.peek(), Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_')) {
                    self.advance();
                }
                keyword_or_identifier(&self.source[start..self.position])
            }
            _ => {
                self.advance();
                return Err(SourceError::new(
                    ErrorKind::ExpectedExpression,
                    format!("`{}`", &self.source[start..self.position]),
                    line,
                ));
            }
        };

        Ok(self.token(kind, start, line))
    }

    fn token(&self, kind: TokenKind, start: usize, line: u32) -> Token<'a> {
        Token {
            kind,
            text: &self.source[start..self.position],
            line,
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn skip_trivia(&mut self) -> Result<(), SourceError> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.skip_comment()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), SourceError> {
        let line = self.line;
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => {
                    return Err(SourceError::new(
                        ErrorKind::ExpectedEndComment,
                        "`/*`",
                        line,
                    ));
                }
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.position..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source[self.position..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.position += c.len_utf8();
        }
    }
}

fn keyword_or_identifier(text: &str) -> TokenKind {
    match text {
        "fn" => TokenKind::KeywordFn,
        "const" => TokenKind::KeywordConst,
        "return" => TokenKind::KeywordReturn,
        "nil" => TokenKind::TypeNil,
        "bool" => TokenKind::TypeBool,
        "i8" => TokenKind::TypeI8,
        "i16" => TokenKind::TypeI16,
        "i32" => TokenKind::TypeI32,
        "i64" => TokenKind::TypeI64,
        "u8" => TokenKind::TypeU8,
        "u16" => TokenKind::TypeU16,
        "u32" => TokenKind::TypeU32,
        "u64" => TokenKind::TypeU64,
        _ => TokenKind::Identifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = lexer.scan().unwrap();
            if token.kind == TokenKind::End {
                return kinds;
            }
            kinds.push(token.kind);
        }
    }

    #[test]
    fn scans_a_function_header() {
        assert_eq!(
            kinds("fn main() -> i32 {"),
            vec![
                TokenKind::KeywordFn,
                TokenKind::Identifier,
                TokenKind::BeginParen,
                TokenKind::EndParen,
                TokenKind::Arrow,
                TokenKind::TypeI32,
                TokenKind::BeginBrace,
            ]
        );
    }

    #[test]
    fn minus_and_arrow_disambiguate() {
        assert_eq!(
            kinds("- ->"),
            vec![TokenKind::Minus, TokenKind::Arrow]
        );
    }

    #[test]
    fn comments_are_trivia_and_track_lines() {
        let mut lexer = Lexer::new("/* one\ntwo */ return");
        let token = lexer.scan().unwrap();
        assert_eq!(token.kind, TokenKind::KeywordReturn);
        assert_eq!(token.line, 2);
    }

    #[test]
    fn unterminated_comment_is_reported() {
        let mut lexer = Lexer::new("/* never closed");
        let error = lexer.scan().unwrap_err();
        assert_eq!(error.kind, ErrorKind::ExpectedEndComment);
    }
}
