//! Lexer and recursive-descent parser for the telemetry expression language.
//!
//! Grammar, loosest to tightest binding:
//!
//! ```text
//! expr     := term (('+' | '-') term)*
//! term     := unary (('*' | '/' | '%') unary)*
//! unary    := '-' unary | power
//! power    := postfix ('^' unary)?          // right-associative
//! postfix  := primary ('.' IDENT)*
//! primary  := INT | FLOAT | STRING | IDENT | IDENT '(' args ')' | '(' expr ')'
//! ```
//!
//! Callee names are resolved against the builtin table at parse time, so an
//! unknown function is a configuration error, not a runtime surprise.

use super::{BinaryOp, Expr, FunctionType, UnaryOp};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected character {ch:?} at byte {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("unterminated string literal starting at byte {position}")]
    UnterminatedString { position: usize },

    #[error("invalid numeric literal {literal:?}")]
    InvalidNumber { literal: String },

    #[error("unexpected token {found:?} at byte {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function {0:?}")]
    UnknownFunction(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    LParen,
    RParen,
    Dot,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Int(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Str(s) => format!("{:?}", s),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Caret => "^".into(),
            Token::Percent => "%".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Dot => ".".into(),
            Token::Comma => ",".into(),
        }
    }
}

fn lex(src: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let bytes: Vec<char> = src.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        let ch = bytes[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push((Token::Plus, i));
                i += 1;
            }
            '-' => {
                tokens.push((Token::Minus, i));
                i += 1;
            }
            '*' => {
                tokens.push((Token::Star, i));
                i += 1;
            }
            '/' => {
                tokens.push((Token::Slash, i));
                i += 1;
            }
            '^' => {
                tokens.push((Token::Caret, i));
                i += 1;
            }
            '%' => {
                tokens.push((Token::Percent, i));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, i));
                i += 1;
            }
            '.' => {
                tokens.push((Token::Dot, i));
                i += 1;
            }
            '"' | '\'' => {
                let quote = ch;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match bytes.get(i) {
                        None => return Err(ParseError::UnterminatedString { position: start }),
                        Some(&c) if c == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            i += 1;
                            match bytes.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&c) => s.push(c),
                                None => {
                                    return Err(ParseError::UnterminatedString { position: start })
                                }
                            }
                            i += 1;
                        }
                        Some(&c) => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push((Token::Str(s), start));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                // A '.' is part of the number only when followed by a digit;
                // otherwise it is a selector on an int literal.
                if i + 1 < bytes.len() && bytes[i] == '.' && bytes[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal: String = bytes[start..i].iter().collect();
                if is_float {
                    let v = literal
                        .parse::<f64>()
                        .map_err(|_| ParseError::InvalidNumber {
                            literal: literal.clone(),
                        })?;
                    tokens.push((Token::Float(v), start));
                } else {
                    let v = literal
                        .parse::<i64>()
                        .map_err(|_| ParseError::InvalidNumber {
                            literal: literal.clone(),
                        })?;
                    tokens.push((Token::Int(v), start));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == '_') {
                    i += 1;
                }
                let ident: String = bytes[start..i].iter().collect();
                tokens.push((Token::Ident(ident), start));
            }
            other => return Err(ParseError::UnexpectedChar { ch: other, position: i }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<(Token, usize), ParseError> {
        let item = self.tokens.get(self.pos).cloned().ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let (token, position) = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: token.describe(),
                position,
            })
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            let (token, position) = self.next()?;
            let field = match token {
                Token::Ident(name) => name,
                other => {
                    return Err(ParseError::UnexpectedToken {
                        found: other.describe(),
                        position,
                    })
                }
            };
            expr = Expr::Selector {
                base: Box::new(expr),
                field,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let (token, position) = self.next()?;
        match token {
            Token::Int(i) => Ok(Expr::Int(i)),
            Token::Float(f) => Ok(Expr::Float(f)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let function = FunctionType::from_name(&name)
                        .ok_or(ParseError::UnknownFunction(name))?;
                    let mut args = Vec::new();
                    if matches!(self.peek(), Some(Token::RParen)) {
                        self.pos += 1;
                    } else {
                        loop {
                            args.push(self.expression()?);
                            match self.next()? {
                                (Token::Comma, _) => continue,
                                (Token::RParen, _) => break,
                                (other, position) => {
                                    return Err(ParseError::UnexpectedToken {
                                        found: other.describe(),
                                        position,
                                    })
                                }
                            }
                        }
                    }
                    Ok(Expr::Call { function, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                position,
            }),
        }
    }
}

/// Parses an expression source string into an immutable AST.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((token, position)) => Err(ParseError::UnexpectedToken {
            found: token.describe(),
            position: *position,
        }),
    }
}
