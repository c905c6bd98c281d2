//! The validation expression language.
//!
//! A single boolean expression over a `response` binding, e.g.
//! `response.status_code == 200 && 'ok' in response.text`. The grammar is
//! closed: only the listed fields, functions, and operators exist, and the
//! parser rejects everything else before any evaluation happens. The
//! evaluator in [`super::eval`] interprets the resulting AST against a
//! response snapshot; nothing here can reach the filesystem, the network,
//! or the process environment.

use crate::error::Error;

/// Fields of the `response` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseField {
    StatusCode,
    Text,
    Content,
    Headers,
    Cookies,
    Url,
    Elapsed,
    Encoding,
    Reason,
}

impl ResponseField {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "status_code" => Self::StatusCode,
            "text" => Self::Text,
            "content" => Self::Content,
            "headers" => Self::Headers,
            "cookies" => Self::Cookies,
            "url" => Self::Url,
            "elapsed" => Self::Elapsed,
            "encoding" => Self::Encoding,
            "reason" => Self::Reason,
            _ => return None,
        })
    }
}

/// The allowed free functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Len,
    Str,
    Int,
    Float,
    Bool,
    Lower,
    Upper,
    Strip,
    Json,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "lower" => Self::Lower,
            "upper" => Self::Upper,
            "strip" => Self::Strip,
            "json" => Self::Json,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Nil,
    Field(ResponseField),
    /// `response.json()`, the only method call.
    JsonBody,
    Call {
        func: Func,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Dot,
    Comma,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ch if ch.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| Error::Expression(format!("integer '{digits}' out of range")))?;
                tokens.push(Token::Int(value));
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        match chars.next() {
                            Some('n') => literal.push('\n'),
                            Some('t') => literal.push('\t'),
                            Some(escaped) => literal.push(escaped),
                            None => break,
                        }
                    } else {
                        literal.push(c);
                    }
                }
                if !closed {
                    return Err(Error::Expression("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(literal));
            }
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    return Err(Error::Expression(
                        "'=' is not an operator; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::And);
                } else {
                    return Err(Error::Expression(
                        "'&' is not an operator; use '&&'".to_string(),
                    ));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::Or);
                } else {
                    return Err(Error::Expression(
                        "'|' is not an operator; use '||'".to_string(),
                    ));
                }
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            other => {
                return Err(Error::Expression(format!(
                    "unexpected character '{other}' in expression"
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), Error> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            _ => Err(Error::Expression(format!("expected {what}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Ident(ident)) if ident == "in" => BinaryOp::In,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let operand = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        match self.next() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::Str(value)) => Ok(Expr::Str(value)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "closing ')'")?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => self.parse_ident(ident),
            Some(token) => Err(Error::Expression(format!("unexpected token {token:?}"))),
            None => Err(Error::Expression("unexpected end of expression".to_string())),
        }
    }

    fn parse_ident(&mut self, ident: String) -> Result<Expr, Error> {
        match ident.as_str() {
            "true" => return Ok(Expr::Bool(true)),
            "false" => return Ok(Expr::Bool(false)),
            "nil" => return Ok(Expr::Nil),
            "response" => return self.parse_response_selector(),
            _ => {}
        }

        if let Some(func) = Func::from_name(&ident) {
            self.expect(&Token::LParen, &format!("'(' after '{ident}'"))?;
            let mut args = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.next();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen, "closing ')' of call")?;
            return Ok(Expr::Call { func, args });
        }

        Err(Error::Expression(format!("unknown identifier '{ident}'")))
    }

    fn parse_response_selector(&mut self) -> Result<Expr, Error> {
        self.expect(&Token::Dot, "'.' after 'response'")?;
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            _ => {
                return Err(Error::Expression(
                    "expected a field name after 'response.'".to_string(),
                ));
            }
        };

        // response.json() is the only method; everything else must be a
        // bare field selector.
        if self.peek() == Some(&Token::LParen) {
            if name != "json" {
                return Err(Error::Expression(format!(
                    "response method '{name}' is not allowed"
                )));
            }
            self.next();
            self.expect(&Token::RParen, "closing ')' of response.json()")?;
            return Ok(Expr::JsonBody);
        }

        match ResponseField::from_name(&name) {
            Some(field) => Ok(Expr::Field(field)),
            None => Err(Error::Expression(format!(
                "response field '{name}' is not allowed"
            ))),
        }
    }
}

/// Parses an expression into its AST, rejecting every construct outside the
/// closed grammar. This is the static validation pass: anything that parses
/// is safe to interpret.
pub fn parse(input: &str) -> Result<Expr, Error> {
    if input.trim().is_empty() {
        return Err(Error::Expression("expression is empty".to_string()));
    }
    let tokens = lex(input)?;
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_expr()?;
    if parser.position != parser.tokens.len() {
        return Err(Error::Expression(
            "trailing tokens after expression".to_string(),
        ));
    }
    Ok(expr)
}

/// Checks an expression statically without evaluating it.
pub fn validate_expression(input: &str) -> Result<(), Error> {
    parse(input).map(|_| ())
}
