//! Recursive descent parser for the expression language.
//!
//! Converts text to an [`Ast`] with positionful error messages. Precedence,
//! lowest to highest: `||` / `or`, `&&` / `and`, comparisons, `+ -`,
//! `* / %`, unary `- !`/`not`, postfix index/field/call, primary.
//!
//! Function calls are checked against the builtin whitelist here so that an
//! unknown function is a load-time error, not a surprise at some later tick.

use super::eval::is_builtin;
use super::{Ast, BinOp, ParseError, UnaryOp};

pub(crate) fn parse(input: &str) -> Result<Ast, ParseError> {
    let mut parser = Parser::new(input);
    let ast = parser.parse_or()?;
    parser.skip_whitespace();
    if parser.pos < parser.input.len() {
        return Err(parser.error(format!("unexpected '{}'", parser.peek_word())));
    }
    Ok(ast)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn consume_str(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Consume a keyword only when it is not a prefix of a longer identifier.
    fn consume_keyword(&mut self, keyword: &str) -> bool {
        let remaining = self.remaining();
        let is_keyword = remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
        if is_keyword {
            self.pos += keyword.len();
        }
        is_keyword
    }

    fn peek_word(&self) -> String {
        let mut word = String::new();
        for ch in self.remaining().chars() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
            } else {
                break;
            }
        }
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_or(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if self.consume_str("||") || self.consume_keyword("or") {
                let right = self.parse_and()?;
                left = Ast::Binary {
                    op: BinOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_not()?;
        loop {
            self.skip_whitespace();
            if self.consume_str("&&") || self.consume_keyword("and") {
                let right = self.parse_not()?;
                left = Ast::Binary {
                    op: BinOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_not(&mut self) -> Result<Ast, ParseError> {
        self.skip_whitespace();
        if self.peek() == Some('!') && !self.remaining().starts_with("!=") {
            self.advance();
            let expr = self.parse_not()?;
            return Ok(Ast::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        if self.consume_keyword("not") {
            let expr = self.parse_not()?;
            return Ok(Ast::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Ast, ParseError> {
        let left = self.parse_additive()?;
        self.skip_whitespace();
        let op = if self.consume_str("==") {
            BinOp::Eq
        } else if self.consume_str("!=") {
            BinOp::Ne
        } else if self.consume_str("<=") {
            BinOp::Le
        } else if self.consume_str(">=") {
            BinOp::Ge
        } else if self.consume_str("<") {
            BinOp::Lt
        } else if self.consume_str(">") {
            BinOp::Gt
        } else {
            return Ok(left);
        };
        let right = self.parse_additive()?;
        Ok(Ast::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = if self.consume_str("+") {
                BinOp::Add
            } else if self.consume_str("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = if self.consume_str("*") {
                BinOp::Mul
            } else if self.consume_str("/") {
                BinOp::Div
            } else if self.consume_str("%") {
                BinOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Ast, ParseError> {
        self.skip_whitespace();
        if self.consume_str("-") {
            let expr = self.parse_unary()?;
            return Ok(Ast::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, ParseError> {
        let mut target = self.parse_primary()?;
        loop {
            self.skip_whitespace();
            if self.consume_str("[") {
                let index = self.parse_or()?;
                self.expect_char(']')?;
                target = Ast::Index {
                    target: Box::new(target),
                    index: Box::new(index),
                };
            } else if self.consume_str(".") {
                let name = self.parse_ident()?;
                target = Ast::Field {
                    target: Box::new(target),
                    name,
                };
            } else {
                return Ok(target);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("expected expression, found end of input".to_string())),
            Some('(') => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect_char(')')?;
                Ok(expr)
            }
            Some('\'') | Some('"') => self.parse_string(),
            Some(ch) if ch.is_ascii_digit() => self.parse_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                if self.consume_keyword("true") {
                    return Ok(Ast::Bool(true));
                }
                if self.consume_keyword("false") {
                    return Ok(Ast::Bool(false));
                }
                if self.consume_keyword("null") {
                    return Ok(Ast::Null);
                }
                let start = self.pos;
                let name = self.parse_ident()?;
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    if !is_builtin(&name) {
                        return Err(ParseError {
                            message: format!("unknown function '{}'", name),
                            position: start,
                        });
                    }
                    self.advance();
                    let args = self.parse_args()?;
                    Ok(Ast::Call {
                        function: name,
                        args,
                    })
                } else {
                    Ok(Ast::Var(name))
                }
            }
            Some(ch) => Err(self.error(format!("unexpected '{}'", ch))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Ast>, ParseError> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(')') => {
                    self.advance();
                    return Ok(args);
                }
                Some(ch) => {
                    return Err(self.error(format!("expected ',' or ')', found '{}'", ch)));
                }
                None => {
                    return Err(self.error("expected ')', found end of input".to_string()));
                }
            }
        }
    }

    fn parse_ident(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        let mut ident = String::new();
        match self.peek() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                ident.push(ch);
                self.advance();
            }
            _ => {
                return Err(self.error(format!("expected identifier, found '{}'", self.peek_word())));
            }
        }
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(ident)
    }

    fn parse_number(&mut self) -> Result<Ast, ParseError> {
        let start = self.pos;
        let mut has_dot = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !has_dot {
                // A dot followed by a non-digit is field access, not a decimal
                // point.
                let next = self.remaining()[1..].chars().next();
                if !next.map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    break;
                }
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        text.parse::<f64>().map(Ast::Number).map_err(|_| ParseError {
            message: format!("invalid number: {}", text),
            position: start,
        })
    }

    fn parse_string(&mut self) -> Result<Ast, ParseError> {
        let quote = self.advance().expect("caller checked quote");
        let mut out = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(self.error("unterminated string".to_string()));
                }
                Some('\\') => match self.advance() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some(ch) if ch == quote => out.push(quote),
                    Some(ch) => {
                        return Err(self.error(format!("invalid escape '\\{}'", ch)));
                    }
                    None => {
                        return Err(self.error("unterminated string".to_string()));
                    }
                },
                Some(ch) if ch == quote => return Ok(Ast::Str(out)),
                Some(ch) => out.push(ch),
            }
        }
    }
}
