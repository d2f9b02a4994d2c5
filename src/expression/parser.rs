// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Recursive-descent parser for key templates.
//!
//! Precedence, loosest first: `?:`, `==`/`!=`, `+`, `!`, then literals,
//! parameter references and parentheses.

use crate::expression::lexer::{Spanned, Token};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Reference { name: String, path: Vec<String> },
    Add(Box<Expr>, Box<Expr>),
    Equals(Box<Expr>, Box<Expr>),
    NotEquals(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

pub(crate) fn parse(tokens: Vec<Spanned>) -> Result<Expr, String> {
    if tokens.is_empty() {
        return Err("template is empty".to_string());
    }
    let mut parser = Parser { tokens, position: 0 };
    let expr = parser.conditional()?;
    match parser.peek() {
        None => Ok(expr),
        Some(spanned) => Err(format!(
            "unexpected '{}' at offset {}",
            spanned.token, spanned.offset
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let next = self.tokens.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        next
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|spanned| &spanned.token == expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        if self.eat(expected) {
            return Ok(());
        }
        match self.peek() {
            Some(spanned) => Err(format!(
                "expected '{expected}' but found '{}' at offset {}",
                spanned.token, spanned.offset
            )),
            None => Err(format!("expected '{expected}' but the template ended")),
        }
    }

    fn conditional(&mut self) -> Result<Expr, String> {
        let condition = self.equality()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.conditional()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let mut left = self.additive()?;
        loop {
            if self.eat(&Token::EqEq) {
                let right = self.additive()?;
                left = Expr::Equals(Box::new(left), Box::new(right));
            } else if self.eat(&Token::NotEq) {
                let right = self.additive()?;
                left = Expr::NotEquals(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.eat(&Token::Plus) {
            let right = self.unary()?;
            left = Expr::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let Some(Spanned { token, offset }) = self.advance() else {
            return Err("unexpected end of template".to_string());
        };

        match token {
            Token::Str(value) => Ok(Expr::Literal(Value::String(value))),
            Token::Int(value) => Ok(Expr::Literal(Value::from(value))),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Err(format!(
                    "unexpected identifier '{word}' at offset {offset} (parameters are written '#{word}', text as '{word}')"
                )),
            },
            Token::Param(name) => {
                let mut path = Vec::new();
                while self.eat(&Token::Dot) {
                    match self.advance() {
                        Some(Spanned {
                            token: Token::Ident(field),
                            ..
                        }) => path.push(field),
                        Some(other) => {
                            return Err(format!(
                                "expected field name after '.' but found '{}' at offset {}",
                                other.token, other.offset
                            ));
                        }
                        None => return Err("expected field name after '.'".to_string()),
                    }
                }
                Ok(Expr::Reference { name, path })
            }
            Token::LParen => {
                let inner = self.conditional()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(format!("unexpected '{other}' at offset {offset}")),
        }
    }
}
