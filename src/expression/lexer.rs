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

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Str(String),
    Int(i64),
    /// `#name`
    Param(String),
    /// Bare identifier: a field name after `.`, or a keyword.
    Ident(String),
    Dot,
    Plus,
    EqEq,
    NotEq,
    Bang,
    LParen,
    RParen,
    Question,
    Colon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Str(value) => write!(f, "'{value}'"),
            Token::Int(value) => write!(f, "{value}"),
            Token::Param(name) => write!(f, "#{name}"),
            Token::Ident(name) => f.write_str(name),
            Token::Dot => f.write_str("."),
            Token::Plus => f.write_str("+"),
            Token::EqEq => f.write_str("=="),
            Token::NotEq => f.write_str("!="),
            Token::Bang => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Question => f.write_str("?"),
            Token::Colon => f.write_str(":"),
        }
    }
}

/// A token with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        let token = match ch {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => {
                            if matches!(chars.peek(), Some((_, '\''))) {
                                chars.next();
                                value.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, c)) => value.push(c),
                        None => {
                            return Err(format!("unterminated string literal at offset {offset}"));
                        }
                    }
                }
                Token::Str(value)
            }
            '#' => {
                chars.next();
                let name = take_identifier(&mut chars);
                if name.is_empty() {
                    return Err(format!("expected parameter name after '#' at offset {offset}"));
                }
                Token::Param(name)
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    digits.push(c);
                    chars.next();
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| format!("integer literal {digits} out of range"))?;
                Token::Int(value)
            }
            c if is_identifier_start(c) => Token::Ident(take_identifier(&mut chars)),
            '=' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => Token::EqEq,
                    _ => return Err(format!("expected '==' at offset {offset}")),
                }
            }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            '.' | '+' | '(' | ')' | '?' | ':' => {
                chars.next();
                match ch {
                    '.' => Token::Dot,
                    '+' => Token::Plus,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '?' => Token::Question,
                    _ => Token::Colon,
                }
            }
            other => return Err(format!("unexpected character '{other}' at offset {offset}")),
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn take_identifier(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut name = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            break;
        }
        if name.is_empty() && !is_identifier_start(c) {
            break;
        }
        name.push(c);
        chars.next();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn concatenation_template() {
        assert_eq!(
            kinds("'order:' + #userId"),
            vec![
                Token::Str("order:".to_string()),
                Token::Plus,
                Token::Param("userId".to_string()),
            ]
        );
    }

    #[test]
    fn field_access_and_ternary() {
        assert_eq!(
            kinds("#isVip ? #user.id : 42"),
            vec![
                Token::Param("isVip".to_string()),
                Token::Question,
                Token::Param("user".to_string()),
                Token::Dot,
                Token::Ident("id".to_string()),
                Token::Colon,
                Token::Int(42),
            ]
        );
    }

    #[test]
    fn doubled_quote_escapes() {
        assert_eq!(kinds("'it''s'"), vec![Token::Str("it's".to_string())]);
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            kinds("!#a != #b == true"),
            vec![
                Token::Bang,
                Token::Param("a".to_string()),
                Token::NotEq,
                Token::Param("b".to_string()),
                Token::EqEq,
                Token::Ident("true".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(tokenize("'open").unwrap_err().contains("unterminated"));
        assert!(tokenize("# ").unwrap_err().contains("parameter name"));
        assert!(tokenize("#a = 1").unwrap_err().contains("'=='"));
        assert!(tokenize("#a * 2").unwrap_err().contains("'*'"));
    }
}
