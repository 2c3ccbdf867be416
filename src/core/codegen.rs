//! Parses simple function-call strings such as `generate_password(min_length=8)`
//! into a function name and keyword arguments.
//!
//! Only literal values are accepted: integers, floats, quoted strings, lists,
//! `None`, `True` and `False`.

use crate::utils::error::{ChessboardError, Result};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Equals,
    Separator,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '\n' | ';' => {
                tokens.push(Token::Separator);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Equals);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ChessboardError::Syntax(format!(
                                "EOL while scanning string literal: {}",
                                source
                            )))
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied().unwrap_or('\\');
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e')
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                if let Ok(number) = literal.parse::<i64>() {
                    tokens.push(Token::Int(number));
                } else if let Ok(number) = literal.parse::<f64>() {
                    tokens.push(Token::Float(number));
                } else {
                    return Err(ChessboardError::Syntax(format!(
                        "invalid number '{}' in: {}",
                        literal, source
                    )));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ChessboardError::Syntax(format!(
                    "invalid character '{}' in: {}",
                    other, source
                )))
            }
        }
    }

    // 去掉尾端的分隔符
    while tokens.last() == Some(&Token::Separator) {
        tokens.pop();
    }
    while tokens.first() == Some(&Token::Separator) {
        tokens.remove(0);
    }
    Ok(tokens)
}

struct CallParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl<'a> CallParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn syntax_error(&self, detail: &str) -> ChessboardError {
        ChessboardError::Syntax(format!("{}: {}", detail, self.source))
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => Err(self.syntax_error("invalid syntax")),
        }
    }

    fn call(&mut self) -> Result<(String, Map<String, Value>)> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            _ => return Err(self.syntax_error("expected a function call")),
        };
        self.expect(Token::LParen)?;

        let mut kwargs = Map::new();
        loop {
            match self.peek() {
                Some(Token::RParen) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Ident(_)) => {
                    let key = match self.next() {
                        Some(Token::Ident(key)) => key,
                        _ => return Err(self.syntax_error("invalid syntax")),
                    };
                    if self.peek() != Some(&Token::Equals) {
                        return Err(ChessboardError::InvalidParameter(format!(
                            "malformed node or string: {}",
                            key
                        )));
                    }
                    self.pos += 1;
                    let value = self.literal()?;
                    kwargs.insert(key, value);
                }
                Some(_) => {
                    return Err(ChessboardError::InvalidParameter(format!(
                        "only keyword arguments are supported: {}",
                        self.source
                    )))
                }
                None => return Err(self.syntax_error("unexpected EOF while parsing")),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(self.syntax_error("invalid syntax")),
            }
        }
        Ok((name, kwargs))
    }

    fn literal(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Int(number)) => Ok(Value::from(number)),
            Some(Token::Float(number)) => Ok(Value::from(number)),
            Some(Token::Str(text)) => Ok(Value::String(text)),
            Some(Token::Ident(name)) => match name.as_str() {
                "None" => Ok(Value::Null),
                "True" => Ok(Value::Bool(true)),
                "False" => Ok(Value::Bool(false)),
                _ if self.peek() == Some(&Token::LParen) => Err(
                    ChessboardError::InvalidParameter(format!(
                        "malformed node or string: call to '{}' is not a literal",
                        name
                    )),
                ),
                _ => Err(ChessboardError::InvalidParameter(format!(
                    "malformed node or string: {}",
                    name
                ))),
            },
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                loop {
                    items.push(self.literal()?);
                    match self.next() {
                        Some(Token::Comma) if self.peek() == Some(&Token::RBracket) => {
                            self.pos += 1;
                            break;
                        }
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err(self.syntax_error("invalid syntax")),
                    }
                }
                Ok(Value::Array(items))
            }
            _ => Err(self.syntax_error("invalid syntax")),
        }
    }
}

/// Returns the function name and keyword arguments of a single call.
///
/// An empty string yields `(None, {})`.
pub fn kwargs_from_string(parse_string: &str) -> Result<(Option<String>, Map<String, Value>)> {
    if parse_string.trim().is_empty() {
        return Ok((None, Map::new()));
    }
    let tokens = tokenize(parse_string)?;
    let mut parser = CallParser {
        tokens: &tokens,
        pos: 0,
        source: parse_string,
    };
    let (name, kwargs) = parser.call()?;
    if parser.pos < tokens.len() {
        return Err(parser.syntax_error("only one function call is allowed"));
    }
    Ok((Some(name), kwargs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_kwargs_from_empty_string() {
        let (name, kwargs) = kwargs_from_string("").unwrap();
        assert!(name.is_none());
        assert!(kwargs.is_empty());
    }

    #[test]
    fn test_too_many_function_definitions() {
        let result = kwargs_from_string("my_func(blah=2)\nmy_other_func()");
        assert!(matches!(result, Err(ChessboardError::Syntax(_))));
        let result = kwargs_from_string("my_func(blah=2); my_other_func()");
        assert!(matches!(result, Err(ChessboardError::Syntax(_))));
    }

    #[test]
    fn test_nested_functions() {
        let result = kwargs_from_string("my_func(my_other_func())");
        assert!(matches!(result, Err(ChessboardError::InvalidParameter(_))));
        let result = kwargs_from_string("my_func(a=my_other_func())");
        assert!(matches!(result, Err(ChessboardError::InvalidParameter(_))));
    }

    #[test]
    fn test_one_integer_value() {
        let (name, kwargs) = kwargs_from_string("my_func(blah=2)").unwrap();
        assert_eq!(name.as_deref(), Some("my_func"));
        assert_eq!(Value::Object(kwargs), json!({"blah": 2}));
    }

    #[test]
    fn test_one_string_value() {
        let (_, kwargs) = kwargs_from_string("my_func(blah='blarg')").unwrap();
        assert_eq!(Value::Object(kwargs), json!({"blah": "blarg"}));
    }

    #[test]
    fn test_multiple_params() {
        let (name, kwargs) =
            kwargs_from_string("my_func(blerg=8, blah=[1, '2', None], bleep='')").unwrap();
        assert_eq!(name.as_deref(), Some("my_func"));
        assert_eq!(
            Value::Object(kwargs),
            json!({"blerg": 8, "blah": [1, "2", null], "bleep": ""})
        );
    }

    #[test]
    fn test_no_arguments_and_trailing_newline() {
        let (name, kwargs) = kwargs_from_string("generate_uuid()\n").unwrap();
        assert_eq!(name.as_deref(), Some("generate_uuid"));
        assert!(kwargs.is_empty());
    }
}
