//! Macro expression language parser (spec.md §4.F).
//!
//! ```text
//! key(KEY_A).repeat(key(KEY_B), 3) + wait(50)
//! ```
//! identifiers are task names, `.` chains a call's result into the next
//! call's implicit first argument, `+` builds a parallel group, `#`
//! starts a line comment. Parsed once at HandlerGraph build time.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    /// A bare identifier used as a value rather than a task name, e.g.
    /// a key symbol passed to `key(KEY_A)`.
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Literal),
    Named(String, Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub task: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroExpr {
    Call(Call),
    /// `a.b`: `a`'s result becomes `b`'s implicit first argument.
    Chain(Box<MacroExpr>, Call),
    /// `a + b`: both run, both must complete.
    Parallel(Box<MacroExpr>, Box<MacroExpr>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("macro syntax error at {position}: {message} (found {found:?})")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
    pub found: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Eq,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Plus => write!(f, "+"),
            Token::Eq => write!(f, "="),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(&(pos, ch)) = self.chars.peek() {
            match ch {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '#' => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '(' => {
                    self.chars.next();
                    tokens.push((pos, Token::LParen));
                }
                ')' => {
                    self.chars.next();
                    tokens.push((pos, Token::RParen));
                }
                ',' => {
                    self.chars.next();
                    tokens.push((pos, Token::Comma));
                }
                '.' => {
                    self.chars.next();
                    tokens.push((pos, Token::Dot));
                }
                '+' => {
                    self.chars.next();
                    tokens.push((pos, Token::Plus));
                }
                '=' => {
                    self.chars.next();
                    tokens.push((pos, Token::Eq));
                }
                '"' => {
                    tokens.push((pos, self.lex_string(pos)?));
                }
                c if c.is_ascii_digit() || (c == '-' && self.peek_is_digit_after_sign()) => {
                    tokens.push((pos, self.lex_number()));
                }
                c if c.is_alphabetic() || c == '_' => {
                    tokens.push((pos, self.lex_ident()));
                }
                other => {
                    return Err(ParseError {
                        position: pos,
                        message: "unexpected character".to_string(),
                        found: other.to_string(),
                    });
                }
            }
        }
        Ok(tokens)
    }

    fn peek_is_digit_after_sign(&self) -> bool {
        let mut iter = self.chars.clone();
        iter.next();
        matches!(iter.peek(), Some((_, c)) if c.is_ascii_digit())
    }

    fn lex_string(&mut self, start: usize) -> Result<Token, ParseError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(Token::Str(value)),
                Some((_, c)) => value.push(c),
                None => {
                    return Err(ParseError {
                        position: start,
                        message: "unterminated string literal".to_string(),
                        found: "<eof>".to_string(),
                    });
                }
            }
        }
    }

    fn lex_number(&mut self) -> Token {
        let start_pos = self.chars.peek().map(|&(p, _)| p).unwrap_or(0);
        let mut text = String::new();
        if let Some(&(_, '-')) = self.chars.peek() {
            text.push('-');
            self.chars.next();
        }
        let mut is_float = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.chars.next();
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        let _ = start_pos;
        if is_float {
            Token::Float(text.parse().unwrap_or(0.0))
        } else {
            Token::Int(text.parse().unwrap_or(0))
        }
    }

    fn lex_ident(&mut self) -> Token {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(text)
    }
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_pos(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            position: self.peek_pos(),
            message: message.into(),
            found: self
                .peek()
                .map(|t| format!("{t:?}"))
                .unwrap_or_else(|| "<eof>".to_string()),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    /// `expr := term ('+' term)*`
    fn parse_expr(&mut self) -> Result<MacroExpr, ParseError> {
        let mut expr = self.parse_chain()?;
        while self.peek() == Some(&Token::Plus) {
            self.advance();
            let rhs = self.parse_chain()?;
            expr = MacroExpr::Parallel(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    /// `chain := call ('.' call)*`
    fn parse_chain(&mut self) -> Result<MacroExpr, ParseError> {
        let mut expr = MacroExpr::Call(self.parse_call()?);
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            let call = self.parse_call()?;
            expr = MacroExpr::Chain(Box::new(expr), call);
        }
        Ok(expr)
    }

    fn parse_call(&mut self) -> Result<Call, ParseError> {
        let task = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(ParseError {
                    position: self.peek_pos(),
                    message: "expected a task name".to_string(),
                    found: other.map(|t| format!("{t:?}")).unwrap_or_else(|| "<eof>".to_string()),
                });
            }
        };
        let mut args = Vec::new();
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    args.push(self.parse_arg()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen)?;
        }
        Ok(Call { task, args })
    }

    fn parse_arg(&mut self) -> Result<Arg, ParseError> {
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            if self.tokens.get(self.pos + 1).map(|(_, t)| t) == Some(&Token::Eq) {
                self.advance();
                self.advance();
                let literal = self.parse_literal()?;
                return Ok(Arg::Named(name, literal));
            }
        }
        Ok(Arg::Positional(self.parse_literal()?))
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Literal::Int(n)),
            Some(Token::Float(n)) => Ok(Literal::Float(n)),
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Ident(s)) => Ok(Literal::Symbol(s)),
            other => Err(ParseError {
                position: self.peek_pos(),
                message: "expected a literal value".to_string(),
                found: other.map(|t| format!("{t:?}")).unwrap_or_else(|| "<eof>".to_string()),
            }),
        }
    }
}

/// Parses one macro expression. Fails with the offending token's
/// position on syntax error.
pub fn parse(source: &str) -> Result<MacroExpr, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
    };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input after a complete expression"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_call_with_symbol_arg() {
        let expr = parse("key(KEY_A)").unwrap();
        assert_eq!(
            expr,
            MacroExpr::Call(Call {
                task: "key".to_string(),
                args: vec![Arg::Positional(Literal::Symbol("KEY_A".to_string()))],
            })
        );
    }

    #[test]
    fn parses_chain() {
        let expr = parse("key(KEY_A).hold()").unwrap();
        match expr {
            MacroExpr::Chain(inner, call) => {
                assert_eq!(call.task, "hold");
                assert!(matches!(*inner, MacroExpr::Call(_)));
            }
            other => panic!("expected chain, got {other:?}"),
        }
    }

    #[test]
    fn parses_parallel_group() {
        let expr = parse("key(KEY_A) + wait(50)").unwrap();
        assert!(matches!(expr, MacroExpr::Parallel(_, _)));
    }

    #[test]
    fn parses_named_arguments() {
        let expr = parse("modify(symbol=KEY_A, count=3)").unwrap();
        match expr {
            MacroExpr::Call(call) => {
                assert_eq!(
                    call.args,
                    vec![
                        Arg::Named("symbol".to_string(), Literal::Symbol("KEY_A".to_string())),
                        Arg::Named("count".to_string(), Literal::Int(3)),
                    ]
                );
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn ignores_line_comments() {
        let expr = parse("# a leading comment\nkey(KEY_A)").unwrap();
        assert!(matches!(expr, MacroExpr::Call(_)));
    }

    #[test]
    fn reports_unbalanced_parens() {
        let err = parse("key(KEY_A").unwrap_err();
        assert_eq!(err.found, "<eof>");
    }

    #[test]
    fn reports_unknown_token() {
        let err = parse("key(KEY_A) @").unwrap_err();
        assert_eq!(err.found, "@");
    }

    #[test]
    fn parses_negative_float_literal() {
        let expr = parse("modify(-1.5)").unwrap();
        match expr {
            MacroExpr::Call(call) => {
                assert_eq!(call.args, vec![Arg::Positional(Literal::Float(-1.5))]);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }
}
