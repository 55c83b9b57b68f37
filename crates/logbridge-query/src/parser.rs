//! Recursive-descent parser for filter queries
//!
//! ```text
//! Expression  := OrCondition ("OR" OrCondition)*
//! OrCondition := XCondition ("AND" XCondition)*
//! XCondition  := "NOT"? (Condition | "(" Expression ")")
//! Condition   := ("POD"|"CONTAINER"|"FILE") ":" (QuotedString | BareIdent)
//! ```
//!
//! Keywords are case-insensitive. Any syntax error fails the whole parse.

use crate::ast::{Condition, Expression, Key, Operand, OrCondition, XCondition};
use crate::error::QueryError;
use crate::lexer::{Token, TokenKind, tokenize};

const RESERVED: [&str; 6] = ["POD", "CONTAINER", "FILE", "AND", "OR", "NOT"];

/// Deepest allowed nesting of parenthesized groups
pub const MAX_DEPTH: usize = 128;

/// Parse a filter query into an expression tree
pub fn parse(input: &str) -> Result<Expression, QueryError> {
    let tokens = tokenize(input)?;
    Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
    }
    .parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Byte length of the input, reported for errors at end of input
    end: usize,
    /// Groups currently open
    depth: usize,
}

impl Parser {
    fn parse(mut self) -> Result<Expression, QueryError> {
        let expr = self.parse_expression()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(self.unexpected(token, "AND, OR or end of query")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expression, QueryError> {
        let mut branches = vec![self.parse_or_condition()?];
        while self.consume_keyword("OR") {
            branches.push(self.parse_or_condition()?);
        }
        Ok(Expression { branches })
    }

    fn parse_or_condition(&mut self) -> Result<OrCondition, QueryError> {
        let mut terms = vec![self.parse_xcondition()?];
        while self.consume_keyword("AND") {
            terms.push(self.parse_xcondition()?);
        }
        Ok(OrCondition { terms })
    }

    fn parse_xcondition(&mut self) -> Result<XCondition, QueryError> {
        let negated = self.consume_keyword("NOT");
        let token = self.next("condition or '('")?;

        let operand = match &token.kind {
            TokenKind::LParen => {
                if self.depth == MAX_DEPTH {
                    return Err(QueryError::TooDeep {
                        limit: MAX_DEPTH,
                        pos: token.pos,
                    });
                }
                self.depth += 1;
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                self.depth -= 1;
                Operand::Group(expr)
            }
            TokenKind::Word(word) => match Key::from_name(word) {
                Some(key) => {
                    self.expect(TokenKind::Colon, "':'")?;
                    let value = self.parse_value()?;
                    Operand::Leaf(Condition { key, value })
                }
                None if self.peek_kind() == Some(&TokenKind::Colon) && !is_reserved(word) => {
                    return Err(QueryError::UnknownKey {
                        key: word.clone(),
                        pos: token.pos,
                    });
                }
                None => return Err(self.unexpected(&token, "condition or '('")),
            },
            _ => return Err(self.unexpected(&token, "condition or '('")),
        };

        Ok(XCondition { negated, operand })
    }

    fn parse_value(&mut self) -> Result<String, QueryError> {
        let token = self.next("value")?;
        match &token.kind {
            TokenKind::Str(value) => Ok(value.clone()),
            TokenKind::Word(word) if !is_reserved(word) => Ok(word.clone()),
            _ => Err(self.unexpected(&token, "value")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token, QueryError> {
        match self.tokens.get(self.pos).cloned() {
            Some(token) => {
                self.pos += 1;
                Ok(token)
            }
            None => Err(QueryError::UnexpectedEnd {
                expected,
                pos: self.end,
            }),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<(), QueryError> {
        let token = self.next(expected)?;
        if token.kind == kind {
            Ok(())
        } else {
            Err(self.unexpected(&token, expected))
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, token: &Token, expected: &'static str) -> QueryError {
        QueryError::UnexpectedToken {
            found: token.describe(),
            expected,
            pos: token.pos,
        }
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}
