use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Bare identifier, keywords included
    Word(String),
    /// Quoted string with quotes removed and escapes resolved
    Str(String),
    Colon,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

impl Token {
    /// Text used when reporting the token in an error
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Word(word) => word.clone(),
            TokenKind::Str(value) => format!("\"{}\"", value),
            TokenKind::Colon => ":".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
        }
    }

    /// Check if the token is the given keyword, ignoring case
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(word) if word.eq_ignore_ascii_case(keyword))
    }
}

fn is_word_start(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

fn is_word_char(ch: char) -> bool {
    is_word_start(ch) || ch == '-'
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
}

/// Split a filter query into tokens
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut lexer = Lexer {
        chars: input.char_indices().peekable(),
    };
    let mut tokens = Vec::new();

    while let Some(&(pos, ch)) = lexer.chars.peek() {
        let kind = match ch {
            c if c.is_whitespace() => {
                lexer.chars.next();
                continue;
            }
            ':' => {
                lexer.chars.next();
                TokenKind::Colon
            }
            '(' => {
                lexer.chars.next();
                TokenKind::LParen
            }
            ')' => {
                lexer.chars.next();
                TokenKind::RParen
            }
            '"' => TokenKind::Str(lexer.double_quoted(pos)?),
            '\'' => TokenKind::Str(lexer.single_quoted(pos)?),
            c if is_word_start(c) => TokenKind::Word(lexer.word()),
            c => return Err(QueryError::UnexpectedChar { ch: c, pos }),
        };
        tokens.push(Token { kind, pos });
    }

    Ok(tokens)
}

impl Lexer<'_> {
    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if !is_word_char(ch) {
                break;
            }
            word.push(ch);
            self.chars.next();
        }
        word
    }

    fn double_quoted(&mut self, start: usize) -> Result<String, QueryError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(value),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, escaped)) => value.push(escaped),
                    None => return Err(QueryError::UnterminatedString { pos: start }),
                },
                Some((_, ch)) => value.push(ch),
                None => return Err(QueryError::UnterminatedString { pos: start }),
            }
        }
    }

    // Single quotes are raw: no escapes
    fn single_quoted(&mut self, start: usize) -> Result<String, QueryError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => return Ok(value),
                Some((_, ch)) => value.push(ch),
                None => return Err(QueryError::UnterminatedString { pos: start }),
            }
        }
    }
}
