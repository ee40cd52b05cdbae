use std::fmt;

use crate::num::parse_int;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    Int,
    Float,
    Bool,
    Char,
    Const,
    Class,
    Struct,
    Void,
    If,
    Else,
    While,
    For,
    Do,
    Break,
    Continue,
    Return,
    True,
    False,
}

const KEYWORDS: &[(&str, Kw)] = &[
    ("int", Kw::Int),
    ("float", Kw::Float),
    ("bool", Kw::Bool),
    ("char", Kw::Char),
    ("const", Kw::Const),
    ("class", Kw::Class),
    ("struct", Kw::Struct),
    ("void", Kw::Void),
    ("if", Kw::If),
    ("else", Kw::Else),
    ("while", Kw::While),
    ("for", Kw::For),
    ("do", Kw::Do),
    ("break", Kw::Break),
    ("continue", Kw::Continue),
    ("return", Kw::Return),
    ("true", Kw::True),
    ("false", Kw::False),
];

// longest first
const PUNCTS: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "<<", ">>", "+=", "-=", "*=", "/=", "%=", "++", "--",
    "+", "-", "*", "/", "%", "<", ">", "=", "&", "|", "^", "~", "!", "(", ")", "{", "}", "[",
    "]", ";", ",", ".",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    Float(f32),
    Str(String),
    Char(u8),
    Kw(Kw),
    Punct(&'static str),
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "identifier `{s}`"),
            Tok::Int(v) => write!(f, "integer {v}"),
            Tok::Float(v) => write!(f, "float {v}"),
            Tok::Str(_) => f.write_str("string literal"),
            Tok::Char(c) => write!(f, "character {:?}", *c as char),
            Tok::Kw(k) => {
                let name = KEYWORDS.iter().find(|(_, kw)| kw == k).map_or("?", |(n, _)| n);
                write!(f, "`{name}`")
            }
            Tok::Punct(p) => write!(f, "`{p}`"),
            Tok::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: Pos,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("{pos}: unexpected character `{ch}`")]
    UnexpectedChar { pos: Pos, ch: char },
    #[error("{pos}: unterminated literal")]
    UnterminatedString { pos: Pos },
    #[error("{pos}: unterminated comment")]
    UnterminatedComment { pos: Pos },
    #[error("{pos}: invalid escape `\\{ch}`")]
    InvalidEscape { pos: Pos, ch: char },
    #[error("{pos}: invalid number `{text}`")]
    InvalidNumber { pos: Pos, text: String },
    #[error("{pos}: expected {expected}, found {found}")]
    Unexpected { pos: Pos, expected: String, found: String },
    #[error("{pos}: unexpected end of input, expected {expected}")]
    UnexpectedEof { pos: Pos, expected: String },
    #[error("{pos}: nesting exceeds {limit} levels")]
    TooDeep { pos: Pos, limit: usize },
}

impl SyntaxError {
    pub fn pos(&self) -> Pos {
        match self {
            SyntaxError::UnexpectedChar { pos, .. }
            | SyntaxError::UnterminatedString { pos }
            | SyntaxError::UnterminatedComment { pos }
            | SyntaxError::InvalidEscape { pos, .. }
            | SyntaxError::InvalidNumber { pos, .. }
            | SyntaxError::Unexpected { pos, .. }
            | SyntaxError::UnexpectedEof { pos, .. }
            | SyntaxError::TooDeep { pos, .. } => *pos,
        }
    }
}

struct Lexer<'a> {
    src: &'a [u8],
    i: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    fn pos(&self) -> Pos {
        Pos { line: self.line, col: self.col }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.i).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.i + n).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.i += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                (Some(b'/'), Some(b'/')) => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => return Err(SyntaxError::UnterminatedComment { pos: start }),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn escape(&mut self, start: Pos) -> Result<u8, SyntaxError> {
        let pos = self.pos();
        match self.bump() {
            Some(b'n') => Ok(b'\n'),
            Some(b't') => Ok(b'\t'),
            Some(b'r') => Ok(b'\r'),
            Some(b'0') => Ok(0),
            Some(b'\\') => Ok(b'\\'),
            Some(b'"') => Ok(b'"'),
            Some(b'\'') => Ok(b'\''),
            Some(c) => Err(SyntaxError::InvalidEscape { pos, ch: c as char }),
            None => Err(SyntaxError::UnterminatedString { pos: start }),
        }
    }

    fn string(&mut self, start: Pos) -> Result<Tok, SyntaxError> {
        self.bump();
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => bytes.push(self.escape(start)?),
                Some(b'\n') | None => return Err(SyntaxError::UnterminatedString { pos: start }),
                Some(c) => bytes.push(c),
            }
        }
        Ok(Tok::Str(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn char_lit(&mut self, start: Pos) -> Result<Tok, SyntaxError> {
        self.bump();
        let c = match self.bump() {
            Some(b'\\') => self.escape(start)?,
            Some(b'\'') | Some(b'\n') | None => return Err(SyntaxError::UnterminatedString { pos: start }),
            Some(c) => c,
        };
        if self.bump() != Some(b'\'') {
            return Err(SyntaxError::UnterminatedString { pos: start });
        }
        Ok(Tok::Char(c))
    }

    fn number(&mut self, start: Pos) -> Result<Tok, SyntaxError> {
        let from = self.i;
        while let Some(c) = self.peek() {
            let frac = c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit());
            if c.is_ascii_alphanumeric() || frac {
                self.bump();
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[from..self.i]).into_owned();
        let bad = || SyntaxError::InvalidNumber { pos: start, text: text.clone() };
        if text.contains('.') {
            let body = text.strip_suffix(['f', 'F']).unwrap_or(&text);
            return body.parse::<f32>().map(Tok::Float).map_err(|_| bad());
        }
        match parse_int::<i64>(&text) {
            Some(v) if v <= u32::MAX as i64 => Ok(Tok::Int(v)),
            _ => Err(bad()),
        }
    }

    fn next(&mut self) -> Result<Token, SyntaxError> {
        self.skip_trivia()?;
        let pos = self.pos();
        let Some(c) = self.peek() else {
            return Ok(Token { tok: Tok::Eof, pos });
        };
        let tok = if c.is_ascii_alphabetic() || c == b'_' {
            let from = self.i;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.bump();
            }
            let word = String::from_utf8_lossy(&self.src[from..self.i]).into_owned();
            match KEYWORDS.iter().find(|(k, _)| *k == word) {
                Some((_, kw)) => Tok::Kw(*kw),
                None => Tok::Ident(word),
            }
        } else if c.is_ascii_digit() {
            self.number(pos)?
        } else if c == b'"' {
            self.string(pos)?
        } else if c == b'\'' {
            self.char_lit(pos)?
        } else {
            let rest = &self.src[self.i..];
            let Some(p) = PUNCTS.iter().find(|p| rest.starts_with(p.as_bytes())) else {
                let ch = String::from_utf8_lossy(rest).chars().next().unwrap_or('?');
                return Err(SyntaxError::UnexpectedChar { pos, ch });
            };
            for _ in 0..p.len() {
                self.bump();
            }
            Tok::Punct(*p)
        };
        Ok(Token { tok, pos })
    }
}

/// Tokenize a whole source file; the last token is always `Eof`.
pub fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut lx = Lexer { src: src.as_bytes(), i: 0, line: 1, col: 1 };
    let mut out = Vec::new();
    loop {
        let t = lx.next()?;
        let eof = t.tok == Tok::Eof;
        out.push(t);
        if eof {
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn operators_take_longest_match() {
        assert_eq!(
            toks("a<<=b&&!c"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("<<"),
                Tok::Punct("="),
                Tok::Ident("b".into()),
                Tok::Punct("&&"),
                Tok::Punct("!"),
                Tok::Ident("c".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn literals() {
        assert_eq!(
            toks(r#"0x1F 0b11 1.5 'a' '\n' "hi\t" true"#),
            vec![
                Tok::Int(31),
                Tok::Int(3),
                Tok::Float(1.5),
                Tok::Char(b'a'),
                Tok::Char(b'\n'),
                Tok::Str("hi\t".into()),
                Tok::Kw(Kw::True),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn positions_and_comments() {
        let t = tokenize("// c\n  /* x\n */ int").unwrap();
        assert_eq!(t[0].tok, Tok::Kw(Kw::Int));
        assert_eq!(t[0].pos, Pos { line: 3, col: 5 });
    }

    #[test]
    fn errors() {
        assert!(matches!(tokenize("\"abc"), Err(SyntaxError::UnterminatedString { .. })));
        assert!(matches!(tokenize("12ab"), Err(SyntaxError::InvalidNumber { .. })));
        assert!(matches!(tokenize("a @ b"), Err(SyntaxError::UnexpectedChar { ch: '@', .. })));
        assert!(matches!(tokenize("/* open"), Err(SyntaxError::UnterminatedComment { .. })));
    }
}
