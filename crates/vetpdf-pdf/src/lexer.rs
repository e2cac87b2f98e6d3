//! Tokenizer for PDF object syntax.
//!
//! The lexer never fails: stray bytes and over-long tokens come back as
//! [`TokenKind::Malformed`] and lexing resumes after them.

use crate::object::{PdfName, PdfNumber, PdfString};
use crate::span::Span;

pub const DEFAULT_MAX_TOKEN_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    ArrayOpen,
    ArrayClose,
    DictOpen,
    DictClose,
    BraceOpen,
    BraceClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    TokenTooLong,
    UnexpectedByte(u8),
    InvalidNumber,
    UnterminatedString,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(PdfNumber),
    Name(PdfName),
    String(PdfString),
    Delimiter(Delimiter),
    Keyword(Vec<u8>),
    Malformed(MalformedReason),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_keyword(&self, kw: &[u8]) -> bool {
        matches!(&self.kind, TokenKind::Keyword(k) if k.as_slice() == kw)
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            TokenKind::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\x00' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

pub fn is_delim(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

pub fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delim(b)
}

pub(crate) fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + b - b'a'),
        b'A'..=b'F' => Some(10 + b - b'A'),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    max_token_bytes: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(bytes: &'a [u8], max_token_bytes: usize) -> Self {
        Self { bytes, pos: 0, max_token_bytes: max_token_bytes.max(1) }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Restart lexing at `offset`, clamped to the end of the buffer.
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset.min(self.bytes.len());
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_n(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos.checked_add(n)?).copied()
    }

    pub fn skip_ws_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b) if is_whitespace(b)) {
                self.pos += 1;
            }
            if self.peek() != Some(b'%') {
                break;
            }
            while let Some(b) = self.peek() {
                self.pos += 1;
                if b == b'\n' || b == b'\r' {
                    break;
                }
            }
        }
    }

    /// Consume a single end-of-line marker (`\r\n`, `\n` or `\r`).
    pub fn skip_eol(&mut self) {
        match self.peek() {
            Some(b'\r') => {
                self.pos += 1;
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            Some(b'\n') => self.pos += 1,
            _ => {}
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek_token(&mut self) -> Token {
        let mark = self.pos;
        let token = self.next_token();
        self.pos = mark;
        token
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_ws_and_comments();
        let start = self.pos;
        let Some(b) = self.peek() else {
            return Token { kind: TokenKind::Eof, span: Span::at(start) };
        };
        let kind = match b {
            b'/' => self.lex_name(),
            b'(' => self.lex_literal_string(),
            b'<' if self.peek_n(1) == Some(b'<') => {
                self.pos += 2;
                TokenKind::Delimiter(Delimiter::DictOpen)
            }
            b'<' => self.lex_hex_string(),
            b'>' if self.peek_n(1) == Some(b'>') => {
                self.pos += 2;
                TokenKind::Delimiter(Delimiter::DictClose)
            }
            b'[' => self.single(Delimiter::ArrayOpen),
            b']' => self.single(Delimiter::ArrayClose),
            b'{' => self.single(Delimiter::BraceOpen),
            b'}' => self.single(Delimiter::BraceClose),
            b')' | b'>' => {
                self.pos += 1;
                TokenKind::Malformed(MalformedReason::UnexpectedByte(b))
            }
            _ => self.lex_regular(),
        };
        Token { kind, span: Span::new(start, self.pos) }
    }

    fn single(&mut self, delim: Delimiter) -> TokenKind {
        self.pos += 1;
        TokenKind::Delimiter(delim)
    }

    /// Advance over a run of regular bytes, returning it unless it is longer
    /// than the token cap.
    fn regular_run(&mut self) -> Option<&'a [u8]> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_regular(b)) {
            self.pos += 1;
        }
        let run = &self.bytes[start..self.pos];
        (run.len() <= self.max_token_bytes).then_some(run)
    }

    fn lex_regular(&mut self) -> TokenKind {
        let Some(run) = self.regular_run() else {
            return TokenKind::Malformed(MalformedReason::TokenTooLong);
        };
        let first = run[0];
        let numeric = run.iter().all(|c| c.is_ascii_digit() || matches!(c, b'+' | b'-' | b'.'));
        if numeric && (first.is_ascii_digit() || matches!(first, b'+' | b'-' | b'.')) {
            return match parse_number(run) {
                Some(n) => TokenKind::Number(n),
                None => TokenKind::Malformed(MalformedReason::InvalidNumber),
            };
        }
        if let Some(bad) =
            run.iter().copied().find(|c| !(c.is_ascii_alphanumeric() || b"*'\"_.-".contains(c)))
        {
            return TokenKind::Malformed(MalformedReason::UnexpectedByte(bad));
        }
        TokenKind::Keyword(run.to_vec())
    }

    fn lex_name(&mut self) -> TokenKind {
        self.pos += 1;
        let Some(raw) = self.regular_run() else {
            return TokenKind::Malformed(MalformedReason::TokenTooLong);
        };
        TokenKind::Name(PdfName { raw: raw.to_vec(), decoded: decode_name(raw) })
    }

    fn lex_literal_string(&mut self) -> TokenKind {
        let start = self.pos;
        self.pos += 1;
        let mut depth = 1usize;
        let mut out = Vec::new();
        let mut escapes = 0usize;
        let mut too_long = false;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b);
                }
                b'\\' => {
                    escapes += 1;
                    let Some(next) = self.peek() else { break };
                    self.pos += 1;
                    match next {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut val = (next - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        val = val * 8 + (d - b'0') as u32;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((val & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                _ => out.push(b),
            }
            if self.pos - start > self.max_token_bytes {
                too_long = true;
                out.clear();
            }
        }
        if depth != 0 {
            return TokenKind::Malformed(MalformedReason::UnterminatedString);
        }
        if too_long {
            return TokenKind::Malformed(MalformedReason::TokenTooLong);
        }
        TokenKind::String(PdfString {
            raw: self.bytes[start..self.pos].to_vec(),
            decoded: out,
            hex: false,
            escapes,
        })
    }

    fn lex_hex_string(&mut self) -> TokenKind {
        let start = self.pos;
        self.pos += 1;
        let mut digits = Vec::new();
        let mut terminated = false;
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'>' {
                terminated = true;
                break;
            }
            if let Some(v) = hex_val(b) {
                if digits.len() < self.max_token_bytes {
                    digits.push(v);
                }
            }
        }
        if !terminated {
            return TokenKind::Malformed(MalformedReason::UnterminatedString);
        }
        if self.pos - start > self.max_token_bytes {
            return TokenKind::Malformed(MalformedReason::TokenTooLong);
        }
        let decoded = digits
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
            .collect();
        TokenKind::String(PdfString {
            raw: self.bytes[start..self.pos].to_vec(),
            decoded,
            hex: true,
            escapes: 0,
        })
    }
}

fn parse_number(run: &[u8]) -> Option<PdfNumber> {
    let s = std::str::from_utf8(run).ok()?;
    if s.contains('.') {
        let v = s.parse::<f64>().ok()?;
        v.is_finite().then_some(PdfNumber::Real(v))
    } else {
        s.parse::<i64>().ok().map(PdfNumber::Int)
    }
}

/// Resolve `#xx` escapes; an invalid escape is kept verbatim.
pub fn decode_name(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            if let (Some(h), Some(l)) = (hex_val(raw[i + 1]), hex_val(raw[i + 2])) {
                out.push((h << 4) | l);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}
