use anyhow::{anyhow, bail, Result};
use tracing::{trace, warn};

use crate::budget::ScanBudget;
use crate::graph::{GraphNote, NoteKind};
use crate::lexer::{Delimiter, Lexer, Token, TokenKind, DEFAULT_MAX_TOKEN_BYTES};
use crate::object::{DeclaredLength, ObjectId, PdfDict, PdfName, PdfNumber, PdfObject, PdfStream};
use crate::reader::{ByteReader, ReadError};
use crate::span::Span;

pub const DEFAULT_MAX_DEPTH: usize = 64;
/// Hard ceiling on container nesting. Nested values are dropped and
/// compared recursively, so larger limits are clamped.
pub const MAX_NESTING_DEPTH: usize = 512;
pub const DEFAULT_MAX_CONTAINER_ENTRIES: usize = 100_000;

const BUDGET_CHECK_INTERVAL: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_depth: usize,
    pub max_container_entries: usize,
    pub max_token_bytes: usize,
    pub allow_streams: bool,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_container_entries: DEFAULT_MAX_CONTAINER_ENTRIES,
            max_token_bytes: DEFAULT_MAX_TOKEN_BYTES,
            allow_streams: true,
        }
    }
}

/// A parsed `N G obj ... endobj`.
#[derive(Debug, Clone)]
pub struct IndirectObject {
    pub id: ObjectId,
    pub object: PdfObject,
    pub offset: usize,
    pub end: usize,
}

/// An open container on the parse stack.
struct Frame {
    start: Span,
    item_offset: usize,
    kind: FrameKind,
}

enum FrameKind {
    Array(Vec<PdfObject>),
    Dict { entries: Vec<(PdfName, PdfObject)>, key: Option<PdfName> },
}

enum Step {
    Item(Token),
    Closed,
    /// Entry cap hit; the container is replaced by null.
    Dropped,
}

impl Frame {
    fn new(start: Span, kind: FrameKind) -> Self {
        Self { start, item_offset: start.start as usize, kind }
    }

    fn push(&mut self, value: PdfObject) {
        match &mut self.kind {
            FrameKind::Array(items) => items.push(value),
            FrameKind::Dict { entries, key } => {
                if let Some(key) = key.take() {
                    entries.push((key, value));
                }
            }
        }
    }

    /// A dictionary keeps the key of a value that failed to parse.
    fn skip_item(&mut self) {
        if let FrameKind::Dict { .. } = self.kind {
            self.push(PdfObject::Null);
        }
    }

    fn item_code(&self) -> &'static str {
        match self.kind {
            FrameKind::Array(_) => "invalid_array_item",
            FrameKind::Dict { .. } => "invalid_dict_value",
        }
    }
}

pub struct Parser<'a> {
    reader: ByteReader<'a>,
    lexer: Lexer<'a>,
    limits: ParseLimits,
    notes: Vec<GraphNote>,
    budget: Option<&'a ScanBudget>,
    tokens: usize,
}

impl<'a> Parser<'a> {
    pub fn new(reader: ByteReader<'a>, pos: usize, mut limits: ParseLimits) -> Self {
        limits.max_depth = limits.max_depth.min(MAX_NESTING_DEPTH);
        let mut lexer = Lexer::new(reader.bytes(), limits.max_token_bytes);
        lexer.seek(pos);
        Self { reader, lexer, limits, notes: Vec::new(), budget: None, tokens: 0 }
    }

    pub fn with_budget(mut self, budget: &'a ScanBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn position(&self) -> usize {
        self.lexer.position()
    }

    pub fn seek(&mut self, pos: usize) {
        self.lexer.seek(pos);
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.tokens += 1;
        if self.tokens % BUDGET_CHECK_INTERVAL == 0 {
            if let Some(budget) = self.budget {
                budget.check()?;
            }
        }
        Ok(self.lexer.next_token())
    }

    pub fn take_notes(&mut self) -> Vec<GraphNote> {
        std::mem::take(&mut self.notes)
    }

    fn note(&mut self, kind: NoteKind, code: &'static str, offset: usize, detail: impl Into<String>) {
        let detail = detail.into();
        trace!(domain = "pdf.parser", kind = code, offset = offset, detail = %detail, "Parser note");
        self.notes.push(GraphNote::new(kind, code, Some(offset as u64), detail));
    }

    pub fn parse_object(&mut self) -> Result<PdfObject> {
        let tok = self.next_token()?;
        self.parse_value(tok)
    }

    /// Parse the value that starts with `tok`. Containers are tracked on an
    /// explicit stack, so nesting never grows the call stack.
    fn parse_value(&mut self, tok: Token) -> Result<PdfObject> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut tok = tok;
        loop {
            let mut done = match tok.kind {
                TokenKind::Delimiter(Delimiter::ArrayOpen) | TokenKind::Delimiter(Delimiter::DictOpen)
                    if stack.len() >= self.limits.max_depth =>
                {
                    self.depth_exceeded(tok.span)?;
                    Some(Ok(PdfObject::Null))
                }
                TokenKind::Delimiter(Delimiter::ArrayOpen) => {
                    stack.push(Frame::new(tok.span, FrameKind::Array(Vec::new())));
                    None
                }
                TokenKind::Delimiter(Delimiter::DictOpen) => {
                    stack.push(Frame::new(tok.span, FrameKind::Dict { entries: Vec::new(), key: None }));
                    None
                }
                _ => Some(self.parse_scalar(tok)),
            };
            tok = loop {
                if let Some(result) = done.take() {
                    let Some(frame) = stack.last_mut() else {
                        return result;
                    };
                    match result {
                        Ok(value) => frame.push(value),
                        Err(e) => {
                            self.check_budget()?;
                            let (kind, offset) = (frame.item_code(), frame.item_offset);
                            self.note(NoteKind::MalformedInput, kind, offset, e.to_string());
                            frame.skip_item();
                        }
                    }
                }
                let Some(frame) = stack.last_mut() else {
                    bail!("container stack empty");
                };
                match self.advance(frame)? {
                    Step::Item(next) => break next,
                    Step::Closed => {
                        if let Some(frame) = stack.pop() {
                            done = Some(self.finish(frame));
                        }
                    }
                    Step::Dropped => {
                        stack.pop();
                        done = Some(Ok(PdfObject::Null));
                    }
                }
            };
        }
    }

    fn parse_scalar(&mut self, tok: Token) -> Result<PdfObject> {
        match tok.kind {
            TokenKind::Eof => bail!("unexpected end of input at {}", tok.span.start),
            TokenKind::Number(PdfNumber::Int(n)) => self.number_or_reference(n),
            TokenKind::Number(n) => Ok(PdfObject::Number(n)),
            TokenKind::Name(n) => Ok(PdfObject::Name(n)),
            TokenKind::String(s) => Ok(PdfObject::String(s)),
            TokenKind::Keyword(kw) => match kw.as_slice() {
                b"true" => Ok(PdfObject::Boolean(true)),
                b"false" => Ok(PdfObject::Boolean(false)),
                b"null" => Ok(PdfObject::Null),
                other => bail!("unexpected keyword {:?}", String::from_utf8_lossy(other)),
            },
            TokenKind::Delimiter(d) => bail!("unexpected delimiter {:?} at {}", d, tok.span.start),
            TokenKind::Malformed(reason) => bail!("malformed token {:?} at {}", reason, tok.span.start),
        }
    }

    fn depth_exceeded(&mut self, at: Span) -> Result<()> {
        self.note(
            NoteKind::StructuralLimitExceeded,
            "nesting_depth_exceeded",
            at.start as usize,
            format!("container nesting deeper than {}", self.limits.max_depth),
        );
        warn!(
            security = true,
            domain = "pdf.parser",
            kind = "nesting_depth_exceeded",
            max_depth = self.limits.max_depth,
            offset = at.start,
            "Nesting depth limit exceeded"
        );
        self.skip_container(1)
    }

    fn number_or_reference(&mut self, n: i64) -> Result<PdfObject> {
        let mark = self.lexer.position();
        let second = self.lexer.next_token();
        if let (Some(generation), Ok(number)) = (second.as_int(), u32::try_from(n)) {
            if self.lexer.next_token().is_keyword(b"R") {
                if let Ok(generation) = u16::try_from(generation) {
                    return Ok(PdfObject::Reference(ObjectId::new(number, generation)));
                }
            }
        }
        self.lexer.seek(mark);
        Ok(PdfObject::Number(PdfNumber::Int(n)))
    }

    /// Skip tokens until `level` open containers are closed or input ends.
    fn skip_container(&mut self, mut level: usize) -> Result<()> {
        while level > 0 {
            let tok = self.next_token()?;
            match tok.kind {
                TokenKind::Eof => break,
                TokenKind::Delimiter(Delimiter::ArrayOpen | Delimiter::DictOpen) => level += 1,
                TokenKind::Delimiter(Delimiter::ArrayClose | Delimiter::DictClose) => level -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn entries_exceeded(&mut self, start: Span) -> Result<()> {
        self.note(
            NoteKind::StructuralLimitExceeded,
            "container_entries_exceeded",
            start.start as usize,
            format!("container holds more than {} entries", self.limits.max_container_entries),
        );
        warn!(
            security = true,
            domain = "pdf.parser",
            kind = "container_entries_exceeded",
            max_entries = self.limits.max_container_entries,
            offset = start.start,
            "Container size limit exceeded"
        );
        self.skip_container(1)
    }

    /// Keywords that end an object body; seeing one inside a container means
    /// the container was never closed.
    fn ends_object(tok: &Token) -> bool {
        [b"endobj".as_slice(), b"obj", b"stream", b"endstream", b"xref", b"trailer", b"startxref"]
            .iter()
            .any(|kw| tok.is_keyword(kw))
    }

    /// Read the next item of the open container `frame`.
    fn advance(&mut self, frame: &mut Frame) -> Result<Step> {
        let start = frame.start;
        match &mut frame.kind {
            FrameKind::Array(items) => {
                let tok = self.next_token()?;
                if Self::ends_object(&tok) {
                    self.lexer.seek(tok.span.start as usize);
                    self.note(NoteKind::MalformedInput, "unterminated_array", start.start as usize, "");
                    return Ok(Step::Closed);
                }
                match tok.kind {
                    TokenKind::Delimiter(Delimiter::ArrayClose) => return Ok(Step::Closed),
                    TokenKind::Eof => {
                        self.note(NoteKind::MalformedInput, "unterminated_array", start.start as usize, "");
                        return Ok(Step::Closed);
                    }
                    _ => {}
                }
                if items.len() >= self.limits.max_container_entries {
                    self.lexer.seek(tok.span.start as usize);
                    self.entries_exceeded(start)?;
                    return Ok(Step::Dropped);
                }
                frame.item_offset = tok.span.start as usize;
                Ok(Step::Item(tok))
            }
            FrameKind::Dict { entries, key: pending } => loop {
                let tok = self.next_token()?;
                if Self::ends_object(&tok) {
                    self.lexer.seek(tok.span.start as usize);
                    self.note(NoteKind::MalformedInput, "unterminated_dict", start.start as usize, "");
                    return Ok(Step::Closed);
                }
                let key = match tok.kind {
                    TokenKind::Delimiter(Delimiter::DictClose) => return Ok(Step::Closed),
                    TokenKind::Eof => {
                        self.note(NoteKind::MalformedInput, "unterminated_dict", start.start as usize, "");
                        return Ok(Step::Closed);
                    }
                    TokenKind::Name(name) => name,
                    TokenKind::Delimiter(Delimiter::ArrayOpen | Delimiter::DictOpen) => {
                        self.note(NoteKind::MalformedInput, "dict_key_not_name", tok.span.start as usize, "");
                        self.skip_container(1)?;
                        continue;
                    }
                    _ => {
                        self.note(NoteKind::MalformedInput, "dict_key_not_name", tok.span.start as usize, "");
                        continue;
                    }
                };
                if entries.len() >= self.limits.max_container_entries {
                    self.entries_exceeded(start)?;
                    return Ok(Step::Dropped);
                }
                let value_tok = self.next_token()?;
                if matches!(value_tok.kind, TokenKind::Delimiter(Delimiter::DictClose))
                    || Self::ends_object(&value_tok)
                {
                    self.lexer.seek(value_tok.span.start as usize);
                    entries.push((key, PdfObject::Null));
                    continue;
                }
                *pending = Some(key);
                frame.item_offset = value_tok.span.start as usize;
                return Ok(Step::Item(value_tok));
            },
        }
    }

    fn finish(&mut self, frame: Frame) -> Result<PdfObject> {
        match frame.kind {
            FrameKind::Array(items) => Ok(PdfObject::Array(items)),
            FrameKind::Dict { entries, .. } => self.maybe_stream(PdfDict { entries }),
        }
    }

    fn check_budget(&self) -> Result<()> {
        if let Some(reason) = self.budget.and_then(|b| b.exhausted()) {
            return Err(anyhow!(reason));
        }
        Ok(())
    }

    fn maybe_stream(&mut self, dict: PdfDict) -> Result<PdfObject> {
        let next = self.lexer.peek_token();
        if !next.is_keyword(b"stream") {
            return Ok(PdfObject::Dictionary(dict));
        }
        if !self.limits.allow_streams {
            self.note(
                NoteKind::MalformedInput,
                "stream_not_allowed",
                next.span.start as usize,
                "stream keyword where only direct objects may appear",
            );
            return Ok(PdfObject::Dictionary(dict));
        }
        self.lexer.seek(next.span.end as usize);
        self.lexer.skip_eol();
        let data_start = self.lexer.position();
        let declared_length = declared_length(&dict);
        let data_end = match declared_length {
            DeclaredLength::Direct(n) => self.direct_stream_end(data_start, n),
            _ => self.find_endstream(data_start),
        };
        self.lexer.seek(data_end);
        let end_tok = self.lexer.peek_token();
        if end_tok.is_keyword(b"endstream") {
            self.lexer.seek(end_tok.span.end as usize);
        } else if data_end < self.reader.len() {
            self.note(NoteKind::MalformedInput, "missing_endstream", data_end, "");
        }
        Ok(PdfObject::Stream(PdfStream {
            dict,
            data: Span::new(data_start, data_end),
            declared_length,
        }))
    }

    fn direct_stream_end(&mut self, data_start: usize, declared: i64) -> usize {
        let length = usize::try_from(declared).unwrap_or(usize::MAX);
        match self.reader.read(data_start, length) {
            Ok(_) => {
                let end = data_start + length;
                if self.endstream_follows(end) {
                    return end;
                }
                let actual_end = self.find_endstream(data_start);
                self.note(
                    NoteKind::StreamLengthMismatch,
                    "stream_length_mismatch",
                    data_start,
                    format!("/Length {} but data runs {} bytes", declared, actual_end - data_start),
                );
                actual_end
            }
            Err(ReadError::ReadTooLarge { cap, .. }) => {
                self.note(
                    NoteKind::StructuralLimitExceeded,
                    "stream_length_over_cap",
                    data_start,
                    format!("/Length {} exceeds the read cap of {} bytes", declared, cap),
                );
                self.find_endstream(data_start)
            }
            Err(_) => {
                self.note(
                    NoteKind::OutOfBounds,
                    "stream_length_past_eof",
                    data_start,
                    format!("/Length {} points past the end of a {} byte buffer", declared, self.reader.len()),
                );
                warn!(
                    security = true,
                    domain = "pdf.parser",
                    kind = "stream_length_past_eof",
                    declared = declared,
                    offset = data_start,
                    "Stream length points past end of input"
                );
                self.find_endstream(data_start)
            }
        }
    }

    fn endstream_follows(&self, end: usize) -> bool {
        let bytes = self.reader.bytes();
        let mut i = end;
        while i < bytes.len() && crate::lexer::is_whitespace(bytes[i]) {
            i += 1;
        }
        bytes.get(i..).is_some_and(|rest| rest.starts_with(b"endstream"))
    }

    /// End of stream data found by searching for `endstream`, with the
    /// preceding end-of-line marker excluded.
    fn find_endstream(&mut self, data_start: usize) -> usize {
        let bytes = self.reader.bytes();
        let Some(rest) = bytes.get(data_start..) else {
            return bytes.len();
        };
        let Some(found) = memchr::memmem::find(rest, b"endstream") else {
            self.note(NoteKind::MalformedInput, "missing_endstream", data_start, "");
            return bytes.len();
        };
        let mut end = data_start + found;
        if end > data_start && bytes[end - 1] == b'\n' {
            end -= 1;
        }
        if end > data_start && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        end
    }
}

fn declared_length(dict: &PdfDict) -> DeclaredLength {
    match dict.get(b"Length") {
        None => DeclaredLength::Missing,
        Some(PdfObject::Number(PdfNumber::Int(n))) if *n >= 0 => DeclaredLength::Direct(*n),
        Some(PdfObject::Reference(id)) => DeclaredLength::Indirect(*id),
        Some(_) => DeclaredLength::Invalid,
    }
}

/// Parse the indirect object whose header starts at or after `offset`
/// (leading whitespace and comments are skipped).
pub fn parse_indirect_object_at<'a>(
    reader: ByteReader<'a>,
    offset: usize,
    limits: ParseLimits,
    budget: Option<&'a ScanBudget>,
) -> (Result<IndirectObject>, Vec<GraphNote>) {
    let mut p = Parser::new(reader, offset, limits);
    if let Some(budget) = budget {
        p = p.with_budget(budget);
    }
    let res = (|| -> Result<IndirectObject> {
        let number_tok = p.next_token()?;
        let header = number_tok.span.start as usize;
        let number = number_tok
            .as_int()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| anyhow!("expected object number at {}", header))?;
        let generation = p
            .next_token()?
            .as_int()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| anyhow!("expected generation number at {}", header))?;
        if !p.next_token()?.is_keyword(b"obj") {
            bail!("missing obj keyword at {}", header);
        }
        let id = ObjectId::new(number, generation);
        let body = p.next_token()?;
        let object = if body.is_keyword(b"endobj") {
            p.seek(body.span.start as usize);
            PdfObject::Null
        } else {
            p.parse_value(body)?
        };
        let close = p.lexer.peek_token();
        if close.is_keyword(b"endobj") {
            p.seek(close.span.end as usize);
        } else {
            p.note(
                NoteKind::MalformedInput,
                "missing_endobj",
                close.span.start as usize,
                format!("object {} has no endobj", id),
            );
        }
        Ok(IndirectObject { id, object, offset: header, end: p.position() })
    })();
    let mut notes = p.take_notes();
    if let Ok(parsed) = &res {
        for note in &mut notes {
            note.object.get_or_insert(parsed.id);
        }
    }
    (res, notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> ByteReader<'_> {
        ByteReader::new(bytes, usize::MAX)
    }

    fn parse(bytes: &[u8]) -> (IndirectObject, Vec<GraphNote>) {
        let (res, notes) = parse_indirect_object_at(reader(bytes), 0, ParseLimits::default(), None);
        (res.unwrap(), notes)
    }

    #[test]
    fn parses_reference_inside_dict() {
        let (obj, notes) = parse(b"1 0 obj << /Root 2 0 R /Count 3 >> endobj");
        assert!(notes.is_empty());
        let dict = obj.object.as_dict().unwrap();
        assert_eq!(dict.get(b"Root").and_then(|o| o.as_reference()), Some(ObjectId::new(2, 0)));
        assert_eq!(dict.int(b"Count"), Some(3));
    }

    #[test]
    fn two_numbers_without_r_stay_numbers() {
        let (obj, _) = parse(b"1 0 obj [1 2 3] endobj");
        assert_eq!(obj.object.as_array().map(|a| a.len()), Some(3));
    }

    #[test]
    fn stream_with_correct_length() {
        let (obj, notes) = parse(b"4 0 obj << /Length 5 >>\nstream\nhello\nendstream\nendobj");
        assert!(notes.is_empty(), "{notes:?}");
        let stream = obj.object.as_stream().unwrap();
        assert_eq!(stream.data.len(), 5);
        assert_eq!(stream.declared_length, DeclaredLength::Direct(5));
    }

    #[test]
    fn stream_length_mismatch_is_noted() {
        let (obj, notes) = parse(b"4 0 obj << /Length 2 >>\nstream\nhello\nendstream\nendobj");
        assert!(notes.iter().any(|n| n.kind == NoteKind::StreamLengthMismatch));
        assert_eq!(obj.object.as_stream().unwrap().data.len(), 5);
    }

    #[test]
    fn stream_length_past_eof_is_out_of_bounds() {
        let (_, notes) = parse(b"4 0 obj << /Length 99999 >>\nstream\nhello\nendstream\nendobj");
        assert!(notes.iter().any(|n| n.kind == NoteKind::OutOfBounds));
    }

    #[test]
    fn nesting_past_limit_is_replaced_by_null() {
        let limits = ParseLimits { max_depth: 2, ..ParseLimits::default() };
        let (res, notes) =
            parse_indirect_object_at(reader(b"1 0 obj [[[[1]]] 5] endobj"), 0, limits, None);
        let obj = res.unwrap();
        assert!(notes.iter().any(|n| n.kind == NoteKind::StructuralLimitExceeded));
        assert!(obj.object.depth() <= 2);
        let items = obj.object.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_int(), Some(5));
    }

    #[test]
    fn oversized_depth_limit_is_clamped() {
        let limits = ParseLimits { max_depth: 1_000_000, ..ParseLimits::default() };
        let depth = MAX_NESTING_DEPTH + 100;
        let mut input = b"1 0 obj ".to_vec();
        input.extend(std::iter::repeat(b'[').take(depth));
        input.extend(std::iter::repeat(b']').take(depth));
        input.extend_from_slice(b" endobj");
        let (res, notes) = parse_indirect_object_at(reader(&input), 0, limits, None);
        assert!(res.unwrap().object.depth() <= MAX_NESTING_DEPTH);
        assert!(notes.iter().any(|n| n.code == "nesting_depth_exceeded"));
    }

    #[test]
    fn container_entry_cap_drops_container() {
        let limits = ParseLimits { max_container_entries: 2, ..ParseLimits::default() };
        let (res, notes) =
            parse_indirect_object_at(reader(b"1 0 obj [1 2 3 4] endobj"), 0, limits, None);
        assert_eq!(res.unwrap().object, PdfObject::Null);
        assert!(notes.iter().any(|n| n.code == "container_entries_exceeded"));
    }

    #[test]
    fn missing_endobj_is_noted() {
        let (obj, notes) = parse(b"7 0 obj << /A 1 >>\n8 0 obj null endobj");
        assert_eq!(obj.id, ObjectId::new(7, 0));
        assert!(notes.iter().any(|n| n.code == "missing_endobj"));
    }

    #[test]
    fn unterminated_dict_stops_at_endobj() {
        let (obj, notes) = parse(b"3 0 obj << /A 1 endobj");
        assert_eq!(obj.object.as_dict().map(|d| d.len()), Some(1));
        assert!(notes.iter().any(|n| n.code == "unterminated_dict"));
    }

    #[test]
    fn header_mismatch_is_an_error() {
        let (res, _) = parse_indirect_object_at(reader(b"garbage"), 0, ParseLimits::default(), None);
        assert!(res.is_err());
    }
}
