//! Cross-reference tables and streams, following the `/Prev` chain.
//!
//! Any section that cannot be read makes the whole chain unusable; the graph
//! builder then falls back to a linear scan.

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, bail, Result};
use tracing::{debug, warn};

use crate::budget::ScanBudget;
use crate::decode::{decode_stream_budgeted, DecodeLimits, DecodeOutcome};
use crate::lexer::Lexer;
use crate::object::{ObjectId, PdfDict, PdfObject};
use crate::parser::{parse_indirect_object_at, ParseLimits, Parser};
use crate::reader::ByteReader;

pub const DEFAULT_MAX_XREF_SECTIONS: usize = 64;

/// How far back from the end of the file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free,
    InUse { offset: u64, generation: u16 },
    Compressed { container: u32, index: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    Table,
    Stream,
}

#[derive(Debug, Clone)]
pub struct XrefSection {
    pub offset: u64,
    pub kind: XrefKind,
    pub trailer: PdfDict,
    pub entries: BTreeMap<u32, XrefEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct XrefChain {
    /// Newest section first.
    pub sections: Vec<XrefSection>,
    /// Entries merged across sections; the newest section wins.
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Decoded cross-reference streams, keyed by their object id.
    pub streams: Vec<(ObjectId, DecodeOutcome)>,
}

impl XrefChain {
    pub fn trailers(&self) -> impl Iterator<Item = &PdfDict> {
        self.sections.iter().map(|s| &s.trailer)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct XrefLimits {
    pub max_sections: usize,
    pub max_entries: usize,
    pub parse: ParseLimits,
    pub decode: DecodeLimits,
}

/// Offset named by the last `startxref` in the file.
pub fn find_startxref(bytes: &[u8]) -> Option<u64> {
    let window_start = bytes.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &bytes[window_start..];
    let pos = memchr::memmem::rfind(tail, b"startxref")?;
    let mut lexer = Lexer::new(&tail[pos + b"startxref".len()..], 32);
    lexer.next_token().as_int().and_then(|v| u64::try_from(v).ok())
}

pub fn parse_xref_chain(
    reader: &ByteReader<'_>,
    startxref: u64,
    limits: &XrefLimits,
    budget: &ScanBudget,
) -> Result<XrefChain> {
    let mut chain = XrefChain::default();
    let mut seen = HashSet::new();
    let mut next = Some(startxref);
    while let Some(offset) = next {
        budget.check()?;
        if !seen.insert(offset) {
            warn!(
                security = true,
                domain = "pdf.xref",
                kind = "xref_loop_detected",
                offset = offset,
                "Detected xref loop"
            );
            bail!("/Prev chain loops back to offset {}", offset);
        }
        if chain.sections.len() >= limits.max_sections {
            warn!(
                security = true,
                domain = "pdf.xref",
                kind = "xref_section_limit",
                max_sections = limits.max_sections,
                "Xref section limit reached"
            );
            bail!("more than {} cross-reference sections", limits.max_sections);
        }
        let at = usize::try_from(offset).map_err(|_| anyhow!("xref offset {} out of range", offset))?;
        if at >= reader.len() {
            bail!("xref offset {} is past the end of a {} byte file", offset, reader.len());
        }
        let section = if reader.bytes()[at..].starts_with(b"xref") {
            let mut section = parse_xref_table(reader, at, limits)?;
            if let Some(stm) = section.trailer.int(b"XRefStm").and_then(|v| u64::try_from(v).ok()) {
                let hybrid = parse_xref_stream(reader, stm, limits, budget, &mut chain.streams)?;
                for (num, entry) in hybrid.entries {
                    section.entries.entry(num).or_insert(entry);
                }
            }
            section
        } else {
            parse_xref_stream(reader, offset, limits, budget, &mut chain.streams)?
        };
        debug!(offset = offset, kind = ?section.kind, entries = section.entries.len(), "Parsed xref section");
        next = section.trailer.int(b"Prev").and_then(|v| u64::try_from(v).ok());
        for (num, entry) in &section.entries {
            chain.entries.entry(*num).or_insert(*entry);
        }
        if chain.entries.len() > limits.max_entries {
            bail!("cross-reference lists more than {} objects", limits.max_entries);
        }
        chain.sections.push(section);
    }
    Ok(chain)
}

fn parse_xref_table(reader: &ByteReader<'_>, offset: usize, limits: &XrefLimits) -> Result<XrefSection> {
    let mut lexer = Lexer::new(reader.bytes(), limits.parse.max_token_bytes);
    lexer.seek(offset);
    if !lexer.next_token().is_keyword(b"xref") {
        bail!("missing xref keyword at {}", offset);
    }
    let mut entries = BTreeMap::new();
    loop {
        let tok = lexer.next_token();
        if tok.is_keyword(b"trailer") {
            break;
        }
        let first = tok
            .as_int()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| anyhow!("bad xref subsection header at {}", tok.span.start))?;
        let count = lexer
            .next_token()
            .as_int()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| anyhow!("bad xref subsection count at {}", tok.span.start))?;
        if count as usize > limits.max_entries {
            bail!("xref subsection of {} entries", count);
        }
        for i in 0..count {
            let field1 = lexer.next_token().as_int();
            let field2 = lexer.next_token().as_int();
            let kind = lexer.next_token();
            let (Some(field1), Some(field2)) = (field1, field2) else {
                bail!("truncated xref subsection starting at object {}", first);
            };
            let number = first.checked_add(i).ok_or_else(|| anyhow!("xref object number overflow"))?;
            let entry = if kind.is_keyword(b"n") {
                XrefEntry::InUse {
                    offset: u64::try_from(field1).map_err(|_| anyhow!("negative xref offset"))?,
                    generation: u16::try_from(field2).map_err(|_| anyhow!("bad xref generation"))?,
                }
            } else if kind.is_keyword(b"f") {
                XrefEntry::Free
            } else {
                bail!("bad xref entry type for object {}", number);
            };
            entries.insert(number, entry);
        }
    }
    let mut parser = Parser::new(*reader, lexer.position(), limits.parse);
    let trailer = match parser.parse_object()? {
        PdfObject::Dictionary(d) => d,
        other => bail!("trailer is a {}, not a dictionary", other.type_name()),
    };
    Ok(XrefSection { offset: offset as u64, kind: XrefKind::Table, trailer, entries })
}

fn parse_xref_stream(
    reader: &ByteReader<'_>,
    offset: u64,
    limits: &XrefLimits,
    budget: &ScanBudget,
    decoded: &mut Vec<(ObjectId, DecodeOutcome)>,
) -> Result<XrefSection> {
    let at = usize::try_from(offset).map_err(|_| anyhow!("xref offset out of range"))?;
    let (res, _) = parse_indirect_object_at(*reader, at, limits.parse, Some(budget));
    let parsed = res?;
    let PdfObject::Stream(stream) = parsed.object else {
        bail!("object at xref offset {} is not a stream", offset);
    };
    if !stream.dict.has_name(b"Type", b"XRef") {
        bail!("stream at xref offset {} is not /Type /XRef", offset);
    }
    let outcome = decode_stream_budgeted(reader, &stream, &limits.decode, budget);
    let entries = match &outcome {
        DecodeOutcome::Decoded(d) if d.opaque_filter.is_none() => {
            xref_stream_entries(&stream.dict, &d.data, limits.max_entries)?
        }
        DecodeOutcome::Failed { error, .. } => bail!("xref stream {} undecodable: {}", parsed.id, error),
        _ => bail!("xref stream {} not decoded", parsed.id),
    };
    decoded.push((parsed.id, outcome));
    Ok(XrefSection { offset, kind: XrefKind::Stream, trailer: stream.dict, entries })
}

fn xref_stream_entries(dict: &PdfDict, data: &[u8], max_entries: usize) -> Result<BTreeMap<u32, XrefEntry>> {
    let widths: Vec<usize> = dict
        .get(b"W")
        .and_then(|w| w.as_array())
        .ok_or_else(|| anyhow!("xref stream without /W"))?
        .iter()
        .map(|v| v.as_int().and_then(|i| usize::try_from(i).ok()).filter(|w| *w <= 8))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("invalid /W entry"))?;
    if widths.len() != 3 {
        bail!("/W must have three entries");
    }
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        bail!("/W describes empty rows");
    }
    let size = dict.int(b"Size").and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
    let ranges: Vec<(u32, u32)> = match dict.get(b"Index").and_then(|i| i.as_array()) {
        Some(items) => items
            .chunks(2)
            .filter_map(|pair| {
                let start = pair.first()?.as_int().and_then(|v| u32::try_from(v).ok())?;
                let count = pair.get(1)?.as_int().and_then(|v| u32::try_from(v).ok())?;
                Some((start, count))
            })
            .collect(),
        None => vec![(0, size)],
    };
    let mut entries = BTreeMap::new();
    let mut rows = ByteReader::new(data, row);
    for (start, count) in ranges {
        for i in 0..count {
            let Ok(bytes) = rows.read_next(row) else {
                return Ok(entries);
            };
            if entries.len() >= max_entries {
                bail!("xref stream lists more than {} objects", max_entries);
            }
            let (f1, rest) = bytes.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { be_uint(f1) };
            let (f2, f3) = (be_uint(f2), be_uint(f3));
            let Some(number) = start.checked_add(i) else { break };
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse { offset: f2, generation: u16::try_from(f3).unwrap_or(u16::MAX) },
                2 => XrefEntry::Compressed {
                    container: u32::try_from(f2).unwrap_or(u32::MAX),
                    index: u32::try_from(f3).unwrap_or(u32::MAX),
                },
                _ => continue,
            };
            entries.insert(number, entry);
        }
    }
    Ok(entries)
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PdfName;

    fn limits() -> XrefLimits {
        XrefLimits {
            max_sections: DEFAULT_MAX_XREF_SECTIONS,
            max_entries: 1000,
            parse: ParseLimits::default(),
            decode: DecodeLimits::default(),
        }
    }

    #[test]
    fn finds_last_startxref() {
        let data = b"startxref\n10\n%%EOF\nstartxref\n42\n%%EOF\n";
        assert_eq!(find_startxref(data), Some(42));
        assert_eq!(find_startxref(b"%PDF-1.4"), None);
    }

    #[test]
    fn parses_table_and_trailer() {
        let data = b"xref\n0 2\n0000000000 65535 f \n0000000017 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\n";
        let reader = ByteReader::new(data, usize::MAX);
        let chain = parse_xref_chain(&reader, 0, &limits(), &ScanBudget::unlimited()).unwrap();
        assert_eq!(chain.entries.get(&1), Some(&XrefEntry::InUse { offset: 17, generation: 0 }));
        assert_eq!(chain.entries.get(&0), Some(&XrefEntry::Free));
        assert!(chain.trailers().next().unwrap().has(b"Root"));
    }

    #[test]
    fn prev_loop_is_rejected() {
        let data = b"xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev 0 >>\n";
        let reader = ByteReader::new(data, usize::MAX);
        assert!(parse_xref_chain(&reader, 0, &limits(), &ScanBudget::unlimited()).is_err());
    }

    #[test]
    fn offset_past_eof_is_rejected() {
        let reader = ByteReader::new(b"%PDF-1.7", usize::MAX);
        assert!(parse_xref_chain(&reader, 500, &limits(), &ScanBudget::unlimited()).is_err());
    }

    #[test]
    fn decodes_stream_rows() {
        let dict = row_dict(3);
        let data = [0, 0, 0, 255, 1, 0, 15, 0, 2, 0, 5, 3];
        let entries = xref_stream_entries(&dict, &data, 100).unwrap();
        assert_eq!(entries[&0], XrefEntry::Free);
        assert_eq!(entries[&1], XrefEntry::InUse { offset: 15, generation: 0 });
        assert_eq!(entries[&2], XrefEntry::Compressed { container: 5, index: 3 });
    }

    #[test]
    fn partial_trailing_row_ends_the_section() {
        let entries = xref_stream_entries(&row_dict(2), &[1, 0, 15, 0, 1, 0], 100).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&0], XrefEntry::InUse { offset: 15, generation: 0 });
    }

    fn row_dict(size: i64) -> PdfDict {
        let int = |v| PdfObject::Number(crate::object::PdfNumber::Int(v));
        PdfDict {
            entries: vec![
                (PdfName::from_decoded(b"W"), PdfObject::Array(vec![int(1), int(2), int(1)])),
                (PdfName::from_decoded(b"Size"), int(size)),
            ],
        }
    }
}
