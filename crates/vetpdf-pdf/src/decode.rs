//! Stream filter decoding under hard output limits.
//!
//! Output is accumulated in a [`BoundedBuf`]; a filter that would produce
//! more than the limit fails with [`DecodeError::SizeExceeded`] before the
//! excess is ever allocated.

use std::io::Read;

use thiserror::Error;
use tracing::{debug, warn};

use crate::budget::{BudgetExceeded, ScanBudget};
use crate::object::{PdfDict, PdfObject, PdfStream};
use crate::reader::ByteReader;

pub const DEFAULT_MAX_DECODE_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_MAX_FILTER_CHAIN: usize = 8;

const CHUNK: usize = 8192;
const MAX_DECODE_PARMS: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{filter} failed: {reason}")]
    DecodeFailed { filter: String, reason: String },
    #[error("decoded output exceeds {limit} bytes")]
    SizeExceeded { limit: usize },
    #[error("filter chain of {length} filters exceeds the limit of {limit}")]
    ChainTooLong { length: usize, limit: usize },
    #[error("allocation of {length} bytes refused")]
    AllocationRefused { length: usize },
}

impl DecodeError {
    fn failed(filter: &str, reason: impl Into<String>) -> Self {
        DecodeError::DecodeFailed { filter: filter.to_string(), reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_decoded_bytes: usize,
    pub max_filter_chain: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_decoded_bytes: DEFAULT_MAX_DECODE_BYTES, max_filter_chain: DEFAULT_MAX_FILTER_CHAIN }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedStream {
    pub data: Vec<u8>,
    pub filters: Vec<String>,
    /// Image codec or encryption filter where decoding stopped.
    pub opaque_filter: Option<String>,
    pub input_len: usize,
}

#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    Decoded(DecodedStream),
    Failed { error: DecodeError, filters: Vec<String> },
    Skipped(&'static str),
}

impl DecodeOutcome {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            DecodeOutcome::Decoded(d) if d.opaque_filter.is_none() => Some(&d.data),
            _ => None,
        }
    }
}

struct BoundedBuf {
    data: Vec<u8>,
    limit: usize,
}

impl BoundedBuf {
    fn new(limit: usize) -> Self {
        Self { data: Vec::new(), limit }
    }

    fn extend(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        if self.data.len().saturating_add(bytes.len()) > self.limit {
            return Err(DecodeError::SizeExceeded { limit: self.limit });
        }
        self.data
            .try_reserve(bytes.len())
            .map_err(|_| DecodeError::AllocationRefused { length: bytes.len() })?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn push(&mut self, b: u8) -> Result<(), DecodeError> {
        self.extend(&[b])
    }

    fn repeat(&mut self, b: u8, count: usize) -> Result<(), DecodeError> {
        let chunk = [b; 128];
        let mut left = count;
        while left > 0 {
            let n = left.min(chunk.len());
            self.extend(&chunk[..n])?;
            left -= n;
        }
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone, Copy)]
struct DecodeParms {
    predictor: u32,
    colors: u32,
    bits_per_component: u32,
    columns: u32,
    early_change: u32,
}

impl Default for DecodeParms {
    fn default() -> Self {
        Self { predictor: 1, colors: 1, bits_per_component: 8, columns: 1, early_change: 1 }
    }
}

/// Canonical filter names, abbreviations expanded.
pub fn stream_filters(dict: &PdfDict) -> Vec<String> {
    let mut out = Vec::new();
    match dict.get(b"Filter") {
        Some(PdfObject::Name(n)) => out.push(canonical_filter(&n.decoded)),
        Some(PdfObject::Array(items)) => {
            for item in items {
                if let PdfObject::Name(n) = item {
                    out.push(canonical_filter(&n.decoded));
                }
            }
        }
        _ => {}
    }
    out
}

fn canonical_filter(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    let canonical = match name.as_ref() {
        "Fl" => "FlateDecode",
        "AHx" => "ASCIIHexDecode",
        "A85" => "ASCII85Decode",
        "RL" => "RunLengthDecode",
        "LZW" => "LZWDecode",
        "DCT" => "DCTDecode",
        "CCF" => "CCITTFaxDecode",
        other => return other.to_string(),
    };
    canonical.to_string()
}

fn is_opaque_filter(filter: &str) -> bool {
    matches!(filter, "DCTDecode" | "JPXDecode" | "JBIG2Decode" | "CCITTFaxDecode")
}

fn decode_parms(dict: &PdfDict, count: usize) -> Vec<Option<&PdfDict>> {
    let mut out = vec![None; count];
    match dict.get(b"DecodeParms").or_else(|| dict.get(b"DP")) {
        Some(PdfObject::Dictionary(d)) => {
            if let Some(slot) = out.first_mut() {
                *slot = Some(d);
            }
        }
        Some(PdfObject::Array(items)) => {
            for (slot, item) in out.iter_mut().zip(items) {
                if let PdfObject::Dictionary(d) = item {
                    *slot = Some(d);
                }
            }
        }
        _ => {}
    }
    out
}

fn parms_from_dict(dict: Option<&PdfDict>) -> DecodeParms {
    let mut parms = DecodeParms::default();
    let Some(dict) = dict else { return parms };
    let get = |key: &[u8]| dict.int(key).and_then(|v| u32::try_from(v).ok());
    if let Some(v) = get(b"Predictor") {
        parms.predictor = v;
    }
    if let Some(v) = get(b"Colors") {
        parms.colors = v;
    }
    if let Some(v) = get(b"BitsPerComponent") {
        parms.bits_per_component = v;
    }
    if let Some(v) = get(b"Columns") {
        parms.columns = v;
    }
    if let Some(v) = get(b"EarlyChange") {
        parms.early_change = v;
    }
    parms
}

/// Decode `raw` through the filters declared in `dict`.
pub fn decode(dict: &PdfDict, raw: &[u8], limits: &DecodeLimits) -> Result<DecodedStream, DecodeError> {
    let filters = stream_filters(dict);
    if filters.len() > limits.max_filter_chain {
        return Err(DecodeError::ChainTooLong {
            length: filters.len(),
            limit: limits.max_filter_chain,
        });
    }
    let parms = decode_parms(dict, filters.len());
    let limit = limits.max_decoded_bytes;
    let mut data: Option<Vec<u8>> = None;
    let mut opaque_filter = None;
    for (idx, filter) in filters.iter().enumerate() {
        let input: &[u8] = data.as_deref().unwrap_or(raw);
        if is_opaque_filter(filter) {
            opaque_filter = Some(filter.clone());
            break;
        }
        let p = parms_from_dict(parms[idx]);
        let out = match filter.as_str() {
            "FlateDecode" => apply_predictor(decode_flate(input, limit)?, p, limit)?,
            "LZWDecode" => apply_predictor(decode_lzw(input, p.early_change, limit)?, p, limit)?,
            "ASCIIHexDecode" => decode_ascii_hex(input, limit)?,
            "ASCII85Decode" => decode_ascii85(input, limit)?,
            "RunLengthDecode" => decode_run_length(input, limit)?,
            "Crypt" => {
                let identity = parms[idx]
                    .and_then(|d| d.name(b"Name"))
                    .map(|n| n.is(b"Identity"))
                    .unwrap_or(true);
                if !identity {
                    opaque_filter = Some(filter.clone());
                    break;
                }
                let mut buf = BoundedBuf::new(limit);
                buf.extend(input)?;
                buf.into_inner()
            }
            other => return Err(DecodeError::failed(other, "unsupported filter")),
        };
        data = Some(out);
    }
    let data = match data {
        Some(d) => d,
        None if opaque_filter.is_some() => Vec::new(),
        None => {
            let mut buf = BoundedBuf::new(limit);
            buf.extend(raw)?;
            buf.into_inner()
        }
    };
    Ok(DecodedStream { data, filters, opaque_filter, input_len: raw.len() })
}

/// Decode a stream whose raw bytes live in `reader`.
pub fn decode_stream(
    reader: &ByteReader<'_>,
    stream: &PdfStream,
    limits: &DecodeLimits,
) -> Result<DecodedStream, DecodeError> {
    let span = stream.data;
    let raw = reader
        .read(span.start as usize, span.len() as usize)
        .map_err(|e| DecodeError::failed("stream data", e.to_string()))?;
    decode(&stream.dict, raw, limits)
}

/// Decode under the scan budget: the per-stream cap shrinks to the remaining
/// decoded-memory budget, and hitting that smaller cap trips the budget.
pub fn decode_stream_budgeted(
    reader: &ByteReader<'_>,
    stream: &PdfStream,
    limits: &DecodeLimits,
    budget: &ScanBudget,
) -> DecodeOutcome {
    if budget.check().is_err() {
        return DecodeOutcome::Skipped("scan budget exhausted");
    }
    let remaining = budget.remaining_memory();
    let effective = DecodeLimits {
        max_decoded_bytes: limits.max_decoded_bytes.min(remaining),
        max_filter_chain: limits.max_filter_chain,
    };
    match decode_stream(reader, stream, &effective) {
        Ok(decoded) => {
            let _ = budget.charge(decoded.data.len());
            DecodeOutcome::Decoded(decoded)
        }
        Err(error) => {
            if let DecodeError::SizeExceeded { limit } = error {
                if limit < limits.max_decoded_bytes {
                    budget.trip(BudgetExceeded::Memory { limit: budget.memory_limit() });
                }
                warn!(
                    security = true,
                    domain = "pdf.decode",
                    kind = "decode_size_exceeded",
                    limit = limit,
                    "Stream output exceeded decode limit"
                );
            } else {
                debug!(error = %error, "Stream decode failed");
            }
            DecodeOutcome::Failed { error, filters: stream_filters(&stream.dict) }
        }
    }
}

fn decode_flate(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    match inflate(flate2::read::ZlibDecoder::new(data), limit) {
        Ok(out) => Ok(out),
        Err(DecodeError::DecodeFailed { .. }) => inflate(flate2::read::DeflateDecoder::new(data), limit),
        Err(e) => Err(e),
    }
}

fn inflate<R: Read>(mut decoder: R, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = BoundedBuf::new(limit);
    let mut buf = [0u8; CHUNK];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend(&buf[..n])?,
            // Truncated or corrupt tails are common; keep what inflated cleanly.
            Err(_) if !out.data.is_empty() => break,
            Err(e) => return Err(DecodeError::failed("FlateDecode", e.to_string())),
        }
    }
    Ok(out.into_inner())
}

fn decode_lzw(data: &[u8], early_change: u32, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = if early_change == 0 {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    };
    let mut out = BoundedBuf::new(limit);
    let mut buf = [0u8; CHUNK];
    let mut input = data;
    loop {
        let res = decoder.decode_bytes(input, &mut buf);
        out.extend(&buf[..res.consumed_out])?;
        input = &input[res.consumed_in..];
        match res.status {
            Ok(weezl::LzwStatus::Done) | Ok(weezl::LzwStatus::NoProgress) => break,
            Ok(weezl::LzwStatus::Ok) => {
                if res.consumed_in == 0 && res.consumed_out == 0 {
                    break;
                }
            }
            Err(_) if !out.data.is_empty() => break,
            Err(e) => return Err(DecodeError::failed("LZWDecode", e.to_string())),
        }
    }
    Ok(out.into_inner())
}

fn decode_ascii_hex(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = BoundedBuf::new(limit);
    let mut high: Option<u8> = None;
    for &b in data {
        if b == b'>' {
            break;
        }
        if b.is_ascii_whitespace() {
            continue;
        }
        let Some(v) = crate::lexer::hex_val(b) else {
            return Err(DecodeError::failed("ASCIIHexDecode", format!("invalid byte 0x{b:02x}")));
        };
        match high.take() {
            Some(h) => out.push((h << 4) | v)?,
            None => high = Some(v),
        }
    }
    if let Some(h) = high {
        out.push(h << 4)?;
    }
    Ok(out.into_inner())
}

fn decode_ascii85(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = BoundedBuf::new(limit);
    let mut tuple = [0u8; 5];
    let mut filled = 0usize;
    let mut i = 0usize;
    while i < data.len() {
        let b = data[i];
        i += 1;
        if b == b'~' {
            break;
        }
        if b.is_ascii_whitespace() {
            continue;
        }
        if b == b'z' && filled == 0 {
            out.extend(&[0, 0, 0, 0])?;
            continue;
        }
        if !(b'!'..=b'u').contains(&b) {
            return Err(DecodeError::failed("ASCII85Decode", format!("invalid byte 0x{b:02x}")));
        }
        tuple[filled] = b - b'!';
        filled += 1;
        if filled == 5 {
            let value = tuple.iter().fold(0u64, |acc, d| acc * 85 + *d as u64);
            if value > u32::MAX as u64 {
                return Err(DecodeError::failed("ASCII85Decode", "group overflow"));
            }
            out.extend(&(value as u32).to_be_bytes())?;
            filled = 0;
        }
    }
    if filled > 1 {
        for slot in tuple.iter_mut().skip(filled) {
            *slot = 84;
        }
        let value = tuple.iter().fold(0u64, |acc, d| acc * 85 + *d as u64);
        let bytes = (value.min(u32::MAX as u64) as u32).to_be_bytes();
        out.extend(&bytes[..filled - 1])?;
    }
    Ok(out.into_inner())
}

fn decode_run_length(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = BoundedBuf::new(limit);
    let mut i = 0usize;
    while i < data.len() {
        let n = data[i];
        i += 1;
        match n {
            128 => break,
            0..=127 => {
                let count = n as usize + 1;
                let end = (i + count).min(data.len());
                out.extend(&data[i..end])?;
                i = end;
            }
            _ => {
                let Some(&b) = data.get(i) else { break };
                out.repeat(b, 257 - n as usize)?;
                i += 1;
            }
        }
    }
    Ok(out.into_inner())
}

fn apply_predictor(data: Vec<u8>, parms: DecodeParms, limit: usize) -> Result<Vec<u8>, DecodeError> {
    if parms.predictor <= 1 {
        return Ok(data);
    }
    if parms.colors > MAX_DECODE_PARMS
        || parms.bits_per_component > 32
        || parms.columns > MAX_DECODE_PARMS
    {
        warn!(
            security = true,
            domain = "pdf.decode",
            kind = "decode_parms_out_of_range",
            colors = parms.colors,
            bits = parms.bits_per_component,
            columns = parms.columns,
            "Decode parameters out of range"
        );
        return Err(DecodeError::failed("predictor", "decode parameters out of range"));
    }
    if parms.bits_per_component != 8 {
        return Ok(data);
    }
    let bpp = parms.colors.max(1) as usize;
    let row_len = (parms.columns as usize).saturating_mul(bpp);
    if row_len == 0 || row_len > limit {
        return Err(DecodeError::failed("predictor", "row length out of range"));
    }
    match parms.predictor {
        2 => Ok(tiff_predictor(data, row_len, bpp)),
        10..=15 => png_predictor(&data, row_len, bpp, limit),
        _ => Ok(data),
    }
}

fn tiff_predictor(mut data: Vec<u8>, row_len: usize, bpp: usize) -> Vec<u8> {
    for row in data.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    data
}

fn png_predictor(data: &[u8], row_len: usize, bpp: usize, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = BoundedBuf::new(limit);
    let mut prev = vec![0u8; row_len];
    let mut row = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < row_len + 1 {
            break;
        }
        let filter = chunk[0];
        row.copy_from_slice(&chunk[1..]);
        for j in 0..row_len {
            let left = if j >= bpp { row[j - bpp] } else { 0 };
            let up = prev[j];
            let up_left = if j >= bpp { prev[j - bpp] } else { 0 };
            row[j] = match filter {
                1 => row[j].wrapping_add(left),
                2 => row[j].wrapping_add(up),
                3 => row[j].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[j].wrapping_add(paeth(left, up, up_left)),
                _ => row[j],
            };
        }
        out.extend(&row)?;
        std::mem::swap(&mut prev, &mut row);
    }
    Ok(out.into_inner())
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let (a, b, c) = (a as i32, b as i32, c as i32);
    let p = a + b - c;
    let (pa, pb, pc) = ((p - a).abs(), (p - b).abs(), (p - c).abs());
    if pa <= pb && pa <= pc {
        a as u8
    } else if pb <= pc {
        b as u8
    } else {
        c as u8
    }
}
