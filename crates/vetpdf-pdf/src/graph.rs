use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashSet;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::budget::{BudgetExceeded, ScanBudget};
use crate::decode::{stream_filters, DecodeLimits, DecodeOutcome, DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_FILTER_CHAIN};
use crate::lexer::{is_regular, is_whitespace, DEFAULT_MAX_TOKEN_BYTES};
use crate::object::{DeclaredLength, ObjectId, PdfDict, PdfObject, PdfStream};
use crate::objstm::expand_object_streams;
use crate::parser::{
    parse_indirect_object_at, ParseLimits, Parser, DEFAULT_MAX_CONTAINER_ENTRIES, DEFAULT_MAX_DEPTH,
};
use crate::reader::{ByteReader, RawDocument, DEFAULT_MAX_READ_BYTES};
use crate::xref::{self, XrefChain, XrefEntry, XrefLimits, DEFAULT_MAX_XREF_SECTIONS};

/// Indirect `/Length` values within this many bytes of the real data length
/// are accepted (end-of-line conventions vary).
const LENGTH_TOLERANCE: i64 = 2;

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub max_read_bytes: usize,
    pub max_token_bytes: usize,
    pub max_depth: usize,
    pub max_container_entries: usize,
    pub max_objects: usize,
    pub max_reference_chain: usize,
    pub max_xref_sections: usize,
    pub max_object_streams: usize,
    pub max_decode_bytes: usize,
    pub max_filter_chain: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_token_bytes: DEFAULT_MAX_TOKEN_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
            max_container_entries: DEFAULT_MAX_CONTAINER_ENTRIES,
            max_objects: 500_000,
            max_reference_chain: 32,
            max_xref_sections: DEFAULT_MAX_XREF_SECTIONS,
            max_object_streams: 1000,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
            max_filter_chain: DEFAULT_MAX_FILTER_CHAIN,
        }
    }
}

impl ParseOptions {
    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_depth: self.max_depth,
            max_container_entries: self.max_container_entries,
            max_token_bytes: self.max_token_bytes,
            allow_streams: true,
        }
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits { max_decoded_bytes: self.max_decode_bytes, max_filter_chain: self.max_filter_chain }
    }

    fn xref_limits(&self) -> XrefLimits {
        XrefLimits {
            max_sections: self.max_xref_sections,
            max_entries: self.max_objects,
            parse: self.parse_limits(),
            decode: self.decode_limits(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoteKind {
    MalformedInput,
    StructuralLimitExceeded,
    OutOfBounds,
    StreamLengthMismatch,
}

/// Something the builder noticed and worked around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNote {
    pub kind: NoteKind,
    pub code: &'static str,
    pub object: Option<ObjectId>,
    pub offset: Option<u64>,
    pub detail: String,
}

impl GraphNote {
    pub fn new(kind: NoteKind, code: &'static str, offset: Option<u64>, detail: impl Into<String>) -> Self {
        Self { kind, code, object: None, offset, detail: detail.into() }
    }

    pub fn for_object(mut self, id: ObjectId) -> Self {
        self.object = Some(id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    TopLevel,
    ObjectStream { container: ObjectId, index: u32 },
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub object: PdfObject,
    /// Header offset in the file; `None` for objects from object streams.
    pub offset: Option<u64>,
    pub provenance: Provenance,
}

pub enum Resolved<'t> {
    Value(&'t PdfObject),
    Dangling(ObjectId),
    Cycle(ObjectId),
    ChainTooLong(ObjectId),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    entries: BTreeMap<ObjectId, ObjectEntry>,
}

impl ObjectTable {
    pub fn get(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert, replacing any earlier definition of the same id.
    pub fn insert(&mut self, entry: ObjectEntry) -> Option<ObjectEntry> {
        self.entries.insert(entry.id, entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending `ObjectId` order.
    pub fn iter(&self) -> btree_map::Values<'_, ObjectId, ObjectEntry> {
        self.entries.values()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Follow references from `obj` for at most `max_chain` hops.
    pub fn resolve<'t>(&'t self, obj: &'t PdfObject, max_chain: usize) -> Resolved<'t> {
        let mut current = obj;
        let mut seen = HashSet::new();
        let mut hops = 0usize;
        while let PdfObject::Reference(id) = current {
            if !seen.insert(*id) {
                return Resolved::Cycle(*id);
            }
            hops += 1;
            if hops > max_chain {
                return Resolved::ChainTooLong(*id);
            }
            match self.entries.get(id) {
                Some(entry) => current = &entry.object,
                None => return Resolved::Dangling(*id),
            }
        }
        Resolved::Value(current)
    }
}

#[derive(Debug)]
pub struct ObjectGraph<'a> {
    pub reader: ByteReader<'a>,
    pub table: ObjectTable,
    /// Newest first.
    pub trailers: Vec<PdfDict>,
    pub notes: Vec<GraphNote>,
    /// True when the cross-reference data was unusable and objects were
    /// found by scanning the file.
    pub recovered: bool,
    pub object_streams: Vec<ObjectId>,
    /// Object streams and cross-reference streams decoded while building.
    pub decoded: BTreeMap<ObjectId, DecodeOutcome>,
    pub aborted: Option<BudgetExceeded>,
    /// The trailer names an `/Encrypt` dictionary whose stream crypt filter
    /// is not `/Identity`, so stream bodies are ciphertext.
    pub encrypted: bool,
    pub max_reference_chain: usize,
}

impl<'a> ObjectGraph<'a> {
    fn new(reader: ByteReader<'a>, max_reference_chain: usize) -> Self {
        Self {
            reader,
            table: ObjectTable::default(),
            trailers: Vec::new(),
            notes: Vec::new(),
            recovered: false,
            object_streams: Vec::new(),
            decoded: BTreeMap::new(),
            aborted: None,
            encrypted: false,
            max_reference_chain,
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.reader.bytes()
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.table.get(id)
    }

    pub fn resolve<'t>(&'t self, obj: &'t PdfObject) -> Resolved<'t> {
        self.table.resolve(obj, self.max_reference_chain)
    }

    /// The value behind `obj`, or `None` for anything unresolvable.
    pub fn value<'t>(&'t self, obj: &'t PdfObject) -> Option<&'t PdfObject> {
        match self.resolve(obj) {
            Resolved::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn dict<'t>(&'t self, obj: &'t PdfObject) -> Option<&'t PdfDict> {
        self.value(obj)?.as_dict()
    }

    pub fn root_id(&self) -> Option<ObjectId> {
        self.trailers.iter().find_map(|t| t.get(b"Root")?.as_reference())
    }

    /// The document catalog: trailer `/Root`, else the first `/Type /Catalog`.
    pub fn catalog(&self) -> Option<&PdfDict> {
        if let Some(dict) = self.root_id().and_then(|id| self.get(id)).and_then(|e| e.object.as_dict()) {
            return Some(dict);
        }
        self.table
            .iter()
            .filter_map(|e| e.object.as_dict())
            .find(|d| d.has_name(b"Type", b"Catalog"))
    }

    /// The resolved `/Encrypt` dictionary of the newest trailer naming one.
    pub fn encryption(&self) -> Option<&PdfDict> {
        self.trailers.iter().find_map(|t| self.dict(t.get(b"Encrypt")?))
    }

    /// Whether the body of `stream` is ciphertext. Cross-reference streams
    /// and streams with their own `/Crypt` filter are left to the decoder.
    pub fn is_ciphertext(&self, stream: &PdfStream) -> bool {
        self.encrypted
            && !stream.dict.has_name(b"Type", b"XRef")
            && stream_filters(&stream.dict).first().map(String::as_str) != Some("Crypt")
    }

    /// Raw bytes of a top-level stream, bounds-checked against the file.
    pub fn stream_raw(&self, stream: &PdfStream) -> Option<&'a [u8]> {
        self.reader.read(stream.data.start as usize, stream.data.len() as usize).ok()
    }

    fn note(&mut self, note: GraphNote) {
        self.notes.push(note);
    }
}

pub fn parse_pdf<'a>(
    doc: &RawDocument<'a>,
    options: &ParseOptions,
    budget: &ScanBudget,
) -> Result<ObjectGraph<'a>> {
    let parse_span = tracing::info_span!(
        "parse_pdf",
        bytes_len = doc.len(),
        max_objects = options.max_objects,
        max_depth = options.max_depth
    );
    let _parse_guard = parse_span.enter();
    info!("Parsing PDF object graph");

    let reader = ByteReader::from_document(doc, options.max_read_bytes);
    let mut graph = ObjectGraph::new(reader, options.max_reference_chain);

    let chain = match xref::find_startxref(doc.bytes()) {
        Some(offset) => xref::parse_xref_chain(&reader, offset, &options.xref_limits(), budget),
        None => Err(anyhow!("no startxref keyword")),
    };
    let mut compressed = None;
    let recovery_reason = match chain {
        Ok(chain) => {
            for (id, outcome) in &chain.streams {
                graph.decoded.insert(*id, outcome.clone());
            }
            let loaded = load_from_xref(&mut graph, &chain, options, budget);
            // A graph cut short by the budget keeps its trailers for the checks that still run.
            if loaded.is_ok() || budget.exhausted().is_some() {
                graph.trailers = chain.trailers().cloned().collect();
            }
            match loaded {
                Ok(()) => {
                    compressed = Some(chain.entries);
                    None
                }
                Err(reason) => Some(reason),
            }
        }
        Err(e) => Some(e.to_string()),
    };

    if let Some(reason) = budget.exhausted() {
        graph.aborted = Some(reason);
    } else if let Some(reason) = recovery_reason {
        warn!(
            security = true,
            domain = "pdf.xref",
            kind = "xref_recovery",
            reason = %reason,
            "Cross-reference data unusable; scanning for objects"
        );
        graph.table.clear();
        graph.notes.clear();
        graph.recovered = true;
        graph.note(GraphNote::new(
            NoteKind::MalformedInput,
            "xref_recovery",
            None,
            format!("cross-reference data unusable ({reason}); objects recovered by linear scan"),
        ));
        linear_scan(&mut graph, options, budget);
        graph.trailers = recover_trailers(&graph, options);
    }

    graph.encrypted = graph.encryption().is_some_and(|e| !e.has_name(b"StmF", b"Identity"));
    if graph.encrypted {
        debug!("Document encrypts its streams; bodies stay opaque");
    }
    if graph.aborted.is_none() {
        expand_object_streams(&mut graph, options, budget, compressed.as_ref())?;
        reconcile_indirect_lengths(&mut graph);
    }
    if graph.aborted.is_none() {
        graph.aborted = budget.exhausted();
    }

    info!(
        objects = graph.table.len(),
        trailers = graph.trailers.len(),
        notes = graph.notes.len(),
        recovered = graph.recovered,
        object_streams = graph.object_streams.len(),
        "Parsed PDF object graph"
    );
    Ok(graph)
}

/// Load every in-use entry of a cross-reference chain. Any entry that does
/// not point at a matching header makes the chain untrustworthy.
fn load_from_xref(
    graph: &mut ObjectGraph<'_>,
    chain: &XrefChain,
    options: &ParseOptions,
    budget: &ScanBudget,
) -> std::result::Result<(), String> {
    let mut in_use = 0usize;
    for (&number, entry) in &chain.entries {
        let XrefEntry::InUse { offset, generation } = *entry else {
            continue;
        };
        if number == 0 {
            continue;
        }
        in_use += 1;
        if budget.check().is_err() {
            return Ok(());
        }
        if graph.table.len() >= options.max_objects {
            object_limit_reached(graph, options);
            return Ok(());
        }
        let at = usize::try_from(offset).map_err(|_| format!("offset {offset} out of range"))?;
        let (res, notes) = parse_indirect_object_at(graph.reader, at, options.parse_limits(), Some(budget));
        let parsed = res.map_err(|e| format!("xref entry for object {number} at offset {offset}: {e}"))?;
        let expected = ObjectId::new(number, generation);
        if parsed.id != expected || parsed.offset != at {
            return Err(format!(
                "xref entry for object {expected} at offset {offset} points at object {}",
                parsed.id
            ));
        }
        graph.notes.extend(notes);
        graph.table.insert(ObjectEntry {
            id: parsed.id,
            object: parsed.object,
            offset: Some(offset),
            provenance: Provenance::TopLevel,
        });
    }
    let compressed = chain.entries.values().any(|e| matches!(e, XrefEntry::Compressed { .. }));
    if in_use == 0 && !compressed {
        return Err("cross-reference lists no objects".to_string());
    }
    debug!(objects = graph.table.len(), "Loaded objects from cross-reference");
    Ok(())
}

fn object_limit_reached(graph: &mut ObjectGraph<'_>, options: &ParseOptions) {
    warn!(
        security = true,
        domain = "pdf.parser",
        kind = "max_objects_reached",
        max_objects = options.max_objects,
        "Max objects reached"
    );
    graph.note(GraphNote::new(
        NoteKind::StructuralLimitExceeded,
        "max_objects_reached",
        None,
        format!("more than {} objects", options.max_objects),
    ));
}

/// Find `N G obj` headers anywhere in the file. Later definitions replace
/// earlier ones; candidates inside an already parsed object are skipped.
fn linear_scan(graph: &mut ObjectGraph<'_>, options: &ParseOptions, budget: &ScanBudget) {
    let bytes = graph.reader.bytes();
    let mut covered = 0usize;
    for pos in memchr::memmem::find_iter(bytes, b"obj") {
        if pos < covered || (pos >= 3 && &bytes[pos - 3..pos] == b"end") {
            continue;
        }
        if bytes.get(pos + 3).is_some_and(|b| is_regular(*b)) {
            continue;
        }
        let Some(header) = header_start(bytes, pos) else {
            continue;
        };
        if header < covered {
            continue;
        }
        if let Err(reason) = budget.check() {
            graph.aborted = Some(reason);
            break;
        }
        if graph.table.len() >= options.max_objects {
            object_limit_reached(graph, options);
            break;
        }
        let (res, notes) = parse_indirect_object_at(graph.reader, header, options.parse_limits(), Some(budget));
        let Ok(parsed) = res else {
            continue;
        };
        covered = parsed.end;
        graph.notes.extend(notes);
        graph.table.insert(ObjectEntry {
            id: parsed.id,
            object: parsed.object,
            offset: Some(parsed.offset as u64),
            provenance: Provenance::TopLevel,
        });
    }
    debug!(objects = graph.table.len(), "Recovered objects by linear scan");
}

/// Start of the `N G` preceding an `obj` keyword at `obj_pos`.
fn header_start(bytes: &[u8], obj_pos: usize) -> Option<usize> {
    fn skip_ws_back(bytes: &[u8], mut i: usize) -> usize {
        while i > 0 && is_whitespace(bytes[i - 1]) {
            i -= 1;
        }
        i
    }
    fn digits_back(bytes: &[u8], mut i: usize, max: usize) -> Option<usize> {
        let end = i;
        while i > 0 && bytes[i - 1].is_ascii_digit() {
            i -= 1;
        }
        (i < end && end - i <= max).then_some(i)
    }
    let gen_end = skip_ws_back(bytes, obj_pos);
    let gen_start = digits_back(bytes, gen_end, 5)?;
    let num_end = skip_ws_back(bytes, gen_start);
    if num_end == gen_start {
        return None;
    }
    let num_start = digits_back(bytes, num_end, 10)?;
    if num_start > 0 && is_regular(bytes[num_start - 1]) {
        return None;
    }
    Some(num_start)
}

/// Trailer dictionaries and cross-reference stream dictionaries, newest first.
fn recover_trailers(graph: &ObjectGraph<'_>, options: &ParseOptions) -> Vec<PdfDict> {
    let bytes = graph.reader.bytes();
    let mut found: Vec<(u64, PdfDict)> = Vec::new();
    for pos in memchr::memmem::find_iter(bytes, b"trailer") {
        let mut parser = Parser::new(graph.reader, pos + b"trailer".len(), options.parse_limits());
        if let Ok(PdfObject::Dictionary(dict)) = parser.parse_object() {
            found.push((pos as u64, dict));
        }
    }
    for entry in graph.table.iter() {
        if let (Some(stream), Some(offset)) = (entry.object.as_stream(), entry.offset) {
            if stream.dict.has_name(b"Type", b"XRef") {
                found.push((offset, stream.dict.clone()));
            }
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    found.into_iter().map(|(_, d)| d).collect()
}

/// Compare indirect `/Length` values with the data actually found.
fn reconcile_indirect_lengths(graph: &mut ObjectGraph<'_>) {
    let mut notes = Vec::new();
    for entry in graph.table.iter() {
        let Some(stream) = entry.object.as_stream() else { continue };
        let DeclaredLength::Indirect(len_id) = stream.declared_length else { continue };
        let Some(declared) = graph.table.get(len_id).and_then(|e| e.object.as_int()) else {
            continue;
        };
        let actual = stream.data.len() as i64;
        if (stream.data.start as i64).saturating_add(declared) > graph.reader.len() as i64 {
            notes.push(
                GraphNote::new(
                    NoteKind::OutOfBounds,
                    "stream_length_past_eof",
                    Some(stream.data.start),
                    format!("/Length {declared} (object {len_id}) points past the end of the file"),
                )
                .for_object(entry.id),
            );
        } else if (declared - actual).abs() > LENGTH_TOLERANCE {
            notes.push(
                GraphNote::new(
                    NoteKind::StreamLengthMismatch,
                    "stream_length_mismatch",
                    Some(stream.data.start),
                    format!("/Length {declared} (object {len_id}) but data runs {actual} bytes"),
                )
                .for_object(entry.id),
            );
        }
    }
    graph.notes.extend(notes);
}
