pub mod budget;
pub mod decode;
pub mod graph;
pub mod lexer;
pub mod object;
mod objstm;
pub mod parser;
pub mod reader;
pub mod span;
pub mod xref;

pub use crate::budget::{BudgetExceeded, ScanBudget};
pub use crate::decode::{decode, decode_stream_budgeted, stream_filters, DecodeError, DecodeLimits, DecodeOutcome};
pub use crate::graph::{
    parse_pdf, GraphNote, NoteKind, ObjectEntry, ObjectGraph, ObjectTable, ParseOptions, Provenance, Resolved,
};
pub use crate::parser::MAX_NESTING_DEPTH;
pub use crate::object::{ObjectId, PdfDict, PdfName, PdfObject, PdfStream, PdfString};
pub use crate::reader::{ByteReader, RawDocument, ReadError};
