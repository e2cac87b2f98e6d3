//! Object stream (`/Type /ObjStm`) expansion.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::budget::ScanBudget;
use crate::decode::{decode_stream_budgeted, DecodeError, DecodeOutcome};
use crate::graph::{GraphNote, NoteKind, ObjectEntry, ObjectGraph, ParseOptions, Provenance};
use crate::lexer::Lexer;
use crate::object::{ObjectId, PdfObject, PdfStream};
use crate::parser::{ParseLimits, Parser};
use crate::reader::ByteReader;
use crate::xref::XrefEntry;

/// Decode every object stream in the table and add its members.
///
/// With a usable cross-reference, a member whose entry names a different
/// container is skipped. A member that is also defined at top level keeps the
/// top-level definition.
pub(crate) fn expand_object_streams(
    graph: &mut ObjectGraph<'_>,
    options: &ParseOptions,
    budget: &ScanBudget,
    xref: Option<&BTreeMap<u32, XrefEntry>>,
) -> Result<()> {
    let mut containers: Vec<(u64, ObjectId, PdfStream)> = graph
        .table
        .iter()
        .filter(|e| matches!(e.provenance, Provenance::TopLevel))
        .filter_map(|e| {
            let stream = e.object.as_stream()?;
            stream
                .dict
                .has_name(b"Type", b"ObjStm")
                .then(|| (e.offset.unwrap_or(0), e.id, stream.clone()))
        })
        .collect();
    containers.sort_by_key(|(offset, id, _)| (*offset, *id));

    for (count, (_, container, stream)) in containers.into_iter().enumerate() {
        if count >= options.max_object_streams {
            warn!(
                security = true,
                domain = "pdf.object_stream",
                kind = "objstm_count_exceeded",
                max_object_streams = options.max_object_streams,
                "ObjStm expansion halted due to count limit"
            );
            graph.notes.push(GraphNote::new(
                NoteKind::StructuralLimitExceeded,
                "objstm_count_exceeded",
                None,
                format!("more than {} object streams", options.max_object_streams),
            ));
            break;
        }
        if let Err(reason) = budget.check() {
            graph.aborted = Some(reason);
            break;
        }
        if graph.is_ciphertext(&stream) {
            debug!(object = %container, "Object stream is encrypted; members not expanded");
            graph.object_streams.push(container);
            graph.decoded.insert(container, DecodeOutcome::Skipped("encrypted"));
            continue;
        }
        let outcome = decode_stream_budgeted(&graph.reader, &stream, &options.decode_limits(), budget);
        if let DecodeOutcome::Failed { error: DecodeError::AllocationRefused { length }, .. } = &outcome {
            return Err(anyhow!(DecodeError::AllocationRefused { length: *length }));
        }
        graph.object_streams.push(container);
        if let Some(data) = outcome.data() {
            expand_one(graph, options, budget, xref, container, &stream, data);
        }
        graph.decoded.insert(container, outcome);
        if let Some(reason) = budget.exhausted() {
            graph.aborted = Some(reason);
            break;
        }
    }
    Ok(())
}

fn expand_one(
    graph: &mut ObjectGraph<'_>,
    options: &ParseOptions,
    budget: &ScanBudget,
    xref: Option<&BTreeMap<u32, XrefEntry>>,
    container: ObjectId,
    stream: &PdfStream,
    data: &[u8],
) {
    let note = |kind, code, detail: String| GraphNote::new(kind, code, None, detail).for_object(container);
    let header = stream
        .dict
        .int(b"N")
        .and_then(|n| usize::try_from(n).ok())
        .zip(stream.dict.int(b"First").and_then(|f| usize::try_from(f).ok()));
    let Some((n, first)) = header else {
        graph.notes.push(note(NoteKind::MalformedInput, "objstm_header_invalid", "missing or negative /N or /First".into()));
        return;
    };
    if first > data.len() {
        graph.notes.push(note(
            NoteKind::OutOfBounds,
            "objstm_first_past_end",
            format!("/First {first} past {} decoded bytes", data.len()),
        ));
        return;
    }
    if n > options.max_objects {
        graph.notes.push(note(
            NoteKind::StructuralLimitExceeded,
            "objstm_member_count",
            format!("/N {n} exceeds the object limit"),
        ));
        return;
    }

    let mut lexer = Lexer::new(&data[..first], options.max_token_bytes);
    let mut pairs = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        let num = lexer.next_token().as_int().and_then(|v| u32::try_from(v).ok());
        let off = lexer.next_token().as_int().and_then(|v| usize::try_from(v).ok());
        match num.zip(off) {
            Some(pair) => pairs.push(pair),
            None => {
                graph.notes.push(note(
                    NoteKind::MalformedInput,
                    "objstm_header_short",
                    format!("header lists {} of {n} members", pairs.len()),
                ));
                break;
            }
        }
    }

    let reader = ByteReader::new(data, options.max_read_bytes);
    let limits = ParseLimits { allow_streams: false, ..options.parse_limits() };
    let mut added = 0usize;
    for (index, (number, offset)) in pairs.into_iter().enumerate() {
        let id = ObjectId::new(number, 0);
        if number == container.number {
            warn!(
                security = true,
                domain = "pdf.object_stream",
                kind = "objstm_recursive_reference",
                obj = number,
                "Detected recursive ObjStm reference"
            );
            graph.notes.push(note(NoteKind::MalformedInput, "objstm_self_reference", format!("member {number} is the container itself")));
            continue;
        }
        if let Some(XrefEntry::Compressed { container: owner, .. }) = xref.and_then(|x| x.get(&number)) {
            if *owner != container.number {
                continue;
            }
        }
        let Some(start) = first.checked_add(offset).filter(|s| *s < data.len()) else {
            graph.notes.push(note(
                NoteKind::OutOfBounds,
                "objstm_member_offset",
                format!("member {number} offset {offset} past {} decoded bytes", data.len()),
            ));
            continue;
        };
        if graph.table.len() >= options.max_objects {
            graph.notes.push(note(
                NoteKind::StructuralLimitExceeded,
                "max_objects_reached",
                format!("more than {} objects", options.max_objects),
            ));
            break;
        }
        let mut parser = Parser::new(reader, start, limits).with_budget(budget);
        let parsed = parser.parse_object();
        graph.notes.extend(parser.take_notes().into_iter().map(|mut n| {
            n.offset = None;
            n.for_object(id)
        }));
        let object = match parsed {
            Ok(object) => object,
            Err(e) => {
                graph.notes.push(note(NoteKind::MalformedInput, "objstm_member_unparsable", format!("member {number}: {e}")));
                continue;
            }
        };
        if object.as_dict().is_some_and(|d| d.has_name(b"Type", b"ObjStm")) {
            warn!(
                security = true,
                domain = "pdf.object_stream",
                kind = "objstm_nested_reference",
                obj = number,
                "ObjStm entry references another ObjStm object"
            );
            graph.notes.push(note(NoteKind::MalformedInput, "objstm_nested_container", format!("member {number} is itself an object stream")));
            continue;
        }
        if graph.table.get(id).is_some_and(|e| matches!(e.provenance, Provenance::TopLevel)) {
            graph.notes.push(note(
                NoteKind::MalformedInput,
                "objstm_shadowed",
                format!("object {id} is defined at top level and inside object stream {container}"),
            ));
            continue;
        }
        graph.table.insert(ObjectEntry {
            id,
            object,
            offset: None,
            provenance: Provenance::ObjectStream { container, index: index as u32 },
        });
        added += 1;
    }
    debug!(container = %container, members = added, "Expanded object stream");
}

#[cfg(test)]
mod tests {
    use crate::budget::ScanBudget;
    use crate::graph::{parse_pdf, ParseOptions, Provenance};
    use crate::object::ObjectId;
    use crate::reader::RawDocument;

    fn pdf_with_objstm(header: &str, body: &str, container: u32) -> Vec<u8> {
        let payload = format!("{header}{body}");
        let first = header.len();
        format!(
            "%PDF-1.7\n{container} 0 obj\n<< /Type /ObjStm /N 2 /First {first} /Length {} >>\nstream\n{payload}\nendstream\nendobj\n",
            payload.len()
        )
        .into_bytes()
    }

    #[test]
    fn members_are_added_with_provenance() {
        let bytes = pdf_with_objstm("1 0 2 14 ", "<< /Kind 1 >> << /Kind 2 >>", 5);
        let doc = RawDocument::new(&bytes);
        let graph = parse_pdf(&doc, &ParseOptions::default(), &ScanBudget::unlimited()).unwrap();
        let member = graph.get(ObjectId::new(2, 0)).unwrap();
        assert!(matches!(
            member.provenance,
            Provenance::ObjectStream { container, index: 1 } if container == ObjectId::new(5, 0)
        ));
        assert_eq!(member.object.as_dict().unwrap().int(b"Kind"), Some(2));
        assert_eq!(graph.object_streams, vec![ObjectId::new(5, 0)]);
    }

    #[test]
    fn self_reference_is_rejected() {
        let bytes = pdf_with_objstm("5 0 1 14 ", "<< /Kind 1 >> << /Kind 2 >>", 5);
        let doc = RawDocument::new(&bytes);
        let graph = parse_pdf(&doc, &ParseOptions::default(), &ScanBudget::unlimited()).unwrap();
        assert!(graph.get(ObjectId::new(5, 0)).unwrap().object.as_stream().is_some());
        assert!(graph.notes.iter().any(|n| n.code == "objstm_self_reference"));
        assert!(graph.get(ObjectId::new(1, 0)).is_some());
    }
}
