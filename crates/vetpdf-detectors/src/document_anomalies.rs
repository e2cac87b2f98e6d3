use std::collections::BTreeSet;

use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, Location, ScanContext};
use vetpdf_pdf::{ObjectId, PdfObject};

use crate::{at, preview};

/// `/Type` values defined by ISO 32000 that ordinary documents carry.
const KNOWN_TYPES: &[&[u8]] = &[
    b"Catalog",
    b"Pages",
    b"Page",
    b"Font",
    b"FontDescriptor",
    b"Encoding",
    b"XObject",
    b"Metadata",
    b"ObjStm",
    b"XRef",
    b"Annot",
    b"Action",
    b"Outlines",
    b"Border",
    b"ExtGState",
    b"Pattern",
    b"Shading",
    b"Halftone",
    b"Group",
    b"Mask",
    b"OCG",
    b"OCMD",
    b"Filespec",
    b"EmbeddedFile",
    b"Sig",
    b"SigRef",
    b"DocTimeStamp",
    b"TransformParams",
    b"StructTreeRoot",
    b"StructElem",
    b"MCR",
    b"OBJR",
    b"ParentTree",
    b"RoleMap",
    b"Names",
    b"Dests",
    b"MarkInfo",
    b"ViewerPreferences",
    b"PageLabel",
    b"Threads",
    b"Thread",
    b"Bead",
    b"Trans",
    b"Collection",
    b"CollectionItem",
    b"CollectionSchema",
    b"CollectionField",
    b"CollectionSort",
    b"CMap",
    b"Template",
    b"Encrypt",
    b"CryptFilter",
    b"Info",
    b"OutputIntent",
    b"3D",
    b"Requirement",
    b"Navigator",
    b"RichMediaContent",
    b"RichMediaConfiguration",
    b"RichMediaInstance",
    b"Sound",
    b"Movie",
    b"Rendition",
    b"MediaClip",
    b"MediaPermissions",
    b"Measure",
    b"Viewport",
    b"DSS",
    b"VRI",
];

/// Hidden optional content, `/Type` values outside the standard set, and
/// structures larger than any real document needs.
pub struct DocumentAnomaliesDetector;

impl Detector for DocumentAnomaliesDetector {
    fn id(&self) -> &'static str {
        "document_anomalies"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::RAW_BYTES
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let scan = &ctx.config.scan;
        let mut out = Vec::new();

        if ctx.doc.len() as u64 > scan.large_file_bytes {
            out.push(ctx.indicator(
                IndicatorKind::OversizedStructure,
                Location::Document,
                format!("file of {} bytes exceeds {} bytes", ctx.doc.len(), scan.large_file_bytes),
            ));
        }

        let mut ocg_objects: Vec<ObjectId> = Vec::new();
        let mut unusual: BTreeSet<Vec<u8>> = BTreeSet::new();
        for entry in ctx.objects() {
            let mut optional_content = false;
            let mut largest_array = 0usize;
            entry.object.walk(|key, value| {
                if let Some(key) = key {
                    if key.is(b"OCGs") || (key.is(b"Type") && value.as_name().is_some_and(|n| n.is(b"OCG"))) {
                        optional_content = true;
                    }
                }
                if let PdfObject::Array(items) = value {
                    largest_array = largest_array.max(items.len());
                }
            });
            if optional_content {
                ocg_objects.push(entry.id);
            }
            if largest_array > scan.max_array_len {
                out.push(ctx.indicator(
                    IndicatorKind::OversizedStructure,
                    at(entry),
                    format!("array of {largest_array} entries exceeds {}", scan.max_array_len),
                ));
            }
            let Some(dict) = entry.object.as_dict() else { continue };
            if let Some(kind) = dict.name(b"Type") {
                let known = KNOWN_TYPES.iter().any(|t| kind.is(t));
                if !known && unusual.insert(kind.decoded.clone()) {
                    out.push(ctx.indicator(
                        IndicatorKind::UnusualObjectType,
                        at(entry),
                        format!("/Type /{}", preview(&kind.raw, 40)),
                    ));
                }
                if kind.is(b"Pages") && dict.get(b"Parent").is_none() {
                    if let Some(count) = dict.get(b"Count").and_then(|c| ctx.graph.value(c)).and_then(|c| c.as_int()) {
                        if !(0..=scan.max_page_count).contains(&count) {
                            out.push(ctx.indicator(
                                IndicatorKind::OversizedStructure,
                                at(entry),
                                format!("page tree /Count {count} outside 0..={}", scan.max_page_count),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(first) = ocg_objects.first() {
            out.push(ctx.indicator(
                IndicatorKind::HiddenContent,
                Location::Object(*first),
                format!("{} object(s) define optional content groups", ocg_objects.len()),
            ));
        }
        Ok(out)
    }
}
