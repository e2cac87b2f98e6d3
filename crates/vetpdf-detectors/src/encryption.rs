use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, Location, ScanContext};
use vetpdf_pdf::{PdfDict, PdfObject};

use crate::is_active_dict;

/// Print, modify, copy, annotate, fill forms, extract, assemble and
/// high-quality print (bits 3-6 and 9-12 of `/P`).
const PERMISSION_BITS: u32 = 0b1111_0011_1100;

/// Encryption that protects nothing: every permission granted, an owner
/// password indistinguishable from the user password, or encryption used to
/// hide active content from scanners.
pub struct EncryptionDetector;

impl Detector for EncryptionDetector {
    fn id(&self) -> &'static str {
        "encryption"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let Some((location, encrypt)) = encrypt_dict(ctx) else {
            return Ok(Vec::new());
        };
        let mut reasons = Vec::new();
        if let Some(p) = encrypt.int(b"P") {
            if all_permissions(p) {
                reasons.push(format!("all permissions granted (/P {p})"));
            }
        }
        if encrypt.has_name(b"Filter", b"Standard") && weak_owner_password(encrypt) {
            reasons.push("owner password entry empty or equal to user entry".to_string());
        }
        let active = ctx
            .objects()
            .filter(|e| e.object.dicts().into_iter().any(is_active_dict))
            .count();
        if active > 0 {
            reasons.push(format!("{active} object(s) with active content"));
        }
        if reasons.is_empty() {
            return Ok(Vec::new());
        }
        let handler = encrypt.name(b"Filter").map(|n| n.lossy()).unwrap_or_else(|| "unknown".into());
        Ok(vec![ctx.indicator(
            IndicatorKind::UnjustifiedEncryption,
            location,
            format!("/{handler} encryption: {}", reasons.join("; ")),
        )])
    }
}

fn encrypt_dict<'c>(ctx: &'c ScanContext) -> Option<(Location, &'c PdfDict)> {
    ctx.graph.trailers.iter().find_map(|trailer| {
        let value = trailer.get(b"Encrypt")?;
        let location = match value {
            PdfObject::Reference(id) => Location::Object(*id),
            _ => Location::Document,
        };
        Some((location, ctx.graph.dict(value)?))
    })
}

fn all_permissions(p: i64) -> bool {
    (p as u32) & PERMISSION_BITS == PERMISSION_BITS
}

fn weak_owner_password(encrypt: &PdfDict) -> bool {
    let owner = encrypt.get(b"O").and_then(|o| o.as_string());
    let user = encrypt.get(b"U").and_then(|u| u.as_string());
    match (owner, user) {
        (None, _) => true,
        (Some(o), _) if o.decoded.iter().all(|b| *b == 0) => true,
        (Some(o), Some(u)) => o.decoded == u.decoded,
        (Some(_), None) => false,
    }
}
