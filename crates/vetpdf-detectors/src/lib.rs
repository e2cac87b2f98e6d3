use vetpdf_core::detect::Detector;
use vetpdf_core::{Engine, EngineConfig, EngineFailure, Location};
use vetpdf_pdf::{ObjectEntry, PdfDict, PdfObject};

pub mod auto_action;
pub mod content_patterns;
pub mod document_anomalies;
pub mod embedded_file;
pub mod embedded_script;
pub mod encryption;
pub mod filter_chain;
pub mod header_anomaly;
pub mod name_obfuscation;
pub mod object_stream_hiding;
pub mod reference_integrity;
pub mod structure_notes;

/// Bumped whenever a check is added, removed or changes what it emits.
pub const CATALOGUE_VERSION: u32 = 1;

/// The catalogue, in merge order.
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(structure_notes::StructureNotesDetector),
        Box::new(header_anomaly::HeaderAnomalyDetector),
        Box::new(auto_action::AutoActionDetector),
        Box::new(embedded_script::EmbeddedScriptDetector),
        Box::new(embedded_file::EmbeddedFileDetector),
        Box::new(filter_chain::FilterChainDetector),
        Box::new(object_stream_hiding::ObjectStreamHidingDetector),
        Box::new(encryption::EncryptionDetector),
        Box::new(name_obfuscation::NameObfuscationDetector),
        Box::new(reference_integrity::ReferenceIntegrityDetector),
        Box::new(content_patterns::ContentPatternsDetector),
        Box::new(document_anomalies::DocumentAnomaliesDetector),
    ]
}

pub fn default_engine(config: EngineConfig) -> Result<Engine, EngineFailure> {
    Engine::new(config, default_detectors())
}

pub(crate) fn at(entry: &ObjectEntry) -> Location {
    Location::Object(entry.id)
}

/// Keys whose presence marks a dictionary as able to run or carry a
/// payload.
pub(crate) fn is_active_dict(dict: &PdfDict) -> bool {
    const ACTIVE_KEYS: [&[u8]; 7] = [b"JS", b"JavaScript", b"OpenAction", b"AA", b"EF", b"XFA", b"RichMediaContent"];
    const ACTIVE_ACTIONS: [&[u8]; 7] =
        [b"JavaScript", b"Launch", b"SubmitForm", b"ImportData", b"GoToR", b"GoToE", b"URI"];
    ACTIVE_KEYS.iter().any(|k| dict.has(k)) || ACTIVE_ACTIONS.iter().any(|a| dict.has_name(b"S", a))
}

/// First keys of `dict` that make it active, for details.
pub(crate) fn active_keys(dict: &PdfDict) -> Vec<String> {
    let mut out = Vec::new();
    for (key, value) in &dict.entries {
        let active = match key.decoded.as_slice() {
            b"JS" | b"JavaScript" | b"OpenAction" | b"AA" | b"EF" | b"XFA" | b"RichMediaContent" => true,
            b"S" => matches!(value, PdfObject::Name(n) if n.decoded != b"GoTo" && n.decoded != b"Named"),
            _ => false,
        };
        if active {
            out.push(format!("/{}", key.lossy()));
        }
    }
    out
}

/// Printable one-line preview of untrusted bytes.
pub(crate) fn preview(bytes: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(bytes.len()) + 3);
    for &b in bytes.iter().take(max) {
        match b {
            b'\r' | b'\n' | b'\t' => out.push(' '),
            0x20..=0x7e => out.push(b as char),
            _ => out.push('.'),
        }
    }
    if bytes.len() > max {
        out.push_str("...");
    }
    out
}
