use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::PdfDict;

use crate::{at, preview};

const EXECUTABLE_MAGIC: [(&[u8], &str); 8] = [
    (b"MZ", "PE executable"),
    (b"\x7fELF", "ELF executable"),
    (b"\xFE\xED\xFA\xCE", "Mach-O executable"),
    (b"\xFE\xED\xFA\xCF", "Mach-O executable"),
    (b"\xCE\xFA\xED\xFE", "Mach-O executable"),
    (b"\xCF\xFA\xED\xFE", "Mach-O executable"),
    (b"\xCA\xFE\xBA\xBE", "Mach-O universal binary or Java class"),
    (b"#!", "script with interpreter line"),
];

const EXECUTABLE_EXTENSIONS: [&str; 14] = [
    "exe", "dll", "scr", "com", "bat", "cmd", "ps1", "vbs", "vbe", "js", "jse", "hta", "jar", "msi",
];

pub struct EmbeddedFileDetector;

impl Detector for EmbeddedFileDetector {
    fn id(&self) -> &'static str {
        "embedded_file"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::STREAM_DECODE
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        for (entry, stream) in ctx.streams() {
            if !stream.dict.has_name(b"Type", b"EmbeddedFile") {
                continue;
            }
            let subtype = stream.dict.name(b"Subtype").map(|n| format!(" /Subtype /{}", n.lossy())).unwrap_or_default();
            match ctx.stream_data(entry.id) {
                Some(data) => {
                    out.push(ctx.indicator(
                        IndicatorKind::EmbeddedFile,
                        at(entry),
                        format!("embedded file of {} bytes{subtype}", data.len()),
                    ));
                    if let Some(label) = executable_magic(data) {
                        out.push(ctx.indicator(
                            IndicatorKind::EmbeddedExecutable,
                            at(entry),
                            format!("{label} signature in embedded file: {}", preview(data, 16)),
                        ));
                    }
                }
                None => out.push(ctx.indicator(
                    IndicatorKind::EmbeddedFile,
                    at(entry),
                    format!("embedded file{subtype}, contents not decodable"),
                )),
            }
        }
        for entry in ctx.objects() {
            for dict in entry.object.dicts() {
                if !dict.has(b"EF") {
                    continue;
                }
                if let Some(name) = file_name(dict) {
                    if has_executable_extension(&name) {
                        out.push(ctx.indicator(
                            IndicatorKind::EmbeddedExecutable,
                            at(entry),
                            format!("embedded file named {}", preview(name.as_bytes(), 80)),
                        ));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn executable_magic(data: &[u8]) -> Option<&'static str> {
    EXECUTABLE_MAGIC.iter().find(|(magic, _)| data.starts_with(magic)).map(|(_, label)| *label)
}

fn file_name(spec: &PdfDict) -> Option<String> {
    spec.get(b"UF")
        .or_else(|| spec.get(b"F"))
        .and_then(|f| f.as_string())
        .map(|s| s.lossy())
}

fn has_executable_extension(name: &str) -> bool {
    let trimmed = name.trim_end_matches(|c: char| c.is_whitespace() || c == '\0' || c == '.');
    trimmed
        .rsplit_once('.')
        .is_some_and(|(_, ext)| EXECUTABLE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_matched_at_start_only() {
        assert_eq!(executable_magic(b"MZ\x90\x00"), Some("PE executable"));
        assert_eq!(executable_magic(b"\x7fELF\x02"), Some("ELF executable"));
        assert_eq!(executable_magic(b"hello MZ"), None);
    }

    #[test]
    fn extensions_ignore_case_and_trailing_dots() {
        assert!(has_executable_extension("invoice.pdf.EXE"));
        assert!(has_executable_extension("run.bat. "));
        assert!(!has_executable_extension("report.docx"));
        assert!(!has_executable_extension("noextension"));
    }
}
