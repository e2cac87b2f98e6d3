use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::model::{Band, DocumentStats, EngineFailure, Verdict};
use crate::runner::ScanOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct InputSummary {
    pub path: Option<String>,
    pub sha256: Option<String>,
    pub length: u64,
}

/// CLI-facing wrapper around a verdict. Exactly one of `verdict` and
/// `failure` is set.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub input: InputSummary,
    pub catalogue_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DocumentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<EngineFailure>,
}

impl Report {
    pub fn new(input: InputSummary, catalogue_version: u32, result: Result<ScanOutcome, EngineFailure>) -> Self {
        match result {
            Ok(outcome) => Self {
                input,
                catalogue_version,
                verdict: Some(outcome.verdict),
                stats: Some(outcome.stats),
                failure: None,
            },
            Err(failure) => Self { input, catalogue_version, verdict: None, stats: None, failure: Some(failure) },
        }
    }

    /// 0 Clean, 1 Suspicious, 2 Malicious, 3 engine failure.
    pub fn exit_code(&self) -> i32 {
        match &self.verdict {
            Some(v) => match v.band {
                Band::Clean => 0,
                Band::Suspicious => 1,
                Band::Malicious => 2,
            },
            None => 3,
        }
    }
}

pub fn write_json(report: &Report, writer: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// One line per file: path, verdict or failure.
pub fn write_jsonl(report: &Report, writer: &mut dyn Write) -> Result<()> {
    let record = serde_json::json!({
        "path": report.input.path.as_deref().unwrap_or("-"),
        "verdict": report.verdict,
        "failure": report.failure,
    });
    writer.write_all(serde_json::to_string(&record)?.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

pub fn write_human(report: &Report, writer: &mut dyn Write) -> Result<()> {
    let path = report.input.path.as_deref().unwrap_or("-");
    writeln!(writer, "{}", escape_control(path))?;
    if let Some(sha) = &report.input.sha256 {
        writeln!(writer, "  sha256:  {sha}")?;
    }
    writeln!(writer, "  size:    {} bytes", report.input.length)?;
    if let Some(failure) = &report.failure {
        writeln!(writer, "  result:  ENGINE FAILURE (treat as unsafe): {}", escape_control(&failure.to_string()))?;
        return Ok(());
    }
    let Some(verdict) = &report.verdict else {
        return Ok(());
    };
    let truncated = if verdict.truncated { " (scan truncated)" } else { "" };
    writeln!(writer, "  verdict: {} score {}/100{truncated}", verdict.band, verdict.score)?;
    if let Some(stats) = &report.stats {
        writeln!(
            writer,
            "  objects: {} ({} streams, {} in {} object streams){}",
            stats.total_objects,
            stats.stream_objects,
            stats.objects_in_object_streams,
            stats.object_stream_containers,
            if stats.xref_recovered { ", xref recovered" } else { "" }
        )?;
    }
    if verdict.indicators.is_empty() {
        writeln!(writer, "  indicators: none")?;
        return Ok(());
    }
    writeln!(writer, "  indicators:")?;
    for indicator in &verdict.indicators {
        writeln!(
            writer,
            "    [{:>3}] {} @ {}: {}",
            indicator.severity,
            indicator.kind,
            indicator.location,
            escape_control(&indicator.detail)
        )?;
    }
    Ok(())
}

/// Control characters from document content are shown as `\xNN`.
pub fn escape_control(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_control() {
            out.push_str(&format!("\\x{:02X}", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}
