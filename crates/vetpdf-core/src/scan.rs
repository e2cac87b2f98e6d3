use std::collections::BTreeMap;

use tracing::{debug, Level};
use vetpdf_pdf::decode::stream_filters;
use vetpdf_pdf::{
    decode_stream_budgeted, DecodeError, DecodeOutcome, ObjectEntry, ObjectGraph, ObjectId, PdfStream,
    Provenance, RawDocument, ScanBudget,
};

use crate::config::{CompiledPatterns, EngineConfig};
use crate::model::{DocumentStats, EngineFailure, Indicator, IndicatorKind, Location, Severity};
use crate::security_log::{SecurityDomain, SecurityEvent};

/// Read-only view handed to every check.
pub struct ScanContext<'a> {
    pub doc: RawDocument<'a>,
    pub graph: ObjectGraph<'a>,
    /// Decode outcomes for every filtered stream, keyed by object.
    pub decoded: BTreeMap<ObjectId, DecodeOutcome>,
    pub config: &'a EngineConfig,
    pub patterns: &'a CompiledPatterns,
    pub budget: &'a ScanBudget,
}

impl<'a> ScanContext<'a> {
    pub fn new(
        doc: RawDocument<'a>,
        mut graph: ObjectGraph<'a>,
        config: &'a EngineConfig,
        patterns: &'a CompiledPatterns,
        budget: &'a ScanBudget,
    ) -> Self {
        let decoded = std::mem::take(&mut graph.decoded);
        Self { doc, graph, decoded, config, patterns, budget }
    }

    /// Decode every filtered top-level stream not decoded while building the
    /// graph. Stops early once the budget is exhausted.
    pub fn decode_streams(&mut self) -> Result<(), EngineFailure> {
        let limits = self.config.scan.parse_options().decode_limits();
        if self.graph.encrypted {
            SecurityEvent::new(
                Level::INFO,
                SecurityDomain::Encryption,
                "encrypted_streams",
                "Stream bodies are encrypted; left opaque",
            )
            .emit();
        }
        let mut decoded = 0usize;
        for entry in self.graph.table.iter() {
            let Some(stream) = entry.object.as_stream() else { continue };
            if self.decoded.contains_key(&entry.id) || stream_filters(&stream.dict).is_empty() {
                continue;
            }
            if self.graph.is_ciphertext(stream) {
                self.decoded.insert(entry.id, DecodeOutcome::Skipped("encrypted"));
                continue;
            }
            if self.budget.check().is_err() {
                break;
            }
            let outcome = decode_stream_budgeted(&self.graph.reader, stream, &limits, self.budget);
            if let DecodeOutcome::Failed { error: DecodeError::AllocationRefused { length }, .. } = outcome {
                let object = entry.id.to_string();
                SecurityEvent::new(
                    Level::ERROR,
                    SecurityDomain::Budget,
                    "allocation_refused",
                    "Decode allocation refused",
                )
                .severity(Severity::High)
                .object(&object)
                .emit();
                return Err(EngineFailure::AllocationRefused { length });
            }
            self.decoded.insert(entry.id, outcome);
            decoded += 1;
        }
        debug!(streams = decoded, memory_used = self.budget.memory_used(), "Decoded streams");
        Ok(())
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectEntry> {
        self.graph.table.iter()
    }

    pub fn streams(&self) -> impl Iterator<Item = (&ObjectEntry, &PdfStream)> {
        self.graph.table.iter().filter_map(|e| Some((e, e.object.as_stream()?)))
    }

    /// Content of a stream after filters: decoded output for filtered
    /// streams, raw bytes for unfiltered ones, `None` when opaque.
    pub fn stream_data(&self, id: ObjectId) -> Option<&[u8]> {
        if let Some(outcome) = self.decoded.get(&id) {
            return outcome.data();
        }
        let stream = self.graph.get(id)?.object.as_stream()?;
        if !stream_filters(&stream.dict).is_empty() || self.graph.is_ciphertext(stream) {
            return None;
        }
        self.graph.stream_raw(stream)
    }

    pub fn hidden_in_object_stream(&self, id: ObjectId) -> bool {
        self.graph
            .get(id)
            .is_some_and(|e| matches!(e.provenance, Provenance::ObjectStream { .. }))
    }

    /// An indicator weighted by the configured severity for its kind.
    pub fn indicator(&self, kind: IndicatorKind, location: Location, detail: impl Into<String>) -> Indicator {
        Indicator { kind, location, severity: self.config.scoring.weight(kind), detail: detail.into() }
    }

    pub fn stats(&self) -> DocumentStats {
        let mut stats = DocumentStats {
            total_objects: self.graph.table.len(),
            object_stream_containers: self.graph.object_streams.len(),
            decoded_bytes: self.budget.memory_used(),
            xref_recovered: self.graph.recovered,
            ..DocumentStats::default()
        };
        for entry in self.graph.table.iter() {
            if entry.object.as_stream().is_some() {
                stats.stream_objects += 1;
            }
            if matches!(entry.provenance, Provenance::ObjectStream { .. }) {
                stats.objects_in_object_streams += 1;
            }
            if entry.object.as_dict().is_some_and(|d| {
                d.has(b"JS") || d.has(b"JavaScript") || d.has_name(b"S", b"JavaScript")
            }) {
                stats.script_objects += 1;
            }
        }
        stats
    }
}
