use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, info, warn, Level};
use vetpdf_pdf::{parse_pdf, DecodeError, RawDocument};

use crate::config::{CompiledPatterns, EngineConfig};
use crate::detect::{Detector, Needs};
use crate::model::{
    DocumentStats, EngineFailure, Indicator, IndicatorKind, Location, ScanState, Severity, Verdict,
};
use crate::scan::ScanContext;
use crate::score::score;
use crate::security_log::{SecurityDomain, SecurityEvent};

const PARALLEL_DETECTOR_THREADS: usize = 4;

/// Verdict plus the side information the CLI reports.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub verdict: Verdict,
    pub stats: DocumentStats,
    pub state: ScanState,
}

/// Scans documents with a fixed check catalogue and configuration. One
/// engine can serve any number of concurrent scans; they share only the
/// check thread pool.
pub struct Engine {
    config: EngineConfig,
    patterns: CompiledPatterns,
    detectors: Vec<Box<dyn Detector>>,
    /// Shared by every scan; `None` runs checks on the calling thread.
    pool: Option<rayon::ThreadPool>,
}

impl Engine {
    pub fn new(config: EngineConfig, detectors: Vec<Box<dyn Detector>>) -> Result<Self, EngineFailure> {
        config.validate()?;
        let patterns = config.patterns.compile()?;
        let pool = if config.scan.parallel { check_pool() } else { None };
        Ok(Self { config, patterns, detectors, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detector_ids(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.id()).collect()
    }

    pub fn scan(&self, bytes: &[u8]) -> Result<Verdict, EngineFailure> {
        self.scan_document(RawDocument::new(bytes)).map(|outcome| outcome.verdict)
    }

    /// Run one scan. Panics anywhere inside are contained and reported as
    /// [`EngineFailure::Internal`].
    pub fn scan_document(&self, doc: RawDocument<'_>) -> Result<ScanOutcome, EngineFailure> {
        match catch_unwind(AssertUnwindSafe(|| self.run(doc))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                SecurityEvent::new(Level::ERROR, SecurityDomain::Detection, "engine_panic", "Scan panicked")
                    .severity(Severity::High)
                    .emit();
                error!(panic = %message, "Scan panicked; reporting engine failure");
                Err(EngineFailure::Internal(message))
            }
        }
    }

    fn run(&self, doc: RawDocument<'_>) -> Result<ScanOutcome, EngineFailure> {
        let scan_span = tracing::info_span!("scan", bytes_len = doc.len());
        let _scan_guard = scan_span.enter();
        let mut progress = Progress::default();
        let budget = self.config.scan.budget();

        progress.advance(ScanState::Reading);
        if doc.len() > self.config.scan.max_input_bytes {
            SecurityEvent::new(Level::WARN, SecurityDomain::Budget, "input_too_large", "Input exceeds size limit")
                .severity(Severity::Medium)
                .emit();
            debug!(bytes_len = doc.len(), max_input_bytes = self.config.scan.max_input_bytes, "Input not parsed");
            let detail = format!(
                "input of {} bytes exceeds the {} byte limit",
                doc.len(),
                self.config.scan.max_input_bytes
            );
            return Ok(self.abort(progress, Vec::new(), detail, DocumentStats::default()));
        }

        progress.advance(ScanState::Parsing);
        let graph = parse_pdf(&doc, &self.config.scan.parse_options(), &budget).map_err(parse_failure)?;
        let mut ctx = ScanContext::new(doc, graph, &self.config, &self.patterns, &budget);
        let mut cut_short = ctx.graph.aborted.or_else(|| budget.exhausted());
        if cut_short.is_none() && self.detectors.iter().any(|d| d.needs().contains(Needs::STREAM_DECODE)) {
            ctx.decode_streams()?;
            cut_short = budget.exhausted();
        }

        progress.advance(ScanState::Extracting);
        if let Some(reason) = cut_short {
            SecurityEvent::new(Level::WARN, SecurityDomain::Budget, "partial_graph", "Scan budget exhausted")
                .severity(Severity::Medium)
                .emit();
            info!(
                reason = %reason,
                objects = ctx.graph.table.len(),
                "Budget exhausted; running graph checks on partial graph"
            );
        }
        let indicators = self.extract(&ctx, cut_short.is_some());
        let stats = ctx.stats();
        if let Some(reason) = cut_short.or_else(|| budget.exhausted()) {
            return Ok(self.abort(progress, indicators, reason.to_string(), stats));
        }

        progress.advance(ScanState::Scoring);
        let verdict = score(indicators, false, &self.config.scoring);
        progress.advance(ScanState::Done);
        info!(
            score = verdict.score,
            band = %verdict.band,
            indicators = verdict.indicators.len(),
            elapsed_ms = budget.elapsed().as_millis() as u64,
            "Scan complete"
        );
        Ok(ScanOutcome { verdict, stats, state: progress.state })
    }

    /// Run every check, in catalogue order, skipping those that start after
    /// the budget is gone. On a `partial` graph only the checks that can work
    /// without decoding run, and they run even though the budget is spent.
    fn extract(&self, ctx: &ScanContext<'_>, partial: bool) -> Vec<Indicator> {
        let selected: Vec<&dyn Detector> = self
            .detectors
            .iter()
            .map(|d| &**d)
            .filter(|d| !partial || d.needs().runs_on_partial_graph())
            .collect();
        let run_one = |d: &dyn Detector| -> Option<Vec<Indicator>> {
            if !partial && ctx.budget.check().is_err() {
                debug!(detector = d.id(), "Skipping check; budget exhausted");
                return None;
            }
            match d.run(ctx) {
                Ok(found) => {
                    debug!(detector = d.id(), indicators = found.len(), "Check finished");
                    Some(found)
                }
                Err(e) => {
                    error!(detector = d.id(), error = %e, "Check failed");
                    None
                }
            }
        };
        let results: Vec<Option<Vec<Indicator>>> = match &self.pool {
            Some(pool) => {
                use rayon::prelude::*;
                pool.install(|| selected.par_iter().map(|d| run_one(*d)).collect())
            }
            None => selected.iter().map(|d| run_one(*d)).collect(),
        };
        results.into_iter().flatten().flatten().collect()
    }

    fn abort(
        &self,
        mut progress: Progress,
        mut indicators: Vec<Indicator>,
        detail: String,
        stats: DocumentStats,
    ) -> ScanOutcome {
        progress.advance(ScanState::Aborted);
        indicators.push(Indicator {
            kind: IndicatorKind::BudgetExceeded,
            location: Location::Document,
            severity: self.config.scoring.weight(IndicatorKind::BudgetExceeded),
            detail,
        });
        let verdict = score(indicators, true, &self.config.scoring);
        info!(score = verdict.score, band = %verdict.band, "Scan aborted; returning partial verdict");
        ScanOutcome { verdict, stats, state: progress.state }
    }
}

#[derive(Debug)]
struct Progress {
    state: ScanState,
}

impl Default for Progress {
    fn default() -> Self {
        Self { state: ScanState::Idle }
    }
}

impl Progress {
    fn advance(&mut self, next: ScanState) {
        debug!(from = ?self.state, to = ?next, "Scan state");
        self.state = next;
    }
}

fn check_pool() -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(PARALLEL_DETECTOR_THREADS)
        .thread_name(|i| format!("vetpdf-check-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            SecurityEvent::new(
                Level::WARN,
                SecurityDomain::Detection,
                "detector_pool_fallback",
                "Check pool unavailable; running sequentially",
            )
            .emit();
            warn!(error = %err, "Failed to build check pool");
            None
        }
    }
}

fn parse_failure(err: anyhow::Error) -> EngineFailure {
    match err.downcast_ref::<DecodeError>() {
        Some(DecodeError::AllocationRefused { length }) => EngineFailure::AllocationRefused { length: *length },
        _ => EngineFailure::Internal(format!("{err:#}")),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
