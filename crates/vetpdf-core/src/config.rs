use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};
use vetpdf_pdf::{ParseOptions, ScanBudget, MAX_NESTING_DEPTH};

use crate::model::{Band, EngineFailure, IndicatorKind, Severity};
use crate::security_log::{SecurityDomain, SecurityEvent};

const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
const MAX_INPUT_BYTES: usize = 2 * 1024 * 1024 * 1024;
const MAX_OBJECTS: usize = 10_000_000;
const MAX_DEPTH: usize = MAX_NESTING_DEPTH;
const MAX_DECODE_BYTES: usize = 512 * 1024 * 1024;
const MAX_TOTAL_DECODE_BYTES: usize = 2 * 1024 * 1024 * 1024;
const MAX_FILTER_CHAIN: usize = 32;
const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;
const MAX_PATTERN_BYTES: usize = 1024 * 1024;

pub const DEFAULT_PER_KIND_CAP: usize = 8;
pub const DEFAULT_SUSPICIOUS_THRESHOLD: u32 = 20;
pub const DEFAULT_MALICIOUS_THRESHOLD: u32 = 50;

/// Resource limits for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_input_bytes: usize,
    pub max_token_bytes: usize,
    pub max_depth: usize,
    pub max_container_entries: usize,
    pub max_objects: usize,
    pub max_reference_chain: usize,
    pub max_xref_sections: usize,
    pub max_object_streams: usize,
    pub max_decode_bytes: usize,
    pub max_total_decoded_bytes: usize,
    pub max_filter_chain: usize,
    pub timeout_ms: u64,
    /// Files above this size are reported as oversized.
    pub large_file_bytes: u64,
    /// Filter chains at least this long are reported.
    pub deep_filter_chain: usize,
    pub max_page_count: i64,
    pub max_array_len: usize,
    pub parallel: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let parse = ParseOptions::default();
        Self {
            max_input_bytes: 256 * 1024 * 1024,
            max_token_bytes: parse.max_token_bytes,
            max_depth: parse.max_depth,
            max_container_entries: parse.max_container_entries,
            max_objects: parse.max_objects,
            max_reference_chain: parse.max_reference_chain,
            max_xref_sections: parse.max_xref_sections,
            max_object_streams: parse.max_object_streams,
            max_decode_bytes: parse.max_decode_bytes,
            max_total_decoded_bytes: 256 * 1024 * 1024,
            max_filter_chain: parse.max_filter_chain,
            timeout_ms: 30_000,
            large_file_bytes: 10 * 1024 * 1024,
            deep_filter_chain: 3,
            max_page_count: 100_000,
            max_array_len: 10_000,
            parallel: true,
        }
    }
}

impl ScanConfig {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_read_bytes: self.max_input_bytes,
            max_token_bytes: self.max_token_bytes,
            max_depth: self.max_depth,
            max_container_entries: self.max_container_entries,
            max_objects: self.max_objects,
            max_reference_chain: self.max_reference_chain,
            max_xref_sections: self.max_xref_sections,
            max_object_streams: self.max_object_streams,
            max_decode_bytes: self.max_decode_bytes,
            max_filter_chain: self.max_filter_chain,
        }
    }

    pub fn budget(&self) -> ScanBudget {
        ScanBudget::new(Some(Duration::from_millis(self.timeout_ms)), self.max_total_decoded_bytes)
    }

    /// Every limit must be positive and no larger than the ceiling a config
    /// file may set, whichever way the config was built.
    fn validate(&self) -> Result<(), EngineFailure> {
        let limits = [
            ("max_input_bytes", self.max_input_bytes, MAX_INPUT_BYTES),
            ("max_token_bytes", self.max_token_bytes, MAX_INPUT_BYTES),
            ("max_depth", self.max_depth, MAX_DEPTH),
            ("max_container_entries", self.max_container_entries, MAX_OBJECTS),
            ("max_objects", self.max_objects, MAX_OBJECTS),
            ("max_reference_chain", self.max_reference_chain, MAX_DEPTH),
            ("max_xref_sections", self.max_xref_sections, MAX_DEPTH),
            ("max_object_streams", self.max_object_streams, MAX_OBJECTS),
            ("max_decode_bytes", self.max_decode_bytes, MAX_DECODE_BYTES),
            ("max_total_decoded_bytes", self.max_total_decoded_bytes, MAX_TOTAL_DECODE_BYTES),
            ("max_filter_chain", self.max_filter_chain, MAX_FILTER_CHAIN),
            ("deep_filter_chain", self.deep_filter_chain, MAX_FILTER_CHAIN),
            ("max_array_len", self.max_array_len, MAX_OBJECTS),
        ];
        if let Some((name, _, max)) = limits.into_iter().find(|(_, v, max)| *v == 0 || v > max) {
            return Err(out_of_range(name, max));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(out_of_range("timeout_ms", MAX_TIMEOUT_MS));
        }
        if self.large_file_bytes == 0 || self.large_file_bytes > MAX_INPUT_BYTES as u64 {
            return Err(out_of_range("large_file_bytes", MAX_INPUT_BYTES));
        }
        if self.max_page_count <= 0 || self.max_page_count > i64::from(u32::MAX) {
            return Err(out_of_range("max_page_count", u32::MAX));
        }
        Ok(())
    }
}

fn out_of_range(name: &str, max: impl fmt::Display) -> EngineFailure {
    SecurityEvent::new(Level::WARN, SecurityDomain::Config, "invalid_limit", "Limit outside allowed range")
        .severity(Severity::Medium)
        .emit();
    EngineFailure::InvalidConfig(format!("{name} must be between 1 and {max}"))
}

pub fn default_weight(kind: IndicatorKind) -> u32 {
    match kind {
        IndicatorKind::AutoActionTrigger => 20,
        IndicatorKind::EmbeddedScript => 30,
        IndicatorKind::LaunchAction => 35,
        IndicatorKind::ObfuscatedScript => 15,
        IndicatorKind::EmbeddedFile => 10,
        IndicatorKind::EmbeddedExecutable => 40,
        IndicatorKind::DeepFilterChain => 10,
        IndicatorKind::ObjectStreamHiding => 25,
        IndicatorKind::UnjustifiedEncryption => 15,
        IndicatorKind::ObfuscatedName => 20,
        IndicatorKind::ObfuscatedString => 10,
        IndicatorKind::StructuralLimitExceeded => 15,
        IndicatorKind::StreamLengthMismatch => 5,
        IndicatorKind::UndecodableStream => 5,
        IndicatorKind::MalformedInput => 5,
        IndicatorKind::OutOfBounds => 5,
        IndicatorKind::BudgetExceeded => 20,
        IndicatorKind::ReferenceCycle => 10,
        IndicatorKind::DanglingReference => 2,
        IndicatorKind::SuspiciousContent => 15,
        IndicatorKind::SuspiciousMetadata => 5,
        IndicatorKind::HiddenContent => 2,
        IndicatorKind::UnusualObjectType => 1,
        IndicatorKind::OversizedStructure => 10,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringConfig {
    pub weights: BTreeMap<IndicatorKind, u32>,
    pub suspicious_threshold: u32,
    pub malicious_threshold: u32,
    pub per_kind_cap: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: IndicatorKind::ALL.into_iter().map(|k| (k, default_weight(k))).collect(),
            suspicious_threshold: DEFAULT_SUSPICIOUS_THRESHOLD,
            malicious_threshold: DEFAULT_MALICIOUS_THRESHOLD,
            per_kind_cap: DEFAULT_PER_KIND_CAP,
        }
    }
}

impl ScoringConfig {
    pub fn weight(&self, kind: IndicatorKind) -> u32 {
        self.weights.get(&kind).copied().unwrap_or_else(|| default_weight(kind))
    }

    pub fn band(&self, score: u32) -> Band {
        if score < self.suspicious_threshold {
            Band::Clean
        } else if score < self.malicious_threshold {
            Band::Suspicious
        } else {
            Band::Malicious
        }
    }

    fn validate(&self) -> Result<(), EngineFailure> {
        if self.suspicious_threshold > self.malicious_threshold {
            return Err(EngineFailure::InvalidConfig(format!(
                "suspicious_threshold {} is above malicious_threshold {}",
                self.suspicious_threshold, self.malicious_threshold
            )));
        }
        Ok(())
    }
}

/// Regular expressions matched against decoded content and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub content: Vec<String>,
    pub metadata: Vec<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            content: vec![
                r"(?i)\beval\s*\(".into(),
                r"(?i)\bexec(ute)?\s*\(".into(),
                r"(?i)\bspawn\s*\(".into(),
                r"(?i)(wscript\.shell|cmd\.exe|powershell|/bin/sh)".into(),
                r"(?i)\bunescape\s*\(".into(),
                r"String\.fromCharCode".into(),
            ],
            metadata: vec![r"(?i)(javascript:|<script|eval\s*\(|metasploit|msfvenom)".into()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledPatterns {
    pub content: Vec<Regex>,
    pub metadata: Vec<Regex>,
}

impl PatternConfig {
    pub fn compile(&self) -> Result<CompiledPatterns, EngineFailure> {
        let build = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .size_limit(MAX_PATTERN_BYTES)
                        .build()
                        .map_err(|e| EngineFailure::InvalidConfig(format!("pattern {p:?}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(CompiledPatterns { content: build(&self.content)?, metadata: build(&self.metadata)? })
    }
}

/// Everything the engine needs besides the document bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub scan: ScanConfig,
    pub scoring: ScoringConfig,
    pub patterns: PatternConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineFailure> {
        self.scan.validate()?;
        self.scoring.validate()
    }

    /// The effective configuration in file form.
    pub fn to_file_config(&self) -> Config {
        let s = &self.scan;
        Config {
            scan: Some(ScanSection {
                max_input_bytes: Some(s.max_input_bytes),
                max_token_bytes: Some(s.max_token_bytes),
                max_depth: Some(s.max_depth),
                max_container_entries: Some(s.max_container_entries),
                max_objects: Some(s.max_objects),
                max_reference_chain: Some(s.max_reference_chain),
                max_xref_sections: Some(s.max_xref_sections),
                max_object_streams: Some(s.max_object_streams),
                max_decode_bytes: Some(s.max_decode_bytes),
                max_total_decoded_bytes: Some(s.max_total_decoded_bytes),
                max_filter_chain: Some(s.max_filter_chain),
                timeout_ms: Some(s.timeout_ms),
                large_file_bytes: Some(s.large_file_bytes),
                deep_filter_chain: Some(s.deep_filter_chain),
                max_page_count: Some(s.max_page_count),
                max_array_len: Some(s.max_array_len),
                parallel: Some(s.parallel),
            }),
            scoring: Some(ScoringSection {
                suspicious_threshold: Some(self.scoring.suspicious_threshold),
                malicious_threshold: Some(self.scoring.malicious_threshold),
                per_kind_cap: Some(self.scoring.per_kind_cap),
                weights: Some(
                    IndicatorKind::ALL
                        .into_iter()
                        .map(|k| (k.as_str().to_string(), self.scoring.weight(k)))
                        .collect(),
                ),
            }),
            patterns: Some(self.patterns.clone()),
            logging: None,
            profiles: None,
        }
    }
}

/// On-disk configuration (TOML or YAML). Every field is optional and
/// overrides the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<PatternConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<BTreeMap<String, Profile>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<PatternConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    pub max_input_bytes: Option<usize>,
    pub max_token_bytes: Option<usize>,
    pub max_depth: Option<usize>,
    pub max_container_entries: Option<usize>,
    pub max_objects: Option<usize>,
    pub max_reference_chain: Option<usize>,
    pub max_xref_sections: Option<usize>,
    pub max_object_streams: Option<usize>,
    pub max_decode_bytes: Option<usize>,
    pub max_total_decoded_bytes: Option<usize>,
    pub max_filter_chain: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub large_file_bytes: Option<u64>,
    pub deep_filter_chain: Option<usize>,
    pub max_page_count: Option<i64>,
    pub max_array_len: Option<usize>,
    pub parallel: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringSection {
    pub suspicious_threshold: Option<u32>,
    pub malicious_threshold: Option<u32>,
    pub per_kind_cap: Option<usize>,
    pub weights: Option<BTreeMap<String, u32>>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > MAX_CONFIG_BYTES {
                return Err(anyhow::anyhow!("config {} exceeds {} bytes", path.display(), MAX_CONFIG_BYTES));
            }
        }
        let data = fs::read_to_string(path)?;
        Self::parse(&data, path.extension().and_then(|s| s.to_str()))
    }

    /// Parse config text; `extension` picks the format, otherwise TOML then
    /// YAML is tried.
    pub fn parse(data: &str, extension: Option<&str>) -> anyhow::Result<Self> {
        let cfg = match extension {
            Some("toml") => toml::from_str::<Config>(data)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str::<Config>(data)?,
            _ => toml::from_str::<Config>(data).or_else(|_| serde_yaml::from_str::<Config>(data))?,
        };
        Ok(cfg)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref()?.level.as_deref()
    }

    /// Apply the base sections, then the named profile on top.
    pub fn apply(&self, cfg: &mut EngineConfig, profile: Option<&str>) -> anyhow::Result<()> {
        apply_sections(self.scan.as_ref(), self.scoring.as_ref(), self.patterns.as_ref(), cfg)?;
        if let Some(name) = profile {
            let Some(p) = self.profiles.as_ref().and_then(|profiles| profiles.get(name)) else {
                return Err(anyhow::anyhow!("unknown profile {name:?}"));
            };
            info!(profile = name, "Applying config profile");
            apply_sections(p.scan.as_ref(), p.scoring.as_ref(), p.patterns.as_ref(), cfg)?;
        }
        Ok(())
    }
}

fn apply_sections(
    scan: Option<&ScanSection>,
    scoring: Option<&ScoringSection>,
    patterns: Option<&PatternConfig>,
    cfg: &mut EngineConfig,
) -> anyhow::Result<()> {
    if let Some(scan) = scan {
        apply_scan(scan, &mut cfg.scan);
    }
    if let Some(scoring) = scoring {
        apply_scoring(scoring, &mut cfg.scoring)?;
    }
    if let Some(patterns) = patterns {
        cfg.patterns = patterns.clone();
    }
    Ok(())
}

fn apply_scan(scan: &ScanSection, opts: &mut ScanConfig) {
    override_limit("max_input_bytes", scan.max_input_bytes, MAX_INPUT_BYTES, &mut opts.max_input_bytes);
    override_limit("max_token_bytes", scan.max_token_bytes, MAX_INPUT_BYTES, &mut opts.max_token_bytes);
    override_limit("max_depth", scan.max_depth, MAX_DEPTH, &mut opts.max_depth);
    override_limit(
        "max_container_entries",
        scan.max_container_entries,
        MAX_OBJECTS,
        &mut opts.max_container_entries,
    );
    override_limit("max_objects", scan.max_objects, MAX_OBJECTS, &mut opts.max_objects);
    override_limit("max_reference_chain", scan.max_reference_chain, MAX_DEPTH, &mut opts.max_reference_chain);
    override_limit("max_xref_sections", scan.max_xref_sections, MAX_DEPTH, &mut opts.max_xref_sections);
    override_limit("max_object_streams", scan.max_object_streams, MAX_OBJECTS, &mut opts.max_object_streams);
    override_limit("max_decode_bytes", scan.max_decode_bytes, MAX_DECODE_BYTES, &mut opts.max_decode_bytes);
    override_limit(
        "max_total_decoded_bytes",
        scan.max_total_decoded_bytes,
        MAX_TOTAL_DECODE_BYTES,
        &mut opts.max_total_decoded_bytes,
    );
    override_limit("max_filter_chain", scan.max_filter_chain, MAX_FILTER_CHAIN, &mut opts.max_filter_chain);
    override_limit("timeout_ms", scan.timeout_ms, MAX_TIMEOUT_MS, &mut opts.timeout_ms);
    override_limit("large_file_bytes", scan.large_file_bytes, MAX_INPUT_BYTES as u64, &mut opts.large_file_bytes);
    override_limit("deep_filter_chain", scan.deep_filter_chain, MAX_FILTER_CHAIN, &mut opts.deep_filter_chain);
    override_limit("max_page_count", scan.max_page_count, i64::from(u32::MAX), &mut opts.max_page_count);
    override_limit("max_array_len", scan.max_array_len, MAX_OBJECTS, &mut opts.max_array_len);
    if let Some(v) = scan.parallel {
        opts.parallel = v;
    }
}

fn apply_scoring(scoring: &ScoringSection, cfg: &mut ScoringConfig) -> anyhow::Result<()> {
    if let Some(v) = scoring.suspicious_threshold {
        cfg.suspicious_threshold = v;
    }
    if let Some(v) = scoring.malicious_threshold {
        cfg.malicious_threshold = v;
    }
    if let Some(v) = scoring.per_kind_cap {
        cfg.per_kind_cap = v;
    }
    if let Some(weights) = &scoring.weights {
        for (name, weight) in weights {
            let Some(kind) = IndicatorKind::from_name(name) else {
                return Err(anyhow::anyhow!("unknown indicator kind {name:?} in scoring.weights"));
            };
            cfg.weights.insert(kind, *weight);
        }
    }
    Ok(())
}

/// Replace `slot` with `value` when it is within `1..=max`; anything else
/// is logged and the current value kept.
fn override_limit<T>(name: &'static str, value: Option<T>, max: T, slot: &mut T)
where
    T: Copy + PartialOrd + Default + fmt::Display,
{
    let Some(v) = value else { return };
    if v <= T::default() || v > max {
        SecurityEvent::new(Level::WARN, SecurityDomain::Config, "invalid_limit_override", "Invalid limit in config")
            .emit();
        warn!(setting = name, value = %v, limit = %max, "Invalid limit in config; keeping default");
        return;
    }
    info!(setting = name, value = %v, "Config override");
    *slot = v;
}
