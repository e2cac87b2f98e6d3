use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vetpdf_pdf::ObjectId;

/// Every indicator the catalogue can emit. Names are part of the stable
/// verdict schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum IndicatorKind {
    AutoActionTrigger,
    EmbeddedScript,
    LaunchAction,
    ObfuscatedScript,
    EmbeddedFile,
    EmbeddedExecutable,
    DeepFilterChain,
    ObjectStreamHiding,
    UnjustifiedEncryption,
    ObfuscatedName,
    ObfuscatedString,
    StructuralLimitExceeded,
    StreamLengthMismatch,
    UndecodableStream,
    MalformedInput,
    OutOfBounds,
    BudgetExceeded,
    ReferenceCycle,
    DanglingReference,
    SuspiciousContent,
    SuspiciousMetadata,
    HiddenContent,
    UnusualObjectType,
    OversizedStructure,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 24] = [
        IndicatorKind::AutoActionTrigger,
        IndicatorKind::EmbeddedScript,
        IndicatorKind::LaunchAction,
        IndicatorKind::ObfuscatedScript,
        IndicatorKind::EmbeddedFile,
        IndicatorKind::EmbeddedExecutable,
        IndicatorKind::DeepFilterChain,
        IndicatorKind::ObjectStreamHiding,
        IndicatorKind::UnjustifiedEncryption,
        IndicatorKind::ObfuscatedName,
        IndicatorKind::ObfuscatedString,
        IndicatorKind::StructuralLimitExceeded,
        IndicatorKind::StreamLengthMismatch,
        IndicatorKind::UndecodableStream,
        IndicatorKind::MalformedInput,
        IndicatorKind::OutOfBounds,
        IndicatorKind::BudgetExceeded,
        IndicatorKind::ReferenceCycle,
        IndicatorKind::DanglingReference,
        IndicatorKind::SuspiciousContent,
        IndicatorKind::SuspiciousMetadata,
        IndicatorKind::HiddenContent,
        IndicatorKind::UnusualObjectType,
        IndicatorKind::OversizedStructure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::AutoActionTrigger => "AutoActionTrigger",
            IndicatorKind::EmbeddedScript => "EmbeddedScript",
            IndicatorKind::LaunchAction => "LaunchAction",
            IndicatorKind::ObfuscatedScript => "ObfuscatedScript",
            IndicatorKind::EmbeddedFile => "EmbeddedFile",
            IndicatorKind::EmbeddedExecutable => "EmbeddedExecutable",
            IndicatorKind::DeepFilterChain => "DeepFilterChain",
            IndicatorKind::ObjectStreamHiding => "ObjectStreamHiding",
            IndicatorKind::UnjustifiedEncryption => "UnjustifiedEncryption",
            IndicatorKind::ObfuscatedName => "ObfuscatedName",
            IndicatorKind::ObfuscatedString => "ObfuscatedString",
            IndicatorKind::StructuralLimitExceeded => "StructuralLimitExceeded",
            IndicatorKind::StreamLengthMismatch => "StreamLengthMismatch",
            IndicatorKind::UndecodableStream => "UndecodableStream",
            IndicatorKind::MalformedInput => "MalformedInput",
            IndicatorKind::OutOfBounds => "OutOfBounds",
            IndicatorKind::BudgetExceeded => "BudgetExceeded",
            IndicatorKind::ReferenceCycle => "ReferenceCycle",
            IndicatorKind::DanglingReference => "DanglingReference",
            IndicatorKind::SuspiciousContent => "SuspiciousContent",
            IndicatorKind::SuspiciousMetadata => "SuspiciousMetadata",
            IndicatorKind::HiddenContent => "HiddenContent",
            IndicatorKind::UnusualObjectType => "UnusualObjectType",
            IndicatorKind::OversizedStructure => "OversizedStructure",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an indicator was observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Location {
    Object(ObjectId),
    Offset(u64),
    Document,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Object(id) => write!(f, "obj {id}"),
            Location::Offset(offset) => write!(f, "offset {offset}"),
            Location::Document => f.write_str("document"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub location: Location,
    pub severity: u32,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Band {
    Clean,
    Suspicious,
    Malicious,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Clean => "Clean",
            Band::Suspicious => "Suspicious",
            Band::Malicious => "Malicious",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one artifact a front end consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub score: u8,
    pub band: Band,
    pub indicators: Vec<Indicator>,
    pub truncated: bool,
}

impl Verdict {
    pub fn has(&self, kind: IndicatorKind) -> bool {
        self.indicators.iter().any(|i| i.kind == kind)
    }

    pub fn count(&self, kind: IndicatorKind) -> usize {
        self.indicators.iter().filter(|i| i.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum ScanState {
    Idle,
    Reading,
    Parsing,
    Extracting,
    Scoring,
    Done,
    Aborted,
}

/// Object statistics gathered while building the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DocumentStats {
    pub total_objects: usize,
    pub stream_objects: usize,
    pub object_stream_containers: usize,
    pub objects_in_object_streams: usize,
    pub script_objects: usize,
    pub decoded_bytes: usize,
    pub xref_recovered: bool,
}

/// Host-level failures. Callers treat these as unsafe.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineFailure {
    #[error("allocation of {length} bytes refused")]
    AllocationRefused { length: usize },
    #[error("internal engine failure: {0}")]
    Internal(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Severity attached to structured security log events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}
