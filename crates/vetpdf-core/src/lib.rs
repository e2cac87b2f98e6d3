pub mod config;
pub mod detect;
pub mod entropy;
pub mod model;
pub mod report;
pub mod runner;
pub mod scan;
pub mod score;
pub mod security_log;

pub use crate::config::{Config, EngineConfig, PatternConfig, ScanConfig, ScoringConfig};
pub use crate::detect::{Detector, Needs};
pub use crate::model::{Band, DocumentStats, EngineFailure, Indicator, IndicatorKind, Location, ScanState, Verdict};
pub use crate::runner::{Engine, ScanOutcome};
pub use crate::scan::ScanContext;
