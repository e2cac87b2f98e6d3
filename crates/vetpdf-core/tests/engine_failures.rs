mod common;

use anyhow::{bail, Result};
use common::{build_pdf_with_objects, page_tree};
use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Engine, EngineConfig, EngineFailure, Indicator, IndicatorKind, Location, ScanContext};

struct PanickingDetector;

impl Detector for PanickingDetector {
    fn id(&self) -> &'static str {
        "panicking"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, _ctx: &ScanContext) -> Result<Vec<Indicator>> {
        panic!("check blew up");
    }
}

struct FailingDetector;

impl Detector for FailingDetector {
    fn id(&self) -> &'static str {
        "failing"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, _ctx: &ScanContext) -> Result<Vec<Indicator>> {
        bail!("check could not run")
    }
}

struct ObjectCounter;

impl Detector for ObjectCounter {
    fn id(&self) -> &'static str {
        "object_counter"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        Ok(vec![ctx.indicator(
            IndicatorKind::UnusualObjectType,
            Location::Document,
            format!("{} objects", ctx.objects().count()),
        )])
    }
}

fn pdf() -> Vec<u8> {
    build_pdf_with_objects(&page_tree(""), "")
}

#[test]
fn panic_in_a_check_becomes_engine_failure() {
    for parallel in [true, false] {
        let mut config = EngineConfig::default();
        config.scan.parallel = parallel;
        let engine = Engine::new(config, vec![Box::new(ObjectCounter), Box::new(PanickingDetector)]).expect("engine");
        match engine.scan(&pdf()) {
            Err(EngineFailure::Internal(message)) => assert!(message.contains("check blew up"), "{message}"),
            other => panic!("expected internal failure, got {other:?}"),
        }
    }
}

#[test]
fn failing_check_is_skipped() {
    let engine = Engine::new(EngineConfig::default(), vec![Box::new(FailingDetector), Box::new(ObjectCounter)])
        .expect("engine");
    let verdict = engine.scan(&pdf()).expect("scan");
    assert_eq!(verdict.indicators.len(), 1);
    assert_eq!(verdict.indicators[0].detail, "3 objects");
    assert_eq!(verdict.indicators[0].severity, 1);
}

#[test]
fn invalid_pattern_is_rejected_at_construction() {
    let mut config = EngineConfig::default();
    config.patterns.content.push("(unclosed".into());
    match Engine::new(config, Vec::new()) {
        Err(EngineFailure::InvalidConfig(message)) => assert!(message.contains("(unclosed")),
        Err(other) => panic!("unexpected failure {other:?}"),
        Ok(_) => panic!("invalid pattern accepted"),
    }
}

#[test]
fn inverted_thresholds_are_rejected() {
    let mut config = EngineConfig::default();
    config.scoring.suspicious_threshold = 80;
    config.scoring.malicious_threshold = 40;
    assert!(matches!(Engine::new(config, Vec::new()), Err(EngineFailure::InvalidConfig(_))));
}

#[test]
fn limits_above_their_ceiling_are_rejected() {
    let cases: [fn(&mut EngineConfig); 4] = [
        |c| c.scan.max_depth = 1_000_000,
        |c| c.scan.max_token_bytes = usize::MAX,
        |c| c.scan.max_filter_chain = 1_000,
        |c| c.scan.timeout_ms = u64::MAX,
    ];
    for set in cases {
        let mut config = EngineConfig::default();
        set(&mut config);
        match Engine::new(config, Vec::new()) {
            Err(EngineFailure::InvalidConfig(message)) => assert!(message.contains("must be between 1 and")),
            Err(other) => panic!("unexpected failure {other:?}"),
            Ok(_) => panic!("oversized limit accepted"),
        }
    }
}

#[test]
fn deep_nesting_at_the_largest_depth_limit_does_not_exhaust_the_stack() {
    let mut body = b"<< /Deep ".to_vec();
    body.extend(std::iter::repeat(b'[').take(200_000));
    body.extend(std::iter::repeat(b']').take(200_000));
    body.extend_from_slice(b" >>");
    let mut objects = page_tree("");
    objects.push((4, body));
    let pdf = build_pdf_with_objects(&objects, "");

    let mut config = EngineConfig::default();
    config.scan.max_depth = vetpdf_pdf::MAX_NESTING_DEPTH;
    config.scan.parallel = false;
    let engine = common::engine(config);
    let verdict = std::thread::Builder::new()
        .stack_size(1024 * 1024)
        .spawn(move || engine.scan(&pdf))
        .expect("spawn")
        .join()
        .expect("scan thread")
        .expect("scan");
    assert!(verdict.indicators.iter().any(|i| i.kind == IndicatorKind::StructuralLimitExceeded));
}
