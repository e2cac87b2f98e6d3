mod common;

use common::{build_pdf_with_objects, dict, engine, flate, hidden_script_pdf, object_stream, page_tree, stream};
use proptest::prelude::*;
use vetpdf_core::report::{write_json, InputSummary, Report};
use vetpdf_core::{Band, EngineConfig, IndicatorKind, Location, ScanState};

fn verdict_json(bytes: &[u8]) -> Vec<u8> {
    let outcome = engine(EngineConfig::default()).scan_document(vetpdf_pdf::RawDocument::new(bytes));
    let report = Report::new(InputSummary { path: None, sha256: None, length: bytes.len() as u64 }, 1, outcome);
    let mut out = Vec::new();
    write_json(&report, &mut out).expect("json");
    out
}

#[test]
fn identical_input_gives_identical_json() {
    let bytes = hidden_script_pdf();
    let first = verdict_json(&bytes);
    for _ in 0..4 {
        assert_eq!(verdict_json(&bytes), first);
    }
}

#[test]
fn sequential_and_parallel_checks_agree() {
    let bytes = hidden_script_pdf();
    let parallel = engine(EngineConfig::default()).scan(&bytes).expect("scan");
    let mut config = EngineConfig::default();
    config.scan.parallel = false;
    let sequential = engine(config).scan(&bytes).expect("scan");
    assert_eq!(parallel, sequential);
}

#[test]
fn one_engine_serves_concurrent_scans() {
    let bytes = hidden_script_pdf();
    let engine = engine(EngineConfig::default());
    let expected = engine.scan(&bytes).expect("scan");
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| engine.scan(&bytes).expect("scan"))).collect();
        for handle in handles {
            assert_eq!(handle.join().expect("scan thread"), expected);
        }
    });
}

#[test]
fn adding_a_trigger_never_lowers_the_score() {
    let base = build_pdf_with_objects(&page_tree(""), "");
    let mut with_script = page_tree("/OpenAction 4 0 R");
    with_script.push((4, dict("<< /S /JavaScript /JS (app.alert(1)) >>")));
    let mut with_more = with_script.clone();
    with_more.push((5, dict("<< /S /Launch /F (calc.exe) >>")));

    let engine = engine(EngineConfig::default());
    let scores: Vec<u8> = [base, build_pdf_with_objects(&with_script, ""), build_pdf_with_objects(&with_more, "")]
        .iter()
        .map(|bytes| engine.scan(bytes).expect("scan").score)
        .collect();
    assert!(scores.windows(2).all(|w| w[0] <= w[1]), "{scores:?}");
    assert_eq!(scores[0], 0);
}

#[test]
fn corrupted_xref_adds_only_a_recovery_note() {
    let clean = hidden_script_pdf();
    let mut corrupted = clean.clone();
    let at = corrupted.windows(6).position(|w| w == b"\nxref\n").expect("xref table") + 1;
    corrupted[at..at + 4].copy_from_slice(b"XREF");

    let engine = engine(EngineConfig::default());
    let expected = engine.scan(&clean).expect("scan");
    let recovered = engine.scan(&corrupted).expect("scan");

    let recovery: Vec<_> = recovered
        .indicators
        .iter()
        .filter(|i| i.kind == IndicatorKind::MalformedInput && i.detail.contains("recovered by linear scan"))
        .collect();
    assert_eq!(recovery.len(), 1);
    assert_eq!(recovery[0].location, Location::Document);

    let rest: Vec<_> = recovered.indicators.iter().filter(|i| i.kind != IndicatorKind::MalformedInput).cloned().collect();
    assert_eq!(rest, expected.indicators);
    assert_eq!(recovered.band, Band::Malicious);
}

#[test]
fn decompression_bomb_is_undecodable_not_fatal() {
    let bomb = flate(&vec![0u8; 8 * 1024 * 1024]);
    let mut objects = page_tree("");
    objects.push((4, stream("/Filter /FlateDecode", &bomb)));
    let mut config = EngineConfig::default();
    config.scan.max_decode_bytes = 1024 * 1024;
    let outcome = engine(config)
        .scan_document(vetpdf_pdf::RawDocument::new(&build_pdf_with_objects(&objects, "")))
        .expect("scan");

    let undecodable = outcome
        .verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::UndecodableStream)
        .expect("undecodable");
    assert!(undecodable.detail.contains("exceeds 1048576 bytes"), "{}", undecodable.detail);
    assert!(!outcome.verdict.truncated);
    assert_eq!(outcome.state, ScanState::Done);
    assert!(outcome.stats.decoded_bytes <= 1024 * 1024);
}

#[test]
fn nesting_beyond_the_limit_is_structural() {
    let nested = format!("<< /Deep {}0{} >>", "[".repeat(40), "]".repeat(40));
    let mut objects = page_tree("");
    objects.push((4, dict(&nested)));
    let mut config = EngineConfig::default();
    config.scan.max_depth = 16;
    let verdict = engine(config).scan(&build_pdf_with_objects(&objects, "")).expect("scan");
    let limit = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::StructuralLimitExceeded)
        .expect("depth limit");
    assert!(limit.detail.contains("deeper than 16"), "{}", limit.detail);
}

#[test]
fn exhausted_memory_budget_truncates() {
    let mut objects = page_tree("/OpenAction 5 0 R");
    objects.push((4, stream("/Filter /FlateDecode", &flate(&vec![b'A'; 64 * 1024]))));
    objects.push((5, dict("<< /S /JavaScript /JS (app.alert(1)) >>")));
    let mut config = EngineConfig::default();
    config.scan.max_total_decoded_bytes = 1024;
    let outcome = engine(config)
        .scan_document(vetpdf_pdf::RawDocument::new(&build_pdf_with_objects(&objects, "")))
        .expect("scan");
    assert!(outcome.verdict.truncated);
    assert_eq!(outcome.state, ScanState::Aborted);
    assert!(outcome.verdict.has(IndicatorKind::BudgetExceeded));
    assert!(outcome.verdict.has(IndicatorKind::AutoActionTrigger));
}

#[test]
fn budget_exhausted_while_parsing_keeps_graph_findings() {
    let padding = "A".repeat(8 * 1024);
    let mut objects = page_tree("/OpenAction 4 0 R");
    objects.push((4, dict("<< /S /Launch /F (cmd.exe) >>")));
    objects.push((5, dict(&format!("<< /Deep {}0{} >>", "[".repeat(100), "]".repeat(100)))));
    objects.push((6, object_stream(&[(7, &format!("({padding})"))])));
    let mut config = EngineConfig::default();
    config.scan.max_depth = 16;
    config.scan.max_total_decoded_bytes = 1024;
    let outcome = engine(config)
        .scan_document(vetpdf_pdf::RawDocument::new(&build_pdf_with_objects(&objects, "")))
        .expect("scan");

    assert!(outcome.verdict.truncated);
    assert_eq!(outcome.state, ScanState::Aborted);
    let verdict = &outcome.verdict;
    assert!(verdict.has(IndicatorKind::BudgetExceeded));
    assert!(verdict.has(IndicatorKind::LaunchAction), "{:?}", verdict.indicators);
    assert!(verdict.has(IndicatorKind::AutoActionTrigger));
    assert!(verdict.has(IndicatorKind::StructuralLimitExceeded));
    assert_eq!(verdict.band, Band::Malicious);
}

#[test]
fn exhausted_time_budget_truncates() {
    let mut objects = page_tree("/OpenAction 4 0 R");
    objects.push((4, dict("<< /S /JavaScript /JS (app.alert(1)) >>")));
    let filler = format!("<< /Kids [{}] >>", "0 0 R ".repeat(2_000));
    objects.extend((5..505).map(|n| (n, dict(&filler))));
    let bytes = build_pdf_with_objects(&objects, "");
    let mut config = EngineConfig::default();
    config.scan.timeout_ms = 1;
    let outcome = engine(config).scan_document(vetpdf_pdf::RawDocument::new(&bytes)).expect("scan");

    assert!(outcome.verdict.truncated);
    assert_eq!(outcome.state, ScanState::Aborted);
    let exceeded = outcome
        .verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::BudgetExceeded)
        .expect("budget indicator");
    assert!(exceeded.detail.contains("wall-clock budget of 1 ms"), "{}", exceeded.detail);
}

#[test]
fn oversized_input_aborts_before_parsing() {
    let bytes = build_pdf_with_objects(&page_tree(""), "");
    let mut config = EngineConfig::default();
    config.scan.max_input_bytes = 64;
    let outcome = engine(config).scan_document(vetpdf_pdf::RawDocument::new(&bytes)).expect("scan");
    assert_eq!(outcome.state, ScanState::Aborted);
    assert!(outcome.verdict.truncated);
    assert_eq!(outcome.verdict.indicators.len(), 1);
    assert_eq!(outcome.verdict.indicators[0].kind, IndicatorKind::BudgetExceeded);
    assert_eq!(outcome.stats.total_objects, 0);
}

#[test]
fn empty_input_is_malformed_not_a_failure() {
    let verdict = engine(EngineConfig::default()).scan(b"").expect("scan");
    assert!(verdict.has(IndicatorKind::MalformedInput));
    assert!(!verdict.truncated);
}

#[test]
fn stats_describe_the_document() {
    let outcome = engine(EngineConfig::default())
        .scan_document(vetpdf_pdf::RawDocument::new(&hidden_script_pdf()))
        .expect("scan");
    assert_eq!(outcome.stats.total_objects, 5);
    assert_eq!(outcome.stats.stream_objects, 1);
    assert_eq!(outcome.stats.object_stream_containers, 1);
    assert_eq!(outcome.stats.objects_in_object_streams, 1);
    assert_eq!(outcome.stats.script_objects, 1);
    assert!(!outcome.stats.xref_recovered);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_bytes_always_terminate(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let result = engine(EngineConfig::default()).scan(&data);
        prop_assert!(result.is_ok());
    }

    #[test]
    fn mutated_documents_always_terminate(index in 0usize..400, byte in any::<u8>()) {
        let mut bytes = hidden_script_pdf();
        let at = index % bytes.len();
        bytes[at] = byte;
        let verdict = engine(EngineConfig::default()).scan(&bytes);
        prop_assert!(verdict.is_ok());
    }

    #[test]
    fn truncated_documents_always_terminate(cut in 0usize..600) {
        let bytes = hidden_script_pdf();
        let cut = cut.min(bytes.len());
        prop_assert!(engine(EngineConfig::default()).scan(&bytes[..cut]).is_ok());
    }
}
