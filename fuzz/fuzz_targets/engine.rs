#![no_main]
use libfuzzer_sys::fuzz_target;
use vetpdf_core::EngineConfig;

fuzz_target!(|data: &[u8]| {
    let mut config = EngineConfig::default();
    config.scan.parallel = false;
    config.scan.max_total_decoded_bytes = 16 << 20;
    config.scan.timeout_ms = 2_000;
    let Ok(engine) = vetpdf_detectors::default_engine(config) else { return };
    if let Ok(verdict) = engine.scan(data) {
        assert!(verdict.score <= 100);
    }
});
