use std::io::Write;

use vetpdf_core::{Config, EngineConfig, IndicatorKind};

fn write_config(name: &str, contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(contents.as_bytes()).expect("write");
    (dir, path)
}

#[test]
fn toml_file_with_profile_overrides_defaults() {
    let (_dir, path) = write_config(
        "vetpdf.toml",
        r#"
[scan]
max_objects = 1000
timeout_ms = 5000

[scoring]
malicious_threshold = 60

[scoring.weights]
HiddenContent = 7

[profiles.strict.scan]
max_depth = 16
"#,
    );
    let config = Config::load(&path).expect("load");
    let mut engine_config = EngineConfig::default();
    config.apply(&mut engine_config, Some("strict")).expect("apply");

    assert_eq!(engine_config.scan.max_objects, 1000);
    assert_eq!(engine_config.scan.timeout_ms, 5000);
    assert_eq!(engine_config.scan.max_depth, 16);
    assert_eq!(engine_config.scoring.malicious_threshold, 60);
    assert_eq!(engine_config.scoring.weight(IndicatorKind::HiddenContent), 7);
    assert_eq!(engine_config.scoring.weight(IndicatorKind::EmbeddedScript), 30);
}

#[test]
fn yaml_file_is_accepted() {
    let (_dir, path) = write_config("vetpdf.yaml", "scan:\n  max_decode_bytes: 4096\nlogging:\n  level: debug\n");
    let config = Config::load(&path).expect("load");
    let mut engine_config = EngineConfig::default();
    config.apply(&mut engine_config, None).expect("apply");
    assert_eq!(engine_config.scan.max_decode_bytes, 4096);
    assert_eq!(config.log_level(), Some("debug"));
}

#[test]
fn unknown_profile_is_an_error() {
    let (_dir, path) = write_config("vetpdf.toml", "[scan]\nmax_objects = 10\n");
    let config = Config::load(&path).expect("load");
    assert!(config.apply(&mut EngineConfig::default(), Some("missing")).is_err());
}

#[test]
fn oversized_config_file_is_refused() {
    let padding = format!("# {}\n", "x".repeat(1024 * 1024));
    let (_dir, path) = write_config("vetpdf.toml", &padding);
    assert!(Config::load(&path).is_err());
}
