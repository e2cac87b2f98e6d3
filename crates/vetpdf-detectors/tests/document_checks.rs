mod common;

use common::{build_pdf, flate, minimal_objects, obj, scan, scan_with, stream_obj};
use vetpdf_core::{Band, EngineConfig, IndicatorKind, Location};
use vetpdf_pdf::ObjectId;

fn hex(data: &[u8]) -> String {
    let mut out: String = data.iter().map(|b| format!("{b:02x}")).collect();
    out.push('>');
    out
}

#[test]
fn repeated_filters_are_a_deep_chain() {
    let data = hex(&flate(&flate(b"q 1 0 0 1 0 0 cm Q")));
    let mut objects = minimal_objects("");
    objects.push(stream_obj(5, "/Filter [/ASCIIHexDecode /FlateDecode /FlateDecode]", data.as_bytes()));
    let verdict = scan(&build_pdf(&objects, ""));
    let chain = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::DeepFilterChain)
        .expect("deep chain");
    assert_eq!(chain.location, Location::Object(ObjectId::new(5, 0)));
    assert!(chain.detail.contains("FlateDecode repeated"), "{}", chain.detail);
    assert!(!verdict.has(IndicatorKind::UndecodableStream));
}

#[test]
fn short_filter_chain_is_normal() {
    let mut objects = minimal_objects("");
    objects.push(stream_obj(5, "/Filter /FlateDecode", &flate(b"0 0 m 10 10 l S")));
    let verdict = scan(&build_pdf(&objects, ""));
    assert!(!verdict.has(IndicatorKind::DeepFilterChain));
}

#[test]
fn broken_flate_data_is_undecodable() {
    let mut objects = minimal_objects("");
    objects.push(stream_obj(5, "/Filter /FlateDecode", b"definitely not zlib"));
    let verdict = scan(&build_pdf(&objects, ""));
    let undecodable = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::UndecodableStream)
        .expect("undecodable");
    assert_eq!(undecodable.location, Location::Object(ObjectId::new(5, 0)));
}

#[test]
fn permissive_encryption_is_unjustified() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Filter /Standard /V 1 /R 2 /O <0000> /U <1234> /P -4 >>"));
    let verdict = scan(&build_pdf(&objects, "/Encrypt 5 0 R"));
    let encryption = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::UnjustifiedEncryption)
        .expect("encryption");
    assert_eq!(encryption.location, Location::Object(ObjectId::new(5, 0)));
    assert!(encryption.detail.contains("all permissions granted"), "{}", encryption.detail);
    assert!(encryption.detail.contains("owner password"), "{}", encryption.detail);
}

#[test]
fn restrictive_encryption_without_active_content_is_fine() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Filter /Standard /V 1 /R 2 /O <0102> /U <0304> /P -3904 >>"));
    let verdict = scan(&build_pdf(&objects, "/Encrypt 5 0 R"));
    assert!(!verdict.has(IndicatorKind::UnjustifiedEncryption));
}

/// Bytes that do not inflate, standing in for RC4 or AES output.
fn ciphertext(seed: u32, len: usize) -> Vec<u8> {
    (0..len as u32).map(|i| (i.wrapping_add(seed).wrapping_mul(2_654_435_761) >> 13) as u8).collect()
}

#[test]
fn encrypted_streams_are_opaque_not_undecodable() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Filter /Standard /V 2 /R 3 /Length 128 /O <0102> /U <0304> /P -3904 >>"));
    for n in 6..10 {
        objects.push(stream_obj(n, "/Filter /FlateDecode", &ciphertext(n, 200)));
    }
    let verdict = scan(&build_pdf(&objects, "/Encrypt 5 0 R"));
    assert!(!verdict.has(IndicatorKind::UndecodableStream), "{:?}", verdict.indicators);
    assert!(!verdict.has(IndicatorKind::UnjustifiedEncryption));
    assert_eq!(verdict.band, Band::Clean);
}

#[test]
fn identity_stream_crypt_filter_still_decodes() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Filter /Standard /V 4 /R 4 /StmF /Identity /StrF /StdCF /O <0102> /U <0304> /P -3904 >>"));
    objects.push(stream_obj(6, "/Filter /FlateDecode", &ciphertext(6, 200)));
    let verdict = scan(&build_pdf(&objects, "/Encrypt 5 0 R"));
    let undecodable = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::UndecodableStream)
        .expect("undecodable");
    assert_eq!(undecodable.location, Location::Object(ObjectId::new(6, 0)));
}

#[test]
fn encryption_with_scripts_is_unjustified() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Filter /Standard /V 1 /R 2 /O <0102> /U <0304> /P -3904 >>"));
    objects.push(obj(6, "<< /S /JavaScript /JS (app.alert(1)) >>"));
    let verdict = scan(&build_pdf(&objects, "/Encrypt 5 0 R"));
    let encryption = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::UnjustifiedEncryption)
        .expect("encryption");
    assert!(encryption.detail.contains("1 object(s) with active content"), "{}", encryption.detail);
}

#[test]
fn escaped_names_and_strings_are_obfuscation() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /#54ype /Annot /Subtype /Te#78t >>"));
    objects.push(obj(6, r"<< /Contents (\101\102\103\104\105\106\107\110\111\112) >>"));
    let verdict = scan(&build_pdf(&objects, ""));

    let name = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::ObfuscatedName)
        .expect("name");
    assert_eq!(name.location, Location::Object(ObjectId::new(5, 0)));
    assert!(name.detail.contains("/#54ype"), "{}", name.detail);
    assert!(name.detail.contains("/Te#78t"), "{}", name.detail);
    assert_eq!(verdict.count(IndicatorKind::ObfuscatedName), 1);

    let string = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::ObfuscatedString)
        .expect("string");
    assert_eq!(string.location, Location::Object(ObjectId::new(6, 0)));
}

#[test]
fn broken_references_are_reported_once_per_target() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /A 9 0 R /B 9 0 R >>"));
    objects.push(obj(6, "7 0 R"));
    objects.push(obj(7, "6 0 R"));
    let verdict = scan(&build_pdf(&objects, ""));

    assert_eq!(verdict.count(IndicatorKind::DanglingReference), 1);
    let dangling = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::DanglingReference)
        .expect("dangling");
    assert_eq!(dangling.location, Location::Object(ObjectId::new(5, 0)));
    assert!(dangling.detail.contains("missing object 9 0"));
    assert!(verdict.has(IndicatorKind::ReferenceCycle));
}

#[test]
fn long_reference_chains_hit_the_limit() {
    let mut config = EngineConfig::default();
    config.scan.max_reference_chain = 2;
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Next 6 0 R >>"));
    objects.push(obj(6, "7 0 R"));
    objects.push(obj(7, "8 0 R"));
    objects.push(obj(8, "<< /End true >>"));
    let verdict = scan_with(&build_pdf(&objects, ""), config);
    assert!(verdict
        .indicators
        .iter()
        .any(|i| i.kind == IndicatorKind::StructuralLimitExceeded && i.detail.contains("longer than 2 hops")));
}

#[test]
fn info_dictionary_is_matched_against_metadata_patterns() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Producer (msfvenom 6.3) /Title (Quarterly report) >>"));
    let verdict = scan(&build_pdf(&objects, "/Info 5 0 R"));
    let metadata = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::SuspiciousMetadata)
        .expect("metadata");
    assert_eq!(metadata.location, Location::Object(ObjectId::new(5, 0)));
    assert!(metadata.detail.starts_with("/Producer"), "{}", metadata.detail);
    assert_eq!(verdict.count(IndicatorKind::SuspiciousMetadata), 1);
}

#[test]
fn ordinary_metadata_is_clean() {
    let mut objects = minimal_objects("");
    objects.push(obj(5, "<< /Producer (Microsoft Word) /Creator (Acrobat PDFMaker) >>"));
    let verdict = scan(&build_pdf(&objects, "/Info 5 0 R"));
    assert!(verdict.indicators.is_empty(), "{:?}", verdict.indicators);
}

#[test]
fn optional_content_and_unusual_types_are_anomalies() {
    let mut objects = minimal_objects("/OCProperties << /OCGs [5 0 R] /D << /OFF [5 0 R] >> >>");
    objects.push(obj(5, "<< /Type /OCG /Name (layer) >>"));
    objects.push(obj(6, "<< /Type /Payload >>"));
    objects.push(obj(7, "<< /Type /Payload >>"));
    let verdict = scan(&build_pdf(&objects, ""));

    assert_eq!(verdict.count(IndicatorKind::HiddenContent), 1);
    let hidden = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::HiddenContent)
        .expect("hidden");
    assert!(hidden.detail.starts_with("2 object(s)"), "{}", hidden.detail);
    assert_eq!(verdict.count(IndicatorKind::UnusualObjectType), 1);
    assert_eq!(verdict.band, Band::Clean);
}

#[test]
fn absurd_page_count_and_large_file_are_oversized() {
    let objects = vec![
        obj(1, "<< /Type /Catalog /Pages 2 0 R >>"),
        obj(2, "<< /Type /Pages /Count 999999999 /Kids [3 0 R] >>"),
        obj(3, "<< /Type /Page /Parent 2 0 R >>"),
    ];
    let mut config = EngineConfig::default();
    config.scan.large_file_bytes = 64;
    let verdict = scan_with(&build_pdf(&objects, ""), config);
    let details: Vec<&str> = verdict
        .indicators
        .iter()
        .filter(|i| i.kind == IndicatorKind::OversizedStructure)
        .map(|i| i.detail.as_str())
        .collect();
    assert_eq!(details.len(), 2, "{details:?}");
    assert!(details[0].starts_with("file of"));
    assert!(details[1].contains("/Count 999999999"));
}

#[test]
fn huge_arrays_are_oversized() {
    let numbers: Vec<String> = (0..50).map(|n| n.to_string()).collect();
    let mut objects = minimal_objects("");
    objects.push(obj(5, &format!("<< /Widths [{}] >>", numbers.join(" "))));
    let mut config = EngineConfig::default();
    config.scan.max_array_len = 10;
    let verdict = scan_with(&build_pdf(&objects, ""), config);
    let oversized = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::OversizedStructure)
        .expect("oversized");
    assert_eq!(oversized.location, Location::Object(ObjectId::new(5, 0)));
    assert!(oversized.detail.starts_with("array of 50 entries"));
}

#[test]
fn executable_prefix_before_header_is_flagged() {
    let mut bytes = b"MZ\x90\x00PE-stub".to_vec();
    bytes.extend_from_slice(&build_pdf(&minimal_objects(""), ""));
    let verdict = scan(&bytes);
    let header = verdict
        .indicators
        .iter()
        .find(|i| i.kind == IndicatorKind::MalformedInput && i.detail.contains("precede"))
        .expect("prefix");
    assert_eq!(header.location, Location::Offset(11));
    assert!(header.detail.contains("PE executable"), "{}", header.detail);
}

#[test]
fn missing_header_and_trailer_marker() {
    let verdict = scan(b"this is not a pdf at all");
    let details: Vec<&str> = verdict
        .indicators
        .iter()
        .filter(|i| i.kind == IndicatorKind::MalformedInput)
        .map(|i| i.detail.as_str())
        .collect();
    assert!(details.iter().any(|d| d.starts_with("no %PDF- header")), "{details:?}");
    assert!(details.iter().any(|d| d.starts_with("no %%EOF marker")), "{details:?}");
}
