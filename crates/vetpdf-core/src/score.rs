use std::collections::BTreeMap;

use crate::config::ScoringConfig;
use crate::model::{Indicator, IndicatorKind, Verdict};

pub const MAX_SCORE: u32 = 100;
const SUPPRESSED_SAMPLE_LIMIT: usize = 4;

/// Keep at most `per_kind_cap` indicators of each kind, in order. The first
/// kept indicator of a capped kind records how many were folded into it.
pub fn apply_kind_cap(indicators: &mut Vec<Indicator>, per_kind_cap: usize) {
    if indicators.is_empty() || per_kind_cap == 0 {
        return;
    }
    let mut seen: BTreeMap<IndicatorKind, usize> = BTreeMap::new();
    let mut suppressed: BTreeMap<IndicatorKind, Vec<String>> = BTreeMap::new();
    let mut retained = Vec::with_capacity(indicators.len().min(per_kind_cap * IndicatorKind::ALL.len()));
    for indicator in indicators.drain(..) {
        let count = seen.entry(indicator.kind).or_insert(0);
        *count += 1;
        if *count <= per_kind_cap {
            retained.push(indicator);
            continue;
        }
        let sample = suppressed.entry(indicator.kind).or_default();
        if sample.len() < SUPPRESSED_SAMPLE_LIMIT {
            sample.push(indicator.location.to_string());
        }
    }
    for (kind, sample) in suppressed {
        let total = seen.get(&kind).copied().unwrap_or(0);
        let folded = total.saturating_sub(per_kind_cap);
        if let Some(first) = retained.iter_mut().find(|i| i.kind == kind) {
            let more = if folded > sample.len() { ", ..." } else { "" };
            first.detail = format!("{} (+{folded} more at {}{more})", first.detail, sample.join(", "));
        }
    }
    *indicators = retained;
}

/// Fold indicators into a verdict. Indicator order is preserved.
pub fn score(mut indicators: Vec<Indicator>, truncated: bool, scoring: &ScoringConfig) -> Verdict {
    apply_kind_cap(&mut indicators, scoring.per_kind_cap);
    let total = indicators.iter().fold(0u32, |acc, i| acc.saturating_add(i.severity));
    let clamped = total.min(MAX_SCORE);
    Verdict { score: clamped as u8, band: scoring.band(clamped), indicators, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Band, Location};
    use vetpdf_pdf::ObjectId;

    fn indicator(kind: IndicatorKind, number: u32, severity: u32) -> Indicator {
        Indicator {
            kind,
            location: Location::Object(ObjectId::new(number, 0)),
            severity,
            detail: format!("at {number}"),
        }
    }

    #[test]
    fn cap_folds_extra_occurrences_into_first() {
        let mut list = vec![
            indicator(IndicatorKind::DanglingReference, 1, 2),
            indicator(IndicatorKind::HiddenContent, 2, 2),
            indicator(IndicatorKind::DanglingReference, 3, 2),
            indicator(IndicatorKind::DanglingReference, 4, 2),
        ];
        apply_kind_cap(&mut list, 2);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].detail, "at 1 (+1 more at obj 4 0)");
        assert_eq!(list[1].kind, IndicatorKind::HiddenContent);
        assert_eq!(list[2].detail, "at 3");
    }

    #[test]
    fn score_is_clamped_and_banded() {
        let scoring = ScoringConfig::default();
        let verdict = score(
            vec![
                indicator(IndicatorKind::LaunchAction, 1, 35),
                indicator(IndicatorKind::EmbeddedExecutable, 2, 40),
                indicator(IndicatorKind::EmbeddedScript, 3, 30),
            ],
            false,
            &scoring,
        );
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.band, Band::Malicious);
        assert_eq!(verdict.indicators.len(), 3);
    }

    #[test]
    fn empty_input_is_clean() {
        let verdict = score(Vec::new(), false, &ScoringConfig::default());
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.band, Band::Clean);
    }

    #[test]
    fn capped_kind_stops_adding_score() {
        let scoring = ScoringConfig { per_kind_cap: 1, ..ScoringConfig::default() };
        let one = score(vec![indicator(IndicatorKind::ObfuscatedString, 1, 10)], false, &scoring);
        let two = score(
            vec![indicator(IndicatorKind::ObfuscatedString, 1, 10), indicator(IndicatorKind::ObfuscatedString, 2, 10)],
            false,
            &scoring,
        );
        assert_eq!(one.score, two.score);
    }
}
