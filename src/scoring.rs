//! Confidence values for each evidence tier.
//!
//! The numbers are calibration constants, not measurements: every value a
//! tier can emit stays inside that tier's band, so a reported confidence
//! always reveals which kind of evidence produced it. Selection between
//! tiers is by precedence alone and never compares these numbers.

use crate::models::MatchStrategy;

/// Floor of the research band; also the score for a barely-usable hint.
pub const RESEARCH_MIN: f64 = 0.60;
/// Ceiling of the research band, kept below every historical band value.
pub const RESEARCH_MAX: f64 = 0.79;
/// Minimum historical frequency that qualifies for a Tier 2 match.
pub const HISTORY_MIN_FREQUENCY: f64 = 0.80;

/// Confidence of an explicit rule match, fixed per strategy.
pub fn rule_confidence(strategy: MatchStrategy) -> f64 {
    match strategy {
        MatchStrategy::Exact => 1.00,
        MatchStrategy::Prefix => 0.95,
        MatchStrategy::Contains => 0.92,
        MatchStrategy::Regex => 0.90,
    }
}

/// Confidence of a historical match, banded by observed frequency.
/// Callers must already have screened out frequencies below
/// [`HISTORY_MIN_FREQUENCY`].
pub fn history_confidence(frequency: f64) -> f64 {
    if frequency >= 1.0 {
        0.89
    } else if frequency >= 0.90 {
        0.85
    } else {
        0.80
    }
}

/// Confidence of a research result, scaled by how cleanly the reported
/// business type mapped onto the catalog (clarity in 0..=1).
pub fn research_confidence(clarity: f64) -> f64 {
    (RESEARCH_MIN + (RESEARCH_MAX - RESEARCH_MIN) * clarity).clamp(RESEARCH_MIN, RESEARCH_MAX)
}
