//! Explicit rule matching (Tier 1). Strategies are tried in a fixed
//! precedence order so a weaker strategy can never shadow a stronger one,
//! whatever the priorities say.

use regex::Regex;

use crate::models::{MatchStrategy, Rule};

/// Strip matching noise from a raw payee: a trailing store number
/// (`COSTCO #1021`), an `@ location` suffix (`STARBUCKS @ 5TH AVE`), and
/// repeated whitespace. Case is preserved; comparison folds it later.
/// Reasoning strings always quote the raw payee, not this.
pub fn normalize_payee(raw: &str) -> String {
    let mut s = raw.trim();

    if let Some(pos) = s.find('@') {
        s = s[..pos].trim_end();
    }
    if let Some(pos) = s.rfind('#') {
        let tail = s[pos + 1..].trim();
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            s = s[..pos].trim_end();
        }
    }

    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        // Stripping ate the whole payee; match on the raw text instead.
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        collapsed
    }
}

fn matches(normalized: &str, rule: &Rule) -> bool {
    let payee_upper = normalized.to_uppercase();
    let pat_upper = rule.pattern.trim().to_uppercase();
    match rule.strategy {
        MatchStrategy::Exact => payee_upper == pat_upper,
        MatchStrategy::Prefix => payee_upper.starts_with(&pat_upper),
        MatchStrategy::Contains => payee_upper.contains(&pat_upper),
        // Regex patterns see the normalized payee as-is; authors opt into
        // case folding with (?i). Patterns that fail to compile are
        // rejected at append time, so a failure here just skips the rule.
        MatchStrategy::Regex => Regex::new(&rule.pattern)
            .map(|re| re.is_match(normalized))
            .unwrap_or(false),
    }
}

/// Whether a single rule matches a payee, normalization included.
pub fn rule_matches(payee: &str, rule: &Rule) -> bool {
    matches(&normalize_payee(payee), rule)
}

/// Find the winning rule for a payee, if any. Precedence: exact, then
/// prefix, then contains, then regex. Within one strategy the highest
/// priority wins, and a priority tie goes to the most recently created
/// rule.
pub fn match_rule<'a>(payee: &str, rules: &'a [Rule]) -> Option<&'a Rule> {
    let normalized = normalize_payee(payee);
    for strategy in [
        MatchStrategy::Exact,
        MatchStrategy::Prefix,
        MatchStrategy::Contains,
        MatchStrategy::Regex,
    ] {
        let mut best: Option<&Rule> = None;
        for rule in rules.iter().filter(|r| r.strategy == strategy) {
            if !matches(&normalized, rule) {
                continue;
            }
            best = match best {
                None => Some(rule),
                Some(cur) if rule.priority > cur.priority => Some(rule),
                Some(cur)
                    if rule.priority == cur.priority && rule.created_at > cur.created_at =>
                {
                    Some(rule)
                }
                keep => keep,
            };
        }
        if best.is_some() {
            return best;
        }
    }
    None
}
