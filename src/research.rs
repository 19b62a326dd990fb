//! Tier 3: research fallback. A provider describes what a business is;
//! the mapper turns that description into catalog categories, deciding
//! along the way whether the vendor spans more than one of them.

use crate::error::Result;
use crate::matcher;
use crate::models::{Category, SplitInput};
use crate::settings::SplitVendor;
use crate::split::MAX_SPLIT_LINES;

/// External research capability. Implementations own their network and
/// deadline handling: return the business description, `Ok(None)` when
/// nothing usable was found, and `Err` on an outright failure or timeout.
/// The engine treats `None` and `Err` the same way (manual review) and
/// never retries synchronously.
pub trait ResearchProvider: Send + Sync {
    fn lookup(&self, payee: &str) -> Result<Option<String>>;
}

// keyword sets and the description returned when one of them appears in
// the payee
const KNOWN_BUSINESSES: &[(&[&str], &str)] = &[
    (&["starbucks", "coffee"], "Starbucks is a multinational coffee shop chain."),
    (&["dunkin"], "Dunkin' is a coffee shop chain known for donuts."),
    (
        &["whole foods", "grocery", "kroger", "safeway", "trader joe"],
        "Grocery store chain selling food and produce.",
    ),
    (&["amazon"], "Amazon is an online retail platform selling various products."),
    (&["shell", "chevron", "exxon", "gas"], "Gas station for vehicle fuel."),
    (
        &["costco"],
        "Costco is a wholesale club selling groceries and household goods.",
    ),
    (
        &["walmart"],
        "Walmart is a discount retailer selling groceries and household goods.",
    ),
    (
        &["target"],
        "Target is a general retailer selling household goods and groceries.",
    ),
    (
        &["netflix", "hulu", "spotify"],
        "Subscription streaming service for entertainment.",
    ),
    (&["uber", "lyft"], "Rideshare service for local transportation."),
    (&["delta", "united air", "airline"], "Commercial airline for travel."),
    (&["marriott", "hilton", "hotel"], "Hotel chain for travel lodging."),
    (&["cvs", "walgreens", "pharmacy"], "Retail pharmacy chain."),
    (
        &["home depot", "lowes"],
        "Home improvement retailer selling tools and building supplies.",
    ),
    (
        &["verizon", "comcast", "t-mobile"],
        "Telecommunications provider for phone and internet utilities.",
    ),
    (&["planet fitness", "gym"], "Fitness gym with monthly membership."),
    (&["chipotle", "grill", "restaurant"], "Fast casual restaurant chain."),
];

/// Offline provider backed by a keyword table. Stands in for the real
/// web-research capability so the full tier chain, split detection
/// included, runs without a network.
pub struct KeywordResearch;

impl KeywordResearch {
    pub fn new() -> KeywordResearch {
        KeywordResearch
    }
}

impl Default for KeywordResearch {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchProvider for KeywordResearch {
    fn lookup(&self, payee: &str) -> Result<Option<String>> {
        let payee_lower = payee.to_lowercase();
        for (keywords, description) in KNOWN_BUSINESSES {
            if keywords.iter().any(|k| payee_lower.contains(k)) {
                return Ok(Some((*description).to_string()));
            }
        }
        Ok(None)
    }
}

/// What the research tier resolved to.
#[derive(Debug, Clone)]
pub enum ResearchTarget {
    Single {
        category_id: String,
        category_name: String,
    },
    Split(Vec<SplitInput>),
}

#[derive(Debug, Clone)]
pub struct ResearchResult {
    pub target: ResearchTarget,
    /// How cleanly the description mapped onto the catalog, 0..=1.
    pub clarity: f64,
    /// Human sentence for the reasoning string.
    pub summary: String,
}

/// Run the research tier for one payee. Configured split vendors are
/// checked first; otherwise the provider's description is mapped onto the
/// catalog. `Ok(None)` means research produced nothing usable.
pub fn investigate(
    provider: &dyn ResearchProvider,
    payee: &str,
    catalog: &[Category],
    split_vendors: &[SplitVendor],
) -> Result<Option<ResearchResult>> {
    let normalized = matcher::normalize_payee(payee).to_lowercase();

    for vendor in split_vendors {
        if !normalized.contains(&vendor.pattern.to_lowercase()) {
            continue;
        }
        match resolve_vendor(vendor, catalog) {
            Some(parts) => {
                return Ok(Some(ResearchResult {
                    target: ResearchTarget::Split(parts),
                    clarity: 1.0,
                    summary: format!("known multi-category vendor \"{}\"", vendor.pattern),
                }));
            }
            None => {
                log::warn!(
                    "split vendor \"{}\" names categories missing from the catalog, ignoring it",
                    vendor.pattern
                );
            }
        }
    }

    let hint = match provider.lookup(payee)? {
        Some(hint) => hint,
        None => return Ok(None),
    };

    // Two or more distinct mappable business types in the description
    // mean the vendor spans categories; split evenly across them.
    let mut distinct: Vec<(Category, f64)> = Vec::new();
    for segment in segments(&hint) {
        if let Some((category, clarity)) = map_phrase(segment, catalog) {
            if !distinct.iter().any(|(c, _)| c.id == category.id) {
                distinct.push((category, clarity));
            }
        }
    }
    distinct.truncate(MAX_SPLIT_LINES);

    if distinct.len() >= 2 {
        let clarity =
            distinct.iter().map(|(_, c)| c).sum::<f64>() / distinct.len() as f64;
        let percentages = even_percentages(distinct.len());
        let parts = distinct
            .into_iter()
            .zip(percentages)
            .map(|((category, _), percentage)| SplitInput {
                category_id: category.id,
                category_name: category.name,
                percentage,
                memo: None,
            })
            .collect();
        return Ok(Some(ResearchResult {
            target: ResearchTarget::Split(parts),
            clarity,
            summary: hint,
        }));
    }

    match map_phrase(&hint, catalog) {
        Some((category, clarity)) => Ok(Some(ResearchResult {
            target: ResearchTarget::Single {
                category_id: category.id,
                category_name: category.name,
            },
            clarity,
            summary: hint,
        })),
        None => Ok(None),
    }
}

// A configured vendor only applies when every named category resolves in
// the caller's catalog; results never invent categories.
fn resolve_vendor(vendor: &SplitVendor, catalog: &[Category]) -> Option<Vec<SplitInput>> {
    let mut parts = Vec::with_capacity(vendor.allocations.len());
    for alloc in &vendor.allocations {
        let category = catalog
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&alloc.category))?;
        parts.push(SplitInput {
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            percentage: alloc.percentage,
            memo: None,
        });
    }
    Some(parts)
}

fn segments(hint: &str) -> Vec<&str> {
    hint.split(" and ")
        .flat_map(|s| s.split(", "))
        .flat_map(|s| s.split('/'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Best catalog category for a phrase, scored by how much of the category
/// name's vocabulary the phrase covers.
fn map_phrase(phrase: &str, catalog: &[Category]) -> Option<(Category, f64)> {
    let phrase_tokens = tokenize(phrase);
    let mut best: Option<(Category, f64)> = None;
    for category in catalog {
        let name_tokens = tokenize(&category.name);
        if name_tokens.is_empty() {
            continue;
        }
        let overlap = name_tokens
            .iter()
            .filter(|t| phrase_tokens.contains(t))
            .count();
        if overlap == 0 {
            continue;
        }
        let score = overlap as f64 / name_tokens.len() as f64;
        match &best {
            Some((_, top)) if *top >= score => {}
            _ => best = Some((category.clone(), score)),
        }
    }
    best
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "for", "of", "with", "in", "on", "to", "and", "or",
    "chain", "known", "various", "general",
];

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(stem)
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

// Light plural folding so "groceries" meets "Grocery" and "shops" meets
// "Shop". Nothing fancier is warranted for category-name vocabulary.
fn stem(token: &str) -> String {
    let t = token.to_lowercase();
    if t.len() > 4 && t.ends_with("ies") {
        format!("{}y", &t[..t.len() - 3])
    } else if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
        t[..t.len() - 1].to_string()
    } else {
        t
    }
}

fn even_percentages(n: usize) -> Vec<f64> {
    let base = (100.0 / n as f64 * 100.0).floor() / 100.0;
    let mut parts = vec![base; n];
    let assigned: f64 = base * (n as f64 - 1.0);
    parts[n - 1] = ((100.0 - assigned) * 100.0).round() / 100.0;
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TellerError;
    use crate::settings::VendorAllocation;

    fn catalog() -> Vec<Category> {
        [
            ("cat-coffee", "Coffee Shops", "Everyday Expenses"),
            ("cat-groc", "Groceries", "Everyday Expenses"),
            ("cat-house", "Household Goods", "Everyday Expenses"),
            ("cat-dining", "Dining Out", "Everyday Expenses"),
            ("cat-fuel", "Gas", "Transportation"),
            ("cat-travel", "Travel", "Quality of Life"),
            ("cat-stream", "Streaming Services", "Subscriptions"),
        ]
        .iter()
        .map(|(id, name, group)| Category {
            id: id.to_string(),
            name: name.to_string(),
            group: group.to_string(),
        })
        .collect()
    }

    #[test]
    fn test_keyword_provider_knows_common_payees() {
        let provider = KeywordResearch::new();
        let hint = provider.lookup("STARBUCKS #5521").unwrap().expect("hint");
        assert!(hint.to_lowercase().contains("coffee"));
        assert!(provider.lookup("XYZZY LLC").unwrap().is_none());
    }

    #[test]
    fn test_single_category_mapping() {
        let result = investigate(&KeywordResearch::new(), "STARBUCKS #5521", &catalog(), &[])
            .unwrap()
            .expect("result");
        match result.target {
            ResearchTarget::Single { category_name, .. } => {
                assert_eq!(category_name, "Coffee Shops")
            }
            other => panic!("expected single mapping, got {other:?}"),
        }
        assert_eq!(result.clarity, 1.0);
    }

    #[test]
    fn test_partial_overlap_lowers_clarity() {
        // A wordier category name than the description only partially
        // covers scores below full clarity.
        let lean = vec![Category {
            id: "cat-stream".to_string(),
            name: "Digital Streaming Subscriptions".to_string(),
            group: "Subscriptions".to_string(),
        }];
        let result = investigate(&KeywordResearch::new(), "NETFLIX.COM", &lean, &[])
            .unwrap()
            .expect("result");
        match result.target {
            ResearchTarget::Single { category_name, .. } => {
                assert_eq!(category_name, "Digital Streaming Subscriptions")
            }
            other => panic!("expected single mapping, got {other:?}"),
        }
        assert!(result.clarity > 0.0 && result.clarity < 1.0);
    }

    #[test]
    fn test_multi_type_description_splits_evenly() {
        let result = investigate(&KeywordResearch::new(), "COSTCO WHOLESALE #1021", &catalog(), &[])
            .unwrap()
            .expect("result");
        match result.target {
            ResearchTarget::Split(parts) => {
                assert_eq!(parts.len(), 2);
                let names: Vec<&str> = parts.iter().map(|p| p.category_name.as_str()).collect();
                assert!(names.contains(&"Groceries"));
                assert!(names.contains(&"Household Goods"));
                let total: f64 = parts.iter().map(|p| p.percentage).sum();
                assert!((total - 100.0).abs() < 1e-9);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn test_configured_vendor_takes_precedence() {
        let vendors = vec![SplitVendor {
            pattern: "costco".to_string(),
            allocations: vec![
                VendorAllocation {
                    category: "groceries".to_string(),
                    percentage: 70.0,
                },
                VendorAllocation {
                    category: "Household Goods".to_string(),
                    percentage: 30.0,
                },
            ],
        }];
        let result = investigate(&KeywordResearch::new(), "COSTCO #1021", &catalog(), &vendors)
            .unwrap()
            .expect("result");
        assert_eq!(result.clarity, 1.0);
        match result.target {
            ResearchTarget::Split(parts) => {
                assert_eq!(parts[0].category_id, "cat-groc");
                assert_eq!(parts[0].percentage, 70.0);
                assert_eq!(parts[1].percentage, 30.0);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn test_vendor_with_unknown_category_is_ignored() {
        let vendors = vec![SplitVendor {
            pattern: "costco".to_string(),
            allocations: vec![VendorAllocation {
                category: "No Such Category".to_string(),
                percentage: 100.0,
            }],
        }];
        // Falls through to the provider path, which still maps costco.
        let result = investigate(&KeywordResearch::new(), "COSTCO #1021", &catalog(), &vendors)
            .unwrap()
            .expect("result");
        assert!(matches!(result.target, ResearchTarget::Split(_)));
        assert!(result.summary.contains("wholesale club"));
    }

    #[test]
    fn test_description_outside_catalog_maps_to_nothing() {
        let lean: Vec<Category> = catalog()
            .into_iter()
            .filter(|c| c.name == "Travel")
            .collect();
        let result = investigate(&KeywordResearch::new(), "STARBUCKS", &lean, &[]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_unknown_payee_maps_to_nothing() {
        let result =
            investigate(&KeywordResearch::new(), "XYZZY CONSULTING LLC", &catalog(), &[]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_provider_error_propagates() {
        struct Failing;
        impl ResearchProvider for Failing {
            fn lookup(&self, _payee: &str) -> Result<Option<String>> {
                Err(TellerError::Research("lookup timed out".to_string()))
            }
        }
        assert!(investigate(&Failing, "ANYTHING", &catalog(), &[]).is_err());
    }

    #[test]
    fn test_even_percentages_sum_to_100() {
        for n in 2..=5 {
            let parts = even_percentages(n);
            assert_eq!(parts.len(), n);
            let total: f64 = parts.iter().sum();
            assert!((total - 100.0).abs() < 1e-9, "n={n} sums to {total}");
        }
    }

    #[test]
    fn test_stemming_folds_plurals() {
        assert_eq!(stem("Groceries"), "grocery");
        assert_eq!(stem("shops"), "shop");
        assert_eq!(stem("gas"), "gas");
        assert_eq!(stem("business"), "business");
    }
}
