use std::str::FromStr;

use chrono::Utc;
use comfy_table::{Cell, Table};

use crate::error::{Result, TellerError};
use crate::models::{MatchStrategy, Provenance, Rule, RuleTarget};
use crate::settings::{self, get_data_dir};
use crate::store::RuleStore;

fn open_store() -> Result<RuleStore> {
    let data_dir = get_data_dir();
    let config = settings::load_config(&data_dir);
    RuleStore::open(&data_dir.join("rules.json"), config.lock_timeout())
}

pub fn add(
    pattern: &str,
    category: Option<String>,
    split: Option<String>,
    match_type: &str,
    priority: u8,
    catalog: Option<String>,
) -> Result<()> {
    let store = open_store()?;
    let catalog = super::load_catalog(&catalog)?;
    let strategy = MatchStrategy::from_str(match_type).map_err(TellerError::InvalidRule)?;

    let target = match (category, split) {
        (Some(_), Some(_)) => {
            return Err(TellerError::Other(
                "pass either --category or --split, not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(TellerError::Other(
                "one of --category or --split is required".to_string(),
            ))
        }
        (Some(name), None) => {
            let cat = super::resolve_category(&catalog, &name)?;
            RuleTarget::Category {
                id: cat.id.clone(),
                name: cat.name.clone(),
            }
        }
        (None, Some(spec)) => RuleTarget::Split(super::parse_split_spec(&catalog, &spec)?),
    };

    let rule = Rule {
        pattern: pattern.to_string(),
        strategy,
        target,
        confidence: 1.0,
        priority,
        created_at: Utc::now(),
        provenance: Provenance::Initial,
    };
    let summary = rule.target_summary();
    store.append(rule)?;
    println!("Added rule: '{pattern}' \u{2192} {summary}");
    Ok(())
}

pub fn list() -> Result<()> {
    let store = open_store()?;
    let rules = store.rules();

    let mut table = Table::new();
    table.set_header(vec!["#", "Pattern", "Type", "Target", "Priority", "Source"]);
    for (i, rule) in rules.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&rule.pattern),
            Cell::new(rule.strategy),
            Cell::new(rule.target_summary()),
            Cell::new(rule.priority),
            Cell::new(rule.provenance.as_str()),
        ]);
    }
    println!("Rules ({})\n{table}", rules.len());
    Ok(())
}

pub fn delete(number: usize) -> Result<()> {
    let store = open_store()?;
    if number == 0 {
        return Err(TellerError::Other(
            "rule numbers start at 1 (see `teller rules list`)".to_string(),
        ));
    }
    let removed = store.remove_at(number - 1)?;
    println!(
        "Deleted rule {number}: '{}' \u{2192} {}",
        removed.pattern,
        removed.target_summary()
    );
    Ok(())
}
