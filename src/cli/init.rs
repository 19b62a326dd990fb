use std::path::PathBuf;

use crate::error::Result;
use crate::history::SqliteHistory;
use crate::importer::slug;
use crate::settings::{self, save_settings, shellexpand_path, Settings};
use crate::store::RuleStore;

/// Categories written into the starter catalog. The catalog is plain CSV
/// the user is expected to edit to match their budget.
pub(crate) const STARTER_CATALOG: &[(&str, &str)] = &[
    ("Groceries", "Everyday Expenses"),
    ("Dining Out", "Everyday Expenses"),
    ("Coffee Shops", "Everyday Expenses"),
    ("Household Goods", "Everyday Expenses"),
    ("Pharmacy", "Everyday Expenses"),
    ("Gas & Fuel", "Transportation"),
    ("Rideshare", "Transportation"),
    ("Streaming Services", "Subscriptions"),
    ("Gym & Fitness", "Subscriptions"),
    ("Phone & Internet", "Monthly Bills"),
    ("Travel", "Quality of Life"),
    ("Online Shopping", "Quality of Life"),
];

pub fn run(data_dir: Option<String>) -> Result<()> {
    let dir = match data_dir {
        Some(d) => PathBuf::from(shellexpand_path(&d)),
        None => PathBuf::from(Settings::default().data_dir),
    };
    std::fs::create_dir_all(&dir)?;

    save_settings(&Settings {
        data_dir: dir.to_string_lossy().to_string(),
    })?;

    let config = settings::load_config(&dir);
    if !settings::config_path(&dir).exists() {
        settings::save_config(&dir, &config)?;
    }

    let store = RuleStore::open(&dir.join("rules.json"), config.lock_timeout())?;
    let corpus = SqliteHistory::open(&dir.join("teller.db"))?;

    let catalog_path = dir.join("catalog.csv");
    if !catalog_path.exists() {
        let mut body = String::from("id,name,group\n");
        for (name, group) in STARTER_CATALOG {
            body.push_str(&format!("{},{name},{group}\n", slug(name)));
        }
        std::fs::write(&catalog_path, body)?;
    }

    println!("Teller data directory: {}", dir.display());
    println!("  Rule store:  {} ({} rules)", store.path().display(), store.len());
    println!(
        "  History db:  {} ({} approved)",
        dir.join("teller.db").display(),
        corpus.approved_count()?
    );
    println!("  Catalog:     {}", catalog_path.display());
    println!();
    println!("Try these next:");
    println!("  teller demo");
    println!("  teller evaluate transactions.csv");
    println!("  teller rules list");
    println!("  teller status");

    Ok(())
}
