pub mod approve;
pub mod backup;
pub mod demo;
pub mod evaluate;
pub mod history;
pub mod init;
pub mod rules;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::engine::Engine;
use crate::error::{Result, TellerError};
use crate::importer;
use crate::models::{Category, SplitInput};
use crate::research::KeywordResearch;
use crate::settings::get_data_dir;

/// Open the engine over the configured data directory.
pub(crate) fn open_engine() -> Result<Engine> {
    Engine::open(&get_data_dir(), Box::new(KeywordResearch::new()))
}

pub(crate) fn catalog_path(catalog: &Option<String>) -> PathBuf {
    match catalog {
        Some(p) => PathBuf::from(p),
        None => get_data_dir().join("catalog.csv"),
    }
}

pub(crate) fn load_catalog(catalog: &Option<String>) -> Result<Vec<Category>> {
    let path = catalog_path(catalog);
    if !path.exists() {
        return Err(TellerError::InvalidCatalog(format!(
            "no catalog at {} (run `teller init` or pass --catalog)",
            path.display()
        )));
    }
    importer::read_catalog(&path)
}

pub(crate) fn resolve_category<'a>(catalog: &'a [Category], name: &str) -> Result<&'a Category> {
    catalog
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| TellerError::UnknownCategory(name.to_string()))
}

/// Parse a split spec of the form `"Groceries:60,Household Goods:40"`.
/// Category names must resolve in the catalog.
pub(crate) fn parse_split_spec(catalog: &[Category], spec: &str) -> Result<Vec<SplitInput>> {
    let mut parts = Vec::new();
    for piece in spec.split(',') {
        let (name, pct) = piece.rsplit_once(':').ok_or_else(|| {
            TellerError::InvalidSplit(format!(
                "expected NAME:PERCENT in split spec, got \"{piece}\""
            ))
        })?;
        let percentage: f64 = pct.trim().parse().map_err(|_| {
            TellerError::InvalidSplit(format!("bad percentage \"{}\" in split spec", pct.trim()))
        })?;
        let category = resolve_category(catalog, name.trim())?;
        parts.push(SplitInput {
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            percentage,
            memo: None,
        });
    }
    Ok(parts)
}

#[derive(Parser)]
#[command(name = "teller", about = "Tiered transaction categorization for YNAB-style budgets.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up Teller: choose a data directory, create the rule store and
    /// history database.
    Init {
        /// Path for Teller data (default: ~/Documents/teller)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Evaluate a CSV of transactions and print a recommendation per row.
    Evaluate {
        /// Path to transactions CSV (date, payee, amount columns)
        file: String,
        /// Category catalog CSV (default: <data_dir>/catalog.csv)
        #[arg(long)]
        catalog: Option<String>,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Worker threads for the batch
        #[arg(long, default_value = "4")]
        workers: usize,
    },
    /// Record an approved categorization so future evaluations learn from it.
    Approve {
        /// Transaction id
        id: String,
        /// Payee as it appeared on the transaction
        #[arg(long)]
        payee: String,
        /// Amount, e.g. -45.00
        #[arg(long, allow_negative_numbers = true)]
        amount: String,
        /// Transaction date: YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Approved category name
        #[arg(long)]
        category: Option<String>,
        /// Approved split: "Groceries:60,Household Goods:40"
        #[arg(long)]
        split: Option<String>,
        /// The user changed the recommendation before approving
        #[arg(long)]
        modified: bool,
        /// Category catalog CSV (default: <data_dir>/catalog.csv)
        #[arg(long)]
        catalog: Option<String>,
    },
    /// Manage explicit categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Import or inspect the approved-transaction history.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Show the data directory, rule store and history statistics.
    Status,
    /// Back up the history database and rule store.
    Backup {
        /// Output directory (default: <data_dir>/backups)
        #[arg(long)]
        output: Option<String>,
    },
    /// Load sample rules and history, then evaluate a demo batch.
    Demo,
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Pattern to match against payees
        pattern: String,
        /// Category name to assign
        #[arg(long)]
        category: Option<String>,
        /// Split target: "Groceries:60,Household Goods:40"
        #[arg(long)]
        split: Option<String>,
        /// Match strategy: exact, prefix, contains, regex
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        /// Rule priority 0-100 (higher wins)
        #[arg(long, default_value = "50")]
        priority: u8,
        /// Category catalog CSV (default: <data_dir>/catalog.csv)
        #[arg(long)]
        catalog: Option<String>,
    },
    /// List all rules.
    List,
    /// Delete a rule by its position in `teller rules list`.
    Delete {
        /// Rule number (shown in `teller rules list`)
        number: usize,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// Import a CSV of already-categorized transactions into the corpus.
    Import {
        /// Path to CSV (date, payee, amount, category columns)
        file: String,
    },
    /// Show what the corpus knows about a payee.
    Show {
        /// Payee to look up
        payee: String,
    },
}
