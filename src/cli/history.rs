use std::path::PathBuf;

use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::history::{self, HistoricalAnalyzer, HistorySource, SqliteHistory};
use crate::importer::{compute_checksum, read_approved};
use crate::settings::{self, get_data_dir};

pub fn import(file: &str) -> Result<()> {
    let path = PathBuf::from(file);
    let corpus = SqliteHistory::open(&get_data_dir().join("teller.db"))?;

    let checksum = compute_checksum(&path)?;
    if corpus.find_import(&checksum)?.is_some() {
        println!("This file has already been imported (duplicate checksum).");
        return Ok(());
    }

    let rows = read_approved(&path)?;
    let mut recorded = 0i64;
    let mut skipped = 0i64;
    for row in &rows {
        if row.transaction.amount == 0 {
            skipped += 1;
            continue;
        }
        corpus.record(&row.transaction, &row.category_id, &row.category_name, false)?;
        recorded += 1;
    }
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());
    corpus.record_import(&filename, recorded, &checksum)?;

    println!("{recorded} recorded, {skipped} skipped (zero amount)");
    Ok(())
}

pub fn show(payee: &str) -> Result<()> {
    let data_dir = get_data_dir();
    let config = settings::load_config(&data_dir);
    let corpus = SqliteHistory::open(&data_dir.join("teller.db"))?;

    let counts = corpus.category_counts(payee)?;
    if counts.is_empty() {
        println!("No approved transactions with payee \"{payee}\".");
        return Ok(());
    }
    let total: u32 = counts.iter().map(|c| c.count).sum();

    let mut table = Table::new();
    table.set_header(vec!["Category", "Count", "Share"]);
    for c in &counts {
        table.add_row(vec![
            Cell::new(&c.category_name),
            Cell::new(c.count),
            Cell::new(format!("{:.0}%", c.count as f64 / total as f64 * 100.0)),
        ]);
    }
    println!("History for \"{payee}\"\n{table}");

    let analyzer = HistoricalAnalyzer::new(
        Box::new(corpus),
        config.min_samples,
        config.min_history_frequency,
        config.history_cache_size,
    );
    match analyzer.analyze(payee)? {
        Some(m) => println!("{}", history::describe(&m)),
        None => println!(
            "No qualifying pattern ({} samples, {} needed at {:.0}% agreement).",
            total,
            config.min_samples,
            config.min_history_frequency * 100.0
        ),
    }
    Ok(())
}
