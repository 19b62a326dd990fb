use std::path::PathBuf;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::money;
use crate::importer::read_transactions;
use crate::models::{Decision, Recommendation, Tier};

pub fn run(file: &str, catalog: Option<String>, json: bool, workers: usize) -> Result<()> {
    let engine = super::open_engine()?;
    let catalog = super::load_catalog(&catalog)?;
    let txns = read_transactions(&PathBuf::from(file))?;
    let results = engine.evaluate_batch(&txns, &catalog, workers);

    if json {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .zip(&txns)
            .map(|(res, txn)| match res {
                Ok(rec) => serde_json::to_value(rec).unwrap_or_else(
                    |e| serde_json::json!({ "transaction_id": txn.id, "error": e.to_string() }),
                ),
                Err(e) => {
                    serde_json::json!({ "transaction_id": txn.id, "error": e.to_string() })
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Payee", "Amount", "Decision", "Tier", "Confidence"]);

    let mut by_tier = [0usize; 3];
    let mut review = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    let mut warnings: Vec<String> = Vec::new();

    for (res, txn) in results.iter().zip(&txns) {
        match res {
            Ok(rec) => {
                match rec.tier {
                    Some(t) => by_tier[t.number() as usize - 1] += 1,
                    None => match rec.decision {
                        Decision::ManualReview => review += 1,
                        Decision::Skipped(_) => skipped += 1,
                        _ => {}
                    },
                }
                table.add_row(vec![
                    Cell::new(&txn.payee),
                    Cell::new(money(txn.amount)),
                    Cell::new(decision_cell(rec)),
                    Cell::new(rec.tier.map(|t| t.to_string()).unwrap_or_default()),
                    Cell::new(confidence_cell(rec)),
                ]);
                for w in &rec.warnings {
                    if !warnings.contains(w) {
                        warnings.push(w.clone());
                    }
                }
            }
            Err(e) => {
                failed += 1;
                table.add_row(vec![
                    Cell::new(&txn.payee),
                    Cell::new(money(txn.amount)),
                    Cell::new(format!("error: {e}").red().to_string()),
                    Cell::new(""),
                    Cell::new(""),
                ]);
            }
        }
    }

    println!("Recommendations\n{table}");
    println!(
        "{} by rule, {} by history, {} by research, {} for review, {} skipped, {} failed",
        by_tier[0], by_tier[1], by_tier[2], review, skipped, failed
    );
    for w in &warnings {
        println!("{} {w}", "warning:".yellow());
    }
    Ok(())
}

fn decision_cell(rec: &Recommendation) -> String {
    let summary = rec.decision_summary();
    if rec.needs_manual_review {
        summary.yellow().to_string()
    } else {
        summary
    }
}

fn confidence_cell(rec: &Recommendation) -> String {
    match rec.tier {
        Some(Tier::Rules) => format!("{:.2}", rec.confidence).green().to_string(),
        Some(_) => format!("{:.2}", rec.confidence),
        None => String::new(),
    }
}
