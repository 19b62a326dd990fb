use chrono::NaiveDate;

use crate::error::{Result, TellerError};
use crate::importer::{parse_amount_milliunits, parse_date};
use crate::models::Transaction;

pub fn run(
    id: &str,
    payee: &str,
    amount: &str,
    date: &str,
    category: Option<String>,
    split: Option<String>,
    modified: bool,
    catalog: Option<String>,
) -> Result<()> {
    let engine = super::open_engine()?;
    let catalog = super::load_catalog(&catalog)?;

    let date: NaiveDate = parse_date(date).ok_or_else(|| {
        TellerError::InvalidTransaction(format!("unparseable date \"{date}\""))
    })?;
    let txn = Transaction {
        id: id.to_string(),
        payee: payee.to_string(),
        amount: parse_amount_milliunits(amount),
        memo: None,
        date,
        transfer_account_id: None,
    };

    match (category, split) {
        (Some(_), Some(_)) => Err(TellerError::Other(
            "pass either --category or --split, not both".to_string(),
        )),
        (None, None) => Err(TellerError::Other(
            "one of --category or --split is required".to_string(),
        )),
        (Some(name), None) => {
            let cat = super::resolve_category(&catalog, &name)?;
            engine.record_approval(&txn, &cat.id, &cat.name, modified)?;
            println!("Recorded: {payee} \u{2192} {}", cat.name);
            if modified {
                println!("Correction rule added for \"{payee}\".");
            }
            Ok(())
        }
        (None, Some(spec)) => {
            let parts = super::parse_split_spec(&catalog, &spec)?;
            engine.record_split_approval(&txn, &parts, modified)?;
            let body = parts
                .iter()
                .map(|p| format!("{} {}%", p.category_name, p.percentage))
                .collect::<Vec<_>>()
                .join(" / ");
            println!("Recorded split: {payee} \u{2192} {body}");
            if modified {
                println!("Correction rule added for \"{payee}\".");
            }
            Ok(())
        }
    }
}
