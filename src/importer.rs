//! CSV ingestion: transaction batches to evaluate, category catalogs, and
//! approved-history rows for seeding the corpus. Files are plain
//! header-first CSV; columns are located by name so order never matters.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::error::{Result, TellerError};
use crate::models::{Category, Transaction};

/// Parse a money string into milliunits. Accepts plain decimals, `$`,
/// thousands separators, and accounting-style parentheses for negatives.
pub fn parse_amount_milliunits(raw: &str) -> i64 {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let s = s.trim();
    let value = if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        -inner.trim().parse::<f64>().unwrap_or(0.0)
    } else {
        s.parse().unwrap_or(0.0)
    };
    (value * 1000.0).round() as i64
}

/// Parse `YYYY-MM-DD` or `M/D/YYYY`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].parse().ok()?;
    let d: u32 = parts[1].parse().ok()?;
    let y: i32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn header_map(headers: &csv::StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_lowercase(), i))
        .collect()
}

fn require(map: &HashMap<String, usize>, name: &str, path: &Path) -> Result<usize> {
    map.get(name).copied().ok_or_else(|| {
        TellerError::Other(format!("missing column '{name}' in {}", path.display()))
    })
}

fn field<'r>(record: &'r csv::StringRecord, idx: usize) -> &'r str {
    record.get(idx).unwrap_or("").trim()
}

fn optional_field(record: &csv::StringRecord, idx: Option<&usize>) -> Option<String> {
    idx.and_then(|i| record.get(*i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read a batch of transactions to evaluate. Required columns: `date`,
/// `payee`, `amount`. Optional: `id` (synthesized from the filename and
/// row number when absent), `memo`, `transfer_account_id`.
pub fn read_transactions(path: &Path) -> Result<Vec<Transaction>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let map = header_map(rdr.headers()?);
    let idx_date = require(&map, "date", path)?;
    let idx_payee = require(&map, "payee", path)?;
    let idx_amount = require(&map, "amount", path)?;
    let idx_id = map.get("id").copied();
    let idx_memo = map.get("memo");
    let idx_transfer = map.get("transfer_account_id");

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("batch")
        .to_string();

    let mut txns = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let raw_date = field(&record, idx_date);
        if raw_date.is_empty() {
            continue;
        }
        let Some(date) = parse_date(raw_date) else {
            return Err(TellerError::Other(format!(
                "unparseable date '{raw_date}' at row {} of {}",
                row + 2,
                path.display()
            )));
        };
        let id = idx_id
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{stem}-{}", row + 1));
        txns.push(Transaction {
            id,
            payee: field(&record, idx_payee).to_string(),
            amount: parse_amount_milliunits(field(&record, idx_amount)),
            memo: optional_field(&record, idx_memo),
            date,
            transfer_account_id: optional_field(&record, idx_transfer),
        });
    }
    Ok(txns)
}

/// Read a category catalog. Required columns: `id`, `name`. Optional:
/// `group`.
pub fn read_catalog(path: &Path) -> Result<Vec<Category>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let map = header_map(rdr.headers()?);
    let idx_id = require(&map, "id", path)?;
    let idx_name = require(&map, "name", path)?;
    let idx_group = map.get("group");

    let mut catalog = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let id = field(&record, idx_id);
        let name = field(&record, idx_name);
        if id.is_empty() || name.is_empty() {
            continue;
        }
        catalog.push(Category {
            id: id.to_string(),
            name: name.to_string(),
            group: optional_field(&record, idx_group).unwrap_or_default(),
        });
    }
    Ok(catalog)
}

/// One approved categorization from a history import file.
pub struct ApprovedRow {
    pub transaction: Transaction,
    pub category_id: String,
    pub category_name: String,
}

/// Read historical approvals for corpus seeding. Required columns:
/// `date`, `payee`, `amount`, `category`. Optional: `id`, `category_id`
/// (derived from the category name when absent).
pub fn read_approved(path: &Path) -> Result<Vec<ApprovedRow>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let map = header_map(rdr.headers()?);
    let idx_date = require(&map, "date", path)?;
    let idx_payee = require(&map, "payee", path)?;
    let idx_amount = require(&map, "amount", path)?;
    let idx_category = require(&map, "category", path)?;
    let idx_id = map.get("id");
    let idx_category_id = map.get("category_id");

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("history")
        .to_string();

    let mut rows = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let raw_date = field(&record, idx_date);
        if raw_date.is_empty() {
            continue;
        }
        let Some(date) = parse_date(raw_date) else {
            continue;
        };
        let category_name = field(&record, idx_category).to_string();
        if category_name.is_empty() {
            continue;
        }
        let category_id = optional_field(&record, idx_category_id)
            .unwrap_or_else(|| slug(&category_name));
        let id = optional_field(&record, idx_id)
            .unwrap_or_else(|| format!("{stem}-{}", row + 1));
        rows.push(ApprovedRow {
            transaction: Transaction {
                id,
                payee: field(&record, idx_payee).to_string(),
                amount: parse_amount_milliunits(field(&record, idx_amount)),
                memo: None,
                date,
                transfer_account_id: None,
            },
            category_id,
            category_name,
        });
    }
    Ok(rows)
}

/// Stable id slug for a category name: `Coffee Shops` becomes
/// `cat-coffee-shops`.
pub fn slug(name: &str) -> String {
    let body: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = body.trim_matches('-');
    let mut out = String::with_capacity(trimmed.len() + 4);
    out.push_str("cat-");
    let mut last_dash = false;
    for c in trimmed.chars() {
        if c == '-' {
            if !last_dash {
                out.push(c);
            }
            last_dash = true;
        } else {
            out.push(c);
            last_dash = false;
        }
    }
    out
}
