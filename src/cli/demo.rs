use chrono::{Days, Local, NaiveDate, Utc};
use comfy_table::{Cell, Table};

use crate::engine::Engine;
use crate::error::Result;
use crate::fmt::money;
use crate::models::{
    MatchStrategy, Provenance, Rule, RuleTarget, SplitInput, Transaction,
};
use crate::settings::{self, get_data_dir, SplitVendor, VendorAllocation};

const HISTORY_PAYEE: &str = "TRADER JOES #512";

struct DemoTxn {
    payee: &'static str,
    amount: i64,
    days_ago: u64,
    transfer: bool,
}

/// One transaction per engine outcome: both rule shapes, a historical
/// pattern, the three research paths, both skip reasons, and an unknown.
const SAMPLE: &[DemoTxn] = &[
    DemoTxn { payee: "NETFLIX.COM", amount: -15_490, days_ago: 1, transfer: false },
    DemoTxn { payee: "COSTCO WHOLESALE #412", amount: -84_370, days_ago: 2, transfer: false },
    DemoTxn { payee: "TRADER JOES #512", amount: -52_180, days_ago: 2, transfer: false },
    DemoTxn { payee: "STARBUCKS #1021", amount: -6_750, days_ago: 3, transfer: false },
    DemoTxn { payee: "TARGET STORE #88", amount: -43_210, days_ago: 4, transfer: false },
    DemoTxn { payee: "WEGMANS #044", amount: -96_530, days_ago: 4, transfer: false },
    DemoTxn { payee: "TRANSFER TO SAVINGS", amount: -200_000, days_ago: 5, transfer: true },
    DemoTxn { payee: "PENDING AUTH HOLD", amount: 0, days_ago: 5, transfer: false },
    DemoTxn { payee: "RAVENHOLM APOTHECARY", amount: -12_840, days_ago: 6, transfer: false },
];

/// A configured multi-category vendor, so the demo exercises the vendor
/// table ahead of the research provider.
fn demo_vendor() -> SplitVendor {
    SplitVendor {
        pattern: "WEGMANS".to_string(),
        allocations: vec![
            VendorAllocation { category: "Groceries".to_string(), percentage: 80.0 },
            VendorAllocation { category: "Household Goods".to_string(), percentage: 20.0 },
        ],
    }
}

fn demo_date(days_ago: u64) -> NaiveDate {
    Local::now()
        .date_naive()
        .checked_sub_days(Days::new(days_ago))
        .unwrap_or_else(|| Local::now().date_naive())
}

fn sample_batch() -> Vec<Transaction> {
    SAMPLE
        .iter()
        .enumerate()
        .map(|(i, t)| Transaction {
            id: format!("demo-{}", i + 1),
            payee: t.payee.to_string(),
            amount: t.amount,
            memo: None,
            date: demo_date(t.days_ago),
            transfer_account_id: t.transfer.then(|| "demo-savings".to_string()),
        })
        .collect()
}

/// Seed two explicit rules and enough approvals to give the history tier
/// a qualifying pattern. Safe to run twice: rules are guarded by pattern,
/// approvals reuse fixed transaction ids.
fn seed(engine: &Engine) -> Result<(usize, usize)> {
    let mut rules_added = 0;
    let existing = engine.store().rules();
    let mut rule = |r: Rule| -> Result<()> {
        if existing.iter().any(|e| e.pattern == r.pattern) {
            return Ok(());
        }
        engine.store().append(r)?;
        rules_added += 1;
        Ok(())
    };

    rule(Rule {
        pattern: "NETFLIX.COM".to_string(),
        strategy: MatchStrategy::Exact,
        target: RuleTarget::Category {
            id: "cat-streaming-services".to_string(),
            name: "Streaming Services".to_string(),
        },
        confidence: 1.0,
        priority: 50,
        created_at: Utc::now(),
        provenance: Provenance::Initial,
    })?;
    rule(Rule {
        pattern: "COSTCO".to_string(),
        strategy: MatchStrategy::Prefix,
        target: RuleTarget::Split(vec![
            SplitInput {
                category_id: "cat-groceries".to_string(),
                category_name: "Groceries".to_string(),
                percentage: 70.0,
                memo: None,
            },
            SplitInput {
                category_id: "cat-household-goods".to_string(),
                category_name: "Household Goods".to_string(),
                percentage: 30.0,
                memo: None,
            },
        ]),
        confidence: 1.0,
        priority: 50,
        created_at: Utc::now(),
        provenance: Provenance::Initial,
    })?;

    let mut approvals = 0;
    for i in 0..4u64 {
        let txn = Transaction {
            id: format!("demo-approved-{i}"),
            payee: HISTORY_PAYEE.to_string(),
            amount: -45_000 - (i as i64) * 1_730,
            memo: None,
            date: demo_date(30 + i * 7),
            transfer_account_id: None,
        };
        engine.record_approval(&txn, "cat-groceries", "Groceries", false)?;
        approvals += 1;
    }

    Ok((rules_added, approvals))
}

pub fn run() -> Result<()> {
    let data_dir = get_data_dir();
    if !data_dir.join("catalog.csv").exists() {
        eprintln!("No catalog found. Run `teller init` first.");
        std::process::exit(1);
    }

    // Vendor config is read when the engine opens, so seed it first.
    let mut config = settings::load_config(&data_dir);
    if config.split_vendors.is_empty() {
        config.split_vendors.push(demo_vendor());
        settings::save_config(&data_dir, &config)?;
    }

    let engine = super::open_engine()?;
    let catalog = super::load_catalog(&None)?;

    let (rules_added, approvals) = seed(&engine)?;
    let rules_before = engine.store().len();

    let txns = sample_batch();
    let results = engine.evaluate_batch(&txns, &catalog, 2);

    let mut table = Table::new();
    table.set_header(vec!["Payee", "Amount", "Decision", "Tier", "Confidence"]);
    for (res, txn) in results.iter().zip(&txns) {
        match res {
            Ok(rec) => table.add_row(vec![
                Cell::new(&txn.payee),
                Cell::new(money(txn.amount)),
                Cell::new(rec.decision_summary()),
                Cell::new(rec.tier.map(|t| t.to_string()).unwrap_or_default()),
                Cell::new(rec.tier.map(|_| format!("{:.2}", rec.confidence)).unwrap_or_default()),
            ]),
            Err(e) => table.add_row(vec![
                Cell::new(&txn.payee),
                Cell::new(money(txn.amount)),
                Cell::new(format!("error: {e}")),
                Cell::new(""),
                Cell::new(""),
            ]),
        };
    }

    println!("Demo data loaded!");
    println!("  Rules seeded:      {rules_added}");
    println!(
        "  Split vendors:     {} (WEGMANS \u{2192} Groceries 80% / Household Goods 20%)",
        config.split_vendors.len()
    );
    println!("  Approvals seeded:  {approvals} ({HISTORY_PAYEE} \u{2192} Groceries)");
    println!();
    println!("Recommendations\n{table}");

    let learned = engine.store().len() - rules_before;
    if learned > 0 {
        println!(
            "Research wrote {learned} learned rule{} (now {} total). Re-run \
             `teller demo` and watch those payees resolve in the rules tier.",
            if learned == 1 { "" } else { "s" },
            engine.store().len()
        );
    }
    println!();
    println!("Try these next:");
    println!("  teller rules list");
    println!("  teller history show \"{HISTORY_PAYEE}\"");
    println!("  teller status");

    Ok(())
}
