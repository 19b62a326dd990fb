//! Tier 2: frequency analysis over the corpus of approved categorizations.
//! Only approvals ever enter the corpus, so the tier reflects confirmed
//! user behavior rather than engine guesses.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::models::{Decision, HistoricalMatch, Recommendation, Transaction};

/// How often one category was approved for a payee.
#[derive(Debug, Clone)]
pub struct CategoryCount {
    pub category_id: String,
    pub category_name: String,
    pub count: u32,
}

/// Source of per-payee approval counts. An `Err` means the source is
/// unavailable and the tier should be skipped, not treated as "no match".
pub trait HistorySource: Send + Sync {
    fn category_counts(&self, payee: &str) -> Result<Vec<CategoryCount>>;
}

impl<S: HistorySource + ?Sized> HistorySource for std::sync::Arc<S> {
    fn category_counts(&self, payee: &str) -> Result<Vec<CategoryCount>> {
        (**self).category_counts(payee)
    }
}

/// SQLite-backed corpus plus the decision audit log and import ledger.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    pub fn open(path: &Path) -> Result<SqliteHistory> {
        let conn = db::get_connection(path)?;
        db::init_db(&conn)?;
        Ok(SqliteHistory {
            conn: Mutex::new(conn),
        })
    }

    /// Record an approved categorization. Keyed on the transaction id, so
    /// re-approving the same transaction updates rather than double-counts.
    pub fn record(
        &self,
        txn: &Transaction,
        category_id: &str,
        category_name: &str,
        was_split: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO approved_transactions \
             (transaction_id, payee, category_id, category_name, amount, date, was_split) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                txn.id,
                txn.payee,
                category_id,
                category_name,
                txn.amount,
                txn.date.to_string(),
                was_split as i64,
            ],
        )?;
        Ok(())
    }

    /// Append one evaluation outcome to the decision log.
    pub fn record_decision(&self, rec: &Recommendation, payee: &str) -> Result<()> {
        let (category_id, category_name) = match &rec.decision {
            Decision::Single {
                category_id,
                category_name,
            } => (Some(category_id.as_str()), Some(category_name.as_str())),
            Decision::Split(alloc) => {
                let dominant = alloc
                    .lines
                    .iter()
                    .max_by(|a, b| {
                        a.percentage
                            .partial_cmp(&b.percentage)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|l| (l.category_id.as_str(), l.category_name.as_str()));
                match dominant {
                    Some((id, name)) => (Some(id), Some(name)),
                    None => (None, None),
                }
            }
            Decision::Skipped(_) | Decision::ManualReview => (None, None),
        };
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO decisions \
             (transaction_id, payee, category_id, category_name, tier, confidence, needs_review) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                rec.transaction_id,
                payee,
                category_id,
                category_name,
                rec.tier.map(|t| t.number() as i64),
                rec.confidence,
                rec.needs_manual_review as i64,
            ],
        )?;
        Ok(())
    }

    pub fn approved_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count = conn.query_row("SELECT count(*) FROM approved_transactions", [], |r| {
            r.get(0)
        })?;
        Ok(count)
    }

    pub fn decision_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count = conn.query_row("SELECT count(*) FROM decisions", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Filename of a prior import with this checksum, if any.
    pub fn find_import(&self, checksum: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let found = conn
            .query_row(
                "SELECT filename FROM imports WHERE checksum = ?1",
                [checksum],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn record_import(&self, filename: &str, record_count: i64, checksum: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO imports (filename, record_count, checksum) VALUES (?1, ?2, ?3)",
            rusqlite::params![filename, record_count, checksum],
        )?;
        Ok(())
    }

    /// Online backup of the corpus database.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut dst = Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
        backup.run_to_completion(64, std::time::Duration::from_millis(50), None)?;
        Ok(())
    }
}

impl HistorySource for SqliteHistory {
    fn category_counts(&self, payee: &str) -> Result<Vec<CategoryCount>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT category_id, MAX(category_name), count(*) AS n \
             FROM approved_transactions WHERE payee = ?1 \
             GROUP BY category_id ORDER BY n DESC, category_id",
        )?;
        let counts = stmt
            .query_map([payee], |row| {
                Ok(CategoryCount {
                    category_id: row.get(0)?,
                    category_name: row.get(1)?,
                    count: row.get::<_, i64>(2)? as u32,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

/// The reasoning sentence for a historical match.
pub fn describe(m: &HistoricalMatch) -> String {
    format!(
        "Based on {} previous transactions with \"{}\", {:.0}% were categorized as \"{}\"",
        m.total_count,
        m.payee,
        m.frequency * 100.0,
        m.category_name
    )
}

/// Applies the sample and frequency thresholds over a [`HistorySource`],
/// with a bounded per-payee cache in front of it.
pub struct HistoricalAnalyzer {
    source: Box<dyn HistorySource>,
    min_samples: u32,
    min_frequency: f64,
    cache: Mutex<HashMap<String, Option<HistoricalMatch>>>,
    cache_cap: usize,
}

impl HistoricalAnalyzer {
    pub fn new(
        source: Box<dyn HistorySource>,
        min_samples: u32,
        min_frequency: f64,
        cache_cap: usize,
    ) -> HistoricalAnalyzer {
        HistoricalAnalyzer {
            source,
            min_samples,
            min_frequency,
            cache: Mutex::new(HashMap::new()),
            cache_cap,
        }
    }

    /// The qualifying historical match for a payee, if the corpus has one.
    /// `Ok(None)` is a definitive miss; `Err` means the source failed and
    /// the verdict (none) is not cached.
    pub fn analyze(&self, payee: &str) -> Result<Option<HistoricalMatch>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(payee) {
                return Ok(hit.clone());
            }
        }

        let counts = self.source.category_counts(payee)?;
        let total: u32 = counts.iter().map(|c| c.count).sum();
        let verdict = counts.first().and_then(|top| {
            if total < self.min_samples {
                return None;
            }
            let frequency = top.count as f64 / total as f64;
            if frequency < self.min_frequency {
                return None;
            }
            Some(HistoricalMatch {
                payee: payee.to_string(),
                category_id: top.category_id.clone(),
                category_name: top.category_name.clone(),
                match_count: top.count,
                total_count: total,
                frequency,
            })
        });

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.cache_cap {
            // Crude but bounded: flush rather than track recency.
            cache.clear();
        }
        cache.insert(payee.to_string(), verdict.clone());
        Ok(verdict)
    }

    /// Drop the cached verdict for a payee after its corpus rows change.
    pub fn invalidate(&self, payee: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(payee);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TellerError;
    use chrono::NaiveDate;

    fn txn(id: &str, payee: &str, amount: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            payee: payee.to_string(),
            amount,
            memo: None,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            transfer_account_id: None,
        }
    }

    fn test_history() -> (tempfile::TempDir, SqliteHistory) {
        let dir = tempfile::tempdir().unwrap();
        let history = SqliteHistory::open(&dir.path().join("test.db")).unwrap();
        (dir, history)
    }

    fn seed(history: &SqliteHistory, payee: &str, category: &str, n: usize, id_base: &str) {
        for i in 0..n {
            history
                .record(
                    &txn(&format!("{id_base}-{i}"), payee, -4500),
                    &format!("cat-{}", category.to_lowercase().replace(' ', "-")),
                    category,
                    false,
                )
                .unwrap();
        }
    }

    fn analyzer(history: SqliteHistory) -> HistoricalAnalyzer {
        HistoricalAnalyzer::new(Box::new(history), 3, 0.80, 64)
    }

    #[test]
    fn test_category_counts_aggregate_by_payee() {
        let (_dir, history) = test_history();
        seed(&history, "STARBUCKS", "Coffee Shops", 4, "a");
        seed(&history, "STARBUCKS", "Dining Out", 1, "b");
        seed(&history, "NETFLIX", "Streaming", 2, "c");

        let counts = history.category_counts("STARBUCKS").unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].category_name, "Coffee Shops");
        assert_eq!(counts[0].count, 4);
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn test_reapproval_does_not_double_count() {
        let (_dir, history) = test_history();
        let t = txn("same-id", "STARBUCKS", -4500);
        history.record(&t, "cat-a", "Coffee Shops", false).unwrap();
        history.record(&t, "cat-b", "Dining Out", false).unwrap();

        let counts = history.category_counts("STARBUCKS").unwrap();
        let total: u32 = counts.iter().map(|c| c.count).sum();
        assert_eq!(total, 1);
        assert_eq!(counts[0].category_name, "Dining Out");
    }

    #[test]
    fn test_too_few_samples_is_a_miss() {
        let (_dir, history) = test_history();
        seed(&history, "NEW CAFE", "Coffee Shops", 2, "a");
        let analyzer = analyzer(history);
        assert!(analyzer.analyze("NEW CAFE").unwrap().is_none());
    }

    #[test]
    fn test_unanimous_history_matches() {
        let (_dir, history) = test_history();
        seed(&history, "STARBUCKS", "Coffee Shops", 3, "a");
        let analyzer = analyzer(history);
        let m = analyzer.analyze("STARBUCKS").unwrap().expect("match");
        assert_eq!(m.category_name, "Coffee Shops");
        assert_eq!(m.total_count, 3);
        assert_eq!(m.frequency, 1.0);
    }

    #[test]
    fn test_dominant_frequency_at_threshold_matches() {
        let (_dir, history) = test_history();
        seed(&history, "COSTCO", "Groceries", 4, "a");
        seed(&history, "COSTCO", "Household", 1, "b");
        let analyzer = analyzer(history);
        let m = analyzer.analyze("COSTCO").unwrap().expect("match");
        assert_eq!(m.frequency, 0.8);
        assert_eq!(m.match_count, 4);
        assert_eq!(m.total_count, 5);
    }

    #[test]
    fn test_scattered_history_is_a_miss() {
        let (_dir, history) = test_history();
        seed(&history, "AMAZON", "Shopping", 3, "a");
        seed(&history, "AMAZON", "Groceries", 2, "b");
        seed(&history, "AMAZON", "Gifts", 1, "c");
        let analyzer = analyzer(history);
        assert!(analyzer.analyze("AMAZON").unwrap().is_none());
    }

    #[test]
    fn test_payee_match_is_exact() {
        let (_dir, history) = test_history();
        seed(&history, "STARBUCKS", "Coffee Shops", 5, "a");
        let analyzer = analyzer(history);
        assert!(analyzer.analyze("STARBUCKS COFFEE").unwrap().is_none());
    }

    #[test]
    fn test_cache_serves_stale_until_invalidated() {
        let (_dir, history) = test_history();
        seed(&history, "STARBUCKS", "Coffee Shops", 3, "a");
        let analyzer = HistoricalAnalyzer::new(
            Box::new(SqliteHistory::open(&_dir.path().join("test.db")).unwrap()),
            3,
            0.80,
            64,
        );

        assert!(analyzer.analyze("STARBUCKS").unwrap().is_some());
        // New rows land behind the cache.
        seed(&history, "STARBUCKS", "Dining Out", 3, "b");
        let cached = analyzer.analyze("STARBUCKS").unwrap().expect("cached");
        assert_eq!(cached.total_count, 3);

        analyzer.invalidate("STARBUCKS");
        let fresh = analyzer.analyze("STARBUCKS").unwrap();
        // 3 of 6 is below the frequency floor now.
        assert!(fresh.is_none());
    }

    #[test]
    fn test_source_error_propagates_uncached() {
        struct Failing;
        impl HistorySource for Failing {
            fn category_counts(&self, _payee: &str) -> Result<Vec<CategoryCount>> {
                Err(TellerError::Other("corpus offline".to_string()))
            }
        }
        let analyzer = HistoricalAnalyzer::new(Box::new(Failing), 3, 0.80, 64);
        assert!(analyzer.analyze("ANY").is_err());
        assert!(analyzer.analyze("ANY").is_err());
    }

    #[test]
    fn test_describe_reasoning_sentence() {
        let m = HistoricalMatch {
            payee: "Starbucks Coffee".to_string(),
            category_id: "cat-coffee".to_string(),
            category_name: "Coffee Shops".to_string(),
            match_count: 45,
            total_count: 47,
            frequency: 45.0 / 47.0,
        };
        assert_eq!(
            describe(&m),
            "Based on 47 previous transactions with \"Starbucks Coffee\", 96% were categorized as \"Coffee Shops\""
        );
    }

    #[test]
    fn test_decision_log_records_outcomes() {
        let (_dir, history) = test_history();
        let rec = Recommendation {
            transaction_id: "t-1".to_string(),
            decision: Decision::Single {
                category_id: "cat-coffee".to_string(),
                category_name: "Coffee Shops".to_string(),
            },
            confidence: 0.95,
            tier: Some(crate::models::Tier::Rules),
            reasoning: "rule match".to_string(),
            timestamp: chrono::Utc::now(),
            needs_manual_review: false,
            warnings: vec![],
        };
        history.record_decision(&rec, "STARBUCKS").unwrap();
        assert_eq!(history.decision_count().unwrap(), 1);
    }
}
