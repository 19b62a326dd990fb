//! The decision orchestrator. Walks the evidence tiers in strict order,
//! records every outcome to the decision log, and owns the approval write
//! path that feeds the corpus and the learned rules back into tier 1.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{Result, TellerError};
use crate::history::{self, HistoricalAnalyzer, HistorySource, SqliteHistory};
use crate::matcher;
use crate::models::{
    Category, Decision, MatchStrategy, Provenance, Recommendation, Rule, RuleTarget, SkipReason,
    SplitInput, Tier, Transaction,
};
use crate::research::{self, ResearchProvider, ResearchTarget};
use crate::scoring;
use crate::settings::{self, EngineConfig};
use crate::split;
use crate::store::{Recovery, RuleStore};

/// Priority given to rules learned from a successful research hit.
const LEARNED_PRIORITY: u8 = 50;
/// Default priority for a correction rule when no rule matched the payee.
const CORRECTION_PRIORITY: u8 = 90;
/// How far a correction outranks the best rule it overrides.
const CORRECTION_STEP: u8 = 10;

const MAX_WORKERS: usize = 64;

/// Where one evaluation stands in the tier chain. Terminal outcomes leave
/// the loop through a built [`Recommendation`]; these states only record
/// which tiers have already declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalState {
    Uncategorized,
    Tier1Evaluated,
    Tier2Evaluated,
    Tier3Evaluated,
}

/// What a tier hands back when it reaches a verdict. `None` from a tier
/// means "no evidence here, ask the next one".
enum TierOutcome {
    Decided {
        decision: Decision,
        confidence: f64,
        tier: Tier,
        reasoning: String,
    },
    NeedsReview {
        reasoning: String,
    },
}

pub struct Engine {
    store: RuleStore,
    corpus: Arc<SqliteHistory>,
    analyzer: HistoricalAnalyzer,
    provider: Box<dyn ResearchProvider>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: RuleStore,
        corpus: SqliteHistory,
        provider: Box<dyn ResearchProvider>,
        config: EngineConfig,
    ) -> Engine {
        let corpus = Arc::new(corpus);
        let source: Box<dyn HistorySource> = Box::new(corpus.clone());
        Engine::with_source(store, corpus, source, provider, config)
    }

    /// Build with a custom history source instead of reading the corpus
    /// database back. The corpus still receives approvals and the
    /// decision log.
    pub fn with_source(
        store: RuleStore,
        corpus: Arc<SqliteHistory>,
        source: Box<dyn HistorySource>,
        provider: Box<dyn ResearchProvider>,
        config: EngineConfig,
    ) -> Engine {
        let analyzer = HistoricalAnalyzer::new(
            source,
            config.min_samples,
            config.min_history_frequency,
            config.history_cache_size,
        );
        Engine {
            store,
            corpus,
            analyzer,
            provider,
            config,
        }
    }

    /// Open the standard layout under a data directory: `rules.json`,
    /// `teller.db` and `config.json`.
    pub fn open(data_dir: &Path, provider: Box<dyn ResearchProvider>) -> Result<Engine> {
        let config = settings::load_config(data_dir);
        let store = RuleStore::open(&data_dir.join("rules.json"), config.lock_timeout())?;
        let corpus = SqliteHistory::open(&data_dir.join("teller.db"))?;
        Ok(Engine::new(store, corpus, provider, config))
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn corpus(&self) -> &SqliteHistory {
        &self.corpus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate one transaction against the catalog. Every outcome,
    /// including skips and manual-review verdicts, lands in the decision
    /// log; a log write failure never fails the evaluation itself.
    pub fn evaluate(&self, txn: &Transaction, catalog: &[Category]) -> Result<Recommendation> {
        let rec = self.evaluate_inner(txn, catalog)?;
        if let Err(err) = self.corpus.record_decision(&rec, &txn.payee) {
            log::warn!("decision log write failed for {}: {err}", txn.id);
        }
        Ok(rec)
    }

    fn evaluate_inner(&self, txn: &Transaction, catalog: &[Category]) -> Result<Recommendation> {
        validate_input(txn, catalog)?;

        let mut warnings = Vec::new();
        match self.store.recovery() {
            Recovery::Clean => {}
            Recovery::FromBackup => warnings.push(
                "rule store was restored from its backup; recently added rules may be missing"
                    .to_string(),
            ),
            Recovery::Reinitialized => warnings.push(
                "rule store was rebuilt after corruption; explicit rules are unavailable"
                    .to_string(),
            ),
        }

        if txn.is_transfer() {
            return Ok(self.build(
                txn,
                Decision::Skipped(SkipReason::Transfer),
                1.0,
                None,
                format!(
                    "Transfer to another account ({}); transfers are not categorized",
                    txn.transfer_account_id.as_deref().unwrap_or("unknown")
                ),
                warnings,
            ));
        }
        if txn.amount == 0 {
            return Ok(self.build(
                txn,
                Decision::Skipped(SkipReason::ZeroAmount),
                1.0,
                None,
                "Zero-amount transaction; nothing to categorize".to_string(),
                warnings,
            ));
        }

        let mut state = EvalState::Uncategorized;
        loop {
            let (outcome, next) = match state {
                EvalState::Uncategorized => {
                    (self.tier_rules(txn, catalog, &mut warnings)?, EvalState::Tier1Evaluated)
                }
                EvalState::Tier1Evaluated => {
                    (self.tier_history(txn, catalog, &mut warnings)?, EvalState::Tier2Evaluated)
                }
                EvalState::Tier2Evaluated => {
                    (self.tier_research(txn, catalog, &mut warnings)?, EvalState::Tier3Evaluated)
                }
                EvalState::Tier3Evaluated => {
                    let reasoning = format!(
                        "No rule matched \"{}\", history has no qualifying pattern, and \
                         research produced nothing usable",
                        txn.payee
                    );
                    (Some(TierOutcome::NeedsReview { reasoning }), EvalState::Tier3Evaluated)
                }
            };

            match outcome {
                Some(TierOutcome::Decided {
                    decision,
                    confidence,
                    tier,
                    reasoning,
                }) => {
                    log::debug!(
                        "{} decided by {tier} tier at {confidence:.2}",
                        txn.id
                    );
                    return Ok(self.build(txn, decision, confidence, Some(tier), reasoning, warnings))
                }
                Some(TierOutcome::NeedsReview { reasoning }) => {
                    log::debug!("{} routed to manual review", txn.id);
                    return Ok(self.build(txn, Decision::ManualReview, 0.0, None, reasoning, warnings))
                }
                None => state = next,
            }
        }
    }

    fn tier_rules(
        &self,
        txn: &Transaction,
        catalog: &[Category],
        warnings: &mut Vec<String>,
    ) -> Result<Option<TierOutcome>> {
        let rules = self.store.rules();
        let Some(rule) = matcher::match_rule(&txn.payee, &rules) else {
            return Ok(None);
        };
        let confidence = scoring::rule_confidence(rule.strategy);

        match &rule.target {
            RuleTarget::Category { id, name } => {
                if !catalog_has(catalog, id) {
                    warnings.push(format!(
                        "rule \"{}\" targets category \"{name}\" which is not in the catalog; rule ignored",
                        rule.pattern
                    ));
                    return Ok(None);
                }
                Ok(Some(TierOutcome::Decided {
                    decision: Decision::Single {
                        category_id: id.clone(),
                        category_name: name.clone(),
                    },
                    confidence,
                    tier: Tier::Rules,
                    reasoning: format!(
                        "Rule match: {} pattern \"{}\" applies to payee \"{}\"",
                        rule.strategy, rule.pattern, txn.payee
                    ),
                }))
            }
            RuleTarget::Split(parts) => {
                if let Some(part) = parts.iter().find(|p| !catalog_has(catalog, &p.category_id)) {
                    warnings.push(format!(
                        "split rule \"{}\" targets category \"{}\" which is not in the catalog; rule ignored",
                        rule.pattern, part.category_name
                    ));
                    return Ok(None);
                }
                match split::allocate(txn.amount, parts) {
                    Ok(alloc) => Ok(Some(TierOutcome::Decided {
                        decision: Decision::Split(alloc),
                        confidence,
                        tier: Tier::Rules,
                        reasoning: format!(
                            "Split rule: {} pattern \"{}\" divides \"{}\" across {} categories",
                            rule.strategy,
                            rule.pattern,
                            txn.payee,
                            parts.len()
                        ),
                    })),
                    Err(err) => Ok(Some(TierOutcome::NeedsReview {
                        reasoning: format!(
                            "Split rule \"{}\" matched but its allocation is invalid: {err}",
                            rule.pattern
                        ),
                    })),
                }
            }
        }
    }

    fn tier_history(
        &self,
        txn: &Transaction,
        catalog: &[Category],
        warnings: &mut Vec<String>,
    ) -> Result<Option<TierOutcome>> {
        let verdict = match self.analyzer.analyze(&txn.payee) {
            Ok(v) => v,
            Err(err) => {
                warnings.push(format!("historical corpus unavailable ({err}); tier skipped"));
                return Ok(None);
            }
        };
        let Some(m) = verdict else {
            return Ok(None);
        };
        if !catalog_has(catalog, &m.category_id) {
            warnings.push(format!(
                "historical pattern for \"{}\" points at category \"{}\" which is not in the catalog; tier skipped",
                txn.payee, m.category_name
            ));
            return Ok(None);
        }
        Ok(Some(TierOutcome::Decided {
            decision: Decision::Single {
                category_id: m.category_id.clone(),
                category_name: m.category_name.clone(),
            },
            confidence: scoring::history_confidence(m.frequency),
            tier: Tier::History,
            reasoning: history::describe(&m),
        }))
    }

    fn tier_research(
        &self,
        txn: &Transaction,
        catalog: &[Category],
        warnings: &mut Vec<String>,
    ) -> Result<Option<TierOutcome>> {
        let outcome = match research::investigate(
            self.provider.as_ref(),
            &txn.payee,
            catalog,
            &self.config.split_vendors,
        ) {
            Ok(o) => o,
            Err(err) => {
                warnings.push(format!("research failed ({err})"));
                return Ok(None);
            }
        };
        let Some(result) = outcome else {
            return Ok(None);
        };
        let confidence = scoring::research_confidence(result.clarity);

        match result.target {
            ResearchTarget::Single {
                category_id,
                category_name,
            } => {
                let target = RuleTarget::Category {
                    id: category_id.clone(),
                    name: category_name.clone(),
                };
                self.learn_rule(txn, target, confidence, warnings);
                Ok(Some(TierOutcome::Decided {
                    decision: Decision::Single {
                        category_id,
                        category_name: category_name.clone(),
                    },
                    confidence,
                    tier: Tier::Research,
                    reasoning: format!("{} Mapped to \"{category_name}\"", result.summary),
                }))
            }
            ResearchTarget::Split(parts) => match split::allocate(txn.amount, &parts) {
                Ok(alloc) => {
                    self.learn_rule(txn, RuleTarget::Split(parts.clone()), confidence, warnings);
                    Ok(Some(TierOutcome::Decided {
                        decision: Decision::Split(alloc),
                        confidence,
                        tier: Tier::Research,
                        reasoning: format!(
                            "{} Amount divided across {} categories",
                            result.summary,
                            parts.len()
                        ),
                    }))
                }
                Err(err) => Ok(Some(TierOutcome::NeedsReview {
                    reasoning: format!(
                        "Research proposed a split for \"{}\" but its allocation is invalid: {err}",
                        txn.payee
                    ),
                })),
            },
        }
    }

    /// Queue an exact rule so the next evaluation of this payee resolves
    /// in tier 1. A write failure here downgrades to a warning; the
    /// evaluation already has its answer.
    fn learn_rule(
        &self,
        txn: &Transaction,
        target: RuleTarget,
        confidence: f64,
        warnings: &mut Vec<String>,
    ) {
        let rule = Rule {
            pattern: matcher::normalize_payee(&txn.payee),
            strategy: MatchStrategy::Exact,
            target,
            confidence,
            priority: LEARNED_PRIORITY,
            created_at: Utc::now(),
            provenance: Provenance::Learned,
        };
        match self.store.append(rule) {
            Ok(()) => log::debug!("learned exact rule for \"{}\"", txn.payee),
            Err(err) => {
                log::warn!("could not persist learned rule for \"{}\": {err}", txn.payee);
                warnings.push(format!("learned rule was not persisted ({err})"));
            }
        }
    }

    /// Evaluate a batch over a small worker pool. Results come back in
    /// input order and one failed transaction never poisons the rest.
    pub fn evaluate_batch(
        &self,
        txns: &[Transaction],
        catalog: &[Category],
        workers: usize,
    ) -> Vec<Result<Recommendation>> {
        let workers = workers.clamp(1, MAX_WORKERS).min(txns.len().max(1));
        let cursor = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<Result<Recommendation>>>> =
            txns.iter().map(|_| Mutex::new(None)).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    if idx >= txns.len() {
                        break;
                    }
                    let out = self.evaluate(&txns[idx], catalog);
                    *slots[idx].lock().unwrap_or_else(|e| e.into_inner()) = Some(out);
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .unwrap_or_else(|e| e.into_inner())
                    .unwrap_or_else(|| {
                        Err(TellerError::Other("worker never reached this slot".to_string()))
                    })
            })
            .collect()
    }

    /// Record an approved single-category assignment. Feeds the corpus,
    /// drops the payee's cached verdict, and when the user changed the
    /// category, writes a correction rule that outranks whatever matched.
    pub fn record_approval(
        &self,
        txn: &Transaction,
        category_id: &str,
        category_name: &str,
        was_modified: bool,
    ) -> Result<()> {
        validate_approval(txn)?;
        self.corpus.record(txn, category_id, category_name, false)?;
        self.analyzer.invalidate(&txn.payee);
        if was_modified {
            self.learn_correction(
                txn,
                RuleTarget::Category {
                    id: category_id.to_string(),
                    name: category_name.to_string(),
                },
            )?;
        }
        Ok(())
    }

    /// Record an approved split. The dominant line (largest percentage)
    /// represents the transaction in the corpus.
    pub fn record_split_approval(
        &self,
        txn: &Transaction,
        parts: &[SplitInput],
        was_modified: bool,
    ) -> Result<()> {
        validate_approval(txn)?;
        split::validate_parts(parts)?;
        let dominant = parts
            .iter()
            .max_by(|a, b| {
                a.percentage
                    .partial_cmp(&b.percentage)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| TellerError::InvalidSplit("split has no lines".to_string()))?;
        self.corpus
            .record(txn, &dominant.category_id, &dominant.category_name, true)?;
        self.analyzer.invalidate(&txn.payee);
        if was_modified {
            self.learn_correction(txn, RuleTarget::Split(parts.to_vec()))?;
        }
        Ok(())
    }

    /// A correction must win the next match for this payee, so it takes
    /// the highest priority among the rules that currently match, plus a
    /// step, capped at 100.
    fn learn_correction(&self, txn: &Transaction, target: RuleTarget) -> Result<()> {
        let priority = self
            .store
            .get(&txn.payee)
            .iter()
            .map(|r| r.priority)
            .max()
            .map(|p| p.saturating_add(CORRECTION_STEP).min(100))
            .unwrap_or(CORRECTION_PRIORITY);
        self.store.append(Rule {
            pattern: matcher::normalize_payee(&txn.payee),
            strategy: MatchStrategy::Exact,
            target,
            confidence: 1.0,
            priority,
            created_at: Utc::now(),
            provenance: Provenance::UserCorrection,
        })
    }

    fn build(
        &self,
        txn: &Transaction,
        decision: Decision,
        confidence: f64,
        tier: Option<Tier>,
        reasoning: String,
        warnings: Vec<String>,
    ) -> Recommendation {
        let needs_manual_review = matches!(decision, Decision::ManualReview);
        Recommendation {
            transaction_id: txn.id.clone(),
            decision,
            confidence,
            tier,
            reasoning,
            timestamp: Utc::now(),
            needs_manual_review,
            warnings,
        }
    }
}

fn validate_input(txn: &Transaction, catalog: &[Category]) -> Result<()> {
    if txn.id.trim().is_empty() {
        return Err(TellerError::InvalidTransaction(
            "transaction has no id".to_string(),
        ));
    }
    if txn.payee.trim().is_empty() {
        return Err(TellerError::InvalidTransaction(format!(
            "transaction {} has no payee",
            txn.id
        )));
    }
    if catalog.is_empty() {
        return Err(TellerError::InvalidCatalog(
            "category catalog is empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_approval(txn: &Transaction) -> Result<()> {
    if txn.id.trim().is_empty() {
        return Err(TellerError::InvalidTransaction(
            "transaction has no id".to_string(),
        ));
    }
    if txn.payee.trim().is_empty() {
        return Err(TellerError::InvalidTransaction(format!(
            "transaction {} has no payee",
            txn.id
        )));
    }
    if txn.amount == 0 {
        return Err(TellerError::InvalidTransaction(
            "zero-amount transactions are excluded from the corpus".to_string(),
        ));
    }
    Ok(())
}

fn catalog_has(catalog: &[Category], id: &str) -> bool {
    catalog.iter().any(|c| c.id == id)
}
