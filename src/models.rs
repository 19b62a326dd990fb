use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A transaction awaiting categorization. Amounts are integer milliunits
/// (1/1000 of a currency unit), negative for outflows.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub payee: String,
    pub amount: i64,
    pub memo: Option<String>,
    pub date: NaiveDate,
    pub transfer_account_id: Option<String>,
}

impl Transaction {
    pub fn is_transfer(&self) -> bool {
        self.transfer_account_id.is_some()
    }
}

/// One row of the caller-supplied category catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Prefix,
    Contains,
    Regex,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::Prefix => "prefix",
            MatchStrategy::Contains => "contains",
            MatchStrategy::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(MatchStrategy::Exact),
            "prefix" | "starts_with" => Ok(MatchStrategy::Prefix),
            "contains" => Ok(MatchStrategy::Contains),
            "regex" => Ok(MatchStrategy::Regex),
            other => Err(format!("unknown match strategy: {other}")),
        }
    }
}

/// Where a rule came from. Corrections outrank learned rules when priorities
/// are assigned, but matching itself only looks at strategy and priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Initial,
    Learned,
    UserCorrection,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Initial => "initial",
            Provenance::Learned => "learned",
            Provenance::UserCorrection => "user_correction",
        }
    }
}

/// One requested slice of a split, as stored on a rule or passed to the
/// allocator. Percentages are 0..=100, not fractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitInput {
    pub category_id: String,
    pub category_name: String,
    pub percentage: f64,
    #[serde(default)]
    pub memo: Option<String>,
}

/// A rule resolves to exactly one category or to a split, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    Category { id: String, name: String },
    Split(Vec<SplitInput>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    pub strategy: MatchStrategy,
    pub target: RuleTarget,
    /// Advisory only. Match confidence comes from the strategy, not this.
    pub confidence: f64,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl Rule {
    pub fn is_split(&self) -> bool {
        matches!(self.target, RuleTarget::Split(_))
    }

    /// Short human label for table output.
    pub fn target_summary(&self) -> String {
        match &self.target {
            RuleTarget::Category { name, .. } => name.clone(),
            RuleTarget::Split(parts) => {
                let body = parts
                    .iter()
                    .map(|p| format!("{} {:.1}%", p.category_name, p.percentage))
                    .collect::<Vec<_>>()
                    .join(" / ");
                format!("split: {body}")
            }
        }
    }
}

/// Aggregated historical evidence for one payee. Only produced when the
/// sample and frequency thresholds are met.
#[derive(Debug, Clone)]
pub struct HistoricalMatch {
    pub payee: String,
    pub category_id: String,
    pub category_name: String,
    pub match_count: u32,
    pub total_count: u32,
    pub frequency: f64,
}

/// Evidence tiers in precedence order. A lower tier number always outranks
/// a higher one regardless of numeric confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Rules,
    History,
    Research,
}

impl Tier {
    pub fn number(&self) -> u8 {
        match self {
            Tier::Rules => 1,
            Tier::History => 2,
            Tier::Research => 3,
        }
    }

    pub fn outranks(&self, other: Tier) -> bool {
        self.number() < other.number()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Rules => write!(f, "rules"),
            Tier::History => write!(f, "history"),
            Tier::Research => write!(f, "research"),
        }
    }
}

/// One line of a resolved split: the adjusted percentage plus the exact
/// milliunit amount it received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitLine {
    pub category_id: String,
    pub category_name: String,
    pub percentage: f64,
    pub amount: i64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitAllocation {
    pub lines: Vec<SplitLine>,
    /// True when the requested percentages were redistributed to reach 100.
    pub normalized: bool,
}

impl SplitAllocation {
    pub fn total(&self) -> i64 {
        self.lines.iter().map(|l| l.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Transfer,
    ZeroAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Single {
        category_id: String,
        category_name: String,
    },
    Split(SplitAllocation),
    Skipped(SkipReason),
    ManualReview,
}

/// The outcome of evaluating one transaction. Built once, never mutated
/// after return.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub transaction_id: String,
    pub decision: Decision,
    pub confidence: f64,
    pub tier: Option<Tier>,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    pub needs_manual_review: bool,
    pub warnings: Vec<String>,
}

impl Recommendation {
    /// Category names involved in the decision, for table output.
    pub fn decision_summary(&self) -> String {
        match &self.decision {
            Decision::Single { category_name, .. } => category_name.clone(),
            Decision::Split(alloc) => {
                let body = alloc
                    .lines
                    .iter()
                    .map(|l| format!("{} {:.1}%", l.category_name, l.percentage))
                    .collect::<Vec<_>>()
                    .join(" / ");
                format!("split: {body}")
            }
            Decision::Skipped(SkipReason::Transfer) => "skipped (transfer)".to_string(),
            Decision::Skipped(SkipReason::ZeroAmount) => "skipped (zero amount)".to_string(),
            Decision::ManualReview => "needs manual review".to_string(),
        }
    }
}
