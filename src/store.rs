//! The explicit rule store: a versioned JSON file mutated append-mostly
//! under an exclusive lock, swapped atomically, and recovered from backup
//! or reinitialized when corrupt. Readers only ever see a complete file.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TellerError};
use crate::matcher;
use crate::models::{MatchStrategy, Rule, RuleTarget};
use crate::split;

pub const STORE_VERSION: u32 = 1;

const LOCK_RETRY: Duration = Duration::from_millis(100);
// A lock file this old belongs to a dead writer and is safe to break.
const STALE_LOCK: Duration = Duration::from_secs(60);

/// How the store came up at open time. Anything but `Clean` means Tier 1
/// is running on less than the full rule set and evaluations should say so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Clean,
    FromBackup,
    Reinitialized,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    updated_at: DateTime<Utc>,
    rules: Vec<Rule>,
}

struct StoreState {
    rules: Vec<Rule>,
    updated_at: DateTime<Utc>,
}

pub struct RuleStore {
    path: PathBuf,
    lock_timeout: Duration,
    state: RwLock<StoreState>,
    write_mutex: Mutex<()>,
    recovery: Recovery,
}

impl RuleStore {
    /// Open (or create) the store at `path`. A missing file is a first run
    /// and gets an empty template; an unreadable one goes through the
    /// backup-then-reinitialize recovery chain instead of failing.
    pub fn open(path: &Path, lock_timeout: Duration) -> Result<RuleStore> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (file, recovery) = if path.exists() {
            Self::load_or_recover(path)?
        } else {
            let file = StoreFile {
                version: STORE_VERSION,
                updated_at: Utc::now(),
                rules: Vec::new(),
            };
            write_atomic(path, &file)?;
            (file, Recovery::Clean)
        };

        Ok(RuleStore {
            path: path.to_path_buf(),
            lock_timeout,
            state: RwLock::new(StoreState {
                rules: file.rules,
                updated_at: file.updated_at,
            }),
            write_mutex: Mutex::new(()),
            recovery,
        })
    }

    fn load_or_recover(path: &Path) -> Result<(StoreFile, Recovery)> {
        let main_err = match read_and_validate(path) {
            Ok(file) => return Ok((file, Recovery::Clean)),
            Err(err) => err,
        };

        log::warn!(
            "rule store {} is unreadable ({main_err}), trying backup",
            path.display()
        );
        quarantine(path)?;

        let backup = sibling(path, "bak");
        if backup.exists() {
            match read_and_validate(&backup) {
                Ok(file) => {
                    write_atomic(path, &file)?;
                    log::warn!("rule store restored from {}", backup.display());
                    return Ok((file, Recovery::FromBackup));
                }
                Err(err) => {
                    log::warn!("rule store backup also unreadable ({err})");
                    quarantine(&backup)?;
                }
            }
        }

        let file = StoreFile {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            rules: Vec::new(),
        };
        write_atomic(path, &file)?;
        log::warn!("rule store reinitialized empty at {}", path.display());
        Ok((file, Recovery::Reinitialized))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recovery(&self) -> Recovery {
        self.recovery
    }

    /// Snapshot of the current rule set, ordered as stored.
    pub fn rules(&self) -> Vec<Rule> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.rules.clone()
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.updated_at
    }

    /// All rules whose pattern matches the payee, in stored order. This is
    /// the candidate set, not the winner; selection lives in the matcher.
    pub fn get(&self, payee: &str) -> Vec<Rule> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .rules
            .iter()
            .filter(|r| matcher::rule_matches(payee, r))
            .cloned()
            .collect()
    }

    /// Validate and append one rule under the write protocol.
    pub fn append(&self, rule: Rule) -> Result<()> {
        validate_rule(&rule)?;
        self.mutate(move |rules| {
            rules.push(rule);
            Ok(())
        })
    }

    /// Remove the rule at `index` (as listed). Removal is always an
    /// explicit caller operation; nothing in the engine calls this.
    pub fn remove_at(&self, index: usize) -> Result<Rule> {
        self.mutate(move |rules| {
            if index >= rules.len() {
                return Err(TellerError::InvalidRule(format!(
                    "no rule at index {index}"
                )));
            }
            Ok(rules.remove(index))
        })
    }

    /// Re-read the file into the in-memory snapshot.
    pub fn reload(&self) -> Result<()> {
        let file = read_and_validate(&self.path)?;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.rules = file.rules;
        state.updated_at = file.updated_at;
        Ok(())
    }

    // Shared mutation protocol: in-process serialization, cross-process
    // lock file with bounded wait, re-read of the on-disk truth, atomic
    // temp-file swap, then backup of the prior bytes.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Rule>) -> Result<R>) -> Result<R> {
        let _guard = self.write_mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _lock = FileLock::acquire(&sibling(&self.path, "lock"), self.lock_timeout)?;

        let prior_bytes = fs::read(&self.path).ok();
        let mut rules = match read_and_validate(&self.path) {
            Ok(file) => file.rules,
            Err(err) => {
                // Another writer may have left the file unreadable; fall
                // back to our snapshot rather than abort the mutation.
                log::warn!("re-reading rule store failed ({err}), using in-memory snapshot");
                self.rules()
            }
        };

        let out = f(&mut rules)?;

        let file = StoreFile {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            rules,
        };
        write_atomic(&self.path, &file)?;
        if let Some(bytes) = prior_bytes {
            fs::write(sibling(&self.path, "bak"), bytes)?;
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.rules = file.rules;
        state.updated_at = file.updated_at;
        Ok(out)
    }
}

/// Full structural validation for one rule. Applied on append and to every
/// rule of a loaded file, so an invalid stored rule counts as corruption.
pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.pattern.trim().is_empty() {
        return Err(TellerError::InvalidRule("empty pattern".to_string()));
    }
    if rule.priority > 100 {
        return Err(TellerError::InvalidRule(format!(
            "priority {} is above 100",
            rule.priority
        )));
    }
    if !(0.0..=1.0).contains(&rule.confidence) {
        return Err(TellerError::InvalidRule(format!(
            "confidence {} outside 0..=1",
            rule.confidence
        )));
    }
    if rule.strategy == MatchStrategy::Regex {
        regex::Regex::new(&rule.pattern)
            .map_err(|e| TellerError::InvalidRule(format!("regex does not compile: {e}")))?;
    }
    match &rule.target {
        RuleTarget::Category { id, name } => {
            if id.trim().is_empty() || name.trim().is_empty() {
                return Err(TellerError::InvalidRule(
                    "category target needs id and name".to_string(),
                ));
            }
        }
        RuleTarget::Split(parts) => {
            split::validate_parts(parts)?;
        }
    }
    Ok(())
}

fn read_and_validate(path: &Path) -> Result<StoreFile> {
    let raw = fs::read_to_string(path)?;
    let file: StoreFile = serde_json::from_str(&raw)?;
    if file.version != STORE_VERSION {
        return Err(TellerError::Store(format!(
            "unsupported store version {}",
            file.version
        )));
    }
    for rule in &file.rules {
        validate_rule(rule)?;
    }
    Ok(file)
}

fn write_atomic(path: &Path, file: &StoreFile) -> Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    let tmp = sibling(path, &format!("tmp.{}", std::process::id()));
    fs::write(&tmp, json.as_bytes())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{suffix}", path.display()))
}

fn quarantine(path: &Path) -> Result<()> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let target = sibling(path, &format!("corrupt-{stamp}"));
    fs::rename(path, &target)?;
    log::warn!("quarantined {} as {}", path.display(), target.display());
    Ok(())
}

struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path, timeout: Duration) -> Result<FileLock> {
        let deadline = Instant::now() + timeout;
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(FileLock {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path) {
                        log::warn!("breaking stale rule store lock at {}", path.display());
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(TellerError::StoreLocked);
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .map(|age| age > STALE_LOCK)
        .unwrap_or(false)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("rules.json")
    }

    fn category_rule(pattern: &str, name: &str) -> Rule {
        Rule {
            pattern: pattern.to_string(),
            strategy: MatchStrategy::Exact,
            target: RuleTarget::Category {
                id: format!("cat-{}", name.to_lowercase()),
                name: name.to_string(),
            },
            confidence: 1.0,
            priority: 50,
            created_at: Utc::now(),
            provenance: Provenance::Initial,
        }
    }

    fn open(dir: &tempfile::TempDir) -> RuleStore {
        RuleStore::open(&store_path(dir), Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_open_creates_versioned_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        assert_eq!(store.recovery(), Recovery::Clean);
        assert!(store.is_empty());
        let raw = fs::read_to_string(store_path(&dir)).unwrap();
        assert!(raw.contains("\"version\": 1"));
    }

    #[test]
    fn test_append_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.append(category_rule("starbucks", "Coffee")).unwrap();
            store.append(category_rule("netflix", "Streaming")).unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.len(), 2);
        assert_eq!(store.rules()[0].pattern, "starbucks");
    }

    #[test]
    fn test_append_writes_backup_of_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.append(category_rule("starbucks", "Coffee")).unwrap();
        store.append(category_rule("netflix", "Streaming")).unwrap();
        let backup = sibling(&store_path(&dir), "bak");
        let raw = fs::read_to_string(backup).unwrap();
        // Backup holds the state prior to the last append.
        assert!(raw.contains("starbucks"));
        assert!(!raw.contains("netflix"));
    }

    #[test]
    fn test_invalid_rules_rejected_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        let mut empty_pattern = category_rule("", "Coffee");
        empty_pattern.pattern = String::new();
        assert!(store.append(empty_pattern).is_err());

        let mut bad_regex = category_rule("([unclosed", "Coffee");
        bad_regex.strategy = MatchStrategy::Regex;
        assert!(store.append(bad_regex).is_err());

        let mut bad_split = category_rule("costco", "ignored");
        bad_split.target = RuleTarget::Split(vec![]);
        assert!(store.append(bad_split).is_err());

        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.append(category_rule("starbucks", "Coffee")).unwrap();
            store.append(category_rule("netflix", "Streaming")).unwrap();
        }
        fs::write(store_path(&dir), "{ not json at all").unwrap();

        let store = open(&dir);
        assert_eq!(store.recovery(), Recovery::FromBackup);
        // Backup was one append behind.
        assert_eq!(store.len(), 1);
        assert_eq!(store.rules()[0].pattern, "starbucks");

        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn test_corrupt_file_and_backup_reinitializes_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.append(category_rule("starbucks", "Coffee")).unwrap();
            store.append(category_rule("netflix", "Streaming")).unwrap();
        }
        fs::write(store_path(&dir), "{ not json").unwrap();
        fs::write(sibling(&store_path(&dir), "bak"), "also not json").unwrap();

        let store = open(&dir);
        assert_eq!(store.recovery(), Recovery::Reinitialized);
        assert!(store.is_empty());
        // The store is usable again immediately.
        store.append(category_rule("starbucks", "Coffee")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unsupported_version_treated_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            store_path(&dir),
            r#"{"version": 99, "updated_at": "2026-01-01T00:00:00Z", "rules": []}"#,
        )
        .unwrap();
        let store = open(&dir);
        assert_eq!(store.recovery(), Recovery::Reinitialized);
    }

    #[test]
    fn test_foreign_lock_times_out_with_store_locked() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let lock = sibling(&store_path(&dir), "lock");
        fs::write(&lock, "12345").unwrap();

        let err = store.append(category_rule("starbucks", "Coffee")).unwrap_err();
        assert!(matches!(err, TellerError::StoreLocked));

        fs::remove_file(&lock).unwrap();
        store.append(category_rule("starbucks", "Coffee")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_at_persists_and_bounds_checked() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.append(category_rule("starbucks", "Coffee")).unwrap();
        store.append(category_rule("netflix", "Streaming")).unwrap();

        assert!(store.remove_at(5).is_err());
        assert_eq!(store.len(), 2);

        let removed = store.remove_at(0).unwrap();
        assert_eq!(removed.pattern, "starbucks");
        assert_eq!(store.len(), 1);

        let reopened = open(&dir);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.rules()[0].pattern, "netflix");
    }

    #[test]
    fn test_get_returns_candidates_for_payee() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.append(category_rule("starbucks", "Coffee")).unwrap();
        let mut contains = category_rule("bucks", "Other");
        contains.strategy = MatchStrategy::Contains;
        store.append(contains).unwrap();
        store.append(category_rule("netflix", "Streaming")).unwrap();

        let candidates = store.get("STARBUCKS #1234");
        assert_eq!(candidates.len(), 2);
        assert!(store.get("UNRELATED").is_empty());
    }

    #[test]
    fn test_concurrent_appends_from_threads() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(open(&dir));

        std::thread::scope(|scope| {
            for t in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for i in 0..5 {
                        store
                            .append(category_rule(&format!("payee-{t}-{i}"), "Misc"))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.len(), 20);
        let reopened = open(&dir);
        assert_eq!(reopened.len(), 20);
    }
}
