use crate::error::Result;
use crate::fmt::format_bytes;
use crate::history::SqliteHistory;
use crate::settings::{self, load_settings};
use crate::store::{Recovery, RuleStore};

pub fn run() -> Result<()> {
    let settings = load_settings();
    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    let db_path = data_dir.join("teller.db");
    let rules_path = data_dir.join("rules.json");

    println!("Data dir:    {}", data_dir.display());
    println!("Rule store:  {}", rules_path.display());
    println!("Database:    {}", db_path.display());

    if !rules_path.exists() && !db_path.exists() {
        println!();
        println!("Nothing initialized yet. Run `teller init` to set up.");
        return Ok(());
    }

    let config = settings::load_config(&data_dir);
    let store = RuleStore::open(&rules_path, config.lock_timeout())?;
    match store.recovery() {
        Recovery::Clean => {}
        Recovery::FromBackup => println!("Rule store:  restored from backup on open"),
        Recovery::Reinitialized => println!("Rule store:  rebuilt empty after corruption"),
    }

    println!();
    println!("Rules:         {}", store.len());
    println!("Last updated:  {}", store.updated_at().format("%Y-%m-%d %H:%M UTC"));

    if db_path.exists() {
        let size = std::fs::metadata(&db_path)?.len();
        let corpus = SqliteHistory::open(&db_path)?;
        println!("Approved:      {}", corpus.approved_count()?);
        println!("Decisions:     {}", corpus.decision_count()?);
        println!("DB size:       {}", format_bytes(size));
    } else {
        println!("Database not found. Run `teller init` to set up.");
    }

    Ok(())
}
