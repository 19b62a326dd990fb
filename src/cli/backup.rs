use std::path::PathBuf;

use crate::error::Result;
use crate::fmt::format_bytes;
use crate::history::SqliteHistory;
use crate::settings::get_data_dir;

pub fn run(output: Option<String>) -> Result<()> {
    let data_dir = get_data_dir();
    let corpus = SqliteHistory::open(&data_dir.join("teller.db"))?;

    let dest_dir = match output {
        Some(p) => PathBuf::from(p),
        None => data_dir.join("backups"),
    };
    std::fs::create_dir_all(&dest_dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");

    let db_dest = dest_dir.join(format!("teller-{stamp}.db"));
    corpus.backup_to(&db_dest)?;
    let db_size = std::fs::metadata(&db_dest)?.len();
    println!("Database backup: {} ({})", db_dest.display(), format_bytes(db_size));

    let rules_path = data_dir.join("rules.json");
    if rules_path.exists() {
        let rules_dest = dest_dir.join(format!("rules-{stamp}.json"));
        std::fs::copy(&rules_path, &rules_dest)?;
        let rules_size = std::fs::metadata(&rules_dest)?.len();
        println!("Rule store backup: {} ({})", rules_dest.display(), format_bytes(rules_size));
    }

    Ok(())
}
