use clap::Parser;

use teller::cli::{self, Cli, Commands, HistoryCommands, RulesCommands};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Evaluate {
            file,
            catalog,
            json,
            workers,
        } => cli::evaluate::run(&file, catalog, json, workers),
        Commands::Approve {
            id,
            payee,
            amount,
            date,
            category,
            split,
            modified,
            catalog,
        } => cli::approve::run(&id, &payee, &amount, &date, category, split, modified, catalog),
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                split,
                match_type,
                priority,
                catalog,
            } => cli::rules::add(&pattern, category, split, &match_type, priority, catalog),
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Delete { number } => cli::rules::delete(number),
        },
        Commands::History { command } => match command {
            HistoryCommands::Import { file } => cli::history::import(&file),
            HistoryCommands::Show { payee } => cli::history::show(&payee),
        },
        Commands::Status => cli::status::run(),
        Commands::Backup { output } => cli::backup::run(output),
        Commands::Demo => cli::demo::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
