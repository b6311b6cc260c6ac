mod clean;
mod cli;
mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sweep::{exit_codes, logging};

#[derive(Parser)]
#[command(name = "analyze", version, about = "Reports and cleanup for sweep results")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize completed runs and optionally write them to CSV.
    Report {
        results_root: PathBuf,
        /// Per-run metrics file merged into each row.
        #[arg(long, default_value = report::DEFAULT_RESULTS_FILE)]
        results_file: String,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Columns to sort rows by; unknown columns are ignored.
        #[arg(long, value_delimiter = ',')]
        sort_by: Vec<String>,
    },
    /// Delete incomplete or matching run directories. Dry run unless --delete.
    Clean {
        results_root: PathBuf,
        /// Keep directories without a `_SUCCESS` marker.
        #[arg(long)]
        keep_incomplete: bool,
        /// Also select completed runs whose config has key=value (repeatable, all must match).
        #[arg(long = "where", value_name = "KEY=VALUE")]
        where_terms: Vec<String>,
        #[arg(long)]
        delete: bool,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Report {
            results_root,
            results_file,
            csv,
            sort_by,
        } => cli::report(&results_root, &results_file, csv.as_deref(), &sort_by),
        Command::Clean {
            results_root,
            keep_incomplete,
            where_terms,
            delete,
            yes,
        } => cli::clean(
            &results_root,
            &cli::CleanArgs {
                keep_incomplete,
                where_terms,
                delete,
                yes,
            },
        ),
    }
}
