//! Command line tool for swap files.
//!
//! Usage:
//!   memline_cli info <swap>
//!   memline_cli recover <swap> [--original <file>] [--output <file>]
//!   memline_cli load <file> <swap> [--page-size <n>]
//!   memline_cli tree <file>

use clap::{Parser, Subcommand};
use memline::{original, recover, swap_info, Config, Memline, RecoverOptions, RecoveryStatus};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::exit;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memline_cli", version, about = "Inspect and recover swap files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show block 0 of a swap file as JSON
    Info { swap: PathBuf },
    /// Rebuild the text stored in a swap file
    Recover {
        swap: PathBuf,
        /// Original file, instead of the one named in the swap file
        #[arg(long)]
        original: Option<PathBuf>,
        /// Write the text here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load a text file into a new swap file and leave it behind
    Load {
        file: PathBuf,
        swap: PathBuf,
        #[arg(long, default_value_t = memline::PAGE_SIZE)]
        page_size: usize,
    },
    /// Load a text file into memory and show tree statistics
    Tree { file: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("ERROR: {}", e);
        exit(1);
    }
}

fn run(command: Command) -> memline::Result<()> {
    match command {
        Command::Info { swap } => {
            let info = swap_info(&swap)?;
            print_json(&info);
        }

        Command::Recover {
            swap,
            original: orig,
            output,
        } => {
            let options = RecoverOptions {
                original: orig,
                ..RecoverOptions::default()
            };
            let mut recovery = recover(&swap, &options)?;
            let lines = recovery.memline.to_lines()?;
            match output {
                Some(path) => original::write_lines(File::create(path)?, &lines)?,
                None => original::write_lines(io::stdout().lock(), &lines)?,
            }

            if recovery.original_changed {
                eprintln!("Warning: Original file may have been changed");
            }
            match recovery.status {
                RecoveryStatus::Clean => eprintln!("Recovery completed: {} lines", lines.len()),
                RecoveryStatus::CompletedWithErrors(n) => {
                    eprintln!("Errors detected while recovering ({}); look for lines starting with ???", n)
                }
                RecoveryStatus::Interrupted => eprintln!("Recovery interrupted"),
            }
        }

        Command::Load {
            file,
            swap,
            page_size,
        } => {
            let config = Config::new(&swap).page_size(page_size).original(&file);
            let mut ml = Memline::open(&config)?;
            let count = ml.load_file(&file)?;
            ml.sync(false)?;
            print_json(&ml.export_tree()?);
            eprintln!("Loaded {} lines into {}", count, swap.display());
        }

        Command::Tree { file } => {
            let mut ml = Memline::open(&Config::memory())?;
            ml.load_file(&file)?;
            let stats = ml.verify()?;
            print_json(&stats);
            print_json(&ml.stats());
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("ERROR: {}", e),
    }
}
