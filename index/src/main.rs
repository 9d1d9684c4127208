//! Command-line access to an index file with `u32` keys.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use page_index::{Index, IndexError, IndexOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "page-index", version, about = "Inspect and edit a page index file")]
struct Cli {
    #[arg(value_name = "FILE", help = "Index file, created if missing")]
    path: PathBuf,

    #[arg(long, help = "Override the page cache size (pages)")]
    cache_pages: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print entry, page and free page counts.
    Stats,
    /// Print every page and its entries.
    Dump,
    /// Add an entry.
    Insert { key: u32, offset: i32 },
    /// Remove an entry.
    Delete { key: u32, offset: i32 },
    /// Print entries with `lo <= key <= hi`.
    Range { lo: u32, hi: u32 },
    /// Print the offsets stored under a key.
    Get { key: u32 },
    /// Insert keys `0..n`, each with offset equal to its key.
    Fill { n: u32 },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "page_index=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut options = match IndexOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(pages) = cli.cache_pages {
        options = options.with_cache_capacity(pages);
    }

    if let Err(e) = run(&cli, options) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, options: IndexOptions) -> Result<(), IndexError> {
    let mut index = Index::<u32>::open(&cli.path, options)?;
    tracing::debug!(path = %cli.path.display(), "opened {index:?}");

    match cli.command {
        Command::Stats => {
            println!("entries:          {}", index.len());
            println!("pages:            {}", index.page_count());
            println!("free pages:       {}", index.free_page_count());
            println!("entries per page: {}", index.max_entries_per_page());
        }
        Command::Dump => {
            let pages: Vec<_> = index.pages().collect();
            for page in pages {
                println!(
                    "page @{} min=({}, {}) entries={}",
                    page.file_offset, page.min.key, page.min.offset, page.entry_count
                );
            }
            for entry in index.all_entries()? {
                println!("{}\t{}", entry.key, entry.offset);
            }
        }
        Command::Insert { key, offset } => {
            if !index.insert(key, offset)? {
                println!("({key}, {offset}) already present");
            }
        }
        Command::Delete { key, offset } => {
            if !index.delete(key, offset)? {
                println!("({key}, {offset}) not found");
            }
        }
        Command::Range { lo, hi } => {
            for entry in index.search_range(&lo, &hi)? {
                println!("{}\t{}", entry.key, entry.offset);
            }
        }
        Command::Get { key } => {
            for offset in index.search(&key)? {
                println!("{offset}");
            }
        }
        Command::Fill { n } => {
            let mut added = 0usize;
            for key in 0..n {
                let offset = i32::try_from(key).unwrap_or(i32::MAX);
                if index.insert(key, offset)? {
                    added += 1;
                }
            }
            tracing::info!(added, total = index.len(), "filled index");
        }
    }

    index.close()
}
