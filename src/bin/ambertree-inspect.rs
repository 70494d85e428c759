#![forbid(unsafe_code)]

//! A small development aid for poking at an `ambertree` database from a
//! shell, in the same spirit as `nexuslite`'s own `src/bin/nexuslite.rs` —
//! not part of the crate's public contract, just a convenience for manual
//! testing during development. Values are treated as UTF-8 strings; keys are
//! raw bytes passed verbatim.

use std::ops::Bound;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ambertree-inspect", version, about = "Poke at an ambertree database")]
struct Cli {
    /// Directory the database lives in (created if absent).
    #[arg(long)]
    db: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print root id, id counter, manifest size, nodes offset, cache stats.
    Stats,
    /// Look up a single key.
    Get { key: String },
    /// Insert or overwrite a key.
    Put { key: String, value: String },
    /// Remove a key (a no-op if absent).
    Delete { key: String },
    /// List keys in `[start, end]`, optionally capped at `limit` pairs.
    Seek {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    let db: ambertree::Database<String> = match ambertree::open(&cli.db) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("error opening {}: {e}", cli.db.display());
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Stats => {
            let stats = db.stats();
            println!("root_id:       {}", stats.root_id);
            println!("id_counter:    {}", stats.id_counter);
            println!("manifest_len:  {}", stats.manifest_len);
            println!("nodes_offset:  {}", stats.nodes_offset);
            println!(
                "cache:         hits={} misses={} evictions={} len={}/{}",
                stats.cache.hits, stats.cache.misses, stats.cache.evictions, stats.cache.len, stats.cache.capacity
            );
            Ok(())
        }
        Command::Get { key } => match db.b_get(key.as_bytes()) {
            Ok(Some(v)) => {
                println!("{v}");
                Ok(())
            }
            Ok(None) => {
                println!("(absent)");
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Put { key, value } => db.b_insert(key.as_bytes(), value),
        Command::Delete { key } => db.b_remove(key.as_bytes()),
        Command::Seek { start, end, limit } => {
            let start_bound = start.as_deref().map_or(Bound::Unbounded, |s| Bound::Included(s.as_bytes()));
            let end_bound = end.as_deref().map_or(Bound::Unbounded, |s| Bound::Included(s.as_bytes()));
            match db.b_seek(start_bound, end_bound, limit) {
                Ok(pairs) => {
                    for (k, v) in pairs {
                        println!("{} = {v}", String::from_utf8_lossy(&k));
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
