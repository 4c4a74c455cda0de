//! FlashKV CLI
//!
//! Command-line interface for editing a FlashKV image.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flashkv::{EntryType, FileDevice, Store, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// FlashKV CLI
#[derive(Parser, Debug)]
#[command(name = "flashkv-cli")]
#[command(about = "CLI for FlashKV flash images")]
#[command(version)]
struct Args {
    /// Flash image file
    #[arg(short, long)]
    image: PathBuf,

    /// Page size of the image in bytes
    #[arg(short, long, default_value = "4096")]
    page_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an erased image and initialize the store
    Format {
        /// Number of pages (page 0 holds metadata)
        #[arg(long, default_value = "4")]
        pages: u32,
    },

    /// Get a value
    Get {
        namespace: String,
        key: String,
        /// Expected type (u8, i32, str, blob, ...)
        entry_type: EntryType,
    },

    /// Set a value (BLOB values are given in hex)
    Set {
        namespace: String,
        key: String,
        entry_type: EntryType,
        value: String,
    },

    /// Delete a key
    Del { namespace: String, key: String },

    /// Print slot statistics
    Stats,

    /// Reclaim sparsely used pages
    Compact,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,flashkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> flashkv::Result<()> {
    let command = match args.command {
        Commands::Format { pages } => {
            let device = FileDevice::create(&args.image, pages, args.page_size)?;
            let store = Store::open(device)?;
            println!(
                "formatted {} ({} pages of {} bytes): {}",
                args.image.display(),
                pages,
                args.page_size,
                store.stats()
            );
            return Ok(());
        }
        other => other,
    };

    let device = FileDevice::open(&args.image, args.page_size)?;
    let mut store = Store::open(device)?;

    match command {
        Commands::Get {
            namespace,
            key,
            entry_type,
        } => {
            let value = store.get(&namespace, &key, entry_type)?;
            println!("{}", value);
        }
        Commands::Set {
            namespace,
            key,
            entry_type,
            value,
        } => {
            let value = Value::parse(entry_type, &value)?;
            store.set(&namespace, &key, value)?;
        }
        Commands::Del { namespace, key } => store.delete(&namespace, &key)?,
        Commands::Stats => println!("{}", store.stats()),
        Commands::Compact => {
            let stats = store.compact()?;
            println!(
                "reclaimed {} pages, moved {} entries",
                stats.pages_reclaimed, stats.entries_moved
            );
        }
        Commands::Format { .. } => {}
    }

    Ok(())
}
