//! FlashKV Dump Tool
//!
//! Opens a flash image and prints its statistics and every stored entry.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use flashkv::dump::dump;
use flashkv::{EntryType, FileDevice, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// FlashKV dump
#[derive(Parser, Debug)]
#[command(name = "flashkv-dump")]
#[command(about = "Print statistics and all key-value pairs of a FlashKV image")]
#[command(version)]
struct Args {
    /// Flash image file
    image: PathBuf,

    /// Page size of the image in bytes
    #[arg(short, long, default_value = "4096")]
    page_size: usize,

    /// Only dump entries of this namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Only dump entries of this type (u8, i32, str, blob, ...)
    #[arg(short = 't', long = "type")]
    entry_type: Option<EntryType>,
}

fn main() {
    // Logs go to stderr so the dump itself can be piped
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,flashkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("FlashKV dump v{}", flashkv::VERSION);
    tracing::info!("Image: {}", args.image.display());

    let device = match FileDevice::open(&args.image, args.page_size) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to open image: {}", e);
            std::process::exit(1);
        }
    };

    let store = match Store::open(device) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let meta = store.pages().meta();
    let recovery = store.recovery();
    tracing::info!(
        pages = meta.page_count,
        page_size = meta.page_size,
        generation = meta.generation,
        corrupt_entries = recovery.entries_corrupted,
        damaged_headers = recovery.headers_damaged,
        "image opened"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match dump(&mut out, &store, args.namespace.as_deref(), args.entry_type) {
        Ok(summary) => {
            tracing::info!(
                entries = summary.entries,
                corrupt = summary.corrupt,
                "dump complete"
            );
        }
        Err(e) => {
            tracing::error!("Dump failed: {}", e);
            std::process::exit(1);
        }
    }
}
