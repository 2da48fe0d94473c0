//! SectorKV CLI
//!
//! Host tool for creating and editing flash image files.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sectorkv::flash::{FileFlash, FlashGeometry, StatsPartition};
use sectorkv::{Config, Crc32, KeyValueStore, KvError};
use tracing_subscriber::{fmt, EnvFilter};

type ImageStore = KeyValueStore<StatsPartition<FileFlash>, Crc32>;

/// SectorKV CLI
#[derive(Parser, Debug)]
#[command(name = "sectorkv-cli")]
#[command(about = "Inspect and edit SectorKV flash images")]
#[command(version)]
struct Args {
    /// Flash image file (geometry is read from <image>.geom)
    #[arg(short, long, default_value = "sectorkv.img")]
    image: PathBuf,

    /// Entry magic marker
    #[arg(short, long, default_value_t = Config::default().magic)]
    magic: u32,

    /// Key directory capacity
    #[arg(long, default_value_t = Config::default().max_entries)]
    max_entries: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an erased image
    Format {
        /// Bytes per sector
        #[arg(long, default_value = "4096")]
        sector_size: usize,

        /// Number of sectors
        #[arg(long, default_value = "4")]
        sectors: usize,

        /// Write alignment in bytes
        #[arg(long, default_value = "16")]
        alignment: usize,
    },

    /// Store a value
    Put {
        key: String,
        value: String,
    },

    /// Print a value
    Get {
        key: String,
    },

    /// Delete a key
    Delete {
        key: String,
    },

    /// Print every live key/value pair
    List,

    /// Print space and wear statistics
    Stats,

    /// Collect one sector
    Gc,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,sectorkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(if e.is_io() { 2 } else { 1 });
    }
}

fn run(args: Args) -> sectorkv::Result<()> {
    let config = Config::builder()
        .magic(args.magic)
        .max_entries(args.max_entries)
        .build();

    if let Commands::Format {
        sector_size,
        sectors,
        alignment,
    } = args.command
    {
        let geometry = FlashGeometry {
            sector_size,
            sector_count: sectors,
            alignment,
        };
        FileFlash::create(&args.image, geometry)?;
        tracing::info!(image = %args.image.display(), ?geometry, "image formatted");
        return Ok(());
    }

    let mut store = open_store(&args.image, config)?;

    match args.command {
        Commands::Format { .. } => {}
        Commands::Put { key, value } => store.put(key.as_bytes(), value.as_bytes())?,
        Commands::Get { key } => match store.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(KvError::NotFound) => println!("(not found)"),
            Err(e) => return Err(e),
        },
        Commands::Delete { key } => store.delete(key.as_bytes())?,
        Commands::List => {
            for item in store.iter() {
                let (key, value) = item?;
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Stats => {
            let stats = store.stats();
            println!("live entries:      {}", stats.live_entries);
            println!("deleted entries:   {}", stats.deleted_entries);
            println!("writable bytes:    {}", stats.writable_bytes);
            println!("in-use bytes:      {}", stats.in_use_bytes);
            println!("reclaimable bytes: {}", stats.reclaimable_bytes);
            println!("corrupt sectors:   {}", stats.corrupt_sectors);
            println!("erase counts:      {:?}", stats.sector_erase_counts);
        }
        Commands::Gc => {
            if store.garbage_collect()? {
                println!("collected one sector");
            } else {
                println!("nothing to collect");
            }
        }
    }

    store.partition().log_storage_stats("cli");
    Ok(())
}

/// Open the image and rebuild the store; corrupt sectors are reported but
/// do not prevent access to the rest of the data
fn open_store(image: &std::path::Path, config: Config) -> sectorkv::Result<ImageStore> {
    let flash = StatsPartition::new(FileFlash::open(image)?);
    let mut store = KeyValueStore::new(flash, Crc32, config)?;

    match store.init() {
        Ok(()) => {}
        Err(KvError::Corrupt(msg)) => tracing::warn!("{}", msg),
        Err(e) => return Err(e),
    }
    Ok(store)
}
