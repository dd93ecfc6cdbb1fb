//! petvault CLI
//!
//! Offline administration of a petvault data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use petvault::archive::{self, IdentityCodec};
use petvault::{Config, Store, SyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// petvault CLI
#[derive(Parser, Debug)]
#[command(name = "petvault-cli")]
#[command(about = "Inspect and maintain a petvault data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./petvault_data")]
    data_dir: PathBuf,

    /// Entries per hash bucket (used when creating new index files)
    #[arg(long, default_value = "5")]
    bucket_capacity: usize,

    /// B+-tree order (used when creating new index files)
    #[arg(long, default_value = "5")]
    tree_order: usize,

    /// fsync after every write
    #[arg(long)]
    sync_every_write: bool,

    /// Store e-mail addresses without the field cipher
    #[arg(long)]
    plain_fields: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print record counts and index shapes
    Stats,

    /// Verify heap files, indexes and references
    Check,

    /// Rebuild every index from the heap files
    Rebuild,

    /// Print every record of one entity as JSON lines
    Dump {
        #[arg(value_enum)]
        entity: Entity,
    },

    /// Copy the data directory into an archive directory
    Pack {
        /// Archive directory to create
        target: PathBuf,
    },

    /// Restore the data directory from an archive directory
    Unpack {
        /// Archive directory to read
        source: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Entity {
    Customers,
    Pets,
    Services,
    Bookings,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,petvault=debug"));

    fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();

    let args = Args::parse();
    tracing::info!("petvault CLI v{}", petvault::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> petvault::Result<ExitCode> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .bucket_capacity(args.bucket_capacity)
        .tree_order(args.tree_order)
        .sync_strategy(if args.sync_every_write {
            SyncStrategy::EveryWrite
        } else {
            SyncStrategy::OnClose
        })
        .encrypt_fields(!args.plain_fields)
        .build();

    match &args.command {
        Commands::Pack { target } => {
            let report = archive::pack_dir(&config.data_dir, target, &IdentityCodec)?;
            println!(
                "packed {} files ({} -> {} bytes)",
                report.files, report.original_bytes, report.packed_bytes
            );
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Unpack { source } => {
            let report = archive::unpack_dir(source, &config.data_dir, &IdentityCodec)?;
            println!("unpacked {} files ({} bytes)", report.files, report.original_bytes);
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let mut store = Store::open(config)?;
    let code = match args.command {
        Commands::Stats => {
            let stats = store.stats()?;
            for entity in &stats.entities {
                println!(
                    "{:<9} records={:<6} last_id={:<6} heap_bytes={:<8} free_slots={}",
                    entity.entity, entity.records, entity.last_id, entity.heap_bytes, entity.free_slots
                );
            }
            println!(
                "indexes   cpf_depth={} owner_depth={} owner_buckets={} service_name_depth={} booking_tree_height={}",
                stats.cpf_depth,
                stats.owner_depth,
                stats.owner_buckets,
                stats.service_name_depth,
                stats.booking_tree_height
            );
            println!("cipher    {}", stats.cipher);
            ExitCode::SUCCESS
        }
        Commands::Check => {
            let report = store.check()?;
            for issue in report.issues() {
                println!("{}", issue);
            }
            if report.is_clean() {
                println!("ok");
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Rebuild => {
            store.rebuild_indexes()?;
            println!("indexes rebuilt");
            ExitCode::SUCCESS
        }
        Commands::Dump { entity } => {
            let lines = match entity {
                Entity::Customers => to_json_lines(&store.customers()?)?,
                Entity::Pets => to_json_lines(&store.pets()?)?,
                Entity::Services => to_json_lines(&store.services()?)?,
                Entity::Bookings => to_json_lines(&store.bookings()?)?,
            };
            for line in lines {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        Commands::Pack { .. } | Commands::Unpack { .. } => ExitCode::SUCCESS,
    };

    store.close()?;
    Ok(code)
}

fn to_json_lines<T: serde::Serialize>(records: &[T]) -> petvault::Result<Vec<String>> {
    records
        .iter()
        .map(|r| serde_json::to_string(r).map_err(|e| petvault::VaultError::Encoding(e.to_string())))
        .collect()
}
