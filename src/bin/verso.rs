//! Binary entry point for the verso administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use verso::{
    access::{Database, DatabaseConfiguration, ResourceConfiguration, Versioning},
    admin::{revisions, stats, verify, RevisionInfo, StatsReport, VerifyReport},
    primitives::handler::ByteHandlerKind,
    storage::StorageKind,
};

#[derive(Parser, Debug)]
#[command(
    name = "verso",
    version,
    about = "Administrative CLI for verso databases",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Create an empty database directory")]
    Create {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Create a resource and publish its first revision")]
    CreateResource {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "NAME")]
        name: String,

        #[arg(long, value_enum, default_value_t = StorageArg::File, help = "Storage backend")]
        storage: StorageArg,

        #[arg(long, help = "Store pages without snappy compression")]
        no_compression: bool,

        #[arg(long, help = "Encrypt pages with AES-256-GCM")]
        encrypt: bool,

        #[arg(long, value_enum, default_value_t = VersioningArg::Incremental)]
        versioning: VersioningArg,

        #[arg(
            long,
            default_value_t = 4,
            help = "Longest node page chain readers reconstruct"
        )]
        window: u32,
    },

    #[command(about = "Report revision, storage and dictionary statistics")]
    Stats {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "RESOURCE")]
        resource: String,
    },

    #[command(about = "Read every reachable page and report damage")]
    Verify {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "RESOURCE")]
        resource: String,
    },

    #[command(about = "List committed revisions")]
    Revisions {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "RESOURCE")]
        resource: String,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StorageArg {
    File,
    Kv,
}

impl From<StorageArg> for StorageKind {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::File => StorageKind::File,
            StorageArg::Kv => StorageKind::Kv,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VersioningArg {
    Full,
    Incremental,
}

impl From<VersioningArg> for Versioning {
    fn from(arg: VersioningArg) -> Self {
        match arg {
            VersioningArg::Full => Versioning::Full,
            VersioningArg::Incremental => Versioning::Incremental,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Create { db_path } => {
            let config = DatabaseConfiguration::new(&db_path)?;
            if !Database::create(&config)? {
                return Err(format!("{} is not empty", db_path.display()).into());
            }
            println!("Created database at {}", config.file().display());
        }
        Command::CreateResource {
            db_path,
            name,
            storage,
            no_compression,
            encrypt,
            versioning,
            window,
        } => {
            let mut handlers = Vec::new();
            if !no_compression {
                handlers.push(ByteHandlerKind::Snappy);
            }
            if encrypt {
                handlers.push(ByteHandlerKind::Encryptor);
            }
            let config = ResourceConfiguration::new(&name)
                .storage(storage.into())
                .byte_handlers(handlers)
                .versioning(versioning.into())
                .revisions_to_restore(window);
            let database = Database::open(&db_path)?;
            if !database.create_resource(config)? {
                return Err(format!("resource '{name}' already exists").into());
            }
            println!("Created resource {name}");
        }
        Command::Stats { db_path, resource } => {
            let report = stats(&db_path, &resource)?;
            emit(&cli.format, &report, |fmt| print_stats_text(fmt, &report))?;
        }
        Command::Verify { db_path, resource } => {
            let report = verify(&db_path, &resource)?;
            emit(&cli.format, &report, |fmt| print_verify_text(fmt, &report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Revisions { db_path, resource } => {
            let report = revisions(&db_path, &resource)?;
            emit(&cli.format, &report, |fmt| print_revisions_text(fmt, &report))?;
        }
    }

    Ok(())
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_stats_text(_: OutputFormat, report: &StatsReport) {
    println!("Resource: {}", report.resource);
    println!(
        "Storage: kind={} handlers={} encrypted={} versioning={:?} window={} size={}",
        report.storage.kind,
        report.storage.byte_handlers,
        report.storage.encrypted,
        report.storage.versioning,
        report.storage.window,
        report.storage.size_bytes
    );
    println!(
        "Revisions: count={} most_recent={} max_node_key={} max_path_node_key={} last_commit_ms={}",
        report.revisions.count,
        report.revisions.most_recent,
        report.revisions.max_node_key,
        report.revisions.max_path_node_key,
        report.revisions.last_commit_ms
    );
    println!(
        "Names: elements={} attributes={} namespaces={}",
        report.names.elements, report.names.attributes, report.names.namespaces
    );
}

fn print_verify_text(_: OutputFormat, report: &VerifyReport) {
    println!(
        "Verify => success={} revisions={} pages={} live_nodes={} path_nodes={}",
        report.success,
        report.counts.revisions,
        report.counts.pages,
        report.counts.live_nodes,
        report.counts.path_nodes,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_revisions_text(_: OutputFormat, report: &[RevisionInfo]) {
    for info in report {
        println!(
            "revision {} committed_ms={} max_node_key={}",
            info.revision, info.commit_timestamp_ms, info.max_node_key
        );
    }
}
