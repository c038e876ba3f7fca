use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    DtcCommand, DumpArgs, ExtractArgs, InfoArgs, RepackArgs, SearchArgs, UnsparseArgs, run_dtc,
    run_dump, run_extract, run_info, run_repack, run_search, run_unsparse,
};

#[derive(Parser)]
#[command(author, version, about = "Inspect, unpack and repack Android firmware images")]
struct Cli {
    /// Log debug output (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the image formats a file contains.
    Search(SearchArgs),
    /// Unpack an image, picking the extractor from its format.
    Extract(ExtractArgs),
    /// Print the headers or partition tables of an image.
    Info(InfoArgs),
    /// Convert an Android sparse image to a raw image.
    Unsparse(UnsparseArgs),
    /// Build a boot image from an unpacked kernel, ramdisk and header_info.txt.
    Repack(RepackArgs),
    /// Convert device trees between binary and source form.
    #[command(subcommand)]
    Dtc(DtcCommand),
    /// Dump a partition from a rooted device over adb.
    Dump(DumpArgs),
}

fn tracing_dispatch(verbose: bool) -> Dispatch {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    Dispatch::new(subscriber)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dispatch = tracing_dispatch(cli.verbose);

    tracing::dispatcher::with_default(&dispatch, || match cli.command {
        Commands::Search(args) => run_search(args),
        Commands::Extract(args) => run_extract(args),
        Commands::Info(args) => run_info(args),
        Commands::Unsparse(args) => run_unsparse(args),
        Commands::Repack(args) => run_repack(args),
        Commands::Dtc(command) => run_dtc(command),
        Commands::Dump(args) => run_dump(args),
    })
}
