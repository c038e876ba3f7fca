use android_fwimg::classifier::classify_file;
use android_fwimg::constants::BOOT_DEFAULT_PAGE_SIZE;
use android_fwimg::exec::SystemRunner;
use android_fwimg::repack::{RepackOptions, repack_file};
use android_fwimg::sparse::unsparse_file;
use android_fwimg::{adb, dtc};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

mod extract;
mod info;

pub use extract::run_extract;
pub use info::run_info;

#[derive(Args)]
pub struct SearchArgs {
    /// File to classify.
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ExtractArgs {
    pub file: PathBuf,
    pub output_dir: PathBuf,
    /// Only extract these partitions from a super image.
    #[arg(short, long = "partition", value_name = "NAME")]
    pub partition: Vec<String>,
    /// Page size of v3/v4 boot images.
    #[arg(long = "page_size", default_value_t = BOOT_DEFAULT_PAGE_SIZE)]
    pub page_size: u32,
}

#[derive(Args)]
pub struct InfoArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct UnsparseArgs {
    pub file: PathBuf,
    pub output: PathBuf,
}

#[derive(Args)]
pub struct RepackArgs {
    #[arg(long = "header_info")]
    pub header_info: PathBuf,
    #[arg(long)]
    pub kernel: PathBuf,
    #[arg(long)]
    pub ramdisk: PathBuf,
    #[arg(long)]
    pub dtb: Option<PathBuf>,
    #[arg(long)]
    pub cmdline: Option<String>,
    #[arg(short, long, default_value = "image-new.img")]
    pub output: PathBuf,
    /// Overrides the page size recorded in header_info.txt.
    #[arg(long = "page_size")]
    pub page_size: Option<u32>,
    /// Key for a later AVB signing step. Not used by repack itself.
    #[arg(long = "avb_key")]
    pub avb_key: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum DtcCommand {
    /// Binary device tree to source.
    Decompile { dtb: PathBuf, dts: PathBuf },
    /// Source to binary device tree.
    Compile { dts: PathBuf, dtb: PathBuf },
}

#[derive(Args)]
pub struct DumpArgs {
    /// Name under /dev/block/by-name on the device.
    pub partition: String,
    pub output_dir: PathBuf,
}

pub fn run_search(args: SearchArgs) -> Result<()> {
    let classification = classify_file(&args.file)
        .with_context(|| format!("failed to classify {}", args.file.display()))?;
    println!("{}: {}", args.file.display(), classification);
    Ok(())
}

pub fn run_unsparse(args: UnsparseArgs) -> Result<()> {
    let summary = unsparse_file(&args.file, &args.output)
        .with_context(|| format!("failed to unsparse {}", args.file.display()))?;
    println!(
        "{} -> {} ({} bytes)",
        args.file.display(),
        args.output.display(),
        summary.output_size
    );
    Ok(())
}

pub fn run_repack(args: RepackArgs) -> Result<()> {
    let mut options = RepackOptions::new(&args.kernel, &args.ramdisk);
    if let Some(dtb) = &args.dtb {
        options = options.dtb(dtb);
    }
    if let Some(cmdline) = &args.cmdline {
        options = options.cmdline(cmdline.as_str());
    }
    if let Some(page_size) = args.page_size {
        options = options.page_size(page_size);
    }

    let sizes = repack_file(&args.header_info, &options, &args.output)
        .with_context(|| format!("failed to repack {}", args.output.display()))?;
    println!("{}: {} bytes", args.output.display(), sizes.image_size);

    if let Some(key) = &args.avb_key {
        warn!(
            key = %key.display(),
            "AVB signing is not performed; sign {} with avbtool",
            args.output.display()
        );
    }
    Ok(())
}

pub fn run_dtc(command: DtcCommand) -> Result<()> {
    match command {
        DtcCommand::Decompile { dtb, dts } => dtc::decompile(&SystemRunner, &dtb, &dts)
            .with_context(|| format!("failed to decompile {}", dtb.display())),
        DtcCommand::Compile { dts, dtb } => dtc::compile(&SystemRunner, &dts, &dtb)
            .with_context(|| format!("failed to compile {}", dts.display())),
    }
}

pub fn run_dump(args: DumpArgs) -> Result<()> {
    let path = adb::dump(&SystemRunner, &args.partition, &args.output_dir)
        .with_context(|| format!("failed to dump partition {}", args.partition))?;
    info!(path = %path.display(), "done");
    Ok(())
}
