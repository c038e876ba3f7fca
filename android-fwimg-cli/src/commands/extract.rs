use super::ExtractArgs;
use android_fwimg::bootimg::{UnpackOptions, UnpackReport, unpack_file};
use android_fwimg::classifier::{Classification, Signature, classify_file};
use android_fwimg::erofs;
use android_fwimg::exec::SystemRunner;
use android_fwimg::lp::{ExtractOptions, SkipReason, SuperImage};
use android_fwimg::sparse::unsparse_file;
use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::{info, warn};

const RAW_IMAGE: &str = "raw_image.img";
const BOOT_PARTITIONS: &[&str] = &["boot", "recovery", "init_boot"];

fn is_boot_partition(name: &str) -> bool {
    let base = name
        .strip_suffix("_a")
        .or_else(|| name.strip_suffix("_b"))
        .unwrap_or(name);
    BOOT_PARTITIONS.contains(&base)
}

fn print_unpack_report(report: &UnpackReport) {
    println!("header_version: {}", report.header_version);
    if let Some(os_version) = &report.os_version {
        println!("os_version: {os_version}");
    }
    println!("cmdline: {}", report.cmdline);
    println!("kernel: {}", report.kernel_format);
    println!("ramdisk: {}", report.ramdisk_format);
    for file in &report.files {
        println!("  {}", file.display());
    }
}

fn extract_super(image: &Path, out_dir: &Path, args: &ExtractArgs) -> Result<()> {
    let super_image = SuperImage::open(image)
        .with_context(|| format!("failed to read super metadata from {}", image.display()))?;
    let options = ExtractOptions {
        partitions: args.partition.clone(),
    };
    let report = super_image
        .extract(out_dir, &options)
        .context("failed to extract partitions")?;

    for skipped in &report.skipped {
        match &skipped.reason {
            SkipReason::MissingDevice { device } => warn!(
                partition = %skipped.partition,
                extent = skipped.extent_index,
                device = %device,
                "block device not found, extent left as a hole"
            ),
            SkipReason::UnsupportedTarget(target) => warn!(
                partition = %skipped.partition,
                extent = skipped.extent_index,
                target_type = *target,
                "unsupported extent target, extent left as a hole"
            ),
        }
    }

    let unpack_options = UnpackOptions {
        page_size: args.page_size,
    };
    for partition in &report.partitions {
        println!("{}: {} bytes", partition.name, partition.size);
        if !is_boot_partition(&partition.name) {
            continue;
        }
        let classification = classify_file(&partition.path)?;
        if !classification.contains(Signature::AndroidBoot) {
            info!(partition = %partition.name, %classification, "not a boot image, leaving packed");
            continue;
        }
        // v0-v2 and vendor boot headers are reported and skipped.
        match unpack_file(&partition.path, out_dir.join(&partition.name), &unpack_options) {
            Ok(report) => print_unpack_report(&report),
            Err(err) => warn!(partition = %partition.name, %err, "failed to unpack boot image"),
        }
    }
    Ok(())
}

fn extract_unsparsed(
    image: &Path,
    classification: &Classification,
    out_dir: &Path,
    args: &ExtractArgs,
) -> Result<()> {
    if classification.contains(Signature::SuperPartition) {
        extract_super(image, out_dir, args)
    } else if classification.contains(Signature::Erofs) {
        erofs::extract(&SystemRunner, image, out_dir)
            .with_context(|| format!("failed to extract {}", image.display()))
    } else if classification.contains(Signature::AndroidBoot) {
        let options = UnpackOptions {
            page_size: args.page_size,
        };
        let report = unpack_file(image, out_dir, &options)
            .with_context(|| format!("failed to unpack {}", image.display()))?;
        print_unpack_report(&report);
        Ok(())
    } else {
        bail!("{}: no extractor for {}", image.display(), classification)
    }
}

pub fn run_extract(args: ExtractArgs) -> Result<()> {
    let out_dir = args.output_dir.as_path();
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let classification = classify_file(&args.file)
        .with_context(|| format!("failed to classify {}", args.file.display()))?;
    info!(file = %args.file.display(), %classification, "classified");

    if !classification.contains(Signature::AndroidSparse) {
        return extract_unsparsed(&args.file, &classification, out_dir, &args);
    }

    let raw = out_dir.join(RAW_IMAGE);
    unsparse_file(&args.file, &raw)
        .with_context(|| format!("failed to unsparse {}", args.file.display()))?;
    let classification = classify_file(&raw)?;
    info!(file = %raw.display(), %classification, "classified unsparsed image");
    if classification.contains(Signature::AndroidSparse) {
        bail!("{} is still sparse after unsparsing", raw.display());
    }
    extract_unsparsed(&raw, &classification, out_dir, &args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_partition_names() {
        for name in ["boot", "boot_a", "recovery_b", "init_boot", "init_boot_a"] {
            assert!(is_boot_partition(name), "{name}");
        }
        for name in ["system", "vendor_boot", "boot_c", "dtbo_a", "bootloader"] {
            assert!(!is_boot_partition(name), "{name}");
        }
    }
}
