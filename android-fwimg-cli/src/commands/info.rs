use super::InfoArgs;
use android_fwimg::bootimg::BootHeader;
use android_fwimg::classifier::{Signature, classify_file};
use android_fwimg::lp::SuperImage;
use android_fwimg::sparse::SparseHeader;
use anyhow::{Context, Result, bail};
use itertools::Itertools;
use memmap2::Mmap;
use paste::paste;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

fn print_boot_header(header: &BootHeader) {
    macro_rules! print_info_item {
        ($name:ident) => {
            paste! {
                if header.[<has_ $name>]() {
                    let d = header.[<get_ $name>]();
                    println!("{}: {}", stringify!($name), d);
                }
            }
        };
    }

    print_info_item! { header_version }
    print_info_item! { header_size }
    print_info_item! { kernel_size }
    print_info_item! { ramdisk_size }
    if header.has_os_version_raw() {
        if let Some((os_version, patch_level)) = header.os_version() {
            println!("os_version: {}", os_version);
            println!("patch_level: {}", patch_level);
        }
    }
    print_info_item! { dtb_size }
    println!("cmdline: {}", header.cmdline());
}

fn boot_info(path: &Path) -> Result<()> {
    let file = File::open(path)?;
    // SAFETY: the mapping is only read while `mem` is alive.
    let mem = unsafe { Mmap::map(&file)? };
    let header = BootHeader::parse(&mem)?;
    print_boot_header(&header);
    Ok(())
}

fn sparse_info(path: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = SparseHeader::read(&mut reader)?;
    println!("version: {}.{}", header.major_version, header.minor_version);
    println!("block_size: {}", header.blk_sz);
    println!("total_blocks: {}", header.total_blks);
    println!("total_chunks: {}", header.total_chunks);
    println!("expanded_size: {}", header.expanded_size());
    Ok(())
}

fn super_info(path: &Path) -> Result<()> {
    let image = SuperImage::open(path)?;
    let metadata = image.metadata();
    let geometry = &metadata.geometry;
    println!("geometry_offset: {:#x}", geometry.offset);
    println!("metadata_max_size: {}", geometry.metadata_max_size);
    println!("metadata_slot_count: {}", geometry.metadata_slot_count);
    println!("logical_block_size: {}", geometry.logical_block_size);
    println!(
        "metadata: v{}.{} from slot {}",
        metadata.header.major_version, metadata.header.minor_version, metadata.slot
    );

    println!("partitions:");
    for partition in metadata.summary() {
        println!(
            "  {:<24} {:>12} bytes  {} extent(s)  group {}",
            partition.name,
            partition.size,
            partition.num_extents,
            partition.group.as_deref().unwrap_or("-")
        );
    }

    println!("groups:");
    for group in &metadata.groups {
        println!("  {:<24} max {}", group.name, group.maximum_size);
    }

    println!(
        "block_devices: {}",
        metadata
            .block_devices
            .iter()
            .map(|device| format!("{} ({} bytes)", device.partition_name, device.size))
            .join(", ")
    );
    Ok(())
}

pub fn run_info(args: InfoArgs) -> Result<()> {
    let path = args.file.as_path();
    let classification = classify_file(path)
        .with_context(|| format!("failed to classify {}", path.display()))?;
    println!("formats: {}", classification);

    let result = if classification.contains(Signature::AndroidSparse) {
        sparse_info(path)
    } else if classification.contains(Signature::SuperPartition) {
        super_info(path)
    } else if classification.contains(Signature::AndroidBoot) {
        boot_info(path)
    } else {
        bail!("{}: no header details for {}", path.display(), classification)
    };
    result.with_context(|| format!("failed to read {}", path.display()))
}
