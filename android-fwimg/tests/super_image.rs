use android_fwimg::ErrorKind;
use android_fwimg::bootimg::{UnpackOptions, layout_for_version, unpack_file};
use android_fwimg::classifier::{Signature, classify_file};
use android_fwimg::constants::{
    BOOT_MAGIC, CHUNK_TYPE_DONT_CARE, CHUNK_TYPE_RAW, LP_METADATA_GEOMETRY_MAGIC,
    LP_METADATA_HEADER_MAGIC, LP_TARGET_TYPE_LINEAR, LP_TARGET_TYPE_ZERO, SPARSE_HEADER_MAGIC,
};
use android_fwimg::lp::{ExtractOptions, SkipReason, SuperImage};
use android_fwimg::manifest::HeaderManifest;
use android_fwimg::sparse::unsparse_file;
use anyhow::Result;
use std::fs;
use std::path::Path;

const SECTOR: u64 = 512;
const SLOT_SIZE: u32 = 4096;
// Reserved area, two geometry copies, one metadata slot.
const DATA_START: u64 = 4 * 4096;

fn name_field(name: &str) -> Vec<u8> {
    let mut field = name.as_bytes().to_vec();
    field.resize(36, 0);
    field
}

/// (sectors, target type, target data, device index)
type ExtentDef = (u64, u32, u64, u32);

fn lp_metadata(partitions: &[(&str, Vec<ExtentDef>)], devices: &[&str]) -> Vec<u8> {
    let mut parts = Vec::new();
    let mut extents = Vec::new();
    let mut first = 0u32;
    for (name, list) in partitions {
        parts.extend(name_field(name));
        parts.extend_from_slice(&0u32.to_le_bytes());
        parts.extend_from_slice(&first.to_le_bytes());
        parts.extend_from_slice(&(list.len() as u32).to_le_bytes());
        parts.extend_from_slice(&0u32.to_le_bytes());
        for (sectors, target_type, data, device) in list {
            extents.extend_from_slice(&sectors.to_le_bytes());
            extents.extend_from_slice(&target_type.to_le_bytes());
            extents.extend_from_slice(&data.to_le_bytes());
            extents.extend_from_slice(&device.to_le_bytes());
        }
        first += list.len() as u32;
    }
    let mut groups = name_field("main");
    groups.extend_from_slice(&0u32.to_le_bytes());
    groups.extend_from_slice(&(1u64 << 30).to_le_bytes());
    let mut blocks = Vec::new();
    for name in devices {
        blocks.extend_from_slice(&0u64.to_le_bytes());
        blocks.extend_from_slice(&0u32.to_le_bytes());
        blocks.extend_from_slice(&0u32.to_le_bytes());
        blocks.extend_from_slice(&0u64.to_le_bytes());
        blocks.extend(name_field(name));
        blocks.extend_from_slice(&0u32.to_le_bytes());
    }

    let tables = [
        (parts, partitions.len() as u32, 52u32),
        (extents, first, 24),
        (groups, 1, 48),
        (blocks, devices.len() as u32, 64),
    ];
    let tables_size: usize = tables.iter().map(|(t, _, _)| t.len()).sum();

    let mut header = Vec::new();
    header.extend_from_slice(&LP_METADATA_HEADER_MAGIC.to_le_bytes());
    header.extend_from_slice(&10u16.to_le_bytes());
    header.extend_from_slice(&2u16.to_le_bytes());
    header.extend_from_slice(&128u32.to_le_bytes());
    header.extend_from_slice(&[0u8; 32]);
    header.extend_from_slice(&(tables_size as u32).to_le_bytes());
    header.extend_from_slice(&[0u8; 32]);
    let mut offset = 0u32;
    for (table, count, entry_size) in &tables {
        header.extend_from_slice(&offset.to_le_bytes());
        header.extend_from_slice(&count.to_le_bytes());
        header.extend_from_slice(&entry_size.to_le_bytes());
        offset += table.len() as u32;
    }
    assert_eq!(header.len(), 128);
    for (table, _, _) in tables {
        header.extend(table);
    }
    header
}

fn super_image(metadata: &[u8], data: &[u8]) -> Vec<u8> {
    let mut image = super_image_with_copies(metadata, 2);
    assert_eq!(image.len() as u64, DATA_START);
    image.extend_from_slice(data);
    image
}

/// Reserved area, `copies` geometry copies, one metadata slot.
fn super_image_with_copies(metadata: &[u8], copies: usize) -> Vec<u8> {
    let mut image = vec![0u8; 4096];
    for _ in 0..copies {
        let mut geometry = Vec::new();
        geometry.extend_from_slice(&LP_METADATA_GEOMETRY_MAGIC.to_le_bytes());
        geometry.extend_from_slice(&52u32.to_le_bytes());
        geometry.extend_from_slice(&[0u8; 32]);
        geometry.extend_from_slice(&SLOT_SIZE.to_le_bytes());
        geometry.extend_from_slice(&1u32.to_le_bytes());
        geometry.extend_from_slice(&(SECTOR as u32).to_le_bytes());
        geometry.resize(4096, 0);
        image.extend(geometry);
    }
    let mut slot = metadata.to_vec();
    slot.resize(SLOT_SIZE as usize, 0);
    image.extend(slot);
    image
}

/// Sparse image with the all-zero first block as DONT_CARE and the rest RAW.
fn sparse_image(raw: &[u8]) -> Vec<u8> {
    assert_eq!(raw.len() % 4096, 0);
    let blocks = (raw.len() / 4096) as u32;
    let mut image = Vec::new();
    image.extend_from_slice(&SPARSE_HEADER_MAGIC.to_le_bytes());
    image.extend_from_slice(&1u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&28u16.to_le_bytes());
    image.extend_from_slice(&12u16.to_le_bytes());
    image.extend_from_slice(&4096u32.to_le_bytes());
    image.extend_from_slice(&blocks.to_le_bytes());
    image.extend_from_slice(&2u32.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());

    image.extend_from_slice(&CHUNK_TYPE_DONT_CARE.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&12u32.to_le_bytes());

    let payload = &raw[4096..];
    image.extend_from_slice(&CHUNK_TYPE_RAW.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&(blocks - 1).to_le_bytes());
    image.extend_from_slice(&(12 + payload.len() as u32).to_le_bytes());
    image.extend_from_slice(payload);
    image
}

/// A v4 boot image with 4096-byte pages and no dtb.
fn boot_image(kernel: &[u8], ramdisk: &[u8]) -> Vec<u8> {
    let layout = layout_for_version(4).unwrap();
    let mut image = vec![0u8; 4096];
    image[..8].copy_from_slice(BOOT_MAGIC);
    for (offset, value) in [
        (layout.offset_kernel_size, kernel.len() as u32),
        (layout.offset_ramdisk_size, ramdisk.len() as u32),
        (layout.offset_header_size, layout.total_size as u32),
        (layout.offset_header_version, 4),
    ] {
        let offset = offset as usize;
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    for payload in [kernel, ramdisk] {
        let start = image.len();
        image.extend_from_slice(payload);
        image.resize(start + 4096, 0);
    }
    image
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data)?;
    Ok(())
}

#[test]
fn sparse_super_to_boot_payloads() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let boot = boot_image(b"KERN", b"RAMD");
    let mut data = vec![b'S'; 4096];
    data.extend_from_slice(&boot);
    let boot_sectors = boot.len() as u64 / SECTOR;
    let metadata = lp_metadata(
        &[
            ("system", vec![(8, LP_TARGET_TYPE_LINEAR, DATA_START / SECTOR, 0)]),
            (
                "boot_a",
                vec![(boot_sectors, LP_TARGET_TYPE_LINEAR, DATA_START / SECTOR + 8, 0)],
            ),
            ("vendor", vec![(1, LP_TARGET_TYPE_ZERO, 0, 0)]),
        ],
        &["super"],
    );
    let raw = super_image(&metadata, &data);

    let sparse_path = dir.path().join("super.img");
    write(&sparse_path, &sparse_image(&raw))?;
    assert!(classify_file(&sparse_path)?.contains(Signature::AndroidSparse));

    let raw_path = dir.path().join("raw_image.img");
    let summary = unsparse_file(&sparse_path, &raw_path)?;
    assert_eq!(summary.output_size, raw.len() as u64);
    assert_eq!(fs::read(&raw_path)?, raw);

    let classification = classify_file(&raw_path)?;
    assert!(classification.contains(Signature::SuperPartition));
    assert!(!classification.contains(Signature::AndroidSparse));

    let out = dir.path().join("out");
    let image = SuperImage::open(&raw_path)?;
    let report = image.extract(&out, &ExtractOptions::default())?;
    assert!(report.skipped.is_empty());
    assert_eq!(report.partitions.len(), 3);

    assert_eq!(fs::read(out.join("system.img"))?, vec![b'S'; 4096]);
    assert_eq!(fs::read(out.join("vendor.img"))?, vec![0u8; SECTOR as usize]);
    let boot_path = out.join("boot_a.img");
    assert_eq!(fs::read(&boot_path)?, boot);
    assert!(classify_file(&boot_path)?.contains(Signature::AndroidBoot));

    let unpacked = out.join("boot_a");
    let report = unpack_file(&boot_path, &unpacked, &UnpackOptions::default())?;
    assert_eq!(report.header_version, 4);
    assert_eq!(fs::read(unpacked.join("kernel"))?, b"KERN");
    assert_eq!(fs::read(unpacked.join("ramdisk"))?, b"RAMD");

    let manifest = HeaderManifest::read(unpacked.join(HeaderManifest::FILE_NAME))?;
    assert_eq!(manifest.get("kernel_size"), Some(4));
    assert_eq!(manifest.get("os_version"), Some(0));
    Ok(())
}

#[test]
fn missing_sibling_device_leaves_a_hole() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let metadata = lp_metadata(
        &[(
            "product",
            vec![
                (1, LP_TARGET_TYPE_LINEAR, 0, 1),
                (1, LP_TARGET_TYPE_LINEAR, DATA_START / SECTOR, 0),
            ],
        )],
        &["super", "super_1"],
    );
    let path = dir.path().join("super.img");
    write(&path, &super_image(&metadata, &[b'P'; 512]))?;

    let out = dir.path().join("out");
    let report = SuperImage::open(&path)?.extract(&out, &ExtractOptions::default())?;
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].partition, "product");
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::MissingDevice {
            device: "super_1".into()
        }
    );

    let product = fs::read(out.join("product.img"))?;
    assert_eq!(product.len(), 1024);
    assert!(product[..512].iter().all(|&b| b == 0));
    assert!(product[512..].iter().all(|&b| b == b'P'));
    Ok(())
}

#[test]
fn sibling_device_is_read_from_img_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let metadata = lp_metadata(
        &[("odm", vec![(2, LP_TARGET_TYPE_LINEAR, 2, 1)])],
        &["super", "super_1"],
    );
    let path = dir.path().join("super.img");
    write(&path, &super_image(&metadata, &[]))?;
    let mut sibling = vec![0u8; 1024];
    sibling.extend_from_slice(&[b'O'; 1024]);
    write(&dir.path().join("super_1.img"), &sibling)?;

    let out = dir.path().join("out");
    let options = ExtractOptions {
        partitions: vec!["odm".into()],
    };
    let report = SuperImage::open(&path)?.extract(&out, &options)?;
    assert!(report.skipped.is_empty());
    assert_eq!(report.partitions[0].size, 1024);
    assert_eq!(fs::read(out.join("odm.img"))?, vec![b'O'; 1024]);
    Ok(())
}

#[test]
fn zero_extent_with_metadata_right_after_geometry() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let metadata = lp_metadata(
        &[
            ("system", vec![(1, LP_TARGET_TYPE_ZERO, 0, 0)]),
            ("vendor", vec![(2, LP_TARGET_TYPE_LINEAR, 8192 / SECTOR, 0)]),
        ],
        &["super"],
    );
    let image = super_image_with_copies(&metadata, 1);
    assert_eq!(&image[8192..8196], &LP_METADATA_HEADER_MAGIC.to_le_bytes());
    let path = dir.path().join("super.img");
    write(&path, &image)?;
    assert!(classify_file(&path)?.contains(Signature::SuperPartition));

    let super_image = SuperImage::open(&path)?;
    assert_eq!(super_image.metadata().slot, 0);
    assert_eq!(super_image.metadata().geometry.slot_offset(0), 8192);

    let out = dir.path().join("out");
    let report = super_image.extract(&out, &ExtractOptions::default())?;
    assert!(report.skipped.is_empty());
    assert_eq!(fs::read(out.join("system.img"))?, vec![0u8; SECTOR as usize]);
    assert_eq!(fs::read(out.join("vendor.img"))?, &image[8192..8192 + 1024]);
    Ok(())
}

#[test]
fn partition_named_like_a_path_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let metadata = lp_metadata(&[("../escaped", vec![(1, LP_TARGET_TYPE_ZERO, 0, 0)])], &["super"]);
    let path = dir.path().join("super.img");
    write(&path, &super_image(&metadata, &[]))?;

    let err = SuperImage::open(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(!dir.path().join("escaped.img").exists());
    Ok(())
}
