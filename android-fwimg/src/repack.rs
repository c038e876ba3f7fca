//! Reassembles a boot image from unpacked parts.

use crate::bootimg::layout_for_version;
use crate::constants::{BOOT_DEFAULT_PAGE_SIZE, BOOT_MAGIC};
use crate::error::{Error, Result};
use crate::layouts::BootHeaderLayout;
use crate::manifest::HeaderManifest;
use crate::sink::{AtomicFile, ImageSink};
use crate::utils::{WriteExt, align_to, is_valid_alignment};
use paste::paste;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RepackOptions {
    kernel: PathBuf,
    ramdisk: PathBuf,
    dtb: Option<PathBuf>,
    cmdline: Option<String>,
    page_size: Option<u32>,
}

impl RepackOptions {
    pub fn new(kernel: impl Into<PathBuf>, ramdisk: impl Into<PathBuf>) -> Self {
        Self {
            kernel: kernel.into(),
            ramdisk: ramdisk.into(),
            dtb: None,
            cmdline: None,
            page_size: None,
        }
    }

    pub fn dtb(mut self, dtb: impl Into<PathBuf>) -> Self {
        self.dtb = Some(dtb.into());
        self
    }

    pub fn cmdline(mut self, cmdline: impl Into<String>) -> Self {
        self.cmdline = Some(cmdline.into());
        self
    }

    /// Overrides the manifest's `page_size`.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Header values that do not depend on the payloads, checked before any
/// output is created.
#[derive(Debug, Clone)]
pub struct HeaderPlan {
    pub layout: &'static BootHeaderLayout,
    pub header_version: u32,
    pub os_version: u32,
    pub header_size: u32,
    pub page_size: u32,
    pub cmdline: Vec<u8>,
}

impl HeaderPlan {
    pub fn new(
        manifest: &HeaderManifest,
        cmdline: Option<&str>,
        page_size: Option<u32>,
        with_dtb: bool,
    ) -> Result<Self> {
        let header_version = manifest.header_version()?;
        let layout = layout_for_version(header_version).ok_or_else(|| {
            Error::invalid(format!("cannot repack header version {header_version}, only 3 and 4"))
        })?;
        if with_dtb && layout.offset_dtb_size == 0 {
            return Err(Error::invalid(format!(
                "header version {header_version} has no dtb field"
            )));
        }

        let page_size = match page_size {
            Some(page_size) => page_size,
            None => manifest.page_size()?.unwrap_or(BOOT_DEFAULT_PAGE_SIZE),
        };
        if !is_valid_alignment(page_size) || page_size < layout.total_size as u32 {
            return Err(Error::invalid(format!(
                "page size {page_size} must be a power of two of at least {}",
                layout.total_size
            )));
        }

        let cmdline = cmdline.unwrap_or_default().as_bytes().to_vec();
        let max = layout.size_cmdline as usize;
        if cmdline.len() > max {
            return Err(Error::CmdlineTooLong {
                len: cmdline.len(),
                max,
            });
        }

        Ok(Self {
            layout,
            header_version,
            os_version: manifest.os_version()?,
            header_size: manifest.header_size(layout.total_size as u32)?,
            page_size,
            cmdline,
        })
    }

    /// Header region with every payload size still zero.
    fn header_bytes(&self) -> Vec<u8> {
        let layout = self.layout;
        let mut header = vec![0u8; layout.total_size as usize];
        header[..BOOT_MAGIC.len()].copy_from_slice(BOOT_MAGIC);
        for (offset, value) in [
            (layout.offset_os_version, self.os_version),
            (layout.offset_header_size, self.header_size),
            (layout.offset_header_version, self.header_version),
        ] {
            let offset = offset as usize;
            header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        let offset = layout.offset_cmdline as usize;
        header[offset..offset + self.cmdline.len()].copy_from_slice(&self.cmdline);
        header
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PayloadSizes {
    pub kernel_size: u32,
    pub ramdisk_size: u32,
    pub dtb_size: u32,
    /// Total image size, a multiple of the page size.
    pub image_size: u64,
}

fn payload_size(name: &str, size: u64) -> Result<u32> {
    u32::try_from(size).map_err(|_| Error::invalid(format!("{name} is {size} bytes, over 4 GiB")))
}

/// Writes a boot image to `output`: header, then each payload starting on a
/// page boundary. Payload sizes are patched into the header once known.
pub fn write_boot_image<W: ImageSink>(
    output: &mut W,
    plan: &HeaderPlan,
    kernel: &mut dyn Read,
    ramdisk: &mut dyn Read,
    dtb: Option<&mut dyn Read>,
) -> Result<PayloadSizes> {
    let page = plan.page_size as u64;
    let header = plan.header_bytes();

    output
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::Io("seek output", e))?;
    output
        .write_all(&header)
        .map_err(|e| Error::Io("write boot header", e))?;
    let mut pos = header.len() as u64;

    macro_rules! file_align {
        () => {
            pos = output
                .seek(SeekFrom::Start(align_to(pos, page)))
                .map_err(|e| Error::Io("seek output", e))?;
        };
    }

    macro_rules! copy_block {
        ($name:ident, $reader:expr) => {{
            file_align!();
            let offset = pos;
            let copied = io::copy($reader, output)
                .map_err(|e| Error::Io(concat!("copy ", stringify!($name)), e))?;
            pos += copied;
            debug!(payload = stringify!($name), offset, size = copied, "payload written");
            payload_size(stringify!($name), copied)?
        }};
    }

    let kernel_size = copy_block! { kernel, kernel };
    let ramdisk_size = copy_block! { ramdisk, ramdisk };
    let dtb_size = match dtb {
        Some(reader) => copy_block! { dtb, reader },
        None => 0,
    };
    file_align!();

    output
        .set_len(pos)
        .map_err(|e| Error::Io("size output", e))?;

    macro_rules! patch_size {
        ($name:ident, $size:expr) => {
            paste! {
                if plan.layout.[<offset_ $name _size>] != 0 {
                    output
                        .seek(SeekFrom::Start(plan.layout.[<offset_ $name _size>] as u64))
                        .map_err(|e| Error::Io("seek output", e))?;
                    output
                        .write_pod(&$size.to_le_bytes())
                        .map_err(|e| Error::Io("patch boot header", e))?;
                }
            }
        };
    }

    patch_size! { kernel, kernel_size }
    patch_size! { ramdisk, ramdisk_size }
    patch_size! { dtb, dtb_size }

    output.flush().map_err(|e| Error::Io("flush output", e))?;

    Ok(PayloadSizes {
        kernel_size,
        ramdisk_size,
        dtb_size,
        image_size: pos,
    })
}

fn open_payload(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::file(path, e))
}

/// Repacks the parts named in `options` into `output`. Nothing is written to
/// `output` unless the whole image was produced.
pub fn repack(
    manifest: &HeaderManifest,
    options: &RepackOptions,
    output: impl AsRef<Path>,
) -> Result<PayloadSizes> {
    let plan = HeaderPlan::new(
        manifest,
        options.cmdline.as_deref(),
        options.page_size,
        options.dtb.is_some(),
    )?;

    let mut kernel = open_payload(&options.kernel)?;
    let mut ramdisk = open_payload(&options.ramdisk)?;
    let mut dtb = options.dtb.as_deref().map(open_payload).transpose()?;

    let mut sink = AtomicFile::create(output.as_ref())?;
    let sizes = write_boot_image(
        &mut sink,
        &plan,
        &mut kernel,
        &mut ramdisk,
        dtb.as_mut().map(|reader| reader as &mut dyn Read),
    )?;
    let path = sink.commit()?;

    info!(
        output = %path.display(),
        version = plan.header_version,
        page_size = plan.page_size,
        kernel = sizes.kernel_size,
        ramdisk = sizes.ramdisk_size,
        dtb = sizes.dtb_size,
        "repacked boot image"
    );
    Ok(sizes)
}

/// [`repack`] with the manifest read from `header_info`.
pub fn repack_file(
    header_info: impl AsRef<Path>,
    options: &RepackOptions,
    output: impl AsRef<Path>,
) -> Result<PayloadSizes> {
    let manifest = HeaderManifest::read(header_info)?;
    repack(&manifest, options, output)
}
