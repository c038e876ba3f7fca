use crate::compress::{CompressFormat, parse_compress_format};
use crate::constants::{BOOT_DEFAULT_PAGE_SIZE, BOOT_MAGIC};
use crate::error::{Error, Result};
use crate::layouts::{BOOT_HEADER_V3, BOOT_HEADER_V4, BootHeaderLayout};
use crate::manifest::{
    HeaderManifest, KEY_DTB_SIZE, KEY_HEADER_SIZE, KEY_HEADER_VERSION, KEY_KERNEL_SIZE,
    KEY_OS_VERSION, KEY_PAGE_SIZE, KEY_RAMDISK_SIZE,
};
use crate::sink::AtomicFile;
use crate::utils::{SliceExt, align_to, is_valid_alignment, trim_end};
use memmap2::Mmap;
use paste::paste;
use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OsVersion {
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

impl Display for OsVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}.{}.{}", self.a, self.b, self.c))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PatchLevel {
    pub year: u32,
    pub month: u32,
}

impl Display for PatchLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}-{:02}", self.year, self.month))
    }
}

/// Splits a packed `os_version` field. Zero means "not set".
pub fn decode_os_version(raw: u32) -> Option<(OsVersion, PatchLevel)> {
    if raw == 0 {
        return None;
    }
    let os_ver = raw >> 11;
    let patch_level = raw & 0x7ff;

    let a = (os_ver >> 14) & 0x7f;
    let b = (os_ver >> 7) & 0x7f;
    let c = os_ver & 0x7f;

    let year = (patch_level >> 4) + 2000;
    let month = patch_level & 0xf;

    Some((OsVersion { a, b, c }, PatchLevel { year, month }))
}

/// Header layout for a boot image header version.
pub fn layout_for_version(version: u32) -> Option<&'static BootHeaderLayout> {
    match version {
        3 => Some(&BOOT_HEADER_V3),
        4 => Some(&BOOT_HEADER_V4),
        _ => None,
    }
}

#[derive(Debug, Copy, Clone)]
pub struct BootHeader<'a> {
    data: &'a [u8],
    layout: &'static BootHeaderLayout,
}

macro_rules! impl_ifield_accessor {
    ($vis:vis, $name:ident $(,$suffix:ident)?) => {
        paste! {
            #[allow(unused)]
            $vis fn [<has_ $name $($suffix)?>](&self) -> bool {
                self.layout.[<offset_ $name>] != 0
            }
            /// Zero when the field is absent from this header version.
            #[allow(unused)]
            $vis fn [<get_ $name $($suffix)?>](&self) -> u32 {
                if !self.[<has_ $name $($suffix)?>]() {
                    return 0;
                }
                self.data
                    .u32_at(self.layout.[<offset_ $name>] as usize)
                    .unwrap_or_default()
            }
        }
    };
}

macro_rules! impl_sfield_accessor {
    ($vis:vis, $name:ident) => {
        paste! {
            #[allow(unused)]
            $vis fn [<get_ $name>](&self) -> &'a [u8] {
                let offset = self.layout.[<offset_ $name>] as usize;
                let sz = self.layout.[<size_ $name>] as usize;
                &self.data[offset..offset + sz]
            }
        }
    };
}

impl<'a> BootHeader<'a> {
    impl_ifield_accessor! { pub, kernel_size }
    impl_ifield_accessor! { pub, ramdisk_size }
    impl_ifield_accessor! { pub, os_version, _raw }
    impl_ifield_accessor! { pub, header_size }
    impl_ifield_accessor! { pub, header_version }
    impl_ifield_accessor! { pub, dtb_size }
    impl_sfield_accessor! { pub, cmdline }

    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if !data.starts_with(BOOT_MAGIC) {
            return Err(Error::InvalidMagic {
                structure: "boot header",
                offset: 0,
                found: data.u32_at(0).unwrap_or_default(),
            });
        }

        let version_offset = BOOT_HEADER_V3.offset_header_version as u64;
        let version = data.u32_at(version_offset as usize).ok_or(Error::Truncated {
            structure: "boot header",
            offset: version_offset,
        })?;
        let layout = layout_for_version(version).ok_or_else(|| Error::UnsupportedVersion {
            structure: "boot header",
            version: version.to_string(),
        })?;

        let data = data.get(..layout.total_size as usize).ok_or(Error::Truncated {
            structure: "boot header",
            offset: data.len() as u64,
        })?;

        Ok(Self { data, layout })
    }

    pub fn layout(&self) -> &'static BootHeaderLayout {
        self.layout
    }

    pub fn os_version(&self) -> Option<(OsVersion, PatchLevel)> {
        decode_os_version(self.get_os_version_raw())
    }

    /// The command line with its NUL padding removed.
    pub fn cmdline(&self) -> String {
        String::from_utf8_lossy(trim_end(self.get_cmdline())).into_owned()
    }

    /// Bytes taken by the fixed header fields and the command-line region.
    pub fn region_size(&self) -> u32 {
        self.layout.total_size as u32
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    pub page_size: u32,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            page_size: BOOT_DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Payload<'a> {
    pub offset: u64,
    data: &'a [u8],
    pub compress_format: CompressFormat,
}

impl<'a> Payload<'a> {
    pub fn get_data(&self) -> &'a [u8] {
        self.data
    }

    fn locate(image: &'a [u8], field: &'static str, offset: u64, size: u32) -> Result<Self> {
        let end = offset + size as u64;
        let data = image
            .get(offset as usize..end as usize)
            .ok_or_else(|| Error::Malformed {
                field,
                offset,
                reason: format!(
                    "payload {offset:#x}..{end:#x} exceeds image size {:#x}",
                    image.len()
                ),
            })?;
        Ok(Self {
            offset,
            data,
            compress_format: parse_compress_format(data),
        })
    }
}

#[derive(Debug)]
pub struct BootImage<'a> {
    header: BootHeader<'a>,
    page_size: u32,
    kernel: Payload<'a>,
    ramdisk: Payload<'a>,
    dtb: Option<Payload<'a>>,
}

impl<'a> BootImage<'a> {
    pub fn parse(data: &'a [u8], options: &UnpackOptions) -> Result<Self> {
        let page_size = options.page_size;
        if !is_valid_alignment(page_size) {
            return Err(Error::invalid(format!(
                "page size {page_size} is not a power of two"
            )));
        }
        let header = BootHeader::parse(data)?;
        let page = page_size as u64;

        let kernel_offset = align_to(header.region_size() as u64, page);
        let kernel = Payload::locate(data, "kernel", kernel_offset, header.get_kernel_size())?;

        let ramdisk_offset = kernel_offset + align_to(header.get_kernel_size() as u64, page);
        let ramdisk = Payload::locate(data, "ramdisk", ramdisk_offset, header.get_ramdisk_size())?;

        let dtb = if header.get_dtb_size() > 0 {
            let dtb_offset = ramdisk_offset + align_to(header.get_ramdisk_size() as u64, page);
            Some(Payload::locate(data, "dtb", dtb_offset, header.get_dtb_size())?)
        } else {
            None
        };

        debug!(
            version = header.get_header_version(),
            kernel_offset,
            ramdisk_offset,
            dtb = dtb.map(|d| d.offset),
            "parsed boot image"
        );

        Ok(Self {
            header,
            page_size,
            kernel,
            ramdisk,
            dtb,
        })
    }

    pub fn get_header(&self) -> &BootHeader<'a> {
        &self.header
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn get_kernel(&self) -> &Payload<'a> {
        &self.kernel
    }

    pub fn get_ramdisk(&self) -> &Payload<'a> {
        &self.ramdisk
    }

    pub fn get_dtb(&self) -> Option<&Payload<'a>> {
        self.dtb.as_ref()
    }

    pub fn manifest(&self) -> Result<HeaderManifest> {
        let header = &self.header;
        let mut manifest = HeaderManifest::new();
        manifest.insert(KEY_KERNEL_SIZE, header.get_kernel_size() as u64)?;
        manifest.insert(KEY_RAMDISK_SIZE, header.get_ramdisk_size() as u64)?;
        manifest.insert(KEY_OS_VERSION, header.get_os_version_raw() as u64)?;
        manifest.insert(KEY_HEADER_SIZE, header.get_header_size() as u64)?;
        manifest.insert(KEY_HEADER_VERSION, header.get_header_version() as u64)?;
        manifest.insert(KEY_DTB_SIZE, header.get_dtb_size() as u64)?;
        manifest.insert(KEY_PAGE_SIZE, self.page_size as u64)?;
        Ok(manifest)
    }

    /// Writes `kernel`, `ramdisk`, `dtb` (when present) and `header_info.txt`
    /// into `out_dir`.
    pub fn unpack(&self, out_dir: impl AsRef<Path>) -> Result<UnpackReport> {
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir).map_err(|e| Error::file(out_dir, e))?;

        let mut files = vec![
            write_artifact(out_dir, "kernel", self.kernel.get_data())?,
            write_artifact(out_dir, "ramdisk", self.ramdisk.get_data())?,
        ];
        if let Some(dtb) = &self.dtb {
            files.push(write_artifact(out_dir, "dtb", dtb.get_data())?);
        }
        let manifest = self.manifest()?;
        files.push(manifest.write(out_dir.join(HeaderManifest::FILE_NAME))?);

        let report = UnpackReport {
            header_version: self.header.get_header_version(),
            os_version: self
                .header
                .os_version()
                .map(|(version, patch)| format!("{version} ({patch})")),
            cmdline: self.header.cmdline(),
            kernel_format: self.kernel.compress_format,
            ramdisk_format: self.ramdisk.compress_format,
            manifest,
            files,
        };
        info!(
            out_dir = %out_dir.display(),
            version = report.header_version,
            kernel = %report.kernel_format,
            ramdisk = %report.ramdisk_format,
            "unpacked boot image"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone)]
pub struct UnpackReport {
    pub header_version: u32,
    /// Decoded `os_version`, `None` when the field is zero.
    pub os_version: Option<String>,
    pub cmdline: String,
    pub kernel_format: CompressFormat,
    pub ramdisk_format: CompressFormat,
    pub manifest: HeaderManifest,
    pub files: Vec<PathBuf>,
}

fn write_artifact(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let mut file = AtomicFile::create(dir.join(name))?;
    file.write_all(data)
        .map_err(|e| Error::file(file.path().to_path_buf(), e))?;
    file.commit()
}

/// Maps `image` and unpacks it into `out_dir`.
pub fn unpack_file(
    image: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    options: &UnpackOptions,
) -> Result<UnpackReport> {
    let image = image.as_ref();
    let file = File::open(image).map_err(|e| Error::file(image, e))?;
    // SAFETY: the mapping is only read while `map` is alive.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::file(image, e))?;
    BootImage::parse(&map, options)?.unpack(out_dir)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Builds a boot image the way the bootloader expects it laid out.
    pub(crate) fn build_image(
        version: u32,
        os_version: u32,
        cmdline: &[u8],
        kernel: &[u8],
        ramdisk: &[u8],
        dtb: &[u8],
    ) -> Vec<u8> {
        let layout = layout_for_version(version).unwrap();
        let mut image = vec![0u8; layout.total_size as usize];
        image[..8].copy_from_slice(BOOT_MAGIC);
        let mut put = |offset: u16, value: u32| {
            image[offset as usize..offset as usize + 4].copy_from_slice(&value.to_le_bytes());
        };
        put(layout.offset_kernel_size, kernel.len() as u32);
        put(layout.offset_ramdisk_size, ramdisk.len() as u32);
        put(layout.offset_os_version, os_version);
        put(layout.offset_header_size, layout.total_size as u32);
        put(layout.offset_header_version, version);
        if version >= 4 {
            put(layout.offset_dtb_size, dtb.len() as u32);
        }
        let off = layout.offset_cmdline as usize;
        image[off..off + cmdline.len()].copy_from_slice(cmdline);

        for payload in [kernel, ramdisk, dtb] {
            image.resize(align_to(image.len(), 4096), 0);
            image.extend_from_slice(payload);
        }
        image.resize(align_to(image.len(), 4096), 0);
        image
    }

    #[test]
    fn v4_with_zero_os_version() {
        let image = build_image(4, 0, b"", b"KERN", b"RAMD", b"");
        let boot = BootImage::parse(&image, &UnpackOptions::default()).unwrap();
        assert_eq!(boot.get_kernel().offset, 4096);
        assert_eq!(boot.get_kernel().get_data(), b"KERN");
        assert_eq!(boot.get_ramdisk().offset, 8192);
        assert_eq!(boot.get_ramdisk().get_data(), b"RAMD");
        assert!(boot.get_dtb().is_none());
        assert!(boot.get_header().os_version().is_none());

        let manifest = boot.manifest().unwrap();
        assert_eq!(manifest.get(KEY_OS_VERSION), Some(0));
        assert_eq!(manifest.get(KEY_HEADER_VERSION), Some(4));
        assert_eq!(manifest.get(KEY_HEADER_SIZE), Some(1584));
    }

    #[test]
    fn v3_has_no_dtb_field() {
        let image = build_image(3, 0, b"console=ttyS0", &[1; 5000], &[2; 10], b"");
        let boot = BootImage::parse(&image, &UnpackOptions::default()).unwrap();
        let header = boot.get_header();
        assert!(!header.has_dtb_size());
        assert_eq!(header.get_dtb_size(), 0);
        assert_eq!(header.cmdline(), "console=ttyS0");
        assert_eq!(boot.get_ramdisk().offset, 4096 + 8192);
    }

    #[test]
    fn v4_dtb_follows_ramdisk() {
        let image = build_image(4, 0, b"", b"k", b"r", b"\xd0\x0d\xfe\xed");
        let boot = BootImage::parse(&image, &UnpackOptions::default()).unwrap();
        let dtb = boot.get_dtb().unwrap();
        assert_eq!(dtb.offset, 3 * 4096);
        assert_eq!(dtb.get_data(), b"\xd0\x0d\xfe\xed");
    }

    #[test]
    fn decodes_os_version() {
        // 13.0.0, 2023-05
        let raw = (13 << 25) | ((23 << 4) | 5);
        let (version, patch) = decode_os_version(raw).unwrap();
        assert_eq!(version.to_string(), "13.0.0");
        assert_eq!(patch.to_string(), "2023-05");
    }

    #[test]
    fn reports_payload_compression() {
        let image = build_image(4, 0, b"", b"\x1f\x8b\x08\x00", b"\x04\x22\x4d\x18", b"");
        let boot = BootImage::parse(&image, &UnpackOptions::default()).unwrap();
        assert_eq!(boot.get_kernel().compress_format, CompressFormat::GZIP);
        assert_eq!(boot.get_ramdisk().compress_format, CompressFormat::LZ4);
    }

    #[test]
    fn rejects_bad_magic_and_versions() {
        let mut image = build_image(4, 0, b"", b"k", b"r", b"");
        image[0] = b'X';
        let err = BootImage::parse(&image, &UnpackOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic { offset: 0, .. }));

        let mut image = build_image(4, 0, b"", b"k", b"r", b"");
        image[40..44].copy_from_slice(&2u32.to_le_bytes());
        let err = BootImage::parse(&image, &UnpackOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { .. }));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn rejects_payload_past_end() {
        let mut image = build_image(4, 0, b"", b"k", b"r", b"");
        image[12..16].copy_from_slice(&100_000u32.to_le_bytes());
        let err = BootImage::parse(&image, &UnpackOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Malformed { field: "ramdisk", .. }));
    }

    #[test]
    fn rejects_truncated_header() {
        let image = build_image(4, 0, b"", b"", b"", b"");
        let err = BootHeader::parse(&image[..1000]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn rejects_bad_page_size() {
        let image = build_image(4, 0, b"", b"k", b"r", b"");
        let err = BootImage::parse(&image, &UnpackOptions { page_size: 3000 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn unpacks_artifacts_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.img");
        fs::write(&path, build_image(4, 0, b"", b"KERN", b"RAMD", b"")).unwrap();

        let out = dir.path().join("out");
        let report = unpack_file(&path, &out, &UnpackOptions::default()).unwrap();
        assert_eq!(report.header_version, 4);
        assert_eq!(report.os_version, None);
        assert_eq!(fs::read(out.join("kernel")).unwrap(), b"KERN");
        assert_eq!(fs::read(out.join("ramdisk")).unwrap(), b"RAMD");
        assert!(!out.join("dtb").exists());

        let text = fs::read_to_string(out.join("header_info.txt")).unwrap();
        assert!(text.lines().any(|l| l == "os_version:0"));
        assert!(text.lines().any(|l| l == "header_version:4"));
        assert!(text.lines().any(|l| l == "kernel_size:4"));
    }
}
