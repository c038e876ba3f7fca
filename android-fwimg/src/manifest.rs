//! `header_info.txt`: the boot header fields written by unpack and read
//! back by repack, one `key:value` pair per line.

use crate::error::{Error, Result};
use crate::sink::AtomicFile;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const KEY_KERNEL_SIZE: &str = "kernel_size";
pub const KEY_RAMDISK_SIZE: &str = "ramdisk_size";
pub const KEY_OS_VERSION: &str = "os_version";
pub const KEY_HEADER_SIZE: &str = "header_size";
pub const KEY_HEADER_VERSION: &str = "header_version";
pub const KEY_DTB_SIZE: &str = "dtb_size";
pub const KEY_PAGE_SIZE: &str = "page_size";

const DEFAULT_HEADER_VERSION: u32 = 4;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderManifest {
    entries: Vec<(String, u64)>,
}

impl HeaderManifest {
    pub const FILE_NAME: &'static str = "header_info.txt";

    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key`. Keys are unique.
    pub fn insert(&mut self, key: impl Into<String>, value: u64) -> Result<()> {
        let key = key.into();
        if self.get(&key).is_some() {
            return Err(Error::invalid(format!("duplicate header_info key '{key}'")));
        }
        self.entries.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        self.get(key)
            .map(|value| {
                u32::try_from(value).map_err(|_| {
                    Error::invalid(format!("header_info {key} {value} does not fit in 32 bits"))
                })
            })
            .transpose()
    }

    /// `header_version`, 4 when absent.
    pub fn header_version(&self) -> Result<u32> {
        Ok(self.get_u32(KEY_HEADER_VERSION)?.unwrap_or(DEFAULT_HEADER_VERSION))
    }

    pub fn os_version(&self) -> Result<u32> {
        Ok(self.get_u32(KEY_OS_VERSION)?.unwrap_or(0))
    }

    /// `header_size`, or `region_size` when absent.
    pub fn header_size(&self, region_size: u32) -> Result<u32> {
        Ok(self.get_u32(KEY_HEADER_SIZE)?.unwrap_or(region_size))
    }

    pub fn page_size(&self) -> Result<Option<u32>> {
        self.get_u32(KEY_PAGE_SIZE)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut manifest = Self::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let lineno = index + 1;
            let Some((key, value)) = line.split_once(':') else {
                return Err(Error::invalid(format!(
                    "header_info line {lineno}: expected key:value, got '{line}'"
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::invalid(format!("header_info line {lineno}: empty key")));
            }
            let value = value.trim().parse::<u64>().map_err(|e| {
                Error::invalid(format!("header_info line {lineno}: {key}: {e}"))
            })?;
            manifest.insert(key, value)?;
        }
        Ok(manifest)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
        Self::parse(&text)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let mut file = AtomicFile::create(path)?;
        write!(file, "{self}").map_err(|e| Error::file(file.path().to_path_buf(), e))?;
        file.commit()
    }
}

impl Display for HeaderManifest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}:{value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_and_keeps_order() {
        let manifest = HeaderManifest::parse("kernel_size:4\n\nos_version: 0\nheader_version:3\n")
            .unwrap();
        assert_eq!(manifest.get(KEY_KERNEL_SIZE), Some(4));
        assert_eq!(manifest.header_version().unwrap(), 3);
        assert_eq!(manifest.to_string(), "kernel_size:4\nos_version:0\nheader_version:3\n");
    }

    #[test]
    fn defaults_for_missing_keys() {
        let manifest = HeaderManifest::parse("").unwrap();
        assert_eq!(manifest.header_version().unwrap(), 4);
        assert_eq!(manifest.os_version().unwrap(), 0);
        assert_eq!(manifest.header_size(1584).unwrap(), 1584);
        assert_eq!(manifest.page_size().unwrap(), None);
    }

    #[test]
    fn rejects_bad_lines() {
        for text in [
            "kernel_size",
            "kernel_size:four",
            ":4",
            "kernel_size:-1",
            "os_version:1\nos_version:2",
        ] {
            let err = HeaderManifest::parse(text).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{text}");
        }
    }

    #[test]
    fn rejects_out_of_range_values() {
        let manifest = HeaderManifest::parse("os_version:4294967296").unwrap();
        assert!(manifest.os_version().is_err());
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = HeaderManifest::new();
        manifest.insert(KEY_HEADER_VERSION, 4).unwrap();
        manifest.insert(KEY_PAGE_SIZE, 4096).unwrap();
        let path = manifest.write(dir.path().join(HeaderManifest::FILE_NAME)).unwrap();
        assert_eq!(HeaderManifest::read(&path).unwrap(), manifest);
    }
}
