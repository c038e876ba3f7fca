//! Magic-byte identification of firmware images.

use crate::constants::{
    AVB_FOOTER_MAGIC, AVB_FOOTER_SEARCH_SIZE, BOOT_MAGIC, DT_TABLE_MAGIC, DTB_MAGIC,
    EROFS_SUPER_MAGIC, EROFS_SUPER_OFFSET, LP_METADATA_GEOMETRY_MAGIC,
    LP_PARTITION_RESERVED_BYTES, LP_PARTITION_RESERVED_BYTES_16K, OTA_PAYLOAD_MAGIC,
    SPARSE_HEADER_MAGIC, VENDOR_BOOT_MAGIC,
};
use crate::error::{Error, Result};
use itertools::Itertools;
use memmap2::Mmap;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signature {
    AndroidSparse,
    AndroidBoot,
    VendorBoot,
    OtaPayload,
    Erofs,
    SuperPartition,
    AvbFooter,
    Dtb,
    DtTable,
    Lz4Frame,
}

impl Signature {
    pub fn name(&self) -> &'static str {
        match self {
            Signature::AndroidSparse => "Android Sparse",
            Signature::AndroidBoot => "Android Boot",
            Signature::VendorBoot => "Android Vendor Boot",
            Signature::OtaPayload => "OTA Payload",
            Signature::Erofs => "EROFS Filesystem",
            Signature::SuperPartition => "Super Partition",
            Signature::AvbFooter => "AVB 2.0 Footer",
            Signature::Dtb => "DTB",
            Signature::DtTable => "DT Table",
            Signature::Lz4Frame => "LZ4 Frame",
        }
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a signature's magic is searched for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SearchRule {
    /// Exactly at this byte offset.
    Offset(u64),
    /// Anywhere within the last `n` bytes.
    Tail(u64),
    /// Anywhere in the file.
    Anywhere,
}

#[derive(Debug)]
pub struct SignatureEntry {
    pub signature: Signature,
    pub magic: &'static [u8],
    pub rule: SearchRule,
}

const SPARSE_MAGIC_BYTES: [u8; 4] = SPARSE_HEADER_MAGIC.to_le_bytes();
const EROFS_MAGIC_BYTES: [u8; 4] = EROFS_SUPER_MAGIC.to_le_bytes();
const GEOMETRY_MAGIC_BYTES: [u8; 4] = LP_METADATA_GEOMETRY_MAGIC.to_le_bytes();
const DTB_MAGIC_BYTES: [u8; 4] = DTB_MAGIC.to_be_bytes();
const DT_TABLE_MAGIC_BYTES: [u8; 4] = DT_TABLE_MAGIC.to_be_bytes();

pub const SIGNATURES: &[SignatureEntry] = &[
    SignatureEntry {
        signature: Signature::AndroidSparse,
        magic: &SPARSE_MAGIC_BYTES,
        rule: SearchRule::Offset(0),
    },
    SignatureEntry {
        signature: Signature::AndroidBoot,
        magic: BOOT_MAGIC,
        rule: SearchRule::Offset(0),
    },
    SignatureEntry {
        signature: Signature::VendorBoot,
        magic: VENDOR_BOOT_MAGIC,
        rule: SearchRule::Offset(0),
    },
    SignatureEntry {
        signature: Signature::OtaPayload,
        magic: OTA_PAYLOAD_MAGIC,
        rule: SearchRule::Offset(0),
    },
    SignatureEntry {
        signature: Signature::Erofs,
        magic: &EROFS_MAGIC_BYTES,
        rule: SearchRule::Offset(EROFS_SUPER_OFFSET),
    },
    SignatureEntry {
        signature: Signature::SuperPartition,
        magic: &GEOMETRY_MAGIC_BYTES,
        rule: SearchRule::Offset(LP_PARTITION_RESERVED_BYTES),
    },
    SignatureEntry {
        signature: Signature::SuperPartition,
        magic: &GEOMETRY_MAGIC_BYTES,
        rule: SearchRule::Offset(LP_PARTITION_RESERVED_BYTES_16K),
    },
    SignatureEntry {
        signature: Signature::AvbFooter,
        magic: AVB_FOOTER_MAGIC,
        rule: SearchRule::Tail(AVB_FOOTER_SEARCH_SIZE),
    },
    SignatureEntry {
        signature: Signature::Dtb,
        magic: &DTB_MAGIC_BYTES,
        rule: SearchRule::Anywhere,
    },
    SignatureEntry {
        signature: Signature::DtTable,
        magic: &DT_TABLE_MAGIC_BYTES,
        rule: SearchRule::Anywhere,
    },
    SignatureEntry {
        signature: Signature::Lz4Frame,
        magic: b"\x04\x22\x4d\x18",
        rule: SearchRule::Anywhere,
    },
];

/// Result of classifying one file. Several signatures can match at once (a
/// sparse super image, a boot image carrying an AVB footer), and no match is
/// an explicit [`Classification::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Matched(BTreeSet<Signature>),
    Unknown,
}

impl Classification {
    pub fn contains(&self, signature: Signature) -> bool {
        match self {
            Classification::Matched(set) => set.contains(&signature),
            Classification::Unknown => false,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Classification::Unknown)
    }

    pub fn labels(&self) -> Vec<&'static str> {
        match self {
            Classification::Matched(set) => set.iter().map(Signature::name).collect(),
            Classification::Unknown => vec!["Unknown"],
        }
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.labels().iter().join(", "))
    }
}

fn contains_magic(haystack: &[u8], magic: &[u8]) -> bool {
    haystack.windows(magic.len()).any(|w| w == magic)
}

fn matches_rule(data: &[u8], entry: &SignatureEntry) -> bool {
    match entry.rule {
        SearchRule::Offset(offset) => {
            let start = offset as usize;
            data.get(start..start + entry.magic.len()) == Some(entry.magic)
        }
        SearchRule::Tail(window) => {
            let start = data.len().saturating_sub(window as usize);
            contains_magic(&data[start..], entry.magic)
        }
        SearchRule::Anywhere => contains_magic(data, entry.magic),
    }
}

pub fn classify_bytes(data: &[u8]) -> Classification {
    let matched: BTreeSet<Signature> = SIGNATURES
        .iter()
        .filter(|entry| matches_rule(data, entry))
        .map(|entry| entry.signature)
        .collect();

    if matched.is_empty() {
        Classification::Unknown
    } else {
        Classification::Matched(matched)
    }
}

/// Classifies the file at `path`. A missing file is [`Error::NotFound`]; any
/// other failure to open or map it is [`Error::File`].
pub fn classify_file(path: impl AsRef<Path>) -> Result<Classification> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let len = file.metadata().map_err(|e| Error::file(path, e))?.len();

    let classification = if len == 0 {
        Classification::Unknown
    } else {
        // SAFETY: the mapping is read-only and dropped before returning.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::file(path, e))?;
        classify_bytes(&map)
    };

    debug!(path = %path.display(), %classification, "classified image");
    Ok(classification)
}
