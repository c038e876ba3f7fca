use crate::utils::SliceExt;
use std::fmt::{Display, Formatter};

const GZIP1_MAGIC: &[u8] = b"\x1f\x8b";
const GZIP2_MAGIC: &[u8] = b"\x1f\x9e";
const LZOP_MAGIC: &[u8] = b"\x89LZO";
const XZ_MAGIC: &[u8] = b"\xfd7zXZ";
const BZIP_MAGIC: &[u8] = b"BZh";
const LZ4_LEG_MAGIC: &[u8] = b"\x02\x21\x4c\x18";
const LZ41_MAGIC: &[u8] = b"\x03\x21\x4c\x18";
const LZ42_MAGIC: &[u8] = b"\x04\x22\x4d\x18";

/// Compression of a kernel or ramdisk payload, as far as its leading bytes
/// tell. Payloads are never decompressed here.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressFormat {
    UNKNOWN,
    GZIP,
    LZOP,
    XZ,
    LZMA,
    BZIP2,
    LZ4,
    LZ4_LEGACY,
}

impl Display for CompressFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompressFormat::UNKNOWN => "raw",
            CompressFormat::GZIP => "gzip",
            CompressFormat::LZOP => "lzop",
            CompressFormat::XZ => "xz",
            CompressFormat::LZMA => "lzma",
            CompressFormat::BZIP2 => "bzip2",
            CompressFormat::LZ4 => "lz4",
            CompressFormat::LZ4_LEGACY => "lz4_legacy",
        };
        f.write_str(name)
    }
}

fn guess_lzma(data: &[u8]) -> bool {
    if data.len() <= 13 {
        return false;
    }

    if data[0] != b'\x5d' {
        return false;
    }

    let Some(dict_size) = data.u32_at(1) else {
        return false;
    };

    if dict_size == 0 || (dict_size & (dict_size - 1)) != 0 {
        return false;
    }

    &data[5..13] == b"\xff\xff\xff\xff\xff\xff\xff\xff"
}

pub fn parse_compress_format(data: &[u8]) -> CompressFormat {
    if data.starts_with(GZIP1_MAGIC) || data.starts_with(GZIP2_MAGIC) {
        CompressFormat::GZIP
    } else if data.starts_with(LZOP_MAGIC) {
        CompressFormat::LZOP
    } else if data.starts_with(XZ_MAGIC) {
        CompressFormat::XZ
    } else if data.starts_with(BZIP_MAGIC) {
        CompressFormat::BZIP2
    } else if data.starts_with(LZ41_MAGIC) || data.starts_with(LZ42_MAGIC) {
        CompressFormat::LZ4
    } else if data.starts_with(LZ4_LEG_MAGIC) {
        CompressFormat::LZ4_LEGACY
    } else if guess_lzma(data) {
        CompressFormat::LZMA
    } else {
        CompressFormat::UNKNOWN
    }
}
