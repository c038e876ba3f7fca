//! Android sparse image decoding.
//!
//! A sparse image is a 28-byte header followed by `total_chunks` chunks, each
//! with a 12-byte header describing how many output blocks it covers and how
//! they are produced.

use crate::constants::{
    CHUNK_TYPE_CRC32, CHUNK_TYPE_DONT_CARE, CHUNK_TYPE_FILL, CHUNK_TYPE_RAW, SPARSE_HEADER_MAGIC,
    SPARSE_MAJOR_VERSION,
};
use crate::error::{Error, Result};
use crate::layouts::{SparseChunkView, SparseHeaderView};
use crate::sink::{AtomicFile, ImageSink};
use crate::utils::{ReadExt, SliceExt, WriteExt, copy_exact};
use std::fs::File;
use std::io::{BufReader, Read, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SparseHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub file_hdr_sz: u16,
    pub chunk_hdr_sz: u16,
    pub blk_sz: u32,
    pub total_blks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

impl SparseHeader {
    pub const SIZE: usize = SparseHeaderView::SIZE;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let view = SparseHeaderView::new(data).ok_or(Error::Truncated {
            structure: "sparse header",
            offset: 0,
        })?;
        if view.get_magic() != SPARSE_HEADER_MAGIC {
            return Err(Error::InvalidMagic {
                structure: "sparse header",
                offset: 0,
                found: view.get_magic(),
            });
        }

        let header = Self {
            major_version: view.get_major_version(),
            minor_version: view.get_minor_version(),
            file_hdr_sz: view.get_file_hdr_sz(),
            chunk_hdr_sz: view.get_chunk_hdr_sz(),
            blk_sz: view.get_blk_sz(),
            total_blks: view.get_total_blks(),
            total_chunks: view.get_total_chunks(),
            image_checksum: view.get_image_checksum(),
        };
        header.validate()?;
        Ok(header)
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; SparseHeaderView::SIZE];
        reader
            .read_pod(&mut raw)
            .map_err(|e| Error::read("sparse header", 0, e))?;
        Self::parse(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.major_version != SPARSE_MAJOR_VERSION {
            return Err(Error::UnsupportedVersion {
                structure: "sparse header",
                version: format!("{}.{}", self.major_version, self.minor_version),
            });
        }
        if (self.file_hdr_sz as usize) < SparseHeaderView::SIZE {
            return Err(Error::Malformed {
                field: "file_hdr_sz",
                offset: 8,
                reason: format!("{} < {}", self.file_hdr_sz, SparseHeaderView::SIZE),
            });
        }
        if (self.chunk_hdr_sz as usize) < SparseChunkView::SIZE {
            return Err(Error::Malformed {
                field: "chunk_hdr_sz",
                offset: 10,
                reason: format!("{} < {}", self.chunk_hdr_sz, SparseChunkView::SIZE),
            });
        }
        if self.blk_sz == 0 || self.blk_sz % 4 != 0 {
            return Err(Error::Malformed {
                field: "blk_sz",
                offset: 12,
                reason: format!("{} is not a non-zero multiple of 4", self.blk_sz),
            });
        }
        Ok(())
    }

    /// Size of the image once unsparsed.
    pub fn expanded_size(&self) -> u64 {
        self.total_blks as u64 * self.blk_sz as u64
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChunkType {
    Raw,
    Fill,
    DontCare,
    Crc32,
}

impl ChunkType {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            CHUNK_TYPE_RAW => Some(ChunkType::Raw),
            CHUNK_TYPE_FILL => Some(ChunkType::Fill),
            CHUNK_TYPE_DONT_CARE => Some(ChunkType::DontCare),
            CHUNK_TYPE_CRC32 => Some(ChunkType::Crc32),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SparseSummary {
    pub block_size: u32,
    pub total_blocks: u32,
    pub raw_chunks: u32,
    pub fill_chunks: u32,
    pub dont_care_chunks: u32,
    /// Checksums carried by CRC32 chunks. They are recorded, not verified.
    pub crc32_values: Vec<u32>,
    pub output_size: u64,
}

pub fn is_sparse(data: &[u8]) -> bool {
    data.u32_at(0) == Some(SPARSE_HEADER_MAGIC)
}

/// Decodes a sparse stream from `input` into `output`.
///
/// DONT_CARE chunks are skipped with a seek and the sink is sized to the full
/// expanded length at the end, so skipped ranges read back as zeros.
pub fn unsparse<R: Read, W: ImageSink>(input: &mut R, output: &mut W) -> Result<SparseSummary> {
    let header = SparseHeader::read(input)?;
    let mut in_pos = SparseHeaderView::SIZE as u64;

    let extra = header.file_hdr_sz as u64 - SparseHeaderView::SIZE as u64;
    if extra > 0 {
        input
            .skip(extra)
            .map_err(|e| Error::read("sparse header", in_pos, e))?;
        in_pos += extra;
    }

    debug!(?header, "parsed sparse header");

    let blk_sz = header.blk_sz as u64;
    let chunk_hdr_sz = header.chunk_hdr_sz as u64;
    let mut summary = SparseSummary {
        block_size: header.blk_sz,
        total_blocks: header.total_blks,
        ..Default::default()
    };

    output.seek(SeekFrom::Start(0)).map_err(|e| Error::Io("seek output", e))?;
    let mut block: u64 = 0;

    for index in 0..header.total_chunks {
        let chunk_offset = in_pos;
        let mut raw = [0u8; SparseChunkView::SIZE];
        input
            .read_pod(&mut raw)
            .map_err(|e| Error::read("sparse chunk header", chunk_offset, e))?;
        let view = SparseChunkView::new(&raw).ok_or(Error::Truncated {
            structure: "sparse chunk header",
            offset: chunk_offset,
        })?;
        if chunk_hdr_sz > SparseChunkView::SIZE as u64 {
            input
                .skip(chunk_hdr_sz - SparseChunkView::SIZE as u64)
                .map_err(|e| Error::read("sparse chunk header", chunk_offset, e))?;
        }
        in_pos += chunk_hdr_sz;

        let chunk_sz = view.get_chunk_sz() as u64;
        let total_sz = view.get_total_sz() as u64;
        let Some(payload_sz) = total_sz.checked_sub(chunk_hdr_sz) else {
            return Err(Error::Malformed {
                field: "chunk total_sz",
                offset: chunk_offset + 8,
                reason: format!("chunk #{index}: {total_sz} is smaller than the chunk header"),
            });
        };
        let chunk_type = ChunkType::from_raw(view.get_chunk_type()).ok_or_else(|| {
            Error::Malformed {
                field: "chunk_type",
                offset: chunk_offset,
                reason: format!("chunk #{index}: unknown type {:#06x}", view.get_chunk_type()),
            }
        })?;

        if chunk_type != ChunkType::Crc32 && block + chunk_sz > header.total_blks as u64 {
            return Err(Error::Malformed {
                field: "chunk_sz",
                offset: chunk_offset + 4,
                reason: format!(
                    "chunk #{index}: blocks {block}+{chunk_sz} exceed total {}",
                    header.total_blks
                ),
            });
        }
        let out_len = chunk_sz * blk_sz;

        let expect_payload = |expected: u64| -> Result<()> {
            if payload_sz != expected {
                return Err(Error::Malformed {
                    field: "chunk total_sz",
                    offset: chunk_offset + 8,
                    reason: format!(
                        "chunk #{index}: {chunk_type:?} payload is {payload_sz} bytes, \
                         expected {expected}"
                    ),
                });
            }
            Ok(())
        };

        match chunk_type {
            ChunkType::Raw => {
                expect_payload(out_len)?;
                let copied = copy_exact(input, output, out_len)
                    .map_err(|e| Error::Io("copy raw chunk", e))?;
                if copied != out_len {
                    return Err(Error::Truncated {
                        structure: "sparse raw chunk",
                        offset: in_pos + copied,
                    });
                }
                summary.raw_chunks += 1;
            }
            ChunkType::Fill => {
                expect_payload(4)?;
                let mut pattern = [0u8; 4];
                input
                    .read_pod(&mut pattern)
                    .map_err(|e| Error::read("sparse fill chunk", in_pos, e))?;
                output
                    .write_pattern(pattern, out_len)
                    .map_err(|e| Error::Io("write fill chunk", e))?;
                summary.fill_chunks += 1;
            }
            ChunkType::DontCare => {
                expect_payload(0)?;
                output
                    .seek(SeekFrom::Current(out_len as i64))
                    .map_err(|e| Error::Io("seek output", e))?;
                summary.dont_care_chunks += 1;
            }
            ChunkType::Crc32 => {
                expect_payload(4)?;
                let mut crc = [0u8; 4];
                input
                    .read_pod(&mut crc)
                    .map_err(|e| Error::read("sparse crc32 chunk", in_pos, e))?;
                summary.crc32_values.push(u32::from_le_bytes(crc));
            }
        }

        in_pos += payload_sz;
        if chunk_type != ChunkType::Crc32 {
            block += chunk_sz;
        }
    }

    let size = header.expanded_size();
    output
        .set_len(size)
        .map_err(|e| Error::Io("size output", e))?;
    output.flush().map_err(|e| Error::Io("flush output", e))?;
    summary.output_size = size;

    if block != header.total_blks as u64 {
        debug!(
            covered = block,
            total = header.total_blks,
            "chunks cover fewer blocks than declared, tail left as a hole"
        );
    }

    Ok(summary)
}

/// Unsparses `input` into a new file at `output`. Nothing is left at
/// `output` if decoding fails.
pub fn unsparse_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<SparseSummary> {
    let input = input.as_ref();
    let file = File::open(input).map_err(|e| Error::file(input, e))?;
    let mut reader = BufReader::new(file);

    let mut sink = AtomicFile::create(output.as_ref())?;
    let summary = unsparse(&mut reader, &mut sink)?;
    let path = sink.commit()?;

    info!(
        input = %input.display(),
        output = %path.display(),
        size = summary.output_size,
        "unsparsed image"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn header(blk_sz: u32, total_blks: u32, total_chunks: u32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&SPARSE_HEADER_MAGIC.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&28u16.to_le_bytes());
        v.extend_from_slice(&12u16.to_le_bytes());
        v.extend_from_slice(&blk_sz.to_le_bytes());
        v.extend_from_slice(&total_blks.to_le_bytes());
        v.extend_from_slice(&total_chunks.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes());
        v
    }

    fn chunk(v: &mut Vec<u8>, chunk_type: u16, chunk_sz: u32, payload: &[u8]) {
        v.extend_from_slice(&chunk_type.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&chunk_sz.to_le_bytes());
        v.extend_from_slice(&(12 + payload.len() as u32).to_le_bytes());
        v.extend_from_slice(payload);
    }

    fn decode(image: &[u8]) -> Result<(SparseSummary, Vec<u8>)> {
        let mut out = Cursor::new(Vec::new());
        let summary = unsparse(&mut Cursor::new(image), &mut out)?;
        Ok((summary, out.into_inner()))
    }

    #[test]
    fn raw_then_fill() {
        let mut image = header(4096, 3, 2);
        chunk(&mut image, CHUNK_TYPE_RAW, 1, &[b'A'; 4096]);
        chunk(&mut image, CHUNK_TYPE_FILL, 2, &[0xbb; 4]);

        let (summary, out) = decode(&image).unwrap();
        assert_eq!(out.len(), 12288);
        assert!(out[..4096].iter().all(|&b| b == b'A'));
        assert!(out[4096..].iter().all(|&b| b == 0xbb));
        assert_eq!(summary.raw_chunks, 1);
        assert_eq!(summary.fill_chunks, 1);
    }

    #[test]
    fn fill_pattern_keeps_byte_order() {
        let mut image = header(8, 1, 1);
        chunk(&mut image, CHUNK_TYPE_FILL, 1, &[1, 2, 3, 4]);
        let (_, out) = decode(&image).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn dont_care_reads_back_as_zeros() {
        let mut image = header(4, 4, 3);
        chunk(&mut image, CHUNK_TYPE_DONT_CARE, 1, &[]);
        chunk(&mut image, CHUNK_TYPE_RAW, 1, b"wxyz");
        chunk(&mut image, CHUNK_TYPE_DONT_CARE, 2, &[]);
        let (summary, out) = decode(&image).unwrap();
        assert_eq!(out, b"\0\0\0\0wxyz\0\0\0\0\0\0\0\0");
        assert_eq!(summary.dont_care_chunks, 2);
        assert_eq!(summary.output_size, 16);
    }

    #[test]
    fn crc32_chunk_is_recorded_not_checked() {
        let mut image = header(4, 1, 2);
        chunk(&mut image, CHUNK_TYPE_RAW, 1, b"abcd");
        chunk(&mut image, CHUNK_TYPE_CRC32, 0, &0xdeadbeef_u32.to_le_bytes());
        let (summary, out) = decode(&image).unwrap();
        assert_eq!(out, b"abcd");
        assert_eq!(summary.crc32_values, vec![0xdeadbeef]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = header(4096, 1, 0);
        image[0] = 0;
        let err = decode(&image).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic { offset: 0, .. }));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn rejects_truncated_header() {
        let image = header(4096, 1, 0);
        let err = decode(&image[..20]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn rejects_truncated_raw_data() {
        let mut image = header(4096, 1, 1);
        chunk(&mut image, CHUNK_TYPE_RAW, 1, &[0u8; 4096]);
        image.truncate(image.len() - 100);
        let err = decode(&image).unwrap_err();
        assert!(matches!(err, Error::Truncated { structure: "sparse raw chunk", .. }));
    }

    #[test]
    fn rejects_missing_chunk() {
        let mut image = header(4, 2, 2);
        chunk(&mut image, CHUNK_TYPE_RAW, 1, b"abcd");
        let err = decode(&image).unwrap_err();
        assert!(matches!(err, Error::Truncated { structure: "sparse chunk header", .. }));
    }

    #[test]
    fn rejects_unknown_chunk_type() {
        let mut image = header(4, 1, 1);
        chunk(&mut image, 0xcaff, 1, b"abcd");
        let err = decode(&image).unwrap_err();
        assert!(matches!(err, Error::Malformed { field: "chunk_type", .. }));
    }

    #[test]
    fn rejects_chunks_past_total_blocks() {
        let mut image = header(4, 1, 1);
        chunk(&mut image, CHUNK_TYPE_FILL, 2, &[0; 4]);
        assert!(decode(&image).is_err());
    }

    #[test]
    fn rejects_raw_size_mismatch() {
        let mut image = header(4, 2, 1);
        chunk(&mut image, CHUNK_TYPE_RAW, 2, b"abcd");
        let err = decode(&image).unwrap_err();
        assert!(matches!(err, Error::Malformed { field: "chunk total_sz", .. }));
    }

    #[test]
    fn skips_extended_headers() {
        let mut image = header(4, 1, 1);
        image[8..10].copy_from_slice(&32u16.to_le_bytes());
        image[10..12].copy_from_slice(&16u16.to_le_bytes());
        image.extend_from_slice(&[0xff; 4]);
        image.extend_from_slice(&CHUNK_TYPE_RAW.to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes());
        image.extend_from_slice(&20u32.to_le_bytes());
        image.extend_from_slice(&[0xee; 4]);
        image.extend_from_slice(b"data");
        let (_, out) = decode(&image).unwrap();
        assert_eq!(out, b"data");
    }

    #[test]
    fn failed_file_decode_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.img");
        let output = dir.path().join("raw.img");
        let mut image = header(4, 2, 2);
        chunk(&mut image, CHUNK_TYPE_RAW, 1, b"abcd");
        std::fs::write(&input, &image).unwrap();

        assert!(unsparse_file(&input, &output).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = unsparse_file(dir.path().join("nope.img"), dir.path().join("out.img"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn detects_sparse_magic() {
        assert!(is_sparse(&header(4096, 0, 0)));
        assert!(!is_sparse(b"ANDROID!"));
        assert!(!is_sparse(&[0x3a]));
    }
}
