// Boot image (v3/v4)
pub const BOOT_MAGIC: &[u8] = b"ANDROID!";
pub const VENDOR_BOOT_MAGIC: &[u8] = b"VNDRBOOT";
pub const BOOT_ARGS_SIZE: usize = 512;
pub const BOOT_EXTRA_ARGS_SIZE: usize = 1024;
pub const BOOT_CMDLINE_SIZE: usize = BOOT_ARGS_SIZE + BOOT_EXTRA_ARGS_SIZE;
pub const BOOT_DEFAULT_PAGE_SIZE: u32 = 4096;

// Sparse image
pub const SPARSE_HEADER_MAGIC: u32 = 0xed26ff3a;
pub const SPARSE_MAJOR_VERSION: u16 = 1;
pub const CHUNK_TYPE_RAW: u16 = 0xcac1;
pub const CHUNK_TYPE_FILL: u16 = 0xcac2;
pub const CHUNK_TYPE_DONT_CARE: u16 = 0xcac3;
pub const CHUNK_TYPE_CRC32: u16 = 0xcac4;

// Logical partitions (super)
pub const LP_PARTITION_RESERVED_BYTES: u64 = 4096;
/// Geometry offset used by devices with 16 KiB pages.
pub const LP_PARTITION_RESERVED_BYTES_16K: u64 = 16384;
/// Padded on-disk size of one geometry copy. A primary and a backup copy
/// precede the metadata slots.
pub const LP_METADATA_GEOMETRY_SIZE: u64 = 4096;
pub const LP_METADATA_GEOMETRY_MAGIC: u32 = 0x616c4467;
pub const LP_METADATA_HEADER_MAGIC: u32 = 0x414c5030;
pub const LP_NAME_SIZE: usize = 36;
pub const LP_TARGET_TYPE_LINEAR: u32 = 0;
pub const LP_TARGET_TYPE_ZERO: u32 = 1;

// Misc signatures
pub const AVB_FOOTER_MAGIC: &[u8] = b"AVBf";
pub const AVB_FOOTER_SEARCH_SIZE: u64 = 64 * 1024;
pub const OTA_PAYLOAD_MAGIC: &[u8] = b"CrAU";
pub const EROFS_SUPER_OFFSET: u64 = 1024;
pub const EROFS_SUPER_MAGIC: u32 = 0xe0f5e1e2;
pub const DTB_MAGIC: u32 = 0xd00dfeed;
pub const DT_TABLE_MAGIC: u32 = 0xd7b7ab1e;

/// Upper bound for a single buffered copy while streaming large images.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;
