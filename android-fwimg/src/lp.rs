//! Logical partition ("super" image) metadata and extraction.
//!
//! A super image starts with a reserved area, then the geometry (usually
//! followed by a backup copy), then `metadata_slot_count` metadata slots. The first slot
//! whose header magic matches is used. Partition data is addressed through
//! extents that point into one of the listed block devices; device 0 is the
//! super image itself.

use crate::constants::{
    LP_METADATA_GEOMETRY_MAGIC, LP_METADATA_GEOMETRY_SIZE, LP_METADATA_HEADER_MAGIC,
    LP_PARTITION_RESERVED_BYTES, LP_PARTITION_RESERVED_BYTES_16K, LP_TARGET_TYPE_LINEAR,
    LP_TARGET_TYPE_ZERO,
};
use crate::error::{Error, Result};
use crate::layouts::{
    LpBlockDeviceView, LpExtentView, LpGeometryView, LpGroupView, LpHeaderView, LpPartitionView,
};
use crate::sink::{AtomicFile, ImageSink};
use crate::sparse::is_sparse;
use crate::utils::{ReadExt, WriteExt, copy_exact, fixed_name};
use itertools::Itertools;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_full(buf)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Where the primary copy was found.
    pub offset: u64,
    pub struct_size: u32,
    pub metadata_max_size: u32,
    pub metadata_slot_count: u32,
    pub logical_block_size: u32,
    /// A backup geometry copy directly follows the primary one.
    pub has_backup: bool,
}

impl Geometry {
    fn from_view(view: LpGeometryView, offset: u64, has_backup: bool) -> Result<Self> {
        let geometry = Self {
            offset,
            struct_size: view.get_struct_size(),
            metadata_max_size: view.get_metadata_max_size(),
            metadata_slot_count: view.get_metadata_slot_count(),
            logical_block_size: view.get_logical_block_size(),
            has_backup,
        };
        if geometry.logical_block_size == 0 {
            return Err(Error::Malformed {
                field: "logical_block_size",
                offset: offset + 48,
                reason: "must not be zero".into(),
            });
        }
        if geometry.metadata_max_size == 0 {
            return Err(Error::Malformed {
                field: "metadata_max_size",
                offset: offset + 40,
                reason: "must not be zero".into(),
            });
        }
        Ok(geometry)
    }

    /// Locates the geometry at its usual offset, falling back to the offset
    /// used on 16 KiB page devices.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut first_magic = None;
        for offset in [LP_PARTITION_RESERVED_BYTES, LP_PARTITION_RESERVED_BYTES_16K] {
            let mut raw = [0u8; LpGeometryView::SIZE];
            let n = read_at(reader, offset, &mut raw)
                .map_err(|e| Error::read("LP geometry", offset, e))?;
            let Some(view) = LpGeometryView::new(&raw[..n]) else {
                debug!(offset, "image too short for a geometry here");
                continue;
            };
            if view.get_magic() == LP_METADATA_GEOMETRY_MAGIC {
                let backup_offset = offset + LP_METADATA_GEOMETRY_SIZE;
                let mut magic = [0u8; 4];
                let n = read_at(reader, backup_offset, &mut magic)
                    .map_err(|e| Error::read("LP geometry", backup_offset, e))?;
                let has_backup = magic[..n] == LP_METADATA_GEOMETRY_MAGIC.to_le_bytes();
                debug!(offset, has_backup, "found LP geometry");
                return Self::from_view(view, offset, has_backup);
            }
            first_magic.get_or_insert(view.get_magic());
        }

        match first_magic {
            Some(found) => Err(Error::InvalidMagic {
                structure: "LP geometry",
                offset: LP_PARTITION_RESERVED_BYTES,
                found,
            }),
            None => Err(Error::Truncated {
                structure: "LP geometry",
                offset: LP_PARTITION_RESERVED_BYTES,
            }),
        }
    }

    /// Offset of metadata slot 0: right after the geometry, or after the
    /// backup copy when one is present.
    pub fn metadata_base(&self) -> u64 {
        let copies = if self.has_backup { 2 } else { 1 };
        self.offset + copies * LP_METADATA_GEOMETRY_SIZE
    }

    pub fn slot_offset(&self, slot: u32) -> u64 {
        self.metadata_base() + slot as u64 * self.metadata_max_size as u64
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub offset: u32,
    pub num_entries: u32,
    pub entry_size: u32,
}

impl TableDescriptor {
    pub fn byte_len(&self) -> u64 {
        self.num_entries as u64 * self.entry_size as u64
    }

    fn check_bounds(&self, table: &'static str, tables_size: u32) -> Result<()> {
        if self.offset as u64 + self.byte_len() > tables_size as u64 {
            return Err(Error::TableOutOfBounds {
                table,
                offset: self.offset as u64,
                len: self.byte_len(),
                tables_size: tables_size as u64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MetadataHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub header_size: u32,
    pub tables_size: u32,
    pub partitions: TableDescriptor,
    pub extents: TableDescriptor,
    pub groups: TableDescriptor,
    pub block_devices: TableDescriptor,
}

impl MetadataHeader {
    fn from_view(view: LpHeaderView, slot_offset: u64, geometry: &Geometry) -> Result<Self> {
        let header = Self {
            major_version: view.get_major_version(),
            minor_version: view.get_minor_version(),
            header_size: view.get_header_size(),
            tables_size: view.get_tables_size(),
            partitions: TableDescriptor {
                offset: view.get_partitions_offset(),
                num_entries: view.get_partitions_num_entries(),
                entry_size: view.get_partitions_entry_size(),
            },
            extents: TableDescriptor {
                offset: view.get_extents_offset(),
                num_entries: view.get_extents_num_entries(),
                entry_size: view.get_extents_entry_size(),
            },
            groups: TableDescriptor {
                offset: view.get_groups_offset(),
                num_entries: view.get_groups_num_entries(),
                entry_size: view.get_groups_entry_size(),
            },
            block_devices: TableDescriptor {
                offset: view.get_block_devices_offset(),
                num_entries: view.get_block_devices_num_entries(),
                entry_size: view.get_block_devices_entry_size(),
            },
        };

        if (header.header_size as usize) < LpHeaderView::SIZE {
            return Err(Error::Malformed {
                field: "header_size",
                offset: slot_offset + 8,
                reason: format!("{} < {}", header.header_size, LpHeaderView::SIZE),
            });
        }
        let used = header.header_size as u64 + header.tables_size as u64;
        if used > geometry.metadata_max_size as u64 {
            return Err(Error::Malformed {
                field: "tables_size",
                offset: slot_offset + 44,
                reason: format!(
                    "header and tables ({used} bytes) exceed metadata_max_size {}",
                    geometry.metadata_max_size
                ),
            });
        }
        Ok(header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub attributes: u32,
    pub first_extent_index: u32,
    pub num_extents: u32,
    pub group_index: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExtentTarget {
    /// Data at sector `sector` of block device `device`.
    Linear { device: u32, sector: u64 },
    Zero,
    Unsupported(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Extent {
    pub num_sectors: u64,
    pub target: ExtentTarget,
}

impl Extent {
    fn from_view(view: LpExtentView) -> Self {
        let target = match view.get_target_type() {
            LP_TARGET_TYPE_LINEAR => ExtentTarget::Linear {
                device: view.get_target_source(),
                sector: view.get_target_data(),
            },
            LP_TARGET_TYPE_ZERO => ExtentTarget::Zero,
            other => ExtentTarget::Unsupported(other),
        };
        Self {
            num_sectors: view.get_num_sectors(),
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub flags: u32,
    pub maximum_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub first_logical_sector: u64,
    pub alignment: u32,
    pub alignment_offset: u32,
    pub size: u64,
    pub partition_name: String,
    pub flags: u32,
}

/// One row of [`Metadata::summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub name: String,
    pub group: Option<String>,
    pub size: u64,
    pub num_extents: u32,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub geometry: Geometry,
    /// Index of the slot the tables were read from.
    pub slot: u32,
    pub header: MetadataHeader,
    /// Partitions with a non-empty name, in table order.
    pub partitions: Vec<Partition>,
    pub extents: Vec<Extent>,
    pub groups: Vec<Group>,
    pub block_devices: Vec<BlockDevice>,
}

/// Splits a table into entries of `desc.entry_size` bytes.
fn table_entries<'t>(
    tables: &'t [u8],
    desc: &TableDescriptor,
) -> impl Iterator<Item = &'t [u8]> + 't {
    let start = desc.offset as usize;
    let size = desc.entry_size as usize;
    (0..desc.num_entries as usize).map(move |i| &tables[start + i * size..start + (i + 1) * size])
}

fn check_entry_size(
    table: &'static str,
    desc: &TableDescriptor,
    record: usize,
    tables_offset: u64,
) -> Result<()> {
    if (desc.entry_size as usize) < record {
        return Err(Error::Malformed {
            field: table,
            offset: tables_offset + desc.offset as u64,
            reason: format!("entry size {} is smaller than {record}", desc.entry_size),
        });
    }
    Ok(())
}

fn entry_view<'t, V>(
    entry: &'t [u8],
    new: fn(&'t [u8]) -> Option<V>,
    structure: &'static str,
    offset: u64,
) -> Result<V> {
    new(entry).ok_or(Error::Truncated { structure, offset })
}

/// Names become file names in the output and device directories, so each
/// must be a single plain path component.
fn check_file_name(field: &'static str, name: &str, offset: u64) -> Result<()> {
    let mut components = Path::new(name).components();
    let plain = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains(['/', '\\']);
    if !plain {
        return Err(Error::Malformed {
            field,
            offset,
            reason: format!("'{name}' is not a plain file name"),
        });
    }
    Ok(())
}

fn metadata_extents<'e>(extents: &'e [Extent], partition: &Partition) -> &'e [Extent] {
    let start = partition.first_extent_index as usize;
    &extents[start..start + partition.num_extents as usize]
}

/// Byte offset of a linear extent inside its block device.
fn linear_offset(first_logical_sector: u64, sector: u64, block_size: u64) -> Option<u64> {
    first_logical_sector
        .checked_add(sector)?
        .checked_mul(block_size)
}

impl Metadata {
    /// Reads the geometry and the first valid metadata slot. The input must
    /// not be a sparse image.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        let n = read_at(reader, 0, &mut magic).map_err(|e| Error::read("super image", 0, e))?;
        if is_sparse(&magic[..n]) {
            return Err(Error::SparseInput);
        }

        let geometry = Geometry::read(reader)?;
        debug!(?geometry, "parsed LP geometry");

        for slot in 0..geometry.metadata_slot_count {
            let slot_offset = geometry.slot_offset(slot);
            let mut raw = [0u8; LpHeaderView::SIZE];
            let n = read_at(reader, slot_offset, &mut raw)
                .map_err(|e| Error::read("LP metadata header", slot_offset, e))?;
            let Some(view) = LpHeaderView::new(&raw[..n]) else {
                debug!(slot, slot_offset, "metadata slot is truncated, skipping");
                continue;
            };
            if view.get_magic() != LP_METADATA_HEADER_MAGIC {
                debug!(slot, slot_offset, magic = view.get_magic(), "no metadata in slot");
                continue;
            }

            let header = MetadataHeader::from_view(view, slot_offset, &geometry)?;
            let tables_offset = slot_offset + header.header_size as u64;
            let mut tables = vec![0u8; header.tables_size as usize];
            reader
                .seek(SeekFrom::Start(tables_offset))
                .and_then(|_| reader.read_exact(&mut tables))
                .map_err(|e| Error::read("LP metadata tables", tables_offset, e))?;

            debug!(slot, ?header, "using metadata slot");
            return Self::parse_tables(geometry, slot, header, &tables, tables_offset);
        }

        Err(Error::NoValidMetadataSlot {
            slots: geometry.metadata_slot_count,
        })
    }

    fn parse_tables(
        geometry: Geometry,
        slot: u32,
        header: MetadataHeader,
        tables: &[u8],
        tables_offset: u64,
    ) -> Result<Self> {
        header.partitions.check_bounds("partitions", header.tables_size)?;
        header.extents.check_bounds("extents", header.tables_size)?;
        header.groups.check_bounds("groups", header.tables_size)?;
        header.block_devices.check_bounds("block_devices", header.tables_size)?;

        check_entry_size("partitions", &header.partitions, LpPartitionView::SIZE, tables_offset)?;
        check_entry_size("extents", &header.extents, LpExtentView::SIZE, tables_offset)?;
        check_entry_size("groups", &header.groups, LpGroupView::SIZE, tables_offset)?;
        if header.block_devices.entry_size as usize != LpBlockDeviceView::SIZE {
            return Err(Error::EntrySizeMismatch {
                table: "block_devices",
                expected: LpBlockDeviceView::SIZE as u32,
                actual: header.block_devices.entry_size,
            });
        }

        let at = |desc: &TableDescriptor| tables_offset + desc.offset as u64;

        let mut partitions = Vec::new();
        for entry in table_entries(tables, &header.partitions) {
            let offset = at(&header.partitions);
            let view = entry_view(entry, LpPartitionView::new, "LP partition", offset)?;
            let name = fixed_name(view.get_name());
            if name.is_empty() {
                continue;
            }
            check_file_name("partition name", &name, offset)?;
            partitions.push(Partition {
                name,
                attributes: view.get_attributes(),
                first_extent_index: view.get_first_extent_index(),
                num_extents: view.get_num_extents(),
                group_index: view.get_group_index(),
            });
        }

        let extents = table_entries(tables, &header.extents)
            .map(|entry| {
                entry_view(entry, LpExtentView::new, "LP extent", at(&header.extents))
                    .map(Extent::from_view)
            })
            .collect::<Result<Vec<_>>>()?;

        let groups = table_entries(tables, &header.groups)
            .map(|entry| {
                entry_view(entry, LpGroupView::new, "LP group", at(&header.groups)).map(|view| {
                    Group {
                        name: fixed_name(view.get_name()),
                        flags: view.get_flags(),
                        maximum_size: view.get_maximum_size(),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let block_devices = table_entries(tables, &header.block_devices)
            .map(|entry| {
                let offset = at(&header.block_devices);
                entry_view(entry, LpBlockDeviceView::new, "LP block device", offset)
                    .map(|view| BlockDevice {
                        first_logical_sector: view.get_first_logical_sector(),
                        alignment: view.get_alignment(),
                        alignment_offset: view.get_alignment_offset(),
                        size: view.get_size(),
                        partition_name: fixed_name(view.get_partition_name()),
                        flags: view.get_flags(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        for device in &block_devices {
            check_file_name(
                "block device name",
                &device.partition_name,
                at(&header.block_devices),
            )?;
        }

        let block_size = geometry.logical_block_size as u64;
        let device_count = block_devices.len().max(1);
        for (index, extent) in extents.iter().enumerate() {
            let offset = at(&header.extents) + index as u64 * header.extents.entry_size as u64;
            let malformed = |field: &'static str, reason: String| Error::Malformed {
                field,
                offset,
                reason,
            };
            let len = extent
                .num_sectors
                .checked_mul(block_size)
                .filter(|len| i64::try_from(*len).is_ok())
                .ok_or_else(|| {
                    malformed("num_sectors", format!("extent #{index} length overflows"))
                })?;
            if let ExtentTarget::Linear { device, sector } = extent.target {
                if device as usize >= device_count {
                    let reason = format!(
                        "extent #{index} uses block device {device}, {device_count} listed"
                    );
                    return Err(malformed("target_source", reason));
                }
                let first_sector =
                    block_devices.get(device as usize).map_or(0, |d| d.first_logical_sector);
                linear_offset(first_sector, sector, block_size)
                    .and_then(|start| start.checked_add(len))
                    .ok_or_else(|| {
                        malformed("target_data", format!("extent #{index} offset overflows"))
                    })?;
            }
        }

        for partition in &partitions {
            let end = partition.first_extent_index as u64 + partition.num_extents as u64;
            if end > extents.len() as u64 {
                return Err(Error::Malformed {
                    field: "partition extents",
                    offset: at(&header.partitions),
                    reason: format!(
                        "{}: extents {}..{end} exceed the {}-entry extent table",
                        partition.name,
                        partition.first_extent_index,
                        extents.len()
                    ),
                });
            }
            let total = metadata_extents(&extents, partition)
                .iter()
                .try_fold(0u64, |sum, extent| sum.checked_add(extent.num_sectors * block_size));
            if total.is_none_or(|total| i64::try_from(total).is_err()) {
                return Err(Error::Malformed {
                    field: "partition extents",
                    offset: at(&header.partitions),
                    reason: format!("{}: total size overflows", partition.name),
                });
            }
        }

        Ok(Self {
            geometry,
            slot,
            header,
            partitions,
            extents,
            groups,
            block_devices,
        })
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Extents of `partition`, in on-disk order.
    pub fn partition_extents(&self, partition: &Partition) -> &[Extent] {
        metadata_extents(&self.extents, partition)
    }

    pub fn extent_len(&self, extent: &Extent) -> u64 {
        extent.num_sectors * self.geometry.logical_block_size as u64
    }

    /// Unpacked size of `partition`: the byte length of all its extents.
    pub fn partition_size(&self, partition: &Partition) -> u64 {
        self.partition_extents(partition)
            .iter()
            .map(|extent| self.extent_len(extent))
            .sum()
    }

    pub fn group_of(&self, partition: &Partition) -> Option<&Group> {
        self.groups.get(partition.group_index as usize)
    }

    /// Every partition with its group and size, sorted by name.
    pub fn summary(&self) -> Vec<PartitionSummary> {
        self.partitions
            .iter()
            .map(|p| PartitionSummary {
                name: p.name.clone(),
                group: self.group_of(p).map(|g| g.name.clone()),
                size: self.partition_size(p),
                num_extents: p.num_extents,
            })
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExtractOptions {
    /// Partitions to extract. Empty means all of them.
    pub partitions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The block device file holding the extent's data could not be found.
    MissingDevice { device: String },
    UnsupportedTarget(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedExtent {
    pub partition: String,
    pub extent_index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPartition {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default, Clone)]
pub struct ExtractReport {
    pub partitions: Vec<ExtractedPartition>,
    /// Extents that could not be copied. Their range in the output is left
    /// as a hole so later extents keep their offsets.
    pub skipped: Vec<SkippedExtent>,
}

enum DeviceHandle {
    Unopened,
    Open(File),
    Missing,
}

/// Block device files for one extraction run, opened on first use.
struct DeviceSet<'a> {
    image: &'a Path,
    metadata: &'a Metadata,
    handles: Vec<DeviceHandle>,
}

impl<'a> DeviceSet<'a> {
    fn new(image: &'a Path, metadata: &'a Metadata) -> Self {
        let count = metadata.block_devices.len().max(1);
        Self {
            image,
            metadata,
            handles: (0..count).map(|_| DeviceHandle::Unopened).collect(),
        }
    }

    fn name(&self, index: u32) -> String {
        self.metadata
            .block_devices
            .get(index as usize)
            .map(|d| d.partition_name.clone())
            .unwrap_or_default()
    }

    /// Device 0 is the image itself, the others are sibling files named
    /// after the device.
    fn resolve(&self, index: u32) -> Option<PathBuf> {
        if index == 0 {
            return Some(self.image.to_path_buf());
        }
        let name = self.name(index);
        let dir = self.image.parent().unwrap_or(Path::new("."));
        [dir.join(&name), dir.join(format!("{name}.img"))]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    /// Returns `None` if the device's backing file does not exist.
    fn get(&mut self, index: u32) -> Result<Option<&mut File>> {
        let i = index as usize;
        if i >= self.handles.len() {
            return Err(Error::invalid(format!("block device {index} is not listed")));
        }

        if let DeviceHandle::Unopened = self.handles[i] {
            self.handles[i] = match self.resolve(index) {
                Some(path) => {
                    debug!(device = index, path = %path.display(), "opening block device");
                    DeviceHandle::Open(File::open(&path).map_err(|e| Error::file(&path, e))?)
                }
                None => {
                    warn!(device = index, name = %self.name(index), "block device file not found");
                    DeviceHandle::Missing
                }
            };
        }

        match &mut self.handles[i] {
            DeviceHandle::Open(file) => Ok(Some(file)),
            _ => Ok(None),
        }
    }
}

fn skip_hole(sink: &mut AtomicFile, len: u64) -> Result<()> {
    let delta = i64::try_from(len).map_err(|_| Error::Malformed {
        field: "num_sectors",
        offset: len,
        reason: "extent too long to skip".into(),
    })?;
    sink.seek(SeekFrom::Current(delta)).map_err(|e| Error::Io("seek output", e))?;
    Ok(())
}

#[derive(Debug)]
pub struct SuperImage {
    path: PathBuf,
    metadata: Metadata,
}

impl SuperImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| Error::file(&path, e))?;
        let metadata = Metadata::read(&mut file)?;
        info!(
            path = %path.display(),
            slot = metadata.slot,
            partitions = metadata.partitions.len(),
            block_devices = metadata.block_devices.len(),
            "opened super image"
        );
        Ok(Self { path, metadata })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Writes each selected partition to `<output_dir>/<name>.img`.
    pub fn extract(
        &self,
        output_dir: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let output_dir = output_dir.as_ref();
        let selected: Vec<&Partition> = if options.partitions.is_empty() {
            self.metadata.partitions.iter().collect()
        } else {
            options
                .partitions
                .iter()
                .map(|name| {
                    self.metadata.partition(name).ok_or_else(|| {
                        Error::invalid(format!("no partition named '{name}' in super image"))
                    })
                })
                .collect::<Result<_>>()?
        };

        fs::create_dir_all(output_dir).map_err(|e| Error::file(output_dir, e))?;

        let mut devices = DeviceSet::new(&self.path, &self.metadata);
        let mut report = ExtractReport::default();
        for partition in selected {
            let extracted =
                self.extract_partition(partition, output_dir, &mut devices, &mut report)?;
            report.partitions.push(extracted);
        }
        Ok(report)
    }

    fn extract_partition(
        &self,
        partition: &Partition,
        output_dir: &Path,
        devices: &mut DeviceSet,
        report: &mut ExtractReport,
    ) -> Result<ExtractedPartition> {
        let metadata = &self.metadata;
        let block_size = metadata.geometry.logical_block_size as u64;
        let mut sink = AtomicFile::create(output_dir.join(format!("{}.img", partition.name)))?;
        let mut position = 0u64;

        let first = partition.first_extent_index as usize;
        for (index, extent) in metadata.partition_extents(partition).iter().enumerate() {
            let len = metadata.extent_len(extent);
            let mut skip = |reason: SkipReason| {
                warn!(
                    partition = %partition.name,
                    extent = first + index,
                    ?reason,
                    "skipping extent"
                );
                report.skipped.push(SkippedExtent {
                    partition: partition.name.clone(),
                    extent_index: first + index,
                    reason,
                });
            };

            match extent.target {
                ExtentTarget::Zero => {
                    sink.write_zeros(len).map_err(|e| Error::Io("write zero extent", e))?;
                }
                ExtentTarget::Linear { device, sector } => {
                    let first_sector = metadata
                        .block_devices
                        .get(device as usize)
                        .map_or(0, |d| d.first_logical_sector);
                    match devices.get(device)? {
                        Some(file) => {
                            let offset = linear_offset(first_sector, sector, block_size)
                                .ok_or_else(|| Error::Malformed {
                                    field: "target_data",
                                    offset: sector,
                                    reason: format!("{}: extent offset overflows", partition.name),
                                })?;
                            file.seek(SeekFrom::Start(offset))
                                .map_err(|e| Error::Io("seek block device", e))?;
                            let copied = copy_exact(file, &mut sink, len)
                                .map_err(|e| Error::Io("copy partition extent", e))?;
                            if copied != len {
                                return Err(Error::Truncated {
                                    structure: "partition extent",
                                    offset: offset + copied,
                                });
                            }
                        }
                        None => {
                            skip(SkipReason::MissingDevice {
                                device: devices.name(device),
                            });
                            skip_hole(&mut sink, len)?;
                        }
                    }
                }
                ExtentTarget::Unsupported(target_type) => {
                    skip(SkipReason::UnsupportedTarget(target_type));
                    skip_hole(&mut sink, len)?;
                }
            }
            position += len;
        }

        sink.set_len(position).map_err(|e| Error::Io("size partition image", e))?;
        sink.flush().map_err(|e| Error::Io("flush partition image", e))?;
        let path = sink.commit()?;
        info!(
            partition = %partition.name,
            size = position,
            path = %path.display(),
            "extracted partition"
        );

        Ok(ExtractedPartition {
            name: partition.name.clone(),
            path,
            size: position,
        })
    }
}
