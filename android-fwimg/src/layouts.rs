use paste::paste;

use crate::constants::{BOOT_CMDLINE_SIZE, LP_NAME_SIZE};

macro_rules! def_boot_header_layout {
    ({$($name:ident),+ $(,)?}, {$($name2:ident),+ $(,)?}) => {
        paste! {
            #[allow(unused)]
            #[derive(Debug)]
            pub struct BootHeaderLayout {
                pub name: &'static str,
                $(
                    pub [<offset_ $name>]: u16,
                )+
                $(
                    pub [<offset_ $name2>]: u16,
                    pub [<size_ $name2>]: u16,
                )+
                pub total_size: u16
            }

            #[allow(unused)]
            const DEFAULT_LAYOUT: BootHeaderLayout = BootHeaderLayout {
                name: "default",
                $(
                    [<offset_ $name>]: 0,
                )+
                $(
                    [<offset_ $name2>]: 0,
                    [<size_ $name2>]: 0,
                )+
                total_size: 0
            };
        }
    };
}

def_boot_header_layout! {
    {
        kernel_size,
        ramdisk_size,
        os_version,
        header_size,
        header_version,

        // v4 specific
        dtb_size,
    },
    {
        cmdline,
    }
}

macro_rules! struct_item_size {
    (u16) => {
        2
    };
    (u32) => {
        4
    };
    (u64) => {
        8
    };
    ($sz:expr) => {
        $sz
    };
}

macro_rules! struct_item_maybe_def_size {
    ($name:ident u16) => {};
    ($name:ident u32) => {};
    ($name:ident u64) => {};
    ($name:ident $sz:expr) => {
        paste! {
            pub(crate) const [<size_ $name>]: usize = $sz;
        }
    };
}

macro_rules! define_layout_offsets {
    ($name:ident $t:tt $(,)?) => {
        paste! {
            struct_item_maybe_def_size! { $name $t }
            pub(crate) const total_size: usize = [<offset_ $name>] + struct_item_size! { $t };
        }
    };
    ($name1:ident $t1:tt, $name2:ident $t2:tt $(,)?) => {
        paste! {
            struct_item_maybe_def_size! { $name1 $t1 }
            pub(crate) const [<offset_ $name2>]: usize = [<offset_ $name1>] + struct_item_size! { $t1 };
            struct_item_maybe_def_size! { $name2 $t2 }
            pub(crate) const total_size: usize = [<offset_ $name2>] + struct_item_size! { $t2 };
        }
    };
    ($name1:ident $t1:tt, $name2:ident $t2:tt $(,$name:ident $t:tt)+ $(,)?) => {
        paste! {
            struct_item_maybe_def_size! { $name1 $t1 }
            pub(crate) const [<offset_ $name2>]: usize = [<offset_ $name1>] + struct_item_size! { $t1 };
            define_layout_offsets! { $name2 $t2, $($name $t),+ }
        }
    };
}

macro_rules! define_layout_common {
    (
        $struct_name:ident,
        initial_offset $initial_offset:tt,
        structure {$name1:ident $t1:tt $(,$name:ident $t:tt)* $(,)?} $(,)?
    ) => {
        paste! {
            #[allow(dead_code, non_upper_case_globals, nonstandard_style, unused)]
            pub(crate) mod [<mod_offsets_ $struct_name>] {
                use super::*;
                pub(crate) const [<offset_ $name1>]: usize = $initial_offset;
                define_layout_offsets!{$name1 $t1, $($name $t),*}
            }
        }
    };
}

macro_rules! define_boot_header_layout_common {
    (
        $struct_name:ident,
        initial_offset $initial_offset:tt,
        default_layout $default_layout:ident,
        structure {$($name:ident $t:tt),+ $(,)?},
        ifields {$($ifield:ident),* $(,)?},
        sfields {$($sfield:ident),* $(,)?}$(,)?
    ) => {
        define_layout_common! {
            $struct_name,
            initial_offset $initial_offset,
            structure { $($name $t),+ }
        }
        paste! {
            pub const $struct_name: BootHeaderLayout = BootHeaderLayout {
                name: stringify!($struct_name),
                $(
                    [<offset_ $ifield>]: [<mod_offsets_ $struct_name>]::[<offset_ $ifield>] as u16,
                )*
                $(
                    [<offset_ $sfield>]: [<mod_offsets_ $struct_name>]::[<offset_ $sfield>] as u16,
                    [<size_ $sfield>]: [<mod_offsets_ $struct_name>]::[<size_ $sfield>] as u16,
                )*
                total_size: [<mod_offsets_ $struct_name>]::total_size as u16,
                ..$default_layout
            };
        }
    };
}

macro_rules! define_boot_header_layout {
    (
        $struct_name:ident,
        structure {$($name:ident $t:tt),+ $(,)?},
        ifields {$($ifield:ident),* $(,)?},
        sfields {$($sfield:ident),* $(,)?}$(,)?
    ) => {
        define_boot_header_layout_common! {
            $struct_name,
            initial_offset 8,
            default_layout DEFAULT_LAYOUT,
            structure { $($name $t),+ },
            ifields { $($ifield),* },
            sfields { $($sfield),* },
        }
    };
}

macro_rules! define_boot_header_layout_inherits {
    (
        $struct_name:ident,
        $inherited_name:ident,
        structure {$($name:ident $t:tt),+ $(,)?},
        ifields {$($ifield:ident),* $(,)?},
        sfields {$($sfield:ident),* $(,)?}$(,)?
    ) => {
        define_boot_header_layout_common! {
            $struct_name,
            initial_offset ($inherited_name.total_size as usize),
            default_layout $inherited_name,
            structure { $($name $t),+ },
            ifields { $($ifield),* },
            sfields { $($sfield),* },
        }
    }
}

define_boot_header_layout! {
    BOOT_HEADER_V3,
    structure {
        kernel_size u32,
        ramdisk_size u32,
        os_version u32,
        header_size u32,
        reserved 16,
        header_version u32,
        cmdline BOOT_CMDLINE_SIZE,
    },
    ifields {
        kernel_size,
        ramdisk_size,
        os_version,
        header_size,
        header_version,
    },
    sfields {
        cmdline,
    },
}

define_boot_header_layout_inherits! {
    BOOT_HEADER_V4, BOOT_HEADER_V3,
    structure {
        dtb_size u32,
    },
    ifields {
        dtb_size,
    },
    sfields {}
}

macro_rules! impl_ifield_accessor {
    ($vis:vis, $mod_name:ident, $t:ty, $name:ident $(,$suffix:ident)?) => {
        paste! {
            #[allow(unused)]
            $vis fn [<get_ $name $($suffix)?>](&self) -> $t {
                let offset = [<mod_offsets_ $mod_name>]::[<offset_ $name>];
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&self.data[offset..offset + size_of::<$t>()]);
                <$t>::from_le_bytes(raw)
            }
        }
    };
}

macro_rules! impl_sfield_accessor {
    ($vis:vis, $mod_name:ident, $name:ident $(,$suffix:ident)?) => {
        paste! {
            #[allow(unused)]
            $vis fn [<get_ $name $($suffix)?>](&self) -> &'a [u8] {
                let offset = [<mod_offsets_ $mod_name>]::[<offset_ $name>];
                let sz = [<mod_offsets_ $mod_name>]::[<size_ $name>];
                &self.data[offset..offset + sz]
            }
        }
    };
}

/// Declares a borrowed, length-checked view over one on-disk record.
macro_rules! define_record_view {
    ($view:ident, $mod_name:ident) => {
        paste! {
            #[derive(Copy, Clone)]
            pub struct $view<'a> {
                data: &'a [u8],
            }

            impl<'a> $view<'a> {
                pub const SIZE: usize = [<mod_offsets_ $mod_name>]::total_size;

                /// Returns `None` if `data` is shorter than the record.
                pub fn new(data: &'a [u8]) -> Option<Self> {
                    data.get(..Self::SIZE).map(|data| Self { data })
                }
            }
        }
    };
}

// Sparse image

define_layout_common! {
    SparseHeaderLayout,
    initial_offset 0,
    structure {
        magic u32,
        major_version u16,
        minor_version u16,
        file_hdr_sz u16,
        chunk_hdr_sz u16,
        blk_sz u32,
        total_blks u32,
        total_chunks u32,
        image_checksum u32,
    },
}

define_record_view!(SparseHeaderView, SparseHeaderLayout);

impl<'a> SparseHeaderView<'a> {
    impl_ifield_accessor! { pub, SparseHeaderLayout, u32, magic }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u16, major_version }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u16, minor_version }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u16, file_hdr_sz }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u16, chunk_hdr_sz }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u32, blk_sz }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u32, total_blks }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u32, total_chunks }
    impl_ifield_accessor! { pub, SparseHeaderLayout, u32, image_checksum }
}

define_layout_common! {
    SparseChunkLayout,
    initial_offset 0,
    structure {
        chunk_type u16,
        reserved1 u16,
        chunk_sz u32,
        total_sz u32,
    },
}

define_record_view!(SparseChunkView, SparseChunkLayout);

impl<'a> SparseChunkView<'a> {
    impl_ifield_accessor! { pub, SparseChunkLayout, u16, chunk_type }
    impl_ifield_accessor! { pub, SparseChunkLayout, u32, chunk_sz }
    impl_ifield_accessor! { pub, SparseChunkLayout, u32, total_sz }
}

// Logical partition metadata

define_layout_common! {
    LpGeometryLayout,
    initial_offset 0,
    structure {
        magic u32,
        struct_size u32,
        checksum 32,
        metadata_max_size u32,
        metadata_slot_count u32,
        logical_block_size u32,
    },
}

define_record_view!(LpGeometryView, LpGeometryLayout);

impl<'a> LpGeometryView<'a> {
    impl_ifield_accessor! { pub, LpGeometryLayout, u32, magic }
    impl_ifield_accessor! { pub, LpGeometryLayout, u32, struct_size }
    impl_sfield_accessor! { pub, LpGeometryLayout, checksum }
    impl_ifield_accessor! { pub, LpGeometryLayout, u32, metadata_max_size }
    impl_ifield_accessor! { pub, LpGeometryLayout, u32, metadata_slot_count }
    impl_ifield_accessor! { pub, LpGeometryLayout, u32, logical_block_size }
}

define_layout_common! {
    LpHeaderLayout,
    initial_offset 0,
    structure {
        magic u32,
        major_version u16,
        minor_version u16,
        header_size u32,
        header_checksum 32,
        tables_size u32,
        tables_checksum 32,
        partitions_offset u32,
        partitions_num_entries u32,
        partitions_entry_size u32,
        extents_offset u32,
        extents_num_entries u32,
        extents_entry_size u32,
        groups_offset u32,
        groups_num_entries u32,
        groups_entry_size u32,
        block_devices_offset u32,
        block_devices_num_entries u32,
        block_devices_entry_size u32,
    },
}

define_record_view!(LpHeaderView, LpHeaderLayout);

impl<'a> LpHeaderView<'a> {
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, magic }
    impl_ifield_accessor! { pub, LpHeaderLayout, u16, major_version }
    impl_ifield_accessor! { pub, LpHeaderLayout, u16, minor_version }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, header_size }
    impl_sfield_accessor! { pub, LpHeaderLayout, header_checksum }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, tables_size }
    impl_sfield_accessor! { pub, LpHeaderLayout, tables_checksum }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, partitions_offset }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, partitions_num_entries }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, partitions_entry_size }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, extents_offset }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, extents_num_entries }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, extents_entry_size }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, groups_offset }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, groups_num_entries }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, groups_entry_size }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, block_devices_offset }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, block_devices_num_entries }
    impl_ifield_accessor! { pub, LpHeaderLayout, u32, block_devices_entry_size }
}

define_layout_common! {
    LpPartitionLayout,
    initial_offset 0,
    structure {
        name LP_NAME_SIZE,
        attributes u32,
        first_extent_index u32,
        num_extents u32,
        group_index u32,
    },
}

define_record_view!(LpPartitionView, LpPartitionLayout);

impl<'a> LpPartitionView<'a> {
    impl_sfield_accessor! { pub, LpPartitionLayout, name }
    impl_ifield_accessor! { pub, LpPartitionLayout, u32, attributes }
    impl_ifield_accessor! { pub, LpPartitionLayout, u32, first_extent_index }
    impl_ifield_accessor! { pub, LpPartitionLayout, u32, num_extents }
    impl_ifield_accessor! { pub, LpPartitionLayout, u32, group_index }
}

define_layout_common! {
    LpExtentLayout,
    initial_offset 0,
    structure {
        num_sectors u64,
        target_type u32,
        target_data u64,
        target_source u32,
    },
}

define_record_view!(LpExtentView, LpExtentLayout);

impl<'a> LpExtentView<'a> {
    impl_ifield_accessor! { pub, LpExtentLayout, u64, num_sectors }
    impl_ifield_accessor! { pub, LpExtentLayout, u32, target_type }
    impl_ifield_accessor! { pub, LpExtentLayout, u64, target_data }
    impl_ifield_accessor! { pub, LpExtentLayout, u32, target_source }
}

define_layout_common! {
    LpGroupLayout,
    initial_offset 0,
    structure {
        name LP_NAME_SIZE,
        flags u32,
        maximum_size u64,
    },
}

define_record_view!(LpGroupView, LpGroupLayout);

impl<'a> LpGroupView<'a> {
    impl_sfield_accessor! { pub, LpGroupLayout, name }
    impl_ifield_accessor! { pub, LpGroupLayout, u32, flags }
    impl_ifield_accessor! { pub, LpGroupLayout, u64, maximum_size }
}

define_layout_common! {
    LpBlockDeviceLayout,
    initial_offset 0,
    structure {
        first_logical_sector u64,
        alignment u32,
        alignment_offset u32,
        size u64,
        partition_name LP_NAME_SIZE,
        flags u32,
    },
}

define_record_view!(LpBlockDeviceView, LpBlockDeviceLayout);

impl<'a> LpBlockDeviceView<'a> {
    impl_ifield_accessor! { pub, LpBlockDeviceLayout, u64, first_logical_sector }
    impl_ifield_accessor! { pub, LpBlockDeviceLayout, u32, alignment }
    impl_ifield_accessor! { pub, LpBlockDeviceLayout, u32, alignment_offset }
    impl_ifield_accessor! { pub, LpBlockDeviceLayout, u64, size }
    impl_sfield_accessor! { pub, LpBlockDeviceLayout, partition_name }
    impl_ifield_accessor! { pub, LpBlockDeviceLayout, u32, flags }
}
