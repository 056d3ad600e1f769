//! Boot sector and BIOS Parameter Block
//!
//! Fields are referenced by byte offset into the raw sector rather than
//! through packed structs: the engine only ever pulls small windows of
//! the boot sector through the partial-sector read interface.
//!
//! # Boot sector layout (the parts this build reads)
//! - Bytes 11-47: BPB, including the FAT32 root-cluster field at 44
//! - Byte 82: FAT32 filesystem-type string
//! - Bytes 510-511: signature, little-endian 0xAA55
//!
//! An MBR-partitioned medium carries the same signature in sector 0 with
//! partition entries starting at byte 446.

use crate::fs::FsError;

/// Byte offsets into a FAT boot sector.
pub mod bpb_offset {
    pub const BYTES_PER_SECTOR: usize = 11;
    pub const SECTORS_PER_CLUSTER: usize = 13;
    pub const RESERVED_SECTORS: usize = 14;
    pub const NUM_FATS: usize = 16;
    pub const ROOT_ENTRY_COUNT: usize = 17;
    pub const TOTAL_SECTORS_16: usize = 19;
    pub const SECTORS_PER_FAT_16: usize = 22;
    pub const TOTAL_SECTORS_32: usize = 32;
    pub const SECTORS_PER_FAT_32: usize = 36;
    pub const ROOT_CLUSTER: usize = 44;
    pub const FS_TYPE_32: usize = 82;
    pub const SIGNATURE: usize = 510;
}

/// Offset of the first partition entry in an MBR.
pub const MBR_PARTITION_TABLE: usize = 446;

/// Boot-sector signature at offset 510, little-endian.
pub const BOOT_SIGNATURE: u16 = 0xAA55;

/// First byte of the BPB window the mount path reads.
pub const BPB_WINDOW_START: usize = bpb_offset::SECTORS_PER_CLUSTER;

/// Length of the BPB window; covers everything through the FAT32
/// root-cluster field.
pub const BPB_WINDOW_LEN: usize = 36;

/// What a sector turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BootSectorKind {
    /// Carries the signature and the FAT32 type string.
    Fat32,
    /// Carries the signature but no FAT32 type string; possibly an MBR.
    NotFat,
    /// No boot signature at all.
    NotBoot,
}

/// FAT width, classified from the cluster count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// Computed on-disk layout of a mounted volume. All sector addresses are
/// absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Sectors per cluster.
    pub sectors_per_cluster: u32,
    /// Root directory entry count (0 on FAT32).
    pub root_entries: u16,
    /// First sector of the FAT table.
    pub fat_start: u32,
    /// Root directory start cluster.
    pub root_cluster: u32,
    /// First sector of the data area.
    pub data_start: u32,
    /// Highest valid cluster number plus one.
    pub max_cluster: u32,
}

impl Geometry {
    /// Physical sector holding the first byte of `cluster`, or `None`
    /// when the cluster is outside the valid range.
    pub fn cluster_to_sector(&self, cluster: u32) -> Option<u32> {
        if cluster < 2 || cluster >= self.max_cluster {
            return None;
        }
        Some(self.data_start + (cluster - 2) * self.sectors_per_cluster)
    }

    /// FAT sector and byte offset of the entry for `cluster`. FAT32
    /// entries are 4 bytes, 128 per sector.
    pub fn fat_entry_location(&self, cluster: u32) -> (u32, usize) {
        (
            self.fat_start + cluster / 128,
            (cluster as usize % 128) * 4,
        )
    }
}

/// Little-endian field accessors.
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Parse the BPB window (bytes [`BPB_WINDOW_START`]..+[`BPB_WINDOW_LEN`]
/// of the boot sector) and derive the volume geometry.
///
/// `partition_start` is the absolute sector the boot sector was found at.
/// Structurally impossible values (zero sectors per cluster, areas larger
/// than the volume) fail as [`FsError::NoFilesystem`].
pub(crate) fn parse_geometry(
    window: &[u8; BPB_WINDOW_LEN],
    partition_start: u32,
) -> Result<(FatType, Geometry), FsError> {
    let at = |offset: usize| offset - BPB_WINDOW_START;

    let sectors_per_cluster = u32::from(window[at(bpb_offset::SECTORS_PER_CLUSTER)]);
    let reserved = u32::from(read_u16(window, at(bpb_offset::RESERVED_SECTORS)));
    let num_fats = u32::from(window[at(bpb_offset::NUM_FATS)]);
    let root_entries = read_u16(window, at(bpb_offset::ROOT_ENTRY_COUNT));

    // 16-bit fields with 32-bit fallbacks when zero.
    let mut fat_sectors = u32::from(read_u16(window, at(bpb_offset::SECTORS_PER_FAT_16)));
    if fat_sectors == 0 {
        fat_sectors = read_u32(window, at(bpb_offset::SECTORS_PER_FAT_32));
    }
    let mut total_sectors = u32::from(read_u16(window, at(bpb_offset::TOTAL_SECTORS_16)));
    if total_sectors == 0 {
        total_sectors = read_u32(window, at(bpb_offset::TOTAL_SECTORS_32));
    }

    if sectors_per_cluster == 0 || num_fats == 0 || fat_sectors == 0 {
        return Err(FsError::NoFilesystem);
    }

    let fat_area = fat_sectors
        .checked_mul(num_fats)
        .ok_or(FsError::NoFilesystem)?;
    let root_dir_sectors = (u32::from(root_entries) * 32).div_ceil(512);

    let data_sectors = total_sectors
        .checked_sub(reserved)
        .and_then(|s| s.checked_sub(fat_area))
        .and_then(|s| s.checked_sub(root_dir_sectors))
        .ok_or(FsError::NoFilesystem)?;
    let max_cluster = data_sectors / sectors_per_cluster + 2;

    let fat_type = if max_cluster >= 0xFFF7 {
        FatType::Fat32
    } else if max_cluster >= 0xFF7 {
        FatType::Fat16
    } else {
        FatType::Fat12
    };

    let fat_start = partition_start + reserved;
    let geometry = Geometry {
        sectors_per_cluster,
        root_entries,
        fat_start,
        root_cluster: read_u32(window, at(bpb_offset::ROOT_CLUSTER)),
        data_start: fat_start + fat_area + root_dir_sectors,
        max_cluster,
    };

    Ok((fat_type, geometry))
}
