//! Directory entries and 8.3 names
//!
//! Directory entries are 32 bytes: an 11-byte space-padded short name,
//! an attribute byte, the first-cluster number split into high/low
//! 16-bit words, and the file size. Long-file-name entries carry the
//! volume-label attribute bit and are skipped by the scanner.

use super::bpb::{read_u16, read_u32};

/// Directory entry size in bytes.
pub const DIR_ENTRY_SIZE: usize = 32;

/// 32-byte entries per 512-byte sector.
pub const ENTRIES_PER_SECTOR: u16 = 16;

/// Byte offsets within a directory entry.
pub mod entry_offset {
    pub const NAME: usize = 0;
    pub const ATTR: usize = 11;
    pub const CLUSTER_HI: usize = 20;
    pub const CLUSTER_LO: usize = 26;
    pub const FILE_SIZE: usize = 28;
}

bitflags::bitflags! {
    /// Directory entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY    = 0x01;
        const HIDDEN       = 0x02;
        const SYSTEM       = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY    = 0x10;
        const ARCHIVE      = 0x20;
    }
}

/// One 32-byte short directory entry as read off the disk.
#[derive(Clone, Copy)]
pub struct DirEntry {
    raw: [u8; DIR_ENTRY_SIZE],
}

impl DirEntry {
    pub(crate) fn from_raw(raw: [u8; DIR_ENTRY_SIZE]) -> Self {
        Self { raw }
    }

    /// A zero first byte marks the end of the directory table.
    pub fn is_end(&self) -> bool {
        self.raw[entry_offset::NAME] == 0
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.raw[entry_offset::ATTR])
    }

    pub fn is_directory(&self) -> bool {
        self.attributes().contains(Attributes::DIRECTORY)
    }

    pub fn name(&self) -> &[u8] {
        &self.raw[entry_offset::NAME..entry_offset::NAME + 11]
    }

    /// First cluster, high and low words combined.
    pub fn first_cluster(&self) -> u32 {
        u32::from(read_u16(&self.raw, entry_offset::CLUSTER_HI)) << 16
            | u32::from(read_u16(&self.raw, entry_offset::CLUSTER_LO))
    }

    pub fn file_size(&self) -> u32 {
        read_u32(&self.raw, entry_offset::FILE_SIZE)
    }
}

/// An 11-byte space-padded uppercase 8.3 name as stored on disk.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    /// Build the padded form of one path segment: base name into bytes
    /// 0..8, extension after the first dot into 8..11. Characters past
    /// either field and anything after a second dot are dropped, matching
    /// how the names were written. Lowercase letters fold to uppercase.
    pub fn from_segment(segment: &str) -> ShortName {
        let mut name = [b' '; 11];
        let mut i = 0;
        let mut limit = 8;
        for &c in segment.as_bytes() {
            if c == b'.' || i >= limit {
                if limit != 8 || c != b'.' {
                    break;
                }
                i = 8;
                limit = 11;
                continue;
            }
            if is_dbc_lead(c) {
                break;
            }
            name[i] = c.to_ascii_uppercase();
            i += 1;
        }
        ShortName(name)
    }

    /// True when the segment produced no name bytes at all.
    pub fn is_blank(&self) -> bool {
        self.0[0] == b' '
    }
}

/// Double-byte character set lead bytes. Single-byte code pages only in
/// this build.
fn is_dbc_lead(_c: u8) -> bool {
    false
}

/// Transient scan state over one directory. `start_cluster` 0 selects
/// the root directory.
pub(crate) struct DirCursor {
    /// Entry index within the directory, 0-based.
    pub index: u16,
    /// The padded short name being searched for.
    pub name: ShortName,
    /// Directory start cluster (0 = root).
    pub start_cluster: u32,
    /// Current cluster of the scan.
    pub cluster: u32,
    /// Current sector of the scan.
    pub sector: u32,
}

impl DirCursor {
    pub fn new(name: ShortName, start_cluster: u32) -> Self {
        Self {
            index: 0,
            name,
            start_cluster,
            cluster: 0,
            sector: 0,
        }
    }
}
