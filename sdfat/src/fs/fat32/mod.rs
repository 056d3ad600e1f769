//! Read-only FAT32 engine
//!
//! A [`FileSystem`] owns the disk adapter and all volume state, so two
//! independent cards are just two values. Callers that share one volume
//! across tasks wrap it in their own lock.
//!
//! The engine holds a single open file and no sector cache; every
//! structure access is a partial read of the sector that holds it. That
//! trades bus traffic for a fixed, tiny RAM footprint.

pub mod bpb;
pub mod dir;

use crate::hal::spi::SpiBus;
use crate::hal::time::Monotonic;
use crate::sd::{Disk, SECTOR_SIZE};

use crate::fs::FsError;
use bpb::{
    bpb_offset, parse_geometry, read_u16, read_u32, BootSectorKind, FatType, Geometry,
    BOOT_SIGNATURE, BPB_WINDOW_LEN, BPB_WINDOW_START, MBR_PARTITION_TABLE,
};
use dir::{Attributes, DirCursor, DirEntry, ShortName, DIR_ENTRY_SIZE, ENTRIES_PER_SECTOR};

bitflags::bitflags! {
    /// Volume handle state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeFlags: u8 {
        const MOUNTED         = 0x01;
        const FILE_OPEN       = 0x02;
        const WRITE_PROTECTED = 0x04;
    }
}

/// One mounted (or mountable) FAT32 volume with at most one open file.
pub struct FileSystem<B, C> {
    disk: Disk<B, C>,
    geometry: Option<Geometry>,
    flags: VolumeFlags,
    /// First cluster of the open file.
    start_cluster: u32,
    /// Cluster the read position currently sits in.
    current_cluster: u32,
    /// Absolute sector the read position currently sits in.
    data_sector: u32,
    /// Read position within the open file.
    position: u32,
    /// Size of the open file.
    size: u32,
}

impl<B: SpiBus, C: Monotonic> FileSystem<B, C> {
    pub fn new(bus: B, clock: C) -> Self {
        Self {
            disk: Disk::new(bus, clock),
            geometry: None,
            flags: VolumeFlags::empty(),
            start_cluster: 0,
            current_cluster: 0,
            data_sector: 0,
            position: 0,
            size: 0,
        }
    }

    /// Bring the card up and mount the FAT32 volume on it.
    ///
    /// The boot sector is looked for at sector 0 first; if sector 0 is a
    /// boot record without a FAT32 volume, the first partition-table
    /// entry is followed once. Card bring-up failure is [`FsError::NotReady`],
    /// anything else on the medium is [`FsError::NoFilesystem`].
    pub fn mount(&mut self) -> Result<(), FsError> {
        self.flags = VolumeFlags::empty();
        self.geometry = None;

        if let Err(err) = self.disk.initialize() {
            log::warn!("SD: bring-up failed: {:?}", err);
            return Err(FsError::NotReady);
        }

        let mut boot_sector = 0u32;
        let mut kind = self.check_boot_sector(boot_sector)?;
        if kind == BootSectorKind::NotFat {
            // Maybe an MBR; follow partition entry 0, once.
            let mut entry = [0u8; 16];
            self.disk.read_partial(0, MBR_PARTITION_TABLE, &mut entry)?;
            if entry[4] != 0 {
                boot_sector = read_u32(&entry, 8);
                kind = self.check_boot_sector(boot_sector)?;
            }
        }
        if kind != BootSectorKind::Fat32 {
            return Err(FsError::NoFilesystem);
        }

        let mut window = [0u8; BPB_WINDOW_LEN];
        self.disk
            .read_partial(boot_sector, BPB_WINDOW_START, &mut window)?;
        let (fat_type, geometry) = parse_geometry(&window, boot_sector)?;
        if fat_type != FatType::Fat32 {
            return Err(FsError::NoFilesystem);
        }

        log::debug!(
            "FAT: volume at sector {}, data start {}, {} clusters",
            boot_sector,
            geometry.data_start,
            geometry.max_cluster - 2
        );
        self.geometry = Some(geometry);
        self.flags = VolumeFlags::MOUNTED | VolumeFlags::WRITE_PROTECTED;
        Ok(())
    }

    /// Forget the mounted volume and any open file.
    pub fn unmount(&mut self) {
        self.flags = VolumeFlags::empty();
        self.geometry = None;
    }

    /// Open the file at a `/`-separated 8.3 path. Any previously open
    /// file is forgotten, found or not.
    pub fn open(&mut self, path: &str) -> Result<(), FsError> {
        if !self.flags.contains(VolumeFlags::MOUNTED) {
            return Err(FsError::NotMounted);
        }
        self.flags.remove(VolumeFlags::FILE_OPEN);

        let entry = self.follow_path(path)?;
        if entry.is_directory() {
            return Err(FsError::IsDirectory);
        }
        self.start_cluster = entry.first_cluster();
        self.size = entry.file_size();
        self.position = 0;
        self.flags.insert(VolumeFlags::FILE_OPEN);
        Ok(())
    }

    /// Read from the current position into `buf`, advancing the position.
    ///
    /// Returns the number of bytes copied, short only at end of file. A
    /// broken cluster chain or a failed sector read closes the file;
    /// bytes copied before the failure are left in `buf` but not counted.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.flags.contains(VolumeFlags::FILE_OPEN) {
            return Err(FsError::NotOpen);
        }
        let geometry = self.geometry.ok_or(FsError::NotMounted)?;

        let remaining = (self.size - self.position) as usize;
        let mut outstanding = buf.len().min(remaining);
        let mut copied = 0usize;

        while outstanding > 0 {
            let sector_offset = self.position as usize % SECTOR_SIZE;
            if sector_offset == 0 {
                let cluster_sector =
                    (self.position / SECTOR_SIZE as u32) % geometry.sectors_per_cluster;
                if cluster_sector == 0 {
                    // Cluster boundary: first read starts the chain, later
                    // ones follow it.
                    let cluster = if self.position == 0 {
                        self.start_cluster
                    } else {
                        match self.fat_entry(self.current_cluster) {
                            Ok(link) => link,
                            Err(err) => return Err(self.abort_read(err)),
                        }
                    };
                    if cluster <= 1 {
                        return Err(self.abort_read(FsError::BadChain));
                    }
                    self.current_cluster = cluster;
                }
                self.data_sector = match geometry.cluster_to_sector(self.current_cluster) {
                    Some(sector) => sector + cluster_sector,
                    None => return Err(self.abort_read(FsError::BadChain)),
                };
            }

            let chunk = (SECTOR_SIZE - sector_offset).min(outstanding);
            if self
                .disk
                .read_partial(self.data_sector, sector_offset, &mut buf[copied..copied + chunk])
                .is_err()
            {
                return Err(self.abort_read(FsError::Io));
            }

            self.position += chunk as u32;
            copied += chunk;
            outstanding -= chunk;
        }
        Ok(copied)
    }

    /// Size of the currently open file.
    pub fn file_size(&self) -> Option<u32> {
        self.flags
            .contains(VolumeFlags::FILE_OPEN)
            .then_some(self.size)
    }

    /// Layout of the mounted volume.
    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn flags(&self) -> VolumeFlags {
        self.flags
    }

    fn abort_read(&mut self, err: FsError) -> FsError {
        self.flags.remove(VolumeFlags::FILE_OPEN);
        err
    }

    /// FAT chain link for `cluster`, masked to the 28 significant bits.
    fn fat_entry(&mut self, cluster: u32) -> Result<u32, FsError> {
        let geometry = self.geometry.ok_or(FsError::NotMounted)?;
        if cluster < 2 || cluster >= geometry.max_cluster {
            return Err(FsError::BadChain);
        }
        let (sector, offset) = geometry.fat_entry_location(cluster);
        let mut raw = [0u8; 4];
        self.disk.read_partial(sector, offset, &mut raw)?;
        Ok(read_u32(&raw, 0) & 0x0FFF_FFFF)
    }

    /// Classify one sector: FAT32 boot sector, some other boot record, or
    /// neither.
    fn check_boot_sector(&mut self, sector: u32) -> Result<BootSectorKind, FsError> {
        let mut buf = [0u8; 2];
        self.disk
            .read_partial(sector, bpb_offset::SIGNATURE, &mut buf)?;
        if read_u16(&buf, 0) != BOOT_SIGNATURE {
            return Ok(BootSectorKind::NotBoot);
        }
        self.disk
            .read_partial(sector, bpb_offset::FS_TYPE_32, &mut buf)?;
        Ok(if &buf == b"FA" {
            BootSectorKind::Fat32
        } else {
            BootSectorKind::NotFat
        })
    }

    /// Walk a `/`-separated path from the root directory down to its last
    /// segment's entry.
    fn follow_path(&mut self, path: &str) -> Result<DirEntry, FsError> {
        let mut start_cluster = 0u32; // 0 selects the root directory
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();

        while let Some(segment) = segments.next() {
            let name = ShortName::from_segment(segment);
            if name.is_blank() {
                return Err(FsError::NotFound);
            }
            let mut cursor = DirCursor::new(name, start_cluster);
            let entry = self.dir_find(&mut cursor)?;
            if segments.peek().is_none() {
                return Ok(entry);
            }
            if !entry.is_directory() {
                // A middle segment must be a directory.
                return Err(FsError::NotFound);
            }
            start_cluster = entry.first_cluster();
        }
        // The bare root has no entry of its own.
        Err(FsError::IsDirectory)
    }

    /// Linear search of one directory for the cursor's name, skipping
    /// volume labels (which is also what hides LFN entries).
    fn dir_find(&mut self, cursor: &mut DirCursor) -> Result<DirEntry, FsError> {
        self.dir_rewind(cursor)?;
        loop {
            let mut raw = [0u8; DIR_ENTRY_SIZE];
            let offset = usize::from(cursor.index % ENTRIES_PER_SECTOR) * DIR_ENTRY_SIZE;
            self.disk.read_partial(cursor.sector, offset, &mut raw)?;

            let entry = DirEntry::from_raw(raw);
            if entry.is_end() {
                return Err(FsError::NotFound);
            }
            if !entry.attributes().contains(Attributes::VOLUME_LABEL)
                && entry.name() == cursor.name.0.as_slice()
            {
                return Ok(entry);
            }
            self.dir_next(cursor)?;
        }
    }

    fn dir_rewind(&mut self, cursor: &mut DirCursor) -> Result<(), FsError> {
        let geometry = self.geometry.ok_or(FsError::NotMounted)?;
        cursor.index = 0;
        let mut cluster = cursor.start_cluster;
        if cluster == 0 {
            cluster = geometry.root_cluster;
        }
        cursor.cluster = cluster;
        cursor.sector = geometry
            .cluster_to_sector(cluster)
            .ok_or(FsError::BadChain)?;
        Ok(())
    }

    /// Step the cursor one entry forward, crossing sector and cluster
    /// boundaries as needed. End of the directory is [`FsError::NotFound`].
    fn dir_next(&mut self, cursor: &mut DirCursor) -> Result<(), FsError> {
        let geometry = self.geometry.ok_or(FsError::NotMounted)?;
        let next = cursor.index.wrapping_add(1);
        if next == 0 {
            // 65536 entries scanned; the table cannot be larger.
            return Err(FsError::NotFound);
        }
        if next % ENTRIES_PER_SECTOR == 0 {
            cursor.sector += 1;
            if u32::from(next / ENTRIES_PER_SECTOR) % geometry.sectors_per_cluster == 0 {
                let link = self.fat_entry(cursor.cluster)?;
                if link <= 1 {
                    return Err(FsError::BadChain);
                }
                if link >= geometry.max_cluster {
                    // End of chain, end of directory.
                    return Err(FsError::NotFound);
                }
                cursor.cluster = link;
                cursor.sector = geometry
                    .cluster_to_sector(link)
                    .ok_or(FsError::BadChain)?;
            }
        }
        cursor.index = next;
        Ok(())
    }
}
