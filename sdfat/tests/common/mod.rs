//! Shared test fixtures: a scripted SPI SD-card double backed by an
//! in-memory sector image, and a builder for synthetic FAT32 volumes.

#![allow(dead_code)]

use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use sdfat::{FileSystem, Monotonic, SpiBus};

pub const SECTOR: usize = 512;
pub const RESERVED: u32 = 32;
pub const NUM_FATS: u32 = 2;
pub const FAT_SECTORS: u32 = 520;
pub const TOTAL_SECTORS: u32 = 67_000;
pub const ROOT_CLUSTER: u32 = 2;
pub const EOC: u32 = 0x0FFF_FFFF;

/// Failure modes the card double can act out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMode {
    Normal,
    /// No card in the slot: every clock reads 0xFF.
    Absent,
    /// Reads are accepted but the data token never arrives.
    NeverToken,
    /// The reset command is answered with a nonsense byte.
    ResetGarbage,
}

pub struct CardState {
    image: Vec<u8>,
    mode: CardMode,
    frame: Vec<u8>,
    replies: VecDeque<u8>,
    /// Total bytes clocked over the bus.
    pub transfers: u64,
    /// Sectors requested by read commands, in order.
    pub reads: Vec<u32>,
    /// Every prescaler value set on the bus, in order.
    pub speeds: Vec<u8>,
}

impl CardState {
    /// Command frame complete: queue the reply bytes. The first queued
    /// byte is consumed by the trailing clock of the command itself.
    fn finish_command(&mut self) {
        let cmd = self.frame[0] & 0x3F;
        let param = u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
        self.frame.clear();
        self.replies.clear();
        self.replies.push_back(0xFF);
        match cmd {
            0 => {
                if self.mode == CardMode::ResetGarbage {
                    self.replies.push_back(0x05);
                } else {
                    self.replies.push_back(0x01);
                }
            }
            1 => self.replies.push_back(0x00),
            13 => {
                self.replies.push_back(0x00);
                self.replies.push_back(0x00);
            }
            17 => {
                let sector = param / SECTOR as u32;
                self.reads.push(sector);
                let start = sector as usize * SECTOR;
                if start + SECTOR > self.image.len() {
                    self.replies.push_back(0x40); // parameter error
                    return;
                }
                self.replies.push_back(0x00);
                if self.mode == CardMode::NeverToken {
                    return;
                }
                self.replies.push_back(0xFF); // busy for one poll
                self.replies.push_back(0xFE); // start-of-block token
                for i in 0..SECTOR {
                    let byte = self.image[start + i];
                    self.replies.push_back(byte);
                }
                self.replies.push_back(0x55);
                self.replies.push_back(0xAA); // checksum
            }
            _ => self.replies.push_back(0x04), // illegal command
        }
    }
}

/// Cloneable bus handle; clones share the card state so tests can inspect
/// it after handing the bus to the driver.
#[derive(Clone)]
pub struct SimBus(Rc<RefCell<CardState>>);

impl SimBus {
    pub fn new(image: Vec<u8>, mode: CardMode) -> Self {
        SimBus(Rc::new(RefCell::new(CardState {
            image,
            mode,
            frame: Vec::new(),
            replies: VecDeque::new(),
            transfers: 0,
            reads: Vec::new(),
            speeds: Vec::new(),
        })))
    }

    pub fn state(&self) -> Ref<'_, CardState> {
        self.0.borrow()
    }

    pub fn transfers(&self) -> u64 {
        self.0.borrow().transfers
    }

    pub fn reads(&self) -> Vec<u32> {
        self.0.borrow().reads.clone()
    }

    pub fn speeds(&self) -> Vec<u8> {
        self.0.borrow().speeds.clone()
    }
}

impl SpiBus for SimBus {
    fn transfer(&mut self, out: u8) -> u8 {
        let mut card = self.0.borrow_mut();
        card.transfers += 1;
        if card.mode == CardMode::Absent {
            return 0xFF;
        }
        if !card.frame.is_empty() {
            card.frame.push(out);
            if card.frame.len() == 6 {
                card.finish_command();
            }
            return 0xFF;
        }
        if out & 0xC0 == 0x40 {
            // Start of a command frame.
            card.frame.push(out);
            return 0xFF;
        }
        card.replies.pop_front().unwrap_or(0xFF)
    }

    fn set_speed(&mut self, prescaler: u8) {
        self.0.borrow_mut().speeds.push(prescaler);
    }

    fn select(&mut self) {}

    fn deselect(&mut self) {}
}

/// A clock that never advances; deadline checks never fire, so retry
/// loops run their full iteration budgets.
pub struct FrozenClock;

impl Monotonic for FrozenClock {
    fn now_us(&self) -> u64 {
        0
    }
}

/// Builds a synthetic FAT32 volume image sector by sector. Sectors per
/// cluster is 1 and the claimed sector count is large enough for a
/// legitimate FAT32 cluster count; only the head of the data area is
/// materialized.
pub struct FatImage {
    pub data: Vec<u8>,
    partition_start: u32,
}

impl FatImage {
    pub fn new() -> Self {
        Self::with_partition_start(0)
    }

    pub fn with_partition_start(start: u32) -> Self {
        let sectors = start + RESERVED + NUM_FATS * FAT_SECTORS + 128;
        let mut image = Self {
            data: vec![0u8; sectors as usize * SECTOR],
            partition_start: start,
        };
        image.write_boot_sector();
        if start > 0 {
            image.write_mbr();
        }
        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, EOC);
        image.set_fat(ROOT_CLUSTER, EOC);
        image
    }

    pub fn fat_start(&self) -> u32 {
        self.partition_start + RESERVED
    }

    pub fn data_start(&self) -> u32 {
        self.fat_start() + NUM_FATS * FAT_SECTORS
    }

    pub fn cluster_sector(&self, cluster: u32) -> u32 {
        self.data_start() + cluster - 2
    }

    pub fn sector_mut(&mut self, sector: u32) -> &mut [u8] {
        &mut self.data[sector as usize * SECTOR..][..SECTOR]
    }

    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        let sector = self.fat_start() + cluster / 128;
        let offset = (cluster as usize % 128) * 4;
        self.sector_mut(sector)[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Add a file with an explicit cluster chain. `name` is the on-disk
    /// 11-byte padded form.
    pub fn add_file(&mut self, dir_cluster: u32, name: &str, clusters: &[u32], content: &[u8]) {
        self.chain(clusters);
        for (i, &cluster) in clusters.iter().enumerate() {
            let start = i * SECTOR;
            if start >= content.len() {
                break;
            }
            let end = (start + SECTOR).min(content.len());
            let sector = self.cluster_sector(cluster);
            self.sector_mut(sector)[..end - start].copy_from_slice(&content[start..end]);
        }
        self.add_entry(dir_cluster, name, 0x20, clusters[0], content.len() as u32);
    }

    pub fn add_dir(&mut self, parent_cluster: u32, name: &str, cluster: u32) {
        self.set_fat(cluster, EOC);
        self.add_entry(parent_cluster, name, 0x10, cluster, 0);
    }

    pub fn add_volume_label(&mut self, name: &str) {
        self.add_entry(ROOT_CLUSTER, name, 0x08, 0, 0);
    }

    fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, EOC);
        }
    }

    fn add_entry(&mut self, dir_cluster: u32, name: &str, attr: u8, cluster: u32, size: u32) {
        assert!(name.len() <= 11);
        let mut padded = [b' '; 11];
        padded[..name.len()].copy_from_slice(name.as_bytes());

        let sector = self.cluster_sector(dir_cluster);
        let dir = self.sector_mut(sector);
        let slot = (0..SECTOR / 32)
            .find(|&i| dir[i * 32] == 0)
            .expect("directory sector full");
        let entry = &mut dir[slot * 32..][..32];
        entry[..11].copy_from_slice(&padded);
        entry[11] = attr;
        entry[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        entry[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        entry[28..32].copy_from_slice(&size.to_le_bytes());
    }

    fn write_boot_sector(&mut self) {
        let start = self.partition_start;
        let sector = self.sector_mut(start);
        sector[11..13].copy_from_slice(&512u16.to_le_bytes());
        sector[13] = 1; // sectors per cluster
        sector[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
        sector[16] = NUM_FATS as u8;
        sector[32..36].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
        sector[36..40].copy_from_slice(&FAT_SECTORS.to_le_bytes());
        sector[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
        sector[82..90].copy_from_slice(b"FAT32   ");
        sector[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
    }

    fn write_mbr(&mut self) {
        let lba = self.partition_start;
        let sector = self.sector_mut(0);
        sector[446 + 4] = 0x0C; // FAT32 LBA partition type
        sector[446 + 8..446 + 12].copy_from_slice(&lba.to_le_bytes());
        sector[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
    }
}

/// A filesystem over a fresh card double holding `image`, plus a handle
/// to the shared card state.
pub fn fs_over(image: &FatImage) -> (FileSystem<SimBus, FrozenClock>, SimBus) {
    let bus = SimBus::new(image.data.clone(), CardMode::Normal);
    (FileSystem::new(bus.clone(), FrozenClock), bus)
}
