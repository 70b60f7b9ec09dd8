use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::Fat32Error;
use crate::CLUSTER_SIZE;

/// Size of one directory entry in bytes.
pub const DIR_ENTRY_SIZE: usize = 32;
/// Entries per directory cluster. A directory occupies a single cluster.
pub const ENTRIES_PER_CLUSTER: usize = CLUSTER_SIZE / DIR_ENTRY_SIZE;

/// First name byte marking the end of a directory; no live entries follow.
pub const ENTRY_END: u8 = 0x00;
/// First name byte marking a deleted entry.
pub const ENTRY_DELETED: u8 = 0xe5;

bitflags! {
    /// The attribute byte of a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// All four low bits at once signal a long-file-name entry.
        const LONG_NAME = 0x0f;
    }
}

/// An 11-byte 8.3 name, space padded. Case is preserved as typed, for
/// bit-compatibility with images written by earlier versions of this tool;
/// strict FAT32 readers that expect upper-cased names will only partially
/// interoperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    /// The self-reference entry of a directory.
    pub const DOT: ShortName = ShortName(*b".          ");
    /// The parent-reference entry of a directory.
    pub const DOT_DOT: ShortName = ShortName(*b"..         ");

    /// Normalizes a name into the 8.3 layout: up to 8 bytes before the first
    /// `.` and up to 3 after it, each silently truncated; a dotless name fills
    /// up to 11 bytes. Empty names are rejected.
    pub fn new(name: &str) -> Result<ShortName, Fat32Error> {
        if name.is_empty() {
            return Err(Fat32Error::BadArgument);
        }
        if name == "." {
            return Ok(Self::DOT);
        }
        if name == ".." {
            return Ok(Self::DOT_DOT);
        }

        let mut formatted = [b' '; 11];
        let bytes = name.as_bytes();
        match bytes.iter().position(|&b| b == b'.') {
            Some(dot) => {
                let base = &bytes[..dot.min(8)];
                formatted[..base.len()].copy_from_slice(base);

                let ext = &bytes[dot + 1..];
                let ext = &ext[..ext.len().min(3)];
                formatted[8..8 + ext.len()].copy_from_slice(ext);
            }
            None => {
                let base = &bytes[..bytes.len().min(11)];
                formatted[..base.len()].copy_from_slice(base);
            }
        }
        Ok(ShortName(formatted))
    }
}

/// A 32-byte directory entry naming and locating a file or subdirectory.
/// The timestamp fields exist on disk but are written as zero.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DirEntry {
    name: [u8; 11],
    attr: u8,
    nt_reserved: u8,
    creation_time_tenths: u8,
    creation_time: u16,
    creation_date: u16,
    last_access_date: u16,
    cluster_high: u16,
    write_time: u16,
    write_date: u16,
    cluster_low: u16,
    file_size: u32,
}

const _: () = assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);

impl DirEntry {
    /// A subdirectory entry pointing at its first (and only) cluster.
    pub fn directory(name: ShortName, cluster: u32) -> DirEntry {
        let mut entry = DirEntry::zeroed();
        entry.name = name.0;
        entry.attr = FileAttributes::DIRECTORY.bits();
        entry.set_first_cluster(cluster);
        entry
    }

    /// A zero-length file entry. Empty files own no cluster, so the pointer
    /// stays 0.
    pub fn file(name: ShortName) -> DirEntry {
        let mut entry = DirEntry::zeroed();
        entry.name = name.0;
        entry.attr = FileAttributes::ARCHIVE.bits();
        entry
    }

    pub fn name_bytes(&self) -> [u8; 11] {
        self.name
    }

    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.attr)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes().contains(FileAttributes::DIRECTORY)
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le(self.file_size)
    }

    /// The cluster pointer assembled from its split high and low halves.
    /// 0 means no cluster assigned.
    pub fn first_cluster(&self) -> u32 {
        (u16::from_le(self.cluster_high) as u32) << 16 | u16::from_le(self.cluster_low) as u32
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.cluster_high = ((cluster >> 16) as u16).to_le();
        self.cluster_low = (cluster as u16).to_le();
    }

    pub fn is_end_marker(&self) -> bool {
        self.name[0] == ENTRY_END
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == ENTRY_DELETED
    }

    /// Reconstructs a display name: the 8-byte base with trailing spaces
    /// stripped, then `.` and the extension (also stripped) if one is present.
    /// `.` and `..` render as themselves; no directory suffix is appended.
    pub fn display_name(&self) -> String {
        let mut name = String::new();
        for &b in self.name[..8].iter() {
            name.push(b as char);
        }
        name.truncate(name.trim_end_matches(' ').len());

        if self.name[8] != b' ' {
            name.push('.');
            for &b in self.name[8..].iter() {
                name.push(b as char);
            }
            name.truncate(name.trim_end_matches(' ').len());
        }
        name
    }
}

/// One directory cluster viewed as its 128 entries.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DirBlock {
    entries: [DirEntry; ENTRIES_PER_CLUSTER],
}

const _: () = assert!(size_of::<DirBlock>() == CLUSTER_SIZE);

impl DirBlock {
    pub fn from_bytes(buf: &[u8; CLUSTER_SIZE]) -> DirBlock {
        *bytemuck::from_bytes(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// A fresh directory cluster: `.` pointing at the directory itself and
    /// `..` pointing at its parent (cluster 0 for the root's parent).
    pub fn new_directory(cluster: u32, parent: u32) -> DirBlock {
        let mut block = DirBlock::zeroed();
        block.entries[0] = DirEntry::directory(ShortName::DOT, cluster);
        block.entries[1] = DirEntry::directory(ShortName::DOT_DOT, parent);
        block
    }

    /// Iterates live entries: stops at the end-of-directory marker and skips
    /// deleted slots.
    pub fn live(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries
            .iter()
            .take_while(|entry| !entry.is_end_marker())
            .filter(|entry| !entry.is_deleted())
    }

    /// Finds a live entry whose 11-byte name matches exactly.
    pub fn find(&self, name: &ShortName) -> Option<&DirEntry> {
        self.live().find(|entry| entry.name_bytes() == name.0)
    }

    /// First slot usable for a new entry, free or deleted.
    pub fn free_slot(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_end_marker() || entry.is_deleted())
    }

    pub fn set(&mut self, index: usize, entry: DirEntry) {
        self.entries[index] = entry;
    }
}

#[test]
fn short_name_plain() {
    assert_eq!(ShortName::new("ttt").unwrap().0, *b"ttt        ");
}

#[test]
fn short_name_with_extension() {
    assert_eq!(ShortName::new("file1.txt").unwrap().0, *b"file1   txt");
}

#[test]
fn short_name_preserves_case() {
    assert_eq!(ShortName::new("MiXeD.TxT").unwrap().0, *b"MiXeD   TxT");
}

#[test]
fn short_name_truncates_silently() {
    assert_eq!(
        ShortName::new("averylongbasename.text").unwrap().0,
        *b"averylontex"
    );
    assert_eq!(
        ShortName::new("dotlessdirectoryname").unwrap().0,
        *b"dotlessdire"
    );
}

#[test]
fn short_name_specials() {
    assert_eq!(ShortName::new(".").unwrap(), ShortName::DOT);
    assert_eq!(ShortName::new("..").unwrap(), ShortName::DOT_DOT);
    assert!(ShortName::new("").is_err());
}

#[test]
fn short_name_is_idempotent() {
    for input in ["ttt", "file1.txt", "MiXeD.TxT", "dotlessdirectoryname"] {
        let first = ShortName::new(input).unwrap();
        let entry = DirEntry::file(first);
        let second = ShortName::new(&entry.display_name()).unwrap();
        assert_eq!(first, second, "normalization must be stable for {input}");
    }
}

#[test]
fn display_name_round_trip() {
    let entry = DirEntry::file(ShortName::new("file1.txt").unwrap());
    assert_eq!(entry.display_name(), "file1.txt");

    let entry = DirEntry::directory(ShortName::new("ttt").unwrap(), 3);
    assert_eq!(entry.display_name(), "ttt");

    let entry = DirEntry::directory(ShortName::DOT_DOT, 2);
    assert_eq!(entry.display_name(), "..");
}

#[test]
fn entry_cluster_pointer_split() {
    let mut entry = DirEntry::zeroed();
    entry.set_first_cluster(0x0012_3456);
    assert_eq!(entry.first_cluster(), 0x0012_3456);

    let bytes = bytemuck::bytes_of(&entry);
    // high half at offset 20, low half at offset 26
    assert_eq!(&bytes[20..22], &[0x12, 0x00]);
    assert_eq!(&bytes[26..28], &[0x56, 0x34]);
}

#[test]
fn dir_block_scan_and_slots() {
    let mut block = DirBlock::new_directory(5, 2);
    assert_eq!(block.live().count(), 2);
    assert_eq!(block.free_slot(), Some(2));

    let name = ShortName::new("ttt").unwrap();
    block.set(2, DirEntry::directory(name, 6));
    assert_eq!(block.live().count(), 3);
    assert_eq!(block.find(&name).unwrap().first_cluster(), 6);
    assert_eq!(block.free_slot(), Some(3));

    // a deleted slot is reusable and skipped by scans
    let mut deleted = DirEntry::file(ShortName::new("gone").unwrap());
    deleted.name[0] = ENTRY_DELETED;
    block.set(2, deleted);
    assert_eq!(block.live().count(), 2);
    assert_eq!(block.free_slot(), Some(2));
    assert!(block.find(&name).is_none());
}

#[test]
fn dir_block_end_marker_terminates_scan() {
    let mut block = DirBlock::zeroed();
    // a live entry placed after the terminator is never reached
    block.set(3, DirEntry::file(ShortName::new("orphan").unwrap()));
    assert_eq!(block.live().count(), 0);
    assert_eq!(block.free_slot(), Some(0));
}

#[test]
fn new_directory_layout() {
    let block = DirBlock::new_directory(7, 2);
    let dot = block.find(&ShortName::DOT).unwrap();
    assert!(dot.is_directory());
    assert_eq!(dot.first_cluster(), 7);

    let dot_dot = block.find(&ShortName::DOT_DOT).unwrap();
    assert!(dot_dot.is_directory());
    assert_eq!(dot_dot.first_cluster(), 2);
}
