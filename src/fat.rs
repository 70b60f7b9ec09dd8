use std::io::{Read, Seek, Write};

use bytemuck::{Pod, Zeroable};
use checked_num::CheckedU64;

use crate::disk;
use crate::error::Fat32Error;
use crate::volume::Volume;
use crate::SECTOR_SIZE;

/// Low 28 bits of a FAT entry hold the cluster pointer; the top 4 bits are
/// reserved and must be preserved on writes.
pub const ENTRY_MASK: u32 = 0x0fffffff;

/// One 32-bit FAT entry, stored little-endian on disk.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct FatEntry(pub u32);

impl FatEntry {
    /// A free cluster.
    pub fn free() -> FatEntry {
        Self(0)
    }

    /// The media type placeholder occupying entry 0.
    pub fn media_type() -> FatEntry {
        Self(0x0ffffff8)
    }

    /// Marks the last cluster of a chain.
    pub fn end_of_chain() -> FatEntry {
        Self(0x0fffffff)
    }

    pub fn is_free(self) -> bool {
        self.0 == 0
    }
}

impl<T: Read + Write + Seek> Volume<T> {
    /// Reads the FAT entry of `cluster` from copy 0, masked to its 28
    /// pointer bits. Indices at or past the cluster count answer the
    /// end-of-chain sentinel.
    pub fn fat_entry(&mut self, cluster: u32) -> Result<FatEntry, Fat32Error> {
        let geometry = self.geometry()?;
        if cluster >= geometry.total_clusters {
            return Ok(FatEntry::end_of_chain());
        }

        let sector = fat_sector(geometry.fat_start, 0, cluster)?;
        let mut buf = [0u8; SECTOR_SIZE];
        disk::read_sector(self.device_mut(), sector, &mut buf)?;

        let offset = entry_offset(cluster);
        let raw = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]);
        Ok(FatEntry(raw & ENTRY_MASK))
    }

    /// Writes the FAT entry of `cluster` into every FAT copy, replacing the
    /// 28 pointer bits and keeping the reserved top nibble already on disk.
    /// Mirroring is unconditional: both copies are byte-equal after every
    /// mutation.
    pub fn set_fat_entry(&mut self, cluster: u32, value: FatEntry) -> Result<(), Fat32Error> {
        let geometry = self.geometry()?;
        if cluster >= geometry.total_clusters {
            return Err(Fat32Error::InvalidCluster(cluster));
        }

        let value = value.0 & ENTRY_MASK;
        let offset = entry_offset(cluster);

        for copy in 0..geometry.fat_count {
            let sector = fat_sector(geometry.fat_start, copy as u64 * geometry.fat_size as u64, cluster)?;

            let mut buf = [0u8; SECTOR_SIZE];
            disk::read_sector(self.device_mut(), sector, &mut buf)?;

            let raw = u32::from_le_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            let raw = (raw & !ENTRY_MASK) | value;
            buf[offset..offset + 4].copy_from_slice(&raw.to_le_bytes());

            disk::write_sector(self.device_mut(), sector, &buf)?;
        }
        Ok(())
    }

    /// Scans the FAT upward from cluster 2 and returns the first free
    /// cluster, or `None` when the volume is full. No allocation hint is
    /// persisted; the cluster count is small enough for a linear scan.
    pub fn find_free_cluster(&mut self) -> Result<Option<u32>, Fat32Error> {
        let total_clusters = self.geometry()?.total_clusters;
        for cluster in crate::ROOT_CLUSTER..total_clusters {
            let entry = self.fat_entry(cluster)?;
            log::trace!("cluster {cluster} FAT entry {:#010x}", entry.0);
            if entry.is_free() {
                log::debug!("found free cluster {cluster}");
                return Ok(Some(cluster));
            }
        }
        log::debug!("no free clusters left");
        Ok(None)
    }
}

/// Absolute sector holding the FAT entry of `cluster` within one FAT copy.
fn fat_sector(fat_start: u32, copy_offset: u64, cluster: u32) -> Result<u64, Fat32Error> {
    (CheckedU64::new(cluster as u64) * 4 / SECTOR_SIZE as u64 + copy_offset + fat_start as u64)
        .ok_or(Fat32Error::InvalidImage)
}

/// Byte offset of the entry within its sector.
fn entry_offset(cluster: u32) -> usize {
    cluster as usize * 4 % SECTOR_SIZE
}

#[cfg(test)]
fn formatted_volume() -> Volume<std::io::Cursor<Vec<u8>>> {
    let mut volume = Volume::from_device(std::io::Cursor::new(vec![0u8; crate::IMAGE_SIZE as usize]));
    volume.format().expect("format failed");
    volume
}

#[test]
fn entry_round_trip_masks_to_28_bits() {
    let mut volume = formatted_volume();

    volume
        .set_fat_entry(5, FatEntry(0xffffffff))
        .expect("write failed");
    assert_eq!(volume.fat_entry(5).unwrap(), FatEntry::end_of_chain());

    volume.set_fat_entry(6, FatEntry(7)).expect("write failed");
    assert_eq!(volume.fat_entry(6).unwrap(), FatEntry(7));
}

#[test]
fn write_preserves_reserved_top_nibble() {
    let mut volume = formatted_volume();
    let fat_start = volume.geometry().unwrap().fat_start as u64;

    // plant reserved bits in the raw slot of cluster 4, then overwrite the entry
    let mut sector = [0u8; SECTOR_SIZE];
    disk::read_sector(volume.device_mut(), fat_start, &mut sector).unwrap();
    sector[16..20].copy_from_slice(&0xf0000000u32.to_le_bytes());
    disk::write_sector(volume.device_mut(), fat_start, &sector).unwrap();

    volume.set_fat_entry(4, FatEntry(0x00000009)).unwrap();

    disk::read_sector(volume.device_mut(), fat_start, &mut sector).unwrap();
    let raw = u32::from_le_bytes([sector[16], sector[17], sector[18], sector[19]]);
    assert_eq!(raw, 0xf0000009);
    // the masked view hides the reserved bits
    assert_eq!(volume.fat_entry(4).unwrap(), FatEntry(9));
}

#[test]
fn both_copies_agree_after_writes() {
    let mut volume = formatted_volume();
    volume.set_fat_entry(3, FatEntry::end_of_chain()).unwrap();
    volume.set_fat_entry(9, FatEntry(10)).unwrap();

    let geometry = volume.geometry().unwrap();
    let mut first = [0u8; SECTOR_SIZE];
    let mut second = [0u8; SECTOR_SIZE];
    for sector in 0..geometry.fat_size as u64 {
        disk::read_sector(volume.device_mut(), geometry.fat_start as u64 + sector, &mut first)
            .unwrap();
        disk::read_sector(
            volume.device_mut(),
            (geometry.fat_start + geometry.fat_size) as u64 + sector,
            &mut second,
        )
        .unwrap();
        assert_eq!(first, second, "FAT copies diverge in sector {sector}");
    }
}

#[test]
fn out_of_range_read_answers_end_of_chain() {
    let mut volume = formatted_volume();
    let total_clusters = volume.geometry().unwrap().total_clusters;
    assert_eq!(
        volume.fat_entry(total_clusters).unwrap(),
        FatEntry::end_of_chain()
    );
}

#[test]
fn out_of_range_write_is_rejected() {
    let mut volume = formatted_volume();
    let total_clusters = volume.geometry().unwrap().total_clusters;
    assert!(matches!(
        volume.set_fat_entry(total_clusters, FatEntry::free()),
        Err(Fat32Error::InvalidCluster(_))
    ));
}

#[test]
fn find_free_skips_allocated_clusters() {
    let mut volume = formatted_volume();
    // the root cluster is taken right after format
    assert_eq!(volume.find_free_cluster().unwrap(), Some(3));

    volume.set_fat_entry(3, FatEntry::end_of_chain()).unwrap();
    volume.set_fat_entry(4, FatEntry::end_of_chain()).unwrap();
    assert_eq!(volume.find_free_cluster().unwrap(), Some(5));
}

#[test]
fn find_free_reports_exhaustion() {
    let mut volume = formatted_volume();
    let total_clusters = volume.geometry().unwrap().total_clusters;
    for cluster in 3..total_clusters {
        volume.set_fat_entry(cluster, FatEntry::end_of_chain()).unwrap();
    }
    assert_eq!(volume.find_free_cluster().unwrap(), None);
}
