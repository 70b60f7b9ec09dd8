use bytemuck::{Pod, Zeroable};

use crate::error::Fat32Error;
use crate::{FAT_COUNT, FAT_SIZE, RESERVED_SECTORS, ROOT_CLUSTER, SECTOR_SIZE, TOTAL_SECTORS};

/// Identifies sector 0 as a boot sector. Stored at offset 510.
pub const BOOT_SIGNATURE: u16 = 0xaa55;
/// Media descriptor for a fixed disk.
pub const MEDIA_TYPE: u8 = 0xf8;
/// Extended INT 13h drive number for a fixed disk.
pub const DRIVE_NUMBER: u8 = 0x80;
/// Extended boot signature marking the volume id/label/type fields as present.
pub const EXT_BOOT_SIGNATURE: u8 = 0x29;

const OEM_NAME: &[u8; 8] = b"MSWIN4.1";
const VOLUME_LABEL: &[u8; 11] = b"NO NAME    ";
const FS_TYPE: &[u8; 8] = b"FAT32   ";

/// The boot sector of a FAT32 volume.
/// Field order and widths follow the on-disk BIOS Parameter Block; every
/// multi-byte field is stored little-endian.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BootSector {
    /// Jump instruction to the boot code. `0xEB 0x58 0x90` for FAT32.
    jump: [u8; 3],
    /// OEM name, space padded.
    oem: [u8; 8],
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    /// Sectors before the first FAT copy.
    reserved_sectors: u16,
    fat_count: u8,
    /// Root entry count. Zero on FAT32, where the root lives in the data region.
    root_entries: u16,
    /// 16-bit total sector count. Zero on FAT32.
    total_sectors_16: u16,
    media_type: u8,
    /// 16-bit FAT size. Zero on FAT32.
    fat_size_16: u16,
    sectors_per_track: u16,
    head_count: u16,
    hidden_sectors: u32,
    /// Total sector count of the volume.
    total_sectors_32: u32,
    /// Sectors per FAT copy.
    fat_size_32: u32,
    ext_flags: u16,
    fs_version: u16,
    /// First cluster of the root directory.
    root_cluster: u32,
    /// Sector of the FSInfo structure.
    fs_info: u16,
    /// Sector of the backup boot sector.
    backup_boot: u16,
    _reserved: [u8; 12],
    drive_number: u8,
    _reserved1: u8,
    /// `0x29` when the three fields below are present.
    boot_signature: u8,
    volume_id: u32,
    volume_label: [u8; 11],
    /// Informational file system type. Must begin with `"FAT32"`.
    fs_type: [u8; 8],
    boot_code: [u8; 420],
    /// Must be `0xAA55`.
    signature: u16,
}

const _: () = assert!(size_of::<BootSector>() == SECTOR_SIZE);

/// Volume layout derived from a validated boot sector, cached per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// First sector of FAT copy 0.
    pub fat_start: u32,
    /// Sectors per FAT copy.
    pub fat_size: u32,
    /// Number of FAT copies.
    pub fat_count: u32,
    /// First sector of the data region.
    pub data_start: u32,
    /// Number of clusters in the data region.
    pub total_clusters: u32,
    pub sectors_per_cluster: u32,
}

impl BootSector {
    /// Builds the boot sector for a fresh 20 MiB volume: 512-byte sectors,
    /// 8 sectors per cluster, 32 reserved sectors, two 256-sector FATs.
    pub fn new() -> BootSector {
        BootSector {
            jump: [0xeb, 0x58, 0x90],
            oem: *OEM_NAME,
            bytes_per_sector: (SECTOR_SIZE as u16).to_le(),
            sectors_per_cluster: crate::SECTORS_PER_CLUSTER as u8,
            reserved_sectors: RESERVED_SECTORS.to_le(),
            fat_count: FAT_COUNT,
            root_entries: 0,
            total_sectors_16: 0,
            media_type: MEDIA_TYPE,
            fat_size_16: 0,
            sectors_per_track: 32u16.to_le(),
            head_count: 64u16.to_le(),
            hidden_sectors: 0,
            total_sectors_32: TOTAL_SECTORS.to_le(),
            fat_size_32: FAT_SIZE.to_le(),
            ext_flags: 0,
            fs_version: 0,
            root_cluster: ROOT_CLUSTER.to_le(),
            fs_info: 1u16.to_le(),
            backup_boot: 6u16.to_le(),
            _reserved: [0; 12],
            drive_number: DRIVE_NUMBER,
            _reserved1: 0,
            boot_signature: EXT_BOOT_SIGNATURE,
            volume_id: 0x12345678u32.to_le(),
            volume_label: *VOLUME_LABEL,
            fs_type: *FS_TYPE,
            boot_code: [0; 420],
            signature: BOOT_SIGNATURE.to_le(),
        }
    }

    /// Reinterprets a raw sector as a boot sector. Always succeeds; call
    /// [`BootSector::validate`] to decide whether the bytes mean anything.
    pub fn parse(buf: &[u8; SECTOR_SIZE]) -> BootSector {
        *bytemuck::from_bytes(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Checks the trailing signature and that `fs_type` begins with `"FAT32"`.
    pub fn validate(&self) -> Result<(), Fat32Error> {
        if u16::from_le(self.signature) != BOOT_SIGNATURE {
            return Err(Fat32Error::InvalidImage);
        }
        if &self.fs_type[..5] != b"FAT32" {
            return Err(Fat32Error::InvalidImage);
        }
        Ok(())
    }

    /// Derives the volume layout from the sector's own fields, so a validly
    /// formatted image dictates its own geometry.
    pub fn geometry(&self) -> Result<Geometry, Fat32Error> {
        let fat_start = u16::from_le(self.reserved_sectors) as u32;
        let fat_size = u32::from_le(self.fat_size_32);
        let fat_count = self.fat_count as u32;
        let sectors_per_cluster = self.sectors_per_cluster as u32;

        let data_start = fat_count
            .checked_mul(fat_size)
            .and_then(|fats| fats.checked_add(fat_start))
            .ok_or(Fat32Error::InvalidImage)?;

        let total_clusters = u32::from_le(self.total_sectors_32)
            .checked_sub(data_start)
            .and_then(|data_sectors| data_sectors.checked_div(sectors_per_cluster))
            .ok_or(Fat32Error::InvalidImage)?;

        Ok(Geometry {
            fat_start,
            fat_size,
            fat_count,
            data_start,
            total_clusters,
            sectors_per_cluster,
        })
    }
}

impl Default for BootSector {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn fresh_boot_sector_is_valid() {
    let boot = BootSector::new();
    boot.validate().expect("fresh boot sector must validate");

    let bytes = boot.as_bytes();
    assert_eq!(bytes.len(), SECTOR_SIZE);
    assert_eq!(bytes[510], 0x55);
    assert_eq!(bytes[511], 0xaa);
    assert_eq!(&bytes[3..11], OEM_NAME);
}

#[test]
fn fresh_boot_sector_geometry() {
    let geometry = BootSector::new().geometry().expect("geometry");
    assert_eq!(geometry.fat_start, 32);
    assert_eq!(geometry.fat_size, 256);
    assert_eq!(geometry.fat_count, 2);
    assert_eq!(geometry.data_start, 544);
    assert_eq!(geometry.total_clusters, (40960 - 544) / 8);
    assert_eq!(geometry.sectors_per_cluster, 8);
}

#[test]
fn parse_round_trip() {
    let boot = BootSector::new();
    let mut buf = [0u8; SECTOR_SIZE];
    buf.copy_from_slice(boot.as_bytes());

    let parsed = BootSector::parse(&buf);
    parsed.validate().expect("round-tripped sector must validate");
    assert_eq!(parsed.geometry().unwrap(), boot.geometry().unwrap());
}

#[test]
fn bad_signature_is_rejected() {
    let boot = BootSector::new();
    let mut buf = [0u8; SECTOR_SIZE];
    buf.copy_from_slice(boot.as_bytes());
    buf[510] = 0;

    assert!(matches!(
        BootSector::parse(&buf).validate(),
        Err(Fat32Error::InvalidImage)
    ));
}

#[test]
fn bad_fs_type_is_rejected() {
    let boot = BootSector::new();
    let mut buf = [0u8; SECTOR_SIZE];
    buf.copy_from_slice(boot.as_bytes());
    buf[82..90].copy_from_slice(b"FAT16   ");

    assert!(matches!(
        BootSector::parse(&buf).validate(),
        Err(Fat32Error::InvalidImage)
    ));
}

#[test]
fn all_zero_sector_is_rejected() {
    let buf = [0u8; SECTOR_SIZE];
    assert!(BootSector::parse(&buf).validate().is_err());
}
