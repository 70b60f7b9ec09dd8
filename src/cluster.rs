use std::io::{Read, Seek, Write};

use crate::disk;
use crate::error::Fat32Error;
use crate::volume::Volume;
use crate::{CLUSTER_SIZE, SECTOR_SIZE, SECTORS_PER_CLUSTER};

impl<T: Read + Write + Seek> Volume<T> {
    /// Reads a whole cluster. Clusters 0 and 1 have no backing storage and
    /// are rejected.
    pub fn read_cluster(&mut self, cluster: u32, buf: &mut [u8; CLUSTER_SIZE]) -> Result<(), Fat32Error> {
        let first = self.cluster_sector(cluster)?;
        for i in 0..SECTORS_PER_CLUSTER as usize {
            disk::read_sector(
                self.device_mut(),
                first + i as u64,
                &mut buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
            )?;
        }
        Ok(())
    }

    /// Writes a whole cluster as 8 sequential sector writes. There are no
    /// partial-cluster writes.
    pub fn write_cluster(&mut self, cluster: u32, buf: &[u8]) -> Result<(), Fat32Error> {
        assert_eq!(buf.len(), CLUSTER_SIZE);
        let first = self.cluster_sector(cluster)?;
        for i in 0..SECTORS_PER_CLUSTER as usize {
            disk::write_sector(
                self.device_mut(),
                first + i as u64,
                &buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
            )?;
        }
        Ok(())
    }

    /// Zero-fills a cluster.
    pub fn clear_cluster(&mut self, cluster: u32) -> Result<(), Fat32Error> {
        self.write_cluster(cluster, &[0u8; CLUSTER_SIZE])
    }

    /// Absolute sector of the first sector of a data cluster.
    fn cluster_sector(&self, cluster: u32) -> Result<u64, Fat32Error> {
        if cluster < crate::ROOT_CLUSTER {
            return Err(Fat32Error::InvalidCluster(cluster));
        }
        let data_start = self.geometry()?.data_start;
        Ok(data_start as u64 + (cluster - 2) as u64 * SECTORS_PER_CLUSTER as u64)
    }
}

#[cfg(test)]
fn formatted_volume() -> Volume<std::io::Cursor<Vec<u8>>> {
    let mut volume = Volume::from_device(std::io::Cursor::new(vec![0u8; crate::IMAGE_SIZE as usize]));
    volume.format().expect("format failed");
    volume
}

#[test]
fn cluster_round_trip() {
    let mut volume = formatted_volume();

    let mut data = [0u8; CLUSTER_SIZE];
    for (i, b) in data.iter_mut().enumerate() {
        *b = i as u8;
    }
    volume.write_cluster(10, &data).expect("write failed");

    let mut read = [0u8; CLUSTER_SIZE];
    volume.read_cluster(10, &mut read).expect("read failed");
    assert_eq!(data[..], read[..]);
}

#[test]
fn cluster_lands_in_the_data_region() {
    let mut volume = formatted_volume();
    let data_start = volume.geometry().unwrap().data_start as u64;

    let mut data = [0u8; CLUSTER_SIZE];
    data[0] = 0x42;
    volume.write_cluster(3, &data).expect("write failed");

    // cluster 3 begins 8 sectors past the start of the data region
    let mut sector = [0u8; SECTOR_SIZE];
    disk::read_sector(
        volume.device_mut(),
        data_start + SECTORS_PER_CLUSTER as u64,
        &mut sector,
    )
    .unwrap();
    assert_eq!(sector[0], 0x42);
}

#[test]
fn reserved_cluster_indices_are_rejected() {
    let mut volume = formatted_volume();
    let mut buf = [0u8; CLUSTER_SIZE];
    for cluster in [0, 1] {
        assert!(matches!(
            volume.read_cluster(cluster, &mut buf),
            Err(Fat32Error::InvalidCluster(_))
        ));
        assert!(matches!(
            volume.write_cluster(cluster, &buf),
            Err(Fat32Error::InvalidCluster(_))
        ));
    }
}

#[test]
fn clear_cluster_zeroes_everything() {
    let mut volume = formatted_volume();
    let mut data = [0xabu8; CLUSTER_SIZE];
    data[17] = 1;
    volume.write_cluster(4, &data).unwrap();
    volume.clear_cluster(4).unwrap();

    let mut read = [0u8; CLUSTER_SIZE];
    volume.read_cluster(4, &mut read).unwrap();
    assert!(read.iter().all(|&b| b == 0));
}
