use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::boot::{BootSector, Geometry};
use crate::dir::{DirBlock, DirEntry, ShortName};
use crate::disk;
use crate::error::Fat32Error;
use crate::fat::FatEntry;
use crate::{CLUSTER_SIZE, IMAGE_SIZE, ROOT_CLUSTER, SECTOR_SIZE};

/// A single-handle FAT32 session over one disk image.
///
/// The volume owns the device for its whole lifetime and tracks one
/// current-directory cursor: the absolute path string shown in the prompt and
/// the cluster it names. Geometry is cached after the image last validated;
/// operations fail with [`Fat32Error::InvalidImage`] until [`Volume::format`]
/// or [`Volume::is_valid`] has succeeded.
pub struct Volume<T> {
    device: T,
    geometry: Option<Geometry>,
    current_path: String,
    current_cluster: u32,
}

impl Volume<File> {
    /// Opens a disk image at `path`. An existing file that validates as
    /// FAT32 is used as-is; anything else (missing, unreadable, or not
    /// FAT32) is replaced by a fresh zero-filled 20 MiB image, which stays
    /// unformatted until the first `format`.
    pub fn open(path: impl AsRef<Path>) -> Result<Volume<File>, Fat32Error> {
        let path = path.as_ref();

        if let Ok(file) = OpenOptions::new().read(true).write(true).open(path) {
            let mut volume = Volume::from_device(file);
            if volume.is_valid().is_ok() {
                return Ok(volume);
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut volume = Volume::from_device(file);
        disk::write_zeroes(&mut volume.device, IMAGE_SIZE, 0)?;
        volume.device.flush()?;
        Ok(volume)
    }
}

impl<T> Volume<T> {
    /// Wraps an already-open device. The cursor starts at the root.
    pub fn from_device(device: T) -> Volume<T> {
        Volume {
            device,
            geometry: None,
            current_path: String::from("/"),
            current_cluster: ROOT_CLUSTER,
        }
    }

    /// Absolute path of the current directory, as shown in the prompt.
    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    /// Cluster of the current directory.
    pub fn current_cluster(&self) -> u32 {
        self.current_cluster
    }

    /// Cached geometry of the last successful validation.
    pub fn geometry(&self) -> Result<Geometry, Fat32Error> {
        self.geometry.ok_or(Fat32Error::InvalidImage)
    }

    pub fn device_mut(&mut self) -> &mut T {
        &mut self.device
    }

    pub fn into_device(self) -> T {
        self.device
    }
}

impl<T: Read + Write + Seek> Volume<T> {
    /// Re-reads sector 0 and checks it is a FAT32 boot sector. On success the
    /// cached geometry is refreshed from the sector's own fields, so the image
    /// dictates its layout; on failure the previous cache is left alone.
    pub fn is_valid(&mut self) -> Result<(), Fat32Error> {
        let mut sector = [0u8; SECTOR_SIZE];
        disk::read_sector(&mut self.device, 0, &mut sector)?;

        let boot = BootSector::parse(&sector);
        boot.validate()?;
        self.geometry = Some(boot.geometry()?);
        Ok(())
    }

    /// Rewrites the image as an empty FAT32 volume with the fixed 20 MiB
    /// layout: boot sector, both FAT copies (entries 0 and 1 occupied, the
    /// rest free), and a root directory holding only `.` and `..`.
    pub fn format(&mut self) -> Result<(), Fat32Error> {
        let boot = BootSector::new();
        disk::write_sector(&mut self.device, 0, boot.as_bytes())?;

        let geometry = boot.geometry()?;
        self.geometry = Some(geometry);

        // first sector of each copy carries the media type and reserved entries
        let mut fat_sector = [0u8; SECTOR_SIZE];
        fat_sector[0..4].copy_from_slice(&FatEntry::media_type().0.to_le_bytes());
        fat_sector[4..8].copy_from_slice(&FatEntry::end_of_chain().0.to_le_bytes());
        for copy in 0..geometry.fat_count {
            disk::write_sector(
                &mut self.device,
                (geometry.fat_start + copy * geometry.fat_size) as u64,
                &fat_sector,
            )?;
        }

        let zero = [0u8; SECTOR_SIZE];
        for copy in 0..geometry.fat_count {
            for sector in 1..geometry.fat_size {
                disk::write_sector(
                    &mut self.device,
                    (geometry.fat_start + copy * geometry.fat_size + sector) as u64,
                    &zero,
                )?;
            }
        }

        let root = DirBlock::new_directory(ROOT_CLUSTER, 0);
        self.write_cluster(ROOT_CLUSTER, root.as_bytes())?;
        self.set_fat_entry(ROOT_CLUSTER, FatEntry::end_of_chain())?;

        Ok(())
    }

    /// Creates a subdirectory in the current directory. The child cluster is
    /// fully committed (its `.`/`..` block written and its FAT entry set to
    /// end-of-chain) before the parent slot starts referencing it.
    pub fn mkdir(&mut self, name: &str) -> Result<(), Fat32Error> {
        let formatted = ShortName::new(name)?;

        let mut buf = [0u8; CLUSTER_SIZE];
        self.read_cluster(self.current_cluster, &mut buf)?;
        let mut dir = DirBlock::from_bytes(&buf);

        if dir.find(&formatted).is_some() {
            return Err(Fat32Error::NameExists(name.to_string()));
        }
        let slot = dir.free_slot().ok_or(Fat32Error::OutOfSpace)?;
        let new_cluster = self.find_free_cluster()?.ok_or(Fat32Error::OutOfSpace)?;

        let child = DirBlock::new_directory(new_cluster, self.current_cluster);
        self.write_cluster(new_cluster, child.as_bytes())?;
        self.set_fat_entry(new_cluster, FatEntry::end_of_chain())?;

        dir.set(slot, DirEntry::directory(formatted, new_cluster));
        self.write_cluster(self.current_cluster, dir.as_bytes())?;
        Ok(())
    }

    /// Creates a zero-length file in the current directory. No cluster is
    /// allocated; the entry's pointer stays 0 until the file gains content.
    pub fn touch(&mut self, name: &str) -> Result<(), Fat32Error> {
        let formatted = ShortName::new(name)?;
        log::debug!(
            "touch {name:?} normalized to {:?}",
            String::from_utf8_lossy(&formatted.0)
        );

        let mut buf = [0u8; CLUSTER_SIZE];
        self.read_cluster(self.current_cluster, &mut buf)?;
        let mut dir = DirBlock::from_bytes(&buf);

        if dir.find(&formatted).is_some() {
            return Err(Fat32Error::NameExists(name.to_string()));
        }
        let slot = dir.free_slot().ok_or(Fat32Error::OutOfSpace)?;
        log::debug!("touch uses directory slot {slot}");

        dir.set(slot, DirEntry::file(formatted));
        self.write_cluster(self.current_cluster, dir.as_bytes())?;
        Ok(())
    }

    /// Moves the cursor. Only absolute paths are accepted, and only four
    /// shapes of them: `/`, `/.`, `/..`, and a single component resolved in
    /// the current directory. Entering a component replaces the whole path
    /// string with `/<name>` rather than appending, so the prompt only ever
    /// shows one level.
    pub fn cd(&mut self, path: &str) -> Result<(), Fat32Error> {
        let Some(name) = path.strip_prefix('/') else {
            return Err(Fat32Error::BadArgument);
        };

        if name.is_empty() {
            self.current_cluster = ROOT_CLUSTER;
            self.current_path = String::from("/");
            return Ok(());
        }
        if name == "." {
            return Ok(());
        }
        if name == ".." {
            if self.current_cluster == ROOT_CLUSTER {
                return Ok(());
            }
            let mut buf = [0u8; CLUSTER_SIZE];
            self.read_cluster(self.current_cluster, &mut buf)?;
            let dir = DirBlock::from_bytes(&buf);

            let parent = dir
                .find(&ShortName::DOT_DOT)
                .ok_or_else(|| Fat32Error::NotFound(String::from("..")))?
                .first_cluster();
            self.current_cluster = parent;
            match self.current_path.rfind('/') {
                Some(0) | None => self.current_path = String::from("/"),
                Some(i) => self.current_path.truncate(i),
            }
            return Ok(());
        }
        if name.contains('/') {
            return Err(Fat32Error::Unsupported(path.to_string()));
        }

        let formatted = ShortName::new(name)?;
        let mut buf = [0u8; CLUSTER_SIZE];
        self.read_cluster(self.current_cluster, &mut buf)?;
        let dir = DirBlock::from_bytes(&buf);

        let entry = dir
            .find(&formatted)
            .filter(|entry| entry.is_directory())
            .ok_or_else(|| Fat32Error::NotFound(name.to_string()))?;
        self.current_cluster = entry.first_cluster();
        self.current_path = format!("/{name}");
        Ok(())
    }

    /// Lists a directory, one display name per element, `.` and `..`
    /// included. With no path the current directory is listed; `/` lists the
    /// root; a single-component absolute path is resolved under the root and
    /// silently falls back to the current directory when it does not name a
    /// subdirectory there.
    pub fn ls(&mut self, path: Option<&str>) -> Result<Vec<String>, Fat32Error> {
        let mut target = self.current_cluster;

        if let Some(path) = path {
            if path == "/" {
                target = ROOT_CLUSTER;
            } else if let Some(name) = path.strip_prefix('/') {
                let formatted = ShortName::new(name)?;

                let mut buf = [0u8; CLUSTER_SIZE];
                self.read_cluster(ROOT_CLUSTER, &mut buf)?;
                let root = DirBlock::from_bytes(&buf);

                if let Some(entry) = root.find(&formatted).filter(|entry| entry.is_directory()) {
                    target = entry.first_cluster();
                }
            }
        }

        let mut buf = [0u8; CLUSTER_SIZE];
        self.read_cluster(target, &mut buf)?;
        let dir = DirBlock::from_bytes(&buf);
        Ok(dir.live().map(DirEntry::display_name).collect())
    }
}

#[cfg(test)]
fn blank_volume() -> Volume<std::io::Cursor<Vec<u8>>> {
    Volume::from_device(std::io::Cursor::new(vec![0u8; IMAGE_SIZE as usize]))
}

#[cfg(test)]
fn formatted_volume() -> Volume<std::io::Cursor<Vec<u8>>> {
    let mut volume = blank_volume();
    volume.format().expect("format failed");
    volume
}

#[test]
fn unformatted_image_is_invalid() {
    let mut volume = blank_volume();
    assert!(matches!(volume.is_valid(), Err(Fat32Error::InvalidImage)));
    assert!(volume.mkdir("ttt").is_err());
}

#[test]
fn format_produces_a_valid_image() {
    let mut volume = formatted_volume();
    volume.is_valid().expect("formatted image must validate");
    assert_eq!(volume.ls(None).unwrap(), vec![".", ".."]);
    assert_eq!(
        volume.fat_entry(ROOT_CLUSTER).unwrap(),
        FatEntry::end_of_chain()
    );
}

#[test]
fn mkdir_commits_child_before_parent() {
    let mut volume = formatted_volume();
    volume.mkdir("ttt").expect("mkdir failed");

    let listing = volume.ls(None).unwrap();
    assert!(listing.contains(&String::from("ttt")));

    // child block: `.` points at the new cluster, `..` at the root
    let mut buf = [0u8; CLUSTER_SIZE];
    volume.read_cluster(ROOT_CLUSTER, &mut buf).unwrap();
    let root = DirBlock::from_bytes(&buf);
    let entry = root.find(&ShortName::new("ttt").unwrap()).unwrap();
    assert!(entry.is_directory());
    let child_cluster = entry.first_cluster();
    assert_ne!(child_cluster, ROOT_CLUSTER);

    volume.read_cluster(child_cluster, &mut buf).unwrap();
    let child = DirBlock::from_bytes(&buf);
    assert_eq!(
        child.find(&ShortName::DOT).unwrap().first_cluster(),
        child_cluster
    );
    assert_eq!(
        child.find(&ShortName::DOT_DOT).unwrap().first_cluster(),
        ROOT_CLUSTER
    );
    assert_eq!(
        volume.fat_entry(child_cluster).unwrap(),
        FatEntry::end_of_chain()
    );
}

#[test]
fn mkdir_rejects_duplicate_names() {
    let mut volume = formatted_volume();
    volume.mkdir("ttt").unwrap();
    assert!(matches!(
        volume.mkdir("ttt"),
        Err(Fat32Error::NameExists(_))
    ));
    // collision is on the normalized 11-byte form, across entry kinds
    assert!(matches!(
        volume.touch("ttt"),
        Err(Fat32Error::NameExists(_))
    ));
}

#[test]
fn touch_allocates_no_cluster() {
    let mut volume = formatted_volume();
    let free_before = volume.find_free_cluster().unwrap();
    volume.touch("file1.txt").expect("touch failed");

    let mut buf = [0u8; CLUSTER_SIZE];
    volume.read_cluster(ROOT_CLUSTER, &mut buf).unwrap();
    let root = DirBlock::from_bytes(&buf);
    let entry = root.find(&ShortName::new("file1.txt").unwrap()).unwrap();
    assert!(!entry.is_directory());
    assert_eq!(entry.file_size(), 0);
    assert_eq!(entry.first_cluster(), 0);
    assert_eq!(volume.find_free_cluster().unwrap(), free_before);
}

#[test]
fn cd_moves_the_cursor() {
    let mut volume = formatted_volume();
    volume.mkdir("ttt").unwrap();

    volume.cd("/ttt").expect("cd failed");
    assert_ne!(volume.current_cluster(), ROOT_CLUSTER);
    assert_eq!(volume.current_path(), "/ttt");
    assert_eq!(volume.ls(None).unwrap(), vec![".", ".."]);

    volume.cd("/").expect("cd failed");
    assert_eq!(volume.current_cluster(), ROOT_CLUSTER);
    assert_eq!(volume.current_path(), "/");
}

#[test]
fn cd_dot_and_dot_dot() {
    let mut volume = formatted_volume();
    volume.mkdir("ttt").unwrap();

    volume.cd("/.").unwrap();
    assert_eq!(volume.current_cluster(), ROOT_CLUSTER);

    // `..` at the root stays put
    volume.cd("/..").unwrap();
    assert_eq!(volume.current_cluster(), ROOT_CLUSTER);

    volume.cd("/ttt").unwrap();
    volume.cd("/..").unwrap();
    assert_eq!(volume.current_cluster(), ROOT_CLUSTER);
    assert_eq!(volume.current_path(), "/");
}

#[test]
fn cd_rejects_relative_and_nested_paths() {
    let mut volume = formatted_volume();
    assert!(matches!(volume.cd("ttt"), Err(Fat32Error::BadArgument)));
    assert!(matches!(
        volume.cd("/a/b"),
        Err(Fat32Error::Unsupported(_))
    ));
    assert!(matches!(
        volume.cd("/missing"),
        Err(Fat32Error::NotFound(_))
    ));
}

#[test]
fn cd_replaces_the_path_instead_of_appending() {
    let mut volume = formatted_volume();
    volume.mkdir("outer").unwrap();
    volume.cd("/outer").unwrap();
    volume.mkdir("inner").unwrap();

    // the component resolves in the current directory, but the prompt path
    // forgets the level above
    volume.cd("/inner").expect("cd failed");
    assert_eq!(volume.current_path(), "/inner");

    let mut buf = [0u8; CLUSTER_SIZE];
    volume.read_cluster(volume.current_cluster(), &mut buf).unwrap();
    let dir = DirBlock::from_bytes(&buf);
    let parent = dir.find(&ShortName::DOT_DOT).unwrap().first_cluster();
    assert_ne!(parent, ROOT_CLUSTER, "inner's parent is outer, not the root");
}

#[test]
fn cd_into_a_file_fails() {
    let mut volume = formatted_volume();
    volume.touch("file1.txt").unwrap();
    assert!(matches!(
        volume.cd("/file1.txt"),
        Err(Fat32Error::NotFound(_))
    ));
}

#[test]
fn ls_resolves_one_level_under_root() {
    let mut volume = formatted_volume();
    volume.mkdir("ttt").unwrap();
    volume.touch("file1.txt").unwrap();

    assert_eq!(volume.ls(Some("/ttt")).unwrap(), vec![".", ".."]);

    let root = volume.ls(Some("/")).unwrap();
    assert!(root.contains(&String::from("ttt")));
    assert!(root.contains(&String::from("file1.txt")));
}

#[test]
fn ls_falls_back_to_the_current_directory() {
    let mut volume = formatted_volume();
    volume.mkdir("ttt").unwrap();

    let fallback = volume.ls(Some("/missing")).unwrap();
    assert_eq!(fallback, volume.ls(None).unwrap());

    // a file name does not resolve as a directory either
    volume.touch("file1.txt").unwrap();
    let fallback = volume.ls(Some("/file1.txt")).unwrap();
    assert_eq!(fallback, volume.ls(None).unwrap());
}

#[test]
fn directory_fills_up_at_128_entries() {
    let mut volume = formatted_volume();
    // `.` and `..` occupy two of the 128 slots
    for i in 0..126 {
        volume.touch(&format!("f{i}")).expect("touch failed");
    }
    assert!(matches!(
        volume.touch("straw"),
        Err(Fat32Error::OutOfSpace)
    ));
}

#[test]
fn mkdir_fails_when_no_cluster_is_free() {
    let mut volume = formatted_volume();
    let total_clusters = volume.geometry().unwrap().total_clusters;
    for cluster in 3..total_clusters {
        volume
            .set_fat_entry(cluster, FatEntry::end_of_chain())
            .unwrap();
    }
    assert!(matches!(volume.mkdir("ttt"), Err(Fat32Error::OutOfSpace)));
}
