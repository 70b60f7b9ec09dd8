use std::fs::File;
use std::io::{Read, Seek, Write};

use fat32_fs::shell::{self, Signal};
use fat32_fs::volume::Volume;
use fat32_fs::{IMAGE_SIZE, ROOT_CLUSTER, SECTOR_SIZE};

fn run_command<T: Read + Write + Seek>(volume: &mut Volume<T>, line: &str) -> (String, Signal) {
    let mut out = Vec::new();
    let signal = shell::process_command(volume, line, &mut out).expect("command I/O failed");
    (String::from_utf8(out).expect("output was not UTF-8"), signal)
}

#[test]
fn seeded_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("test.img");

    let mut volume = Volume::open(&image).expect("open failed");

    // 1. a fresh image is exactly 20 MiB and not yet a filesystem
    assert_eq!(std::fs::metadata(&image).unwrap().len(), 20 * 1024 * 1024);
    let (out, signal) = run_command(&mut volume, "ls");
    assert!(out.contains("Unknown disk format"));
    assert_eq!(signal, Signal::Quit);

    // 2. format, then the root holds `.` and `..`
    let (out, _) = run_command(&mut volume, "format");
    assert!(out.contains("Ok"));
    volume.is_valid().expect("image must validate after format");

    let (out, _) = run_command(&mut volume, "ls");
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines, [".", ".."]);

    // 3. mkdir shows up in the listing
    let (out, _) = run_command(&mut volume, "mkdir ttt");
    assert!(out.contains("Ok"));
    let (out, _) = run_command(&mut volume, "ls");
    assert!(out.lines().any(|line| line == "ttt"));

    // 4. cd into it: silent, cursor moves, fresh directory is listable
    let (out, _) = run_command(&mut volume, "cd /ttt");
    assert_eq!(out, "");
    assert_ne!(volume.current_cluster(), ROOT_CLUSTER);
    assert_eq!(volume.current_path(), "/ttt");
    let (out, _) = run_command(&mut volume, "ls");
    assert_eq!(out.lines().collect::<Vec<_>>(), [".", ".."]);

    // 5. back to the root; a touched file lists with its case preserved
    let (out, _) = run_command(&mut volume, "cd /");
    assert_eq!(out, "");
    assert_eq!(volume.current_cluster(), ROOT_CLUSTER);
    assert_eq!(volume.current_path(), "/");

    let (out, _) = run_command(&mut volume, "touch file1.txt");
    assert!(out.contains("Ok"));
    let (out, _) = run_command(&mut volume, "ls");
    assert!(out.lines().any(|line| line == "file1.txt"));

    // 6. unknown commands are reported
    let (out, _) = run_command(&mut volume, "unknowncmd");
    assert!(out.contains("Unknown command"));

    // 7. a new session over the same image sees everything
    drop(volume);
    let mut volume = Volume::open(&image).expect("reopen failed");
    let (out, _) = run_command(&mut volume, "ls");
    let lines: Vec<&str> = out.lines().collect();
    for expected in [".", "..", "ttt", "file1.txt"] {
        assert!(lines.contains(&expected), "missing {expected} after reopen");
    }
    assert_eq!(std::fs::metadata(&image).unwrap().len(), 20 * 1024 * 1024);
}

#[test]
fn fat_copies_stay_mirrored_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("mirror.img");

    let mut volume = Volume::open(&image).expect("open failed");
    run_command(&mut volume, "format");
    run_command(&mut volume, "mkdir ttt");
    run_command(&mut volume, "cd /ttt");
    run_command(&mut volume, "mkdir nested");
    run_command(&mut volume, "touch file1.txt");
    drop(volume);

    let geometry = {
        let mut volume = Volume::open(&image).expect("reopen failed");
        volume.is_valid().expect("valid");
        volume.geometry().unwrap()
    };

    let mut raw = Vec::new();
    File::open(&image).unwrap().read_to_end(&mut raw).unwrap();
    assert_eq!(raw.len() as u64, IMAGE_SIZE);

    let fat_bytes = geometry.fat_size as usize * SECTOR_SIZE;
    let first = geometry.fat_start as usize * SECTOR_SIZE;
    let second = first + fat_bytes;
    assert_eq!(
        raw[first..first + fat_bytes],
        raw[second..second + fat_bytes],
        "FAT copies must be byte-equal after any mutation"
    );

    // entry 0 carries the media type placeholder, entry 1 and the root are
    // end-of-chain
    let entry = |index: usize| {
        u32::from_le_bytes([
            raw[first + index * 4],
            raw[first + index * 4 + 1],
            raw[first + index * 4 + 2],
            raw[first + index * 4 + 3],
        ])
    };
    assert_eq!(entry(0), 0x0ffffff8);
    assert_eq!(entry(1), 0x0fffffff);
    assert_eq!(entry(ROOT_CLUSTER as usize), 0x0fffffff);
}

#[test]
fn non_fat32_file_is_recreated_as_a_blank_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("garbage.img");
    std::fs::write(&image, b"not a filesystem at all").unwrap();

    let mut volume = Volume::open(&image).expect("open failed");
    assert_eq!(std::fs::metadata(&image).unwrap().len(), IMAGE_SIZE);
    assert!(volume.is_valid().is_err());

    let (out, _) = run_command(&mut volume, "format");
    assert!(out.contains("Ok"));
    let (out, _) = run_command(&mut volume, "ls");
    assert_eq!(out.lines().collect::<Vec<_>>(), [".", ".."]);
}

#[test]
fn formatting_twice_resets_the_volume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("twice.img");

    let mut volume = Volume::open(&image).expect("open failed");
    run_command(&mut volume, "format");
    run_command(&mut volume, "mkdir ttt");
    run_command(&mut volume, "touch file1.txt");

    let (out, _) = run_command(&mut volume, "format");
    assert!(out.contains("Ok"));
    let (out, _) = run_command(&mut volume, "ls");
    assert_eq!(out.lines().collect::<Vec<_>>(), [".", ".."]);
}
