use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

use crate::SECTOR_SIZE;

/// Reads exactly one sector from the given absolute sector index.
pub fn read_sector<T>(device: &mut T, sector: u64, buf: &mut [u8]) -> io::Result<()>
where
    T: Read + Seek,
{
    assert_eq!(buf.len(), SECTOR_SIZE);
    device.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
    device.read_exact(buf)
}

/// Writes exactly one sector at the given absolute sector index and flushes,
/// so the underlying file always reflects the last completed write.
pub fn write_sector<T>(device: &mut T, sector: u64, buf: &[u8]) -> io::Result<()>
where
    T: Write + Seek,
{
    assert_eq!(buf.len(), SECTOR_SIZE);
    device.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
    device.write_all(buf)?;
    device.flush()
}

/// Writes zeroes to a device from the given absolute offset (in bytes), up to the given size.
pub fn write_zeroes<T>(device: &mut T, size: u64, offset: u64) -> io::Result<()>
where
    T: Write + Seek,
{
    let buffer = [0u8; 4 * crate::KB as usize];

    device.seek(SeekFrom::Start(offset))?;

    let mut remaining = size;
    while remaining > 0 {
        let iter_size = remaining.min(buffer.len() as u64);
        // `iter_size` is max 4KB so this cast is fine
        if device.write(&buffer[..iter_size as usize])? != iter_size as usize {
            return Err(io::Error::new(ErrorKind::WriteZero, "Failed to write 0s"));
        }
        remaining -= iter_size;
    }
    Ok(())
}

#[test]
fn sector_round_trip() {
    let mut device = io::Cursor::new(vec![0u8; SECTOR_SIZE * 4]);

    let mut data = [0u8; SECTOR_SIZE];
    data[0] = 0xde;
    data[511] = 0xad;
    write_sector(&mut device, 2, &data).expect("write failed");

    let mut read = [0u8; SECTOR_SIZE];
    read_sector(&mut device, 2, &mut read).expect("read failed");
    assert_eq!(data, read);

    // neighbours untouched
    read_sector(&mut device, 1, &mut read).expect("read failed");
    assert_eq!(read, [0u8; SECTOR_SIZE]);
    read_sector(&mut device, 3, &mut read).expect("read failed");
    assert_eq!(read, [0u8; SECTOR_SIZE]);
}

#[test]
fn short_read_is_an_error() {
    let mut device = io::Cursor::new(vec![0u8; SECTOR_SIZE + 100]);
    let mut buf = [0u8; SECTOR_SIZE];
    assert!(read_sector(&mut device, 1, &mut buf).is_err());
}

#[test]
fn zero_fill() {
    let mut device = io::Cursor::new(vec![0xffu8; 3 * SECTOR_SIZE]);
    write_zeroes(&mut device, SECTOR_SIZE as u64, SECTOR_SIZE as u64).expect("zeroing failed");

    let image = device.into_inner();
    assert!(image[..SECTOR_SIZE].iter().all(|&b| b == 0xff));
    assert!(image[SECTOR_SIZE..2 * SECTOR_SIZE].iter().all(|&b| b == 0));
    assert!(image[2 * SECTOR_SIZE..].iter().all(|&b| b == 0xff));
}
