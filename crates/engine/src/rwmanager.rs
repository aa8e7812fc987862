//! Uniform positional I/O over a bounded-capacity segment file.
//!
//! Both variants pre-size the file to its capacity at creation, so the
//! unwritten tail reads as zeroes — which the entry codec interprets as the
//! end-of-data marker.

use crate::options::RwMode;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Read/write/sync/close over one segment file.
pub trait RwManager: Send + Sync {
    /// Writes all of `buf` at byte offset `off`.
    fn write_at(&mut self, buf: &[u8], off: u64) -> io::Result<usize>;

    /// Fills `buf` from byte offset `off`.
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()>;

    /// Flushes written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Releases the underlying resources. Further calls are undefined;
    /// callers drop the manager after closing.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens (creating if needed) a segment at `path`, grown to `capacity`, in
/// the requested I/O mode.
pub fn open_rw_manager(
    path: &Path,
    capacity: u64,
    mode: RwMode,
) -> io::Result<Box<dyn RwManager>> {
    match mode {
        RwMode::FileIo => Ok(Box::new(FileIoRwManager::open(path, capacity)?)),
        RwMode::Mmap => Ok(Box::new(MmapRwManager::open(path, capacity)?)),
    }
}

fn open_sized(path: &Path, capacity: u64) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    // Grow (never shrink) to capacity so the tail reads as zeroes.
    if file.metadata()?.len() < capacity {
        file.set_len(capacity)?;
    }
    Ok(file)
}

/// Standard positional I/O.
pub struct FileIoRwManager {
    file: File,
}

impl FileIoRwManager {
    fn open(path: &Path, capacity: u64) -> io::Result<Self> {
        Ok(FileIoRwManager {
            file: open_sized(path, capacity)?,
        })
    }
}

impl RwManager for FileIoRwManager {
    fn write_at(&mut self, buf: &[u8], off: u64) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_all_at(buf, off)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom};
            self.file.seek(SeekFrom::Start(off))?;
            self.file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(buf, off)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(off))?;
            file.read_exact(buf)
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn close(&mut self) -> io::Result<()> {
        // The descriptor itself is released when the manager is dropped.
        self.file.flush()
    }
}

/// Memory-mapped I/O. Reads copy out of the mapping, so no slice can outlive
/// an unmap; the mapping is dropped (unmapped) on close.
pub struct MmapRwManager {
    file: File,
    map: Option<MmapMut>,
}

impl MmapRwManager {
    fn open(path: &Path, capacity: u64) -> io::Result<Self> {
        let file = open_sized(path, capacity)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(MmapRwManager {
            file,
            map: Some(map),
        })
    }

    fn map(&self) -> io::Result<&MmapMut> {
        self.map
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "segment mapping closed"))
    }

    fn range(&self, off: u64, len: usize) -> io::Result<std::ops::Range<usize>> {
        let map_len = self.map()?.len();
        let start = off as usize;
        let end = start.checked_add(len).filter(|&end| end <= map_len);
        match end {
            Some(end) => Ok(start..end),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "access past end of mapping",
            )),
        }
    }
}

impl RwManager for MmapRwManager {
    fn write_at(&mut self, buf: &[u8], off: u64) -> io::Result<usize> {
        let range = self.range(off, buf.len())?;
        let map = self
            .map
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "segment mapping closed"))?;
        map[range].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        let range = self.range(off, buf.len())?;
        buf.copy_from_slice(&self.map()?[range]);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.map()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.flush()
    }
}
