#![forbid(unsafe_code)]
//! Byte-addressed image I/O.
//!
//! Provides the `ByteDevice` trait with pread/pwrite semantics, a
//! file-backed implementation, an in-memory double for tests, and the
//! device-size probe the superblock validator uses to cross-check the
//! claimed block count. All calls are synchronous and blocking; the
//! checker runs one image, one cycle, one thread.

use rfsck_error::{FsckError, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Byte-addressed device for fixed-offset I/O.
pub trait ByteDevice {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` at `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;

    /// Whether the device was opened writable.
    fn writable(&self) -> bool;
}

/// Physical capacity of a device in blocks of `block_size` bytes.
///
/// Partial trailing blocks don't count: a filesystem cannot use them.
#[must_use]
pub fn device_block_capacity(dev: &dyn ByteDevice, block_size: u32) -> u64 {
    if block_size == 0 {
        return 0;
    }
    dev.len_bytes() / u64::from(block_size)
}

fn check_bounds(len: u64, offset: u64, buf_len: usize, op: &str) -> Result<u64> {
    let end = offset
        .checked_add(u64::try_from(buf_len).map_err(|_| {
            FsckError::Resource(format!("{op} length {buf_len} overflows u64"))
        })?)
        .ok_or_else(|| FsckError::Resource(format!("{op} range overflows u64")))?;
    if end > len {
        return Err(FsckError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{op} out of bounds: offset={offset} len={buf_len} device_len={len}"),
        )));
    }
    Ok(end)
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
#[derive(Debug)]
pub struct FileByteDevice {
    file: File,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    /// Open `path`, read-write when `writable` is requested.
    ///
    /// Unlike a mount, a read-only check must not silently upgrade to
    /// write access, so the requested mode is honored exactly and the
    /// failure surfaces as a plain `io::Error` for the caller to
    /// classify.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            writable,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.len, offset, buf.len(), "read")?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(FsckError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device opened read-only",
            )));
        }
        check_bounds(self.len, offset, buf.len(), "write")?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

/// In-memory byte device for tests and synthetic images.
///
/// Clones share the same backing buffer, so a test can keep a handle
/// to inspect what an owned device wrote.
#[derive(Debug, Clone)]
pub struct MemByteDevice {
    bytes: Arc<Mutex<Vec<u8>>>,
    writable: bool,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>, writable: bool) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
            writable,
        }
    }

    /// Snapshot the current contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().expect("mem device poisoned").clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.lock().expect("mem device poisoned").len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock().expect("mem device poisoned");
        let end = check_bounds(bytes.len() as u64, offset, buf.len(), "read")?;
        let start = usize::try_from(offset)
            .map_err(|_| FsckError::Resource("offset overflows usize".into()))?;
        let end = usize::try_from(end)
            .map_err(|_| FsckError::Resource("offset overflows usize".into()))?;
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(FsckError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device opened read-only",
            )));
        }
        let mut bytes = self.bytes.lock().expect("mem device poisoned");
        let end = check_bounds(bytes.len() as u64, offset, buf.len(), "write")?;
        let start = usize::try_from(offset)
            .map_err(|_| FsckError::Resource("offset overflows usize".into()))?;
        let end = usize::try_from(end)
            .map_err(|_| FsckError::Resource("offset overflows usize".into()))?;
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn writable(&self) -> bool {
        self.writable
    }
}
