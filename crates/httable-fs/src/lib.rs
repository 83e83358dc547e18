//! The narrow `Filesystem` interface the storage engine consumes
//!: a pluggable remote append-only filesystem in
//! production, backed here by an in-memory implementation for tests and a
//! thin `std::fs`-backed implementation for real use.

mod local;
mod mem;

pub use local::LocalFilesystem;
pub use mem::MemFilesystem;

use bitflags::bitflags;
use httable_error::Result;

pub type FileHandle = u64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
    }
}

/// The engine's sole dependency on durable storage. Every method may fail
/// with `HypertableError::LocalIoError` or a more specific kind; callers
/// should propagate these rather than retrying internally.
pub trait Filesystem: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<FileHandle>;
    fn create(
        &self,
        path: &str,
        overwrite: bool,
        buf_size: u32,
        replication: u16,
        block_size: u64,
    ) -> Result<FileHandle>;
    fn read(&self, fd: FileHandle, len: usize) -> Result<Vec<u8>>;
    fn pread(&self, fd: FileHandle, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn append(&self, fd: FileHandle, data: &[u8], flush: bool) -> Result<()>;
    fn seek(&self, fd: FileHandle, offset: u64) -> Result<()>;
    fn flush(&self, fd: FileHandle) -> Result<()>;
    fn close(&self, fd: FileHandle) -> Result<()>;
    fn length(&self, path: &str) -> Result<i64>;
    fn mkdirs(&self, path: &str) -> Result<()>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn readdir(&self, path: &str) -> Result<Vec<String>>;
    fn rename(&self, src: &str, dst: &str) -> Result<()>;
    fn exists(&self, path: &str) -> Result<bool>;
}
