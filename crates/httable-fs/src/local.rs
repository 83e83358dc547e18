use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use httable_error::Result;
use parking_lot::Mutex;

use crate::{FileHandle, Filesystem, OpenFlags};

/// A thin `std::fs`-backed `Filesystem`, standing in for a real
/// distributed filesystem broker in tests and examples that want actual
/// on-disk durability.
#[derive(Default)]
pub struct LocalFilesystem {
    handles: Mutex<HashMap<FileHandle, fs::File>>,
    next_handle: AtomicU64,
}

impl LocalFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, file: fs::File) -> FileHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.handles.lock().insert(handle, file);
        handle
    }
}

impl Filesystem for LocalFilesystem {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<FileHandle> {
        let file = OpenOptions::new()
            .read(flags.contains(OpenFlags::READ) || !flags.contains(OpenFlags::WRITE))
            .write(flags.contains(OpenFlags::WRITE))
            .open(path)?;
        Ok(self.store(file))
    }

    fn create(
        &self,
        path: &str,
        overwrite: bool,
        _buf_size: u32,
        _replication: u16,
        _block_size: u64,
    ) -> Result<FileHandle> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(overwrite)
            .open(path)?;
        Ok(self.store(file))
    }

    fn read(&self, fd: FileHandle, len: usize) -> Result<Vec<u8>> {
        let mut handles = self.handles.lock();
        let file = handles
            .get_mut(&fd)
            .ok_or_else(|| httable_error::HypertableError::internal("unknown file handle"))?;
        let mut buf = vec![0u8; len];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn pread(&self, fd: FileHandle, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut handles = self.handles.lock();
        let file = handles
            .get_mut(&fd)
            .ok_or_else(|| httable_error::HypertableError::internal("unknown file handle"))?;
        let saved = file.stream_position()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        file.seek(SeekFrom::Start(saved))?;
        Ok(buf)
    }

    fn append(&self, fd: FileHandle, data: &[u8], flush: bool) -> Result<()> {
        let mut handles = self.handles.lock();
        let file = handles
            .get_mut(&fd)
            .ok_or_else(|| httable_error::HypertableError::internal("unknown file handle"))?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        if flush {
            file.flush()?;
        }
        Ok(())
    }

    fn seek(&self, fd: FileHandle, offset: u64) -> Result<()> {
        let mut handles = self.handles.lock();
        let file = handles
            .get_mut(&fd)
            .ok_or_else(|| httable_error::HypertableError::internal("unknown file handle"))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn flush(&self, fd: FileHandle) -> Result<()> {
        let mut handles = self.handles.lock();
        let file = handles
            .get_mut(&fd)
            .ok_or_else(|| httable_error::HypertableError::internal("unknown file handle"))?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn close(&self, fd: FileHandle) -> Result<()> {
        self.handles
            .lock()
            .remove(&fd)
            .ok_or_else(|| httable_error::HypertableError::internal("unknown file handle"))?;
        Ok(())
    }

    fn length(&self, path: &str) -> Result<i64> {
        Ok(fs::metadata(path)?.len() as i64)
    }

    fn mkdirs(&self, path: &str) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
            Ok(_) => fs::remove_file(path)?,
            Err(_) => {}
        }
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        fs::rename(src, dst)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::metadata(path).is_ok())
    }
}
