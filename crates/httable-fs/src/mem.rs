use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use httable_error::{HypertableError, Result};
use parking_lot::Mutex;

use crate::{FileHandle, Filesystem, OpenFlags};

struct OpenFile {
    path: String,
    position: u64,
}

/// An in-memory `Filesystem`, used by tests so they exercise the real
/// commit-log/cell-store code paths without touching disk.
#[derive(Default)]
pub struct MemFilesystem {
    files: Mutex<HashMap<String, Vec<u8>>>,
    handles: Mutex<HashMap<FileHandle, OpenFile>>,
    next_handle: AtomicU64,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_handle(&self, path: &str, position: u64) -> FileHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.handles.lock().insert(
            handle,
            OpenFile {
                path: path.to_string(),
                position,
            },
        );
        handle
    }

    fn not_found(path: &str) -> HypertableError {
        HypertableError::local_io(format!("no such file: {path}"))
    }

    fn bad_handle() -> HypertableError {
        HypertableError::internal("operation on an unknown or closed file handle")
    }
}

impl Filesystem for MemFilesystem {
    fn open(&self, path: &str, _flags: OpenFlags) -> Result<FileHandle> {
        if !self.files.lock().contains_key(path) {
            return Err(Self::not_found(path));
        }
        Ok(self.allocate_handle(path, 0))
    }

    fn create(
        &self,
        path: &str,
        overwrite: bool,
        _buf_size: u32,
        _replication: u16,
        _block_size: u64,
    ) -> Result<FileHandle> {
        let mut files = self.files.lock();
        if files.contains_key(path) && !overwrite {
            return Err(HypertableError::local_io(format!("{path} already exists")));
        }
        files.insert(path.to_string(), Vec::new());
        drop(files);
        Ok(self.allocate_handle(path, 0))
    }

    fn read(&self, fd: FileHandle, len: usize) -> Result<Vec<u8>> {
        let mut handles = self.handles.lock();
        let open_file = handles.get_mut(&fd).ok_or_else(Self::bad_handle)?;
        let files = self.files.lock();
        let data = files.get(&open_file.path).ok_or_else(|| Self::not_found(&open_file.path))?;
        let start = open_file.position as usize;
        let end = (start + len).min(data.len());
        let bytes = data.get(start..end).unwrap_or(&[]).to_vec();
        open_file.position += bytes.len() as u64;
        Ok(bytes)
    }

    fn pread(&self, fd: FileHandle, offset: u64, len: usize) -> Result<Vec<u8>> {
        let handles = self.handles.lock();
        let open_file = handles.get(&fd).ok_or_else(Self::bad_handle)?;
        let files = self.files.lock();
        let data = files.get(&open_file.path).ok_or_else(|| Self::not_found(&open_file.path))?;
        let start = offset as usize;
        if start > data.len() {
            return Ok(Vec::new());
        }
        let end = (start + len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn append(&self, fd: FileHandle, data: &[u8], _flush: bool) -> Result<()> {
        let handles = self.handles.lock();
        let open_file = handles.get(&fd).ok_or_else(Self::bad_handle)?;
        let mut files = self.files.lock();
        let buf = files.get_mut(&open_file.path).ok_or_else(|| Self::not_found(&open_file.path))?;
        buf.extend_from_slice(data);
        Ok(())
    }

    fn seek(&self, fd: FileHandle, offset: u64) -> Result<()> {
        let mut handles = self.handles.lock();
        let open_file = handles.get_mut(&fd).ok_or_else(Self::bad_handle)?;
        open_file.position = offset;
        Ok(())
    }

    fn flush(&self, fd: FileHandle) -> Result<()> {
        if !self.handles.lock().contains_key(&fd) {
            return Err(Self::bad_handle());
        }
        Ok(())
    }

    fn close(&self, fd: FileHandle) -> Result<()> {
        self.handles.lock().remove(&fd).ok_or_else(Self::bad_handle)?;
        Ok(())
    }

    fn length(&self, path: &str) -> Result<i64> {
        let files = self.files.lock();
        let data = files.get(path).ok_or_else(|| Self::not_found(path))?;
        Ok(data.len() as i64)
    }

    fn mkdirs(&self, _path: &str) -> Result<()> {
        // Paths are flat keys in the in-memory filesystem; directories
        // need no explicit representation.
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let prefix = format!("{path}/");
        self.files.lock().retain(|k, _| !k.starts_with(&prefix) && k != path);
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{path}/");
        let mut names: Vec<String> = self
            .files
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(|rest| rest.split('/').next().unwrap().to_string()))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files.remove(src).ok_or_else(|| Self::not_found(src))?;
        files.insert(dst.to_string(), data);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }
}
