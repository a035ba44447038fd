//! Journal file backend.
//!
//! A journal file has exactly one writer. [`FileBackend::open`] takes an
//! exclusive advisory lock on a sidecar `<journal>.lock` file and holds it
//! until the backend is dropped; a second writer gets
//! [`StorageError::Locked`]. Read-only handles take no lock, so operators can
//! inspect a journal a running server is appending to.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to the journal file name to form its lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Returns the lock file guarding the journal at `journal`.
pub fn lock_path(journal: &Path) -> PathBuf {
    let mut name = journal
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("journal"));
    name.push(LOCK_SUFFIX);
    journal.with_file_name(name)
}

/// A journal stored in a single file.
///
/// Writable handles own the journal's lock for their whole lifetime.
/// `flush()` pushes data to the OS, `sync()` and `truncate()` force it to
/// disk.
///
/// # Example
///
/// ```no_run
/// use fieldsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("sync.journal")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    // Reads seek, so they need exclusive access to the handle.
    file: Mutex<File>,
    len: u64,
    writer_lock: Option<File>,
}

impl FileBackend {
    /// Opens or creates the journal at `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the journal,
    /// or an I/O error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let writer_lock = acquire_lock(path)?;
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
            writer_lock: Some(writer_lock),
        })
    }

    /// Like [`FileBackend::open`], creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the journal
    /// cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Opens an existing journal for reading only.
    ///
    /// No lock is taken; `append` and `truncate` fail with
    /// [`StorageError::ReadOnly`]. The length is fixed at open time, so a
    /// concurrent writer's later appends are not visible.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file does not exist or cannot be read.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
            writer_lock: None,
        })
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this handle holds the writer lock.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writer_lock.is_some()
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(StorageError::ReadOnly(self.path.clone()))
        }
    }
}

fn acquire_lock(journal: &Path) -> StorageResult<File> {
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(journal))?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(StorageError::Locked(journal.to_path_buf()));
    }
    Ok(lock_file)
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.len {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }

        let mut buffer = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_writable()?;
        let offset = self.len;
        if !data.is_empty() {
            // Opened in append mode: the write lands at the end of the file.
            self.file.get_mut().write_all(data)?;
            self.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.is_writable() {
            self.file.get_mut().flush()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.is_writable() {
            self.file.get_mut().sync_data()?;
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_writable()?;
        if new_size > self.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: self.len,
            });
        }

        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.len = new_size;
        Ok(())
    }
}
