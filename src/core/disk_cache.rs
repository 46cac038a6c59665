//! Purpose: Persistent response cache addressed by uri.
//! Exports: `PersistentCache`, `FileCache`.
//! Role: Backs offline mode and memory-cache hits across process restarts.
//! Invariants: One file per uri, named by the SHA-256 of the uri.
//! Invariants: Writers hold an exclusive fs2 lock; readers hold a shared one.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};

pub trait PersistentCache {
    fn get(&self, uri: &str) -> Result<Option<Vec<u8>>, Error>;
    fn put(&self, uri: &str, content: &[u8]) -> Result<(), Error>;
    fn remove(&self, uri: &str) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}

#[derive(Clone, Debug)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to create cache directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, uri: &str) -> PathBuf {
        let digest = Sha256::digest(uri.as_bytes());
        let name = digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        self.dir.join(format!("{name}.cache"))
    }
}

impl PersistentCache for FileCache {
    fn get(&self, uri: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.entry_path(uri);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(io_error_kind(&err)).with_path(&path).with_source(err));
            }
        };
        file.lock_shared().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_path(&path)
                .with_source(err)
        })?;
        let mut content = Vec::new();
        let read = file.read_to_end(&mut content);
        let _ = file.unlock();
        read.map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        Ok(Some(content))
    }

    fn put(&self, uri: &str, content: &[u8]) -> Result<(), Error> {
        let path = self.entry_path(uri);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(io_error_kind(&err)).with_path(&path).with_source(err))?;
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_path(&path)
                .with_source(err)
        })?;
        // Truncate only once the lock is held so readers never see a partial rewrite.
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(content))
            .and_then(|_| file.flush());
        let _ = file.unlock();
        written.map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))
    }

    fn remove(&self, uri: &str) -> Result<(), Error> {
        let path = self.entry_path(uri);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::new(io_error_kind(&err)).with_path(&path).with_source(err)),
        }
    }

    fn clear(&self) -> Result<(), Error> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to read cache directory")
                .with_path(&self.dir)
                .with_source(err)
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read cache directory entry")
                    .with_path(&self.dir)
                    .with_source(err)
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("cache") {
                continue;
            }
            fs::remove_file(&path)
                .map_err(|err| Error::new(io_error_kind(&err)).with_path(&path).with_source(err))?;
        }
        Ok(())
    }
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::ConcurrentAccess,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
