//! Append-only journal files
//!
//! A journal is a sequence of CRC-framed records (see [`crate::encoding`]).
//! Records are appended and synced one at a time; at startup the owner
//! replays the file, folds the records into its in-memory view and
//! rewrites the journal with the minimal records for that view.
//!
//! Replay drops a frame cut short at the end of the file (torn write) with
//! a warning and fails with `Corruption` on a bad frame anywhere else.

use crate::encoding::{decode_frame, encode_frame};
use changelog_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Journal file opened for appends
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open `path` for appends, creating it if missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Path of the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let frame = encode_frame(record)?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Drop every record
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

/// Read every record of the journal at `path`
///
/// A missing file is an empty journal.
pub fn replay<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match decode_frame(&bytes[offset..], offset as u64)? {
            Some((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            None => {
                warn!(
                    path = %path.display(),
                    offset,
                    dropped_bytes = bytes.len() - offset,
                    "Dropping torn entry at end of journal"
                );
                break;
            }
        }
    }
    debug!(path = %path.display(), records = records.len(), "Replayed journal");
    Ok(records)
}

/// Replace the journal at `path` with `records`
///
/// The records are written to a sibling file which then replaces the
/// journal, so a crash leaves either the old or the new journal.
pub fn rewrite<'a, T, I>(path: &Path, records: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let compacted = compaction_path(path);
    {
        let mut file = File::create(&compacted)?;
        for record in records {
            file.write_all(&encode_frame(record)?)?;
        }
        file.sync_all()?;
    }
    fs::rename(&compacted, path)?;
    if let Some(parent) = path.parent() {
        // directory fsync is not supported everywhere
        match File::open(parent).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(e) => debug!(path = %parent.display(), error = %e, "Directory sync failed"),
        }
    }
    Ok(())
}

/// Delete the journal at `path`; a missing file is not an error
pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn compaction_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("journal"));
    name.push(".compact");
    path.with_file_name(name)
}
