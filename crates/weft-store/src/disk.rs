//! On-disk bootstrap: the fsid file, its exclusive lock, and the version
//! stamp. The kv backend's own files live under `current/`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// On-disk format version stamped into `store_version`.
pub(crate) const STORE_VERSION: u32 = 1;

pub(crate) fn fsid_path(basedir: &Path) -> PathBuf {
    basedir.join("fsid")
}

pub(crate) fn current_path(basedir: &Path) -> PathBuf {
    basedir.join("current")
}

fn version_path(basedir: &Path) -> PathBuf {
    basedir.join("store_version")
}

pub(crate) fn open_fsid(basedir: &Path, create: bool) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .open(fsid_path(basedir))
}

/// Take the exclusive fsid lock. Fails with [`StoreError::Locked`] when
/// another process already holds it.
pub(crate) fn lock_fsid(file: &File) -> StoreResult<()> {
    flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|_| StoreError::Locked)
}

/// Read the fsid, returning `None` for an empty (fresh) file.
pub(crate) fn read_fsid(file: &mut File) -> StoreResult<Option<Uuid>> {
    file.seek(SeekFrom::Start(0))?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let fsid = text
        .parse::<Uuid>()
        .map_err(|e| StoreError::InvalidArgument(format!("bad fsid: {e}")))?;
    Ok(Some(fsid))
}

pub(crate) fn write_fsid(file: &mut File, fsid: Uuid) -> StoreResult<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{fsid}")?;
    file.sync_all()?;
    debug!(%fsid, "fsid written");
    Ok(())
}

pub(crate) fn write_version_stamp(basedir: &Path) -> StoreResult<()> {
    let encoded = bincode::serialize(&STORE_VERSION).expect("u32 encodes");
    let mut file = File::create(version_path(basedir))?;
    file.write_all(&encoded)?;
    file.sync_all()?;
    Ok(())
}

/// Read the version stamp; `None` when the stamp file does not exist.
pub(crate) fn read_version_stamp(basedir: &Path) -> StoreResult<Option<u32>> {
    let mut file = match File::open(version_path(basedir)) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    let version: u32 = bincode::deserialize(&raw)
        .map_err(|e| StoreError::InvalidArgument(format!("bad version stamp: {e}")))?;
    Ok(Some(version))
}
