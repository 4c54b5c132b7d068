use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use weft_kvdb::open_backend;
use weft_objmap::{MapError, StripObjectMap};
use weft_types::{CollectionId, ObjectId, Transaction};

use crate::config::StoreConfig;
use crate::disk;
use crate::error::{StoreError, StoreResult};
use crate::pool::{Finisher, TpHandle, WorkerPool};
use crate::sequencer::{Completions, Op, OpSequencer, Sequencer, SubmitManager};

#[derive(Default)]
struct ReadErrorState {
    data: HashSet<ObjectId>,
    mdata: HashSet<ObjectId>,
}

/// Shared engine state: everything the worker threads need.
pub(crate) struct StoreInner {
    pub(crate) config: StoreConfig,
    pub(crate) backend: StripObjectMap,
    pub(crate) submit_manager: SubmitManager,
    pub(crate) readable_finisher: Finisher,
    pub(crate) ondisk_finisher: Finisher,
    read_errors: Mutex<ReadErrorState>,
    meta_lock: Mutex<()>,
}

impl StoreInner {
    /// Worker entry: apply the sequencer's head op under its apply lock,
    /// queue the on-disk completion, then fire the readable completions.
    pub(crate) fn do_op(&self, osr: &Arc<OpSequencer>, handle: &TpHandle) {
        let apply_guard = osr.apply_lock();
        let Some(op) = osr.dequeue() else {
            warn!(sequencer = osr.name(), "worker woke with empty sequencer queue");
            return;
        };
        debug!(
            sequencer = osr.name(),
            op_seq = op.op_seq,
            ops = op.ops,
            bytes = op.bytes,
            "apply start"
        );
        self.do_transactions(&op.transactions, op.op_seq, handle);
        if let Some(ondisk) = op.ondisk {
            self.ondisk_finisher.queue(ondisk);
        }
        drop(apply_guard);

        if let Some(sync_cb) = op.onreadable_sync {
            sync_cb();
        }
        if let Some(cb) = op.onreadable {
            self.readable_finisher.queue(cb);
        }
    }

    // ------------------------------------------------------------------
    // Debug read-error injection
    // ------------------------------------------------------------------

    pub(crate) fn inject_data_error(&self, oid: &ObjectId) {
        debug!(%oid, "injecting data read error");
        self.read_errors.lock().expect("read error lock poisoned").data.insert(oid.clone());
    }

    pub(crate) fn inject_mdata_error(&self, oid: &ObjectId) {
        debug!(%oid, "injecting metadata read error");
        self.read_errors.lock().expect("read error lock poisoned").mdata.insert(oid.clone());
    }

    pub(crate) fn debug_obj_on_delete(&self, oid: &ObjectId) {
        let mut state = self.read_errors.lock().expect("read error lock poisoned");
        state.data.remove(oid);
        state.mdata.remove(oid);
    }

    pub(crate) fn debug_data_eio(&self, oid: &ObjectId) -> bool {
        self.read_errors.lock().expect("read error lock poisoned").data.contains(oid)
    }

    pub(crate) fn debug_mdata_eio(&self, oid: &ObjectId) -> bool {
        self.read_errors.lock().expect("read error lock poisoned").mdata.contains(oid)
    }
}

/// The striped object storage engine.
///
/// Layers a POSIX-like object interface (random-offset reads and writes,
/// extended attributes, per-object sorted maps, cloning, collections) on an
/// ordered key/value backend. Batches submitted through
/// [`Store::queue_transactions`] apply atomically with respect to the
/// backend and in order with respect to their [`Sequencer`].
pub struct Store {
    // field order matters for shutdown: the pool joins its workers before
    // the engine state (and its finishers) goes away
    pool: WorkerPool,
    default_osr: Sequencer,
    inner: Arc<StoreInner>,
    basedir: PathBuf,
    fsid: Uuid,
    _fsid_lock: File,
}

impl Store {
    /// Initialize a store directory: fsid file, version stamp, and the
    /// `current/` directory the backend lives in. Idempotent; an existing
    /// fsid is kept.
    pub fn mkfs(basedir: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Uuid> {
        let basedir = basedir.as_ref();
        fs::create_dir_all(basedir)?;

        let mut fsid_file = disk::open_fsid(basedir, true)?;
        disk::lock_fsid(&fsid_file)?;
        let fsid = match disk::read_fsid(&mut fsid_file)? {
            Some(existing) => {
                info!(fsid = %existing, "mkfs: fsid already set");
                existing
            }
            None => {
                let fsid = Uuid::new_v4();
                disk::write_fsid(&mut fsid_file, fsid)?;
                info!(%fsid, "mkfs: generated fsid");
                fsid
            }
        };
        disk::write_version_stamp(basedir)?;

        let current = disk::current_path(basedir);
        match fs::metadata(&current) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StoreError::InvalidArgument(
                    "current exists but is not a directory".to_string(),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => fs::create_dir(&current)?,
            Err(e) => return Err(e.into()),
        }

        // make sure the backend can be created/opened
        open_backend(config.backend, &current).map_err(MapError::from)?;

        info!(basedir = %basedir.display(), "mkfs done");
        Ok(fsid)
    }

    /// Mount the store: take the fsid lock, check the version stamp, open
    /// the backend, and start the worker pool and finishers.
    pub fn mount(basedir: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let basedir = basedir.as_ref().to_path_buf();
        fs::metadata(&basedir)?;

        let mut fsid_file = disk::open_fsid(&basedir, false)?;
        let fsid = disk::read_fsid(&mut fsid_file)?.ok_or_else(|| {
            StoreError::InvalidArgument("empty fsid; run mkfs first".to_string())
        })?;
        disk::lock_fsid(&fsid_file)?;

        match disk::read_version_stamp(&basedir)? {
            Some(found) if found == disk::STORE_VERSION => {}
            Some(found) => {
                return Err(StoreError::VersionMismatch {
                    found,
                    expected: disk::STORE_VERSION,
                })
            }
            None => {
                return Err(StoreError::VersionMismatch {
                    found: 0,
                    expected: disk::STORE_VERSION,
                })
            }
        }

        let current = disk::current_path(&basedir);
        if !current.is_dir() {
            return Err(StoreError::InvalidArgument(
                "missing current/ directory; run mkfs first".to_string(),
            ));
        }

        let db = open_backend(config.backend, &current).map_err(MapError::from)?;
        let backend = StripObjectMap::new(db, config.strip_size)?;
        let op_threads = config.op_threads;

        let inner = Arc::new(StoreInner {
            config,
            backend,
            submit_manager: SubmitManager::new(),
            readable_finisher: Finisher::new("weft-readable"),
            ondisk_finisher: Finisher::new("weft-ondisk"),
            read_errors: Mutex::new(ReadErrorState::default()),
            meta_lock: Mutex::new(()),
        });
        let pool = WorkerPool::start(Arc::clone(&inner), op_threads);

        info!(%fsid, basedir = %basedir.display(), "store mounted");
        Ok(Self {
            pool,
            default_osr: Sequencer::new("default"),
            inner,
            basedir,
            fsid,
            _fsid_lock: fsid_file,
        })
    }

    /// Stop workers and finishers, drain pending batches, and release the
    /// fsid lock.
    pub fn umount(self) {
        info!(basedir = %self.basedir.display(), "store unmounting");
        // Drop order does the work: pool drains and joins first.
    }

    /// Returns `true` if another process holds the store's fsid lock.
    pub fn test_mount_in_use(basedir: impl AsRef<Path>) -> StoreResult<bool> {
        let file = match disk::open_fsid(basedir.as_ref(), false) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match disk::lock_fsid(&file) {
            Ok(()) => Ok(false),
            Err(StoreError::Locked) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub fn fsid(&self) -> Uuid {
        self.fsid
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// Filesystem limit on object name length under the store directory.
    pub fn max_object_name_length(&self) -> StoreResult<u64> {
        let _guard = self.inner.meta_lock.lock().expect("store lock poisoned");
        let limit = nix::unistd::pathconf(self.basedir.as_path(), nix::unistd::PathconfVar::NAME_MAX)
            .map_err(|e| StoreError::Io(std::io::Error::from_raw_os_error(e as i32)))?
            .ok_or_else(|| {
                StoreError::InvalidArgument("NAME_MAX is indeterminate".to_string())
            })?;
        Ok(limit as u64)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Queue a batch of transactions. `seq` chooses the ordering domain
    /// (the store's default sequencer when absent); the completions fire as
    /// the batch progresses. Returns once the batch is queued.
    pub fn queue_transactions(
        &self,
        seq: Option<&Sequencer>,
        transactions: Vec<Transaction>,
        completions: Completions,
    ) -> StoreResult<()> {
        let osr = Arc::clone(&seq.unwrap_or(&self.default_osr).inner);
        let mut op = Op::build(transactions, completions);

        let ticket = self.inner.submit_manager.op_submit_start();
        op.op_seq = ticket.op();
        debug!(
            op_seq = op.op_seq,
            sequencer = osr.name(),
            ops = op.ops,
            bytes = op.bytes,
            "queue transactions"
        );
        // queue the op on the sequencer, then the sequencer on the pool, so
        // op order is preserved no matter which workers pick it up
        osr.queue_op(op);
        self.pool.queue(osr);
        ticket.finish();
        Ok(())
    }

    /// Queue a batch and block until it is on disk.
    pub fn apply(
        &self,
        seq: Option<&Sequencer>,
        transactions: Vec<Transaction>,
    ) -> StoreResult<()> {
        let (tx, rx) = mpsc::channel();
        let completions = Completions::new().ondisk(move || {
            let _ = tx.send(());
        });
        self.queue_transactions(seq, transactions, completions)?;
        rx.recv().map_err(|_| {
            StoreError::InvalidArgument("store shut down before apply completed".to_string())
        })
    }

    // ------------------------------------------------------------------
    // Reads (delegating to the engine state)
    // ------------------------------------------------------------------

    pub fn exists(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<bool> {
        self.inner.exists(cid, oid)
    }

    pub fn stat(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<crate::read::Stat> {
        self.inner.stat(cid, oid)
    }

    /// Read `[offset, offset + len)`; a `len` of zero reads to the end of
    /// the object. Sparse ranges read as zeros.
    pub fn read(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<Vec<u8>> {
        self.inner.read(cid, oid, offset, len)
    }

    pub fn extent_map(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<std::collections::BTreeMap<u64, u64>> {
        self.inner.extent_map(cid, oid, offset, len)
    }

    pub fn getattr(&self, cid: &CollectionId, oid: &ObjectId, name: &str) -> StoreResult<Vec<u8>> {
        self.inner.getattr(cid, oid, name)
    }

    pub fn getattrs(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<std::collections::BTreeMap<String, Vec<u8>>> {
        self.inner.getattrs(cid, oid)
    }

    pub fn collection_getattr(&self, cid: &CollectionId, name: &str) -> StoreResult<Vec<u8>> {
        self.inner.collection_getattr(cid, name)
    }

    pub fn collection_getattrs(
        &self,
        cid: &CollectionId,
    ) -> StoreResult<std::collections::BTreeMap<String, Vec<u8>>> {
        self.inner.collection_getattrs(cid)
    }

    pub fn list_collections(&self) -> StoreResult<Vec<CollectionId>> {
        self.inner.list_collections()
    }

    pub fn collection_exists(&self, cid: &CollectionId) -> bool {
        self.inner.collection_exists(cid)
    }

    pub fn collection_empty(&self, cid: &CollectionId) -> StoreResult<bool> {
        self.inner.collection_empty(cid)
    }

    pub fn collection_list(&self, cid: &CollectionId) -> StoreResult<Vec<ObjectId>> {
        self.inner.collection_list(cid)
    }

    pub fn collection_list_partial(
        &self,
        cid: &CollectionId,
        start: Option<&ObjectId>,
        max: usize,
    ) -> StoreResult<(Vec<ObjectId>, Option<ObjectId>)> {
        self.inner.collection_list_partial(cid, start, max)
    }

    pub fn collection_list_range(
        &self,
        cid: &CollectionId,
        start: Option<&ObjectId>,
        end: &ObjectId,
    ) -> StoreResult<Vec<ObjectId>> {
        self.inner.collection_list_range(cid, start, end)
    }

    pub fn omap_get(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<(Option<Vec<u8>>, std::collections::BTreeMap<String, Vec<u8>>)> {
        self.inner.omap_get(cid, oid)
    }

    pub fn omap_get_header(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<Option<Vec<u8>>> {
        self.inner.omap_get_header(cid, oid)
    }

    pub fn omap_get_keys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<std::collections::BTreeSet<String>> {
        self.inner.omap_get_keys(cid, oid)
    }

    pub fn omap_get_values(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &std::collections::BTreeSet<String>,
    ) -> StoreResult<std::collections::BTreeMap<String, Vec<u8>>> {
        self.inner.omap_get_values(cid, oid, keys)
    }

    pub fn omap_check_keys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &std::collections::BTreeSet<String>,
    ) -> StoreResult<std::collections::BTreeSet<String>> {
        self.inner.omap_check_keys(cid, oid, keys)
    }

    // ------------------------------------------------------------------
    // Debug error injection
    // ------------------------------------------------------------------

    /// Make subsequent data reads of `oid` fail with an I/O error.
    pub fn inject_data_error(&self, oid: &ObjectId) {
        self.inner.inject_data_error(oid);
    }

    /// Make subsequent metadata reads of `oid` fail with an I/O error.
    pub fn inject_mdata_error(&self, oid: &ObjectId) {
        self.inner.inject_mdata_error(oid);
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<StoreInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("basedir", &self.basedir)
            .field("fsid", &self.fsid)
            .finish()
    }
}
