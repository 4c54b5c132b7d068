use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tempfile::TempDir;

use weft_objmap::{strip_object_key, OBJECT_STRIP_PREFIX};
use weft_types::{CollectionId, ObjectId, SequencerPosition, Transaction};

use crate::buffer::BufferTransaction;
use crate::pool::TpHandle;
use crate::{Completions, Sequencer, Store, StoreConfig, StoreError};

const S: u64 = 8;

fn test_config() -> StoreConfig {
    StoreConfig {
        strip_size: S,
        debug_verify_split: true,
        ..StoreConfig::default()
    }
}

fn mounted() -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    Store::mkfs(dir.path(), &config).unwrap();
    let store = Store::mount(dir.path(), config).unwrap();
    (store, dir)
}

fn cid() -> CollectionId {
    CollectionId::new("c")
}

/// Mounted store with collection `c` already created.
fn with_collection() -> (Store, TempDir) {
    let (store, dir) = mounted();
    let mut t = Transaction::new();
    t.create_collection(cid());
    store.apply(None, vec![t]).unwrap();
    (store, dir)
}

fn write(store: &Store, cid: &CollectionId, oid: &ObjectId, offset: u64, data: &[u8]) {
    let mut t = Transaction::new();
    t.write(cid.clone(), oid.clone(), offset, data.to_vec());
    store.apply(None, vec![t]).unwrap();
}

fn names(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn kv(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn mkfs_is_idempotent_and_keeps_fsid() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let first = Store::mkfs(dir.path(), &config).unwrap();
    let second = Store::mkfs(dir.path(), &config).unwrap();
    assert_eq!(first, second);

    let store = Store::mount(dir.path(), config).unwrap();
    assert_eq!(store.fsid(), first);
    store.umount();
}

#[test]
fn mount_without_mkfs_fails() {
    let dir = TempDir::new().unwrap();
    assert!(Store::mount(dir.path(), test_config()).is_err());
}

#[test]
fn mount_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    Store::mkfs(dir.path(), &config).unwrap();
    let store = Store::mount(dir.path(), config.clone()).unwrap();

    assert!(Store::test_mount_in_use(dir.path()).unwrap());
    assert!(matches!(
        Store::mount(dir.path(), config.clone()),
        Err(StoreError::Locked)
    ));

    store.umount();
    assert!(!Store::test_mount_in_use(dir.path()).unwrap());
    let store = Store::mount(dir.path(), config).unwrap();
    store.umount();
}

#[test]
fn test_mount_in_use_without_store() {
    let dir = TempDir::new().unwrap();
    assert!(!Store::test_mount_in_use(dir.path()).unwrap());
}

#[test]
fn umount_drains_pending_batches() {
    let (store, _dir) = with_collection();
    let fired = Arc::new(AtomicUsize::new(0));
    for i in 0..20u64 {
        let mut t = Transaction::new();
        t.write(cid(), ObjectId::new(format!("o{i}")), 0, vec![b'x'; 4]);
        let fired = Arc::clone(&fired);
        store
            .queue_transactions(
                None,
                vec![t],
                Completions::new().ondisk(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }
    store.umount();
    assert_eq!(fired.load(Ordering::SeqCst), 20);
}

#[test]
fn max_object_name_length_is_positive() {
    let (store, _dir) = mounted();
    assert!(store.max_object_name_length().unwrap() > 0);
}

// ---------------------------------------------------------------------------
// Writes, reads, strips
// ---------------------------------------------------------------------------

#[test]
fn write_strips_and_pads() {
    // scenario: write(0, 10, "0123456789") with S = 8
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");

    assert_eq!(store.read(&cid(), &oid, 0, 10).unwrap(), b"0123456789");
    let stat = store.stat(&cid(), &oid).unwrap();
    assert_eq!(stat.size, 10);
    assert_eq!(stat.blocks, 2);
    assert_eq!(stat.block_size, S);

    let inner = store.inner();
    let header = inner.backend.lookup_strip_header(&cid(), &oid).unwrap().unwrap();
    assert_eq!(header.max_size, 10);
    assert_eq!(header.bits.len(), 2);
    assert!(header.bits.get(0) && header.bits.get(1));

    let wanted: BTreeSet<String> = [strip_object_key(0), strip_object_key(1)].into_iter().collect();
    let strips = inner
        .backend
        .generic()
        .get_values(&header.record, OBJECT_STRIP_PREFIX, &wanted)
        .unwrap();
    assert_eq!(strips[&strip_object_key(0)], b"01234567");
    assert_eq!(strips[&strip_object_key(1)], b"89\0\0\0\0\0\0");
}

#[test]
fn read_mid_range() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    assert_eq!(store.read(&cid(), &oid, 5, 3).unwrap(), b"567");
}

#[test]
fn read_len_zero_reads_to_eof() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"0123456789");
    assert_eq!(store.read(&cid(), &oid, 4, 0).unwrap(), b"456789");
}

#[test]
fn read_clamps_at_eof_and_rejects_past_eof() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    // clamped
    assert_eq!(store.read(&cid(), &oid, 8, 100).unwrap(), b"89");
    // at eof: empty
    assert_eq!(store.read(&cid(), &oid, 10, 1).unwrap(), b"");
    // past eof: error
    assert!(matches!(
        store.read(&cid(), &oid, 11, 1),
        Err(StoreError::InvalidArgument(_))
    ));
}

#[test]
fn sparse_strips_read_as_zeros() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 16, b"ZZ");

    let data = store.read(&cid(), &oid, 0, 18).unwrap();
    assert_eq!(&data[..16], &[0u8; 16]);
    assert_eq!(&data[16..], b"ZZ");

    let header = store.inner().backend.lookup_strip_header(&cid(), &oid).unwrap().unwrap();
    assert!(!header.bits.get(0));
    assert!(!header.bits.get(1));
    assert!(header.bits.get(2));
}

#[test]
fn disjoint_writes_do_not_interfere() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"AAAA");
    write(&store, &cid(), &oid, 20, b"BBBB");
    assert_eq!(store.read(&cid(), &oid, 0, 4).unwrap(), b"AAAA");
    assert_eq!(store.read(&cid(), &oid, 20, 4).unwrap(), b"BBBB");
}

#[test]
fn partial_overwrite_is_read_modify_write() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"01234567");
    write(&store, &cid(), &oid, 2, b"xy");
    assert_eq!(store.read(&cid(), &oid, 0, 8).unwrap(), b"01xy4567");
}

#[test]
fn zero_writes_zeros() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    let mut t = Transaction::new();
    t.zero(cid(), oid.clone(), 2, 4);
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.read(&cid(), &oid, 0, 10).unwrap(), b"01\0\0\0\06789");
}

#[test]
fn extent_map_tiles_range() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    let map = store.extent_map(&cid(), &oid, 5, 5).unwrap();
    // one partial at intra-offset 5, one trailing piece at offset 0
    assert_eq!(map.get(&5), Some(&3));
    assert_eq!(map.get(&0), Some(&2));
}

// ---------------------------------------------------------------------------
// Truncate
// ---------------------------------------------------------------------------

#[test]
fn truncate_shrinks_mid_strip() {
    // scenario: truncate(4) after write(0, 10, "0123456789")
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    let mut t = Transaction::new();
    t.truncate(cid(), oid.clone(), 4);
    store.apply(None, vec![t]).unwrap();

    let stat = store.stat(&cid(), &oid).unwrap();
    assert_eq!(stat.size, 4);
    // read clamps at the new end
    assert_eq!(store.read(&cid(), &oid, 0, 8).unwrap(), b"0123");

    let inner = store.inner();
    let header = inner.backend.lookup_strip_header(&cid(), &oid).unwrap().unwrap();
    assert_eq!(header.max_size, 4);
    assert_eq!(header.bits.len(), 1);
    assert!(header.bits.get(0));
    assert!(!header.bits.get(1));

    // the kept strip is zero-padded past the cut
    let wanted: BTreeSet<String> = [strip_object_key(0)].into_iter().collect();
    let strips = inner
        .backend
        .generic()
        .get_values(&header.record, OBJECT_STRIP_PREFIX, &wanted)
        .unwrap();
    assert_eq!(strips[&strip_object_key(0)], b"0123\0\0\0\0");

    // the truncated strip's key is gone
    let wanted: BTreeSet<String> = [strip_object_key(1)].into_iter().collect();
    let strips = inner
        .backend
        .generic()
        .get_values(&header.record, OBJECT_STRIP_PREFIX, &wanted)
        .unwrap();
    assert!(strips.is_empty());
}

#[test]
fn truncate_same_size_is_noop() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    let mut t = Transaction::new();
    t.truncate(cid(), oid.clone(), 10);
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"0123456789");
}

#[test]
fn truncate_grow_reads_zeros() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"abcd");
    let mut t = Transaction::new();
    t.truncate(cid(), oid.clone(), 12);
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.stat(&cid(), &oid).unwrap().size, 12);
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"abcd\0\0\0\0\0\0\0\0");
}

#[test]
fn write_after_truncate() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    let mut t = Transaction::new();
    t.truncate(cid(), oid.clone(), 4);
    store.apply(None, vec![t]).unwrap();
    write(&store, &cid(), &oid, 8, b"AB");
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"0123\0\0\0\0AB");
}

#[test]
fn truncate_aligned_cut() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789abcdef");
    let mut t = Transaction::new();
    t.truncate(cid(), oid.clone(), 8);
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"01234567");
    let header = store.inner().backend.lookup_strip_header(&cid(), &oid).unwrap().unwrap();
    assert!(header.bits.get(0));
    assert!(!header.bits.get(1));
}

// ---------------------------------------------------------------------------
// Remove / touch
// ---------------------------------------------------------------------------

#[test]
fn touch_creates_empty_object() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    let mut t = Transaction::new();
    t.touch(cid(), oid.clone());
    store.apply(None, vec![t]).unwrap();

    assert!(store.exists(&cid(), &oid).unwrap());
    assert_eq!(store.stat(&cid(), &oid).unwrap().size, 0);
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"");
}

#[test]
fn remove_deletes_object_and_data() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"0123456789");
    let mut t = Transaction::new();
    t.remove(cid(), oid.clone());
    store.apply(None, vec![t]).unwrap();

    assert!(!store.exists(&cid(), &oid).unwrap());
    assert!(matches!(store.read(&cid(), &oid, 0, 0), Err(StoreError::NotFound)));
}

#[test]
fn removed_object_stays_missing_for_the_rest_of_the_batch() {
    // a header marked deleted in the batch cache reads as missing, even
    // for creating lookups; the later write is a tolerated no-op
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"old");
    let mut t = Transaction::new();
    t.remove(cid(), oid.clone());
    t.write(cid(), oid.clone(), 0, b"new".to_vec());
    store.apply(None, vec![t]).unwrap();

    assert!(!store.exists(&cid(), &oid).unwrap());
    // the next batch recreates it normally
    write(&store, &cid(), &oid, 0, b"new");
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"new");
}

// ---------------------------------------------------------------------------
// Clone
// ---------------------------------------------------------------------------

#[test]
fn clone_then_write_origin_leaves_target_alone() {
    // scenario: clone(a, b); write(a, 0, 2, "XX") in one batch
    let (store, _dir) = with_collection();
    let a = ObjectId::new("a");
    let b = ObjectId::new("b");
    write(&store, &cid(), &a, 0, b"0123456789");

    let mut t = Transaction::new();
    t.clone_object(cid(), a.clone(), b.clone());
    t.write(cid(), a.clone(), 0, b"XX".to_vec());
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.read(&cid(), &b, 0, 10).unwrap(), b"0123456789");
    assert_eq!(store.read(&cid(), &a, 0, 10).unwrap(), b"XX23456789");
}

#[test]
fn clone_then_write_target() {
    let (store, _dir) = with_collection();
    let a = ObjectId::new("a");
    let b = ObjectId::new("b");
    write(&store, &cid(), &a, 0, b"0123456789");

    let mut t = Transaction::new();
    t.clone_object(cid(), a.clone(), b.clone());
    store.apply(None, vec![t]).unwrap();
    write(&store, &cid(), &b, 0, b"YY");

    assert_eq!(store.read(&cid(), &a, 0, 10).unwrap(), b"0123456789");
    assert_eq!(store.read(&cid(), &b, 0, 10).unwrap(), b"YY23456789");
}

#[test]
fn clone_to_itself_is_noop() {
    let (store, _dir) = with_collection();
    let a = ObjectId::new("a");
    write(&store, &cid(), &a, 0, b"data");
    let mut t = Transaction::new();
    t.clone_object(cid(), a.clone(), a.clone());
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.read(&cid(), &a, 0, 0).unwrap(), b"data");
}

#[test]
fn clone_of_missing_object_is_fatal_class() {
    // op-level: clone of a missing source reports NotFound (the
    // interpreter treats it as fatal, unlike other ops)
    let (store, _dir) = with_collection();
    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    let r = inner.op_clone(&cid(), &ObjectId::new("ghost"), &ObjectId::new("dst"), &mut bt);
    assert!(matches!(r, Err(StoreError::NotFound)));
}

#[test]
fn clone_range_copies_bytes() {
    let (store, _dir) = with_collection();
    let src = ObjectId::new("src");
    let dst = ObjectId::new("dst");
    write(&store, &cid(), &src, 0, b"0123456789");

    let mut t = Transaction::new();
    t.clone_range(cid(), src.clone(), dst.clone(), 2, 5, 1);
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.stat(&cid(), &dst).unwrap().size, 6);
    assert_eq!(store.read(&cid(), &dst, 0, 0).unwrap(), [0, b'2', b'3', b'4', b'5', b'6']);
}

#[test]
fn reads_within_batch_see_writes() {
    // scenario: batch [write(a, "AAA"), clone_range(a -> b)]
    let (store, _dir) = with_collection();
    let a = ObjectId::new("a");
    let b = ObjectId::new("b");

    let mut t = Transaction::new();
    t.write(cid(), a.clone(), 0, b"AAA".to_vec());
    t.clone_range(cid(), a.clone(), b.clone(), 0, 3, 0);
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.read(&cid(), &b, 0, 3).unwrap(), b"AAA");
}

// ---------------------------------------------------------------------------
// Replay idempotency
// ---------------------------------------------------------------------------

#[test]
fn replaying_a_batch_is_a_noop() {
    // scenario: apply the same batch at op_seq 5 twice
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    let mut t = Transaction::new();
    t.write(cid(), oid.clone(), 0, b"0123456789".to_vec());
    t.truncate(cid(), oid.clone(), 4);
    let batch = vec![t];

    let inner = store.inner();
    let handle = TpHandle::new();
    inner.do_transactions(&batch, 5, &handle);

    let first_read = store.read(&cid(), &oid, 0, 0).unwrap();
    let header = inner.backend.lookup_strip_header(&cid(), &oid).unwrap().unwrap();
    assert_eq!(first_read, b"0123");
    // stamped with the batch's last op position
    assert_eq!(header.spos, Some(SequencerPosition::new(5, 0, 1)));

    // replay: the spos gate turns every mutation into a no-op
    inner.do_transactions(&batch, 5, &handle);
    let header = inner.backend.lookup_strip_header(&cid(), &oid).unwrap().unwrap();
    assert_eq!(header.max_size, 4, "replayed write must not re-extend the object");
    assert_eq!(header.spos, Some(SequencerPosition::new(5, 0, 1)));
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), first_read);

    // a later batch applies normally
    let mut t = Transaction::new();
    t.write(cid(), oid.clone(), 0, b"Z".to_vec());
    inner.do_transactions(&[t], 6, &handle);
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"Z123");
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[test]
fn attr_roundtrip() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"x");

    let mut t = Transaction::new();
    t.setattr(cid(), oid.clone(), "owner", b"osd.1".to_vec());
    t.setattrs(cid(), oid.clone(), kv(&[("a", b"1"), ("b", b"2")]));
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.getattr(&cid(), &oid, "owner").unwrap(), b"osd.1");
    let attrs = store.getattrs(&cid(), &oid).unwrap();
    assert_eq!(attrs.len(), 3);
    assert_eq!(attrs["a"], b"1");

    let mut t = Transaction::new();
    t.rmattr(cid(), oid.clone(), "a");
    store.apply(None, vec![t]).unwrap();
    assert!(matches!(store.getattr(&cid(), &oid, "a"), Err(StoreError::NotFound)));
    assert_eq!(store.getattrs(&cid(), &oid).unwrap().len(), 2);

    let mut t = Transaction::new();
    t.rmattrs(cid(), oid.clone());
    store.apply(None, vec![t]).unwrap();
    assert!(store.getattrs(&cid(), &oid).unwrap().is_empty());
}

#[test]
fn collection_attr_roundtrip() {
    let (store, _dir) = with_collection();
    let mut t = Transaction::new();
    t.collection_setattr(cid(), "owner", b"osd.3".to_vec());
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.collection_getattr(&cid(), "owner").unwrap(), b"osd.3");
    assert_eq!(store.collection_getattrs(&cid()).unwrap().len(), 1);

    let mut t = Transaction::new();
    t.collection_rmattr(cid(), "owner");
    store.apply(None, vec![t]).unwrap();
    assert!(matches!(
        store.collection_getattr(&cid(), "owner"),
        Err(StoreError::NotFound)
    ));
}

// ---------------------------------------------------------------------------
// Omap
// ---------------------------------------------------------------------------

#[test]
fn omap_roundtrip() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"x");

    let mut t = Transaction::new();
    t.omap_setkeys(cid(), oid.clone(), kv(&[("a", b"1"), ("b", b"2"), ("c", b"3")]));
    t.omap_setheader(cid(), oid.clone(), b"HDR".to_vec());
    store.apply(None, vec![t]).unwrap();

    let (header, keys) = store.omap_get(&cid(), &oid).unwrap();
    assert_eq!(header.as_deref(), Some(b"HDR".as_slice()));
    assert_eq!(keys, kv(&[("a", b"1"), ("b", b"2"), ("c", b"3")]));
    assert_eq!(store.omap_get_keys(&cid(), &oid).unwrap(), names(&["a", "b", "c"]));
    assert_eq!(
        store.omap_check_keys(&cid(), &oid, &names(&["a", "zz"])).unwrap(),
        names(&["a"])
    );

    let mut t = Transaction::new();
    t.omap_rmkeys(cid(), oid.clone(), names(&["b"]));
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.omap_get_keys(&cid(), &oid).unwrap(), names(&["a", "c"]));
}

#[test]
fn omap_rmkeyrange_is_half_open() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"x");

    let mut t = Transaction::new();
    t.omap_setkeys(cid(), oid.clone(), kv(&[("a", b"1"), ("b", b"2"), ("c", b"3"), ("d", b"4")]));
    store.apply(None, vec![t]).unwrap();

    let mut t = Transaction::new();
    t.omap_rmkeyrange(cid(), oid.clone(), "b", "d");
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.omap_get_keys(&cid(), &oid).unwrap(), names(&["a", "d"]));
}

#[test]
fn omap_clear_drops_keys_and_header() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"x");

    let mut t = Transaction::new();
    t.omap_setkeys(cid(), oid.clone(), kv(&[("a", b"1")]));
    t.omap_setheader(cid(), oid.clone(), b"HDR".to_vec());
    store.apply(None, vec![t]).unwrap();

    let mut t = Transaction::new();
    t.omap_clear(cid(), oid.clone());
    store.apply(None, vec![t]).unwrap();

    let (header, keys) = store.omap_get(&cid(), &oid).unwrap();
    assert!(header.is_none());
    assert!(keys.is_empty());
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[test]
fn collection_lifecycle() {
    let (store, _dir) = mounted();
    assert!(!store.collection_exists(&cid()));

    let mut t = Transaction::new();
    t.create_collection(cid());
    store.apply(None, vec![t]).unwrap();

    assert!(store.collection_exists(&cid()));
    assert!(store.collection_empty(&cid()).unwrap());
    assert_eq!(store.list_collections().unwrap(), vec![cid()]);

    let mut t = Transaction::new();
    t.remove_collection(cid());
    store.apply(None, vec![t]).unwrap();
    assert!(!store.collection_exists(&cid()));
    assert!(store.list_collections().unwrap().is_empty());
}

#[test]
fn create_existing_collection_is_eexist() {
    let (store, _dir) = with_collection();
    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    assert!(matches!(
        inner.op_create_collection(&cid(), &mut bt),
        Err(StoreError::AlreadyExists)
    ));
}

#[test]
fn destroy_collection_with_object_is_not_empty() {
    // scenario: destroy_collection with one remaining object
    let (store, _dir) = with_collection();
    write(&store, &cid(), &ObjectId::new("o"), 0, b"x");

    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    assert!(matches!(
        inner.op_destroy_collection(&cid(), &mut bt),
        Err(StoreError::NotEmpty)
    ));
}

#[test]
fn destroy_collection_after_in_batch_removal() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"x");

    let mut t = Transaction::new();
    t.remove(cid(), oid);
    t.remove_collection(cid());
    store.apply(None, vec![t]).unwrap();
    assert!(!store.collection_exists(&cid()));
}

#[test]
fn write_into_missing_collection_is_tolerated() {
    let (store, _dir) = mounted();
    let mut t = Transaction::new();
    t.write(cid(), ObjectId::new("o"), 0, b"x".to_vec());
    // NotFound is tolerated by the interpreter; nothing is created
    store.apply(None, vec![t]).unwrap();
    assert!(!store.collection_exists(&cid()));
}

#[test]
fn collection_add_copies_object() {
    let (store, _dir) = with_collection();
    let other = CollectionId::new("d");
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"payload");
    let mut t = Transaction::new();
    t.create_collection(other.clone());
    t.collection_add(other.clone(), cid(), oid.clone());
    store.apply(None, vec![t]).unwrap();

    assert_eq!(store.read(&other, &oid, 0, 0).unwrap(), b"payload");
    // copy, not move
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"payload");

    // and the copies are independent
    write(&store, &other, &oid, 0, b"CHANGED");
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"payload");
}

#[test]
fn collection_add_to_existing_target_is_eexist() {
    let (store, _dir) = with_collection();
    let other = CollectionId::new("d");
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"x");
    let mut t = Transaction::new();
    t.create_collection(other.clone());
    store.apply(None, vec![t]).unwrap();
    write(&store, &other, &oid, 0, b"y");

    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    assert!(matches!(
        inner.op_collection_add(&other, &cid(), &oid, &mut bt),
        Err(StoreError::AlreadyExists)
    ));
}

#[test]
fn collection_move_rename_moves_object() {
    let (store, _dir) = with_collection();
    let other = CollectionId::new("d");
    let oid = ObjectId::new("o");
    let renamed = ObjectId::new("renamed");
    write(&store, &cid(), &oid, 0, b"payload");

    let mut t = Transaction::new();
    t.create_collection(other.clone());
    t.collection_move_rename(cid(), oid.clone(), other.clone(), renamed.clone());
    store.apply(None, vec![t]).unwrap();

    assert!(!store.exists(&cid(), &oid).unwrap());
    assert_eq!(store.read(&other, &renamed, 0, 0).unwrap(), b"payload");
}

#[test]
fn move_rename_onto_existing_target_is_eexist() {
    let (store, _dir) = with_collection();
    let a = ObjectId::new("a");
    let b = ObjectId::new("b");
    write(&store, &cid(), &a, 0, b"1");
    write(&store, &cid(), &b, 0, b"2");

    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    assert!(matches!(
        inner.op_collection_move_rename(&cid(), &a, &cid(), &b, &mut bt),
        Err(StoreError::AlreadyExists)
    ));
}

#[test]
fn collection_rename_is_unsupported() {
    let (store, _dir) = with_collection();
    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    let op = weft_types::TransactionOp::CollectionRename {
        cid: cid(),
        new_cid: CollectionId::new("renamed"),
    };
    assert!(matches!(inner.apply_op(&op, &mut bt), Err(StoreError::Unsupported)));
}

#[test]
fn collection_remove_recursive_drops_everything() {
    let (store, _dir) = with_collection();
    for i in 0..10 {
        write(&store, &cid(), &ObjectId::new(format!("o{i}")), 0, b"x");
    }

    let inner = store.inner();
    let mut bt = BufferTransaction::new(inner, SequencerPosition::new(99, 0, 0));
    inner.op_collection_remove_recursive(&cid(), &mut bt).unwrap();
    bt.submit().unwrap();

    assert!(!store.collection_exists(&cid()));
    assert!(store.list_collections().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[test]
fn collection_list_is_ordered_and_paginates() {
    let (store, _dir) = with_collection();
    let mut oids: Vec<ObjectId> = (0..10u32)
        .map(|i| ObjectId::with_hash(format!("o{i}"), i))
        .collect();
    oids.sort();
    for oid in &oids {
        write(&store, &cid(), oid, 0, b"x");
    }

    assert_eq!(store.collection_list(&cid()).unwrap(), oids);

    let (page, next) = store.collection_list_partial(&cid(), None, 4).unwrap();
    assert_eq!(page, oids[..4].to_vec());
    let next = next.unwrap();
    let (page2, _) = store.collection_list_partial(&cid(), Some(&next), 4).unwrap();
    assert_eq!(page2, oids[4..8].to_vec());

    let range = store.collection_list_range(&cid(), Some(&oids[2]), &oids[7]).unwrap();
    assert_eq!(range, oids[2..7].to_vec());
}

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

#[test]
fn split_collection_partitions_by_hash() {
    // scenario: 4 objects hashing 00, 01, 10, 11; split(bits=2, rem=1)
    let (store, _dir) = with_collection();
    let dst = CollectionId::new("d");
    let objs: Vec<ObjectId> = (0u32..4).map(|h| ObjectId::with_hash(format!("o{h}"), h)).collect();
    for oid in &objs {
        write(&store, &cid(), oid, 0, b"payload");
    }

    let mut t = Transaction::new();
    t.create_collection(dst.clone());
    t.split_collection(cid(), 2, 1, dst.clone());
    store.apply(None, vec![t]).unwrap();

    let remaining = store.collection_list(&cid()).unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().all(|oid| !oid.matches_split(2, 1)));

    let moved = store.collection_list(&dst).unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].hash, 1);
    assert_eq!(store.read(&dst, &moved[0], 0, 0).unwrap(), b"payload");
}

#[test]
fn split_into_missing_destination_is_noop() {
    let (store, _dir) = with_collection();
    write(&store, &cid(), &ObjectId::with_hash("o", 1), 0, b"x");

    let mut t = Transaction::new();
    t.split_collection(cid(), 1, 1, CollectionId::new("ghost"));
    store.apply(None, vec![t]).unwrap();
    assert_eq!(store.collection_list(&cid()).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Pipeline ordering and completions
// ---------------------------------------------------------------------------

#[test]
fn ops_on_one_sequencer_apply_in_submit_order() {
    let (store, _dir) = with_collection();
    let seq = Sequencer::new("ordered");
    let oid = ObjectId::new("o");
    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();

    let total = 32u64;
    for i in 0..total {
        let mut t = Transaction::new();
        t.write(cid(), oid.clone(), 0, i.to_le_bytes().to_vec());
        let order = Arc::clone(&order);
        let done_tx = done_tx.clone();
        store
            .queue_transactions(
                Some(&seq),
                vec![t],
                Completions::new().ondisk(move || {
                    order.lock().unwrap().push(i);
                    let _ = done_tx.send(());
                }),
            )
            .unwrap();
    }
    for _ in 0..total {
        done_rx.recv().unwrap();
    }

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..total).collect::<Vec<_>>());
    // the last write wins
    let data = store.read(&cid(), &oid, 0, 0).unwrap();
    assert_eq!(data, (total - 1).to_le_bytes().to_vec());
}

#[test]
fn independent_sequencers_make_progress() {
    let (store, _dir) = with_collection();
    let store = Arc::new(store);
    let mut joins = Vec::new();
    for s in 0..4 {
        let store = Arc::clone(&store);
        joins.push(std::thread::spawn(move || {
            let seq = Sequencer::new(format!("seq-{s}"));
            for i in 0..16 {
                let mut t = Transaction::new();
                t.write(cid(), ObjectId::new(format!("o-{s}-{i}")), 0, b"x".to_vec());
                store.apply(Some(&seq), vec![t]).unwrap();
            }
        }));
    }
    for join in joins {
        join.join().unwrap();
    }
    assert_eq!(store.collection_list(&cid()).unwrap().len(), 64);
}

#[test]
fn all_three_completions_fire() {
    let (store, _dir) = with_collection();
    let sync_fired = Arc::new(AtomicUsize::new(0));
    let (readable_tx, readable_rx) = mpsc::channel();
    let (ondisk_tx, ondisk_rx) = mpsc::channel();

    let mut t = Transaction::new();
    t.touch(cid(), ObjectId::new("o"));
    let sync_flag = Arc::clone(&sync_fired);
    store
        .queue_transactions(
            None,
            vec![t],
            Completions::new()
                .onreadable_sync(move || {
                    sync_flag.fetch_add(1, Ordering::SeqCst);
                })
                .onreadable(move || {
                    let _ = readable_tx.send(());
                })
                .ondisk(move || {
                    let _ = ondisk_tx.send(());
                }),
        )
        .unwrap();

    ondisk_rx.recv().unwrap();
    readable_rx.recv().unwrap();
    assert_eq!(sync_fired.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Debug error injection
// ---------------------------------------------------------------------------

#[test]
fn injected_data_error_fails_reads_only() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"data");

    store.inject_data_error(&oid);
    assert!(matches!(store.read(&cid(), &oid, 0, 0), Err(StoreError::Io(_))));
    // metadata reads still work
    assert_eq!(store.stat(&cid(), &oid).unwrap().size, 4);
}

#[test]
fn injected_mdata_error_fails_stat_and_attrs() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"data");

    store.inject_mdata_error(&oid);
    assert!(matches!(store.stat(&cid(), &oid), Err(StoreError::Io(_))));
    assert!(matches!(store.getattrs(&cid(), &oid), Err(StoreError::Io(_))));
    // data reads still work
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"data");
}

#[test]
fn removing_object_clears_injected_errors() {
    let (store, _dir) = with_collection();
    let oid = ObjectId::new("o");
    write(&store, &cid(), &oid, 0, b"data");
    store.inject_data_error(&oid);

    let mut t = Transaction::new();
    t.remove(cid(), oid.clone());
    store.apply(None, vec![t]).unwrap();

    write(&store, &cid(), &oid, 0, b"fresh");
    assert_eq!(store.read(&cid(), &oid, 0, 0).unwrap(), b"fresh");
}
