//! Internal key encodings.
//!
//! The backend key space is partitioned into five namespaces, each introduced
//! by a one-byte tag plus a NUL:
//!
//! - `M` — mapping: `(collection, object) → HeaderRecord`
//! - `P` — parents: `seq → HeaderRecord` for shared clone-on-write ancestors
//! - `D` — data: `(seq, prefix, key) → value`
//! - `T` — tombstones: `(seq, prefix, key) → ()`, masking ancestor entries
//! - `S` — store-global state (the seq allocator)
//!
//! Collection and object encodings are order-preserving: a range scan over a
//! collection's mapping namespace walks objects in `ObjectId` order. Names
//! are NUL-terminated, which is why NUL is banned from them.

use weft_types::{CollectionId, ObjectId};

const MAPPING_TAG: &[u8] = b"M\x00";
const PARENT_TAG: &[u8] = b"P\x00";
const DATA_TAG: &[u8] = b"D\x00";
const TOMB_TAG: &[u8] = b"T\x00";

/// Key holding the next header sequence number to allocate.
pub const NEXT_SEQ_KEY: &[u8] = b"S\x00next_seq";

fn push_cid(buf: &mut Vec<u8>, cid: &CollectionId) {
    buf.extend_from_slice(cid.as_str().as_bytes());
    buf.push(0);
}

fn push_oid(buf: &mut Vec<u8>, oid: &ObjectId) {
    buf.extend_from_slice(&oid.hash.to_be_bytes());
    buf.extend_from_slice(oid.name.as_bytes());
    buf.push(0);
    buf.extend_from_slice(oid.key.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&oid.snap.to_be_bytes());
    buf.extend_from_slice(&oid.generation.to_be_bytes());
    buf.extend_from_slice(&oid.shard.to_be_bytes());
}

/// Mapping key for one `(collection, object)` pair.
pub fn mapping_key(cid: &CollectionId, oid: &ObjectId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAPPING_TAG.len() + 64);
    buf.extend_from_slice(MAPPING_TAG);
    push_cid(&mut buf, cid);
    push_oid(&mut buf, oid);
    buf
}

/// Prefix covering every mapping key of one collection.
pub fn mapping_prefix(cid: &CollectionId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAPPING_TAG.len() + 32);
    buf.extend_from_slice(MAPPING_TAG);
    push_cid(&mut buf, cid);
    buf
}

/// Parent record key for a shared clone-on-write ancestor.
pub fn parent_key(seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PARENT_TAG.len() + 8);
    buf.extend_from_slice(PARENT_TAG);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf
}

fn ns_key(tag: &[u8], seq: u64, prefix: &str, key: &str) -> Vec<u8> {
    let mut buf = ns_prefix(tag, seq, prefix);
    buf.extend_from_slice(key.as_bytes());
    buf
}

fn ns_prefix(tag: &[u8], seq: u64, prefix: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tag.len() + 10 + prefix.len());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&(prefix.len() as u16).to_be_bytes());
    buf.extend_from_slice(prefix.as_bytes());
    buf
}

fn seq_prefix(tag: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tag.len() + 8);
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf
}

/// Data key for `(seq, prefix, key)`.
pub fn data_key(seq: u64, prefix: &str, key: &str) -> Vec<u8> {
    ns_key(DATA_TAG, seq, prefix, key)
}

/// Prefix covering every data key of `(seq, prefix)`.
pub fn data_prefix(seq: u64, prefix: &str) -> Vec<u8> {
    ns_prefix(DATA_TAG, seq, prefix)
}

/// Prefix covering every data key of `seq`, all prefixes.
pub fn seq_data_prefix(seq: u64) -> Vec<u8> {
    seq_prefix(DATA_TAG, seq)
}

/// Tombstone key for `(seq, prefix, key)`.
pub fn tomb_key(seq: u64, prefix: &str, key: &str) -> Vec<u8> {
    ns_key(TOMB_TAG, seq, prefix, key)
}

/// Prefix covering every tombstone of `(seq, prefix)`.
pub fn tomb_prefix(seq: u64, prefix: &str) -> Vec<u8> {
    ns_prefix(TOMB_TAG, seq, prefix)
}

/// Prefix covering every tombstone of `seq`.
pub fn seq_tomb_prefix(seq: u64) -> Vec<u8> {
    seq_prefix(TOMB_TAG, seq)
}

/// Smallest key strictly greater than every key starting with `prefix`,
/// or `None` when no such key exists (all-0xFF prefix).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_keys_order_matches_object_id_order() {
        let cid = CollectionId::new("c");
        let mut oids = vec![
            ObjectId::with_hash("b", 1),
            ObjectId::with_hash("a", 2),
            ObjectId::with_hash("a", 1),
            ObjectId::with_hash("aa", 1),
        ];
        oids.sort();
        let keys: Vec<_> = oids.iter().map(|o| mapping_key(&cid, o)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn mapping_prefix_covers_collection_only() {
        let key = mapping_key(&CollectionId::new("c"), &ObjectId::new("o"));
        assert!(key.starts_with(&mapping_prefix(&CollectionId::new("c"))));
        assert!(!key.starts_with(&mapping_prefix(&CollectionId::new("cc"))));
    }

    #[test]
    fn data_keys_for_same_prefix_order_by_key() {
        let a = data_key(7, "__OBJOMAP__", "aaa");
        let b = data_key(7, "__OBJOMAP__", "aab");
        assert!(a < b);
        assert!(a.starts_with(&data_prefix(7, "__OBJOMAP__")));
    }

    #[test]
    fn data_keys_for_different_prefixes_do_not_collide() {
        // Without the length prefix these two would alias.
        let a = data_key(7, "_A", "Bk");
        let b = data_key(7, "_AB", "k");
        assert_ne!(a, b);
    }

    #[test]
    fn seq_prefix_separates_headers() {
        assert!(!data_key(7, "p", "k").starts_with(&seq_data_prefix(8)));
        assert!(data_key(8, "p", "k").starts_with(&seq_data_prefix(8)));
    }

    #[test]
    fn prefix_end_is_tight() {
        let end = prefix_end(b"abc").unwrap();
        assert_eq!(end, b"abd");
        assert!(b"abc".to_vec() < end);
        assert!(b"abcz".to_vec() < end);
        assert!(b"abd".to_vec() >= end);
    }

    #[test]
    fn prefix_end_carries_past_0xff() {
        let end = prefix_end(&[0x61, 0xFF]).unwrap();
        assert_eq!(end, vec![0x62]);
        assert!(prefix_end(&[0xFF, 0xFF]).is_none());
    }
}
