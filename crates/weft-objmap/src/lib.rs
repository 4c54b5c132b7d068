//! Object maps layered on an ordered key/value backend.
//!
//! Two layers live here:
//!
//! - [`GenericObjectMap`] maps `(collection, object)` to a header record and
//!   gives each header namespaced key subtrees inside the backend, with
//!   clone-on-write sharing between cloned headers.
//! - [`StripObjectMap`] adds the striped view: an object's byte stream is
//!   decomposed into fixed-size strips stored as individual backend values,
//!   with presence and size tracked in a [`StripObjectHeader`].
//!
//! Mutations are staged into a [`MapTransaction`] and applied atomically by
//! [`GenericObjectMap::submit`].

pub mod bitmap;
pub mod error;
pub mod generic;
pub mod keys;
pub mod striped;

pub use bitmap::Bitmap;
pub use error::{MapError, MapResult};
pub use generic::{GenericObjectMap, HeaderRecord, MapTransaction};
pub use striped::{
    check_spos, file_to_extents, strip_object_key, StripExtent, StripObjectHeader, StripObjectMap,
    COLLECTION_ATTR, OBJECT_OMAP, OBJECT_OMAP_HEADER, OBJECT_OMAP_HEADER_KEY, OBJECT_STRIP_PREFIX,
    OBJECT_XATTR,
};
