//! Copy-on-write byte buffers with pluggable storage-origin policies.
//!
//! A [`Buffer`] is a thin handle onto a shared, reference counted storage
//! cell. Cloning a handle shares the cell; mutating operations either work
//! in place (exclusive ownership with sufficient headroom) or split off a
//! private copy first. The storage behind a buffer is described by a
//! [`StorageManager`]: heap cells own their memory, while borrowed and
//! static cells alias caller memory and never free it.
//!
//! Handles and iterators are confined to a single thread of control: the
//! share counter is plain bounded arithmetic, not atomic, which the types
//! enforce by being neither `Send` nor `Sync`. Transfer data across
//! threads with a deep copy ([`Buffer::try_to_owned`]).

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[doc = include_str!("../README.md")]
#[cfg(doctest)]
struct _ReadmeDoctests;

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc as alloc_crate;

pub mod alloc;

pub mod capacity;

pub(crate) mod error;

pub mod manager;

mod buffer;

mod cell;

mod iter;

mod represent;

pub use self::buffer::Buffer;
pub use self::error::{BufferError, ErrorKind, Frame};
pub use self::iter::BufIter;
pub use self::manager::{StorageManager, StoragePolicy, HEAP, STACK, STATIC};
pub use self::represent::Repr;

#[cfg(feature = "zeroize")]
pub use self::manager::HEAP_ZEROIZING;
