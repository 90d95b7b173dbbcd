#![forbid(unsafe_code)]
//! On-disk metadata structures for ext2-style filesystem images.

mod ext2;

pub use ext2::{GroupDesc, Superblock};
