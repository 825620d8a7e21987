//! Compiled binary caches produced by device runs
//!
//! Each run on a device leaves a key/value container of compiled programs.
//! Containers from several devices are merged into one artifact that ships
//! with the build.
//!
//! # Merge rules
//!
//! | Key | Seen again in a later source |
//! |-----|------------------------------|
//! | platform info key | must be byte-identical, else the merge fails |
//! | any other key | later source wins |
//!
//! Missing sources are skipped. Corrupt sources fail the merge and nothing
//! is written.

pub mod container;
pub mod cursor;
pub mod merge;

pub use container::{read_container, write_container, CacheRecords};
pub use cursor::{ByteCursor, CursorError};
pub use merge::{binary_sources, CacheMerger, MergeSummary};
