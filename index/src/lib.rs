// Disk-backed B-tree index from fixed-length keys to i32 record offsets.
//
// Layers, bottom up:
//  - PageStore: a file (or memory) that grows one 16KB page at a time
//  - Page: sorted slots plus pending insert/delete buffers, compacted lazily
//  - PageCache: LRU of live pages with write-back eviction
//  - PageDirectory: page minimum -> page, for routing and range walks
//  - FreeList: emptied pages waiting for reuse
//  - Index: routing, splits, merges and page allocation on top of the above
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod buffer_pool;
pub mod cache;
pub mod config;
pub mod directory;
pub mod entry;
pub mod file;
pub mod free_list;
pub mod index;
pub mod io;
pub mod key;
pub mod memory;
pub mod page;


pub use config::{ConfigError, IndexOptions};
pub use entry::Entry;
pub use file::FileStore;
pub use index::{Index, IndexError};
pub use io::{PageStore, StorageError};
pub use key::{CompoundKey, FixedLengthKey, FixedString};
pub use memory::{FaultConfig, MemoryStore};
