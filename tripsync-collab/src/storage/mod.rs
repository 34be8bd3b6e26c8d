//! Store implementations behind the `tripsync-core` store traits.
//!
//! ```text
//! ┌──────────────┐   find / create / update   ┌───────────────┐
//! │ CollabServer │ ─────────────────────────► │ MemoryStore   │  tests,
//! │              │                            │ (HashMap)     │  no-disk
//! │              │                            ├───────────────┤
//! │              │                            │ RocksStore    │  durable
//! └──────────────┘                            │ CF documents  │
//!                                             │ CF projects   │
//!                                             │ CF users      │
//!                                             └───────────────┘
//! ```
//!
//! The server picks one at startup: a storage path in the config selects
//! RocksDB, otherwise everything lives in memory.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};
