//! Tick-keyed snapshot persistence

pub mod snapshots;

pub use snapshots::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreError};
