//! Hashloan devnet node.
//!
//! Runs a loan book and an in-memory Bitcoin chain side by side, mirrors
//! book events into RocksDB, and lets participants register presigned
//! spends that complete as soon as the secret they wait on is revealed.

pub mod config;
pub mod mirror;
pub mod node;
pub mod storage;
pub mod watcher;

pub use config::HashloanConfig;
pub use mirror::EventMirror;
pub use node::HashloanNode;
pub use storage::Storage;
pub use watcher::SpendWatcher;
