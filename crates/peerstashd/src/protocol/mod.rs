//! The replication protocols. Each operation returns promptly; long work
//! runs on spawned tasks.

pub mod backup;
pub mod delete;
pub mod reclaim;
pub mod restore;
pub mod retry;
