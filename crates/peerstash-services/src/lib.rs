//! peerstash-services: local state shared by the protocol engine.
//!
//! Everything here is synchronous and cheap to clone (`Arc` inside), so the
//! daemon can hand copies to every receive loop and spawned handler.

pub mod chunk_store;
pub mod jsonl;
pub mod ledger;
pub mod metadata;
pub mod restore_state;
pub mod suppress;

pub use chunk_store::ChunkStore;
pub use ledger::{BackupCatalog, CatalogEntry, DeletedLedger};
pub use metadata::{ChunkMetadata, MetadataIndex};
pub use restore_state::{AnsweredChunks, RestoreAccumulator};
pub use suppress::{IgnoreList, PutchunkWatch};
