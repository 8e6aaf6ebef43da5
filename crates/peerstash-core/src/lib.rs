//! peerstash-core: identifiers, wire format, chunking and configuration.
//! All other peerstash crates depend on this one.

pub mod chunking;
pub mod config;
pub mod ids;
pub mod wire;

pub use ids::{ChunkKey, FileId, PeerId};
pub use wire::{Group, Message, MessageKind, MessageType, Version, WireError};
