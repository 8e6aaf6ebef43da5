//! peerstashd: a peer in a multicast backup population.
//!
//! Peers announce file chunks on a data group, confirm and coordinate on a
//! control group, and return chunks on a recovery group or over a direct
//! TCP path. [`node::PeerNode`] ties the protocol handlers to a
//! [`transport::Transport`].

pub mod context;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod protocol;
pub mod state;
pub mod transport;

pub use error::OperationError;
pub use node::{NodeOptions, PeerNode};
