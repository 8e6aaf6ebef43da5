//! CLI command modules.

pub mod http;
pub mod ops;
pub mod state;
