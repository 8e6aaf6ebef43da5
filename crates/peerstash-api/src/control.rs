use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::report::StateReport;

pub type ControlFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// What the control plane can ask of a running peer. Every operation answers
/// with a short status line; success means the protocol was started.
pub trait PeerControl: Send + Sync + 'static {
    fn backup(&self, path: PathBuf, replication_degree: u8) -> ControlFuture<'_, String>;
    fn restore(&self, path: PathBuf) -> ControlFuture<'_, String>;
    fn delete(&self, path: PathBuf) -> ControlFuture<'_, String>;
    fn reclaim(&self) -> ControlFuture<'_, String>;
    fn set_capacity(&self, bytes: u64) -> ControlFuture<'_, String>;
    fn state(&self) -> StateReport;
}
