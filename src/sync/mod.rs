//! Local-to-remote sync
//!
//! The local store is authoritative. Rows are pushed up with an idempotency
//! key so a retried write collapses into the row already accepted remotely.

pub mod reconciler;
pub mod remote;

pub use reconciler::{Reconciler, ReconcilerHandle, SyncReport};
pub use remote::{RemoteStore, RestRemoteStore};
