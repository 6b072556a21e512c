//! Job state, reconciliation and control
//!
//! The store is the single merged view of every download the service knows
//! about, fed by the reconciliation loop from two kinds of sources: the
//! external engine daemon and the in-process handlers. Handler-owned jobs
//! are namespaced with a `handler:` id prefix so control requests can be
//! routed back to the owning side.

pub mod control;
pub mod reconcile;
pub mod store;

pub use control::{ControlError, ControlOutcome, Coordinator, SubmitReceipt};
pub use reconcile::Reconciler;
pub use store::{CompletedRecord, JobRecord, JobStore, StoreStats};

/// Namespace prefix for handler-owned job ids. Engine GIDs never collide
/// with it: aria2 GIDs are bare hex.
pub const HANDLER_ID_PREFIX: &str = "handler:";

/// Compose the externally visible id for a handler-local job id.
pub fn handler_job_id(local_id: &str) -> String {
    format!("{HANDLER_ID_PREFIX}{local_id}")
}

/// Strip the handler namespace, yielding the handler-local id.
/// Returns None for engine-side ids.
pub fn handler_local_id(id: &str) -> Option<&str> {
    id.strip_prefix(HANDLER_ID_PREFIX)
}
