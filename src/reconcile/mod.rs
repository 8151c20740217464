// Account snapshot reconciliation
pub mod lease;
pub mod reconciler;
pub mod taxonomy;

pub use reconciler::{ReconcilerConfig, SnapshotReconciler};
