//! Agency classification and synchronization for AgentSync.
//!
//! Ties the store operations together into one batch run:
//! registry bootstrap → detection → reconciliation → flag propagation
//! (see [`pipeline::SyncPipeline`]).

pub mod detector;
pub mod pipeline;
pub mod propagator;
pub mod registry;

pub use detector::AgencyDetector;
pub use pipeline::{ProgressReporter, RunReport, SilentProgress, SyncPipeline};
pub use propagator::SyncPropagator;
pub use registry::{AgentRegistry, registry_schema};
