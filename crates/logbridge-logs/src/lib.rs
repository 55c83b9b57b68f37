//! Log retrieval for logbridge
//!
//! This crate runs the external command pipelines used for tailing, turns their
//! output into envelopes, and answers queries against the log store.

mod error;
mod pipeline;
mod pump;
mod rotated;
mod store;
mod tail;

pub use error::{PipelineError, StoreError, TailError};
pub use pipeline::{CommandSpec, PipelineState, ProcessPipeline, Termination, TerminationPolicy};
pub use pump::{PumpExit, extract_payload, spawn_pump};
pub use rotated::RotatedLogs;
pub use store::{DEFAULT_LIMIT, EXPORT_LIMIT, LogQueryService, LogStore};
pub use tail::{TailConfig, TailPlan, TailSession};
