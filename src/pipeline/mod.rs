//! The polling pipeline.
//!
//! - `engine`: the fetch → extract → dedupe → emit cycle and its schedule
//! - `dedup`: bounded memory of emitted record identities
//! - `backoff`: delay selection after clean and failed cycles

pub mod backoff;
pub mod dedup;
pub mod engine;

pub use backoff::{BackoffPolicy, CycleKind, Delay};
pub use dedup::DedupMemory;
pub use engine::{CycleOutcome, CycleReport, EngineStatus, PollingEngine};
