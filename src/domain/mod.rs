//! Domain models - gates, scores and dispatch records
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - gate ids, signal snapshots, score vectors, history samples
//! - `dispatch` - the dispatch state machine record
//! - `error` - submission rejections and configuration errors

pub mod dispatch;
pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use dispatch::{DispatchRecord, DispatchState};
pub use error::{ConfigError, PredictError};
pub use types::{Gate, GateSet, HistorySample, ScoreVector, SignalBundle, SignalSnapshot, UserId};
