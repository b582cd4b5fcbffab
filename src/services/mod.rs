//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `fusion` - Sensor inputs to per-gate signal snapshots
//! - `scorer` - Weighted per-gate confidence
//! - `history` - Bounded per-user sample history
//! - `engine` - Dispatch decision state machine
//! - `session` - Per-user session store
//! - `predictor` - Submission pipeline tying the above together

pub mod engine;
pub mod fusion;
pub mod history;
pub mod predictor;
pub mod scorer;
pub mod session;

// Re-export commonly used types
pub use engine::{DispatchDecisionEngine, EngineConfig, Outcome};
pub use fusion::{DirectFusion, SensorInputs, SignalFusionSource, SimulatedFusion};
pub use history::HistoryTracker;
pub use predictor::{GatePredictor, Prediction};
pub use scorer::{GateScorer, ScoreWeights};
pub use session::{SessionSnapshot, SessionStore};
