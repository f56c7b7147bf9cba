//! facegate-engine — the registration and verification pipeline.
//!
//! Owns all inference state on a dedicated thread and exposes an async
//! [`EngineHandle`] for callers.

pub mod config;
pub mod engine;

pub use config::Config;
pub use engine::{
    spawn_engine, AttendanceEvent, EngineError, EngineHandle, HealthReport, RegisterOutcome,
    VerifyOutcome,
};
