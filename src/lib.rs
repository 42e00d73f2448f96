//! # Leadflow
//!
//! Lead distribution core: round-robin assignment of new opportunities to the
//! members of a sales pipeline, an append-only assignment history, and an SLA
//! monitor that redistributes leads nobody contacted in time.

pub mod config;
pub mod db;
pub mod distribution;
pub mod error;
pub mod models;
pub mod repositories;
pub mod sla_monitor;
pub mod telemetry;
pub use migration;
