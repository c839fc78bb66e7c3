//! Readiness and telemetry probes.

pub mod gpu;
mod health;

pub use health::{HealthCheck, is_healthy};
