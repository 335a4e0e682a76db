//! httpwall Telemetry
//!
//! Metrics and audit trail functionality for httpwall.
//!
//! Provides:
//! - A hash-chained audit trail of policy aborts
//! - Lock-free counters over chain runs

pub mod audit;
pub mod metrics;

pub use audit::{AuditEvent, AuditTrail};
pub use metrics::{MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditTrail};
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
}
