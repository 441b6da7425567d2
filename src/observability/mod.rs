//! Observability for the replication layer
//!
//! - Structured logging through `tracing`, one event per line
//! - Typed lifecycle event names
//! - Monotonic counters
//!
//! Observability is read-only: nothing here feeds back into replication
//! decisions.
//!
//! # Usage
//!
//! ```ignore
//! use aerocluster::observability::{init_logging, Event};
//!
//! init_logging(true);
//! tracing::info!(event = %Event::Synced, "ready for connections");
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{init_logging, ProviderLogBridge, ProviderLogLevel};
pub use metrics::{MetricsSnapshot, ReplicationMetrics};
