//! This module contains the audit-logging infrastructure.
//!
//! It includes the entry-id allocator, the `Logger` facade and the setup of the
//! operational stream (console and log file) that mirrors every audit entry.
pub mod ids;
pub mod logger;
pub mod subscriber;

pub use ids::IdAllocator;
pub use logger::{LogError, Logger, AUDIT_TARGET};
pub use subscriber::init_subscriber;
