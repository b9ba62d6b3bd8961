//! approvald library
//!
//! Hosts the approval engine as a standalone process:
//! - Layered configuration (defaults, file, environment)
//! - Definition and directory loading at startup
//! - Notification transports
//! - Escalation, dispatch and callback workers with graceful shutdown

pub mod config;
pub mod error;
pub mod loader;
pub mod service;

pub use config::{DaemonConfig, DataConfig, LoggingConfig, TransportConfig};
pub use error::{DaemonError, DaemonResult};
pub use loader::{load_definitions, load_directory};
pub use service::{LogCompletionHandler, Service};
