//! CloudSift - cost-optimization scanner for unused cloud resources.
//!
//! The engine enumerates resources across accounts and regions, applies
//! per-class unused policies, prices the findings through a persistent
//! price cache, and aggregates everything into a single report.
//!
//! This library exposes the scan engine so it can be embedded; the
//! `cloudsift` binary wraps it with a CLI.

pub mod aws;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod pricing;
pub mod ratelimit;
pub mod report;
pub mod scanners;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{Dispatcher, ScanOutcome, ScanRequest};
pub use error::{Result, SiftError};
pub use types::*;

/// Initialize CloudSift's tracing/logging subsystem.
pub fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("cloudsift={}", log_level.to_lowercase()))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
