//! # shard-common
//!
//! Shared utilities for the gateway client: configuration and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AdmissionConfig, AppSettings, BulkRequestConfig, ClosePolicyConfig, ConfigError,
    Environment, GatewayConfig, GatewaySettings, RateLimitConfig, ReconnectConfig,
    ShardingConfig, TimeoutConfig,
};
pub use telemetry::{
    init_tracing, try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError,
};
