//! Configuration structs

mod gateway_config;

pub use gateway_config::{
    AdmissionConfig, AppSettings, BulkRequestConfig, ClosePolicyConfig, ConfigError,
    Environment, GatewayConfig, GatewaySettings, RateLimitConfig, ReconnectConfig,
    ShardingConfig, TimeoutConfig,
};
