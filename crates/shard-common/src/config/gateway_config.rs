//! Gateway client configuration
//!
//! Loads configuration from environment variables, falling back to defaults that
//! match the platform's published limits.

use serde::Deserialize;
use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Main gateway client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub app: AppSettings,
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub sharding: ShardingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub bulk: BulkRequestConfig,
    #[serde(default)]
    pub close_policy: ClosePolicyConfig,
    /// Dispatch event names that are never forwarded to the dispatcher
    #[serde(default)]
    pub disabled_events: Vec<String>,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_env(),
        }
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            other => Err(ConfigError::InvalidValue("APP_ENV", other.to_string())),
        }
    }
}

/// Remote gateway endpoint and identify metadata
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub url: String,
    pub token: String,
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl GatewaySettings {
    /// Settings for a URL and token with every other field defaulted
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            version: default_version(),
            compress: false,
            large_threshold: default_large_threshold(),
            client_name: default_client_name(),
        }
    }
}

/// Which shards this process runs
#[derive(Debug, Clone, Deserialize)]
pub struct ShardingConfig {
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    #[serde(default)]
    pub first_shard: u32,
    /// Defaults to `shard_count - 1`
    #[serde(default)]
    pub last_shard: Option<u32>,
}

impl ShardingConfig {
    /// Shard ids owned by this process
    #[must_use]
    pub fn shard_ids(&self) -> RangeInclusive<u32> {
        let last = self
            .last_shard
            .unwrap_or_else(|| self.shard_count.saturating_sub(1));
        self.first_shard..=last
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            first_shard: 0,
            last_shard: None,
        }
    }
}

/// Handshake timeouts (milliseconds)
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// How long a shard may wait for HELLO after the transport opened
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// How long a shard waits for unavailable guilds after READY
    #[serde(default = "default_guild_create_timeout")]
    pub guild_create_timeout_ms: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub fn guild_create_timeout(&self) -> Duration {
        Duration::from_millis(self.guild_create_timeout_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout(),
            guild_create_timeout_ms: default_guild_create_timeout(),
        }
    }
}

/// Pool admission gate (milliseconds)
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Minimum spacing between two identify starts
    #[serde(default = "default_admission_interval")]
    pub interval_ms: u64,
    /// Added to the admission time to cover the handshake itself
    #[serde(default = "default_admission_margin")]
    pub margin_ms: u64,
}

impl AdmissionConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn margin(&self) -> Duration {
        Duration::from_millis(self.margin_ms)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_admission_interval(),
            margin_ms: default_admission_margin(),
        }
    }
}

/// Reconnect backoff policy
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub autoreconnect: bool,
    #[serde(default = "default_reconnect_initial")]
    pub initial_ms: u64,
    #[serde(default = "default_reconnect_max")]
    pub max_ms: u64,
    /// Growth factor applied to the interval after every reconnect decision
    #[serde(default = "default_reconnect_multiplier")]
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            autoreconnect: true,
            initial_ms: default_reconnect_initial(),
            max_ms: default_reconnect_max(),
            multiplier: default_reconnect_multiplier(),
        }
    }
}

/// Outbound token buckets
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_capacity")]
    pub global_capacity: u32,
    #[serde(default = "default_rate_window")]
    pub global_window_ms: u64,
    #[serde(default = "default_presence_capacity")]
    pub presence_capacity: u32,
    #[serde(default = "default_rate_window")]
    pub presence_window_ms: u64,
}

impl RateLimitConfig {
    #[must_use]
    pub fn global_window(&self) -> Duration {
        Duration::from_millis(self.global_window_ms)
    }

    #[must_use]
    pub fn presence_window(&self) -> Duration {
        Duration::from_millis(self.presence_window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_capacity: default_global_capacity(),
            global_window_ms: default_rate_window(),
            presence_capacity: default_presence_capacity(),
            presence_window_ms: default_rate_window(),
        }
    }
}

/// Bulk guild-sync and member-chunk requests
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequestConfig {
    /// Request the full member list of every guild that arrives incomplete
    #[serde(default)]
    pub request_all_members: bool,
    /// Members the gateway sends per GUILD_MEMBERS_CHUNK
    #[serde(default = "default_members_per_chunk")]
    pub members_per_chunk: u64,
    /// Byte budget for the id array of one SYNC_GUILD frame
    #[serde(default = "default_guild_sync_budget")]
    pub guild_sync_budget: usize,
    /// Byte budget for the id array of one REQUEST_GUILD_MEMBERS frame
    #[serde(default = "default_member_chunk_budget")]
    pub member_chunk_budget: usize,
}

impl Default for BulkRequestConfig {
    fn default() -> Self {
        Self {
            request_all_members: false,
            members_per_chunk: default_members_per_chunk(),
            guild_sync_budget: default_guild_sync_budget(),
            member_chunk_budget: default_member_chunk_budget(),
        }
    }
}

/// Close-code classification table
#[derive(Debug, Clone, Deserialize)]
pub struct ClosePolicyConfig {
    /// Codes after which the shard never reconnects on its own
    #[serde(default = "default_fatal_codes")]
    pub fatal_codes: Vec<u16>,
    /// Codes that drop the session id and force a fresh identify
    #[serde(default = "default_session_invalidating_codes")]
    pub session_invalidating_codes: Vec<u16>,
    /// Codes that reset the sequence to 0 and force a fresh identify
    #[serde(default = "default_sequence_reset_codes")]
    pub sequence_reset_codes: Vec<u16>,
}

impl Default for ClosePolicyConfig {
    fn default() -> Self {
        Self {
            fatal_codes: default_fatal_codes(),
            session_invalidating_codes: default_session_invalidating_codes(),
            sequence_reset_codes: default_sequence_reset_codes(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "shard-gateway".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_version() -> u8 {
    6
}

fn default_large_threshold() -> u32 {
    250
}

fn default_client_name() -> String {
    "shard-gateway".to_string()
}

fn default_shard_count() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30_000
}

fn default_guild_create_timeout() -> u64 {
    2_000
}

fn default_admission_interval() -> u64 {
    5_000
}

fn default_admission_margin() -> u64 {
    2_500
}

fn default_true() -> bool {
    true
}

fn default_reconnect_initial() -> u64 {
    1_000
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_reconnect_multiplier() -> f64 {
    2.0
}

fn default_global_capacity() -> u32 {
    120
}

fn default_presence_capacity() -> u32 {
    5
}

fn default_rate_window() -> u64 {
    60_000
}

fn default_members_per_chunk() -> u64 {
    1_000
}

// 4096 - r#"{"op":12,"d":}"#.len() - 1
fn default_guild_sync_budget() -> usize {
    4_081
}

// 4096 - r#"{"op":8,"d":{"guild_id":,"query":"","limit":0}}"#.len() - 1
fn default_member_chunk_budget() -> usize {
    4_048
}

fn default_fatal_codes() -> Vec<u16> {
    vec![4004, 4010, 4011]
}

fn default_session_invalidating_codes() -> Vec<u16> {
    vec![4006, 4009]
}

fn default_sequence_reset_codes() -> Vec<u16> {
    vec![4007]
}

impl GatewayConfig {
    /// Configuration for a URL and token with every other section defaulted
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            app: AppSettings::default(),
            gateway: GatewaySettings::new(url, token),
            sharding: ShardingConfig::default(),
            timeouts: TimeoutConfig::default(),
            admission: AdmissionConfig::default(),
            reconnect: ReconnectConfig::default(),
            rate_limit: RateLimitConfig::default(),
            bulk: BulkRequestConfig::default(),
            close_policy: ClosePolicyConfig::default(),
            disabled_events: Vec::new(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let config = Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: vars.parse("APP_ENV")?.unwrap_or_default(),
            },
            gateway: GatewaySettings {
                url: vars.required("GATEWAY_URL")?,
                token: vars.required("GATEWAY_TOKEN")?,
                version: vars.parse("GATEWAY_VERSION")?.unwrap_or_else(default_version),
                compress: vars.parse("GATEWAY_COMPRESS")?.unwrap_or(false),
                large_threshold: vars
                    .parse("GATEWAY_LARGE_THRESHOLD")?
                    .unwrap_or_else(default_large_threshold),
                client_name: lookup("GATEWAY_CLIENT_NAME").unwrap_or_else(default_client_name),
            },
            sharding: ShardingConfig {
                shard_count: vars.parse("SHARD_COUNT")?.unwrap_or_else(default_shard_count),
                first_shard: vars.parse("FIRST_SHARD")?.unwrap_or(0),
                last_shard: vars.parse("LAST_SHARD")?,
            },
            timeouts: TimeoutConfig {
                connection_timeout_ms: vars
                    .parse("CONNECTION_TIMEOUT_MS")?
                    .unwrap_or_else(default_connection_timeout),
                guild_create_timeout_ms: vars
                    .parse("GUILD_CREATE_TIMEOUT_MS")?
                    .unwrap_or_else(default_guild_create_timeout),
            },
            admission: AdmissionConfig {
                interval_ms: vars
                    .parse("ADMISSION_INTERVAL_MS")?
                    .unwrap_or_else(default_admission_interval),
                margin_ms: vars
                    .parse("ADMISSION_MARGIN_MS")?
                    .unwrap_or_else(default_admission_margin),
            },
            reconnect: ReconnectConfig {
                autoreconnect: vars.parse("AUTORECONNECT")?.unwrap_or(true),
                initial_ms: vars
                    .parse("RECONNECT_INITIAL_MS")?
                    .unwrap_or_else(default_reconnect_initial),
                max_ms: vars
                    .parse("RECONNECT_MAX_MS")?
                    .unwrap_or_else(default_reconnect_max),
                multiplier: vars
                    .parse("RECONNECT_MULTIPLIER")?
                    .unwrap_or_else(default_reconnect_multiplier),
            },
            rate_limit: RateLimitConfig {
                global_capacity: vars
                    .parse("GLOBAL_RATE_LIMIT")?
                    .unwrap_or_else(default_global_capacity),
                global_window_ms: vars
                    .parse("GLOBAL_RATE_WINDOW_MS")?
                    .unwrap_or_else(default_rate_window),
                presence_capacity: vars
                    .parse("PRESENCE_RATE_LIMIT")?
                    .unwrap_or_else(default_presence_capacity),
                presence_window_ms: vars
                    .parse("PRESENCE_RATE_WINDOW_MS")?
                    .unwrap_or_else(default_rate_window),
            },
            bulk: BulkRequestConfig {
                request_all_members: vars.parse("REQUEST_ALL_MEMBERS")?.unwrap_or(false),
                ..BulkRequestConfig::default()
            },
            close_policy: ClosePolicyConfig {
                fatal_codes: vars
                    .list("CLOSE_FATAL_CODES")?
                    .unwrap_or_else(default_fatal_codes),
                session_invalidating_codes: vars
                    .list("CLOSE_SESSION_INVALIDATING_CODES")?
                    .unwrap_or_else(default_session_invalidating_codes),
                sequence_reset_codes: vars
                    .list("CLOSE_SEQUENCE_RESET_CODES")?
                    .unwrap_or_else(default_sequence_reset_codes),
            },
            disabled_events: vars.list("DISABLED_EVENTS")?.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sharding = &self.sharding;
        if sharding.shard_count == 0 {
            return Err(ConfigError::InvalidValue("SHARD_COUNT", "0".to_string()));
        }
        let ids = sharding.shard_ids();
        if ids.is_empty() || *ids.end() >= sharding.shard_count {
            return Err(ConfigError::InvalidValue(
                "LAST_SHARD",
                format!("{}..={} with {} shards", ids.start(), ids.end(), sharding.shard_count),
            ));
        }
        if self.rate_limit.global_capacity == 0 || self.rate_limit.presence_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "GLOBAL_RATE_LIMIT",
                "rate limit capacity must be positive".to_string(),
            ));
        }
        if self.reconnect.multiplier < 1.0 || self.reconnect.initial_ms > self.reconnect.max_ms {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_MULTIPLIER",
                format!(
                    "multiplier {} with interval {}..{}",
                    self.reconnect.multiplier, self.reconnect.initial_ms, self.reconnect.max_ms
                ),
            ));
        }
        Ok(())
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        (self.0)(key).ok_or(ConfigError::MissingVar(key))
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        (self.0)(key)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key, raw.clone()))
            })
            .transpose()
    }

    fn list<T: FromStr>(&self, key: &'static str) -> Result<Option<Vec<T>>, ConfigError> {
        (self.0)(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| {
                        item.parse()
                            .map_err(|_| ConfigError::InvalidValue(key, item.to_string()))
                    })
                    .collect()
            })
            .transpose()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_environment_is_production() {
        assert!(!Environment::Development.is_production());
        assert!(!Environment::Staging.is_production());
        assert!(Environment::Production.is_production());
        assert!(Environment::Development.is_development());
    }

    #[test]
    fn test_defaults_from_minimal_env() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_URL", "wss://gateway.example/?v=6&encoding=json"),
            ("GATEWAY_TOKEN", "Bot abc"),
        ]))
        .unwrap();

        assert_eq!(config.app.name, "shard-gateway");
        assert_eq!(config.gateway.version, 6);
        assert_eq!(config.sharding.shard_ids(), 0..=0);
        assert_eq!(config.admission.interval(), Duration::from_millis(5_000));
        assert_eq!(config.reconnect.initial_ms, 1_000);
        assert_eq!(config.reconnect.max_ms, 30_000);
        assert_eq!(config.rate_limit.global_capacity, 120);
        assert_eq!(config.rate_limit.presence_capacity, 5);
        assert_eq!(config.bulk.guild_sync_budget, 4_081);
        assert_eq!(config.bulk.member_chunk_budget, 4_048);
        assert_eq!(config.close_policy.fatal_codes, vec![4004, 4010, 4011]);
        assert!(config.disabled_events.is_empty());
    }

    #[test]
    fn test_missing_token() {
        let err = GatewayConfig::from_lookup(lookup(&[("GATEWAY_URL", "wss://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("GATEWAY_TOKEN")));
    }

    #[test]
    fn test_overrides_and_lists() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_URL", "wss://x"),
            ("GATEWAY_TOKEN", "t"),
            ("APP_ENV", "production"),
            ("SHARD_COUNT", "8"),
            ("FIRST_SHARD", "4"),
            ("DISABLED_EVENTS", "TYPING_START, PRESENCE_UPDATE"),
            ("CLOSE_FATAL_CODES", "4004,4014"),
        ]))
        .unwrap();

        assert!(config.app.env.is_production());
        assert_eq!(config.sharding.shard_ids(), 4..=7);
        assert_eq!(config.disabled_events, vec!["TYPING_START", "PRESENCE_UPDATE"]);
        assert_eq!(config.close_policy.fatal_codes, vec![4004, 4014]);
    }

    #[test]
    fn test_invalid_values() {
        let err = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_URL", "wss://x"),
            ("GATEWAY_TOKEN", "t"),
            ("SHARD_COUNT", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("SHARD_COUNT", _)));

        let err = GatewayConfig::from_lookup(lookup(&[
            ("GATEWAY_URL", "wss://x"),
            ("GATEWAY_TOKEN", "t"),
            ("SHARD_COUNT", "2"),
            ("LAST_SHARD", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("LAST_SHARD", _)));
    }

    #[test]
    fn test_new_is_valid() {
        let config = GatewayConfig::new("wss://x", "t");
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.connection_timeout(), Duration::from_secs(30));
        assert_eq!(config.timeouts.guild_create_timeout(), Duration::from_secs(2));
    }
}
