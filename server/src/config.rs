use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use crate::ws::{HubConfig, Keepalive, OverflowPolicy};

/// Command-line overrides. Only flags that were actually given end up in
/// the merged config, so a TOML value is never masked by a clap default.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "racer-server", version, about = "Racer telemetry broadcast server")]
pub struct Cli {
    /// Port to listen on [default: 1234]
    #[arg(long, env = "RACER_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: localhost]
    #[arg(long, env = "RACER_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Route prefix the telemetry service is mounted under [default: v1]
    #[arg(long, env = "RACER_PREFIX")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./racer.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RACER_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,
}

/// Fully merged server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub prefix: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,

    /// Broadcast hub tuning (loaded from [hub] section in TOML)
    #[serde(default)]
    pub hub: HubSettings,
}

/// Hub limits and timings as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSettings {
    /// Maximum concurrent connections, 0 for unbounded (default: 0)
    #[serde(default)]
    pub max_connections: usize,

    /// Outbound queue capacity per subscriber (default: 256)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Time allowed to read the next pong from a client (default: 10000)
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,

    /// Ping period; defaults to 9/10 of `pong_wait_ms` when unset
    #[serde(default)]
    pub ping_interval_ms: Option<u64>,

    /// Time allowed to write one frame to a client (default: 10000)
    #[serde(default = "default_write_wait_ms")]
    pub write_wait_ms: u64,

    /// One publish token is added every this many milliseconds (default: 100)
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Maximum publish tokens held at once (default: 8)
    #[serde(default = "default_publish_burst")]
    pub publish_burst: u32,

    /// What to do with a subscriber whose queue is full: "evict" or "drop"
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_connections: 0,
            queue_capacity: default_queue_capacity(),
            pong_wait_ms: default_pong_wait_ms(),
            ping_interval_ms: None,
            write_wait_ms: default_write_wait_ms(),
            publish_interval_ms: default_publish_interval_ms(),
            publish_burst: default_publish_burst(),
            overflow_policy: OverflowPolicy::Evict,
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_pong_wait_ms() -> u64 {
    10_000
}

fn default_write_wait_ms() -> u64 {
    10_000
}

fn default_publish_interval_ms() -> u64 {
    100
}

fn default_publish_burst() -> u32 {
    8
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    #[error("invalid [hub] setting `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Load(_) => "config_load",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

impl HubSettings {
    /// Check the settings and convert them to the hub's runtime form.
    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be greater than 0"));
        }
        if self.pong_wait_ms == 0 {
            return Err(invalid("pong_wait_ms", "must be greater than 0"));
        }
        if self.write_wait_ms == 0 {
            return Err(invalid("write_wait_ms", "must be greater than 0"));
        }
        if self.publish_interval_ms == 0 {
            return Err(invalid("publish_interval_ms", "must be greater than 0"));
        }
        let publish_burst = NonZeroU32::new(self.publish_burst)
            .ok_or_else(|| invalid("publish_burst", "must be greater than 0"))?;

        let mut keepalive = Keepalive::new(
            Duration::from_millis(self.pong_wait_ms),
            Duration::from_millis(self.write_wait_ms),
        );
        if let Some(ping_ms) = self.ping_interval_ms {
            if ping_ms == 0 || ping_ms >= self.pong_wait_ms {
                return Err(invalid("ping_interval_ms", "must be between 1 and pong_wait_ms"));
            }
            keepalive = keepalive.with_ping_interval(Duration::from_millis(ping_ms));
        }

        Ok(HubConfig {
            max_connections: self.max_connections,
            queue_capacity: self.queue_capacity,
            keepalive,
            publish_interval: Duration::from_millis(self.publish_interval_ms),
            publish_burst,
            overflow_policy: self.overflow_policy,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1234,
            bind_address: "localhost".to_string(),
            prefix: "v1".to_string(),
            config: "./racer.toml".to_string(),
            json_logs: false,
            generate_config: false,
            hub: HubSettings::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RACER_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        let config_path = cli.config.clone();

        Self::figment(cli, &config_path)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    fn figment(cli: Cli, config_path: &str) -> Figment {
        // `RACER_HUB__QUEUE_CAPACITY` reaches `hub.queue_capacity`.
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("RACER_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Racer Telemetry Server Configuration
# Place this file at ./racer.toml or specify with --config <path>
# All settings can be overridden via environment variables (RACER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 1234)
# port = 1234

# Bind address (default: localhost)
# bind_address = "localhost"

# Route prefix; the socket is served at /<prefix>/telemetry/ws (default: v1)
# prefix = "v1"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Broadcast Hub ----
# [hub]
# Environment overrides use a double underscore: RACER_HUB__MAX_CONNECTIONS=100

# Maximum concurrent WebSocket connections (0 = unbounded)
# max_connections = 0

# Outbound queue capacity per subscriber. A subscriber whose queue is full
# is treated as stalled (see overflow_policy).
# queue_capacity = 256

# Time allowed to read the next pong from a client, in milliseconds
# pong_wait_ms = 10000

# Ping period in milliseconds; must be below pong_wait_ms (default: 9/10 of it)
# ping_interval_ms = 9000

# Time allowed to write one frame to a client, in milliseconds
# write_wait_ms = 10000

# Global publish rate limit: one message every publish_interval_ms,
# with bursts of up to publish_burst messages
# publish_interval_ms = 100
# publish_burst = 8

# "evict" disconnects a stalled subscriber, "drop" skips the message for it
# overflow_policy = "evict"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_hub_config() {
        let hub = HubSettings::default().to_hub_config().unwrap();
        assert_eq!(hub.max_connections, 0);
        assert_eq!(hub.queue_capacity, 256);
        assert_eq!(hub.keepalive.pong_wait, Duration::from_secs(10));
        assert_eq!(hub.keepalive.ping_interval, Duration::from_secs(9));
        assert_eq!(hub.publish_interval, Duration::from_millis(100));
        assert_eq!(hub.publish_burst.get(), 8);
        assert_eq!(hub.overflow_policy, OverflowPolicy::Evict);
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let settings = HubSettings {
            queue_capacity: 0,
            ..HubSettings::default()
        };
        let err = settings.to_hub_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "queue_capacity", .. }));
    }

    #[test]
    fn rejects_ping_not_shorter_than_pong_wait() {
        let settings = HubSettings {
            pong_wait_ms: 1000,
            ping_interval_ms: Some(1000),
            ..HubSettings::default()
        };
        let err = settings.to_hub_config().unwrap_err();
        assert_eq!(err.as_label(), "config_invalid");
    }

    #[test]
    fn toml_hub_section_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "racer.toml",
                r#"
                port = 4000

                [hub]
                max_connections = 2
                queue_capacity = 1
                overflow_policy = "drop"
                "#,
            )?;

            let config: Config = Config::figment(Cli::default(), "racer.toml").extract()?;
            assert_eq!(config.port, 4000);
            assert_eq!(config.prefix, "v1");
            assert_eq!(config.hub.max_connections, 2);
            assert_eq!(config.hub.queue_capacity, 1);
            assert_eq!(config.hub.overflow_policy, OverflowPolicy::Drop);
            assert_eq!(config.hub.pong_wait_ms, 10_000);
            Ok(())
        });
    }

    #[test]
    fn env_and_cli_layer_over_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("racer.toml", "port = 4000\nprefix = \"api\"\n[hub]\nqueue_capacity = 4\n")?;
            jail.set_env("RACER_HUB__QUEUE_CAPACITY", "16");
            jail.set_env("RACER_PREFIX", "v2");

            let cli = Cli {
                port: Some(5000),
                ..Cli::default()
            };
            let config: Config = Config::figment(cli, "racer.toml").extract()?;
            assert_eq!(config.port, 5000);
            assert_eq!(config.prefix, "v2");
            assert_eq!(config.hub.queue_capacity, 16);
            Ok(())
        });
    }

    #[test]
    fn template_mentions_every_hub_setting() {
        let template = generate_config_template();
        for key in [
            "max_connections",
            "queue_capacity",
            "pong_wait_ms",
            "ping_interval_ms",
            "write_wait_ms",
            "publish_interval_ms",
            "publish_burst",
            "overflow_policy",
        ] {
            assert!(template.contains(key), "template is missing {key}");
        }
    }
}
