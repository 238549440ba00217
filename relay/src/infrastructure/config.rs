//! Layered configuration: defaults, optional file, `RELAY__*` environment
//! variables, then the conventional `PORT` variable.

use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 8080;
const CONFIG_FILE: &str = "config/relay";
const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelaySettings {
    pub send_queue_capacity: usize,
    pub send_timeout_ms: u64,
    /// Zero disables pings.
    pub heartbeat_interval_secs: u64,
    pub max_message_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            max_message_bytes: 16 << 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json_logs: bool,
    pub log_dir: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub sampling_ratio: f64,
    pub metrics_addr: Option<String>,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Loads settings using `vars` in place of the process environment.
    pub fn from_vars(vars: Map<String, String>) -> Result<Self, ConfigError> {
        let relay = RelaySettings::default();
        let port_override = vars.get("PORT").cloned();

        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", i64::from(DEFAULT_PORT))?
            .set_default("relay.send_queue_capacity", relay.send_queue_capacity as u64)?
            .set_default("relay.send_timeout_ms", relay.send_timeout_ms)?
            .set_default("relay.heartbeat_interval_secs", relay.heartbeat_interval_secs)?
            .set_default("relay.max_message_bytes", relay.max_message_bytes as u64)?
            .set_default("telemetry.log_level", "info")?
            .set_default("telemetry.json_logs", false)?
            .set_default("telemetry.sampling_ratio", 1.0)?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars)),
            )
            .set_override_option("server.port", port_override)?
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let settings = Settings::from_vars(vars(&[])).unwrap();
        assert_eq!(settings.server.port, DEFAULT_PORT);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.relay, RelaySettings::default());
        assert_eq!(settings.telemetry.log_level, "info");
        assert!(!settings.telemetry.json_logs);
        assert!(settings.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn port_variable_sets_listen_port() {
        let settings = Settings::from_vars(vars(&[("PORT", "9001")])).unwrap();
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.bind_address(), "0.0.0.0:9001");
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let settings = Settings::from_vars(vars(&[
            ("RELAY__SERVER__HOST", "127.0.0.1"),
            ("RELAY__SERVER__PORT", "7000"),
            ("RELAY__RELAY__SEND_QUEUE_CAPACITY", "8"),
            ("RELAY__TELEMETRY__JSON_LOGS", "true"),
        ]))
        .unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.relay.send_queue_capacity, 8);
        assert!(settings.telemetry.json_logs);
    }

    #[test]
    fn port_variable_wins_over_prefixed_port() {
        let settings =
            Settings::from_vars(vars(&[("RELAY__SERVER__PORT", "7000"), ("PORT", "7001")]))
                .unwrap();
        assert_eq!(settings.server.port, 7001);
    }

    #[test]
    fn malformed_port_is_an_error() {
        assert!(Settings::from_vars(vars(&[("PORT", "not-a-port")])).is_err());
    }
}
