use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub unit_name: String,
    pub database_url: String,
    pub weather_database_url: Option<String>,
    pub camera_database_url: Option<String>,

    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_ca_cert: Option<String>,
    pub mqtt_client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub mqtt_keep_alive_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_resend_interval")]
    pub resend_interval_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_publish_timeout() -> u64 {
    5000
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_resend_interval() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    10_000
}

fn default_startup_grace() -> u64 {
    2000
}

fn default_health_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Builds and validates a config from `(NAME, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars)?;

        if config.unit_name.trim().is_empty() {
            return Err(envy::Error::Custom("UNIT_NAME must not be empty".into()));
        }
        if config.database_url.trim().is_empty() {
            return Err(envy::Error::Custom("DATABASE_URL must not be empty".into()));
        }

        Ok(config)
    }

    /// Returns the outbox database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn weather_database_url(&self) -> &str {
        self.weather_database_url
            .as_deref()
            .unwrap_or_else(|| self.database_url())
    }

    pub fn camera_database_url(&self) -> &str {
        self.camera_database_url
            .as_deref()
            .unwrap_or_else(|| self.database_url())
    }

    pub fn client_id(&self) -> String {
        self.mqtt_client_id
            .clone()
            .unwrap_or_else(|| format!("{}-relay-{}", self.unit_name, uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
pub(crate) fn test_vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut vars = vec![
        ("UNIT_NAME".to_string(), "unit1".to_string()),
        ("DATABASE_URL".to_string(), "sqlite::memory:".to_string()),
        ("MQTT_HOST".to_string(), "localhost".to_string()),
    ];
    for (key, value) in pairs {
        vars.retain(|(k, _)| k != key);
        vars.push((key.to_string(), value.to_string()));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = Config::from_vars(test_vars(&[])).expect("config should load");

        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.resend_interval_ms, 1000);
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.startup_grace_ms, 2000);
        assert_eq!(config.health_port, 8080);
        assert_eq!(config.weather_database_url(), "sqlite::memory:");
        assert_eq!(config.camera_database_url(), "sqlite::memory:");
    }

    #[test]
    fn source_urls_override_the_outbox_url() {
        let config = Config::from_vars(test_vars(&[
            ("WEATHER_DATABASE_URL", "sqlite://weather.db"),
            ("CAMERA_DATABASE_URL", "sqlite://heartbeat.db"),
        ]))
        .unwrap();

        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.weather_database_url(), "sqlite://weather.db");
        assert_eq!(config.camera_database_url(), "sqlite://heartbeat.db");
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let vars: Vec<_> = test_vars(&[])
            .into_iter()
            .filter(|(k, _)| k != "DATABASE_URL")
            .collect();

        let err = Config::from_vars(vars).unwrap_err();
        assert!(matches!(err, envy::Error::MissingValue("database_url")));
    }

    #[test]
    fn blank_database_url_is_rejected() {
        assert!(Config::from_vars(test_vars(&[("DATABASE_URL", "")])).is_err());
    }

    #[test]
    fn blank_unit_name_is_rejected() {
        assert!(Config::from_vars(test_vars(&[("UNIT_NAME", "  ")])).is_err());
    }

    #[test]
    fn explicit_client_id_wins() {
        let config = Config::from_vars(test_vars(&[("MQTT_CLIENT_ID", "relay-a")])).unwrap();
        assert_eq!(config.client_id(), "relay-a");

        let generated = Config::from_vars(test_vars(&[])).unwrap().client_id();
        assert!(generated.starts_with("unit1-relay-"));
    }
}
