use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::RelayError;
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Creates and returns a new SQLite connection pool.
///
/// WAL mode plus a busy timeout lets the resend loop and the pollers share one
/// database file without tripping over each other's writes.
pub async fn setup_db_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Builds the broker connection options from configuration.
pub fn setup_mqtt_options(config: &Config) -> Result<MqttOptions, RelayError> {
    let mut options = MqttOptions::new(config.client_id(), config.mqtt_host.clone(), config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs));

    match (&config.mqtt_username, &config.mqtt_password) {
        (Some(username), Some(password)) => {
            options.set_credentials(username.clone(), password.clone());
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(RelayError::PublisherSetup(
                "MQTT_USERNAME and MQTT_PASSWORD must be set together".into(),
            ));
        }
        (None, None) => {}
    }

    if let Some(ca_path) = &config.mqtt_ca_cert {
        let ca = std::fs::read(ca_path).map_err(|e| {
            RelayError::PublisherSetup(format!("failed to read CA certificate {ca_path}: {e}"))
        })?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
    }

    Ok(options)
}
