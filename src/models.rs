use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

/// Delivery strength advertised to the broker for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Qos {
    type Error = i64;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// A row of the `messages` outbox table.
///
/// Only `sent` ever changes after insert.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OutboxMessage {
    pub id: i64,
    pub topic: String,
    pub payload: String,
    pub qos: i64,
    pub sent: bool,
}

impl OutboxMessage {
    /// Stored QoS level, or the raw value if it is not one the broker knows.
    pub fn qos(&self) -> Result<Qos, i64> {
        Qos::try_from(self.qos)
    }
}

/// An unsent row of the upstream `weather_data` table.
///
/// Measurements keep the SQLite storage class they were written with.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub id: i64,
    pub timestamp: Value,
    pub temp: Value,
    pub humid: Value,
    pub wind: Value,
}

/// A row of the upstream `camera_status` table.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStatus {
    pub camera_name: String,
    pub last_seen: Value,
    pub sync_status: Value,
    pub camera_on: bool,
}

/// The observed fields of a camera compared between polls.
pub type CameraSnapshot = (Value, Value, bool);

impl CameraStatus {
    pub fn snapshot(&self) -> CameraSnapshot {
        (self.last_seen.clone(), self.sync_status.clone(), self.camera_on)
    }
}

#[derive(Debug, Serialize)]
pub struct WeatherPayload<'a> {
    pub timestamp: &'a Value,
    pub temp: &'a Value,
    pub humid: &'a Value,
    pub wind: &'a Value,
}

impl<'a> From<&'a WeatherReading> for WeatherPayload<'a> {
    fn from(reading: &'a WeatherReading) -> Self {
        WeatherPayload {
            timestamp: &reading.timestamp,
            temp: &reading.temp,
            humid: &reading.humid,
            wind: &reading.wind,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CameraStatusPayload<'a> {
    pub camera: &'a str,
    pub last_seen: &'a Value,
    pub sync_status: &'a Value,
    pub camera_on: bool,
}

impl<'a> From<&'a CameraStatus> for CameraStatusPayload<'a> {
    fn from(status: &'a CameraStatus) -> Self {
        CameraStatusPayload {
            camera: &status.camera_name,
            last_seen: &status.last_seen,
            sync_status: &status.sync_status,
            camera_on: status.camera_on,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProbePayload {
    pub status: &'static str,
    pub timestamp: i64,
}

impl ProbePayload {
    pub fn online_now() -> Self {
        ProbePayload {
            status: "online",
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}
