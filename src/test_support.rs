use std::collections::HashSet;
use std::sync::Mutex;

use crate::messaging::{PublishError, Publisher};
use crate::models::Qos;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub type Published = (String, String, Qos);

/// Publisher fake that records accepted publishes and every attempt.
#[derive(Default)]
pub struct RecordingPublisher {
    reject_all: bool,
    rejected_topics: HashSet<String>,
    attempts: Mutex<Vec<Published>>,
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn rejecting_topic(topic: &str) -> Self {
        Self {
            rejected_topics: HashSet::from([topic.to_string()]),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<Published> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str, qos: Qos) -> Result<(), PublishError> {
        let message = (topic.to_string(), payload.to_string(), qos);
        self.attempts.lock().unwrap().push(message.clone());

        if self.reject_all || self.rejected_topics.contains(topic) {
            return Err(PublishError("rejected by test broker".into()));
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

pub async fn create_source_tables(pool: &SqlitePool) {
    sqlx::raw_sql(
        r#"
        CREATE TABLE weather_data (
            id INTEGER PRIMARY KEY,
            timestamp,
            temp REAL,
            humid INTEGER,
            wind INTEGER,
            sent INTEGER DEFAULT 0
        );
        CREATE TABLE camera_status (
            camera_name TEXT PRIMARY KEY,
            last_seen INTEGER,
            sync_status TEXT,
            camera_on INTEGER
        );
        "#,
    )
        .execute(pool)
        .await
        .expect("Failed to create source tables");
}

pub async fn insert_weather(pool: &SqlitePool, id: i64, timestamp: i64, temp: f64, humid: i64, wind: i64) {
    sqlx::query("INSERT INTO weather_data (id, timestamp, temp, humid, wind, sent) VALUES (?, ?, ?, ?, ?, 0)")
        .bind(id)
        .bind(timestamp)
        .bind(temp)
        .bind(humid)
        .bind(wind)
        .execute(pool)
        .await
        .expect("Failed to insert weather row");
}

pub async fn insert_camera(pool: &SqlitePool, name: &str, last_seen: i64, sync_status: &str, camera_on: bool) {
    sqlx::query(
        r#"
        INSERT INTO camera_status (camera_name, last_seen, sync_status, camera_on)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (camera_name) DO UPDATE SET
            last_seen = excluded.last_seen,
            sync_status = excluded.sync_status,
            camera_on = excluded.camera_on
        "#,
    )
        .bind(name)
        .bind(last_seen)
        .bind(sync_status)
        .bind(camera_on as i64)
        .execute(pool)
        .await
        .expect("Failed to upsert camera row");
}

pub async fn weather_sent_flag(pool: &SqlitePool, id: i64) -> i64 {
    sqlx::query_scalar("SELECT sent FROM weather_data WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("Failed to read weather row")
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Minimal MQTT 3.1.1 broker on a local port for one client session.
///
/// It accepts the CONNECT, answers pings, and sends PUBACK for QoS 1
/// publishes only when `acknowledge` is set. Returns the port and a receiver
/// of every PUBLISH topic it saw.
pub async fn spawn_test_broker(acknowledge: bool) -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind test broker");
    let port = listener.local_addr().expect("Test broker has no address").port();
    let (seen, received) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        while let Ok((header, body)) = read_packet(&mut stream).await {
            let reply: Option<Vec<u8>> = match header >> 4 {
                1 => Some(vec![0x20, 0x02, 0x00, 0x00]),
                3 => {
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let _ = seen.send(String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned());
                    let qos = (header >> 1) & 0x03;
                    (acknowledge && qos == 1)
                        .then(|| vec![0x40, 0x02, body[2 + topic_len], body[3 + topic_len]])
                }
                12 => Some(vec![0xD0, 0x00]),
                _ => None,
            };
            if let Some(reply) = reply {
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    });

    (port, received)
}
