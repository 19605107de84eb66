//! Read access to the upstream tables the relay watches.
//!
//! These tables belong to the data producers. The relay only reads them,
//! except for flipping `weather_data.sent` once a reading has been queued.

use crate::models::{CameraStatus, WeatherReading};
use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool, TypeInfo, ValueRef};

/// Reads a column as JSON, keeping the storage class SQLite holds for it.
fn json_column(row: &SqliteRow, column: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(column)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_owned();

    match storage.as_str() {
        "INTEGER" => Ok(Value::from(row.try_get::<i64, _>(column)?)),
        "REAL" => {
            let real: f64 = row.try_get(column)?;
            Number::from_f64(real)
                .map(Value::Number)
                .ok_or_else(|| sqlx::Error::ColumnDecode {
                    index: column.to_owned(),
                    source: format!("non-finite value {real}").into(),
                })
        }
        "TEXT" => Ok(Value::String(row.try_get(column)?)),
        other => Err(sqlx::Error::ColumnDecode {
            index: column.to_owned(),
            source: format!("unsupported storage class {other}").into(),
        }),
    }
}

impl<'r> FromRow<'r, SqliteRow> for WeatherReading {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(WeatherReading {
            id: row.try_get("id")?,
            timestamp: json_column(row, "timestamp")?,
            temp: json_column(row, "temp")?,
            humid: json_column(row, "humid")?,
            wind: json_column(row, "wind")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for CameraStatus {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let camera_on: Option<i64> = row.try_get("camera_on")?;
        Ok(CameraStatus {
            camera_name: row.try_get("camera_name")?,
            last_seen: json_column(row, "last_seen")?,
            sync_status: json_column(row, "sync_status")?,
            camera_on: camera_on.unwrap_or(0) != 0,
        })
    }
}

/// The `weather_data` table, polled by its own `sent` flag.
#[derive(Debug, Clone)]
pub struct WeatherSource {
    pool: SqlitePool,
}

impl WeatherSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetches readings not yet handed to the outbox, oldest first.
    pub async fn unsent_readings(&self) -> Result<Vec<WeatherReading>, sqlx::Error> {
        sqlx::query_as::<_, WeatherReading>(
            r#"
            SELECT id, timestamp, temp, humid, wind
            FROM weather_data
            WHERE sent = 0
            ORDER BY id
            "#,
        )
            .fetch_all(&self.pool)
            .await
    }

    pub async fn mark_sent(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE weather_data SET sent = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// The `camera_status` table. It has no sent flag and is diffed in full.
#[derive(Debug, Clone)]
pub struct CameraStatusSource {
    pool: SqlitePool,
}

impl CameraStatusSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn statuses(&self) -> Result<Vec<CameraStatus>, sqlx::Error> {
        sqlx::query_as::<_, CameraStatus>(
            r#"
            SELECT camera_name, last_seen, sync_status, camera_on
            FROM camera_status
            "#,
        )
            .fetch_all(&self.pool)
            .await
    }
}
