use std::time::Duration;

use crate::error::RelayError;
use crate::messaging::Topics;
use crate::models::{CameraSnapshot, CameraStatusPayload, Qos, WeatherPayload};
use crate::outbox::OutboxStore;
use crate::snapshot::SnapshotCache;
use crate::sources::{CameraStatusSource, WeatherSource};
use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, Span};

/// A periodic task that turns upstream state into outbox messages.
#[async_trait]
pub trait Poller: Send {
    fn name(&self) -> &'static str;

    /// Runs one poll cycle and returns how many messages were enqueued.
    async fn poll_once(&mut self) -> Result<usize, RelayError>;
}

/// Polls forever. A failed cycle is logged and the next tick retries.
pub async fn run_poller<P: Poller>(mut poller: P, every: Duration) {
    info!(poller = poller.name(), interval_ms = every.as_millis() as u64, "Starting poller...");
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match poller.poll_once().await {
            Ok(0) => debug!(poller = poller.name(), "No changes found."),
            Ok(enqueued) => info!(poller = poller.name(), enqueued, "Enqueued changes."),
            Err(e) => error!(poller = poller.name(), "Poll cycle failed: {}", e),
        }
    }
}

/// Relays every unsent `weather_data` row, then flags the row as sent.
///
/// The source flag follows the enqueue, not the broker ack. A crash in
/// between re-queues the reading after restart.
pub struct WeatherPoller {
    source: WeatherSource,
    outbox: OutboxStore,
    topics: Topics,
}

impl WeatherPoller {
    pub fn new(source: WeatherSource, outbox: OutboxStore, topics: Topics) -> Self {
        Self { source, outbox, topics }
    }
}

#[async_trait]
impl Poller for WeatherPoller {
    fn name(&self) -> &'static str {
        "weather"
    }

    #[instrument(skip_all, fields(enqueued = 0))]
    async fn poll_once(&mut self) -> Result<usize, RelayError> {
        let readings = self
            .source
            .unsent_readings()
            .await
            .map_err(RelayError::from_source)?;

        let topic = self.topics.weather();
        let mut enqueued = 0;
        for reading in &readings {
            let payload = serde_json::to_string(&WeatherPayload::from(reading))?;
            let id = self
                .outbox
                .enqueue(&topic, &payload, Qos::AtLeastOnce)
                .await
                .map_err(RelayError::Store)?;
            self.source
                .mark_sent(reading.id)
                .await
                .map_err(RelayError::Source)?;
            debug!(reading_id = reading.id, message_id = id, "Queued weather reading.");
            enqueued += 1;
        }

        Span::current().record("enqueued", enqueued);
        Ok(enqueued)
    }
}

/// Diffs `camera_status` against the last published snapshot per camera.
pub struct CameraStatusPoller {
    source: CameraStatusSource,
    outbox: OutboxStore,
    topics: Topics,
    cache: SnapshotCache<String, CameraSnapshot>,
}

impl CameraStatusPoller {
    pub fn new(source: CameraStatusSource, outbox: OutboxStore, topics: Topics) -> Self {
        Self {
            source,
            outbox,
            topics,
            cache: SnapshotCache::new(),
        }
    }
}

#[async_trait]
impl Poller for CameraStatusPoller {
    fn name(&self) -> &'static str {
        "camera_status"
    }

    #[instrument(skip_all, fields(enqueued = 0))]
    async fn poll_once(&mut self) -> Result<usize, RelayError> {
        let statuses = self.source.statuses().await.map_err(RelayError::from_source)?;

        let mut enqueued = 0;
        for status in statuses {
            let snapshot = status.snapshot();
            if !self.cache.has_changed(&status.camera_name, &snapshot) {
                continue;
            }

            let payload = serde_json::to_string(&CameraStatusPayload::from(&status))?;
            self.outbox
                .enqueue(&self.topics.camera(&status.camera_name), &payload, Qos::AtLeastOnce)
                .await
                .map_err(RelayError::Store)?;
            debug!(camera = %status.camera_name, "Queued camera status change.");
            self.cache.record(status.camera_name, snapshot);
            enqueued += 1;
        }

        Span::current().record("enqueued", enqueued);
        Ok(enqueued)
    }
}
