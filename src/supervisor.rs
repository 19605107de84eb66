use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::RelayError;
use crate::messaging::{Publisher, Topics};
use crate::outbox::OutboxStore;
use crate::pollers::{run_poller, CameraStatusPoller, WeatherPoller};
use crate::sources::{CameraStatusSource, WeatherSource};
use crate::sweeper::run_resend_loop;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Owns the publisher and the stores, and launches the relay tasks.
pub struct Supervisor {
    outbox: OutboxStore,
    weather: WeatherSource,
    cameras: CameraStatusSource,
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    startup_grace: Duration,
    resend_interval: Duration,
    poll_interval: Duration,
}

/// The running relay tasks. They never finish on their own.
pub struct RelayTasks {
    tasks: JoinSet<()>,
}

impl RelayTasks {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Waits on the tasks, logging any that stop unexpectedly.
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(()) => error!("Relay task exited."),
                Err(e) => error!("Relay task failed: {}", e),
            }
        }
    }
}

impl Supervisor {
    pub fn new(
        config: &Config,
        outbox: OutboxStore,
        weather: WeatherSource,
        cameras: CameraStatusSource,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            outbox,
            weather,
            cameras,
            publisher,
            topics: Topics::new(config.unit_name.clone()),
            startup_grace: Duration::from_millis(config.startup_grace_ms),
            resend_interval: Duration::from_millis(config.resend_interval_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Connects, gates on the broker probe, then spawns the resend loop and
    /// both pollers. Nothing is spawned when the probe fails.
    pub async fn start(self) -> Result<RelayTasks, RelayError> {
        self.publisher.start();
        tokio::time::sleep(self.startup_grace).await;

        info!(topic = %self.topics.probe(), "Probing broker...");
        if !self.publisher.probe(&self.topics).await {
            return Err(RelayError::ProbeFailed {
                topic: self.topics.probe(),
            });
        }
        info!("Broker probe accepted.");

        let mut tasks = JoinSet::new();
        tasks.spawn(run_resend_loop(
            self.outbox.clone(),
            self.publisher.clone(),
            self.resend_interval,
        ));
        tasks.spawn(run_poller(
            WeatherPoller::new(self.weather, self.outbox.clone(), self.topics.clone()),
            self.poll_interval,
        ));
        tasks.spawn(run_poller(
            CameraStatusPoller::new(self.cameras, self.outbox, self.topics),
            self.poll_interval,
        ));

        Ok(RelayTasks { tasks })
    }
}
