use std::time::Duration;

use crate::error::RelayError;
use crate::messaging::Publisher;
use crate::outbox::OutboxStore;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Span};

/// Outcome of one pass over the pending messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Publishes every pending message once, in id order, marking each delivered
/// message as sent.
///
/// A failed publish leaves that message pending for the next sweep and moves
/// on to the next one. Only a failed fetch aborts the sweep.
#[instrument(skip_all, fields(messages_found = 0))]
pub async fn sweep_outbox_and_send(
    outbox: &OutboxStore,
    publisher: &dyn Publisher,
) -> Result<SweepReport, RelayError> {
    let messages = outbox.list_pending().await.map_err(RelayError::Store)?;

    let messages_found = messages.len();
    if messages_found == 0 {
        debug!("No pending messages found.");
        return Ok(SweepReport::default());
    }
    Span::current().record("messages_found", messages_found);

    let mut report = SweepReport::default();
    for message in &messages {
        report.attempted += 1;

        let qos = match message.qos() {
            Ok(qos) => qos,
            Err(level) => {
                warn!(id = message.id, level, "Message has an unknown QoS level; leaving it pending.");
                report.failed += 1;
                continue;
            }
        };

        match publisher.publish(&message.topic, &message.payload, qos).await {
            Ok(()) => match outbox.mark_sent(message.id).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    // Delivered but not recorded, so it goes out again next sweep.
                    error!(id = message.id, "Error marking message: {}. It WILL be re-sent.", e);
                    report.failed += 1;
                }
            },
            Err(e) => {
                warn!(id = message.id, topic = %message.topic, "Failed to publish message: {}.", e);
                report.failed += 1;
            }
        }
    }

    info!(sent = report.sent, failed = report.failed, "Outbox sweep complete.");
    Ok(report)
}

/// Sweeps the outbox forever, pausing `every` between sweeps.
pub async fn run_resend_loop(outbox: OutboxStore, publisher: std::sync::Arc<dyn Publisher>, every: Duration) {
    info!(interval_ms = every.as_millis() as u64, "Starting outbox resend loop...");
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(e) = sweep_outbox_and_send(&outbox, publisher.as_ref()).await {
            error!("Error during outbox sweep: {}", e);
        }
    }
}
