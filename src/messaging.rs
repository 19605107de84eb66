use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clients::setup_mqtt_options;
use crate::config::Config;
use crate::error::RelayError;
use crate::models::{ProbePayload, Qos};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

/// Why a publish did not go through. Callers only log it and retry later.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PublishError(pub String);

/// Topic names for one relay unit.
#[derive(Debug, Clone)]
pub struct Topics {
    unit_name: String,
}

impl Topics {
    pub fn new(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
        }
    }

    pub fn probe(&self) -> String {
        format!("{}/status/test", self.unit_name)
    }

    pub fn weather(&self) -> String {
        format!("{}/weather", self.unit_name)
    }

    pub fn camera(&self, camera_name: &str) -> String {
        format!("{}/status/camera/{}", self.unit_name, camera_name)
    }
}

/// The broker as seen by the rest of the relay.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Starts the background connection. Must not block on the network.
    fn start(&self) {}

    async fn publish(&self, topic: &str, payload: &str, qos: Qos) -> Result<(), PublishError>;

    /// Publishes a synthetic "online" status and reports whether it was accepted.
    async fn probe(&self, topics: &Topics) -> bool {
        let payload = match serde_json::to_string(&ProbePayload::online_now()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize probe payload: {}", e);
                return false;
            }
        };
        match self.publish(&topics.probe(), &payload, Qos::AtLeastOnce).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %topics.probe(), "Probe publish failed: {}", e);
                false
            }
        }
    }
}

fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// A caller waiting for the broker to acknowledge its publish.
struct Waiter {
    qos: Qos,
    done: oneshot::Sender<Result<(), PublishError>>,
}

/// Pairs outgoing PUBLISH packet ids with the caller that queued them.
///
/// Publishes go out one at a time, so at most one waiter is unassigned.
/// Packets whose caller already gave up (timeouts, or replays after a
/// reconnect) are skipped so they never resolve a later caller.
#[derive(Default)]
struct AckTracker {
    queued: Option<Waiter>,
    inflight: HashMap<u16, Waiter>,
    stray_unassigned: usize,
    stray_pkids: HashSet<u16>,
}

impl AckTracker {
    fn register(&mut self, qos: Qos, done: oneshot::Sender<Result<(), PublishError>>) {
        self.queued = Some(Waiter { qos, done });
    }

    /// The request never reached the client queue.
    fn withdraw(&mut self) {
        self.queued = None;
    }

    /// The caller stopped waiting; its packet may still go out later.
    fn abandon(&mut self) {
        if self.queued.take().is_some() {
            self.stray_unassigned += 1;
        }
    }

    fn on_outgoing_publish(&mut self, pkid: u16) {
        if self.stray_pkids.contains(&pkid) {
            return;
        }
        if self.stray_unassigned > 0 {
            self.stray_unassigned -= 1;
            if pkid != 0 {
                self.stray_pkids.insert(pkid);
            }
            return;
        }
        let Some(waiter) = self.queued.take() else {
            return;
        };
        if waiter.qos == Qos::AtMostOnce {
            let _ = waiter.done.send(Ok(()));
        } else {
            self.inflight.insert(pkid, waiter);
        }
    }

    fn on_ack(&mut self, pkid: u16, completes: Qos) {
        if self.stray_pkids.remove(&pkid) {
            return;
        }
        if self.inflight.get(&pkid).is_some_and(|w| w.qos == completes) {
            if let Some(waiter) = self.inflight.remove(&pkid) {
                let _ = waiter.done.send(Ok(()));
            }
        }
    }

    /// Fails every waiter after the session dropped.
    fn fail_all(&mut self, reason: &str) {
        if let Some(waiter) = self.queued.take() {
            self.stray_unassigned += 1;
            let _ = waiter.done.send(Err(PublishError(reason.to_string())));
        }
        for (pkid, waiter) in self.inflight.drain() {
            self.stray_pkids.insert(pkid);
            let _ = waiter.done.send(Err(PublishError(reason.to_string())));
        }
    }
}

fn lock(tracker: &Mutex<AckTracker>) -> MutexGuard<'_, AckTracker> {
    match tracker.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// MQTT publisher backed by a `rumqttc` client.
///
/// The event loop runs on its own task once `start` is called and keeps
/// `connected` in step with the broker session. rumqttc reconnects on the
/// next poll after an error. A publish succeeds once the broker acknowledges
/// it (PUBACK for QoS 1, PUBCOMP for QoS 2); QoS 0 succeeds once written.
pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    connected: Arc<AtomicBool>,
    acks: Arc<Mutex<AckTracker>>,
    turn: tokio::sync::Mutex<()>,
    publish_timeout: Duration,
    reconnect_delay: Duration,
}

impl MqttPublisher {
    pub fn new(config: &Config) -> Result<Self, RelayError> {
        let options = setup_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(options, 64);

        Ok(Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            connected: Arc::new(AtomicBool::new(false)),
            acks: Arc::new(Mutex::new(AckTracker::default())),
            turn: tokio::sync::Mutex::new(()),
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    acks: Arc<Mutex<AckTracker>>,
    reconnect_delay: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                connected.store(accepted, Ordering::SeqCst);
                if accepted {
                    info!("Connected to MQTT broker.");
                } else {
                    error!(code = ?ack.code, "MQTT broker refused the connection.");
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => lock(&acks).on_outgoing_publish(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => lock(&acks).on_ack(ack.pkid, Qos::AtLeastOnce),
            Ok(Event::Incoming(Packet::PubComp(comp))) => lock(&acks).on_ack(comp.pkid, Qos::ExactlyOnce),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                lock(&acks).fail_all("broker closed the session");
                warn!("MQTT broker closed the session.");
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                lock(&acks).fail_all("connection lost before acknowledgement");
                warn!(retry_in_ms = reconnect_delay.as_millis() as u64, "MQTT connection error: {}", e);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    fn start(&self) {
        let event_loop = match self.event_loop.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match event_loop {
            Some(event_loop) => {
                info!("Starting MQTT connection...");
                tokio::spawn(drive_event_loop(
                    event_loop,
                    self.connected.clone(),
                    self.acks.clone(),
                    self.reconnect_delay,
                ));
            }
            None => warn!("MQTT connection already started."),
        }
    }

    #[instrument(skip(self, payload))]
    async fn publish(&self, topic: &str, payload: &str, qos: Qos) -> Result<(), PublishError> {
        let _turn = self.turn.lock().await;
        if !self.is_connected() {
            return Err(PublishError("not connected to broker".into()));
        }

        let (done, acked) = oneshot::channel();
        lock(&self.acks).register(qos, done);

        let exchange = async {
            if let Err(e) = self
                .client
                .publish(topic, to_mqtt_qos(qos), false, payload.as_bytes().to_vec())
                .await
            {
                lock(&self.acks).withdraw();
                return Err(PublishError(format!("client rejected publish: {e}")));
            }
            match acked.await {
                Ok(outcome) => outcome,
                Err(_) => Err(PublishError("acknowledgement channel closed".into())),
            }
        };

        match tokio::time::timeout(self.publish_timeout, exchange).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                lock(&self.acks).abandon();
                Err(e)
            }
            Err(_) => {
                lock(&self.acks).abandon();
                Err(PublishError(format!(
                    "no broker acknowledgement within {} ms",
                    self.publish_timeout.as_millis()
                )))
            }
        }
    }
}
