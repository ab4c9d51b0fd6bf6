//! The bridge: metric lifecycle, publishing, discovery and shutdown.
//!
//! One [`Bridge`] owns a broker client and a set of metrics. Each loaded
//! metric gets its own task that turns the metric's outcomes into publish or
//! rediscovery requests. A single publish loop serializes those requests onto
//! the client, so values and discovery documents never interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use mqttop_common::{QoS, TopicBuilder};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::{BrokerClient, ClientOptions, Message, MessageHandler};
use crate::control::{self, UpdateRequest};
use crate::discovery::{BRIDGE_NODE, Component, Discovery};
use crate::error::{BridgeError, Result};
use crate::health::FailureTracker;
use crate::metric::{MetricRef, Outcome, OutcomeReceiver};
use crate::state::StateMap;
use crate::token::{Settled, Token, settle, settle_within};

/// Default capacity of the update and rediscovery queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default pause between the discovery echo and the initial refresh.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the final last-will publish.
const SHUTDOWN_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period handed to the client on disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Metric handles, indexed by load order. Unloaded metrics leave `None`.
#[derive(Default)]
struct Slots {
    metrics: Vec<Option<MetricRef>>,
    /// Set once startup has walked the whole list; later additions load themselves.
    loaded: bool,
}

struct Receivers {
    updates: mpsc::Receiver<MetricRef>,
    rediscover: Option<mpsc::Receiver<MetricRef>>,
}

/// Builder for [`Bridge`].
pub struct BridgeBuilder {
    client: Arc<dyn BrokerClient>,
    metrics: Vec<MetricRef>,
    base_topic: String,
    discovery: Option<Discovery>,
    settle_delay: Duration,
    offline_after_failures: Option<u32>,
    channel_capacity: usize,
}

impl BridgeBuilder {
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self {
            client,
            metrics: Vec::new(),
            base_topic: mqttop_common::BASE_TOPIC.to_string(),
            discovery: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            offline_after_failures: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn metric(mut self, metric: MetricRef) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn metrics(mut self, metrics: impl IntoIterator<Item = MetricRef>) -> Self {
        self.metrics.extend(metrics);
        self
    }

    /// Base topic of the bridge's own control topics.
    pub fn base_topic(mut self, base: impl Into<String>) -> Self {
        self.base_topic = base.into();
        self
    }

    /// Enable auto-discovery with `doc` as the initial document.
    pub fn discovery(mut self, doc: Discovery) -> Self {
        self.discovery = Some(doc);
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Report a metric offline after this many consecutive failures.
    pub fn offline_after_failures(mut self, threshold: Option<u32>) -> Self {
        self.offline_after_failures = threshold;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Arc<Bridge> {
        let (updates_tx, updates) = mpsc::channel(self.channel_capacity);
        let (rediscover_tx, rediscover) = match self.discovery {
            Some(_) => {
                let (tx, rx) = mpsc::channel(self.channel_capacity);
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let (ready, _) = watch::channel(false);
        let (done, _) = watch::channel(false);

        Arc::new(Bridge {
            options: self.client.options().clone(),
            client: self.client,
            topics: TopicBuilder::new(self.base_topic),
            slots: Mutex::new(Slots {
                metrics: self.metrics.into_iter().map(Some).collect(),
                loaded: false,
            }),
            state: StateMap::new(),
            failures: FailureTracker::new(self.offline_after_failures),
            discovery: Mutex::new(self.discovery),
            settle_delay: self.settle_delay,
            updates_tx,
            rediscover_tx,
            receivers: Mutex::new(Some(Receivers {
                updates,
                rediscover,
            })),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            ready,
            done,
            error: OnceLock::new(),
            tasks: TaskTracker::new(),
        })
    }
}

/// Republishes metrics to an MQTT broker.
///
/// # Example
///
/// ```ignore
/// let bridge = Bridge::builder(client).metrics(metrics).build();
/// bridge.start(CancellationToken::new()).await?;
/// bridge.ready().await;
/// // ...
/// bridge.stop().await;
/// ```
pub struct Bridge {
    client: Arc<dyn BrokerClient>,
    options: ClientOptions,
    topics: TopicBuilder,
    slots: Mutex<Slots>,
    state: StateMap,
    failures: FailureTracker,
    /// Handed to the publish loop at startup.
    discovery: Mutex<Option<Discovery>>,
    settle_delay: Duration,
    updates_tx: mpsc::Sender<MetricRef>,
    rediscover_tx: Option<mpsc::Sender<MetricRef>>,
    receivers: Mutex<Option<Receivers>>,
    cancel: CancellationToken,
    started: AtomicBool,
    ready: watch::Sender<bool>,
    done: watch::Sender<bool>,
    error: OnceLock<Arc<BridgeError>>,
    tasks: TaskTracker,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("client_id", &self.options.client_id)
            .field("base_topic", &self.topics.base())
            .field("ready", &self.is_ready())
            .field("done", &self.is_done())
            .finish()
    }
}

impl Bridge {
    pub fn builder(client: Arc<dyn BrokerClient>) -> BridgeBuilder {
        BridgeBuilder::new(client)
    }

    /// Connect and launch the bridge.
    ///
    /// Returns once connected and the startup task is running; use
    /// [`ready`](Self::ready) to wait for the first full state publish.
    /// Cancelling `cancel` shuts the bridge down like [`stop`](Self::stop).
    ///
    /// Starting twice is a no-op. If startup fails or is cancelled before
    /// connecting, readiness and completion are both signalled so that
    /// `stop` never hangs.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Bridge already started");
            return Ok(());
        }

        if self.lock_slots().metrics.is_empty() {
            self.record_error(BridgeError::NoMetrics);
            self.finish_early();
            return Err(BridgeError::NoMetrics);
        }

        let bridge_cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => bridge_cancel.cancel(),
                _ = bridge_cancel.cancelled() => {}
            }
        });

        tracing::info!(client_id = %self.options.client_id, "Connecting to broker");
        match settle(&self.cancel, &self.client.connect()).await {
            Settled::Completed => tracing::info!("Connected to broker"),
            Settled::Failed(e) => {
                self.record_error(BridgeError::Connect(e.clone()));
                self.finish_early();
                return Err(BridgeError::Connect(e));
            }
            Settled::Abandoned => {
                tracing::info!("Startup cancelled before the broker connection completed");
                self.client.disconnect(DISCONNECT_GRACE);
                self.finish_early();
                return Ok(());
            }
        }

        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receivers) = receivers else {
            self.finish_early();
            return Ok(());
        };

        let bridge = self.clone();
        tokio::spawn(async move { bridge.run(receivers).await });
        Ok(())
    }

    /// Wait until startup completed (or was given up).
    pub async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait until shutdown completed.
    pub async fn done(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for readiness, cancel, then wait for shutdown to finish.
    pub async fn stop(&self) {
        self.ready().await;
        self.cancel.cancel();
        self.done().await;
    }

    /// First error recorded during startup, if any.
    pub fn error(&self) -> Option<Arc<BridgeError>> {
        self.error.get().cloned()
    }

    /// Liveness of every loaded metric.
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    /// Metrics currently loaded, in load order.
    pub fn metrics(&self) -> Vec<MetricRef> {
        self.lock_slots().metrics.iter().flatten().cloned().collect()
    }

    /// Add a metric to a running (or not yet started) bridge.
    ///
    /// Before startup has walked the metric list the metric is simply queued
    /// and loaded with the others. Afterwards it is loaded immediately and,
    /// with discovery enabled, announced through an incremental rediscovery.
    pub async fn add_metric(self: &Arc<Self>, metric: MetricRef) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::ShuttingDown);
        }

        let index = {
            let mut slots = self.lock_slots();
            slots.metrics.push(Some(metric.clone()));
            if !slots.loaded {
                tracing::debug!(topic = %metric.topic(), "Metric queued for startup");
                return Ok(());
            }
            slots.metrics.len() - 1
        };

        tracing::info!(topic = %metric.topic(), kind = %metric.kind(), "Adding metric");
        if self.load(index, metric.clone(), true).await {
            if let Some(tx) = &self.rediscover_tx {
                self.enqueue(tx, &metric).await;
            }
        }
        Ok(())
    }

    /// Ask every loaded metric to refresh now.
    pub fn update_all(&self) {
        for metric in self.metrics() {
            if let Err(e) = metric.update() {
                tracing::warn!(topic = %metric.topic(), error = %e, "Metric update request failed");
            }
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, error: BridgeError) {
        tracing::error!(error = %error, "Bridge startup error");
        let _ = self.error.set(Arc::new(error));
    }

    fn finish_early(&self) {
        self.cancel.cancel();
        self.ready.send_replace(true);
        self.done.send_replace(true);
    }

    /// Startup after the connection is up, followed by the publish loop.
    async fn run(self: Arc<Self>, receivers: Receivers) {
        let mut index = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let metric = {
                let mut slots = self.lock_slots();
                if index >= slots.metrics.len() {
                    slots.loaded = true;
                    break;
                }
                slots.metrics[index].clone()
            };
            if let Some(metric) = metric {
                self.load(index, metric, false).await;
            }
            index += 1;
        }

        let mut discovery = None;
        if !self.cancel.is_cancelled() {
            self.publish_state().await;
            self.subscribe_bridge_controls().await;
            discovery = self
                .discovery
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(doc) = discovery.as_mut() {
                self.announce(doc).await;
            }
        }

        self.ready.send_replace(true);
        tracing::info!(metrics = self.state.len(), "Bridge ready");

        self.publish_loop(receivers, discovery).await;
    }

    /// Start one metric, subscribe its control topics and launch its loop.
    ///
    /// Returns `true` if the metric loop was launched.
    async fn load(self: &Arc<Self>, index: usize, metric: MetricRef, hot_add: bool) -> bool {
        let topic = metric.topic().to_string();
        if topic.is_empty() {
            tracing::warn!(kind = %metric.kind(), "Skipping metric without topic");
            self.clear_slot(index);
            return false;
        }

        let outcomes = match metric.start(self.cancel.child_token()) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Failed to start metric");
                self.clear_slot(index);
                let changed = self.state.record(&topic, false);
                if hot_add && changed {
                    self.publish_state().await;
                }
                return false;
            }
        };

        let filters = [
            (mqttop_common::Control::Update.topic(&topic), QoS::AtLeastOnce),
            (mqttop_common::Control::Stop.topic(&topic), QoS::AtLeastOnce),
        ];
        let handler = control::metric_handler(Arc::downgrade(self), metric.clone());
        match settle(&self.cancel, &self.client.subscribe_multiple(&filters, handler)).await {
            Settled::Completed => {}
            Settled::Failed(e) => {
                metric.stop();
                self.clear_slot(index);
                let changed = self.state.record(&topic, false);
                let error = BridgeError::Subscribe {
                    topic: topic.clone(),
                    source: e,
                };
                if hot_add {
                    tracing::warn!(error = %error, "Failed to load metric");
                    if changed {
                        self.publish_state().await;
                    }
                } else {
                    self.record_error(error);
                }
                return false;
            }
            Settled::Abandoned => {
                metric.stop();
                self.clear_slot(index);
                return false;
            }
        }

        let changed = self.state.record(&topic, true);
        tracing::info!(topic = %topic, kind = %metric.kind(), "Metric loaded");
        if hot_add && changed {
            self.publish_state().await;
        }

        self.tasks
            .spawn(self.clone().metric_loop(index, metric, outcomes));
        true
    }

    /// Turn one metric's outcomes into publish and rediscovery requests.
    async fn metric_loop(self: Arc<Self>, index: usize, metric: MetricRef, mut outcomes: OutcomeReceiver) {
        let topic = metric.topic().to_string();

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => break,
                },
            };

            match outcome {
                Outcome::Updated => {
                    self.mark_healthy(&topic).await;
                    self.enqueue(&self.updates_tx, &metric).await;
                }
                Outcome::Unchanged => {
                    if self.mark_healthy(&topic).await {
                        self.enqueue(&self.updates_tx, &metric).await;
                    }
                }
                Outcome::TopologyChanged => {
                    self.mark_healthy(&topic).await;
                    let tx = self.rediscover_tx.as_ref().unwrap_or(&self.updates_tx);
                    self.enqueue(tx, &metric).await;
                }
                Outcome::Failed(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Metric update failed");
                    if self.failures.record_failure(&topic)
                        && self.state.compare_and_swap(&topic, true, false)
                    {
                        tracing::warn!(
                            topic = %topic,
                            failures = self.failures.consecutive_failures(&topic),
                            "Marking metric offline"
                        );
                        self.publish_state().await;
                    }
                }
            }
        }

        metric.stop();
        self.failures.forget(&topic);
        let removed = self.state.remove(&topic);
        self.clear_slot(index);

        if !self.cancel.is_cancelled() {
            tracing::info!(topic = %topic, "Metric unloaded");
            let filters = [
                mqttop_common::Control::Update.topic(&topic),
                mqttop_common::Control::Stop.topic(&topic),
            ];
            self.log_outcome("unsubscribe", &topic, &self.client.unsubscribe(&filters))
                .await;
            if removed {
                self.publish_state().await;
            }
        }
        tracing::debug!(topic = %topic, "Metric loop exited");
    }

    /// Record a successful update. Returns `true` if the metric was offline.
    async fn mark_healthy(&self, topic: &str) -> bool {
        self.failures.record_success(topic);
        let recovered = self.state.compare_and_swap(topic, false, true);
        if recovered {
            tracing::info!(topic = %topic, "Metric back online");
            self.publish_state().await;
        }
        recovered
    }

    async fn enqueue(&self, tx: &mpsc::Sender<MetricRef>, metric: &MetricRef) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            sent = tx.send(metric.clone()) => {
                if sent.is_err() {
                    tracing::debug!(topic = %metric.topic(), "Publish loop gone, dropping request");
                }
            }
        }
    }

    fn clear_slot(&self, index: usize) {
        if let Some(slot) = self.lock_slots().metrics.get_mut(index) {
            *slot = None;
        }
    }

    /// Publish the state map to the last-will topic without waiting.
    fn send_state(&self) -> Option<Token> {
        let will = &self.options.will;
        match self.state.to_json() {
            Ok(payload) => Some(self.client.publish(&will.topic, will.qos, will.retained, payload)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize state map");
                None
            }
        }
    }

    async fn publish_state(&self) {
        if let Some(token) = self.send_state() {
            let topic = self.options.will.topic.clone();
            self.log_outcome("publish", &topic, &token).await;
        }
    }

    async fn log_outcome(&self, operation: &str, topic: &str, token: &Token) {
        if let Settled::Failed(e) = settle(&self.cancel, token).await {
            tracing::warn!(operation, topic = %topic, error = %e, "Broker operation failed");
        }
    }

    async fn subscribe_bridge_controls(self: &Arc<Self>) {
        let filters = [
            (self.topics.bridge_update(), QoS::AtLeastOnce),
            (self.topics.bridge_stop(), QoS::AtLeastOnce),
        ];
        let handler = control::bridge_handler(Arc::downgrade(self));
        if let Settled::Failed(e) =
            settle(&self.cancel, &self.client.subscribe_multiple(&filters, handler)).await
        {
            self.record_error(BridgeError::Subscribe {
                topic: self.topics.bridge_update(),
                source: e,
            });
        }
    }

    /// Full discovery: build, publish, then wait for the broker echo.
    async fn announce(self: &Arc<Self>, doc: &mut Discovery) {
        doc.set_availability_topic(self.options.will.topic.clone());

        let mut update = Component::button(
            doc.unique_id("bridge_update"),
            "Update",
            self.topics.bridge_update(),
        )
        .with_device_class("update")
        .with_entity_category("config");
        update.availability_template =
            Some("{{ 'online' if value_json else 'offline' }}".to_string());
        doc.add(BRIDGE_NODE, update);

        for metric in self.metrics() {
            if let Some(discoverer) = metric.as_discoverer() {
                discoverer.discover(doc);
            }
        }
        doc.normalize();

        let token = match doc.publish(&*self.client) {
            Ok(token) => token,
            Err(e) => {
                self.record_error(e);
                return;
            }
        };
        match settle(&self.cancel, &token).await {
            Settled::Completed => {
                tracing::info!(topic = %doc.topic(), components = doc.components().len(), "Discovery published")
            }
            Settled::Failed(e) => {
                self.record_error(BridgeError::Publish {
                    topic: doc.topic().to_string(),
                    source: e,
                });
                return;
            }
            Settled::Abandoned => return,
        }

        let handler = self.discovery_gate(doc.topic().to_string());
        if let Settled::Failed(e) = settle(&self.cancel, &doc.subscribe_gate(&*self.client, handler)).await {
            self.record_error(BridgeError::Subscribe {
                topic: doc.topic().to_string(),
                source: e,
            });
        }
    }

    /// Handler for the discovery echo.
    ///
    /// On the first echo, waits for the settle delay, drops the subscription
    /// and refreshes every metric so consumers receive initial values.
    fn discovery_gate(self: &Arc<Self>, topic: String) -> MessageHandler {
        let bridge = Arc::downgrade(self);
        let fired = Arc::new(AtomicBool::new(false));

        Arc::new(move |_: Message| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            let Some(bridge) = bridge.upgrade() else {
                return;
            };
            let topic = topic.clone();
            let tracker = bridge.tasks.clone();
            tracker.spawn(async move {
                tokio::select! {
                    _ = bridge.cancel.cancelled() => return,
                    _ = tokio::time::sleep(bridge.settle_delay) => {}
                }
                tracing::debug!(topic = %topic, "Discovery echoed, refreshing metrics");
                bridge
                    .log_outcome("unsubscribe", &topic, &bridge.client.unsubscribe(&[topic.clone()]))
                    .await;
                bridge.update_all();
            });
        })
    }

    /// Rebuild and republish the components owned by `metric`'s kind.
    async fn rediscover(&self, doc: &mut Discovery, metric: &MetricRef) {
        let Some(discoverer) = metric.as_discoverer() else {
            tracing::debug!(topic = %metric.topic(), "Topology changed on a metric without discovery");
            return;
        };

        let node = metric.kind().to_string();
        let previous = doc.reset_node(&node);
        discoverer.discover(doc);
        doc.finish_node(&node, previous);

        match doc.publish_node(&*self.client, &node) {
            Ok(token) => self.log_outcome("publish", doc.topic(), &token).await,
            Err(e) => tracing::warn!(node = %node, error = %e, "Failed to publish discovery"),
        }

        let dropped = doc.prune_node(&node);
        tracing::info!(node = %node, dropped, "Rediscovery published");
    }

    /// Publish a metric's current value. Returns the in-flight token.
    fn publish_value(&self, metric: &MetricRef) -> Option<(String, Token)> {
        let topic = metric.topic().to_string();
        let mut payload = Vec::new();
        if let Err(e) = metric.append_text(&mut payload) {
            tracing::warn!(topic = %topic, error = %e, "Failed to render metric value");
            return None;
        }
        let token = self.client.publish(&topic, QoS::AtMostOnce, false, payload);
        Some((topic, token))
    }

    /// Serialize publish and rediscovery requests until cancelled.
    async fn publish_loop(self: &Arc<Self>, receivers: Receivers, mut discovery: Option<Discovery>) {
        let Receivers {
            mut updates,
            mut rediscover,
        } = receivers;
        let mut in_flight: Option<(String, Token)> = None;

        loop {
            let pending = in_flight.as_ref().map(|(_, token)| token.clone());

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                metric = updates.recv() => match metric {
                    Some(metric) => {
                        if let Some(publish) = self.publish_value(&metric) {
                            in_flight = Some(publish);
                        }
                    }
                    None => break,
                },
                metric = recv_optional(&mut rediscover) => match metric {
                    Some(metric) => {
                        if let Some(doc) = discovery.as_mut() {
                            self.rediscover(doc, &metric).await;
                        }
                        if let Some(publish) = self.publish_value(&metric) {
                            in_flight = Some(publish);
                        }
                    }
                    None => break,
                },
                _ = wait_token(pending.as_ref()), if pending.is_some() => {
                    if let Some((topic, token)) = in_flight.take() {
                        if let Some(e) = token.error() {
                            tracing::warn!(topic = %topic, error = %e, "Failed to publish metric value");
                        }
                    }
                }
            }
        }

        self.shutdown(updates, rediscover).await;
    }

    async fn shutdown(
        &self,
        mut updates: mpsc::Receiver<MetricRef>,
        mut rediscover: Option<mpsc::Receiver<MetricRef>>,
    ) {
        tracing::info!("Bridge shutting down");

        if self.client.is_connected() {
            let will = &self.options.will;
            let token = self
                .client
                .publish(&will.topic, will.qos, will.retained, will.payload.clone());
            match settle_within(SHUTDOWN_PUBLISH_TIMEOUT, &token).await {
                Settled::Completed => {}
                Settled::Failed(e) => {
                    tracing::warn!(topic = %will.topic, error = %e, "Failed to publish final state")
                }
                Settled::Abandoned => {
                    tracing::warn!(topic = %will.topic, "Timed out publishing final state")
                }
            }
        }
        self.client.disconnect(DISCONNECT_GRACE);

        updates.close();
        if let Some(rx) = rediscover.as_mut() {
            rx.close();
        }

        self.tasks.close();
        self.tasks.wait().await;

        self.done.send_replace(true);
        tracing::info!("Bridge stopped");
    }

    pub(crate) fn handle_update(&self, metric: &MetricRef, payload: &[u8]) {
        let topic = metric.topic();
        let request = match UpdateRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Ignoring malformed update request");
                return;
            }
        };

        if let Err(e) = request.apply(metric.as_ref()) {
            tracing::warn!(topic = %topic, error = %e, "Failed to reconfigure metric");
        } else if !request.is_empty() {
            tracing::info!(topic = %topic, ?request, "Metric reconfigured");
        }

        if let Err(e) = metric.update() {
            tracing::warn!(topic = %topic, error = %e, "Metric update request failed");
        }
    }

    pub(crate) fn handle_stop(&self, metric: &MetricRef) {
        let topic = metric.topic();
        tracing::info!(topic = %topic, "Metric stop requested");

        if self.state.compare_and_swap(topic, true, false) {
            // Sent synchronously so it precedes the removal published by the loop.
            if let Some(e) = self.send_state().and_then(|token| token.error()) {
                tracing::warn!(topic = %topic, error = %e, "Failed to publish state");
            }
        }
        metric.stop();
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_token(token: Option<&Token>) {
    match token {
        Some(token) => token.done().await,
        None => std::future::pending().await,
    }
}
