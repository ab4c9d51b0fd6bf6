//! Interval-driven metric producer.
//!
//! A [`Producer`] turns a [`Sampler`] into a bridge [`Metric`]. It owns the
//! tick loop and decides what each sample means for the bridge: identical
//! serialized text is [`Outcome::Unchanged`], a different set of entities is
//! [`Outcome::TopologyChanged`], anything else is [`Outcome::Updated`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mqttop_bridge::{
    Discoverer, Discovery, Metric, MetricError, Outcome, OutcomeReceiver, Reconfigurable,
};
use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::SelectionMode;

const OUTCOME_CAPACITY: usize = 8;

/// Source of one metric's samples.
pub trait Sampler: Send + 'static {
    type Sample: Serialize;

    /// Producer type label, e.g. `"cpu"`.
    fn kind(&self) -> &'static str;

    /// Take a fresh sample.
    fn sample(&mut self) -> Result<Self::Sample, MetricError>;

    /// Keys of the sub-entities in `sample`; a change triggers rediscovery.
    fn entities(&self, _sample: &Self::Sample) -> Vec<String> {
        Vec::new()
    }

    /// Describe the entities to a discovery document.
    fn describe(&self, topic: &str, entities: &[String], doc: &mut Discovery);

    fn set_selection_mode(&mut self, _mode: SelectionMode) -> Result<(), MetricError> {
        Err(MetricError::Unsupported("selection mode"))
    }
}

#[derive(Default)]
struct Latest {
    text: Option<Vec<u8>>,
    entities: Vec<String>,
}

struct Running {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
}

struct Shared<S> {
    sampler: Mutex<S>,
    latest: Mutex<Latest>,
    interval: watch::Sender<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: Sampler> Shared<S> {
    /// Sample once and classify the result against the previous sample.
    fn tick(&self) -> Outcome {
        let (text, entities) = {
            let mut sampler = lock(&self.sampler);
            let sample = match sampler.sample() {
                Ok(sample) => sample,
                Err(e) => return Outcome::Failed(e),
            };
            let text = match serde_json::to_vec(&sample) {
                Ok(text) => text,
                Err(e) => return Outcome::Failed(e.into()),
            };
            let mut entities = sampler.entities(&sample);
            entities.sort();
            entities.dedup();
            (text, entities)
        };

        let mut latest = lock(&self.latest);
        let topology_changed = latest.text.is_some() && latest.entities != entities;
        let unchanged = latest.text.as_deref() == Some(text.as_slice());
        latest.text = Some(text);
        latest.entities = entities;

        if topology_changed {
            Outcome::TopologyChanged
        } else if unchanged {
            Outcome::Unchanged
        } else {
            Outcome::Updated
        }
    }
}

/// A sampler driven on a fixed, reconfigurable interval.
pub struct Producer<S: Sampler> {
    topic: String,
    kind: &'static str,
    shared: Arc<Shared<S>>,
    running: Mutex<Option<Running>>,
}

impl<S: Sampler> Producer<S> {
    pub fn new(topic: impl Into<String>, interval: Duration, sampler: S) -> Self {
        let (interval, _) = watch::channel(interval);
        Self {
            topic: topic.into(),
            kind: sampler.kind(),
            shared: Arc::new(Shared {
                sampler: Mutex::new(sampler),
                latest: Mutex::new(Latest::default()),
                interval,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.shared.interval.borrow()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }
}

impl<S: Sampler> Metric for Producer<S> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn kind(&self) -> &str {
        self.kind
    }

    /// Takes the first sample before returning, so entities are known to
    /// discovery as soon as the metric is loaded.
    fn start(&self, cancel: CancellationToken) -> Result<OutcomeReceiver, MetricError> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(MetricError::AlreadyStarted);
        }

        let first = match self.shared.tick() {
            Outcome::Failed(e) => return Err(MetricError::Start(e.to_string())),
            _ => Outcome::Updated,
        };

        let (tx, rx) = mpsc::channel(OUTCOME_CAPACITY);
        let cancel = cancel.child_token();
        let refresh = Arc::new(Notify::new());

        tokio::spawn(run(
            self.shared.clone(),
            tx,
            first,
            cancel.clone(),
            refresh.clone(),
        ));

        tracing::debug!(topic = %self.topic, interval = ?self.interval(), "Producer started");
        *running = Some(Running { cancel, refresh });
        Ok(rx)
    }

    fn stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.cancel.cancel();
            tracing::debug!(topic = %self.topic, "Producer stopped");
        }
    }

    fn update(&self) -> Result<(), MetricError> {
        match lock(&self.running).as_ref() {
            Some(running) => {
                running.refresh.notify_one();
                Ok(())
            }
            None => Err(MetricError::NotStarted),
        }
    }

    fn append_text(&self, buf: &mut Vec<u8>) -> Result<(), MetricError> {
        match &lock(&self.shared.latest).text {
            Some(text) => {
                buf.extend_from_slice(text);
                Ok(())
            }
            None => Err(MetricError::NotStarted),
        }
    }

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        Some(self)
    }

    fn as_reconfigurable(&self) -> Option<&dyn Reconfigurable> {
        Some(self)
    }
}

impl<S: Sampler> Discoverer for Producer<S> {
    fn discover(&self, doc: &mut Discovery) {
        let entities = lock(&self.shared.latest).entities.clone();
        lock(&self.shared.sampler).describe(&self.topic, &entities, doc);
    }
}

impl<S: Sampler> Reconfigurable for Producer<S> {
    fn set_interval(&self, interval: Duration) -> Result<(), MetricError> {
        if interval.is_zero() {
            return Err(MetricError::Interval(interval));
        }
        self.shared.interval.send_replace(interval);
        tracing::info!(topic = %self.topic, ?interval, "Interval changed");
        Ok(())
    }

    fn set_selection_mode(&self, mode: &str) -> Result<(), MetricError> {
        let mode: SelectionMode = mode.parse()?;
        lock(&self.shared.sampler).set_selection_mode(mode)?;
        tracing::info!(topic = %self.topic, ?mode, "Selection mode changed");
        Ok(())
    }
}

/// Tick loop: send the pending outcome, then wait for the next tick, a
/// refresh request or an interval change.
async fn run<S: Sampler>(
    shared: Arc<Shared<S>>,
    tx: mpsc::Sender<Outcome>,
    first: Outcome,
    cancel: CancellationToken,
    refresh: Arc<Notify>,
) {
    let mut interval = shared.interval.subscribe();
    let mut outcome = first;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(outcome) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        let period = *interval.borrow_and_update();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = refresh.notified() => {}
            _ = tokio::time::sleep(period) => {}
            changed = interval.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        outcome = shared.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqttop_bridge::{Component, QoS};

    /// Replays scripted samples; each sample is a list of entity names.
    struct Scripted {
        samples: Vec<Result<Vec<&'static str>, &'static str>>,
        next: usize,
        mode: SelectionMode,
    }

    impl Scripted {
        fn new(samples: Vec<Result<Vec<&'static str>, &'static str>>) -> Self {
            Self {
                samples,
                next: 0,
                mode: SelectionMode::Filtered,
            }
        }
    }

    impl Sampler for Scripted {
        type Sample = Vec<&'static str>;

        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn sample(&mut self) -> Result<Self::Sample, MetricError> {
            let index = self.next.min(self.samples.len() - 1);
            self.next += 1;
            self.samples[index]
                .clone()
                .map_err(|e| MetricError::Sample(e.to_string()))
        }

        fn entities(&self, sample: &Self::Sample) -> Vec<String> {
            sample.iter().map(|s| s.to_string()).collect()
        }

        fn describe(&self, topic: &str, entities: &[String], doc: &mut Discovery) {
            for entity in entities {
                let component = Component::sensor(doc.unique_id(entity), entity.clone())
                    .with_state(topic, "{{ value }}");
                doc.add(self.kind(), component);
            }
        }

        fn set_selection_mode(&mut self, mode: SelectionMode) -> Result<(), MetricError> {
            self.mode = mode;
            Ok(())
        }
    }

    fn producer(samples: Vec<Result<Vec<&'static str>, &'static str>>) -> Producer<Scripted> {
        Producer::new("m/scripted", Duration::from_secs(3600), Scripted::new(samples))
    }

    async fn next(rx: &mut OutcomeReceiver) -> Outcome {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_classifies_samples() {
        let p = producer(vec![
            Ok(vec!["a"]),
            Ok(vec!["a"]),
            Ok(vec!["a", "b"]),
            Err("gone"),
        ]);
        let mut rx = p.start(CancellationToken::new()).unwrap();

        assert!(matches!(next(&mut rx).await, Outcome::Updated));
        let mut text = Vec::new();
        p.append_text(&mut text).unwrap();
        assert_eq!(text, br#"["a"]"#);

        p.update().unwrap();
        assert!(matches!(next(&mut rx).await, Outcome::Unchanged));
        p.update().unwrap();
        assert!(matches!(next(&mut rx).await, Outcome::TopologyChanged));
        p.update().unwrap();
        assert!(matches!(next(&mut rx).await, Outcome::Failed(_)));

        p.stop();
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let p = producer(vec![Ok(vec!["a"])]);
        assert!(matches!(p.update(), Err(MetricError::NotStarted)));
        assert!(matches!(p.append_text(&mut Vec::new()), Err(MetricError::NotStarted)));

        let _rx = p.start(CancellationToken::new()).unwrap();
        assert!(matches!(
            p.start(CancellationToken::new()),
            Err(MetricError::AlreadyStarted)
        ));

        // Stopping twice is harmless, and the producer can start again.
        p.stop();
        p.stop();
        assert!(p.start(CancellationToken::new()).is_ok());
    }

    #[tokio::test]
    async fn test_failing_first_sample_fails_start() {
        let p = producer(vec![Err("no sensors")]);
        assert!(matches!(
            p.start(CancellationToken::new()),
            Err(MetricError::Start(_))
        ));
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let p = producer(vec![Ok(vec!["a"])]);
        let cancel = CancellationToken::new();
        let mut rx = p.start(cancel.clone()).unwrap();
        assert!(matches!(next(&mut rx).await, Outcome::Updated));

        cancel.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let p = Producer::new(
            "m/scripted",
            Duration::from_secs(5),
            Scripted::new(vec![Ok(vec!["a"])]),
        );
        let mut rx = p.start(CancellationToken::new()).unwrap();
        assert!(matches!(next(&mut rx).await, Outcome::Updated));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(next(&mut rx).await, Outcome::Unchanged));
    }

    #[tokio::test]
    async fn test_reconfiguration() {
        let p = producer(vec![Ok(vec!["a"])]);

        assert!(matches!(
            p.set_interval(Duration::ZERO),
            Err(MetricError::Interval(_))
        ));
        tokio_test::assert_ok!(p.set_interval(Duration::from_secs(10)));
        assert_eq!(p.interval(), Duration::from_secs(10));

        tokio_test::assert_ok!(p.set_selection_mode("all"));
        assert_eq!(lock(&p.shared.sampler).mode, SelectionMode::All);
        assert!(matches!(
            p.set_selection_mode("most"),
            Err(MetricError::SelectionMode(_))
        ));
    }

    #[tokio::test]
    async fn test_discovers_latest_entities() {
        let p = producer(vec![Ok(vec!["b", "a"])]);
        let _rx = p.start(CancellationToken::new()).unwrap();

        let mut doc = Discovery::new(
            mqttop_bridge::DiscoveryTarget::new("homeassistant", "h", QoS::AtLeastOnce),
            Default::default(),
            Default::default(),
        );
        p.discover(&mut doc);

        assert_eq!(doc.node("scripted").unwrap(), ["h_a", "h_b"]);
        assert_eq!(
            doc.component("h_a").unwrap().state_topic.as_deref(),
            Some("m/scripted")
        );
    }
}
