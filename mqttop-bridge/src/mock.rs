//! Deterministic in-memory broker client.
//!
//! [`MockClient`] implements [`BrokerClient`] without any network. Every
//! publish, subscription and disconnect is recorded; inbound traffic is
//! simulated with [`MockClient::deliver`]. Retained publishes are stored and
//! replayed to later matching subscriptions the way a broker would.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mqttop_common::QoS;
use mqttop_common::topic::matches;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::client::{BrokerClient, ClientOptions, LastWill, Message, MessageHandler};
use crate::token::{ClientError, Token, TokenCompleter};

/// A publish recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retained: bool,
    pub payload: Vec<u8>,
}

impl Published {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
struct MockState {
    published: Vec<Published>,
    retained: BTreeMap<String, Vec<u8>>,
    subscriptions: Vec<(String, MessageHandler)>,
    unsubscribed: Vec<String>,
    disconnects: usize,
    connects: usize,
    held_connect: Option<TokenCompleter>,
    connect_error: Option<ClientError>,
    hold_connect: bool,
    failing_filters: Vec<String>,
}

/// Recording, non-networked [`BrokerClient`].
pub struct MockClient {
    options: ClientOptions,
    connected: AtomicBool,
    state: Mutex<MockState>,
    changed: Notify,
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("options", &self.options)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockClient {
    /// Mock with a `{}` last will on `will_topic` (QoS 1, retained).
    pub fn new(will_topic: impl Into<String>) -> Self {
        Self::with_options(ClientOptions {
            client_id: "mock".to_string(),
            will: LastWill {
                topic: will_topic.into(),
                payload: b"{}".to_vec(),
                qos: QoS::AtLeastOnce,
                retained: true,
            },
        })
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            options,
            connected: AtomicBool::new(false),
            state: Mutex::new(MockState::default()),
            changed: Notify::new(),
        }
    }

    /// Make `connect` fail with `error`.
    pub fn fail_connect(self, error: ClientError) -> Self {
        self.lock().connect_error = Some(error);
        self
    }

    /// Keep `connect` pending until [`release_connect`](Self::release_connect).
    pub fn hold_connect(self) -> Self {
        self.lock().hold_connect = true;
        self
    }

    /// Make subscriptions to exactly `filter` fail.
    pub fn fail_subscribe(self, filter: impl Into<String>) -> Self {
        self.lock().failing_filters.push(filter.into());
        self
    }

    /// Complete a held connect successfully.
    pub fn release_connect(&self) {
        let completer = {
            let mut state = self.lock();
            state.hold_connect = false;
            state.held_connect.take()
        };
        if let Some(completer) = completer {
            self.connected.store(true, Ordering::SeqCst);
            completer.complete(Ok(()));
        }
        self.changed.notify_waiters();
    }

    /// Simulate an inbound message on `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let handlers: Vec<MessageHandler> = self
            .lock()
            .subscriptions
            .iter()
            .filter(|(filter, _)| matches(topic, filter))
            .map(|(_, handler)| handler.clone())
            .collect();

        let message = Message::new(topic, payload);
        for handler in &handlers {
            handler(message.clone());
        }
        handlers.len()
    }

    pub fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Currently subscribed filters, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock()
            .subscriptions
            .iter()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.lock().subscriptions.iter().any(|(f, _)| f == filter)
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.lock().unsubscribed.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    /// Wait until a recorded publish satisfies `pred`.
    pub async fn wait_for_publish<F>(&self, timeout: Duration, mut pred: F) -> Option<Published>
    where
        F: FnMut(&Published) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = self.lock().published.iter().find(|p| pred(*p)) {
                return Some(found.clone());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Wait until `pred` holds for the client as a whole.
    pub async fn wait_until<F>(&self, timeout: Duration, mut pred: F) -> bool
    where
        F: FnMut(&MockClient) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if pred(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BrokerClient for MockClient {
    fn connect(&self) -> Token {
        let token = {
            let mut state = self.lock();
            state.connects += 1;
            if let Some(error) = state.connect_error.clone() {
                Token::failed(error)
            } else if state.hold_connect {
                let (completer, token) = Token::pending();
                state.held_connect = Some(completer);
                token
            } else {
                self.connected.store(true, Ordering::SeqCst);
                Token::completed()
            }
        };
        self.changed.notify_waiters();
        token
    }

    fn disconnect(&self, _grace: Duration) {
        self.connected.store(false, Ordering::SeqCst);
        let held = {
            let mut state = self.lock();
            state.disconnects += 1;
            state.held_connect.take()
        };
        // An abandoned connect never completes.
        drop(held);
        self.changed.notify_waiters();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: Vec<u8>) -> Token {
        if !self.is_connected() {
            return Token::failed(ClientError::NotConnected);
        }

        {
            let mut state = self.lock();
            if retained {
                if payload.is_empty() {
                    state.retained.remove(topic);
                } else {
                    state.retained.insert(topic.to_string(), payload.clone());
                }
            }
            state.published.push(Published {
                topic: topic.to_string(),
                qos,
                retained,
                payload: payload.clone(),
            });
        }
        self.changed.notify_waiters();

        // Loop back to our own subscriptions, like a broker would.
        self.deliver(topic, payload);
        Token::completed()
    }

    fn subscribe(&self, filter: &str, qos: QoS, handler: MessageHandler) -> Token {
        self.subscribe_multiple(&[(filter.to_string(), qos)], handler)
    }

    fn subscribe_multiple(&self, filters: &[(String, QoS)], handler: MessageHandler) -> Token {
        if !self.is_connected() {
            return Token::failed(ClientError::NotConnected);
        }

        let replay = {
            let mut state = self.lock();
            if let Some((filter, _)) = filters
                .iter()
                .find(|(filter, _)| state.failing_filters.contains(filter))
            {
                return Token::failed(ClientError::Request(format!(
                    "subscription to {} refused",
                    filter
                )));
            }

            let mut replay = Vec::new();
            for (filter, _) in filters {
                state.subscriptions.push((filter.clone(), handler.clone()));
                replay.extend(
                    state
                        .retained
                        .iter()
                        .filter(|(topic, _)| matches(topic, filter))
                        .map(|(topic, payload)| Message::new(topic.clone(), payload.clone())),
                );
            }
            replay
        };
        self.changed.notify_waiters();

        for message in replay {
            handler(message);
        }
        Token::completed()
    }

    fn unsubscribe(&self, filters: &[String]) -> Token {
        {
            let mut state = self.lock();
            state
                .subscriptions
                .retain(|(filter, _)| !filters.contains(filter));
            state.unsubscribed.extend(filters.iter().cloned());
        }
        self.changed.notify_waiters();
        Token::completed()
    }

    fn options(&self) -> &ClientOptions {
        &self.options
    }
}
