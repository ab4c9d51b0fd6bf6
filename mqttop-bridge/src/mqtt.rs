//! [`BrokerClient`] backed by `rumqttc`.
//!
//! The rumqttc event loop is driven by a background task spawned on
//! [`connect`](BrokerClient::connect). Requests are queued on the rumqttc
//! request channel; their tokens complete as soon as the request is accepted
//! by that queue. Inbound publishes are dispatched to the handlers of every
//! matching subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use mqttop_common::topic::matches;
use mqttop_common::{MqttConfig, QoS};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, SubscribeFilter};
use tokio_util::sync::CancellationToken;

use crate::client::{BrokerClient, ClientOptions, LastWill, Message, MessageHandler};
use crate::token::{ClientError, Token, TokenCompleter};

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 128;

/// Pause before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

struct Subscription {
    filter: String,
    qos: QoS,
    handler: MessageHandler,
}

/// Subscriptions shared between the client and its event-loop task.
#[derive(Default)]
struct Router {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Router {
    fn add(&self, filter: &str, qos: QoS, handler: MessageHandler) {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.retain(|s| s.filter != filter);
        subscriptions.push(Subscription {
            filter: filter.to_string(),
            qos,
            handler,
        });
    }

    fn remove(&self, filter: &str) {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.filter != filter);
    }

    fn filters(&self) -> Vec<SubscribeFilter> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| SubscribeFilter::new(s.filter.clone(), to_rumqttc(s.qos)))
            .collect()
    }

    fn dispatch(&self, message: Message) {
        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| matches(&message.topic, &s.filter))
            .map(|s| s.handler.clone())
            .collect();

        if handlers.is_empty() {
            tracing::trace!(topic = %message.topic, "No handler for message");
        }
        for handler in handlers {
            handler(message.clone());
        }
    }
}

/// MQTT client using rumqttc.
pub struct MqttClient {
    options: ClientOptions,
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    connected: Arc<AtomicBool>,
    router: Arc<Router>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("options", &self.options)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl MqttClient {
    /// Build a client from the broker configuration.
    ///
    /// `client_id` is the resolved identifier (see [`MqttConfig::client_id_for`]).
    pub fn new(config: &MqttConfig, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let will = LastWill {
            topic: config.will_topic(),
            payload: config.last_will.payload.clone().into_bytes(),
            qos: config.last_will.qos,
            retained: config.last_will.retained,
        };

        let mut mqtt_options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        mqtt_options.set_keep_alive(config.keep_alive());
        mqtt_options.set_clean_session(true);
        if let Some(username) = &config.username {
            mqtt_options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_rumqttc(will.qos),
            will.retained,
        ));

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        Self {
            options: ClientOptions { client_id, will },
            client,
            eventloop: Mutex::new(Some(eventloop)),
            connected: Arc::new(AtomicBool::new(false)),
            router: Arc::new(Router::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn queued(result: Result<(), rumqttc::ClientError>) -> Token {
        match result {
            Ok(()) => Token::completed(),
            Err(e) => Token::failed(ClientError::Request(e.to_string())),
        }
    }
}

impl BrokerClient for MqttClient {
    fn connect(&self) -> Token {
        let eventloop = self
            .eventloop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(eventloop) = eventloop else {
            return Token::failed(ClientError::Connection("client already connected".into()));
        };

        let (completer, token) = Token::pending();
        tokio::spawn(drive(
            eventloop,
            self.client.clone(),
            self.connected.clone(),
            self.router.clone(),
            self.cancel.clone(),
            completer,
        ));
        token
    }

    fn disconnect(&self, grace: Duration) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "Disconnect request not queued");
        }

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cancel.cancel();
        });
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: Vec<u8>) -> Token {
        if !self.is_connected() {
            return Token::failed(ClientError::NotConnected);
        }
        Self::queued(
            self.client
                .try_publish(topic, to_rumqttc(qos), retained, payload),
        )
    }

    fn subscribe(&self, filter: &str, qos: QoS, handler: MessageHandler) -> Token {
        self.subscribe_multiple(&[(filter.to_string(), qos)], handler)
    }

    fn subscribe_multiple(&self, filters: &[(String, QoS)], handler: MessageHandler) -> Token {
        if !self.is_connected() {
            return Token::failed(ClientError::NotConnected);
        }

        // Handlers go in first so retained messages arriving right after the
        // SUBACK are not lost.
        for (filter, qos) in filters {
            self.router.add(filter, *qos, handler.clone());
        }

        let request = filters
            .iter()
            .map(|(filter, qos)| SubscribeFilter::new(filter.clone(), to_rumqttc(*qos)));
        let token = Self::queued(self.client.try_subscribe_many(request));
        if token.error().is_some() {
            for (filter, _) in filters {
                self.router.remove(filter);
            }
        }
        token
    }

    fn unsubscribe(&self, filters: &[String]) -> Token {
        for filter in filters {
            self.router.remove(filter);
            if let Err(e) = self.client.try_unsubscribe(filter.clone()) {
                return Token::failed(ClientError::Request(e.to_string()));
            }
        }
        Token::completed()
    }

    fn options(&self) -> &ClientOptions {
        &self.options
    }
}

/// Poll the rumqttc event loop until cancelled.
///
/// The first CONNACK (or the first error) resolves the connect token. Later
/// errors are logged and polling resumes after [`RECONNECT_DELAY`], which
/// makes rumqttc reconnect; subscriptions are restored on every new session.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    router: Arc<Router>,
    cancel: CancellationToken,
    completer: TokenCompleter,
) {
    let mut completer = Some(completer);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.store(true, Ordering::SeqCst);
                match completer.take() {
                    Some(completer) => {
                        tracing::debug!(code = ?ack.code, "Broker accepted connection");
                        completer.complete(Ok(()));
                    }
                    None => {
                        tracing::info!("Reconnected to broker");
                        let filters = router.filters();
                        if !filters.is_empty() {
                            if let Err(e) = client.try_subscribe_many(filters) {
                                tracing::warn!(error = %e, "Failed to restore subscriptions");
                            }
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic: &[u8] = publish.topic.as_ref();
                let topic = String::from_utf8_lossy(topic).into_owned();
                router.dispatch(Message::new(topic, publish.payload.to_vec()));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::warn!("Broker closed the connection");
                connected.store(false, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                if let Some(completer) = completer.take() {
                    completer.complete(Err(ClientError::Connection(e.to_string())));
                    break;
                }
                tracing::warn!(error = %e, "Broker connection lost, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    tracing::debug!("MQTT event loop stopped");
}
