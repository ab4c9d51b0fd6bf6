//! Handles for in-flight broker operations.
//!
//! Every asynchronous broker call (connect, publish, subscribe, unsubscribe)
//! returns a [`Token`]. The client side keeps the matching [`TokenCompleter`]
//! and resolves it once the operation finished. Tokens are cheap to clone and
//! any number of tasks may wait on the same one.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Failure reported through a [`Token`].
///
/// `Clone` because a token may be observed by several waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The client has no live broker connection.
    #[error("not connected")]
    NotConnected,

    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The client refused or failed the request.
    #[error("request failed: {0}")]
    Request(String),

    /// The completer was dropped without resolving the operation.
    #[error("operation dropped before completion")]
    Dropped,
}

type Slot = Option<Result<(), ClientError>>;

/// Waitable handle for one asynchronous broker operation.
#[derive(Debug, Clone)]
pub struct Token {
    rx: watch::Receiver<Slot>,
}

/// Resolving side of a [`Token`].
#[derive(Debug)]
pub struct TokenCompleter {
    tx: watch::Sender<Slot>,
}

impl TokenCompleter {
    /// Resolve the operation. Later calls are impossible since this consumes the completer.
    pub fn complete(self, result: Result<(), ClientError>) {
        self.tx.send_replace(Some(result));
    }
}

impl Token {
    /// Create an unresolved token and its completer.
    pub fn pending() -> (TokenCompleter, Token) {
        let (tx, rx) = watch::channel(None);
        (TokenCompleter { tx }, Token { rx })
    }

    /// A token that already succeeded.
    pub fn completed() -> Token {
        Self::resolved(Ok(()))
    }

    /// A token that already failed.
    pub fn failed(error: ClientError) -> Token {
        Self::resolved(Err(error))
    }

    fn resolved(result: Result<(), ClientError>) -> Token {
        let (completer, token) = Self::pending();
        completer.complete(result);
        token
    }

    /// Whether the operation has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        let closed = self.rx.has_changed().is_err();
        closed || self.rx.borrow().is_some()
    }

    /// Wait until the operation has finished.
    pub async fn done(&self) {
        let mut rx = self.rx.clone();
        // An Err means the completer is gone; that counts as finished too.
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// The operation's error, if it finished with one.
    pub fn error(&self) -> Option<ClientError> {
        let closed = self.rx.has_changed().is_err();
        match &*self.rx.borrow() {
            Some(Ok(())) => None,
            Some(Err(e)) => Some(e.clone()),
            None if closed => Some(ClientError::Dropped),
            None => None,
        }
    }
}

/// How a waited-on operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Completed,
    Failed(ClientError),
    /// The wait was given up (cancellation or timeout) before completion.
    Abandoned,
}

impl Settled {
    fn from_token(token: &Token) -> Self {
        match token.error() {
            Some(e) => Settled::Failed(e),
            None => Settled::Completed,
        }
    }
}

/// Race a token against cancellation. Cancellation always wins.
pub async fn settle(cancel: &CancellationToken, token: &Token) -> Settled {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Settled::Abandoned,
        _ = token.done() => Settled::from_token(token),
    }
}

/// Wait for a token for at most `timeout`.
pub async fn settle_within(timeout: Duration, token: &Token) -> Settled {
    match tokio::time::timeout(timeout, token.done()).await {
        Ok(()) => Settled::from_token(token),
        Err(_) => Settled::Abandoned,
    }
}
