//! Realtime subscription to one board.
//!
//! ```text
//! Disconnected --connect--> Connecting --subscribed + refetched--> Subscribed
//!      ^                                                              |
//!      +------------- disconnect / lagged / channel closed -----------+
//! ```
//!
//! Every (re)connect refetches the whole board; missed changes are never
//! replayed.

use crate::{
    client::{store::BoardStore, transport::BoardTransport},
    domain::ChangeRecord,
    error::Result,
};
use std::sync::Arc;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// What a call to [`BoardSubscription::next_change`] produced
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Change(ChangeRecord),
    /// The receiver lagged; the store was refetched on a fresh subscription
    Resynced,
    /// The channel is gone or the subscription was never connected
    Closed,
}

pub struct BoardSubscription<T> {
    store: Arc<BoardStore<T>>,
    receiver: Option<broadcast::Receiver<ChangeRecord>>,
    state: SubscriptionState,
}

impl<T: BoardTransport> BoardSubscription<T> {
    pub fn new(store: Arc<BoardStore<T>>) -> Self {
        Self {
            store,
            receiver: None,
            state: SubscriptionState::Disconnected,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn store(&self) -> &Arc<BoardStore<T>> {
        &self.store
    }

    /// Subscribes, then refetches. Subscribing first means no change
    /// committed after the refetch can be missed.
    pub async fn connect(&mut self) -> Result<()> {
        let board_id = self.store.board_id();
        self.receiver = None;
        self.state = SubscriptionState::Connecting;
        tracing::debug!(board = %board_id, "connecting board subscription");

        let receiver = match self.store.transport().subscribe(board_id).await {
            Ok(receiver) => receiver,
            Err(err) => {
                self.state = SubscriptionState::Disconnected;
                return Err(err);
            }
        };

        if let Err(err) = self.store.refresh().await {
            self.state = SubscriptionState::Disconnected;
            return Err(err);
        }

        self.receiver = Some(receiver);
        self.state = SubscriptionState::Subscribed;
        tracing::info!(board = %board_id, "board subscription established");
        Ok(())
    }

    /// Leaving the board drops the receiver
    pub fn disconnect(&mut self) {
        if self.state != SubscriptionState::Disconnected {
            tracing::debug!(board = %self.store.board_id(), "board subscription closed");
        }
        self.receiver = None;
        self.state = SubscriptionState::Disconnected;
    }

    /// Waits for the next change and folds it into the store
    pub async fn next_change(&mut self) -> Result<SubscriptionEvent> {
        let received = match self.receiver.as_mut() {
            Some(receiver) if self.state == SubscriptionState::Subscribed => receiver.recv().await,
            _ => return Ok(SubscriptionEvent::Closed),
        };

        match received {
            Ok(record) => {
                self.store.apply_remote(&record).await?;
                Ok(SubscriptionEvent::Change(record))
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    board = %self.store.board_id(),
                    skipped,
                    "board subscription lagged, resubscribing"
                );
                self.disconnect();
                self.connect().await?;
                Ok(SubscriptionEvent::Resynced)
            }
            Err(RecvError::Closed) => {
                self.disconnect();
                Ok(SubscriptionEvent::Closed)
            }
        }
    }
}

impl<T: BoardTransport + 'static> BoardSubscription<T> {
    /// Connects if needed and keeps folding changes into the store until the
    /// channel closes. Abort the handle to leave the board.
    pub fn spawn(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            if self.state != SubscriptionState::Subscribed {
                self.connect().await?;
            }
            loop {
                if self.next_change().await? == SubscriptionEvent::Closed {
                    return Ok(());
                }
            }
        })
    }
}
