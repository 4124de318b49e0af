//! Per-board fan-out of committed changes.
//!
//! Every board gets its own `tokio::sync::broadcast` channel and sequence
//! counter. Sequence numbers are assigned and sent under one lock, so
//! subscribers observe records in commit order. A subscriber that falls more
//! than the channel capacity behind receives `RecvError::Lagged` and is
//! expected to refetch the board instead of replaying history.

use crate::{
    config::SyncConfig,
    domain::{BoardId, ChangeEvent, ChangeRecord},
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};

struct BoardChannel {
    sender: broadcast::Sender<ChangeRecord>,
    last_sequence: u64,
}

pub struct ChangeBroadcaster {
    capacity: usize,
    channels: Mutex<HashMap<BoardId, BoardChannel>>,
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(SyncConfig::default().channel_capacity)
    }
}

impl ChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    fn open_channel(&self) -> BoardChannel {
        let (sender, _) = broadcast::channel(self.capacity);
        BoardChannel {
            sender,
            last_sequence: 0,
        }
    }

    /// Stamps the event with the board's next sequence number and delivers it
    /// to every live subscriber. Having no subscribers is not an error.
    pub async fn publish(&self, board_id: BoardId, event: ChangeEvent) -> ChangeRecord {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .entry(board_id)
            .or_insert_with(|| self.open_channel());

        channel.last_sequence += 1;
        let record = ChangeRecord {
            board_id,
            sequence: channel.last_sequence,
            committed_at: Utc::now(),
            event,
        };

        match channel.sender.send(record.clone()) {
            Ok(receivers) => tracing::debug!(
                board = %board_id,
                sequence = record.sequence,
                event = record.event.type_name(),
                receivers,
                "published change"
            ),
            Err(_) => tracing::trace!(
                board = %board_id,
                sequence = record.sequence,
                "no subscribers for change"
            ),
        }

        record
    }

    /// Subscribes to all changes committed after this call
    pub async fn subscribe(&self, board_id: BoardId) -> broadcast::Receiver<ChangeRecord> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(board_id)
            .or_insert_with(|| self.open_channel())
            .sender
            .subscribe()
    }

    /// Sequence number of the last change published for the board
    pub async fn current_sequence(&self, board_id: BoardId) -> u64 {
        self.channels
            .lock()
            .await
            .get(&board_id)
            .map(|c| c.last_sequence)
            .unwrap_or(0)
    }

    pub async fn subscriber_count(&self, board_id: BoardId) -> usize {
        self.channels
            .lock()
            .await
            .get(&board_id)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }
}
