use crate::domain::{
    board::List,
    card::Card,
    ids::{BoardId, CardId, ListId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed change as sent on a board's realtime channel.
///
/// Serialized as `{"type": "CARD_MOVED", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEvent {
    #[serde(rename_all = "camelCase")]
    CardMoved {
        card_id: CardId,
        list_id: ListId,
        position: f64,
        version: u64,
    },
    #[serde(rename_all = "camelCase")]
    ListMoved {
        list_id: ListId,
        position: f64,
        version: u64,
    },
    CardCreated { card: Card },
    #[serde(rename_all = "camelCase")]
    CardDeleted { card_id: CardId, list_id: ListId },
    ListCreated { list: List },
    #[serde(rename_all = "camelCase")]
    ListDeleted { list_id: ListId },
}

impl ChangeEvent {
    pub fn card_moved(card: &Card) -> Self {
        Self::CardMoved {
            card_id: card.id,
            list_id: card.list_id,
            position: card.position,
            version: card.version,
        }
    }

    pub fn list_moved(list: &List) -> Self {
        Self::ListMoved {
            list_id: list.id,
            position: list.position,
            version: list.version,
        }
    }

    /// The wire name of the event type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CardMoved { .. } => "CARD_MOVED",
            Self::ListMoved { .. } => "LIST_MOVED",
            Self::CardCreated { .. } => "CARD_CREATED",
            Self::CardDeleted { .. } => "CARD_DELETED",
            Self::ListCreated { .. } => "LIST_CREATED",
            Self::ListDeleted { .. } => "LIST_DELETED",
        }
    }
}

/// A change event stamped with its board and commit sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub board_id: BoardId,
    /// Strictly increasing per board, starting at 1
    pub sequence: u64,
    pub committed_at: DateTime<Utc>,
    pub event: ChangeEvent,
}
