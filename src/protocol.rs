//! Request and response types exchanged between the board store and the
//! reconciler. Field names are camelCase on the wire.

use crate::{
    domain::{BoardId, CardId, ListId},
    error::{Result, SyncError},
};
use serde::{Deserialize, Serialize};

/// Body of `PATCH /cards/{id}/move`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCardRequest {
    pub target_list_id: ListId,
    pub new_position: f64,
    /// Card version the client based the move on; a mismatch is a conflict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    /// Card the client placed this one directly after
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<CardId>,
    /// Card the client placed this one directly before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_id: Option<CardId>,
}

impl MoveCardRequest {
    pub fn new(target_list_id: ListId, new_position: f64) -> Self {
        Self {
            target_list_id,
            new_position,
            expected_version: None,
            after_id: None,
            before_id: None,
        }
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Names both neighbours the client saw around the drop point. With
    /// either set, `None` on the other side means the end of the list, and
    /// the server rejects the move if the stored neighbours differ.
    pub fn between(mut self, after_id: Option<CardId>, before_id: Option<CardId>) -> Self {
        self.after_id = after_id;
        self.before_id = before_id;
        self
    }
}

/// Moves a single list within its board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveListRequest {
    pub board_id: BoardId,
    pub new_position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<ListId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_id: Option<ListId>,
}

impl MoveListRequest {
    pub fn new(board_id: BoardId, new_position: f64) -> Self {
        Self {
            board_id,
            new_position,
            expected_version: None,
            after_id: None,
            before_id: None,
        }
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn between(mut self, after_id: Option<ListId>, before_id: Option<ListId>) -> Self {
        self.after_id = after_id;
        self.before_id = before_id;
        self
    }
}

/// Body of `PATCH /boards/{id}/lists/order`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrderRequest {
    pub list_ids: Vec<ListId>,
}

/// The entity a move applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    Card(CardId),
    List(ListId),
}

/// A parent whose children share one ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ParentRef {
    /// Lists are ordered within a board
    Board(BoardId),
    /// Cards are ordered within a list
    List(ListId),
}

/// A move request for either kind of entity
#[derive(Debug, Clone, PartialEq)]
pub enum MoveRequest {
    Card {
        card_id: CardId,
        request: MoveCardRequest,
    },
    List {
        list_id: ListId,
        request: MoveListRequest,
    },
}

impl MoveRequest {
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Card { card_id, .. } => EntityRef::Card(*card_id),
            Self::List { list_id, .. } => EntityRef::List(*list_id),
        }
    }

    pub fn target_parent(&self) -> ParentRef {
        match self {
            Self::Card { request, .. } => ParentRef::List(request.target_list_id),
            Self::List { request, .. } => ParentRef::Board(request.board_id),
        }
    }

    pub fn requested_position(&self) -> f64 {
        match self {
            Self::Card { request, .. } => request.new_position,
            Self::List { request, .. } => request.new_position,
        }
    }
}

/// Outcome of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedPosition {
    pub entity: EntityRef,
    pub parent: ParentRef,
    pub position: f64,
    pub version: u64,
    /// False when the request was a no-op repeat of an earlier move
    pub changed: bool,
}

/// Rejects positions that cannot take part in the ordering
pub fn validate_position(position: f64) -> Result<()> {
    if position.is_finite() && position > 0.0 {
        Ok(())
    } else {
        Err(SyncError::Validation(format!(
            "position must be a positive finite number, got {}",
            position
        )))
    }
}
