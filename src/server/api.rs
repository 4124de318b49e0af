//! HTTP-shaped entry points for the two ordering endpoints.
//!
//! Handlers take the raw path id and JSON body and return a status code with
//! an optional JSON body, so any web framework can mount them:
//!
//! - `PATCH /boards/{id}/lists/order` → [`patch_list_order`]
//! - `PATCH /cards/{id}/move` → [`patch_card_move`]

use crate::{
    domain::{BoardId, Card, CardId},
    error::{Result, SyncError},
    protocol::{ListOrderRequest, MoveCardRequest},
    server::reconciler::Reconciler,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
        }
    }

    pub fn ok(body: &impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: 200,
                body: Some(body),
            },
            Err(err) => Self::from_error(&SyncError::from(err)),
        }
    }

    pub fn from_error(err: &SyncError) -> Self {
        Self {
            status: err.status_code(),
            body: Some(json!({
                "error": err.kind(),
                "message": err.to_string(),
            })),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|err| SyncError::Validation(format!("malformed request body: {}", err)))
}

async fn reorder(reconciler: &Reconciler, board_id: &str, body: &str) -> Result<()> {
    let board_id = BoardId::from_str(board_id)?;
    let request: ListOrderRequest = parse_body(body)?;
    reconciler.reorder_lists(board_id, &request.list_ids).await?;
    Ok(())
}

async fn move_card(reconciler: &Reconciler, card_id: &str, body: &str) -> Result<Card> {
    let card_id = CardId::from_str(card_id)?;
    let request: MoveCardRequest = parse_body(body)?;
    reconciler.move_card(card_id, &request).await
}

/// `PATCH /boards/{id}/lists/order` with body `{"listIds": [...]}`.
/// Answers 204 on success, or 409 when the ids are not the board's current
/// set of lists.
pub async fn patch_list_order(reconciler: &Reconciler, board_id: &str, body: &str) -> ApiResponse {
    match reorder(reconciler, board_id, body).await {
        Ok(_) => ApiResponse::no_content(),
        Err(err) => {
            tracing::debug!(board = board_id, error = %err, "list order rejected");
            ApiResponse::from_error(&err)
        }
    }
}

/// `PATCH /cards/{id}/move` with body `{"targetListId": ..., "newPosition": ...}`.
/// Answers 200 with the committed card, or 409 when the move is stale.
pub async fn patch_card_move(reconciler: &Reconciler, card_id: &str, body: &str) -> ApiResponse {
    match move_card(reconciler, card_id, body).await {
        Ok(card) => ApiResponse::ok(&card),
        Err(err) => {
            tracing::debug!(card = card_id, error = %err, "card move rejected");
            ApiResponse::from_error(&err)
        }
    }
}
