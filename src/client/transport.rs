use crate::{
    domain::{BoardId, BoardSnapshot, Card, CardId, ChangeRecord, List, ListId},
    error::{Result, SyncError},
    protocol::MoveCardRequest,
    server::Reconciler,
};
use async_trait::async_trait;
use std::{future::Future, sync::Arc};
use tokio::{sync::broadcast, task::JoinError};

/// How a board store reaches the reconciler and its change feed.
///
/// An HTTP client would map the error statuses of the API handlers back onto
/// `SyncError` variants; [`LocalTransport`] calls the reconciler directly.
#[async_trait]
pub trait BoardTransport: Send + Sync {
    async fn fetch_board(&self, board_id: BoardId) -> Result<BoardSnapshot>;

    /// `PATCH /cards/{id}/move`
    async fn move_card(&self, card_id: CardId, request: MoveCardRequest) -> Result<Card>;

    /// `PATCH /boards/{id}/lists/order`; answers with the board's lists in
    /// their committed order
    async fn reorder_lists(&self, board_id: BoardId, list_ids: Vec<ListId>) -> Result<Vec<List>>;

    /// Opens the board's realtime channel
    async fn subscribe(&self, board_id: BoardId) -> Result<broadcast::Receiver<ChangeRecord>>;
}

/// In-process transport over a shared reconciler.
///
/// Each mutation runs on its own task, so a caller that stops waiting (a
/// client timeout) does not cancel a commit the server already started.
#[derive(Clone)]
pub struct LocalTransport {
    reconciler: Arc<Reconciler>,
}

impl LocalTransport {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }
}

async fn dispatch<R, F>(call: F) -> Result<R>
where
    F: Future<Output = Result<R>> + Send + 'static,
    R: Send + 'static,
{
    tokio::spawn(call).await.map_err(task_failed)?
}

fn task_failed(err: JoinError) -> SyncError {
    SyncError::TransportError(anyhow::Error::new(err).context("reconciler task did not complete"))
}

#[async_trait]
impl BoardTransport for LocalTransport {
    async fn fetch_board(&self, board_id: BoardId) -> Result<BoardSnapshot> {
        self.reconciler.snapshot(board_id).await
    }

    async fn move_card(&self, card_id: CardId, request: MoveCardRequest) -> Result<Card> {
        let reconciler = self.reconciler.clone();
        dispatch(async move { reconciler.move_card(card_id, &request).await }).await
    }

    async fn reorder_lists(&self, board_id: BoardId, list_ids: Vec<ListId>) -> Result<Vec<List>> {
        let reconciler = self.reconciler.clone();
        dispatch(async move { reconciler.reorder_lists(board_id, &list_ids).await }).await
    }

    async fn subscribe(&self, board_id: BoardId) -> Result<broadcast::Receiver<ChangeRecord>> {
        // Fail early for unknown boards rather than handing out a dead channel
        self.reconciler.storage().load_board(&board_id).await?;
        Ok(self.reconciler.broadcaster().subscribe(board_id).await)
    }
}
