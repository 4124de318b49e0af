use crate::{
    domain::{Board, BoardId, BoardSnapshot, Card, CardId, List, ListId},
    error::Result,
};
use async_trait::async_trait;

#[cfg(feature = "file-storage")]
pub mod file_storage;
pub mod memory_storage;

#[cfg(feature = "file-storage")]
pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;

/// Storage trait for persisting boards, lists and cards.
///
/// Implementations only need per-record atomicity; the reconciler serialises
/// read-modify-write cycles per parent itself.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initializes the storage backend
    async fn initialize(&self) -> Result<()>;

    async fn save_board(&self, board: &Board) -> Result<()>;

    /// Loads a board, failing with NotFound if it does not exist
    async fn load_board(&self, id: &BoardId) -> Result<Board>;

    async fn list_board_ids(&self) -> Result<Vec<BoardId>>;

    async fn save_list(&self, list: &List) -> Result<()>;

    async fn load_list(&self, id: &ListId) -> Result<List>;

    async fn delete_list(&self, id: &ListId) -> Result<()>;

    /// All lists of a board, in no particular order
    async fn lists_for_board(&self, board_id: &BoardId) -> Result<Vec<List>>;

    async fn save_card(&self, card: &Card) -> Result<()>;

    async fn load_card(&self, id: &CardId) -> Result<Card>;

    async fn delete_card(&self, id: &CardId) -> Result<()>;

    /// All cards of a list, in no particular order
    async fn cards_for_list(&self, list_id: &ListId) -> Result<Vec<Card>>;

    /// Loads the whole board graph
    async fn load_snapshot(&self, board_id: &BoardId, sequence: u64) -> Result<BoardSnapshot> {
        let board = self.load_board(board_id).await?;
        let lists = self.lists_for_board(board_id).await?;

        let mut cards = Vec::new();
        for list in &lists {
            cards.extend(self.cards_for_list(&list.id).await?);
        }

        Ok(BoardSnapshot::assemble(board, lists, cards, sequence))
    }
}
