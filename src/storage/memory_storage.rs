use crate::{
    domain::{Board, BoardId, Card, CardId, List, ListId},
    error::{EntityKind, Result, SyncError},
    storage::Storage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    boards: HashMap<BoardId, Board>,
    lists: HashMap<ListId, List>,
    cards: HashMap<CardId, Card>,
}

/// In-memory storage backend, used by tests and single-process servers
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_board(&self, board: &Board) -> Result<()> {
        self.tables
            .write()
            .await
            .boards
            .insert(board.id, board.clone());
        Ok(())
    }

    async fn load_board(&self, id: &BoardId) -> Result<Board> {
        self.tables
            .read()
            .await
            .boards
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(EntityKind::Board, id))
    }

    async fn list_board_ids(&self) -> Result<Vec<BoardId>> {
        let mut ids: Vec<BoardId> = self.tables.read().await.boards.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_list(&self, list: &List) -> Result<()> {
        self.tables.write().await.lists.insert(list.id, list.clone());
        Ok(())
    }

    async fn load_list(&self, id: &ListId) -> Result<List> {
        self.tables
            .read()
            .await
            .lists
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(EntityKind::List, id))
    }

    async fn delete_list(&self, id: &ListId) -> Result<()> {
        self.tables
            .write()
            .await
            .lists
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::not_found(EntityKind::List, id))
    }

    async fn lists_for_board(&self, board_id: &BoardId) -> Result<Vec<List>> {
        Ok(self
            .tables
            .read()
            .await
            .lists
            .values()
            .filter(|l| &l.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn save_card(&self, card: &Card) -> Result<()> {
        self.tables.write().await.cards.insert(card.id, card.clone());
        Ok(())
    }

    async fn load_card(&self, id: &CardId) -> Result<Card> {
        self.tables
            .read()
            .await
            .cards
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(EntityKind::Card, id))
    }

    async fn delete_card(&self, id: &CardId) -> Result<()> {
        self.tables
            .write()
            .await
            .cards
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::not_found(EntityKind::Card, id))
    }

    async fn cards_for_list(&self, list_id: &ListId) -> Result<Vec<Card>> {
        Ok(self
            .tables
            .read()
            .await
            .cards
            .values()
            .filter(|c| &c.list_id == list_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProjectId;

    #[tokio::test]
    async fn test_save_and_load() {
        let storage = MemoryStorage::new();
        let board = Board::new(ProjectId::new(), "Board".to_string());
        let list = List::new(board.id, "Todo".to_string(), 1.0);
        let card = Card::new(list.id, "Card".to_string(), 1.0);

        storage.save_board(&board).await.unwrap();
        storage.save_list(&list).await.unwrap();
        storage.save_card(&card).await.unwrap();

        assert_eq!(storage.load_board(&board.id).await.unwrap(), board);
        assert_eq!(storage.lists_for_board(&board.id).await.unwrap(), vec![list.clone()]);
        assert_eq!(storage.cards_for_list(&list.id).await.unwrap(), vec![card.clone()]);

        let snapshot = storage.load_snapshot(&board.id, 4).await.unwrap();
        assert_eq!(snapshot.sequence, 4);
        assert_eq!(snapshot.card_ids(list.id), vec![card.id]);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let storage = MemoryStorage::new();

        let err = storage.load_card(&CardId::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(storage.delete_list(&ListId::new()).await.is_err());
        assert!(storage.load_snapshot(&BoardId::new(), 0).await.is_err());
    }
}
