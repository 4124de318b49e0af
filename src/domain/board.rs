use crate::domain::{
    card::Card,
    ids::{BoardId, CardId, ListId, ProjectId},
    position::{sort_siblings, Positioned},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Board metadata. Its lists and cards are persisted separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: BoardId,
    pub project_id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Board {
    pub fn new(project_id: ProjectId, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: BoardId::new(),
            project_id,
            name,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A list (column) on a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: ListId,
    pub board_id: BoardId,
    pub name: String,
    pub position: f64,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl List {
    pub fn new(board_id: BoardId, name: String, position: f64) -> Self {
        let now = Utc::now();
        Self {
            id: ListId::new(),
            board_id,
            name,
            position,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a committed move within the board
    pub fn move_to(&mut self, position: f64) {
        self.position = position;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

impl Positioned for List {
    type Id = ListId;

    fn id(&self) -> ListId {
        self.id
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn set_position(&mut self, position: f64) {
        self.position = position;
    }
}

/// A list together with its cards, ordered by position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub list: List,
    pub cards: Vec<Card>,
}

impl Positioned for ListSnapshot {
    type Id = ListId;

    fn id(&self) -> ListId {
        self.list.id
    }

    fn position(&self) -> f64 {
        self.list.position
    }

    fn set_position(&mut self, position: f64) {
        self.list.position = position;
    }
}

/// The full board graph as seen at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub board: Board,
    pub lists: Vec<ListSnapshot>,
    /// Last broadcast sequence number committed before the snapshot was read
    pub sequence: u64,
}

impl BoardSnapshot {
    /// Assembles a snapshot from flat lists and cards. Cards whose list is
    /// not on the board are ignored.
    pub fn assemble(board: Board, lists: Vec<List>, cards: Vec<Card>, sequence: u64) -> Self {
        let mut lists: Vec<ListSnapshot> = lists
            .into_iter()
            .filter(|list| list.board_id == board.id)
            .map(|list| ListSnapshot {
                list,
                cards: Vec::new(),
            })
            .collect();

        for card in cards {
            if let Some(entry) = lists.iter_mut().find(|l| l.list.id == card.list_id) {
                entry.cards.push(card);
            }
        }

        sort_siblings(&mut lists);
        for entry in &mut lists {
            sort_siblings(&mut entry.cards);
        }

        Self {
            board,
            lists,
            sequence,
        }
    }

    pub fn list_ids(&self) -> Vec<ListId> {
        self.lists.iter().map(|l| l.list.id).collect()
    }

    pub fn list_index(&self, id: ListId) -> Option<usize> {
        self.lists.iter().position(|l| l.list.id == id)
    }

    pub fn list(&self, id: ListId) -> Option<&ListSnapshot> {
        self.lists.iter().find(|l| l.list.id == id)
    }

    pub fn list_mut(&mut self, id: ListId) -> Option<&mut ListSnapshot> {
        self.lists.iter_mut().find(|l| l.list.id == id)
    }

    pub fn card_ids(&self, list_id: ListId) -> Vec<CardId> {
        self.list(list_id)
            .map(|l| l.cards.iter().map(|c| c.id).collect())
            .unwrap_or_default()
    }

    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.lists
            .iter()
            .flat_map(|l| l.cards.iter())
            .find(|c| c.id == id)
    }

    /// Removes a card from whichever list holds it
    pub fn remove_card(&mut self, id: CardId) -> Option<Card> {
        for entry in &mut self.lists {
            if let Some(index) = entry.cards.iter().position(|c| c.id == id) {
                return Some(entry.cards.remove(index));
            }
        }
        None
    }

    /// Inserts or replaces a card, keeping its target list ordered.
    /// Returns false (and leaves the snapshot untouched) if the card's list
    /// is not on this board.
    pub fn upsert_card(&mut self, card: Card) -> bool {
        if self.list(card.list_id).is_none() {
            return false;
        }
        self.remove_card(card.id);
        if let Some(entry) = self.list_mut(card.list_id) {
            entry.cards.push(card);
            sort_siblings(&mut entry.cards);
        }
        true
    }

    /// Sets a card's position in place without touching its version
    pub fn reposition_card(&mut self, id: CardId, list_id: ListId, position: f64) -> bool {
        match self.card(id).cloned() {
            Some(mut card) => {
                card.list_id = list_id;
                card.position = position;
                self.upsert_card(card)
            }
            None => false,
        }
    }

    /// Inserts or replaces a list's metadata, keeping existing cards
    pub fn upsert_list(&mut self, list: List) {
        match self.list_mut(list.id) {
            Some(entry) => entry.list = list,
            None => self.lists.push(ListSnapshot {
                list,
                cards: Vec::new(),
            }),
        }
        sort_siblings(&mut self.lists);
    }

    pub fn remove_list(&mut self, id: ListId) -> Option<ListSnapshot> {
        let index = self.list_index(id)?;
        Some(self.lists.remove(index))
    }

    pub fn card_count(&self) -> usize {
        self.lists.iter().map(|l| l.cards.len()).sum()
    }
}
