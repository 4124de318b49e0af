use crate::domain::{
    ids::{CardId, ListId},
    position::Positioned,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A card inside a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub list_id: ListId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub position: f64,
    /// Bumped on every committed move
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Creates a new card at the given position
    pub fn new(list_id: ListId, title: String, position: f64) -> Self {
        let now = Utc::now();
        Self {
            id: CardId::new(),
            list_id,
            title,
            description: None,
            position,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Records a committed move to `list_id` at `position`
    pub fn move_to(&mut self, list_id: ListId, position: f64) {
        self.list_id = list_id;
        self.position = position;
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// True when the card already sits at the given place
    pub fn is_at(&self, list_id: ListId, position: f64) -> bool {
        self.list_id == list_id && self.position == position
    }
}

impl Positioned for Card {
    type Id = CardId;

    fn id(&self) -> CardId {
        self.id
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn set_position(&mut self, position: f64) {
        self.position = position;
    }
}
