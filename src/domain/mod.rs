pub mod board;
pub mod card;
pub mod change;
pub mod ids;
pub mod position;

pub use board::{Board, BoardSnapshot, List, ListSnapshot};
pub use card::Card;
pub use change::{ChangeEvent, ChangeRecord};
pub use ids::{BoardId, CardId, ListId, ProjectId};
pub use position::{Placement, PositionAllocator, Positioned};
