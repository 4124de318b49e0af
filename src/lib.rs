//! # Hlavi Board Sync
//!
//! Ordering and synchronisation of lists and cards on Hlavi kanban boards.
//!
//! - [`domain::position`] hands out fractional positions between neighbours
//!   and renumbers a sibling set once its gaps run out of precision.
//! - [`client::BoardStore`] applies drag-and-drop moves optimistically and
//!   rolls them back when the server disagrees.
//! - [`server::Reconciler`] validates proposed positions against persisted
//!   state under a per-parent lock and commits the final order.
//! - [`server::ChangeBroadcaster`] fans committed changes out to every
//!   subscriber of a board, in commit order.

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use client::{BoardStore, BoardSubscription, BoardTransport, LocalTransport};
pub use config::SyncConfig;
pub use domain::{
    Board, BoardId, BoardSnapshot, Card, CardId, ChangeEvent, ChangeRecord, List, ListId,
    PositionAllocator, ProjectId,
};
pub use error::{Result, SyncError};
pub use protocol::{MoveCardRequest, MoveListRequest};
pub use server::{ChangeBroadcaster, Reconciler};
pub use storage::{MemoryStorage, Storage};
