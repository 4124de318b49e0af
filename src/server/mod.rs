pub mod api;
pub mod broadcaster;
pub mod locks;
pub mod reconciler;

pub use api::{patch_card_move, patch_list_order, ApiResponse};
pub use broadcaster::ChangeBroadcaster;
pub use reconciler::Reconciler;
