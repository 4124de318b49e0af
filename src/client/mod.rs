pub mod store;
pub mod subscription;
pub mod transport;

pub use store::{BoardStore, RemoteOutcome};
pub use subscription::{BoardSubscription, SubscriptionEvent, SubscriptionState};
pub use transport::{BoardTransport, LocalTransport};
