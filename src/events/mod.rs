pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{
    BroadcasterStats, ChannelSubscriber, EventBroadcaster, EventSubscriber, FnSubscriber,
    SubscriberError, SubscriptionId,
};
pub use types::{BatchScope, DeployEvent};
