//! Hot-reload protocol.
//!
//! A mutation that touched at least one row publishes one notification on the reload
//! channel. Every subscribed worker answers any notification with a full re-read of its
//! tenants, so the channel only ever means "re-read"; the store stays the source of
//! truth. Delivery is at-most-once with no replay: a worker that is down during a
//! publish picks up the change on its next startup load.

pub mod bus;
pub mod notification;
pub mod publisher;
pub mod subscriber;

pub use bus::{ChannelError, InMemoryBus, ReloadChannel};
pub use notification::ReloadNotification;
pub use publisher::{PublishOutcome, ReloadPublisher};
pub use subscriber::{ReloadSubscriber, SubscriberHandle, SubscriberState};
