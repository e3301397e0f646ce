//! Broadcasting of publish progress for real-time event streaming.

pub mod publish_events;

pub use publish_events::{PublishEvent, PublishEventBroadcaster, PublishEventKind};
