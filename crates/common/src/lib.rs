//! Shared types for the channel inventory allocator.

pub mod locks;
pub mod types;

pub use locks::KeyedLocks;
pub use types::{AggregateId, ChannelId, ProductId};
