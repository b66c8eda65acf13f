//! Domain event envelope and publish/subscribe transport.
//!
//! The allocator publishes every domain event (allocation changes, saga
//! outcomes, channel lifecycle, webhook results) through an
//! [`EventTransport`]. The core never assumes a particular broker: tests use
//! [`InMemoryEventTransport`], production can use [`PostgresEventTransport`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod transport;

pub use error::{EventBusError, Result};
pub use event::{DomainEvent, EventEnvelope, EventEnvelopeBuilder, EventId};
pub use memory::InMemoryEventTransport;
pub use postgres::PostgresEventTransport;
pub use query::EventQuery;
pub use transport::{EventStream, EventSubscription, EventTransport, EventTransportExt};
