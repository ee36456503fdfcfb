//! Durable topic pub/sub over Redis Streams.
//!
//! This crate provides:
//! - Connection lifecycle with bounded retry
//! - Size-bounded persistent publish
//! - Durable named queues (consumer groups) with prefetch-1 delivery
//! - Ack on success, requeue on handler failure, bounded redelivery with a
//!   dead-letter stream

pub mod bus;
pub mod error;

pub use bus::{derive_queue_name, EventBus, EventBusConfig, EventHandler};
pub use error::{EventBusError, EventBusResult};
