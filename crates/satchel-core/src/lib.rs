//! Domain model and storage seam for satchel, a multi-tenant HTTP
//! message queue: projects own queues, queues hold opaque messages,
//! consumers lease messages for a bounded visibility window and delete
//! them once processed.

pub mod error;
pub mod lease;
pub mod memory;
pub mod message;
pub mod project;
pub mod queue;
pub mod store;

pub use error::Error;
pub use lease::{DEFAULT_LEASE_TIMEOUT, MAX_LEASE_COUNT, MAX_LEASE_TIMEOUT, MIN_LEASE_TIMEOUT};
pub use memory::MemoryStore;
pub use message::{
    Message, MessageInfo, DEFAULT_MESSAGE_EXPIRY, MAX_ENQUEUE_COUNT, MAX_MESSAGE_EXPIRY,
    MIN_MESSAGE_EXPIRY,
};
pub use project::{Project, ProjectInfo, MAX_QUEUES_PER_PROJECT};
pub use queue::{Queue, QueueInfo};
pub use store::Store;

/// Identifier assigned to every persisted document at creation.
pub type Id = bson::oid::ObjectId;
