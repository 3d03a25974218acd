use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::message::Message;
use crate::project::Project;
use crate::queue::Queue;
use crate::{Error, Id};

/// Persistence seam over the `project`, `queue` and `message` collections.
///
/// Lookups return `Ok(None)` when nothing matches; only store-level
/// failures are errors. Inserting into a uniquely-indexed collection
/// reports a clash as [`Error::AlreadyExists`]. Deletes of absent
/// documents are not errors.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_project(&self, project: &Project) -> Result<(), Error>;
    async fn project_by_id(&self, id: &Id) -> Result<Option<Project>, Error>;
    async fn project_by_name(&self, name: &str) -> Result<Option<Project>, Error>;
    async fn projects(&self) -> Result<Vec<Project>, Error>;
    async fn delete_project(&self, id: &Id) -> Result<(), Error>;

    async fn insert_queue(&self, queue: &Queue) -> Result<(), Error>;
    async fn queue_by_id(&self, id: &Id) -> Result<Option<Queue>, Error>;
    async fn queue_by_name(&self, project_id: &Id, name: &str) -> Result<Option<Queue>, Error>;
    async fn queues_in_project(&self, project_id: &Id) -> Result<Vec<Queue>, Error>;
    async fn count_queues(&self, project_id: &Id) -> Result<u64, Error>;
    async fn delete_queue(&self, id: &Id) -> Result<(), Error>;

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), Error>;
    async fn message_by_id(&self, id: &Id) -> Result<Option<Message>, Error>;
    async fn count_messages(&self, project_id: &Id, queue_id: &Id) -> Result<u64, Error>;
    async fn delete_message(&self, id: &Id) -> Result<(), Error>;

    /// Delete every message of the queue, returning how many were removed.
    async fn clear_queue_messages(&self, project_id: &Id, queue_id: &Id) -> Result<u64, Error>;

    /// Atomically claim a single eligible message.
    ///
    /// Selects the newest (`created_at` descending) message of the queue
    /// whose lease is unset or expired relative to `horizon`, stamps
    /// `lease_expires_at = lease_until`, and returns the updated document.
    /// Selection and update must be one operation as observed by
    /// concurrent callers; implementations must not read then write.
    async fn acquire_message(
        &self,
        project_id: &Id,
        queue_id: &Id,
        horizon: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Message>, Error>;
}
