use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::project::Project;
use crate::queue::Queue;
use crate::store::Store;
use crate::{Error, Id};

/// Expiry applied when an enqueue request does not pick one.
pub const DEFAULT_MESSAGE_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Smallest accepted `expires_in`.
pub const MIN_MESSAGE_EXPIRY: Duration = Duration::from_secs(60);

/// Largest accepted `expires_in`.
pub const MAX_MESSAGE_EXPIRY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Maximum number of messages accepted in a single enqueue request.
pub const MAX_ENQUEUE_COUNT: usize = 100;

/// Option<DateTime<Utc>> does not round-trip through BSON datetimes on
/// its own; this bridges the two, mapping BSON null to `None`.
mod lease_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize, Serializer};

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(Into::into))
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => bson::DateTime::from_chrono(*value).serialize(serializer),
            None => None::<bson::DateTime>.serialize(serializer),
        }
    }
}

/// Opaque body plus delivery metadata; the unit of delivery. `project`
/// is denormalized onto the message so project-level cascades are a
/// single query rather than a join through `queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: Id,
    pub body: String,
    #[serde(rename = "queue")]
    pub queue_id: Id,
    #[serde(rename = "project")]
    pub project_id: Id,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    /// `None` while no consumer holds the message; a past instant counts
    /// as unleased too.
    #[serde(with = "lease_datetime", default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// A leased message as returned by the API.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: String,
    pub body: String,
    pub queue: String,
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub message_expires_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message for `queue`, expiring `expires_in` after `now`.
    /// Batches share one `now` so their relative order is unspecified.
    pub fn new(queue: &Queue, body: String, now: DateTime<Utc>, expires_in: Duration) -> Message {
        Message {
            id: Id::new(),
            body,
            queue_id: queue.id,
            project_id: queue.project_id,
            created_at: now,
            expires_at: now + expires_in,
            lease_expires_at: None,
        }
    }

    pub async fn load(store: &dyn Store, id: &str) -> Result<Message, Error> {
        let id = Id::parse_str(id).map_err(|_| Error::MessageNotFound)?;
        store
            .message_by_id(&id)
            .await?
            .ok_or(Error::MessageNotFound)
    }

    pub async fn save_batch(store: &dyn Store, messages: &[Message]) -> Result<(), Error> {
        store.insert_messages(messages).await
    }

    pub async fn destroy(&self, store: &dyn Store) -> Result<(), Error> {
        store.delete_message(&self.id).await
    }

    /// Whether the store is free to discard the message. Expired messages
    /// are still deliverable until the background purge removes them.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn info(&self, project: &Project, queue: &Queue) -> MessageInfo {
        MessageInfo {
            id: self.id.to_hex(),
            body: self.body.clone(),
            queue: queue.name.clone(),
            project: project.name.clone(),
            created_at: self.created_at,
            message_expires_at: self.expires_at,
            lease_expires_at: self.lease_expires_at,
        }
    }
}
