use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lease;
use crate::message::Message;
use crate::project::{Project, MAX_QUEUES_PER_PROJECT};
use crate::store::Store;
use crate::{Error, Id};

/// Container of messages within a project. `name` is unique within the
/// owning project; a queue cannot outlive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
    #[serde(rename = "project")]
    pub project_id: Id,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Queue details returned by the API. `size` is a live message count,
/// leased messages included.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub name: String,
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

impl Queue {
    /// Create a queue, or return the existing one carrying the name;
    /// the flag reports whether this call inserted the document. The
    /// per-project quota is checked first, without a lock.
    pub async fn create(
        store: &dyn Store,
        name: &str,
        project: &Project,
    ) -> Result<(Queue, bool), Error> {
        if store.count_queues(&project.id).await? >= MAX_QUEUES_PER_PROJECT {
            return Err(Error::QueueQuotaReached(project.name.clone()));
        }
        let queue = Queue {
            id: Id::new(),
            name: name.to_string(),
            project_id: project.id,
            created_at: Utc::now(),
        };
        match store.insert_queue(&queue).await {
            Ok(()) => Ok((queue, true)),
            Err(Error::AlreadyExists) => Ok((project.queue(store, name).await?, false)),
            Err(err) => Err(err),
        }
    }

    pub async fn info(&self, store: &dyn Store) -> Result<QueueInfo, Error> {
        let size = store.count_messages(&self.project_id, &self.id).await?;
        let project = store
            .project_by_id(&self.project_id)
            .await?
            .ok_or(Error::ProjectNotFound)?;
        Ok(QueueInfo {
            name: self.name.clone(),
            project: project.name,
            created_at: self.created_at,
            size,
        })
    }

    /// Delete every message currently in the queue, leased or not.
    pub async fn clear(&self, store: &dyn Store) -> Result<u64, Error> {
        store.clear_queue_messages(&self.project_id, &self.id).await
    }

    /// Delete the queue and everything in it: messages first, then the
    /// queue document itself.
    pub async fn destroy(&self, store: &dyn Store) -> Result<(), Error> {
        self.clear(store).await?;
        store.delete_queue(&self.id).await
    }

    /// Lease up to `count` eligible messages for `timeout`, newest first.
    pub async fn lease_messages(
        &self,
        store: &dyn Store,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>, Error> {
        lease::acquire_batch(store, &self.project_id, &self.id, count, timeout).await
    }

    /// Delete the given messages after verifying each one belongs to this
    /// queue. Ids are processed in order and the first failure aborts the
    /// rest; messages deleted before the failure stay deleted.
    pub async fn delete_messages(&self, store: &dyn Store, ids: &[String]) -> Result<(), Error> {
        for raw in ids {
            let message = Message::load(store, raw).await?;
            if message.queue_id != self.id {
                return Err(Error::ForeignMessage {
                    id: raw.clone(),
                    queue: self.name.clone(),
                });
            }
            message.destroy(store).await?;
        }
        Ok(())
    }
}
