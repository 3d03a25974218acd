use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::Queue;
use crate::store::Store;
use crate::{Error, Id};

/// Maximum number of queues a single project can hold. The check is
/// unlocked, so concurrent creators may overshoot by the number of racers.
pub const MAX_QUEUES_PER_PROJECT: u64 = 100_000;

/// Top-level namespace owning queues. `name` is unique across all
/// projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Project details returned by the API.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub name: String,
    pub queue_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Create a project, or return the existing one carrying the name;
    /// the flag reports whether this call inserted the document. The
    /// unique index on `name` arbitrates concurrent creators.
    pub async fn create(store: &dyn Store, name: &str) -> Result<(Project, bool), Error> {
        let project = Project {
            id: Id::new(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        match store.insert_project(&project).await {
            Ok(()) => Ok((project, true)),
            Err(Error::AlreadyExists) => Ok((Self::load(store, name).await?, false)),
            Err(err) => Err(err),
        }
    }

    pub async fn load(store: &dyn Store, name: &str) -> Result<Project, Error> {
        store
            .project_by_name(name)
            .await?
            .ok_or(Error::ProjectNotFound)
    }

    pub async fn list(store: &dyn Store) -> Result<Vec<Project>, Error> {
        store.projects().await
    }

    pub async fn info(&self, store: &dyn Store) -> Result<ProjectInfo, Error> {
        let queue_count = store.count_queues(&self.id).await?;
        Ok(ProjectInfo {
            name: self.name.clone(),
            queue_count,
            created_at: self.created_at,
        })
    }

    pub async fn queues(&self, store: &dyn Store) -> Result<Vec<Queue>, Error> {
        store.queues_in_project(&self.id).await
    }

    pub async fn queue(&self, store: &dyn Store, name: &str) -> Result<Queue, Error> {
        store
            .queue_by_name(&self.id, name)
            .await?
            .ok_or(Error::QueueNotFound)
    }

    /// Delete the project and everything it contains. Each queue is
    /// destroyed in turn (messages first); the first store error aborts
    /// the cascade, leaving a partial deletion a retry can finish.
    pub async fn destroy(&self, store: &dyn Store) -> Result<(), Error> {
        for queue in self.queues(store).await? {
            queue.destroy(store).await?;
        }
        store.delete_project(&self.id).await
    }
}
