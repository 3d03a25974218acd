//! In-memory store, used by the test suites and as a development
//! backend when no MongoDB deployment is at hand.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::message::Message;
use crate::project::Project;
use crate::queue::Queue;
use crate::store::Store;
use crate::{Error, Id};

#[derive(Default)]
struct Collections {
    projects: HashMap<Id, Project>,
    queues: HashMap<Id, Queue>,
    messages: HashMap<Id, Message>,
}

/// All three collections behind one mutex. Every trait method takes the
/// lock exactly once, which makes each operation atomic with respect to
/// concurrent callers just like its MongoDB counterpart.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections.lock().expect("store mutex poisoned")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_project(&self, project: &Project) -> Result<(), Error> {
        let mut state = self.lock();
        if state.projects.values().any(|p| p.name == project.name) {
            return Err(Error::AlreadyExists);
        }
        state.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn project_by_id(&self, id: &Id) -> Result<Option<Project>, Error> {
        Ok(self.lock().projects.get(id).cloned())
    }

    async fn project_by_name(&self, name: &str) -> Result<Option<Project>, Error> {
        Ok(self
            .lock()
            .projects
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn projects(&self) -> Result<Vec<Project>, Error> {
        Ok(self.lock().projects.values().cloned().collect())
    }

    async fn delete_project(&self, id: &Id) -> Result<(), Error> {
        self.lock().projects.remove(id);
        Ok(())
    }

    async fn insert_queue(&self, queue: &Queue) -> Result<(), Error> {
        let mut state = self.lock();
        if state
            .queues
            .values()
            .any(|q| q.project_id == queue.project_id && q.name == queue.name)
        {
            return Err(Error::AlreadyExists);
        }
        state.queues.insert(queue.id, queue.clone());
        Ok(())
    }

    async fn queue_by_id(&self, id: &Id) -> Result<Option<Queue>, Error> {
        Ok(self.lock().queues.get(id).cloned())
    }

    async fn queue_by_name(&self, project_id: &Id, name: &str) -> Result<Option<Queue>, Error> {
        Ok(self
            .lock()
            .queues
            .values()
            .find(|q| q.project_id == *project_id && q.name == name)
            .cloned())
    }

    async fn queues_in_project(&self, project_id: &Id) -> Result<Vec<Queue>, Error> {
        Ok(self
            .lock()
            .queues
            .values()
            .filter(|q| q.project_id == *project_id)
            .cloned()
            .collect())
    }

    async fn count_queues(&self, project_id: &Id) -> Result<u64, Error> {
        Ok(self
            .lock()
            .queues
            .values()
            .filter(|q| q.project_id == *project_id)
            .count() as u64)
    }

    async fn delete_queue(&self, id: &Id) -> Result<(), Error> {
        self.lock().queues.remove(id);
        Ok(())
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), Error> {
        let mut state = self.lock();
        for message in messages {
            state.messages.insert(message.id, message.clone());
        }
        Ok(())
    }

    async fn message_by_id(&self, id: &Id) -> Result<Option<Message>, Error> {
        Ok(self.lock().messages.get(id).cloned())
    }

    async fn count_messages(&self, project_id: &Id, queue_id: &Id) -> Result<u64, Error> {
        Ok(self
            .lock()
            .messages
            .values()
            .filter(|m| m.project_id == *project_id && m.queue_id == *queue_id)
            .count() as u64)
    }

    async fn delete_message(&self, id: &Id) -> Result<(), Error> {
        self.lock().messages.remove(id);
        Ok(())
    }

    async fn clear_queue_messages(&self, project_id: &Id, queue_id: &Id) -> Result<u64, Error> {
        let mut state = self.lock();
        let before = state.messages.len();
        state
            .messages
            .retain(|_, m| !(m.project_id == *project_id && m.queue_id == *queue_id));
        Ok((before - state.messages.len()) as u64)
    }

    async fn acquire_message(
        &self,
        project_id: &Id,
        queue_id: &Id,
        horizon: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Message>, Error> {
        let mut state = self.lock();
        let claimed = state
            .messages
            .values()
            .filter(|m| {
                m.project_id == *project_id
                    && m.queue_id == *queue_id
                    && m.lease_expires_at.map_or(true, |at| at < horizon)
            })
            .max_by_key(|m| m.created_at)
            .map(|m| m.id);
        let Some(id) = claimed else {
            return Ok(None);
        };
        let message = state
            .messages
            .get_mut(&id)
            .expect("claimed message vanished under the lock");
        message.lease_expires_at = Some(lease_until);
        Ok(Some(message.clone()))
    }
}
