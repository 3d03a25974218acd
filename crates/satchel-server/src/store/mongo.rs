use async_trait::async_trait;
use bson::{doc, Bson};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::options::{
    ClientOptions, Credential, FindOneAndUpdateOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Client, Collection, Database, IndexModel};

use satchel_core::{Error, Id, Message, Project, Queue, Store};

use crate::config::Config;

const PROJECT_COLLECTION: &str = "project";
const QUEUE_COLLECTION: &str = "queue";
const MESSAGE_COLLECTION: &str = "message";

/// Store adapter over a pooled MongoDB client. Clones share the pool, so
/// one instance is created at startup and handed around.
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect with the server settings and make sure the collections
    /// carry the indices the domain operations depend on.
    pub async fn connect(config: &Config) -> Result<MongoStore, Error> {
        let mut options = ClientOptions::parse(format!("mongodb://{}", config.mongo_host))
            .await
            .map_err(store_err)?;
        if !config.mongo_user.is_empty() {
            options.credential = Some(
                Credential::builder()
                    .username(config.mongo_user.clone())
                    .password(config.mongo_password.clone())
                    .build(),
            );
        }
        let client = Client::with_options(options).map_err(store_err)?;
        let store = MongoStore {
            database: client.database(&config.environment),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    fn project_col(&self) -> Collection<Project> {
        self.database.collection(PROJECT_COLLECTION)
    }

    fn queue_col(&self) -> Collection<Queue> {
        self.database.collection(QUEUE_COLLECTION)
    }

    fn message_col(&self) -> Collection<Message> {
        self.database.collection(MESSAGE_COLLECTION)
    }

    /// The unique indices arbitrate name clashes, the compound message
    /// index backs the acquisition scan, `created_at` backs its sort,
    /// and the TTL index purges expired messages in the background.
    async fn ensure_indexes(&self) -> Result<(), Error> {
        let unique = IndexOptions::builder().unique(true).build();
        self.project_col()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(unique.clone())
                    .build(),
            )
            .await
            .map_err(store_err)?;
        self.queue_col()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "project": 1, "name": 1 })
                    .options(unique)
                    .build(),
            )
            .await
            .map_err(store_err)?;
        self.message_col()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "project": 1, "queue": 1, "lease_expires_at": 1 })
                    .build(),
            )
            .await
            .map_err(store_err)?;
        self.message_col()
            .create_index(IndexModel::builder().keys(doc! { "created_at": 1 }).build())
            .await
            .map_err(store_err)?;
        self.message_col()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "expires_at": 1 })
                    .options(
                        IndexOptions::builder()
                            .expire_after(Some(std::time::Duration::from_secs(0)))
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(err: mongodb::error::Error) -> Error {
    Error::Store(err.to_string())
}

/// E11000: a unique index rejected the document.
fn insert_err(err: mongodb::error::Error) -> Error {
    use mongodb::error::{ErrorKind, WriteFailure};
    if let ErrorKind::Write(WriteFailure::WriteError(ref write)) = *err.kind {
        if write.code == 11000 {
            return Error::AlreadyExists;
        }
    }
    store_err(err)
}

fn at(value: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(value))
}

#[async_trait]
impl Store for MongoStore {
    async fn insert_project(&self, project: &Project) -> Result<(), Error> {
        self.project_col()
            .insert_one(project)
            .await
            .map(|_| ())
            .map_err(insert_err)
    }

    async fn project_by_id(&self, id: &Id) -> Result<Option<Project>, Error> {
        self.project_col()
            .find_one(doc! { "_id": *id })
            .await
            .map_err(store_err)
    }

    async fn project_by_name(&self, name: &str) -> Result<Option<Project>, Error> {
        self.project_col()
            .find_one(doc! { "name": name })
            .await
            .map_err(store_err)
    }

    async fn projects(&self) -> Result<Vec<Project>, Error> {
        let cursor = self.project_col().find(doc! {}).await.map_err(store_err)?;
        cursor.try_collect().await.map_err(store_err)
    }

    async fn delete_project(&self, id: &Id) -> Result<(), Error> {
        self.project_col()
            .delete_one(doc! { "_id": *id })
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn insert_queue(&self, queue: &Queue) -> Result<(), Error> {
        self.queue_col()
            .insert_one(queue)
            .await
            .map(|_| ())
            .map_err(insert_err)
    }

    async fn queue_by_id(&self, id: &Id) -> Result<Option<Queue>, Error> {
        self.queue_col()
            .find_one(doc! { "_id": *id })
            .await
            .map_err(store_err)
    }

    async fn queue_by_name(&self, project_id: &Id, name: &str) -> Result<Option<Queue>, Error> {
        self.queue_col()
            .find_one(doc! { "project": *project_id, "name": name })
            .await
            .map_err(store_err)
    }

    async fn queues_in_project(&self, project_id: &Id) -> Result<Vec<Queue>, Error> {
        let cursor = self
            .queue_col()
            .find(doc! { "project": *project_id })
            .await
            .map_err(store_err)?;
        cursor.try_collect().await.map_err(store_err)
    }

    async fn count_queues(&self, project_id: &Id) -> Result<u64, Error> {
        self.queue_col()
            .count_documents(doc! { "project": *project_id })
            .await
            .map_err(store_err)
    }

    async fn delete_queue(&self, id: &Id) -> Result<(), Error> {
        self.queue_col()
            .delete_one(doc! { "_id": *id })
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), Error> {
        if messages.is_empty() {
            return Ok(());
        }
        self.message_col()
            .insert_many(messages)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn message_by_id(&self, id: &Id) -> Result<Option<Message>, Error> {
        self.message_col()
            .find_one(doc! { "_id": *id })
            .await
            .map_err(store_err)
    }

    async fn count_messages(&self, project_id: &Id, queue_id: &Id) -> Result<u64, Error> {
        self.message_col()
            .count_documents(doc! { "project": *project_id, "queue": *queue_id })
            .await
            .map_err(store_err)
    }

    async fn delete_message(&self, id: &Id) -> Result<(), Error> {
        self.message_col()
            .delete_one(doc! { "_id": *id })
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn clear_queue_messages(&self, project_id: &Id, queue_id: &Id) -> Result<u64, Error> {
        let result = self
            .message_col()
            .delete_many(doc! { "project": *project_id, "queue": *queue_id })
            .await
            .map_err(store_err)?;
        Ok(result.deleted_count)
    }

    async fn acquire_message(
        &self,
        project_id: &Id,
        queue_id: &Id,
        horizon: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Message>, Error> {
        // Selection, sort and update ride one findAndModify round-trip;
        // the server applies them atomically per document.
        self.message_col()
            .find_one_and_update(
                doc! {
                    "project": *project_id,
                    "queue": *queue_id,
                    "$or": [
                        { "lease_expires_at": Bson::Null },
                        { "lease_expires_at": { "$lt": at(horizon) } },
                    ],
                },
                doc! { "$set": { "lease_expires_at": at(lease_until) } },
            )
            .with_options(
                FindOneAndUpdateOptions::builder()
                    .sort(doc! { "created_at": -1 })
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(store_err)
    }
}
