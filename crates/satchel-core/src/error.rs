use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("project not found")]
    ProjectNotFound,

    #[error("queue not found")]
    QueueNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("message with id {id} does not belong to queue '{queue}'")]
    ForeignMessage { id: String, queue: String },

    #[error("maximum number of queues reached for project '{0}'")]
    QueueQuotaReached(String),

    #[error("document already exists")]
    AlreadyExists,

    #[error("store error: {0}")]
    Store(String),
}
