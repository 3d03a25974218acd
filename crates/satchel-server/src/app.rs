use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Form, Path, Query, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use utoipa::OpenApi;

use satchel_core::{
    Error, Message, MessageInfo, Project, ProjectInfo, Queue, QueueInfo, Store,
    DEFAULT_LEASE_TIMEOUT, DEFAULT_MESSAGE_EXPIRY, MAX_ENQUEUE_COUNT, MAX_LEASE_COUNT,
    MAX_LEASE_TIMEOUT, MAX_MESSAGE_EXPIRY, MIN_LEASE_TIMEOUT, MIN_MESSAGE_EXPIRY,
};

use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "satchel",
        description = "Multi-tenant message queue: projects own queues, queues hold leasable messages."
    ),
    paths(
        list_projects,
        create_project,
        show_project,
        delete_project,
        create_queue,
        list_queues,
        show_queue,
        delete_queue,
        clear_queue,
        enqueue_messages,
        lease_messages,
        delete_messages
    ),
    components(schemas(ProjectInfo, QueueInfo, MessageInfo))
)]
struct ApiDoc;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .route("/projects", get(list_projects))
        .route(
            "/projects/{project_name}",
            post(create_project).get(show_project).delete(delete_project),
        )
        .route("/projects/{project_name}/queues", get(list_queues))
        .route(
            "/projects/{project_name}/queues/{queue_name}",
            post(create_queue).get(show_queue).delete(delete_queue),
        )
        .route(
            "/projects/{project_name}/queues/{queue_name}/clear",
            post(clear_queue),
        )
        .route(
            "/projects/{project_name}/queues/{queue_name}/messages",
            post(enqueue_messages).get(lease_messages),
        )
        .route(
            "/projects/{project_name}/queues/{queue_name}/messages/delete",
            post(delete_messages),
        )
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Records method, URI, peer address, status and elapsed milliseconds
/// for every request.
async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %uri,
        %remote,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn metrics_handler() -> ([(HeaderName, &'static str); 1], String) {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        metrics::gather(),
    )
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn map_err(action: &str, err: Error) -> (StatusCode, String) {
    match err {
        Error::ProjectNotFound | Error::QueueNotFound => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        _ => (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("failed to {action}: {err}"),
        ),
    }
}

fn bad_request(detail: &str) -> (StatusCode, String) {
    (
        StatusCode::BAD_REQUEST,
        format!("Badly formed request ({detail})"),
    )
}

async fn find_project(
    store: &dyn Store,
    name: &str,
) -> Result<Project, (StatusCode, String)> {
    Project::load(store, name)
        .await
        .map_err(|e| map_err("load project", e))
}

async fn find_queue(
    store: &dyn Store,
    project_name: &str,
    queue_name: &str,
) -> Result<(Project, Queue), (StatusCode, String)> {
    let project = find_project(store, project_name).await?;
    let queue = project
        .queue(store, queue_name)
        .await
        .map_err(|e| map_err("load queue", e))?;
    Ok((project, queue))
}

/// Extract a duration in whole seconds from a value that may be a JSON
/// number or a numeric string. Absent or empty values fall back to
/// `default`; anything outside `[min, max]` is rejected.
fn parse_seconds(
    value: Option<&Value>,
    min: Duration,
    max: Duration,
    default: Duration,
) -> Result<Duration, String> {
    let secs = match value {
        None | Some(Value::Null) => return Ok(default),
        Some(Value::String(raw)) if raw.is_empty() => return Ok(default),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("invalid duration value '{n}'"))?,
        Some(Value::String(raw)) => raw
            .parse::<i64>()
            .map_err(|_| format!("invalid duration value '{raw}'"))?,
        Some(other) => return Err(format!("invalid duration value '{other}'")),
    };
    let duration = u64::try_from(secs).map(Duration::from_secs);
    match duration {
        Ok(duration) if duration >= min && duration <= max => Ok(duration),
        _ => Err(format!(
            "duration value {secs} out of range (must be between {} and {} seconds)",
            min.as_secs(),
            max.as_secs()
        )),
    }
}

/// List all projects.
#[utoipa::path(
    get,
    path = "/projects",
    responses(
        (status = 200, description = "All projects", body = [ProjectInfo]),
        (status = 422, description = "Store failure")
    )
)]
async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectInfo>>, (StatusCode, String)> {
    let store = state.store.as_ref();
    let projects = Project::list(store)
        .await
        .map_err(|e| map_err("list projects", e))?;
    let mut infos = Vec::with_capacity(projects.len());
    for project in &projects {
        infos.push(
            project
                .info(store)
                .await
                .map_err(|e| map_err("load project details", e))?,
        );
    }
    Ok(Json(infos))
}

/// Create a project. Idempotent: repeating the request succeeds without
/// creating a duplicate.
#[utoipa::path(
    post,
    path = "/projects/{project_name}",
    params(("project_name" = String, Path, description = "Project name")),
    responses(
        (status = 204, description = "Project exists"),
        (status = 422, description = "Store failure")
    )
)]
async fn create_project(
    State(state): State<AppState>,
    Path(project_name): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let (_, inserted) = Project::create(state.store.as_ref(), &project_name)
        .await
        .map_err(|e| map_err("create project", e))?;
    if inserted {
        metrics::PROJECTS_CREATED.inc();
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Retrieve project details.
#[utoipa::path(
    get,
    path = "/projects/{project_name}",
    params(("project_name" = String, Path, description = "Project name")),
    responses(
        (status = 200, description = "Project details", body = ProjectInfo),
        (status = 404, description = "Project not found")
    )
)]
async fn show_project(
    State(state): State<AppState>,
    Path(project_name): Path<String>,
) -> Result<Json<ProjectInfo>, (StatusCode, String)> {
    let store = state.store.as_ref();
    let project = find_project(store, &project_name).await?;
    let info = project
        .info(store)
        .await
        .map_err(|e| map_err("load project details", e))?;
    Ok(Json(info))
}

/// Delete a project, all its queues and all their messages.
#[utoipa::path(
    delete,
    path = "/projects/{project_name}",
    params(("project_name" = String, Path, description = "Project name")),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 404, description = "Project not found"),
        (status = 422, description = "Cascade stopped on a store failure")
    )
)]
async fn delete_project(
    State(state): State<AppState>,
    Path(project_name): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.as_ref();
    let project = find_project(store, &project_name).await?;
    project
        .destroy(store)
        .await
        .map_err(|e| map_err("delete project", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a queue. Idempotent like project creation.
#[utoipa::path(
    post,
    path = "/projects/{project_name}/queues/{queue_name}",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 204, description = "Queue exists"),
        (status = 404, description = "Project not found"),
        (status = 422, description = "Quota reached or store failure")
    )
)]
async fn create_queue(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.as_ref();
    let project = find_project(store, &project_name).await?;
    let (_, inserted) = Queue::create(store, &queue_name, &project)
        .await
        .map_err(|e| map_err("create queue", e))?;
    if inserted {
        metrics::QUEUES_CREATED.inc();
    }
    Ok(StatusCode::NO_CONTENT)
}

/// List the queues of a project.
#[utoipa::path(
    get,
    path = "/projects/{project_name}/queues",
    params(("project_name" = String, Path, description = "Project name")),
    responses(
        (status = 200, description = "Queues of the project", body = [QueueInfo]),
        (status = 404, description = "Project not found")
    )
)]
async fn list_queues(
    State(state): State<AppState>,
    Path(project_name): Path<String>,
) -> Result<Json<Vec<QueueInfo>>, (StatusCode, String)> {
    let store = state.store.as_ref();
    let project = find_project(store, &project_name).await?;
    let queues = project
        .queues(store)
        .await
        .map_err(|e| map_err("load queues", e))?;
    let mut infos = Vec::with_capacity(queues.len());
    for queue in &queues {
        infos.push(
            queue
                .info(store)
                .await
                .map_err(|e| map_err("load queue details", e))?,
        );
    }
    Ok(Json(infos))
}

/// Retrieve queue details.
#[utoipa::path(
    get,
    path = "/projects/{project_name}/queues/{queue_name}",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 200, description = "Queue details", body = QueueInfo),
        (status = 404, description = "Project or queue not found")
    )
)]
async fn show_queue(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
) -> Result<Json<QueueInfo>, (StatusCode, String)> {
    let store = state.store.as_ref();
    let (_, queue) = find_queue(store, &project_name, &queue_name).await?;
    let info = queue
        .info(store)
        .await
        .map_err(|e| map_err("load queue details", e))?;
    Ok(Json(info))
}

/// Delete a queue and all its messages.
#[utoipa::path(
    delete,
    path = "/projects/{project_name}/queues/{queue_name}",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 204, description = "Queue deleted"),
        (status = 404, description = "Project or queue not found"),
        (status = 422, description = "Store failure")
    )
)]
async fn delete_queue(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.as_ref();
    let (_, queue) = find_queue(store, &project_name, &queue_name).await?;
    queue
        .destroy(store)
        .await
        .map_err(|e| map_err("delete queue", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete every message in a queue, leased messages included.
#[utoipa::path(
    post,
    path = "/projects/{project_name}/queues/{queue_name}/clear",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 204, description = "Queue cleared"),
        (status = 404, description = "Project or queue not found"),
        (status = 422, description = "Store failure")
    )
)]
async fn clear_queue(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.as_ref();
    let (_, queue) = find_queue(store, &project_name, &queue_name).await?;
    let removed = queue
        .clear(store)
        .await
        .map_err(|e| map_err("clear queue", e))?;
    tracing::debug!(queue = %queue.id, removed, "cleared queue");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, serde::Deserialize)]
struct EnqueueForm {
    messages: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EnqueueItem {
    body: Option<String>,
    expires_in: Option<Value>,
}

/// Enqueue up to 100 messages. The `messages` form value is a JSON array
/// of `{body, expires_in?}` items; `expires_in` is in seconds. The ids
/// of the created messages come back comma-separated in the `ids`
/// response header.
#[utoipa::path(
    post,
    path = "/projects/{project_name}/queues/{queue_name}/messages",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 201, description = "Messages enqueued; ids in the `ids` header"),
        (status = 400, description = "Malformed batch"),
        (status = 404, description = "Project or queue not found"),
        (status = 422, description = "Store failure")
    )
)]
async fn enqueue_messages(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
    Form(form): Form<EnqueueForm>,
) -> Result<(StatusCode, [(HeaderName, HeaderValue); 1]), (StatusCode, String)> {
    let store = state.store.as_ref();
    let (_, queue) = find_queue(store, &project_name, &queue_name).await?;

    let raw = form
        .messages
        .ok_or_else(|| bad_request("no 'messages' form value"))?;
    let items: Vec<EnqueueItem> = serde_json::from_str(&raw)
        .map_err(|_| bad_request("'messages' value contains malformed JSON"))?;
    if items.len() > MAX_ENQUEUE_COUNT {
        return Err(bad_request(&format!(
            "cannot enqueue more than {MAX_ENQUEUE_COUNT} messages in one request"
        )));
    }

    let now = Utc::now();
    let mut batch = Vec::with_capacity(items.len());
    for item in items {
        let body = match item.body {
            Some(body) if !body.is_empty() => body,
            _ => return Err(bad_request("'messages' contains a message with no 'body' value")),
        };
        let expires_in = parse_seconds(
            item.expires_in.as_ref(),
            MIN_MESSAGE_EXPIRY,
            MAX_MESSAGE_EXPIRY,
            DEFAULT_MESSAGE_EXPIRY,
        )
        .map_err(|msg| bad_request(&format!("{msg} (expires_in)")))?;
        batch.push(Message::new(&queue, body, now, expires_in));
    }

    Message::save_batch(store, &batch)
        .await
        .map_err(|e| map_err("enqueue messages", e))?;
    metrics::MESSAGES_ENQUEUED.inc_by(batch.len() as u64);

    let ids = batch
        .iter()
        .map(|m| m.id.to_hex())
        .collect::<Vec<_>>()
        .join(",");
    let ids = HeaderValue::from_str(&ids).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to serialize response".to_string(),
        )
    })?;
    Ok((StatusCode::CREATED, [(HeaderName::from_static("ids"), ids)]))
}

#[derive(Debug, serde::Deserialize)]
struct LeaseParams {
    count: Option<String>,
    timeout: Option<String>,
}

/// Lease up to `count` messages for `timeout` seconds. Leased messages
/// are invisible to other consumers until the timeout elapses; delete
/// them before that to acknowledge. Returns newest first.
#[utoipa::path(
    get,
    path = "/projects/{project_name}/queues/{queue_name}/messages",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name"),
        ("count" = Option<String>, Query, description = "Messages to lease, 1-100, default 1"),
        ("timeout" = Option<String>, Query, description = "Lease seconds, 10-86400, default 60")
    ),
    responses(
        (status = 200, description = "Leased messages", body = [MessageInfo]),
        (status = 400, description = "Malformed parameter"),
        (status = 404, description = "Project or queue not found"),
        (status = 422, description = "Store failure")
    )
)]
async fn lease_messages(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
    Query(params): Query<LeaseParams>,
) -> Result<Json<Vec<MessageInfo>>, (StatusCode, String)> {
    let store = state.store.as_ref();
    let (project, queue) = find_queue(store, &project_name, &queue_name).await?;

    let count = match params.count.as_deref() {
        None | Some("") => 1,
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            bad_request(&format!("invalid count value '{raw}' (must be an integer)"))
        })?,
    };
    if !(1..=MAX_LEASE_COUNT).contains(&count) {
        return Err(bad_request(&format!(
            "count value {count} out of range (must be between 1 and {MAX_LEASE_COUNT})"
        )));
    }
    let timeout = params.timeout.map(Value::from);
    let timeout = parse_seconds(
        timeout.as_ref(),
        MIN_LEASE_TIMEOUT,
        MAX_LEASE_TIMEOUT,
        DEFAULT_LEASE_TIMEOUT,
    )
    .map_err(|msg| bad_request(&format!("{msg} (timeout)")))?;

    let messages = queue
        .lease_messages(store, count, timeout)
        .await
        .map_err(|e| map_err("lease messages", e))?;
    metrics::MESSAGES_LEASED.inc_by(messages.len() as u64);
    metrics::MESSAGES_LEASED_INFLIGHT.add(messages.len() as i64);

    Ok(Json(
        messages.iter().map(|m| m.info(&project, &queue)).collect(),
    ))
}

#[derive(Debug, serde::Deserialize)]
struct DeleteForm {
    #[serde(rename = "messageIds")]
    message_ids: Option<String>,
}

/// Acknowledge leased messages by deleting them. The `messageIds` form
/// value is a JSON array of id strings; every id must belong to the
/// queue. Processing stops at the first failing id and deletions made
/// before it stick, so a failed request is safe to retry.
#[utoipa::path(
    post,
    path = "/projects/{project_name}/queues/{queue_name}/messages/delete",
    params(
        ("project_name" = String, Path, description = "Project name"),
        ("queue_name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 204, description = "Messages deleted"),
        (status = 400, description = "Malformed id list"),
        (status = 404, description = "Project or queue not found"),
        (status = 422, description = "An id failed; earlier deletions were kept")
    )
)]
async fn delete_messages(
    State(state): State<AppState>,
    Path((project_name, queue_name)): Path<(String, String)>,
    Form(form): Form<DeleteForm>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.as_ref();
    let (_, queue) = find_queue(store, &project_name, &queue_name).await?;

    let raw = form
        .message_ids
        .ok_or_else(|| bad_request("no 'messageIds' form value"))?;
    let ids: Vec<String> = serde_json::from_str(&raw)
        .map_err(|_| bad_request("'messageIds' value contains malformed JSON"))?;

    queue
        .delete_messages(store, &ids)
        .await
        .map_err(|e| map_err("delete all messages", e))?;
    metrics::MESSAGES_DELETED.inc_by(ids.len() as u64);
    metrics::MESSAGES_LEASED_INFLIGHT.sub(ids.len() as i64);
    Ok(StatusCode::NO_CONTENT)
}
