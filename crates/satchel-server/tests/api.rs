use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use satchel_core::{MemoryStore, MessageInfo, ProjectInfo, QueueInfo};
use satchel_server::app::{build_app, AppState};
use tower::ServiceExt;

fn app() -> Router {
    build_app(AppState {
        store: Arc::new(MemoryStore::new()),
    })
}

async fn send(
    app: &Router,
    method: &str,
    path: &str,
    form: Option<String>,
) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match form {
        Some(form) => {
            builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            Body::from(form)
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body)?).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, headers, bytes))
}

fn form(key: &str, value: &str) -> String {
    serde_urlencoded::to_string([(key, value)]).expect("urlencode form value")
}

async fn create_queue(app: &Router, project: &str, queue: &str) -> anyhow::Result<()> {
    let (status, _, _) = send(app, "POST", &format!("/projects/{project}"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(
        app,
        "POST",
        &format!("/projects/{project}/queues/{queue}"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn enqueue_lease_ack_scenario() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;

    let (status, headers, _) = send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages",
        Some(form("messages", r#"[{"body":"hello","expires_in":600}]"#)),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = headers
        .get("ids")
        .expect("ids header")
        .to_str()?
        .to_string();
    assert_eq!(id.len(), 24, "one ObjectId hex in the ids header");

    let (status, _, body) = send(
        &app,
        "GET",
        "/projects/demo/queues/tasks/messages?count=1&timeout=30",
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let leased: Vec<MessageInfo> = serde_json::from_slice(&body)?;
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].body, "hello");
    assert_eq!(leased[0].id, id);
    assert_eq!(leased[0].queue, "tasks");
    assert_eq!(leased[0].project, "demo");
    assert!(leased[0].lease_expires_at.is_some());

    // While the lease holds, the message is invisible.
    let (_, _, body) = send(
        &app,
        "GET",
        "/projects/demo/queues/tasks/messages?count=1&timeout=30",
        None,
    )
    .await?;
    let invisible: Vec<MessageInfo> = serde_json::from_slice(&body)?;
    assert!(invisible.is_empty());

    let (status, _, _) = send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages/delete",
        Some(form("messageIds", &format!(r#"["{id}"]"#))),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, body) = send(
        &app,
        "GET",
        "/projects/demo/queues/tasks/messages?count=1",
        None,
    )
    .await?;
    let after_ack: Vec<MessageInfo> = serde_json::from_slice(&body)?;
    assert!(after_ack.is_empty());
    Ok(())
}

#[tokio::test]
async fn lease_response_uses_documented_field_names() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages",
        Some(form("messages", r#"[{"body":"x"}]"#)),
    )
    .await?;

    let (_, _, body) = send(&app, "GET", "/projects/demo/queues/tasks/messages", None).await?;
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let first = &value.as_array().expect("array response")[0];
    for key in [
        "id",
        "body",
        "queue",
        "project",
        "createdAt",
        "messageExpiresAt",
        "leaseExpiresAt",
    ] {
        assert!(first.get(key).is_some(), "missing field {key}");
    }
    Ok(())
}

#[tokio::test]
async fn enqueue_batch_too_large_is_rejected() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;

    let items: Vec<serde_json::Value> = (0..101)
        .map(|i| serde_json::json!({ "body": format!("m{i}") }))
        .collect();
    let (status, _, _) = send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages",
        Some(form("messages", &serde_json::to_string(&items)?)),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn enqueue_validation_rejects_bad_input() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    let path = "/projects/demo/queues/tasks/messages";

    // Non-numeric expiry string.
    let (status, _, _) = send(
        &app,
        "POST",
        path,
        Some(form("messages", r#"[{"body":"x","expires_in":"abc"}]"#)),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Expiry below the minimum.
    let (status, _, _) = send(
        &app,
        "POST",
        path,
        Some(form("messages", r#"[{"body":"x","expires_in":10}]"#)),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing body.
    let (status, _, _) = send(
        &app,
        "POST",
        path,
        Some(form("messages", r#"[{"expires_in":600}]"#)),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Malformed JSON.
    let (status, _, _) = send(&app, "POST", path, Some(form("messages", "not json"))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing form value entirely.
    let (status, _, _) = send(&app, "POST", path, Some(String::new())).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn lease_validation_rejects_bad_parameters() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    let base = "/projects/demo/queues/tasks/messages";

    for query in [
        "count=abc",
        "count=0",
        "count=101",
        "timeout=5",
        "timeout=90000",
        "timeout=abc",
    ] {
        let (status, _, _) = send(&app, "GET", &format!("{base}?{query}"), None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "query {query}");
    }
    Ok(())
}

#[tokio::test]
async fn unknown_project_or_queue_is_404() -> anyhow::Result<()> {
    let app = app();

    let (status, _, _) = send(&app, "GET", "/projects/nope", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "DELETE", "/projects/nope", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "POST", "/projects/nope/queues/q", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "POST", "/projects/p", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, "GET", "/projects/p/queues/nope/messages", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn project_creation_is_idempotent_over_http() -> anyhow::Result<()> {
    let app = app();

    for _ in 0..2 {
        let (status, _, _) = send(&app, "POST", "/projects/demo", None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, _, body) = send(&app, "GET", "/projects", None).await?;
    assert_eq!(status, StatusCode::OK);
    let projects: Vec<ProjectInfo> = serde_json::from_slice(&body)?;
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "demo");
    assert_eq!(projects[0].queue_count, 0);
    Ok(())
}

#[tokio::test]
async fn queue_size_includes_leased_messages() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages",
        Some(form("messages", r#"[{"body":"a"},{"body":"b"}]"#)),
    )
    .await?;
    send(
        &app,
        "GET",
        "/projects/demo/queues/tasks/messages?count=1",
        None,
    )
    .await?;

    let (status, _, body) = send(&app, "GET", "/projects/demo/queues/tasks", None).await?;
    assert_eq!(status, StatusCode::OK);
    let info: QueueInfo = serde_json::from_slice(&body)?;
    assert_eq!(info.size, 2);
    assert_eq!(info.project, "demo");

    let (_, _, body) = send(&app, "GET", "/projects/demo/queues", None).await?;
    let infos: Vec<QueueInfo> = serde_json::from_slice(&body)?;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].name, "tasks");
    Ok(())
}

#[tokio::test]
async fn delete_messages_validation_and_queue_ownership() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    let (_, _, _) = send(&app, "POST", "/projects/demo/queues/other", None).await?;

    let delete_path = "/projects/demo/queues/tasks/messages/delete";

    // Missing and malformed form values.
    let (status, _, _) = send(&app, "POST", delete_path, Some(String::new())).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = send(
        &app,
        "POST",
        delete_path,
        Some(form("messageIds", "not json")),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // An id enqueued into another queue fails with 422.
    let (_, headers, _) = send(
        &app,
        "POST",
        "/projects/demo/queues/other/messages",
        Some(form("messages", r#"[{"body":"foreign"}]"#)),
    )
    .await?;
    let foreign_id = headers.get("ids").expect("ids header").to_str()?.to_string();
    let (status, _, _) = send(
        &app,
        "POST",
        delete_path,
        Some(form("messageIds", &format!(r#"["{foreign_id}"]"#))),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn clear_empties_the_queue() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages",
        Some(form("messages", r#"[{"body":"a"},{"body":"b"}]"#)),
    )
    .await?;

    let (status, _, _) = send(&app, "POST", "/projects/demo/queues/tasks/clear", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, body) = send(&app, "GET", "/projects/demo/queues/tasks", None).await?;
    let info: QueueInfo = serde_json::from_slice(&body)?;
    assert_eq!(info.size, 0);
    Ok(())
}

#[tokio::test]
async fn deleting_a_project_cascades() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;
    send(
        &app,
        "POST",
        "/projects/demo/queues/tasks/messages",
        Some(form("messages", r#"[{"body":"a"},{"body":"b"},{"body":"c"}]"#)),
    )
    .await?;

    let (status, _, _) = send(&app, "DELETE", "/projects/demo", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, "GET", "/projects/demo", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Recreating the hierarchy starts from a clean slate.
    create_queue(&app, "demo", "tasks").await?;
    let (_, _, body) = send(&app, "GET", "/projects/demo/queues/tasks", None).await?;
    let info: QueueInfo = serde_json::from_slice(&body)?;
    assert_eq!(info.size, 0);
    Ok(())
}

#[tokio::test]
async fn lease_on_empty_queue_returns_empty_array() -> anyhow::Result<()> {
    let app = app();
    create_queue(&app, "demo", "tasks").await?;

    let (status, _, body) = send(&app, "GET", "/projects/demo/queues/tasks/messages", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"[]");
    Ok(())
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() -> anyhow::Result<()> {
    let app = app();

    let (status, _, body) = send(&app, "GET", "/healthz", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");

    satchel_server::metrics::init_metrics();
    let (status, _, _) = send(&app, "GET", "/metrics", None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&app, "GET", "/api-docs/openapi.json", None).await?;
    assert_eq!(status, StatusCode::OK);
    let doc: serde_json::Value = serde_json::from_slice(&body)?;
    assert!(doc.get("paths").is_some());
    Ok(())
}
