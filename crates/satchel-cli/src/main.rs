use clap::{Parser, Subcommand};
use satchel_core::{MessageInfo, ProjectInfo, QueueInfo};

#[derive(Parser)]
#[command(name = "satchel-cli", version, about = "CLI for the satchel message queue")]
struct Cli {
    #[arg(long, default_value = "http://localhost:8000")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping server health endpoint
    Ping,

    /// List all projects
    ListProjects,

    /// Create a project (idempotent)
    CreateProject { name: String },

    /// Show project details
    ShowProject { name: String },

    /// Delete a project, its queues and their messages
    DeleteProject { name: String },

    /// Create a queue (idempotent)
    CreateQueue { project: String, queue: String },

    /// List the queues of a project
    ListQueues { project: String },

    /// Show queue details
    ShowQueue { project: String, queue: String },

    /// Delete a queue and its messages
    DeleteQueue { project: String, queue: String },

    /// Delete every message in a queue
    ClearQueue { project: String, queue: String },

    /// Enqueue one or more message bodies; prints the assigned ids
    Enqueue {
        project: String,
        queue: String,

        /// Message body, repeatable
        #[arg(long = "body", required = true)]
        bodies: Vec<String>,

        /// Seconds before the messages expire (60-2592000, default 7 days)
        #[arg(long)]
        expires_in: Option<i64>,
    },

    /// Lease messages, newest first
    Lease {
        project: String,
        queue: String,

        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Lease timeout in seconds (10-86400, default 60)
        #[arg(long)]
        timeout: Option<i64>,
    },

    /// Acknowledge leased messages by deleting them
    Ack {
        project: String,
        queue: String,

        /// Message ids as printed by `lease`
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let base = cli.server_url.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Ping => {
            let text = client
                .get(format!("{base}/healthz"))
                .send()
                .await?
                .text()
                .await?;
            println!("{text}");
        }

        Commands::ListProjects => {
            let response = client.get(format!("{base}/projects")).send().await?;
            let infos = expect_success(response)
                .await?
                .json::<Vec<ProjectInfo>>()
                .await?;
            for info in infos {
                println!(
                    "{}\tqueues={}\tcreated={}",
                    info.name, info.queue_count, info.created_at
                );
            }
        }

        Commands::CreateProject { name } => {
            let response = client.post(format!("{base}/projects/{name}")).send().await?;
            expect_success(response).await?;
        }

        Commands::ShowProject { name } => {
            let response = client.get(format!("{base}/projects/{name}")).send().await?;
            let info = expect_success(response).await?.json::<ProjectInfo>().await?;
            println!(
                "{}\tqueues={}\tcreated={}",
                info.name, info.queue_count, info.created_at
            );
        }

        Commands::DeleteProject { name } => {
            let response = client
                .delete(format!("{base}/projects/{name}"))
                .send()
                .await?;
            expect_success(response).await?;
        }

        Commands::CreateQueue { project, queue } => {
            let response = client
                .post(format!("{base}/projects/{project}/queues/{queue}"))
                .send()
                .await?;
            expect_success(response).await?;
        }

        Commands::ListQueues { project } => {
            let response = client
                .get(format!("{base}/projects/{project}/queues"))
                .send()
                .await?;
            let infos = expect_success(response)
                .await?
                .json::<Vec<QueueInfo>>()
                .await?;
            for info in infos {
                println!(
                    "{}\tsize={}\tcreated={}",
                    info.name, info.size, info.created_at
                );
            }
        }

        Commands::ShowQueue { project, queue } => {
            let response = client
                .get(format!("{base}/projects/{project}/queues/{queue}"))
                .send()
                .await?;
            let info = expect_success(response).await?.json::<QueueInfo>().await?;
            println!(
                "{}\tproject={}\tsize={}\tcreated={}",
                info.name, info.project, info.size, info.created_at
            );
        }

        Commands::DeleteQueue { project, queue } => {
            let response = client
                .delete(format!("{base}/projects/{project}/queues/{queue}"))
                .send()
                .await?;
            expect_success(response).await?;
        }

        Commands::ClearQueue { project, queue } => {
            let response = client
                .post(format!("{base}/projects/{project}/queues/{queue}/clear"))
                .send()
                .await?;
            expect_success(response).await?;
        }

        Commands::Enqueue {
            project,
            queue,
            bodies,
            expires_in,
        } => {
            let items: Vec<serde_json::Value> = bodies
                .into_iter()
                .map(|body| {
                    let mut item = serde_json::json!({ "body": body });
                    if let Some(secs) = expires_in {
                        item["expires_in"] = secs.into();
                    }
                    item
                })
                .collect();
            let payload = serde_json::to_string(&items)?;

            let response = client
                .post(format!("{base}/projects/{project}/queues/{queue}/messages"))
                .form(&[("messages", payload.as_str())])
                .send()
                .await?;
            let response = expect_success(response).await?;
            let ids = response
                .headers()
                .get("ids")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            for id in ids.split(',').filter(|id| !id.is_empty()) {
                println!("{id}");
            }
        }

        Commands::Lease {
            project,
            queue,
            count,
            timeout,
        } => {
            let mut request = client
                .get(format!("{base}/projects/{project}/queues/{queue}/messages"))
                .query(&[("count", count.to_string())]);
            if let Some(timeout) = timeout {
                request = request.query(&[("timeout", timeout.to_string())]);
            }
            let messages = expect_success(request.send().await?)
                .await?
                .json::<Vec<MessageInfo>>()
                .await?;
            for message in messages {
                println!(
                    "{}\tlease_expires={}\t{}",
                    message.id,
                    message
                        .lease_expires_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    message.body
                );
            }
        }

        Commands::Ack {
            project,
            queue,
            ids,
        } => {
            let payload = serde_json::to_string(&ids)?;
            let response = client
                .post(format!(
                    "{base}/projects/{project}/queues/{queue}/messages/delete"
                ))
                .form(&[("messageIds", payload.as_str())])
                .send()
                .await?;
            expect_success(response).await?;
        }
    }

    Ok(())
}

async fn expect_success(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("request failed: {status} {body}");
}
