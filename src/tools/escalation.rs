//! Ticket creation for the escalation agent

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config::{EscalationConfig, ToolsConfig};
use crate::tools::registry::{json_schema, require_str, Tool, ToolError, ToolRegistry};

/// File in the checkpoint directory holding the last local ticket number
pub const TICKET_COUNTER_FILE: &str = "ticket-counter";

/// Registry holding the ticket tool.
///
/// With a `state_dir` the local ticket counter is kept there, so ids stay
/// unique across restarts like the checkpoints stored next to it.
pub fn escalation_tools(
    escalation: &EscalationConfig,
    tools: &ToolsConfig,
    state_dir: Option<&Path>,
) -> ToolRegistry {
    ToolRegistry::new().with(Arc::new(EscalateRequestTool::new(escalation, tools, state_dir)))
}

/// Where tickets end up
enum TicketSink {
    /// POST to a ticketing webhook that answers `{"id": ...}`
    Webhook { client: Client, url: String },
    /// Sequential identifiers, optionally persisted
    Local {
        prefix: String,
        next: Mutex<u32>,
        counter_file: Option<PathBuf>,
    },
}

pub struct EscalateRequestTool {
    sink: TicketSink,
}

#[derive(Deserialize)]
struct TicketResponse {
    id: Value,
}

impl EscalateRequestTool {
    pub fn new(escalation: &EscalationConfig, tools: &ToolsConfig, state_dir: Option<&Path>) -> Self {
        let counter_file = state_dir.map(|dir| dir.join(TICKET_COUNTER_FILE));
        let sink = match &escalation.ticket_url {
            Some(url) => match Client::builder()
                .timeout(Duration::from_secs(tools.timeout_secs))
                .build()
            {
                Ok(client) => TicketSink::Webhook {
                    client,
                    url: url.clone(),
                },
                Err(e) => {
                    warn!(error = %e, "ticket webhook client unavailable, issuing local ids");
                    Self::local_sink(&escalation.ticket_prefix, counter_file)
                }
            },
            None => Self::local_sink(&escalation.ticket_prefix, counter_file),
        };
        Self { sink }
    }

    /// Local-only tool issuing `<prefix>-001`, `<prefix>-002`, ... for this process
    pub fn local(prefix: impl AsRef<str>) -> Self {
        Self {
            sink: Self::local_sink(prefix.as_ref(), None),
        }
    }

    fn local_sink(prefix: &str, counter_file: Option<PathBuf>) -> TicketSink {
        let last = counter_file
            .as_deref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|text| text.trim().parse::<u32>().ok())
            .unwrap_or(0);
        TicketSink::Local {
            prefix: prefix.to_string(),
            next: Mutex::new(last + 1),
            counter_file,
        }
    }
}

async fn persist_counter(path: &Path, issued: u32) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, issued.to_string()).await
}

#[async_trait]
impl Tool for EscalateRequestTool {
    fn name(&self) -> &str {
        "escalate_request"
    }

    fn description(&self) -> &str {
        "Escalates a user request by creating a new ticket in the ticketing system. Returns the ticket ID created in the ticketing system."
    }

    fn parameters_schema(&self) -> Value {
        json_schema(
            json!({
                "title": {
                    "type": "string",
                    "description": "A brief and descriptive name of the issue"
                },
                "description": {
                    "type": "string",
                    "description": "A detailed explanation of the network-related problem or issue"
                },
                "question": {
                    "type": "string",
                    "description": "The user's question that prompted this ticket escalation"
                }
            }),
            &["title", "description", "question"],
        )
    }

    fn idempotent(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let title = require_str(&params, "title")?;
        let description = require_str(&params, "description")?;
        let question = require_str(&params, "question")?;

        let ticket_id = match &self.sink {
            TicketSink::Local {
                prefix,
                next,
                counter_file,
            } => {
                let mut next = next.lock().await;
                let n = *next;
                if let Some(path) = counter_file {
                    if let Err(e) = persist_counter(path, n).await {
                        warn!(path = %path.display(), error = %e, "ticket counter not saved");
                    }
                }
                *next += 1;
                format!("{}-{:03}", prefix, n)
            }
            TicketSink::Webhook { client, url } => {
                let response = client
                    .post(url)
                    .json(&json!({
                        "title": title,
                        "description": description,
                        "question": question,
                    }))
                    .send()
                    .await
                    .map_err(|e| ToolError::ExternalService(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(if status.is_server_error() {
                        ToolError::ExternalService(format!("ticketing returned {}: {}", status, body))
                    } else {
                        ToolError::ExecutionFailed(format!("ticketing returned {}: {}", status, body))
                    });
                }

                let ticket: TicketResponse = response
                    .json()
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(format!("bad ticket response: {}", e)))?;
                match ticket.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
        };

        info!(%ticket_id, title, "ticket created");
        Ok(Value::String(ticket_id))
    }
}
