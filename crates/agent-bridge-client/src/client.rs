//! HTTP implementation of `AgentApi`.

use std::time::Duration;

use agent_bridge_core::{
    Agent, AgentApi, ArchivalPassage, BridgeError, EventStream, MemoryBlock,
    config::{RetryConfig, ServerConfig},
};
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    protocol::{
        AgentState, ArchivalInsertRequest, ArchivalListing, BlockWire, CreateAgentRequest,
        ErrorBody, MessageListing, SendMessageRequest, UpdateBlockRequest,
    },
    retry::{RetryPolicy, with_retry},
    translator::translate_stream,
};

/// How long one attempt may take.
#[derive(Debug, Clone, Copy)]
enum Deadline {
    /// The whole exchange, body included.
    Request(Duration),
    /// Only the wait for response headers; the body is read without one.
    Headers(Duration),
}

/// Client for a remote agent server's REST + SSE API.
///
/// Stateless apart from the connection pool; cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
    stream_idle_timeout: Duration,
    model: Option<String>,
    embedding: Option<String>,
    retry: RetryPolicy,
}

impl HttpAgentClient {
    /// Create a client from configuration.
    #[must_use]
    pub fn new(server: &ServerConfig, retry: &RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: server.base_url.trim_end_matches('/').to_string(),
            api_token: server.api_token.clone(),
            timeout: server.request_timeout(),
            stream_idle_timeout: server.stream_idle_timeout(),
            model: server.agent_model.clone(),
            embedding: server.embedding_model.clone(),
            retry: RetryPolicy::from(retry),
        }
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/v1/` followed by `segments`, each percent-encoded as a
    /// single path segment. An empty last segment leaves a trailing slash.
    ///
    /// # Errors
    /// Returns `InvalidCommand` for a `.` or `..` segment, and `Permanent`
    /// if the base URL cannot carry a path.
    fn url(&self, segments: &[&str]) -> Result<Url, BridgeError> {
        if let Some(dots) = segments.iter().find(|s| matches!(**s, "." | "..")) {
            return Err(BridgeError::invalid(format!("`{dots}` is not a valid agent id or label")));
        }
        let invalid_base = |reason: String| BridgeError::Permanent {
            status: None,
            message: format!("invalid server URL `{}`: {reason}", self.base_url),
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid_base(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid_base("cannot be a base".to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    /// Issue a request with retry and return the successful response.
    async fn send<B>(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        deadline: Deadline,
    ) -> Result<Response, BridgeError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.url(segments)?;
        with_retry(&self.retry, operation, |attempt| {
            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .header("Accept", "application/json");
            if let Some(token) = &self.api_token {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }
            if let Deadline::Request(limit) = deadline {
                builder = builder.timeout(limit);
            }
            async move {
                tracing::debug!(operation, attempt, "Sending request");
                let sent = match deadline {
                    Deadline::Request(_) => builder.send().await,
                    Deadline::Headers(limit) => tokio::time::timeout(limit, builder.send())
                        .await
                        .map_err(|_| BridgeError::Timeout { attempts: 1 })?,
                };
                check_status(sent.map_err(classify_transport)?).await
            }
        })
        .await
    }

    async fn call<B, T>(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<T, BridgeError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(operation, method, segments, body, Deadline::Request(self.timeout))
            .await?;
        decode(response).await
    }

    async fn call_unit<B>(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<(), BridgeError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.send(operation, method, segments, body, Deadline::Request(self.timeout))
            .await
            .map(drop)
    }
}

/// Map a `reqwest` transport error to the taxonomy.
fn classify_transport(err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout { attempts: 1 }
    } else if err.is_decode() {
        BridgeError::Protocol(err.to_string())
    } else if err.is_builder() {
        BridgeError::Permanent {
            status: None,
            message: err.to_string(),
        }
    } else {
        BridgeError::transient(err.to_string())
    }
}

/// Map an HTTP status to the taxonomy.
fn classify_status(status: StatusCode, body: &str, path: &str) -> BridgeError {
    let message = ErrorBody::message_from(body);
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BridgeError::transient(format!("HTTP {}: {message}", status.as_u16()))
        }
        s if s.is_server_error() => BridgeError::transient(format!("HTTP {}: {message}", s.as_u16())),
        StatusCode::NOT_FOUND => BridgeError::NotFound {
            resource: "Resource",
            id: path.to_string(),
        },
        s => BridgeError::Permanent {
            status: Some(s.as_u16()),
            message,
        },
    }
}

async fn check_status(response: Response) -> Result<Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body, &path))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BridgeError> {
    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            BridgeError::Timeout { attempts: 1 }
        } else {
            BridgeError::Protocol(format!("failed to read body: {e}"))
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| BridgeError::Protocol(format!("unexpected response body: {e}")))
}

/// Rewrite a generic 404 as "agent not found".
fn agent_scoped(agent_id: &str) -> impl Fn(BridgeError) -> BridgeError + '_ {
    move |err| match err {
        BridgeError::NotFound { .. } => BridgeError::agent_not_found(agent_id),
        other => other,
    }
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn create_agent(&self, name: &str, blocks: &[MemoryBlock]) -> Result<Agent, BridgeError> {
        let request = CreateAgentRequest {
            name,
            memory_blocks: blocks.iter().map(BlockWire::from).collect(),
            model: self.model.as_deref(),
            embedding: self.embedding.as_deref(),
        };
        let state: AgentState = self
            .call("create_agent", Method::POST, &["agents", ""], Some(&request))
            .await?;
        tracing::info!(agent_id = %state.id, name, "Created agent");
        Ok(state.into())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, BridgeError> {
        let states: Vec<AgentState> = self
            .call::<(), _>("list_agents", Method::GET, &["agents", ""], None)
            .await?;
        Ok(states.into_iter().map(Agent::from).collect())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), BridgeError> {
        self.call_unit::<()>("delete_agent", Method::DELETE, &["agents", agent_id], None)
            .await
            .map_err(agent_scoped(agent_id))
    }

    async fn send_message(&self, agent_id: &str, text: &str) -> Result<EventStream, BridgeError> {
        let request = SendMessageRequest::user(text);
        // Each attempt gets the request timeout until headers arrive; once
        // the body is flowing only the idle timeout applies.
        let response = self
            .send(
                "send_message",
                Method::POST,
                &["agents", agent_id, "messages", "stream"],
                Some(&request),
                Deadline::Headers(self.timeout),
            )
            .await
            .map_err(agent_scoped(agent_id))?;

        tracing::debug!(agent_id, "Message stream opened");
        Ok(translate_stream(
            response.bytes_stream(),
            self.stream_idle_timeout,
        ))
    }

    async fn get_memory_block(&self, agent_id: &str, label: &str) -> Result<MemoryBlock, BridgeError> {
        let wire: BlockWire = self
            .call::<(), _>(
                "get_memory_block",
                Method::GET,
                &["agents", agent_id, "core-memory", "blocks", label],
                None,
            )
            .await
            .map_err(|err| match err {
                BridgeError::NotFound { .. } => BridgeError::NotFound {
                    resource: "Memory block",
                    id: format!("{agent_id}/{label}"),
                },
                other => other,
            })?;
        Ok(wire.into())
    }

    async fn update_memory_block(
        &self,
        agent_id: &str,
        label: &str,
        value: &str,
    ) -> Result<MemoryBlock, BridgeError> {
        let wire: BlockWire = self
            .call(
                "update_memory_block",
                Method::PATCH,
                &["agents", agent_id, "core-memory", "blocks", label],
                Some(&UpdateBlockRequest { value }),
            )
            .await
            .map_err(|err| match err {
                BridgeError::NotFound { .. } => BridgeError::NotFound {
                    resource: "Memory block",
                    id: format!("{agent_id}/{label}"),
                },
                other => other,
            })?;
        Ok(wire.into())
    }

    async fn reset_messages(&self, agent_id: &str) -> Result<usize, BridgeError> {
        self.call_unit(
            "reset_messages",
            Method::PATCH,
            &["agents", agent_id, "reset-messages"],
            Some(&serde_json::json!({})),
        )
        .await
        .map_err(agent_scoped(agent_id))?;

        let remaining: MessageListing = self
            .call::<(), _>("list_messages", Method::GET, &["agents", agent_id, "messages"], None)
            .await
            .map_err(agent_scoped(agent_id))?;
        Ok(remaining.len())
    }

    async fn insert_archival(&self, agent_id: &str, text: &str) -> Result<(), BridgeError> {
        self.call_unit(
            "insert_archival",
            Method::POST,
            &["agents", agent_id, "archival-memory"],
            Some(&ArchivalInsertRequest { text }),
        )
        .await
        .map_err(agent_scoped(agent_id))
    }

    async fn list_archival(&self, agent_id: &str) -> Result<Vec<ArchivalPassage>, BridgeError> {
        let listing: ArchivalListing = self
            .call::<(), _>(
                "list_archival",
                Method::GET,
                &["agents", agent_id, "archival-memory"],
                None,
            )
            .await
            .map_err(agent_scoped(agent_id))?;
        Ok(listing.into_passages())
    }
}
