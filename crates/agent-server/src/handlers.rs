//! HTTP Handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::sync::mpsc;

use agent_core::{
    error::AgentError,
    protocol::{ChatCompletion, ChatRequest, ErrorRecord},
    provider::ModelInfo,
    reasoning::RECORD_CHANNEL_CAPACITY,
    session::ChatThread,
};

use crate::state::AppState;
use crate::stream::JsonlResponse;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model: String,
    pub provider_connected: bool,
    pub tools: Vec<String>,
}

/// Failure reported before any record was streamed
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    record: ErrorRecord,
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let status = match &err {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::Provider(_)
            | AgentError::ProviderUnavailable(_)
            | AgentError::ProviderTimeout(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            record: ErrorRecord::from(&err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected chat request body: {}", rejection.body_text());
        Self {
            status: StatusCode::BAD_REQUEST,
            record: ErrorRecord::from(&AgentError::Validation(rejection.body_text())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.record)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    let provider_connected = orchestrator.provider().health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        model: orchestrator.config().generation.model.clone(),
        provider_connected,
        tools: orchestrator.tools().names().into_iter().map(String::from).collect(),
    })
}

/// Models reported by the provider
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    let models = state.orchestrator.provider().list_models().await?;
    Ok(Json(models))
}

/// Streaming chat: one JSON record per line as the reply is produced.
///
/// The response is only committed once the first record exists. A run that
/// fails before producing anything gets a plain JSON error with a status
/// code instead of an empty stream.
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<JsonlResponse, ApiError> {
    let Json(request) = payload?;
    let thread = ChatThread::from_request(request)?;

    tracing::info!(
        session = %thread.session.token,
        issued = thread.session.issued,
        messages = thread.conversation.len(),
        "Chat stream started"
    );

    let (tx, mut rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run(thread, tx).await });

    match rx.recv().await {
        Some(first) => Ok(JsonlResponse::new(first, rx)),
        None => match run.await {
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(_)) => Err(AgentError::Other("chat run produced no output".into()).into()),
            Err(e) => Err(AgentError::Other(format!("chat task failed: {}", e)).into()),
        },
    }
}

/// Non-streaming chat: the same run, assembled into a single reply
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatCompletion>, ApiError> {
    let Json(request) = payload?;
    let completion = state.orchestrator.ask(request).await?;
    Ok(Json(completion))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_core::{
        AgentBuilder, StreamRecord, ToolCall, ToolRegistry,
        math::register_math_tools,
        testing::{Script, ScriptedProvider},
    };
    use axum::{
        Router,
        body::Body,
        http::{Request, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn app(provider: ScriptedProvider, max_tool_iterations: usize) -> Router {
        let mut tools = ToolRegistry::new();
        register_math_tools(&mut tools).unwrap();
        let orchestrator = AgentBuilder::new()
            .provider(Arc::new(provider))
            .tools(Arc::new(tools))
            .max_tool_iterations(max_tool_iterations)
            .build()
            .unwrap();
        crate::build_router(AppState::new(orchestrator))
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, body.to_vec())
    }

    fn records(body: &[u8]) -> Vec<StreamRecord> {
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.ends_with("\r\n"));
        text.split_terminator("\r\n")
            .map(|line| StreamRecord::parse(line).unwrap())
            .collect()
    }

    fn content(records: &[StreamRecord]) -> String {
        records
            .iter()
            .filter_map(|r| match r {
                StreamRecord::Delta(d) => d.delta.as_ref().and_then(|d| d.content.clone()),
                StreamRecord::Error(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_stream_with_two_tool_rounds() {
        let provider = ScriptedProvider::new(vec![
            Script::tools(vec![ToolCall::new("Add", json!({"a": 2, "b": 2}))]),
            Script::tools(vec![ToolCall::new("Multiply", json!({"a": 4, "b": 5}))]),
            Script::reply(["The result ", "is 20."]),
        ]);
        let body = json!({
            "messages": [{"role": "user", "content": "What is 2+2, then multiply the result by 5?"}],
            "sessionState": "abc-123",
        });

        let (status, content_type, body) =
            send(app(provider, 8), post("/agent/chat/stream", body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/jsonl"));

        let records = records(&body);
        assert_eq!(content(&records), "The result is 20.");
        // no sentinel: a clean stream simply ends on a delta
        assert!(matches!(records.last(), Some(StreamRecord::Delta(_))));
        for record in &records {
            let StreamRecord::Delta(d) = record else { panic!("unexpected error record") };
            assert_eq!(d.session_token.as_deref(), Some("abc-123"));
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_before_streaming() {
        let provider = ScriptedProvider::new(vec![Script::reply(["unused"])]);
        let (status, _, body) = send(app(provider, 8), post("/agent/chat/stream", "{\"messages\": 42}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_misplaced_system_message_is_rejected() {
        let provider = ScriptedProvider::new(vec![Script::reply(["unused"])]);
        let body = json!({"messages": [
            {"role": "user", "content": "hi"},
            {"role": "system", "content": "be terse"},
        ]});
        let (status, _, _) = send(app(provider, 8), post("/agent/chat/stream", body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provider_failure_before_output_is_bad_gateway() {
        let provider = ScriptedProvider::new(vec![Script::Fail("connection refused".into())]);
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});

        let (status, content_type, body) =
            send(app(provider, 8), post("/agent/chat/stream", body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], "provider_error");
    }

    #[tokio::test]
    async fn test_iteration_limit_is_reported_in_band() {
        let provider = ScriptedProvider::repeating(Script::Reply {
            chunks: vec!["working ".into()],
            tool_calls: vec![ToolCall::new("Add", json!({"a": 1, "b": 1}))],
        });
        let body = json!({"messages": [{"role": "user", "content": "count forever"}]});

        let (status, _, body) = send(app(provider, 2), post("/agent/chat/stream", body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        match records(&body).last() {
            Some(StreamRecord::Error(err)) => assert_eq!(err.code, "iteration_limit_exceeded"),
            other => panic!("expected trailing error record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_hangup_during_tool_call_ends_run() {
        use agent_core::{ToolDescriptor, ToolSchema};
        use futures::StreamExt;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let started = Arc::new(AtomicBool::new(false));
        let slow = ToolDescriptor::new(
            ToolSchema {
                name: "Slow".into(),
                description: "Takes its time".into(),
                parameters: vec![],
            },
            {
                let started = started.clone();
                move |_| {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(json!("done"))
                }
            },
        );
        let mut tools = ToolRegistry::new().with_timeout(Duration::from_secs(10));
        tools.register(slow).unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply {
                chunks: vec!["Checking. ".into()],
                tool_calls: vec![ToolCall::new("Slow", json!({}))],
            },
            Script::reply(["never reached"]),
        ]));
        let orchestrator = AgentBuilder::new()
            .provider(provider.clone())
            .tools(Arc::new(tools))
            .build()
            .unwrap();
        let app = crate::build_router(AppState::new(orchestrator));

        let body = json!({"messages": [{"role": "user", "content": "slow please"}]});
        let response = app
            .oneshot(post("/agent/chat/stream", body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        assert!(StreamRecord::parse(std::str::from_utf8(&first).unwrap().trim_end()).is_ok());

        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(frames);

        // a run that kept going would ask the provider again once the tool returned
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_non_streaming_chat() {
        let provider = ScriptedProvider::new(vec![
            Script::tools(vec![ToolCall::new("Divide", json!({"a": 10, "b": 4}))]),
            Script::reply(["10 / 4 = 2.5"]),
        ]);
        let body = json!({
            "messages": [{"role": "user", "content": "10/4?"}],
            "sessionToken": "t-1",
            "context": {"tab": 3},
        });

        let (status, _, body) = send(app(provider, 8), post("/agent/chat", body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        let reply: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply["message"]["role"], "assistant");
        assert_eq!(reply["message"]["content"], "10 / 4 = 2.5");
        assert_eq!(reply["sessionToken"], "t-1");
        assert_eq!(reply["context"]["tab"], 3);
    }

    #[tokio::test]
    async fn test_health_lists_tools() {
        let provider = ScriptedProvider::new(vec![]);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, _, body) = send(app(provider, 8), request).await;
        assert_eq!(status, StatusCode::OK);
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["providerConnected"], true);
        assert_eq!(health["tools"], json!(["Add", "Divide", "Multiply", "Subtract"]));
    }
}
