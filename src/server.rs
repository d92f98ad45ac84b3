//! HTTP surface over the agent.
//!
//! Requests are independent: conversation history travels with each request
//! and the response, nothing is kept server-side.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::agent::{Agent, AgentReply, ChatContext, Conversation, ResponseType};
use crate::config::ServerConfig;
use crate::database::Store;
use crate::llm::ChatMessage;
use crate::models::{AccountOverview, Facility, NotesList};
use crate::tools::ToolRecord;

const ENDPOINTS: [&str; 3] = ["/", "/health", "/chat"];

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub store: Arc<dyn Store>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub account_id: Option<String>,
    pub facility_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

/// Reply plus the structured record matching `response_type`. The three
/// payload fields are always present; at most one is non-null.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub response_type: ResponseType,
    pub account_details: Option<AccountOverview>,
    pub facility_details: Option<Facility>,
    pub notes_data: Option<NotesList>,
    pub conversation_history: Vec<ChatMessage>,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: &'static str,
}

impl ChatResponse {
    fn new(reply: AgentReply, history: Vec<ChatMessage>, id: String, ctx: ChatContext) -> Self {
        let (mut account_details, mut facility_details, mut notes_data) = (None, None, None);
        match reply.details {
            Some(ToolRecord::Account(overview)) => account_details = Some(overview),
            Some(ToolRecord::Facility(facility)) => facility_details = Some(facility),
            Some(ToolRecord::Notes(list)) => notes_data = Some(list),
            None => {}
        }

        Self {
            response: reply.text,
            response_type: reply.response_type,
            account_details,
            facility_details,
            notes_data,
            conversation_history: history,
            conversation_id: id,
            account_id: ctx.account_id,
            facility_id: ctx.facility_id,
            user_id: ctx.user_id,
            status: "success",
        }
    }
}

/// JSON error body with an HTTP status.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "status": "error" }));
        (self.status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/chat", get(chat_info).post(chat))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    log::info!("🚀 Evolyn agent API listening on http://{}", addr);
    log::info!("  GET  /       - API information");
    log::info!("  GET  /health - Health check");
    log::info!("  GET  /chat   - Chat endpoint info");
    log::info!("  POST /chat   - Send messages to agent");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "Evolyn Conversational Agent API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "A conversational agent for querying the Evolyn database",
        "endpoints": {
            "/": "This information page",
            "/health": "Health check",
            "/chat": "Chat with the agent (POST) or get info (GET)"
        },
        "usage": {
            "chat_endpoint": "POST /chat",
            "payload": {
                "message": "Your question or request",
                "account_id": "Optional account ID for context",
                "facility_id": "Optional facility ID for context",
                "user_id": "Optional user ID, recorded as the author of saved notes",
                "conversation_history": "Optional array of previous messages"
            }
        },
        "examples": [
            "Show me account details for Dimod Account",
            "Find facilities for account A-011977763",
            "Show me details for facility F-123456",
            "Save this note: customer asked for a callback on Friday",
            "Show me the last note"
        ]
    }))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "agent_ready": true,
                "database": state.store.backend(),
                "message": "Evolyn Conversational Agent API is running"
            })),
        ),
        Err(e) => {
            log::warn!("Health: database check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "agent_ready": true,
                    "database": format!("{} unreachable: {}", state.store.backend(), e),
                    "message": "Database is not reachable"
                })),
            )
        }
    }
}

async fn chat_info() -> Json<Value> {
    Json(json!({
        "endpoint": "/chat",
        "methods": ["POST"],
        "description": "Send messages to the conversational agent",
        "example_request": {
            "message": "Show me facility details",
            "facility_id": "F-123456",
            "account_id": "A-011977763",
            "conversation_history": []
        },
        "example_response": {
            "response": "Facility Details: ...",
            "response_type": "facility_overview",
            "account_details": null,
            "facility_details": { "facility_id": "F-123456", "facility_name": "..." },
            "notes_data": null,
            "conversation_history": [
                {"role": "user", "content": "Show me facility details"},
                {"role": "assistant", "content": "Facility Details: ..."}
            ],
            "conversation_id": "6f1c0d9e-0b7a-4f43-9d43-2d8f3c6b1a10",
            "facility_id": "F-123456",
            "account_id": "A-011977763",
            "status": "success"
        },
        "payload_fields": {
            "message": "Required: your question or request",
            "account_id": "Optional: account ID for context",
            "facility_id": "Optional: facility ID for context",
            "user_id": "Optional: caller identity, used as note author",
            "conversation_id": "Optional: echoed back; a new one is issued when absent",
            "conversation_history": "Optional: array of previous messages for conversation continuity"
        }
    }))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        log::warn!("Chat: rejected payload: {}", rejection.body_text());
        ApiError::bad_request(format!("Invalid JSON payload: {}", rejection.body_text()))
    })?;

    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    let ctx = ChatContext {
        account_id: present(request.account_id),
        facility_id: present(request.facility_id),
        user_id: present(request.user_id),
    };
    let conversation_id = present(request.conversation_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut conversation = Conversation::from_history(request.conversation_history);
    let reply = state.agent.reply(&mut conversation, message, &ctx).await;
    log::info!(
        "Chat: conversation {} answered as {:?} (tools: {:?})",
        conversation_id,
        reply.response_type,
        reply.tools_used
    );

    let history = conversation.history().to_vec();
    Ok(Json(ChatResponse::new(reply, history, conversation_id, ctx)))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "status": "error",
            "available_endpoints": ENDPOINTS
        })),
    )
}

async fn method_not_allowed() -> (StatusCode, Json<Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed", "status": "error" })),
    )
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
