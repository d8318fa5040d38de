//! REST API routes.
//!
//! Endpoints:
//!
//! - `POST /api/chat`                                  — Run one chat turn
//! - `GET  /api/conversations/{user_id}`               — List stored conversations
//! - `GET  /api/conversations/{user_id}/{conversation_id}` — Fetch one conversation
//! - `GET  /api/tools`                                 — The merged tool catalog
//! - `POST /api/servers/test`                          — Tool server connectivity check
//!
//! The chat endpoint returns the per-request step log alongside the reply so
//! callers can show what the turn did. Error payloads carry the same log.

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use powernode_agent::FileContext;
use powernode_config::ToolServerConfig;
use powernode_core::message::{Conversation, ConversationId, Message, Role};
use powernode_mcp::McpClient;
use powernode_storage::ConversationSummary;
use powernode_telemetry::{StepEntry, StepLog};

use crate::SharedState;

/// Build the `/api` router. Nest this under "/api" in the main router.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/conversations/{user_id}", get(list_conversations_handler))
        .route(
            "/conversations/{user_id}/{conversation_id}",
            get(get_conversation_handler),
        )
        .route("/tools", get(list_tools_handler))
        .route("/servers/test", post(test_server_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    /// The user's message. Empty or missing is rejected.
    #[serde(default)]
    message: String,

    /// Prior turns supplied by the caller; used to seed a conversation the
    /// store does not know yet.
    #[serde(default)]
    conversation_history: Vec<HistoryMessage>,

    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    drive_id: Option<String>,
    #[serde(default)]
    storage_provider: Option<String>,

    /// Existing conversation ID (omit to start a new one).
    #[serde(default)]
    conversation_id: Option<String>,

    #[serde(default)]
    user_id: Option<String>,

    /// Work item reference; arrives as a string or a number depending on
    /// the caller.
    #[serde(default)]
    wippli_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct HistoryMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    success: bool,
    reply: String,
    logs: Vec<StepEntry>,
    conversation_id: String,
    metadata: ChatMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMetadata {
    provider: String,
    model: String,
    tokens: TokenCounts,
    cost: f64,
    /// Wall-clock milliseconds for the whole request.
    duration: u64,
    mcp_tools_executed: u32,
    tools_available: usize,
}

#[derive(Serialize)]
struct TokenCounts {
    input: u64,
    output: u64,
    total: u64,
}

#[derive(Serialize)]
struct ChatErrorResponse {
    success: bool,
    error: String,
    logs: Vec<StepEntry>,
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationSummary>,
    count: usize,
}

#[derive(Serialize)]
struct ConversationDetailResponse {
    id: String,
    title: Option<String>,
    messages: Vec<MessageDto>,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
struct MessageDto {
    id: String,
    role: &'static str,
    content: String,
    timestamp: String,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDto {
    name: String,
    server: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTestRequest {
    url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    n8n_instance_url: Option<String>,
    #[serde(default)]
    supplier_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerTestResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ChatErrorResponse>)> {
    let started = std::time::Instant::now();

    if payload.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ChatErrorResponse {
                success: false,
                error: "message must not be empty".into(),
                logs: Vec::new(),
            }),
        ));
    }

    let user_id = payload
        .user_id
        .clone()
        .unwrap_or_else(|| "anonymous".to_string());
    info!(user = %user_id, message_len = payload.message.len(), "chat request");

    let mut steps = StepLog::new();
    let mut conversation = resolve_conversation(&state, &user_id, &payload, &mut steps).await;
    conversation.push(Message::user(&payload.message));

    let file = file_context(&payload);

    let outcome = match state.agent.run(&mut conversation, file.as_ref(), &mut steps).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Chat turn failed");
            steps.error(format!("Chat turn failed: {e}"));
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatErrorResponse {
                    success: false,
                    error: e.to_string(),
                    logs: steps.into_entries(),
                }),
            ));
        }
    };

    // Persistence failures never fail the request
    match state.store.save(&user_id, &conversation).await {
        Ok(()) => steps.info(format!(
            "Conversation {} saved ({} messages)",
            conversation.id,
            conversation.messages.len()
        )),
        Err(e) => steps.error(format!("Failed to persist conversation: {e}")),
    }

    let duration = started.elapsed().as_millis() as u64;
    Ok(Json(ChatResponse {
        success: true,
        reply: outcome.reply,
        conversation_id: conversation.id.to_string(),
        metadata: ChatMetadata {
            provider: state.provider_name.clone(),
            model: outcome.model,
            tokens: TokenCounts {
                input: outcome.usage.input_tokens,
                output: outcome.usage.output_tokens,
                total: outcome.usage.total(),
            },
            cost: outcome.cost,
            duration,
            mcp_tools_executed: outcome.tools_executed,
            tools_available: outcome.tools_available,
        },
        logs: steps.into_entries(),
    }))
}

/// Load the referenced conversation, or seed a fresh one from the posted
/// history. Stored history wins over the posted copy; a failed load falls
/// back to seeding so a broken store degrades to stateless chat.
async fn resolve_conversation(
    state: &crate::GatewayState,
    user_id: &str,
    payload: &ChatRequest,
    steps: &mut StepLog,
) -> Conversation {
    let Some(id) = payload.conversation_id.as_deref() else {
        return seeded_conversation(None, &payload.conversation_history);
    };

    match state.store.load(user_id, id).await {
        Ok(Some(conversation)) => {
            steps.info(format!(
                "Resumed conversation {id} ({} stored messages)",
                conversation.messages.len()
            ));
            conversation
        }
        Ok(None) => seeded_conversation(Some(id), &payload.conversation_history),
        Err(e) => {
            steps.error(format!("Failed to load conversation {id}: {e}"));
            seeded_conversation(Some(id), &payload.conversation_history)
        }
    }
}

fn seeded_conversation(id: Option<&str>, history: &[HistoryMessage]) -> Conversation {
    let mut conversation = match id {
        Some(id) => Conversation::with_id(ConversationId::from(id)),
        None => Conversation::new(),
    };
    for entry in history {
        let message = match entry.role.as_str() {
            "assistant" => Message::assistant(&entry.content),
            "system" => Message::system(&entry.content),
            _ => Message::user(&entry.content),
        };
        conversation.push(message);
    }
    conversation
}

fn file_context(payload: &ChatRequest) -> Option<FileContext> {
    let file = FileContext {
        file_name: payload.file_name.clone(),
        file_url: payload.file_url.clone(),
        file_id: payload.file_id.clone(),
        drive_id: payload.drive_id.clone(),
        storage_provider: payload.storage_provider.clone(),
        wippli_id: payload.wippli_id.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    };
    if file.is_empty() { None } else { Some(file) }
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<ConversationListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let conversations = state.store.list(&user_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to list conversations: {e}"),
            }),
        )
    })?;

    Ok(Json(ConversationListResponse {
        count: conversations.len(),
        conversations,
    }))
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<ConversationDetailResponse>, (StatusCode, Json<ErrorResponse>)> {
    let conversation = state
        .store
        .load(&user_id, &conversation_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to load conversation: {e}"),
                }),
            )
        })?;

    match conversation {
        Some(conversation) => Ok(Json(ConversationDetailResponse {
            id: conversation.id.to_string(),
            title: conversation.title.clone(),
            created_at: conversation.created_at.to_rfc3339(),
            updated_at: conversation.updated_at.to_rfc3339(),
            messages: conversation
                .messages
                .iter()
                .map(|m| MessageDto {
                    id: m.id.clone(),
                    role: role_name(&m.role),
                    content: m.content.clone(),
                    timestamp: m.timestamp.to_rfc3339(),
                })
                .collect(),
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Conversation '{conversation_id}' not found"),
            }),
        )),
    }
}

fn role_name(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

/// The catalog exactly as a chat turn would see it, including tools from
/// servers that answer discovery right now.
async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let mut steps = StepLog::new();
    let catalog = state.engine.discover(&mut steps).await;

    let tools: Vec<ToolDto> = catalog
        .entries()
        .into_iter()
        .map(|entry| ToolDto {
            name: entry.qualified_name.clone(),
            server: entry.server_id.clone(),
            description: entry.description.clone(),
            input_schema: entry.input_schema.clone(),
        })
        .collect();

    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

async fn test_server_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ServerTestRequest>,
) -> Json<ServerTestResponse> {
    let server = ToolServerConfig {
        id: "connectivity-test".into(),
        url: payload.url,
        api_key: payload.api_key,
        n8n_instance_url: payload.n8n_instance_url,
        supplier_id: payload.supplier_id,
        enabled: true,
    };
    let client = McpClient::new(state.http.clone(), &server);

    match client.initialize().await {
        Ok(init) => Json(ServerTestResponse {
            ok: true,
            protocol_version: Some(init.protocol_version),
            server_name: init.server_info.as_ref().map(|s| s.name.clone()),
            server_version: init.server_info.and_then(|s| s.version),
            error: None,
        }),
        Err(e) => Json(ServerTestResponse {
            ok: false,
            protocol_version: None,
            server_name: None,
            server_version: None,
            error: Some(e.to_string()),
        }),
    }
}
