use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agents;
use crate::auth::auth_user_from_headers;
use crate::config::{Config, ConfigError, StoreBackend};
use crate::db::PgStore;
use crate::error::ApiError;
use crate::knowledge::{self, DocumentUpload};
use crate::memory::MemoryStore;
use crate::provider::{AgentProvider, LyzrClient, ProviderError};
use crate::relay::{relay_message, InboundMessage};
use crate::store::{now_iso, Store, StoreError};
use crate::tickets::{self, non_blank, PageRequest, TicketFilter, TicketStatus, TransitionPolicy};
use crate::types::{
    ChatBody, CreateAgentBody, CreateKnowledgeBaseBody, CreateTicketBody, LinkKnowledgeBaseBody,
    PatchTicketBody, TicketListQuery, TicketStatusBody, UpdateAgentBody, WidgetBootstrapQuery,
};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn AgentProvider>,
    pub transitions: TransitionPolicy,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn AgentProvider>,
        transitions: TransitionPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            transitions,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build provider client: {0}")]
    Provider(#[from] ProviderError),

    #[error("server io failed: {0}")]
    Io(#[from] std::io::Error),
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/widget/bootstrap", get(widget_bootstrap))
        .route(
            "/api/tickets",
            get(list_tickets).post(create_ticket).patch(patch_ticket),
        )
        .route("/api/tickets/{ticket_id}", get(get_ticket).put(put_ticket))
        .route("/api/agents", get(list_agents).post(create_agent))
        .route(
            "/api/agents/{agent_id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route(
            "/api/knowledge-base",
            get(list_knowledge_bases).post(create_knowledge_base),
        )
        .route("/api/knowledge-base/link", post(link_knowledge_base))
        .route("/api/upload-doc", post(upload_doc))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let inbound = InboundMessage::from_body(body, &headers)?;
    let reply = relay_message(&state, inbound).await?;
    Ok(Json(reply))
}

/// Public: the widget header needs the agent's display name before any chat.
async fn widget_bootstrap(
    Query(params): Query<WidgetBootstrapQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(agent_id) = non_blank(params.agent_id) else {
        return Err(ApiError::validation("agent_id query parameter is required"));
    };
    let agent = state
        .store
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    Ok(Json(json!({
        "agent": {
            "id": agent.id,
            "name": agent.name,
            "description": agent.description,
        }
    })))
}

async fn list_tickets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TicketListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let status = match non_blank(query.status) {
        Some(raw) => Some(TicketStatus::parse(&raw)?),
        None => None,
    };
    let page = PageRequest::parse(query.page.as_deref(), query.limit.as_deref())?;
    let filter = TicketFilter {
        owner_id: Some(user_id),
        agent_id: non_blank(query.agent_id),
        status,
    };
    let (tickets, pagination) = tickets::list_tickets(&state, &filter, page).await?;
    Ok(Json(json!({
        "success": true,
        "tickets": tickets,
        "pagination": pagination,
    })))
}

async fn create_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateTicketBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    let ticket = tickets::create_ticket(&state, &user_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "ticket": ticket })),
    ))
}

async fn patch_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PatchTicketBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    let (Some(ticket_id), Some(status)) = (non_blank(body.ticket_id), non_blank(body.status))
    else {
        return Err(ApiError::validation("Ticket ID and status are required"));
    };
    let ticket = tickets::update_status(&state, &user_id, &ticket_id, &status).await?;
    Ok(Json(json!({ "success": true, "ticket": ticket })))
}

async fn get_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let ticket = tickets::get_ticket(&state, &user_id, &ticket_id).await?;
    Ok(Json(json!({ "success": true, "ticket": ticket })))
}

async fn put_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
    payload: Result<Json<TicketStatusBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    let Some(status) = non_blank(body.status) else {
        return Err(ApiError::validation("Status is required"));
    };
    let ticket = tickets::update_status(&state, &user_id, &ticket_id, &status).await?;
    Ok(Json(json!({ "success": true, "ticket": ticket })))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let agents = agents::list_agents(&state, &user_id).await?;
    Ok(Json(json!({ "success": true, "agents": agents })))
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateAgentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    let agent = agents::create_agent(&state, &user_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "agent": agent })),
    ))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let agent = agents::get_agent(&state, &user_id, &agent_id).await?;
    Ok(Json(json!({ "success": true, "agent": agent })))
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    payload: Result<Json<UpdateAgentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    let agent = agents::update_agent(&state, &user_id, &agent_id, body).await?;
    Ok(Json(json!({ "success": true, "agent": agent })))
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    agents::delete_agent(&state, &user_id, &agent_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Agent deleted successfully",
    })))
}

async fn list_knowledge_bases(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let knowledge_bases = knowledge::list_knowledge_bases(&state, &user_id).await?;
    Ok(Json(json!({ "success": true, "knowledgeBases": knowledge_bases })))
}

async fn create_knowledge_base(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateKnowledgeBaseBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    let created = knowledge::create_knowledge_base(&state, &user_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "knowledgeBase": created,
            "message": "Knowledge base created successfully",
        })),
    ))
}

async fn link_knowledge_base(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<LinkKnowledgeBaseBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let Json(body) = payload?;
    knowledge::link_knowledge_base(&state, &user_id, body).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Knowledge base linked to agent successfully",
    })))
}

async fn upload_doc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;

    let mut agent_id: Option<String> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(ApiError::validation_with_details(
                    "Invalid multipart body",
                    err.body_text(),
                ))
            }
        };
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "agent_id" | "agentId" => {
                agent_id = field.text().await.ok().and_then(|v| non_blank(Some(v)));
            }
            "file" => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let content_type = field
                    .content_type()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                match field.bytes().await {
                    Ok(bytes) if !bytes.is_empty() => {
                        file = Some((file_name, content_type, bytes.to_vec()))
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    let (Some(agent_id), Some((file_name, content_type, bytes))) = (agent_id, file) else {
        return Err(ApiError::validation("Agent ID and file are required"));
    };
    let uploaded = knowledge::upload_document(
        &state,
        &user_id,
        DocumentUpload {
            agent_id,
            file_name,
            content_type,
            bytes,
        },
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Document uploaded successfully",
        "ragId": uploaded.rag_id,
        "ragName": uploaded.rag_name,
        "fileName": uploaded.file_name,
        "uploadResponse": uploaded.upload_response,
    })))
}

/// In-memory backend, with `DEV_API_TOKEN` registered when set.
async fn memory_store(config: &Config) -> MemoryStore {
    let store = MemoryStore::new();
    match &config.dev_token {
        Some(dev) => {
            store.insert_token(&dev.token, &dev.user_id).await;
            info!(user_id = %dev.user_id, "registered DEV_API_TOKEN");
        }
        None => warn!("no DEV_API_TOKEN set; every dashboard request will be rejected"),
    }
    store
}

pub async fn run() -> Result<(), StartupError> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let db = PgStore::connect(&config.database).await?;
            db.run_migrations().await?;
            Arc::new(db)
        }
        StoreBackend::Memory => {
            info!("using in-memory store; data is lost on restart");
            Arc::new(memory_store(&config).await)
        }
    };
    let provider: Arc<dyn AgentProvider> = Arc::new(LyzrClient::new(config.provider.clone())?);

    let state = Arc::new(AppState::new(store, provider, config.transitions));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(port = config.port, transitions = ?config.transitions, "support relay listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_hash;

    fn memory_config(pairs: &[(&str, &str)]) -> Config {
        Config::from_lookup(|key| {
            pairs
                .iter()
                .chain(&[("LYZR_API_KEY", "k"), ("CHAT_STORE", "memory")])
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn memory_store_registers_the_dev_token() {
        let config = memory_config(&[("DEV_API_TOKEN", "local-dev"), ("DEV_USER_ID", "ops")]);
        let store = memory_store(&config).await;
        assert_eq!(
            store.user_for_token(&token_hash("local-dev")).await.unwrap().as_deref(),
            Some("ops")
        );
        assert!(store.user_for_token(&token_hash("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_without_dev_token_knows_no_users() {
        let store = memory_store(&memory_config(&[])).await;
        assert!(store.user_for_token(&token_hash("local-dev")).await.unwrap().is_none());
    }
}
