#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use support_relay::app::{router, AppState};
use support_relay::memory::MemoryStore;
use support_relay::provider::{
    AgentProvider, AgentSpec, ChatRequest, CollectionLink, Document, ProviderError,
};
use support_relay::store::Store;
use support_relay::tickets::TransitionPolicy;
use tower::ServiceExt;

pub const TOKEN: &str = "token-alice";
pub const OTHER_TOKEN: &str = "token-bob";

/// Provider double: canned replies, a call log and per-operation failures.
#[derive(Default)]
pub struct ScriptedProvider {
    pub calls: Mutex<Vec<String>>,
    pub chat_reply: Mutex<String>,
    pub fail_create_agent: Mutex<bool>,
    pub fail_chat: Mutex<bool>,
    pub fail_link: Mutex<bool>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            chat_reply: Mutex::new("Happy to help with that.".to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn refused() -> ProviderError {
        ProviderError::Status {
            status: 502,
            body: "provider secret stack trace".to_string(),
        }
    }
}

#[async_trait]
impl AgentProvider for ScriptedProvider {
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String, ProviderError> {
        self.record(format!("create_agent:{}", spec.name));
        if *self.fail_create_agent.lock().unwrap() {
            return Err(Self::refused());
        }
        Ok(format!("lyzr-{}", spec.name.to_lowercase().replace(' ', "-")))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        self.record(format!("chat:{}:{}", request.agent_id, request.session_id));
        if *self.fail_chat.lock().unwrap() {
            return Err(Self::refused());
        }
        Ok(self.chat_reply.lock().unwrap().clone())
    }

    async fn create_collection(
        &self,
        collection_name: &str,
        _description: &str,
    ) -> Result<String, ProviderError> {
        self.record(format!("create_collection:{collection_name}"));
        Ok("rag-1".to_string())
    }

    async fn link_collection(&self, link: &CollectionLink) -> Result<(), ProviderError> {
        self.record(format!("link_collection:{}:{}", link.provider_agent_id, link.rag_id));
        if *self.fail_link.lock().unwrap() {
            return Err(Self::refused());
        }
        Ok(())
    }

    async fn upload_document(
        &self,
        rag_id: &str,
        document: Document,
    ) -> Result<Value, ProviderError> {
        self.record(format!("upload_document:{rag_id}:{}", document.file_name));
        Ok(json!({ "status": "ok", "chunks": 3 }))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub app: Router,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_policy(TransitionPolicy::Permissive).await
    }

    pub async fn with_policy(transitions: TransitionPolicy) -> Self {
        Self::with_store(transitions, |store| store).await
    }

    /// Serve the app from whatever `wrap` builds around the memory store;
    /// `self.store` still points at the underlying memory store.
    pub async fn with_store<F>(transitions: TransitionPolicy, wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryStore>) -> Arc<dyn Store>,
    {
        let store = Arc::new(MemoryStore::new());
        store.insert_token(TOKEN, "user-alice").await;
        store.insert_token(OTHER_TOKEN, "user-bob").await;
        let provider = Arc::new(ScriptedProvider::new());
        let state = Arc::new(AppState::new(wrap(store.clone()), provider.clone(), transitions));
        Self {
            store,
            provider,
            app: router(state),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Create an agent owned by the default user and return its id.
    pub async fn create_agent(&self, name: &str) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/api/agents",
                Some(TOKEN),
                json!({
                    "name": name,
                    "description": "Front desk",
                    "system_prompt": "Be helpful.",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["agent"]["id"].as_str().unwrap().to_string()
    }

    pub async fn chat(&self, agent_id: &str, session_id: &str, message: &str) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/api/chat",
            None,
            json!({
                "agent_id": agent_id,
                "session_id": session_id,
                "message": message,
            }),
        )
        .await
    }
}
