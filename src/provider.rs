//! Integration layer for the hosted agent / RAG provider.
//!
//! Each call has exactly one documented response schema; callers never search
//! for alternative field names.

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProviderConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider response did not match schema: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub message: String,
}

/// Everything the provider needs to re-point an agent at a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionLink {
    pub provider_agent_id: String,
    pub rag_id: String,
    pub rag_name: String,
    pub agent_name: String,
    pub description: String,
    pub agent_role: String,
    pub agent_instructions: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub extra_info: Value,
}

#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Returns the provider-side agent id.
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String, ProviderError>;
    /// Returns the agent's reply text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, ProviderError>;
    /// Returns the provider-side collection id.
    async fn create_collection(
        &self,
        collection_name: &str,
        description: &str,
    ) -> Result<String, ProviderError>;
    async fn link_collection(&self, link: &CollectionLink) -> Result<(), ProviderError>;
    async fn upload_document(
        &self,
        rag_id: &str,
        document: Document,
    ) -> Result<Value, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct CreatedAgent {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct CreatedCollection {
    id: String,
}

/// HTTP client for the Lyzr agent and RAG APIs.
#[derive(Clone)]
pub struct LyzrClient {
    http: Client,
    config: ProviderConfig,
}

impl LyzrClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(std::time::Duration::from_secs(10)))
            .build()?;
        Ok(Self { http, config })
    }

    fn agent_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn rag_url(&self, path: &str) -> String {
        format!("{}{}", self.config.rag_base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let response = self.authed(builder).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "provider request rejected");
            return Err(ProviderError::Status { status, body });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = self.send(builder).await?;
        let payload = response.json::<Value>().await?;
        serde_json::from_value(payload).map_err(|err| ProviderError::Schema(err.to_string()))
    }
}

#[async_trait]
impl AgentProvider for LyzrClient {
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String, ProviderError> {
        let body = json!({
            "api_key": self.config.api_key,
            "template_type": "single_task",
            "name": spec.name,
            "description": spec.description,
            "agent_role": "Your task is to assist users with their customer support queries.",
            "agent_instructions": spec.system_prompt,
            "examples": null,
            "features": [{ "type": "KNOWLEDGE_BASE", "config": {}, "priority": 1 }],
            "tool": null,
            "tool_usage_description": "Provide helpful assistance to users.",
            "response_format": null,
            "provider_id": self.config.provider_id,
            "model": self.config.model,
            "top_p": 0.9,
            "temperature": spec.temperature,
            "version": "3",
            "llm_credential_id": self.config.llm_credential_id,
        });
        let created: CreatedAgent = self
            .send_json(self.http.post(self.agent_url("/v3/agents/")).json(&body))
            .await?;
        debug!(provider_agent_id = %created.agent_id, "provider agent created");
        Ok(created.agent_id)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let reply: ChatResponse = self
            .send_json(
                self.http
                    .post(self.agent_url("/v3/inference/chat/"))
                    .json(request),
            )
            .await?;
        Ok(reply.response)
    }

    async fn create_collection(
        &self,
        collection_name: &str,
        description: &str,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "user_id": self.config.api_key,
            "llm_credential_id": self.config.llm_credential_id,
            "embedding_credential_id": "lyzr_openai",
            "vector_db_credential_id": "lyzr_qdrant",
            "description": description,
            "collection_name": collection_name,
            "llm_model": self.config.model,
            "embedding_model": "text-embedding-ada-002",
            "vector_store_provider": "Qdrant [Lyzr]",
            "semantic_data_model": false,
            "meta_data": {},
        });
        let created: CreatedCollection = self
            .send_json(self.http.post(self.rag_url("/v3/rag/")).json(&body))
            .await?;
        Ok(created.id)
    }

    async fn link_collection(&self, link: &CollectionLink) -> Result<(), ProviderError> {
        let body = json!({
            "name": link.agent_name,
            "description": link.description,
            "agent_role": link.agent_role,
            "agent_goal": "Help raise complaint tickets and resolve it",
            "agent_instructions": link.agent_instructions,
            "examples": null,
            "tool": "",
            "tool_usage_description": "{}",
            "provider_id": self.config.provider_id,
            "model": self.config.model,
            "temperature": link.temperature,
            "top_p": 0.9,
            "llm_credential_id": self.config.llm_credential_id,
            "features": [{
                "type": "KNOWLEDGE_BASE",
                "config": {
                    "lyzr_rag": {
                        "base_url": self.config.rag_base_url,
                        "rag_id": link.rag_id,
                        "rag_name": link.rag_name,
                        "params": { "top_k": 5, "retrieval_type": "basic", "score_threshold": 0 }
                    },
                    "agentic_rag": []
                },
                "priority": 0
            }],
            "managed_agents": [],
            "response_format": { "type": "text" },
        });
        let url = self.agent_url(&format!(
            "/v3/agents/template/single-task/{}",
            link.provider_agent_id
        ));
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn upload_document(
        &self,
        rag_id: &str,
        document: Document,
    ) -> Result<Value, ProviderError> {
        let part = multipart::Part::bytes(document.bytes)
            .file_name(document.file_name)
            .mime_str(&document.content_type)?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("data_parser", "llmsherpa")
            .text("extra_info", document.extra_info.to_string());
        let request = self
            .http
            .post(self.rag_url("/v3/train/pdf/"))
            .query(&[("rag_id", rag_id)])
            .multipart(form);
        let response = self.send(request).await?;
        Ok(response.json::<Value>().await?)
    }
}
