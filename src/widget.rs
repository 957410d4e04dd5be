//! Embeddable widget side: visitor session identity, script-tag config and
//! the client that talks to `/api/chat`.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::types::{ChatReply, VisitorInfo};

pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error. Please try again later.";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session storage io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session storage is not a JSON object: {0}")]
    Format(#[from] serde_json::Error),
}

/// Key/value persistence for the widget, the analogue of browser local storage.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A flat JSON object on disk. A missing file reads as empty.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Map<String, Value>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SessionStorage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.load().await?;
        Ok(entries.get(key).and_then(Value::as_str).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        let bytes = serde_json::to_vec_pretty(&entries)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

pub fn session_key(agent_id: &str) -> String {
    format!("chat_session_{agent_id}")
}

/// `session_<9 base-36 chars>_<unix millis>`.
pub fn generate_session_id() -> String {
    let mut entropy = Uuid::new_v4().as_u128();
    let mut suffix = String::with_capacity(9);
    for _ in 0..9 {
        suffix.push(BASE36[(entropy % 36) as usize] as char);
        entropy /= 36;
    }
    format!("session_{suffix}_{}", Utc::now().timestamp_millis())
}

/// Stable per storage and agent; a fresh id is minted and stored on first use.
pub async fn get_or_create_session_id(
    storage: &dyn SessionStorage,
    agent_id: &str,
) -> Result<String, StorageError> {
    let key = session_key(agent_id);
    if let Some(existing) = storage.get(&key).await?.filter(|v| !v.is_empty()) {
        return Ok(existing);
    }
    let session_id = generate_session_id();
    storage.set(&key, &session_id).await?;
    Ok(session_id)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WidgetPosition {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

impl WidgetPosition {
    fn from_attribute(raw: &str) -> Option<Self> {
        match raw.trim() {
            "bottom-right" => Some(Self::BottomRight),
            "bottom-left" => Some(Self::BottomLeft),
            "top-right" => Some(Self::TopRight),
            "top-left" => Some(Self::TopLeft),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BottomRight => "bottom-right",
            Self::BottomLeft => "bottom-left",
            Self::TopRight => "top-right",
            Self::TopLeft => "top-left",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WidgetConfigError {
    #[error("data-agent-id is required")]
    MissingAgentId,

    #[error("data-api-url is required")]
    MissingApiUrl,

    #[error("data-api-url is not a valid url: {0}")]
    InvalidApiUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    pub agent_id: String,
    pub api_url: String,
    pub title: String,
    pub subtitle: String,
    pub primary_color: String,
    pub position: WidgetPosition,
}

impl WidgetConfig {
    /// Read the embed script's `data-*` attributes. Failures are logged and
    /// mean no widget is mounted.
    pub fn from_attributes(attributes: &HashMap<String, String>) -> Result<Self, WidgetConfigError> {
        let result = Self::parse_attributes(attributes);
        if let Err(err) = &result {
            error!(error = %err, "chat widget not initialised");
        }
        result
    }

    fn parse_attributes(attributes: &HashMap<String, String>) -> Result<Self, WidgetConfigError> {
        let attr = |name: &str| {
            attributes
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let agent_id = attr("data-agent-id").ok_or(WidgetConfigError::MissingAgentId)?;
        let raw_url = attr("data-api-url").ok_or(WidgetConfigError::MissingApiUrl)?;
        let api_url = raw_url.trim_end_matches('/');
        Url::parse(api_url).map_err(|err| WidgetConfigError::InvalidApiUrl(err.to_string()))?;

        let position = match attr("data-position") {
            None => WidgetPosition::default(),
            Some(raw) => WidgetPosition::from_attribute(raw).unwrap_or_else(|| {
                warn!(position = raw, "unknown widget position, using bottom-right");
                WidgetPosition::default()
            }),
        };

        Ok(Self {
            agent_id: agent_id.to_string(),
            api_url: api_url.to_string(),
            title: attr("data-title").unwrap_or("Chat Support").to_string(),
            subtitle: attr("data-subtitle")
                .unwrap_or("How can we help you today?")
                .to_string(),
            primary_color: attr("data-primary-color").unwrap_or("#007bff").to_string(),
            position,
        })
    }
}

/// Tracks which agents already have a live widget on the page.
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    active: Mutex<HashSet<String>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a widget for `agent_id` is already active.
    pub fn register(&self, agent_id: &str) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(agent_id.to_string())
    }

    pub fn is_active(&self, agent_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.contains(agent_id)
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(agent_id)
    }
}

#[derive(Debug, Clone)]
pub struct WidgetClient {
    http: Client,
    config: WidgetConfig,
}

impl WidgetClient {
    pub fn new(config: WidgetConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    /// Text to show the visitor: the agent's reply, or the apology on any failure.
    pub async fn send_message(&self, session_id: &str, message: &str, visitor: &VisitorInfo) -> String {
        match self.post_chat(session_id, message, visitor).await {
            Ok(reply) => reply.response,
            Err(err) => {
                error!(agent_id = %self.config.agent_id, error = %err, "chat request failed");
                APOLOGY_MESSAGE.to_string()
            }
        }
    }

    async fn post_chat(
        &self,
        session_id: &str,
        message: &str,
        visitor: &VisitorInfo,
    ) -> Result<ChatReply, reqwest::Error> {
        self.http
            .post(format!("{}/api/chat", self.config.api_url))
            .json(&serde_json::json!({
                "agent_id": self.config.agent_id,
                "session_id": session_id,
                "message": message,
                "visitor_info": visitor,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<ChatReply>()
            .await
    }
}
