use serde::{Deserialize, Serialize};

use crate::tickets::TicketStatus;

/// `file_type` marker for asset links that point at a provider-side
/// retrieval collection rather than an uploaded document.
pub const RAG_KB_FILE_TYPE: &str = "rag_kb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub provider_agent_id: String,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub temperature: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetLink {
    pub id: String,
    pub asset_id: String,
    pub file_name: String,
    pub file_type: String,
    pub agent_id: Option<String>,
    pub owner_id: String,
    pub uploaded_at: String,
}

impl AssetLink {
    pub fn is_knowledge_base(&self) -> bool {
        self.file_type == RAG_KB_FILE_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub id: String,
    pub session_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub session_id: String,
    pub user_input: String,
    pub agent_reply: String,
    pub status: TicketStatus,
    pub agent_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A ticket joined with its visitor (by session id) and agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub visitor: Option<Visitor>,
    pub agent: Option<Agent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    #[serde(flatten)]
    pub agent: Agent,
    pub kb_assets: Vec<AssetLink>,
    pub ticket_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetail {
    #[serde(flatten)]
    pub agent: Agent,
    pub assets: Vec<AssetLink>,
}

/// Contact details the widget may attach to a chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Visitor write keyed by session id; `None` fields keep the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitorUpsert {
    pub session_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub now: String,
}

impl VisitorUpsert {
    pub fn from_info(session_id: &str, info: VisitorInfo, now: &str) -> Self {
        let clean = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            session_id: session_id.to_string(),
            name: clean(info.name),
            email: clean(info.email),
            user_agent: clean(info.user_agent),
            ip_address: clean(info.ip_address),
            now: now.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub visitor_info: Option<VisitorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub success: bool,
    pub response: String,
    pub ticket_id: String,
    pub session_id: String,
    pub agent_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAgentBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTicketBody {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub agent_reply: Option<String>,
    #[serde(default)]
    pub visitor_info: Option<VisitorInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchTicketBody {
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketStatusBody {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketListQuery {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKnowledgeBaseBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkKnowledgeBaseBody {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub rag_id: Option<String>,
    #[serde(default)]
    pub rag_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WidgetBootstrapQuery {
    pub agent_id: Option<String>,
}
