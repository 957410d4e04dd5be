use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::tickets::{PageRequest, TicketFilter, TicketStatus};
use crate::types::{Agent, AssetLink, Ticket, TicketView, Visitor, VisitorUpsert};

/// RFC 3339 UTC timestamp with fixed microsecond width, so lexical order is
/// chronological order.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("integrity violation: {0}")]
    Integrity(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve the owner of a bearer token, by SHA-256 hex digest.
    async fn user_for_token(&self, token_hash: &str) -> Result<Option<String>, StoreError>;

    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError>;
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError>;
    /// Agents owned by `user_id`, newest first.
    async fn list_agents(&self, user_id: &str) -> Result<Vec<Agent>, StoreError>;
    async fn update_agent(&self, agent: &Agent) -> Result<bool, StoreError>;
    /// Remove the agent together with its asset links and tickets.
    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError>;

    async fn insert_asset(&self, asset: &AssetLink) -> Result<(), StoreError>;
    async fn assets_for_agent(&self, agent_id: &str) -> Result<Vec<AssetLink>, StoreError>;
    async fn knowledge_bases(&self, owner_id: &str) -> Result<Vec<AssetLink>, StoreError>;
    /// Attach every `rag_kb` link for `asset_id` to `agent_id`; returns rows touched.
    async fn link_knowledge_base(&self, asset_id: &str, agent_id: &str)
        -> Result<u64, StoreError>;

    async fn upsert_visitor(&self, visitor: &VisitorUpsert) -> Result<Visitor, StoreError>;

    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;
    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<TicketView>, StoreError>;
    /// Write `status`; when `expected` is set the write only applies if the
    /// stored status still equals it. Returns whether a row changed.
    async fn set_ticket_status(
        &self,
        ticket_id: &str,
        expected: Option<TicketStatus>,
        status: TicketStatus,
        updated_at: &str,
    ) -> Result<bool, StoreError>;
    async fn count_tickets(&self, agent_id: &str) -> Result<i64, StoreError>;
    /// One page of matching tickets (newest first) and the unpaginated count.
    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: PageRequest,
    ) -> Result<(Vec<TicketView>, i64), StoreError>;
}
