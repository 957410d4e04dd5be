//! In-process [`Store`] used by tests and `CHAT_STORE=memory`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::token_hash;
use crate::store::{Store, StoreError};
use crate::tickets::{PageRequest, TicketFilter, TicketStatus};
use crate::types::{Agent, AssetLink, Ticket, TicketView, Visitor, VisitorUpsert};

#[derive(Default)]
struct MemoryState {
    tokens: HashMap<String, String>,
    agents: HashMap<String, Agent>,
    assets: Vec<AssetLink>,
    visitors: HashMap<String, Visitor>,
    // insertion order breaks created_at ties
    tickets: Vec<Ticket>,
}

impl MemoryState {
    fn view(&self, ticket: &Ticket) -> TicketView {
        TicketView {
            ticket: ticket.clone(),
            visitor: self.visitors.get(&ticket.session_id).cloned(),
            agent: self.agents.get(&ticket.agent_id).cloned(),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bearer token for `user_id`.
    pub async fn insert_token(&self, token: &str, user_id: &str) {
        self.state
            .write()
            .await
            .tokens
            .insert(token_hash(token), user_id.to_string());
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.read().await.tickets.len()
    }

    pub async fn asset_count(&self) -> usize {
        self.state.read().await.assets.len()
    }

    pub async fn agent_count(&self) -> usize {
        self.state.read().await.agents.len()
    }

    pub async fn visitor(&self, session_id: &str) -> Option<Visitor> {
        self.state.read().await.visitors.get(session_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_for_token(&self, token_hash: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.tokens.get(token_hash).cloned())
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent.id) {
            return Err(StoreError::Integrity(format!("duplicate agent id {}", agent.id)));
        }
        state.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        Ok(self.state.read().await.agents.get(agent_id).cloned())
    }

    async fn list_agents(&self, user_id: &str) -> Result<Vec<Agent>, StoreError> {
        let state = self.state.read().await;
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|agent| agent.user_id == user_id)
            .cloned()
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(agents)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.agents.get_mut(&agent.id) {
            Some(existing) => {
                *existing = agent.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.agents.remove(agent_id).is_none() {
            return Ok(false);
        }
        state
            .assets
            .retain(|asset| asset.agent_id.as_deref() != Some(agent_id));
        state.tickets.retain(|ticket| ticket.agent_id != agent_id);
        Ok(true)
    }

    async fn insert_asset(&self, asset: &AssetLink) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(agent_id) = &asset.agent_id {
            if !state.agents.contains_key(agent_id) {
                return Err(StoreError::Integrity(format!(
                    "asset link references missing agent {agent_id}"
                )));
            }
        }
        state.assets.push(asset.clone());
        Ok(())
    }

    async fn assets_for_agent(&self, agent_id: &str) -> Result<Vec<AssetLink>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .assets
            .iter()
            .filter(|asset| asset.agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect())
    }

    async fn knowledge_bases(&self, owner_id: &str) -> Result<Vec<AssetLink>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .assets
            .iter()
            .filter(|asset| asset.is_knowledge_base() && asset.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn link_knowledge_base(
        &self,
        asset_id: &str,
        agent_id: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for asset in state
            .assets
            .iter_mut()
            .filter(|asset| asset.is_knowledge_base() && asset.asset_id == asset_id)
        {
            asset.agent_id = Some(agent_id.to_string());
            touched += 1;
        }
        Ok(touched)
    }

    async fn upsert_visitor(&self, upsert: &VisitorUpsert) -> Result<Visitor, StoreError> {
        let mut state = self.state.write().await;
        let visitor = state
            .visitors
            .entry(upsert.session_id.clone())
            .or_insert_with(|| Visitor {
                id: Uuid::new_v4().to_string(),
                session_id: upsert.session_id.clone(),
                name: None,
                email: None,
                user_agent: None,
                ip_address: None,
                created_at: upsert.now.clone(),
                updated_at: upsert.now.clone(),
            });
        if upsert.name.is_some() {
            visitor.name = upsert.name.clone();
        }
        if upsert.email.is_some() {
            visitor.email = upsert.email.clone();
        }
        if upsert.user_agent.is_some() {
            visitor.user_agent = upsert.user_agent.clone();
        }
        if upsert.ip_address.is_some() {
            visitor.ip_address = upsert.ip_address.clone();
        }
        visitor.updated_at = upsert.now.clone();
        Ok(visitor.clone())
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.agents.contains_key(&ticket.agent_id) {
            return Err(StoreError::Integrity(format!(
                "ticket references missing agent {}",
                ticket.agent_id
            )));
        }
        state.tickets.push(ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<TicketView>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .iter()
            .find(|ticket| ticket.id == ticket_id)
            .map(|ticket| state.view(ticket)))
    }

    async fn set_ticket_status(
        &self,
        ticket_id: &str,
        expected: Option<TicketStatus>,
        status: TicketStatus,
        updated_at: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(ticket) = state.tickets.iter_mut().find(|t| t.id == ticket_id) else {
            return Ok(false);
        };
        if expected.is_some_and(|expected| expected != ticket.status) {
            return Ok(false);
        }
        ticket.status = status;
        ticket.updated_at = updated_at.to_string();
        Ok(true)
    }

    async fn count_tickets(&self, agent_id: &str) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state.tickets.iter().filter(|t| t.agent_id == agent_id).count() as i64)
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: PageRequest,
    ) -> Result<(Vec<TicketView>, i64), StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<(usize, &Ticket)> = state
            .tickets
            .iter()
            .enumerate()
            .filter(|(_, ticket)| {
                state
                    .agents
                    .get(&ticket.agent_id)
                    .is_some_and(|agent| filter.matches(ticket, &agent.user_id))
            })
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| {
            b.created_at.cmp(&a.created_at).then_with(|| ib.cmp(ia))
        });

        let total = matching.len() as i64;
        let tickets = matching
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .map(|(_, ticket)| state.view(ticket))
            .collect();
        Ok((tickets, total))
    }
}
