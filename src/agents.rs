use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::provider::AgentSpec;
use crate::store::now_iso;
use crate::tickets::non_blank;
use crate::types::{Agent, AgentDetail, AgentSummary, CreateAgentBody, UpdateAgentBody};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

fn validate_temperature(temperature: Option<f64>) -> Result<Option<f64>, ApiError> {
    match temperature {
        Some(t) if !(0.0..=2.0).contains(&t) => Err(ApiError::validation(
            "temperature must be between 0 and 2",
        )),
        other => Ok(other),
    }
}

/// Fetch an agent owned by `user_id`; anything else reads as not found.
pub async fn owned_agent(state: &AppState, user_id: &str, agent_id: &str) -> Result<Agent, ApiError> {
    match state.store.get_agent(agent_id).await? {
        Some(agent) if agent.user_id == user_id => Ok(agent),
        _ => Err(ApiError::not_found("Agent not found")),
    }
}

async fn summarize(state: &AppState, agent: Agent) -> Result<AgentSummary, ApiError> {
    let kb_assets = state.store.assets_for_agent(&agent.id).await?;
    let ticket_count = state.store.count_tickets(&agent.id).await?;
    Ok(AgentSummary {
        agent,
        kb_assets,
        ticket_count,
    })
}

/// Validates before touching the provider or storage, so a rejected request
/// leaves no trace anywhere.
pub async fn create_agent(
    state: &AppState,
    user_id: &str,
    body: CreateAgentBody,
) -> Result<AgentSummary, ApiError> {
    let (Some(name), Some(system_prompt)) = (non_blank(body.name), non_blank(body.system_prompt))
    else {
        return Err(ApiError::validation(
            "Missing required fields: name, system_prompt",
        ));
    };
    let temperature = validate_temperature(body.temperature)?.unwrap_or(DEFAULT_TEMPERATURE);
    let description = non_blank(body.description);

    let provider_agent_id = state
        .provider
        .create_agent(&AgentSpec {
            name: name.clone(),
            description: description.clone().unwrap_or_default(),
            system_prompt: system_prompt.clone(),
            temperature,
        })
        .await
        .map_err(|err| ApiError::upstream("Failed to create agent", err))?;

    let now = now_iso();
    let agent = Agent {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        provider_agent_id,
        name,
        description,
        system_prompt,
        temperature,
        created_at: now.clone(),
        updated_at: now,
    };
    state
        .store
        .insert_agent(&agent)
        .await
        .map_err(|err| ApiError::persistence("Failed to create agent", err))?;

    info!(agent_id = %agent.id, provider_agent_id = %agent.provider_agent_id, "agent created");
    summarize(state, agent).await
}

pub async fn list_agents(state: &AppState, user_id: &str) -> Result<Vec<AgentSummary>, ApiError> {
    let agents = state.store.list_agents(user_id).await?;
    let mut summaries = Vec::with_capacity(agents.len());
    for agent in agents {
        summaries.push(summarize(state, agent).await?);
    }
    Ok(summaries)
}

pub async fn get_agent(
    state: &AppState,
    user_id: &str,
    agent_id: &str,
) -> Result<AgentDetail, ApiError> {
    let agent = owned_agent(state, user_id, agent_id).await?;
    let assets = state.store.assets_for_agent(&agent.id).await?;
    Ok(AgentDetail { agent, assets })
}

pub async fn update_agent(
    state: &AppState,
    user_id: &str,
    agent_id: &str,
    body: UpdateAgentBody,
) -> Result<Agent, ApiError> {
    let (Some(name), Some(description)) = (non_blank(body.name), non_blank(body.description))
    else {
        return Err(ApiError::validation("Name and description are required"));
    };
    let temperature = validate_temperature(body.temperature)?;

    let mut agent = owned_agent(state, user_id, agent_id).await?;
    agent.name = name;
    agent.description = Some(description);
    if let Some(system_prompt) = non_blank(body.system_prompt) {
        agent.system_prompt = system_prompt;
    }
    if let Some(temperature) = temperature {
        agent.temperature = temperature;
    }
    agent.updated_at = now_iso();

    if !state.store.update_agent(&agent).await? {
        return Err(ApiError::not_found("Agent not found"));
    }
    Ok(agent)
}

pub async fn delete_agent(state: &AppState, user_id: &str, agent_id: &str) -> Result<(), ApiError> {
    let agent = owned_agent(state, user_id, agent_id).await?;
    let deleted = state
        .store
        .delete_agent(&agent.id)
        .await
        .map_err(|err| ApiError::persistence("Failed to delete agent", err))?;
    if !deleted {
        return Err(ApiError::not_found("Agent not found"));
    }
    info!(agent_id = %agent.id, "agent deleted with its tickets and asset links");
    Ok(())
}
