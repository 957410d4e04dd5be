//! Knowledge-base provisioning and document upload.
//!
//! The upload pipeline is provision-or-reuse, then link, then upload. Each
//! step surfaces its own failure and stops the pipeline. A collection that was
//! provisioned but could not be linked stays recorded; provider-side cleanup
//! is left to the operator.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::owned_agent;
use crate::app::AppState;
use crate::error::ApiError;
use crate::prompting::{render_support_instructions, SupportInstructionsContext};
use crate::provider::{CollectionLink, Document};
use crate::store::now_iso;
use crate::tickets::non_blank;
use crate::types::{
    Agent, AssetLink, CreateKnowledgeBaseBody, LinkKnowledgeBaseBody, RAG_KB_FILE_TYPE,
};

const UPLOAD_FAILURE_MESSAGE: &str = "Failed to upload to knowledge base";

/// `kb_<name with non-alphanumerics replaced by _>_<unix millis>`.
pub fn collection_name(name: &str, millis: i64) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("kb_{sanitized}_{millis}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedKnowledgeBase {
    pub id: String,
    pub name: String,
    pub description: String,
    pub collection_name: String,
    pub knowledge_base: AssetLink,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDocument {
    pub rag_id: String,
    pub rag_name: String,
    pub file_name: String,
    pub upload_response: serde_json::Value,
}

/// A file received from the dashboard, destined for the agent's collection.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub agent_id: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub async fn list_knowledge_bases(
    state: &AppState,
    user_id: &str,
) -> Result<Vec<AssetLink>, ApiError> {
    Ok(state.store.knowledge_bases(user_id).await?)
}

pub async fn create_knowledge_base(
    state: &AppState,
    user_id: &str,
    body: CreateKnowledgeBaseBody,
) -> Result<CreatedKnowledgeBase, ApiError> {
    let Some(name) = non_blank(body.name) else {
        return Err(ApiError::validation("Name is required"));
    };
    let agent_id = match non_blank(body.agent_id) {
        Some(agent_id) => Some(owned_agent(state, user_id, &agent_id).await?.id),
        None => None,
    };
    let description =
        non_blank(body.description).unwrap_or_else(|| format!("Knowledge base for {name}"));
    let collection = collection_name(&name, Utc::now().timestamp_millis());

    let rag_id = state
        .provider
        .create_collection(&collection, &description)
        .await
        .map_err(|err| ApiError::upstream("Failed to create knowledge base", err))?;

    let asset = AssetLink {
        id: Uuid::new_v4().to_string(),
        asset_id: rag_id.clone(),
        file_name: name.clone(),
        file_type: RAG_KB_FILE_TYPE.to_string(),
        agent_id,
        owner_id: user_id.to_string(),
        uploaded_at: now_iso(),
    };
    state
        .store
        .insert_asset(&asset)
        .await
        .map_err(|err| ApiError::persistence("Failed to create knowledge base", err))?;

    info!(rag_id = %rag_id, collection = %collection, "knowledge base provisioned");
    Ok(CreatedKnowledgeBase {
        id: rag_id,
        name,
        description,
        collection_name: collection,
        knowledge_base: asset,
    })
}

fn collection_link(agent: &Agent, rag_id: &str, rag_name: &str) -> CollectionLink {
    CollectionLink {
        provider_agent_id: agent.provider_agent_id.clone(),
        rag_id: rag_id.to_string(),
        rag_name: rag_name.to_string(),
        agent_name: agent.name.clone(),
        description: agent
            .description
            .clone()
            .unwrap_or_else(|| "This agent helps to manage customer queries".to_string()),
        agent_role: agent.system_prompt.clone(),
        agent_instructions: render_support_instructions(&SupportInstructionsContext {
            agent_name: &agent.name,
            knowledge_base: rag_name,
        }),
        temperature: agent.temperature,
    }
}

pub async fn link_knowledge_base(
    state: &AppState,
    user_id: &str,
    body: LinkKnowledgeBaseBody,
) -> Result<(), ApiError> {
    let (Some(agent_id), Some(rag_id)) = (non_blank(body.agent_id), non_blank(body.rag_id)) else {
        return Err(ApiError::validation("Agent ID and RAG ID are required"));
    };
    let agent = owned_agent(state, user_id, &agent_id).await?;
    let owned = state
        .store
        .knowledge_bases(user_id)
        .await?
        .into_iter()
        .find(|asset| asset.asset_id == rag_id);
    let Some(knowledge_base) = owned else {
        return Err(ApiError::not_found("Knowledge base not found"));
    };
    let rag_name = non_blank(body.rag_name).unwrap_or(knowledge_base.file_name);

    state
        .provider
        .link_collection(&collection_link(&agent, &rag_id, &rag_name))
        .await
        .map_err(|err| ApiError::upstream("Failed to link knowledge base to agent", err))?;
    state.store.link_knowledge_base(&rag_id, &agent.id).await?;

    info!(agent_id = %agent.id, rag_id = %rag_id, "knowledge base linked");
    Ok(())
}

pub async fn upload_document(
    state: &AppState,
    user_id: &str,
    upload: DocumentUpload,
) -> Result<UploadedDocument, ApiError> {
    let agent = owned_agent(state, user_id, &upload.agent_id).await?;

    let existing = state
        .store
        .assets_for_agent(&agent.id)
        .await?
        .into_iter()
        .find(AssetLink::is_knowledge_base);

    let (rag_id, rag_name) = match existing {
        Some(asset) => {
            info!(rag_id = %asset.asset_id, "reusing existing knowledge base");
            (asset.asset_id, asset.file_name)
        }
        None => {
            let rag_name = collection_name(&agent.name, Utc::now().timestamp_millis());
            let rag_id = state
                .provider
                .create_collection(&rag_name, &format!("Knowledge base for {}", agent.name))
                .await
                .map_err(|err| ApiError::upstream(UPLOAD_FAILURE_MESSAGE, err))?;

            state
                .store
                .insert_asset(&AssetLink {
                    id: Uuid::new_v4().to_string(),
                    asset_id: rag_id.clone(),
                    file_name: rag_name.clone(),
                    file_type: RAG_KB_FILE_TYPE.to_string(),
                    agent_id: Some(agent.id.clone()),
                    owner_id: user_id.to_string(),
                    uploaded_at: now_iso(),
                })
                .await
                .map_err(|err| ApiError::persistence(UPLOAD_FAILURE_MESSAGE, err))?;

            if let Err(err) = state
                .provider
                .link_collection(&collection_link(&agent, &rag_id, &rag_name))
                .await
            {
                warn!(rag_id = %rag_id, "knowledge base recorded but not linked; upload aborted");
                return Err(ApiError::upstream(UPLOAD_FAILURE_MESSAGE, err));
            }
            info!(rag_id = %rag_id, "knowledge base provisioned and linked");
            (rag_id, rag_name)
        }
    };

    let upload_response = state
        .provider
        .upload_document(
            &rag_id,
            Document {
                file_name: upload.file_name.clone(),
                content_type: upload.content_type.clone(),
                bytes: upload.bytes,
                extra_info: json!({
                    "agent_id": agent.id,
                    "uploaded_by": user_id,
                    "upload_date": now_iso(),
                }),
            },
        )
        .await
        .map_err(|err| ApiError::upstream(UPLOAD_FAILURE_MESSAGE, err))?;

    state
        .store
        .insert_asset(&AssetLink {
            id: Uuid::new_v4().to_string(),
            asset_id: format!("rag_file_{}", Uuid::new_v4().simple()),
            file_name: upload.file_name.clone(),
            file_type: upload.content_type,
            agent_id: Some(agent.id.clone()),
            owner_id: user_id.to_string(),
            uploaded_at: now_iso(),
        })
        .await
        .map_err(|err| ApiError::persistence(UPLOAD_FAILURE_MESSAGE, err))?;

    info!(agent_id = %agent.id, rag_id = %rag_id, file = %upload.file_name, "document uploaded");
    Ok(UploadedDocument {
        rag_id,
        rag_name,
        file_name: upload.file_name,
        upload_response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_sanitized() {
        assert_eq!(
            collection_name("Acme FAQ v2!", 1700000000000),
            "kb_Acme_FAQ_v2__1700000000000"
        );
        assert_eq!(collection_name("plain", 1), "kb_plain_1");
        assert_eq!(collection_name("Café FAQ", 7), "kb_Caf__FAQ_7");
    }
}
