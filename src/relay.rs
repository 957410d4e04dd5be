//! Chat relay: widget message in, provider reply plus ticket out.
//!
//! Per inbound message: one visitor upsert, one provider call, one ticket
//! write. The ticket id is minted before the write so the reference suffix
//! can be rendered first and the stored reply is exactly what the visitor
//! sees. Repeated identical requests are not deduplicated; each creates a
//! ticket.

use axum::http::HeaderMap;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::prompting::{render_ticket_reply, TicketReplyContext};
use crate::provider::ChatRequest;
use crate::store::now_iso;
use crate::tickets::{non_blank, ticket_reference, TicketStatus};
use crate::types::{ChatBody, ChatReply, Ticket, VisitorInfo, VisitorUpsert};

pub const MISSING_FIELDS_MESSAGE: &str = "Missing required fields: agent_id, session_id, message";
pub const CHAT_FAILURE_MESSAGE: &str = "Failed to process chat";

/// A validated widget message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub agent_id: String,
    pub session_id: String,
    pub message: String,
    pub visitor: VisitorInfo,
}

impl InboundMessage {
    /// Validate the body; user agent and client IP fall back to request
    /// headers when the widget did not send them.
    pub fn from_body(body: ChatBody, headers: &HeaderMap) -> Result<Self, ApiError> {
        let (Some(agent_id), Some(session_id), Some(message)) = (
            non_blank(body.agent_id),
            non_blank(body.session_id),
            non_blank(body.message),
        ) else {
            return Err(ApiError::validation(MISSING_FIELDS_MESSAGE));
        };

        let mut visitor = body.visitor_info.unwrap_or_default();
        if visitor.user_agent.is_none() {
            visitor.user_agent = header_text(headers, "user-agent");
        }
        if visitor.ip_address.is_none() {
            visitor.ip_address = client_ip(headers);
        }

        Ok(Self {
            agent_id,
            session_id,
            message,
            visitor,
        })
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_text(headers, "x-forwarded-for")
        .and_then(|chain| chain.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_text(headers, "x-real-ip"))
}

#[instrument(skip_all, fields(agent_id = %inbound.agent_id, session_id = %inbound.session_id))]
pub async fn relay_message(state: &AppState, inbound: InboundMessage) -> Result<ChatReply, ApiError> {
    let agent = state
        .store
        .get_agent(&inbound.agent_id)
        .await
        .map_err(|err| ApiError::persistence(CHAT_FAILURE_MESSAGE, err))?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    let now = now_iso();
    state
        .store
        .upsert_visitor(&VisitorUpsert::from_info(
            &inbound.session_id,
            inbound.visitor,
            &now,
        ))
        .await
        .map_err(|err| ApiError::persistence(CHAT_FAILURE_MESSAGE, err))?;

    let provider_reply = state
        .provider
        .chat(&ChatRequest {
            user_id: inbound.session_id.clone(),
            agent_id: agent.provider_agent_id.clone(),
            session_id: inbound.session_id.clone(),
            message: inbound.message.clone(),
        })
        .await
        .map_err(|err| ApiError::upstream(CHAT_FAILURE_MESSAGE, err))?;

    let ticket_id = Uuid::new_v4().to_string();
    let response = render_ticket_reply(&TicketReplyContext {
        reply: &provider_reply,
        ticket_ref: ticket_reference(&ticket_id),
    });

    let ticket = Ticket {
        id: ticket_id,
        session_id: inbound.session_id,
        user_input: inbound.message,
        agent_reply: response,
        status: TicketStatus::Open,
        agent_id: agent.id,
        created_at: now.clone(),
        updated_at: now,
    };
    state
        .store
        .insert_ticket(&ticket)
        .await
        .map_err(|err| ApiError::persistence(CHAT_FAILURE_MESSAGE, err))?;

    info!(ticket_id = %ticket.id, "ticket opened from chat");

    Ok(ChatReply {
        success: true,
        response: ticket.agent_reply,
        ticket_id: ticket.id,
        session_id: ticket.session_id,
        agent_id: ticket.agent_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn body(agent: Option<&str>, session: Option<&str>, message: Option<&str>) -> ChatBody {
        ChatBody {
            agent_id: agent.map(str::to_string),
            session_id: session.map(str::to_string),
            message: message.map(str::to_string),
            visitor_info: None,
        }
    }

    #[test]
    fn missing_or_blank_fields_fail_validation() {
        let headers = HeaderMap::new();
        for case in [
            body(None, Some("s"), Some("m")),
            body(Some("a"), None, Some("m")),
            body(Some("a"), Some("s"), None),
            body(Some("a"), Some("s"), Some("   ")),
        ] {
            let err = InboundMessage::from_body(case, &headers).unwrap_err();
            assert_eq!(err.to_string(), MISSING_FIELDS_MESSAGE);
        }
    }

    #[test]
    fn visitor_falls_back_to_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let inbound =
            InboundMessage::from_body(body(Some("a"), Some("s"), Some("hi")), &headers).unwrap();
        assert_eq!(inbound.visitor.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(inbound.visitor.ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn widget_supplied_visitor_fields_win() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        let mut chat = body(Some("a"), Some("s"), Some("hi"));
        chat.visitor_info = Some(VisitorInfo {
            user_agent: Some("Mozilla/5.0".into()),
            ..Default::default()
        });
        let inbound = InboundMessage::from_body(chat, &headers).unwrap();
        assert_eq!(inbound.visitor.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert!(inbound.visitor.ip_address.is_none());
    }
}
