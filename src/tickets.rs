use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::store::now_iso;
use crate::types::{CreateTicketBody, Ticket, TicketView, VisitorUpsert};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    Pending,
    InProgress,
    Resolved,
    Closed,
    Escalated,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 6] = [
        TicketStatus::Open,
        TicketStatus::Pending,
        TicketStatus::InProgress,
        TicketStatus::Resolved,
        TicketStatus::Closed,
        TicketStatus::Escalated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "OPEN",
            TicketStatus::Pending => "PENDING",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::Resolved => "RESOLVED",
            TicketStatus::Closed => "CLOSED",
            TicketStatus::Escalated => "ESCALATED",
        }
    }

    /// Parse a user-supplied status, rejecting anything outside the fixed set.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        raw.parse().map_err(|_| {
            let allowed = Self::ALL.map(Self::as_str).join(", ");
            ApiError::validation(format!("Invalid status. Must be one of: {allowed}"))
        })
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("unknown ticket status: {value}"))
    }
}

/// How operator-driven status changes are governed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Any recognised status may overwrite any other.
    #[default]
    Permissive,
    /// Only the edges in [`TransitionPolicy::allows`] are accepted.
    Strict,
}

impl TransitionPolicy {
    pub fn allows(self, current: TicketStatus, requested: TicketStatus) -> bool {
        use TicketStatus::*;

        if self == TransitionPolicy::Permissive || current == requested {
            return true;
        }
        match (current, requested) {
            (Closed, _) => false,
            (_, Escalated) => true,
            (Open, Pending | InProgress) => true,
            (Pending, InProgress) | (InProgress, Pending) => true,
            (Pending | InProgress, Resolved) => true,
            (Resolved, Closed | InProgress) => true,
            (Escalated, InProgress | Resolved) => true,
            _ => false,
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "permissive" => Ok(TransitionPolicy::Permissive),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(format!("expected `permissive` or `strict`, got `{other}`")),
        }
    }
}

/// Shared predicate for ticket listing; the page and the total count are
/// both computed from the same value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilter {
    pub owner_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: Option<TicketStatus>,
}

impl TicketFilter {
    pub fn matches(&self, ticket: &Ticket, agent_owner: &str) -> bool {
        self.owner_id.as_deref().map_or(true, |owner| owner == agent_owner)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |agent_id| agent_id == ticket.agent_id)
            && self.status.map_or(true, |status| status == ticket.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Result<Self, ApiError> {
        let page = parse_positive("page", page)?.unwrap_or(1);
        let limit = parse_positive("limit", limit)?
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        Ok(Self { page, limit })
    }

    /// Rows to skip. Saturates, so a page far past the end is simply empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn pagination(&self, total_count: i64) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
            total_count,
            total_pages: (total_count + self.limit - 1) / self.limit,
        }
    }
}

fn parse_positive(name: &str, raw: Option<&str>) -> Result<Option<i64>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<i64>() {
        Ok(value) if value >= 1 => Ok(Some(value)),
        _ => Err(ApiError::validation(format!(
            "{name} must be a positive integer"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

/// Short human-readable reference shown to visitors: the last 8 characters
/// of the ticket id.
pub fn ticket_reference(ticket_id: &str) -> &str {
    let start = ticket_id
        .char_indices()
        .rev()
        .nth(7)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &ticket_id[start..]
}

pub async fn list_tickets(
    state: &AppState,
    filter: &TicketFilter,
    page: PageRequest,
) -> Result<(Vec<TicketView>, Pagination), ApiError> {
    let (tickets, total_count) = state.store.list_tickets(filter, page).await?;
    Ok((tickets, page.pagination(total_count)))
}

/// Fetch a ticket visible to `owner_id`.
pub async fn get_ticket(
    state: &AppState,
    owner_id: &str,
    ticket_id: &str,
) -> Result<TicketView, ApiError> {
    match state.store.get_ticket(ticket_id).await? {
        Some(view) if view.agent.as_ref().is_some_and(|a| a.user_id == owner_id) => Ok(view),
        _ => Err(ApiError::not_found("Ticket not found")),
    }
}

pub async fn update_status(
    state: &AppState,
    owner_id: &str,
    ticket_id: &str,
    raw_status: &str,
) -> Result<TicketView, ApiError> {
    let requested = TicketStatus::parse(raw_status)?;
    let current = get_ticket(state, owner_id, ticket_id).await?;
    let from = current.ticket.status;
    if from == requested {
        return Ok(current);
    }

    if !state.transitions.allows(from, requested) {
        return Err(ApiError::validation(format!(
            "Cannot move ticket from {from} to {requested}"
        )));
    }

    let expected = match state.transitions {
        TransitionPolicy::Permissive => None,
        TransitionPolicy::Strict => Some(from),
    };
    let updated = state
        .store
        .set_ticket_status(ticket_id, expected, requested, &now_iso())
        .await?;
    if !updated {
        // Either the row vanished or, under a strict policy, its status moved.
        return match state.store.get_ticket(ticket_id).await? {
            None => Err(ApiError::not_found("Ticket not found")),
            Some(_) => Err(ApiError::validation(
                "Ticket status changed concurrently, reload and retry",
            )),
        };
    }

    info!(ticket_id, %from, to = %requested, "ticket status updated");
    get_ticket(state, owner_id, ticket_id).await
}

/// Manual ticket creation from the dashboard.
pub async fn create_ticket(
    state: &AppState,
    owner_id: &str,
    body: CreateTicketBody,
) -> Result<TicketView, ApiError> {
    let (Some(agent_id), Some(session_id), Some(user_input), Some(agent_reply)) = (
        non_blank(body.agent_id),
        non_blank(body.session_id),
        non_blank(body.user_input),
        non_blank(body.agent_reply),
    ) else {
        return Err(ApiError::validation(
            "Missing required fields: agent_id, session_id, user_input, agent_reply",
        ));
    };

    match state.store.get_agent(&agent_id).await? {
        Some(agent) if agent.user_id == owner_id => {}
        _ => return Err(ApiError::not_found("Agent not found")),
    }

    let now = now_iso();
    if let Some(info) = body.visitor_info {
        state
            .store
            .upsert_visitor(&VisitorUpsert::from_info(&session_id, info, &now))
            .await?;
    }

    let ticket = Ticket {
        id: Uuid::new_v4().to_string(),
        session_id,
        user_input,
        agent_reply,
        status: TicketStatus::Open,
        agent_id,
        created_at: now.clone(),
        updated_at: now,
    };
    state.store.insert_ticket(&ticket).await?;
    get_ticket(state, owner_id, &ticket.id).await
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use TicketStatus::*;

    #[test]
    fn parses_known_statuses_case_insensitively() {
        assert_eq!(TicketStatus::parse("open").unwrap(), Open);
        assert_eq!(TicketStatus::parse(" in_progress ").unwrap(), InProgress);
        assert_eq!(TicketStatus::parse("ESCALATED").unwrap(), Escalated);
    }

    #[test]
    fn rejects_unknown_status() {
        let err = TicketStatus::parse("FOO").unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        assert!(err.to_string().contains("IN_PROGRESS"));
    }

    #[test]
    fn serializes_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!(
            serde_json::from_str::<TicketStatus>("\"RESOLVED\"").unwrap(),
            Resolved
        );
    }

    #[test]
    fn permissive_policy_allows_everything() {
        for from in TicketStatus::ALL {
            for to in TicketStatus::ALL {
                assert!(TransitionPolicy::Permissive.allows(from, to));
            }
        }
    }

    #[test]
    fn strict_policy_follows_workflow() {
        let strict = TransitionPolicy::Strict;
        assert!(strict.allows(Open, Pending));
        assert!(strict.allows(Open, InProgress));
        assert!(strict.allows(InProgress, Resolved));
        assert!(strict.allows(Resolved, Closed));
        assert!(strict.allows(Closed, Closed));

        assert!(!strict.allows(Open, Closed));
        assert!(!strict.allows(Closed, Open));
        assert!(!strict.allows(Closed, Escalated));
    }

    #[test]
    fn escalation_reachable_from_every_non_closed_state() {
        for from in TicketStatus::ALL {
            let allowed = TransitionPolicy::Strict.allows(from, Escalated);
            assert_eq!(allowed, from != Closed, "from {from}");
        }
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "strict".parse::<TransitionPolicy>().unwrap(),
            TransitionPolicy::Strict
        );
        assert_eq!(
            "".parse::<TransitionPolicy>().unwrap(),
            TransitionPolicy::Permissive
        );
        assert!("loose".parse::<TransitionPolicy>().is_err());
    }

    #[test]
    fn page_request_defaults_and_caps() {
        assert_eq!(PageRequest::parse(None, None).unwrap(), PageRequest::default());
        let page = PageRequest::parse(Some("3"), Some("500")).unwrap();
        assert_eq!(page.limit, MAX_PAGE_LIMIT);
        assert_eq!(page.offset(), 200);

        let far = PageRequest::parse(Some(&i64::MAX.to_string()), Some("100")).unwrap();
        assert_eq!(far.offset(), i64::MAX);
        assert!(PageRequest::parse(Some("0"), None).is_err());
        assert!(PageRequest::parse(None, Some("ten")).is_err());
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = PageRequest { page: 1, limit: 10 };
        assert_eq!(page.pagination(0).total_pages, 0);
        assert_eq!(page.pagination(10).total_pages, 1);
        assert_eq!(page.pagination(11).total_pages, 2);
    }

    #[test]
    fn ticket_reference_is_last_eight_chars() {
        assert_eq!(
            ticket_reference("3f1c2a9e-5b7d-4c1e-9a2b-0d4e6f8a1b2c"),
            "6f8a1b2c"
        );
        assert_eq!(ticket_reference("abc"), "abc");
    }
}
