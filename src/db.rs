use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    migrate::Migrator,
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, QueryBuilder, Row,
};
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::store::{Store, StoreError};
use crate::tickets::{PageRequest, TicketFilter, TicketStatus};
use crate::types::{
    Agent, AssetLink, Ticket, TicketView, Visitor, VisitorUpsert, RAG_KB_FILE_TYPE,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const AGENT_COLUMNS: &str =
    "id, user_id, provider_agent_id, name, description, system_prompt, temperature, created_at, updated_at";
const ASSET_COLUMNS: &str = "id, asset_id, file_name, file_type, agent_id, owner_id, uploaded_at";
const TICKET_VIEW_SELECT: &str = "SELECT \
        t.id, t.session_id, t.user_input, t.agent_reply, t.status, t.agent_id, t.created_at, t.updated_at, \
        v.id AS v_id, v.name AS v_name, v.email AS v_email, v.user_agent AS v_user_agent, \
        v.ip_address AS v_ip_address, v.created_at AS v_created_at, v.updated_at AS v_updated_at, \
        a.user_id AS a_user_id, a.provider_agent_id AS a_provider_agent_id, a.name AS a_name, \
        a.description AS a_description, a.system_prompt AS a_system_prompt, \
        a.temperature AS a_temperature, a.created_at AS a_created_at, a.updated_at AS a_updated_at \
     FROM tickets t \
     JOIN agents a ON a.id = t.agent_id \
     LEFT JOIN visitors v ON v.session_id = t.session_id";

fn parse_agent_row(row: &PgRow) -> Agent {
    Agent {
        id: row.get("id"),
        user_id: row.get("user_id"),
        provider_agent_id: row.get("provider_agent_id"),
        name: row.get("name"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        temperature: row.get("temperature"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_asset_row(row: &PgRow) -> AssetLink {
    AssetLink {
        id: row.get("id"),
        asset_id: row.get("asset_id"),
        file_name: row.get("file_name"),
        file_type: row.get("file_type"),
        agent_id: row.get("agent_id"),
        owner_id: row.get("owner_id"),
        uploaded_at: row.get("uploaded_at"),
    }
}

fn parse_visitor_row(row: &PgRow) -> Visitor {
    Visitor {
        id: row.get("id"),
        session_id: row.get("session_id"),
        name: row.get("name"),
        email: row.get("email"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_ticket_view_row(row: &PgRow) -> Result<TicketView, StoreError> {
    let status: String = row.get("status");
    let status = status
        .parse::<TicketStatus>()
        .map_err(StoreError::Integrity)?;
    let ticket = Ticket {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_input: row.get("user_input"),
        agent_reply: row.get("agent_reply"),
        status,
        agent_id: row.get("agent_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    };
    let visitor = row
        .get::<Option<String>, _>("v_id")
        .map(|visitor_id| Visitor {
            id: visitor_id,
            session_id: ticket.session_id.clone(),
            name: row.get("v_name"),
            email: row.get("v_email"),
            user_agent: row.get("v_user_agent"),
            ip_address: row.get("v_ip_address"),
            created_at: row.get("v_created_at"),
            updated_at: row.get("v_updated_at"),
        });
    let agent = Agent {
        id: ticket.agent_id.clone(),
        user_id: row.get("a_user_id"),
        provider_agent_id: row.get("a_provider_agent_id"),
        name: row.get("a_name"),
        description: row.get("a_description"),
        system_prompt: row.get("a_system_prompt"),
        temperature: row.get("a_temperature"),
        created_at: row.get("a_created_at"),
        updated_at: row.get("a_updated_at"),
    };
    Ok(TicketView {
        ticket,
        visitor,
        agent: Some(agent),
    })
}

/// Appends the WHERE clause shared by the ticket page query and its count.
fn push_ticket_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a TicketFilter) {
    builder.push(" WHERE TRUE");
    if let Some(owner_id) = &filter.owner_id {
        builder.push(" AND a.user_id = ").push_bind(owner_id.as_str());
    }
    if let Some(agent_id) = &filter.agent_id {
        builder.push(" AND t.agent_id = ").push_bind(agent_id.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND t.status = ").push_bind(status.as_str());
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!("connecting to postgres");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("running database migrations");
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn user_for_token(&self, token_hash: &str) -> Result<Option<String>, StoreError> {
        let user_id =
            sqlx::query_scalar::<_, String>("SELECT user_id FROM auth_tokens WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user_id)
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO agents (id, user_id, provider_agent_id, name, description, system_prompt, temperature, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(&agent.id)
        .bind(&agent.user_id)
        .bind(&agent.provider_agent_id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&agent.system_prompt)
        .bind(agent.temperature)
        .bind(&agent.created_at)
        .bind(&agent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_agent_row))
    }

    async fn list_agents(&self, user_id: &str) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_agent_row).collect())
    }

    async fn update_agent(&self, agent: &Agent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE agents SET name = $1, description = $2, system_prompt = $3, temperature = $4, updated_at = $5 \
             WHERE id = $6",
        )
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&agent.system_prompt)
        .bind(agent.temperature)
        .bind(&agent.updated_at)
        .bind(&agent.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM asset_links WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tickets WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn insert_asset(&self, asset: &AssetLink) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO asset_links (id, asset_id, file_name, file_type, agent_id, owner_id, uploaded_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(&asset.id)
        .bind(&asset.asset_id)
        .bind(&asset.file_name)
        .bind(&asset.file_type)
        .bind(&asset.agent_id)
        .bind(&asset.owner_id)
        .bind(&asset.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assets_for_agent(&self, agent_id: &str) -> Result<Vec<AssetLink>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM asset_links WHERE agent_id = $1 ORDER BY uploaded_at ASC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_asset_row).collect())
    }

    async fn knowledge_bases(&self, owner_id: &str) -> Result<Vec<AssetLink>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM asset_links WHERE owner_id = $1 AND file_type = $2 ORDER BY uploaded_at DESC"
        ))
        .bind(owner_id)
        .bind(RAG_KB_FILE_TYPE)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_asset_row).collect())
    }

    async fn link_knowledge_base(
        &self,
        asset_id: &str,
        agent_id: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE asset_links SET agent_id = $1 WHERE asset_id = $2 AND file_type = $3",
        )
        .bind(agent_id)
        .bind(asset_id)
        .bind(RAG_KB_FILE_TYPE)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_visitor(&self, visitor: &VisitorUpsert) -> Result<Visitor, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO visitors (id, session_id, name, email, user_agent, ip_address, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$7)
            ON CONFLICT (session_id) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, visitors.name),
                email = COALESCE(EXCLUDED.email, visitors.email),
                user_agent = COALESCE(EXCLUDED.user_agent, visitors.user_agent),
                ip_address = COALESCE(EXCLUDED.ip_address, visitors.ip_address),
                updated_at = EXCLUDED.updated_at
            RETURNING id, session_id, name, email, user_agent, ip_address, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&visitor.session_id)
        .bind(&visitor.name)
        .bind(&visitor.email)
        .bind(&visitor.user_agent)
        .bind(&visitor.ip_address)
        .bind(&visitor.now)
        .fetch_one(&self.pool)
        .await?;
        Ok(parse_visitor_row(&row))
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tickets (id, session_id, user_input, agent_reply, status, agent_id, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&ticket.id)
        .bind(&ticket.session_id)
        .bind(&ticket.user_input)
        .bind(&ticket.agent_reply)
        .bind(ticket.status.as_str())
        .bind(&ticket.agent_id)
        .bind(&ticket.created_at)
        .bind(&ticket.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<TicketView>, StoreError> {
        let row = sqlx::query(&format!("{TICKET_VIEW_SELECT} WHERE t.id = $1"))
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_ticket_view_row).transpose()
    }

    async fn set_ticket_status(
        &self,
        ticket_id: &str,
        expected: Option<TicketStatus>,
        status: TicketStatus,
        updated_at: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = $1, updated_at = $2 \
             WHERE id = $3 AND ($4::TEXT IS NULL OR status = $4)",
        )
        .bind(status.as_str())
        .bind(updated_at)
        .bind(ticket_id)
        .bind(expected.map(TicketStatus::as_str))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_tickets(&self, agent_id: &str) -> Result<i64, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM tickets WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: PageRequest,
    ) -> Result<(Vec<TicketView>, i64), StoreError> {
        let mut page_query = QueryBuilder::<Postgres>::new(TICKET_VIEW_SELECT);
        push_ticket_filter(&mut page_query, filter);
        page_query
            .push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let mut count_query = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(1) FROM tickets t JOIN agents a ON a.id = t.agent_id",
        );
        push_ticket_filter(&mut count_query, filter);

        let (rows, total) = futures_util::try_join!(
            page_query.build().fetch_all(&self.pool),
            count_query.build_query_scalar::<i64>().fetch_one(&self.pool),
        )?;
        let tickets = rows
            .iter()
            .map(parse_ticket_view_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((tickets, total))
    }
}
