//! PostgreSQL implementation of the store traits
//!
//! - Versioned writes are `UPDATE .. WHERE version = $n`; a miss is re-read to
//!   tell a conflict from a missing row
//! - Activity deduplication relies on the unique fingerprint column
//! - Assignment commits update the owner and append history in one transaction

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::error::EngineError;
use crate::model::{
    ActivityEvent, AssignmentHistoryEntry, EntityRecord, EntityType, LeadWorkflowState,
    ProviderBinding, SequenceStep, Workflow,
};
use crate::pause::PauseConfig;

/// PostgreSQL implementation of every store trait
///
/// # Example
///
/// ```ignore
/// use outreach_engine::PostgresStore;
///
/// let store = PostgresStore::connect("postgres://localhost/outreach", 10).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| {
                error!("Failed to connect to database: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = EngineError>,
{
    value
        .parse()
        .map_err(|e: EngineError| StoreError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ============================================================================
// Row mapping
// ============================================================================

fn event_from_row(row: &PgRow) -> Result<ActivityEvent, StoreError> {
    let event_type: String = row.get("event_type");
    Ok(ActivityEvent {
        id: row.get("id"),
        lead_id: row.get("lead_id"),
        event_type: parse(&event_type)?,
        occurred_at: row.get("occurred_at"),
        metadata: from_json(row.get("metadata"))?,
        fingerprint: row.get("fingerprint"),
    })
}

fn workflow_from_row(row: &PgRow) -> Result<Workflow, StoreError> {
    let status: String = row.get("status");
    let steps: Vec<SequenceStep> = from_json(row.get("steps"))?;
    let pause_rules: Option<serde_json::Value> = row.get("pause_rules");
    let pause_rules: PauseConfig = match pause_rules {
        Some(value) => from_json(value)?,
        None => PauseConfig::NotConfigured,
    };
    let provider: Option<serde_json::Value> = row.get("provider");
    let provider: Option<ProviderBinding> = provider.map(from_json).transpose()?;

    Ok(Workflow {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        description: row.get("description"),
        status: parse(&status)?,
        steps,
        pause_rules,
        provider,
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn run_from_row(row: &PgRow) -> Result<LeadWorkflowState, StoreError> {
    let status: String = row.get("status");
    let paused_by: Option<String> = row.get("paused_by");
    let last_fired_step: Option<i32> = row.get("last_fired_step");
    Ok(LeadWorkflowState {
        lead_id: row.get("lead_id"),
        workflow_id: row.get("workflow_id"),
        status: parse(&status)?,
        current_step: row.get::<i32, _>("current_step") as u32,
        started_at: row.get("started_at"),
        step_entered_at: row.get("step_entered_at"),
        next_due_at: row.get("next_due_at"),
        paused_by: paused_by.as_deref().map(parse).transpose()?,
        last_fired_step: last_fired_step.map(|s| s as u32),
        last_fired_at: row.get("last_fired_at"),
        version: row.get("version"),
        updated_at: row.get("updated_at"),
    })
}

fn entity_from_row(row: &PgRow) -> Result<EntityRecord, StoreError> {
    let entity_type: String = row.get("entity_type");
    Ok(EntityRecord {
        entity_type: parse(&entity_type)?,
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        company: row.get("company"),
        version: row.get("version"),
        updated_at: row.get("updated_at"),
    })
}

fn history_from_row(row: &PgRow) -> Result<AssignmentHistoryEntry, StoreError> {
    let entity_type: String = row.get("entity_type");
    Ok(AssignmentHistoryEntry {
        id: row.get("id"),
        entity_type: parse(&entity_type)?,
        entity_id: row.get("entity_id"),
        previous_owner_id: row.get("previous_owner_id"),
        new_owner_id: row.get("new_owner_id"),
        actor_id: row.get("actor_id"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// ActivityStore
// ============================================================================

#[async_trait]
impl ActivityStore for PostgresStore {
    #[instrument(skip(self, event), fields(lead_id = %event.lead_id))]
    async fn append_activity(&self, event: ActivityEvent) -> Result<AppendOutcome, StoreError> {
        let metadata = to_json(&event.metadata)?;
        let result = sqlx::query(
            r#"
            INSERT INTO outreach_activity_events (id, lead_id, event_type, occurred_at, metadata, fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.lead_id)
        .bind(event.event_type.as_str())
        .bind(event.occurred_at)
        .bind(&metadata)
        .bind(&event.fingerprint)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append activity: {}", e);
            db_err(e)
        })?;

        if result.rows_affected() == 0 {
            return Ok(AppendOutcome::Duplicate);
        }
        Ok(AppendOutcome::Appended)
    }

    #[instrument(skip(self))]
    async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<ActivityEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, lead_id, event_type, occurred_at, metadata, fingerprint
            FROM outreach_activity_events
            WHERE lead_id = $1
            ORDER BY seq
            "#,
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(event_from_row).collect()
    }
}

// ============================================================================
// WorkflowStore
// ============================================================================

#[async_trait]
impl WorkflowStore for PostgresStore {
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn insert_workflow(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        workflow.version = 1;
        let result = sqlx::query(
            r#"
            INSERT INTO outreach_workflows
                (id, owner_id, name, description, status, steps, pause_rules, provider, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.owner_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.status.to_string())
        .bind(to_json(&workflow.steps)?)
        .bind(to_json(&workflow.pause_rules)?)
        .bind(workflow.provider.as_ref().map(to_json).transpose()?)
        .bind(workflow.version)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: "workflow",
                id: workflow.id,
            });
        }
        debug!(workflow_id = %workflow.id, "inserted workflow");
        Ok(workflow)
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT * FROM outreach_workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_workflows(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outreach_workflows
            WHERE $1::uuid IS NULL OR owner_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn update_workflow(
        &self,
        mut workflow: Workflow,
        expected_version: i64,
    ) -> Result<Workflow, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outreach_workflows
            SET name = $2, description = $3, status = $4, steps = $5, pause_rules = $6,
                provider = $7, updated_at = $8, version = version + 1
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.status.to_string())
        .bind(to_json(&workflow.steps)?)
        .bind(to_json(&workflow.pause_rules)?)
        .bind(workflow.provider.as_ref().map(to_json).transpose()?)
        .bind(workflow.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let actual = self.current_version("outreach_workflows", "id", workflow.id).await?;
            return Err(match actual {
                Some(actual) => StoreError::ConcurrencyConflict {
                    kind: "workflow",
                    id: workflow.id,
                    expected: expected_version,
                    actual,
                },
                None => StoreError::NotFound {
                    kind: "workflow",
                    id: workflow.id,
                },
            });
        }
        workflow.version = expected_version + 1;
        Ok(workflow)
    }

    #[instrument(skip(self))]
    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM outreach_workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "workflow",
                id,
            });
        }
        Ok(())
    }
}

impl PostgresStore {
    async fn current_version(
        &self,
        table: &'static str,
        key: &'static str,
        id: Uuid,
    ) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(&format!("SELECT version FROM {table} WHERE {key} = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("version")))
    }
}

// ============================================================================
// RunStore
// ============================================================================

#[async_trait]
impl RunStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_run(&self, lead_id: Uuid) -> Result<Option<LeadWorkflowState>, StoreError> {
        let row = sqlx::query("SELECT * FROM outreach_lead_runs WHERE lead_id = $1")
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(run_from_row).transpose()
    }

    #[instrument(skip(self, run), fields(lead_id = %run.lead_id))]
    async fn save_run(
        &self,
        mut run: LeadWorkflowState,
        expected_version: Option<i64>,
    ) -> Result<LeadWorkflowState, StoreError> {
        let next_version = expected_version.map_or(1, |v| v + 1);
        let sql = match expected_version {
            None => {
                r#"
                INSERT INTO outreach_lead_runs
                    (lead_id, workflow_id, status, current_step, started_at, step_entered_at,
                     next_due_at, paused_by, last_fired_step, last_fired_at, version, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (lead_id) DO NOTHING
                "#
            }
            Some(_) => {
                r#"
                UPDATE outreach_lead_runs
                SET workflow_id = $2, status = $3, current_step = $4, started_at = $5,
                    step_entered_at = $6, next_due_at = $7, paused_by = $8,
                    last_fired_step = $9, last_fired_at = $10, version = $11, updated_at = $12
                WHERE lead_id = $1 AND version = $11 - 1
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(run.lead_id)
            .bind(run.workflow_id)
            .bind(run.status.to_string())
            .bind(run.current_step as i32)
            .bind(run.started_at)
            .bind(run.step_entered_at)
            .bind(run.next_due_at)
            .bind(run.paused_by.map(|c| c.as_str()))
            .bind(run.last_fired_step.map(|s| s as i32))
            .bind(run.last_fired_at)
            .bind(next_version)
            .bind(run.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(match expected_version {
                None => StoreError::AlreadyExists {
                    kind: "lead run",
                    id: run.lead_id,
                },
                Some(expected) => StoreError::ConcurrencyConflict {
                    kind: "lead run",
                    id: run.lead_id,
                    expected,
                    actual: self
                        .current_version("outreach_lead_runs", "lead_id", run.lead_id)
                        .await?
                        .unwrap_or(0),
                },
            });
        }
        run.version = next_version;
        Ok(run)
    }

    #[instrument(skip(self))]
    async fn list_due_runs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LeadWorkflowState>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.*
            FROM outreach_lead_runs r
            LEFT JOIN outreach_workflows w ON w.id = r.workflow_id
            WHERE r.status = 'active'
              AND r.workflow_id IS NOT NULL
              AND r.next_due_at <= $1
              AND (w.status IS NULL OR w.status NOT IN ('draft', 'paused'))
            ORDER BY r.next_due_at, r.lead_id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(run_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<LeadWorkflowState>, StoreError> {
        let rows = sqlx::query("SELECT * FROM outreach_lead_runs WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(run_from_row).collect()
    }
}

// ============================================================================
// AssignmentStore
// ============================================================================

#[async_trait]
impl AssignmentStore for PostgresStore {
    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    async fn put_entity(&self, entity: EntityRecord) -> Result<EntityRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO outreach_entities
                (entity_type, id, owner_id, email, first_name, last_name, company, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8)
            ON CONFLICT (entity_type, id) DO UPDATE
            SET email = EXCLUDED.email,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                company = EXCLUDED.company,
                updated_at = EXCLUDED.updated_at,
                version = outreach_entities.version + 1
            RETURNING *
            "#,
        )
        .bind(entity.entity_type.as_str())
        .bind(entity.id)
        .bind(entity.owner_id)
        .bind(&entity.email)
        .bind(&entity.first_name)
        .bind(&entity.last_name)
        .bind(&entity.company)
        .bind(entity.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        entity_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: Uuid,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM outreach_entities WHERE entity_type = $1 AND id = $2")
            .bind(entity_type.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(entity_from_row).transpose()
    }

    #[instrument(skip(self, entry), fields(entity_id = %entry.entity_id))]
    async fn commit_assignment(
        &self,
        entry: AssignmentHistoryEntry,
        expected_version: i64,
    ) -> Result<EntityRecord, StoreError> {
        let kind = entry.entity_type.as_str();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            UPDATE outreach_entities
            SET owner_id = $3, updated_at = $4, version = version + 1
            WHERE entity_type = $1 AND id = $2 AND version = $5
            RETURNING *
            "#,
        )
        .bind(kind)
        .bind(entry.entity_id)
        .bind(entry.new_owner_id)
        .bind(entry.created_at)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            let actual = sqlx::query(
                "SELECT version FROM outreach_entities WHERE entity_type = $1 AND id = $2",
            )
            .bind(kind)
            .bind(entry.entity_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .map(|r| r.get::<i64, _>("version"));

            return Err(match actual {
                Some(actual) => StoreError::ConcurrencyConflict {
                    kind,
                    id: entry.entity_id,
                    expected: expected_version,
                    actual,
                },
                None => StoreError::NotFound {
                    kind,
                    id: entry.entity_id,
                },
            });
        };
        let updated = entity_from_row(&row)?;

        sqlx::query(
            r#"
            INSERT INTO outreach_assignment_history
                (id, entity_type, entity_id, previous_owner_id, new_owner_id, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(kind)
        .bind(entry.entity_id)
        .bind(entry.previous_owner_id)
        .bind(entry.new_owner_id)
        .bind(entry.actor_id)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(entity_id = %entry.entity_id, version = updated.version, "committed assignment");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn list_history(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AssignmentHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, previous_owner_id, new_owner_id, actor_id, created_at
            FROM outreach_assignment_history
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(history_from_row).collect()
    }
}
