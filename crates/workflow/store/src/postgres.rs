//! PostgreSQL storage backend
//!
//! Schema is initialized at connect time. The invariants the engine
//! depends on live in the schema itself: a partial unique index keeps at
//! most one active instance per entity, and every instance write is a
//! conditional update on the stored version. History inserts ride in the
//! same transaction as the instance write, so a rejected operation
//! leaves no trace.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use planroom_workflow_types::{
    EntityType, Guard, HistoryEntry, InstanceId, InstanceStatus, ProjectId, RoleId, Stage,
    StageId, Template, TemplateId, Transition, UserId, WorkflowError, WorkflowInstance,
    WorkflowResult,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::traits::WorkflowStore;

/// PostgreSQL-backed workflow store
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Connect to PostgreSQL and initialize the schema
    pub async fn connect(database_url: &str, max_connections: u32) -> WorkflowResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres connect failed: {e}")))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> WorkflowResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS wf_templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS wf_stages (
                id TEXT NOT NULL,
                template_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_initial BOOLEAN NOT NULL,
                is_terminal BOOLEAN NOT NULL,
                assignee_role TEXT NULL,
                due_secs BIGINT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (template_id, id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS wf_transitions (
                template_id TEXT NOT NULL,
                from_stage_id TEXT NOT NULL,
                to_stage_id TEXT NOT NULL,
                action TEXT NOT NULL,
                is_automatic BOOLEAN NOT NULL,
                guard_expr TEXT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (template_id, from_stage_id, action)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS wf_instances (
                id TEXT PRIMARY KEY,
                template_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                current_stage_id TEXT NOT NULL,
                status TEXT NOT NULL,
                assignee_id TEXT NULL,
                version BIGINT NOT NULL,
                context JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            // the race-closing invariant: at most one active instance per entity
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS wf_instances_one_active
                ON wf_instances (entity_type, entity_id) WHERE status = 'active';
            "#,
            r#"CREATE INDEX IF NOT EXISTS wf_instances_project ON wf_instances (project_id);"#,
            r#"
            CREATE INDEX IF NOT EXISTS wf_instances_assignee
                ON wf_instances (assignee_id) WHERE status = 'active';
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS wf_history (
                seq BIGSERIAL PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                instance_id TEXT NOT NULL,
                action TEXT NOT NULL,
                actor_id TEXT NULL,
                from_stage_id TEXT NULL,
                to_stage_id TEXT NOT NULL,
                comment TEXT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS wf_history_instance ON wf_history (instance_id);"#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    WorkflowError::Storage(format!("postgres schema init failed: {e}"))
                })?;
        }

        tracing::debug!("workflow schema initialized");
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn save_template(&self, template: &Template) -> WorkflowResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres begin failed: {e}")))?;

        sqlx::query("DELETE FROM wf_transitions WHERE template_id = $1")
            .bind(&template.id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres template clear failed: {e}")))?;
        sqlx::query("DELETE FROM wf_stages WHERE template_id = $1")
            .bind(&template.id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres template clear failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO wf_templates (id, name, entity_type, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = $2, entity_type = $3
            "#,
        )
        .bind(&template.id.0)
        .bind(&template.name)
        .bind(&template.entity_type.0)
        .bind(template.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres template insert failed: {e}")))?;

        for (position, stage) in template.stages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO wf_stages
                    (id, template_id, name, is_initial, is_terminal, assignee_role, due_secs, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&stage.id.0)
            .bind(&template.id.0)
            .bind(&stage.name)
            .bind(stage.is_initial)
            .bind(stage.is_terminal)
            .bind(stage.assignee_role.as_ref().map(|r| r.0.as_str()))
            .bind(stage.due_secs.map(|s| s as i64))
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres stage insert failed: {e}")))?;
        }

        for (position, transition) in template.transitions.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO wf_transitions
                    (template_id, from_stage_id, to_stage_id, action, is_automatic, guard_expr, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&template.id.0)
            .bind(&transition.from.0)
            .bind(&transition.to.0)
            .bind(&transition.action)
            .bind(transition.automatic)
            .bind(transition.guard.as_ref().map(|g| g.expr()))
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                WorkflowError::Storage(format!("postgres transition insert failed: {e}"))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn load_templates(&self) -> WorkflowResult<Vec<Template>> {
        let template_rows = sqlx::query(
            "SELECT id, name, entity_type, created_at FROM wf_templates ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres template load failed: {e}")))?;

        let mut templates = Vec::with_capacity(template_rows.len());
        for row in template_rows {
            let template_id: String = get(&row, "id")?;

            let stage_rows = sqlx::query(
                r#"
                SELECT id, name, is_initial, is_terminal, assignee_role, due_secs
                FROM wf_stages WHERE template_id = $1 ORDER BY position
                "#,
            )
            .bind(&template_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres stage load failed: {e}")))?;

            let mut stages = Vec::with_capacity(stage_rows.len());
            for stage_row in stage_rows {
                stages.push(Stage {
                    id: StageId::new(get::<String>(&stage_row, "id")?),
                    name: get(&stage_row, "name")?,
                    is_initial: get(&stage_row, "is_initial")?,
                    is_terminal: get(&stage_row, "is_terminal")?,
                    assignee_role: get::<Option<String>>(&stage_row, "assignee_role")?
                        .map(RoleId::new),
                    due_secs: get::<Option<i64>>(&stage_row, "due_secs")?.map(|s| s as u64),
                });
            }

            let transition_rows = sqlx::query(
                r#"
                SELECT from_stage_id, to_stage_id, action, is_automatic, guard_expr
                FROM wf_transitions WHERE template_id = $1 ORDER BY position
                "#,
            )
            .bind(&template_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                WorkflowError::Storage(format!("postgres transition load failed: {e}"))
            })?;

            let mut transitions = Vec::with_capacity(transition_rows.len());
            for transition_row in transition_rows {
                let guard = get::<Option<String>>(&transition_row, "guard_expr")?
                    .map(Guard::parse)
                    .transpose()?;
                transitions.push(Transition {
                    from: StageId::new(get::<String>(&transition_row, "from_stage_id")?),
                    to: StageId::new(get::<String>(&transition_row, "to_stage_id")?),
                    action: get(&transition_row, "action")?,
                    automatic: get(&transition_row, "is_automatic")?,
                    guard,
                });
            }

            templates.push(Template {
                id: TemplateId::new(template_id),
                name: get(&row, "name")?,
                entity_type: EntityType::new(get::<String>(&row, "entity_type")?),
                stages,
                transitions,
                created_at: get(&row, "created_at")?,
            });
        }

        Ok(templates)
    }

    async fn insert_instance(
        &self,
        instance: &WorkflowInstance,
        history: &[HistoryEntry],
    ) -> WorkflowResult<()> {
        let context = serde_json::to_value(&instance.context)
            .map_err(|e| WorkflowError::Storage(format!("context encode failed: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres begin failed: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO wf_instances
                (id, template_id, entity_type, entity_id, project_id, current_stage_id,
                 status, assignee_id, version, context, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&instance.id.0)
        .bind(&instance.template_id.0)
        .bind(&instance.entity_type.0)
        .bind(&instance.entity_id)
        .bind(&instance.project_id.0)
        .bind(&instance.current_stage_id.0)
        .bind(instance.status.as_str())
        .bind(instance.assignee_id.as_ref().map(|u| u.0.as_str()))
        .bind(instance.version)
        .bind(&context)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            let unique_violation = e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            if unique_violation {
                return Err(WorkflowError::ActiveInstanceExists {
                    entity_type: instance.entity_type.clone(),
                    entity_id: instance.entity_id.clone(),
                });
            }
            return Err(WorkflowError::Storage(format!(
                "postgres instance insert failed: {e}"
            )));
        }

        append_history(&mut tx, history).await?;

        tx.commit()
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: i64,
        history: &[HistoryEntry],
    ) -> WorkflowResult<()> {
        let context = serde_json::to_value(&instance.context)
            .map_err(|e| WorkflowError::Storage(format!("context encode failed: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres begin failed: {e}")))?;

        let result = sqlx::query(
            r#"
            UPDATE wf_instances
            SET current_stage_id = $2, status = $3, assignee_id = $4,
                version = $5, context = $6, updated_at = $7
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(&instance.id.0)
        .bind(&instance.current_stage_id.0)
        .bind(instance.status.as_str())
        .bind(instance.assignee_id.as_ref().map(|u| u.0.as_str()))
        .bind(instance.version)
        .bind(&context)
        .bind(instance.updated_at)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres instance update failed: {e}")))?;

        if result.rows_affected() == 0 {
            // distinguish a lost race from a row that never existed;
            // instances are never deleted, so this is almost always the race
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM wf_instances WHERE id = $1)")
                    .bind(&instance.id.0)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        WorkflowError::Storage(format!("postgres existence check failed: {e}"))
                    })?;
            return Err(if exists {
                WorkflowError::VersionConflict {
                    instance: instance.id.clone(),
                    expected: expected_version,
                }
            } else {
                WorkflowError::InstanceNotFound(instance.id.clone())
            });
        }

        append_history(&mut tx, history).await?;

        tx.commit()
            .await
            .map_err(|e| WorkflowError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn instance(&self, id: &InstanceId) -> WorkflowResult<Option<WorkflowInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM wf_instances WHERE id = $1"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres instance fetch failed: {e}")))?;

        row.map(|r| row_to_instance(&r)).transpose()
    }

    async fn instance_for_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> WorkflowResult<Option<WorkflowInstance>> {
        let active = sqlx::query(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS} FROM wf_instances
            WHERE entity_type = $1 AND entity_id = $2 AND status = 'active'
            "#
        ))
        .bind(&entity_type.0)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres instance fetch failed: {e}")))?;

        if let Some(row) = active {
            return Ok(Some(row_to_instance(&row)?));
        }

        let latest = sqlx::query(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS} FROM wf_instances
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at DESC LIMIT 1
            "#
        ))
        .bind(&entity_type.0)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres instance fetch failed: {e}")))?;

        latest.map(|r| row_to_instance(&r)).transpose()
    }

    async fn history(&self, instance_id: &InstanceId) -> WorkflowResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, instance_id, action, actor_id, from_stage_id, to_stage_id,
                   comment, created_at
            FROM wf_history
            WHERE instance_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(&instance_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres history load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(HistoryEntry {
                id: get(&row, "id")?,
                instance_id: InstanceId::new(get::<String>(&row, "instance_id")?),
                action: get::<String>(&row, "action")?.into(),
                actor_id: get::<Option<String>>(&row, "actor_id")?.map(UserId::new),
                from_stage_id: get::<Option<String>>(&row, "from_stage_id")?.map(StageId::new),
                to_stage_id: StageId::new(get::<String>(&row, "to_stage_id")?),
                comment: get(&row, "comment")?,
                created_at: get(&row, "created_at")?,
            });
        }
        Ok(entries)
    }

    async fn assigned_to(&self, user: &UserId) -> WorkflowResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS} FROM wf_instances
            WHERE assignee_id = $1 AND status = 'active'
            ORDER BY created_at ASC
            "#
        ))
        .bind(&user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres task query failed: {e}")))?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn for_project(&self, project: &ProjectId) -> WorkflowResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS} FROM wf_instances
            WHERE project_id = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(&project.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres project query failed: {e}")))?;

        rows.iter().map(row_to_instance).collect()
    }
}

const INSTANCE_COLUMNS: &str = "id, template_id, entity_type, entity_id, project_id, \
     current_stage_id, status, assignee_id, version, context, created_at, updated_at";

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    history: &[HistoryEntry],
) -> WorkflowResult<()> {
    for entry in history {
        sqlx::query(
            r#"
            INSERT INTO wf_history
                (id, instance_id, action, actor_id, from_stage_id, to_stage_id, comment, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.instance_id.0)
        .bind(entry.action.as_str())
        .bind(entry.actor_id.as_ref().map(|u| u.0.as_str()))
        .bind(entry.from_stage_id.as_ref().map(|s| s.0.as_str()))
        .bind(&entry.to_stage_id.0)
        .bind(entry.comment.as_deref())
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| WorkflowError::Storage(format!("postgres history insert failed: {e}")))?;
    }
    Ok(())
}

fn row_to_instance(row: &PgRow) -> WorkflowResult<WorkflowInstance> {
    let status: String = get(row, "status")?;
    let status: InstanceStatus = status
        .parse()
        .map_err(|e: String| WorkflowError::Storage(e))?;
    let context: serde_json::Value = get(row, "context")?;
    let context: HashMap<String, String> = serde_json::from_value(context)
        .map_err(|e| WorkflowError::Storage(format!("context decode failed: {e}")))?;

    Ok(WorkflowInstance {
        id: InstanceId::new(get::<String>(row, "id")?),
        template_id: TemplateId::new(get::<String>(row, "template_id")?),
        entity_type: EntityType::new(get::<String>(row, "entity_type")?),
        entity_id: get(row, "entity_id")?,
        project_id: ProjectId::new(get::<String>(row, "project_id")?),
        current_stage_id: StageId::new(get::<String>(row, "current_stage_id")?),
        status,
        assignee_id: get::<Option<String>>(row, "assignee_id")?.map(UserId::new),
        version: get(row, "version")?,
        context,
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> WorkflowResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| WorkflowError::Storage(format!("postgres decode of '{column}' failed: {e}")))
}
