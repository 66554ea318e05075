//! Transactional Postgres store for worker lifecycle records and
//! blackboard messages. Schema bootstrap follows the same
//! `CREATE TABLE IF NOT EXISTS` style the rest of the stack uses instead
//! of an ORM or migration framework.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{FromRow, PgPool, QueryBuilder};

const SCHEMA: &str = "fleet";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkerRow {
    pub id: String,
    pub handle: String,
    pub team_name: String,
    pub role: String,
    pub swarm_id: Option<String>,
    pub depth_level: i32,
    pub spawn_mode: String,
    pub state: String,
    pub health: String,
    pub working_dir: String,
    pub worktree_path: Option<String>,
    pub worktree_branch: Option<String>,
    pub session_id: Option<String>,
    pub pid: Option<i32>,
    pub pane_id: Option<String>,
    pub last_heartbeat: i64,
    pub spawned_at: DateTime<Utc>,
    pub restart_count: i32,
    pub current_task_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BlackboardRow {
    pub id: String,
    pub swarm_id: String,
    pub sender_handle: String,
    pub message_type: String,
    pub target_handle: Option<String>,
    pub priority: i16,
    pub payload: serde_json::Value,
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct BlackboardStats {
    pub total: i64,
    pub by_type: std::collections::HashMap<String, i64>,
    pub by_priority: std::collections::HashMap<i16, i64>,
    pub unread: i64,
    pub archived: i64,
}

/// Filters accepted by [`Database::read_messages`]. All non-`None`
/// clauses AND together.
#[derive(Debug, Default, Clone)]
pub struct MessageFilter {
    pub message_type: Option<String>,
    pub target_handle: Option<String>,
    pub priority: Option<i16>,
    pub unread_only: bool,
    pub reader_handle: Option<String>,
    pub limit: i64,
    pub include_archived: bool,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self { limit: 100, ..Default::default() }
    }
}

pub async fn create_schema(pool: &PgPool, schema: &str) -> Result<()> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}")).execute(pool).await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.workers (
            id TEXT PRIMARY KEY,
            handle TEXT NOT NULL UNIQUE,
            team_name TEXT NOT NULL,
            role TEXT NOT NULL,
            swarm_id TEXT,
            depth_level INTEGER NOT NULL DEFAULT 0,
            spawn_mode TEXT NOT NULL,
            state TEXT NOT NULL,
            health TEXT NOT NULL DEFAULT 'healthy',
            working_dir TEXT NOT NULL,
            worktree_path TEXT,
            worktree_branch TEXT,
            session_id TEXT,
            pid INTEGER,
            pane_id TEXT,
            last_heartbeat BIGINT NOT NULL,
            spawned_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            restart_count INTEGER NOT NULL DEFAULT 0,
            current_task_id TEXT
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_workers_swarm ON {schema}.workers(swarm_id)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.blackboard (
            id TEXT PRIMARY KEY,
            swarm_id TEXT NOT NULL,
            sender_handle TEXT NOT NULL,
            message_type TEXT NOT NULL,
            target_handle TEXT,
            priority SMALLINT NOT NULL DEFAULT 1,
            payload JSONB NOT NULL,
            read_by TEXT[] NOT NULL DEFAULT '{{}}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            archived_at TIMESTAMPTZ
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_blackboard_lookup ON {schema}.blackboard \
         (swarm_id, archived_at, message_type, priority, created_at DESC)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

impl Database {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(pool_size).connect(database_url).await?;
        tracing::info!(pool_size, "persistence pool initialized");
        create_schema(&pool, SCHEMA).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // --- worker lifecycle records ---

    pub async fn upsert_worker(&self, w: &WorkerRow) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {SCHEMA}.workers
                (id, handle, team_name, role, swarm_id, depth_level, spawn_mode, state, health,
                 working_dir, worktree_path, worktree_branch, session_id, pid, pane_id,
                 last_heartbeat, spawned_at, restart_count, current_task_id)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                health = EXCLUDED.health,
                session_id = EXCLUDED.session_id,
                pid = EXCLUDED.pid,
                pane_id = EXCLUDED.pane_id,
                last_heartbeat = EXCLUDED.last_heartbeat,
                restart_count = EXCLUDED.restart_count,
                current_task_id = EXCLUDED.current_task_id,
                worktree_path = EXCLUDED.worktree_path,
                worktree_branch = EXCLUDED.worktree_branch
            "#
        ))
        .bind(&w.id)
        .bind(&w.handle)
        .bind(&w.team_name)
        .bind(&w.role)
        .bind(&w.swarm_id)
        .bind(w.depth_level)
        .bind(&w.spawn_mode)
        .bind(&w.state)
        .bind(&w.health)
        .bind(&w.working_dir)
        .bind(&w.worktree_path)
        .bind(&w.worktree_branch)
        .bind(&w.session_id)
        .bind(w.pid)
        .bind(&w.pane_id)
        .bind(w.last_heartbeat)
        .bind(w.spawned_at)
        .bind(w.restart_count)
        .bind(&w.current_task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_worker(&self, id: &str) -> Result<Option<WorkerRow>> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "SELECT * FROM {SCHEMA}.workers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_worker_by_handle(&self, handle: &str) -> Result<Option<WorkerRow>> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "SELECT * FROM {SCHEMA}.workers WHERE handle = $1"
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_all_workers(&self) -> Result<Vec<WorkerRow>> {
        let rows = sqlx::query_as::<_, WorkerRow>(&format!("SELECT * FROM {SCHEMA}.workers"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn delete_worker(&self, id: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {SCHEMA}.workers WHERE id = $1"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- blackboard ---

    pub async fn insert_message(&self, m: &BlackboardRow) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {SCHEMA}.blackboard
                (id, swarm_id, sender_handle, message_type, target_handle, priority, payload, read_by, created_at, archived_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#
        ))
        .bind(&m.id)
        .bind(&m.swarm_id)
        .bind(&m.sender_handle)
        .bind(&m.message_type)
        .bind(&m.target_handle)
        .bind(m.priority)
        .bind(&m.payload)
        .bind(&m.read_by)
        .bind(m.created_at)
        .bind(m.archived_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<BlackboardRow>> {
        let row = sqlx::query_as::<_, BlackboardRow>(&format!(
            "SELECT * FROM {SCHEMA}.blackboard WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Filters AND together; targeting a handle also includes broadcasts
    /// (`target_handle IS NULL`). Sort: priority desc, created_at desc,
    /// tie-broken by `id` lexicographically.
    pub async fn read_messages(&self, swarm_id: &str, filter: &MessageFilter) -> Result<Vec<BlackboardRow>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM {SCHEMA}.blackboard WHERE swarm_id = "));
        qb.push_bind(swarm_id.to_string());

        if !filter.include_archived {
            qb.push(" AND archived_at IS NULL");
        }
        if let Some(mt) = &filter.message_type {
            qb.push(" AND message_type = ").push_bind(mt.clone());
        }
        if let Some(th) = &filter.target_handle {
            qb.push(" AND (target_handle = ").push_bind(th.clone()).push(" OR target_handle IS NULL)");
        }
        if let Some(p) = filter.priority {
            qb.push(" AND priority = ").push_bind(p);
        }
        if filter.unread_only {
            if let Some(reader) = &filter.reader_handle {
                qb.push(" AND NOT (").push_bind(reader.clone()).push(" = ANY(read_by))");
            }
        }
        qb.push(" ORDER BY priority DESC, created_at DESC, id ASC LIMIT ");
        qb.push_bind(filter.limit);

        let rows = qb.build_query_as::<BlackboardRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Returns the number of rows where `reader_handle` was newly added
    /// to `read_by` (idempotent: already-read ids don't count again).
    pub async fn mark_read(&self, ids: &[String], reader_handle: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {SCHEMA}.blackboard
            SET read_by = array_append(read_by, $1)
            WHERE id = ANY($2) AND NOT ($1 = ANY(read_by))
            "#
        ))
        .bind(reader_handle)
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn archive_message(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {SCHEMA}.blackboard SET archived_at = NOW() WHERE id = $1 AND archived_at IS NULL"
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn archive_messages(&self, ids: &[String]) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {SCHEMA}.blackboard SET archived_at = NOW() WHERE id = ANY($1) AND archived_at IS NULL"
        ))
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn archive_old_messages(&self, swarm_id: &str, max_age_ms: i64) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {SCHEMA}.blackboard
            SET archived_at = NOW()
            WHERE swarm_id = $1 AND archived_at IS NULL
              AND created_at < NOW() - (($2)::double precision * INTERVAL '1 millisecond')
            "#
        ))
        .bind(swarm_id)
        .bind(max_age_ms as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_archived(&self, swarm_id: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {SCHEMA}.blackboard WHERE swarm_id = $1 AND archived_at IS NOT NULL"
        ))
        .bind(swarm_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_unread_count(&self, swarm_id: &str, reader_handle: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            r#"
            SELECT COUNT(*) FROM {SCHEMA}.blackboard
            WHERE swarm_id = $1 AND archived_at IS NULL
              AND NOT ($2 = ANY(read_by))
              AND (target_handle = $2 OR target_handle IS NULL)
            "#
        ))
        .bind(swarm_id)
        .bind(reader_handle)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn get_stats(&self, swarm_id: &str) -> Result<BlackboardStats> {
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {SCHEMA}.blackboard WHERE swarm_id = $1"
        ))
        .bind(swarm_id)
        .fetch_one(&self.pool)
        .await?;

        let (archived,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {SCHEMA}.blackboard WHERE swarm_id = $1 AND archived_at IS NOT NULL"
        ))
        .bind(swarm_id)
        .fetch_one(&self.pool)
        .await?;

        let by_type_rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT message_type, COUNT(*) FROM {SCHEMA}.blackboard WHERE swarm_id = $1 GROUP BY message_type"
        ))
        .bind(swarm_id)
        .fetch_all(&self.pool)
        .await?;

        let by_priority_rows: Vec<(i16, i64)> = sqlx::query_as(&format!(
            "SELECT priority, COUNT(*) FROM {SCHEMA}.blackboard WHERE swarm_id = $1 GROUP BY priority"
        ))
        .bind(swarm_id)
        .fetch_all(&self.pool)
        .await?;

        let (unread,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {SCHEMA}.blackboard WHERE swarm_id = $1 AND archived_at IS NULL AND array_length(read_by, 1) IS NULL"
        ))
        .bind(swarm_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(BlackboardStats {
            total,
            by_type: by_type_rows.into_iter().collect(),
            by_priority: by_priority_rows.into_iter().collect(),
            unread,
            archived,
        })
    }
}
