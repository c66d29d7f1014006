//! PostgreSQL Backend
//!
//! Connection pooling with deadpool-postgres and a [`PgStore`] that
//! implements both storage traits against two tables:
//!
//! ```text
//! agents(id, name, credential, color, created_at, last_write_at)
//! cells(x, y, color, writer_id, written_at)   -- primary key (x, y)
//! ```
//!
//! Cooldown admission is a single conditional `UPDATE ... RETURNING`; row
//! locking in PostgreSQL serializes concurrent admissions for one agent.

use async_trait::async_trait;
use canvas_core::{
    Admission, Agent, AgentId, AgentProfile, Bounds, Cell, Color, Coord, Credential,
    DirectoryError, EpochMillis, StorageError,
};
use canvas_storage::{AgentDirectory, GridStore};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "canvas".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("CANVAS_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("CANVAS_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("CANVAS_DB_NAME").unwrap_or_else(|_| "canvas".to_string()),
            user: std::env::var("CANVAS_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("CANVAS_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("CANVAS_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("CANVAS_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, StorageError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_err(err: PoolError) -> StorageError {
    let reason = match err {
        PoolError::Timeout(_) => "connection pool exhausted".to_string(),
        PoolError::Closed => "connection pool is closed".to_string(),
        other => format!("failed to acquire connection: {}", other),
    };
    StorageError::Unavailable { reason }
}

fn read_err(what: &'static str) -> impl FnOnce(tokio_postgres::Error) -> StorageError {
    move |e| StorageError::ReadFailed {
        what: what.to_string(),
        reason: e.to_string(),
    }
}

fn write_err(what: &'static str) -> impl FnOnce(tokio_postgres::Error) -> StorageError {
    move |e| StorageError::WriteFailed {
        what: what.to_string(),
        reason: e.to_string(),
    }
}

fn corrupt(table: &str, reason: impl ToString) -> StorageError {
    StorageError::Corrupt {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

fn coord_param(v: u32) -> i64 {
    i64::from(v)
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id            UUID PRIMARY KEY,
    name          TEXT NOT NULL,
    credential    TEXT NOT NULL,
    color         TEXT NOT NULL,
    created_at    BIGINT NOT NULL,
    last_write_at BIGINT NULL,
    CONSTRAINT agents_credential_key UNIQUE (credential)
);

CREATE TABLE IF NOT EXISTS cells (
    x          BIGINT NOT NULL,
    y          BIGINT NOT NULL,
    color      TEXT NOT NULL,
    writer_id  UUID NOT NULL,
    written_at BIGINT NOT NULL,
    PRIMARY KEY (x, y)
);
"#;

const CELL_COLUMNS: &str = "x, y, color, writer_id, written_at";
const AGENT_COLUMNS: &str = "id, name, credential, color, created_at, last_write_at";

fn cell_from_row(row: &Row) -> Result<Cell, StorageError> {
    let x: i64 = row.try_get("x").map_err(|e| corrupt("cells", e))?;
    let y: i64 = row.try_get("y").map_err(|e| corrupt("cells", e))?;
    let color: String = row.try_get("color").map_err(|e| corrupt("cells", e))?;
    Ok(Cell {
        x: u32::try_from(x).map_err(|e| corrupt("cells", e))?,
        y: u32::try_from(y).map_err(|e| corrupt("cells", e))?,
        color: Color::parse(&color).map_err(|e| corrupt("cells", e))?,
        writer_id: row.try_get("writer_id").map_err(|e| corrupt("cells", e))?,
        written_at: row.try_get("written_at").map_err(|e| corrupt("cells", e))?,
    })
}

fn agent_from_row(row: &Row) -> Result<Agent, StorageError> {
    let credential: String = row.try_get("credential").map_err(|e| corrupt("agents", e))?;
    let color: String = row.try_get("color").map_err(|e| corrupt("agents", e))?;
    Ok(Agent {
        id: row.try_get("id").map_err(|e| corrupt("agents", e))?,
        name: row.try_get("name").map_err(|e| corrupt("agents", e))?,
        credential: Credential::parse(&credential).map_err(|e| corrupt("agents", e))?,
        color: Color::parse(&color).map_err(|e| corrupt("agents", e))?,
        created_at: row.try_get("created_at").map_err(|e| corrupt("agents", e))?,
        last_write_at: row.try_get("last_write_at").map_err(|e| corrupt("agents", e))?,
    })
}

// ============================================================================
// STORE
// ============================================================================

/// Grid store and agent directory backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from `config` and make sure the tables exist.
    pub async fn connect(config: &DbConfig) -> Result<Self, StorageError> {
        let store = Self::new(config.create_pool()?);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables if missing. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let client = self.client().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(write_err("schema"))?;
        tracing::info!("postgres schema ready");
        Ok(())
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StorageError> {
        self.pool.get().await.map_err(pool_err)
    }
}

#[async_trait]
impl GridStore for PgStore {
    async fn get(&self, coord: Coord) -> Result<Option<Cell>, StorageError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CELL_COLUMNS} FROM cells WHERE x = $1 AND y = $2"),
                &[&coord_param(coord.x), &coord_param(coord.y)],
            )
            .await
            .map_err(read_err("cell"))?;
        row.as_ref().map(cell_from_row).transpose()
    }

    async fn put(&self, cell: &Cell) -> Result<(), StorageError> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO cells (x, y, color, writer_id, written_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (x, y) DO UPDATE SET \
                 color = EXCLUDED.color, writer_id = EXCLUDED.writer_id, written_at = EXCLUDED.written_at \
                 WHERE (cells.written_at, cells.writer_id) <= (EXCLUDED.written_at, EXCLUDED.writer_id)",
                &[
                    &coord_param(cell.x),
                    &coord_param(cell.y),
                    &cell.color.to_hex(),
                    &cell.writer_id,
                    &cell.written_at,
                ],
            )
            .await
            .map_err(write_err("cell"))?;
        Ok(())
    }

    async fn range(&self, bounds: Bounds) -> Result<Vec<Cell>, StorageError> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {CELL_COLUMNS} FROM cells \
                     WHERE x BETWEEN $1 AND $2 AND y BETWEEN $3 AND $4 ORDER BY y, x"
                ),
                &[
                    &coord_param(bounds.min_x),
                    &coord_param(bounds.max_x),
                    &coord_param(bounds.min_y),
                    &coord_param(bounds.max_y),
                ],
            )
            .await
            .map_err(read_err("cell range"))?;
        rows.iter().map(cell_from_row).collect()
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT COUNT(*) AS n FROM cells", &[])
            .await
            .map_err(read_err("cell count"))?;
        let n: i64 = row.try_get("n").map_err(|e| corrupt("cells", e))?;
        u64::try_from(n).map_err(|e| corrupt("cells", e))
    }

    async fn bounds(&self) -> Result<Option<Bounds>, StorageError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT MIN(x) AS min_x, MAX(x) AS max_x, MIN(y) AS min_y, MAX(y) AS max_y FROM cells",
                &[],
            )
            .await
            .map_err(read_err("cell bounds"))?;

        let get = |name: &str| -> Result<Option<u32>, StorageError> {
            let v: Option<i64> = row.try_get(name).map_err(|e| corrupt("cells", e))?;
            v.map(|v| u32::try_from(v).map_err(|e| corrupt("cells", e)))
                .transpose()
        };
        match (get("min_x")?, get("max_x")?, get("min_y")?, get("max_y")?) {
            (Some(min_x), Some(max_x), Some(min_y), Some(max_y)) => Ok(Some(Bounds {
                min_x,
                max_x,
                min_y,
                max_y,
            })),
            _ => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<Cell>, StorageError> {
        let client = self.client().await?;
        let rows = client
            .query(&format!("SELECT {CELL_COLUMNS} FROM cells"), &[])
            .await
            .map_err(read_err("cells"))?;
        rows.iter().map(cell_from_row).collect()
    }

    async fn health(&self) -> Result<(), StorageError> {
        let client = self.client().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(read_err("health probe"))?;
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for PgStore {
    async fn create(&self, agent: &Agent) -> Result<(), DirectoryError> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO agents (id, name, credential, color, created_at, last_write_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &agent.id,
                    &agent.name,
                    &agent.credential.expose(),
                    &agent.color.to_hex(),
                    &agent.created_at,
                    &agent.last_write_at,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match e.as_db_error() {
                Some(db) if db.code() == &SqlState::UNIQUE_VIOLATION => {
                    if db.constraint() == Some("agents_credential_key") {
                        Err(DirectoryError::DuplicateCredential)
                    } else {
                        Err(DirectoryError::DuplicateId { id: agent.id })
                    }
                }
                _ => Err(write_err("agent")(e).into()),
            },
        }
    }

    async fn find_by_credential(&self, credential: &Credential) -> Result<Agent, DirectoryError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE credential = $1"),
                &[&credential.expose()],
            )
            .await
            .map_err(read_err("agent"))?;
        match row {
            Some(row) => Ok(agent_from_row(&row)?),
            None => Err(DirectoryError::NotFound),
        }
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, DirectoryError> {
        let client = self.client().await?;
        let row = client
            .query_opt(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"), &[&id])
            .await
            .map_err(read_err("agent"))?;
        match row {
            Some(row) => Ok(agent_from_row(&row)?),
            None => Err(DirectoryError::NotFound),
        }
    }

    async fn list(&self) -> Result<Vec<AgentProfile>, DirectoryError> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at, id"),
                &[],
            )
            .await
            .map_err(read_err("agents"))?;
        let mut profiles = Vec::with_capacity(rows.len());
        for row in &rows {
            profiles.push(agent_from_row(row)?.profile());
        }
        Ok(profiles)
    }

    async fn try_admit(
        &self,
        id: AgentId,
        now: EpochMillis,
        cooldown_ms: EpochMillis,
    ) -> Result<Admission, DirectoryError> {
        let client = self.client().await?;
        let admitted = client
            .query_opt(
                "UPDATE agents SET last_write_at = $2::BIGINT \
                 WHERE id = $1 \
                 AND (last_write_at IS NULL OR last_write_at <= $2::BIGINT - $3::BIGINT) \
                 RETURNING id",
                &[&id, &now, &cooldown_ms],
            )
            .await
            .map_err(write_err("agent cooldown"))?;

        if admitted.is_some() {
            return Ok(Admission::Admitted);
        }

        // Not admitted. This read only shapes the rejection.
        let row = client
            .query_opt("SELECT last_write_at FROM agents WHERE id = $1", &[&id])
            .await
            .map_err(read_err("agent cooldown"))?;
        match row {
            None => Ok(Admission::UnknownAgent),
            Some(row) => {
                let last: Option<i64> = row
                    .try_get("last_write_at")
                    .map_err(|e| corrupt("agents", e))?;
                Ok(Admission::CoolingDown {
                    last_write_at: last.unwrap_or(now),
                })
            }
        }
    }

    async fn health(&self) -> Result<(), StorageError> {
        GridStore::health(self).await
    }
}
