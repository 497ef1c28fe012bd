use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres, Transaction,
    postgres::{PgConnectOptions, PgPoolOptions},
    types::Json,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, trace};

use super::RecordStore;
use super::retry::{Recovery, execute_with_retry};
use crate::error::{RecordResult, RecordStoreError, StoreFault};
use crate::keys::{TABLE_CRAWL_EXECUTIONS, TABLE_JOB_EXECUTIONS, TABLE_URI_QUEUE};
use crate::model::{CrawlExecutionState, JobExecutionStatus, TERMINAL_JOB_STATES};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

static DELETE_QUEUED_URIS: LazyLock<String> =
    LazyLock::new(|| format!("DELETE FROM {TABLE_URI_QUEUE} WHERE id = ANY($1)"));

static ABORT_TIMED_OUT_EXECUTION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "UPDATE {TABLE_CRAWL_EXECUTIONS} SET desired_state = $2 \
         WHERE id = $1 AND end_time IS NULL"
    )
});

static UPDATE_JOB_EXECUTION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "UPDATE {TABLE_JOB_EXECUTIONS} SET \
             documents_crawled = $2, \
             documents_denied = $3, \
             documents_failed = $4, \
             documents_out_of_scope = $5, \
             documents_retried = $6, \
             uris_crawled = $7, \
             bytes_crawled = $8, \
             executions_state = $9 \
         WHERE id = $1 AND (state IS NULL OR NOT (state = ANY($10)))"
    )
});

/// Connection and retry settings for [`PostgresRecordStore`].
#[derive(Clone)]
pub struct PostgresOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Upper bound on a single attempt.
    pub query_timeout: Duration,
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// How long a timed out attempt waits for the database to come back.
    pub wait_timeout: Duration,
}

impl fmt::Debug for PostgresOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("query_timeout", &self.query_timeout)
            .field("max_retries", &self.max_retries)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

impl PostgresOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database);
        if !self.username.is_empty() {
            options = options.username(&self.username);
        }
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        options
    }

    async fn build_pool(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .test_before_acquire(true)
            .connect_with(self.connect_options())
            .await
    }
}

/// Map a driver error onto the retry loop's recovery classes.
fn classify(err: sqlx::Error) -> StoreFault {
    match &err {
        sqlx::Error::PoolTimedOut => StoreFault::Timeout(err.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreFault::ConnectionClosed(err.to_string())
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // query_canceled, raised by statement_timeout
            Some("57014") => StoreFault::Timeout(err.to_string()),
            // connection_exception class and server shutdown
            Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                StoreFault::ConnectionClosed(err.to_string())
            }
            _ => StoreFault::Rejected(err.to_string()),
        },
        _ => StoreFault::Rejected(err.to_string()),
    }
}

/// Lower the commit durability for the current write transaction. Losing the
/// tail of these writes on a crash is acceptable: every write is repeated by
/// a later cycle.
async fn relax_durability(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query("SET LOCAL synchronous_commit TO OFF")
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Record store backed by PostgreSQL.
pub struct PostgresRecordStore {
    pool: RwLock<PgPool>,
    options: PostgresOptions,
}

impl fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PostgresRecordStore");
        debug.field("options", &self.options);
        if let Ok(pool) = self.pool.try_read() {
            debug
                .field("pool_size", &pool.size())
                .field("idle_connections", &pool.num_idle());
        }
        debug.finish()
    }
}

impl PostgresRecordStore {
    /// Open the pool and verify the database answers.
    pub async fn connect(options: PostgresOptions) -> RecordResult<Self> {
        let address = options.address();
        let pool = options
            .build_pool()
            .await
            .map_err(|e| RecordStoreError::Connect {
                address: address.clone(),
                message: e.to_string(),
            })?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| RecordStoreError::Connect {
                address: address.clone(),
                message: e.to_string(),
            })?;

        info!(
            "Connected to PostgreSQL at {} (max_connections={}, min_connections={})",
            address, options.max_connections, options.min_connections
        );

        Ok(Self::from_pool(pool, options))
    }

    /// Wrap an existing pool. Reconnects still use `options`.
    pub fn from_pool(pool: PgPool, options: PostgresOptions) -> Self {
        Self {
            pool: RwLock::new(pool),
            options,
        }
    }

    pub async fn close(&self) {
        info!("Closing connection to PostgreSQL");
        self.pool.read().await.close().await;
    }

    async fn current_pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    /// Run one write through the retry discipline, bounding each attempt by
    /// the query timeout.
    async fn exec_write<T, F, Fut>(&self, operation: &'static str, query: F) -> RecordResult<T>
    where
        F: Fn(PgPool) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, sqlx::Error>> + Send,
        T: Send,
    {
        let query = &query;
        let timeout = self.options.query_timeout;
        execute_with_retry(operation, self.options.max_retries, self, move || async move {
            let pool = self.current_pool().await;
            match tokio::time::timeout(timeout, query(pool)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(classify(err)),
                Err(_) => Err(StoreFault::Timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            }
        })
        .await
    }
}

#[async_trait]
impl Recovery for PostgresRecordStore {
    async fn wait_until_ready(&self) -> Result<(), StoreFault> {
        let pool = self.current_pool().await;
        let wait = self.options.wait_timeout;
        let ready = async {
            loop {
                match sqlx::query("SELECT 1").execute(&pool).await {
                    Ok(_) => return,
                    Err(err) => {
                        debug!(error = %err, "database not ready yet");
                        tokio::time::sleep(READY_POLL_INTERVAL).await;
                    }
                }
            }
        };
        tokio::time::timeout(wait, ready).await.map_err(|_| {
            StoreFault::Timeout(format!("database not ready after {}s", wait.as_secs()))
        })
    }

    async fn reconnect(&self) -> Result<(), StoreFault> {
        let fresh = self
            .options
            .build_pool()
            .await
            .map_err(|e| StoreFault::ConnectionClosed(e.to_string()))?;
        let stale = {
            let mut guard = self.pool.write().await;
            std::mem::replace(&mut *guard, fresh)
        };
        info!("Reconnected to PostgreSQL at {}", self.options.address());
        // Connections still checked out by other loops finish on the old pool
        tokio::spawn(async move {
            stale.close().await;
        });
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn delete_queued_uris(&self, ids: &[String]) -> RecordResult<u64> {
        let ids = ids.to_vec();
        self.exec_write("delete-queued-uris", |pool| {
            let ids = ids.clone();
            async move {
                let mut tx = pool.begin().await?;
                relax_durability(&mut tx).await?;
                let result = sqlx::query(DELETE_QUEUED_URIS.as_str())
                    .bind(ids)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn abort_timed_out_execution(&self, ceid: &str) -> RecordResult<u64> {
        let ceid = ceid.to_string();
        self.exec_write("set-crawl-execution-state-aborted-timeout", |pool| {
            let ceid = ceid.clone();
            async move {
                let mut tx = pool.begin().await?;
                relax_durability(&mut tx).await?;
                let result = sqlx::query(ABORT_TIMED_OUT_EXECUTION.as_str())
                    .bind(ceid)
                    .bind(CrawlExecutionState::AbortedTimeout.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self, status), fields(jeid = %status.id))]
    async fn update_job_execution(&self, status: &JobExecutionStatus) -> RecordResult<u64> {
        let terminal: Vec<String> = TERMINAL_JOB_STATES.iter().map(|s| s.to_string()).collect();
        let replaced = self
            .exec_write("update-job-execution-status", |pool| {
                let status = status.clone();
                let terminal = terminal.clone();
                async move {
                    let mut tx = pool.begin().await?;
                    relax_durability(&mut tx).await?;
                    let result = sqlx::query(UPDATE_JOB_EXECUTION.as_str())
                        .bind(&status.id)
                        .bind(status.documents_crawled)
                        .bind(status.documents_denied)
                        .bind(status.documents_failed)
                        .bind(status.documents_out_of_scope)
                        .bind(status.documents_retried)
                        .bind(status.uris_crawled)
                        .bind(status.bytes_crawled)
                        .bind(Json(status.executions_state_json()))
                        .bind(terminal)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                    Ok(result.rows_affected())
                }
            })
            .await?;
        if replaced == 0 {
            trace!(jeid = %status.id, "job execution is terminal or missing, counters not written");
        }
        Ok(replaced)
    }
}
