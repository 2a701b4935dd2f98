//! Per-operation Postgres connections.
//!
//! # Purpose
//! Hands every adapter operation a fresh connection bound to a database that
//! contains the policy table, creating the database and table on demand.
//!
//! # Key invariants
//! - [`ConnectionManager::open`] either returns a ready connection or an error;
//!   a connection whose schema setup failed is closed before returning.
//! - Connect attempts are bounded by the configured timeout.
//!
//! # Security notes
//! - The data source URL may carry credentials; it is never logged.
use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::str::FromStr;
use std::time::Duration;

/// SQLSTATE raised when `CREATE DATABASE` races another creator.
const DUPLICATE_DATABASE: &str = "42P04";

pub struct ConnectionManager {
    options: PgConnectOptions,
    database_specified: bool,
    database_name: String,
    table_name: String,
    connect_timeout_ms: u64,
}

impl ConnectionManager {
    pub fn new(config: &AdapterConfig) -> AdapterResult<Self> {
        config.validate()?;
        let mut options = PgConnectOptions::from_str(&config.url)
            .map_err(|err| AdapterError::Config(format!("invalid data source url: {err}")))?;
        if let Some(timeout_ms) = config.statement_timeout_ms {
            options = options.options([("statement_timeout", timeout_ms.to_string())]);
        }
        Ok(Self {
            options,
            database_specified: config.database_specified,
            database_name: config.database_name.clone(),
            table_name: config.table_name.clone(),
            connect_timeout_ms: config.connect_timeout_ms,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Open a connection to the policy database with the policy table present.
    pub async fn open(&self) -> AdapterResult<PgConnection> {
        let target = if self.database_specified {
            self.options.clone()
        } else {
            self.ensure_database().await?;
            self.options.clone().database(&self.database_name)
        };
        let mut conn = self.connect(&target).await?;
        if let Err(err) = self.ensure_table(&mut conn).await {
            close(conn).await;
            return Err(err);
        }
        Ok(conn)
    }

    /// Create the policy table if it does not exist yet.
    pub async fn ensure_table(&self, conn: &mut PgConnection) -> AdapterResult<()> {
        sqlx::query(&create_table_sql(&self.table_name))
            .execute(&mut *conn)
            .await
            .map_err(AdapterError::Schema)?;
        Ok(())
    }

    /// Drop the policy table; used by replace-all saves inside their transaction.
    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table_name)
    }

    pub fn create_table_sql(&self) -> String {
        create_table_sql(&self.table_name)
    }

    async fn ensure_database(&self) -> AdapterResult<()> {
        // The administrative connection uses the data source as given.
        let mut admin = self.connect(&self.options).await?;
        let result = create_database_if_missing(&mut admin, &self.database_name).await;
        close(admin).await;
        result
    }

    async fn connect(&self, options: &PgConnectOptions) -> AdapterResult<PgConnection> {
        let timeout = Duration::from_millis(self.connect_timeout_ms);
        match tokio::time::timeout(timeout, PgConnection::connect_with(options)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => Err(AdapterError::Connection(err)),
            Err(_) => Err(AdapterError::ConnectTimeout(self.connect_timeout_ms)),
        }
    }
}

async fn create_database_if_missing(conn: &mut PgConnection, name: &str) -> AdapterResult<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(AdapterError::Schema)?;
    if exists {
        return Ok(());
    }
    match sqlx::query(&format!("CREATE DATABASE {name}"))
        .execute(&mut *conn)
        .await
    {
        Ok(_) => {
            tracing::info!(database = %name, "created policy database");
            Ok(())
        }
        Err(err) if is_duplicate_database(&err) => Ok(()),
        Err(err) => Err(AdapterError::Schema(err)),
    }
}

fn is_duplicate_database(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code == DUPLICATE_DATABASE)
}

pub(crate) fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         ptype VARCHAR(10), \
         v0 VARCHAR(256), v1 VARCHAR(256), v2 VARCHAR(256), \
         v3 VARCHAR(256), v4 VARCHAR(256), v5 VARCHAR(256))"
    )
}

/// Best-effort release; close failures are not reported.
pub async fn close(conn: PgConnection) {
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "ignoring connection close failure");
    }
}
