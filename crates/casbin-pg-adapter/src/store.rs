//! Policy operations over the policy table.
//!
//! # Purpose
//! Implements load, replace-all save, single-rule add/remove and their batch
//! variants. Every operation opens its own connection through the
//! [`ConnectionManager`], acts, and closes it on every exit path.
//!
//! # Key invariants
//! - Saves are replace-all: drop, recreate and reinsert run in one transaction,
//!   so a failed save leaves the previous rows in place.
//! - Rules are validated before any statement runs.
//! - Removal matches on the provided fields only: `v0..v(n-1)` for an `n`-field
//!   rule, trailing columns unconstrained.
//!
//! # Concurrency model
//! No state is shared between calls besides configuration. Concurrent callers
//! may observe each other's partial work outside of the save transaction.
use crate::codec::{self, StoredRow};
use crate::config::AdapterConfig;
use crate::connection::{self, ConnectionManager};
use crate::error::{AdapterError, AdapterResult};
use casbin::Model;
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgConnection};
use sqlx::query::Query;
use sqlx::{Connection, Postgres, QueryBuilder};

/// Sections persisted by a full save, in insertion order.
pub const SAVED_SECTIONS: [&str; 2] = ["p", "g"];

const COLUMNS: &str = "ptype, v0, v1, v2, v3, v4, v5";

/// Field constraints for a filtered load, per section.
///
/// An empty value leaves its column unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub p: Vec<String>,
    pub g: Vec<String>,
}

impl RuleFilter {
    fn sections(&self) -> [(&'static str, &[String]); 2] {
        [("p", self.p.as_slice()), ("g", self.g.as_slice())]
    }
}

pub struct PolicyStore {
    connections: ConnectionManager,
}

impl PolicyStore {
    pub fn new(config: &AdapterConfig) -> AdapterResult<Self> {
        Ok(Self {
            connections: ConnectionManager::new(config)?,
        })
    }

    pub fn table_name(&self) -> &str {
        self.connections.table_name()
    }

    /// Append every stored rule to `model`. Returns the number of rows read.
    ///
    /// Rows applied before a failure stay applied.
    pub async fn load_policy(&self, model: &mut dyn Model) -> AdapterResult<usize> {
        let mut conn = self.connections.open().await?;
        let result = self.load_rows(&mut conn, model, None).await;
        connection::close(conn).await;
        let count = result?;
        tracing::debug!(table = %self.table_name(), rows = count, "loaded policy");
        Ok(count)
    }

    /// Like [`PolicyStore::load_policy`], restricted to rows matching `filter`.
    pub async fn load_filtered_policy(
        &self,
        model: &mut dyn Model,
        filter: &RuleFilter,
    ) -> AdapterResult<usize> {
        let mut conn = self.connections.open().await?;
        let result = self.load_rows(&mut conn, model, Some(filter)).await;
        connection::close(conn).await;
        let count = result?;
        tracing::debug!(table = %self.table_name(), rows = count, "loaded filtered policy");
        Ok(count)
    }

    /// Replace the stored policy with the `p` and `g` sections of `model`.
    pub async fn save_policy(&self, model: &dyn Model) -> AdapterResult<usize> {
        let rows = collect_rows(model)?;
        let mut conn = self.connections.open().await?;
        let result = self.replace_all(&mut conn, &rows).await;
        connection::close(conn).await;
        result?;
        tracing::info!(table = %self.table_name(), rows = rows.len(), "saved policy");
        Ok(rows.len())
    }

    pub async fn add_policy(&self, _sec: &str, ptype: &str, rule: &[String]) -> AdapterResult<()> {
        let row = StoredRow::from_rule(ptype, rule)?;
        let mut conn = self.connections.open().await?;
        let result = self.insert_row(&mut conn, &row).await;
        connection::close(conn).await;
        result?;
        tracing::debug!(table = %self.table_name(), ptype = %ptype, "added rule");
        Ok(())
    }

    /// Insert all `rules` atomically.
    pub async fn add_policies(
        &self,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> AdapterResult<()> {
        let rows = rules
            .iter()
            .map(|rule| StoredRow::from_rule(ptype, rule))
            .collect::<AdapterResult<Vec<_>>>()?;
        let mut conn = self.connections.open().await?;
        let result = self.insert_rows(&mut conn, &rows).await;
        connection::close(conn).await;
        result?;
        tracing::debug!(
            table = %self.table_name(),
            ptype = %ptype,
            rows = rows.len(),
            "added rules"
        );
        Ok(())
    }

    /// Delete rows of `ptype` whose leading fields equal `rule`.
    ///
    /// Returns the number of deleted rows; zero is not an error.
    pub async fn remove_policy(
        &self,
        _sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> AdapterResult<u64> {
        codec::validate_arity(ptype, rule)?;
        let mut conn = self.connections.open().await?;
        let result = delete_statement(self.table_name(), ptype, rule)
            .build()
            .execute(&mut conn)
            .await;
        connection::close(conn).await;
        let deleted = result?.rows_affected();
        tracing::debug!(table = %self.table_name(), ptype = %ptype, deleted, "removed rule");
        Ok(deleted)
    }

    /// Delete every rule in `rules` atomically. Returns the total deleted rows.
    pub async fn remove_policies(
        &self,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> AdapterResult<u64> {
        for rule in rules {
            codec::validate_arity(ptype, rule)?;
        }
        let mut conn = self.connections.open().await?;
        let result = self.delete_rules(&mut conn, ptype, rules).await;
        connection::close(conn).await;
        let deleted = result?;
        tracing::debug!(table = %self.table_name(), ptype = %ptype, deleted, "removed rules");
        Ok(deleted)
    }

    /// Filtered removal is not supported; nothing is touched.
    pub async fn remove_filtered_policy(
        &self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _field_values: &[String],
    ) -> AdapterResult<()> {
        Err(AdapterError::NotImplemented("remove_filtered_policy"))
    }

    /// Delete every stored rule, keeping the table.
    pub async fn clear_policy(&self) -> AdapterResult<u64> {
        let mut conn = self.connections.open().await?;
        let result = sqlx::query(&format!("DELETE FROM {}", self.table_name()))
            .execute(&mut conn)
            .await;
        connection::close(conn).await;
        let deleted = result?.rows_affected();
        tracing::info!(table = %self.table_name(), deleted, "cleared policy");
        Ok(deleted)
    }

    async fn load_rows(
        &self,
        conn: &mut PgConnection,
        model: &mut dyn Model,
        filter: Option<&RuleFilter>,
    ) -> AdapterResult<usize> {
        let mut query = select_statement(self.table_name(), filter);
        let mut rows = query.build_query_as::<StoredRow>().fetch(&mut *conn);
        let mut count = 0;
        while let Some(row) = rows.try_next().await? {
            codec::load_policy_line(&row.to_line(), model);
            count += 1;
        }
        Ok(count)
    }

    async fn replace_all(&self, conn: &mut PgConnection, rows: &[StoredRow]) -> AdapterResult<()> {
        let mut tx = conn.begin().await?;
        sqlx::query(&self.connections.drop_table_sql())
            .execute(&mut *tx)
            .await
            .map_err(AdapterError::Schema)?;
        sqlx::query(&self.connections.create_table_sql())
            .execute(&mut *tx)
            .await
            .map_err(AdapterError::Schema)?;
        let insert = insert_sql(self.table_name());
        for row in rows {
            bind_row(sqlx::query(&insert), row).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_row(&self, conn: &mut PgConnection, row: &StoredRow) -> AdapterResult<()> {
        let insert = insert_sql(self.table_name());
        bind_row(sqlx::query(&insert), row).execute(&mut *conn).await?;
        Ok(())
    }

    async fn insert_rows(&self, conn: &mut PgConnection, rows: &[StoredRow]) -> AdapterResult<()> {
        let insert = insert_sql(self.table_name());
        let mut tx = conn.begin().await?;
        for row in rows {
            bind_row(sqlx::query(&insert), row).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_rules(
        &self,
        conn: &mut PgConnection,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> AdapterResult<u64> {
        let mut tx = conn.begin().await?;
        let mut deleted = 0;
        for rule in rules {
            deleted += delete_statement(self.table_name(), ptype, rule)
                .build()
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }
}

/// Encode the `p` then `g` sections of `model`, validating every rule.
pub fn collect_rows(model: &dyn Model) -> AdapterResult<Vec<StoredRow>> {
    let mut rows = Vec::new();
    for section in SAVED_SECTIONS {
        let Some(assertions) = model.get_model().get(section) else {
            continue;
        };
        for (ptype, assertion) in assertions {
            for rule in assertion.get_policy() {
                rows.push(StoredRow::from_rule(ptype, rule)?);
            }
        }
    }
    Ok(rows)
}

pub(crate) fn insert_sql(table: &str) -> String {
    format!("INSERT INTO {table} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)")
}

fn bind_row<'q>(
    query: Query<'q, Postgres, PgArguments>,
    row: &'q StoredRow,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(&row.ptype)
        .bind(&row.v0)
        .bind(&row.v1)
        .bind(&row.v2)
        .bind(&row.v3)
        .bind(&row.v4)
        .bind(&row.v5)
}

pub(crate) fn delete_statement<'a>(
    table: &str,
    ptype: &str,
    rule: &[String],
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {table} WHERE ptype = "));
    qb.push_bind(ptype.to_string());
    for (index, value) in rule.iter().enumerate() {
        qb.push(format!(" AND v{index} = "));
        qb.push_bind(value.clone());
    }
    qb
}

pub(crate) fn select_statement<'a>(
    table: &str,
    filter: Option<&RuleFilter>,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM {table}"));
    let Some(filter) = filter else {
        return qb;
    };
    qb.push(" WHERE ");
    for (position, (section, values)) in filter.sections().into_iter().enumerate() {
        if position > 0 {
            qb.push(" OR ");
        }
        qb.push("(ptype LIKE ");
        qb.push_bind(format!("{section}%"));
        for (index, value) in values.iter().enumerate().take(codec::MAX_FIELDS) {
            if value.is_empty() {
                continue;
            }
            qb.push(format!(" AND v{index} = "));
            qb.push_bind(value.clone());
        }
        qb.push(")");
    }
    qb
}
