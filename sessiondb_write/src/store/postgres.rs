//! A Postgres backed implementation of the [`Store`]

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use observability_deps::tracing::{debug, info};
use sessiondb_id::SessionId;
use sqlx::{
    PgPool, Postgres, QueryBuilder,
    postgres::{PgArguments, PgConnectOptions, PgPoolOptions},
    query::Query,
    query_builder::Separated,
};

use super::{Error, Row, Store};
use crate::{
    bulk::BulkSpec,
    value::{NullKind, Statement, Value},
};

/// Postgres caps the number of bind parameters of a single statement at `u16::MAX`.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Postgres connection options.
#[derive(Debug, Clone)]
pub struct PostgresConnectionOptions {
    /// Application name.
    ///
    /// This will be reported to postgres.
    pub app_name: String,

    /// DSN.
    pub dsn: String,

    /// Maximum number of concurrent connections.
    pub max_conns: u32,

    /// Set the amount of time to attempt connecting to the database.
    pub connect_timeout: Duration,
}

impl PostgresConnectionOptions {
    /// Default value for [`app_name`](Self::app_name).
    pub const DEFAULT_APP_NAME: &'static str = "sessiondb";

    /// Default value for [`max_conns`](Self::max_conns).
    pub const DEFAULT_MAX_CONNS: u32 = 10;

    /// Default value for [`connect_timeout`](Self::connect_timeout).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
}

impl Default for PostgresConnectionOptions {
    fn default() -> Self {
        Self {
            app_name: Self::DEFAULT_APP_NAME.to_string(),
            dsn: String::new(),
            max_conns: Self::DEFAULT_MAX_CONNS,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Writes batches and bulks through a [`PgPool`].
///
/// sqlx does not pipeline, so every statement is its own round trip. A session batch of several
/// statements runs in one transaction on one pooled connection (`BEGIN`, each statement, then
/// `COMMIT`). A single statement batch is sent alone. A bulk is one transaction over its chunked
/// multi-row inserts.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a new pool and verify the store is reachable.
    pub async fn connect(options: &PostgresConnectionOptions) -> Result<Self, Error> {
        let connect_options =
            PgConnectOptions::from_str(&options.dsn)?.application_name(&options.app_name);

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(options.max_conns)
            .acquire_timeout(options.connect_timeout)
            .connect_with(connect_options)
            .await?;

        info!(
            app_name = %options.app_name,
            max_conns = options.max_conns,
            "connected to postgres"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null(NullKind::Bool) => query.bind(None::<bool>),
        Value::Null(NullKind::Int) => query.bind(None::<i64>),
        Value::Null(NullKind::Float) => query.bind(None::<f64>),
        Value::Null(NullKind::Text) => query.bind(None::<&str>),
        Value::Null(NullKind::Bytes) => query.bind(None::<&[u8]>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

fn push_bind_value(builder: &mut Separated<'_, '_, Postgres, &'static str>, value: &Value) {
    match value.clone() {
        Value::Null(NullKind::Bool) => builder.push_bind(None::<bool>),
        Value::Null(NullKind::Int) => builder.push_bind(None::<i64>),
        Value::Null(NullKind::Float) => builder.push_bind(None::<f64>),
        Value::Null(NullKind::Text) => builder.push_bind(None::<String>),
        Value::Null(NullKind::Bytes) => builder.push_bind(None::<Vec<u8>>),
        Value::Bool(v) => builder.push_bind(v),
        Value::Int(v) => builder.push_bind(v),
        Value::Float(v) => builder.push_bind(v),
        Value::Text(v) => builder.push_bind(v),
        Value::Bytes(v) => builder.push_bind(v),
    };
}

fn statement_query(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    statement
        .args()
        .iter()
        .fold(sqlx::query(statement.sql()), bind_value)
}

/// Number of rows of `n_columns` each that fit in one insert statement.
fn rows_per_insert(n_columns: usize) -> usize {
    (MAX_BIND_PARAMS / n_columns.max(1)).max(1)
}

/// Build the multi-row inserts for `rows`, each within the bind parameter limit.
fn bulk_inserts(spec: &BulkSpec, rows: &[Row]) -> Vec<QueryBuilder<'static, Postgres>> {
    rows.chunks(rows_per_insert(spec.columns().len()))
        .map(|chunk| {
            let mut builder = QueryBuilder::new(spec.insert_prefix());
            builder.push_values(chunk, |mut b, row| {
                for value in row {
                    push_bind_value(&mut b, value);
                }
            });
            if let Some(suffix) = spec.suffix() {
                builder.push(" ");
                builder.push(suffix);
            }
            builder
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn send_batch(
        &self,
        session_id: SessionId,
        statements: &[Statement],
    ) -> Result<(), Error> {
        match statements {
            [] => return Ok(()),
            // a lone statement is atomic without an explicit transaction
            [statement] => {
                statement_query(statement).execute(&self.pool).await?;
            }
            _ => {
                let mut tx = self.pool.begin().await?;
                for statement in statements {
                    statement_query(statement).execute(&mut *tx).await?;
                }
                tx.commit().await?;
            }
        }

        debug!(
            %session_id,
            n_statements = statements.len(),
            "session batch written"
        );
        Ok(())
    }

    async fn insert_bulk(&self, spec: &BulkSpec, rows: &[Row]) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for mut insert in bulk_inserts(spec, rows) {
            insert.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(
            bulk = spec.name(),
            n_rows = rows.len(),
            "bulk written"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.pool.close().await;
        info!("postgres pool closed");
        Ok(())
    }
}
