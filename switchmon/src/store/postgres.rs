//! PostgreSQL backed [`CounterStore`].
//!
//! The table layout is the one the switch collectors have always written:
//!
//! ```text
//! switchinfos(rowid serial, switchport integer, ifhcinoctets bigint,
//!             ifhcoutoctets bigint, timestamps timestamp default now())
//! ```
//!
//! Connections are drawn from a pool and returned to it on every exit path.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{
    CounterStore, Error, column_counter, column_port, counter_from_column, port_from_column,
};
use crate::{
    config,
    port::PortId,
    sample::{Reading, Sample},
};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS switchinfos (
    rowid SERIAL PRIMARY KEY,
    switchport INTEGER NOT NULL,
    ifhcinoctets BIGINT NOT NULL,
    ifhcoutoctets BIGINT NOT NULL,
    timestamps TIMESTAMP NOT NULL DEFAULT now()
)";

const INSERT: &str =
    "INSERT INTO switchinfos (switchport, ifhcinoctets, ifhcoutoctets) VALUES ($1, $2, $3)";

const SELECT_PORT: &str = "SELECT ifhcinoctets, ifhcoutoctets, timestamps FROM switchinfos \
     WHERE switchport = $1 ORDER BY rowid ASC";

const SELECT_ACTIVE_PORTS: &str = "SELECT DISTINCT switchport FROM switchinfos \
     WHERE ifhcinoctets > 0 OR ifhcoutoctets > 0 ORDER BY switchport ASC";

/// A [`CounterStore`] over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct Postgres {
    pool: PgPool,
}

impl Postgres {
    /// Build a pool from `config`. No connection is made until the first
    /// query.
    #[must_use]
    pub fn connect_lazy(config: &config::Database) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(connect_options(config));
        Self { pool }
    }

    /// Build a pool from `config` and open one connection to prove the
    /// parameters work.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(config: &config::Database) -> Result<Self, Error> {
        info!(
            "Connecting to database {} at {}:{}",
            config.dbname, config.host, config.port
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options(config))
            .await?;
        Ok(Self { pool })
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn connect_options(config: &config::Database) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.dbname)
        .username(&config.user)
        .password(&config.password)
}

#[async_trait]
impl CounterStore for Postgres {
    async fn ensure_schema(&self) -> Result<(), Error> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert(&self, readings: &[Reading]) -> Result<usize, Error> {
        // Convert everything before touching the database so a bad value
        // cannot leave a half written batch behind.
        let rows = readings
            .iter()
            .map(|r| {
                Ok((
                    column_port(r.port)?,
                    column_counter(r.in_octets)?,
                    column_counter(r.out_octets)?,
                ))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.pool.begin().await?;
        for (port, in_octets, out_octets) in &rows {
            sqlx::query(INSERT)
                .bind(port)
                .bind(in_octets)
                .bind(out_octets)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("Inserted {} rows", rows.len());
        Ok(rows.len())
    }

    async fn fetch(&self, port: PortId) -> Result<Vec<Sample>, Error> {
        let code = column_port(port.legacy()?)?;
        let rows: Vec<(i64, i64, NaiveDateTime)> = sqlx::query_as(SELECT_PORT)
            .bind(code)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(in_octets, out_octets, timestamp)| {
                Ok(Sample {
                    port,
                    in_octets: counter_from_column(in_octets)?,
                    out_octets: counter_from_column(out_octets)?,
                    timestamp,
                })
            })
            .collect()
    }

    async fn fetch_all_port_ids(&self) -> Result<Vec<PortId>, Error> {
        let rows: Vec<(i32,)> = sqlx::query_as(SELECT_ACTIVE_PORTS)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|(code,)| port_from_column(code)).collect()
    }
}
