//! Persistence for counter readings.
//!
//! Readings are appended to a single table and never updated or deleted. The
//! table is keyed by the legacy port integer, see [`crate::port`], and rows are
//! read back per port in insertion order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    port::{self, PortId},
    sample::{Reading, Sample},
};

pub mod memory;
pub mod postgres;

pub use memory::Memory;
pub use postgres::Postgres;

/// Errors produced by a [`CounterStore`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The database driver failed.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// The requested port has no legacy integer form.
    #[error(transparent)]
    Port(#[from] port::Error),
    /// A port integer does not fit the `switchport` column.
    #[error("Port {0} does not fit the switchport column")]
    PortRange(u32),
    /// A counter value does not fit the octet columns.
    #[error("Counter value {0} does not fit the octet columns")]
    CounterRange(u64),
    /// The table returned a value that cannot be a counter or port.
    #[error("Stored value {0} is not a valid counter or port")]
    Corrupt(i64),
    /// The in-memory store's lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// An append-only log of counter samples.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create the counter table if it does not exist.
    async fn ensure_schema(&self) -> Result<(), Error>;

    /// Append `readings` as one batch. Either every reading is stored or none
    /// is. Returns the number of rows written.
    async fn insert(&self, readings: &[Reading]) -> Result<usize, Error>;

    /// Every sample for `port`, in insertion order.
    async fn fetch(&self, port: PortId) -> Result<Vec<Sample>, Error>;

    /// Ports with at least one sample where either counter is non-zero, in
    /// ascending order.
    async fn fetch_all_port_ids(&self) -> Result<Vec<PortId>, Error>;
}

#[async_trait]
impl<T> CounterStore for Arc<T>
where
    T: CounterStore + ?Sized,
{
    async fn ensure_schema(&self) -> Result<(), Error> {
        (**self).ensure_schema().await
    }

    async fn insert(&self, readings: &[Reading]) -> Result<usize, Error> {
        (**self).insert(readings).await
    }

    async fn fetch(&self, port: PortId) -> Result<Vec<Sample>, Error> {
        (**self).fetch(port).await
    }

    async fn fetch_all_port_ids(&self) -> Result<Vec<PortId>, Error> {
        (**self).fetch_all_port_ids().await
    }
}

pub(crate) fn column_port(port: u32) -> Result<i32, Error> {
    i32::try_from(port).map_err(|_| Error::PortRange(port))
}

pub(crate) fn column_counter(value: u64) -> Result<i64, Error> {
    i64::try_from(value).map_err(|_| Error::CounterRange(value))
}

pub(crate) fn counter_from_column(value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::Corrupt(value))
}

pub(crate) fn port_from_column(value: i32) -> Result<PortId, Error> {
    u32::try_from(value)
        .map(PortId::from_legacy)
        .map_err(|_| Error::Corrupt(i64::from(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_conversions_reject_out_of_range() {
        assert!(matches!(column_port(u32::MAX), Err(Error::PortRange(_))));
        assert!(matches!(column_counter(u64::MAX), Err(Error::CounterRange(_))));
        assert!(matches!(counter_from_column(-1), Err(Error::Corrupt(-1))));
        assert!(matches!(port_from_column(-5), Err(Error::Corrupt(-5))));
    }

    #[test]
    fn column_conversions_keep_values() -> Result<(), Error> {
        assert_eq!(column_port(1001)?, 1001);
        assert_eq!(column_counter(42)?, 42);
        assert_eq!(counter_from_column(42)?, 42);
        assert_eq!(port_from_column(2017)?, PortId::new(2, 1, 17));
        Ok(())
    }
}
