//! In-process [`CounterStore`], used for dry runs and tests.

use std::{fmt, sync::Mutex};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use super::{CounterStore, Error};
use crate::{
    port::PortId,
    sample::{Reading, Sample},
};

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// A [`CounterStore`] that keeps rows in a `Vec`.
///
/// Every row of one [`CounterStore::insert`] batch shares a timestamp, the
/// way a database `now()` default is fixed for the length of a transaction.
pub struct Memory {
    rows: Mutex<Vec<Row>>,
    clock: Clock,
}

#[derive(Debug, Clone, Copy)]
struct Row {
    port: u32,
    in_octets: u64,
    out_octets: u64,
    timestamp: NaiveDateTime,
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").finish_non_exhaustive()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// An empty store stamping rows with local wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(|| Local::now().naive_local())
    }

    /// An empty store stamping rows with `clock`.
    #[must_use]
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        Self {
            rows: Mutex::new(Vec::new()),
            clock: Box::new(clock),
        }
    }

    /// Total number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Poisoned`] if a writer panicked.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.rows.lock().map_err(|_| Error::Poisoned)?.len())
    }

    /// True if nothing has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Poisoned`] if a writer panicked.
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl CounterStore for Memory {
    async fn ensure_schema(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn insert(&self, readings: &[Reading]) -> Result<usize, Error> {
        let timestamp = (self.clock)();
        let mut rows = self.rows.lock().map_err(|_| Error::Poisoned)?;
        rows.extend(readings.iter().map(|r| Row {
            port: r.port,
            in_octets: r.in_octets,
            out_octets: r.out_octets,
            timestamp,
        }));
        Ok(readings.len())
    }

    async fn fetch(&self, port: PortId) -> Result<Vec<Sample>, Error> {
        let code = port.legacy()?;
        let rows = self.rows.lock().map_err(|_| Error::Poisoned)?;
        Ok(rows
            .iter()
            .filter(|row| row.port == code)
            .map(|row| Sample {
                port,
                in_octets: row.in_octets,
                out_octets: row.out_octets,
                timestamp: row.timestamp,
            })
            .collect())
    }

    async fn fetch_all_port_ids(&self) -> Result<Vec<PortId>, Error> {
        let rows = self.rows.lock().map_err(|_| Error::Poisoned)?;
        let mut codes: Vec<u32> = rows
            .iter()
            .filter(|row| row.in_octets > 0 || row.out_octets > 0)
            .map(|row| row.port)
            .collect();
        codes.sort_unstable();
        codes.dedup();
        Ok(codes.into_iter().map(PortId::from_legacy).collect())
    }
}
