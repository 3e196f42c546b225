//! The polling loop.
//!
//! Each iteration logs in to the switch, reads every interface counter,
//! optionally writes them to a JSON snapshot and appends them to the store. A
//! failed iteration is logged and retried after a cooldown that grows with
//! consecutive failures. Neither kind of failure stops the loop, only the
//! shutdown signal does.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use metrics::counter;
use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config,
    sample::Reading,
    signals::Shutdown,
    store::{self, CounterStore},
    switch::{self, Switch},
};

/// Upper bound of the random jitter, as a fraction of the delay.
const JITTER_FRACTION: f64 = 0.1;

/// Errors produced by [`Poller`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Talking to the switch failed.
    #[error("Ingestion failed: {0}")]
    Switch(#[from] switch::Error),
    /// Writing to the store failed.
    #[error("Store failed: {0}")]
    Store(#[from] store::Error),
    /// The snapshot could not be encoded.
    #[error("Failed to encode snapshot: {0}")]
    SnapshotEncode(#[from] serde_json::Error),
    /// The snapshot could not be written.
    #[error("Failed to write snapshot {path:?}: {source}")]
    Snapshot {
        /// Snapshot path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Exponential cooldown between failed polls.
///
/// The first failure waits `base`, each further consecutive failure doubles
/// the wait up to `max`. Up to ten percent of random jitter is added on top so
/// that several collectors restarted together drift apart.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// Create a new [`Backoff`]. `max` is raised to `base` if smaller.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Consecutive failures recorded since the last reset.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The un-jittered delay the next failure will wait.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let factor = 1_u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    /// As [`Backoff::next_delay`] with an explicit source of randomness.
    pub fn next_delay_with<R>(&mut self, rng: &mut R) -> Duration
    where
        R: Rng + ?Sized,
    {
        let delay = self.ceiling();
        self.failures = self.failures.saturating_add(1);
        let jitter = rng.random_range(0.0..=JITTER_FRACTION);
        delay.saturating_add(delay.mul_f64(jitter))
    }

    /// Forget past failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[derive(Debug, Serialize)]
struct SnapshotRow {
    #[serde(rename = "ifHCInOctets")]
    in_octets: u64,
    #[serde(rename = "ifHCOutOctets")]
    out_octets: u64,
}

/// Polls one switch into one store until shut down.
#[derive(Debug)]
pub struct Poller<S> {
    config: config::Poll,
    switch: Switch,
    store: S,
    shutdown: Shutdown,
    backoff: Backoff,
}

impl<S> Poller<S>
where
    S: CounterStore,
{
    /// Create a new [`Poller`]. The store's schema is expected to exist.
    #[must_use]
    pub fn new(config: config::Poll, switch: Switch, store: S, shutdown: Shutdown) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(config.retry_seconds),
            Duration::from_secs(config.max_retry_seconds),
        );
        Self {
            config,
            switch,
            store,
            shutdown,
            backoff,
        }
    }

    /// Run one iteration: authenticate, fetch, snapshot, store. Returns the
    /// number of rows stored.
    ///
    /// A snapshot that cannot be written is logged and does not fail the
    /// iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if the switch or the store fail.
    pub async fn poll_once(&self) -> Result<usize, Error> {
        counter!("switchmon.polls").increment(1);
        let result = self.poll().await;
        if result.is_err() {
            counter!("switchmon.poll_failures").increment(1);
        }
        result
    }

    async fn poll(&self) -> Result<usize, Error> {
        self.switch.authenticate().await?;
        let readings = self.switch.fetch_counters().await?;

        if let Some(path) = &self.config.snapshot_path {
            if let Err(err) = write_snapshot(path.clone(), &readings).await {
                warn!("{err}");
            }
        }

        let rows = self.store.insert(&readings).await?;
        counter!("switchmon.rows_inserted").increment(rows as u64);
        info!("Stored {rows} readings from {}", self.switch.address());
        Ok(rows)
    }

    /// Run this [`Poller`] to completion
    ///
    /// Polls immediately, then every `interval_seconds` while polls succeed
    /// and after a growing cooldown while they fail. Returns once the shutdown
    /// signal is received, abandoning any poll in flight.
    ///
    /// # Errors
    ///
    /// None are known.
    pub async fn run(mut self) -> Result<(), Error> {
        info!(
            "Polling {} every {:?}",
            self.switch.address(),
            self.config.interval()
        );

        let mut shutdown = self.shutdown.clone();
        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);

        loop {
            let outcome = tokio::select! {
                outcome = self.poll_once() => outcome,
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            };

            let wait = match outcome {
                Ok(_) => {
                    self.backoff.reset();
                    self.config.interval()
                }
                Err(err) => {
                    let wait = self.backoff.next_delay();
                    error!(
                        "Poll failed ({} in a row), retrying in {wait:?}: {err}",
                        self.backoff.failures()
                    );
                    wait
                }
            };

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

async fn write_snapshot(path: PathBuf, readings: &[Reading]) -> Result<(), Error> {
    let rows: BTreeMap<u32, SnapshotRow> = readings
        .iter()
        .map(|r| {
            (
                r.port,
                SnapshotRow {
                    in_octets: r.in_octets,
                    out_octets: r.out_octets,
                },
            )
        })
        .collect();
    let body = serde_json::to_vec_pretty(&rows)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Snapshot {
                    path: path.clone(),
                    source,
                })?;
        }
    }
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| Error::Snapshot { path, source })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        port::PortId,
        store::Memory,
        switch::tests::{ROWS, mock_switch, switch_config},
    };

    fn poll_config(snapshot_path: Option<PathBuf>) -> config::Poll {
        config::Poll {
            interval_seconds: 3600,
            retry_seconds: 3600,
            max_retry_seconds: 3600,
            snapshot_path,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(900));

        let mut ceilings = Vec::new();
        for _ in 0..7 {
            let ceiling = backoff.ceiling();
            let delay = backoff.next_delay_with(&mut rng);
            assert!(delay >= ceiling);
            assert!(delay <= ceiling.mul_f64(1.0 + JITTER_FRACTION));
            ceilings.push(ceiling.as_secs());
        }
        assert_eq!(ceilings, vec![60, 120, 240, 480, 900, 900, 900]);
        assert_eq!(backoff.failures(), 7);
    }

    #[test]
    fn backoff_reset_returns_to_base() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(900));
        backoff.next_delay_with(&mut rng);
        backoff.next_delay_with(&mut rng);
        backoff.reset();
        assert_eq!(backoff.ceiling(), Duration::from_secs(60));
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn backoff_survives_many_failures() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(30));
        for _ in 0..100 {
            backoff.next_delay_with(&mut rng);
        }
        assert_eq!(backoff.ceiling(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn poll_once_stores_and_snapshots() -> Result<(), Box<dyn std::error::Error>> {
        let (addr, server) = mock_switch("switch", ROWS);
        let _handle = tokio::spawn(server);

        let dir = tempfile::tempdir()?;
        let snapshot = dir.path().join("BDDJson").join("transformed_data.json");
        let store = Arc::new(Memory::new());
        let poller = Poller::new(
            poll_config(Some(snapshot.clone())),
            Switch::new(&switch_config(addr, "switch"))?,
            Arc::clone(&store),
            Shutdown::new(),
        );

        assert_eq!(poller.poll_once().await?, 3);
        assert_eq!(store.fetch(PortId::new(1, 1, 2)).await?[0].in_octets, 5000);
        assert_eq!(
            store.fetch_all_port_ids().await?,
            vec![PortId::new(1, 1, 1), PortId::new(1, 1, 2)]
        );

        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&snapshot)?)?;
        assert_eq!(written["1001"]["ifHCInOctets"], 1234);
        assert_eq!(written["1001"]["ifHCOutOctets"], 4321);
        assert_eq!(written["2017"]["ifHCOutOctets"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_authentication_stores_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let (addr, server) = mock_switch("switch", ROWS);
        let _handle = tokio::spawn(server);

        let store = Arc::new(Memory::new());
        let poller = Poller::new(
            poll_config(None),
            Switch::new(&switch_config(addr, "wrong"))?,
            Arc::clone(&store),
            Shutdown::new(),
        );

        let result = poller.poll_once().await;
        assert!(matches!(
            result,
            Err(Error::Switch(switch::Error::Authentication(_)))
        ));
        assert!(store.is_empty()?);
        Ok(())
    }

    #[tokio::test]
    async fn run_polls_until_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let (addr, server) = mock_switch("switch", ROWS);
        let _handle = tokio::spawn(server);

        let store = Arc::new(Memory::new());
        let shutdown = Shutdown::new();
        let poller = Poller::new(
            poll_config(None),
            Switch::new(&switch_config(addr, "switch"))?,
            Arc::clone(&store),
            shutdown.clone(),
        );
        let handle = tokio::spawn(poller.run());

        // The first poll happens immediately, the next one an hour later.
        tokio::time::timeout(Duration::from_secs(10), async {
            while store.is_empty().unwrap_or(true) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;

        shutdown.signal();
        tokio::time::timeout(Duration::from_secs(5), handle).await???;
        assert_eq!(store.len()?, 3);
        Ok(())
    }
}
