//! Turn cumulative octet counters into per-interval deltas.
//!
//! Interface counters only ever grow, except when they don't: a device reboot
//! zeroes them and a 64-bit counter eventually wraps. No correction is applied
//! for either. A reset shows up as a negative delta and is passed through
//! unchanged; [`DeltaSample::is_reset`] lets consumers find and drop those
//! points explicitly.

use chrono::{NaiveDateTime, TimeDelta};

use crate::sample::{Direction, Sample};

/// The change in both counters between two consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaSample {
    /// Timestamp of the later sample of the pair.
    pub timestamp: NaiveDateTime,
    /// Time between the two samples.
    pub interval: TimeDelta,
    /// Inbound octets in the interval. Negative across a counter reset.
    pub in_delta: i128,
    /// Outbound octets in the interval. Negative across a counter reset.
    pub out_delta: i128,
}

impl DeltaSample {
    /// The delta for `direction`.
    #[must_use]
    pub fn delta(&self, direction: Direction) -> i128 {
        match direction {
            Direction::Inbound => self.in_delta,
            Direction::Outbound => self.out_delta,
        }
    }

    /// True if either counter went backwards over this interval.
    #[must_use]
    pub fn is_reset(&self) -> bool {
        self.in_delta < 0 || self.out_delta < 0
    }

    /// Octets per second for `direction`, or `None` when the interval is not
    /// positive.
    #[must_use]
    pub fn rate(&self, direction: Direction) -> Option<f64> {
        let millis = self.interval.num_milliseconds();
        if millis <= 0 {
            return None;
        }
        Some(self.delta(direction) as f64 / (millis as f64 / 1_000.0))
    }
}

/// Deltas derived from one port's series, in the series' order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSeries {
    inner: Vec<DeltaSample>,
}

impl DeltaSeries {
    /// Number of deltas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if there are no deltas, i.e. the series had fewer than two samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate the deltas in order.
    pub fn iter(&self) -> std::slice::Iter<'_, DeltaSample> {
        self.inner.iter()
    }

    /// The deltas as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[DeltaSample] {
        &self.inner
    }

    /// Number of intervals over which a counter went backwards.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.inner.iter().filter(|d| d.is_reset()).count()
    }

    /// `(timestamp, delta)` pairs for one direction.
    #[must_use]
    pub fn points(&self, direction: Direction) -> Vec<(NaiveDateTime, i128)> {
        self.inner
            .iter()
            .map(|d| (d.timestamp, d.delta(direction)))
            .collect()
    }
}

impl<'a> IntoIterator for &'a DeltaSeries {
    type Item = &'a DeltaSample;
    type IntoIter = std::slice::Iter<'a, DeltaSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

/// Compute the delta series of `series`.
///
/// The result holds `series.len() - 1` entries, or none for a series shorter
/// than two. Element `i` is stamped with `series[i + 1].timestamp`. Input order
/// is kept; the series is not sorted or checked for monotonic timestamps.
#[must_use]
pub fn normalize(series: &[Sample]) -> DeltaSeries {
    let inner = series
        .windows(2)
        .map(|pair| {
            let (prev, next) = (&pair[0], &pair[1]);
            DeltaSample {
                timestamp: next.timestamp,
                interval: next.timestamp.signed_duration_since(prev.timestamp),
                in_delta: i128::from(next.in_octets) - i128::from(prev.in_octets),
                out_delta: i128::from(next.out_octets) - i128::from(prev.out_octets),
            }
        })
        .collect();

    DeltaSeries { inner }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;
    use crate::port::PortId;

    fn at(seconds: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid date")
            + TimeDelta::seconds(seconds)
    }

    fn series(counters: &[(u64, u64)]) -> Vec<Sample> {
        counters
            .iter()
            .enumerate()
            .map(|(i, &(in_octets, out_octets))| Sample {
                port: PortId::new(1, 1, 1),
                in_octets,
                out_octets,
                timestamp: at(300 * i as i64),
            })
            .collect()
    }

    #[test]
    fn short_series_have_no_deltas() {
        assert!(normalize(&[]).is_empty());
        assert!(normalize(&series(&[(10, 20)])).is_empty());
    }

    #[test]
    fn increasing_counters() {
        let deltas = normalize(&series(&[(100, 0), (250, 0), (400, 0)]));
        let inbound: Vec<i128> = deltas.iter().map(|d| d.in_delta).collect();
        assert_eq!(inbound, vec![150, 150]);
        assert_eq!(deltas.resets(), 0);
    }

    #[test]
    fn counter_reset_passes_through_negative() {
        let deltas = normalize(&series(&[(400, 0), (50, 0)]));
        assert_eq!(deltas.points(Direction::Inbound), vec![(at(300), -350)]);
        assert!(deltas.as_slice()[0].is_reset());
        assert_eq!(deltas.resets(), 1);
    }

    #[test]
    fn end_to_end_pairs_later_timestamp() {
        let deltas = normalize(&series(&[(10, 20), (160, 20), (160, 120)]));
        let got: Vec<(NaiveDateTime, i128, i128)> = deltas
            .iter()
            .map(|d| (d.timestamp, d.in_delta, d.out_delta))
            .collect();
        assert_eq!(got, vec![(at(300), 150, 0), (at(600), 0, 100)]);
    }

    #[test]
    fn full_range_counters_do_not_overflow() {
        let deltas = normalize(&series(&[(u64::MAX, 0), (0, u64::MAX)]));
        let d = deltas.as_slice()[0];
        assert_eq!(d.in_delta, -i128::from(u64::MAX));
        assert_eq!(d.out_delta, i128::from(u64::MAX));
    }

    #[test]
    fn rate_is_per_second() {
        let deltas = normalize(&series(&[(0, 0), (3_000, 600)]));
        let d = deltas.as_slice()[0];
        assert_eq!(d.interval, TimeDelta::seconds(300));
        assert_eq!(d.rate(Direction::Inbound), Some(10.0));
        assert_eq!(d.rate(Direction::Outbound), Some(2.0));
    }

    #[test]
    fn rate_undefined_for_zero_interval() {
        let mut s = series(&[(0, 0), (10, 10)]);
        s[1].timestamp = s[0].timestamp;
        assert_eq!(normalize(&s).as_slice()[0].rate(Direction::Inbound), None);
    }

    proptest! {
        #[test]
        fn length_is_one_less_than_input(
            counters in proptest::collection::vec((any::<u64>(), any::<u64>()), 0..64)
        ) {
            let deltas = normalize(&series(&counters));
            prop_assert_eq!(deltas.len(), counters.len().saturating_sub(1));
        }

        #[test]
        fn deltas_sum_to_net_change(
            counters in proptest::collection::vec((any::<u64>(), any::<u64>()), 2..64)
        ) {
            let deltas = normalize(&series(&counters));
            let sum: i128 = deltas.iter().map(|d| d.in_delta).sum();
            let first = i128::from(counters[0].0);
            let last = i128::from(counters[counters.len() - 1].0);
            prop_assert_eq!(sum, last - first);
        }
    }
}
