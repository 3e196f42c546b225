//! Counter readings as they move from the switch into the store and back out.

use chrono::NaiveDateTime;

use crate::port::PortId;

/// One poll of one port, before the store stamps it with a time.
///
/// `port` is the legacy port integer exactly as the switch reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Legacy port integer, `module * 1000 + port`.
    pub port: u32,
    /// Cumulative inbound octets, `ifHCInOctets`.
    pub in_octets: u64,
    /// Cumulative outbound octets, `ifHCOutOctets`.
    pub out_octets: u64,
}

/// A stored reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// The port the counters belong to.
    pub port: PortId,
    /// Cumulative inbound octets.
    pub in_octets: u64,
    /// Cumulative outbound octets.
    pub out_octets: u64,
    /// When the store recorded the row.
    pub timestamp: NaiveDateTime,
}

impl Sample {
    /// True if both counters read zero.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_octets == 0 && self.out_octets == 0
    }
}

/// Traffic direction of an interface counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Received octets.
    Inbound,
    /// Transmitted octets.
    Outbound,
}

impl Direction {
    /// Both directions, inbound first.
    pub const ALL: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    /// Short label used in chart legends.
    #[must_use]
    pub fn short(self) -> &'static str {
        match self {
            Direction::Inbound => "In",
            Direction::Outbound => "Out",
        }
    }

    /// Long label used in chart titles.
    #[must_use]
    pub fn long(self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        }
    }

    /// Axis description.
    #[must_use]
    pub fn axis(self) -> &'static str {
        match self {
            Direction::Inbound => "Received",
            Direction::Outbound => "Transmitted",
        }
    }
}
