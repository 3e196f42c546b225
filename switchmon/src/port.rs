//! Switch port identifiers.
//!
//! A port is addressed as `module/submodule/port`. The switch's management API
//! and the counter table both key ports by a single integer,
//! `module * 1000 + port`, which drops the submodule. [`PortId`] carries the
//! full triple and is what the rest of this crate passes around; the integer
//! form only exists at the storage and ingestion boundary.
//!
//! The legacy integer is lossy. Decoding always reconstructs submodule `1`,
//! which is only correct for chassis where every port lives on submodule 1.
//! [`decode`] of [`encode`] is therefore not an identity for other submodules.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Multiplier applied to the module number in the legacy integer form.
pub const MODULE_STRIDE: u32 = 1_000;

/// Submodule assumed when a legacy integer is decoded.
pub const LEGACY_SUBMODULE: u32 = 1;

/// Errors produced when parsing or encoding a port identifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input was not three `/`-separated non-negative integers.
    #[error("Invalid port format '{0}', expected M/S/P")]
    InvalidFormat(String),
    /// `module * 1000 + port` does not fit the legacy integer.
    #[error("Port {0} does not fit the legacy port integer")]
    Overflow(PortId),
}

/// A switch port address, `module/submodule/port`.
///
/// Ordering is lexicographic over `(module, submodule, port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId {
    /// Chassis module, or slot.
    pub module: u32,
    /// Submodule within the module. Not preserved by the legacy integer.
    pub submodule: u32,
    /// Port number on the submodule.
    pub port: u32,
}

impl PortId {
    /// Create a new [`PortId`].
    #[must_use]
    pub fn new(module: u32, submodule: u32, port: u32) -> Self {
        Self {
            module,
            submodule,
            port,
        }
    }

    /// The legacy integer form, `module * 1000 + port`. The submodule is
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if the result does not fit a `u32`.
    pub fn legacy(&self) -> Result<u32, Error> {
        self.module
            .checked_mul(MODULE_STRIDE)
            .and_then(|m| m.checked_add(self.port))
            .ok_or(Error::Overflow(*self))
    }

    /// Rebuild a [`PortId`] from the legacy integer form. The submodule is
    /// always [`LEGACY_SUBMODULE`].
    #[must_use]
    pub fn from_legacy(code: u32) -> Self {
        Self {
            module: code / MODULE_STRIDE,
            submodule: LEGACY_SUBMODULE,
            port: code % MODULE_STRIDE,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.module, self.submodule, self.port)
    }
}

impl FromStr for PortId {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidFormat(input.to_string());

        let mut parts = input.split('/').map(|token| token.trim().parse::<u32>());
        let (Some(Ok(module)), Some(Ok(submodule)), Some(Ok(port)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        Ok(Self::new(module, submodule, port))
    }
}

impl Serialize for PortId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse an `M/S/P` string straight into the legacy integer.
///
/// # Errors
///
/// Returns [`Error::InvalidFormat`] if `input` is not three `/`-separated
/// non-negative integers, [`Error::Overflow`] if the legacy integer overflows.
pub fn encode(input: &str) -> Result<u32, Error> {
    input.parse::<PortId>()?.legacy()
}

/// Render a legacy integer as `M/1/P`.
#[must_use]
pub fn decode(code: u32) -> String {
    PortId::from_legacy(code).to_string()
}
