//! The switchmon interface counter collector.
//!
//! The modules here back the `switchmon` binary. A poller reads cumulative
//! octet counters from a switch management API and appends them to a store.
//! Stored series are turned into per-interval deltas and drawn as charts with
//! human readable byte axes.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod chart;
pub mod config;
pub mod delta;
pub mod poller;
pub mod port;
pub mod sample;
pub mod signals;
pub mod store;
pub mod switch;
pub mod units;
