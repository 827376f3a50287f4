//! BGP view distribution: a reliable client broker (C1-C3) bridging a
//! master task to a remote view server, plus a per-view consumer pipeline
//! (C4-C7) exemplified by a prefix-to-country geolocation consumer with
//! per-view memoization and visibility-threshold bucketing (C6, C9).
//!
//! One crate root exposing a flat set of top-level modules, each scoped to
//! one component of the design.

pub mod broker;
pub mod config;
pub mod consumers;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod request_table;
pub mod timeseries;
pub mod transport;

pub use error::{BgpviewError, Result};
