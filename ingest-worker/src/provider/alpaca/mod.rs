//! Alpaca (low-latency IEX) provider
//!
//! Real-time, modest-coverage feed that is authoritative for the most
//! recent minutes until the delayed consolidated tape catches up and
//! overwrites them.

mod client;
mod types;

pub use client::AlpacaClient;
pub use types::*;
