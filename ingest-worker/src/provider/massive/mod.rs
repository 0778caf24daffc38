//! Massive (delayed consolidated tape) provider
//!
//! Authoritative but 15-minute-delayed on the plan in use. REST endpoints
//! cover snapshots, grouped daily bars, aggregate ranges, news, financials,
//! and market status; the aggregate-minute stream shares the wire types
//! defined here.

mod client;
mod normalizer;
mod types;

pub use client::MassiveClient;
pub use normalizer::*;
pub use types::*;
