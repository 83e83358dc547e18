//! A range server's in-process context: table and range registries,
//! the application and maintenance worker queues, the scanner registry,
//! and the background maintenance scheduler.
//!
//! This crate models the request/response shape of a range server
//! without the wire protocol around it — framing, the async reactor,
//! and RPC serialization are a different crate's job (an explicit
//! Non-goal here). [`RangeServerContext::handle`] is the single entry
//! point a thin RPC layer would call.

mod config;
mod context;
mod request;
mod scanners;
mod tables;
mod workers;

pub use config::ServerConfig;
pub use context::RangeServerContext;
pub use request::{Request, Response, TableSpec};
pub use scanners::ScannerId;
