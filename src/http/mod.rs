//! Request/response snapshots and the network transport seam.

pub mod client;
pub mod types;

pub use client::{Fetcher, HttpFetcher, Transport};
pub use types::{Request, Response};
