//! Network access for the worker.
//!
//! The router never talks to `reqwest` directly; it goes through the
//! `Fetcher` trait so the same strategies run against the real network
//! or a scripted one.

pub mod client;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::http::{Request, Response};

pub use client::HttpFetcher;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request over the network.
    ///
    /// `Err` means the fetch was rejected (no connectivity, DNS, timeout).
    /// Any HTTP status, including 4xx/5xx, comes back as `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, WorkerError>;
}
