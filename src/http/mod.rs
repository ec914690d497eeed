//! HTTP client module for artifact retrieval.

mod client;

pub use client::HttpClient;
