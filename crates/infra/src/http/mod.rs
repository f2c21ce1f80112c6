//! HTTP client plumbing shared by the remote adapters

pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
