//! Transparent read caching, write-triggered invalidation and call-level
//! instrumentation over a relational store's query-builder client.

pub mod cache;
pub mod client;
pub mod config;
pub mod infra;
pub mod instrument;
pub mod upstream;
