//! HTTP client for a running lume server.
//!
//! [`LumeClient`] sends [`RequestDescriptor`](lumekit_core::RequestDescriptor)s
//! and maps every failure through [`classify`] into a
//! [`LumeError`](lumekit_core::LumeError). It knows nothing about processes;
//! callers make sure the server is up first.

#![deny(unused_crate_dependencies)]

// Used by integration tests only.
#[cfg(test)]
use axum as _;
#[cfg(test)]
use tokio as _;

pub mod classify;
pub mod client;

pub use classify::{Failure, classify, failure_from_reqwest};
pub use client::LumeClient;
