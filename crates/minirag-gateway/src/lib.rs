//! HTTP gateway: routing, auth resolution, request/response mapping, SSE
//! serialization, CORS, and the stats cache. The binary in `main.rs` wires
//! this together with the worker and serves it.

pub mod admission;
pub mod app;
pub mod auth;
pub mod error;
pub mod http;
pub mod stats_cache;
