//! `DataBridge` HTTP server.
//!
//! A thin bootstrap around `databridge-core`: wires the barrier, seal
//! manager, connector registry, secure dispatcher, and audit trail into a
//! running Axum server exposing status and control routes. The data-plane
//! itself (queries, schema discovery, credential management) is a library
//! surface in `databridge-core`; this crate only carries the ambient HTTP
//! concerns (health checks, seal lifecycle, connector registration).

pub mod config;
pub mod error;
pub mod hardening;
pub mod routes;
pub mod state;
