//! HTTP front-end for cancelstuff audits.
//!
//! [`AuditService`] holds the audit flow (start, chat, report, end) on top of
//! the session store. [`GatewayServer`] exposes it as a small JSON API.

pub mod error;
pub mod prompts;
pub mod server;
pub mod service;

pub use error::ApiError;
pub use server::{GatewayServer, DEFAULT_MAX_UPLOAD_BYTES};
pub use service::{AuditService, ChatOutcome, ReportOutcome, StartOutcome};
