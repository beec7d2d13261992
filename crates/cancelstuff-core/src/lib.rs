//! Core types and error definitions for cancelstuff.
//!
//! This crate provides the types shared across all cancelstuff crates:
//! the unified error enum, the failure taxonomy of the external assistant,
//! and the reply returned by a successful assistant call.
//!
//! # Main types
//!
//! - [`CancelError`]: Unified error enum for all cancelstuff subsystems.
//! - [`CancelResult`]: Convenience alias for `Result<T, CancelError>`.
//! - [`AssistantError`]: Closed set of ways an external assistant call can fail.
//! - [`AssistantReply`]: Text (plus optional cost and session id) returned by the assistant.

/// Assistant reply and failure taxonomy.
pub mod assistant;
/// Unified error type.
pub mod error;

pub use assistant::{AssistantError, AssistantReply};
pub use error::{CancelError, CancelResult};
