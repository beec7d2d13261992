//! Session lifecycle for cancelstuff.
//!
//! - [`SessionStore`]: registry of live sessions and the front door for all
//!   per-session work.
//! - [`Workspace`]: per-session working directories.
//! - [`RequestSerializer`]: at most one in-flight task per session.
//! - [`Reaper`]: periodic removal of idle sessions.

pub mod reaper;
pub mod serializer;
pub mod session;
pub mod store;
pub mod workspace;

pub use reaper::{Reaper, ReaperHandle};
pub use serializer::RequestSerializer;
pub use session::{Session, SessionState, SessionSummary};
pub use store::SessionStore;
pub use workspace::{sanitize_filename, skill_dest, sync_template, Workspace};
