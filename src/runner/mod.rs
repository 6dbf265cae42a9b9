//! Session runner.
//!
//! Wraps one invocation of the external agent CLI:
//!
//! ```text
//! workspace setup → fixture copy → metadata.json → agent → session.log → .complete
//! ```
//!
//! Failures at any step are recorded on the [`SessionResult`]; the runner
//! never returns an error to the orchestrator.

pub mod agent;
pub mod metadata;
pub mod result;
pub mod session;
pub mod workspace;

pub use agent::{AgentAdapter, AgentInvocation, CommandAgent};
pub use metadata::{SessionMetadata, METADATA_FILE};
pub use result::{
    SessionResult, SessionStatus, TokenUsage, EXIT_SETUP_ERROR, EXIT_SPAWN_ERROR, EXIT_TIMEOUT,
};
pub use session::{SessionOptions, SessionRunner, PROMPT_FILE, SESSION_LOG, WORKSPACE_DIR};
pub use workspace::{copy_tree, remove_workspace, FixtureResolver, FixtureSource};
