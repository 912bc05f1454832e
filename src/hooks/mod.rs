//! Hook registration and dispatch.
//!
//! Callbacks are grouped by [`HookEvent`] and [`HookMatcher`]. When the peer
//! raises a hook, every matching callback runs in registration order and the
//! outputs are folded into one answer:
//!
//! ```no_run
//! use claude_query::hooks::{HookEvent, HookInput, HookMatcher, HookOutput, Hooks};
//!
//! let hooks = Hooks::new().on(
//!     HookEvent::PreToolUse,
//!     HookMatcher::new("Bash").hook(|input: HookInput| async move {
//!         let command = input
//!             .tool_input()
//!             .and_then(|i| i["command"].as_str())
//!             .unwrap_or_default()
//!             .to_string();
//!         if command.starts_with("rm ") {
//!             return Ok::<_, claude_query::BoxError>(HookOutput::deny("rm is not allowed"));
//!         }
//!         Ok(HookOutput::empty())
//!     }),
//! );
//! ```

mod dispatcher;
mod matcher;
mod types;

pub use dispatcher::{CallbackId, Diagnostics, HookDispatcher, HookFailure, HookOutcome};
pub use matcher::{HookMatcher, Hooks};
pub use types::{
    HookCallback, HookDecision, HookEvent, HookInput, HookOutput, HookSpecificOutput,
    PermissionDecision,
};
