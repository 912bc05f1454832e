//! Configuration for a query.
//!
//! This module provides:
//!
//! - [`QueryConfig`] and [`QueryConfigBuilder`] for configuring a query
//! - Type-safe options like [`Model`], [`PermissionMode`], and [`SessionId`]
//! - Built-in tool constants in [`tools`]
//!
//! # Example
//!
//! ```no_run
//! use claude_query::config::{QueryConfig, PermissionMode};
//! use std::time::Duration;
//!
//! # fn main() -> claude_query::Result<()> {
//! let config = QueryConfig::builder()
//!     .permission_mode(PermissionMode::BypassPermissions)
//!     .control_timeout(Duration::from_secs(30))
//!     .env("CLAUDE_CODE_ENTRYPOINT", "sdk-rust")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod options;

pub use builder::{QueryConfig, QueryConfigBuilder, DEFAULT_CLI};
pub use options::{tools, Model, PermissionMode, SessionId};
