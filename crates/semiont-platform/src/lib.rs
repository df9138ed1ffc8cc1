//! `semiont-platform`: lifecycle handlers for every deployment target.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::execute(env, service, command)
//!     │  resolve platform, load saved state
//!     ▼
//! HandlerRegistry   ← (platform, service type, command) → handler fn
//!     │                falls back to the platform's `generic` handler
//!     ▼
//! handler(&HandlerContext)
//!     │  shells out through a CommandRunner (aws, docker, kill, tar, ...)
//!     ▼
//! HandlerOutput     ← details + metadata + StateChange
//!     │
//!     ▼
//! CommandResult     ← state applied, errors folded into `success: false`
//! ```
//!
//! Each platform lives in [`platforms`] and contributes its handler table
//! through [`PlatformStrategy`].

pub mod context;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod platforms;
pub mod registry;
pub mod shell;
pub mod strategy;
pub mod test_summary;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{CommandOptions, HandlerContext, HandlerOutput, SecretAction, StateChange};
pub use error::{PlatformError, Result};
pub use orchestrator::Orchestrator;
pub use registry::{HandlerDescriptor, HandlerRegistry};
pub use shell::{CommandRunner, ShellCommand, ShellOutput, SystemRunner};
pub use strategy::PlatformStrategy;
