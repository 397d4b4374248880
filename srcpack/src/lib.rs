//! Build third-party programs from source and package them.
//!
//! A program description plus a resolved version becomes a pipeline of
//! [`core::step::Step`]s that either run directly on the host or render into a
//! two-stage container recipe. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (versions, steps, pipeline
//!   assembly, recipe synthesis). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (processes, git remotes, container
//!   engines, definition files). Isolated behind traits to enable fakes.
//!
//! Orchestration modules ([`session`], [`host`], [`container`]) combine the
//! two to implement CLI commands.

pub mod container;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod host;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
