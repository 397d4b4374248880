//! Deterministic, pure build logic.
//!
//! Core modules must be free of I/O side effects: they turn program
//! descriptions, sessions and tag lists into steps and recipe text. Executing
//! those steps lives in [`crate::io`].

pub mod pipeline;
pub mod program;
pub mod recipe;
pub mod session;
pub mod step;
pub mod variant;
pub mod version;
