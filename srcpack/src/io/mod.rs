//! I/O adapters: processes, git remotes, container engines and files on disk.

pub mod config;
pub mod engine;
pub mod execute;
pub mod os_release;
pub mod process;
pub mod registry;
pub mod runner;
pub mod tags;
