//! Process runner abstraction for step execution.
//!
//! The [`ProcessRunner`] trait decouples step execution from real process
//! spawning. Tests use recording runners that capture invocations without
//! running compilers or package managers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use anyhow::{Result, bail};

use crate::io::process::run_inherited;

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    /// Overlay merged onto the inherited environment.
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Abstraction over process spawning.
pub trait ProcessRunner {
    /// Run to completion and report the exit status; spawn failures are errors.
    fn run(&self, invocation: &Invocation) -> Result<ExitStatus>;
}

/// Runner that spawns real processes with inherited stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ExitStatus> {
        let Some((program, args)) = invocation.argv.split_first() else {
            bail!("cannot run an empty argument vector");
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&invocation.env)
            .current_dir(&invocation.cwd);
        run_inherited(cmd, None)
    }
}
