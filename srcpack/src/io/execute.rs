//! Direct execution of [`Step`]s against the host.
//!
//! The only shared mutable state is the process working directory: a
//! [`StepKind::Sequence`] captures it on entry and restores it on every exit
//! path, so a `cd` never outlives the sequence that issued it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::step::{MoveFile, RemoveFiles, RunProcess, Step, StepKind};
use crate::error::StepError;
use crate::io::runner::{Invocation, ProcessRunner};

/// What step execution needs from its environment.
pub struct ExecContext<'a> {
    runner: &'a dyn ProcessRunner,
    privileged: bool,
}

impl<'a> ExecContext<'a> {
    /// Detect privilege from the effective user id.
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self::with_privilege(runner, nix::unistd::geteuid().is_root())
    }

    pub fn with_privilege(runner: &'a dyn ProcessRunner, privileged: bool) -> Self {
        Self { runner, privileged }
    }

    fn needs_sudo(&self, elevated: bool) -> bool {
        elevated && !self.privileged
    }
}

impl Step {
    /// Perform this step now. Sequences stop at the first failing child.
    pub fn execute(&self, ctx: &ExecContext<'_>) -> Result<()> {
        if let Some(description) = &self.description {
            info!(step = %description, "running step");
        }
        if !matches!(self.kind, StepKind::Sequence(_))
            && let Ok(line) = self.render_script_line()
        {
            debug!(%line, "executing");
        }

        match &self.kind {
            StepKind::Run(run) => run_process(run, ctx),
            StepKind::Move(mv) => move_file(mv),
            StepKind::MakeDirectory(path) => {
                fs::create_dir_all(path).with_context(|| format!("create {}", path.display()))
            }
            StepKind::ChangeDirectory(path) => env::set_current_dir(path)
                .with_context(|| format!("change directory to {}", path.display())),
            StepKind::Remove(remove) => remove_files(remove, ctx),
            StepKind::Sequence(children) => run_sequence(children, ctx),
            StepKind::Directive(directive) => Err(StepError::ContainerOnly {
                directive: directive.render(),
            }
            .into()),
        }
    }
}

fn run_process(run: &RunProcess, ctx: &ExecContext<'_>) -> Result<()> {
    run.validate_env()?;
    if run.argv.is_empty() {
        return Err(StepError::EmptyCommand.into());
    }
    let cwd = env::current_dir().context("read current directory")?;
    let invocation = if ctx.needs_sudo(run.elevated) {
        // sudo resets the environment, so the overlay travels as arguments.
        let mut argv = vec!["sudo".to_string()];
        argv.extend(run.env.iter().map(|(key, value)| format!("{key}={value}")));
        argv.extend(run.argv.iter().cloned());
        Invocation {
            argv,
            env: Default::default(),
            cwd,
        }
    } else {
        Invocation {
            argv: run.argv.clone(),
            env: run.env.clone(),
            cwd,
        }
    };
    run_checked(ctx, &invocation)
}

fn run_checked(ctx: &ExecContext<'_>, invocation: &Invocation) -> Result<()> {
    let status = ctx.runner.run(invocation)?;
    if status.success() {
        return Ok(());
    }
    warn!(exit_code = ?status.code(), program = ?invocation.program(), "process failed");
    Err(StepError::CommandFailed {
        command: invocation.argv.join(" "),
        code: status.code(),
    }
    .into())
}

fn expand(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).with_context(|| format!("invalid pattern {pattern}"))?;
    paths
        .map(|entry| entry.with_context(|| format!("expand {pattern}")))
        .collect()
}

fn move_file(mv: &MoveFile) -> Result<()> {
    let sources = if mv.expand {
        let matches = expand(&mv.source)?;
        if matches.is_empty() {
            return Err(StepError::NoMatches {
                pattern: mv.source.clone(),
            }
            .into());
        }
        matches
    } else {
        vec![PathBuf::from(&mv.source)]
    };
    for source in sources {
        let target = move_target(&source, &mv.destination);
        debug!(from = %source.display(), to = %target.display(), "rename");
        fs::rename(&source, &target)
            .with_context(|| format!("move {} to {}", source.display(), target.display()))?;
    }
    Ok(())
}

/// Moving into an existing directory keeps the file name, like `mv`.
fn move_target(source: &Path, destination: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) if destination.is_dir() => destination.join(name),
        _ => destination.to_path_buf(),
    }
}

fn remove_files(remove: &RemoveFiles, ctx: &ExecContext<'_>) -> Result<()> {
    let mut targets = Vec::new();
    for pattern in &remove.patterns {
        targets.extend(expand(pattern)?);
    }
    if targets.is_empty() {
        debug!(patterns = ?remove.patterns, "nothing to remove");
        return Ok(());
    }

    if ctx.needs_sudo(remove.elevated) {
        let mut argv = vec![
            "sudo".to_string(),
            "rm".to_string(),
            if remove.recursive { "-rf" } else { "-f" }.to_string(),
        ];
        argv.extend(targets.iter().map(|path| path.to_string_lossy().into_owned()));
        let invocation = Invocation {
            argv,
            env: Default::default(),
            cwd: env::current_dir().context("read current directory")?,
        };
        return run_checked(ctx, &invocation);
    }

    for target in targets {
        let metadata = match fs::symlink_metadata(&target) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err).with_context(|| format!("stat {}", target.display())),
        };
        if remove.recursive && metadata.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        }
        .with_context(|| format!("remove {}", target.display()))?;
    }
    Ok(())
}

fn run_sequence(children: &[Step], ctx: &ExecContext<'_>) -> Result<()> {
    let guard = DirGuard::capture()?;
    let outcome = children.iter().try_for_each(|child| child.execute(ctx));
    let restored = guard.restore();
    outcome?;
    restored
}

/// Restores the captured working directory when restored or dropped.
struct DirGuard {
    original: Option<PathBuf>,
}

impl DirGuard {
    fn capture() -> Result<Self> {
        let original = env::current_dir().context("read current directory")?;
        Ok(Self {
            original: Some(original),
        })
    }

    fn restore(mut self) -> Result<()> {
        match self.original.take() {
            Some(original) => env::set_current_dir(&original)
                .with_context(|| format!("restore working directory {}", original.display())),
            None => Ok(()),
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original.take()
            && let Err(err) = env::set_current_dir(&original)
        {
            warn!(err = %err, dir = %original.display(), "failed to restore working directory");
        }
    }
}
